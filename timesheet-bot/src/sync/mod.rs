//! Live content synchronization.
//!
//! A live post is a message that follows its data: when the source changes,
//! the message is edited in place. [`LiveSync`] does this for one message and
//! [`TranslationRegistry`] owns all of them.

pub mod registry;
pub mod source;
pub mod translation;

pub use registry::TranslationRegistry;
pub use source::{ChangeListener, ContentSource, RenderFilter, SourceResolver};
pub use translation::{Destroyed, LiveSync, SyncTopic, TranslationRecord};
