//! Conversational state machine.
//!
//! - [`node`] - the [`InteractionNode`] trait and substate slots
//! - [`validate`] - input validation pipeline
//! - [`field`], [`form`], [`branch`] - reusable prompt, form, and menu nodes
//! - [`session`] - the per-chat root node with its command table
//! - [`dispatcher`] - routes inbound events to sessions

pub mod branch;
pub mod dispatcher;
pub mod field;
pub mod form;
pub mod node;
pub mod session;
pub mod validate;

pub use branch::{MenuBranch, MenuItem};
pub use dispatcher::{DialogFactory, Dispatcher};
pub use field::{FieldButton, InputField};
pub use form::InputForm;
pub use node::{Callback, DialogContext, Enter, InteractionNode, Outcome, Substate, callback};
pub use session::{Command, CommandFn, Dialog, NOT_UNDERSTOOD, NOTHING_TO_DO, UNKNOWN_COMMAND};
pub use validate::{BoxValidator, Validator, Verdict};
