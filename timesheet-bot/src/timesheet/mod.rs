//! Event schedules: the data live posts are made of, and the chat commands
//! that edit them.

pub mod book;
pub mod commands;
pub mod editor;
pub mod entity;
pub mod model;

pub use book::{PROFILE_CATEGORY, SETTINGS_CATEGORY, TIMESHEET_CATEGORY, TimesheetBook};
pub use commands::{COMMANDS, Services, TimesheetDialog, dialog};
pub use editor::EventEditor;
pub use entity::Entity;
pub use model::{ChatSettings, EventEntry, Timesheet, UserProfile, render_post};
