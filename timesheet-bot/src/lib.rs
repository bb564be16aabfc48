//! Timesheet Bot - event schedules with live-synchronized chat posts.
//!
//! Users build timesheets through chat dialogs, publish them to channels as
//! live posts that follow every edit, and schedule periodic reposts.
//!
//! # Architecture
//!
//! - **Dialogs** ([`dialog`]) - hierarchical state machine: field prompts,
//!   forms, menus, validation
//! - **Live posts** ([`sync`]) - messages kept in step with their source
//! - **Periodic actions** ([`cron`]) - schedulers with catch-up after downtime
//! - **Events** ([`emitter`]) - topic-keyed listeners with disposable
//!   subscriptions
//! - **Gateways** ([`gateway`], [`channels`]) - the only way out to a platform
//! - **Bot** ([`bot`]) - wires everything around the inbound [`bus`]
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use timesheet_bot::prelude::*;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let gateway = Arc::new(ConsoleGateway::new());
//!     let bot = Bot::open(BotConfig::default(), gateway.clone())?;
//!     tokio::select! {
//!         result = bot.run() => result?,
//!         result = run_interactive(&gateway, bot.bus()) => result?,
//!     }
//!     Ok(())
//! }
//! ```
//!
//! # Features
//!
//! - `telegram` - Enable the Telegram gateway via teloxide

// Core modules
pub mod bus;
pub mod error;
pub mod events;
pub mod gateway;
pub mod store;
pub mod util;

// State machine and live content
pub mod cron;
pub mod dialog;
pub mod emitter;
pub mod sync;

// Application
pub mod bot;
pub mod channels;
pub mod config;
pub mod timesheet;

/// Prelude module for convenient imports.
pub mod prelude {
    // Error types (centralized)
    pub use crate::error::{
        BotError, BusError, BusResult, ConfigError, ConfigResult, DialogError, DialogResult,
        ErrorContext, GatewayError, GatewayResult, Result, StorageError, StorageResult,
        SyncError, SyncResult,
    };

    // Bot
    pub use crate::bot::{Bot, RestoreReport};

    // Bus
    pub use crate::bus::{InboundHandle, MessageBus, MessageBusBuilder};

    // Gateways
    pub use crate::channels::{ConsoleConfig, ConsoleGateway, run_interactive};
    #[cfg(feature = "telegram")]
    pub use crate::channels::{TelegramConfig, TelegramGateway};
    pub use crate::gateway::{Destination, MemoryGateway, MessageId, MessagingGateway};

    // Config
    pub use crate::config::{
        BotConfig, ConfigIssue, IssueLevel, ScheduleConfig, TelegramSettings, config_path,
        init_config, load_config, save_config,
    };

    // Events
    pub use crate::emitter::{Emitter, Subscription};
    pub use crate::events::{
        ButtonEvent, Content, Emoji, InboundEvent, KeyButton, Keyboard, TextEvent,
    };

    // Dialogs
    pub use crate::dialog::{
        Dialog, DialogContext, Dispatcher, InputField, InputForm, InteractionNode, MenuBranch,
        MenuItem, Outcome,
    };

    // Live posts
    pub use crate::sync::{ContentSource, LiveSync, RenderFilter, TranslationRegistry};

    // Periodic actions
    pub use crate::cron::{
        ActionRegistry, Clock, ManualClock, Period, PeriodicAction, PeriodicScheduler,
        SystemClock,
    };

    // Storage
    pub use crate::store::{FileStore, KeyValueStore, MemoryStore};

    // Domain
    pub use crate::timesheet::{Services, TimesheetBook};

    // Utilities
    pub use crate::util::{config_dir, data_path, generate_token, home_dir, truncate_str};
}
