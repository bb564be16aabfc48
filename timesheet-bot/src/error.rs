//! Unified error types for timesheet-bot.
//!
//! This module provides the error hierarchy for the bot. Every
//! module-specific error can be converted into the main `BotError` type.

use std::fmt;

// ============================================================================
// Main Error Type
// ============================================================================

/// The main error type for timesheet-bot operations.
#[derive(Debug, thiserror::Error)]
pub enum BotError {
    /// Message bus error.
    #[error("bus: {0}")]
    Bus(#[from] BusError),

    /// Messaging gateway error.
    #[error("gateway: {0}")]
    Gateway(#[from] GatewayError),

    /// Dialog processing error.
    #[error("dialog: {0}")]
    Dialog(#[from] DialogError),

    /// Live content synchronization error.
    #[error("sync: {0}")]
    Sync(#[from] SyncError),

    /// Configuration error.
    #[error("config: {0}")]
    Config(#[from] ConfigError),

    /// Persistence error.
    #[error("storage: {0}")]
    Storage(#[from] StorageError),

    /// IO error.
    #[error("io: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error.
    #[error("json: {0}")]
    Json(#[from] serde_json::Error),

    /// Task join error.
    #[error("task: {0}")]
    Task(String),

    /// Generic internal error.
    #[error("{0}")]
    Internal(String),
}

impl BotError {
    /// Create a config error from a string.
    #[inline]
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(ConfigError::Invalid(msg.into()))
    }
}

impl From<tokio::task::JoinError> for BotError {
    fn from(err: tokio::task::JoinError) -> Self {
        Self::Task(err.to_string())
    }
}

/// Result type alias for timesheet-bot operations.
pub type Result<T> = std::result::Result<T, BotError>;

// ============================================================================
// Message Bus Errors
// ============================================================================

/// Error type for message bus operations.
#[derive(Debug, thiserror::Error)]
pub enum BusError {
    /// The inbound queue is closed.
    #[error("inbound channel closed")]
    InboundClosed,

    /// The inbound receiver was already taken by another consumer.
    #[error("inbound receiver already taken")]
    ReceiverTaken,
}

/// Result type for message bus operations.
pub type BusResult<T> = std::result::Result<T, BusError>;

// ============================================================================
// Gateway Errors
// ============================================================================

/// Error type for outbound messaging operations.
///
/// The variants are the failure classes a live post needs to tell apart:
/// an unchanged edit, a target that is gone for good, or a transport hiccup.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GatewayError {
    /// The edit would not change the message.
    #[error("message is not modified")]
    NotModified,

    /// The message to edit no longer exists.
    #[error("message to edit not found")]
    MessageNotFound,

    /// The message id is not valid for this chat.
    #[error("message id is invalid")]
    InvalidMessageId,

    /// The destination chat does not exist.
    #[error("chat not found")]
    ChatNotFound,

    /// The bot lost its access to the chat (kicked, blocked, no rights).
    #[error("access lost: {0}")]
    AccessLost(String),

    /// Any other transport failure.
    #[error("transport: {0}")]
    Transport(String),
}

impl GatewayError {
    /// Create a transport error.
    #[inline]
    pub fn transport(msg: impl Into<String>) -> Self {
        Self::Transport(msg.into())
    }

    /// Whether the error only says that nothing changed.
    #[must_use]
    pub const fn is_not_modified(&self) -> bool {
        matches!(self, Self::NotModified)
    }

    /// Whether the target message can never be edited again.
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::MessageNotFound | Self::InvalidMessageId | Self::ChatNotFound | Self::AccessLost(_)
        )
    }
}

/// Result type for gateway operations.
pub type GatewayResult<T> = std::result::Result<T, GatewayError>;

// ============================================================================
// Dialog Errors
// ============================================================================

/// Error type for conversational state processing.
#[derive(Debug, thiserror::Error)]
pub enum DialogError {
    /// A node received an event it has no handler for.
    #[error("unhandled event: {0}")]
    Unhandled(String),

    /// A form was built without fields.
    #[error("form has no fields")]
    EmptyForm,

    /// A command handler failed.
    #[error("command /{command}: {reason}")]
    Command {
        /// Command name without the leading slash.
        command: String,
        /// What went wrong.
        reason: String,
    },

    /// Outbound messaging failed.
    #[error("gateway: {0}")]
    Gateway(#[from] GatewayError),

    /// A live post operation failed.
    #[error("sync: {0}")]
    Sync(#[from] SyncError),

    /// Persistence failed.
    #[error("storage: {0}")]
    Storage(#[from] StorageError),
}

impl DialogError {
    /// Create an unhandled event error.
    #[inline]
    pub fn unhandled(msg: impl Into<String>) -> Self {
        Self::Unhandled(msg.into())
    }

    /// Create a command error.
    #[inline]
    pub fn command(command: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Command {
            command: command.into(),
            reason: reason.into(),
        }
    }
}

/// Result type for dialog operations.
pub type DialogResult<T> = std::result::Result<T, DialogError>;

// ============================================================================
// Sync Errors
// ============================================================================

/// Error type for live content synchronization.
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    /// The synchronizer was destroyed and rejects further work.
    #[error("translation {0} is destroyed")]
    Destroyed(u64),

    /// The synchronizer has no message to edit yet.
    #[error("translation {0} is not connected")]
    NotConnected(u64),

    /// The data source could not be resolved.
    #[error("source missing: {0}")]
    SourceMissing(String),

    /// Rendering produced nothing to show.
    #[error("nothing to render")]
    EmptyContent,

    /// Outbound messaging failed.
    #[error("gateway: {0}")]
    Gateway(#[from] GatewayError),

    /// Persistence failed.
    #[error("storage: {0}")]
    Storage(#[from] StorageError),
}

/// Result type for sync operations.
pub type SyncResult<T> = std::result::Result<T, SyncError>;

// ============================================================================
// Configuration Errors
// ============================================================================

/// Error type for configuration operations.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// IO error.
    #[error("io: {0}")]
    Io(#[from] std::io::Error),

    /// JSON parsing error.
    #[error("parse: {0}")]
    Parse(#[from] serde_json::Error),

    /// Invalid value.
    #[error("invalid: {0}")]
    Invalid(String),
}

impl ConfigError {
    /// Create an invalid value error.
    #[inline]
    pub fn invalid(msg: impl Into<String>) -> Self {
        Self::Invalid(msg.into())
    }
}

/// Result type for configuration operations.
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

// ============================================================================
// Storage Errors
// ============================================================================

/// Error type for key/value persistence.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// IO error.
    #[error("io: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error.
    #[error("json: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type for storage operations.
pub type StorageResult<T> = std::result::Result<T, StorageError>;

// ============================================================================
// Error Context Extension
// ============================================================================

/// Extension trait for adding context to errors.
pub trait ErrorContext<T> {
    /// Add context to an error.
    fn context(self, msg: impl Into<String>) -> Result<T>;

    /// Add context using a closure (lazy evaluation).
    fn with_context<F: FnOnce() -> String>(self, f: F) -> Result<T>;
}

impl<T, E: Into<BotError>> ErrorContext<T> for std::result::Result<T, E> {
    fn context(self, msg: impl Into<String>) -> Result<T> {
        self.map_err(|e| {
            let err = e.into();
            BotError::Internal(format!("{}: {}", msg.into(), err))
        })
    }

    fn with_context<F: FnOnce() -> String>(self, f: F) -> Result<T> {
        self.map_err(|e| {
            let err = e.into();
            BotError::Internal(format!("{}: {}", f(), err))
        })
    }
}

// ============================================================================
// Display Helpers
// ============================================================================

/// A wrapper that displays errors in a user-friendly format.
#[derive(Debug)]
pub struct DisplayError<'a>(pub &'a BotError);

impl fmt::Display for DisplayError<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0 {
            BotError::Bus(e) => write!(f, "Message bus error: {e}"),
            BotError::Gateway(e) => write!(f, "Messaging error: {e}"),
            BotError::Dialog(e) => write!(f, "Dialog error: {e}"),
            BotError::Sync(e) => write!(f, "Live post error: {e}"),
            BotError::Config(e) => write!(f, "Configuration error: {e}"),
            BotError::Storage(e) => write!(f, "Storage error: {e}"),
            BotError::Io(e) => write!(f, "IO error: {e}"),
            BotError::Json(e) => write!(f, "JSON error: {e}"),
            BotError::Task(e) => write!(f, "Task error: {e}"),
            BotError::Internal(e) => write!(f, "Internal error: {e}"),
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_conversions() {
        let bot_err: BotError = BusError::InboundClosed.into();
        assert!(matches!(bot_err, BotError::Bus(_)));

        let bot_err: BotError = GatewayError::ChatNotFound.into();
        assert!(matches!(bot_err, BotError::Gateway(_)));

        let sync_err: SyncError = GatewayError::NotModified.into();
        let dialog_err: DialogError = sync_err.into();
        assert!(matches!(dialog_err, DialogError::Sync(SyncError::Gateway(_))));
    }

    #[test]
    fn test_gateway_classification() {
        assert!(GatewayError::NotModified.is_not_modified());
        assert!(!GatewayError::NotModified.is_fatal());

        assert!(GatewayError::MessageNotFound.is_fatal());
        assert!(GatewayError::InvalidMessageId.is_fatal());
        assert!(GatewayError::ChatNotFound.is_fatal());
        assert!(GatewayError::AccessLost("kicked".into()).is_fatal());

        assert!(!GatewayError::transport("timeout").is_fatal());
    }

    #[test]
    fn test_error_helpers() {
        let err = BotError::config("invalid value");
        assert!(matches!(err, BotError::Config(_)));

        let err = DialogError::command("new", "no name");
        assert_eq!(err.to_string(), "command /new: no name");
    }

    #[test]
    fn test_context() {
        let res: std::result::Result<(), BusError> = Err(BusError::InboundClosed);
        let err = res.context("publishing").unwrap_err();
        assert_eq!(err.to_string(), "publishing: bus: inbound channel closed");

        let res: std::result::Result<(), GatewayError> = Err(GatewayError::ChatNotFound);
        let err = res.with_context(|| format!("posting to {}", 42)).unwrap_err();
        assert!(matches!(err, BotError::Internal(_)));
    }
}
