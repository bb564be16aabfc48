//! Gateway implementations for chat platforms.
//!
//! # Available Gateways
//!
//! - [`cli::ConsoleGateway`] - terminal session (always available)
//! - [`telegram::TelegramGateway`] - Telegram bot (requires `telegram` feature)
//!
//! # Feature Flags
//!
//! - `telegram` - Enable Telegram support via teloxide

pub mod cli;

#[cfg(feature = "telegram")]
pub mod telegram;

pub use cli::{ConsoleConfig, ConsoleGateway, run_interactive};

#[cfg(feature = "telegram")]
pub use telegram::{TelegramConfig, TelegramGateway};
