//! Console gateway for local runs.
//!
//! Messages are printed to stdout with their buttons numbered; typing `#n`
//! presses button `n` of the latest keyboard, anything else is sent as text.

use crate::bus::MessageBus;
use crate::error::{GatewayResult, Result};
use crate::events::{ButtonEvent, Content, InboundEvent, KeyButton, TextEvent};
use crate::gateway::{Destination, GatewayBase, GatewayStats, MessageId, MessagingGateway};
use crate::util::generate_token;
use async_trait::async_trait;
use std::io::Write;
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::{Mutex, PoisonError};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::debug;

/// Console gateway configuration.
#[derive(Debug, Clone)]
pub struct ConsoleConfig {
    /// Prompt shown before reading input.
    pub prompt: String,
    /// Session id of the console user.
    pub session_id: String,
}

impl Default for ConsoleConfig {
    fn default() -> Self {
        Self {
            prompt: "You: ".to_string(),
            session_id: "console".to_string(),
        }
    }
}

impl ConsoleConfig {
    /// Create a new config with defaults.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the prompt.
    #[must_use]
    pub fn prompt(mut self, prompt: impl Into<String>) -> Self {
        self.prompt = prompt.into();
        self
    }

    /// Set the session id.
    #[must_use]
    pub fn session_id(mut self, id: impl Into<String>) -> Self {
        self.session_id = id.into();
        self
    }
}

/// Gateway printing to the terminal.
pub struct ConsoleGateway {
    base: GatewayBase,
    config: ConsoleConfig,
    next_id: AtomicI32,
    buttons: Mutex<Vec<KeyButton>>,
}

impl std::fmt::Debug for ConsoleGateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConsoleGateway")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl Default for ConsoleGateway {
    fn default() -> Self {
        Self::new()
    }
}

impl ConsoleGateway {
    /// Console gateway with default config.
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(ConsoleConfig::default())
    }

    /// Console gateway with custom config.
    #[must_use]
    pub fn with_config(config: ConsoleConfig) -> Self {
        Self {
            base: GatewayBase::new("console"),
            config,
            next_id: AtomicI32::new(1),
            buttons: Mutex::new(Vec::new()),
        }
    }

    /// The console configuration.
    #[must_use]
    pub const fn config(&self) -> &ConsoleConfig {
        &self.config
    }

    /// Traffic counters.
    pub async fn stats(&self) -> GatewayStats {
        self.base.stats().await
    }

    /// Render content as terminal text, numbering buttons from 1.
    ///
    /// The numbered buttons become the ones `#n` refers to.
    fn render(&self, header: &str, content: &Content) -> String {
        let mut out = format!("{header}\n{}", content.plain_text());
        let mut numbered = Vec::new();
        if let Some(keyboard) = &content.keyboard {
            for row in &keyboard.rows {
                out.push('\n');
                for button in row {
                    numbered.push(button.clone());
                    out.push_str(&format!(" [{}] {}", numbered.len(), button.title));
                }
            }
        }
        *self.buttons.lock().unwrap_or_else(PoisonError::into_inner) = numbered;
        out
    }

    /// Turn one input line into an event. `None` for `#n` without button `n`.
    #[must_use]
    pub fn parse_input(&self, line: &str) -> Option<InboundEvent> {
        let session = &self.config.session_id;
        let Some(number) = line.strip_prefix('#').and_then(|n| n.trim().parse::<usize>().ok())
        else {
            return Some(TextEvent::new(session, line).into());
        };
        let buttons = self.buttons.lock().unwrap_or_else(PoisonError::into_inner);
        let button = buttons.get(number.checked_sub(1)?)?;
        Some(ButtonEvent::new(session, &button.token, session, generate_token()).into())
    }

    #[allow(clippy::print_stdout)] // console output is the point
    fn print(&self, text: &str) {
        println!("\n{text}\n");
        print!("{}", self.config.prompt);
        let _ = std::io::stdout().flush();
    }
}

#[async_trait]
impl MessagingGateway for ConsoleGateway {
    fn name(&self) -> &str {
        self.base.name()
    }

    async fn send(&self, to: &Destination, content: &Content) -> GatewayResult<MessageId> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let text = self.render(&format!("[{to} #{id}]"), content);
        self.print(&text);
        self.base.record_sent().await;
        Ok(id)
    }

    async fn edit(
        &self,
        to: &Destination,
        message_id: MessageId,
        content: &Content,
    ) -> GatewayResult<()> {
        let text = self.render(&format!("[{to} #{message_id} edited]"), content);
        self.print(&text);
        self.base.record_edited().await;
        Ok(())
    }

    async fn acknowledge(&self, activation_id: &str, text: &str) -> GatewayResult<()> {
        debug!(activation_id, "console acknowledge");
        if !text.is_empty() {
            self.print(&format!("  ({text})"));
        }
        self.base.record_acknowledged().await;
        Ok(())
    }

    async fn pin(&self, to: &Destination, message_id: MessageId) -> GatewayResult<()> {
        self.print(&format!("[{to} #{message_id} pinned]"));
        Ok(())
    }

    async fn unpin(&self, to: &Destination, message_id: MessageId) -> GatewayResult<()> {
        self.print(&format!("[{to} #{message_id} unpinned]"));
        Ok(())
    }
}

/// Read stdin until `exit` and publish every line to `bus`.
#[allow(clippy::print_stdout)] // console output is the point
pub async fn run_interactive(gateway: &ConsoleGateway, bus: &MessageBus) -> Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    print!("{}", gateway.config.prompt);
    let _ = std::io::stdout().flush();

    while let Some(line) = lines.next_line().await? {
        let trimmed = line.trim();

        if matches!(trimmed, "exit" | "quit" | "/quit") {
            break;
        }

        if trimmed.is_empty() {
            print!("{}", gateway.config.prompt);
            let _ = std::io::stdout().flush();
            continue;
        }

        match gateway.parse_input(trimmed) {
            Some(event) => bus.publish_inbound(event).await?,
            None => gateway.print("No such button"),
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::Keyboard;

    fn keyboard() -> Keyboard {
        Keyboard::grid(vec![KeyButton::new("Yes", "tok-yes"), KeyButton::new("No", "tok-no")])
    }

    #[tokio::test]
    async fn test_buttons_are_numbered() {
        let gateway = ConsoleGateway::new();
        let chat = Destination::chat("console");
        let content = Content::plain("Sure?").with_keyboard(keyboard());

        let id = gateway.send(&chat, &content).await.unwrap();
        assert_eq!(id, 1);

        match gateway.parse_input("#2") {
            Some(InboundEvent::Button(event)) => {
                assert_eq!(event.token, "tok-no");
                assert_eq!(event.session_id, "console");
            }
            other => panic!("unexpected {other:?}"),
        }
        assert!(gateway.parse_input("#3").is_none());
        assert!(gateway.parse_input("#0").is_none());
    }

    #[tokio::test]
    async fn test_latest_keyboard_wins() {
        let gateway = ConsoleGateway::new();
        let chat = Destination::chat("console");
        gateway
            .send(&chat, &Content::plain("Sure?").with_keyboard(keyboard()))
            .await
            .unwrap();
        gateway.edit(&chat, 1, &Content::plain("Done")).await.unwrap();

        assert!(gateway.parse_input("#1").is_none());
        let stats = gateway.stats().await;
        assert_eq!(stats.sent, 1);
        assert_eq!(stats.edited, 1);
    }

    #[test]
    fn test_plain_text_and_config() {
        let gateway =
            ConsoleGateway::with_config(ConsoleConfig::new().prompt(">> ").session_id("me"));
        assert_eq!(gateway.config().prompt, ">> ");
        assert_eq!(
            gateway.parse_input("/help"),
            Some(InboundEvent::Text(TextEvent::new("me", "/help")))
        );
        assert_eq!(
            gateway.parse_input("#x"),
            Some(InboundEvent::Text(TextEvent::new("me", "#x")))
        );
    }
}
