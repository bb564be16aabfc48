//! Telegram gateway using teloxide.
//!
//! Outbound [`Content`] is rendered as Telegram HTML with an inline keyboard.
//! Bot API failures are mapped onto [`GatewayError`] so live posts can tell a
//! no-op edit from a deleted message. Incoming messages and button presses
//! are published to the [`MessageBus`], keyed by chat id.
//!
//! # Example
//!
//! ```rust,ignore
//! use timesheet_bot::channels::{TelegramGateway, telegram::TelegramConfig};
//! use timesheet_bot::bus::MessageBus;
//!
//! let bus = MessageBus::new();
//! let telegram = TelegramGateway::new(TelegramConfig::new("YOUR_BOT_TOKEN"));
//! telegram.start(&bus).await;
//! ```

use crate::bus::MessageBus;
use crate::error::{GatewayError, GatewayResult};
use crate::events::{ButtonEvent, Content, Keyboard, Style, TextEvent};
use crate::gateway::{Destination, GatewayBase, GatewayStats, MessageId, MessagingGateway};
use async_trait::async_trait;
use teloxide::prelude::*;
use teloxide::types::{
    InlineKeyboardButton, InlineKeyboardMarkup, MessageId as TgMessageId, ParseMode, Recipient,
    ThreadId,
};
use teloxide::{ApiError, RequestError};
use tokio::sync::{RwLock, mpsc};
use tracing::{debug, error, info};

/// Telegram gateway configuration.
#[derive(Debug, Clone)]
pub struct TelegramConfig {
    /// Bot token from @BotFather.
    pub token: String,
    /// Allowed user IDs. Empty means allow all.
    pub allowed_users: Vec<i64>,
    /// Allowed chat IDs. Empty means allow all.
    pub allowed_chats: Vec<i64>,
}

impl TelegramConfig {
    /// Create a config with the given token.
    #[must_use]
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            allowed_users: Vec::new(),
            allowed_chats: Vec::new(),
        }
    }

    /// Add an allowed user ID.
    #[must_use]
    pub fn allow_user(mut self, user_id: i64) -> Self {
        self.allowed_users.push(user_id);
        self
    }

    /// Add multiple allowed user IDs.
    #[must_use]
    pub fn allow_users(mut self, user_ids: impl IntoIterator<Item = i64>) -> Self {
        self.allowed_users.extend(user_ids);
        self
    }

    /// Add an allowed chat ID.
    #[must_use]
    pub fn allow_chat(mut self, chat_id: i64) -> Self {
        self.allowed_chats.push(chat_id);
        self
    }

    /// Check if a user is allowed.
    #[must_use]
    pub fn is_user_allowed(&self, user_id: i64) -> bool {
        self.allowed_users.is_empty() || self.allowed_users.contains(&user_id)
    }

    /// Check if a chat is allowed.
    #[must_use]
    pub fn is_chat_allowed(&self, chat_id: i64) -> bool {
        self.allowed_chats.is_empty() || self.allowed_chats.contains(&chat_id)
    }
}

/// Gateway talking to the Telegram Bot API.
pub struct TelegramGateway {
    base: GatewayBase,
    config: TelegramConfig,
    bot: Bot,
    shutdown_tx: RwLock<Option<mpsc::Sender<()>>>,
}

impl std::fmt::Debug for TelegramGateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TelegramGateway")
            .field("base", &self.base)
            .field("allowed_users", &self.config.allowed_users)
            .field("allowed_chats", &self.config.allowed_chats)
            .finish_non_exhaustive()
    }
}

impl TelegramGateway {
    /// Create a gateway. No request is made until it is used.
    #[must_use]
    pub fn new(config: TelegramConfig) -> Self {
        Self {
            base: GatewayBase::new("telegram"),
            bot: Bot::new(&config.token),
            config,
            shutdown_tx: RwLock::new(None),
        }
    }

    /// Traffic counters.
    pub async fn stats(&self) -> GatewayStats {
        self.base.stats().await
    }

    /// Start receiving updates and publishing them to `bus`.
    pub async fn start(&self, bus: &MessageBus) {
        let (shutdown_tx, mut shutdown_rx) = mpsc::channel::<()>(1);
        *self.shutdown_tx.write().await = Some(shutdown_tx);

        let message_config = self.config.clone();
        let message_bus = bus.inbound_handle();
        let message_handler = Update::filter_message().endpoint(move |msg: Message| {
            let config = message_config.clone();
            let bus = message_bus.clone();

            async move {
                #[allow(clippy::cast_possible_wrap)] // user ids fit in i64
                let user_id = msg.from.as_ref().map_or(0, |u| u.id.0 as i64);
                let chat_id = msg.chat.id.0;
                if !config.is_user_allowed(user_id) || !config.is_chat_allowed(chat_id) {
                    debug!(user_id, chat_id, "message from unauthorized user/chat");
                    return Ok::<(), RequestError>(());
                }
                let Some(text) = msg.text() else {
                    return Ok(());
                };
                let event = TextEvent::new(chat_id.to_string(), text);
                if let Err(e) = bus.publish(event.into()).await {
                    error!(error = %e, "failed to publish telegram message to bus");
                }
                Ok(())
            }
        });

        let callback_config = self.config.clone();
        let callback_bus = bus.inbound_handle();
        let callback_handler =
            Update::filter_callback_query().endpoint(move |query: CallbackQuery| {
                let config = callback_config.clone();
                let bus = callback_bus.clone();

                async move {
                    #[allow(clippy::cast_possible_wrap)] // user ids fit in i64
                    let user_id = query.from.id.0 as i64;
                    let (Some(token), Some(message)) = (query.data, query.message) else {
                        return Ok::<(), RequestError>(());
                    };
                    let chat_id = message.chat().id.0;
                    if !config.is_user_allowed(user_id) || !config.is_chat_allowed(chat_id) {
                        debug!(user_id, chat_id, "button press from unauthorized user/chat");
                        return Ok(());
                    }
                    let event =
                        ButtonEvent::new(chat_id.to_string(), token, user_id.to_string(), query.id);
                    if let Err(e) = bus.publish(event.into()).await {
                        error!(error = %e, "failed to publish telegram button to bus");
                    }
                    Ok(())
                }
            });

        let handler = dptree::entry()
            .branch(message_handler)
            .branch(callback_handler);
        let mut dispatcher = Dispatcher::builder(self.bot.clone(), handler).build();

        tokio::spawn(async move {
            tokio::select! {
                () = dispatcher.dispatch() => {}
                _ = shutdown_rx.recv() => {
                    debug!("telegram dispatcher shutting down");
                }
            }
        });

        info!("Telegram gateway started");
    }

    /// Stop receiving updates. Outbound calls keep working.
    pub async fn stop(&self) {
        if let Some(tx) = self.shutdown_tx.write().await.take() {
            let _ = tx.send(()).await;
        }
        info!("Telegram gateway stopped");
    }
}

/// Escape text for Telegram HTML.
fn escape_html(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

/// Render content as Telegram HTML.
fn to_html(content: &Content) -> String {
    let mut html = String::new();
    if let Some(emoji) = content.emoji {
        html.push_str(emoji.as_str());
        html.push(' ');
    }
    for span in &content.spans {
        let text = escape_html(&span.text);
        match &span.style {
            Style::Plain => html.push_str(&text),
            Style::Bold => html.push_str(&format!("<b>{text}</b>")),
            Style::Italic => html.push_str(&format!("<i>{text}</i>")),
            Style::Code => html.push_str(&format!("<code>{text}</code>")),
            Style::Link(url) => {
                html.push_str(&format!("<a href=\"{}\">{text}</a>", escape_html(url)));
            }
        }
    }
    html
}

fn to_markup(keyboard: Option<&Keyboard>) -> InlineKeyboardMarkup {
    let rows = keyboard.map_or_else(Vec::<Vec<InlineKeyboardButton>>::new, |k| {
        k.rows
            .iter()
            .map(|row| {
                row.iter()
                    .map(|b| InlineKeyboardButton::callback(b.title.clone(), b.token.clone()))
                    .collect()
            })
            .collect()
    });
    InlineKeyboardMarkup::new(rows)
}

/// Numeric chat ids or public `@username`s.
fn recipient(to: &Destination) -> Recipient {
    to.chat_id.parse::<i64>().map_or_else(
        |_| Recipient::ChannelUsername(to.chat_id.clone()),
        |id| Recipient::Id(ChatId(id)),
    )
}

/// Map a Bot API failure onto the gateway taxonomy.
fn map_error(error: RequestError) -> GatewayError {
    match error {
        RequestError::Api(ApiError::MessageNotModified) => GatewayError::NotModified,
        RequestError::Api(ApiError::MessageToEditNotFound) => GatewayError::MessageNotFound,
        RequestError::Api(ApiError::MessageIdInvalid) => GatewayError::InvalidMessageId,
        RequestError::Api(ApiError::ChatNotFound) => GatewayError::ChatNotFound,
        RequestError::Api(
            e @ (ApiError::BotKicked
            | ApiError::BotKickedFromSupergroup
            | ApiError::BotBlocked
            | ApiError::NotEnoughRightsToPostMessages),
        ) => GatewayError::AccessLost(e.to_string()),
        other => GatewayError::transport(other.to_string()),
    }
}

#[async_trait]
impl MessagingGateway for TelegramGateway {
    fn name(&self) -> &str {
        self.base.name()
    }

    async fn send(&self, to: &Destination, content: &Content) -> GatewayResult<MessageId> {
        let mut request = self
            .bot
            .send_message(recipient(to), to_html(content))
            .parse_mode(ParseMode::Html);
        if let Some(keyboard) = &content.keyboard {
            request = request.reply_markup(to_markup(Some(keyboard)));
        }
        if let Some(thread) = to.thread_id.and_then(|t| i32::try_from(t).ok()) {
            request = request.message_thread_id(ThreadId(TgMessageId(thread)));
        }

        match request.await {
            Ok(message) => {
                debug!(%to, message_id = message.id.0, "telegram send");
                self.base.record_sent().await;
                Ok(message.id.0)
            }
            Err(e) => {
                let e = map_error(e);
                self.base.record_error(&e).await;
                Err(e)
            }
        }
    }

    async fn edit(
        &self,
        to: &Destination,
        message_id: MessageId,
        content: &Content,
    ) -> GatewayResult<()> {
        let result = self
            .bot
            .edit_message_text(recipient(to), TgMessageId(message_id), to_html(content))
            .parse_mode(ParseMode::Html)
            .reply_markup(to_markup(content.keyboard.as_ref()))
            .await;

        match result {
            Ok(_) => {
                self.base.record_edited().await;
                Ok(())
            }
            Err(e) => {
                let e = map_error(e);
                self.base.record_error(&e).await;
                Err(e)
            }
        }
    }

    async fn acknowledge(&self, activation_id: &str, text: &str) -> GatewayResult<()> {
        let mut request = self.bot.answer_callback_query(activation_id.to_string());
        if !text.is_empty() {
            request = request.text(text);
        }
        match request.await {
            Ok(_) => {
                self.base.record_acknowledged().await;
                Ok(())
            }
            Err(e) => {
                let e = map_error(e);
                self.base.record_error(&e).await;
                Err(e)
            }
        }
    }

    async fn pin(&self, to: &Destination, message_id: MessageId) -> GatewayResult<()> {
        let result = self
            .bot
            .pin_chat_message(recipient(to), TgMessageId(message_id))
            .disable_notification(true)
            .await;
        if let Err(e) = result {
            let e = map_error(e);
            self.base.record_error(&e).await;
            return Err(e);
        }
        debug!(%to, message_id, "telegram pin");
        Ok(())
    }

    async fn unpin(&self, to: &Destination, message_id: MessageId) -> GatewayResult<()> {
        let result = self
            .bot
            .unpin_chat_message(recipient(to))
            .message_id(TgMessageId(message_id))
            .await;
        if let Err(e) = result {
            let e = map_error(e);
            self.base.record_error(&e).await;
            return Err(e);
        }
        debug!(%to, message_id, "telegram unpin");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{Emoji, KeyButton};

    #[test]
    fn test_config_builder() {
        let config = TelegramConfig::new("token123")
            .allow_user(12345)
            .allow_chat(67890);

        assert_eq!(config.token, "token123");
        assert!(config.is_user_allowed(12345));
        assert!(!config.is_user_allowed(99999));
        assert!(config.is_chat_allowed(67890));
    }

    #[test]
    fn test_empty_allowlist() {
        let config = TelegramConfig::new("token");
        assert!(config.is_user_allowed(12345));
        assert!(config.is_chat_allowed(67890));
    }

    #[test]
    fn test_content_to_html() {
        let content = Content::new()
            .bold("Summer <2025>")
            .line()
            .text("a & b ")
            .link("site", "https://example.com/?a=1&b=\"2\"")
            .code("x")
            .italic("y")
            .with_emoji(Emoji::Ok);

        assert_eq!(
            to_html(&content),
            "🍌 <b>Summer &lt;2025&gt;</b>\na &amp; b \
             <a href=\"https://example.com/?a=1&amp;b=&quot;2&quot;\">site</a>\
             <code>x</code><i>y</i>"
        );
    }

    #[test]
    fn test_keyboard_markup() {
        let keyboard = Keyboard::grid(vec![
            KeyButton::new("1h", "a"),
            KeyButton::new("6h", "b"),
            KeyButton::new("12h", "c"),
            KeyButton::new("24h", "d"),
        ]);
        let markup = to_markup(Some(&keyboard));
        assert_eq!(markup.inline_keyboard.len(), 2);
        assert_eq!(markup.inline_keyboard[1][1].text, "24h");
        assert!(to_markup(None).inline_keyboard.is_empty());
    }

    #[test]
    fn test_recipient() {
        assert_eq!(recipient(&Destination::chat("-100123")), Recipient::Id(ChatId(-100_123)));
        assert_eq!(
            recipient(&Destination::chat("@news")),
            Recipient::ChannelUsername("@news".into())
        );
    }

    #[test]
    fn test_error_mapping() {
        assert_eq!(
            map_error(RequestError::Api(ApiError::MessageNotModified)),
            GatewayError::NotModified
        );
        assert_eq!(
            map_error(RequestError::Api(ApiError::MessageToEditNotFound)),
            GatewayError::MessageNotFound
        );
        assert!(map_error(RequestError::Api(ApiError::BotKicked)).is_fatal());
        assert!(!map_error(RequestError::Api(ApiError::Unknown("flood".into()))).is_fatal());
    }
}
