//! Inbound events and outbound content.
//!
//! Inbound traffic is either a [`TextEvent`] or a [`ButtonEvent`]. Outbound
//! traffic is a [`Content`]: styled text spans, an optional leading marker
//! emoji, and an optional inline keyboard.

use serde::{Deserialize, Serialize};

// ============================================================================
// Inbound
// ============================================================================

/// A free-text message typed by a user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TextEvent {
    /// Conversation the message belongs to.
    pub session_id: String,
    /// Message text.
    pub text: String,
}

impl TextEvent {
    /// Create a text event.
    pub fn new(session_id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            text: text.into(),
        }
    }

    /// Whether the text is a context switch (`/command`).
    #[must_use]
    pub fn is_command(&self) -> bool {
        self.text.trim_start().starts_with('/')
    }

    /// Split `/name@bot rest` into `("name", "rest")`.
    #[must_use]
    pub fn command(&self) -> Option<(&str, &str)> {
        let body = self.text.trim().strip_prefix('/')?;
        let (head, rest) = body.split_once(char::is_whitespace).unwrap_or((body, ""));
        let name = head.split('@').next().unwrap_or(head);
        Some((name, rest.trim()))
    }
}

/// A press on an inline keyboard button.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ButtonEvent {
    /// Conversation the button belongs to.
    pub session_id: String,
    /// Token attached to the pressed button.
    pub token: String,
    /// User that pressed the button.
    pub activator_id: String,
    /// Platform handle used to acknowledge the press.
    pub activation_id: String,
}

impl ButtonEvent {
    /// Create a button event.
    pub fn new(
        session_id: impl Into<String>,
        token: impl Into<String>,
        activator_id: impl Into<String>,
        activation_id: impl Into<String>,
    ) -> Self {
        Self {
            session_id: session_id.into(),
            token: token.into(),
            activator_id: activator_id.into(),
            activation_id: activation_id.into(),
        }
    }
}

/// Anything a channel hands to the dispatcher.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum InboundEvent {
    /// Free text.
    Text(TextEvent),
    /// Button press.
    Button(ButtonEvent),
}

impl InboundEvent {
    /// Conversation the event belongs to.
    #[must_use]
    pub fn session_id(&self) -> &str {
        match self {
            Self::Text(e) => &e.session_id,
            Self::Button(e) => &e.session_id,
        }
    }
}

impl From<TextEvent> for InboundEvent {
    fn from(event: TextEvent) -> Self {
        Self::Text(event)
    }
}

impl From<ButtonEvent> for InboundEvent {
    fn from(event: ButtonEvent) -> Self {
        Self::Button(event)
    }
}

// ============================================================================
// Outbound
// ============================================================================

/// Leading markers used to tag bot messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Emoji {
    /// Waiting for input.
    Edit,
    /// Something was aborted.
    Warning,
    /// Success.
    Ok,
    /// Failure.
    Fail,
    /// Not understood.
    Think,
    /// Informational.
    Info,
    /// Live post status.
    Live,
}

impl Emoji {
    /// The emoji character(s).
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Edit => "✍️",
            Self::Warning => "⚠️",
            Self::Ok => "🍌",
            Self::Fail => "🥺",
            Self::Think => "🤔",
            Self::Info => "🍓",
            Self::Live => "🫡",
        }
    }
}

/// How a span of text is rendered.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "url", rename_all = "snake_case")]
pub enum Style {
    /// Plain text.
    Plain,
    /// Bold text.
    Bold,
    /// Italic text.
    Italic,
    /// Monospace text.
    Code,
    /// Hyperlink to the given URL.
    Link(String),
}

/// A run of text with one style.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Span {
    /// The text.
    pub text: String,
    /// Its style.
    pub style: Style,
}

/// One inline keyboard button as sent to a platform.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyButton {
    /// Visible label.
    pub title: String,
    /// Token reported back when the button is pressed.
    pub token: String,
}

impl KeyButton {
    /// Create a keyboard button.
    pub fn new(title: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            token: token.into(),
        }
    }
}

/// Rows of inline keyboard buttons.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Keyboard {
    /// Button rows, top to bottom.
    pub rows: Vec<Vec<KeyButton>>,
}

impl Keyboard {
    /// Create a keyboard from rows.
    #[must_use]
    pub const fn new(rows: Vec<Vec<KeyButton>>) -> Self {
        Self { rows }
    }

    /// Lay buttons out in balanced rows (see [`grid_layout`]).
    #[must_use]
    pub fn grid(buttons: Vec<KeyButton>) -> Self {
        let mut rest = buttons.into_iter();
        let rows = grid_layout(rest.len())
            .into_iter()
            .map(|width| rest.by_ref().take(width).collect())
            .collect();
        Self { rows }
    }

    /// Whether the keyboard has no buttons.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rows.iter().all(Vec::is_empty)
    }

    /// All buttons, row by row.
    pub fn buttons(&self) -> impl Iterator<Item = &KeyButton> {
        self.rows.iter().flatten()
    }
}

/// Row widths for `count` buttons: up to three share a row, four become two
/// pairs, and larger sets peel off rows of three.
#[must_use]
pub fn grid_layout(count: usize) -> Vec<usize> {
    let mut rows = Vec::new();
    let mut left = count;
    while left > 0 {
        match left {
            1..=3 => {
                rows.push(left);
                left = 0;
            }
            4 => {
                rows.extend([2, 2]);
                left = 0;
            }
            _ => {
                rows.push(3);
                left -= 3;
            }
        }
    }
    rows
}

/// A renderable outbound message.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Content {
    /// Styled text runs.
    pub spans: Vec<Span>,
    /// Marker prepended to the text.
    pub emoji: Option<Emoji>,
    /// Inline keyboard.
    pub keyboard: Option<Keyboard>,
}

impl Content {
    /// Empty content.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Content holding one plain span.
    pub fn plain(text: impl Into<String>) -> Self {
        Self::new().text(text)
    }

    fn push(mut self, text: impl Into<String>, style: Style) -> Self {
        let text = text.into();
        if !text.is_empty() {
            self.spans.push(Span { text, style });
        }
        self
    }

    /// Append plain text.
    #[must_use]
    pub fn text(self, text: impl Into<String>) -> Self {
        self.push(text, Style::Plain)
    }

    /// Append bold text.
    #[must_use]
    pub fn bold(self, text: impl Into<String>) -> Self {
        self.push(text, Style::Bold)
    }

    /// Append italic text.
    #[must_use]
    pub fn italic(self, text: impl Into<String>) -> Self {
        self.push(text, Style::Italic)
    }

    /// Append monospace text.
    #[must_use]
    pub fn code(self, text: impl Into<String>) -> Self {
        self.push(text, Style::Code)
    }

    /// Append a hyperlink.
    #[must_use]
    pub fn link(self, text: impl Into<String>, url: impl Into<String>) -> Self {
        self.push(text, Style::Link(url.into()))
    }

    /// Append a line break.
    #[must_use]
    pub fn line(self) -> Self {
        self.text("\n")
    }

    /// Append all spans of another content.
    #[must_use]
    pub fn append(mut self, other: Self) -> Self {
        self.spans.extend(other.spans);
        self
    }

    /// Set the leading marker.
    #[must_use]
    pub const fn with_emoji(mut self, emoji: Emoji) -> Self {
        self.emoji = Some(emoji);
        self
    }

    /// Set the leading marker unless one is already present.
    #[must_use]
    pub const fn or_emoji(mut self, emoji: Emoji) -> Self {
        if self.emoji.is_none() {
            self.emoji = Some(emoji);
        }
        self
    }

    /// Attach a keyboard; an empty keyboard clears it.
    #[must_use]
    pub fn with_keyboard(mut self, keyboard: Keyboard) -> Self {
        self.keyboard = (!keyboard.is_empty()).then_some(keyboard);
        self
    }

    /// Whether there is no visible text.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.spans.iter().all(|s| s.text.trim().is_empty())
    }

    /// Text without styling, prefixed by the marker emoji.
    #[must_use]
    pub fn plain_text(&self) -> String {
        let body: String = self.spans.iter().map(|s| s.text.as_str()).collect();
        match self.emoji {
            Some(emoji) => format!("{} {body}", emoji.as_str()),
            None => body,
        }
    }
}

impl From<&str> for Content {
    fn from(text: &str) -> Self {
        Self::plain(text)
    }
}

impl From<String> for Content {
    fn from(text: String) -> Self {
        Self::plain(text)
    }
}
