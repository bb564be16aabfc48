//! Messaging gateway abstraction.
//!
//! A [`MessagingGateway`] is the only way the bot talks to a chat platform:
//! send a message, edit a previously sent one, pin it, acknowledge a button
//! press.
//! Failures come back as [`GatewayError`] so callers can tell an unchanged
//! edit from a vanished message or a transport hiccup.

use crate::error::{GatewayError, GatewayResult};
use crate::events::Content;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use tokio::sync::RwLock;
use tracing::{debug, warn};

/// Platform message identifier.
pub type MessageId = i32;

/// Where a message goes: a chat and, optionally, a forum thread in it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Destination {
    /// Chat id or public `@username`.
    pub chat_id: String,
    /// Forum topic inside the chat.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thread_id: Option<i64>,
}

impl Destination {
    /// A whole chat.
    pub fn chat(chat_id: impl Into<String>) -> Self {
        Self {
            chat_id: chat_id.into(),
            thread_id: None,
        }
    }

    /// A thread inside a chat.
    #[must_use]
    pub const fn with_thread(mut self, thread_id: i64) -> Self {
        self.thread_id = Some(thread_id);
        self
    }
}

impl std::fmt::Display for Destination {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.thread_id {
            Some(thread) => write!(f, "{}#{thread}", self.chat_id),
            None => f.write_str(&self.chat_id),
        }
    }
}

/// Outbound messaging operations of a chat platform.
#[async_trait]
pub trait MessagingGateway: Send + Sync {
    /// Short platform name used in logs.
    fn name(&self) -> &str;

    /// Send a new message and return its id.
    async fn send(&self, to: &Destination, content: &Content) -> GatewayResult<MessageId>;

    /// Replace the text and keyboard of a sent message.
    async fn edit(
        &self,
        to: &Destination,
        message_id: MessageId,
        content: &Content,
    ) -> GatewayResult<()>;

    /// Acknowledge a button press, showing `text` to the presser.
    async fn acknowledge(&self, activation_id: &str, text: &str) -> GatewayResult<()>;

    /// Pin a sent message without notifying the chat.
    async fn pin(&self, to: &Destination, message_id: MessageId) -> GatewayResult<()>;

    /// Unpin one message.
    async fn unpin(&self, to: &Destination, message_id: MessageId) -> GatewayResult<()>;
}

// ============================================================================
// Statistics
// ============================================================================

/// Gateway traffic counters.
#[derive(Debug, Clone, Default, Serialize)]
pub struct GatewayStats {
    /// Messages sent.
    pub sent: u64,
    /// Messages edited.
    pub edited: u64,
    /// Button presses acknowledged.
    pub acknowledged: u64,
    /// Failed calls.
    pub failures: u64,
    /// Last failure, if any.
    pub last_error: Option<String>,
}

/// Shared bookkeeping for gateway implementations.
pub struct GatewayBase {
    name: String,
    stats: RwLock<GatewayStats>,
}

impl std::fmt::Debug for GatewayBase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GatewayBase")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

impl GatewayBase {
    /// Create a gateway base.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            stats: RwLock::new(GatewayStats::default()),
        }
    }

    /// Gateway name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Record a sent message.
    pub async fn record_sent(&self) {
        self.stats.write().await.sent += 1;
    }

    /// Record an edited message.
    pub async fn record_edited(&self) {
        self.stats.write().await.edited += 1;
    }

    /// Record an acknowledged press.
    pub async fn record_acknowledged(&self) {
        self.stats.write().await.acknowledged += 1;
    }

    /// Record a failure. Unchanged edits are not failures.
    pub async fn record_error(&self, error: &GatewayError) {
        if error.is_not_modified() {
            return;
        }
        warn!(gateway = %self.name, %error, "gateway call failed");
        let mut stats = self.stats.write().await;
        stats.failures += 1;
        stats.last_error = Some(error.to_string());
    }

    /// Snapshot of the counters.
    pub async fn stats(&self) -> GatewayStats {
        self.stats.read().await.clone()
    }
}

// ============================================================================
// In-memory gateway
// ============================================================================

/// One call observed by a [`MemoryGateway`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outgoing {
    /// A new message.
    Sent {
        /// Target.
        to: Destination,
        /// Assigned id.
        message_id: MessageId,
        /// Payload.
        content: Content,
    },
    /// An edit that changed a message.
    Edited {
        /// Target.
        to: Destination,
        /// Edited message.
        message_id: MessageId,
        /// New payload.
        content: Content,
    },
    /// A message pinned.
    Pinned {
        /// Chat.
        to: Destination,
        /// Pinned message.
        message_id: MessageId,
    },
    /// A message unpinned.
    Unpinned {
        /// Chat.
        to: Destination,
        /// Unpinned message.
        message_id: MessageId,
    },
    /// A button acknowledgement.
    Acknowledged {
        /// Press handle.
        activation_id: String,
        /// Text shown to the presser.
        text: String,
    },
}

#[derive(Debug, Default)]
struct MemoryState {
    messages: HashMap<(Destination, MessageId), Content>,
    pinned: Vec<(Destination, MessageId)>,
    log: Vec<Outgoing>,
    lost_chats: HashSet<String>,
    edit_failures: VecDeque<GatewayError>,
}

/// A gateway that keeps messages in memory.
///
/// It behaves like a strict platform: editing a message to identical content
/// fails with [`GatewayError::NotModified`], editing an unknown message fails
/// with [`GatewayError::MessageNotFound`], and chats marked as lost reject
/// every call.
#[derive(Debug)]
pub struct MemoryGateway {
    base: GatewayBase,
    next_id: AtomicI32,
    state: Mutex<MemoryState>,
}

impl Default for MemoryGateway {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryGateway {
    /// Create an empty in-memory gateway.
    #[must_use]
    pub fn new() -> Self {
        Self {
            base: GatewayBase::new("memory"),
            next_id: AtomicI32::new(1),
            state: Mutex::new(MemoryState::default()),
        }
    }

    fn state(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Every call that changed something, in order.
    #[must_use]
    pub fn outgoing(&self) -> Vec<Outgoing> {
        self.state().log.clone()
    }

    /// Contents of every sent message, in order.
    #[must_use]
    pub fn sent(&self) -> Vec<Content> {
        self.state()
            .log
            .iter()
            .filter_map(|o| match o {
                Outgoing::Sent { content, .. } => Some(content.clone()),
                _ => None,
            })
            .collect()
    }

    /// Target and id of every sent message, in order.
    #[must_use]
    pub fn sent_to(&self) -> Vec<(Destination, MessageId)> {
        self.state()
            .log
            .iter()
            .filter_map(|o| match o {
                Outgoing::Sent { to, message_id, .. } => Some((to.clone(), *message_id)),
                _ => None,
            })
            .collect()
    }

    /// Plain text of every sent message, in order.
    #[must_use]
    pub fn sent_texts(&self) -> Vec<String> {
        self.sent().iter().map(Content::plain_text).collect()
    }

    /// Number of edits that went through.
    #[must_use]
    pub fn edit_count(&self) -> usize {
        self.state()
            .log
            .iter()
            .filter(|o| matches!(o, Outgoing::Edited { .. }))
            .count()
    }

    /// Acknowledgement texts, in order.
    #[must_use]
    pub fn acknowledgements(&self) -> Vec<String> {
        self.state()
            .log
            .iter()
            .filter_map(|o| match o {
                Outgoing::Acknowledged { text, .. } => Some(text.clone()),
                _ => None,
            })
            .collect()
    }

    /// Current content of a message.
    #[must_use]
    pub fn message(&self, to: &Destination, message_id: MessageId) -> Option<Content> {
        self.state().messages.get(&(to.clone(), message_id)).cloned()
    }

    /// Pinned messages of a chat, oldest pin first.
    #[must_use]
    pub fn pinned(&self, to: &Destination) -> Vec<MessageId> {
        self.state()
            .pinned
            .iter()
            .filter(|(chat, _)| chat == to)
            .map(|(_, id)| *id)
            .collect()
    }

    /// Delete a message as if a chat admin removed it.
    pub fn delete_message(&self, to: &Destination, message_id: MessageId) {
        let mut state = self.state();
        let key = (to.clone(), message_id);
        state.messages.remove(&key);
        state.pinned.retain(|pin| *pin != key);
    }

    /// Make every call into `chat_id` fail with [`GatewayError::AccessLost`].
    pub fn lose_chat(&self, chat_id: impl Into<String>) {
        self.state().lost_chats.insert(chat_id.into());
    }

    /// Make the next edit fail with `error`.
    pub fn fail_next_edit(&self, error: GatewayError) {
        self.state().edit_failures.push_back(error);
    }

    /// Forget the call log, keeping messages.
    pub fn clear_log(&self) {
        self.state().log.clear();
    }

    /// Traffic counters.
    pub async fn stats(&self) -> GatewayStats {
        self.base.stats().await
    }

    fn check_chat(state: &MemoryState, to: &Destination) -> GatewayResult<()> {
        if state.lost_chats.contains(&to.chat_id) {
            return Err(GatewayError::AccessLost(format!("bot was removed from {to}")));
        }
        Ok(())
    }

    fn do_send(&self, to: &Destination, content: &Content) -> GatewayResult<MessageId> {
        let mut state = self.state();
        Self::check_chat(&state, to)?;
        let message_id = self.next_id.fetch_add(1, Ordering::Relaxed);
        state
            .messages
            .insert((to.clone(), message_id), content.clone());
        state.log.push(Outgoing::Sent {
            to: to.clone(),
            message_id,
            content: content.clone(),
        });
        Ok(message_id)
    }

    fn do_edit(&self, to: &Destination, message_id: MessageId, content: &Content) -> GatewayResult<()> {
        let mut state = self.state();
        Self::check_chat(&state, to)?;
        if let Some(error) = state.edit_failures.pop_front() {
            return Err(error);
        }
        let key = (to.clone(), message_id);
        match state.messages.get(&key) {
            None => return Err(GatewayError::MessageNotFound),
            Some(current) if current == content => return Err(GatewayError::NotModified),
            Some(_) => {}
        }
        state.messages.insert(key, content.clone());
        state.log.push(Outgoing::Edited {
            to: to.clone(),
            message_id,
            content: content.clone(),
        });
        Ok(())
    }

    fn do_pin(&self, to: &Destination, message_id: MessageId, pin: bool) -> GatewayResult<()> {
        let mut state = self.state();
        Self::check_chat(&state, to)?;
        let key = (to.clone(), message_id);
        if !state.messages.contains_key(&key) {
            return Err(GatewayError::MessageNotFound);
        }
        state.pinned.retain(|pinned| *pinned != key);
        let to = to.clone();
        if pin {
            state.pinned.push(key);
            state.log.push(Outgoing::Pinned { to, message_id });
        } else {
            state.log.push(Outgoing::Unpinned { to, message_id });
        }
        Ok(())
    }
}

#[async_trait]
impl MessagingGateway for MemoryGateway {
    fn name(&self) -> &str {
        self.base.name()
    }

    async fn send(&self, to: &Destination, content: &Content) -> GatewayResult<MessageId> {
        match self.do_send(to, content) {
            Ok(id) => {
                debug!(%to, message_id = id, "memory send");
                self.base.record_sent().await;
                Ok(id)
            }
            Err(e) => {
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
        let result = self.do_edit(to, message_id, content);
        match &result {
            Ok(()) => self.base.record_edited().await,
            Err(e) => self.base.record_error(e).await,
        }
        result
    }

    async fn acknowledge(&self, activation_id: &str, text: &str) -> GatewayResult<()> {
        self.state().log.push(Outgoing::Acknowledged {
            activation_id: activation_id.to_string(),
            text: text.to_string(),
        });
        self.base.record_acknowledged().await;
        Ok(())
    }

    async fn pin(&self, to: &Destination, message_id: MessageId) -> GatewayResult<()> {
        let result = self.do_pin(to, message_id, true);
        if let Err(e) = &result {
            self.base.record_error(e).await;
        }
        result
    }

    async fn unpin(&self, to: &Destination, message_id: MessageId) -> GatewayResult<()> {
        let result = self.do_pin(to, message_id, false);
        if let Err(e) = &result {
            self.base.record_error(e).await;
        }
        result
    }
}
