//! Live posts ("translations").
//!
//! A [`LiveSync`] keeps one sent message in step with its source. It watches
//! the source for changes and re-renders the message in place. Platform
//! failures are classified: an unchanged edit is success, a vanished message
//! or chat destroys the sync for good, anything else is logged and retried on
//! the next change.
//!
//! Change notifications arrive as plain callbacks; they only wake a worker
//! task, so a burst of changes collapses into a single resync.

use super::source::{ChangeListener, RenderFilter};
use crate::emitter::{Emitter, Subscription};
use crate::error::{SyncError, SyncResult};
use crate::gateway::{Destination, MessageId, MessagingGateway};
use crate::sync::source::SourceResolver;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use tokio::sync::Notify;
use tracing::{debug, info, warn};

/// Persisted form of a live post.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TranslationRecord {
    /// Unique id.
    pub id: u64,
    /// Chat the post lives in.
    pub chat: Destination,
    /// The post, once sent.
    pub message_id: Option<MessageId>,
    /// Data the post is rendered from.
    pub source_id: String,
    /// Which entries are shown.
    #[serde(default)]
    pub filter: RenderFilter,
}

impl TranslationRecord {
    /// Record for a post that still has to be sent.
    pub fn new(id: u64, chat: Destination, source_id: impl Into<String>) -> Self {
        Self {
            id,
            chat,
            message_id: None,
            source_id: source_id.into(),
            filter: RenderFilter::default(),
        }
    }

    /// Adopt an existing message instead of sending a new one.
    #[must_use]
    pub const fn with_message(mut self, message_id: MessageId) -> Self {
        self.message_id = Some(message_id);
        self
    }

    /// Use `filter` when rendering.
    #[must_use]
    pub const fn with_filter(mut self, filter: RenderFilter) -> Self {
        self.filter = filter;
        self
    }
}

/// Topics a [`LiveSync`] publishes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncTopic {
    /// The sync was destroyed.
    Destroyed,
}

/// Payload of [`SyncTopic::Destroyed`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Destroyed {
    /// Translation id.
    pub id: u64,
    /// Why it was destroyed.
    pub reason: String,
}

#[derive(Default)]
struct SyncState {
    message_id: Option<MessageId>,
    subscriptions: Vec<Subscription>,
    destroyed: Option<String>,
    worker: bool,
}

struct SyncInner {
    id: u64,
    target: Destination,
    source_id: String,
    filter: RenderFilter,
    gateway: Arc<dyn MessagingGateway>,
    resolver: Arc<dyn SourceResolver>,
    state: Mutex<SyncState>,
    io: tokio::sync::Mutex<()>,
    wake: Arc<Notify>,
    events: Emitter<SyncTopic, Destroyed>,
}

impl Drop for SyncInner {
    fn drop(&mut self) {
        let state = self.state.get_mut().unwrap_or_else(PoisonError::into_inner);
        for mut subscription in state.subscriptions.drain(..) {
            subscription.dispose();
        }
        self.wake.notify_one();
    }
}

/// A message kept in sync with its source.
///
/// Cheap to clone; clones share state.
#[derive(Clone)]
pub struct LiveSync {
    inner: Arc<SyncInner>,
}

impl std::fmt::Debug for LiveSync {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LiveSync")
            .field("id", &self.inner.id)
            .field("target", &self.inner.target)
            .field("source_id", &self.inner.source_id)
            .field("message_id", &self.message_id())
            .field("destroyed", &self.is_destroyed())
            .finish_non_exhaustive()
    }
}

impl LiveSync {
    /// Create a disconnected sync from its record.
    pub fn new(
        record: TranslationRecord,
        gateway: Arc<dyn MessagingGateway>,
        resolver: Arc<dyn SourceResolver>,
    ) -> Self {
        Self {
            inner: Arc::new(SyncInner {
                id: record.id,
                target: record.chat,
                source_id: record.source_id,
                filter: record.filter,
                gateway,
                resolver,
                state: Mutex::new(SyncState {
                    message_id: record.message_id,
                    ..SyncState::default()
                }),
                io: tokio::sync::Mutex::new(()),
                wake: Arc::new(Notify::new()),
                events: Emitter::new(),
            }),
        }
    }

    fn state(&self) -> MutexGuard<'_, SyncState> {
        self.inner
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Translation id.
    #[must_use]
    pub fn id(&self) -> u64 {
        self.inner.id
    }

    /// Chat the post lives in.
    #[must_use]
    pub fn target(&self) -> &Destination {
        &self.inner.target
    }

    /// Source id.
    #[must_use]
    pub fn source_id(&self) -> &str {
        &self.inner.source_id
    }

    /// Render filter.
    #[must_use]
    pub fn filter(&self) -> RenderFilter {
        self.inner.filter
    }

    /// The synced message, once known.
    #[must_use]
    pub fn message_id(&self) -> Option<MessageId> {
        self.state().message_id
    }

    /// Whether the sync was destroyed.
    #[must_use]
    pub fn is_destroyed(&self) -> bool {
        self.state().destroyed.is_some()
    }

    /// Why the sync was destroyed.
    #[must_use]
    pub fn destroy_reason(&self) -> Option<String> {
        self.state().destroyed.clone()
    }

    /// Current persisted form.
    #[must_use]
    pub fn record(&self) -> TranslationRecord {
        TranslationRecord {
            id: self.inner.id,
            chat: self.inner.target.clone(),
            message_id: self.message_id(),
            source_id: self.inner.source_id.clone(),
            filter: self.inner.filter,
        }
    }

    /// Run `listener` once when the sync is destroyed.
    pub fn on_destroy<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&Destroyed) + Send + Sync + 'static,
    {
        self.inner
            .events
            .subscribe(Some(SyncTopic::Destroyed), listener)
    }

    fn ensure_alive(&self) -> SyncResult<()> {
        if self.is_destroyed() {
            return Err(SyncError::Destroyed(self.inner.id));
        }
        Ok(())
    }

    /// Subscribe to the source and send the post if it has no message yet.
    pub async fn connect(&self) -> SyncResult<()> {
        let _io = self.inner.io.lock().await;
        self.ensure_alive()?;

        let Some(source) = self.inner.resolver.resolve(&self.inner.source_id) else {
            self.destroy("source missing");
            return Err(SyncError::SourceMissing(self.inner.source_id.clone()));
        };

        let wake = Arc::clone(&self.inner.wake);
        let listener: ChangeListener = Arc::new(move || wake.notify_one());
        let fresh = source.watch(&self.inner.target, listener);

        let (stale, spawn_worker) = {
            let mut state = self.state();
            if state.destroyed.is_some() {
                (fresh, false)
            } else {
                let stale = std::mem::replace(&mut state.subscriptions, fresh);
                let spawn = !state.worker;
                state.worker = true;
                (stale, spawn)
            }
        };
        for mut subscription in stale {
            subscription.dispose();
        }
        self.ensure_alive()?;
        if spawn_worker {
            tokio::spawn(Self::worker(
                Arc::downgrade(&self.inner),
                Arc::clone(&self.inner.wake),
            ));
        }

        if self.message_id().is_some() {
            debug!(translation_id = self.inner.id, "translation reconnected");
            return Ok(());
        }

        let content = source.render(&self.inner.target, self.inner.filter);
        if content.is_empty() {
            self.destroy("empty content");
            return Err(SyncError::EmptyContent);
        }
        match self.inner.gateway.send(&self.inner.target, &content).await {
            Ok(message_id) => {
                self.state().message_id = Some(message_id);
                info!(
                    translation_id = self.inner.id,
                    chat = %self.inner.target,
                    message_id,
                    "translation connected"
                );
                Ok(())
            }
            Err(e) => {
                if e.is_fatal() {
                    self.destroy(format!("send failed: {e}"));
                } else {
                    warn!(translation_id = self.inner.id, error = %e, "failed to send translation");
                }
                Err(e.into())
            }
        }
    }

    /// Re-render and edit the post in place.
    pub async fn resync(&self) -> SyncResult<()> {
        let _io = self.inner.io.lock().await;
        self.ensure_alive()?;

        let Some(message_id) = self.message_id() else {
            return Err(SyncError::NotConnected(self.inner.id));
        };
        let Some(source) = self.inner.resolver.resolve(&self.inner.source_id) else {
            self.destroy("source missing");
            return Err(SyncError::SourceMissing(self.inner.source_id.clone()));
        };
        let content = source.render(&self.inner.target, self.inner.filter);
        if content.is_empty() {
            self.destroy("empty content");
            return Err(SyncError::EmptyContent);
        }
        self.ensure_alive()?;

        match self
            .inner
            .gateway
            .edit(&self.inner.target, message_id, &content)
            .await
        {
            Ok(()) => {
                debug!(translation_id = self.inner.id, message_id, "translation updated");
                Ok(())
            }
            Err(e) if e.is_not_modified() => Ok(()),
            Err(e) if e.is_fatal() => {
                self.destroy(format!("message lost: {e}"));
                Err(e.into())
            }
            Err(e) => {
                warn!(translation_id = self.inner.id, error = %e, "failed to update translation");
                Err(e.into())
            }
        }
    }

    /// Resync on demand, e.g. to fill an adopted message right away.
    pub async fn update_post(&self) -> SyncResult<()> {
        debug!(translation_id = self.inner.id, "updating post");
        self.resync().await
    }

    /// Stop syncing for good. Returns `false` if already destroyed.
    ///
    /// Subscriptions are dropped and the destroy event is published once.
    pub fn destroy(&self, reason: impl Into<String>) -> bool {
        let reason = reason.into();
        let subscriptions = {
            let mut state = self.state();
            if state.destroyed.is_some() {
                return false;
            }
            state.destroyed = Some(reason.clone());
            std::mem::take(&mut state.subscriptions)
        };
        for mut subscription in subscriptions {
            subscription.dispose();
        }
        self.inner.wake.notify_one();

        info!(translation_id = self.inner.id, reason = %reason, "translation destroyed");
        self.inner.events.publish(
            Some(SyncTopic::Destroyed),
            &Destroyed {
                id: self.inner.id,
                reason,
            },
        );
        true
    }

    async fn worker(inner: Weak<SyncInner>, wake: Arc<Notify>) {
        loop {
            wake.notified().await;
            let Some(inner) = inner.upgrade() else {
                break;
            };
            let sync = Self { inner };
            if sync.is_destroyed() {
                break;
            }
            if let Err(e) = sync.resync().await {
                debug!(translation_id = sync.id(), error = %e, "resync failed");
            }
        }
    }
}
