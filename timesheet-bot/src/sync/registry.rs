//! Owner of every live post.

use super::source::SourceResolver;
use super::translation::{LiveSync, TranslationRecord};
use crate::emitter::Subscription;
use crate::error::{SyncError, SyncResult};
use crate::gateway::MessagingGateway;
use crate::store::{self, KeyValueStore, record_key};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use tracing::{debug, info, warn};

/// Storage category of translation records.
pub const CATEGORY: &str = "translation";

/// Id counter of translations.
const COUNTER: &str = "translation";

struct Entry {
    sync: LiveSync,
    _on_destroy: Subscription,
}

struct RegistryInner {
    store: Arc<dyn KeyValueStore>,
    gateway: Arc<dyn MessagingGateway>,
    resolver: Arc<dyn SourceResolver>,
    live: Mutex<BTreeMap<u64, Entry>>,
}

impl RegistryInner {
    fn live(&self) -> MutexGuard<'_, BTreeMap<u64, Entry>> {
        self.live.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn evict(&self, id: u64, reason: &str) {
        let removed = self.live().remove(&id);
        if let Err(e) = self.store.remove(&record_key(CATEGORY, id)) {
            warn!(translation_id = id, error = %e, "failed to delete translation record");
        }
        if removed.is_some() {
            info!(translation_id = id, reason, "translation evicted");
        }
    }
}

/// Keeps live posts running, persisted, and evicted once they die.
///
/// Every sync the registry owns is watched for its destroy event; a
/// destroyed sync is dropped from memory and its record deleted.
#[derive(Clone)]
pub struct TranslationRegistry {
    inner: Arc<RegistryInner>,
}

impl std::fmt::Debug for TranslationRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TranslationRegistry")
            .field("live", &self.inner.live().len())
            .finish_non_exhaustive()
    }
}

impl TranslationRegistry {
    /// Empty registry.
    pub fn new(
        store: Arc<dyn KeyValueStore>,
        gateway: Arc<dyn MessagingGateway>,
        resolver: Arc<dyn SourceResolver>,
    ) -> Self {
        Self {
            inner: Arc::new(RegistryInner {
                store,
                gateway,
                resolver,
                live: Mutex::new(BTreeMap::new()),
            }),
        }
    }

    /// Gateway the posts go through.
    #[must_use]
    pub fn gateway(&self) -> &Arc<dyn MessagingGateway> {
        &self.inner.gateway
    }

    /// Allocate a fresh translation id.
    pub fn next_id(&self) -> SyncResult<u64> {
        Ok(store::next_id(self.inner.store.as_ref(), COUNTER)?)
    }

    fn build(&self, record: TranslationRecord) -> LiveSync {
        LiveSync::new(
            record,
            Arc::clone(&self.inner.gateway),
            Arc::clone(&self.inner.resolver),
        )
    }

    fn track(&self, sync: &LiveSync) {
        let registry: Weak<RegistryInner> = Arc::downgrade(&self.inner);
        let on_destroy = sync.on_destroy(move |event| {
            if let Some(registry) = registry.upgrade() {
                registry.evict(event.id, &event.reason);
            }
        });
        self.inner.live().insert(
            sync.id(),
            Entry {
                sync: sync.clone(),
                _on_destroy: on_destroy,
            },
        );
    }

    fn persist(&self, sync: &LiveSync) -> SyncResult<()> {
        store::save(self.inner.store.as_ref(), CATEGORY, sync.id(), &sync.record())?;
        Ok(())
    }

    /// Connect a new translation and persist it.
    ///
    /// A translation that fails to connect is destroyed and never stored. One
    /// destroyed while its record was being written has the record deleted
    /// again.
    pub async fn add(&self, record: TranslationRecord) -> SyncResult<LiveSync> {
        let sync = self.build(record);
        self.track(&sync);
        if let Err(e) = sync.connect().await {
            sync.destroy(format!("connect failed: {e}"));
            return Err(e);
        }
        if let Err(e) = self.persist(&sync) {
            sync.destroy("could not persist");
            return Err(e);
        }
        if sync.is_destroyed() {
            self.inner.evict(sync.id(), "destroyed while stored");
            return Err(SyncError::Destroyed(sync.id()));
        }
        Ok(sync)
    }

    /// Create, connect, and persist a translation with a fresh id.
    pub async fn create(
        &self,
        record: impl FnOnce(u64) -> TranslationRecord + Send,
    ) -> SyncResult<LiveSync> {
        let id = self.next_id()?;
        self.add(record(id)).await
    }

    /// Re-create and reconnect every persisted translation.
    ///
    /// Posts that already have a message are updated right away, so ones
    /// deleted while the bot was down are evicted instead of lingering until
    /// their source changes. One failing translation never stops the rest.
    /// Returns how many are live afterwards.
    pub async fn restore(&self) -> SyncResult<usize> {
        let records: Vec<TranslationRecord> = store::load_all(self.inner.store.as_ref(), CATEGORY)?;
        for record in records {
            let known_message = record.message_id.is_some();
            let sync = self.build(record);
            self.track(&sync);
            if let Err(e) = sync.connect().await {
                warn!(translation_id = sync.id(), error = %e, "failed to restore translation");
                continue;
            }
            if known_message && let Err(e) = sync.update_post().await {
                if sync.is_destroyed() {
                    warn!(translation_id = sync.id(), error = %e, "restored post is gone");
                    continue;
                }
                debug!(translation_id = sync.id(), error = %e, "restored post not updated");
            }
            if let Err(e) = self.persist(&sync) {
                warn!(translation_id = sync.id(), error = %e, "failed to store restored translation");
            }
        }
        let live = self.len();
        info!(live, "translations restored");
        Ok(live)
    }

    /// A live translation.
    #[must_use]
    pub fn get(&self, id: u64) -> Option<LiveSync> {
        self.inner.live().get(&id).map(|entry| entry.sync.clone())
    }

    /// Every live translation, by id.
    #[must_use]
    pub fn all(&self) -> Vec<LiveSync> {
        self.inner
            .live()
            .values()
            .map(|entry| entry.sync.clone())
            .collect()
    }

    /// Number of live translations.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.live().len()
    }

    /// Whether no translation is live.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.live().is_empty()
    }

    /// Destroy one translation. Returns `false` if it was not live.
    pub fn remove(&self, id: u64, reason: &str) -> bool {
        self.get(id).is_some_and(|sync| sync.destroy(reason))
    }

    /// Destroy every translation whose record matches. Returns the count.
    pub fn remove_where<F>(&self, predicate: F, reason: &str) -> usize
    where
        F: Fn(&TranslationRecord) -> bool,
    {
        let doomed: Vec<LiveSync> = self
            .all()
            .into_iter()
            .filter(|sync| predicate(&sync.record()))
            .collect();
        doomed
            .iter()
            .filter(|sync| sync.destroy(reason))
            .count()
    }

    /// Update every live post. Returns how many updates succeeded.
    pub async fn refresh_all(&self) -> usize {
        let mut refreshed = 0;
        for sync in self.all() {
            match sync.update_post().await {
                Ok(()) => refreshed += 1,
                Err(SyncError::Destroyed(_)) => {}
                Err(e) => debug!(translation_id = sync.id(), error = %e, "refresh failed"),
            }
        }
        info!(refreshed, "translations refreshed");
        refreshed
    }
}
