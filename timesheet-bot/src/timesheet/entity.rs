//! Persisted, observable entities.

use crate::emitter::{Emitter, Subscription};
use crate::error::StorageResult;
use crate::store::{self, KeyValueStore};
use serde::Serialize;
use std::sync::{Arc, PoisonError, RwLock};
use tracing::debug;

struct EntityInner<T> {
    category: &'static str,
    id: String,
    data: RwLock<T>,
    changes: Emitter<()>,
    store: Arc<dyn KeyValueStore>,
}

/// Shared handle to one stored record.
///
/// Writers take the entity's own lock and write the new state through to
/// the store before releasing it, so the store sees writes in the same order
/// as memory. Listeners are notified after the lock is released.
pub struct Entity<T> {
    inner: Arc<EntityInner<T>>,
}

impl<T> Clone for Entity<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: std::fmt::Debug> std::fmt::Debug for Entity<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Entity")
            .field("category", &self.inner.category)
            .field("id", &self.inner.id)
            .field(
                "data",
                &*self.inner.data.read().unwrap_or_else(PoisonError::into_inner),
            )
            .finish_non_exhaustive()
    }
}

impl<T> Entity<T>
where
    T: Serialize + Clone + Send + Sync + 'static,
{
    /// Wrap `data` stored as `<category>:<id>`. Nothing is written yet.
    pub fn new(
        store: Arc<dyn KeyValueStore>,
        category: &'static str,
        id: impl std::fmt::Display,
        data: T,
    ) -> Self {
        Self {
            inner: Arc::new(EntityInner {
                category,
                id: id.to_string(),
                data: RwLock::new(data),
                changes: Emitter::new(),
                store,
            }),
        }
    }

    /// Record id within its category.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.inner.id
    }

    /// Copy of the current state.
    #[must_use]
    pub fn snapshot(&self) -> T {
        self.read(Clone::clone)
    }

    /// Look at the current state.
    pub fn read<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        f(&self
            .inner
            .data
            .read()
            .unwrap_or_else(PoisonError::into_inner))
    }

    /// Mutate, persist, then notify.
    pub fn update<R>(&self, f: impl FnOnce(&mut T) -> R) -> StorageResult<R> {
        let result = {
            let mut data = self
                .inner
                .data
                .write()
                .unwrap_or_else(PoisonError::into_inner);
            let result = f(&mut data);
            self.write(&data)?;
            result
        };
        self.inner.changes.publish(None, &());
        Ok(result)
    }

    /// Persist the current state without notifying.
    pub fn save(&self) -> StorageResult<()> {
        let data = self
            .inner
            .data
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        self.write(&data)
    }

    fn write(&self, data: &T) -> StorageResult<()> {
        debug!(category = self.inner.category, id = %self.inner.id, "saving entity");
        store::save(
            self.inner.store.as_ref(),
            self.inner.category,
            &self.inner.id,
            data,
        )
    }

    /// Call `listener` after every change.
    pub fn watch<F>(&self, listener: F) -> Subscription
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.inner.changes.subscribe(None, move |()| listener())
    }

    /// Number of listeners.
    #[must_use]
    pub fn watcher_count(&self) -> usize {
        self.inner.changes.listener_count(None)
    }
}
