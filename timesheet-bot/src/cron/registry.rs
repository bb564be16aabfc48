//! Persisted periodic actions and their running schedulers.

use super::action::{ActionKind, PeriodicAction};
use super::executor::ActionExecutor;
use super::period::{Clock, Period};
use super::scheduler::{DEFAULT_CHECK_INTERVAL, PeriodicScheduler, SchedulerHandle};
use crate::error::StorageResult;
use crate::store::{self, KeyValueStore, record_key};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;
use tracing::{error, info, warn};

/// Storage category of action records.
pub const CATEGORY: &str = "action";

/// Id counter of actions.
const COUNTER: &str = "action";

struct Running {
    record: Arc<Mutex<PeriodicAction>>,
    scheduler: PeriodicScheduler,
    handle: SchedulerHandle,
}

struct ActionsInner {
    store: Arc<dyn KeyValueStore>,
    clock: Arc<dyn Clock>,
    executor: Arc<dyn ActionExecutor>,
    check_interval: Duration,
    running: Mutex<BTreeMap<u64, Running>>,
}

impl ActionsInner {
    fn running(&self) -> MutexGuard<'_, BTreeMap<u64, Running>> {
        self.running.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Persist `action` unless it was removed meanwhile.
    fn persist_live(&self, action: &PeriodicAction) {
        if !self.running().contains_key(&action.id) {
            return;
        }
        if let Err(e) = store::save(self.store.as_ref(), CATEGORY, action.id, action) {
            error!(action_id = action.id, error = %e, "failed to persist action");
        }
    }
}

fn lock(record: &Mutex<PeriodicAction>) -> MutexGuard<'_, PeriodicAction> {
    record.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Keeps one scheduler running per persisted action.
///
/// Watermarks are written to the store as soon as they move, so a restart
/// never fires an action twice for the same due point.
#[derive(Clone)]
pub struct ActionRegistry {
    inner: Arc<ActionsInner>,
}

impl std::fmt::Debug for ActionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActionRegistry")
            .field("running", &self.inner.running().len())
            .finish_non_exhaustive()
    }
}

impl ActionRegistry {
    /// Registry running actions through `executor`.
    pub fn new(
        store: Arc<dyn KeyValueStore>,
        clock: Arc<dyn Clock>,
        executor: Arc<dyn ActionExecutor>,
    ) -> Self {
        Self::with_check_interval(store, clock, executor, DEFAULT_CHECK_INTERVAL)
    }

    /// Registry polling every `check_interval`.
    pub fn with_check_interval(
        store: Arc<dyn KeyValueStore>,
        clock: Arc<dyn Clock>,
        executor: Arc<dyn ActionExecutor>,
        check_interval: Duration,
    ) -> Self {
        Self {
            inner: Arc::new(ActionsInner {
                store,
                clock,
                executor,
                check_interval,
                running: Mutex::new(BTreeMap::new()),
            }),
        }
    }

    /// Allocate a fresh action id.
    pub fn next_id(&self) -> StorageResult<u64> {
        store::next_id(self.inner.store.as_ref(), COUNTER)
    }

    /// Persist `action` and (re)start its scheduler.
    pub fn put(&self, mut action: PeriodicAction) -> StorageResult<()> {
        self.stop(action.id);
        if action.last_fired.is_none() {
            action.last_fired = Some(self.inner.clock.now());
        }
        store::save(self.inner.store.as_ref(), CATEGORY, action.id, &action)?;
        info!(action_id = action.id, kind = action.kind.name(), "action scheduled");
        self.launch(action);
        Ok(())
    }

    fn launch(&self, action: PeriodicAction) {
        let id = action.id;
        let period = action.period;
        let last_fired = action.last_fired;
        let record = Arc::new(Mutex::new(action));

        let weak: Weak<ActionsInner> = Arc::downgrade(&self.inner);
        let watermark_record = Arc::clone(&record);
        let watermark_registry = weak.clone();
        let action_record = Arc::clone(&record);
        let executor = Arc::clone(&self.inner.executor);

        let scheduler = PeriodicScheduler::builder(period, Arc::clone(&self.inner.clock))
            .last_fired(last_fired)
            .check_interval(self.inner.check_interval)
            .on_watermark(move |at| {
                let snapshot = {
                    let mut action = lock(&watermark_record);
                    action.last_fired = Some(at);
                    action.clone()
                };
                if let Some(registry) = watermark_registry.upgrade() {
                    registry.persist_live(&snapshot);
                }
            })
            .build(move || {
                let record = Arc::clone(&action_record);
                let executor = Arc::clone(&executor);
                let registry = weak.clone();
                Box::pin(async move {
                    let current = lock(&record).clone();
                    match executor.execute(current).await {
                        Ok(updated) => {
                            {
                                let mut action = lock(&record);
                                action.kind = updated.kind;
                            }
                            let snapshot = lock(&record).clone();
                            if let Some(registry) = registry.upgrade() {
                                registry.persist_live(&snapshot);
                            }
                        }
                        Err(e) => warn!(action_id = id, error = %e, "periodic action failed"),
                    }
                })
            });

        // Hold the map while starting so the first poll finds the entry.
        let mut running = self.inner.running();
        let handle = scheduler.start();
        running.insert(
            id,
            Running {
                record,
                scheduler,
                handle,
            },
        );
    }

    fn stop(&self, id: u64) -> bool {
        let removed = self.inner.running().remove(&id);
        removed.is_some_and(|running| {
            running.handle.stop_now();
            true
        })
    }

    /// Stop and delete an action. Returns `false` if it did not exist.
    pub fn remove(&self, id: u64) -> StorageResult<bool> {
        let was_running = self.stop(id);
        let key = record_key(CATEGORY, id);
        let existed = self.inner.store.get(&key)?.is_some();
        self.inner.store.remove(&key)?;
        if existed {
            info!(action_id = id, "action removed");
        }
        Ok(was_running || existed)
    }

    /// Stop and delete every action matching `predicate`. Returns the count.
    pub fn remove_where<F>(&self, predicate: F) -> StorageResult<usize>
    where
        F: Fn(&PeriodicAction) -> bool,
    {
        let doomed: Vec<u64> = self
            .list()?
            .into_iter()
            .filter(|action| predicate(action))
            .map(|action| action.id)
            .collect();
        for id in &doomed {
            self.remove(*id)?;
        }
        Ok(doomed.len())
    }

    /// Start a scheduler for every persisted action. Returns the count.
    pub fn start_all(&self) -> StorageResult<usize> {
        let actions: Vec<PeriodicAction> = store::load_all(self.inner.store.as_ref(), CATEGORY)?;
        let count = actions.len();
        for action in actions {
            self.stop(action.id);
            self.launch(action);
        }
        info!(count, "periodic actions started");
        Ok(count)
    }

    /// Stop every scheduler; records stay persisted.
    pub fn stop_all(&self) {
        let running = std::mem::take(&mut *self.inner.running());
        for running in running.into_values() {
            running.handle.stop_now();
        }
    }

    /// Every persisted action.
    pub fn list(&self) -> StorageResult<Vec<PeriodicAction>> {
        store::load_all(self.inner.store.as_ref(), CATEGORY)
    }

    /// Live state of a running action.
    #[must_use]
    pub fn get(&self, id: u64) -> Option<PeriodicAction> {
        self.inner
            .running()
            .get(&id)
            .map(|running| lock(&running.record).clone())
    }

    /// Scheduler of a running action.
    #[must_use]
    pub fn scheduler(&self, id: u64) -> Option<PeriodicScheduler> {
        self.inner
            .running()
            .get(&id)
            .map(|running| running.scheduler.clone())
    }

    /// Number of running schedulers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.running().len()
    }

    /// Whether nothing is running.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.running().is_empty()
    }

    /// Make sure one built-in refresh job exists, creating it with `period`.
    ///
    /// Returns its id.
    pub fn ensure_refresh_job(&self, period: Period) -> StorageResult<u64> {
        if let Some(existing) = self
            .list()?
            .into_iter()
            .find(|action| action.kind == ActionKind::RefreshTranslations)
        {
            return Ok(existing.id);
        }
        let id = self.next_id()?;
        self.put(PeriodicAction::new(id, "", period, ActionKind::RefreshTranslations))?;
        Ok(id)
    }
}
