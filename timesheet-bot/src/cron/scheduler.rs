//! Periodic scheduler with catch-up.

use super::period::{Clock, Period};
use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::{RwLock, mpsc};
use tracing::{debug, info};

/// Default upper bound on how stale a due point may get before it fires.
pub const DEFAULT_CHECK_INTERVAL: Duration = Duration::from_secs(5);

/// The scheduled work.
pub type ScheduledAction = Arc<dyn Fn() -> BoxFuture<'static, ()> + Send + Sync>;

/// Called with the new watermark before the action runs.
pub type WatermarkListener = Arc<dyn Fn(DateTime<Utc>) + Send + Sync>;

/// Handle for controlling the scheduler.
#[derive(Debug, Clone)]
pub struct SchedulerHandle {
    shutdown_tx: mpsc::Sender<()>,
}

impl SchedulerHandle {
    /// Signal the scheduler to stop.
    pub async fn stop(&self) {
        let _ = self.shutdown_tx.send(()).await;
    }

    /// Signal the scheduler to stop without waiting.
    pub fn stop_now(&self) {
        let _ = self.shutdown_tx.try_send(());
    }
}

struct Watermark {
    last_fired: DateTime<Utc>,
    fired: u64,
}

struct SchedulerInner {
    period: Period,
    check_interval: Duration,
    clock: Arc<dyn Clock>,
    action: ScheduledAction,
    on_watermark: Option<WatermarkListener>,
    state: Mutex<Watermark>,
    running: RwLock<bool>,
}

/// Fires an action once per period, polled every check interval.
///
/// A poll fires when the first due point after the watermark has passed;
/// the watermark then jumps to now. After downtime spanning several due
/// points this fires exactly once, and two polls inside one interval never
/// both fire.
#[derive(Clone)]
pub struct PeriodicScheduler {
    inner: Arc<SchedulerInner>,
}

impl std::fmt::Debug for PeriodicScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PeriodicScheduler")
            .field("period", &self.inner.period)
            .field("check_interval", &self.inner.check_interval)
            .field("last_fired", &self.last_fired())
            .finish_non_exhaustive()
    }
}

/// Builder for a [`PeriodicScheduler`].
pub struct SchedulerBuilder {
    period: Period,
    clock: Arc<dyn Clock>,
    last_fired: Option<DateTime<Utc>>,
    check_interval: Duration,
    on_watermark: Option<WatermarkListener>,
}

impl std::fmt::Debug for SchedulerBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SchedulerBuilder")
            .field("period", &self.period)
            .field("last_fired", &self.last_fired)
            .finish_non_exhaustive()
    }
}

impl SchedulerBuilder {
    /// Resume from a persisted watermark; defaults to now.
    #[must_use]
    pub const fn last_fired(mut self, last_fired: Option<DateTime<Utc>>) -> Self {
        self.last_fired = last_fired;
        self
    }

    /// Poll interval, capped at the period's interval.
    #[must_use]
    pub const fn check_interval(mut self, interval: Duration) -> Self {
        self.check_interval = interval;
        self
    }

    /// Listener told about every watermark change.
    #[must_use]
    pub fn on_watermark<F>(mut self, listener: F) -> Self
    where
        F: Fn(DateTime<Utc>) + Send + Sync + 'static,
    {
        self.on_watermark = Some(Arc::new(listener));
        self
    }

    /// Build the scheduler around `action`.
    pub fn build<F>(self, action: F) -> PeriodicScheduler
    where
        F: Fn() -> BoxFuture<'static, ()> + Send + Sync + 'static,
    {
        let max_check = self
            .period
            .interval()
            .to_std()
            .unwrap_or(DEFAULT_CHECK_INTERVAL);
        let check_interval = self
            .check_interval
            .min(max_check)
            .max(Duration::from_millis(1));
        let last_fired = self.last_fired.unwrap_or_else(|| self.clock.now());

        PeriodicScheduler {
            inner: Arc::new(SchedulerInner {
                period: self.period,
                check_interval,
                clock: self.clock,
                action: Arc::new(action),
                on_watermark: self.on_watermark,
                state: Mutex::new(Watermark {
                    last_fired,
                    fired: 0,
                }),
                running: RwLock::new(false),
            }),
        }
    }
}

impl PeriodicScheduler {
    /// Start building a scheduler for `period`.
    pub fn builder(period: Period, clock: Arc<dyn Clock>) -> SchedulerBuilder {
        SchedulerBuilder {
            period,
            clock,
            last_fired: None,
            check_interval: DEFAULT_CHECK_INTERVAL,
            on_watermark: None,
        }
    }

    fn state(&self) -> MutexGuard<'_, Watermark> {
        self.inner
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// The period.
    #[must_use]
    pub fn period(&self) -> Period {
        self.inner.period
    }

    /// Effective poll interval.
    #[must_use]
    pub fn check_interval(&self) -> Duration {
        self.inner.check_interval
    }

    /// Time of the last fire.
    #[must_use]
    pub fn last_fired(&self) -> DateTime<Utc> {
        self.state().last_fired
    }

    /// Fires since the last start.
    #[must_use]
    pub fn fire_count(&self) -> u64 {
        self.state().fired
    }

    /// Next due point.
    #[must_use]
    pub fn next_due(&self) -> DateTime<Utc> {
        self.inner.period.next_due(self.last_fired())
    }

    /// Check once and fire if due. Returns whether the action ran.
    pub async fn poll(&self) -> bool {
        let now = self.inner.clock.now();
        let fired_at = {
            let mut state = self.state();
            let due = self.inner.period.next_due(state.last_fired);
            if !(state.last_fired < due && due <= now) {
                return false;
            }
            state.last_fired = now;
            state.fired += 1;
            now
        };

        debug!(at = %fired_at, "periodic action due");
        if let Some(listener) = &self.inner.on_watermark {
            listener(fired_at);
        }
        (self.inner.action)().await;
        true
    }

    /// Start the poll loop.
    ///
    /// The first poll happens right away, so a due point missed while the
    /// process was down fires on start.
    pub fn start(&self) -> SchedulerHandle {
        let (shutdown_tx, mut shutdown_rx) = mpsc::channel::<()>(1);
        let handle = SchedulerHandle { shutdown_tx };
        let scheduler = self.clone();

        tokio::spawn(async move {
            *scheduler.inner.running.write().await = true;
            info!(next_due = %scheduler.next_due(), "periodic scheduler started");

            loop {
                scheduler.poll().await;
                tokio::select! {
                    () = tokio::time::sleep(scheduler.inner.check_interval) => {}
                    _ = shutdown_rx.recv() => {
                        info!("periodic scheduler shutting down");
                        break;
                    }
                }
            }

            scheduler.state().fired = 0;
            *scheduler.inner.running.write().await = false;
        });

        handle
    }

    /// Check if the loop is running.
    pub async fn is_running(&self) -> bool {
        *self.inner.running.read().await
    }
}
