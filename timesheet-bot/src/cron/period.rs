//! Anchored periods and clocks.

use crate::error::{ConfigError, ConfigResult};
use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use std::sync::{Mutex, PoisonError};

/// A recurring point in time: `anchor + k * interval` for `k >= 0`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Period {
    /// First due point; fixes the phase.
    pub anchor: DateTime<Utc>,
    /// Interval in seconds.
    #[serde(rename = "interval")]
    interval_secs: i64,
}

impl Period {
    /// Period starting at `anchor`. The interval must be positive.
    pub fn new(anchor: DateTime<Utc>, interval: TimeDelta) -> ConfigResult<Self> {
        let interval_secs = interval.num_seconds();
        if interval_secs <= 0 {
            return Err(ConfigError::invalid(format!(
                "period interval must be positive, got {interval_secs}s"
            )));
        }
        Ok(Self {
            anchor,
            interval_secs,
        })
    }

    /// Every `hours` hours starting at `anchor`.
    pub fn hours(anchor: DateTime<Utc>, hours: i64) -> ConfigResult<Self> {
        Self::new(anchor, TimeDelta::hours(hours))
    }

    /// The interval.
    #[must_use]
    pub fn interval(&self) -> TimeDelta {
        TimeDelta::seconds(self.interval_secs)
    }

    /// First due point strictly after `last_fired`.
    ///
    /// Points before the anchor do not exist, so anything earlier than the
    /// anchor is due at the anchor itself.
    #[must_use]
    pub fn next_due(&self, last_fired: DateTime<Utc>) -> DateTime<Utc> {
        let elapsed = (last_fired - self.anchor).num_milliseconds();
        if elapsed < 0 {
            return self.anchor;
        }
        let step = self.interval_secs.max(1).saturating_mul(1000);
        let k = elapsed / step + 1;
        TimeDelta::try_milliseconds(step.saturating_mul(k))
            .and_then(|offset| self.anchor.checked_add_signed(offset))
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }
}

/// Source of the current time.
pub trait Clock: Send + Sync {
    /// Current instant.
    fn now(&self) -> DateTime<Utc>;
}

/// The system clock.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    /// Clock stopped at `now`.
    #[must_use]
    pub const fn new(now: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(now),
        }
    }

    /// Jump to `now`.
    pub fn set(&self, now: DateTime<Utc>) {
        *self.now.lock().unwrap_or_else(PoisonError::into_inner) = now;
    }

    /// Move forward by `by`.
    pub fn advance(&self, by: TimeDelta) {
        *self.now.lock().unwrap_or_else(PoisonError::into_inner) += by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
