//! The assembled bot.
//!
//! [`Bot`] wires the store, timesheets, live posts, periodic actions and the
//! dispatcher around one messaging gateway:
//! - restores live posts and periodic actions on start
//! - keeps the daily refresh job in place
//! - dispatches inbound events from the bus until stopped

use crate::bus::MessageBus;
use crate::config::BotConfig;
use crate::cron::{ActionRegistry, Clock, Period, RepostExecutor, SystemClock};
use crate::dialog::Dispatcher;
use crate::error::{ErrorContext, Result};
use crate::gateway::MessagingGateway;
use crate::store::{FileStore, KeyValueStore};
use crate::sync::TranslationRegistry;
use crate::timesheet::{Services, TimesheetBook, dialog};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::info;

/// What was brought back on start.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RestoreReport {
    /// Timesheets loaded.
    pub timesheets: usize,
    /// Live posts reconnected.
    pub translations: usize,
    /// Periodic actions started.
    pub actions: usize,
    /// Id of the refresh job.
    pub refresh_job: u64,
}

/// Bot service running every component.
pub struct Bot {
    config: BotConfig,
    bus: MessageBus,
    services: Services,
    dispatcher: Dispatcher<Services>,
    running: Arc<RwLock<bool>>,
}

impl std::fmt::Debug for Bot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Bot")
            .field("config", &self.config)
            .field("bus", &self.bus)
            .finish_non_exhaustive()
    }
}

impl Bot {
    /// Bot persisting to the configured data file, on the system clock.
    pub fn open(config: BotConfig, gateway: Arc<dyn MessagingGateway>) -> Result<Self> {
        let store = FileStore::open(&config.data_path)
            .with_context(|| format!("opening {}", config.data_path.display()))?;
        let store = Arc::new(store);
        Ok(Self::with_parts(config, store, gateway, Arc::new(SystemClock)))
    }

    /// Bot over explicit collaborators.
    pub fn with_parts(
        config: BotConfig,
        store: Arc<dyn KeyValueStore>,
        gateway: Arc<dyn MessagingGateway>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let book = TimesheetBook::new(Arc::clone(&store), Arc::clone(&clock));
        let translations = TranslationRegistry::new(
            Arc::clone(&store),
            Arc::clone(&gateway),
            Arc::new(book.clone()),
        );
        let actions = ActionRegistry::with_check_interval(
            store,
            Arc::clone(&clock),
            Arc::new(RepostExecutor::new(translations.clone())),
            Duration::from_secs(config.schedule.check_interval_secs),
        );
        let services = Services {
            book,
            translations,
            actions,
            clock,
        };
        let for_sessions = services.clone();
        let dispatcher = Dispatcher::new(gateway, move |_session| dialog(for_sessions.clone()));

        Self {
            config,
            bus: MessageBus::new(),
            services,
            dispatcher,
            running: Arc::new(RwLock::new(false)),
        }
    }

    /// The inbound bus channels publish to.
    #[must_use]
    pub const fn bus(&self) -> &MessageBus {
        &self.bus
    }

    /// Shared services.
    #[must_use]
    pub const fn services(&self) -> &Services {
        &self.services
    }

    /// The session dispatcher.
    #[must_use]
    pub const fn dispatcher(&self) -> &Dispatcher<Services> {
        &self.dispatcher
    }

    /// Load timesheets, reconnect live posts, start periodic actions and make
    /// sure the refresh job exists.
    pub async fn restore(&self) -> Result<RestoreReport> {
        let timesheets = self.services.book.load()?;
        let translations = self.services.translations.restore().await?;
        let actions = self.services.actions.start_all()?;
        let period = Period::hours(
            self.services.clock.now(),
            self.config.schedule.refresh_hours,
        )?;
        let refresh_job = self.services.actions.ensure_refresh_job(period)?;

        let report = RestoreReport {
            timesheets,
            translations,
            actions,
            refresh_job,
        };
        info!(?report, "bot state restored");
        Ok(report)
    }

    /// Restore state, then dispatch until [`stop`](Self::stop) is called.
    pub async fn run(&self) -> Result<()> {
        *self.running.write().await = true;
        info!("Bot starting...");

        self.restore().await?;
        let result = self.dispatcher.run(&self.bus).await;

        self.services.actions.stop_all();
        *self.running.write().await = false;
        info!("Bot stopped");
        result
    }

    /// Stop dispatching and all periodic actions.
    pub async fn stop(&self) {
        self.dispatcher.stop().await;
        self.services.actions.stop_all();
    }

    /// Whether [`run`](Self::run) is active.
    pub async fn is_running(&self) -> bool {
        *self.running.read().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cron::ManualClock;
    use crate::events::TextEvent;
    use crate::gateway::MemoryGateway;
    use crate::store::MemoryStore;
    use chrono::Utc;

    fn bot(store: Arc<MemoryStore>, gateway: Arc<MemoryGateway>) -> Bot {
        Bot::with_parts(
            BotConfig::default(),
            store,
            gateway,
            Arc::new(ManualClock::new(Utc::now())),
        )
    }

    #[tokio::test]
    async fn test_restore_creates_refresh_job_once() {
        let store = Arc::new(MemoryStore::new());
        let gateway = Arc::new(MemoryGateway::new());

        let first = bot(Arc::clone(&store), Arc::clone(&gateway));
        let report = first.restore().await.unwrap();
        assert_eq!(report.timesheets, 0);
        assert_eq!(report.actions, 0);
        first.stop().await;

        let second = bot(store, gateway);
        let again = second.restore().await.unwrap();
        assert_eq!(again.actions, 1);
        assert_eq!(again.refresh_job, report.refresh_job);
        assert_eq!(second.services().actions.len(), 1);
        second.stop().await;
    }

    #[tokio::test]
    async fn test_sessions_share_services() {
        let store = Arc::new(MemoryStore::new());
        let gateway = Arc::new(MemoryGateway::new());
        let bot = bot(store, gateway);

        bot.dispatcher()
            .dispatch(&TextEvent::new("1", "/new Summer").into())
            .await;
        bot.dispatcher()
            .dispatch(&TextEvent::new("2", "/new Winter").into())
            .await;

        assert_eq!(bot.dispatcher().session_count().await, 2);
        assert_eq!(bot.services().book.len(), 2);
    }
}
