//! The collection of timesheets, chat settings and user profiles.

use super::entity::Entity;
use super::model::{ChatSettings, Timesheet, UserProfile, render_post};
use crate::cron::Clock;
use crate::emitter::Subscription;
use crate::error::StorageResult;
use crate::events::Content;
use crate::gateway::Destination;
use crate::store::{self, KeyValueStore};
use crate::sync::{ChangeListener, ContentSource, RenderFilter, SourceResolver};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::info;

/// Storage category of timesheets.
pub const TIMESHEET_CATEGORY: &str = "timesheet";

/// Storage category of chat settings.
pub const SETTINGS_CATEGORY: &str = "chat_settings";

/// Storage category of user profiles.
pub const PROFILE_CATEGORY: &str = "user";

/// Prefix of timesheet source ids.
const SOURCE_PREFIX: &str = "timesheet:";

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

struct BookInner {
    store: Arc<dyn KeyValueStore>,
    clock: Arc<dyn Clock>,
    sheets: Mutex<BTreeMap<u64, Entity<Timesheet>>>,
    settings: Mutex<HashMap<String, Entity<ChatSettings>>>,
}

/// All timesheets, loaded once and kept in memory.
#[derive(Clone)]
pub struct TimesheetBook {
    inner: Arc<BookInner>,
}

impl std::fmt::Debug for TimesheetBook {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TimesheetBook")
            .field("timesheets", &lock(&self.inner.sheets).len())
            .finish_non_exhaustive()
    }
}

impl TimesheetBook {
    /// Empty book over `store`.
    pub fn new(store: Arc<dyn KeyValueStore>, clock: Arc<dyn Clock>) -> Self {
        Self {
            inner: Arc::new(BookInner {
                store,
                clock,
                sheets: Mutex::new(BTreeMap::new()),
                settings: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Load every stored timesheet. Returns the count.
    pub fn load(&self) -> StorageResult<usize> {
        let stored: Vec<Timesheet> = store::load_all(self.inner.store.as_ref(), TIMESHEET_CATEGORY)?;
        let mut sheets = lock(&self.inner.sheets);
        for sheet in stored {
            let id = sheet.id;
            sheets.insert(id, self.wrap(sheet));
        }
        info!(count = sheets.len(), "timesheets loaded");
        Ok(sheets.len())
    }

    fn wrap(&self, sheet: Timesheet) -> Entity<Timesheet> {
        let id = sheet.id;
        Entity::new(Arc::clone(&self.inner.store), TIMESHEET_CATEGORY, id, sheet)
    }

    /// Create and store a timesheet.
    pub fn create(
        &self,
        name: &str,
        password: &str,
        owner: &str,
    ) -> StorageResult<Entity<Timesheet>> {
        let id = store::next_id(self.inner.store.as_ref(), TIMESHEET_CATEGORY)?;
        let sheet = self.wrap(Timesheet::new(id, name, owner).with_password(password));
        sheet.save()?;
        lock(&self.inner.sheets).insert(id, sheet.clone());
        info!(timesheet_id = id, name, "timesheet created");
        Ok(sheet)
    }

    /// A timesheet by id.
    #[must_use]
    pub fn get(&self, id: u64) -> Option<Entity<Timesheet>> {
        lock(&self.inner.sheets).get(&id).cloned()
    }

    /// The timesheet called `name`.
    #[must_use]
    pub fn find_by_name(&self, name: &str) -> Option<Entity<Timesheet>> {
        lock(&self.inner.sheets)
            .values()
            .find(|sheet| sheet.read(|s| s.name == name))
            .cloned()
    }

    /// Every timesheet name, oldest first.
    #[must_use]
    pub fn names(&self) -> Vec<String> {
        lock(&self.inner.sheets)
            .values()
            .map(|sheet| sheet.read(|s| s.name.clone()))
            .collect()
    }

    /// Number of timesheets.
    #[must_use]
    pub fn len(&self) -> usize {
        lock(&self.inner.sheets).len()
    }

    /// Whether there are no timesheets.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        lock(&self.inner.sheets).is_empty()
    }

    /// Settings of `chat`, loaded on first use.
    pub fn settings(&self, chat: &Destination) -> StorageResult<Entity<ChatSettings>> {
        let key = chat.to_string();
        if let Some(found) = lock(&self.inner.settings).get(&key) {
            return Ok(found.clone());
        }
        let stored: Option<ChatSettings> =
            store::load(self.inner.store.as_ref(), SETTINGS_CATEGORY, &key)?;
        let entity = Entity::new(
            Arc::clone(&self.inner.store),
            SETTINGS_CATEGORY,
            &key,
            stored.unwrap_or_default(),
        );
        Ok(lock(&self.inner.settings).entry(key).or_insert(entity).clone())
    }

    /// Profile of `session`; a fresh one when nothing is stored.
    pub fn profile(&self, session: &str) -> StorageResult<UserProfile> {
        Ok(store::load(self.inner.store.as_ref(), PROFILE_CATEGORY, session)?.unwrap_or_default())
    }

    /// Update and store the profile of `session`.
    pub fn update_profile<R>(
        &self,
        session: &str,
        f: impl FnOnce(&mut UserProfile) -> R,
    ) -> StorageResult<R> {
        let mut profile = self.profile(session)?;
        let result = f(&mut profile);
        store::save(self.inner.store.as_ref(), PROFILE_CATEGORY, session, &profile)?;
        Ok(result)
    }

    /// Source id of timesheet `id`.
    #[must_use]
    pub fn source_id(id: u64) -> String {
        format!("{SOURCE_PREFIX}{id}")
    }

    /// Render timesheet `id` for `target` right now.
    pub fn render(
        &self,
        id: u64,
        target: &Destination,
        filter: RenderFilter,
    ) -> StorageResult<Option<Content>> {
        let Some(sheet) = self.get(id) else {
            return Ok(None);
        };
        let settings = self.settings(target)?;
        Ok(Some(render_post(
            &sheet.snapshot(),
            &settings.snapshot(),
            filter,
            self.inner.clock.now(),
        )))
    }
}

/// A timesheet as seen by live posts.
struct TimesheetSource {
    id: u64,
    sheet: Entity<Timesheet>,
    book: TimesheetBook,
}

impl ContentSource for TimesheetSource {
    fn source_id(&self) -> String {
        TimesheetBook::source_id(self.id)
    }

    fn render(&self, target: &Destination, filter: RenderFilter) -> Content {
        let settings = self
            .book
            .settings(target)
            .map(|s| s.snapshot())
            .unwrap_or_default();
        render_post(
            &self.sheet.snapshot(),
            &settings,
            filter,
            self.book.inner.clock.now(),
        )
    }

    fn watch(&self, target: &Destination, on_change: ChangeListener) -> Vec<Subscription> {
        let mut subscriptions = Vec::with_capacity(2);
        let listener = Arc::clone(&on_change);
        subscriptions.push(self.sheet.watch(move || listener()));
        if let Ok(settings) = self.book.settings(target) {
            subscriptions.push(settings.watch(move || on_change()));
        }
        subscriptions
    }
}

impl SourceResolver for TimesheetBook {
    fn resolve(&self, source_id: &str) -> Option<Arc<dyn ContentSource>> {
        let id: u64 = source_id.strip_prefix(SOURCE_PREFIX)?.parse().ok()?;
        let sheet = self.get(id)?;
        Some(Arc::new(TimesheetSource {
            id,
            sheet,
            book: self.clone(),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cron::ManualClock;
    use crate::store::MemoryStore;
    use crate::timesheet::model::EventEntry;
    use chrono::{TimeZone, Utc};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn book() -> (Arc<MemoryStore>, TimesheetBook) {
        let store = Arc::new(MemoryStore::new());
        let now = Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap();
        let book = TimesheetBook::new(store.clone(), Arc::new(ManualClock::new(now)));
        (store, book)
    }

    #[test]
    fn test_create_and_reload() {
        let (store, book) = book();
        let sheet = book.create("Summer", "pw", "42").unwrap();
        let starts = Utc.with_ymd_and_hms(2025, 6, 5, 18, 0, 0).unwrap();
        sheet
            .update(|s| s.add_event(EventEntry::new("Picnic", starts)))
            .unwrap();

        let reloaded = TimesheetBook::new(store, Arc::new(ManualClock::new(starts)));
        assert_eq!(reloaded.load().unwrap(), 1);
        let again = reloaded.get(1).unwrap().snapshot();
        assert_eq!(again.name, "Summer");
        assert_eq!(again.events.len(), 1);
    }

    #[test]
    fn test_resolve_source() {
        let (_store, book) = book();
        book.create("Summer", "pw", "42").unwrap();

        let source = book.resolve("timesheet:1").unwrap();
        assert_eq!(source.source_id(), "timesheet:1");
        assert!(book.resolve("timesheet:2").is_none());
        assert!(book.resolve("other:1").is_none());
        assert!(book.resolve("timesheet:x").is_none());
    }

    #[test]
    fn test_source_follows_sheet_and_chat_settings() {
        let (_store, book) = book();
        let sheet = book.create("Summer", "pw", "42").unwrap();
        let chat = Destination::chat("@news");
        let other = Destination::chat("@other");
        let source = book.resolve("timesheet:1").unwrap();

        let hits = Arc::new(AtomicUsize::new(0));
        let h = Arc::clone(&hits);
        let subs = source.watch(&chat, Arc::new(move || {
            h.fetch_add(1, Ordering::SeqCst);
        }));
        assert_eq!(subs.len(), 2);

        sheet.update(|s| s.name = "Autumn".into()).unwrap();
        book.settings(&chat)
            .unwrap()
            .update(|s| s.footer = Some("bye".into()))
            .unwrap();
        book.settings(&other)
            .unwrap()
            .update(|s| s.footer = Some("ignored".into()))
            .unwrap();
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_find_by_name() {
        let (store, book) = book();
        book.create("Summer", "sun", "42").unwrap();
        book.create("Winter", "snow", "7").unwrap();

        assert_eq!(book.names(), vec!["Summer", "Winter"]);
        let winter = book.find_by_name("Winter").unwrap().snapshot();
        assert_eq!((winter.id, winter.password.as_str()), (2, "snow"));
        assert!(book.find_by_name("winter").is_none());

        let reloaded = TimesheetBook::new(store, Arc::new(ManualClock::new(Utc::now())));
        reloaded.load().unwrap();
        assert_eq!(reloaded.find_by_name("Summer").unwrap().snapshot().password, "sun");
    }

    #[test]
    fn test_profiles() {
        let (_store, book) = book();
        assert_eq!(book.profile("42").unwrap(), UserProfile::default());
        book.update_profile("42", |p| p.timesheet_id = Some(3)).unwrap();
        assert_eq!(book.profile("42").unwrap().timesheet_id, Some(3));
    }

    #[test]
    fn test_settings_are_shared_per_chat() {
        let (store, book) = book();
        let chat = Destination::chat("@news");
        book.settings(&chat)
            .unwrap()
            .update(|s| s.header = Some("Hi".into()))
            .unwrap();
        assert_eq!(book.settings(&chat).unwrap().snapshot().header.as_deref(), Some("Hi"));

        let fresh = TimesheetBook::new(store, Arc::new(ManualClock::new(Utc::now())));
        assert_eq!(fresh.settings(&chat).unwrap().snapshot().header.as_deref(), Some("Hi"));
    }
}
