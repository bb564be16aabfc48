//! Timesheet records and how they render.

use crate::events::Content;
use crate::gateway::Destination;
use crate::sync::RenderFilter;
use chrono::{DateTime, Local, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// Marker in front of every event line.
const EVENT_BULLET: &str = "👉 ";

/// One scheduled event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventEntry {
    /// Number within its timesheet; assigned by [`Timesheet::add_event`].
    #[serde(default)]
    pub id: u64,
    /// What happens.
    pub title: String,
    /// When it starts.
    pub starts: DateTime<Utc>,
    /// Where to read more.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

impl EventEntry {
    /// Event without a link.
    pub fn new(title: impl Into<String>, starts: DateTime<Utc>) -> Self {
        Self {
            id: 0,
            title: title.into(),
            starts,
            url: None,
        }
    }

    /// Attach a link.
    #[must_use]
    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    fn local_day(&self) -> NaiveDate {
        self.starts.with_timezone(&Local).date_naive()
    }

    /// One-line summary: number, local start, title.
    #[must_use]
    pub fn preview(&self) -> String {
        let local = self.starts.with_timezone(&Local);
        format!("#{} {} {}", self.id, local.format("%d.%m %H:%M"), self.title)
    }
}

/// A named list of events.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Timesheet {
    /// Unique id.
    pub id: u64,
    /// Display name.
    pub name: String,
    /// Session that created it.
    #[serde(default)]
    pub owner: String,
    /// Lets other sessions join.
    #[serde(default)]
    pub password: String,
    /// Events in insertion order.
    #[serde(default)]
    pub events: Vec<EventEntry>,
}

impl Timesheet {
    /// Empty timesheet.
    pub fn new(id: u64, name: impl Into<String>, owner: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            owner: owner.into(),
            password: String::new(),
            events: Vec::new(),
        }
    }

    /// Set the join password.
    #[must_use]
    pub fn with_password(mut self, password: impl Into<String>) -> Self {
        self.password = password.into();
        self
    }

    /// Append `event` under the next free number. Returns the number.
    pub fn add_event(&mut self, mut event: EventEntry) -> u64 {
        let id = self.events.iter().map(|e| e.id).max().unwrap_or(0) + 1;
        event.id = id;
        self.events.push(event);
        id
    }

    /// Event number `id`.
    #[must_use]
    pub fn event(&self, id: u64) -> Option<&EventEntry> {
        self.events.iter().find(|e| e.id == id)
    }

    /// Event number `id`, for editing.
    pub fn event_mut(&mut self, id: u64) -> Option<&mut EventEntry> {
        self.events.iter_mut().find(|e| e.id == id)
    }

    /// Drop event number `id`.
    pub fn remove_event(&mut self, id: u64) -> Option<EventEntry> {
        let index = self.events.iter().position(|e| e.id == id)?;
        Some(self.events.remove(index))
    }

    /// Events whose title contains every word of `query`, ignoring case.
    #[must_use]
    pub fn find_events(&self, query: &str) -> Vec<&EventEntry> {
        let words: Vec<String> = query.split_whitespace().map(str::to_lowercase).collect();
        if words.is_empty() {
            return Vec::new();
        }
        self.events
            .iter()
            .filter(|e| {
                let title = e.title.to_lowercase();
                words.iter().all(|w| title.contains(w.as_str()))
            })
            .collect()
    }

    /// Events passing `filter` at `now`, sorted by start.
    #[must_use]
    pub fn visible_events(&self, filter: RenderFilter, now: DateTime<Utc>) -> Vec<&EventEntry> {
        let today = now.with_timezone(&Local).date_naive();
        let mut events: Vec<&EventEntry> = self
            .events
            .iter()
            .filter(|e| match filter {
                RenderFilter::All => true,
                RenderFilter::Upcoming => e.local_day() >= today,
            })
            .collect();
        events.sort_by_key(|e| e.starts);
        events
    }
}

/// Per-chat presentation settings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatSettings {
    /// Text above the events; defaults to the timesheet name.
    #[serde(default)]
    pub header: Option<String>,
    /// Text below the events.
    #[serde(default)]
    pub footer: Option<String>,
}

/// What the bot remembers about one session.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserProfile {
    /// Timesheet being edited.
    #[serde(default)]
    pub timesheet_id: Option<u64>,
    /// Chat live posts go to.
    #[serde(default)]
    pub connected: Option<Destination>,
}

/// Render `sheet` for a chat with `settings`.
///
/// Events are grouped by local day under a day heading. Returns empty
/// content when no event passes the filter.
#[must_use]
pub fn render_post(
    sheet: &Timesheet,
    settings: &ChatSettings,
    filter: RenderFilter,
    now: DateTime<Utc>,
) -> Content {
    let events = sheet.visible_events(filter, now);
    if events.is_empty() {
        return Content::new();
    }

    let mut content = match &settings.header {
        Some(header) => Content::plain(header.clone()),
        None => Content::new().bold(sheet.name.clone()),
    };
    let mut day = None;
    for event in events {
        let local = event.starts.with_timezone(&Local);
        if day != Some(local.date_naive()) {
            day = Some(local.date_naive());
            content = content
                .text("\n\n")
                .bold(local.format("%d %B, %A").to_string());
        }
        content = content
            .line()
            .text(format!("{EVENT_BULLET}{} ", local.format("%H:%M")));
        content = match &event.url {
            Some(url) => content.link(event.title.clone(), url.clone()),
            None => content.text(event.title.clone()),
        };
    }
    if let Some(footer) = &settings.footer {
        content = content.text("\n\n").text(footer.clone());
    }
    content
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::Style;
    use chrono::{TimeDelta, TimeZone};

    fn local(d: u32, h: u32) -> DateTime<Utc> {
        Local
            .with_ymd_and_hms(2025, 6, d, h, 0, 0)
            .earliest()
            .unwrap()
            .with_timezone(&Utc)
    }

    fn sheet() -> Timesheet {
        let mut sheet = Timesheet::new(1, "Summer", "42");
        sheet.events = vec![
            EventEntry::new("Picnic", local(12, 18)).with_url("https://example.com/picnic"),
            EventEntry::new("Concert", local(10, 20)),
            EventEntry::new("Lecture", local(12, 11)),
            EventEntry::new("Old news", local(2, 10)),
        ];
        sheet
    }

    #[test]
    fn test_upcoming_hides_past_days() {
        let now = local(10, 23);
        let sheet = sheet();
        let titles: Vec<&str> = sheet
            .visible_events(RenderFilter::Upcoming, now)
            .iter()
            .map(|e| e.title.as_str())
            .collect();
        assert_eq!(titles, vec!["Concert", "Lecture", "Picnic"]);

        // An event earlier today still counts as upcoming.
        let later_same_day = local(10, 23) + TimeDelta::minutes(30);
        assert_eq!(sheet.visible_events(RenderFilter::Upcoming, later_same_day).len(), 3);
        assert_eq!(sheet.visible_events(RenderFilter::All, now).len(), 4);
    }

    #[test]
    fn test_render_groups_by_day() {
        let settings = ChatSettings {
            header: None,
            footer: Some("See you!".into()),
        };
        let content = render_post(&sheet(), &settings, RenderFilter::Upcoming, local(10, 9));
        let text = content.plain_text();

        assert!(text.starts_with("Summer\n\n"));
        assert!(text.contains("👉 20:00 Concert"));
        assert!(text.contains("👉 11:00 Lecture\n👉 18:00 Picnic"));
        assert!(text.ends_with("\n\nSee you!"));
        assert!(!text.contains("Old news"));

        assert_eq!(content.spans[0].style, Style::Bold);
        assert!(content.spans.iter().any(|s| {
            s.text == "Picnic" && s.style == Style::Link("https://example.com/picnic".into())
        }));
    }

    #[test]
    fn test_render_uses_header() {
        let settings = ChatSettings {
            header: Some("Weekly".into()),
            footer: None,
        };
        let content = render_post(&sheet(), &settings, RenderFilter::All, local(1, 0));
        assert!(content.plain_text().starts_with("Weekly\n\n"));
    }

    #[test]
    fn test_nothing_to_show_is_empty() {
        let content = render_post(
            &sheet(),
            &ChatSettings::default(),
            RenderFilter::Upcoming,
            local(20, 0),
        );
        assert!(content.is_empty());
    }

    #[test]
    fn test_event_numbers_and_lookup() {
        let mut sheet = Timesheet::new(1, "Summer", "42").with_password("pw");
        let picnic = sheet.add_event(EventEntry::new("Picnic in the park", local(12, 18)));
        let concert = sheet.add_event(EventEntry::new("Park concert", local(13, 20)));
        assert_eq!((picnic, concert), (1, 2));

        let titles = |q: &str| -> Vec<u64> { sheet.find_events(q).iter().map(|e| e.id).collect() };
        assert_eq!(titles("park"), vec![1, 2]);
        assert_eq!(titles("PICNIC park"), vec![1]);
        assert!(titles("opera").is_empty());
        assert!(titles("  ").is_empty());

        assert_eq!(sheet.remove_event(1).map(|e| e.title), Some("Picnic in the park".into()));
        assert!(sheet.event(1).is_none());
        // Numbers are not reused while later events remain.
        assert_eq!(sheet.add_event(EventEntry::new("Lecture", local(14, 11))), 3);
        assert!(sheet.event(2).unwrap().preview().ends_with(" Park concert"));
        assert!(sheet.event(3).unwrap().preview().starts_with("#3 14.06 11:00"));
    }
}
