//! Persisted periodic actions.

use super::period::Period;
use crate::gateway::Destination;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// What a periodic action does.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ActionKind {
    /// Post a fresh live copy of a source into a chat, replacing the last one.
    AutoRepost {
        /// Target chat.
        chat: Destination,
        /// Source to post.
        source_id: String,
        /// Live post created by the previous run.
        #[serde(default)]
        translation_id: Option<u64>,
    },
    /// Re-render every live post.
    RefreshTranslations,
}

impl ActionKind {
    /// Short name for logs.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::AutoRepost { .. } => "auto_repost",
            Self::RefreshTranslations => "refresh_translations",
        }
    }
}

/// A scheduled action and its watermark.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeriodicAction {
    /// Unique id.
    pub id: u64,
    /// Session that created it; empty for built-in jobs.
    #[serde(default)]
    pub creator: String,
    /// When it is due.
    pub period: Period,
    /// Last time it fired.
    #[serde(default)]
    pub last_fired: Option<DateTime<Utc>>,
    /// What it does.
    pub kind: ActionKind,
}

impl PeriodicAction {
    /// New action that has never fired.
    pub fn new(id: u64, creator: impl Into<String>, period: Period, kind: ActionKind) -> Self {
        Self {
            id,
            creator: creator.into(),
            period,
            last_fired: None,
            kind,
        }
    }

    /// Target chat of an auto-repost.
    #[must_use]
    pub const fn repost_chat(&self) -> Option<&Destination> {
        match &self.kind {
            ActionKind::AutoRepost { chat, .. } => Some(chat),
            ActionKind::RefreshTranslations => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_action_record_shape() {
        let anchor = Utc.with_ymd_and_hms(2025, 1, 1, 9, 0, 0).unwrap();
        let action = PeriodicAction::new(
            3,
            "42",
            Period::hours(anchor, 24).unwrap(),
            ActionKind::AutoRepost {
                chat: Destination::chat("@news"),
                source_id: "timesheet:1".into(),
                translation_id: None,
            },
        );

        let json = serde_json::to_value(&action).unwrap();
        assert_eq!(json["kind"]["type"], "auto_repost");
        assert_eq!(json["kind"]["chat"]["chat_id"], "@news");
        assert_eq!(action.repost_chat(), Some(&Destination::chat("@news")));

        let back: PeriodicAction = serde_json::from_value(json).unwrap();
        assert_eq!(back, action);
        assert_eq!(ActionKind::RefreshTranslations.name(), "refresh_translations");
    }
}
