//! Small shared helpers.

use std::path::PathBuf;

/// Generate a random token for one displayed button.
#[must_use]
pub fn generate_token() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}

/// Home directory, falling back to the current directory.
#[must_use]
pub fn home_dir() -> PathBuf {
    dirs_next::home_dir().unwrap_or_else(|| PathBuf::from("."))
}

/// Directory holding the bot's config and data (`~/.timesheet-bot`).
#[must_use]
pub fn config_dir() -> PathBuf {
    home_dir().join(".timesheet-bot")
}

/// Default path of the persisted key/value store.
#[must_use]
pub fn data_path() -> PathBuf {
    config_dir().join("data.json")
}

/// Truncate a string to at most `max_chars` characters, appending `…`.
#[must_use]
pub fn truncate_str(s: &str, max_chars: usize) -> String {
    if s.chars().count() <= max_chars {
        return s.to_string();
    }
    let mut out: String = s.chars().take(max_chars.saturating_sub(1)).collect();
    out.push('…');
    out
}
