//! Validation pipeline for typed input.
//!
//! A [`Validator`] turns a [`Verdict`] into a new one. Every stage works on
//! its own copy, so combinators can hand the same original input to several
//! validators. Failures carry user-facing [`Content`], never plain strings.

use crate::events::{Content, Emoji, TextEvent};
use chrono::{Datelike, Local, NaiveDate, NaiveDateTime, NaiveTime, TimeZone};
use regex::Regex;
use serde_json::Value;
use std::sync::{Arc, OnceLock};

/// Result of validating one piece of input.
#[derive(Debug, Clone, PartialEq)]
pub struct Verdict {
    /// Whether validation passed.
    pub success: bool,
    /// Parsed value, forwarded between stages.
    pub data: Value,
    /// What to show the user on failure.
    pub error: Option<Content>,
    /// The message being validated.
    pub source: TextEvent,
}

impl Verdict {
    /// Starting point for validating `event`: success, data is the raw text.
    #[must_use]
    pub fn from_event(event: &TextEvent) -> Self {
        Self {
            success: true,
            data: Value::String(event.text.clone()),
            error: None,
            source: event.clone(),
        }
    }

    /// The raw message text.
    #[must_use]
    pub fn text(&self) -> &str {
        self.source.text.trim()
    }

    /// Pass with `data`.
    #[must_use]
    pub fn accept(mut self, data: impl Into<Value>) -> Self {
        self.success = true;
        self.data = data.into();
        self.error = None;
        self
    }

    /// Fail with `error`; warning marker unless the error has its own.
    #[must_use]
    pub fn reject(mut self, error: impl Into<Content>) -> Self {
        self.success = false;
        self.error = Some(error.into().or_emoji(Emoji::Warning));
        self
    }
}

/// One stage of input validation.
pub trait Validator: Send + Sync {
    /// Inspect an owned copy of the input.
    fn check(&self, input: Verdict) -> Verdict;

    /// Validate without touching the caller's value.
    fn validate(&self, input: &Verdict) -> Verdict {
        self.check(input.clone())
    }
}

/// Shared validator handle.
pub type BoxValidator = Arc<dyn Validator>;

// ============================================================================
// Combinators
// ============================================================================

/// Runs validators in order, feeding each the previous output, and stops at
/// the first failure.
pub struct Chain(Vec<BoxValidator>);

impl Chain {
    /// Chain `validators`.
    #[must_use]
    pub fn new(validators: Vec<BoxValidator>) -> Self {
        Self(validators)
    }
}

impl Validator for Chain {
    fn check(&self, mut input: Verdict) -> Verdict {
        for validator in &self.0 {
            input = validator.validate(&input);
            if !input.success {
                break;
            }
        }
        input
    }
}

/// Runs each validator against the original input and returns the first
/// success, or the last failure.
pub struct Or(Vec<BoxValidator>);

impl Or {
    /// Alternatives in priority order.
    #[must_use]
    pub fn new(validators: Vec<BoxValidator>) -> Self {
        Self(validators)
    }
}

impl Validator for Or {
    fn check(&self, input: Verdict) -> Verdict {
        let mut last = None;
        for validator in &self.0 {
            let verdict = validator.validate(&input);
            if verdict.success {
                return verdict;
            }
            last = Some(verdict);
        }
        last.unwrap_or_else(|| input.reject("Nothing matched"))
    }
}

/// Adapts a closure.
pub struct FnValidator<F>(F);

impl<F> FnValidator<F>
where
    F: Fn(Verdict) -> Verdict + Send + Sync,
{
    /// Wrap `f`.
    pub const fn new(f: F) -> Self {
        Self(f)
    }
}

impl<F> Validator for FnValidator<F>
where
    F: Fn(Verdict) -> Verdict + Send + Sync,
{
    fn check(&self, input: Verdict) -> Verdict {
        (self.0)(input)
    }
}

/// Always fails; used for button-only fields.
pub struct Reject(Content);

impl Reject {
    /// Fail with `error`.
    pub fn new(error: impl Into<Content>) -> Self {
        Self(error.into())
    }
}

impl Validator for Reject {
    fn check(&self, input: Verdict) -> Verdict {
        input.reject(self.0.clone())
    }
}

// ============================================================================
// Leaf validators
// ============================================================================

fn regex(cell: &'static OnceLock<Regex>, pattern: &str) -> &'static Regex {
    cell.get_or_init(|| Regex::new(pattern).expect("valid regex"))
}

/// Accepts any non-empty text, trimmed.
pub struct Text {
    max_chars: Option<usize>,
}

impl Text {
    /// Any text.
    #[must_use]
    pub const fn new() -> Self {
        Self { max_chars: None }
    }

    /// Text of at most `max` characters.
    #[must_use]
    pub const fn max_chars(max: usize) -> Self {
        Self {
            max_chars: Some(max),
        }
    }
}

impl Default for Text {
    fn default() -> Self {
        Self::new()
    }
}

impl Validator for Text {
    fn check(&self, input: Verdict) -> Verdict {
        let text = input.text().to_string();
        if text.is_empty() {
            return input.reject("Send some text, please");
        }
        if let Some(max) = self.max_chars
            && text.chars().count() > max
        {
            return input.reject(format!("That is too long, keep it under {max} characters"));
        }
        input.accept(text)
    }
}

/// A non-negative integer.
pub struct Int {
    error: Content,
}

impl Int {
    /// Default error message.
    #[must_use]
    pub fn new() -> Self {
        Self::with_error("Just a number, please")
    }

    /// Custom error message.
    pub fn with_error(error: impl Into<Content>) -> Self {
        Self {
            error: error.into(),
        }
    }
}

impl Default for Int {
    fn default() -> Self {
        Self::new()
    }
}

impl Validator for Int {
    fn check(&self, input: Verdict) -> Verdict {
        static PATTERN: OnceLock<Regex> = OnceLock::new();
        let text = input.text().to_string();
        match regex(&PATTERN, r"^\d+$")
            .is_match(&text)
            .then(|| text.parse::<u64>().ok())
            .flatten()
        {
            Some(n) => input.accept(n),
            None => input.reject(self.error.clone()),
        }
    }
}

/// An identifier: latin letters, digits, underscores.
///
/// Names must not start with a digit; passwords may.
pub struct Id {
    error: Content,
    password: bool,
}

impl Id {
    /// Name validator.
    pub fn name(error: impl Into<Content>) -> Self {
        Self {
            error: error.into(),
            password: false,
        }
    }

    /// Password validator.
    pub fn password(error: impl Into<Content>) -> Self {
        Self {
            error: error.into(),
            password: true,
        }
    }
}

impl Validator for Id {
    fn check(&self, input: Verdict) -> Verdict {
        static NAME: OnceLock<Regex> = OnceLock::new();
        static PASSWORD: OnceLock<Regex> = OnceLock::new();
        let pattern = if self.password {
            regex(&PASSWORD, r"^\w+$")
        } else {
            regex(&NAME, r"^[a-zA-Z_]\w+$")
        };
        let text = input.text().to_string();
        if pattern.is_match(&text) {
            input.accept(text)
        } else {
            input.reject(self.error.clone())
        }
    }
}

/// An `http(s)` URL.
pub struct Url;

impl Validator for Url {
    fn check(&self, input: Verdict) -> Verdict {
        static PATTERN: OnceLock<Regex> = OnceLock::new();
        let text = input.text().to_string();
        if regex(&PATTERN, r"^https?://.+\..+$").is_match(&text) {
            input.accept(text)
        } else {
            input.reject(
                Content::plain("That does not look like a link, try again").with_emoji(Emoji::Fail),
            )
        }
    }
}

/// A public chat reference: `@name`, `name`, or `t.me/name`. Yields `@name`.
pub struct ChatRef;

impl Validator for ChatRef {
    fn check(&self, input: Verdict) -> Verdict {
        static LINK: OnceLock<Regex> = OnceLock::new();
        static HANDLE: OnceLock<Regex> = OnceLock::new();
        let text = input.text().to_string();
        let name = regex(&LINK, r"^(?:https?://)?t\.me/(\w+)$")
            .captures(&text)
            .or_else(|| regex(&HANDLE, r"^@?(\w+)$").captures(&text))
            .and_then(|c| c.get(1))
            .map(|m| format!("@{}", m.as_str()));
        match name {
            Some(name) => input.accept(name),
            None => input.reject(
                Content::plain("A chat link looks like ")
                    .code("@channel_or_group")
                    .text(" or ")
                    .code("https://t.me/channel_or_group"),
            ),
        }
    }
}

/// A message link `t.me/name/42`. Yields `{"chat": "@name", "message_id": 42}`.
pub struct MessageUrl;

impl Validator for MessageUrl {
    fn check(&self, input: Verdict) -> Verdict {
        static PATTERN: OnceLock<Regex> = OnceLock::new();
        let text = input.text().to_string();
        let parsed = regex(&PATTERN, r"^(?:https?://)?t\.me/(\w+)/(\d+)$")
            .captures(&text)
            .and_then(|c| {
                let id: i32 = c.get(2)?.as_str().parse().ok()?;
                Some((format!("@{}", c.get(1)?.as_str()), id))
            });
        match parsed {
            Some((chat, message_id)) => {
                input.accept(serde_json::json!({ "chat": chat, "message_id": message_id }))
            }
            None => input.reject(
                Content::plain("A message link looks like ")
                    .code("https://t.me/channel_or_group/5"),
            ),
        }
    }
}

/// A local date and time: `DD.MM HH:MM` or `DD.MM.YYYY HH:MM`.
///
/// Without a year, a date more than a week in the past rolls over to next
/// year. Yields an RFC 3339 timestamp in UTC.
pub struct DateTime;

impl DateTime {
    /// Parse `text` relative to `today`.
    #[must_use]
    pub fn parse(text: &str, today: NaiveDate) -> Option<NaiveDateTime> {
        static PATTERN: OnceLock<Regex> = OnceLock::new();
        let caps = regex(
            &PATTERN,
            r"^(\d{1,2})\.(\d{1,2})(?:\.(\d{4}))?\s+(\d{1,2})[:.](\d{2})$",
        )
        .captures(text.trim())?;
        let num = |i: usize| caps.get(i).and_then(|m| m.as_str().parse::<u32>().ok());
        let (day, month, hour, minute) = (num(1)?, num(2)?, num(4)?, num(5)?);
        let time = NaiveTime::from_hms_opt(hour, minute, 0)?;

        let date = match caps.get(3) {
            Some(year) => NaiveDate::from_ymd_opt(year.as_str().parse().ok()?, month, day)?,
            None => {
                let this_year = NaiveDate::from_ymd_opt(today.year(), month, day)?;
                if (today - this_year).num_days() > 7 {
                    NaiveDate::from_ymd_opt(today.year() + 1, month, day)?
                } else {
                    this_year
                }
            }
        };
        Some(date.and_time(time))
    }
}

impl Validator for DateTime {
    fn check(&self, input: Verdict) -> Verdict {
        let today = Local::now().date_naive();
        let parsed = Self::parse(input.text(), today)
            .and_then(|naive| Local.from_local_datetime(&naive).earliest());
        match parsed {
            Some(local) => {
                let utc = local.with_timezone(&chrono::Utc);
                input.accept(utc.to_rfc3339())
            }
            None => input.reject(
                Content::plain("Date and time look like ")
                    .code("24.12 19:30")
                    .text(" or ")
                    .code("24.12.2026 19:30"),
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn input(text: &str) -> Verdict {
        Verdict::from_event(&TextEvent::new("s", text))
    }

    /// Counts calls and passes or fails as configured.
    struct Spy {
        calls: Arc<AtomicUsize>,
        pass: bool,
        data: &'static str,
    }

    impl Validator for Spy {
        fn check(&self, input: Verdict) -> Verdict {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.pass {
                input.accept(self.data)
            } else {
                input.reject(self.data)
            }
        }
    }

    fn spy(pass: bool, data: &'static str) -> (Arc<AtomicUsize>, BoxValidator) {
        let calls = Arc::new(AtomicUsize::new(0));
        let v = Arc::new(Spy {
            calls: Arc::clone(&calls),
            pass,
            data,
        });
        (calls, v)
    }

    #[test]
    fn test_chain_short_circuits() {
        let (first, a) = spy(true, "a");
        let (second, b) = spy(false, "b failed");
        let (third, c) = spy(true, "c");
        let verdict = Chain::new(vec![a, b, c]).validate(&input("x"));

        assert!(!verdict.success);
        assert_eq!(verdict.error.unwrap().plain_text(), "⚠️ b failed");
        assert_eq!(first.load(Ordering::SeqCst), 1);
        assert_eq!(second.load(Ordering::SeqCst), 1);
        assert_eq!(third.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_chain_forwards_data() {
        let double = FnValidator::new(|v: Verdict| {
            let n = v.data.as_u64().unwrap_or_default();
            v.accept(n * 2)
        });
        let chain = Chain::new(vec![Arc::new(Int::new()), Arc::new(double)]);
        assert_eq!(chain.validate(&input("21")).data, serde_json::json!(42));
    }

    #[test]
    fn test_or_first_success() {
        let (first, a) = spy(false, "a failed");
        let (second, b) = spy(true, "b");
        let (third, c) = spy(true, "c");
        let verdict = Or::new(vec![a, b, c]).validate(&input("x"));

        assert!(verdict.success);
        assert_eq!(verdict.data, serde_json::json!("b"));
        assert_eq!(first.load(Ordering::SeqCst), 1);
        assert_eq!(second.load(Ordering::SeqCst), 1);
        assert_eq!(third.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_or_all_fail_returns_last() {
        let (_, a) = spy(false, "first");
        let (_, b) = spy(false, "last");
        let verdict = Or::new(vec![a, b]).validate(&input("x"));
        assert!(!verdict.success);
        assert_eq!(verdict.error.unwrap().plain_text(), "⚠️ last");
    }

    #[test]
    fn test_or_sees_original_input() {
        let mangle = FnValidator::new(|v: Verdict| v.accept("mangled").reject("no"));
        let verdict = Or::new(vec![Arc::new(mangle), Arc::new(Int::new())]).validate(&input("7"));
        assert_eq!(verdict.data, serde_json::json!(7));
    }

    #[test]
    fn test_validate_leaves_input_untouched() {
        let original = input("abc");
        let _ = Int::new().validate(&original);
        assert!(original.success);
        assert_eq!(original.data, serde_json::json!("abc"));
    }

    #[test]
    fn test_reject_always_fails() {
        let verdict = Reject::new("use the buttons").validate(&input("anything"));
        assert!(!verdict.success);
    }

    #[test]
    fn test_int() {
        assert_eq!(Int::new().validate(&input("42")).data, serde_json::json!(42));
        assert!(!Int::new().validate(&input("abc")).success);
        assert!(!Int::new().validate(&input("-1")).success);
    }

    #[test]
    fn test_id() {
        let name = Id::name("bad name");
        assert!(name.validate(&input("party_2026")).success);
        assert!(!name.validate(&input("2026party")).success);
        assert!(!name.validate(&input("x")).success);
        assert!(Id::password("bad").validate(&input("2026")).success);
    }

    #[test]
    fn test_url() {
        assert!(Url.validate(&input("https://example.com/x")).success);
        let verdict = Url.validate(&input("example"));
        assert_eq!(verdict.error.unwrap().emoji, Some(Emoji::Fail));
    }

    #[test]
    fn test_chat_ref() {
        for text in ["@news", "news", "t.me/news", "https://t.me/news"] {
            assert_eq!(ChatRef.validate(&input(text)).data, serde_json::json!("@news"));
        }
        assert!(!ChatRef.validate(&input("no spaces allowed")).success);
    }

    #[test]
    fn test_message_url() {
        let verdict = MessageUrl.validate(&input("https://t.me/news/15"));
        assert_eq!(
            verdict.data,
            serde_json::json!({ "chat": "@news", "message_id": 15 })
        );
        assert!(!MessageUrl.validate(&input("https://t.me/news")).success);
    }

    #[test]
    fn test_datetime_parse() {
        let today = NaiveDate::from_ymd_opt(2026, 3, 10).unwrap();
        let dt = DateTime::parse("24.12 19:30", today).unwrap();
        assert_eq!(dt.to_string(), "2026-12-24 19:30:00");

        let dt = DateTime::parse("05.01 10:00", today).unwrap();
        assert_eq!(dt.date().year(), 2027);

        let dt = DateTime::parse("05.03 10:00", today).unwrap();
        assert_eq!(dt.date().year(), 2026);

        let dt = DateTime::parse("01.02.2025 8:05", today).unwrap();
        assert_eq!(dt.to_string(), "2025-02-01 08:05:00");

        assert!(DateTime::parse("31.02 10:00", today).is_none());
        assert!(DateTime::parse("tomorrow", today).is_none());
    }

    #[test]
    fn test_text() {
        assert_eq!(Text::new().validate(&input("  Alice ")).data, serde_json::json!("Alice"));
        assert!(!Text::new().validate(&input("   ")).success);
        assert!(!Text::max_chars(3).validate(&input("Alice")).success);
    }
}
