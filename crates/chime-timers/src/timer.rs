//! Timer definitions: the data model for scheduled events.

use chime_core::{ChimeError, Result};
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

/// Longest accepted event kind (matches the store column width).
pub const MAX_EVENT_LEN: usize = 32;

/// A scheduled one-shot event.
///
/// Timestamps are naive UTC. `expires_at` never changes after creation;
/// cancelling a timer deletes it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Timer {
    /// Store-assigned ID. `None` for fast-path timers that were never persisted.
    pub id: Option<i64>,
    /// Event kind, e.g. "reminder" or "tempmute".
    pub event: String,
    pub created_at: NaiveDateTime,
    pub expires_at: NaiveDateTime,
    /// Who scheduled the timer.
    pub author_id: i64,
    /// Forwarded verbatim to subscribers.
    pub payload: TimerPayload,
}

impl Timer {
    /// Create an unpersisted timer. Rejects malformed event kinds.
    pub fn new(
        event: &str,
        author_id: i64,
        created_at: NaiveDateTime,
        expires_at: NaiveDateTime,
        payload: TimerPayload,
    ) -> Result<Self> {
        validate_event(event)?;
        Ok(Self {
            id: None,
            event: event.to_string(),
            created_at,
            expires_at,
            author_id,
            payload,
        })
    }

    /// Name published on the dispatch sink.
    pub fn event_name(&self) -> String {
        event_name(&self.event)
    }

    /// Whether the store assigned an id.
    pub fn is_persisted(&self) -> bool {
        self.id.is_some()
    }

    /// Positional argument at `index`, if any.
    pub fn arg(&self, index: usize) -> Option<&serde_json::Value> {
        self.payload.args.get(index)
    }

    /// Keyword argument `key`, if any.
    pub fn kwarg(&self, key: &str) -> Option<&serde_json::Value> {
        self.payload.kwargs.get(key)
    }
}

impl std::fmt::Display for Timer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.id {
            Some(id) => write!(f, "<Timer #{id} event={} expires={}>", self.event, self.expires_at),
            None => write!(f, "<Timer event={} expires={}>", self.event, self.expires_at),
        }
    }
}

/// `<event>_timer_complete`.
pub fn event_name(event: &str) -> String {
    format!("{event}_timer_complete")
}

/// Positional and named arguments carried by a timer.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TimerPayload {
    #[serde(default)]
    pub args: Vec<serde_json::Value>,
    #[serde(default)]
    pub kwargs: serde_json::Map<String, serde_json::Value>,
}

impl TimerPayload {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a positional argument. Fails if the value is not JSON-representable.
    pub fn arg<T: Serialize>(mut self, value: T) -> Result<Self> {
        let value = serde_json::to_value(value)
            .map_err(|e| ChimeError::Validation(format!("argument {} is not serializable: {e}", self.args.len())))?;
        self.args.push(value);
        Ok(self)
    }

    /// Set a named argument. Fails if the value is not JSON-representable.
    pub fn kwarg<T: Serialize>(mut self, key: &str, value: T) -> Result<Self> {
        let value = serde_json::to_value(value)
            .map_err(|e| ChimeError::Validation(format!("keyword '{key}' is not serializable: {e}")))?;
        self.kwargs.insert(key.to_string(), value);
        Ok(self)
    }

    pub fn is_empty(&self) -> bool {
        self.args.is_empty() && self.kwargs.is_empty()
    }

    /// Encode as `{"args": [...], "kwargs": {...}}`.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(raw: &str) -> Result<Self> {
        Ok(serde_json::from_str(raw)?)
    }
}

fn validate_event(event: &str) -> Result<()> {
    if event.is_empty() {
        return Err(ChimeError::Validation("event kind is empty".into()));
    }
    if event.len() > MAX_EVENT_LEN {
        return Err(ChimeError::Validation(format!(
            "event kind '{event}' exceeds {MAX_EVENT_LEN} characters"
        )));
    }
    if !event.chars().all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-') {
        return Err(ChimeError::Validation(format!(
            "event kind '{event}' may only contain letters, digits, '_' and '-'"
        )));
    }
    Ok(())
}

/// Human relative time: "3 minutes ago", "in 2 hours", "now".
pub fn format_relative(then: NaiveDateTime, now: NaiveDateTime) -> String {
    const UNITS: [(i64, &str); 7] = [
        (365 * 86_400, "year"),
        (30 * 86_400, "month"),
        (7 * 86_400, "week"),
        (86_400, "day"),
        (3_600, "hour"),
        (60, "minute"),
        (1, "second"),
    ];

    let secs = (now - then).num_seconds();
    let magnitude = secs.abs();
    if magnitude == 0 {
        return "now".to_string();
    }

    let (size, name) = UNITS
        .iter()
        .copied()
        .find(|(size, _)| magnitude >= *size)
        .unwrap_or((1, "second"));
    let count = magnitude / size;
    let plural = if count == 1 { "" } else { "s" };

    if secs > 0 {
        format!("{count} {name}{plural} ago")
    } else {
        format!("in {count} {name}{plural}")
    }
}
