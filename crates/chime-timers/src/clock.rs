//! Time sources. All engine comparisons happen in naive UTC.

use chrono::{NaiveDateTime, Utc};

pub trait Clock: Send + Sync + 'static {
    /// Current time, naive UTC.
    fn now(&self) -> NaiveDateTime;
}

/// Wall clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> NaiveDateTime {
        Utc::now().naive_utc()
    }
}

/// A UTC anchor advanced by `tokio::time::Instant`.
///
/// Follows tokio's clock, so under a paused runtime it moves only when
/// timers auto-advance. Store comparisons and sleeps then agree exactly.
#[derive(Debug, Clone, Copy)]
pub struct TokioClock {
    anchor: NaiveDateTime,
    started: tokio::time::Instant,
}

impl TokioClock {
    pub fn new(anchor: NaiveDateTime) -> Self {
        Self {
            anchor,
            started: tokio::time::Instant::now(),
        }
    }

    pub fn starting_now() -> Self {
        Self::new(Utc::now().naive_utc())
    }
}

impl Clock for TokioClock {
    fn now(&self) -> NaiveDateTime {
        let elapsed = chrono::Duration::from_std(self.started.elapsed()).unwrap_or(chrono::Duration::MAX);
        self.anchor.checked_add_signed(elapsed).unwrap_or(NaiveDateTime::MAX)
    }
}
