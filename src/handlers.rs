//! Built-in subscribers for the `reminder` and `tempmute` event kinds.

use async_trait::async_trait;
use chime_core::{ChimeError, Result};
use chime_timers::timer::format_relative;
use chime_timers::{EventBus, Timer, TimerHandler};
use chrono::{NaiveDateTime, Utc};

pub const REMINDER: &str = "reminder";
pub const TEMPMUTE: &str = "tempmute";

/// Register every built-in handler on `bus`.
pub fn register_all(bus: &EventBus) {
    bus.register(REMINDER, ReminderHandler);
    bus.register(TEMPMUTE, TempmuteHandler);
}

/// Delivers `<@author>, 3 minutes ago: message` back to the channel in `args[0]`.
pub struct ReminderHandler;

/// Text of a fired reminder as seen by its author.
pub fn render_reminder(timer: &Timer, now: NaiveDateTime) -> Result<String> {
    let message = timer
        .arg(1)
        .and_then(|v| v.as_str())
        .ok_or_else(|| ChimeError::Handler(format!("{timer} has no message")))?;
    Ok(format!(
        "<@{}>, {}: {message}",
        timer.author_id,
        format_relative(timer.created_at, now)
    ))
}

#[async_trait]
impl TimerHandler for ReminderHandler {
    async fn handle(&self, timer: Timer) -> Result<()> {
        let text = render_reminder(&timer, Utc::now().naive_utc())?;
        let channel = timer.arg(0).and_then(|v| v.as_i64()).unwrap_or_default();
        let message_id = timer.kwarg("message_id").and_then(|v| v.as_i64());
        tracing::info!("⏰ Reminder delivered to channel {channel} (message {message_id:?})");
        println!("{text}");
        Ok(())
    }
}

/// Lifts a temporary mute on the member in `args[0]`.
pub struct TempmuteHandler;

#[async_trait]
impl TimerHandler for TempmuteHandler {
    async fn handle(&self, timer: Timer) -> Result<()> {
        let member = timer
            .arg(0)
            .and_then(|v| v.as_i64())
            .ok_or_else(|| ChimeError::Handler(format!("{timer} names no member")))?;
        tracing::info!("🔈 Mute expired for member {member} (muted by {})", timer.author_id);
        println!("member {member} unmuted");
        Ok(())
    }
}
