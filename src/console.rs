//! Line-oriented producer console on stdin.
//!
//! ```text
//! remind 1h30m stretch your legs
//! mute 10m 123456789
//! list | delete <id> | clear | count | stats | help | quit
//! ```

use anyhow::{Result, bail};
use chime_timers::timer::format_relative;
use chime_timers::{TimerEngine, TimerPayload};
use chrono::{Duration, Utc};
use tokio::io::{AsyncBufReadExt, BufReader};

use crate::handlers::{REMINDER, TEMPMUTE};

/// Reminders shown by `list`.
const LIST_LIMIT: usize = 10;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Remind { offset: Duration, message: String },
    Mute { offset: Duration, member: i64 },
    List,
    Delete(i64),
    Clear,
    Count,
    Stats,
    Help,
    Quit,
}

/// Parse a human offset such as `45s`, `10m`, `1h30m`, `2d` or `1w`.
pub fn parse_offset(input: &str) -> Result<Duration> {
    let input = input.trim();
    if input.is_empty() {
        bail!("empty time offset");
    }

    let mut total = Duration::zero();
    let mut digits = String::new();
    for c in input.chars() {
        if c.is_ascii_digit() {
            digits.push(c);
            continue;
        }
        if digits.is_empty() {
            bail!("expected a number before '{c}' in '{input}'");
        }
        let n: i64 = digits.parse()?;
        digits.clear();
        let unit = match c.to_ascii_lowercase() {
            's' => Duration::try_seconds(n),
            'm' => Duration::try_minutes(n),
            'h' => Duration::try_hours(n),
            'd' => Duration::try_days(n),
            'w' => Duration::try_weeks(n),
            other => bail!("unknown time unit '{other}' in '{input}'"),
        };
        let Some(unit) = unit else {
            bail!("time offset '{input}' is too large");
        };
        let Some(sum) = total.checked_add(&unit) else {
            bail!("time offset '{input}' is too large");
        };
        total = sum;
    }
    if !digits.is_empty() {
        bail!("missing unit after '{digits}' in '{input}'");
    }
    if total <= Duration::zero() {
        bail!("time offset must be in the future");
    }
    Ok(total)
}

pub fn parse_command(line: &str) -> Result<Command> {
    let mut words = line.split_whitespace();
    let Some(verb) = words.next() else {
        bail!("empty command");
    };

    let command = match verb.to_ascii_lowercase().as_str() {
        "remind" => {
            let offset = parse_offset(words.next().unwrap_or_default())?;
            let message = words.collect::<Vec<_>>().join(" ");
            if message.is_empty() {
                bail!("usage: remind <offset> <message>");
            }
            Command::Remind { offset, message }
        }
        "mute" => {
            let offset = parse_offset(words.next().unwrap_or_default())?;
            let Some(member) = words.next() else {
                bail!("usage: mute <offset> <member id>");
            };
            Command::Mute {
                offset,
                member: member.parse()?,
            }
        }
        "list" => Command::List,
        "delete" | "del" => {
            let Some(id) = words.next() else {
                bail!("usage: delete <id>");
            };
            Command::Delete(id.trim_start_matches('#').parse()?)
        }
        "clear" => Command::Clear,
        "count" => Command::Count,
        "stats" => Command::Stats,
        "help" | "?" => Command::Help,
        "quit" | "exit" => Command::Quit,
        other => bail!("unknown command '{other}' (try 'help')"),
    };
    Ok(command)
}

/// Console identity: who is scheduling and where replies go.
#[derive(Debug, Clone, Copy)]
pub struct Session {
    pub author_id: i64,
    pub channel_id: i64,
}

/// Read commands until `quit` or end of input.
pub async fn run(engine: &TimerEngine, session: Session) -> Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut message_id: i64 = 0;

    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        message_id += 1;
        let command = match parse_command(&line) {
            Ok(command) => command,
            Err(e) => {
                println!("❌ {e}");
                continue;
            }
        };
        if command == Command::Quit {
            break;
        }
        if let Err(e) = execute(engine, session, message_id, command).await {
            tracing::warn!("⚠️ Command failed: {e}");
            println!("❌ {e}");
        }
    }
    Ok(())
}

async fn execute(engine: &TimerEngine, session: Session, message_id: i64, command: Command) -> Result<()> {
    let now = Utc::now();
    let due = |offset: Duration| match now.checked_add_signed(offset) {
        Some(when) => Ok(when),
        None => Err(anyhow::anyhow!("time offset is too far in the future")),
    };
    match command {
        Command::Remind { offset, message } => {
            let payload = TimerPayload::new()
                .arg(session.channel_id)?
                .arg(&message)?
                .kwarg("message_id", message_id)?;
            let timer = engine.create_timer(due(offset)?, REMINDER, session.author_id, payload).await?;
            let when = format_relative(timer.expires_at, now.naive_utc());
            match timer.id {
                Some(id) => println!("✅ Reminder #{id} set, {when}: {message}"),
                None => println!("✅ Reminder set, {when}: {message}"),
            }
        }
        Command::Mute { offset, member } => {
            let when = due(offset)?;
            let payload = TimerPayload::new().arg(member)?;
            engine.create_timer(when, TEMPMUTE, session.author_id, payload).await?;
            println!("🔇 Member {member} muted, unmuting {}", format_relative(when.naive_utc(), now.naive_utc()));
        }
        Command::List => {
            let timers = engine.list_pending_for(REMINDER, session.author_id, LIST_LIMIT).await?;
            if timers.is_empty() {
                println!("No pending reminders.");
            }
            for timer in timers {
                let message = timer.arg(1).and_then(|v| v.as_str()).unwrap_or("…");
                let id = timer.id.unwrap_or_default();
                println!("#{id} {}: {message}", format_relative(timer.expires_at, now.naive_utc()));
            }
        }
        Command::Delete(id) => {
            if engine.delete_timer_for(id, REMINDER, session.author_id).await? {
                println!("🗑️ Reminder #{id} deleted");
            } else {
                println!("Reminder #{id} not found");
            }
        }
        Command::Clear => {
            let removed = engine.clear_for(REMINDER, session.author_id).await?;
            println!("🗑️ Cleared {removed} reminder(s)");
        }
        Command::Count => {
            let pending = engine.count_pending_for(REMINDER, session.author_id).await?;
            println!("{pending} pending reminder(s)");
        }
        Command::Stats => {
            println!("state: {:?} (generation {})", engine.state(), engine.generation());
            println!("{:#?}", engine.stats());
        }
        Command::Help => {
            println!("remind <offset> <message> | mute <offset> <member> | list | delete <id> | clear | count | stats | quit");
            println!("offsets: 45s, 10m, 1h30m, 2d, 1w");
        }
        Command::Quit => {}
    }
    Ok(())
}
