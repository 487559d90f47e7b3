//! # Chime Timers
//!
//! Persistent timer dispatch engine. Timers survive restarts in a durable
//! store; a single background loop sleeps on the globally earliest one and
//! publishes `<event>_timer_complete` when it fires.
//!
//! ## Architecture
//! ```text
//! producer ── create_timer ──┬── due within 60s ──> fast path (sleep, publish)
//!                            └── store.insert ──> wakeup signal / rearm
//!
//! TimerEngine loop (one task, one armed timer)
//!   SEEKING ── find_earliest(now + 40d) ──> ARMED ── sleep (≤ 40d) ──> FIRING
//!      ^                                      │                          │
//!      └──────── interrupted (generation) ────┘       delete, publish ───┘
//!   any store failure ──> RECOVERING (backoff) ──> SEEKING
//! ```

pub mod clock;
pub mod dispatch;
pub mod engine;
pub mod persistence;
pub mod rearm;
pub mod signal;
pub mod store;
pub mod timer;

pub use clock::{Clock, SystemClock, TokioClock};
pub use dispatch::{DispatchSink, EventBus, FiredTimer, TimerHandler};
pub use engine::{EngineBuilder, EngineStats, TimerEngine};
pub use persistence::SqliteTimerStore;
pub use rearm::{LoopState, RearmSlot};
pub use signal::WakeupSignal;
pub use store::{MemoryStore, TimerFilter, TimerStore};
pub use timer::{Timer, TimerPayload};
