//! Timer engine: one background loop that sleeps on the earliest pending
//! timer and publishes it when due.
//!
//! Producers only write to the store and poke the loop (wakeup signal or a
//! generation-scoped interrupt); every arming, sleeping and dispatch
//! decision is made by the loop task itself.

use chime_core::config::EngineConfig;
use chime_core::{ChimeError, Result};
use chrono::{DateTime, NaiveDateTime, Utc};
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use crate::clock::{Clock, SystemClock};
use crate::dispatch::DispatchSink;
use crate::rearm::{LoopState, RearmSlot};
use crate::signal::WakeupSignal;
use crate::store::{TimerFilter, TimerStore};
use crate::timer::{Timer, TimerPayload};

/// Counters describing what the loop has done so far.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EngineStats {
    /// Times a persisted timer became the armed target.
    pub armed: u64,
    /// Persisted timers published.
    pub fired: u64,
    pub fast_path_scheduled: u64,
    pub fast_path_fired: u64,
    /// Waits interrupted by a producer.
    pub rearms: u64,
    /// Waits that hit the sleep cap and re-evaluated.
    pub capped: u64,
    /// Timers deleted between selection and firing.
    pub lost_races: u64,
    /// Store failures that sent the loop into backoff.
    pub recoveries: u64,
    /// Longest single wait the loop actually slept through. Waits cut short
    /// by a wakeup or interrupt are not counted.
    pub longest_sleep: Duration,
}

#[derive(Debug, Default)]
struct Counters {
    armed: AtomicU64,
    fired: AtomicU64,
    fast_path_scheduled: AtomicU64,
    fast_path_fired: AtomicU64,
    rearms: AtomicU64,
    capped: AtomicU64,
    lost_races: AtomicU64,
    recoveries: AtomicU64,
    longest_sleep_ms: AtomicU64,
}

impl Counters {
    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn record_sleep(&self, sleep: Duration) {
        let ms = u64::try_from(sleep.as_millis()).unwrap_or(u64::MAX);
        self.longest_sleep_ms.fetch_max(ms, Ordering::Relaxed);
    }

    fn snapshot(&self) -> EngineStats {
        EngineStats {
            armed: self.armed.load(Ordering::Relaxed),
            fired: self.fired.load(Ordering::Relaxed),
            fast_path_scheduled: self.fast_path_scheduled.load(Ordering::Relaxed),
            fast_path_fired: self.fast_path_fired.load(Ordering::Relaxed),
            rearms: self.rearms.load(Ordering::Relaxed),
            capped: self.capped.load(Ordering::Relaxed),
            lost_races: self.lost_races.load(Ordering::Relaxed),
            recoveries: self.recoveries.load(Ordering::Relaxed),
            longest_sleep: Duration::from_millis(self.longest_sleep_ms.load(Ordering::Relaxed)),
        }
    }
}

/// How one generation of the loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Step {
    Fired,
    LostRace,
    Interrupted,
    Capped,
    Shutdown,
}

struct Shared {
    store: Arc<dyn TimerStore>,
    sink: Arc<dyn DispatchSink>,
    clock: Arc<dyn Clock>,
    config: EngineConfig,
    store_timeout: Duration,
    signal: WakeupSignal,
    slot: RearmSlot,
    shutdown: CancellationToken,
    fast_path: TaskTracker,
    worker: Mutex<Option<JoinHandle<()>>>,
    looping: AtomicBool,
    stats: Counters,
}

/// Builder for [`TimerEngine`].
pub struct EngineBuilder {
    store: Arc<dyn TimerStore>,
    sink: Arc<dyn DispatchSink>,
    clock: Arc<dyn Clock>,
    config: EngineConfig,
    store_timeout: Duration,
}

impl EngineBuilder {
    /// Loop tuning: horizon, sleep cap, short-timer threshold, backoff.
    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    /// Time source. Defaults to [`SystemClock`].
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Per-call store timeout. Expiry is treated as a transient failure.
    pub fn store_timeout(mut self, timeout: Duration) -> Self {
        self.store_timeout = timeout;
        self
    }

    /// Build an engine. The loop does not run until [`TimerEngine::start`].
    pub fn build(self) -> TimerEngine {
        let shutdown = CancellationToken::new();
        TimerEngine {
            inner: Arc::new(Shared {
                store: self.store,
                sink: self.sink,
                clock: self.clock,
                config: self.config,
                store_timeout: self.store_timeout,
                signal: WakeupSignal::new(),
                slot: RearmSlot::new(shutdown.clone()),
                shutdown,
                fast_path: TaskTracker::new(),
                worker: Mutex::new(None),
                looping: AtomicBool::new(false),
                stats: Counters::default(),
            }),
        }
    }
}

/// Handle to the timer engine. Cheap to clone; all clones drive the same loop.
#[derive(Clone)]
pub struct TimerEngine {
    inner: Arc<Shared>,
}

impl TimerEngine {
    /// Start building an engine over `store`, publishing fired timers to `sink`.
    pub fn builder(store: Arc<dyn TimerStore>, sink: Arc<dyn DispatchSink>) -> EngineBuilder {
        EngineBuilder {
            store,
            sink,
            clock: Arc::new(SystemClock),
            config: EngineConfig::default(),
            store_timeout: Duration::from_secs(10),
        }
    }

    /// Spawn the scheduler loop. Fails if it is already running or the
    /// engine was shut down.
    pub fn start(&self) -> Result<()> {
        let mut worker = self.inner.worker.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        if worker.is_some() {
            return Err(ChimeError::Engine("scheduler loop already running".into()));
        }
        if self.inner.shutdown.is_cancelled() {
            return Err(ChimeError::Engine("engine has been shut down".into()));
        }

        let shared = self.inner.clone();
        *worker = Some(tokio::spawn(async move { shared.dispatch_timers().await }));
        tracing::info!(
            "⏰ Timer engine started (horizon {}d, short timers ≤ {}s)",
            self.inner.config.horizon_days,
            self.inner.config.short_timer_secs
        );
        Ok(())
    }

    /// Stop the loop and drop pending short timers. A dispatch already in
    /// progress completes first.
    pub async fn shutdown(&self) {
        self.inner.shutdown.cancel();
        let worker = self.inner.worker.lock().unwrap_or_else(|poisoned| poisoned.into_inner()).take();
        if let Some(handle) = worker
            && let Err(e) = handle.await
        {
            tracing::error!("Timer loop ended abnormally: {e}");
        }
        self.inner.fast_path.close();
        self.inner.fast_path.wait().await;
        tracing::info!("⏹️ Timer engine stopped");
    }

    /// Schedule `event` at `when`, created now.
    pub async fn create_timer(
        &self,
        when: impl Into<DateTime<Utc>>,
        event: &str,
        author_id: i64,
        payload: TimerPayload,
    ) -> Result<Timer> {
        let created = self.inner.clock.now().and_utc();
        self.create_timer_at(created, when, event, author_id, payload).await
    }

    /// Schedule `event` at `when` with an explicit creation time.
    ///
    /// Timers due within the short-timer threshold of `created` are never
    /// persisted and come back without an id.
    pub async fn create_timer_at(
        &self,
        created: impl Into<DateTime<Utc>>,
        when: impl Into<DateTime<Utc>>,
        event: &str,
        author_id: i64,
        payload: TimerPayload,
    ) -> Result<Timer> {
        let shared = &self.inner;
        let created = created.into().naive_utc();
        let when = when.into().naive_utc();
        let mut timer = Timer::new(event, author_id, created, when, payload)?;

        if when - created <= chrono_duration(shared.config.short_timer_threshold()) {
            self.schedule_short(timer.clone());
            return Ok(timer);
        }

        let id = shared.timed(shared.store.insert(&timer)).await?;
        timer.id = Some(id);
        tracing::info!("📅 Timer created: {timer}");

        // Timers past the horizon are found by the loop's capped re-query.
        if when < offset(shared.clock.now(), shared.config.horizon()) {
            shared.signal.set();
            shared.rearm_if(|state| match state {
                LoopState::Seeking => true,
                LoopState::Armed { expires_at, .. } => when <= *expires_at,
                _ => false,
            });
        }
        Ok(timer)
    }

    /// Delete a pending timer. `false` if it was already gone.
    pub async fn delete_timer(&self, id: i64) -> Result<bool> {
        let shared = &self.inner;
        let deleted = shared.timed(shared.store.delete_by_id(id)).await?;
        if deleted {
            shared.rearm_if(|state| armed_on(state, id));
        }
        Ok(deleted)
    }

    /// Delete a pending timer only if it belongs to `author_id` and `event`.
    pub async fn delete_timer_for(&self, id: i64, event: &str, author_id: i64) -> Result<bool> {
        let shared = &self.inner;
        let filter = TimerFilter::owned_by(event, author_id).with_id(id);
        let deleted = shared.timed(shared.store.delete_matching(&filter)).await? > 0;
        if deleted {
            shared.rearm_if(|state| armed_on(state, id));
        }
        Ok(deleted)
    }

    /// Delete every pending `event` timer of `author_id`.
    pub async fn clear_for(&self, event: &str, author_id: i64) -> Result<u64> {
        let shared = &self.inner;
        let removed = shared
            .timed(shared.store.delete_matching(&TimerFilter::owned_by(event, author_id)))
            .await?;
        if removed > 0 {
            shared.rearm_if(|state| match state {
                LoopState::Seeking => true,
                LoopState::Armed { author_id: armed_author, event: armed_event, .. } => {
                    *armed_author == author_id && armed_event == event
                }
                _ => false,
            });
        }
        Ok(removed)
    }

    /// Pending persisted timers of `author_id` for `event`. Fast-path timers are not counted.
    pub async fn count_pending_for(&self, event: &str, author_id: i64) -> Result<u64> {
        let shared = &self.inner;
        shared
            .timed(shared.store.count_pending(&TimerFilter::owned_by(event, author_id)))
            .await
    }

    /// Soonest `limit` pending timers of `author_id` for `event`.
    pub async fn list_pending_for(&self, event: &str, author_id: i64, limit: usize) -> Result<Vec<Timer>> {
        let shared = &self.inner;
        shared
            .timed(shared.store.list_pending(&TimerFilter::owned_by(event, author_id), limit))
            .await
    }

    /// Snapshot of the loop counters.
    pub fn stats(&self) -> EngineStats {
        self.inner.stats.snapshot()
    }

    /// What the loop is doing right now.
    pub fn state(&self) -> LoopState {
        self.inner.slot.state()
    }

    /// Current loop generation. Bumps on every re-selection.
    pub fn generation(&self) -> u64 {
        self.inner.slot.snapshot().0
    }

    fn schedule_short(&self, timer: Timer) {
        let shared = self.inner.clone();
        let wait = (timer.expires_at - shared.clock.now()).to_std().unwrap_or(Duration::ZERO);
        tracing::debug!("⚡ Short timer {timer} fires in {wait:?} without touching the store");
        Counters::bump(&shared.stats.fast_path_scheduled);

        self.inner.fast_path.spawn(async move {
            tokio::select! {
                biased;
                _ = shared.shutdown.cancelled() => {
                    tracing::debug!("Dropping short timer {timer} on shutdown");
                }
                _ = tokio::time::sleep(wait) => {
                    Counters::bump(&shared.stats.fast_path_fired);
                    shared.sink.publish(&timer.event_name(), timer);
                }
            }
        });
    }
}

fn armed_on(state: &LoopState, id: i64) -> bool {
    match state {
        LoopState::Seeking => true,
        LoopState::Armed { id: armed, .. } => *armed == id,
        _ => false,
    }
}

fn chrono_duration(d: Duration) -> chrono::Duration {
    chrono::Duration::from_std(d).unwrap_or(chrono::Duration::MAX)
}

fn offset(now: NaiveDateTime, by: Duration) -> NaiveDateTime {
    now.checked_add_signed(chrono_duration(by)).unwrap_or(NaiveDateTime::MAX)
}

impl Shared {
    async fn timed<T>(&self, op: impl Future<Output = Result<T>>) -> Result<T> {
        tokio::time::timeout(self.store_timeout, op)
            .await
            .map_err(|_| ChimeError::Timeout(self.store_timeout))?
    }

    fn rearm_if(&self, should: impl FnOnce(&LoopState) -> bool) {
        if let Some(generation) = self.slot.interrupt_if(should) {
            tracing::debug!("🔁 Interrupted generation {generation} to re-select the earliest timer");
        }
    }

    async fn dispatch_timers(self: Arc<Self>) {
        let already = self.looping.swap(true, Ordering::SeqCst);
        assert!(!already, "two timer dispatch loops running at once");

        let initial_backoff = self.config.backoff_initial();
        let mut backoff = initial_backoff;

        loop {
            let (generation, token) = self.slot.begin_generation();

            match self.run_generation(generation, &token).await {
                Ok(Step::Shutdown) => break,
                Ok(step) => {
                    match step {
                        Step::Interrupted => Counters::bump(&self.stats.rearms),
                        Step::Capped => Counters::bump(&self.stats.capped),
                        _ => {}
                    }
                    backoff = initial_backoff;
                }
                Err(e) => {
                    self.slot.transition(generation, LoopState::Recovering);
                    Counters::bump(&self.stats.recoveries);
                    if e.is_transient() {
                        tracing::warn!("⚠️ Timer store failure ({e}), retrying in {backoff:?}");
                    } else {
                        tracing::error!("Unexpected scheduler error ({e}), retrying in {backoff:?}");
                    }
                    tokio::select! {
                        biased;
                        _ = self.shutdown.cancelled() => break,
                        _ = tokio::time::sleep(backoff) => {}
                    }
                    backoff = backoff.saturating_mul(2).min(self.config.backoff_max());
                }
            }

            if self.shutdown.is_cancelled() {
                break;
            }
        }

        let (generation, _) = self.slot.snapshot();
        self.slot.transition(generation, LoopState::Stopped);
        self.looping.store(false, Ordering::SeqCst);
    }

    async fn run_generation(&self, generation: u64, token: &CancellationToken) -> Result<Step> {
        let horizon = self.config.horizon();
        let max_sleep = self.config.max_sleep();

        // Seeking
        let timer = loop {
            let before = offset(self.clock.now(), horizon);
            let found = tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => return Ok(Step::Shutdown),
                _ = token.cancelled() => return Ok(Step::Interrupted),
                found = self.timed(self.store.find_earliest(before)) => found?,
            };

            if let Some(timer) = found {
                self.signal.set();
                break timer;
            }

            self.signal.clear();
            tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => return Ok(Step::Shutdown),
                _ = token.cancelled() => return Ok(Step::Interrupted),
                _ = self.signal.wait() => {}
                _ = tokio::time::sleep(max_sleep) => {
                    self.stats.record_sleep(max_sleep);
                    return Ok(Step::Capped);
                }
            }
        };

        let Some(id) = timer.id else {
            return Err(ChimeError::Store(format!("store returned unpersisted {timer}")));
        };

        // Armed
        self.slot.transition(
            generation,
            LoopState::Armed {
                id,
                expires_at: timer.expires_at,
                author_id: timer.author_id,
                event: timer.event.clone(),
            },
        );
        Counters::bump(&self.stats.armed);

        let remaining = (timer.expires_at - self.clock.now()).to_std().unwrap_or(Duration::ZERO);
        let step = remaining.min(max_sleep);
        if !step.is_zero() {
            tracing::debug!("Armed on {timer}, sleeping {step:?}");
            tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => return Ok(Step::Shutdown),
                _ = token.cancelled() => return Ok(Step::Interrupted),
                _ = tokio::time::sleep(step) => self.stats.record_sleep(step),
            }
        }
        if step < remaining {
            return Ok(Step::Capped);
        }

        // Firing: delete then publish, not interruptible.
        self.slot.transition(generation, LoopState::Firing { id });
        self.call_timer(id, timer).await
    }

    async fn call_timer(&self, id: i64, timer: Timer) -> Result<Step> {
        if !self.timed(self.store.delete_by_id(id)).await? {
            Counters::bump(&self.stats.lost_races);
            tracing::debug!("Timer #{id} was deleted before it fired");
            return Ok(Step::LostRace);
        }

        tracing::info!("🔔 Timer fired: {timer}");
        Counters::bump(&self.stats.fired);
        self.sink.publish(&timer.event_name(), timer);
        Ok(Step::Fired)
    }
}
