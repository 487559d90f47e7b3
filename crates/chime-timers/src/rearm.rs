//! Generation-tokened view of the scheduler loop.
//!
//! The loop is the only writer. Producers read the current state and may
//! cancel the current generation; a cancellation aimed at an older
//! generation is a no-op.

use chrono::NaiveDateTime;
use std::sync::{Mutex, MutexGuard};
use tokio_util::sync::CancellationToken;

/// What the scheduler loop is doing right now.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoopState {
    /// Loop not started.
    Idle,
    /// Querying the store or waiting on the wakeup signal.
    Seeking,
    /// Sleeping until this timer is due.
    Armed {
        id: i64,
        expires_at: NaiveDateTime,
        author_id: i64,
        event: String,
    },
    /// Deleting and publishing a due timer. Not interruptible.
    Firing { id: i64 },
    /// Backing off after a store failure.
    Recovering,
    Stopped,
}

#[derive(Debug)]
struct Generation {
    id: u64,
    token: CancellationToken,
    state: LoopState,
}

#[derive(Debug)]
pub struct RearmSlot {
    root: CancellationToken,
    current: Mutex<Generation>,
}

impl RearmSlot {
    /// Generation tokens are children of `root`, so cancelling `root` stops
    /// every generation.
    pub fn new(root: CancellationToken) -> Self {
        let token = root.child_token();
        Self {
            root,
            current: Mutex::new(Generation {
                id: 0,
                token,
                state: LoopState::Idle,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Generation> {
        self.current.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Start a fresh generation in `Seeking`. Loop only.
    pub(crate) fn begin_generation(&self) -> (u64, CancellationToken) {
        let mut current = self.lock();
        current.id += 1;
        current.token = self.root.child_token();
        current.state = LoopState::Seeking;
        (current.id, current.token.clone())
    }

    /// Record a state change for `generation`. Ignored if stale. Loop only.
    pub(crate) fn transition(&self, generation: u64, state: LoopState) -> bool {
        let mut current = self.lock();
        if current.id != generation {
            return false;
        }
        current.state = state;
        true
    }

    /// Snapshot of `(generation, state)`.
    pub fn snapshot(&self) -> (u64, LoopState) {
        let current = self.lock();
        (current.id, current.state.clone())
    }

    pub fn state(&self) -> LoopState {
        self.lock().state.clone()
    }

    /// Cancel `generation` if it is still current.
    pub fn interrupt(&self, generation: u64) -> bool {
        let current = self.lock();
        if current.id != generation {
            tracing::debug!(
                "Ignoring stale interrupt for generation {generation} (current {})",
                current.id
            );
            return false;
        }
        current.token.cancel();
        true
    }

    /// Atomically inspect the current state and cancel its generation when
    /// `should` holds. Returns the interrupted generation.
    pub fn interrupt_if(&self, should: impl FnOnce(&LoopState) -> bool) -> Option<u64> {
        let current = self.lock();
        if current.token.is_cancelled() || !should(&current.state) {
            return None;
        }
        current.token.cancel();
        Some(current.id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn armed(id: i64) -> LoopState {
        LoopState::Armed {
            id,
            expires_at: chrono::NaiveDate::from_ymd_opt(2026, 1, 1)
                .unwrap()
                .and_hms_opt(0, 0, 0)
                .unwrap(),
            author_id: 1,
            event: "reminder".into(),
        }
    }

    #[test]
    fn test_generations_increment() {
        let slot = RearmSlot::new(CancellationToken::new());
        assert_eq!(slot.snapshot(), (0, LoopState::Idle));

        let (first, _) = slot.begin_generation();
        let (second, _) = slot.begin_generation();
        assert_eq!(second, first + 1);
        assert_eq!(slot.state(), LoopState::Seeking);
    }

    #[test]
    fn test_stale_interrupt_is_noop() {
        let slot = RearmSlot::new(CancellationToken::new());
        let (old, old_token) = slot.begin_generation();
        let (new, new_token) = slot.begin_generation();

        assert!(!slot.interrupt(old));
        assert!(!old_token.is_cancelled());
        assert!(!new_token.is_cancelled());

        assert!(slot.interrupt(new));
        assert!(new_token.is_cancelled());
    }

    #[test]
    fn test_stale_transition_ignored() {
        let slot = RearmSlot::new(CancellationToken::new());
        let (old, _) = slot.begin_generation();
        let (_new, _) = slot.begin_generation();
        assert!(!slot.transition(old, armed(1)));
        assert_eq!(slot.state(), LoopState::Seeking);
    }

    #[test]
    fn test_interrupt_if_matches_armed_id() {
        let slot = RearmSlot::new(CancellationToken::new());
        let (generation, token) = slot.begin_generation();
        slot.transition(generation, armed(7));

        let hit = |id: i64| move |state: &LoopState| matches!(state, LoopState::Armed { id: armed, .. } if *armed == id);
        assert_eq!(slot.interrupt_if(hit(8)), None);
        assert!(!token.is_cancelled());
        assert_eq!(slot.interrupt_if(hit(7)), Some(generation));
        assert!(token.is_cancelled());
        // Already cancelled: a second producer does not re-report it.
        assert_eq!(slot.interrupt_if(hit(7)), None);
    }

    #[test]
    fn test_root_cancels_generations() {
        let root = CancellationToken::new();
        let slot = RearmSlot::new(root.clone());
        let (_, token) = slot.begin_generation();
        root.cancel();
        assert!(token.is_cancelled());
    }
}
