//! Wakeup signal: a payload-free gate telling the scheduler loop to look again.

use tokio::sync::watch;

/// Single-slot set/clear gate.
///
/// Carries no value: a woken loop always re-queries the store.
#[derive(Debug)]
pub struct WakeupSignal {
    tx: watch::Sender<bool>,
}

impl WakeupSignal {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(false);
        Self { tx }
    }

    /// Mark data as available. Idempotent.
    pub fn set(&self) {
        self.tx.send_replace(true);
    }

    /// Mark no data as known available.
    pub fn clear(&self) {
        self.tx.send_replace(false);
    }

    pub fn is_set(&self) -> bool {
        *self.tx.borrow()
    }

    /// Resolve once the gate is set. Returns immediately if it already is.
    pub async fn wait(&self) {
        let mut rx = self.tx.subscribe();
        // The sender lives in `self`, so the channel cannot close while we wait.
        let _ = rx.wait_for(|set| *set).await;
    }
}

impl Default for WakeupSignal {
    fn default() -> Self {
        Self::new()
    }
}
