//! Dispatch sink: publishes fired timers to subscribers by event name.
//!
//! Handlers register against an event kind ("reminder") and receive every
//! timer published as `reminder_timer_complete`. Publishing is
//! fire-and-forget: each handler runs in its own task, and a failing or
//! panicking handler never reaches the scheduler loop.

use async_trait::async_trait;
use chime_core::Result;
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, RwLock};
use tokio::sync::broadcast;

use crate::timer::{Timer, event_name};

/// Where the engine sends fired timers.
pub trait DispatchSink: Send + Sync + 'static {
    fn publish(&self, event_name: &str, timer: Timer);
}

/// A subscriber for one event kind.
#[async_trait]
pub trait TimerHandler: Send + Sync + 'static {
    async fn handle(&self, timer: Timer) -> Result<()>;
}

struct FnHandler<F>(F);

#[async_trait]
impl<F, Fut> TimerHandler for FnHandler<F>
where
    F: Fn(Timer) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    async fn handle(&self, timer: Timer) -> Result<()> {
        (self.0)(timer).await
    }
}

/// A published timer, as seen by broadcast subscribers.
#[derive(Debug, Clone)]
pub struct FiredTimer {
    pub event_name: String,
    pub timer: Timer,
}

/// In-process event bus: typed handlers per event name plus a broadcast
/// feed of everything published.
pub struct EventBus {
    handlers: RwLock<HashMap<String, Vec<Arc<dyn TimerHandler>>>>,
    sender: broadcast::Sender<FiredTimer>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self {
            handlers: RwLock::new(HashMap::new()),
            sender,
        }
    }

    /// Register a handler for `<event_kind>_timer_complete`.
    pub fn register(&self, event_kind: &str, handler: impl TimerHandler) {
        let name = event_name(event_kind);
        tracing::debug!("📥 Handler registered for '{name}'");
        self.handlers
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .entry(name)
            .or_default()
            .push(Arc::new(handler));
    }

    /// Register an async closure as a handler.
    pub fn on<F, Fut>(&self, event_kind: &str, f: F)
    where
        F: Fn(Timer) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        self.register(event_kind, FnHandler(f));
    }

    /// Receive every published timer, regardless of event name.
    pub fn subscribe(&self) -> broadcast::Receiver<FiredTimer> {
        self.sender.subscribe()
    }

    pub fn handler_count(&self, event_name: &str) -> usize {
        self.handlers
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(event_name)
            .map_or(0, Vec::len)
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}

impl DispatchSink for EventBus {
    fn publish(&self, event_name: &str, timer: Timer) {
        let handlers = self
            .handlers
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(event_name)
            .cloned()
            .unwrap_or_default();

        if handlers.is_empty() && self.sender.receiver_count() == 0 {
            tracing::debug!("No subscribers for '{event_name}', dropping {timer}");
            return;
        }

        // Err only means nobody is listening on the broadcast feed.
        let _ = self.sender.send(FiredTimer {
            event_name: event_name.to_string(),
            timer: timer.clone(),
        });

        let runtime = match tokio::runtime::Handle::try_current() {
            Ok(handle) => handle,
            Err(e) => {
                tracing::warn!("⚠️ Cannot run handlers for '{event_name}' outside a runtime: {e}");
                return;
            }
        };

        for handler in handlers {
            let timer = timer.clone();
            let name = event_name.to_string();
            runtime.spawn(async move {
                if let Err(e) = handler.handle(timer).await {
                    tracing::warn!("⚠️ Handler for '{name}' failed: {e}");
                }
            });
        }
    }
}
