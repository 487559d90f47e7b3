//! Error types shared across Chime crates.

use std::time::Duration;

/// Every fallible Chime operation returns this error.
#[derive(Debug, thiserror::Error)]
pub enum ChimeError {
    /// Malformed producer input. Rejected synchronously, never retried.
    #[error("Invalid timer: {0}")]
    Validation(String),

    /// Durable store failure (I/O, connection, SQL).
    #[error("Store error: {0}")]
    Store(String),

    /// A store call exceeded its operation timeout.
    #[error("Store operation timed out after {0:?}")]
    Timeout(Duration),

    #[error("Config error: {0}")]
    Config(String),

    /// Engine misuse, e.g. starting the scheduler loop twice.
    #[error("Engine error: {0}")]
    Engine(String),

    /// A dispatch subscriber failed.
    #[error("Handler error: {0}")]
    Handler(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl ChimeError {
    /// Transient failures send the scheduler loop into recovery instead of
    /// surfacing to producers.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Store(_) | Self::Timeout(_) | Self::Io(_))
    }
}

pub type Result<T> = std::result::Result<T, ChimeError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(ChimeError::Store("connection reset".into()).is_transient());
        assert!(ChimeError::Timeout(Duration::from_secs(10)).is_transient());
        assert!(!ChimeError::Validation("bad event".into()).is_transient());
        assert!(!ChimeError::Engine("already running".into()).is_transient());
    }

    #[test]
    fn test_display() {
        let err = ChimeError::Timeout(Duration::from_secs(3));
        assert_eq!(err.to_string(), "Store operation timed out after 3s");
    }
}
