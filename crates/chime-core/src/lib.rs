//! # Chime Core
//!
//! Shared configuration and error types for the Chime timer daemon.

pub mod config;
pub mod error;

pub use config::ChimeConfig;
pub use error::{ChimeError, Result};
