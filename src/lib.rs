//! Augur - adaptive candle-signal engine with deferred outcome verification

pub mod config;
pub mod error;
pub mod services;
pub mod sources;
pub mod types;

// Re-export commonly used types
pub use config::Config;
pub use error::{AppError, Result};
pub use types::*;
