//! Error types for the Turnstile service.

use thiserror::Error;

use crate::store::StoreError;

/// Main error type for Turnstile operations.
#[derive(Error, Debug)]
pub enum TurnstileError {
    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Malformed or missing request parameters
    #[error("Parameter error: {0}")]
    Parameter(String),

    /// The per-caller lock is held elsewhere
    #[error("Lock unavailable for key {key}")]
    LockUnavailable { key: String },

    /// Shared store errors, including an open circuit breaker
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl TurnstileError {
    /// Whether the error came from the circuit breaker refusing the call.
    pub fn is_breaker_open(&self) -> bool {
        matches!(self, TurnstileError::Store(StoreError::BreakerOpen { .. }))
    }
}

impl From<config::ConfigError> for TurnstileError {
    fn from(err: config::ConfigError) -> Self {
        TurnstileError::Config(err.to_string())
    }
}

/// Result type alias for Turnstile operations.
pub type Result<T> = std::result::Result<T, TurnstileError>;
