//! Error types for the Turnstile service.

use thiserror::Error;

use crate::ratelimit::WindowStatus;

/// Main error type for Turnstile startup and serving.
#[derive(Error, Debug)]
pub enum TurnstileError {
    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Quota declaration errors
    #[error("Invalid quota declaration: {0}")]
    Quota(String),

    /// Counter store errors
    #[error("Counter store error: {0}")]
    Store(#[from] StoreError),

    /// Key registry errors
    #[error("Key registry error: {0}")]
    Registry(#[from] RegistryError),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<config::ConfigError> for TurnstileError {
    fn from(err: config::ConfigError) -> Self {
        TurnstileError::Config(err.to_string())
    }
}

/// Errors raised by a shared counter store.
#[derive(Error, Debug)]
pub enum StoreError {
    /// The store could not be reached or rejected the command
    #[error("redis: {0}")]
    Redis(#[from] redis::RedisError),

    /// The store is not available (used by in-process stores and tests)
    #[error("counter store unavailable: {0}")]
    Unavailable(String),
}

/// Errors raised by the durable key registry.
#[derive(Error, Debug)]
pub enum RegistryError {
    /// Database errors
    #[error("database: {0}")]
    Database(#[from] sqlx::Error),

    /// The registry returned a row that cannot be turned into a quota
    #[error("invalid override row for key {key}: {reason}")]
    InvalidRow { key: String, reason: String },
}

/// Outcomes that stop a request before it reaches its handler.
#[derive(Error, Debug)]
pub enum AdmissionError {
    /// A quota was exceeded while enforcement is on
    #[error("rate limit exceeded for {}", .0.key)]
    RateLimited(Box<WindowStatus>),

    /// Anonymous access is disabled fleet-wide
    #[error("emergency mode: anonymous access is disabled")]
    EmergencyMode,

    /// The caller asked for something it is not allowed to configure
    #[error("forbidden: {0}")]
    Forbidden(String),
}

/// Result type alias for Turnstile operations.
pub type Result<T> = std::result::Result<T, TurnstileError>;
