//! Server error types.

use thiserror::Error;

use mealplan_providers::ProviderError;

/// Result type for server operations.
pub type ServerResult<T> = Result<T, ServerError>;

/// Errors that can occur in the sync core.
#[derive(Debug, Error)]
pub enum ServerError {
    /// SQLite error.
    #[error("storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    /// Connection pool error.
    #[error("storage pool error: {0}")]
    Pool(#[from] r2d2::Error),

    /// Upstream calendar error.
    #[error("provider error: {0}")]
    Provider(#[from] ProviderError),

    /// A blocking storage task panicked or was cancelled.
    #[error("background task error: {0}")]
    Task(#[from] tokio::task::JoinError),

    /// Configuration error.
    #[error("configuration error: {message}")]
    Config { message: String },
}

impl ServerError {
    /// Creates a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }
}
