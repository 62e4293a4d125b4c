//! Error types for the playback pipeline
//!
//! Defines pipeline-specific error types using thiserror for clear error
//! propagation.

use thiserror::Error;

/// Convenience Result type using the playback Error
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for the playback pipeline
///
/// Cloneable so a failure can travel both into the log and into the
/// load-failure notification.
#[derive(Error, Debug, Clone)]
pub enum Error {
    /// Resolver failed to load a resource or restore its source link
    #[error("could not load resource: {0}")]
    Load(String),

    /// Player backend refused to start the resolved resource
    #[error("could not start playback: {0}")]
    Start(String),

    /// Resolved play resource is unusable
    #[error("invalid play resource: {0}")]
    InvalidResource(String),

    /// Queue operation out of range; rejected before any mutation
    #[error("queue error: {0}")]
    Queue(String),

    /// Cooperative cancellation observed; a superseded attempt, not a failure
    #[error("operation aborted")]
    Aborted,
}

impl Error {
    /// True for cancellation, which is never surfaced as a user-visible
    /// failure.
    pub fn is_abort(&self) -> bool {
        matches!(self, Error::Aborted)
    }
}
