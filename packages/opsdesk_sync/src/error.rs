use thiserror::Error;

/// Errors that can cross the engine's public boundary.
///
/// Only plumbing failures surface here; user-actionable outcomes
/// (validation, backend rejections) are published as
/// [`crate::models::StatusNotice`] values instead.
#[derive(Debug, Error)]
pub enum EngineError {
    /// The engine task has shut down.
    #[error("engine is gone")]
    EngineGone,
    /// The engine task dropped the response channel without replying.
    #[error("engine did not respond")]
    NoResponse,
    /// The outbound queue is full; the action was not enqueued.
    #[error("outbound queue is full")]
    QueueFull,
    /// Identity bootstrap failed.
    #[error("identity request failed: {0}")]
    Identity(String),
    /// Out-of-band file upload failed.
    #[error("upload failed: {0}")]
    Upload(String),
}
