//! Errors surfaced to the user by the submission pipeline.

use thiserror::Error;

/// Terminal failures of a single user action.
///
/// Inference failures are intentionally absent: they degrade into a
/// placeholder record instead of aborting the pipeline.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// No session, an expired one that could not be refreshed, or a token the
    /// storage service rejected.
    #[error("Google session expired. Please sign in again.")]
    Reauthenticate,

    #[error("invalid image: {0}")]
    InvalidImage(String),

    #[error("upload to drive failed: {0}")]
    Storage(String),

    #[error("failed to save plant record: {0}")]
    Persist(String),

    #[error("plant {0} not found")]
    PlantNotFound(String),
}

impl PipelineError {
    /// Whether the user must sign in again before retrying.
    pub fn requires_login(&self) -> bool {
        matches!(self, PipelineError::Reauthenticate)
    }
}
