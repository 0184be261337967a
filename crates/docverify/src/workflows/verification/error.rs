use super::domain::ActorId;
use super::fields::ValidationError;
use super::machine::IllegalTransition;
use super::repository::{RepositoryError, StorageError};

/// Error raised by the verification workflow.
#[derive(Debug, thiserror::Error)]
pub enum VerificationError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error(transparent)]
    IllegalTransition(#[from] IllegalTransition),
    #[error(transparent)]
    Repository(#[from] RepositoryError),
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error("unsupported content type {0}; upload a JPEG, PNG or PDF")]
    UnsupportedMedia(String),
    #[error("{0} not found")]
    NotFound(String),
    #[error("{actor} is not allowed to {operation}")]
    Forbidden {
        actor: ActorId,
        operation: &'static str,
    },
}
