use thiserror::Error;

/// Why a proposed change to a complaint was refused.
///
/// Every variant is returned to the caller as a value; none is retried here.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Rejection {
    #[error("complaint already has status {0}")]
    StatusUnchanged(shared::domain::Status),
    #[error("a deadline must be set before leaving Pendente")]
    DeadlineRequired,
    #[error("a resolution description is required for this status")]
    DescriptionRequired,
    #[error("at least one resolution image is required to resolve a complaint")]
    ImageRequired,
    #[error("complaint is resolved and can no longer be edited")]
    RecordLocked,
    #[error("complaint is not eligible for a citizen response")]
    NotEligible,
    #[error("citizen response could not be delivered: {0}")]
    DispatchFailed(String),
    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error("complaint {0} not found")]
    NotFound(shared::domain::ComplaintId),
    #[error("{0}")]
    Backend(String),
}

impl StoreError {
    pub fn backend(err: impl std::fmt::Display) -> Self {
        Self::Backend(err.to_string())
    }
}
