use thiserror::Error;

/// Failure taxonomy for administrative operations.
///
/// Validation failures are detected before any state mutation; engine I/O
/// failures are caught at the manager boundary and wrap the engine's native
/// error.
#[derive(Debug, Error)]
pub enum AdminError {
    #[error("invalid configuration, {0}")]
    InvalidConfiguration(String),

    #[error("broker is not running")]
    NotRunning,

    #[error("client id is required")]
    InvalidClientId,

    #[error("broker start failed, {0}")]
    StartFailed(anyhow::Error),

    #[error("broker stop failed, {0}")]
    StopFailed(anyhow::Error),

    #[error("operation cancelled")]
    Cancelled,

    #[error("broker engine error, {0}")]
    Engine(anyhow::Error),
}

impl AdminError {
    /// True for failures the caller could have avoided by validating its
    /// input, false for engine/runtime failures.
    #[inline]
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            AdminError::InvalidConfiguration(_) | AdminError::NotRunning | AdminError::InvalidClientId
        )
    }
}

pub type Result<T, E = AdminError> = std::result::Result<T, E>;
