use thiserror::Error;

/// Failures surfaced by [`crate::service::TrackerService`].
///
/// Store-level code keeps using `anyhow`; anything it returns ends up in
/// `Storage` unless the service maps it to one of the domain cases first.
#[derive(Debug, Error)]
pub enum TrackerError {
    /// Missing or malformed user input. Never fatal; the request is rejected.
    #[error("{0}")]
    Validation(String),
    #[error("{0}")]
    NotFound(String),
    /// Bad credentials or an inactive account.
    #[error("invalid username or password")]
    Unauthorized,
    /// Onboarding could not be finalized. The account, profile and goal were
    /// written in one transaction, so nothing was persisted.
    #[error("could not finish creating your account: {0}")]
    Finalization(String),
    #[error(transparent)]
    Storage(#[from] anyhow::Error),
}

impl TrackerError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}

pub type TrackerResult<T> = Result<T, TrackerError>;
