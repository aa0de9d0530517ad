use thiserror::Error;

/// Runtime errors.
///
/// This enum is marked `#[non_exhaustive]` to allow adding new variants
/// in future versions without breaking downstream code.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// The requested set is empty, names an unknown capability, or breaks a
    /// cross-capability rule.
    #[error("invalid capability set: {0}")]
    InvalidCapabilitySet(String),

    /// Another session is still running on this orchestrator.
    #[error("a request session is already in flight")]
    SessionInFlight,

    /// The host invalidated the session before it finished.
    #[error("session abandoned")]
    Abandoned,

    #[error(transparent)]
    Policy(#[from] policy::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
