//! Policy error types.

use crate::Capability;
use crate::rules::Operation;
use thiserror::Error;

/// Policy errors.
///
/// This enum is marked `#[non_exhaustive]` to allow adding new variants
/// in future versions without breaking downstream code.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// An identifier outside the capability catalog.
    #[error("unknown capability: {0}")]
    UnknownCapability(String),

    /// A rule set answered an operation with a rule of the wrong kind.
    #[error("rule set '{rule_set}' gave an inconsistent answer for {operation} on {capability}")]
    Inconsistent {
        capability: Capability,
        operation: Operation,
        rule_set: &'static str,
    },

    /// Failed to parse a level or identifier.
    #[error("failed to parse: {0}")]
    Parse(String),
}

pub type Result<T> = std::result::Result<T, Error>;
