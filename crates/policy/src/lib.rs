//! Capability catalog and version-policy resolver.
//!
//! Answers three questions about a guarded platform capability, given the
//! device's runtime level and the application's target level:
//!
//! - is it granted?
//! - has the user refused it for good?
//! - where should the user go to fix it?
//!
//! Answers come from an ordered chain of version-scoped rule sets, see
//! [`Resolver`]. Live platform state is read through [`PlatformQuery`].

mod capability;
mod error;
mod platform;
mod resolver;
pub mod rules;
mod version;

pub use capability::{
    Capability, CapabilityKind, DEDICATED_STAGE_ORDER, classify, introduced_at,
};
pub use error::{Error, Result};
pub use platform::{PlatformQuery, RemediationTarget, SpecialProbe};
pub use resolver::{CapabilityOutcome, Resolution, Resolver};
pub use version::{ApiLevel, ResolutionContext};
