//! Request validation and normalization.
//!
//! Rejects malformed requests before any stage runs, then expands the
//! request with the legacy capabilities older runtimes need in their place.

use crate::{Error, Result};
use policy::{ApiLevel, Capability, ResolutionContext};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// How strictly cross-capability rules are enforced.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidationMode {
    /// Every rule is enforced.
    #[default]
    Strict,
    /// Only structural checks (empty set, unknown identifier).
    Lenient,
}

/// Parse platform identifiers into capabilities.
pub fn parse_ids<S: AsRef<str>>(ids: &[S]) -> Result<Vec<Capability>> {
    ids.iter()
        .map(|id| {
            Capability::parse(id.as_ref().trim()).map_err(|_| {
                Error::InvalidCapabilitySet(format!("unknown capability '{}'", id.as_ref()))
            })
        })
        .collect()
}

/// Validate `requested` against `ctx` and return the normalized set.
///
/// The normalized set keeps the requested order, drops duplicates, and
/// appends the legacy capabilities of anything the runtime predates.
/// Normalizing a normalized set returns it unchanged.
pub fn normalize(
    requested: &[Capability],
    ctx: &ResolutionContext,
    mode: ValidationMode,
) -> Result<Vec<Capability>> {
    if requested.is_empty() {
        return Err(invalid("no capabilities requested"));
    }
    if mode == ValidationMode::Strict {
        check_invariants(requested, ctx)?;
    }

    let mut normalized = Vec::with_capacity(requested.len());
    for capability in requested {
        push_unique(&mut normalized, *capability);
        if !capability.exists_on(ctx.runtime) {
            for legacy in capability.legacy() {
                push_unique(&mut normalized, *legacy);
            }
        }
    }
    debug!(?requested, ?normalized, %ctx, "normalized request");
    Ok(normalized)
}

fn push_unique(set: &mut Vec<Capability>, capability: Capability) {
    if !set.contains(&capability) {
        set.push(capability);
    }
}

fn invalid(message: impl Into<String>) -> Error {
    Error::InvalidCapabilitySet(message.into())
}

fn check_invariants(requested: &[Capability], ctx: &ResolutionContext) -> Result<()> {
    use Capability as C;
    let has = |c: Capability| requested.contains(&c);

    for capability in requested {
        if ctx.target < capability.min_target() {
            return Err(invalid(format!(
                "{capability} needs a target of at least {}, declared {}",
                capability.min_target(),
                ctx.target
            )));
        }
    }

    if ctx.target >= ApiLevel::ANDROID_13 {
        for capability in requested {
            if let Some(replacement) = capability.superseded_by() {
                return Err(invalid(format!(
                    "{capability} is superseded by {replacement} on target {}",
                    ctx.target
                )));
            }
        }
    }

    if has(C::AccessMediaLocation) {
        let readable = if ctx.target >= ApiLevel::ANDROID_13 {
            has(C::ReadMediaImages) || has(C::ManageExternalStorage)
        } else {
            has(C::ReadExternalStorage) || has(C::ManageExternalStorage)
        };
        if !readable {
            return Err(invalid(format!(
                "{} must be requested with a shared-storage read capability",
                C::AccessMediaLocation
            )));
        }
    }

    if has(C::BodySensorsBackground) {
        if !has(C::BodySensors) {
            return Err(invalid(format!(
                "{} must be requested with {}",
                C::BodySensorsBackground,
                C::BodySensors
            )));
        }
        for exclusive in [C::AccessBackgroundLocation, C::AccessMediaLocation] {
            if has(exclusive) {
                return Err(invalid(format!(
                    "{} cannot be requested together with {exclusive}",
                    C::BodySensorsBackground
                )));
            }
        }
    }

    if ctx.target >= ApiLevel::ANDROID_12
        && has(C::AccessFineLocation)
        && !has(C::AccessCoarseLocation)
    {
        return Err(invalid(format!(
            "{} must be requested with {} on target {}",
            C::AccessFineLocation,
            C::AccessCoarseLocation,
            ctx.target
        )));
    }

    if has(C::AccessBackgroundLocation)
        && has(C::AccessCoarseLocation)
        && !has(C::AccessFineLocation)
    {
        return Err(invalid(format!(
            "{} with {} also needs {}",
            C::AccessBackgroundLocation,
            C::AccessCoarseLocation,
            C::AccessFineLocation
        )));
    }

    if has(C::ManageExternalStorage)
        && (has(C::ReadExternalStorage) || has(C::WriteExternalStorage))
    {
        return Err(invalid(format!(
            "{} already covers legacy external storage access",
            C::ManageExternalStorage
        )));
    }

    Ok(())
}
