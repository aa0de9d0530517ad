//! Final reconciliation of a session into a [`RequestReport`].

use crate::session::{Bucket, RequestReport, RequestSession};
use crate::Result;
use policy::{PlatformQuery, Resolver};
use tracing::{debug, info};

/// Reconcile `session` and freeze it.
///
/// Dedicated capabilities that exist on the runtime are re-checked, since
/// the user may have toggled them in settings at any point. Anything left
/// unrecorded is classified from current platform state. Not-applicable and
/// permanently refused capabilities are reported as denied.
pub fn aggregate(
    resolver: &Resolver,
    session: &mut RequestSession,
    platform: &dyn PlatformQuery,
) -> Result<RequestReport> {
    let ctx = session.ctx;

    for capability in session.dedicated.clone() {
        if !capability.exists_on(ctx.runtime) {
            continue;
        }
        let granted = resolver.is_granted(capability, &ctx, platform)?;
        let current = session.bucket_of(capability);
        if granted && current != Some(Bucket::Granted) {
            debug!(session = %session.id, %capability, "granted outside the stage");
            session.record(capability, Bucket::Granted);
        } else if !granted && matches!(current, Some(Bucket::Granted) | None) {
            let outcome = resolver.outcome(capability, &ctx, platform)?;
            session.record(capability, outcome.into());
        }
    }

    for capability in session.normalized.clone() {
        if session.bucket_of(capability).is_none() {
            let outcome = resolver.outcome(capability, &ctx, platform)?;
            session.record(capability, outcome.into());
        }
    }

    session.freeze();

    let granted = session.bucket(Bucket::Granted).to_vec();
    let permanently_denied = session.bucket(Bucket::PermanentlyDenied).to_vec();
    let denied: Vec<_> = [
        Bucket::Denied,
        Bucket::PermanentlyDenied,
        Bucket::NotApplicable,
    ]
    .into_iter()
    .flat_map(|b| session.bucket(b).iter().copied())
    .collect();

    let report = RequestReport {
        session: session.id,
        all_granted: denied.is_empty(),
        granted,
        denied,
        permanently_denied,
    };
    info!(
        session = %report.session,
        all_granted = report.all_granted,
        granted = report.granted.len(),
        denied = report.denied.len(),
        "session finished"
    );
    Ok(report)
}
