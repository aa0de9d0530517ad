//! The side-effecting half of the platform.

use policy::{Capability, RemediationTarget};
use std::collections::HashMap;
use std::future::Future;

/// Prompts and settings screens the orchestrator drives.
///
/// Implementations wrap the host platform. Every method completes when the
/// platform reports back, which may be arbitrarily later.
pub trait PlatformRequestSurface: Send + Sync {
    /// Show the standard prompt for `capabilities` and report what the user
    /// decided for each one.
    fn request_runtime(
        &self,
        capabilities: &[Capability],
    ) -> impl Future<Output = HashMap<Capability, bool>> + Send;

    /// Open a settings screen and complete when the user returns from it.
    fn open_remediation(&self, target: RemediationTarget) -> impl Future<Output = ()> + Send;

    /// Ask the platform to revoke `capabilities` once the process dies.
    ///
    /// Returns whether the platform accepted. The default refuses.
    fn revoke_on_kill(&self, capabilities: &[Capability]) -> bool {
        let _ = capabilities;
        false
    }
}
