//! The read-only view of live platform state the resolver consults.

use crate::Capability;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Settings-surface state that is observable but not reported through the
/// standard grant check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SpecialProbe {
    /// The app may post notifications.
    NotificationsEnabled,
    /// Usage-stats app-op is allowed.
    UsageStats,
    /// The app's notification listener is enabled.
    NotificationListener,
    /// VPN consent has already been given.
    VpnPrepared,
    /// The app may draw overlays.
    Overlay,
    /// The app may modify system settings.
    WriteSettings,
    /// Do-not-disturb policy access is granted.
    NotificationPolicy,
    /// The app is exempt from battery optimizations.
    IgnoringBatteryOptimizations,
    /// The app may install packages.
    InstallPackages,
    /// Picture-in-picture app-op is allowed.
    PictureInPicture,
    /// Legacy (pre-scoped) external storage is in effect.
    LegacyStorage,
    /// The app is an all-files storage manager.
    StorageManager,
    /// The app may schedule exact alarms.
    ExactAlarm,
}

/// Where a user must go to fix a capability.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RemediationTarget {
    /// A dedicated settings screen, identified by its platform action.
    Settings { action: &'static str },
    /// The application's generic details screen.
    AppDetails,
}

impl RemediationTarget {
    pub fn settings(action: &'static str) -> Self {
        Self::Settings { action }
    }

    pub fn is_app_details(&self) -> bool {
        matches!(self, Self::AppDetails)
    }
}

impl fmt::Display for RemediationTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Settings { action } => f.write_str(action),
            Self::AppDetails => f.write_str("android.settings.APPLICATION_DETAILS_SETTINGS"),
        }
    }
}

/// Live platform truth.
///
/// Supplied by the host. Every method is a point-in-time observation; the
/// resolver never caches answers because the user may change settings
/// between calls.
pub trait PlatformQuery: Send + Sync {
    /// Whether the platform currently reports `capability` as granted.
    fn is_granted(&self, capability: Capability) -> bool;

    /// Whether the platform would show a rationale before prompting again.
    fn should_show_rationale(&self, capability: Capability) -> bool;

    /// Observe a settings-surface state.
    fn probe(&self, probe: SpecialProbe) -> bool;

    /// Whether `target` can be opened on this device.
    ///
    /// Defaults to `true`; hosts override it when a settings screen may be
    /// missing (vendor builds often strip them).
    fn can_request_special(&self, target: &RemediationTarget) -> bool {
        let _ = target;
        true
    }
}

impl<T: PlatformQuery + ?Sized> PlatformQuery for Arc<T> {
    fn is_granted(&self, capability: Capability) -> bool {
        (**self).is_granted(capability)
    }

    fn should_show_rationale(&self, capability: Capability) -> bool {
        (**self).should_show_rationale(capability)
    }

    fn probe(&self, probe: SpecialProbe) -> bool {
        (**self).probe(probe)
    }

    fn can_request_special(&self, target: &RemediationTarget) -> bool {
        (**self).can_request_special(target)
    }
}

impl<T: PlatformQuery + ?Sized> PlatformQuery for &T {
    fn is_granted(&self, capability: Capability) -> bool {
        (**self).is_granted(capability)
    }

    fn should_show_rationale(&self, capability: Capability) -> bool {
        (**self).should_show_rationale(capability)
    }

    fn probe(&self, probe: SpecialProbe) -> bool {
        (**self).probe(probe)
    }

    fn can_request_special(&self, target: &RemediationTarget) -> bool {
        (**self).can_request_special(target)
    }
}
