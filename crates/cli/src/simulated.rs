//! An in-memory platform driven by the device profile.

use crate::config::{Config, GrantState};
use policy::{Capability, PlatformQuery, RemediationTarget, SpecialProbe, rules::action};
use runtime::PlatformRequestSurface;
use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard};
use tracing::info;

#[derive(Debug, Default)]
struct DeviceState {
    granted: HashSet<Capability>,
    rationale: HashSet<Capability>,
    refused: HashSet<Capability>,
    probes: HashSet<SpecialProbe>,
    missing_screens: HashSet<String>,
    revoke_on_kill: Vec<Capability>,
}

/// A device whose user answers every prompt the same way.
#[derive(Debug)]
pub struct SimulatedPlatform {
    state: Mutex<DeviceState>,
    user_accepts: bool,
}

impl SimulatedPlatform {
    pub fn from_config(config: &Config) -> Self {
        let mut state = DeviceState::default();
        for (capability, grant) in &config.grants {
            match grant {
                GrantState::Granted => {
                    state.granted.insert(*capability);
                }
                GrantState::Denied => {
                    state.rationale.insert(*capability);
                }
                GrantState::PermanentlyDenied => {
                    state.refused.insert(*capability);
                }
            }
        }
        state.probes.extend(config.special.enabled.iter().copied());
        state
            .missing_screens
            .extend(config.special.missing_screens.iter().cloned());
        Self {
            state: Mutex::new(state),
            user_accepts: config.behavior.user_accepts,
        }
    }

    fn state(&self) -> MutexGuard<'_, DeviceState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Capabilities queued for revocation on process death.
    pub fn pending_revocations(&self) -> Vec<Capability> {
        self.state().revoke_on_kill.clone()
    }
}

/// The probe a settings screen toggles.
fn probe_for_action(action: &str) -> Option<SpecialProbe> {
    let probe = match action {
        action::APP_NOTIFICATION_SETTINGS => SpecialProbe::NotificationsEnabled,
        action::USAGE_ACCESS_SETTINGS => SpecialProbe::UsageStats,
        action::NOTIFICATION_LISTENER_SETTINGS => SpecialProbe::NotificationListener,
        action::VPN_PREPARE => SpecialProbe::VpnPrepared,
        action::MANAGE_OVERLAY_PERMISSION => SpecialProbe::Overlay,
        action::MANAGE_WRITE_SETTINGS => SpecialProbe::WriteSettings,
        action::NOTIFICATION_POLICY_ACCESS_DETAIL_SETTINGS
        | action::NOTIFICATION_POLICY_ACCESS_SETTINGS => SpecialProbe::NotificationPolicy,
        action::REQUEST_IGNORE_BATTERY_OPTIMIZATIONS
        | action::IGNORE_BATTERY_OPTIMIZATION_SETTINGS => {
            SpecialProbe::IgnoringBatteryOptimizations
        }
        action::MANAGE_UNKNOWN_APP_SOURCES => SpecialProbe::InstallPackages,
        action::PICTURE_IN_PICTURE_SETTINGS => SpecialProbe::PictureInPicture,
        action::MANAGE_APP_ALL_FILES_ACCESS_PERMISSION
        | action::MANAGE_ALL_FILES_ACCESS_PERMISSION => SpecialProbe::StorageManager,
        action::REQUEST_SCHEDULE_EXACT_ALARM => SpecialProbe::ExactAlarm,
        _ => return None,
    };
    Some(probe)
}

impl PlatformQuery for SimulatedPlatform {
    fn is_granted(&self, capability: Capability) -> bool {
        self.state().granted.contains(&capability)
    }

    fn should_show_rationale(&self, capability: Capability) -> bool {
        self.state().rationale.contains(&capability)
    }

    fn probe(&self, probe: SpecialProbe) -> bool {
        self.state().probes.contains(&probe)
    }

    fn can_request_special(&self, target: &RemediationTarget) -> bool {
        match target {
            RemediationTarget::Settings { action } => !self.state().missing_screens.contains(*action),
            RemediationTarget::AppDetails => true,
        }
    }
}

impl PlatformRequestSurface for SimulatedPlatform {
    async fn request_runtime(&self, capabilities: &[Capability]) -> HashMap<Capability, bool> {
        let mut state = self.state();
        let mut results = HashMap::with_capacity(capabilities.len());
        for capability in capabilities {
            let granted = state.granted.contains(capability)
                || (self.user_accepts && !state.refused.contains(capability));
            if granted {
                state.granted.insert(*capability);
                state.rationale.remove(capability);
            } else if state.rationale.remove(capability) {
                // A second denial stops the platform from asking again.
                state.refused.insert(*capability);
            } else if !state.refused.contains(capability) {
                state.rationale.insert(*capability);
            }
            results.insert(*capability, granted);
        }
        info!(?capabilities, ?results, "prompt shown");
        results
    }

    async fn open_remediation(&self, target: RemediationTarget) {
        info!(%target, accepted = self.user_accepts, "settings opened");
        if !self.user_accepts {
            return;
        }
        let mut state = self.state();
        match target {
            RemediationTarget::Settings { action } => {
                if let Some(probe) = probe_for_action(action) {
                    state.probes.insert(probe);
                }
            }
            RemediationTarget::AppDetails => {
                // The user flips every switch on the details screen.
                let refused: Vec<_> = state.refused.drain().collect();
                state.granted.extend(refused);
            }
        }
    }

    fn revoke_on_kill(&self, capabilities: &[Capability]) -> bool {
        self.state().revoke_on_kill.extend_from_slice(capabilities);
        true
    }
}
