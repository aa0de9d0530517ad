//! Version-scoped rule sets.
//!
//! Each rule set covers one platform threshold and answers, for the
//! operations it overrides, with a [`Rule`]: a small declarative description
//! of how to compute the answer. Returning `None` delegates the whole
//! decision to the next older rule set. Rules are plain data, so every
//! threshold can be inspected and tested without a platform.

use crate::{ApiLevel, Capability, ResolutionContext, SpecialProbe};
use serde::Serialize;
use std::fmt;

/// The question being resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    IsGranted,
    IsPermanentlyRefused,
    RemediationTarget,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Operation::IsGranted => "is_granted",
            Operation::IsPermanentlyRefused => "is_permanently_refused",
            Operation::RemediationTarget => "remediation_target",
        })
    }
}

/// How a rule set answers one operation for one capability.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rule {
    // is_granted
    /// Ask the platform's grant check for the capability itself.
    Direct,
    /// Implicitly granted on this runtime.
    AutoGranted,
    /// Granted exactly when another capability is.
    Proxy(Capability),
    /// Granted when every listed capability is.
    AllOf(&'static [Capability]),
    /// Granted when any listed capability is.
    AnyOf(&'static [Capability]),
    /// A settings-surface probe.
    Probe(SpecialProbe),
    /// The probe holds and every listed capability is granted.
    Gated(SpecialProbe, &'static [Capability]),
    /// Any listed companion is granted, and so is the capability itself.
    CompanionAnd(&'static [Capability]),

    // is_permanently_refused
    /// No prompt-based refusal exists.
    NeverRefused,
    /// Not granted and the platform would not show a rationale.
    Prompted,
    /// [`Rule::Prompted`] evaluated on another capability.
    ProxyRefused(Capability),
    /// With no companion granted, refused when no companion would show a
    /// rationale; otherwise [`Rule::Prompted`].
    CompanionRefused(&'static [Capability]),
    /// Any companion is granted and [`Rule::Prompted`] holds.
    GatedPrompt(&'static [Capability]),

    // remediation_target
    /// Candidate settings actions, first openable wins; app details otherwise.
    Settings(&'static [&'static str]),
    /// The application's details screen.
    AppDetails,
}

impl Rule {
    /// The operation this rule can answer.
    pub fn answers(&self) -> Operation {
        match self {
            Rule::Direct
            | Rule::AutoGranted
            | Rule::Proxy(_)
            | Rule::AllOf(_)
            | Rule::AnyOf(_)
            | Rule::Probe(_)
            | Rule::Gated(..)
            | Rule::CompanionAnd(_) => Operation::IsGranted,
            Rule::NeverRefused
            | Rule::Prompted
            | Rule::ProxyRefused(_)
            | Rule::CompanionRefused(_)
            | Rule::GatedPrompt(_) => Operation::IsPermanentlyRefused,
            Rule::Settings(_) | Rule::AppDetails => Operation::RemediationTarget,
        }
    }
}

/// One node of the resolver chain.
pub trait RuleSet: Send + Sync + fmt::Debug {
    /// Short name used in logs.
    fn name(&self) -> &'static str;

    /// Lowest runtime level at which this rule set applies.
    fn threshold(&self) -> ApiLevel;

    /// The rule for `op` on `capability`, or `None` to delegate.
    fn rule(&self, capability: Capability, op: Operation, ctx: &ResolutionContext)
    -> Option<Rule>;

    /// Whether this rule set fully handles `op` for `capability`.
    fn handles(&self, capability: Capability, op: Operation, ctx: &ResolutionContext) -> bool {
        self.rule(capability, op, ctx).is_some()
    }
}

/// Settings actions used by remediation rules.
pub mod action {
    pub const APP_NOTIFICATION_SETTINGS: &str = "android.settings.APP_NOTIFICATION_SETTINGS";
    pub const USAGE_ACCESS_SETTINGS: &str = "android.settings.USAGE_ACCESS_SETTINGS";
    pub const NOTIFICATION_LISTENER_SETTINGS: &str =
        "android.settings.ACTION_NOTIFICATION_LISTENER_SETTINGS";
    pub const VPN_PREPARE: &str = "android.net.vpn.PREPARE";
    pub const MANAGE_OVERLAY_PERMISSION: &str = "android.settings.action.MANAGE_OVERLAY_PERMISSION";
    pub const MANAGE_WRITE_SETTINGS: &str = "android.settings.action.MANAGE_WRITE_SETTINGS";
    pub const NOTIFICATION_POLICY_ACCESS_DETAIL_SETTINGS: &str =
        "android.settings.NOTIFICATION_POLICY_ACCESS_DETAIL_SETTINGS";
    pub const NOTIFICATION_POLICY_ACCESS_SETTINGS: &str =
        "android.settings.NOTIFICATION_POLICY_ACCESS_SETTINGS";
    pub const REQUEST_IGNORE_BATTERY_OPTIMIZATIONS: &str =
        "android.settings.REQUEST_IGNORE_BATTERY_OPTIMIZATIONS";
    pub const IGNORE_BATTERY_OPTIMIZATION_SETTINGS: &str =
        "android.settings.IGNORE_BATTERY_OPTIMIZATION_SETTINGS";
    pub const MANAGE_UNKNOWN_APP_SOURCES: &str = "android.settings.MANAGE_UNKNOWN_APP_SOURCES";
    pub const PICTURE_IN_PICTURE_SETTINGS: &str = "android.settings.PICTURE_IN_PICTURE_SETTINGS";
    pub const MANAGE_APP_ALL_FILES_ACCESS_PERMISSION: &str =
        "android.settings.MANAGE_APP_ALL_FILES_ACCESS_PERMISSION";
    pub const MANAGE_ALL_FILES_ACCESS_PERMISSION: &str =
        "android.settings.MANAGE_ALL_FILES_ACCESS_PERMISSION";
    pub const REQUEST_SCHEDULE_EXACT_ALARM: &str = "android.settings.REQUEST_SCHEDULE_EXACT_ALARM";
}

use Capability as C;
use Operation as Op;

const FINE: &[Capability] = &[C::AccessFineLocation];
const FINE_OR_COARSE: &[Capability] = &[C::AccessFineLocation, C::AccessCoarseLocation];
const BODY_SENSORS: &[Capability] = &[C::BodySensors];
const READ_WRITE_STORAGE: &[Capability] = &[C::ReadExternalStorage, C::WriteExternalStorage];
const READ_STORAGE: &[Capability] = &[C::ReadExternalStorage];
const READ_STORAGE_OR_MANAGER: &[Capability] = &[C::ReadExternalStorage, C::ManageExternalStorage];
const MEDIA_IMAGES_OR_MANAGER: &[Capability] = &[C::ReadMediaImages, C::ManageExternalStorage];

/// What counts as "can read shared storage" for media-location purposes.
fn read_storage_companions(ctx: &ResolutionContext) -> &'static [Capability] {
    if ctx.both_at_least(ApiLevel::ANDROID_13) {
        MEDIA_IMAGES_OR_MANAGER
    } else if ctx.both_at_least(ApiLevel::ANDROID_11) {
        READ_STORAGE_OR_MANAGER
    } else {
        READ_STORAGE
    }
}

fn is_read_media(capability: Capability) -> bool {
    matches!(
        capability,
        C::ReadMediaImages | C::ReadMediaVideo | C::ReadMediaAudio
    )
}

/// Rules that hold on every supported runtime.
#[derive(Debug, Default)]
pub struct Baseline;

impl RuleSet for Baseline {
    fn name(&self) -> &'static str {
        "baseline"
    }

    fn threshold(&self) -> ApiLevel {
        ApiLevel::ANDROID_4_0
    }

    fn rule(&self, capability: Capability, op: Operation, ctx: &ResolutionContext) -> Option<Rule> {
        let pre_13_notifications =
            capability == C::PostNotifications && !ctx.runtime_at_least(ApiLevel::ANDROID_13);
        let rule = match op {
            Op::IsGranted => match capability {
                C::NotificationService => Rule::Probe(SpecialProbe::NotificationsEnabled),
                C::PackageUsageStats => Rule::Probe(SpecialProbe::UsageStats),
                C::BindNotificationListenerService => {
                    Rule::Probe(SpecialProbe::NotificationListener)
                }
                C::BindVpnService => Rule::Probe(SpecialProbe::VpnPrepared),
                _ if pre_13_notifications => Rule::Probe(SpecialProbe::NotificationsEnabled),
                _ => Rule::AutoGranted,
            },
            Op::IsPermanentlyRefused => Rule::NeverRefused,
            Op::RemediationTarget => match capability {
                C::NotificationService if ctx.runtime_at_least(ApiLevel::ANDROID_8) => {
                    Rule::Settings(&[action::APP_NOTIFICATION_SETTINGS])
                }
                C::PostNotifications if ctx.runtime_at_least(ApiLevel::ANDROID_8) => {
                    Rule::Settings(&[action::APP_NOTIFICATION_SETTINGS])
                }
                C::PackageUsageStats if ctx.runtime_at_least(ApiLevel::ANDROID_5) => {
                    Rule::Settings(&[action::USAGE_ACCESS_SETTINGS])
                }
                C::BindNotificationListenerService => {
                    Rule::Settings(&[action::NOTIFICATION_LISTENER_SETTINGS])
                }
                C::BindVpnService => Rule::Settings(&[action::VPN_PREPARE]),
                _ => Rule::AppDetails,
            },
        };
        Some(rule)
    }
}

/// Android 6: runtime prompts, the first settings-surface checks, and the
/// back-compat mapping for every capability introduced later.
#[derive(Debug, Default)]
pub struct V6;

impl RuleSet for V6 {
    fn name(&self) -> &'static str {
        "v6"
    }

    fn threshold(&self) -> ApiLevel {
        ApiLevel::ANDROID_6
    }

    fn rule(&self, capability: Capability, op: Operation, ctx: &ResolutionContext) -> Option<Rule> {
        let below = |level: ApiLevel| ctx.runtime < level;
        match op {
            Op::IsGranted => match capability {
                C::SystemAlertWindow => Some(Rule::Probe(SpecialProbe::Overlay)),
                C::WriteSettings => Some(Rule::Probe(SpecialProbe::WriteSettings)),
                C::AccessNotificationPolicy => Some(Rule::Probe(SpecialProbe::NotificationPolicy)),
                C::RequestIgnoreBatteryOptimizations => {
                    Some(Rule::Probe(SpecialProbe::IgnoringBatteryOptimizations))
                }
                C::ManageExternalStorage if below(ApiLevel::ANDROID_11) => {
                    Some(Rule::AllOf(READ_WRITE_STORAGE))
                }
                c if c.is_special() => None,

                C::PostNotifications if below(ApiLevel::ANDROID_13) => None,
                C::NearbyWifiDevices if below(ApiLevel::ANDROID_13) => {
                    Some(Rule::Proxy(C::AccessFineLocation))
                }
                C::BodySensorsBackground if below(ApiLevel::ANDROID_13) => {
                    Some(Rule::Proxy(C::BodySensors))
                }
                c if is_read_media(c) && below(ApiLevel::ANDROID_13) => {
                    Some(Rule::Proxy(C::ReadExternalStorage))
                }

                C::BluetoothScan if below(ApiLevel::ANDROID_12) => {
                    Some(Rule::Proxy(C::AccessFineLocation))
                }
                C::BluetoothConnect | C::BluetoothAdvertise if below(ApiLevel::ANDROID_12) => {
                    Some(Rule::AutoGranted)
                }

                C::AccessBackgroundLocation if below(ApiLevel::ANDROID_10) => {
                    Some(Rule::AnyOf(FINE_OR_COARSE))
                }
                C::ActivityRecognition if below(ApiLevel::ANDROID_10) => Some(Rule::AutoGranted),
                C::AccessMediaLocation if below(ApiLevel::ANDROID_10) => {
                    Some(Rule::Proxy(C::ReadExternalStorage))
                }

                C::AcceptHandover if below(ApiLevel::ANDROID_9) => Some(Rule::AutoGranted),

                C::AnswerPhoneCalls if below(ApiLevel::ANDROID_8) => Some(Rule::AutoGranted),
                C::ReadPhoneNumbers if below(ApiLevel::ANDROID_8) => {
                    Some(Rule::Proxy(C::ReadPhoneState))
                }

                _ => Some(Rule::Direct),
            },
            Op::IsPermanentlyRefused => match capability {
                c if c.is_special() => Some(Rule::NeverRefused),

                C::PostNotifications if below(ApiLevel::ANDROID_13) => None,
                C::NearbyWifiDevices if below(ApiLevel::ANDROID_13) => {
                    Some(Rule::ProxyRefused(C::AccessFineLocation))
                }
                C::BodySensorsBackground if below(ApiLevel::ANDROID_13) => {
                    Some(Rule::ProxyRefused(C::BodySensors))
                }
                c if is_read_media(c) && below(ApiLevel::ANDROID_13) => {
                    Some(Rule::ProxyRefused(C::ReadExternalStorage))
                }

                C::BluetoothScan if below(ApiLevel::ANDROID_12) => {
                    Some(Rule::ProxyRefused(C::AccessFineLocation))
                }
                C::BluetoothConnect | C::BluetoothAdvertise if below(ApiLevel::ANDROID_12) => {
                    Some(Rule::NeverRefused)
                }

                C::AccessBackgroundLocation if below(ApiLevel::ANDROID_10) => {
                    Some(Rule::CompanionRefused(FINE_OR_COARSE))
                }
                C::ActivityRecognition if below(ApiLevel::ANDROID_10) => Some(Rule::NeverRefused),
                C::AccessMediaLocation if below(ApiLevel::ANDROID_10) => {
                    Some(Rule::ProxyRefused(C::ReadExternalStorage))
                }

                C::AcceptHandover if below(ApiLevel::ANDROID_9) => Some(Rule::NeverRefused),

                C::AnswerPhoneCalls if below(ApiLevel::ANDROID_8) => Some(Rule::NeverRefused),
                C::ReadPhoneNumbers if below(ApiLevel::ANDROID_8) => {
                    Some(Rule::ProxyRefused(C::ReadPhoneState))
                }

                _ => Some(Rule::Prompted),
            },
            Op::RemediationTarget => match capability {
                C::SystemAlertWindow => Some(Rule::Settings(&[action::MANAGE_OVERLAY_PERMISSION])),
                C::WriteSettings => Some(Rule::Settings(&[action::MANAGE_WRITE_SETTINGS])),
                C::AccessNotificationPolicy => Some(Rule::Settings(&[
                    action::NOTIFICATION_POLICY_ACCESS_DETAIL_SETTINGS,
                    action::NOTIFICATION_POLICY_ACCESS_SETTINGS,
                ])),
                C::RequestIgnoreBatteryOptimizations => Some(Rule::Settings(&[
                    action::REQUEST_IGNORE_BATTERY_OPTIMIZATIONS,
                    action::IGNORE_BATTERY_OPTIMIZATION_SETTINGS,
                ])),
                _ => None,
            },
        }
    }
}

/// Android 8: install-packages and picture-in-picture checks, phone
/// capabilities become real grants.
#[derive(Debug, Default)]
pub struct V8;

impl RuleSet for V8 {
    fn name(&self) -> &'static str {
        "v8"
    }

    fn threshold(&self) -> ApiLevel {
        ApiLevel::ANDROID_8
    }

    fn rule(&self, capability: Capability, op: Operation, _ctx: &ResolutionContext) -> Option<Rule> {
        match (op, capability) {
            (Op::IsGranted, C::RequestInstallPackages) => {
                Some(Rule::Probe(SpecialProbe::InstallPackages))
            }
            (Op::IsGranted, C::PictureInPicture) => Some(Rule::Probe(SpecialProbe::PictureInPicture)),
            (Op::IsGranted, C::ReadPhoneNumbers | C::AnswerPhoneCalls) => Some(Rule::Direct),

            (Op::IsPermanentlyRefused, C::RequestInstallPackages | C::PictureInPicture) => {
                Some(Rule::NeverRefused)
            }
            (Op::IsPermanentlyRefused, C::ReadPhoneNumbers | C::AnswerPhoneCalls) => {
                Some(Rule::Prompted)
            }

            (Op::RemediationTarget, C::RequestInstallPackages) => {
                Some(Rule::Settings(&[action::MANAGE_UNKNOWN_APP_SOURCES]))
            }
            (Op::RemediationTarget, C::PictureInPicture) => {
                Some(Rule::Settings(&[action::PICTURE_IN_PICTURE_SETTINGS]))
            }
            _ => None,
        }
    }
}

/// Android 9: call handover becomes a real grant.
#[derive(Debug, Default)]
pub struct V9;

impl RuleSet for V9 {
    fn name(&self) -> &'static str {
        "v9"
    }

    fn threshold(&self) -> ApiLevel {
        ApiLevel::ANDROID_9
    }

    fn rule(&self, capability: Capability, op: Operation, _ctx: &ResolutionContext) -> Option<Rule> {
        match (op, capability) {
            (Op::IsGranted, C::AcceptHandover) => Some(Rule::Direct),
            (Op::IsPermanentlyRefused, C::AcceptHandover) => Some(Rule::Prompted),
            _ => None,
        }
    }
}

/// Android 10: background location, activity recognition and media
/// location; legacy storage decides all-files access before 11.
#[derive(Debug, Default)]
pub struct V10;

impl RuleSet for V10 {
    fn name(&self) -> &'static str {
        "v10"
    }

    fn threshold(&self) -> ApiLevel {
        ApiLevel::ANDROID_10
    }

    fn rule(&self, capability: Capability, op: Operation, ctx: &ResolutionContext) -> Option<Rule> {
        match (op, capability) {
            (Op::IsGranted, C::AccessMediaLocation) => {
                Some(Rule::CompanionAnd(read_storage_companions(ctx)))
            }
            (Op::IsGranted, C::AccessBackgroundLocation | C::ActivityRecognition) => {
                Some(Rule::Direct)
            }
            (Op::IsGranted, C::ManageExternalStorage) if ctx.runtime < ApiLevel::ANDROID_11 => {
                Some(Rule::Gated(SpecialProbe::LegacyStorage, READ_WRITE_STORAGE))
            }

            (Op::IsPermanentlyRefused, C::AccessBackgroundLocation) => {
                Some(Rule::CompanionRefused(FINE))
            }
            (Op::IsPermanentlyRefused, C::AccessMediaLocation) => {
                Some(Rule::GatedPrompt(read_storage_companions(ctx)))
            }
            (Op::IsPermanentlyRefused, C::ActivityRecognition) => Some(Rule::Prompted),
            _ => None,
        }
    }
}

/// Android 11: all-files access becomes a settings surface of its own.
#[derive(Debug, Default)]
pub struct V11;

impl RuleSet for V11 {
    fn name(&self) -> &'static str {
        "v11"
    }

    fn threshold(&self) -> ApiLevel {
        ApiLevel::ANDROID_11
    }

    fn rule(&self, capability: Capability, op: Operation, _ctx: &ResolutionContext) -> Option<Rule> {
        if capability != C::ManageExternalStorage {
            return None;
        }
        Some(match op {
            Op::IsGranted => Rule::Probe(SpecialProbe::StorageManager),
            Op::IsPermanentlyRefused => Rule::NeverRefused,
            Op::RemediationTarget => Rule::Settings(&[
                action::MANAGE_APP_ALL_FILES_ACCESS_PERMISSION,
                action::MANAGE_ALL_FILES_ACCESS_PERMISSION,
            ]),
        })
    }
}

/// Android 12: exact alarms, the bluetooth trio, and approximate-location
/// aware background refusal.
#[derive(Debug, Default)]
pub struct V12;

impl RuleSet for V12 {
    fn name(&self) -> &'static str {
        "v12"
    }

    fn threshold(&self) -> ApiLevel {
        ApiLevel::ANDROID_12
    }

    fn rule(&self, capability: Capability, op: Operation, ctx: &ResolutionContext) -> Option<Rule> {
        match (op, capability) {
            (Op::IsGranted, C::ScheduleExactAlarm) => Some(Rule::Probe(SpecialProbe::ExactAlarm)),
            (Op::IsGranted, C::BluetoothScan | C::BluetoothConnect | C::BluetoothAdvertise) => {
                Some(Rule::Direct)
            }

            (Op::IsPermanentlyRefused, C::ScheduleExactAlarm) => Some(Rule::NeverRefused),
            (
                Op::IsPermanentlyRefused,
                C::BluetoothScan | C::BluetoothConnect | C::BluetoothAdvertise,
            ) => Some(Rule::Prompted),
            (Op::IsPermanentlyRefused, C::AccessBackgroundLocation)
                if ctx.target >= ApiLevel::ANDROID_12 =>
            {
                Some(Rule::CompanionRefused(FINE_OR_COARSE))
            }

            (Op::RemediationTarget, C::ScheduleExactAlarm) => {
                Some(Rule::Settings(&[action::REQUEST_SCHEDULE_EXACT_ALARM]))
            }
            _ => None,
        }
    }
}

/// Android 13: notifications, nearby wifi, granular media and background
/// body sensors become real grants.
#[derive(Debug, Default)]
pub struct V13;

impl RuleSet for V13 {
    fn name(&self) -> &'static str {
        "v13"
    }

    fn threshold(&self) -> ApiLevel {
        ApiLevel::ANDROID_13
    }

    fn rule(&self, capability: Capability, op: Operation, _ctx: &ResolutionContext) -> Option<Rule> {
        let plain = matches!(capability, C::PostNotifications | C::NearbyWifiDevices)
            || is_read_media(capability);
        match (op, capability) {
            (Op::IsGranted, C::BodySensorsBackground) => Some(Rule::CompanionAnd(BODY_SENSORS)),
            (Op::IsPermanentlyRefused, C::BodySensorsBackground) => {
                Some(Rule::CompanionRefused(BODY_SENSORS))
            }
            (Op::IsGranted, _) if plain => Some(Rule::Direct),
            (Op::IsPermanentlyRefused, _) if plain => Some(Rule::Prompted),
            _ => None,
        }
    }
}
