//! The closed catalog of known capabilities.
//!
//! Every capability the system can reason about is a variant of
//! [`Capability`]. Identifiers are the platform's permission strings; parsing
//! an identifier outside the catalog fails with [`Error::UnknownCapability`].

use crate::{ApiLevel, Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// How a capability is granted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CapabilityKind {
    /// Grantable through the standard in-place platform prompt.
    Runtime,
    /// Grantable only through a dedicated settings surface.
    Special,
}

macro_rules! catalog {
    ($( $(#[$meta:meta])* $variant:ident => $id:literal, $kind:ident, $level:ident; )+) => {
        /// A guarded platform capability.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(try_from = "String", into = "&'static str")]
        pub enum Capability {
            $( $(#[$meta])* $variant, )+
        }

        impl Capability {
            /// Every capability in the catalog, in declaration order.
            pub const ALL: &'static [Capability] = &[ $( Capability::$variant, )+ ];

            /// The stable platform identifier.
            pub const fn as_str(self) -> &'static str {
                match self {
                    $( Capability::$variant => $id, )+
                }
            }

            /// Runtime or Special.
            pub const fn kind(self) -> CapabilityKind {
                match self {
                    $( Capability::$variant => CapabilityKind::$kind, )+
                }
            }

            /// The first platform level on which this capability exists.
            pub const fn introduced_at(self) -> ApiLevel {
                match self {
                    $( Capability::$variant => ApiLevel::$level, )+
                }
            }

            /// Look up a capability by its platform identifier.
            pub fn parse(id: &str) -> Result<Self> {
                match id {
                    $( $id => Ok(Capability::$variant), )+
                    other => Err(Error::UnknownCapability(other.to_string())),
                }
            }
        }
    };
}

catalog! {
    // Special capabilities, newest first.
    ScheduleExactAlarm => "android.permission.SCHEDULE_EXACT_ALARM", Special, ANDROID_12;
    ManageExternalStorage => "android.permission.MANAGE_EXTERNAL_STORAGE", Special, ANDROID_11;
    RequestInstallPackages => "android.permission.REQUEST_INSTALL_PACKAGES", Special, ANDROID_8;
    PictureInPicture => "android.permission.PICTURE_IN_PICTURE", Special, ANDROID_8;
    SystemAlertWindow => "android.permission.SYSTEM_ALERT_WINDOW", Special, ANDROID_6;
    WriteSettings => "android.permission.WRITE_SETTINGS", Special, ANDROID_6;
    RequestIgnoreBatteryOptimizations => "android.permission.REQUEST_IGNORE_BATTERY_OPTIMIZATIONS", Special, ANDROID_6;
    AccessNotificationPolicy => "android.permission.ACCESS_NOTIFICATION_POLICY", Special, ANDROID_6;
    PackageUsageStats => "android.permission.PACKAGE_USAGE_STATS", Special, ANDROID_5;
    BindNotificationListenerService => "android.permission.BIND_NOTIFICATION_LISTENER_SERVICE", Special, ANDROID_4_3;
    BindVpnService => "android.permission.BIND_VPN_SERVICE", Special, ANDROID_4_0;
    NotificationService => "android.permission.NOTIFICATION_SERVICE", Special, ANDROID_4_0;

    // Runtime capabilities added in 13.
    PostNotifications => "android.permission.POST_NOTIFICATIONS", Runtime, ANDROID_13;
    NearbyWifiDevices => "android.permission.NEARBY_WIFI_DEVICES", Runtime, ANDROID_13;
    BodySensorsBackground => "android.permission.BODY_SENSORS_BACKGROUND", Runtime, ANDROID_13;
    ReadMediaImages => "android.permission.READ_MEDIA_IMAGES", Runtime, ANDROID_13;
    ReadMediaVideo => "android.permission.READ_MEDIA_VIDEO", Runtime, ANDROID_13;
    ReadMediaAudio => "android.permission.READ_MEDIA_AUDIO", Runtime, ANDROID_13;

    // 12
    BluetoothScan => "android.permission.BLUETOOTH_SCAN", Runtime, ANDROID_12;
    BluetoothConnect => "android.permission.BLUETOOTH_CONNECT", Runtime, ANDROID_12;
    BluetoothAdvertise => "android.permission.BLUETOOTH_ADVERTISE", Runtime, ANDROID_12;

    // 10
    AccessBackgroundLocation => "android.permission.ACCESS_BACKGROUND_LOCATION", Runtime, ANDROID_10;
    ActivityRecognition => "android.permission.ACTIVITY_RECOGNITION", Runtime, ANDROID_10;
    AccessMediaLocation => "android.permission.ACCESS_MEDIA_LOCATION", Runtime, ANDROID_10;

    // 9
    AcceptHandover => "android.permission.ACCEPT_HANDOVER", Runtime, ANDROID_9;

    // 8
    ReadPhoneNumbers => "android.permission.READ_PHONE_NUMBERS", Runtime, ANDROID_8;
    AnswerPhoneCalls => "android.permission.ANSWER_PHONE_CALLS", Runtime, ANDROID_8;

    // Baseline runtime capabilities.
    ReadExternalStorage => "android.permission.READ_EXTERNAL_STORAGE", Runtime, ANDROID_6;
    WriteExternalStorage => "android.permission.WRITE_EXTERNAL_STORAGE", Runtime, ANDROID_6;
    Camera => "android.permission.CAMERA", Runtime, ANDROID_6;
    RecordAudio => "android.permission.RECORD_AUDIO", Runtime, ANDROID_6;
    AccessFineLocation => "android.permission.ACCESS_FINE_LOCATION", Runtime, ANDROID_6;
    AccessCoarseLocation => "android.permission.ACCESS_COARSE_LOCATION", Runtime, ANDROID_6;
    ReadContacts => "android.permission.READ_CONTACTS", Runtime, ANDROID_6;
    WriteContacts => "android.permission.WRITE_CONTACTS", Runtime, ANDROID_6;
    GetAccounts => "android.permission.GET_ACCOUNTS", Runtime, ANDROID_6;
    ReadCalendar => "android.permission.READ_CALENDAR", Runtime, ANDROID_6;
    WriteCalendar => "android.permission.WRITE_CALENDAR", Runtime, ANDROID_6;
    ReadPhoneState => "android.permission.READ_PHONE_STATE", Runtime, ANDROID_6;
    CallPhone => "android.permission.CALL_PHONE", Runtime, ANDROID_6;
    ReadCallLog => "android.permission.READ_CALL_LOG", Runtime, ANDROID_6;
    WriteCallLog => "android.permission.WRITE_CALL_LOG", Runtime, ANDROID_6;
    AddVoicemail => "com.android.voicemail.permission.ADD_VOICEMAIL", Runtime, ANDROID_6;
    UseSip => "android.permission.USE_SIP", Runtime, ANDROID_6;
    ProcessOutgoingCalls => "android.permission.PROCESS_OUTGOING_CALLS", Runtime, ANDROID_6;
    BodySensors => "android.permission.BODY_SENSORS", Runtime, ANDROID_6;
    SendSms => "android.permission.SEND_SMS", Runtime, ANDROID_6;
    ReceiveSms => "android.permission.RECEIVE_SMS", Runtime, ANDROID_6;
    ReadSms => "android.permission.READ_SMS", Runtime, ANDROID_6;
    ReceiveWapPush => "android.permission.RECEIVE_WAP_PUSH", Runtime, ANDROID_6;
    ReceiveMms => "android.permission.RECEIVE_MMS", Runtime, ANDROID_6;
}

/// Capabilities with a dedicated orchestration stage, in chain order.
///
/// The first seven mirror the platform's historical request order; the
/// remaining settings-only capabilities follow.
pub const DEDICATED_STAGE_ORDER: &[Capability] = &[
    Capability::AccessBackgroundLocation,
    Capability::SystemAlertWindow,
    Capability::WriteSettings,
    Capability::ManageExternalStorage,
    Capability::RequestInstallPackages,
    Capability::PostNotifications,
    Capability::BodySensorsBackground,
    Capability::ScheduleExactAlarm,
    Capability::PictureInPicture,
    Capability::AccessNotificationPolicy,
    Capability::RequestIgnoreBatteryOptimizations,
    Capability::PackageUsageStats,
    Capability::BindNotificationListenerService,
    Capability::BindVpnService,
    Capability::NotificationService,
];

impl Capability {
    /// Whether this is a settings-surface capability.
    pub fn is_special(self) -> bool {
        self.kind() == CapabilityKind::Special
    }

    /// Whether this capability exists as a distinct grant on `runtime`.
    pub fn exists_on(self, runtime: ApiLevel) -> bool {
        runtime >= self.introduced_at()
    }

    /// Lowest target level an application must declare to request this.
    pub fn min_target(self) -> ApiLevel {
        self.introduced_at().max(ApiLevel::ANDROID_6)
    }

    /// The newer capability that replaces this one on modern targets.
    pub fn superseded_by(self) -> Option<Capability> {
        match self {
            Capability::ReadExternalStorage => Some(Capability::ReadMediaImages),
            Capability::WriteExternalStorage => Some(Capability::ManageExternalStorage),
            _ => None,
        }
    }

    /// Foreground capabilities, any one of which must be held before this
    /// one can be meaningfully requested.
    pub fn companions(self) -> &'static [Capability] {
        match self {
            Capability::AccessBackgroundLocation => &[
                Capability::AccessFineLocation,
                Capability::AccessCoarseLocation,
            ],
            Capability::BodySensorsBackground => &[Capability::BodySensors],
            _ => &[],
        }
    }

    /// Capabilities that historically covered this grant on runtimes older
    /// than [`Capability::introduced_at`].
    pub fn legacy(self) -> &'static [Capability] {
        match self {
            Capability::NearbyWifiDevices | Capability::BluetoothScan => {
                &[Capability::AccessFineLocation]
            }
            Capability::ReadMediaImages
            | Capability::ReadMediaVideo
            | Capability::ReadMediaAudio => &[Capability::ReadExternalStorage],
            Capability::ManageExternalStorage => &[
                Capability::ReadExternalStorage,
                Capability::WriteExternalStorage,
            ],
            Capability::ActivityRecognition => &[Capability::BodySensors],
            Capability::ReadPhoneNumbers => &[Capability::ReadPhoneState],
            _ => &[],
        }
    }

    /// Whether this capability gets its own orchestration stage.
    pub fn has_dedicated_stage(self) -> bool {
        DEDICATED_STAGE_ORDER.contains(&self)
    }

    /// Position in the dedicated stage chain.
    pub fn stage_rank(self) -> Option<usize> {
        DEDICATED_STAGE_ORDER.iter().position(|c| *c == self)
    }
}

/// Classify a capability as Runtime or Special.
pub fn classify(capability: Capability) -> CapabilityKind {
    capability.kind()
}

/// The first level on which `capability` exists.
pub fn introduced_at(capability: Capability) -> ApiLevel {
    capability.introduced_at()
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Capability {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Capability::parse(s.trim())
    }
}

impl TryFrom<String> for Capability {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        Capability::parse(&value)
    }
}

impl From<Capability> for &'static str {
    fn from(capability: Capability) -> Self {
        capability.as_str()
    }
}
