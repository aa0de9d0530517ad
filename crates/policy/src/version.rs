//! Platform API levels and the per-evaluation resolution context.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A platform API level (e.g. `33` for Android 13).
///
/// Ordered, so thresholds compare naturally: `ctx.runtime >= ApiLevel::ANDROID_11`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ApiLevel(pub u32);

impl ApiLevel {
    pub const ANDROID_4_0: Self = Self(14);
    pub const ANDROID_4_1: Self = Self(16);
    pub const ANDROID_4_2: Self = Self(17);
    pub const ANDROID_4_3: Self = Self(18);
    pub const ANDROID_4_4: Self = Self(19);
    pub const ANDROID_5: Self = Self(21);
    pub const ANDROID_5_1: Self = Self(22);
    pub const ANDROID_6: Self = Self(23);
    pub const ANDROID_7: Self = Self(24);
    pub const ANDROID_7_1: Self = Self(25);
    pub const ANDROID_8: Self = Self(26);
    pub const ANDROID_8_1: Self = Self(27);
    pub const ANDROID_9: Self = Self(28);
    pub const ANDROID_10: Self = Self(29);
    pub const ANDROID_11: Self = Self(30);
    pub const ANDROID_12: Self = Self(31);
    pub const ANDROID_12_L: Self = Self(32);
    pub const ANDROID_13: Self = Self(33);

    /// The newest level this catalog knows about.
    pub const LATEST: Self = Self::ANDROID_13;

    /// Human-readable release name, if this is a known level.
    pub fn release_name(self) -> Option<&'static str> {
        let name = match self.0 {
            14 | 15 => "4.0",
            16 => "4.1",
            17 => "4.2",
            18 => "4.3",
            19 | 20 => "4.4",
            21 => "5.0",
            22 => "5.1",
            23 => "6.0",
            24 => "7.0",
            25 => "7.1",
            26 => "8.0",
            27 => "8.1",
            28 => "9",
            29 => "10",
            30 => "11",
            31 => "12",
            32 => "12L",
            33 => "13",
            _ => return None,
        };
        Some(name)
    }
}

impl fmt::Display for ApiLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.release_name() {
            Some(name) => write!(f, "{} (Android {name})", self.0),
            None => write!(f, "{}", self.0),
        }
    }
}

impl FromStr for ApiLevel {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        s.trim()
            .parse::<u32>()
            .map(ApiLevel)
            .map_err(|e| Error::Parse(format!("invalid API level '{s}': {e}")))
    }
}

/// The version pair every resolution is evaluated against.
///
/// `runtime` is the level of the device the code is running on; `target` is
/// the level the application declares it was built for. Both are plain
/// inputs; nothing in the resolver reads process-wide version state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ResolutionContext {
    pub runtime: ApiLevel,
    pub target: ApiLevel,
}

impl ResolutionContext {
    pub fn new(runtime: ApiLevel, target: ApiLevel) -> Self {
        Self { runtime, target }
    }

    /// Runtime is at least `level`.
    pub fn runtime_at_least(&self, level: ApiLevel) -> bool {
        self.runtime >= level
    }

    /// Both runtime and target are at least `level`.
    pub fn both_at_least(&self, level: ApiLevel) -> bool {
        self.runtime >= level && self.target >= level
    }
}

impl fmt::Display for ResolutionContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "runtime {} / target {}", self.runtime.0, self.target.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_levels_are_ordered() {
        assert!(ApiLevel::ANDROID_12_L > ApiLevel::ANDROID_12);
        assert!(ApiLevel::ANDROID_6 < ApiLevel::ANDROID_8);
        assert_eq!(ApiLevel::LATEST, ApiLevel(33));
    }

    #[test]
    fn test_parse_level() {
        assert_eq!("31".parse::<ApiLevel>().unwrap(), ApiLevel::ANDROID_12);
        assert!(" 29 ".parse::<ApiLevel>().is_ok());
        assert!(matches!("tiramisu".parse::<ApiLevel>(), Err(Error::Parse(_))));
    }

    #[test]
    fn test_display_includes_release() {
        assert_eq!(ApiLevel::ANDROID_10.to_string(), "29 (Android 10)");
        assert_eq!(ApiLevel(99).to_string(), "99");
    }

    #[test]
    fn test_context_helpers() {
        let ctx = ResolutionContext::new(ApiLevel::ANDROID_13, ApiLevel::ANDROID_12);
        assert!(ctx.runtime_at_least(ApiLevel::ANDROID_13));
        assert!(!ctx.both_at_least(ApiLevel::ANDROID_13));
        assert!(ctx.both_at_least(ApiLevel::ANDROID_12));
    }
}
