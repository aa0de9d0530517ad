//! Device profile loading from permit.toml.

use policy::{ApiLevel, Capability, ResolutionContext, SpecialProbe};
use runtime::{RequestOptions, ValidationMode};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::Path;

/// A simulated device and the behavior of its user.
#[derive(Debug, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub device: DeviceConfig,

    /// Starting grant state per capability. Anything unlisted starts as
    /// never requested.
    #[serde(default)]
    pub grants: BTreeMap<Capability, GrantState>,

    #[serde(default)]
    pub special: SpecialConfig,

    #[serde(default)]
    pub behavior: BehaviorConfig,
}

/// Platform levels of the simulated device.
#[derive(Debug, Deserialize)]
pub struct DeviceConfig {
    /// API level the device runs.
    #[serde(default = "default_level")]
    pub runtime: ApiLevel,

    /// API level the application targets.
    #[serde(default = "default_level")]
    pub target: ApiLevel,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            runtime: default_level(),
            target: default_level(),
        }
    }
}

fn default_level() -> ApiLevel {
    ApiLevel::LATEST
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GrantState {
    Granted,
    /// Denied once; the platform would show a rationale.
    Denied,
    PermanentlyDenied,
}

/// Settings-surface state.
#[derive(Debug, Deserialize, Default)]
pub struct SpecialConfig {
    /// Probes that start out true.
    #[serde(default)]
    pub enabled: Vec<SpecialProbe>,

    /// Settings actions this device does not have.
    #[serde(default)]
    pub missing_screens: Vec<String>,
}

/// Which callbacks exist, and how the simulated user answers.
#[derive(Debug, Deserialize)]
pub struct BehaviorConfig {
    /// Register an explanation callback.
    #[serde(default = "default_true")]
    pub explain: bool,

    /// Register a remediation (forward to settings) callback.
    #[serde(default = "default_true")]
    pub forward: bool,

    #[serde(default)]
    pub explain_before_request: bool,

    /// Enforce cross-capability request rules.
    #[serde(default = "default_true")]
    pub strict: bool,

    /// Whether the simulated user accepts prompts, explanations and
    /// settings visits.
    #[serde(default = "default_true")]
    pub user_accepts: bool,
}

impl Default for BehaviorConfig {
    fn default() -> Self {
        Self {
            explain: true,
            forward: true,
            explain_before_request: false,
            strict: true,
            user_accepts: true,
        }
    }
}

fn default_true() -> bool {
    true
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref())?;
        Self::parse(&content)
    }

    /// Parse configuration from TOML string.
    pub fn parse(toml: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(toml).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        for (name, level) in [("runtime", self.device.runtime), ("target", self.device.target)] {
            if level < ApiLevel::ANDROID_4_0 {
                return Err(ConfigError::Invalid(format!(
                    "device.{name} = {} is older than the oldest supported level {}",
                    level.0,
                    ApiLevel::ANDROID_4_0.0
                )));
            }
        }
        Ok(())
    }

    /// The resolution context, with optional command-line overrides.
    pub fn context(&self, runtime: Option<u32>, target: Option<u32>) -> ResolutionContext {
        ResolutionContext::new(
            runtime.map(ApiLevel).unwrap_or(self.device.runtime),
            target.map(ApiLevel).unwrap_or(self.device.target),
        )
    }

    pub fn options(&self) -> RequestOptions {
        RequestOptions {
            mode: if self.behavior.strict {
                ValidationMode::Strict
            } else {
                ValidationMode::Lenient
            },
            explain_before_request: self.behavior.explain_before_request,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config: {0}")]
    Parse(String),

    #[error("invalid config: {0}")]
    Invalid(String),
}
