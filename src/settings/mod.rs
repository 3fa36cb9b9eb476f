// Configuration module
// Typed settings from the YAML `configuration` file plus API credentials from the environment

pub mod credentials;

pub use credentials::Credentials;

use crate::execution::FailurePolicy;
use crate::models::Position;
use config::{Config, Environment, File, FileFormat};
use serde::Deserialize;
use std::collections::HashSet;
use thiserror::Error;

/// Default configuration file name, looked up in the current directory
pub const DEFAULT_CONFIG_NAME: &str = "configuration";

/// Prefix for environment overrides, e.g. `KRAKEN_GRID__EXECUTION__FAILURE_POLICY`
const ENV_PREFIX: &str = "KRAKEN_GRID";

const DEFAULT_TIMEOUT_SECS: u64 = 30;
const DEFAULT_REQUESTS_PER_SECOND: u32 = 1;

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("unable to load configuration: {0}")]
    Load(#[from] config::ConfigError),

    #[error("configuration lists no positions")]
    NoPositions,

    #[error("position #{index} ({name}): {reason}")]
    InvalidPosition {
        index: usize,
        name: String,
        reason: String,
    },

    #[error("position {0} is configured more than once")]
    DuplicatePosition(String),

    #[error("invalid {field}: {reason}")]
    InvalidSetting {
        field: &'static str,
        reason: String,
    },

    #[error("environment variable {0} is not set")]
    MissingEnv(&'static str),
}

#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub positions: Vec<Position>,
    #[serde(default)]
    pub execution: ExecutionSettings,
    #[serde(default)]
    pub api: ApiSettings,
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
pub struct ExecutionSettings {
    #[serde(default)]
    pub failure_policy: FailurePolicy,
    /// Ask the exchange to validate orders without placing them
    #[serde(default)]
    pub validate_only: bool,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct ApiSettings {
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_requests_per_second")]
    pub requests_per_second: u32,
}

fn default_timeout_secs() -> u64 {
    DEFAULT_TIMEOUT_SECS
}

fn default_requests_per_second() -> u32 {
    DEFAULT_REQUESTS_PER_SECOND
}

impl Default for ApiSettings {
    fn default() -> Self {
        Self {
            timeout_secs: DEFAULT_TIMEOUT_SECS,
            requests_per_second: DEFAULT_REQUESTS_PER_SECOND,
        }
    }
}

impl Settings {
    /// Load and validate settings from a YAML file
    ///
    /// `path` may omit the extension: `configuration` also matches
    /// `configuration.yaml` and `configuration.yml`.
    pub fn load(path: &str) -> Result<Self, SettingsError> {
        let raw = Config::builder()
            .add_source(File::with_name(path).format(FileFormat::Yaml))
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__"),
            )
            .build()?;

        Self::from_config(raw)
    }

    /// Parse settings from an in-memory YAML document (no environment overrides)
    pub fn from_yaml_str(yaml: &str) -> Result<Self, SettingsError> {
        let raw = Config::builder()
            .add_source(File::from_str(yaml, FileFormat::Yaml))
            .build()?;

        Self::from_config(raw)
    }

    fn from_config(raw: Config) -> Result<Self, SettingsError> {
        let settings: Settings = raw.try_deserialize()?;
        settings.validate()?;
        Ok(settings)
    }

    /// Reject configurations that would produce meaningless orders
    pub fn validate(&self) -> Result<(), SettingsError> {
        if self.positions.is_empty() {
            return Err(SettingsError::NoPositions);
        }

        let mut seen = HashSet::new();
        for (index, position) in self.positions.iter().enumerate() {
            validate_position(index, position)?;
            if !seen.insert(position.name.as_str()) {
                return Err(SettingsError::DuplicatePosition(position.name.clone()));
            }
        }

        if self.api.timeout_secs == 0 {
            return Err(SettingsError::InvalidSetting {
                field: "api.timeout_secs",
                reason: "must be greater than zero".to_string(),
            });
        }
        if self.api.requests_per_second == 0 {
            return Err(SettingsError::InvalidSetting {
                field: "api.requests_per_second",
                reason: "must be greater than zero".to_string(),
            });
        }

        Ok(())
    }
}

fn validate_position(index: usize, position: &Position) -> Result<(), SettingsError> {
    let invalid = |reason: String| SettingsError::InvalidPosition {
        index,
        name: position.name.clone(),
        reason,
    };

    if position.name.trim().is_empty() {
        return Err(invalid("name must not be empty".to_string()));
    }

    if !position.buy.amount.is_finite() || position.buy.amount <= 0.0 {
        return Err(invalid(format!(
            "buy.amount must be positive, got {}",
            position.buy.amount
        )));
    }
    if !position.sell.amount.is_finite() || position.sell.amount < 0.0 {
        return Err(invalid(format!(
            "sell.amount must be zero or positive, got {}",
            position.sell.amount
        )));
    }

    // Buy price scales by (1 - pct/100), sell price by (1 + pct/100)
    let buy_pct = position.buy.percentage;
    if !buy_pct.is_finite() || buy_pct >= 100.0 {
        return Err(invalid(format!(
            "buy.percentage must be below 100, got {}",
            buy_pct
        )));
    }
    let sell_pct = position.sell.percentage;
    if !sell_pct.is_finite() || sell_pct <= -100.0 {
        return Err(invalid(format!(
            "sell.percentage must be above -100, got {}",
            sell_pct
        )));
    }

    Ok(())
}
