use crate::risk::{CircuitBreakerConfig, RiskLimits, TrailingStopConfig};
use crate::strategy::RulesConfig;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

/// Construction-time configuration failures
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid `{field}`: {reason}")]
    Invalid { field: String, reason: String },

    #[error("failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),

    #[error("failed to parse configuration: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("failed to register metrics: {0}")]
    Metrics(#[from] prometheus::Error),
}

impl ConfigError {
    pub fn invalid(field: &str, reason: &str) -> Self {
        Self::Invalid {
            field: field.to_string(),
            reason: reason.to_string(),
        }
    }
}

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub general: GeneralConfig,
    pub rules: RulesConfig,
    pub limits: RiskLimits,
    pub circuit_breaker: CircuitBreakerConfig,
    pub trailing_stop: TrailingStopConfig,
    pub logging: LoggingConfig,
    pub metrics: MetricsConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    pub name: String,
    pub environment: String,
    /// Seconds between evaluation cycles
    pub cadence_secs: u64,
    /// Account buying power, used for buying-power utilisation figures
    pub buying_power: Option<Decimal>,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            name: "options-supervisor".to_string(),
            environment: "paper".to_string(),
            cadence_secs: 60,
            buying_power: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    /// "pretty" or "json"
    pub output: String,
    /// Empty means stdout
    pub file_path: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            output: "pretty".to_string(),
            file_path: String::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    pub enabled: bool,
    /// Prefix applied to every metric name
    pub namespace: String,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            namespace: "supervisor".to_string(),
        }
    }
}

impl Config {
    /// Environment overrides use this prefix, e.g. `SUPERVISOR__GENERAL__CADENCE_SECS=30`
    pub const ENV_PREFIX: &'static str = "SUPERVISOR";

    /// Load configuration from a TOML file layered with environment overrides
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let settings = config::Config::builder()
            .add_source(config::File::from(path.as_ref()).format(config::FileFormat::Toml))
            .add_source(
                config::Environment::with_prefix(Self::ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let config: Config = settings.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Parse a TOML document without environment layering
    pub fn from_toml_str(contents: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Load from environment variable or default path
    pub fn load() -> Result<Self, ConfigError> {
        let path = std::env::var("CONFIG_FILE")
            .unwrap_or_else(|_| "config/supervisor.toml".to_string());
        Self::from_file(path)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.general.cadence_secs == 0 {
            return Err(ConfigError::invalid("general.cadence_secs", "must be > 0"));
        }
        if let Some(bp) = self.general.buying_power {
            if bp <= Decimal::ZERO {
                return Err(ConfigError::invalid("general.buying_power", "must be > 0"));
            }
        }
        if !matches!(self.logging.output.as_str(), "pretty" | "json") {
            return Err(ConfigError::invalid(
                "logging.output",
                "must be \"pretty\" or \"json\"",
            ));
        }
        self.rules.validate()?;
        self.limits.validate()?;
        self.circuit_breaker.validate()?;
        self.trailing_stop.validate()?;
        Ok(())
    }
}
