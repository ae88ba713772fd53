//! Engine configuration.
//!
//! Loaded from an optional file plus `PARTYBOOK__*` environment variables,
//! e.g. `PARTYBOOK__AGING__FIRST=15` or `PARTYBOOK__LOGGING__FORMAT=pretty`.

use std::path::Path;

use config::builder::DefaultState;
use config::ConfigBuilder;
use serde::Deserialize;
use thiserror::Error;

use partybook_observability::LoggingSettings;

pub const ENV_PREFIX: &str = "PARTYBOOK";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Upper bounds (inclusive, in days overdue) of the first three aging buckets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct AgingSettings {
    pub first: u32,
    pub second: u32,
    pub third: u32,
}

impl Default for AgingSettings {
    fn default() -> Self {
        Self {
            first: 30,
            second: 60,
            third: 90,
        }
    }
}

impl AgingSettings {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.first == 0 || self.first >= self.second || self.second >= self.third {
            return Err(ConfigError::Invalid(format!(
                "aging boundaries must be strictly increasing and positive, got [{}, {}, {}]",
                self.first, self.second, self.third
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct InvoicingSettings {
    pub number_prefix: String,
    /// Days from issue to due date when an invoice is created without one.
    pub default_due_days: u32,
}

impl Default for InvoicingSettings {
    fn default() -> Self {
        Self {
            number_prefix: "INV".to_string(),
            default_due_days: 30,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub aging: AgingSettings,
    pub invoicing: InvoicingSettings,
    pub logging: LoggingSettings,
}

impl EngineConfig {
    /// Load from `path` (if given) and the environment.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path).required(true));
        }
        Self::build(builder.add_source(
            config::Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true),
        ))
    }

    fn build(builder: ConfigBuilder<DefaultState>) -> Result<Self, ConfigError> {
        let settings: EngineConfig = builder.build()?.try_deserialize()?;
        settings.validate()?;
        Ok(settings)
    }

    /// Install the process-wide tracing subscriber described by `logging`.
    pub fn init_logging(&self) {
        partybook_observability::init_with(&self.logging);
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.aging.validate()?;
        if self.invoicing.number_prefix.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "invoicing.number_prefix must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}
