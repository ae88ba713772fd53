//! Tracing and logging (shared setup).

use serde::Deserialize;

/// Initialize process-wide tracing with default settings.
///
/// This is safe to call multiple times; subsequent calls become no-ops.
pub fn init() {
    tracing::init(&LoggingSettings::default());
}

/// Initialize process-wide tracing from loaded settings.
pub fn init_with(settings: &LoggingSettings) {
    tracing::init(settings);
}

/// Tracing configuration (filters, layers).
pub mod tracing;

/// Output format of the fmt layer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Json,
    Pretty,
}

/// `logging` section of the engine configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    pub format: LogFormat,
    /// Default directive when `RUST_LOG` is unset.
    pub filter: String,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            format: LogFormat::Json,
            filter: "info".to_string(),
        }
    }
}
