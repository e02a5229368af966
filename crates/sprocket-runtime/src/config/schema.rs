//! Configuration schema definitions.

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use sprocket_framework::storage::StorageConfig;
use sprocket_transport::HttpConfig;

/// Root configuration structure.
///
/// ```toml
/// [bot]
/// name = "sprocket"
/// aliases = ["sp"]
///
/// [storage]
/// path = "sprocket.db"
///
/// [logging]
/// level = "debug"
///
/// [[plugins]]
/// name = "karma"
///
/// [[plugins]]
/// name = "weather"
/// config = { units = "metric" }
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct BotConfig {
    /// Identity and shutdown behaviour of the bot.
    #[serde(default)]
    pub bot: BotSettings,

    /// The shared database.
    #[serde(default)]
    pub storage: StorageConfig,

    /// The outbound HTTP bridge.
    #[serde(default)]
    pub http: HttpConfig,

    /// Log output.
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Plugins to load, in load order.
    #[serde(default)]
    pub plugins: Vec<PluginSection>,
}

impl BotConfig {
    /// Enabled plugin sections as `(name, config)` pairs, in order.
    pub fn enabled_plugins(&self) -> impl Iterator<Item = (&str, Value)> + '_ {
        self.plugins
            .iter()
            .filter(|section| section.enabled)
            .map(|section| (section.name.as_str(), section.config.clone()))
    }
}

/// The bot's identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BotSettings {
    /// The name the bot answers to.
    #[serde(default = "default_bot_name")]
    pub name: String,

    /// Other names that address the bot.
    #[serde(default)]
    pub aliases: Vec<String>,

    /// How long shutdown waits for running handlers, in milliseconds.
    #[serde(default = "default_shutdown_grace_ms")]
    pub shutdown_grace_ms: u64,
}

impl Default for BotSettings {
    fn default() -> Self {
        Self {
            name: default_bot_name(),
            aliases: Vec::new(),
            shutdown_grace_ms: default_shutdown_grace_ms(),
        }
    }
}

impl BotSettings {
    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }
}

fn default_bot_name() -> String {
    "sprocket".to_string()
}

fn default_shutdown_grace_ms() -> u64 {
    5000
}

/// One plugin to load.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PluginSection {
    /// The name the plugin's factory is registered under.
    pub name: String,

    /// Disabled sections are skipped at startup.
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    /// Handed to the plugin as-is.
    #[serde(default = "empty_table")]
    pub config: Value,
}

impl PluginSection {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            enabled: true,
            config: empty_table(),
        }
    }

    pub fn with_config(mut self, config: Value) -> Self {
        self.config = config;
        self
    }
}

fn default_enabled() -> bool {
    true
}

fn empty_table() -> Value {
    Value::Object(Default::default())
}

// =============================================================================
// Logging
// =============================================================================

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Base level for every target.
    pub level: LogLevel,

    /// Line format.
    pub format: LogFormat,

    /// Destination.
    pub output: LogOutput,

    /// Log file used when `output` is `file`.
    pub file_path: Option<PathBuf>,

    /// Which span lifecycle events are logged.
    pub span_events: SpanEventConfig,

    /// Include thread ids.
    pub thread_ids: bool,

    /// Include source file and line.
    pub file_location: bool,

    /// Per-target levels, e.g. `sprocket_framework = "debug"`.
    pub filters: BTreeMap<String, LogLevel>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: LogLevel::Info,
            format: LogFormat::Compact,
            output: LogOutput::Stdout,
            file_path: None,
            span_events: SpanEventConfig::default(),
            thread_ids: false,
            file_location: false,
            filters: BTreeMap::new(),
        }
    }
}

/// Log severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Trace => "trace",
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
        }
    }

    pub fn to_tracing_level(self) -> tracing::Level {
        match self {
            Self::Trace => tracing::Level::TRACE,
            Self::Debug => tracing::Level::DEBUG,
            Self::Info => tracing::Level::INFO,
            Self::Warn => tracing::Level::WARN,
            Self::Error => tracing::Level::ERROR,
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Log line format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Compact,
    Full,
    Pretty,
    #[cfg(feature = "json-log")]
    Json,
}

/// Log destination.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogOutput {
    #[default]
    Stdout,
    Stderr,
    File,
}

/// Span lifecycle events to log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SpanEventConfig {
    pub new: bool,
    pub enter: bool,
    pub exit: bool,
    pub close: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn empty_document_uses_defaults() {
        let config: BotConfig = serde_json::from_value(json!({})).unwrap();
        assert_eq!(config.bot.name, "sprocket");
        assert_eq!(config.bot.shutdown_grace(), Duration::from_secs(5));
        assert_eq!(config.logging.level, LogLevel::Info);
        assert_eq!(config.storage, StorageConfig::default());
        assert!(config.plugins.is_empty());
    }

    #[test]
    fn plugin_sections_default_to_enabled_with_empty_config() {
        let config: BotConfig = serde_json::from_value(json!({
            "plugins": [
                { "name": "karma" },
                { "name": "weather", "enabled": false, "config": { "units": "metric" } },
            ]
        }))
        .unwrap();

        assert_eq!(config.plugins[0], PluginSection::new("karma"));
        assert!(!config.plugins[1].enabled);

        let enabled: Vec<_> = config.enabled_plugins().collect();
        assert_eq!(enabled, vec![("karma", json!({}))]);
    }

    #[test]
    fn log_levels_parse_lowercase() {
        let config: LoggingConfig = serde_json::from_value(json!({
            "level": "warn",
            "filters": { "sprocket_framework": "trace" },
        }))
        .unwrap();
        assert_eq!(config.level.to_tracing_level(), tracing::Level::WARN);
        assert_eq!(config.filters["sprocket_framework"], LogLevel::Trace);
    }
}
