//! Configuration for the Sprocket runtime.
//!
//! Configuration is loaded from files and the environment by
//! [`ConfigLoader`], checked by [`validate_config`], and handed to
//! [`BotRuntime::start`](crate::BotRuntime::start) as a [`BotConfig`].

pub mod error;
pub mod loader;
pub mod schema;
pub mod validation;

pub use error::{ConfigError, ConfigResult};
pub use loader::{ConfigLoader, Profile, load_config, load_config_from_file};
pub use schema::{
    BotConfig, BotSettings, LogFormat, LogLevel, LogOutput, LoggingConfig, PluginSection,
    SpanEventConfig,
};
pub use validation::validate_config;
