//! Configuration validation.

use std::collections::HashSet;

use super::error::{ConfigError, ConfigResult};
use super::schema::{BotConfig, BotSettings, LogOutput, LoggingConfig, PluginSection};
use sprocket_framework::storage::StorageConfig;

/// Validates the entire configuration.
pub fn validate_config(config: &BotConfig) -> ConfigResult<()> {
    validate_bot(&config.bot)?;
    validate_storage(&config.storage)?;
    validate_logging(&config.logging)?;
    validate_plugins(&config.plugins)?;
    Ok(())
}

fn validate_bot(bot: &BotSettings) -> ConfigResult<()> {
    if bot.name.trim().is_empty() {
        return Err(ConfigError::missing_field("bot.name"));
    }
    if bot.name.contains(char::is_whitespace) {
        return Err(ConfigError::validation("Bot name cannot contain whitespace"));
    }
    if let Some(alias) = bot
        .aliases
        .iter()
        .find(|alias| alias.is_empty() || alias.contains(char::is_whitespace))
    {
        return Err(ConfigError::validation(format!(
            "Invalid bot alias '{alias}': aliases must be non-empty single words"
        )));
    }
    Ok(())
}

fn validate_storage(storage: &StorageConfig) -> ConfigResult<()> {
    if storage.max_connections == 0 {
        return Err(ConfigError::validation(
            "storage.max_connections must be greater than 0",
        ));
    }
    Ok(())
}

fn validate_logging(logging: &LoggingConfig) -> ConfigResult<()> {
    if logging.output == LogOutput::File && logging.file_path.is_none() {
        return Err(ConfigError::missing_field("logging.file_path"));
    }
    if let Some(target) = logging.filters.keys().find(|target| target.trim().is_empty()) {
        return Err(ConfigError::validation(format!(
            "Invalid logging filter target '{target}'"
        )));
    }
    Ok(())
}

fn validate_plugins(plugins: &[PluginSection]) -> ConfigResult<()> {
    let mut seen = HashSet::new();
    for section in plugins {
        if section.name.trim().is_empty() {
            return Err(ConfigError::missing_field("plugins.name"));
        }
        if !seen.insert(section.name.as_str()) {
            return Err(ConfigError::DuplicatePlugin(section.name.clone()));
        }
    }
    Ok(())
}
