//! Framework error types.
//!
//! Storage errors live in [`crate::storage`]; this module holds the errors
//! raised while registering handlers and managing plugins.

use sprocket_core::{BoxError, PluginId};
use thiserror::Error;

use crate::storage::MigrationError;

// =============================================================================
// Configuration Errors
// =============================================================================

/// A registration or configuration that can never work.
///
/// These are detected when a plugin loads, never while dispatching.
#[derive(Debug, Clone, Error)]
pub enum ConfigurationError {
    /// A handler filter is not a valid regular expression.
    #[error("invalid filter pattern '{pattern}': {source}")]
    InvalidPattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },

    /// A table descriptor is malformed.
    #[error("invalid table descriptor '{table}': {reason}")]
    InvalidTable { table: String, reason: String },

    /// Another plugin already owns this table with a different schema.
    #[error(
        "table '{table}' is registered by '{owner}' with a different schema (requested by '{requested_by}')"
    )]
    TableConflict {
        table: String,
        owner: String,
        requested_by: String,
    },

    /// A plugin's configuration section does not have the expected shape.
    #[error("invalid configuration for plugin '{plugin}': {reason}")]
    InvalidValue { plugin: String, reason: String },
}

impl ConfigurationError {
    /// Creates an invalid table error.
    pub fn invalid_table(table: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidTable {
            table: table.into(),
            reason: reason.into(),
        }
    }
}

// =============================================================================
// Plugin Errors
// =============================================================================

/// Errors reported by the plugin lifecycle manager.
#[derive(Debug, Error)]
pub enum PluginError {
    /// No factory is registered under this name.
    #[error("unknown plugin '{0}'")]
    Unknown(String),

    /// A plugin with this name is already active.
    #[error("plugin '{0}' is already loaded")]
    AlreadyLoaded(String),

    /// No active plugin has this id.
    #[error("no loaded plugin with id {0}")]
    NotLoaded(PluginId),

    /// A handler pattern, table descriptor or config section was rejected.
    #[error("plugin '{plugin}' has an invalid configuration: {source}")]
    Configuration {
        plugin: String,
        #[source]
        source: ConfigurationError,
    },

    /// One of the plugin's tables could not be migrated.
    #[error("plugin '{plugin}' could not migrate its tables: {source}")]
    Migration {
        plugin: String,
        #[source]
        source: MigrationError,
    },

    /// The plugin's own initialisation failed.
    #[error("plugin '{plugin}' failed to initialise: {source}")]
    Init {
        plugin: String,
        #[source]
        source: BoxError,
    },

    /// The plugin's save hook failed.
    #[error("plugin '{plugin}' failed to save its state: {source}")]
    Save {
        plugin: String,
        #[source]
        source: BoxError,
    },
}

// =============================================================================
// Result Type Aliases
// =============================================================================

/// Result type for plugin lifecycle operations.
pub type PluginResult<T> = Result<T, PluginError>;
