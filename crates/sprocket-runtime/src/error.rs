//! Runtime error types.

use sprocket_framework::PluginError;
use sprocket_framework::storage::StorageError;
use sprocket_transport::HttpError;
use thiserror::Error;

use crate::config::ConfigError;

/// Errors that stop the runtime from starting.
///
/// Once running, failures are confined to the handler, plugin or event that
/// caused them and are only logged.
#[derive(Error, Debug)]
pub enum RuntimeError {
    /// The configuration was rejected.
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// The database could not be opened or prepared.
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    /// The HTTP client could not be built.
    #[error("HTTP bridge error: {0}")]
    Http(#[from] HttpError),

    /// A plugin operation requested by the host failed.
    #[error("Plugin error: {0}")]
    Plugin(#[from] PluginError),
}

/// Result type for runtime operations.
pub type RuntimeResult<T> = Result<T, RuntimeError>;
