//! # Sprocket Runtime
//!
//! Host glue around the framework:
//!
//! - **Configuration**: [`BotConfig`] loaded by [`ConfigLoader`] from TOML or
//!   YAML files and `SPROCKET_*` environment variables
//! - **Logging**: [`LoggingBuilder`] on top of `tracing-subscriber`
//! - **Runtime**: [`BotRuntime`], which owns the shared services, loads the
//!   configured plugins and drives the inbound message loop
//!
//! ```rust,ignore
//! use sprocket_runtime::{BotRuntime, ConfigLoader};
//! use sprocket_framework::PluginCatalog;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ConfigLoader::new().load()?;
//!     let (transport, inbound) = my_network::connect(&config.bot.name).await?;
//!     let runtime = BotRuntime::start(config, PluginCatalog::linked(), transport).await?;
//!     runtime.run(inbound).await?;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod error;
pub mod logging;
pub mod runtime;

pub use config::{BotConfig, ConfigError, ConfigLoader, ConfigResult, PluginSection};
pub use error::{RuntimeError, RuntimeResult};
pub use logging::{LoggingBuilder, SpanEvents};
pub use runtime::BotRuntime;

pub use tracing;
