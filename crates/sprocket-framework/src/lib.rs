//! # Sprocket Framework
//!
//! Everything between an inbound event and a plugin's handler:
//!
//! - **Registry**: handlers indexed by event kind, with regex filters
//!   ([`HandlerRegistry`], [`Filter`])
//! - **Router**: turns messages into events and spawns one task per matching
//!   handler ([`Router`])
//! - **Storage**: a shared SQLite database with versioned table migrations
//!   ([`storage::Storage`])
//! - **Plugins**: the [`Plugin`] contract, factories and the lifecycle
//!   [`PluginManager`]
//!
//! Handlers are type-erased into `tower` services ([`BoxedHandler`]) so the
//! registry stores handlers of every plugin side by side.

pub mod context;
pub mod error;
pub mod handler;
pub mod manager;
pub mod plugin;
pub mod registry;
pub mod router;
pub mod storage;

pub use context::{HandlerContext, Services};
pub use error::{ConfigurationError, PluginError, PluginResult};
pub use handler::{BoxedHandler, HandlerOutput};
pub use manager::{PluginInfo, PluginLoadState, PluginManager};
pub use plugin::{
    ErasedPlugin, LoadContext, PLUGIN_API_VERSION, PLUGINS, Plugin, PluginCatalog,
    PluginDescriptor, PluginMetadata, State,
};
pub use registry::{Captures, Filter, HandlerEntry, HandlerId, HandlerRegistry, PluginGate, Registration};
pub use router::Router;

#[doc(hidden)]
pub use linkme;
