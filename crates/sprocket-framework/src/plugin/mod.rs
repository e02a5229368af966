//! The plugin contract and plugin factories.
//!
//! A plugin implements [`Plugin`]. Its `init` receives a [`LoadContext`]
//! through which it registers handlers and tables; the state it returns is
//! shared with its handlers as [`State<S>`]. A [`PluginDescriptor`] is the
//! static factory the manager instantiates plugins from, collected in a
//! [`PluginCatalog`] either explicitly or through the [`PLUGINS`] slice.

pub mod core;
pub mod descriptor;
mod load;

pub use core::{LoadContext, Plugin, PluginMetadata, State};
pub use descriptor::{PLUGIN_API_VERSION, PLUGINS, PluginCatalog, PluginDescriptor};
pub use load::ErasedPlugin;

pub(crate) use load::{LivePlugin, LoadEnv, Prepared};
