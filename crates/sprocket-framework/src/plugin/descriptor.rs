//! Plugin factories.

use std::collections::BTreeMap;

use linkme::distributed_slice;
use tracing::warn;

use super::core::Plugin;
use super::load::ErasedPlugin;

/// Current plugin API version (1.0).
pub const PLUGIN_API_VERSION: u32 = 0x0001_0000;

/// A static, `Copy` factory for one plugin.
#[derive(Debug, Clone, Copy)]
pub struct PluginDescriptor {
    /// Plugin API version this descriptor was compiled against.
    pub api_version: u32,

    /// Name used in logs and as the configuration key.
    pub name: &'static str,

    /// Creates a fresh plugin instance.
    pub create: fn() -> ErasedPlugin,
}

fn create<P: Plugin + Default>() -> ErasedPlugin {
    ErasedPlugin::new(P::default())
}

impl PluginDescriptor {
    /// Descriptor for a plugin type built with [`Default`].
    pub const fn of<P: Plugin + Default>(name: &'static str) -> Self {
        Self {
            api_version: PLUGIN_API_VERSION,
            name,
            create: create::<P>,
        }
    }

    /// The major part must match; the descriptor's minor part must not be
    /// newer than the host's.
    pub fn is_compatible(&self) -> bool {
        let host_major = PLUGIN_API_VERSION >> 16;
        let host_minor = PLUGIN_API_VERSION & 0xFFFF;
        let desc_major = self.api_version >> 16;
        let desc_minor = self.api_version & 0xFFFF;
        desc_major == host_major && desc_minor <= host_minor
    }

    #[inline]
    pub fn instantiate(&self) -> ErasedPlugin {
        (self.create)()
    }
}

/// Descriptors linked into the binary.
///
/// ```rust,ignore
/// #[distributed_slice(PLUGINS)]
/// #[linkme(crate = sprocket::linkme)]
/// static KARMA: PluginDescriptor = PluginDescriptor::of::<Karma>("karma");
/// ```
#[distributed_slice]
pub static PLUGINS: [PluginDescriptor];

/// Every plugin the manager can load, by name.
#[derive(Debug, Clone, Default)]
pub struct PluginCatalog {
    descriptors: BTreeMap<&'static str, PluginDescriptor>,
}

impl PluginCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// A catalog of every descriptor in [`PLUGINS`].
    pub fn linked() -> Self {
        let mut catalog = Self::new();
        for descriptor in PLUGINS {
            catalog.register(*descriptor);
        }
        catalog
    }

    /// Adds a descriptor. A name that is already taken keeps its first
    /// descriptor and returns false.
    pub fn register(&mut self, descriptor: PluginDescriptor) -> bool {
        if !descriptor.is_compatible() {
            warn!(
                plugin = descriptor.name,
                api_version = %format!("{:#010x}", descriptor.api_version),
                host_version = %format!("{:#010x}", PLUGIN_API_VERSION),
                "Plugin was built against an incompatible API version"
            );
        }
        if self.descriptors.contains_key(descriptor.name) {
            warn!(plugin = descriptor.name, "Duplicate plugin name ignored");
            return false;
        }
        self.descriptors.insert(descriptor.name, descriptor);
        true
    }

    pub fn with(mut self, descriptor: PluginDescriptor) -> Self {
        self.register(descriptor);
        self
    }

    pub fn get(&self, name: &str) -> Option<&PluginDescriptor> {
        self.descriptors.get(name)
    }

    /// Plugin names in alphabetical order.
    pub fn names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.descriptors.keys().copied()
    }

    pub fn len(&self) -> usize {
        self.descriptors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.descriptors.is_empty()
    }
}
