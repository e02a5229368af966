//! Type erasure between [`Plugin`] implementations and the manager.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use sprocket_core::BoxError;

use super::core::{LoadContext, Plugin, PluginMetadata, State};
use crate::context::Services;
use crate::error::PluginError;
use crate::registry::{PluginGate, Registration};

pub(crate) struct LoadEnv {
    pub gate: Arc<PluginGate>,
    pub config: Arc<Value>,
    pub services: Services,
}

/// A plugin whose `init` succeeded, with everything it staged.
pub(crate) struct Prepared {
    pub live: Box<dyn LivePlugin>,
    pub registrations: Vec<Registration>,
    pub tables: Vec<String>,
    pub metadata: PluginMetadata,
}

#[async_trait]
pub(crate) trait DynPlugin: Send + Sync {
    fn metadata(&self) -> PluginMetadata;

    async fn load(self: Box<Self>, env: LoadEnv) -> Result<Prepared, PluginError>;
}

#[async_trait]
pub(crate) trait LivePlugin: Send + Sync {
    async fn save(&self) -> Result<(), BoxError>;

    async fn unload(&self);
}

struct Live<P: Plugin> {
    plugin: P,
    state: State<P::State>,
}

#[async_trait]
impl<P: Plugin> LivePlugin for Live<P> {
    async fn save(&self) -> Result<(), BoxError> {
        self.plugin.save(&self.state).await
    }

    async fn unload(&self) {
        self.plugin.unload(&self.state).await;
    }
}

#[async_trait]
impl<P: Plugin> DynPlugin for P {
    fn metadata(&self) -> PluginMetadata {
        Plugin::metadata(self)
    }

    async fn load(self: Box<Self>, env: LoadEnv) -> Result<Prepared, PluginError> {
        let name = env.gate.name().to_string();
        let mut ctx = LoadContext::new(env.gate, env.config, env.services);

        let state = match self.init(&mut ctx).await {
            Ok(state) => State::new(state),
            Err(source) => {
                return Err(ctx
                    .take_failure()
                    .unwrap_or(PluginError::Init { plugin: name, source }));
            }
        };

        // A recorded failure wins even when init carried on regardless.
        if let Some(failure) = ctx.take_failure() {
            self.unload(&state).await;
            return Err(failure);
        }

        let parts = ctx.into_parts();
        parts.slot.fill(state.clone());
        let metadata = Plugin::metadata(&*self);
        Ok(Prepared {
            live: Box::new(Live {
                plugin: *self,
                state,
            }),
            registrations: parts.registrations,
            tables: parts.tables,
            metadata,
        })
    }
}

/// A plugin instance with its concrete type erased.
pub struct ErasedPlugin(pub(crate) Box<dyn DynPlugin>);

impl ErasedPlugin {
    pub fn new<P: Plugin>(plugin: P) -> Self {
        Self(Box::new(plugin))
    }

    pub fn metadata(&self) -> PluginMetadata {
        self.0.metadata()
    }
}

impl std::fmt::Debug for ErasedPlugin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("ErasedPlugin").field(&self.metadata()).finish()
    }
}
