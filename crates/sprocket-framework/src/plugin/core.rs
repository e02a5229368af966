use std::future::Future;
use std::ops::Deref;
use std::sync::{Arc, OnceLock};

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::Value;
use sprocket_core::{BoxError, EventKind, PluginId};
use sprocket_transport::HttpBridge;

use crate::context::{HandlerContext, Services};
use crate::error::{ConfigurationError, PluginError};
use crate::handler::{HandlerOutput, into_service};
use crate::registry::{Filter, PluginGate, Registration};
use crate::storage::{MigrationReport, Storage, StorageError, TableDescriptor};

// ─── Plugin ───────────────────────────────────────────────────────────────────

/// A unit of bot functionality.
///
/// `init` registers handlers and tables through the [`LoadContext`] and
/// returns the plugin's state. The state is handed to this plugin's handlers
/// and lifecycle hooks only.
///
/// ```rust,ignore
/// #[derive(Default)]
/// struct Greeter;
///
/// #[async_trait]
/// impl Plugin for Greeter {
///     type State = ();
///
///     async fn init(&self, ctx: &mut LoadContext<()>) -> Result<(), BoxError> {
///         ctx.on_match(EventKind::Addressed, r"^hello$", |ctx, _| async move {
///             format!("hello, {}", ctx.event().author())
///         })?;
///         Ok(())
///     }
/// }
/// ```
#[async_trait]
pub trait Plugin: Send + Sync + 'static {
    type State: Send + Sync + 'static;

    fn metadata(&self) -> PluginMetadata {
        PluginMetadata::default()
    }

    async fn init(&self, ctx: &mut LoadContext<Self::State>) -> Result<Self::State, BoxError>;

    /// Persists state. Called on demand, at shutdown and before unloading.
    async fn save(&self, _state: &Self::State) -> Result<(), BoxError> {
        Ok(())
    }

    /// Releases resources. No new handler invocations start after this.
    async fn unload(&self, _state: &Self::State) {}
}

/// Descriptive plugin metadata.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PluginMetadata {
    pub version: &'static str,
    /// One-line description shown in logs.
    pub desc: &'static str,
    /// Usage text shown by help commands.
    pub help: Option<&'static str>,
}

// ─── State ────────────────────────────────────────────────────────────────────

/// Shared handle to a plugin's state.
#[derive(Debug, Default)]
pub struct State<S>(Arc<S>);

impl<S> State<S> {
    pub fn new(value: S) -> Self {
        Self(Arc::new(value))
    }
}

impl<S> Clone for State<S> {
    fn clone(&self) -> Self {
        Self(Arc::clone(&self.0))
    }
}

impl<S> Deref for State<S> {
    type Target = S;

    fn deref(&self) -> &S {
        &self.0
    }
}

/// State filled in once `init` returns. Handlers registered during `init`
/// hold the slot rather than the state itself.
pub(crate) struct StateSlot<S>(Arc<OnceLock<State<S>>>);

impl<S> StateSlot<S> {
    pub(crate) fn empty() -> Self {
        Self(Arc::new(OnceLock::new()))
    }

    #[cfg(test)]
    pub(crate) fn ready(value: S) -> Self {
        let slot = Self::empty();
        slot.fill(State::new(value));
        slot
    }

    pub(crate) fn fill(&self, state: State<S>) {
        let _ = self.0.set(state);
    }

    pub(crate) fn get(&self) -> Option<State<S>> {
        self.0.get().cloned()
    }
}

impl<S> Clone for StateSlot<S> {
    fn clone(&self) -> Self {
        Self(Arc::clone(&self.0))
    }
}

// ─── LoadContext ──────────────────────────────────────────────────────────────

/// What a plugin sees while it initialises.
///
/// Handlers registered here are staged: they only become visible to the
/// router once `init` succeeds. Configuration, pattern and table errors are
/// recorded and fail the load even if the plugin ignores them.
pub struct LoadContext<S> {
    gate: Arc<PluginGate>,
    config: Arc<Value>,
    services: Services,
    slot: StateSlot<S>,
    staged: Vec<Registration>,
    tables: Vec<String>,
    failure: Option<PluginError>,
}

pub(crate) struct LoadParts<S> {
    pub slot: StateSlot<S>,
    pub registrations: Vec<Registration>,
    pub tables: Vec<String>,
}

impl<S: Send + Sync + 'static> LoadContext<S> {
    pub(crate) fn new(gate: Arc<PluginGate>, config: Arc<Value>, services: Services) -> Self {
        Self {
            gate,
            config,
            services,
            slot: StateSlot::empty(),
            staged: Vec::new(),
            tables: Vec::new(),
            failure: None,
        }
    }

    pub fn plugin_id(&self) -> PluginId {
        self.gate.id()
    }

    pub fn plugin_name(&self) -> &str {
        self.gate.name()
    }

    /// Deserialises the plugin's configuration section.
    ///
    /// A missing section deserialises from `null`; use `#[serde(default)]`
    /// to make every field optional.
    pub fn config<T: DeserializeOwned>(&mut self) -> Result<T, ConfigurationError> {
        T::deserialize(self.config.as_ref()).map_err(|e| {
            let err = ConfigurationError::InvalidValue {
                plugin: self.gate.name().to_string(),
                reason: e.to_string(),
            };
            self.record_configuration(err.clone());
            err
        })
    }

    pub fn raw_config(&self) -> &Value {
        &self.config
    }

    pub fn storage(&self) -> &Storage {
        &self.services.storage
    }

    pub fn http(&self) -> &HttpBridge {
        &self.services.http
    }

    pub fn services(&self) -> &Services {
        &self.services
    }

    /// Registers a handler for every event of `kind`.
    pub fn on<F, Fut>(&mut self, kind: EventKind, handler: F) -> &mut Self
    where
        F: Fn(HandlerContext, State<S>) -> Fut + Send + Sync + 'static,
        Fut: Future + Send + 'static,
        Fut::Output: HandlerOutput,
    {
        let service = into_service(handler, self.slot.clone());
        self.staged.push(Registration::new(kind, service));
        self
    }

    /// Registers a handler for events of `kind` whose text matches `pattern`.
    pub fn on_match<F, Fut>(
        &mut self,
        kind: EventKind,
        pattern: &str,
        handler: F,
    ) -> Result<&mut Self, ConfigurationError>
    where
        F: Fn(HandlerContext, State<S>) -> Fut + Send + Sync + 'static,
        Fut: Future + Send + 'static,
        Fut::Output: HandlerOutput,
    {
        let filter = match Filter::new(pattern) {
            Ok(filter) => filter,
            Err(err) => {
                self.record_configuration(err.clone());
                return Err(err);
            }
        };
        let service = into_service(handler, self.slot.clone());
        self.staged
            .push(Registration::new(kind, service).with_filter(filter));
        Ok(self)
    }

    /// Creates or migrates a table owned by this plugin.
    pub async fn register_table(
        &mut self,
        table: &TableDescriptor,
    ) -> Result<MigrationReport, PluginError> {
        let plugin = self.gate.name().to_string();
        match self.services.storage.register_table(&plugin, table).await {
            Ok(report) => {
                if !self.tables.iter().any(|t| t == table.name()) {
                    self.tables.push(table.name().to_string());
                }
                Ok(report)
            }
            Err(err) => {
                self.record(table_failure(&plugin, &err));
                Err(table_failure(&plugin, &err))
            }
        }
    }

    /// Number of handlers staged so far.
    pub fn staged(&self) -> usize {
        self.staged.len()
    }

    fn record_configuration(&mut self, source: ConfigurationError) {
        let plugin = self.gate.name().to_string();
        self.record(PluginError::Configuration { plugin, source });
    }

    fn record(&mut self, failure: PluginError) {
        self.failure.get_or_insert(failure);
    }

    pub(crate) fn take_failure(&mut self) -> Option<PluginError> {
        self.failure.take()
    }

    pub(crate) fn into_parts(self) -> LoadParts<S> {
        LoadParts {
            slot: self.slot,
            registrations: self.staged,
            tables: self.tables,
        }
    }
}

fn table_failure(plugin: &str, err: &StorageError) -> PluginError {
    let plugin = plugin.to_string();
    match err {
        StorageError::Configuration(source) => PluginError::Configuration {
            plugin,
            source: source.clone(),
        },
        StorageError::Migration(source) => PluginError::Migration {
            plugin,
            source: source.clone(),
        },
        other => PluginError::Init {
            plugin,
            source: other.to_string().into(),
        },
    }
}
