//! Plugin lifecycle management.
//!
//! [`PluginManager`] instantiates plugins from a [`PluginCatalog`], runs their
//! `init`, and commits what they staged only when everything succeeded. A
//! plugin that fails to load leaves nothing behind: no handlers, no table
//! claims. It is reported as [`PluginLoadState::Unavailable`] with the reason.
//!
//! Unloading turns the plugin's gate off first so the router stops spawning
//! its handlers, then saves and tears it down. Handler tasks that are already
//! running are left to finish.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::Value;
use sprocket_core::PluginId;
use tokio::sync::RwLock as AsyncRwLock;
use tracing::{error, info, warn};

use crate::context::Services;
use crate::error::{PluginError, PluginResult};
use crate::plugin::{LivePlugin, LoadEnv, PluginCatalog, PluginMetadata, Prepared};
use crate::registry::{HandlerId, HandlerRegistry, PluginGate};

/// Whether a plugin is usable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PluginLoadState {
    Active(PluginId),
    /// The last load attempt failed.
    Unavailable(String),
}

/// Summary of a loaded plugin.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PluginInfo {
    pub id: PluginId,
    pub name: String,
    pub metadata: PluginMetadata,
    pub handlers: usize,
    pub tables: Vec<String>,
}

struct PluginEntry {
    id: PluginId,
    name: String,
    live: Box<dyn LivePlugin>,
    gate: Arc<PluginGate>,
    handlers: Vec<HandlerId>,
    tables: Vec<String>,
    metadata: PluginMetadata,
}

impl PluginEntry {
    fn info(&self) -> PluginInfo {
        PluginInfo {
            id: self.id,
            name: self.name.clone(),
            metadata: self.metadata,
            handlers: self.handlers.len(),
            tables: self.tables.clone(),
        }
    }
}

pub struct PluginManager {
    catalog: PluginCatalog,
    registry: HandlerRegistry,
    services: Services,
    /// Loaded plugins in load order.
    plugins: AsyncRwLock<Vec<PluginEntry>>,
    unavailable: Mutex<HashMap<String, String>>,
}

impl PluginManager {
    pub fn new(catalog: PluginCatalog, registry: HandlerRegistry, services: Services) -> Self {
        Self {
            catalog,
            registry,
            services,
            plugins: AsyncRwLock::new(Vec::new()),
            unavailable: Mutex::new(HashMap::new()),
        }
    }

    pub fn catalog(&self) -> &PluginCatalog {
        &self.catalog
    }

    pub fn registry(&self) -> &HandlerRegistry {
        &self.registry
    }

    /// Loads the plugin called `name` with its configuration section.
    pub async fn load(&self, name: &str, config: Value) -> PluginResult<PluginId> {
        let Some(descriptor) = self.catalog.get(name).copied() else {
            let err = PluginError::Unknown(name.to_string());
            self.mark_unavailable(name, &err);
            return Err(err);
        };
        if !descriptor.is_compatible() {
            warn!(plugin = name, "Loading plugin built against an incompatible API version");
        }

        let mut plugins = self.plugins.write().await;
        if plugins.iter().any(|p| p.name == name) {
            return Err(PluginError::AlreadyLoaded(name.to_string()));
        }

        let id = PluginId::next();
        let gate = PluginGate::new(id, descriptor.name);
        let env = LoadEnv {
            gate: Arc::clone(&gate),
            config: Arc::new(config),
            services: self.services.clone(),
        };

        let prepared: Prepared = match descriptor.instantiate().0.load(env).await {
            Ok(prepared) => prepared,
            Err(err) => {
                let released = self.services.storage.release_tables(name);
                error!(
                    plugin = name,
                    error = %err,
                    released_tables = released.len(),
                    "Plugin failed to load"
                );
                self.mark_unavailable(name, &err);
                return Err(err);
            }
        };

        let handlers = self.registry.register_all(&gate, prepared.registrations);
        info!(
            plugin = name,
            plugin_id = %id,
            version = prepared.metadata.version,
            handlers = handlers.len(),
            tables = prepared.tables.len(),
            "Plugin loaded"
        );
        plugins.push(PluginEntry {
            id,
            name: name.to_string(),
            live: prepared.live,
            gate,
            handlers,
            tables: prepared.tables,
            metadata: prepared.metadata,
        });
        self.unavailable.lock().remove(name);
        Ok(id)
    }

    /// Loads every `(name, config)` section in order, returning how many
    /// loaded. Failures are logged and reported through [`plugin_state`].
    ///
    /// [`plugin_state`]: Self::plugin_state
    pub async fn load_all<I, N>(&self, sections: I) -> usize
    where
        I: IntoIterator<Item = (N, Value)>,
        N: AsRef<str>,
    {
        let mut loaded = 0;
        for (name, config) in sections {
            if self.load(name.as_ref(), config).await.is_ok() {
                loaded += 1;
            }
        }
        loaded
    }

    /// Unloads a plugin. Its running handler tasks finish on their own.
    pub async fn unload(&self, id: PluginId) -> PluginResult<()> {
        let entry = {
            let mut plugins = self.plugins.write().await;
            let index = plugins
                .iter()
                .position(|p| p.id == id)
                .ok_or(PluginError::NotLoaded(id))?;
            plugins.remove(index)
        };

        entry.gate.deactivate();
        if let Err(e) = entry.live.save().await {
            warn!(plugin = %entry.name, error = %e, "Failed to save plugin state before unload");
        }
        entry.live.unload().await;

        let removed = self.registry.remove_plugin(id);
        self.services.storage.release_tables(&entry.name);
        info!(
            plugin = %entry.name,
            plugin_id = %id,
            handlers = removed,
            in_flight = self.services.scheduler.in_flight(id),
            "Plugin unloaded"
        );
        Ok(())
    }

    /// Unloads every plugin, most recently loaded first.
    pub async fn unload_all(&self) {
        let ids: Vec<PluginId> = self.plugins.read().await.iter().rev().map(|p| p.id).collect();
        for id in ids {
            if let Err(e) = self.unload(id).await {
                warn!(plugin_id = %id, error = %e, "Failed to unload plugin");
            }
        }
    }

    /// Runs one plugin's save hook.
    pub async fn save(&self, id: PluginId) -> PluginResult<()> {
        let plugins = self.plugins.read().await;
        let entry = plugins
            .iter()
            .find(|p| p.id == id)
            .ok_or(PluginError::NotLoaded(id))?;
        entry.live.save().await.map_err(|source| PluginError::Save {
            plugin: entry.name.clone(),
            source,
        })
    }

    /// Saves every plugin. Failures are logged; returns how many failed.
    pub async fn save_all(&self) -> usize {
        let plugins = self.plugins.read().await;
        let mut failed = 0;
        for entry in plugins.iter() {
            if let Err(e) = entry.live.save().await {
                failed += 1;
                error!(plugin = %entry.name, error = %e, "Failed to save plugin state");
            }
        }
        failed
    }

    /// `None` when the plugin was never loaded or has been unloaded.
    pub async fn plugin_state(&self, name: &str) -> Option<PluginLoadState> {
        if let Some(entry) = self.plugins.read().await.iter().find(|p| p.name == name) {
            return Some(PluginLoadState::Active(entry.id));
        }
        self.unavailable
            .lock()
            .get(name)
            .map(|reason| PluginLoadState::Unavailable(reason.clone()))
    }

    /// Loaded plugins in load order.
    pub async fn loaded(&self) -> Vec<PluginInfo> {
        self.plugins.read().await.iter().map(PluginEntry::info).collect()
    }

    pub async fn id_of(&self, name: &str) -> Option<PluginId> {
        self.plugins
            .read()
            .await
            .iter()
            .find(|p| p.name == name)
            .map(|p| p.id)
    }

    /// The help text of a loaded plugin.
    pub async fn help(&self, name: &str) -> Option<&'static str> {
        self.plugins
            .read()
            .await
            .iter()
            .find(|p| p.name == name)
            .and_then(|p| p.metadata.help)
    }

    fn mark_unavailable(&self, name: &str, err: &PluginError) {
        self.unavailable
            .lock()
            .insert(name.to_string(), err.to_string());
    }
}

impl std::fmt::Debug for PluginManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginManager")
            .field("catalog", &self.catalog)
            .field("registry", &self.registry)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::time::Duration;

    use async_trait::async_trait;
    use serde::Deserialize;
    use serde_json::json;
    use sprocket_core::{
        Addressing, BoxError, Event, EventKind, InboundMessage, SuspendReason, TaskState,
    };

    use super::*;
    use crate::context::{HandlerContext, test_services};
    use crate::error::ConfigurationError;
    use crate::params;
    use crate::plugin::{ErasedPlugin, LoadContext, PLUGIN_API_VERSION, Plugin, PluginDescriptor, State};
    use crate::router::Router;
    use crate::storage::{QueryError, TableDescriptor};

    // ── karma ────────────────────────────────────────────────────────────────

    #[derive(Default)]
    struct Karma;

    #[derive(Default)]
    struct KarmaState {
        bumps: AtomicUsize,
    }

    fn karma_table() -> TableDescriptor {
        TableDescriptor::new("karma")
            .step(1, "CREATE TABLE karma (nick TEXT PRIMARY KEY, score INTEGER NOT NULL)")
            .step(2, "CREATE INDEX karma_score ON karma (score)")
    }

    async fn bump(ctx: HandlerContext, state: State<KarmaState>) -> Result<(), QueryError> {
        let nick = ctx.capture(1).unwrap_or_default().to_string();
        ctx.storage()
            .execute(
                "INSERT INTO karma (nick, score) VALUES (?, 1) \
                 ON CONFLICT(nick) DO UPDATE SET score = score + 1",
                &params![nick],
            )
            .await?;
        state.bumps.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    #[async_trait]
    impl Plugin for Karma {
        type State = KarmaState;

        fn metadata(&self) -> PluginMetadata {
            PluginMetadata {
                version: "1.0.0",
                desc: "Counts karma",
                help: Some("<nick>++ gives karma"),
            }
        }

        async fn init(&self, ctx: &mut LoadContext<KarmaState>) -> Result<KarmaState, BoxError> {
            ctx.register_table(&karma_table()).await?;
            ctx.on_match(EventKind::Message, r"^(\S+)\+\+$", bump)?;
            Ok(KarmaState::default())
        }
    }

    // ── plugins that fail to load ────────────────────────────────────────────

    #[derive(Default)]
    struct BadPattern;

    #[async_trait]
    impl Plugin for BadPattern {
        type State = ();

        async fn init(&self, ctx: &mut LoadContext<()>) -> Result<(), BoxError> {
            ctx.on(EventKind::Message, |_, _| async {});
            // The error is ignored on purpose; the load must fail anyway.
            let _ = ctx.on_match(EventKind::Message, "(unclosed", |_, _| async {});
            Ok(())
        }
    }

    #[derive(Default)]
    struct FailingInit;

    #[async_trait]
    impl Plugin for FailingInit {
        type State = ();

        async fn init(&self, ctx: &mut LoadContext<()>) -> Result<(), BoxError> {
            ctx.register_table(&TableDescriptor::new("scratch").step(1, "CREATE TABLE scratch (x)"))
                .await?;
            ctx.on(EventKind::Message, |_, _| async {});
            Err("database credentials missing".into())
        }
    }

    #[derive(Default)]
    struct Greeter;

    #[derive(Deserialize)]
    struct GreeterConfig {
        greeting: String,
    }

    #[async_trait]
    impl Plugin for Greeter {
        type State = String;

        async fn init(&self, ctx: &mut LoadContext<String>) -> Result<String, BoxError> {
            let config: GreeterConfig = ctx.config()?;
            ctx.on(EventKind::Join, |ctx, greeting: State<String>| async move {
                format!("{}, {}", *greeting, ctx.event().author())
            });
            Ok(config.greeting)
        }
    }

    // ── lifecycle tracking ───────────────────────────────────────────────────

    static TRACKED_SAVES: AtomicUsize = AtomicUsize::new(0);
    static TRACKED_UNLOADED: AtomicBool = AtomicBool::new(false);

    #[derive(Default)]
    struct Tracked;

    #[async_trait]
    impl Plugin for Tracked {
        type State = ();

        async fn init(&self, ctx: &mut LoadContext<()>) -> Result<(), BoxError> {
            ctx.on(EventKind::Message, |_, _| async {});
            Ok(())
        }

        async fn save(&self, _state: &()) -> Result<(), BoxError> {
            TRACKED_SAVES.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn unload(&self, _state: &()) {
            TRACKED_UNLOADED.store(true, Ordering::SeqCst);
        }
    }

    static UNLOAD_ORDER: Mutex<Vec<&'static str>> = Mutex::new(Vec::new());

    struct Ordered(&'static str);

    #[async_trait]
    impl Plugin for Ordered {
        type State = ();

        async fn init(&self, _ctx: &mut LoadContext<()>) -> Result<(), BoxError> {
            Ok(())
        }

        async fn save(&self, _state: &()) -> Result<(), BoxError> {
            Err(format!("{} cannot save", self.0).into())
        }

        async fn unload(&self, _state: &()) {
            UNLOAD_ORDER.lock().push(self.0);
        }
    }

    fn catalog() -> PluginCatalog {
        PluginCatalog::new()
            .with(PluginDescriptor::of::<Karma>("karma"))
            .with(PluginDescriptor::of::<BadPattern>("bad-pattern"))
            .with(PluginDescriptor::of::<FailingInit>("failing-init"))
            .with(PluginDescriptor::of::<Greeter>("greeter"))
            .with(PluginDescriptor::of::<Tracked>("tracked"))
            .with(PluginDescriptor {
                api_version: PLUGIN_API_VERSION,
                name: "first",
                create: || ErasedPlugin::new(Ordered("first")),
            })
            .with(PluginDescriptor {
                api_version: PLUGIN_API_VERSION,
                name: "second",
                create: || ErasedPlugin::new(Ordered("second")),
            })
    }

    async fn manager() -> (PluginManager, Services) {
        let (services, _) = test_services().await;
        let manager = PluginManager::new(catalog(), HandlerRegistry::new(), services.clone());
        (manager, services)
    }

    #[tokio::test]
    async fn load_commits_handlers_and_tables() {
        let (manager, services) = manager().await;
        let id = manager.load("karma", Value::Null).await.unwrap();

        assert_eq!(manager.plugin_state("karma").await, Some(PluginLoadState::Active(id)));
        let loaded = manager.loaded().await;
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].handlers, 1);
        assert_eq!(loaded[0].tables, ["karma"]);
        assert_eq!(loaded[0].metadata.version, "1.0.0");
        assert_eq!(manager.help("karma").await, Some("<nick>++ gives karma"));
        assert_eq!(manager.registry().count_for(id), 1);
        assert_eq!(services.storage.table_version("karma").await.unwrap(), 2);

        let err = manager.load("karma", Value::Null).await.unwrap_err();
        assert!(matches!(err, PluginError::AlreadyLoaded(_)));
    }

    #[tokio::test]
    async fn unknown_plugins_are_unavailable() {
        let (manager, _) = manager().await;
        let err = manager.load("nope", Value::Null).await.unwrap_err();
        assert!(matches!(err, PluginError::Unknown(_)));
        assert!(matches!(
            manager.plugin_state("nope").await,
            Some(PluginLoadState::Unavailable(_))
        ));
        assert_eq!(manager.plugin_state("karma").await, None);
    }

    #[tokio::test]
    async fn recorded_configuration_error_fails_the_load() {
        let (manager, _) = manager().await;
        let err = manager.load("bad-pattern", Value::Null).await.unwrap_err();
        assert!(matches!(
            err,
            PluginError::Configuration {
                source: ConfigurationError::InvalidPattern { .. },
                ..
            }
        ));
        assert!(manager.registry().is_empty());
        assert!(manager.loaded().await.is_empty());
        let Some(PluginLoadState::Unavailable(reason)) = manager.plugin_state("bad-pattern").await
        else {
            panic!("plugin should be unavailable");
        };
        assert!(reason.contains("(unclosed"));
    }

    #[tokio::test]
    async fn failed_init_releases_tables() {
        let (manager, services) = manager().await;
        let err = manager.load("failing-init", Value::Null).await.unwrap_err();
        assert!(matches!(err, PluginError::Init { .. }));
        assert!(err.to_string().contains("failing-init"));
        assert!(manager.registry().is_empty());
        assert!(services.storage.tables().is_empty());
    }

    #[tokio::test]
    async fn configuration_sections_are_deserialised() {
        let (manager, services) = manager().await;
        let err = manager.load("greeter", json!({})).await.unwrap_err();
        assert!(matches!(
            err,
            PluginError::Configuration {
                source: ConfigurationError::InvalidValue { .. },
                ..
            }
        ));

        manager.load("greeter", json!({ "greeting": "welcome" })).await.unwrap();
        assert!(matches!(
            manager.plugin_state("greeter").await,
            Some(PluginLoadState::Active(_))
        ));

        let transport = Arc::new(sprocket_core::MemoryTransport::new());
        let services = Services {
            transport: transport.clone(),
            ..services
        };
        let router = Router::new(manager.registry().clone(), services, Addressing::new("sprocket"));
        router.route_inbound(InboundMessage::membership(EventKind::Join, "bob", "#rust"));
        router.services().scheduler.wait_idle().await;
        assert_eq!(transport.texts_to("#rust"), ["welcome, bob"]);
    }

    #[tokio::test]
    async fn unload_saves_tears_down_and_removes_handlers() {
        let (manager, services) = manager().await;
        let id = manager.load("tracked", Value::Null).await.unwrap();
        manager.save(id).await.unwrap();
        let saves_before = TRACKED_SAVES.load(Ordering::SeqCst);

        manager.unload(id).await.unwrap();
        assert_eq!(TRACKED_SAVES.load(Ordering::SeqCst), saves_before + 1);
        assert!(TRACKED_UNLOADED.load(Ordering::SeqCst));
        assert!(manager.registry().is_empty());
        assert_eq!(manager.plugin_state("tracked").await, None);
        assert!(matches!(manager.unload(id).await, Err(PluginError::NotLoaded(_))));
        assert!(matches!(manager.save(id).await, Err(PluginError::NotLoaded(_))));

        // Unloaded plugins can be loaded again.
        manager.load("tracked", Value::Null).await.unwrap();
        assert_eq!(services.scheduler.len(), 0);
    }

    #[tokio::test]
    async fn save_all_and_unload_all() {
        let (manager, _) = manager().await;
        let loaded = manager
            .load_all([("first", Value::Null), ("second", Value::Null), ("nope", Value::Null)])
            .await;
        assert_eq!(loaded, 2);

        assert_eq!(manager.save_all().await, 2);
        let first = manager.id_of("first").await.unwrap();
        assert!(matches!(manager.save(first).await, Err(PluginError::Save { .. })));

        manager.unload_all().await;
        assert!(manager.loaded().await.is_empty());
        assert_eq!(*UNLOAD_ORDER.lock(), ["second", "first"]);
    }

    #[tokio::test]
    async fn unloading_while_a_handler_waits_on_the_database() {
        let (manager, services) = manager().await;
        let id = manager.load("karma", Value::Null).await.unwrap();
        let router = Router::new(
            manager.registry().clone(),
            services.clone(),
            Addressing::new("sprocket"),
        );

        // Hold the only connection so the handler's query has to wait.
        let blocker = services.storage.begin().await.unwrap();

        assert_eq!(router.route(Event::new(EventKind::Message, "alice++", "bob", "#rust", false)), 1);
        let handle = services.scheduler.handles().remove(0);
        let state = tokio::time::timeout(
            Duration::from_secs(5),
            handle.wait_until(|s| s == TaskState::Suspended(SuspendReason::Query)),
        )
        .await
        .unwrap();
        assert_eq!(state, TaskState::Suspended(SuspendReason::Query));

        manager.unload(id).await.unwrap();
        assert_eq!(manager.registry().count_for(id), 0);
        assert_eq!(handle.state(), TaskState::Suspended(SuspendReason::Query));
        assert_eq!(router.route(Event::new(EventKind::Message, "alice++", "bob", "#rust", false)), 0);

        drop(blocker);
        assert_eq!(handle.wait().await, TaskState::Completed);

        let score: i64 = services
            .storage
            .query_optional("SELECT score FROM karma WHERE nick = ?", &params!["alice"])
            .await
            .unwrap()
            .unwrap()
            .get(0)
            .unwrap();
        assert_eq!(score, 1);
    }
}
