//! The bot runtime.
//!
//! [`BotRuntime`] wires the shared services together, loads the configured
//! plugins and feeds inbound messages to the router until the transport
//! closes, `Ctrl+C` arrives or [`BotRuntime::shutdown_token`] is cancelled.
//!
//! ```rust,ignore
//! use sprocket_runtime::{BotRuntime, config::ConfigLoader};
//!
//! let config = ConfigLoader::new().load()?;
//! let runtime = BotRuntime::start(config, PluginCatalog::linked(), transport).await?;
//! runtime.run(inbound_rx).await?;
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;
use serde_json::Value;
use sprocket_core::{
    Addressing, BoxedTransport, EventKind, InboundMessage, PluginId, Scheduler, TaskMeta,
};
use sprocket_framework::storage::{DIRECTORY_OWNER, Directory, Storage, StorageError};
use sprocket_framework::{
    HandlerRegistry, PluginCatalog, PluginError, PluginInfo, PluginManager, Router, Services,
};
use sprocket_transport::HttpBridge;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::{BotConfig, validate_config};
use crate::error::RuntimeResult;
use crate::logging;

/// A running bot.
pub struct BotRuntime {
    config: BotConfig,
    services: Services,
    router: Arc<Router>,
    manager: Arc<PluginManager>,
    directory: Directory,
    /// Completion of the most recently queued directory update.
    directory_tail: Mutex<Option<oneshot::Receiver<()>>>,
    cancel: CancellationToken,
    stopped: AtomicBool,
}

impl BotRuntime {
    /// Validates `config`, opens the database, builds the shared services
    /// and loads every enabled plugin section in order.
    ///
    /// A plugin that fails to load is logged and reported by
    /// [`PluginManager::plugin_state`]; it does not stop the runtime.
    pub async fn start(
        config: BotConfig,
        catalog: PluginCatalog,
        transport: BoxedTransport,
    ) -> RuntimeResult<Self> {
        validate_config(&config)?;
        if !logging::init_from_config(&config.logging) {
            debug!("A global subscriber is already installed, keeping it");
        }

        let storage = Storage::open(&config.storage).await?;
        let directory = Directory::install(&storage).await?;
        let stale = directory.clear_all().await.map_err(StorageError::from)?;
        if stale > 0 {
            debug!(memberships = stale, "Cleared memberships from a previous session");
        }

        let services = Services {
            storage,
            http: HttpBridge::new(&config.http)?,
            transport,
            scheduler: Scheduler::new(),
        };

        let mut addressing = Addressing::new(config.bot.name.clone());
        for alias in &config.bot.aliases {
            addressing.add_alias(alias.clone());
        }

        let registry = HandlerRegistry::new();
        let router = Arc::new(Router::new(registry.clone(), services.clone(), addressing));
        let manager = Arc::new(PluginManager::new(catalog, registry, services.clone()));

        let requested = config.enabled_plugins().count();
        let loaded = manager.load_all(config.enabled_plugins()).await;
        if loaded < requested {
            warn!(loaded, requested, "Some plugins failed to load");
        }

        info!(
            bot = %config.bot.name,
            storage = %services.storage.location(),
            plugins = loaded,
            handlers = router.registry().len(),
            "Runtime started"
        );

        Ok(Self {
            config,
            services,
            router,
            manager,
            directory,
            directory_tail: Mutex::new(None),
            cancel: CancellationToken::new(),
            stopped: AtomicBool::new(false),
        })
    }

    /// Handles one inbound message and returns the number of handler tasks
    /// spawned.
    ///
    /// Membership bookkeeping is queued as its own task, so routing never
    /// waits on the database.
    pub async fn handle(&self, message: InboundMessage) -> usize {
        self.track_membership(&message);

        if message.kind == EventKind::Nick && message.author == self.router.name() {
            return self.router.rename(message.raw_text);
        }
        self.router.route_inbound(message)
    }

    /// Queues a directory update for joins, parts and nick changes.
    ///
    /// Updates run one after another in arrival order. Failures are logged.
    fn track_membership(&self, message: &InboundMessage) {
        let update = match message.kind {
            EventKind::Join => DirectoryUpdate::Join,
            EventKind::Part if message.author == self.router.name() => DirectoryUpdate::Leave,
            EventKind::Part => DirectoryUpdate::Part,
            EventKind::Nick => DirectoryUpdate::Nick,
            _ => return,
        };

        let directory = self.directory.clone();
        let message = message.clone();
        let (done, finished) = oneshot::channel();
        let previous = self.directory_tail.lock().replace(finished);
        let meta = TaskMeta::new(DIRECTORY_OWNER, format!("{} {}", message.kind, message.author));

        self.services.scheduler.spawn(meta, async move {
            if let Some(previous) = previous {
                // An aborted predecessor drops its sender; carry on regardless.
                let _ = previous.await;
            }
            update.apply(&directory, &message).await;
            let _ = done.send(());
            Ok(())
        });
    }

    /// Handles messages until the channel closes, `Ctrl+C` is received or
    /// the shutdown token is cancelled, then shuts down.
    pub async fn run(&self, mut inbound: mpsc::Receiver<InboundMessage>) -> RuntimeResult<()> {
        info!(bot = %self.router.name(), "Runtime is now running. Press Ctrl+C to stop.");

        let ctrl_c = tokio::signal::ctrl_c();
        tokio::pin!(ctrl_c);

        loop {
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => {
                    info!("Shutdown requested");
                    break;
                }
                result = &mut ctrl_c => {
                    match result {
                        Ok(()) => info!("Received Ctrl+C, shutting down"),
                        Err(e) => warn!(error = %e, "Failed to listen for Ctrl+C, shutting down"),
                    }
                    break;
                }
                message = inbound.recv() => match message {
                    Some(message) => {
                        self.handle(message).await;
                    }
                    None => {
                        info!("Inbound channel closed, shutting down");
                        break;
                    }
                },
            }
        }

        self.shutdown().await;
        Ok(())
    }

    /// Unloads every plugin (each is saved first), waits up to the
    /// configured grace period for running handlers, then closes the
    /// database. Returns `false` if handlers were still running when the
    /// grace period ran out. Later calls do nothing and return `true`.
    pub async fn shutdown(&self) -> bool {
        if self.stopped.swap(true, Ordering::SeqCst) {
            return true;
        }
        self.cancel.cancel();
        info!("Stopping runtime");

        self.manager.unload_all().await;
        let drained = self
            .services
            .scheduler
            .shutdown(self.config.bot.shutdown_grace())
            .await;
        self.services.storage.close().await;

        info!(drained, "Runtime stopped");
        drained
    }

    /// Loads a plugin while running.
    pub async fn load_plugin(&self, name: &str, config: Value) -> RuntimeResult<PluginId> {
        Ok(self.manager.load(name, config).await?)
    }

    /// Unloads a plugin by name while running.
    pub async fn unload_plugin(&self, name: &str) -> RuntimeResult<()> {
        let id = self
            .manager
            .id_of(name)
            .await
            .ok_or_else(|| PluginError::Unknown(name.to_string()))?;
        Ok(self.manager.unload(id).await?)
    }

    pub async fn plugins(&self) -> Vec<PluginInfo> {
        self.manager.loaded().await
    }

    /// A token that stops [`run`](Self::run) when cancelled.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn config(&self) -> &BotConfig {
        &self.config
    }

    pub fn services(&self) -> &Services {
        &self.services
    }

    pub fn router(&self) -> &Router {
        &self.router
    }

    pub fn manager(&self) -> &PluginManager {
        &self.manager
    }

    pub fn directory(&self) -> &Directory {
        &self.directory
    }
}

#[derive(Debug, Clone, Copy)]
enum DirectoryUpdate {
    Join,
    Part,
    /// The bot itself left the channel.
    Leave,
    Nick,
}

impl DirectoryUpdate {
    async fn apply(self, directory: &Directory, message: &InboundMessage) {
        let result = match self {
            Self::Join => directory
                .add_membership(&message.author, &message.target)
                .await
                .map(|()| true),
            Self::Leave => directory
                .clear_channel(&message.target)
                .await
                .map(|cleared| cleared > 0),
            Self::Part => {
                directory
                    .remove_membership(&message.author, &message.target)
                    .await
            }
            Self::Nick => directory.rename_user(&message.author, &message.raw_text).await,
        };

        match result {
            Ok(changed) => debug!(
                kind = %message.kind,
                user = %message.author,
                target = %message.target,
                changed,
                "Directory updated"
            ),
            Err(e) => warn!(
                kind = %message.kind,
                user = %message.author,
                error = %e,
                "Failed to update directory"
            ),
        }
    }
}

impl std::fmt::Debug for BotRuntime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BotRuntime")
            .field("bot", &self.config.bot.name)
            .field("router", &self.router)
            .field("stopped", &self.stopped.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    use async_trait::async_trait;
    use serde::Deserialize;
    use serde_json::json;
    use sprocket_core::{BoxError, MemoryTransport, SuspendReason, TaskState};
    use sprocket_framework::storage::{LEDGER_TABLE, QueryError, TableDescriptor};
    use sprocket_framework::{
        HandlerContext, LoadContext, Plugin, PluginDescriptor, PluginLoadState, State, params,
    };

    use super::*;
    use crate::config::PluginSection;

    // ── plugins ──────────────────────────────────────────────────────────────

    #[derive(Default)]
    struct Karma;

    #[derive(Default)]
    struct KarmaState {
        saves: AtomicUsize,
    }

    async fn bump(ctx: HandlerContext, _state: State<KarmaState>) -> Result<(), QueryError> {
        let nick = ctx.capture(1).unwrap_or_default().to_string();
        ctx.storage()
            .execute(
                "INSERT INTO karma (nick, score) VALUES (?, 1) \
                 ON CONFLICT(nick) DO UPDATE SET score = score + 1",
                &params![nick],
            )
            .await?;
        Ok(())
    }

    async fn report(ctx: HandlerContext, _state: State<KarmaState>) -> Result<(), BoxError> {
        let nick = ctx.capture(1).unwrap_or_default().to_string();
        let score = ctx
            .storage()
            .query_optional("SELECT score FROM karma WHERE nick = ?", &params![nick.as_str()])
            .await?
            .map(|row| row.get::<i64>(0))
            .transpose()?
            .unwrap_or(0);
        ctx.reply(&format!("{nick} has {score} karma")).await?;
        Ok(())
    }

    #[async_trait]
    impl Plugin for Karma {
        type State = KarmaState;

        async fn init(&self, ctx: &mut LoadContext<KarmaState>) -> Result<KarmaState, BoxError> {
            ctx.register_table(
                &TableDescriptor::new("karma")
                    .step(1, "CREATE TABLE karma (nick TEXT PRIMARY KEY, score INTEGER NOT NULL)")
                    .step(2, "CREATE INDEX karma_score ON karma (score)"),
            )
            .await?;
            ctx.on_match(EventKind::Message, r"^(\S+)\+\+$", bump)?;
            ctx.on_match(EventKind::Addressed, r"^karma\s+(\S+)$", report)?;
            Ok(KarmaState::default())
        }

        async fn save(&self, state: &KarmaState) -> Result<(), BoxError> {
            state.saves.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[derive(Default)]
    struct Weather;

    #[derive(Deserialize)]
    struct WeatherConfig {
        #[serde(default = "celsius")]
        units: String,
    }

    fn celsius() -> String {
        "C".into()
    }

    #[async_trait]
    impl Plugin for Weather {
        type State = String;

        async fn init(&self, ctx: &mut LoadContext<String>) -> Result<String, BoxError> {
            let config: WeatherConfig = ctx.config()?;
            ctx.on_match(
                EventKind::Addressed,
                r"^weather\s+(\S+)$",
                |ctx: HandlerContext, units: State<String>| async move {
                    let city = ctx.capture(1).unwrap_or_default().to_string();
                    ctx.reply(&format!("{city}: 20{}", units.as_str())).await
                },
            )?;
            Ok(config.units)
        }
    }

    fn catalog() -> PluginCatalog {
        PluginCatalog::new()
            .with(PluginDescriptor::of::<Karma>("karma"))
            .with(PluginDescriptor::of::<Weather>("weather"))
    }

    fn config(plugins: Vec<PluginSection>) -> BotConfig {
        let mut config = BotConfig::default();
        config.bot.name = "sprocket".into();
        config.bot.aliases = vec!["sp".into()];
        config.bot.shutdown_grace_ms = 2000;
        config.plugins = plugins;
        config
    }

    async fn start(plugins: Vec<PluginSection>) -> (BotRuntime, Arc<MemoryTransport>) {
        let transport = Arc::new(MemoryTransport::new());
        let runtime = BotRuntime::start(config(plugins), catalog(), transport.clone())
            .await
            .unwrap();
        (runtime, transport)
    }

    async fn score(runtime: &BotRuntime, nick: &str) -> Option<i64> {
        runtime
            .services()
            .storage
            .query_optional("SELECT score FROM karma WHERE nick = ?", &params![nick])
            .await
            .unwrap()
            .map(|row| row.get(0).unwrap())
    }

    // ── tests ────────────────────────────────────────────────────────────────

    #[tokio::test]
    async fn karma_table_is_migrated_on_start() {
        let (runtime, _) = start(vec![PluginSection::new("karma")]).await;
        let storage = &runtime.services().storage;

        assert_eq!(storage.table_version("karma").await.unwrap(), 2);
        let ledger = storage
            .query(&format!("SELECT version FROM {LEDGER_TABLE} WHERE name = 'karma'"), &[])
            .await
            .unwrap();
        assert_eq!(ledger.len(), 1);

        let index = storage
            .query(
                "SELECT name FROM sqlite_master WHERE type = 'index' AND name = 'karma_score'",
                &[],
            )
            .await
            .unwrap();
        assert_eq!(index.len(), 1);
        runtime.shutdown().await;
    }

    #[tokio::test]
    async fn addressed_commands_reach_only_matching_handlers() {
        let (runtime, transport) = start(vec![
            PluginSection::new("karma"),
            PluginSection::new("weather").with_config(json!({ "units": "F" })),
        ])
        .await;

        runtime.handle(InboundMessage::channel("bob", "#rust", "alice++")).await;
        runtime.services().scheduler.wait_idle().await;

        let spawned = runtime
            .handle(InboundMessage::channel("bob", "#rust", "sprocket: karma alice"))
            .await;
        assert_eq!(spawned, 1);
        runtime.services().scheduler.wait_idle().await;
        assert_eq!(transport.texts_to("#rust"), vec!["alice has 1 karma"]);

        runtime
            .handle(InboundMessage::private("carol", "weather Paris"))
            .await;
        runtime.services().scheduler.wait_idle().await;
        assert_eq!(transport.texts_to("carol"), vec!["Paris: 20F"]);

        // Not addressed: neither command runs.
        assert_eq!(
            runtime
                .handle(InboundMessage::channel("bob", "#rust", "karma alice"))
                .await,
            0
        );
        runtime.shutdown().await;
    }

    #[tokio::test]
    async fn unknown_and_disabled_plugins_do_not_stop_startup() {
        let mut disabled = PluginSection::new("weather");
        disabled.enabled = false;
        let (runtime, _) = start(vec![
            PluginSection::new("karma"),
            PluginSection::new("missing"),
            disabled,
        ])
        .await;

        let names: Vec<_> = runtime.plugins().await.into_iter().map(|p| p.name).collect();
        assert_eq!(names, vec!["karma".to_string()]);
        assert!(matches!(
            runtime.manager().plugin_state("missing").await,
            Some(PluginLoadState::Unavailable(_))
        ));
        assert_eq!(runtime.manager().plugin_state("weather").await, None);
        runtime.shutdown().await;
    }

    #[tokio::test]
    async fn invalid_configuration_is_rejected() {
        let mut bad = config(Vec::new());
        bad.bot.name = String::new();
        let err = BotRuntime::start(bad, catalog(), Arc::new(MemoryTransport::new())).await;
        assert!(matches!(err, Err(crate::RuntimeError::Config(_))));
    }

    #[tokio::test]
    async fn membership_follows_joins_parts_and_nicks() {
        let (runtime, _) = start(Vec::new()).await;
        let directory = runtime.directory();

        runtime
            .handle(InboundMessage::membership(EventKind::Join, "alice", "#rust"))
            .await;
        runtime
            .handle(InboundMessage::membership(EventKind::Join, "bob", "#rust"))
            .await;
        runtime.handle(InboundMessage::nick("bob", "robert")).await;
        runtime.services().scheduler.wait_idle().await;

        let nicks: Vec<_> = directory
            .members("#rust")
            .await
            .unwrap()
            .into_iter()
            .map(|m| m.nick)
            .collect();
        assert_eq!(nicks, vec!["alice", "robert"]);

        runtime
            .handle(InboundMessage::membership(EventKind::Part, "alice", "#rust"))
            .await;
        runtime.services().scheduler.wait_idle().await;
        assert_eq!(directory.members("#rust").await.unwrap().len(), 1);

        runtime
            .handle(InboundMessage::membership(EventKind::Part, "sprocket", "#rust"))
            .await;
        runtime.services().scheduler.wait_idle().await;
        assert!(directory.members("#rust").await.unwrap().is_empty());
        runtime.shutdown().await;
    }

    #[tokio::test]
    async fn own_nick_change_renames_the_bot() {
        let (runtime, _) = start(vec![PluginSection::new("karma")]).await;

        runtime.handle(InboundMessage::nick("sprocket", "cog")).await;
        assert_eq!(runtime.router().name(), "cog");

        runtime.handle(InboundMessage::channel("bob", "#rust", "alice++")).await;
        runtime.services().scheduler.wait_idle().await;
        assert_eq!(
            runtime
                .handle(InboundMessage::channel("bob", "#rust", "cog: karma alice"))
                .await,
            1
        );
        runtime.shutdown().await;
    }

    #[tokio::test]
    async fn run_stops_when_the_channel_closes() {
        let (runtime, transport) = start(vec![PluginSection::new("karma")]).await;
        let (tx, rx) = mpsc::channel(8);

        tx.send(InboundMessage::channel("bob", "#rust", "alice++")).await.unwrap();
        tx.send(InboundMessage::channel("bob", "#rust", "alice++")).await.unwrap();
        tx.send(InboundMessage::channel("bob", "#rust", "sp, karma alice")).await.unwrap();
        drop(tx);

        runtime.run(rx).await.unwrap();

        assert!(runtime.plugins().await.is_empty());
        assert_eq!(runtime.services().scheduler.len(), 0);
        assert_eq!(transport.sent().len(), 1);
        assert!(transport.texts_to("#rust")[0].starts_with("alice has"));
    }

    #[tokio::test]
    async fn cancelling_the_token_stops_run() {
        let (runtime, _) = start(vec![PluginSection::new("karma")]).await;
        let (_tx, rx) = mpsc::channel::<InboundMessage>(1);

        let token = runtime.shutdown_token();
        token.cancel();
        tokio::time::timeout(Duration::from_secs(5), runtime.run(rx))
            .await
            .unwrap()
            .unwrap();
        assert!(runtime.plugins().await.is_empty());
        assert!(runtime.shutdown().await);
    }

    #[tokio::test]
    async fn plugin_is_unloaded_while_its_handler_waits_on_a_query() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = config(vec![PluginSection::new("karma")]);
        config.storage = sprocket_framework::storage::StorageConfig::file(dir.path().join("bot.db"));
        config.storage.max_connections = 2;
        let runtime = BotRuntime::start(config, catalog(), Arc::new(MemoryTransport::new()))
            .await
            .unwrap();

        // An open write transaction holds the database; the handler's insert
        // waits behind it.
        let mut blocker = runtime.services().storage.begin().await.unwrap();
        blocker
            .execute("INSERT INTO karma (nick, score) VALUES ('seed', 0)", &[])
            .await
            .unwrap();

        assert_eq!(
            runtime
                .handle(InboundMessage::channel("bob", "#rust", "alice++"))
                .await,
            1
        );
        let handle = runtime.services().scheduler.handles().remove(0);
        let state = tokio::time::timeout(
            Duration::from_secs(5),
            handle.wait_until(|s| s == TaskState::Suspended(SuspendReason::Query)),
        )
        .await
        .unwrap();
        assert_eq!(state, TaskState::Suspended(SuspendReason::Query));

        runtime.unload_plugin("karma").await.unwrap();
        assert_eq!(
            runtime
                .handle(InboundMessage::channel("bob", "#rust", "alice++"))
                .await,
            0
        );
        assert!(!handle.state().is_terminal());

        blocker.commit().await.unwrap();
        assert_eq!(handle.wait().await, TaskState::Completed);
        assert_eq!(score(&runtime, "alice").await, Some(1));
        assert_eq!(score(&runtime, "seed").await, Some(0));
        runtime.shutdown().await;
    }

    #[tokio::test]
    async fn routing_does_not_wait_for_directory_writes() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = config(vec![PluginSection::new("karma")]);
        config.storage = sprocket_framework::storage::StorageConfig::file(dir.path().join("bot.db"));
        config.storage.max_connections = 2;
        let runtime = BotRuntime::start(config, catalog(), Arc::new(MemoryTransport::new()))
            .await
            .unwrap();

        let mut blocker = runtime.services().storage.begin().await.unwrap();
        blocker
            .execute("INSERT INTO channel (name) VALUES ('#held')", &[])
            .await
            .unwrap();

        let burst = async {
            runtime
                .handle(InboundMessage::membership(EventKind::Join, "alice", "#rust"))
                .await;
            runtime
                .handle(InboundMessage::membership(EventKind::Join, "bob", "#rust"))
                .await;
            runtime
                .handle(InboundMessage::membership(EventKind::Part, "alice", "#rust"))
                .await;
            runtime
                .handle(InboundMessage::channel("bob", "#rust", "carol++"))
                .await
        };
        let spawned = tokio::time::timeout(Duration::from_millis(500), burst)
            .await
            .unwrap();
        assert_eq!(spawned, 1);

        blocker.commit().await.unwrap();
        runtime.services().scheduler.wait_idle().await;

        let nicks: Vec<_> = runtime
            .directory()
            .members("#rust")
            .await
            .unwrap()
            .into_iter()
            .map(|m| m.nick)
            .collect();
        assert_eq!(nicks, vec!["bob"]);
        assert_eq!(score(&runtime, "carol").await, Some(1));
        runtime.shutdown().await;
    }

    #[tokio::test]
    async fn plugins_can_be_loaded_at_runtime() {
        let (runtime, transport) = start(Vec::new()).await;
        runtime.load_plugin("weather", json!({})).await.unwrap();
        assert!(matches!(
            runtime.load_plugin("weather", json!({})).await,
            Err(crate::RuntimeError::Plugin(PluginError::AlreadyLoaded(_)))
        ));

        runtime
            .handle(InboundMessage::channel("bob", "#rust", "sprocket: weather Oslo"))
            .await;
        runtime.services().scheduler.wait_idle().await;
        assert_eq!(transport.texts_to("#rust"), vec!["Oslo: 20C"]);

        assert!(matches!(
            runtime.unload_plugin("karma").await,
            Err(crate::RuntimeError::Plugin(PluginError::Unknown(_)))
        ));
        runtime.shutdown().await;
    }
}
