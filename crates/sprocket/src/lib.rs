//! # Sprocket
//!
//! A chat-bot plugin runtime. Inbound messages are matched against
//! plugin-owned handlers; every match runs as its own cooperative task, so a
//! handler waiting on the database or a slow HTTP server never holds up the
//! rest of the bot.
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────┐   ┌────────┐   ┌──────────┐   ┌───────────────────────────┐
//! │ Transport │──▶│ Router │──▶│ Registry │──▶│ task: karma  ^(\S+)\+\+$  │──▶ Storage
//! └───────────┘   └────────┘   └──────────┘──▶│ task: weather ^weather\s  │──▶ HttpBridge
//!       ▲                                     └───────────────────────────┘
//!       └───────────────────────── reply ────────────────┘
//! ```
//!
//! - **Runtime** ([`runtime`]): configuration, logging and the message loop
//! - **Framework** ([`framework`]): registry, router, plugins and storage
//! - **Core** ([`core`]): events, addressing and the scheduler
//! - **Transport** ([`transport`]): the outbound HTTP bridge
//!
//! ## Writing a plugin
//!
//! ```rust,ignore
//! use sprocket::prelude::*;
//!
//! #[derive(Default)]
//! struct Karma;
//!
//! async fn bump(ctx: HandlerContext, _: State<()>) -> Result<(), QueryError> {
//!     let nick = ctx.capture(1).unwrap_or_default().to_string();
//!     ctx.storage()
//!         .execute(
//!             "INSERT INTO karma (nick, score) VALUES (?, 1) \
//!              ON CONFLICT(nick) DO UPDATE SET score = score + 1",
//!             &params![nick],
//!         )
//!         .await?;
//!     Ok(())
//! }
//!
//! #[async_trait]
//! impl Plugin for Karma {
//!     type State = ();
//!
//!     async fn init(&self, ctx: &mut LoadContext<()>) -> Result<(), BoxError> {
//!         ctx.register_table(
//!             &TableDescriptor::new("karma")
//!                 .step(1, "CREATE TABLE karma (nick TEXT PRIMARY KEY, score INTEGER NOT NULL)"),
//!         )
//!         .await?;
//!         ctx.on_match(EventKind::Message, r"^(\S+)\+\+$", bump)?;
//!         Ok(())
//!     }
//! }
//!
//! #[distributed_slice(PLUGINS)]
//! #[linkme(crate = sprocket::linkme)]
//! static KARMA: PluginDescriptor = PluginDescriptor::of::<Karma>("karma");
//! ```
//!
//! ## Features
//!
//! - `toml-config` *(default)*: TOML configuration files
//! - `yaml-config`: YAML configuration files
//! - `json-log`: JSON log output

pub use sprocket_core as core;
pub use sprocket_framework as framework;
pub use sprocket_runtime as runtime;
pub use sprocket_transport as transport;

pub use sprocket_framework::linkme;
pub use sprocket_framework::params;

/// Prelude module for convenient imports.
///
/// ```rust,ignore
/// use sprocket::prelude::*;
/// ```
pub mod prelude {
    // Runtime - main entry point
    pub use sprocket_runtime::{BotConfig, BotRuntime, ConfigLoader, PluginSection};

    // Plugin system
    pub use sprocket_framework::linkme::distributed_slice;
    pub use sprocket_framework::{
        HandlerContext, LoadContext, PLUGINS, Plugin, PluginCatalog, PluginDescriptor,
        PluginMetadata, State,
    };

    // Events
    pub use sprocket_core::{BoxError, Event, EventKind, InboundMessage};

    // Services used from handlers
    pub use sprocket_framework::params;
    pub use sprocket_framework::storage::{QueryError, SqlValue, TableDescriptor, Transaction};
    pub use sprocket_transport::{HttpError, HttpRequest, HttpResponse};

    // Transport boundary for hosts
    pub use sprocket_core::{BoxedTransport, MemoryTransport, Transport};

    pub use async_trait::async_trait;
}
