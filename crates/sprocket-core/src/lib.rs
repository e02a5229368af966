//! # Sprocket Core
//!
//! The lowest layer of the Sprocket chat-bot runtime.
//!
//! - **Events**: [`Event`], [`EventKind`] and the transport tuple [`InboundMessage`]
//! - **Addressing**: detecting messages directed at the bot ([`Addressing`])
//! - **Transport boundary**: the outbound [`Transport`] trait and [`MemoryTransport`]
//! - **Scheduler**: cooperative tasks with named suspension points ([`Scheduler`])
//! - **Text**: a quote-aware [`tokenize`](text::tokenize) and `{name}` templates
//!   ([`format`](text::format))
//!
//! ## Data Flow
//!
//! ```text
//! ┌───────────┐     ┌────────┐     ┌───────────┐     ┌─────────┐
//! │ Transport │────▶│ Router │────▶│ Scheduler │────▶│ Handler │
//! └───────────┘     └────────┘     └───────────┘     └─────────┘
//!       ▲                                                 │
//!       └──────────────────── reply ──────────────────────┘
//! ```
//!
//! The router and handler registry live in `sprocket-framework`; this crate
//! only knows about events and tasks.

pub mod addressing;
pub mod error;
pub mod event;
pub mod id;
pub mod scheduler;
pub mod text;
pub mod transport;

pub use addressing::Addressing;
pub use error::{BoxError, DispatchFault, TransportError, TransportResult};
pub use event::{Event, EventKind, InboundMessage};
pub use id::{PluginId, TaskId};
pub use scheduler::{
    Scheduler, SuspendReason, TaskHandle, TaskMeta, TaskSnapshot, TaskState, current_task,
    suspend, yield_now,
};
pub use transport::{BoxedTransport, MemoryTransport, Outbound, Transport};
