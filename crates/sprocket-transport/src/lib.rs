//! # Sprocket Transport
//!
//! Outbound network access for plugins. Handlers issue HTTP calls through
//! [`HttpBridge`]; each call is a suspension point, so a handler waiting on
//! a slow server never holds up other handlers.
//!
//! ```rust,ignore
//! use sprocket_transport::{HttpBridge, HttpConfig, HttpRequest};
//!
//! let bridge = HttpBridge::new(&HttpConfig::default())?;
//! let response = bridge
//!     .request(
//!         HttpRequest::get("https://wttr.in/{city}?format=3")
//!             .bind("city", "New York")
//!             .timeout(Duration::from_secs(2)),
//!     )
//!     .await?;
//! ```
//!
//! The chat connection itself is provided by the embedding application via
//! [`sprocket_core::Transport`].

pub mod http;

pub use http::{HttpBridge, HttpConfig, HttpError, HttpRequest, HttpResponse, Method};
