//! The outbound side of the chat connection.
//!
//! The wire protocol is not part of Sprocket: an embedding application
//! implements [`Transport`] for its network and hands it to the runtime.
//! [`MemoryTransport`] records everything sent, which is what tests and
//! offline consoles use.

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::trace;

use crate::error::TransportResult;

/// Sends text to a channel or a user.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Sends a plain message.
    async fn send(&self, target: &str, text: &str) -> TransportResult<()>;

    /// Sends an action ("/me") message.
    ///
    /// Networks without actions can rely on the default, which sends the text
    /// as a plain message.
    async fn me(&self, target: &str, text: &str) -> TransportResult<()> {
        self.send(target, text).await
    }
}

/// A shared transport handle.
pub type BoxedTransport = Arc<dyn Transport>;

/// One message recorded by [`MemoryTransport`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Outbound {
    pub target: String,
    pub text: String,
    pub is_action: bool,
}

/// A transport that keeps every outbound message in memory.
#[derive(Debug, Default)]
pub struct MemoryTransport {
    sent: Mutex<Vec<Outbound>>,
}

impl MemoryTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a copy of everything sent so far.
    pub fn sent(&self) -> Vec<Outbound> {
        self.sent.lock().clone()
    }

    /// Returns the texts sent to `target`, in order.
    pub fn texts_to(&self, target: &str) -> Vec<String> {
        self.sent
            .lock()
            .iter()
            .filter(|m| m.target == target)
            .map(|m| m.text.clone())
            .collect()
    }

    /// Drains the recorded messages.
    pub fn take(&self) -> Vec<Outbound> {
        std::mem::take(&mut *self.sent.lock())
    }

    fn record(&self, target: &str, text: &str, is_action: bool) {
        trace!(target = %target, text = %text, is_action, "Recording outbound message");
        self.sent.lock().push(Outbound {
            target: target.to_string(),
            text: text.to_string(),
            is_action,
        });
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn send(&self, target: &str, text: &str) -> TransportResult<()> {
        self.record(target, text, false);
        Ok(())
    }

    async fn me(&self, target: &str, text: &str) -> TransportResult<()> {
        self.record(target, text, true);
        Ok(())
    }
}
