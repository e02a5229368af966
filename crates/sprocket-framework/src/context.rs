//! Per-invocation handler context.

use std::future::Future;
use std::sync::Arc;

use sprocket_core::{
    BoxError, BoxedTransport, Event, PluginId, Scheduler, TaskHandle, TaskMeta, TransportResult,
};
use sprocket_transport::HttpBridge;

use crate::registry::{Captures, HandlerId, PluginGate};
use crate::storage::Storage;

/// Process-wide services shared by every plugin.
#[derive(Clone)]
pub struct Services {
    pub storage: Storage,
    pub http: HttpBridge,
    pub transport: BoxedTransport,
    pub scheduler: Scheduler,
}

impl std::fmt::Debug for Services {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Services")
            .field("storage", &self.storage)
            .field("tasks", &self.scheduler.len())
            .finish_non_exhaustive()
    }
}

struct Invocation {
    event: Arc<Event>,
    captures: Captures,
    handler: HandlerId,
    gate: Arc<PluginGate>,
    services: Services,
}

/// Everything a handler sees about the event it is handling.
///
/// Cloning is cheap; all clones refer to the same invocation.
#[derive(Clone)]
pub struct HandlerContext {
    inner: Arc<Invocation>,
}

impl HandlerContext {
    pub(crate) fn new(
        event: Arc<Event>,
        captures: Captures,
        handler: HandlerId,
        gate: Arc<PluginGate>,
        services: Services,
    ) -> Self {
        Self {
            inner: Arc::new(Invocation {
                event,
                captures,
                handler,
                gate,
                services,
            }),
        }
    }

    pub fn event(&self) -> &Event {
        &self.inner.event
    }

    /// Capture groups of the handler's filter.
    pub fn captures(&self) -> &Captures {
        &self.inner.captures
    }

    /// Capture group `index`, or `None` if it did not match.
    pub fn capture(&self, index: usize) -> Option<&str> {
        self.inner.captures.get(index)
    }

    /// Shorthand for [`Event::text`].
    pub fn text(&self) -> &str {
        self.inner.event.text()
    }

    pub fn plugin_id(&self) -> PluginId {
        self.inner.gate.id()
    }

    pub fn plugin_name(&self) -> &str {
        self.inner.gate.name()
    }

    pub fn handler_id(&self) -> HandlerId {
        self.inner.handler
    }

    pub fn storage(&self) -> &Storage {
        &self.inner.services.storage
    }

    pub fn http(&self) -> &HttpBridge {
        &self.inner.services.http
    }

    pub fn services(&self) -> &Services {
        &self.inner.services
    }

    /// Sends `text` to the event's reply target.
    pub async fn reply(&self, text: &str) -> TransportResult<()> {
        self.inner
            .services
            .transport
            .send(self.inner.event.reply_target(), text)
            .await
    }

    /// Sends `text` to an arbitrary target.
    pub async fn send(&self, target: &str, text: &str) -> TransportResult<()> {
        self.inner.services.transport.send(target, text).await
    }

    /// Sends an action to the event's reply target.
    pub async fn me(&self, text: &str) -> TransportResult<()> {
        self.inner
            .services
            .transport
            .me(self.inner.event.reply_target(), text)
            .await
    }

    /// Starts a follow-up task owned by the same plugin.
    pub fn spawn<F>(&self, label: impl Into<String>, body: F) -> TaskHandle
    where
        F: Future<Output = Result<(), BoxError>> + Send + 'static,
    {
        let gate = &self.inner.gate;
        let meta = TaskMeta::new(gate.name_arc(), label).with_plugin(gate.id());
        self.inner.services.scheduler.spawn(meta, body)
    }
}

impl std::fmt::Debug for HandlerContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerContext")
            .field("event", &self.inner.event)
            .field("handler", &self.inner.handler)
            .field("plugin", &self.inner.gate.name())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
pub(crate) async fn test_services() -> (Services, Arc<sprocket_core::MemoryTransport>) {
    let transport = Arc::new(sprocket_core::MemoryTransport::new());
    let services = Services {
        storage: Storage::in_memory().await.unwrap(),
        http: HttpBridge::new(&sprocket_transport::HttpConfig::default()).unwrap(),
        transport: transport.clone(),
        scheduler: Scheduler::new(),
    };
    (services, transport)
}

#[cfg(test)]
pub(crate) async fn test_context(
    event: Event,
) -> (HandlerContext, Arc<sprocket_core::MemoryTransport>) {
    let (services, transport) = test_services().await;
    let gate = PluginGate::new(PluginId::next(), "test");
    let ctx = HandlerContext::new(
        Arc::new(event),
        Captures::default(),
        crate::registry::HandlerId::for_tests(0),
        gate,
        services,
    );
    (ctx, transport)
}

#[cfg(test)]
mod tests {
    use super::*;
    use sprocket_core::{EventKind, TaskState};

    #[tokio::test]
    async fn replies_follow_the_event() {
        let channel = Event::new(EventKind::Message, "hi", "alice", "#rust", false);
        let (ctx, transport) = test_context(channel).await;
        ctx.reply("hello").await.unwrap();
        ctx.me("waves").await.unwrap();
        ctx.send("bob", "psst").await.unwrap();

        let sent = transport.sent();
        assert_eq!(sent.len(), 3);
        assert_eq!((sent[0].target.as_str(), sent[0].text.as_str()), ("#rust", "hello"));
        assert_eq!(sent[2].target, "bob");

        let private = Event::new(EventKind::Message, "hi", "alice", "sprocket", true);
        let (ctx, transport) = test_context(private).await;
        ctx.reply("hello").await.unwrap();
        assert_eq!(transport.texts_to("alice"), ["hello"]);
    }

    #[tokio::test]
    async fn spawned_tasks_belong_to_the_plugin() {
        let event = Event::new(EventKind::Message, "hi", "alice", "#rust", false);
        let (ctx, _) = test_context(event).await;
        let handle = ctx.spawn("follow-up", async { Ok(()) });
        assert_eq!(handle.meta().plugin, Some(ctx.plugin_id()));
        assert_eq!(&*handle.meta().owner, "test");
        assert_eq!(handle.wait().await, TaskState::Completed);
    }
}
