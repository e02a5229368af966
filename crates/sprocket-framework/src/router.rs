//! Event routing.
//!
//! The router turns inbound messages into [`Event`]s, asks the registry which
//! handlers want them, and starts one scheduler task per handler. Routing
//! never waits for handlers: it returns as soon as the tasks are spawned.

use std::sync::Arc;

use parking_lot::RwLock;
use sprocket_core::{Addressing, Event, EventKind, InboundMessage, TaskMeta};
use tower::ServiceExt;
use tracing::{debug, debug_span, info};

use crate::context::{HandlerContext, Services};
use crate::registry::HandlerRegistry;

pub struct Router {
    registry: HandlerRegistry,
    services: Services,
    addressing: RwLock<Addressing>,
}

impl Router {
    pub fn new(registry: HandlerRegistry, services: Services, addressing: Addressing) -> Self {
        Self {
            registry,
            services,
            addressing: RwLock::new(addressing),
        }
    }

    /// Spawns a task for every active handler that wants `event`.
    ///
    /// Tasks are spawned in registration order and run concurrently; the
    /// order of their side effects is not defined. Returns the number of
    /// tasks spawned.
    pub fn route(&self, event: Event) -> usize {
        let span = debug_span!(
            "route",
            kind = %event.kind(),
            author = %event.author(),
            target = %event.target(),
        );
        let _enter = span.enter();

        let event = Arc::new(event);
        let matches = self.registry.matching(&event);
        let label = event.summary();

        for found in &matches {
            let entry = &found.entry;
            let gate = entry.gate();
            let ctx = HandlerContext::new(
                Arc::clone(&event),
                found.captures.clone(),
                entry.id(),
                Arc::clone(gate),
                self.services.clone(),
            );
            let meta = TaskMeta::new(gate.name_arc(), label.clone()).with_plugin(gate.id());
            let handle = self
                .services
                .scheduler
                .spawn(meta, entry.service().oneshot(ctx));
            debug!(handler = %entry.id(), plugin = %gate.name(), task = %handle.id(), "Handler spawned");
        }

        debug!(handlers = matches.len(), "Event routed");
        matches.len()
    }

    /// Routes a message from the transport.
    ///
    /// A message addressed to the bot, or any private message, is routed
    /// first as [`EventKind::Addressed`] with the bot's name removed and then
    /// as a plain [`EventKind::Message`]. Other kinds are routed unchanged.
    pub fn route_inbound(&self, message: InboundMessage) -> usize {
        match message.kind {
            EventKind::Message | EventKind::Addressed => {
                let addressing = self.addressing.read();
                let trimmed = match message.kind {
                    EventKind::Addressed => Some(
                        addressing
                            .strip(&message.raw_text)
                            .unwrap_or(message.raw_text.trim()),
                    ),
                    _ => addressing.resolve(&message.raw_text, message.is_private),
                }
                .map(str::to_string);
                drop(addressing);

                let mut spawned = 0;
                if let Some(trimmed) = trimmed {
                    spawned += self.route(Event::addressed(
                        message.raw_text.clone(),
                        trimmed,
                        message.author.clone(),
                        message.target.clone(),
                        message.is_private,
                    )
                    .with_action(message.is_action));
                }
                spawned
                    + self.route(
                        Event::new(
                            EventKind::Message,
                            message.raw_text,
                            message.author,
                            message.target,
                            message.is_private,
                        )
                        .with_action(message.is_action),
                    )
            }
            _ => self.route(message.into_event()),
        }
    }

    /// Changes the bot's name and announces it with a
    /// [`EventKind::BotName`] event. Returns the number of handlers spawned.
    pub fn rename(&self, name: impl Into<String>) -> usize {
        let name = name.into();
        let old = self.addressing.write().set_name(name.clone());
        if old == name {
            return 0;
        }
        info!(old = %old, new = %name, "Bot renamed");
        self.route(Event::new(EventKind::BotName, name, old, "", false))
    }

    /// Adds another name the bot answers to. Returns false if it was known.
    pub fn add_alias(&self, alias: impl Into<String>) -> bool {
        self.addressing.write().add_alias(alias)
    }

    pub fn name(&self) -> String {
        self.addressing.read().name().to_string()
    }

    pub fn addressing(&self) -> Addressing {
        self.addressing.read().clone()
    }

    pub fn registry(&self) -> &HandlerRegistry {
        &self.registry
    }

    pub fn services(&self) -> &Services {
        &self.services
    }
}

impl std::fmt::Debug for Router {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Router")
            .field("name", &self.addressing.read().name())
            .field("registry", &self.registry)
            .finish_non_exhaustive()
    }
}
