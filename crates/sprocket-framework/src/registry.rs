//! Handler registry.
//!
//! Entries live in an arena indexed by [`HandlerId`]. A per-kind index keeps
//! lookups proportional to the handlers interested in an event, and a
//! per-plugin index makes unloading a plugin a single sweep.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::RwLock;
use regex::Regex;
use sprocket_core::{Event, EventKind, PluginId};
use tracing::debug;

use crate::error::ConfigurationError;
use crate::handler::BoxedHandler;

// =============================================================================
// Filters
// =============================================================================

/// A compiled handler filter.
#[derive(Debug, Clone)]
pub struct Filter {
    regex: Regex,
}

impl Filter {
    /// Compiles `pattern`. A malformed pattern is rejected here, at
    /// registration, and never at dispatch.
    pub fn new(pattern: &str) -> Result<Self, ConfigurationError> {
        Regex::new(pattern)
            .map(|regex| Self { regex })
            .map_err(|source| ConfigurationError::InvalidPattern {
                pattern: pattern.to_string(),
                source,
            })
    }

    pub fn as_str(&self) -> &str {
        self.regex.as_str()
    }

    pub fn is_match(&self, text: &str) -> bool {
        self.regex.is_match(text)
    }

    /// Capture groups of the first match, group 0 being the whole match.
    pub fn captures(&self, text: &str) -> Option<Captures> {
        self.regex.captures(text).map(|caps| {
            Captures(
                caps.iter()
                    .map(|group| group.map(|m| m.as_str().to_string()))
                    .collect(),
            )
        })
    }
}

/// Capture groups delivered with an invocation.
///
/// Handlers registered without a filter receive an empty set.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Captures(Vec<Option<String>>);

impl Captures {
    /// Group `index`, or `None` when it did not participate in the match.
    pub fn get(&self, index: usize) -> Option<&str> {
        self.0.get(index).and_then(|g| g.as_deref())
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

// =============================================================================
// Entries
// =============================================================================

/// Registry slot index. Never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HandlerId(u64);

impl HandlerId {
    pub fn as_u64(self) -> u64 {
        self.0
    }

    fn slot(self) -> usize {
        self.0 as usize
    }

    #[cfg(test)]
    pub(crate) fn for_tests(index: u64) -> Self {
        Self(index)
    }
}

impl fmt::Display for HandlerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "handler#{}", self.0)
    }
}

/// Per-plugin activity flag consulted before spawning a handler.
#[derive(Debug)]
pub struct PluginGate {
    id: PluginId,
    name: Arc<str>,
    active: AtomicBool,
}

impl PluginGate {
    pub fn new(id: PluginId, name: impl Into<Arc<str>>) -> Arc<Self> {
        Arc::new(Self {
            id,
            name: name.into(),
            active: AtomicBool::new(true),
        })
    }

    pub fn id(&self) -> PluginId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn name_arc(&self) -> Arc<str> {
        Arc::clone(&self.name)
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    /// Stops new invocations. Running ones are unaffected.
    pub fn deactivate(&self) {
        self.active.store(false, Ordering::Release);
    }
}

/// A registered handler.
pub struct HandlerEntry {
    id: HandlerId,
    kind: EventKind,
    filter: Option<Filter>,
    service: BoxedHandler,
    gate: Arc<PluginGate>,
}

impl HandlerEntry {
    pub fn id(&self) -> HandlerId {
        self.id
    }

    pub fn kind(&self) -> EventKind {
        self.kind
    }

    pub fn filter(&self) -> Option<&Filter> {
        self.filter.as_ref()
    }

    pub fn gate(&self) -> &Arc<PluginGate> {
        &self.gate
    }

    pub fn plugin(&self) -> PluginId {
        self.gate.id
    }

    pub(crate) fn service(&self) -> BoxedHandler {
        self.service.clone()
    }

    /// Capture groups if this handler wants `event`.
    fn accepts(&self, event: &Event) -> Option<Captures> {
        match &self.filter {
            None => Some(Captures::default()),
            Some(filter) => filter.captures(event.text()),
        }
    }
}

impl fmt::Debug for HandlerEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerEntry")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("filter", &self.filter.as_ref().map(Filter::as_str))
            .field("plugin", &self.gate.name)
            .finish_non_exhaustive()
    }
}

/// A handler waiting to be committed to the registry.
pub struct Registration {
    pub kind: EventKind,
    pub filter: Option<Filter>,
    pub service: BoxedHandler,
}

impl Registration {
    pub fn new(kind: EventKind, service: BoxedHandler) -> Self {
        Self {
            kind,
            filter: None,
            service,
        }
    }

    pub fn with_filter(mut self, filter: Filter) -> Self {
        self.filter = Some(filter);
        self
    }
}

impl fmt::Debug for Registration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registration")
            .field("kind", &self.kind)
            .field("filter", &self.filter.as_ref().map(Filter::as_str))
            .finish_non_exhaustive()
    }
}

/// A handler selected for an event, with the captures of its filter.
#[derive(Debug, Clone)]
pub struct Match {
    pub entry: Arc<HandlerEntry>,
    pub captures: Captures,
}

// =============================================================================
// Registry
// =============================================================================

#[derive(Default)]
struct RegistryInner {
    slots: Vec<Option<Arc<HandlerEntry>>>,
    by_kind: HashMap<EventKind, Vec<HandlerId>>,
    by_plugin: HashMap<PluginId, Vec<HandlerId>>,
    live: usize,
}

impl RegistryInner {
    fn insert(&mut self, gate: &Arc<PluginGate>, registration: Registration) -> HandlerId {
        let id = HandlerId(self.slots.len() as u64);
        let Registration {
            kind,
            filter,
            service,
        } = registration;
        debug!(
            handler = %id,
            plugin = %gate.name,
            kind = %kind,
            filter = filter.as_ref().map(Filter::as_str),
            "Handler registered"
        );
        self.slots.push(Some(Arc::new(HandlerEntry {
            id,
            kind,
            filter,
            service,
            gate: Arc::clone(gate),
        })));
        self.by_kind.entry(kind).or_default().push(id);
        self.by_plugin.entry(gate.id).or_default().push(id);
        self.live += 1;
        id
    }

    fn take(&mut self, id: HandlerId) -> Option<Arc<HandlerEntry>> {
        let entry = self.slots.get_mut(id.slot())?.take()?;
        if let Some(ids) = self.by_kind.get_mut(&entry.kind) {
            ids.retain(|other| *other != id);
        }
        self.live -= 1;
        Some(entry)
    }
}

/// Registry of every live handler. Cheap to clone.
#[derive(Clone, Default)]
pub struct HandlerRegistry {
    inner: Arc<RwLock<RegistryInner>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds one handler for the plugin behind `gate`.
    pub fn register(&self, gate: &Arc<PluginGate>, registration: Registration) -> HandlerId {
        self.inner.write().insert(gate, registration)
    }

    /// Compiles `pattern` and adds a filtered handler.
    pub fn register_pattern(
        &self,
        gate: &Arc<PluginGate>,
        kind: EventKind,
        pattern: &str,
        service: BoxedHandler,
    ) -> Result<HandlerId, ConfigurationError> {
        let filter = Filter::new(pattern)?;
        Ok(self.register(gate, Registration::new(kind, service).with_filter(filter)))
    }

    /// Adds a batch of handlers atomically with respect to dispatch.
    pub fn register_all(
        &self,
        gate: &Arc<PluginGate>,
        registrations: impl IntoIterator<Item = Registration>,
    ) -> Vec<HandlerId> {
        let mut inner = self.inner.write();
        registrations
            .into_iter()
            .map(|registration| inner.insert(gate, registration))
            .collect()
    }

    /// Removes one handler. Returns false when it was already gone.
    pub fn remove(&self, id: HandlerId) -> bool {
        let mut inner = self.inner.write();
        let Some(entry) = inner.take(id) else {
            return false;
        };
        if let Some(ids) = inner.by_plugin.get_mut(&entry.gate.id) {
            ids.retain(|other| *other != id);
        }
        true
    }

    /// Removes every handler of `plugin`, returning how many were removed.
    pub fn remove_plugin(&self, plugin: PluginId) -> usize {
        let mut inner = self.inner.write();
        let ids = inner.by_plugin.remove(&plugin).unwrap_or_default();
        let removed = ids.into_iter().filter(|id| inner.take(*id).is_some()).count();
        debug!(plugin = %plugin, removed, "Handlers removed");
        removed
    }

    /// Active handlers that want `event`, in registration order.
    ///
    /// Only handlers registered for the event's kind are consulted; a filter
    /// must match the event's text.
    pub fn matching(&self, event: &Event) -> Vec<Match> {
        let inner = self.inner.read();
        let Some(ids) = inner.by_kind.get(&event.kind()) else {
            return Vec::new();
        };
        ids.iter()
            .filter_map(|id| inner.slots.get(id.slot())?.as_ref())
            .filter(|entry| entry.gate.is_active())
            .filter_map(|entry| {
                entry.accepts(event).map(|captures| Match {
                    entry: Arc::clone(entry),
                    captures,
                })
            })
            .collect()
    }

    pub fn get(&self, id: HandlerId) -> Option<Arc<HandlerEntry>> {
        self.inner.read().slots.get(id.slot())?.clone()
    }

    /// Number of live handlers.
    pub fn len(&self) -> usize {
        self.inner.read().live
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of live handlers owned by `plugin`.
    pub fn count_for(&self, plugin: PluginId) -> usize {
        self.inner.read().by_plugin.get(&plugin).map_or(0, Vec::len)
    }

    /// Handler ids owned by `plugin`, in registration order.
    pub fn handlers_of(&self, plugin: PluginId) -> Vec<HandlerId> {
        self.inner
            .read()
            .by_plugin
            .get(&plugin)
            .cloned()
            .unwrap_or_default()
    }
}

impl fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerRegistry")
            .field("handlers", &self.len())
            .finish()
    }
}
