//! # Event Bus
//!
//! A publish/subscribe channel scoped to the resource-mutation and filter
//! lifecycle. Subscribers register a handler for one [`EventKind`] and keep the
//! returned [`Subscription`] alive for as long as they want to be notified;
//! dropping it unregisters the handler.
//!
//! Handlers run synchronously inside [`EventBus::emit`], after the emitter has
//! finished its own work, so they observe post-mutation state.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, PoisonError, RwLock, Weak};
use tracing::debug;

/// Events announced to external listeners.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PanelEvent {
    ResourcesDeleted,
    ResourcesDetached,
    ResourcesRestored,
    /// Carries the new encoded filter value.
    FilterChanged(String),
    FilterReset,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    ResourcesDeleted,
    ResourcesDetached,
    ResourcesRestored,
    FilterChanged,
    FilterReset,
}

impl EventKind {
    /// The wire name listeners know the event by.
    pub fn name(self) -> &'static str {
        match self {
            EventKind::ResourcesDeleted => "resources-deleted",
            EventKind::ResourcesDetached => "resources-detached",
            EventKind::ResourcesRestored => "resources-restored",
            EventKind::FilterChanged => "filter-changed",
            EventKind::FilterReset => "filter-reset",
        }
    }
}

impl PanelEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            PanelEvent::ResourcesDeleted => EventKind::ResourcesDeleted,
            PanelEvent::ResourcesDetached => EventKind::ResourcesDetached,
            PanelEvent::ResourcesRestored => EventKind::ResourcesRestored,
            PanelEvent::FilterChanged(_) => EventKind::FilterChanged,
            PanelEvent::FilterReset => EventKind::FilterReset,
        }
    }

    pub fn name(&self) -> &'static str {
        self.kind().name()
    }
}

type Handler = Arc<dyn Fn(&PanelEvent) + Send + Sync + 'static>;

#[derive(Default)]
struct Inner {
    listeners: RwLock<HashMap<EventKind, Vec<(usize, Handler)>>>,
    next_id: AtomicUsize,
}

/// Cheap to clone; every clone publishes to the same set of subscribers.
#[derive(Clone, Default)]
pub struct EventBus(Arc<Inner>);

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let listeners = self.0.listeners.read().unwrap_or_else(PoisonError::into_inner);
        let count: usize = listeners.values().map(Vec::len).sum();
        f.debug_struct("EventBus").field("listeners", &count).finish()
    }
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `handler` for every event of `kind`.
    pub fn subscribe(
        &self,
        kind: EventKind,
        handler: impl Fn(&PanelEvent) + Send + Sync + 'static,
    ) -> Subscription {
        let id = self.0.next_id.fetch_add(1, Ordering::Relaxed);
        let mut listeners = self.0.listeners.write().unwrap_or_else(PoisonError::into_inner);
        listeners.entry(kind).or_default().push((id, Arc::new(handler)));
        Subscription {
            inner: Arc::downgrade(&self.0),
            kind,
            id,
        }
    }

    /// Typed registration for `filter-changed`: the handler receives the new
    /// encoded filter value.
    pub fn on_filter_changed(&self, handler: impl Fn(&str) + Send + Sync + 'static) -> Subscription {
        self.subscribe(EventKind::FilterChanged, move |event| {
            if let PanelEvent::FilterChanged(value) = event {
                handler(value);
            }
        })
    }

    /// Delivers `event` to every handler registered for its kind.
    pub fn emit(&self, event: PanelEvent) {
        // Snapshot the handlers so none of them runs under the lock.
        let handlers: Vec<Handler> = {
            let listeners = self.0.listeners.read().unwrap_or_else(PoisonError::into_inner);
            listeners
                .get(&event.kind())
                .map(|entries| entries.iter().map(|(_, h)| h.clone()).collect())
                .unwrap_or_default()
        };
        debug!(event = event.name(), listeners = handlers.len(), "Emit");
        for handler in handlers {
            handler(&event);
        }
    }

    pub fn listener_count(&self, kind: EventKind) -> usize {
        let listeners = self.0.listeners.read().unwrap_or_else(PoisonError::into_inner);
        listeners.get(&kind).map_or(0, Vec::len)
    }
}

/// Keeps a handler registered; dropping it unsubscribes.
pub struct Subscription {
    inner: Weak<Inner>,
    kind: EventKind,
    id: usize,
}

impl Drop for Subscription {
    fn drop(&mut self) {
        // The bus may already be gone.
        if let Some(inner) = self.inner.upgrade() {
            let mut listeners = inner.listeners.write().unwrap_or_else(PoisonError::into_inner);
            if let Some(entries) = listeners.get_mut(&self.kind) {
                entries.retain(|(id, _)| *id != self.id);
            }
        }
    }
}
