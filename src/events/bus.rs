//! The shared per-kernel event subscription bus.
//!
//! Subscriptions form a three-level map keyed by `(kernelId, eventType,
//! handlerId)`. `handlerId` is a stable arena-style integer
//! ([`HandlerId`]) rather than closure identity, so an individual
//! subscription can be removed in O(1) without relying on function
//! equality — Rust closures don't have any.

use crate::driver::EventRecord;
use crate::types::{HandlerId, KernelId};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// The event-record variant a subscription filters on. `None` in a
/// subscription key means "every type".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Stream,
    DisplayData,
    UpdateDisplayData,
    ExecuteInput,
    ExecuteResult,
    ExecuteError,
    InputRequest,
    BackpressureDrop,
    ExecutionStalled,
}

impl EventKind {
    pub fn of(event: &EventRecord) -> Self {
        match event {
            EventRecord::Stream { .. } => EventKind::Stream,
            EventRecord::DisplayData { .. } => EventKind::DisplayData,
            EventRecord::UpdateDisplayData { .. } => EventKind::UpdateDisplayData,
            EventRecord::ExecuteInput { .. } => EventKind::ExecuteInput,
            EventRecord::ExecuteResult { .. } => EventKind::ExecuteResult,
            EventRecord::ExecuteError { .. } => EventKind::ExecuteError,
            EventRecord::InputRequest { .. } => EventKind::InputRequest,
            EventRecord::BackpressureDrop { .. } => EventKind::BackpressureDrop,
            EventRecord::ExecutionStalled { .. } => EventKind::ExecutionStalled,
        }
    }
}

/// Sanity cap on handlers per (kernel, type) key.
pub const MAX_HANDLERS_PER_TYPE: usize = 100;

type Handler = Box<dyn Fn(&KernelId, &EventRecord) + Send + Sync>;

/// `None` key = "subscribed to all event types for this kernel".
type TypeMap = HashMap<Option<EventKind>, HashMap<HandlerId, Handler>>;

#[derive(Default)]
struct Inner {
    kernels: HashMap<KernelId, TypeMap>,
}

/// Cheaply cloneable handle to the shared bus; all clones see the same
/// subscription table.
#[derive(Clone)]
pub struct EventBus {
    inner: Arc<Mutex<Inner>>,
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus").finish_non_exhaustive()
    }
}

impl EventBus {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner::default())),
        }
    }

    /// Register a handler. `event_type = None` subscribes to every event
    /// type for this kernel. Returns an error if the (kernel, type) pair
    /// already holds `MAX_HANDLERS_PER_TYPE` handlers.
    pub fn subscribe<F>(
        &self,
        kernel_id: KernelId,
        event_type: Option<EventKind>,
        handler_id: HandlerId,
        handler: F,
    ) -> crate::types::Result<()>
    where
        F: Fn(&KernelId, &EventRecord) + Send + Sync + 'static,
    {
        let mut inner = self.inner.lock().expect("event bus mutex poisoned");
        let type_map = inner.kernels.entry(kernel_id).or_default();
        let handlers = type_map.entry(event_type).or_default();
        if handlers.len() >= MAX_HANDLERS_PER_TYPE {
            return Err(crate::types::Error::policy_error(
                "handler cap reached for this (kernel, event type)",
            ));
        }
        handlers.insert(handler_id, Box::new(handler));
        Ok(())
    }

    /// Remove a single subscription. No-op if it was never registered.
    pub fn unsubscribe(&self, kernel_id: &KernelId, event_type: Option<EventKind>, handler_id: HandlerId) {
        let mut inner = self.inner.lock().expect("event bus mutex poisoned");
        if let Some(type_map) = inner.kernels.get_mut(kernel_id) {
            if let Some(handlers) = type_map.get_mut(&event_type) {
                handlers.remove(&handler_id);
            }
        }
    }

    /// Remove every subscription for a kernel. Must be called before the
    /// kernel's record is removed from the manager's live map.
    pub fn remove_all_for_kernel(&self, kernel_id: &KernelId) {
        let mut inner = self.inner.lock().expect("event bus mutex poisoned");
        inner.kernels.remove(kernel_id);
    }

    /// Deliver `event` to every handler subscribed to `kernel_id`, either
    /// for `event`'s specific kind or for all kinds.
    pub fn publish(&self, kernel_id: &KernelId, event: EventRecord) {
        let kind = EventKind::of(&event);
        let inner = self.inner.lock().expect("event bus mutex poisoned");
        let Some(type_map) = inner.kernels.get(kernel_id) else {
            return;
        };
        if let Some(handlers) = type_map.get(&Some(kind)) {
            for handler in handlers.values() {
                handler(kernel_id, &event);
            }
        }
        if let Some(handlers) = type_map.get(&None) {
            for handler in handlers.values() {
                handler(kernel_id, &event);
            }
        }
    }

    /// Number of handlers registered for a (kernel, type) key. Exposed for
    /// tests verifying subscribe/unsubscribe symmetry.
    pub fn listener_count(&self, kernel_id: &KernelId, event_type: Option<EventKind>) -> usize {
        let inner = self.inner.lock().expect("event bus mutex poisoned");
        inner
            .kernels
            .get(kernel_id)
            .and_then(|type_map| type_map.get(&event_type))
            .map(|handlers| handlers.len())
            .unwrap_or(0)
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
