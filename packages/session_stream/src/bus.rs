//! In-process publish/subscribe registry.
//!
//! Decouples the transport side (router) from consumers (message store,
//! notification UI). Delivery is synchronous, in registration order, with no
//! buffering: an event emitted before a handler registers is never replayed.
//!
//! The bus is an ordinary value shared as `Arc<EventBus>`, so tests can run
//! isolated instances side by side.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::{Arc, PoisonError, RwLock};
use tracing::{error, trace};

use crate::types::{ActionExecutionUpdate, Message};

/// Named application signals. Consumers subscribe by name without knowing
/// anything about the wire protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventName {
    ChatMessageReceived,
    ActionExecutionUpdated,
    SetActiveEntity,
    CreateEntityRequested,
    Notification,
}

impl EventName {
    pub const ALL: [EventName; 5] = [
        EventName::ChatMessageReceived,
        EventName::ActionExecutionUpdated,
        EventName::SetActiveEntity,
        EventName::CreateEntityRequested,
        EventName::Notification,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EventName::ChatMessageReceived => "chat_message_received",
            EventName::ActionExecutionUpdated => "action_execution_updated",
            EventName::SetActiveEntity => "set_active_entity",
            EventName::CreateEntityRequested => "create_entity_requested",
            EventName::Notification => "notification",
        }
    }
}

/// What a creation request wants the UI to open.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Assistant,
    SystemPrompt,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BusEvent {
    /// A new message for the active conversation
    ChatMessageReceived { message: Message },
    /// A status change for an existing action execution message
    ActionExecutionUpdated { update: ActionExecutionUpdate },
    SetActiveEntity { id: String },
    CreateEntityRequested { kind: EntityKind, payload: Value },
    /// Any wire event without a dedicated route, passed through raw
    Notification { event: String, payload: Value },
}

impl BusEvent {
    pub fn name(&self) -> EventName {
        match self {
            BusEvent::ChatMessageReceived { .. } => EventName::ChatMessageReceived,
            BusEvent::ActionExecutionUpdated { .. } => EventName::ActionExecutionUpdated,
            BusEvent::SetActiveEntity { .. } => EventName::SetActiveEntity,
            BusEvent::CreateEntityRequested { .. } => EventName::CreateEntityRequested,
            BusEvent::Notification { .. } => EventName::Notification,
        }
    }
}

/// Registered callback. Identity is the `Arc` allocation: `off` removes the
/// registration whose pointer matches.
pub type Handler = Arc<dyn Fn(&BusEvent) + Send + Sync>;

/// Wrap a closure as a [`Handler`].
pub fn handler<F>(f: F) -> Handler
where
    F: Fn(&BusEvent) + Send + Sync + 'static,
{
    Arc::new(f)
}

#[derive(Default)]
pub struct EventBus {
    handlers: RwLock<HashMap<EventName, Vec<Handler>>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` for `name`. Registering the same handler twice
    /// delivers twice.
    pub fn on(&self, name: EventName, handler: Handler) {
        self.handlers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(name)
            .or_default()
            .push(handler);
    }

    /// Remove one registration of `handler` for `name`. Returns false when it
    /// was not registered.
    pub fn off(&self, name: EventName, handler: &Handler) -> bool {
        let mut handlers = self
            .handlers
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        let Some(registered) = handlers.get_mut(&name) else {
            return false;
        };
        let Some(pos) = registered.iter().position(|h| Arc::ptr_eq(h, handler)) else {
            return false;
        };
        registered.remove(pos);
        if registered.is_empty() {
            handlers.remove(&name);
        }
        true
    }

    /// Deliver `event` to every handler registered for its name.
    ///
    /// The handler list is snapshotted first, so handlers may call `on`/`off`
    /// while being invoked. A panicking handler is logged and skipped; the
    /// remaining handlers still run. Returns how many handlers completed.
    pub fn emit(&self, event: BusEvent) -> usize {
        let name = event.name();
        let snapshot: Vec<Handler> = self
            .handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&name)
            .cloned()
            .unwrap_or_default();

        trace!(event = name.as_str(), handlers = snapshot.len(), "emit");

        let mut delivered = 0;
        for handler in snapshot {
            match catch_unwind(AssertUnwindSafe(|| handler(&event))) {
                Ok(()) => delivered += 1,
                Err(_) => error!(
                    event = name.as_str(),
                    "bus handler panicked; continuing delivery"
                ),
            }
        }
        delivered
    }

    pub fn handler_count(&self, name: EventName) -> usize {
        self.handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&name)
            .map_or(0, Vec::len)
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let handlers = self
            .handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        let counts: HashMap<&'static str, usize> = handlers
            .iter()
            .map(|(name, list)| (name.as_str(), list.len()))
            .collect();
        f.debug_struct("EventBus").field("handlers", &counts).finish()
    }
}
