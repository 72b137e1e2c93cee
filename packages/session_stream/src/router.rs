//! Event classification and routing.
//!
//! Every wire event maps to exactly one [`Route`]. The interesting case is
//! `chat_message`: an action execution arrives on it twice, first as
//! `started` (a new message the user should see appear) and later as
//! `completed`/`failed` (a patch to that same message). Only the metadata
//! discriminator plus the nested status tells them apart.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::bus::{BusEvent, EventBus};
use crate::types::{ActionExecutionUpdate, Message};
use crate::wire::{InboundEvent, WireEvent};

/// Pause before announcing a creation request, so the dialog it opens has
/// finished mounting before values are pushed into it. UI sequencing only.
pub const CREATION_SETTLE_DELAY: Duration = Duration::from_millis(300);

const MAX_DIAGNOSTICS: usize = 64;

#[derive(Debug, Clone, PartialEq)]
pub enum Route {
    Emit(BusEvent),
    Delayed { delay: Duration, event: BusEvent },
    Drop { reason: String },
}

/// Decide where an inbound event goes. Pure; no side effects.
pub fn classify(event: InboundEvent) -> Route {
    match event {
        InboundEvent::CreateEntity { kind, payload } => Route::Delayed {
            delay: CREATION_SETTLE_DELAY,
            event: BusEvent::CreateEntityRequested { kind, payload },
        },
        InboundEvent::SetActiveEntity { id: Some(id) } => {
            Route::Emit(BusEvent::SetActiveEntity { id })
        }
        InboundEvent::SetActiveEntity { id: None } => Route::Drop {
            reason: "set-active payload has no `_id`".to_string(),
        },
        InboundEvent::ChatMessage(message) if is_action_update(&message) => {
            Route::Emit(BusEvent::ActionExecutionUpdated {
                update: ActionExecutionUpdate::from_message(&message),
            })
        }
        InboundEvent::ChatMessage(message) => Route::Emit(BusEvent::ChatMessageReceived { message }),
        InboundEvent::ActionExecutionUpdate(update) => {
            Route::Emit(BusEvent::ActionExecutionUpdated { update })
        }
        InboundEvent::Other { name, payload } => Route::Emit(BusEvent::Notification {
            event: name,
            payload,
        }),
    }
}

/// An action execution message whose status has moved past `started`.
fn is_action_update(message: &Message) -> bool {
    message.is_action_execution()
        && message
            .action_status()
            .is_some_and(|status| !status.is_started())
}

/// Something the router could not route cleanly.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    pub event: String,
    pub message: String,
}

/// Decodes wire events, classifies them, and emits the result on the bus.
pub struct EventRouter {
    bus: Arc<EventBus>,
    diagnostics: Mutex<VecDeque<Diagnostic>>,
}

impl EventRouter {
    pub fn new(bus: Arc<EventBus>) -> Self {
        Self {
            bus,
            diagnostics: Mutex::new(VecDeque::new()),
        }
    }

    /// Route one wire event. Never fails; malformed payloads are emitted with
    /// best-effort fields and leave a diagnostic behind.
    ///
    /// `cancel` belongs to the subscription the event arrived on. Delayed
    /// emissions are abandoned once it fires.
    pub fn route(&self, wire: WireEvent, cancel: &CancellationToken) {
        let name = wire.name.clone();
        let decoded = wire.decode();
        if let Some(issue) = decoded.malformed {
            self.record(&name, issue);
        }

        match classify(decoded.event) {
            Route::Emit(event) => {
                self.bus.emit(event);
            }
            Route::Delayed { delay, event } => self.emit_after(delay, event, cancel.clone()),
            Route::Drop { reason } => self.record(&name, reason),
        }
    }

    fn emit_after(&self, delay: Duration, event: BusEvent, cancel: CancellationToken) {
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            debug!(
                event = event.name().as_str(),
                "no async runtime; emitting without settle delay"
            );
            self.bus.emit(event);
            return;
        };

        let bus = self.bus.clone();
        runtime.spawn(async move {
            tokio::select! {
                _ = cancel.cancelled() => {
                    debug!(event = event.name().as_str(), "subscription ended before settle delay; dropping");
                }
                _ = tokio::time::sleep(delay) => {
                    bus.emit(event);
                }
            }
        });
    }

    fn record(&self, event: &str, message: String) {
        warn!(event = %event, "{}", message);
        let mut diagnostics = self
            .diagnostics
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if diagnostics.len() >= MAX_DIAGNOSTICS {
            diagnostics.pop_front();
        }
        diagnostics.push_back(Diagnostic {
            event: event.to_string(),
            message,
        });
    }

    /// Most recent diagnostics, oldest first.
    pub fn diagnostics(&self) -> Vec<Diagnostic> {
        self.diagnostics
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .cloned()
            .collect()
    }

    pub fn clear_diagnostics(&self) {
        self.diagnostics
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::{EntityKind, EventName, handler};
    use crate::types::ActionStatus;
    use crate::wire::{
        ACTION_EXECUTION_UPDATE, CHAT_MESSAGE, CREATE_ASSISTANT, SET_ACTIVE_ASSISTANT,
    };
    use serde_json::{Value, json};

    fn action_message(status: &str) -> Value {
        json!({
            "_id": "m1",
            "role": "system",
            "content": "",
            "metadata": {
                "message_type": "action_execution",
                "action_execution": {
                    "actionId": "a1",
                    "serviceName": "calendar",
                    "title": "Create event",
                    "status": status
                }
            }
        })
    }

    /// Router wired to a bus that records every event.
    fn recording_router() -> (EventRouter, Arc<Mutex<Vec<BusEvent>>>) {
        let bus = Arc::new(EventBus::new());
        let seen = Arc::new(Mutex::new(Vec::new()));
        for name in EventName::ALL {
            let seen = seen.clone();
            bus.on(
                name,
                handler(move |event| seen.lock().unwrap().push(event.clone())),
            );
        }
        (EventRouter::new(bus), seen)
    }

    fn count(events: &[BusEvent], name: EventName) -> usize {
        events.iter().filter(|e| e.name() == name).count()
    }

    #[test]
    fn started_action_is_a_new_message() {
        let (router, seen) = recording_router();
        router.route(
            WireEvent::new(CHAT_MESSAGE, action_message("started")),
            &CancellationToken::new(),
        );

        let events = seen.lock().unwrap();
        assert_eq!(count(&events, EventName::ChatMessageReceived), 1);
        assert_eq!(count(&events, EventName::ActionExecutionUpdated), 0);
    }

    #[test]
    fn completed_action_is_an_update_only() {
        let (router, seen) = recording_router();
        router.route(
            WireEvent::new(CHAT_MESSAGE, action_message("completed")),
            &CancellationToken::new(),
        );

        let events = seen.lock().unwrap();
        assert_eq!(count(&events, EventName::ChatMessageReceived), 0);
        assert_eq!(count(&events, EventName::ActionExecutionUpdated), 1);
        match &events[0] {
            BusEvent::ActionExecutionUpdated { update } => {
                assert_eq!(update.message_id, "m1");
                assert_eq!(update.action_id, "a1");
                assert_eq!(update.service_name, "calendar");
                assert_eq!(update.status, Some(ActionStatus::Completed));
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn completed_action_with_both_id_spellings_is_an_update() {
        let (router, seen) = recording_router();
        let mut payload = action_message("completed");
        payload["id"] = json!("m1");
        router.route(WireEvent::new(CHAT_MESSAGE, payload), &CancellationToken::new());

        let events = seen.lock().unwrap();
        assert_eq!(count(&events, EventName::ChatMessageReceived), 0);
        assert_eq!(count(&events, EventName::ActionExecutionUpdated), 1);
        assert!(router.diagnostics().is_empty());
    }

    #[test]
    fn completed_action_with_both_action_id_spellings_is_an_update() {
        let (router, seen) = recording_router();
        let mut payload = action_message("completed");
        payload["metadata"]["action_execution"]["action_id"] = json!("a1");
        payload["metadata"]["action_execution"]["service_name"] = json!("calendar");
        router.route(WireEvent::new(CHAT_MESSAGE, payload), &CancellationToken::new());

        let events = seen.lock().unwrap();
        assert_eq!(events.len(), 1);
        match &events[0] {
            BusEvent::ActionExecutionUpdated { update } => {
                assert_eq!(update.message_id, "m1");
                assert_eq!(update.action_id, "a1");
                assert_eq!(update.status, Some(ActionStatus::Completed));
            }
            other => panic!("unexpected event: {other:?}"),
        }
        assert!(router.diagnostics().is_empty());
    }

    #[test]
    fn undecodable_action_record_is_delivered_with_a_diagnostic() {
        let (router, seen) = recording_router();
        let mut payload = action_message("completed");
        payload["metadata"]["action_execution"] = json!("completed");
        router.route(WireEvent::new(CHAT_MESSAGE, payload), &CancellationToken::new());

        let events = seen.lock().unwrap();
        assert_eq!(count(&events, EventName::ChatMessageReceived), 1);
        assert_eq!(count(&events, EventName::ActionExecutionUpdated), 0);
        let diagnostics = router.diagnostics();
        assert_eq!(diagnostics.len(), 1);
        assert_eq!(diagnostics[0].event, CHAT_MESSAGE);
    }

    #[test]
    fn action_message_without_status_is_a_new_message() {
        let mut payload = action_message("started");
        payload["metadata"]["action_execution"]
            .as_object_mut()
            .unwrap()
            .remove("status");
        let route = classify(WireEvent::new(CHAT_MESSAGE, payload).decode().event);
        assert!(matches!(
            route,
            Route::Emit(BusEvent::ChatMessageReceived { .. })
        ));
    }

    #[test]
    fn plain_chat_message_passes_through_unchanged() {
        let payload = json!({"_id": "m5", "role": "user", "content": "hi", "clientTag": 9});
        let route = classify(WireEvent::new(CHAT_MESSAGE, payload.clone()).decode().event);
        match route {
            Route::Emit(BusEvent::ChatMessageReceived { message }) => {
                assert_eq!(message.content, "hi");
                assert_eq!(message.extra["clientTag"], 9);
            }
            other => panic!("unexpected route: {other:?}"),
        }
    }

    #[test]
    fn explicit_update_routes_regardless_of_status() {
        let (router, seen) = recording_router();
        router.route(
            WireEvent::new(
                ACTION_EXECUTION_UPDATE,
                json!({"messageId": "m1", "status": "started"}),
            ),
            &CancellationToken::new(),
        );
        let events = seen.lock().unwrap();
        assert_eq!(count(&events, EventName::ActionExecutionUpdated), 1);
        assert!(router.diagnostics().is_empty());
    }

    #[test]
    fn set_active_entity_round_trip() {
        let (router, seen) = recording_router();
        let cancel = CancellationToken::new();

        router.route(
            WireEvent::new(SET_ACTIVE_ASSISTANT, json!({"_id": "x"})),
            &cancel,
        );
        assert_eq!(
            *seen.lock().unwrap(),
            vec![BusEvent::SetActiveEntity { id: "x".into() }]
        );
        assert!(router.diagnostics().is_empty());

        seen.lock().unwrap().clear();
        router.route(
            WireEvent::new(SET_ACTIVE_ASSISTANT, json!({"name": "no id"})),
            &cancel,
        );
        assert!(seen.lock().unwrap().is_empty());
        let diagnostics = router.diagnostics();
        assert_eq!(diagnostics.len(), 1);
        assert_eq!(diagnostics[0].event, SET_ACTIVE_ASSISTANT);
    }

    #[test]
    fn unknown_events_become_notifications() {
        let (router, seen) = recording_router();
        router.route(
            WireEvent::new("maintenance", json!({"in": "5m"})),
            &CancellationToken::new(),
        );
        assert_eq!(
            *seen.lock().unwrap(),
            vec![BusEvent::Notification {
                event: "maintenance".into(),
                payload: json!({"in": "5m"}),
            }]
        );
    }

    #[test]
    fn creation_without_runtime_emits_immediately() {
        let (router, seen) = recording_router();
        router.route(
            WireEvent::new(CREATE_ASSISTANT, json!({"name": "helper"})),
            &CancellationToken::new(),
        );
        assert_eq!(
            *seen.lock().unwrap(),
            vec![BusEvent::CreateEntityRequested {
                kind: EntityKind::Assistant,
                payload: json!({"name": "helper"}),
            }]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn creation_waits_for_settle_delay() {
        let (router, seen) = recording_router();
        router.route(
            WireEvent::new(CREATE_ASSISTANT, json!({})),
            &CancellationToken::new(),
        );
        tokio::task::yield_now().await;
        assert!(seen.lock().unwrap().is_empty());

        tokio::time::sleep(CREATION_SETTLE_DELAY + Duration::from_millis(1)).await;
        assert_eq!(seen.lock().unwrap().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn creation_is_dropped_when_subscription_ends() {
        let (router, seen) = recording_router();
        let cancel = CancellationToken::new();
        router.route(WireEvent::new(CREATE_ASSISTANT, json!({})), &cancel);
        cancel.cancel();

        tokio::time::sleep(CREATION_SETTLE_DELAY * 2).await;
        assert!(seen.lock().unwrap().is_empty());
    }

    #[test]
    fn diagnostics_are_bounded() {
        let (router, _seen) = recording_router();
        let cancel = CancellationToken::new();
        for _ in 0..(MAX_DIAGNOSTICS + 10) {
            router.route(WireEvent::new(SET_ACTIVE_ASSISTANT, json!({})), &cancel);
        }
        assert_eq!(router.diagnostics().len(), MAX_DIAGNOSTICS);
        router.clear_diagnostics();
        assert!(router.diagnostics().is_empty());
    }
}
