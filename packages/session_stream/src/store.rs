//! Ordered message list for the active conversation, indexed by id so that
//! action status updates patch in place.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::debug;

use crate::bus::{BusEvent, EventBus, EventName, Handler, handler};
use crate::group::{MessageGroup, assemble};
use crate::types::{ActionExecutionUpdate, Message};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionUpdateOutcome {
    Applied,
    /// No message with the update's id is in the store.
    UnknownMessage,
    /// The target message carries no action execution record.
    NotAnAction,
}

#[derive(Debug, Clone, Default)]
pub struct MessageStore {
    messages: Vec<Message>,
    index: HashMap<String, usize>,
}

impl MessageStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_messages(messages: Vec<Message>) -> Self {
        let mut store = Self::new();
        store.replace_all(messages);
        store
    }

    /// Append `message` unless one with the same id is already present.
    /// Messages without an id are always appended.
    pub fn append(&mut self, message: Message) -> bool {
        if !message.id.is_empty() {
            if self.index.contains_key(&message.id) {
                debug!(message_id = %message.id, "duplicate message ignored");
                return false;
            }
            self.index.insert(message.id.clone(), self.messages.len());
        }
        self.messages.push(message);
        true
    }

    /// Patch the action execution record of the message the update names.
    pub fn apply_action_update(&mut self, update: &ActionExecutionUpdate) -> ActionUpdateOutcome {
        let Some(&pos) = self.index.get(&update.message_id) else {
            return ActionUpdateOutcome::UnknownMessage;
        };
        match self.messages[pos].action_mut() {
            Some(action) => {
                action.apply(update);
                ActionUpdateOutcome::Applied
            }
            None => ActionUpdateOutcome::NotAnAction,
        }
    }

    /// Swap in a full history, e.g. from the cache or a fetch. Later
    /// duplicates of an id are dropped.
    pub fn replace_all(&mut self, messages: Vec<Message>) {
        self.messages.clear();
        self.index.clear();
        for message in messages {
            self.append(message);
        }
    }

    pub fn clear(&mut self) {
        self.messages.clear();
        self.index.clear();
    }

    pub fn get(&self, id: &str) -> Option<&Message> {
        self.index.get(id).map(|&pos| &self.messages[pos])
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn groups(&self) -> Vec<MessageGroup<'_>> {
        assemble(&self.messages)
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}

/// A [`MessageStore`] fed from the bus.
///
/// `attach` registers handlers for new messages and action updates; `detach`
/// removes exactly those registrations.
#[derive(Default)]
pub struct SessionMessages {
    store: Arc<Mutex<MessageStore>>,
    registrations: Mutex<Vec<(EventName, Handler)>>,
}

impl SessionMessages {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn attach(&self, bus: &EventBus) {
        let mut registrations = self
            .registrations
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if !registrations.is_empty() {
            debug!("session messages already attached");
            return;
        }

        let store = self.store.clone();
        let on_message = handler(move |event| {
            if let BusEvent::ChatMessageReceived { message } = event {
                lock(&store).append(message.clone());
            }
        });

        let store = self.store.clone();
        let on_update = handler(move |event| {
            if let BusEvent::ActionExecutionUpdated { update } = event {
                let outcome = lock(&store).apply_action_update(update);
                if outcome != ActionUpdateOutcome::Applied {
                    debug!(message_id = %update.message_id, ?outcome, "action update not applied");
                }
            }
        });

        for (name, callback) in [
            (EventName::ChatMessageReceived, on_message),
            (EventName::ActionExecutionUpdated, on_update),
        ] {
            bus.on(name, callback.clone());
            registrations.push((name, callback));
        }
    }

    pub fn detach(&self, bus: &EventBus) {
        let registrations = std::mem::take(
            &mut *self
                .registrations
                .lock()
                .unwrap_or_else(PoisonError::into_inner),
        );
        for (name, callback) in registrations {
            bus.off(name, &callback);
        }
    }

    /// Replace the contents with a loaded history.
    pub fn hydrate(&self, messages: Vec<Message>) {
        lock(&self.store).replace_all(messages);
    }

    pub fn clear(&self) {
        lock(&self.store).clear();
    }

    pub fn snapshot(&self) -> Vec<Message> {
        lock(&self.store).messages().to_vec()
    }

    /// Detached copy of the store. The lock is released before this returns,
    /// so callers may emit on the bus while holding the copy.
    pub fn store_snapshot(&self) -> MessageStore {
        lock(&self.store).clone()
    }
}

fn lock(store: &Mutex<MessageStore>) -> MutexGuard<'_, MessageStore> {
    store.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ActionExecution, ActionStatus, MessageRole};
    use serde_json::json;

    fn started(id: &str) -> Message {
        Message::action_execution(
            id,
            ActionExecution {
                action_id: "a1".into(),
                title: "Send invoice".into(),
                status: Some(ActionStatus::Started),
                ..Default::default()
            },
        )
    }

    fn completion(id: &str) -> ActionExecutionUpdate {
        ActionExecutionUpdate {
            message_id: id.into(),
            status: Some(ActionStatus::Completed),
            output: Some(json!({"sent": true})),
            ..Default::default()
        }
    }

    #[test]
    fn duplicate_ids_are_not_appended() {
        let mut store = MessageStore::new();
        assert!(store.append(started("m1")));
        assert!(!store.append(started("m1")));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn update_patches_in_place() {
        let mut store = MessageStore::new();
        store.append(Message::new("u1", MessageRole::User, "invoice them"));
        store.append(started("m1"));

        assert_eq!(
            store.apply_action_update(&completion("m1")),
            ActionUpdateOutcome::Applied
        );
        assert_eq!(store.len(), 2);

        let action = store.get("m1").and_then(Message::action).unwrap();
        assert_eq!(action.status, Some(ActionStatus::Completed));
        assert_eq!(action.title, "Send invoice");
        assert_eq!(action.output, Some(json!({"sent": true})));
    }

    #[test]
    fn update_outcomes_for_unknown_and_plain_messages() {
        let mut store = MessageStore::new();
        store.append(Message::new("u1", MessageRole::User, "hi"));

        assert_eq!(
            store.apply_action_update(&completion("missing")),
            ActionUpdateOutcome::UnknownMessage
        );
        assert_eq!(
            store.apply_action_update(&completion("u1")),
            ActionUpdateOutcome::NotAnAction
        );
    }

    #[test]
    fn replace_all_rebuilds_index() {
        let mut store = MessageStore::new();
        store.append(started("old"));
        store.replace_all(vec![started("m1"), started("m1"), started("m2")]);

        assert_eq!(store.len(), 2);
        assert!(store.get("old").is_none());
        assert_eq!(store.get("m2").map(|m| m.id.as_str()), Some("m2"));
        assert_eq!(store.groups().len(), 1);
    }

    #[test]
    fn attached_store_follows_the_bus() {
        let bus = EventBus::new();
        let messages = SessionMessages::new();
        messages.attach(&bus);
        messages.attach(&bus);
        assert_eq!(bus.handler_count(EventName::ChatMessageReceived), 1);

        bus.emit(BusEvent::ChatMessageReceived {
            message: started("m1"),
        });
        bus.emit(BusEvent::ActionExecutionUpdated {
            update: completion("m1"),
        });

        let snapshot = messages.snapshot();
        assert_eq!(snapshot.len(), 1);
        assert_eq!(
            snapshot[0].action_status(),
            Some(&ActionStatus::Completed)
        );

        messages.detach(&bus);
        assert_eq!(bus.handler_count(EventName::ChatMessageReceived), 0);
        assert_eq!(bus.handler_count(EventName::ActionExecutionUpdated), 0);
        bus.emit(BusEvent::ChatMessageReceived {
            message: started("m2"),
        });
        assert_eq!(messages.store_snapshot().len(), 1);
    }

    #[test]
    fn emitting_while_holding_a_store_snapshot() {
        let bus = EventBus::new();
        let messages = SessionMessages::new();
        messages.attach(&bus);
        bus.emit(BusEvent::ChatMessageReceived {
            message: started("m1"),
        });

        let before = messages.store_snapshot();
        for group in before.groups() {
            assert!(group.is_tool_calls());
            bus.emit(BusEvent::ActionExecutionUpdated {
                update: completion("m1"),
            });
            bus.emit(BusEvent::ChatMessageReceived {
                message: Message::new("u2", MessageRole::User, "thanks"),
            });
        }

        assert_eq!(before.len(), 1);
        assert_eq!(
            before.get("m1").and_then(Message::action_status),
            Some(&ActionStatus::Started)
        );
        let after = messages.store_snapshot();
        assert_eq!(after.len(), 2);
        assert_eq!(
            after.get("m1").and_then(Message::action_status),
            Some(&ActionStatus::Completed)
        );
    }
}
