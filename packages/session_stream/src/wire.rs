//! Wire events pushed by the transport, decoded into a tagged union at the
//! boundary so routing is an exhaustive match rather than shape sniffing.

use serde_json::Value;

use crate::bus::EntityKind;
use crate::types::{ActionExecutionUpdate, ActionStatus, Message};

pub const CREATE_ASSISTANT: &str = "create_assistant";
pub const CREATE_SYSTEM_PROMPT: &str = "create_system_prompt";
pub const SET_ACTIVE_ASSISTANT: &str = "set_active_assistant";
pub const CHAT_MESSAGE: &str = "chat_message";
pub const ACTION_EXECUTION_UPDATE: &str = "action_execution_update";

/// Wire events with a dedicated route. Bound on every session channel.
pub const ROUTED_EVENTS: [&str; 5] = [
    CREATE_ASSISTANT,
    CREATE_SYSTEM_PROMPT,
    SET_ACTIVE_ASSISTANT,
    CHAT_MESSAGE,
    ACTION_EXECUTION_UPDATE,
];

/// A named payload as delivered by the transport.
#[derive(Debug, Clone, PartialEq)]
pub struct WireEvent {
    pub name: String,
    pub payload: Value,
}

impl WireEvent {
    pub fn new(name: impl Into<String>, payload: Value) -> Self {
        Self {
            name: name.into(),
            payload,
        }
    }

    pub fn decode(self) -> Decoded {
        let WireEvent { name, payload } = self;
        match name.as_str() {
            CREATE_ASSISTANT => Decoded::clean(InboundEvent::CreateEntity {
                kind: EntityKind::Assistant,
                payload,
            }),
            CREATE_SYSTEM_PROMPT => Decoded::clean(InboundEvent::CreateEntity {
                kind: EntityKind::SystemPrompt,
                payload,
            }),
            SET_ACTIVE_ASSISTANT => Decoded::clean(InboundEvent::SetActiveEntity {
                id: entity_id(&payload),
            }),
            CHAT_MESSAGE => match Message::decode(&payload) {
                Ok(message) => {
                    let malformed = (message.is_action_execution() && message.action().is_none())
                        .then(|| "action execution record did not decode".to_string());
                    Decoded {
                        event: InboundEvent::ChatMessage(message),
                        malformed,
                    }
                }
                Err(e) => Decoded {
                    event: InboundEvent::ChatMessage(Message::salvage(&payload)),
                    malformed: Some(format!("chat message did not decode: {e}")),
                },
            },
            ACTION_EXECUTION_UPDATE => {
                let update = decode_action_update(&payload);
                let malformed = update
                    .message_id
                    .is_empty()
                    .then(|| "action execution update has no message id".to_string());
                Decoded {
                    event: InboundEvent::ActionExecutionUpdate(update),
                    malformed,
                }
            }
            _ => Decoded::clean(InboundEvent::Other { name, payload }),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum InboundEvent {
    CreateEntity { kind: EntityKind, payload: Value },
    SetActiveEntity { id: Option<String> },
    ChatMessage(Message),
    ActionExecutionUpdate(ActionExecutionUpdate),
    Other { name: String, payload: Value },
}

/// Decoding result. `malformed` describes a payload that only decoded on a
/// best-effort basis; the event is still routed.
#[derive(Debug, Clone, PartialEq)]
pub struct Decoded {
    pub event: InboundEvent,
    pub malformed: Option<String>,
}

impl Decoded {
    fn clean(event: InboundEvent) -> Self {
        Self {
            event,
            malformed: None,
        }
    }
}

fn entity_id(payload: &Value) -> Option<String> {
    payload
        .get("_id")
        .and_then(Value::as_str)
        .filter(|id| !id.is_empty())
        .map(str::to_string)
}

/// Normalize a bare update payload. Accepts camelCase and snake_case keys;
/// anything missing comes back blank.
pub fn decode_action_update(payload: &Value) -> ActionExecutionUpdate {
    let text = |keys: &[&str]| -> String {
        keys.iter()
            .find_map(|key| payload.get(*key).and_then(Value::as_str))
            .unwrap_or_default()
            .to_string()
    };
    let value = |key: &str| payload.get(key).filter(|v| !v.is_null()).cloned();

    ActionExecutionUpdate {
        message_id: text(&["messageId", "message_id", "_id"]),
        action_id: text(&["actionId", "action_id"]),
        service_name: text(&["serviceName", "service_name"]),
        title: text(&["title"]),
        description: text(&["description"]),
        icon: text(&["icon"]),
        status: payload
            .get("status")
            .and_then(Value::as_str)
            .map(ActionStatus::from),
        input: value("input"),
        output: value("output"),
        error: value("error"),
    }
}
