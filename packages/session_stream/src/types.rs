//! Conversation data model and lenient wire decoding.

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};
use std::fmt;

/// Metadata discriminator for messages that record an action execution.
pub const ACTION_EXECUTION: &str = "action_execution";

/// Opaque conversation identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(String);

impl SessionId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SessionId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for SessionId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    User,
    Assistant,
    System,
    /// Role missing or not recognized on the wire
    #[default]
    Unknown,
}

impl MessageRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageRole::User => "user",
            MessageRole::Assistant => "assistant",
            MessageRole::System => "system",
            MessageRole::Unknown => "unknown",
        }
    }
}

impl std::str::FromStr for MessageRole {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "user" => Ok(MessageRole::User),
            "assistant" => Ok(MessageRole::Assistant),
            "system" => Ok(MessageRole::System),
            _ => Err(format!("Invalid message role: {}", s)),
        }
    }
}

impl<'de> Deserialize<'de> for MessageRole {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = Value::deserialize(deserializer)?;
        Ok(raw
            .as_str()
            .and_then(|s| s.parse().ok())
            .unwrap_or_default())
    }
}

/// Progress of an action execution.
///
/// Unrecognized status strings are kept verbatim so they still count as
/// "not started" when classifying updates.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ActionStatus {
    Started,
    Completed,
    Failed,
    Other(String),
}

impl ActionStatus {
    pub fn as_str(&self) -> &str {
        match self {
            ActionStatus::Started => "started",
            ActionStatus::Completed => "completed",
            ActionStatus::Failed => "failed",
            ActionStatus::Other(s) => s,
        }
    }

    pub fn is_started(&self) -> bool {
        matches!(self, ActionStatus::Started)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, ActionStatus::Completed | ActionStatus::Failed)
    }
}

impl From<&str> for ActionStatus {
    fn from(s: &str) -> Self {
        match s {
            "started" => ActionStatus::Started,
            "completed" => ActionStatus::Completed,
            "failed" => ActionStatus::Failed,
            other => ActionStatus::Other(other.to_string()),
        }
    }
}

impl fmt::Display for ActionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for ActionStatus {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for ActionStatus {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Ok(ActionStatus::from(raw.as_str()))
    }
}

/// Action execution record carried in a message's metadata.
///
/// Field names are camelCase; snake_case spellings are folded in before
/// decoding. Keys this struct does not model are kept in `extra`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionExecution {
    #[serde(default, skip_serializing_if = "String::is_empty", deserialize_with = "lenient_string")]
    pub action_id: String,
    #[serde(default, skip_serializing_if = "String::is_empty", deserialize_with = "lenient_string")]
    pub service_name: String,
    #[serde(default, skip_serializing_if = "String::is_empty", deserialize_with = "lenient_string")]
    pub title: String,
    #[serde(default, skip_serializing_if = "String::is_empty", deserialize_with = "lenient_string")]
    pub description: String,
    #[serde(default, skip_serializing_if = "String::is_empty", deserialize_with = "lenient_string")]
    pub icon: String,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "lenient_status"
    )]
    pub status: Option<ActionStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<Value>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl ActionExecution {
    /// Patch this record in place from a later status update.
    ///
    /// Status is always replaced; the remaining fields only when the update
    /// carries a value for them.
    pub fn apply(&mut self, update: &ActionExecutionUpdate) {
        if let Some(status) = &update.status {
            self.status = Some(status.clone());
        }
        overwrite_if_set(&mut self.action_id, &update.action_id);
        overwrite_if_set(&mut self.service_name, &update.service_name);
        overwrite_if_set(&mut self.title, &update.title);
        overwrite_if_set(&mut self.description, &update.description);
        overwrite_if_set(&mut self.icon, &update.icon);
        if update.input.is_some() {
            self.input = update.input.clone();
        }
        if update.output.is_some() {
            self.output = update.output.clone();
        }
        if update.error.is_some() {
            self.error = update.error.clone();
        }
    }
}

fn overwrite_if_set(field: &mut String, value: &str) {
    if !value.is_empty() {
        *field = value.to_string();
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MessageMetadata {
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "lenient"
    )]
    pub message_type: Option<String>,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "lenient_wire"
    )]
    pub action_execution: Option<ActionExecution>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// File attached to a message.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileAttachment {
    #[serde(default, deserialize_with = "lenient_string")]
    pub name: String,
    #[serde(default, deserialize_with = "lenient_string")]
    pub url: String,
    #[serde(
        rename = "type",
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "lenient"
    )]
    pub mime_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none", deserialize_with = "lenient")]
    pub size: Option<u64>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// A conversation message as pushed on the wire.
///
/// Decoding is lenient: absent or mistyped fields fall back to blank values
/// and unknown top-level keys are preserved in `extra`. Decode through
/// [`Message::decode`] so alternate key spellings are folded in first.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Message {
    #[serde(rename = "_id", default, deserialize_with = "lenient_string")]
    pub id: String,
    #[serde(default)]
    pub role: MessageRole,
    #[serde(default, deserialize_with = "lenient_string")]
    pub content: String,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "lenient"
    )]
    pub metadata: Option<MessageMetadata>,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "lenient_wire"
    )]
    pub file: Option<FileAttachment>,
    #[serde(
        rename = "createdAt",
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "lenient"
    )]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Message {
    pub fn new(id: impl Into<String>, role: MessageRole, content: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            role,
            content: content.into(),
            created_at: Some(Utc::now()),
            ..Default::default()
        }
    }

    /// A system message recording an action execution.
    pub fn action_execution(id: impl Into<String>, action: ActionExecution) -> Self {
        Self {
            metadata: Some(MessageMetadata {
                message_type: Some(ACTION_EXECUTION.to_string()),
                action_execution: Some(action),
                extra: Map::new(),
            }),
            ..Self::new(id, MessageRole::System, "")
        }
    }

    /// Decode a wire payload.
    ///
    /// Alternate spellings (`id`, `created_at`, and the snake_case action
    /// and file keys) are moved onto the canonical key when it is absent.
    /// When both are present the canonical key wins and the other one stays
    /// in `extra`. Only a non-object payload is an error.
    pub fn decode(payload: &Value) -> Result<Self, serde_json::Error> {
        let mut raw = payload.clone();
        canonicalize(&mut raw, Message::KEY_ALIASES);
        Message::deserialize(raw)
    }

    /// Best-effort message for a payload that failed to decode: the id is
    /// salvaged when present and the other object keys are kept in `extra`.
    pub fn salvage(payload: &Value) -> Self {
        let id = ["_id", "id"]
            .iter()
            .find_map(|key| payload.get(*key).and_then(Value::as_str))
            .unwrap_or_default()
            .to_string();
        let mut extra = payload.as_object().cloned().unwrap_or_default();
        extra.remove("_id");
        extra.remove("id");
        Self {
            id,
            extra,
            ..Default::default()
        }
    }

    pub fn message_type(&self) -> Option<&str> {
        self.metadata.as_ref()?.message_type.as_deref()
    }

    pub fn is_action_execution(&self) -> bool {
        self.message_type() == Some(ACTION_EXECUTION)
    }

    /// System-role action execution records, rendered together as tool calls.
    pub fn is_tool_call(&self) -> bool {
        self.role == MessageRole::System && self.is_action_execution()
    }

    pub fn action(&self) -> Option<&ActionExecution> {
        self.metadata.as_ref()?.action_execution.as_ref()
    }

    pub fn action_mut(&mut self) -> Option<&mut ActionExecution> {
        self.metadata.as_mut()?.action_execution.as_mut()
    }

    pub fn action_status(&self) -> Option<&ActionStatus> {
        self.action()?.status.as_ref()
    }
}

/// Normalized status change for an existing action execution message.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionExecutionUpdate {
    pub message_id: String,
    pub action_id: String,
    pub service_name: String,
    pub title: String,
    pub description: String,
    pub icon: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<ActionStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<Value>,
}

impl ActionExecutionUpdate {
    /// Lift the action record out of a chat message envelope.
    pub fn from_message(message: &Message) -> Self {
        let action = message.action().cloned().unwrap_or_default();
        Self {
            message_id: message.id.clone(),
            action_id: action.action_id,
            service_name: action.service_name,
            title: action.title,
            description: action.description,
            icon: action.icon,
            status: action.status,
            input: action.input,
            output: action.output,
            error: action.error,
        }
    }
}

// Key spellings seen on the wire, as (canonical, alternate) pairs.

trait WireShape {
    const KEY_ALIASES: &'static [(&'static str, &'static str)];
}

impl WireShape for Message {
    const KEY_ALIASES: &'static [(&'static str, &'static str)] =
        &[("_id", "id"), ("createdAt", "created_at")];
}

impl WireShape for ActionExecution {
    const KEY_ALIASES: &'static [(&'static str, &'static str)] =
        &[("actionId", "action_id"), ("serviceName", "service_name")];
}

impl WireShape for FileAttachment {
    const KEY_ALIASES: &'static [(&'static str, &'static str)] =
        &[("url", "path"), ("type", "mimeType")];
}

/// Move each alternate key onto its canonical key when the canonical one is
/// absent or null. A conflicting alternate is left in place.
fn canonicalize(value: &mut Value, aliases: &[(&str, &str)]) {
    let Some(map) = value.as_object_mut() else {
        return;
    };
    for (canonical, alternate) in aliases {
        if map.get(*canonical).is_some_and(|v| !v.is_null()) {
            continue;
        }
        if let Some(v) = map.remove(*alternate) {
            map.insert((*canonical).to_string(), v);
        }
    }
}

// Lenient field decoders: a value of the wrong shape becomes blank instead of
// failing the whole message.

fn lenient_wire<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned + WireShape,
{
    let mut raw = Value::deserialize(deserializer)?;
    canonicalize(&mut raw, T::KEY_ALIASES);
    Ok(serde_json::from_value(raw).ok())
}

fn lenient<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned,
{
    let raw = Value::deserialize(deserializer)?;
    Ok(serde_json::from_value(raw).ok())
}

fn lenient_string<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    Ok(match Value::deserialize(deserializer)? {
        Value::String(s) => s,
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        _ => String::new(),
    })
}

fn lenient_status<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<Option<ActionStatus>, D::Error> {
    Ok(Value::deserialize(deserializer)?
        .as_str()
        .map(ActionStatus::from))
}
