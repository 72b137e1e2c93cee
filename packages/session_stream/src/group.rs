//! Presentation grouping.
//!
//! Consecutive action-execution system messages collapse into one
//! `ToolCalls` group; every other message stands alone. Runs break at the
//! first non-matching message, so two tool-call runs separated by a single
//! user message stay two groups.

use serde::Serialize;

use crate::types::Message;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum MessageGroup<'a> {
    Single { message: &'a Message },
    /// Never empty.
    ToolCalls { messages: Vec<&'a Message> },
}

impl<'a> MessageGroup<'a> {
    pub fn messages(&self) -> &[&'a Message] {
        match self {
            MessageGroup::Single { message } => std::slice::from_ref(message),
            MessageGroup::ToolCalls { messages } => messages,
        }
    }

    pub fn len(&self) -> usize {
        self.messages().len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages().is_empty()
    }

    pub fn is_tool_calls(&self) -> bool {
        matches!(self, MessageGroup::ToolCalls { .. })
    }
}

/// Partition `messages` into display groups. Single pass, order preserving;
/// concatenating the groups gives back the input.
pub fn assemble(messages: &[Message]) -> Vec<MessageGroup<'_>> {
    let mut groups = Vec::new();
    let mut run: Vec<&Message> = Vec::new();

    for message in messages {
        if message.is_tool_call() {
            run.push(message);
            continue;
        }
        if !run.is_empty() {
            groups.push(MessageGroup::ToolCalls {
                messages: std::mem::take(&mut run),
            });
        }
        groups.push(MessageGroup::Single { message });
    }
    if !run.is_empty() {
        groups.push(MessageGroup::ToolCalls { messages: run });
    }
    groups
}
