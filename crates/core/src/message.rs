//! The conversation data model (spec §3).
//!
//! `Message` is a tagged variant rather than one struct with optional fields:
//! each variant only carries what that kind of turn can actually have, so a
//! `ToolResult` message can't accidentally be constructed without a
//! `tool_use_id`, and an `AssistantText` can't smuggle in a dangling tool call.

use serde::{Deserialize, Serialize};
use serde_json::Value;

pub type MessageId = String;

/// Who sent a message. Tool results are carried by a dedicated `Message`
/// variant rather than a role of their own (see `Message::ToolResult`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Assistant,
}

/// A single tool invocation requested by the model within one assistant turn.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    /// The call's arguments, preserved as an order-independent JSON object.
    pub input: Value,
    /// Opaque provider-specific continuation token (e.g. extended-thinking
    /// signatures). Never interpreted by the engine, only round-tripped.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thought_signature: Option<Vec<u8>>,
}

impl ToolCall {
    pub fn new(id: impl Into<String>, name: impl Into<String>, input: Value) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            input,
            thought_signature: None,
        }
    }

    /// Read a top-level string field out of `input`, defensively.
    ///
    /// Returns `None` for a missing key, a non-string value, or a non-object
    /// `input` — never panics. This is the single accessor `FactExtractor`
    /// and `PredictFactKeys` both use, so the two stay in lockstep (spec §9).
    pub fn input_str(&self, key: &str) -> Option<&str> {
        self.input.as_object()?.get(key)?.as_str()
    }
}

/// The outcome of executing one `ToolCall`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolResult {
    pub tool_use_id: String,
    pub content: String,
    pub is_error: bool,
}

impl ToolResult {
    pub fn ok(tool_use_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            tool_use_id: tool_use_id.into(),
            content: content.into(),
            is_error: false,
        }
    }

    pub fn error(tool_use_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            tool_use_id: tool_use_id.into(),
            content: content.into(),
            is_error: true,
        }
    }
}

/// One turn of conversation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Message {
    UserText {
        id: MessageId,
        content: String,
    },
    AssistantText {
        id: MessageId,
        content: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        reasoning_content: Option<String>,
    },
    AssistantToolCalls {
        id: MessageId,
        #[serde(skip_serializing_if = "Option::is_none")]
        reasoning_content: Option<String>,
        tool_calls: Vec<ToolCall>,
    },
    ToolResult {
        id: MessageId,
        result: ToolResult,
    },
}

impl Message {
    pub fn id(&self) -> &str {
        match self {
            Message::UserText { id, .. }
            | Message::AssistantText { id, .. }
            | Message::AssistantToolCalls { id, .. }
            | Message::ToolResult { id, .. } => id,
        }
    }

    pub fn role(&self) -> Role {
        match self {
            Message::UserText { .. } => Role::User,
            Message::AssistantText { .. }
            | Message::AssistantToolCalls { .. }
            | Message::ToolResult { .. } => Role::Assistant,
        }
    }

    pub fn user_text(id: impl Into<String>, content: impl Into<String>) -> Self {
        Message::UserText {
            id: id.into(),
            content: content.into(),
        }
    }

    pub fn assistant_text(id: impl Into<String>, content: impl Into<String>) -> Self {
        Message::AssistantText {
            id: id.into(),
            content: content.into(),
            reasoning_content: None,
        }
    }

    pub fn assistant_tool_calls(id: impl Into<String>, tool_calls: Vec<ToolCall>) -> Self {
        Message::AssistantToolCalls {
            id: id.into(),
            reasoning_content: None,
            tool_calls,
        }
    }

    pub fn tool_result(id: impl Into<String>, result: ToolResult) -> Self {
        Message::ToolResult {
            id: id.into(),
            result,
        }
    }

    pub fn is_tool_result(&self) -> bool {
        matches!(self, Message::ToolResult { .. })
    }

    pub fn is_assistant_tool_calls(&self) -> bool {
        matches!(self, Message::AssistantToolCalls { .. })
    }

    /// Text content for the variants that carry plain text. `ToolResult`'s
    /// content lives on `ToolResult::content`, not here.
    pub fn text(&self) -> Option<&str> {
        match self {
            Message::UserText { content, .. } | Message::AssistantText { content, .. } => {
                Some(content)
            }
            _ => None,
        }
    }

    pub fn tool_calls(&self) -> Option<&[ToolCall]> {
        match self {
            Message::AssistantToolCalls { tool_calls, .. } => Some(tool_calls),
            _ => None,
        }
    }

    pub fn as_tool_result(&self) -> Option<&ToolResult> {
        match self {
            Message::ToolResult { result, .. } => Some(result),
            _ => None,
        }
    }

    /// `tool_use_id`s carried by this message, if it is a tool-call or
    /// tool-result message. Used by the pruning causality check (Invariant A/B).
    pub fn tool_use_ids(&self) -> Vec<&str> {
        match self {
            Message::AssistantToolCalls { tool_calls, .. } => {
                tool_calls.iter().map(|tc| tc.id.as_str()).collect()
            }
            Message::ToolResult { result, .. } => vec![result.tool_use_id.as_str()],
            _ => Vec::new(),
        }
    }
}
