//! The `Provider` capability (spec §6): the LLM backend the engine drives.
//!
//! This crate only describes the shape of the conversation with a provider.
//! Building an HTTP client for a specific vendor, retrying rate limits, and
//! everything else about actually talking to a model is the caller's job —
//! mirrored on `pulse_agent::llm_retry`, which wraps whatever `Provider` is
//! plugged in.

use crate::error::ProviderError;
use crate::message::{Message, ToolCall};
use crate::tool::ToolDef;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// How the provider should be nudged to use (or not use) tools this turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolChoice {
    #[default]
    Auto,
    /// Force a pure-text reply; used by `ensureFinalTextResponse`.
    None,
    Required,
}

/// Everything needed to start (or resume) one provider call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatRequest {
    pub system: String,
    pub messages: Vec<Message>,
    pub tools: Vec<ToolDef>,
    #[serde(default)]
    pub tool_choice: ToolChoice,
}

/// One event delivered while consuming a provider stream.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamEvent {
    Content { text: String },
    Thinking { text: String },
    ToolCall { id: String, name: String, input: Value },
    Done { input_tokens: u64, output_tokens: u64 },
    Error { message: String },
}

impl StreamEvent {
    /// Whether this event counts as "visible output" for the retry policy
    /// (spec §4.1: don't retry once the model has started talking).
    pub fn is_visible_output(&self) -> bool {
        matches!(
            self,
            StreamEvent::Content { .. } | StreamEvent::Thinking { .. } | StreamEvent::ToolCall { .. }
        )
    }

    pub fn as_tool_call(&self) -> Option<ToolCall> {
        match self {
            StreamEvent::ToolCall { id, name, input } => {
                Some(ToolCall::new(id.clone(), name.clone(), input.clone()))
            }
            _ => None,
        }
    }
}

/// Callback the engine hands the provider; called once per stream event, in
/// emission order (spec §5: "Assistant content within a stream is delivered
/// to the UI callback in emission order").
pub type StreamSink<'a> = dyn FnMut(StreamEvent) + Send + 'a;

/// The LLM backend capability. An implementation owns HTTP/gRPC transport,
/// auth, and vendor-specific request shaping; the engine only ever sees
/// `ChatRequest` in, `StreamEvent`s out.
#[async_trait]
pub trait Provider: Send + Sync {
    /// Non-streaming convenience call, used by `ensureFinalTextResponse` to
    /// force a final summary without re-entering the streaming retry path.
    async fn chat(&self, req: &ChatRequest) -> Result<String, ProviderError>;

    /// Stream a response, invoking `on_event` for every chunk as it arrives.
    /// `is_cancelled` is polled between chunks so long-running streams honour
    /// `Abort(session_id)` without the trait depending on a specific async
    /// runtime's cancellation primitive.
    async fn chat_stream(
        &self,
        req: &ChatRequest,
        on_event: &mut StreamSink<'_>,
        is_cancelled: &(dyn Fn() -> bool + Sync),
    ) -> Result<(), ProviderError>;
}
