//! `ToolDispatcher` (spec §4.6): the single point through which every tool
//! call is actually executed — panic recovery, auto-recovery retries, and
//! the interactive `ask_user` protocol all live here so `AgenticLoop` only
//! ever sees `(ToolCall) -> ToolResult`.

use crate::ask_user::{self, QuestionAnswer};
use crate::config::DEFAULT_ASK_USER_POLL_MS;
use crate::session::SessionState;
use futures::FutureExt;
use pulse_agent_core::{ExecutorError, ToolExecutor, ToolOutcome};
use serde_json::Value;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

pub struct ToolDispatcher {
    executor: Arc<dyn ToolExecutor>,
}

/// Emitted to the UI when `ask_user` is invoked; the loop forwards this as
/// the `question` event (spec §6).
pub struct QuestionEvent {
    pub question_id: String,
    pub payload: Value,
}

impl ToolDispatcher {
    pub fn new(executor: Arc<dyn ToolExecutor>) -> Self {
        Self { executor }
    }

    /// Run one tool call to completion, recovering from a panic inside the
    /// executor and retrying once if the result is machine-readable
    /// auto-recoverable (spec §4.6).
    pub async fn execute_tool_safely(&self, name: &str, input: Value) -> ToolOutcome {
        let outcome = self.invoke_catching_panics(name, input.clone()).await;

        if let Some(retry_input) = auto_recovery_retry_input(&outcome, &input) {
            return self.invoke_catching_panics(name, retry_input).await;
        }

        outcome
    }

    async fn invoke_catching_panics(&self, name: &str, input: Value) -> ToolOutcome {
        let fut = AssertUnwindSafe(self.executor.invoke(name, input)).catch_unwind();
        match fut.await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(ExecutorError::UnknownTool(tool))) => {
                ToolOutcome::error(format!("unknown tool: {tool}"))
            }
            Ok(Err(ExecutorError::Other(message))) => ToolOutcome::error(message),
            Err(panic) => {
                let details = panic_message(&panic);
                ToolOutcome::error(format!("tool panic in {name}: {details}"))
            }
        }
    }

    /// The interactive `ask_user` tool (spec §4.6, §5): validate the payload,
    /// register a pending question, emit it to the UI, and block (polling
    /// every 250ms) until answered, aborted, or cancelled.
    pub async fn handle_ask_user(
        &self,
        session: &SessionState,
        input: &Value,
        cancel_token: &CancellationToken,
        mut emit_question: impl FnMut(QuestionEvent),
    ) -> ToolOutcome {
        if session.autonomous_mode {
            return ToolOutcome::error(
                "ask_user is unavailable in autonomous mode; proceed using reasonable defaults",
            );
        }

        let questions = match ask_user::validate_and_normalize(input) {
            Ok(q) => q,
            Err(message) => return ToolOutcome::error(message),
        };

        let question_id = Uuid::new_v4().to_string();
        let payload = serde_json::json!({ "questions": questions });
        let mut rx = session.register_question(question_id.clone());
        emit_question(QuestionEvent {
            question_id: question_id.clone(),
            payload,
        });

        let poll = Duration::from_millis(DEFAULT_ASK_USER_POLL_MS);
        loop {
            if session.is_aborted() || cancel_token.is_cancelled() {
                session.unregister_question(&question_id);
                return ToolOutcome::error("cancelled while waiting for user answer");
            }

            match tokio::time::timeout(poll, &mut rx).await {
                Ok(Ok(answer)) => {
                    session.unregister_question(&question_id);
                    return ToolOutcome::ok(render_answer(&answer));
                }
                Ok(Err(_)) => {
                    // Sender dropped (e.g. abort cleared the map) without a reply.
                    session.unregister_question(&question_id);
                    return ToolOutcome::error("cancelled while waiting for user answer");
                }
                Err(_) => continue, // poll interval elapsed, loop to recheck abort/cancel
            }
        }
    }
}

fn render_answer(answer: &QuestionAnswer) -> String {
    let parts: Vec<String> = answer
        .answers
        .iter()
        .map(|a| format!("{}: {}", a.id, a.value))
        .collect();
    parts.join("\n")
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Parse `{auto_recoverable: true, suggested_rewrite: "..."}` out of an
/// error result, at either `error.details` or the root, and build the retry
/// input if the original call hadn't already attempted one (spec §4.6,
/// scenario 5). Returns `None` when no retry should happen.
fn auto_recovery_retry_input(outcome: &ToolOutcome, original_input: &Value) -> Option<Value> {
    if !outcome.is_error {
        return None;
    }
    if original_input
        .get("_auto_recovery_attempt")
        .and_then(Value::as_bool)
        == Some(true)
    {
        return None;
    }

    let body: Value = serde_json::from_str(&outcome.joined_content()).ok()?;
    let candidate = body
        .get("error")
        .and_then(|e| e.get("details"))
        .or(Some(&body))?;

    let auto_recoverable = candidate.get("auto_recoverable").and_then(Value::as_bool) == Some(true);
    if !auto_recoverable {
        return None;
    }
    let suggested_rewrite = candidate.get("suggested_rewrite").and_then(Value::as_str)?;

    let mut retry_input = parse_suggested_rewrite(suggested_rewrite).unwrap_or_else(|| original_input.clone());
    if let Some(obj) = retry_input.as_object_mut() {
        obj.insert("_auto_recovery_attempt".to_string(), Value::Bool(true));
    }
    Some(retry_input)
}

/// Parse a `"tool_name k=v k2=v2"`-style suggested rewrite into a JSON
/// object of its `k=v` pairs. The tool name itself is informational only —
/// the dispatcher already knows which tool it's retrying.
fn parse_suggested_rewrite(rewrite: &str) -> Option<Value> {
    let mut parts = rewrite.split_whitespace();
    parts.next()?; // tool name, unused
    let mut map = serde_json::Map::new();
    for pair in parts {
        if let Some((k, v)) = pair.split_once('=') {
            map.insert(k.to_string(), Value::String(v.to_string()));
        }
    }
    Some(Value::Object(map))
}
