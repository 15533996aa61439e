//! `AgenticLoop` (spec §4.1): the turn state machine. Sends a request to
//! the provider, consumes its stream, dispatches every tool call it
//! produced (through the gate, then the dispatcher), feeds results back,
//! and repeats until a terminal condition is reached.

use crate::budget::{BudgetChecker, BudgetContext};
use crate::context_manager::{compact_old_tool_results, prune_messages_for_model, truncate_tool_result_for_model};
use crate::dispatcher::{QuestionEvent, ToolDispatcher};
use crate::error::AgentError;
use crate::events::AgentEventKind;
use crate::gate::{self, GateRequest};
use crate::knowledge::extractor::extract_facts;
use crate::knowledge::KnowledgeAccumulator;
use crate::session::SessionState;
use pulse_agent_core::{
    ChatRequest, Message, Provider, StreamEvent, ToolCall, ToolChoice, ToolDef, ToolExecutor, ToolOutcome,
    ToolResult,
};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

pub use crate::config::LoopConfig;

const WRAP_UP_NUDGE_PREFIX: &str =
    "[System: You've made a number of tool calls this turn. Start forming your response to the user soon.]\n\n";
const WRAP_UP_ESCALATION_PREFIX: &str =
    "[System: WRAP UP NOW — do NOT make any more tool calls. Respond to the user with your findings immediately.]\n\n";

const FALLBACK_SNIPPET_CHARS: usize = 400;

/// Everything one `Execute` call needs beyond the shared, session-keyed
/// `KnowledgeAccumulator`.
pub struct ExecuteRequest {
    pub session_id: String,
    pub messages: Vec<Message>,
    pub system_prompt: String,
    pub autonomous_mode: bool,
    /// Caller-supplied flag (spec §4.5): skip the gate entirely this call,
    /// e.g. because the user explicitly asked for fresh data.
    pub force_fresh_data: bool,
    pub max_turns_override: Option<usize>,
}

pub struct AgenticLoop {
    provider: Arc<dyn Provider>,
    dispatcher: ToolDispatcher,
    tools: Vec<ToolDef>,
    config: LoopConfig,
    budget: Arc<dyn BudgetChecker>,
}

impl AgenticLoop {
    pub fn new(
        provider: Arc<dyn Provider>,
        executor: Arc<dyn ToolExecutor>,
        tools: Vec<ToolDef>,
        config: LoopConfig,
        budget: Arc<dyn BudgetChecker>,
    ) -> Self {
        Self {
            provider,
            dispatcher: ToolDispatcher::new(executor),
            tools,
            config,
            budget,
        }
    }

    /// Drive one `Execute` call to completion. Returns the messages
    /// appended during this call (spec §4.1 "Output").
    pub async fn execute(
        &self,
        req: ExecuteRequest,
        ka: &KnowledgeAccumulator,
        cancel_token: &CancellationToken,
        mut emit: impl FnMut(AgentEventKind) + Send,
    ) -> Result<Vec<Message>, AgentError> {
        let session = SessionState::new(req.session_id.clone(), req.messages, req.autonomous_mode);
        let start_len = session.message_count();
        let max_turns = req.max_turns_override.unwrap_or(self.config.max_turns);
        let system_prompt = req.system_prompt;

        let result = self
            .run_turns(
                &session,
                ka,
                &system_prompt,
                max_turns,
                req.force_fresh_data,
                cancel_token,
                &mut emit,
            )
            .await;

        match result {
            Ok(()) => {
                self.ensure_final_text_response(&session, ka, &system_prompt, &mut emit).await?;
                emit(AgentEventKind::Done {
                    turns: session.turn(),
                    tool_calls: session.tool_calls_count(),
                });
                Ok(session.messages_since(start_len))
            }
            Err(err) => {
                if !matches!(err, AgentError::Cancelled) {
                    emit(AgentEventKind::Error { message: err.to_string() });
                }
                Err(err)
            }
        }
    }

    /// Runs turns until a terminal condition is reached. `Ok(())` means the
    /// loop ended normally (conditions a/b); any `Err` is a terminal failure
    /// (conditions c/d/e).
    async fn run_turns(
        &self,
        session: &SessionState,
        ka: &KnowledgeAccumulator,
        system_prompt: &str,
        max_turns: usize,
        force_fresh_data: bool,
        cancel_token: &CancellationToken,
        emit: &mut impl FnMut(AgentEventKind),
    ) -> Result<(), AgentError> {
        loop {
            if cancel_token.is_cancelled() || session.is_aborted() {
                return Err(AgentError::Cancelled);
            }

            let turn = session.begin_turn();
            ka.begin_turn(turn);

            if turn > max_turns {
                return Ok(());
            }

            self.budget
                .check(&BudgetContext {
                    session_id: &session.session_id,
                    turn,
                    tool_calls_count: session.tool_calls_count(),
                })
                .await
                .map_err(AgentError::BudgetRejected)?;

            let knowledge_suffix = self.render_system_prompt(ka);
            let chat_req = self.build_turn_request(session, ka, system_prompt, &knowledge_suffix)?;

            let mut content = String::new();
            let mut thinking = String::new();
            let mut tool_calls: Vec<ToolCall> = Vec::new();

            crate::llm_retry::stream_with_retry(
                self.provider.as_ref(),
                &session.session_id,
                &chat_req,
                |event: StreamEvent| match event {
                    StreamEvent::Content { text } => {
                        content.push_str(&text);
                        emit(AgentEventKind::Content { text });
                    }
                    StreamEvent::Thinking { text } => {
                        thinking.push_str(&text);
                        emit(AgentEventKind::Thinking { text });
                    }
                    StreamEvent::ToolCall { id, name, input } => {
                        tool_calls.push(ToolCall::new(id, name, input));
                    }
                    StreamEvent::Done { .. } | StreamEvent::Error { .. } => {}
                },
                cancel_token,
            )
            .await?;

            if tool_calls.is_empty() {
                let message_id = Uuid::new_v4().to_string();
                session.push_message(Message::assistant_text(message_id, content));
                return Ok(());
            }

            let reasoning = if thinking.is_empty() { None } else { Some(thinking) };
            let message_id = Uuid::new_v4().to_string();
            session.push_message(Message::AssistantToolCalls {
                id: message_id,
                reasoning_content: reasoning,
                tool_calls: tool_calls.clone(),
            });

            let turns_remaining = max_turns.saturating_sub(turn);
            for call in &tool_calls {
                if cancel_token.is_cancelled() || session.is_aborted() {
                    return Err(AgentError::Cancelled);
                }
                self.dispatch_one_call(session, ka, call, force_fresh_data, turns_remaining, cancel_token, emit)
                    .await;
            }
        }
    }

    async fn dispatch_one_call(
        &self,
        session: &SessionState,
        ka: &KnowledgeAccumulator,
        call: &ToolCall,
        force_fresh_data: bool,
        turns_remaining: usize,
        cancel_token: &CancellationToken,
        emit: &mut impl FnMut(AgentEventKind),
    ) {
        emit(AgentEventKind::ToolStart {
            tool_use_id: call.id.clone(),
            name: call.name.clone(),
            input: call.input.clone(),
        });

        let gate_request = GateRequest {
            name: &call.name,
            input: &call.input,
            force_fresh: force_fresh_data,
        };
        let gated = gate::check(ka, &gate_request);

        let (outcome, cached) = if let Some(decision) = gated {
            (decision.outcome, true)
        } else if call.name == "ask_user" {
            let outcome = self
                .dispatcher
                .handle_ask_user(session, &call.input, cancel_token, |q: QuestionEvent| {
                    emit(AgentEventKind::Question {
                        question_id: q.question_id,
                        payload: q.payload,
                    });
                })
                .await;
            (outcome, false)
        } else {
            let outcome = self.dispatcher.execute_tool_safely(&call.name, call.input.clone()).await;
            (outcome, false)
        };

        emit(AgentEventKind::ToolEnd {
            tool_use_id: call.id.clone(),
            name: call.name.clone(),
            is_error: outcome.is_error,
            cached,
        });

        if !cached {
            let observed_at = time::OffsetDateTime::now_utc().unix_timestamp();
            for fact in extract_facts(call, &outcome.joined_content(), outcome.is_error) {
                ka.add_fact(fact.category, fact.key, fact.value, observed_at, Some(call.id.clone()));
            }
        }

        let tool_calls_count = session.record_tool_call();
        let result = ToolResult {
            tool_use_id: call.id.clone(),
            content: outcome.joined_content(),
            is_error: outcome.is_error,
        };
        let message_id = Uuid::new_v4().to_string();
        session.push_message(Message::tool_result(message_id, result));

        self.maybe_fire_wrap_up_nudge(session, tool_calls_count, turns_remaining);
    }

    fn maybe_fire_wrap_up_nudge(&self, session: &SessionState, tool_calls_count: usize, turns_remaining: usize) {
        let wrap_up = &self.config.wrap_up;
        if turns_remaining > wrap_up.turns_remaining_gate {
            return;
        }

        let prefix = if tool_calls_count >= wrap_up.escalation_threshold {
            if session.mark_escalation_nudge_fired() {
                Some(WRAP_UP_ESCALATION_PREFIX)
            } else {
                None
            }
        } else if tool_calls_count >= wrap_up.nudge_threshold {
            if session.mark_wrap_up_nudge_fired() {
                Some(WRAP_UP_NUDGE_PREFIX)
            } else {
                None
            }
        } else {
            None
        };

        let Some(prefix) = prefix else { return };

        let mut messages = session.messages();
        if let Some(Message::ToolResult { result, .. }) = messages
            .iter_mut()
            .rev()
            .find(|m| matches!(m, Message::ToolResult { result, .. } if !result.is_error))
        {
            result.content = format!("{prefix}{}", result.content);
            session.replace_messages(messages);
        }
    }

    fn render_system_prompt(&self, ka: &KnowledgeAccumulator) -> String {
        let rendered = ka.render();
        if rendered.is_empty() {
            String::new()
        } else {
            format!("\n\n{rendered}")
        }
    }

    /// Apply compaction (persisted to the session), then prune + truncate
    /// for the outgoing request. Falls back to dropping tools, then to a
    /// hard failure, if the result is still over budget (spec §7 item 6).
    fn build_turn_request(
        &self,
        session: &SessionState,
        ka: &KnowledgeAccumulator,
        system_prompt: &str,
        knowledge_suffix: &str,
    ) -> Result<ChatRequest, AgentError> {
        let mut messages = session.messages();
        let current_turn_start = messages.len();
        compact_old_tool_results(
            &mut messages,
            current_turn_start,
            self.config.keep_turns,
            self.config.min_compaction_chars,
            Some(ka),
        );
        session.replace_messages(messages.clone());

        let mut pruned = prune_messages_for_model(&messages, self.config.max_context_messages, self.config.stateless_context);
        truncate_in_place(&mut pruned, self.config.max_tool_result_chars);

        let budget = self.config.max_context_messages * self.config.max_tool_result_chars;
        if total_chars(&pruned) <= budget {
            return Ok(ChatRequest {
                system: format!("{system_prompt}{knowledge_suffix}"),
                messages: pruned,
                tools: self.tools.clone(),
                tool_choice: ToolChoice::Auto,
            });
        }

        // Recovery step 1: compact more aggressively (keep nothing verbatim) and re-prune.
        let mut messages = session.messages();
        compact_old_tool_results(&mut messages, messages.len(), 0, self.config.min_compaction_chars, Some(ka));
        let mut pruned = prune_messages_for_model(&messages, self.config.max_context_messages, self.config.stateless_context);
        truncate_in_place(&mut pruned, self.config.max_tool_result_chars);
        if total_chars(&pruned) <= budget {
            return Ok(ChatRequest {
                system: format!("{system_prompt}{knowledge_suffix}"),
                messages: pruned,
                tools: self.tools.clone(),
                tool_choice: ToolChoice::Auto,
            });
        }

        // Recovery step 2: drop tools from the request entirely, forcing a
        // text-only reply, and prune harder (half the normal cap).
        let tighter_cap = (self.config.max_context_messages / 2).max(1);
        let mut pruned = prune_messages_for_model(&messages, tighter_cap, self.config.stateless_context);
        truncate_in_place(&mut pruned, self.config.max_tool_result_chars);
        if total_chars(&pruned) <= budget {
            return Ok(ChatRequest {
                system: format!("{system_prompt}{knowledge_suffix}"),
                messages: pruned,
                tools: Vec::new(),
                tool_choice: ToolChoice::None,
            });
        }

        Err(AgentError::ContextOverflow)
    }

    async fn ensure_final_text_response(
        &self,
        session: &SessionState,
        ka: &KnowledgeAccumulator,
        system_prompt: &str,
        emit: &mut impl FnMut(AgentEventKind),
    ) -> Result<(), AgentError> {
        if matches!(session.messages().last(), Some(Message::AssistantText { content, .. }) if !content.is_empty()) {
            return Ok(());
        }

        let knowledge_suffix = self.render_system_prompt(ka);
        let mut messages = session.messages();
        let pruned = prune_messages_for_model(&messages, self.config.max_context_messages, self.config.stateless_context);
        let request = ChatRequest {
            system: format!("{system_prompt}{knowledge_suffix}"),
            messages: pruned,
            tools: Vec::new(),
            tool_choice: ToolChoice::None,
        };

        let text = match self.provider.chat(&request).await {
            Ok(text) if !text.trim().is_empty() => text,
            _ => fallback_summary(&messages),
        };

        emit(AgentEventKind::Content { text: text.clone() });
        let message_id = Uuid::new_v4().to_string();
        messages.push(Message::assistant_text(message_id, text));
        session.replace_messages(messages);
        Ok(())
    }
}

fn truncate_in_place(messages: &mut [Message], max_tool_result_chars: usize) {
    for message in messages.iter_mut() {
        if let Message::ToolResult { result, .. } = message {
            result.content = truncate_tool_result_for_model(&result.content, max_tool_result_chars);
        }
    }
}

fn total_chars(messages: &[Message]) -> usize {
    messages
        .iter()
        .map(|m| match m {
            Message::UserText { content, .. } | Message::AssistantText { content, .. } => content.len(),
            Message::AssistantToolCalls { tool_calls, .. } => {
                tool_calls.iter().map(|tc| tc.input.to_string().len()).sum()
            }
            Message::ToolResult { result, .. } => result.content.len(),
        })
        .sum()
}

/// Deterministic fallback summary (spec §4.1 `ensureFinalTextResponse`):
/// `"<N> successful check(s): <names>. Latest successful result snippet: <excerpt>. (automatic summary.)"`.
fn fallback_summary(messages: &[Message]) -> String {
    let mut name_by_id = std::collections::HashMap::new();
    for message in messages {
        if let Message::AssistantToolCalls { tool_calls, .. } = message {
            for call in tool_calls {
                name_by_id.insert(call.id.clone(), call.name.clone());
            }
        }
    }

    let mut success_names: Vec<String> = Vec::new();
    let mut last_success_content: Option<&str> = None;
    for message in messages {
        if let Message::ToolResult { result, .. } = message {
            if !result.is_error {
                if let Some(name) = name_by_id.get(&result.tool_use_id) {
                    success_names.push(name.clone());
                }
                last_success_content = Some(result.content.as_str());
            }
        }
    }

    let snippet: String = last_success_content
        .unwrap_or("(no successful tool results)")
        .chars()
        .take(FALLBACK_SNIPPET_CHARS)
        .collect();

    format!(
        "{} successful check(s): {}. Latest successful result snippet: {snippet}. (automatic summary.)",
        success_names.len(),
        success_names.join(", "),
    )
}
