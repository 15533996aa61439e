//! `ContextManager` (spec §4.2): message pruning, tool-result truncation,
//! and old-turn compaction, run after every turn so the conversation stays
//! inside the model's context window without losing causal consistency.

use crate::knowledge::KnowledgeAccumulator;
use pulse_agent_core::Message;

/// `pruneMessagesForModel`. Keeps the most recent `max_context_messages`
/// messages, then repairs causality at the new head (Invariant B): a
/// pruned sequence must never start with an orphaned `tool_result`, nor
/// with an `assistant_tool_calls` whose results were cut away.
pub fn prune_messages_for_model(
    messages: &[Message],
    max_context_messages: usize,
    stateless: bool,
) -> Vec<Message> {
    if stateless {
        return messages
            .iter()
            .rev()
            .find(|m| matches!(m, Message::UserText { .. }))
            .cloned()
            .into_iter()
            .collect();
    }

    if messages.len() <= max_context_messages {
        return messages.to_vec();
    }

    let start = messages.len() - max_context_messages;
    let mut kept = messages[start..].to_vec();
    repair_head_causality(&mut kept);
    kept
}

fn repair_head_causality(messages: &mut Vec<Message>) {
    loop {
        match messages.first() {
            Some(Message::ToolResult { .. }) => {
                messages.remove(0);
            }
            Some(Message::AssistantToolCalls { tool_calls, .. }) => {
                let ids: Vec<String> = tool_calls.iter().map(|tc| tc.id.clone()).collect();
                messages.remove(0);
                while let Some(Message::ToolResult { result, .. }) = messages.first() {
                    if ids.contains(&result.tool_use_id) {
                        messages.remove(0);
                    } else {
                        break;
                    }
                }
            }
            _ => break,
        }
    }
}

/// Largest byte index `<= index` that lands on a UTF-8 char boundary of
/// `text`. Lets byte-oriented truncation cut safely without splitting a
/// multi-byte character.
fn floor_char_boundary(text: &str, index: usize) -> usize {
    if index >= text.len() {
        return text.len();
    }
    let mut boundary = index;
    while boundary > 0 && !text.is_char_boundary(boundary) {
        boundary -= 1;
    }
    boundary
}

/// `truncateToolResultForModel`. The UI always sees the untruncated
/// original; only the copy sent to the provider is shortened.
pub fn truncate_tool_result_for_model(text: &str, max_tool_result_chars: usize) -> String {
    if text.len() <= max_tool_result_chars {
        return text.to_string();
    }
    let keep = floor_char_boundary(text, max_tool_result_chars);
    let cut = text.len() - keep;
    let mut out = text[..keep].to_string();
    out.push_str(&format!(
        "\n\n---\n[TRUNCATED: {cut} characters cut. Use a more targeted query to see the rest.]"
    ));
    out
}

const KEY_PARAM_PRIORITY: &[&str] = &[
    "type",
    "resource_id",
    "action",
    "host",
    "node",
    "instance",
    "query",
    "command",
    "period",
];

/// Format a tool call's arguments into the short `(k=v, ...)`-style label
/// compaction summaries cite, preferring the spec's priority key order and
/// falling back to the first two non-empty string values.
fn key_params(input: &serde_json::Value) -> String {
    let Some(obj) = input.as_object() else {
        return String::new();
    };

    let mut parts: Vec<String> = Vec::new();
    for key in KEY_PARAM_PRIORITY {
        if let Some(value) = obj.get(*key).and_then(serde_json::Value::as_str) {
            if !value.is_empty() {
                parts.push(format!("{key}={value}"));
            }
        }
    }

    if parts.is_empty() {
        for (key, value) in obj {
            if let Some(s) = value.as_str() {
                if !s.is_empty() {
                    parts.push(format!("{key}={s}"));
                    if parts.len() == 2 {
                        break;
                    }
                }
            }
        }
    }

    parts.join(", ")
}

/// `compactOldToolResults`. Walks backwards from `current_turn_start_index`
/// (the index of the current turn's leading `assistant_tool_calls`),
/// skipping `keep_turns` turns verbatim, and collapses every non-error,
/// over-`min_chars` tool result before that point into a one-line summary.
pub fn compact_old_tool_results(
    messages: &mut [Message],
    current_turn_start_index: usize,
    keep_turns: usize,
    min_chars: usize,
    ka: Option<&KnowledgeAccumulator>,
) {
    // `keep_turns == 0` means "keep nothing verbatim": the aggressive
    // recovery pass in `AgenticLoop` relies on this compacting the whole
    // history, so it skips the backward walk entirely.
    let mut compaction_boundary = if keep_turns == 0 {
        current_turn_start_index
    } else {
        0
    };

    if keep_turns > 0 {
        let mut turns_seen = 0usize;
        for idx in (0..current_turn_start_index).rev() {
            if matches!(messages[idx], Message::AssistantToolCalls { .. }) {
                turns_seen += 1;
                if turns_seen == keep_turns {
                    compaction_boundary = idx;
                    break;
                }
            }
        }
    }

    // Map each assistant_tool_calls message to its tool-call inputs by id,
    // so a tool_result later in the window can look up the call that produced it.
    let mut call_by_id: std::collections::HashMap<String, (String, serde_json::Value)> =
        std::collections::HashMap::new();
    for message in messages.iter().take(current_turn_start_index) {
        if let Message::AssistantToolCalls { tool_calls, .. } = message {
            for call in tool_calls {
                call_by_id.insert(call.id.clone(), (call.name.clone(), call.input.clone()));
            }
        }
    }

    for message in messages.iter_mut().take(compaction_boundary) {
        let Message::ToolResult { result, .. } = message else {
            continue;
        };
        if result.is_error || result.content.len() < min_chars {
            continue;
        }

        let (tool_name, input) = call_by_id
            .get(&result.tool_use_id)
            .cloned()
            .unwrap_or(("unknown".to_string(), serde_json::Value::Null));
        let params = key_params(&input);

        let summary = match ka.and_then(|ka| ka.fact_summary_for_tool(&result.tool_use_id)) {
            Some(facts) => format!("[Compacted: {tool_name}({params}) — Key facts: {facts}]"),
            None => {
                let chars = result.content.len();
                let lines = result.content.lines().count();
                format!(
                    "[Tool result compacted: {tool_name}({params}) — {chars} chars, {lines} lines. \
                     Full data was provided to the model in an earlier turn and has already been processed.]"
                )
            }
        };
        result.content = summary;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pulse_agent_core::{ToolCall, ToolResult};
    use serde_json::json;

    fn user(id: &str, text: &str) -> Message {
        Message::user_text(id, text)
    }

    fn assistant(id: &str, text: &str) -> Message {
        Message::assistant_text(id, text)
    }

    #[test]
    fn stateless_pruning_keeps_only_last_user_message() {
        let messages = vec![
            user("1", "first"),
            assistant("2", "ok"),
            user("3", "second"),
            assistant("4", "done"),
        ];
        let pruned = prune_messages_for_model(&messages, 40, true);
        assert_eq!(pruned.len(), 1);
        assert_eq!(pruned[0].text(), Some("second"));
    }

    #[test]
    fn under_cap_returns_unchanged() {
        let messages = vec![user("1", "hi")];
        let pruned = prune_messages_for_model(&messages, 40, false);
        assert_eq!(pruned.len(), 1);
    }

    #[test]
    fn orphan_tool_result_dropped_from_head() {
        let mut messages = vec![user("0", "zero"), assistant("1", "one")];
        messages.push(Message::tool_result("2", ToolResult::ok("missing-call", "orphan")));
        for i in 3..43 {
            messages.push(user(&i.to_string(), "filler"));
        }

        let pruned = prune_messages_for_model(&messages, 40, false);
        assert!(!matches!(pruned[0], Message::ToolResult { .. }));
        assert!(matches!(pruned[0], Message::UserText { .. }));
    }

    #[test]
    fn assistant_tool_calls_and_its_results_dropped_together_from_head() {
        let mut messages = vec![user("0", "zero")];
        messages.push(Message::assistant_tool_calls(
            "1",
            vec![ToolCall::new("call-1", "pulse_query", json!({}))],
        ));
        messages.push(Message::tool_result("2", ToolResult::ok("call-1", "result")));
        for i in 3..43 {
            messages.push(user(&i.to_string(), "filler"));
        }

        let pruned = prune_messages_for_model(&messages, 40, false);
        assert!(matches!(pruned[0], Message::UserText { .. }));
        assert!(pruned.iter().all(|m| !m.is_assistant_tool_calls()));
    }

    #[test]
    fn truncation_appends_marker_with_cut_count() {
        let text = "x".repeat(100);
        let truncated = truncate_tool_result_for_model(&text, 50);
        assert!(truncated.starts_with(&"x".repeat(50)));
        assert!(truncated.contains("TRUNCATED: 50 characters cut"));
    }

    #[test]
    fn truncation_is_noop_under_limit() {
        let text = "short";
        assert_eq!(truncate_tool_result_for_model(text, 50), text);
    }

    #[test]
    fn compaction_never_touches_error_results() {
        let mut messages = vec![
            Message::assistant_tool_calls("0", vec![ToolCall::new("c1", "pulse_query", json!({}))]),
            Message::tool_result("1", ToolResult::error("c1", &"x".repeat(1000))),
        ];
        let before = messages.clone();
        compact_old_tool_results(&mut messages, 2, 0, 10, None);
        if let (Message::ToolResult { result: r1, .. }, Message::ToolResult { result: r2, .. }) =
            (&messages[1], &before[1])
        {
            assert_eq!(r1.content, r2.content);
        }
    }

    #[test]
    fn compaction_savings_across_turns() {
        let mut messages = Vec::new();
        for i in 0..10 {
            messages.push(Message::assistant_tool_calls(
                format!("a{i}"),
                vec![ToolCall::new(format!("c{i}"), "pulse_metrics", json!({"action": "performance"}))],
            ));
            messages.push(Message::tool_result(
                format!("r{i}"),
                ToolResult::ok(format!("c{i}"), "x".repeat(4000)),
            ));
        }
        let current_turn_start = messages.len();
        let before_total: usize = messages
            .iter()
            .filter_map(|m| m.as_tool_result())
            .map(|r| r.content.len())
            .sum();

        compact_old_tool_results(&mut messages, current_turn_start, 3, 500, None);

        let after_total: usize = messages
            .iter()
            .filter_map(|m| m.as_tool_result())
            .map(|r| r.content.len())
            .sum();
        let compacted_count = messages
            .iter()
            .filter_map(|m| m.as_tool_result())
            .filter(|r| r.content.starts_with("[Tool result compacted"))
            .count();

        assert_eq!(compacted_count, 7);
        assert!(after_total * 2 <= before_total);
    }

    #[test]
    fn compaction_cites_ka_facts_when_available() {
        let ka = KnowledgeAccumulator::new(crate::config::KnowledgeConfig {
            max_entries: 60,
            max_chars: 2000,
            max_value_len: 200,
        });
        ka.add_fact(
            crate::knowledge::FactCategory::Metrics,
            "metrics:vm:pve1:100",
            "cpu 12%, mem 40%",
            1,
            Some("c0".to_string()),
        );

        let mut messages = vec![
            Message::assistant_tool_calls(
                "a0",
                vec![ToolCall::new("c0", "pulse_metrics", json!({"action": "performance"}))],
            ),
            Message::tool_result("r0", ToolResult::ok("c0", "x".repeat(1000))),
            Message::assistant_tool_calls("a1", vec![ToolCall::new("c1", "pulse_metrics", json!({}))]),
            Message::tool_result("r1", ToolResult::ok("c1", "y".repeat(1000))),
        ];
        let start = messages.len();
        compact_old_tool_results(&mut messages, start, 0, 10, Some(&ka));

        let content = messages[1].as_tool_result().unwrap().content.clone();
        assert!(content.contains("Key facts"));
        assert!(content.contains("cpu 12%, mem 40%"));
    }
}
