//! Runtime configuration for the agentic loop and its collaborators.
//!
//! Every tunable here is treated as an immutable record once constructed —
//! nothing in the loop, context manager, or accumulator mutates a `Config`
//! in place. Loading one from TOML/env/CLI flags is the caller's job; this
//! module only owns the shape and the defaults.

use serde::{Deserialize, Serialize};

pub const DEFAULT_MAX_TURNS: usize = 20;
pub const DEFAULT_MAX_CONTEXT_MESSAGES: usize = 40;
pub const DEFAULT_MAX_TOOL_RESULT_CHARS: usize = 16_000;
pub const DEFAULT_KEEP_TURNS: usize = 2;
pub const DEFAULT_MIN_COMPACTION_CHARS: usize = 500;

pub const DEFAULT_KA_MAX_ENTRIES: usize = 60;
pub const DEFAULT_KA_MAX_CHARS: usize = 2000;
pub const DEFAULT_KA_MAX_VALUE_LEN: usize = 200;

pub const DEFAULT_RESOLVED_CONTEXT_TTL_SECS: u64 = 45 * 60;
pub const DEFAULT_RESOLVED_CONTEXT_MAX_ENTRIES: usize = 500;
pub const DEFAULT_RECENT_ACCESS_WINDOW_SECS: u64 = 30;

pub const DEFAULT_WRAP_UP_NUDGE_THRESHOLD: usize = 13;
pub const DEFAULT_WRAP_UP_ESCALATION_THRESHOLD: usize = 18;
pub const DEFAULT_WRAP_UP_TURNS_REMAINING_GATE: usize = 7;

pub const DEFAULT_ASK_USER_POLL_MS: u64 = 250;

fn default_max_turns() -> usize {
    DEFAULT_MAX_TURNS
}
fn default_max_context_messages() -> usize {
    DEFAULT_MAX_CONTEXT_MESSAGES
}
fn default_max_tool_result_chars() -> usize {
    DEFAULT_MAX_TOOL_RESULT_CHARS
}
fn default_keep_turns() -> usize {
    DEFAULT_KEEP_TURNS
}
fn default_min_compaction_chars() -> usize {
    DEFAULT_MIN_COMPACTION_CHARS
}

/// Scheduler + context-manager knobs (spec §6 "Configuration options").
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct LoopConfig {
    #[serde(default = "default_max_turns")]
    pub max_turns: usize,

    #[serde(default = "default_max_context_messages")]
    pub max_context_messages: usize,

    #[serde(default = "default_max_tool_result_chars")]
    pub max_tool_result_chars: usize,

    #[serde(default = "default_keep_turns")]
    pub keep_turns: usize,

    #[serde(default = "default_min_compaction_chars")]
    pub min_compaction_chars: usize,

    /// Collapses history to just the latest user message before every request.
    #[serde(default)]
    pub stateless_context: bool,

    /// Disables the `ask_user` tool; it returns a synthetic error instead.
    #[serde(default)]
    pub autonomous_mode: bool,

    #[serde(default)]
    pub knowledge: KnowledgeConfig,

    #[serde(default)]
    pub resolved_context: ResolvedContextConfig,

    #[serde(default)]
    pub wrap_up: WrapUpConfig,
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self {
            max_turns: DEFAULT_MAX_TURNS,
            max_context_messages: DEFAULT_MAX_CONTEXT_MESSAGES,
            max_tool_result_chars: DEFAULT_MAX_TOOL_RESULT_CHARS,
            keep_turns: DEFAULT_KEEP_TURNS,
            min_compaction_chars: DEFAULT_MIN_COMPACTION_CHARS,
            stateless_context: false,
            autonomous_mode: false,
            knowledge: KnowledgeConfig::default(),
            resolved_context: ResolvedContextConfig::default(),
            wrap_up: WrapUpConfig::default(),
        }
    }
}

/// Bounds for the `KnowledgeAccumulator` (spec §4.3).
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct KnowledgeConfig {
    #[serde(default = "default_ka_max_entries")]
    pub max_entries: usize,
    #[serde(default = "default_ka_max_chars")]
    pub max_chars: usize,
    #[serde(default = "default_ka_max_value_len")]
    pub max_value_len: usize,
}

fn default_ka_max_entries() -> usize {
    DEFAULT_KA_MAX_ENTRIES
}
fn default_ka_max_chars() -> usize {
    DEFAULT_KA_MAX_CHARS
}
fn default_ka_max_value_len() -> usize {
    DEFAULT_KA_MAX_VALUE_LEN
}

impl Default for KnowledgeConfig {
    fn default() -> Self {
        Self {
            max_entries: DEFAULT_KA_MAX_ENTRIES,
            max_chars: DEFAULT_KA_MAX_CHARS,
            max_value_len: DEFAULT_KA_MAX_VALUE_LEN,
        }
    }
}

/// Bounds for `ResolvedContext` eviction (spec §4.7).
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct ResolvedContextConfig {
    #[serde(default = "default_ttl_secs")]
    pub ttl_secs: u64,
    #[serde(default = "default_resolved_max_entries")]
    pub max_entries: usize,
    #[serde(default = "default_recent_access_window_secs")]
    pub recent_access_window_secs: u64,
}

fn default_ttl_secs() -> u64 {
    DEFAULT_RESOLVED_CONTEXT_TTL_SECS
}
fn default_resolved_max_entries() -> usize {
    DEFAULT_RESOLVED_CONTEXT_MAX_ENTRIES
}
fn default_recent_access_window_secs() -> u64 {
    DEFAULT_RECENT_ACCESS_WINDOW_SECS
}

impl Default for ResolvedContextConfig {
    fn default() -> Self {
        Self {
            ttl_secs: DEFAULT_RESOLVED_CONTEXT_TTL_SECS,
            max_entries: DEFAULT_RESOLVED_CONTEXT_MAX_ENTRIES,
            recent_access_window_secs: DEFAULT_RECENT_ACCESS_WINDOW_SECS,
        }
    }
}

/// Thresholds controlling the wrap-up / escalation nudges (spec §4.1).
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct WrapUpConfig {
    #[serde(default = "default_nudge_threshold")]
    pub nudge_threshold: usize,
    #[serde(default = "default_escalation_threshold")]
    pub escalation_threshold: usize,
    #[serde(default = "default_turns_remaining_gate")]
    pub turns_remaining_gate: usize,
}

fn default_nudge_threshold() -> usize {
    DEFAULT_WRAP_UP_NUDGE_THRESHOLD
}
fn default_escalation_threshold() -> usize {
    DEFAULT_WRAP_UP_ESCALATION_THRESHOLD
}
fn default_turns_remaining_gate() -> usize {
    DEFAULT_WRAP_UP_TURNS_REMAINING_GATE
}

impl Default for WrapUpConfig {
    fn default() -> Self {
        Self {
            nudge_threshold: DEFAULT_WRAP_UP_NUDGE_THRESHOLD,
            escalation_threshold: DEFAULT_WRAP_UP_ESCALATION_THRESHOLD,
            turns_remaining_gate: DEFAULT_WRAP_UP_TURNS_REMAINING_GATE,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec_values() {
        let cfg = LoopConfig::default();
        assert_eq!(cfg.max_turns, 20);
        assert_eq!(cfg.max_context_messages, 40);
        assert_eq!(cfg.max_tool_result_chars, 16_000);
        assert_eq!(cfg.keep_turns, 2);
        assert_eq!(cfg.min_compaction_chars, 500);
        assert!(!cfg.stateless_context);
        assert!(!cfg.autonomous_mode);

        assert_eq!(cfg.knowledge.max_entries, 60);
        assert_eq!(cfg.knowledge.max_chars, 2000);
        assert_eq!(cfg.knowledge.max_value_len, 200);

        assert_eq!(cfg.resolved_context.ttl_secs, 45 * 60);
        assert_eq!(cfg.resolved_context.max_entries, 500);
        assert_eq!(cfg.resolved_context.recent_access_window_secs, 30);

        assert_eq!(cfg.wrap_up.nudge_threshold, 13);
        assert_eq!(cfg.wrap_up.escalation_threshold, 18);
        assert_eq!(cfg.wrap_up.turns_remaining_gate, 7);
    }

    #[test]
    fn deserializes_partial_toml_with_defaults() {
        let toml_src = r#"
            max_turns = 5
        "#;
        let cfg: LoopConfig = toml::from_str(toml_src).expect("parse");
        assert_eq!(cfg.max_turns, 5);
        assert_eq!(cfg.max_context_messages, 40);
    }
}
