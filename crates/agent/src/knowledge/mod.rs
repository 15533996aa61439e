//! The knowledge accumulator (spec §4.3): a bounded, per-session store of
//! facts extracted from tool results, rendered into the system prompt so
//! the model can see what it already knows instead of re-querying it.

pub mod extractor;

use crate::config::KnowledgeConfig;
use parking_lot::Mutex;
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum FactCategory {
    Resource,
    Storage,
    Discovery,
    Exec,
    Metrics,
    Finding,
    Alert,
}

impl FactCategory {
    /// Fixed rendering order (spec §4.3 `Render`).
    const ORDER: [FactCategory; 7] = [
        FactCategory::Resource,
        FactCategory::Storage,
        FactCategory::Discovery,
        FactCategory::Exec,
        FactCategory::Metrics,
        FactCategory::Finding,
        FactCategory::Alert,
    ];

    fn label(self) -> &'static str {
        match self {
            FactCategory::Resource => "Resources",
            FactCategory::Storage => "Storage",
            FactCategory::Discovery => "Discovery",
            FactCategory::Exec => "Exec",
            FactCategory::Metrics => "Metrics",
            FactCategory::Finding => "Findings",
            FactCategory::Alert => "Alerts",
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

#[derive(Debug, Clone)]
struct FactEntry {
    category: FactCategory,
    value: String,
    observed_at: i64,
    turn: usize,
    tool_use_id: Option<String>,
    seq: u64,
}

struct Inner {
    facts: HashMap<String, FactEntry>,
    /// Monotonic counter used to break eviction ties in insertion order,
    /// since a `HashMap` doesn't preserve one.
    next_seq: u64,
    current_turn: usize,
    total_chars: usize,
}

/// Per-session bounded fact store (spec §4.3). Thread-safe: every method
/// takes `&self` and locks internally; no caller ever sees the raw map.
pub struct KnowledgeAccumulator {
    config: KnowledgeConfig,
    inner: Mutex<Inner>,
}

impl KnowledgeAccumulator {
    pub fn new(config: KnowledgeConfig) -> Self {
        Self {
            config,
            inner: Mutex::new(Inner {
                facts: HashMap::new(),
                next_seq: 0,
                current_turn: 0,
                total_chars: 0,
            }),
        }
    }

    pub fn begin_turn(&self, turn: usize) {
        self.inner.lock().current_turn = turn;
    }

    /// Upsert a fact. `value` longer than `max_value_len` is truncated.
    /// Idempotent: calling this twice with the same `(key, value)` leaves
    /// the store in the same state as calling it once (only `observed_at`
    /// moves).
    pub fn add_fact(
        &self,
        category: FactCategory,
        key: impl Into<String>,
        value: impl Into<String>,
        observed_at: i64,
        tool_use_id: Option<String>,
    ) {
        let key = key.into();
        let mut value = value.into();
        if value.len() > self.config.max_value_len {
            value.truncate(floor_char_boundary(&value, self.config.max_value_len));
        }

        let mut inner = self.inner.lock();
        let turn = inner.current_turn;
        let seq = inner.next_seq;
        inner.next_seq += 1;

        let value_len = value.len();
        match inner.facts.get(&key) {
            Some(existing) if existing.value == value => {
                // Idempotent upsert: same value, just refresh recency/turn.
                let entry = inner.facts.get_mut(&key).unwrap();
                entry.observed_at = observed_at;
                entry.turn = turn;
                entry.tool_use_id = tool_use_id.or_else(|| entry.tool_use_id.clone());
            }
            Some(existing) => {
                let old_len = existing.value.len();
                inner.total_chars = inner.total_chars + value_len - old_len;
                inner.facts.insert(
                    key,
                    FactEntry {
                        category,
                        value,
                        observed_at,
                        turn,
                        tool_use_id,
                        seq,
                    },
                );
            }
            None => {
                inner.total_chars += value_len;
                inner.facts.insert(
                    key,
                    FactEntry {
                        category,
                        value,
                        observed_at,
                        turn,
                        tool_use_id,
                        seq,
                    },
                );
            }
        }

        self.evict_if_over_caps(&mut inner);
    }

    fn evict_if_over_caps(&self, inner: &mut Inner) {
        loop {
            let over_entries = inner.facts.len() > self.config.max_entries;
            let over_chars = inner.total_chars > self.config.max_chars;
            if !over_entries && !over_chars {
                return;
            }

            let pin_floor = inner.current_turn.saturating_sub(1);
            let victim = inner
                .facts
                .iter()
                .filter(|(_, entry)| entry.turn < pin_floor)
                .min_by_key(|(_, entry)| entry.seq)
                .map(|(key, _)| key.clone());

            match victim {
                Some(key) => {
                    if let Some(entry) = inner.facts.remove(&key) {
                        inner.total_chars -= entry.value.len();
                    }
                }
                // Nothing left that's safe to evict (everything is pinned
                // to the current or previous turn) — stop even if over cap.
                None => return,
            }
        }
    }

    pub fn len(&self) -> usize {
        self.inner.lock().facts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn total_chars(&self) -> usize {
        self.inner.lock().total_chars
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.inner.lock().facts.contains_key(key)
    }

    pub fn value(&self, key: &str) -> Option<String> {
        self.inner.lock().facts.get(key).map(|e| e.value.clone())
    }

    /// Render all facts grouped by category in the fixed spec order.
    /// Empty string when there are no facts.
    pub fn render(&self) -> String {
        let inner = self.inner.lock();
        if inner.facts.is_empty() {
            return String::new();
        }

        let mut by_category: HashMap<FactCategory, Vec<&FactEntry>> = HashMap::new();
        for entry in inner.facts.values() {
            by_category.entry(entry.category).or_default().push(entry);
        }

        let mut out = String::from(
            "## Known Facts (auto-collected — do NOT re-query unless user asks for fresh data)\n",
        );
        for category in FactCategory::ORDER {
            let Some(mut entries) = by_category.remove(&category) else {
                continue;
            };
            entries.sort_by_key(|e| e.seq);
            out.push_str(category.label());
            out.push_str(":\n");
            for entry in entries {
                out.push_str("- ");
                out.push_str(&entry.value);
                out.push('\n');
            }
        }
        out
    }

    /// Short comma-joined summary of facts attributed to `tool_use_id`, for
    /// `compactOldToolResults` to cite instead of the raw tool output.
    pub fn fact_summary_for_tool(&self, tool_use_id: &str) -> Option<String> {
        let inner = self.inner.lock();
        let mut values: Vec<&str> = inner
            .facts
            .values()
            .filter(|e| e.tool_use_id.as_deref() == Some(tool_use_id))
            .map(|e| e.value.as_str())
            .collect();
        if values.is_empty() {
            return None;
        }
        values.sort_unstable();
        Some(values.join(", "))
    }
}
