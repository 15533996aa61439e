//! `FactExtractor` / `PredictFactKeys` (spec §4.4): turns a tool result into
//! zero or more facts, and predicts the keys a call *would* produce without
//! actually running it. The two must derive keys with the exact same
//! helpers — that's what keeps `GateLayer` honest.

use super::FactCategory;
use pulse_agent_core::ToolCall;
use serde_json::Value;

pub struct ExtractedFact {
    pub category: FactCategory,
    pub key: String,
    pub value: String,
}

impl ExtractedFact {
    fn new(category: FactCategory, key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            category,
            key: key.into(),
            value: value.into(),
        }
    }
}

/// Read a top-level string field out of a raw JSON input the same way
/// `ToolCall::input_str` does, for call sites that only have the bare
/// `Value` (predicting keys before a `ToolCall` exists).
fn input_str<'a>(input: &'a Value, key: &str) -> Option<&'a str> {
    input.as_object()?.get(key)?.as_str()
}

fn result_str<'a>(result: &'a Value, key: &str) -> Option<&'a str> {
    input_str(result, key)
}

fn resource_id_of(input: &Value) -> String {
    input_str(input, "resource_id")
        .or_else(|| input_str(input, "id"))
        .unwrap_or("")
        .to_string()
}

/// Shared helper for `pulse_read` / `pulse_run_command` key derivation —
/// the one place both `extract_facts` and `predict_fact_keys` compute the
/// exec key's suffix, so they can never drift apart (spec §4.4, §9).
fn exec_cmd_prefix(input: &Value) -> String {
    if let Some(command) = input_str(input, "command") {
        let mut prefix: String = command.chars().take(60).collect();
        if command.chars().count() > 60 {
            prefix.push('…');
        }
        return prefix;
    }
    if let Some(action) = input_str(input, "action") {
        let path = input_str(input, "path").unwrap_or("");
        return format!("{action}:{path}");
    }
    format!(
        "logs:since={}:grep={}:source={}:unit={}",
        input_str(input, "since").unwrap_or(""),
        input_str(input, "grep").unwrap_or(""),
        input_str(input, "source").unwrap_or(""),
        input_str(input, "unit").unwrap_or(""),
    )
}

fn exec_host(input: &Value) -> String {
    input_str(input, "host")
        .or_else(|| input_str(input, "node"))
        .unwrap_or("")
        .to_string()
}

/// Keys a call to `(name, input)` *would* produce, without running it.
/// Every key here must also be producible by `extract_facts` on a
/// successful result (spec §8 "Key stability").
pub fn predict_fact_keys(name: &str, input: &Value) -> Vec<String> {
    match name {
        "pulse_query" => match input_str(input, "action") {
            Some("get") => {
                let resource_id = resource_id_of(input);
                let kind = input_str(input, "kind").unwrap_or("");
                let node = input_str(input, "node").unwrap_or("");
                let id = input_str(input, "id").unwrap_or("");
                vec![
                    format!("{kind}:{node}:{id}:status"),
                    format!("query:get:{resource_id}:cached"),
                ]
            }
            Some("search") => {
                let query = input_str(input, "query").unwrap_or("");
                vec![format!("search:{query}:summary")]
            }
            Some("topology") => vec!["topology:summary".to_string()],
            Some("health") => vec!["health:connections".to_string()],
            Some("list") => vec!["resources:list:summary".to_string()],
            Some("config") => {
                let resource_id = resource_id_of(input);
                let node = input_str(input, "node").unwrap_or("");
                let id = input_str(input, "id").unwrap_or("");
                vec![
                    format!("config:{node}:{id}"),
                    format!("config:{resource_id}:cached"),
                ]
            }
            _ => Vec::new(),
        },
        "pulse_storage" => {
            let scope = input_str(input, "node")
                .or_else(|| input_str(input, "nodes"))
                .unwrap_or("");
            let pool = input_str(input, "pool").unwrap_or("");
            vec![
                format!("storage:{scope}:{pool}"),
                format!("storage:{scope}:queried"),
            ]
        }
        "pulse_discovery" => {
            let host = input_str(input, "host").unwrap_or("");
            let resource_id = resource_id_of(input);
            vec![format!("discovery:{host}:{resource_id}")]
        }
        "pulse_read" | "pulse_run_command" => {
            vec![format!("exec:{}:{}", exec_host(input), exec_cmd_prefix(input))]
        }
        "pulse_metrics" => match input_str(input, "action") {
            Some("performance") => vec![format!("metrics:{}", resource_id_of(input))],
            Some("baselines") => {
                let node = input_str(input, "node").unwrap_or("");
                vec!["baselines:queried".to_string(), format!("baseline:{node}")]
            }
            Some("disks") => {
                let host = input_str(input, "host").unwrap_or("");
                vec!["metrics:disks:queried".to_string(), format!("metrics:disks:{host}")]
            }
            Some("temperatures") => {
                let host = input_str(input, "host").unwrap_or("");
                vec![
                    "metrics:temperatures:queried".to_string(),
                    format!("metrics:temperatures:{host}"),
                ]
            }
            _ => Vec::new(),
        },
        "pulse_alerts" => match input_str(input, "action") {
            Some("findings") => vec!["findings:queried".to_string()],
            _ => vec!["alerts:queried".to_string()],
        },
        "pulse_docker" => vec!["docker:queried".to_string()],
        "pulse_kubernetes" => vec!["kubernetes:queried".to_string()],
        "pulse_pmg" => vec!["pmg:queried".to_string()],
        _ => Vec::new(),
    }
}

/// Bounded: only the first `limit` per-item facts of a list-shaped result
/// are extracted (spec §4.4 "Per-item facts are bounded").
const MAX_ITEMS: usize = 5;

/// Extract facts from one tool's result. Returns nothing for error results —
/// callers skip fact extraction entirely for `is_error` tool results (spec
/// §7 item 4) except for the one documented negative-caching case below,
/// which `extract_facts` handles itself since `pulse_query get` can carry
/// an `error` field in an otherwise-successful envelope.
pub fn extract_facts(call: &ToolCall, result_text: &str, is_error: bool) -> Vec<ExtractedFact> {
    if is_error {
        return Vec::new();
    }

    let result: Value = serde_json::from_str(result_text).unwrap_or(Value::Null);
    let name = call.name.as_str();
    let input = &call.input;

    match name {
        "pulse_query" => extract_pulse_query(input, &result),
        "pulse_storage" => extract_pulse_storage(input, &result),
        "pulse_discovery" => extract_pulse_discovery(input, &result),
        "pulse_read" | "pulse_run_command" => extract_exec(input, &result),
        "pulse_metrics" => extract_pulse_metrics(input, &result),
        "pulse_alerts" => extract_pulse_alerts(input, &result),
        "pulse_docker" => extract_marker_and_items(&result, "docker:queried", FactCategory::Discovery, "docker"),
        "pulse_kubernetes" => {
            extract_marker_and_items(&result, "kubernetes:queried", FactCategory::Discovery, "kubernetes")
        }
        "pulse_pmg" => extract_marker_and_items(&result, "pmg:queried", FactCategory::Discovery, "pmg"),
        _ => Vec::new(),
    }
}

fn extract_pulse_query(input: &Value, result: &Value) -> Vec<ExtractedFact> {
    match input_str(input, "action") {
        Some("get") => {
            let resource_id = resource_id_of(input);
            let kind = input_str(input, "kind").unwrap_or("");
            let node = input_str(input, "node").unwrap_or("");
            let id = input_str(input, "id").unwrap_or("");

            let mut facts = vec![ExtractedFact::new(
                FactCategory::Resource,
                format!("query:get:{resource_id}:cached"),
                "queried",
            )];

            if let Some(err) = result_str(result, "error") {
                // Negative caching: remember that this resource is known-missing.
                facts.push(ExtractedFact::new(
                    FactCategory::Resource,
                    format!("query:get:{resource_id}:error"),
                    err,
                ));
            } else {
                let status = result_str(result, "status").unwrap_or("unknown");
                facts.push(ExtractedFact::new(
                    FactCategory::Resource,
                    format!("{kind}:{node}:{id}:status"),
                    status,
                ));
            }
            facts
        }
        Some("search") => {
            let query = input_str(input, "query").unwrap_or("");
            let summary = result_str(result, "summary").unwrap_or("no results");
            vec![ExtractedFact::new(
                FactCategory::Discovery,
                format!("search:{query}:summary"),
                summary,
            )]
        }
        Some("topology") => vec![ExtractedFact::new(
            FactCategory::Discovery,
            "topology:summary",
            result_str(result, "summary").unwrap_or("queried"),
        )],
        Some("health") => vec![ExtractedFact::new(
            FactCategory::Discovery,
            "health:connections",
            result_str(result, "summary").unwrap_or("queried"),
        )],
        Some("list") => vec![ExtractedFact::new(
            FactCategory::Discovery,
            "resources:list:summary",
            result_str(result, "summary").unwrap_or("queried"),
        )],
        Some("config") => {
            let resource_id = resource_id_of(input);
            let node = input_str(input, "node").unwrap_or("");
            let id = input_str(input, "id").unwrap_or("");
            vec![
                ExtractedFact::new(
                    FactCategory::Resource,
                    format!("config:{node}:{id}"),
                    result_str(result, "summary").unwrap_or("queried"),
                ),
                ExtractedFact::new(
                    FactCategory::Resource,
                    format!("config:{resource_id}:cached"),
                    "queried",
                ),
            ]
        }
        _ => Vec::new(),
    }
}

fn extract_pulse_storage(input: &Value, result: &Value) -> Vec<ExtractedFact> {
    let scope = input_str(input, "node")
        .or_else(|| input_str(input, "nodes"))
        .unwrap_or("");
    let pool = input_str(input, "pool").unwrap_or("");
    vec![
        ExtractedFact::new(
            FactCategory::Storage,
            format!("storage:{scope}:{pool}"),
            result_str(result, "summary").unwrap_or("queried"),
        ),
        ExtractedFact::new(FactCategory::Storage, format!("storage:{scope}:queried"), "queried"),
    ]
}

fn extract_pulse_discovery(input: &Value, result: &Value) -> Vec<ExtractedFact> {
    let host = input_str(input, "host").unwrap_or("");
    let resource_id = resource_id_of(input);
    vec![ExtractedFact::new(
        FactCategory::Discovery,
        format!("discovery:{host}:{resource_id}"),
        result_str(result, "summary").unwrap_or("queried"),
    )]
}

fn extract_exec(input: &Value, result: &Value) -> Vec<ExtractedFact> {
    let host = exec_host(input);
    let prefix = exec_cmd_prefix(input);
    vec![ExtractedFact::new(
        FactCategory::Exec,
        format!("exec:{host}:{prefix}"),
        result_str(result, "summary").unwrap_or("executed"),
    )]
}

fn extract_pulse_metrics(input: &Value, result: &Value) -> Vec<ExtractedFact> {
    match input_str(input, "action") {
        Some("performance") => vec![ExtractedFact::new(
            FactCategory::Metrics,
            format!("metrics:{}", resource_id_of(input)),
            result_str(result, "summary").unwrap_or("queried"),
        )],
        Some("baselines") => {
            let node = input_str(input, "node").unwrap_or("");
            vec![
                ExtractedFact::new(FactCategory::Metrics, "baselines:queried", "queried"),
                ExtractedFact::new(
                    FactCategory::Metrics,
                    format!("baseline:{node}"),
                    result_str(result, "summary").unwrap_or("queried"),
                ),
            ]
        }
        Some("disks") => {
            let host = input_str(input, "host").unwrap_or("");
            vec![
                ExtractedFact::new(FactCategory::Metrics, "metrics:disks:queried", "queried"),
                ExtractedFact::new(
                    FactCategory::Metrics,
                    format!("metrics:disks:{host}"),
                    result_str(result, "summary").unwrap_or("queried"),
                ),
            ]
        }
        Some("temperatures") => {
            let host = input_str(input, "host").unwrap_or("");
            vec![
                ExtractedFact::new(FactCategory::Metrics, "metrics:temperatures:queried", "queried"),
                ExtractedFact::new(
                    FactCategory::Metrics,
                    format!("metrics:temperatures:{host}"),
                    result_str(result, "summary").unwrap_or("queried"),
                ),
            ]
        }
        _ => Vec::new(),
    }
}

fn extract_pulse_alerts(input: &Value, result: &Value) -> Vec<ExtractedFact> {
    let findings = matches!(input_str(input, "action"), Some("findings"));
    let (marker_key, category, item_field) = if findings {
        ("findings:queried", FactCategory::Finding, "findings")
    } else {
        ("alerts:queried", FactCategory::Alert, "alerts")
    };

    let mut facts = vec![ExtractedFact::new(category, marker_key, "queried")];
    if let Some(items) = result.as_object().and_then(|o| o.get(item_field)).and_then(Value::as_array) {
        for (idx, item) in items.iter().take(MAX_ITEMS).enumerate() {
            let summary = item
                .as_object()
                .and_then(|o| o.get("summary"))
                .and_then(Value::as_str)
                .unwrap_or("(no summary)");
            facts.push(ExtractedFact::new(
                category,
                format!("{marker_key}:item:{idx}"),
                summary,
            ));
        }
    }
    facts
}

fn extract_marker_and_items(
    result: &Value,
    marker_key: &str,
    category: FactCategory,
    item_field: &str,
) -> Vec<ExtractedFact> {
    let mut facts = vec![ExtractedFact::new(category, marker_key, "queried")];
    if let Some(items) = result.as_object().and_then(|o| o.get(item_field)).and_then(Value::as_array) {
        for (idx, item) in items.iter().take(MAX_ITEMS).enumerate() {
            let summary = item
                .as_object()
                .and_then(|o| o.get("summary"))
                .and_then(Value::as_str)
                .unwrap_or("(no summary)");
            facts.push(ExtractedFact::new(category, format!("{marker_key}:item:{idx}"), summary));
        }
    }
    facts
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn call(name: &str, input: Value) -> ToolCall {
        ToolCall::new("t1", name, input)
    }

    #[test]
    fn key_stability_for_pulse_query_get() {
        let input = json!({"action": "get", "kind": "vm", "node": "pve1", "id": "100", "resource_id": "vm:pve1:100"});
        let predicted = predict_fact_keys("pulse_query", &input);

        let result = json!({"status": "running"}).to_string();
        let extracted = extract_facts(&call("pulse_query", input), &result, false);
        let extracted_keys: Vec<&str> = extracted.iter().map(|f| f.key.as_str()).collect();

        for key in &predicted {
            assert!(
                extracted_keys.contains(&key.as_str()),
                "predicted key {key} missing from extracted {extracted_keys:?}"
            );
        }
    }

    #[test]
    fn key_stability_for_exec_with_command() {
        let input = json!({"host": "pve1", "command": "df -h"});
        let predicted = predict_fact_keys("pulse_run_command", &input);
        let result = json!({"summary": "disk usage ok"}).to_string();
        let extracted = extract_facts(&call("pulse_run_command", input), &result, false);
        assert_eq!(predicted.len(), 1);
        assert_eq!(extracted[0].key, predicted[0]);
    }

    #[test]
    fn exec_command_prefix_truncates_at_60_chars() {
        let long_command = "a".repeat(100);
        let input = json!({"host": "pve1", "command": long_command});
        let prefix = exec_cmd_prefix(&input);
        assert_eq!(prefix.chars().count(), 61); // 60 chars + the ellipsis marker
    }

    #[test]
    fn negative_caching_on_error_field() {
        let input = json!({"action": "get", "kind": "vm", "node": "pve1", "id": "999", "resource_id": "vm:pve1:999"});
        let result = json!({"error": "not found"}).to_string();
        let extracted = extract_facts(&call("pulse_query", input), &result, false);
        assert!(extracted.iter().any(|f| f.key == "query:get:vm:pve1:999:error"));
    }

    #[test]
    fn error_results_never_extracted() {
        let input = json!({"action": "get"});
        let extracted = extract_facts(&call("pulse_query", input), "irrelevant", true);
        assert!(extracted.is_empty());
    }

    #[test]
    fn alerts_bounded_to_five_items() {
        let items: Vec<Value> = (0..10).map(|i| json!({"summary": format!("alert {i}")})).collect();
        let result = json!({"alerts": items}).to_string();
        let input = json!({});
        let extracted = extract_facts(&call("pulse_alerts", input), &result, false);
        // 1 marker + at most 5 per-item facts
        assert_eq!(extracted.len(), 1 + 5);
    }

    #[test]
    fn marker_fact_emitted_even_when_result_empty() {
        let extracted = extract_facts(&call("pulse_alerts", json!({})), "{}", false);
        assert_eq!(extracted.len(), 1);
        assert_eq!(extracted[0].key, "alerts:queried");
    }
}
