//! The `ask_user` tool's wire schema and payload validation (spec §6, bit-exact).
//!
//! Parsing is deliberately defensive and hand-rolled against `serde_json::Value`
//! rather than derived: the schema's defaulting rules (missing `type` inferred
//! from whether `options` is present, missing `option.value` defaulting to its
//! label) don't fall out of a plain `#[derive(Deserialize)]`.

use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuestionType {
    Text,
    Select,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuestionOption {
    pub label: String,
    pub value: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Question {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: QuestionType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub header: Option<String>,
    pub question: String,
    #[serde(default)]
    pub options: Vec<QuestionOption>,
}

/// The `{question_id, answers: [{id, value}]}` payload a client sends back
/// through the pending-question channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuestionAnswer {
    pub question_id: String,
    pub answers: Vec<AnswerItem>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnswerItem {
    pub id: String,
    pub value: String,
}

/// Validate and normalize a raw `ask_user` tool-call input into the schema
/// above. Every rejection message is the literal reason surfaced in the
/// synthetic error tool result (spec §7 item 7).
pub fn validate_and_normalize(input: &Value) -> Result<Vec<Question>, String> {
    let questions_value = input
        .as_object()
        .and_then(|obj| obj.get("questions"))
        .ok_or_else(|| "questions is required and must be a non-empty array".to_string())?;

    let raw_questions = questions_value
        .as_array()
        .ok_or_else(|| "questions is required and must be a non-empty array".to_string())?;

    if raw_questions.is_empty() {
        return Err("questions is required and must be a non-empty array".to_string());
    }

    let mut out = Vec::with_capacity(raw_questions.len());
    for (idx, raw) in raw_questions.iter().enumerate() {
        out.push(validate_one(idx, raw)?);
    }
    Ok(out)
}

fn validate_one(idx: usize, raw: &Value) -> Result<Question, String> {
    let obj = raw
        .as_object()
        .ok_or_else(|| format!("questions[{idx}] must be an object"))?;

    let id = obj
        .get("id")
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| format!("questions[{idx}].id is required"))?
        .to_string();

    let question = obj
        .get("question")
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| format!("questions[{idx}].question is required"))?
        .to_string();

    let header = obj
        .get("header")
        .and_then(Value::as_str)
        .map(str::to_string);

    let options = match obj.get("options") {
        None => Vec::new(),
        Some(Value::Null) => {
            return Err(format!("questions[{idx}].options must be an array"));
        }
        Some(v) => {
            let arr = v
                .as_array()
                .ok_or_else(|| format!("questions[{idx}].options must be an array"))?;
            let mut opts = Vec::with_capacity(arr.len());
            for (oidx, raw_opt) in arr.iter().enumerate() {
                opts.push(validate_option(idx, oidx, raw_opt)?);
            }
            opts
        }
    };

    let kind = match obj.get("type").and_then(Value::as_str) {
        Some(raw_kind) => match raw_kind.to_ascii_lowercase().as_str() {
            "text" => QuestionType::Text,
            "select" => QuestionType::Select,
            other => {
                return Err(format!(
                    "questions[{idx}].type must be 'text' or 'select', got '{other}'"
                ));
            }
        },
        None if !options.is_empty() => QuestionType::Select,
        None => QuestionType::Text,
    };

    if matches!(kind, QuestionType::Select) && options.is_empty() {
        return Err(format!(
            "questions[{idx}] of type 'select' requires at least one option"
        ));
    }

    Ok(Question {
        id,
        kind,
        header,
        question,
        options,
    })
}

fn validate_option(idx: usize, oidx: usize, raw: &Value) -> Result<QuestionOption, String> {
    let obj = raw
        .as_object()
        .ok_or_else(|| format!("questions[{idx}].options[{oidx}] must be an object"))?;

    let label = obj
        .get("label")
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| format!("questions[{idx}].options[{oidx}].label is required"))?
        .to_string();

    let value = obj
        .get("value")
        .and_then(Value::as_str)
        .map(str::to_string)
        .unwrap_or_else(|| label.clone());

    let description = obj
        .get("description")
        .and_then(Value::as_str)
        .map(str::to_string);

    Ok(QuestionOption {
        label,
        value,
        description,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn rejects_missing_questions() {
        let err = validate_and_normalize(&json!({})).unwrap_err();
        assert!(err.contains("questions is required"));
    }

    #[test]
    fn rejects_empty_questions_array() {
        let err = validate_and_normalize(&json!({"questions": []})).unwrap_err();
        assert!(err.contains("non-empty array"));
    }

    #[test]
    fn rejects_non_object_entry() {
        let err = validate_and_normalize(&json!({"questions": ["oops"]})).unwrap_err();
        assert!(err.contains("must be an object"));
    }

    #[test]
    fn rejects_missing_id_and_question() {
        let err = validate_and_normalize(&json!({"questions": [{"question": "q"}]})).unwrap_err();
        assert!(err.contains(".id is required"));

        let err = validate_and_normalize(&json!({"questions": [{"id": "a"}]})).unwrap_err();
        assert!(err.contains(".question is required"));
    }

    #[test]
    fn defaults_type_from_options_presence() {
        let questions = validate_and_normalize(&json!({
            "questions": [
                {"id": "a", "question": "pick one", "options": [{"label": "yes"}]}
            ]
        }))
        .unwrap();
        assert_eq!(questions[0].kind, QuestionType::Select);
        assert_eq!(questions[0].options[0].value, "yes");

        let questions = validate_and_normalize(&json!({
            "questions": [{"id": "a", "question": "say something"}]
        }))
        .unwrap();
        assert_eq!(questions[0].kind, QuestionType::Text);
    }

    #[test]
    fn rejects_invalid_type_after_case_normalization() {
        let err = validate_and_normalize(&json!({
            "questions": [{"id": "a", "question": "q", "type": "MULTI"}]
        }))
        .unwrap_err();
        assert!(err.contains("must be 'text' or 'select'"));
    }

    #[test]
    fn accepts_case_insensitive_type() {
        let questions = validate_and_normalize(&json!({
            "questions": [{"id": "a", "question": "q", "type": "SELECT", "options": [{"label": "x"}]}]
        }))
        .unwrap();
        assert_eq!(questions[0].kind, QuestionType::Select);
    }

    #[test]
    fn rejects_select_with_no_options() {
        let err = validate_and_normalize(&json!({
            "questions": [{"id": "a", "question": "q", "type": "select"}]
        }))
        .unwrap_err();
        assert!(err.contains("requires at least one option"));
    }

    #[test]
    fn rejects_null_or_non_array_options() {
        let err = validate_and_normalize(&json!({
            "questions": [{"id": "a", "question": "q", "options": null}]
        }))
        .unwrap_err();
        assert!(err.contains("options must be an array"));

        let err = validate_and_normalize(&json!({
            "questions": [{"id": "a", "question": "q", "options": "nope"}]
        }))
        .unwrap_err();
        assert!(err.contains("options must be an array"));
    }

    #[test]
    fn rejects_empty_option_label() {
        let err = validate_and_normalize(&json!({
            "questions": [{"id": "a", "question": "q", "options": [{"label": ""}]}]
        }))
        .unwrap_err();
        assert!(err.contains(".label is required"));
    }

    #[test]
    fn option_value_defaults_to_label() {
        let questions = validate_and_normalize(&json!({
            "questions": [{"id": "a", "question": "q", "options": [{"label": "Yes"}]}]
        }))
        .unwrap();
        assert_eq!(questions[0].options[0].value, "Yes");
    }
}
