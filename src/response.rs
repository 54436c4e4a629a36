use std::collections::HashSet;

use lazy_static::lazy_static;
use regex::Regex;
use serde::Deserialize;
use serde_json::Value;

use crate::client::{Choice, Envelope};
use crate::errors::{Error, Result};

/// Pull the assistant's text out of a completion envelope.
///
/// The API does not guarantee choice order for multi-completion requests,
/// so choices are sorted by index before their fragments are joined.
pub fn assistant_output(envelope: &Envelope) -> String {
    let mut choices: Vec<&Choice> = envelope
        .choices
        .iter()
        .filter(|choice| choice_text(choice).map_or(false, |text| !text.is_empty()))
        .collect();
    choices.sort_by_key(|choice| choice.index.unwrap_or(0));
    choices
        .iter()
        .filter_map(|choice| choice_text(choice))
        .collect::<String>()
        .trim()
        .to_string()
}

fn choice_text(choice: &Choice) -> Option<&str> {
    if let Some(message) = &choice.message {
        if message.role.as_deref() == Some("assistant") {
            if let Some(content) = message.content.as_deref() {
                if !content.is_empty() {
                    return Some(content);
                }
            }
        }
    }
    choice.text.as_deref()
}

/// Parse the JSON object embedded in the model's output, tolerating
/// commentary before and after it, then strip null-ish leaves.
///
/// The span is the first `{` through the last `}`. This is deliberately
/// best-effort: prose containing brace characters can defeat it, and a
/// stricter parser would reject outputs this one accepts.
pub fn parse_embedded_json(output: &str) -> Result<Value> {
    let (start, end) = match (output.find('{'), output.rfind('}')) {
        (Some(start), Some(end)) if start < end => (start, end),
        _ => {
            return Err(Error::OutputParse {
                text: output.to_string(),
                cause: None,
            })
        }
    };

    match serde_json::from_str(&output[start..=end]) {
        Ok(value) => Ok(strip_null_leaves(value)),
        Err(cause) => Err(Error::OutputParse {
            text: output.to_string(),
            cause: Some(cause),
        }),
    }
}

/// Drop every object entry and array element whose value is neither a
/// boolean, a number, nor a non-empty string. Models emit literal `null`
/// placeholders for fields they chose to omit; consumers should only ever
/// see absence. Pure and idempotent.
pub fn strip_null_leaves(value: Value) -> Value {
    match value {
        Value::Object(map) => Value::Object(
            map.into_iter()
                .filter_map(|(key, entry)| {
                    let entry = strip_null_leaves(entry);
                    retained(&entry).then_some((key, entry))
                })
                .collect(),
        ),
        Value::Array(items) => Value::Array(
            items
                .into_iter()
                .map(strip_null_leaves)
                .filter(retained)
                .collect(),
        ),
        other => other,
    }
}

fn retained(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::String(text) => !text.is_empty(),
        _ => true,
    }
}

/// Legacy line-delimited answer format: `Answer:` and `Message-ID:` fields
/// at line starts, case-insensitive, values accumulating under the last
/// seen key. Unrecognized leading text is ignored.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DelimitedAnswer {
    pub answer: String,
    pub message_ids: Vec<String>,
}

#[derive(Debug, Clone, Copy)]
enum FieldKey {
    Answer,
    MessageId,
}

lazy_static! {
    static ref FIELD_DELIMITER: Regex = Regex::new(r"(?i)(^|\n)(answer:|message-id:)").unwrap();
}

pub fn parse_delimited(output: &str) -> DelimitedAnswer {
    let normalized = output.trim().replace("\r\n", "\n");

    let mut answers: Vec<String> = Vec::new();
    let mut ids: Vec<String> = Vec::new();
    let mut current: Option<FieldKey> = None;
    let mut cursor = 0usize;

    for captures in FIELD_DELIMITER.captures_iter(&normalized) {
        let whole = captures.get(0).unwrap();
        let key = captures.get(2).unwrap();
        push_segment(current, &normalized[cursor..whole.start()], &mut answers, &mut ids);
        current = if key.as_str().to_ascii_lowercase().starts_with("answer") {
            Some(FieldKey::Answer)
        } else {
            Some(FieldKey::MessageId)
        };
        cursor = whole.end();
    }
    push_segment(current, &normalized[cursor..], &mut answers, &mut ids);

    let mut seen = HashSet::new();
    DelimitedAnswer {
        answer: answers.join("\n"),
        message_ids: ids.into_iter().filter(|id| seen.insert(id.clone())).collect(),
    }
}

fn push_segment(key: Option<FieldKey>, segment: &str, answers: &mut Vec<String>, ids: &mut Vec<String>) {
    let segment = segment.trim();
    if segment.is_empty() {
        return;
    }
    match key {
        Some(FieldKey::Answer) => answers.push(segment.to_string()),
        Some(FieldKey::MessageId) => ids.extend(
            segment
                .split(',')
                .map(str::trim)
                .filter(|id| !id.is_empty())
                .map(str::to_string),
        ),
        None => {}
    }
}

pub(crate) const RISK_UNKNOWN: i64 = -1;

pub(crate) fn default_risk() -> i64 {
    RISK_UNKNOWN
}

/// Numeric coercion for the risk score: numbers and numeric strings pass
/// through, anything else becomes the -1 sentinel. Never an error.
pub(crate) fn coerce_risk(value: Option<&Value>) -> i64 {
    match value {
        Some(Value::Number(number)) => number
            .as_i64()
            .or_else(|| number.as_f64().map(|float| float as i64))
            .unwrap_or(RISK_UNKNOWN),
        Some(Value::String(text)) => {
            let text = text.trim();
            text.parse::<i64>()
                .ok()
                .or_else(|| text.parse::<f64>().ok().map(|float| float as i64))
                .unwrap_or(RISK_UNKNOWN)
        }
        _ => RISK_UNKNOWN,
    }
}

pub(crate) fn risk_score<'de, D>(deserializer: D) -> std::result::Result<i64, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(coerce_risk(value.as_ref()))
}

/// Accept both JSON booleans and the "true"/"false" strings models like
/// to produce for flag fields.
pub(crate) fn bool_or_string<'de, D>(deserializer: D) -> std::result::Result<Option<bool>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(value.as_ref().and_then(boolish))
}

fn boolish(value: &Value) -> Option<bool> {
    match value {
        Value::Bool(flag) => Some(*flag),
        Value::String(text) => match text.trim().to_ascii_lowercase().as_str() {
            "true" | "yes" => Some(true),
            "false" | "no" => Some(false),
            _ => None,
        },
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn envelope(value: Value) -> Envelope {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn test_choices_concatenate_in_index_order() {
        let envelope = envelope(json!({
            "choices": [
                {"index": 2, "message": {"role": "assistant", "content": "C"}},
                {"index": 0, "message": {"role": "assistant", "content": "A"}},
                {"index": 1, "message": {"role": "assistant", "content": "B"}}
            ]
        }));
        assert_eq!(assistant_output(&envelope), "ABC");
    }

    #[test]
    fn test_non_assistant_and_empty_choices_skipped() {
        let envelope = envelope(json!({
            "choices": [
                {"index": 0, "message": {"role": "user", "content": "ignored"}},
                {"index": 1, "message": {"role": "assistant", "content": ""}},
                {"index": 2, "message": {"role": "assistant", "content": "  kept  "}}
            ]
        }));
        assert_eq!(assistant_output(&envelope), "kept");
    }

    #[test]
    fn test_instruct_text_choices() {
        let envelope = envelope(json!({
            "choices": [
                {"index": 1, "text": " world"},
                {"index": 0, "text": "hello"}
            ]
        }));
        assert_eq!(assistant_output(&envelope), "hello world");
    }

    #[test]
    fn test_embedded_json_tolerates_commentary() {
        let output = "Sure, here you go:\n{\"risk\":3,\"assessment\":\"ok\"}\nThanks!";
        let value = parse_embedded_json(output).unwrap();
        assert_eq!(value, json!({"risk": 3, "assessment": "ok"}));
    }

    #[test]
    fn test_embedded_json_missing_braces() {
        let err = parse_embedded_json("no json here").unwrap_err();
        assert!(matches!(err, Error::OutputParse { cause: None, .. }));
    }

    #[test]
    fn test_embedded_json_reversed_braces() {
        let err = parse_embedded_json("} backwards {").unwrap_err();
        assert!(matches!(err, Error::OutputParse { .. }));
    }

    // Known limitation, preserved on purpose: braces inside the model's
    // prose shift the extraction span and the parse fails rather than
    // recovering the actual object.
    #[test]
    fn test_embedded_json_confused_by_braces_in_prose() {
        let output = "The set {a, b} was checked. {\"risk\": 2}";
        let err = parse_embedded_json(output).unwrap_err();
        assert!(matches!(err, Error::OutputParse { cause: Some(_), .. }));
    }

    #[test]
    fn test_strip_null_leaves() {
        let value = json!({
            "keep": "value",
            "flag": false,
            "zero": 0,
            "drop": null,
            "blank": "",
            "nested": {"inner": null, "count": 1},
            "list": [null, "x", "", {"gone": null}]
        });
        let stripped = strip_null_leaves(value);
        assert_eq!(
            stripped,
            json!({
                "keep": "value",
                "flag": false,
                "zero": 0,
                "nested": {"count": 1},
                "list": ["x", {}]
            })
        );
    }

    #[test]
    fn test_strip_null_leaves_idempotent() {
        let value = json!({
            "a": null,
            "b": {"c": "", "d": [null, 1]},
            "e": ["", {"f": null}]
        });
        let once = strip_null_leaves(value.clone());
        let twice = strip_null_leaves(once.clone());
        assert_eq!(once, twice);
    }

    #[test]
    fn test_delimited_answer_and_ids() {
        let parsed = parse_delimited("Answer: X\nMessage-ID: a, a, b");
        assert_eq!(parsed.answer, "X");
        assert_eq!(parsed.message_ids, vec!["a", "b"]);
    }

    #[test]
    fn test_delimited_case_insensitive_and_accumulating() {
        let parsed = parse_delimited("answer: first\nANSWER: second\nmessage-id: <x@y>");
        assert_eq!(parsed.answer, "first\nsecond");
        assert_eq!(parsed.message_ids, vec!["<x@y>"]);
    }

    #[test]
    fn test_delimited_ignores_leading_commentary() {
        let parsed = parse_delimited("Note: not a field\nAnswer: yes");
        assert_eq!(parsed.answer, "yes");
        assert!(parsed.message_ids.is_empty());
    }

    #[test]
    fn test_delimited_preserves_first_seen_order() {
        let parsed = parse_delimited("Answer: ok\nMessage-ID: b, a\nMessage-ID: a, c");
        assert_eq!(parsed.message_ids, vec!["b", "a", "c"]);
    }

    #[test]
    fn test_risk_coercion() {
        assert_eq!(coerce_risk(Some(&json!(4))), 4);
        assert_eq!(coerce_risk(Some(&json!("3"))), 3);
        assert_eq!(coerce_risk(Some(&json!(2.0))), 2);
        assert_eq!(coerce_risk(Some(&json!("not-a-number"))), -1);
        assert_eq!(coerce_risk(Some(&json!([1]))), -1);
        assert_eq!(coerce_risk(None), -1);
        // zero survives; the sentinel is for failed coercion only
        assert_eq!(coerce_risk(Some(&json!(0))), 0);
    }

    #[test]
    fn test_boolish_values() {
        assert_eq!(boolish(&json!(true)), Some(true));
        assert_eq!(boolish(&json!("false")), Some(false));
        assert_eq!(boolish(&json!("TRUE")), Some(true));
        assert_eq!(boolish(&json!("maybe")), None);
        assert_eq!(boolish(&json!(1)), None);
    }
}
