//! Parsing of the router model's output into a [`ToolDecision`].
//!
//! Models like to wrap their JSON in prose or code fences, so the object is
//! located with a small scanner before it is handed to `serde_json`. The
//! scanner only locates; it never repairs malformed JSON.

use serde_json::{Map, Value};

use crate::runtime::ToolArgs;

/// Sentinel tool name meaning "answer directly".
pub const NO_TOOL: &str = "none";

/// What the router model asked for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolDecision {
    pub tool_name: String,
    pub tool_args: ToolArgs,
    pub direct_response: Option<String>,
    /// False when the output could not be parsed and this decision is the
    /// raw-text fallback.
    pub valid_json: bool,
}

impl ToolDecision {
    pub fn is_direct(&self) -> bool {
        self.tool_name == NO_TOOL
    }

    fn fallback(reason: &str, raw: &str) -> Self {
        Self {
            tool_name: NO_TOOL.to_string(),
            tool_args: ToolArgs::new(),
            direct_response: Some(format!("[router output {reason}] {}", raw.trim())),
            valid_json: false,
        }
    }
}

/// Turns raw router output into a decision. Never fails: when no JSON
/// object with a string `tool_name` can be found, or a direct answer has no
/// text, the result is a direct-answer fallback carrying the raw text.
pub fn parse_decision(raw: &str) -> ToolDecision {
    let found = json_objects(raw).find_map(|object| {
        let tool_name = object.get("tool_name")?.as_str()?.trim().to_string();
        Some((tool_name, object))
    });
    let Some((tool_name, object)) = found else {
        return ToolDecision::fallback("was not valid JSON", raw);
    };

    let direct_response = object
        .get("response")
        .and_then(Value::as_str)
        .filter(|text| !text.trim().is_empty())
        .map(String::from);
    if tool_name == NO_TOOL && direct_response.is_none() {
        return ToolDecision::fallback("had no response text", raw);
    }

    let tool_args = match object.get("tool_args") {
        Some(Value::Object(map)) => flatten_args(map),
        // Some models emit the arguments as an encoded JSON string
        Some(Value::String(encoded)) => match serde_json::from_str::<Value>(encoded) {
            Ok(Value::Object(map)) => flatten_args(&map),
            _ => ToolArgs::new(),
        },
        _ => ToolArgs::new(),
    };

    ToolDecision {
        tool_name,
        tool_args,
        direct_response,
        valid_json: true,
    }
}

fn flatten_args(map: &Map<String, Value>) -> ToolArgs {
    map.iter()
        .filter_map(|(key, value)| {
            let value = match value {
                Value::Null => return None,
                Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            Some((key.clone(), value))
        })
        .collect()
}

/// Every balanced `{...}` span of `text` that parses as a JSON object, in
/// order of its opening brace. Braces inside JSON strings do not count, so
/// prose mentioning `{}` or a string containing `}` cannot cut an object
/// short. Text without braces yields nothing. Spans are scanned and parsed
/// on demand, so callers that stop early skip the rest of the text.
pub fn json_objects(text: &str) -> impl Iterator<Item = Map<String, Value>> + '_ {
    text.match_indices('{').filter_map(move |(start, _)| {
        let end = matching_brace(text.as_bytes(), start)?;
        match serde_json::from_str::<Value>(&text[start..=end]) {
            Ok(Value::Object(map)) => Some(map),
            _ => None,
        }
    })
}

fn matching_brace(bytes: &[u8], start: usize) -> Option<usize> {
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, &b) in bytes[start..].iter().enumerate() {
        if in_string {
            match b {
                _ if escaped => escaped = false,
                b'\\' => escaped = true,
                b'"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match b {
            b'"' => in_string = true,
            b'{' => depth += 1,
            b'}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(start + offset);
                }
            }
            _ => {}
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn direct_answer_is_verbatim() {
        let decision = parse_decision(r#"{"tool_name": "none", "response": "Hi there!"}"#);
        assert!(decision.is_direct());
        assert!(decision.valid_json);
        assert_eq!(decision.direct_response.as_deref(), Some("Hi there!"));
    }

    #[test]
    fn tool_call_with_arguments() {
        let decision = parse_decision(
            r#"{"tool_name": "call_llm_tool", "tool_args": {"model_name": "llama3", "prompt": "Write a haiku"}}"#,
        );
        assert_eq!(decision.tool_name, "call_llm_tool");
        assert_eq!(decision.tool_args["model_name"], "llama3");
        assert_eq!(decision.tool_args["prompt"], "Write a haiku");
        assert!(decision.direct_response.is_none());
    }

    #[test]
    fn json_wrapped_in_prose_and_fences() {
        let raw = "Sure! Here is my decision:\n```json\n{\"tool_name\": \"none\", \"response\": \"ok\"}\n```\nHope that helps.";
        let decision = parse_decision(raw);
        assert_eq!(decision.direct_response.as_deref(), Some("ok"));
    }

    #[test]
    fn braces_in_preceding_prose_are_skipped() {
        let raw = r#"An empty object looks like {} but the answer is {"tool_name": "none", "response": "fine"}"#;
        let decision = parse_decision(raw);
        assert!(decision.valid_json);
        assert_eq!(decision.direct_response.as_deref(), Some("fine"));
    }

    #[test]
    fn braces_inside_strings_do_not_close_the_object() {
        let raw = r#"{"tool_name": "none", "response": "use } and { freely"} trailing }"#;
        let decision = parse_decision(raw);
        assert_eq!(decision.direct_response.as_deref(), Some("use } and { freely"));
    }

    #[test]
    fn first_of_several_objects_wins() {
        let raw = r#"{"tool_name": "none", "response": "first"} {"tool_name": "none", "response": "second"}"#;
        assert_eq!(parse_decision(raw).direct_response.as_deref(), Some("first"));
    }

    #[test]
    fn nested_arguments_belong_to_the_outer_object() {
        let objects: Vec<_> =
            json_objects(r#"{"tool_name": "x", "tool_args": {"prompt": "p"}}"#).collect();
        assert_eq!(objects.len(), 2);
        assert_eq!(objects[0]["tool_name"], "x");
    }

    #[test]
    fn no_braces_falls_back_to_raw_text() {
        let decision = parse_decision("I think you want llama3");
        assert!(decision.is_direct());
        assert!(!decision.valid_json);
        let text = decision.direct_response.unwrap();
        assert!(text.contains("not valid JSON"));
        assert!(text.contains("I think you want llama3"));
    }

    #[test]
    fn malformed_json_falls_back() {
        let decision = parse_decision(r#"{"tool_name": "call_llm_tool", "tool_args": {"#);
        assert!(!decision.valid_json);
        assert!(decision.is_direct());
    }

    #[test]
    fn object_without_tool_name_falls_back() {
        let decision = parse_decision(r#"{"answer": "42"}"#);
        assert!(!decision.valid_json);
        assert!(decision.direct_response.unwrap().contains(r#"{"answer": "42"}"#));
    }

    #[test]
    fn non_string_arguments_are_stringified() {
        let decision = parse_decision(
            r#"{"tool_name": "call_llm_tool", "tool_args": {"model_name": "llama3", "prompt": 7, "note": null}}"#,
        );
        assert_eq!(decision.tool_args["prompt"], "7");
        assert!(!decision.tool_args.contains_key("note"));
    }

    #[test]
    fn string_encoded_arguments_are_decoded() {
        let decision = parse_decision(
            r#"{"tool_name": "call_llm_tool", "tool_args": "{\"model_name\": \"llama3\", \"prompt\": \"hi\"}"}"#,
        );
        assert_eq!(decision.tool_args["model_name"], "llama3");
    }

    #[test]
    fn unclosed_outer_brace_still_finds_inner_object() {
        let raw = r#"{ note: {"tool_name": "none", "response": "x"}"#;
        let decision = parse_decision(raw);
        assert!(decision.valid_json);
        assert_eq!(decision.direct_response.as_deref(), Some("x"));
    }

    #[test]
    fn direct_answer_without_text_falls_back() {
        for raw in [
            r#"{"tool_name": "none"}"#,
            r#"{"tool_name": "none", "response": 42}"#,
            r#"{"tool_name": "none", "response": "  "}"#,
        ] {
            let decision = parse_decision(raw);
            assert!(decision.is_direct(), "{raw}");
            assert!(!decision.valid_json, "{raw}");
            let text = decision.direct_response.unwrap();
            assert!(text.contains("no response text"), "{text}");
            assert!(text.contains(raw), "{text}");
        }
    }

    #[test]
    fn scanning_stops_at_the_first_decision() {
        let noisy = format!(
            r#"{{"tool_name": "none", "response": "early"}}{}"#,
            "{".repeat(200_000)
        );
        assert_eq!(json_objects(&noisy).next().unwrap()["response"], "early");
        assert_eq!(parse_decision(&noisy).direct_response.as_deref(), Some("early"));
    }
}
