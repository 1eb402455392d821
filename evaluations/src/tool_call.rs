//! Detection and parsing of tool calls embedded in assistant turns.
//!
//! A turn is a tool call iff it contains [`TOOL_CALL_OPEN`]. Whether the
//! payload between the delimiters actually parses is a separate question:
//! a call-shaped turn with a broken payload is still a call, just an
//! unusable one.

use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::debug;

pub const TOOL_CALL_OPEN: &str = "<tool_call>";
pub const TOOL_CALL_CLOSE: &str = "</tool_call>";

lazy_static! {
    static ref TOOL_CALL_PATTERN: Regex = {
        #[expect(clippy::expect_used)]
        Regex::new(r"(?s)<tool_call>(.*?)</tool_call>").expect("Failed to compile TOOL_CALL_PATTERN")
    };
}

/// A parsed `{"name": ..., "arguments": {...}}` payload.
///
/// Argument order follows the payload text.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ToolCallPayload {
    pub name: String,
    #[serde(default)]
    pub arguments: Map<String, Value>,
}

impl ToolCallPayload {
    /// Looks up an argument, distinguishing an absent key from an explicit `null`.
    pub fn argument(&self, key: &str) -> Option<&Value> {
        self.arguments.get(key)
    }

    /// Renders the payload as an assistant turn wrapped in tool call delimiters.
    pub fn to_turn_text(&self) -> String {
        let payload = serde_json::json!({
            "name": self.name,
            "arguments": self.arguments,
        });
        format!("{TOOL_CALL_OPEN}{payload}{TOOL_CALL_CLOSE}")
    }

    pub fn has_argument(&self, key: &str) -> bool {
        self.arguments.contains_key(key)
    }

    pub fn argument_names(&self) -> impl Iterator<Item = &str> {
        self.arguments.keys().map(String::as_str)
    }
}

impl PartialEq for ToolCallPayload {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name && arguments_equal(&self.arguments, &other.arguments)
    }
}

/// Returns true if the text contains a tool call opening delimiter.
pub fn is_tool_call(text: &str) -> bool {
    text.contains(TOOL_CALL_OPEN)
}

/// Parses the first delimited tool call block in `text`.
///
/// Returns `None` if there is no complete block, or if its content is not a
/// JSON object with a string `name` and an object `arguments` (which may be omitted).
pub fn parse_tool_call(text: &str) -> Option<ToolCallPayload> {
    let body = TOOL_CALL_PATTERN.captures(text)?.get(1)?.as_str();
    match serde_json::from_str::<ToolCallPayload>(body) {
        Ok(payload) => Some(payload),
        Err(e) => {
            debug!(error = %e, "Failed to parse tool call payload");
            None
        }
    }
}

/// Deep equality over JSON values where numbers compare by numeric value,
/// so `1` and `1.0` are equal.
pub fn values_equal(left: &Value, right: &Value) -> bool {
    match (left, right) {
        (Value::Number(l), Value::Number(r)) => {
            if l == r {
                return true;
            }
            match (l.as_f64(), r.as_f64()) {
                (Some(l), Some(r)) => l == r,
                _ => false,
            }
        }
        (Value::Array(l), Value::Array(r)) => {
            l.len() == r.len() && l.iter().zip(r).all(|(l, r)| values_equal(l, r))
        }
        (Value::Object(l), Value::Object(r)) => arguments_equal(l, r),
        _ => left == right,
    }
}

fn arguments_equal(left: &Map<String, Value>, right: &Map<String, Value>) -> bool {
    left.len() == right.len()
        && left
            .iter()
            .all(|(key, value)| right.get(key).is_some_and(|other| values_equal(value, other)))
}
