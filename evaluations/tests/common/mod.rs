#![cfg_attr(test, allow(clippy::expect_used, clippy::unwrap_used))]
use serde_json::{Value, json};
use toolcall_evaluations::ToolSchemas;
use toolcall_evaluations::tool_call::ToolCallPayload;

/// Builds an assistant turn holding a single tool call.
pub fn call(name: &str, arguments: Value) -> String {
    let payload: ToolCallPayload =
        serde_json::from_value(json!({"name": name, "arguments": arguments})).unwrap();
    payload.to_turn_text()
}

/// Schemas for a `search` tool taking a string `keyword` and an integer `limit`.
pub fn search_schemas() -> ToolSchemas {
    serde_json::from_value(json!({
        "search": {
            "properties": {
                "keyword": {"type": "string"},
                "limit": {"type": "integer"}
            }
        }
    }))
    .unwrap()
}

/// A dataset record as one JSONL line.
pub fn dataset_line(turns: &[(&str, &str)], tools: Option<Value>) -> String {
    let mut messages = Vec::new();
    for (user, assistant) in turns {
        messages.push(json!({"role": "user", "content": user}));
        messages.push(json!({"role": "assistant", "content": assistant}));
    }
    let mut record = json!({
        "system_prompt": "당신은 쇼핑몰 상담사입니다.",
        "messages": messages,
    });
    if let Some(tools) = tools {
        record["tools"] = tools;
    }
    record.to_string()
}
