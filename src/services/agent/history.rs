use std::collections::HashSet;

use serde_json::{json, Value};

use crate::models::workspace::{message_role, Workspace};

/// Drops `tool` messages whose `tool_call_id` is missing or was never issued
/// by an earlier assistant `tool_calls` entry. The provider rejects them.
pub fn validate_messages(messages: &[Value]) -> Vec<Value> {
    let mut issued: HashSet<String> = HashSet::new();
    let mut valid = Vec::with_capacity(messages.len());

    for message in messages {
        match message_role(message) {
            "assistant" => {
                if let Some(calls) = message.get("tool_calls").and_then(Value::as_array) {
                    issued.extend(
                        calls
                            .iter()
                            .filter_map(|c| c.get("id").and_then(Value::as_str))
                            .map(str::to_string),
                    );
                }
                valid.push(message.clone());
            }
            "tool" => {
                let known = message
                    .get("tool_call_id")
                    .and_then(Value::as_str)
                    .map(|id| issued.contains(id))
                    .unwrap_or(false);
                if known {
                    valid.push(message.clone());
                }
            }
            _ => valid.push(message.clone()),
        }
    }
    valid
}

/// System prompt, validated history, then the current artifact state.
pub fn build_messages(workspace: &Workspace, system_prompt: String) -> Vec<Value> {
    let history = validate_messages(&workspace.internal_history);
    let mut messages = Vec::with_capacity(history.len() + 2);
    messages.push(json!({ "role": "system", "content": system_prompt }));
    messages.extend(history);
    messages.push(json!({
        "role": "system",
        "content": format!("Current artifacts state: {}", workspace.artifacts.summary()),
    }));
    messages
}
