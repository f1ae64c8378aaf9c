use serde_json::Value;

pub fn estimate_tokens(text: &str) -> i64 {
    if text.is_empty() {
        return 0;
    }
    ((text.len() as i64) + 3) / 4
}

pub fn estimate_tokens_value(content: &Value) -> i64 {
    match content {
        Value::Null => 0,
        Value::String(text) => estimate_tokens(text),
        Value::Array(parts) => parts
            .iter()
            .map(|part| match part {
                Value::String(text) => estimate_tokens(text),
                other => other
                    .get("text")
                    .and_then(|v| v.as_str())
                    .map(estimate_tokens)
                    .unwrap_or_else(|| estimate_tokens(&other.to_string())),
            })
            .sum(),
        other => estimate_tokens(&other.to_string()),
    }
}

pub fn estimate_message_tokens(message: &Value) -> i64 {
    let mut tokens = estimate_tokens_value(message.get("content").unwrap_or(&Value::Null));
    if let Some(tool_calls) = message.get("tool_calls") {
        tokens += estimate_tokens(&tool_calls.to_string());
    }
    tokens
}

pub fn estimate_messages_tokens(messages: &[Value]) -> i64 {
    messages.iter().map(estimate_message_tokens).sum()
}

/// Cuts `text` to roughly `max_tokens` worth of bytes, on a char boundary.
pub fn truncate_text_by_tokens(text: &str, max_tokens: i64) -> String {
    if max_tokens <= 0 {
        return String::new();
    }

    let max_bytes = (max_tokens * 4) as usize;
    if text.len() <= max_bytes {
        return text.to_string();
    }

    let marker = "\n...[truncated]";
    let budget = max_bytes.saturating_sub(marker.len());
    let cut = text
        .char_indices()
        .map(|(idx, ch)| idx + ch.len_utf8())
        .take_while(|end| *end <= budget)
        .last()
        .unwrap_or(0);
    format!("{}{}", &text[..cut], marker)
}

/// Serializes a value for prompt embedding, capped at `max_tokens`.
pub fn prompt_json(value: &Value, max_tokens: i64) -> String {
    let text = serde_json::to_string(value).unwrap_or_else(|_| "null".to_string());
    truncate_text_by_tokens(&text, max_tokens)
}
