use serde_json::{Map, Value};

use crate::pipeline::RequestKind;

const UNSPECIFIED: &str = "not specified";

/// A raw `/chat` message after classification.
#[derive(Debug, Clone, PartialEq)]
pub enum UserRequest {
    Chat(String),
    /// JSON carrying a `type` other than `chat_message`. The type string is
    /// kept as sent so unknown types can be reported back.
    Structured { kind: String, fields: Map<String, Value> },
}

impl UserRequest {
    pub fn is_structured(&self) -> bool {
        matches!(self, UserRequest::Structured { .. })
    }
}

pub fn parse_user_message(raw: &str) -> UserRequest {
    let Ok(Value::Object(mut fields)) = serde_json::from_str::<Value>(raw.trim()) else {
        return UserRequest::Chat(raw.to_string());
    };
    let kind = match fields.remove("type") {
        Some(Value::String(kind)) => kind,
        Some(other) if !other.is_null() => other.to_string(),
        _ => return UserRequest::Chat(raw.to_string()),
    };
    if kind == "chat_message" {
        let content = match fields.remove("content") {
            Some(Value::String(text)) => text,
            Some(other) if !other.is_null() => other.to_string(),
            _ => String::new(),
        };
        return UserRequest::Chat(content);
    }
    UserRequest::Structured { kind, fields }
}

/// Natural-language rendering of a structured request, for the chat history.
pub fn describe_request(kind: &str, fields: &Map<String, Value>) -> String {
    let text = |key: &str| {
        fields
            .get(key)
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .unwrap_or(UNSPECIFIED)
            .to_string()
    };
    let nested = |outer: &str, key: &str| {
        fields
            .get(outer)
            .and_then(|v| v.get(key))
            .and_then(Value::as_str)
            .filter(|s| !s.trim().is_empty())
            .unwrap_or(UNSPECIFIED)
            .to_string()
    };

    match RequestKind::parse(kind) {
        Some(RequestKind::DataRetriever) => format!(
            "Search data for {} products with the keyword '{}' over {}.",
            text("product_type"),
            fields.get("keyword").and_then(Value::as_str).unwrap_or(""),
            text("date_range"),
        ),
        Some(RequestKind::ManualPersona) => {
            format!("Create the persona '{}'.", nested("persona_data", "name"))
        }
        Some(RequestKind::ManualService) => {
            format!("Propose the service idea '{}'.", nested("service_data", "service_name"))
        }
        Some(RequestKind::ChangeProductType) => {
            format!("Change the product category to '{}'.", text("product_type"))
        }
        None => {
            let mut raw = fields.clone();
            raw.insert("type".to_string(), Value::String(kind.to_string()));
            Value::Object(raw).to_string()
        }
    }
}

/// Python-style truthiness: structured requests treat empty values as absent.
pub(crate) fn is_present(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map(|f| f != 0.0).unwrap_or(true),
        Value::String(s) => !s.trim().is_empty(),
        Value::Array(items) => !items.is_empty(),
        Value::Object(map) => !map.is_empty(),
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn classifies_plain_text_and_typed_json() {
        assert_eq!(parse_user_message("클러스터링 해줘"), UserRequest::Chat("클러스터링 해줘".into()));
        assert_eq!(
            parse_user_message(r#"{"keyword": "살균"}"#),
            UserRequest::Chat(r#"{"keyword": "살균"}"#.into())
        );
        assert_eq!(
            parse_user_message(r#"{"type": "chat_message", "content": "0번 클러스터 SNA"}"#),
            UserRequest::Chat("0번 클러스터 SNA".into())
        );

        let parsed = parse_user_message(r#"{"type": "data_retriever_request", "keyword": "살균"}"#);
        assert!(parsed.is_structured());
        let UserRequest::Structured { kind, fields } = parsed else { unreachable!() };
        assert_eq!(kind, "data_retriever_request");
        assert_eq!(fields.get("keyword"), Some(&json!("살균")));
        assert!(!fields.contains_key("type"));
    }

    #[test]
    fn describes_each_request_kind() {
        let fields = json!({ "keyword": "살균", "date_range": "최근 1년" });
        assert_eq!(
            describe_request("data_retriever_request", fields.as_object().unwrap()),
            "Search data for not specified products with the keyword '살균' over 최근 1년."
        );
        let fields = json!({ "persona_data": { "name": "김민지" } });
        assert_eq!(
            describe_request("manual_persona_request", fields.as_object().unwrap()),
            "Create the persona '김민지'."
        );
        let fields = json!({ "service_data": {} });
        assert!(describe_request("manual_service_request", fields.as_object().unwrap()).contains(UNSPECIFIED));
        assert!(describe_request("mystery", &Map::new()).contains("mystery"));
    }

    #[test]
    fn presence_follows_truthiness() {
        assert!(!is_present(&json!("")));
        assert!(!is_present(&json!({})));
        assert!(!is_present(&json!(0)));
        assert!(is_present(&json!({ "name": "x" })));
        assert!(is_present(&json!("살균")));
    }
}
