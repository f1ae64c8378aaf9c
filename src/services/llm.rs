use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use serde_json::{json, Map, Value};
use tracing::{error, info};

use crate::utils::log_helpers::truncate_log;

pub type LlmFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, String>> + Send + 'a>>;

#[derive(Debug, Clone, Default)]
pub struct ChatRequest {
    pub model: String,
    pub messages: Vec<Value>,
    pub tools: Vec<Value>,
    pub tool_choice: Option<String>,
    pub temperature: Option<f64>,
    pub json_mode: bool,
}

impl ChatRequest {
    pub fn prompt(model: &str, prompt: String) -> Self {
        Self {
            model: model.to_string(),
            messages: vec![json!({"role": "user", "content": prompt})],
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub arguments: String,
}

#[derive(Debug, Clone, Default)]
pub struct AssistantReply {
    pub content: Option<String>,
    pub tool_calls: Vec<ToolCall>,
    /// The assistant message as returned, null fields removed.
    pub raw_message: Value,
}

impl AssistantReply {
    pub fn text(content: &str) -> Self {
        Self {
            content: Some(content.to_string()),
            tool_calls: Vec::new(),
            raw_message: json!({"role": "assistant", "content": content}),
        }
    }

    /// Builds a reply from a `choices[0].message` object.
    pub fn from_message(message: &Value) -> Self {
        let content = message
            .get("content")
            .and_then(|v| v.as_str())
            .map(|s| s.to_string());
        let tool_calls = parse_tool_calls(message.get("tool_calls"));

        let mut raw = Map::new();
        if let Some(obj) = message.as_object() {
            for (key, value) in obj {
                if !value.is_null() {
                    raw.insert(key.clone(), value.clone());
                }
            }
        }
        raw.entry("role").or_insert_with(|| Value::String("assistant".to_string()));

        Self {
            content,
            tool_calls,
            raw_message: Value::Object(raw),
        }
    }

    /// The message to store in history. Assistant turns always carry a content key.
    pub fn history_message(&self) -> Value {
        let mut msg = self.raw_message.clone();
        if let Some(obj) = msg.as_object_mut() {
            obj.entry("content").or_insert(Value::Null);
        }
        msg
    }
}

pub fn parse_tool_calls(raw: Option<&Value>) -> Vec<ToolCall> {
    let Some(items) = raw.and_then(|v| v.as_array()) else {
        return Vec::new();
    };
    items
        .iter()
        .filter_map(|item| {
            let id = item.get("id").and_then(|v| v.as_str())?.to_string();
            let function = item.get("function")?;
            let name = function.get("name").and_then(|v| v.as_str())?.to_string();
            let arguments = match function.get("arguments") {
                Some(Value::String(s)) => s.clone(),
                Some(Value::Null) | None => "{}".to_string(),
                Some(other) => other.to_string(),
            };
            Some(ToolCall { id, name, arguments })
        })
        .collect()
}

/// Parses model output that should be a JSON object, tolerating markdown fences.
pub fn parse_json_content(content: &str) -> Result<Value, String> {
    let trimmed = content.trim();
    let body = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .map(|rest| rest.trim_end().trim_end_matches("```").trim())
        .unwrap_or(trimmed);
    serde_json::from_str(body).map_err(|e| format!("model returned invalid JSON: {e}"))
}

pub trait LlmClient: Send + Sync {
    fn chat<'a>(&'a self, request: ChatRequest) -> LlmFuture<'a, AssistantReply>;

    /// Single-prompt call in JSON mode.
    fn complete_json<'a>(&'a self, model: &'a str, prompt: String) -> LlmFuture<'a, Value> {
        Box::pin(json_completion(self, model, prompt))
    }

    fn complete_text<'a>(&'a self, model: &'a str, prompt: String, temperature: f64) -> LlmFuture<'a, String> {
        Box::pin(text_completion(self, model, prompt, temperature))
    }
}

async fn json_completion<C: LlmClient + ?Sized>(client: &C, model: &str, prompt: String) -> Result<Value, String> {
    let mut request = ChatRequest::prompt(model, prompt);
    request.json_mode = true;
    let reply = client.chat(request).await?;
    let content = reply.content.unwrap_or_default();
    if content.trim().is_empty() {
        return Err("model returned an empty response".to_string());
    }
    parse_json_content(&content)
}

async fn text_completion<C: LlmClient + ?Sized>(
    client: &C,
    model: &str,
    prompt: String,
    temperature: f64,
) -> Result<String, String> {
    let mut request = ChatRequest::prompt(model, prompt);
    request.temperature = Some(temperature);
    let reply = client.chat(request).await?;
    Ok(reply.content.unwrap_or_default().trim().to_string())
}

/// OpenAI-compatible `/chat/completions` client.
#[derive(Clone)]
pub struct OpenAiClient {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl OpenAiClient {
    pub fn new(api_key: String, base_url: String, timeout: Duration) -> Result<Self, String> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| format!("build http client failed: {e}"))?;
        Ok(Self {
            client,
            base_url,
            api_key,
        })
    }

    fn build_payload(request: &ChatRequest) -> Value {
        let mut payload = json!({
            "model": request.model,
            "messages": request.messages,
        });
        if !request.tools.is_empty() {
            payload["tools"] = Value::Array(request.tools.clone());
            payload["tool_choice"] =
                Value::String(request.tool_choice.clone().unwrap_or_else(|| "auto".to_string()));
        }
        if let Some(t) = request.temperature {
            payload["temperature"] = json!(t);
        }
        if request.json_mode {
            payload["response_format"] = json!({"type": "json_object"});
        }
        payload
    }

    async fn send(&self, request: ChatRequest) -> Result<AssistantReply, String> {
        let url = format!("{}/chat/completions", self.base_url.trim_end_matches('/'));
        let payload = Self::build_payload(&request);
        info!(
            "[LLM] request: model={}, messages={}, tools={}, json_mode={}",
            request.model,
            request.messages.len(),
            request.tools.len(),
            request.json_mode
        );

        let resp = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&payload)
            .send()
            .await
            .map_err(|e| {
                error!("[LLM] transport error: {}", e);
                format!("LLM request failed: {e}")
            })?;

        let status = resp.status();
        let body = resp.text().await.map_err(|e| e.to_string())?;
        if !status.is_success() {
            let err_text = truncate_log(&body, 2000);
            error!("[LLM] request failed: status={}, error={}", status, err_text);
            return Err(format!("LLM request failed with status {status}: {err_text}"));
        }

        let val: Value = serde_json::from_str(&body)
            .map_err(|e| format!("LLM response is not JSON: {e}"))?;
        let message = val
            .get("choices")
            .and_then(|c| c.get(0))
            .and_then(|c| c.get("message"))
            .ok_or_else(|| format!("LLM response has no message: {}", truncate_log(&body, 500)))?;
        let reply = AssistantReply::from_message(message);
        info!(
            "[LLM] response: model={}, content_len={}, tool_calls={}",
            request.model,
            reply.content.as_deref().map(str::len).unwrap_or(0),
            reply.tool_calls.len()
        );
        Ok(reply)
    }
}

impl LlmClient for OpenAiClient {
    fn chat<'a>(&'a self, request: ChatRequest) -> LlmFuture<'a, AssistantReply> {
        Box::pin(self.send(request))
    }
}

#[cfg(test)]
pub mod testing {
    use std::collections::VecDeque;
    use std::sync::Mutex;

    use super::{AssistantReply, ChatRequest, LlmClient, LlmFuture};

    /// Replays canned replies in order and records every request.
    #[derive(Default)]
    pub struct ScriptedLlm {
        replies: Mutex<VecDeque<Result<AssistantReply, String>>>,
        pub requests: Mutex<Vec<ChatRequest>>,
    }

    impl ScriptedLlm {
        pub fn new(replies: Vec<Result<AssistantReply, String>>) -> Self {
            Self {
                replies: Mutex::new(replies.into()),
                requests: Mutex::new(Vec::new()),
            }
        }

        pub fn json(values: Vec<serde_json::Value>) -> Self {
            Self::new(
                values
                    .into_iter()
                    .map(|v| Ok(AssistantReply::text(&v.to_string())))
                    .collect(),
            )
        }

        pub fn request_count(&self) -> usize {
            self.requests.lock().unwrap().len()
        }

        pub fn prompt(&self, idx: usize) -> String {
            let requests = self.requests.lock().unwrap();
            requests[idx]
                .messages
                .iter()
                .filter_map(|m| m.get("content").and_then(|c| c.as_str()))
                .collect::<Vec<_>>()
                .join("\n")
        }
    }

    impl LlmClient for ScriptedLlm {
        fn chat<'a>(&'a self, request: ChatRequest) -> LlmFuture<'a, AssistantReply> {
            self.requests.lock().unwrap().push(request);
            let next = self
                .replies
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Err("no scripted reply left".to_string()));
            Box::pin(async move { next })
        }
    }
}
