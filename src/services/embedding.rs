use std::time::Duration;

use serde_json::{json, Value};
use tracing::error;

use super::llm::LlmFuture;
use crate::utils::log_helpers::truncate_log;

/// Text → vector, per model name.
pub trait Embedder: Send + Sync {
    fn embed<'a>(&'a self, model: &'a str, text: &'a str) -> LlmFuture<'a, Vec<f32>>;
}

/// The two query vectors every VOC search needs.
pub struct QueryVectors {
    pub meaning: Vec<f32>,
    pub topic: Vec<f32>,
}

/// The meaning model is an e5 model and expects the `query: ` prefix.
pub async fn embed_query(
    embedder: &dyn Embedder,
    meaning_model: &str,
    topic_model: &str,
    text: &str,
) -> Result<QueryVectors, String> {
    let prefixed = format!("query: {text}");
    let meaning = embedder.embed(meaning_model, &prefixed).await?;
    let topic = embedder.embed(topic_model, text).await?;
    Ok(QueryVectors { meaning, topic })
}

#[derive(Clone)]
pub struct OpenAiEmbedder {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl OpenAiEmbedder {
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

    async fn request(&self, model: &str, text: &str) -> Result<Vec<f32>, String> {
        let url = format!("{}/embeddings", self.base_url.trim_end_matches('/'));
        let mut req = self
            .client
            .post(&url)
            .json(&json!({"model": model, "input": text}));
        if !self.api_key.is_empty() {
            req = req.bearer_auth(&self.api_key);
        }
        let resp = req.send().await.map_err(|e| {
            error!("[EMBED] transport error: model={}, error={}", model, e);
            format!("embedding request failed: {e}")
        })?;
        let status = resp.status();
        let body = resp.text().await.map_err(|e| e.to_string())?;
        if !status.is_success() {
            let err_text = truncate_log(&body, 1000);
            error!("[EMBED] request failed: status={}, error={}", status, err_text);
            return Err(format!("embedding request failed with status {status}: {err_text}"));
        }
        let val: Value =
            serde_json::from_str(&body).map_err(|e| format!("embedding response is not JSON: {e}"))?;
        parse_embedding(&val)
    }
}

fn parse_embedding(val: &Value) -> Result<Vec<f32>, String> {
    let items = val
        .get("data")
        .and_then(|d| d.get(0))
        .and_then(|d| d.get("embedding"))
        .and_then(|e| e.as_array())
        .ok_or_else(|| "embedding response has no data[0].embedding".to_string())?;
    items
        .iter()
        .map(|v| {
            v.as_f64()
                .map(|f| f as f32)
                .ok_or_else(|| "embedding contains a non-numeric value".to_string())
        })
        .collect()
}

impl Embedder for OpenAiEmbedder {
    fn embed<'a>(&'a self, model: &'a str, text: &'a str) -> LlmFuture<'a, Vec<f32>> {
        Box::pin(self.request(model, text))
    }
}

#[cfg(test)]
pub mod testing {
    use std::sync::Mutex;

    use super::Embedder;
    use crate::services::llm::LlmFuture;

    /// Returns a fixed vector and records `(model, text)` pairs.
    #[derive(Default)]
    pub struct FixedEmbedder {
        pub calls: Mutex<Vec<(String, String)>>,
    }

    impl Embedder for FixedEmbedder {
        fn embed<'a>(&'a self, model: &'a str, text: &'a str) -> LlmFuture<'a, Vec<f32>> {
            self.calls
                .lock()
                .unwrap()
                .push((model.to_string(), text.to_string()));
            Box::pin(async move { Ok(vec![0.1, 0.2, 0.3]) })
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::testing::FixedEmbedder;
    use super::{embed_query, parse_embedding};

    #[tokio::test]
    async fn meaning_model_gets_query_prefix() {
        let embedder = FixedEmbedder::default();
        let vectors = embed_query(&embedder, "e5", "sbert", "살균").await.unwrap();
        assert_eq!(vectors.meaning.len(), 3);
        let calls = embedder.calls.lock().unwrap();
        assert_eq!(calls[0], ("e5".to_string(), "query: 살균".to_string()));
        assert_eq!(calls[1], ("sbert".to_string(), "살균".to_string()));
    }

    #[test]
    fn parses_openai_embedding_body() {
        let body = json!({"data": [{"embedding": [0.5, -1.0]}]});
        assert_eq!(parse_embedding(&body).unwrap(), vec![0.5f32, -1.0]);
        assert!(parse_embedding(&json!({"data": []})).is_err());
    }
}
