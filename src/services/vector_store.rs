use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use tracing::{error, info};

use super::llm::LlmFuture;
use crate::utils::log_helpers::truncate_log;

pub type Payload = Map<String, Value>;

#[derive(Debug, Clone, PartialEq)]
pub enum Condition {
    FieldMatch(String, Value),
    FieldRange {
        key: String,
        gte: Option<i64>,
        lte: Option<i64>,
    },
}

/// Conjunction of conditions (`must` in Qdrant terms).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Filter {
    pub must: Vec<Condition>,
}

impl Filter {
    pub fn matching(key: &str, value: impl Into<Value>) -> Self {
        Self {
            must: vec![Condition::FieldMatch(key.to_string(), value.into())],
        }
    }

    pub fn range(key: &str, gte: Option<i64>, lte: Option<i64>) -> Self {
        Self {
            must: vec![Condition::FieldRange {
                key: key.to_string(),
                gte,
                lte,
            }],
        }
    }

    pub fn to_json(&self) -> Value {
        let must: Vec<Value> = self
            .must
            .iter()
            .map(|cond| match cond {
                Condition::FieldMatch(key, value) => json!({"key": key, "match": {"value": value}}),
                Condition::FieldRange { key, gte, lte } => {
                    let mut range = Map::new();
                    if let Some(v) = gte {
                        range.insert("gte".to_string(), json!(v));
                    }
                    if let Some(v) = lte {
                        range.insert("lte".to_string(), json!(v));
                    }
                    json!({"key": key, "range": range})
                }
            })
            .collect();
        json!({ "must": must })
    }
}

#[derive(Debug, Clone, Default)]
pub struct SearchRequest {
    /// Named vector to search; `None` for the collection's default vector.
    pub vector_name: Option<String>,
    pub vector: Vec<f32>,
    pub limit: usize,
    pub filter: Option<Filter>,
    pub score_threshold: Option<f32>,
}

impl SearchRequest {
    fn to_json(&self) -> Value {
        let vector = match &self.vector_name {
            Some(name) => json!({"name": name, "vector": self.vector}),
            None => json!(self.vector),
        };
        let mut body = json!({
            "vector": vector,
            "limit": self.limit,
            "with_payload": true,
        });
        if let Some(filter) = &self.filter {
            body["filter"] = filter.to_json();
        }
        if let Some(threshold) = self.score_threshold {
            body["score_threshold"] = json!(threshold);
        }
        body
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PointId {
    Num(u64),
    Uuid(String),
}

impl std::fmt::Display for PointId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PointId::Num(n) => write!(f, "{n}"),
            PointId::Uuid(s) => f.write_str(s),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ScoredPoint {
    pub id: PointId,
    pub score: f32,
    #[serde(default)]
    pub payload: Payload,
}

pub trait VectorStore: Send + Sync {
    fn search_batch<'a>(
        &'a self,
        collection: &'a str,
        requests: Vec<SearchRequest>,
    ) -> LlmFuture<'a, Vec<Vec<ScoredPoint>>>;

    fn search<'a>(&'a self, collection: &'a str, request: SearchRequest) -> LlmFuture<'a, Vec<ScoredPoint>>;

    fn scroll<'a>(
        &'a self,
        collection: &'a str,
        filter: Option<Filter>,
        limit: usize,
    ) -> LlmFuture<'a, Vec<Payload>>;
}

/// Qdrant over its REST API.
#[derive(Clone)]
pub struct QdrantRestStore {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
}

impl QdrantRestStore {
    pub fn new(base_url: String, api_key: Option<String>, timeout: Duration) -> Result<Self, String> {
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

    async fn post(&self, collection: &str, path: &str, body: Value) -> Result<Value, String> {
        let url = format!(
            "{}/collections/{}/points/{}",
            self.base_url.trim_end_matches('/'),
            collection,
            path
        );
        let mut req = self.client.post(&url).json(&body);
        if let Some(key) = &self.api_key {
            req = req.header("api-key", key);
        }
        let resp = req.send().await.map_err(|e| {
            error!("[QDRANT] transport error: url={}, error={}", url, e);
            format!("vector store request failed: {e}")
        })?;
        let status = resp.status();
        let text = resp.text().await.map_err(|e| e.to_string())?;
        if !status.is_success() {
            let err_text = truncate_log(&text, 1000);
            error!("[QDRANT] request failed: collection={}, path={}, status={}, error={}", collection, path, status, err_text);
            return Err(format!("vector store returned {status}: {err_text}"));
        }
        let val: Value =
            serde_json::from_str(&text).map_err(|e| format!("vector store response is not JSON: {e}"))?;
        val.get("result")
            .cloned()
            .ok_or_else(|| "vector store response has no result".to_string())
    }

    async fn run_batch(&self, collection: &str, requests: Vec<SearchRequest>) -> Result<Vec<Vec<ScoredPoint>>, String> {
        let searches: Vec<Value> = requests.iter().map(SearchRequest::to_json).collect();
        let count = searches.len();
        let result = self
            .post(collection, "search/batch", json!({ "searches": searches }))
            .await?;
        let hits: Vec<Vec<ScoredPoint>> =
            serde_json::from_value(result).map_err(|e| format!("bad search/batch result: {e}"))?;
        info!(
            "[QDRANT] search batch: collection={}, requests={}, hits={}",
            collection,
            count,
            hits.iter().map(Vec::len).sum::<usize>()
        );
        Ok(hits)
    }

    async fn run_search(&self, collection: &str, request: SearchRequest) -> Result<Vec<ScoredPoint>, String> {
        let result = self.post(collection, "search", request.to_json()).await?;
        serde_json::from_value(result).map_err(|e| format!("bad search result: {e}"))
    }

    async fn run_scroll(&self, collection: &str, filter: Option<Filter>, limit: usize) -> Result<Vec<Payload>, String> {
        let mut body = json!({"limit": limit, "with_payload": true, "with_vector": false});
        if let Some(filter) = &filter {
            body["filter"] = filter.to_json();
        }
        let result = self.post(collection, "scroll", body).await?;
        Ok(scroll_payloads(&result))
    }
}

fn scroll_payloads(result: &Value) -> Vec<Payload> {
    result
        .get("points")
        .and_then(|p| p.as_array())
        .map(|points| {
            points
                .iter()
                .filter_map(|p| p.get("payload").and_then(|v| v.as_object()).cloned())
                .collect()
        })
        .unwrap_or_default()
}

impl VectorStore for QdrantRestStore {
    fn search_batch<'a>(
        &'a self,
        collection: &'a str,
        requests: Vec<SearchRequest>,
    ) -> LlmFuture<'a, Vec<Vec<ScoredPoint>>> {
        Box::pin(self.run_batch(collection, requests))
    }

    fn search<'a>(&'a self, collection: &'a str, request: SearchRequest) -> LlmFuture<'a, Vec<ScoredPoint>> {
        Box::pin(self.run_search(collection, request))
    }

    fn scroll<'a>(
        &'a self,
        collection: &'a str,
        filter: Option<Filter>,
        limit: usize,
    ) -> LlmFuture<'a, Vec<Payload>> {
        Box::pin(self.run_scroll(collection, filter, limit))
    }
}


#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn filter_serializes_to_qdrant_shape() {
        let mut filter = Filter::matching("product_type", "스타일러");
        filter.must.push(Condition::FieldRange {
            key: "date_timestamp".into(),
            gte: Some(10),
            lte: None,
        });
        assert_eq!(
            filter.to_json(),
            json!({"must": [
                {"key": "product_type", "match": {"value": "스타일러"}},
                {"key": "date_timestamp", "range": {"gte": 10}}
            ]})
        );
    }

    #[test]
    fn named_vector_request_body() {
        let req = SearchRequest {
            vector_name: Some("meaning".into()),
            vector: vec![1.0],
            limit: 50,
            filter: None,
            score_threshold: Some(0.5),
        };
        let body = req.to_json();
        assert_eq!(body["vector"]["name"], "meaning");
        assert_eq!(body["limit"], 50);
        assert_eq!(body["score_threshold"], 0.5);
        assert!(body.get("filter").is_none());
    }

    #[test]
    fn decodes_points_with_either_id_kind() {
        let hits: Vec<ScoredPoint> = serde_json::from_value(json!([
            {"id": 7, "score": 0.9, "payload": {"sentence": "a"}},
            {"id": "3f0e-uuid", "score": 0.8}
        ]))
        .unwrap();
        assert_eq!(hits[0].id.to_string(), "7");
        assert_eq!(hits[1].id, PointId::Uuid("3f0e-uuid".into()));
        assert!(hits[1].payload.is_empty());

        let scroll = json!({"points": [{"id": 1, "payload": {"fields": ["a"]}}], "next_page_offset": null});
        assert_eq!(scroll_payloads(&scroll).len(), 1);
    }
}
