use axum::http::{HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::{routing::post, Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{info, warn};
use uuid::Uuid;

use super::SESSION_ID_HEADER;
use crate::models::workspace::{Artifacts, Workspace};
use crate::services::agent::agent;

#[derive(Debug, Deserialize)]
struct ChatRequest {
    session_id: Option<String>,
    #[serde(default)]
    message: String,
}

#[derive(Debug, Serialize)]
pub struct ChatResponse {
    pub response_message: String,
    pub workspace: Workspace,
    pub user_history: Vec<Value>,
    pub artifacts: Artifacts,
    pub error: Option<String>,
}

pub fn router() -> Router {
    Router::new().route("/chat", post(chat))
}

/// Body first, then the `X-Session-ID` header, then a fresh id.
fn resolve_session_id(body: Option<String>, headers: &HeaderMap) -> String {
    body.filter(|s| !s.trim().is_empty())
        .or_else(|| {
            headers
                .get(&SESSION_ID_HEADER)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string)
                .filter(|s| !s.trim().is_empty())
        })
        .unwrap_or_else(|| Uuid::new_v4().to_string())
}

async fn chat(headers: HeaderMap, Json(req): Json<ChatRequest>) -> Response {
    let session_id = resolve_session_id(req.session_id, &headers);
    info!("[API] /chat session={}", session_id);

    let agent = match agent() {
        Ok(agent) => agent,
        Err(err) => {
            return (StatusCode::SERVICE_UNAVAILABLE, Json(json!({ "error": err }))).into_response();
        }
    };
    let result = agent.run_turn(&session_id, &req.message).await;
    if let Some(err) = &result.error {
        warn!("[API] /chat finished with error: session={}, error={}", session_id, err);
    }

    let body = ChatResponse {
        response_message: result.reply,
        user_history: result.workspace.user_history.clone(),
        artifacts: result.workspace.artifacts.clone(),
        workspace: result.workspace,
        error: result.error,
    };
    let mut response = (StatusCode::OK, Json(body)).into_response();
    if let Ok(value) = HeaderValue::from_str(&session_id) {
        response.headers_mut().insert(SESSION_ID_HEADER.clone(), value);
    }
    response
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_id_prefers_body_then_header() {
        let mut headers = HeaderMap::new();
        headers.insert(SESSION_ID_HEADER.clone(), HeaderValue::from_static("from-header"));

        assert_eq!(resolve_session_id(Some("from-body".into()), &headers), "from-body");
        assert_eq!(resolve_session_id(Some(" ".into()), &headers), "from-header");

        let fresh = resolve_session_id(None, &HeaderMap::new());
        assert!(Uuid::parse_str(&fresh).is_ok());
    }

    #[test]
    fn request_message_defaults_to_empty() {
        let req: ChatRequest = serde_json::from_str(r#"{"session_id": "abc"}"#).unwrap();
        assert_eq!(req.message, "");
        assert_eq!(req.session_id.as_deref(), Some("abc"));
    }
}
