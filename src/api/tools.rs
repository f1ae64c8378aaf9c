use axum::http::StatusCode;
use axum::{routing::get, Json, Router};
use serde_json::{json, Value};

use crate::services::agent::agent;

pub fn router() -> Router {
    Router::new().route("/api/tools", get(list_tools))
}

async fn list_tools() -> (StatusCode, Json<Value>) {
    match agent() {
        Ok(agent) => {
            let tools = agent.registry().llm_tools();
            (StatusCode::OK, Json(json!({ "count": tools.len(), "tools": tools })))
        }
        Err(err) => (StatusCode::SERVICE_UNAVAILABLE, Json(json!({ "error": err }))),
    }
}
