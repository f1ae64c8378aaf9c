use axum::http::StatusCode;
use axum::{extract::Path, routing::get, Json, Router};
use serde_json::{json, Value};
use tracing::error;

use crate::db;
use crate::models::workspace::Workspace;
use crate::pipeline::suggest_next_step;
use crate::services::agent::agent;

pub fn router() -> Router {
    Router::new()
        .route("/api/sessions/{id}", axum::routing::delete(delete_session))
        .route("/api/sessions/{id}/workspace", get(get_workspace))
        .route("/api/sessions/{id}/next-step", get(next_step))
}

fn internal_error(err: String) -> (StatusCode, Json<Value>) {
    (StatusCode::INTERNAL_SERVER_ERROR, Json(json!({ "error": err })))
}

async fn get_workspace(Path(id): Path<String>) -> (StatusCode, Json<Value>) {
    let store = match db::store() {
        Ok(store) => store,
        Err(err) => return internal_error(err),
    };
    match store.load(&id).await {
        Ok(Some(workspace)) => (
            StatusCode::OK,
            Json(serde_json::to_value(workspace).unwrap_or(Value::Null)),
        ),
        Ok(None) => (
            StatusCode::NOT_FOUND,
            Json(json!({ "error": "Workspace not found", "session_id": id })),
        ),
        Err(err) => {
            error!("[API] load workspace failed: session={}, error={}", id, err);
            internal_error(err.to_string())
        }
    }
}

/// Waits for any turn in flight on the session, so the turn's save cannot
/// bring the workspace back.
async fn delete_session(Path(id): Path<String>) -> (StatusCode, Json<Value>) {
    let agent = match agent() {
        Ok(agent) => agent,
        Err(err) => return (StatusCode::SERVICE_UNAVAILABLE, Json(json!({ "error": err }))),
    };
    match agent.delete_session(&id).await {
        Ok(deleted) => (StatusCode::OK, Json(json!({ "session_id": id, "deleted": deleted }))),
        Err(err) => {
            error!("[API] delete workspace failed: session={}, error={}", id, err);
            internal_error(err.to_string())
        }
    }
}

async fn next_step(Path(id): Path<String>) -> (StatusCode, Json<Value>) {
    let store = match db::store() {
        Ok(store) => store,
        Err(err) => return internal_error(err),
    };
    let workspace = match store.load(&id).await {
        Ok(found) => found.unwrap_or_else(Workspace::new),
        Err(err) => return internal_error(err.to_string()),
    };
    (
        StatusCode::OK,
        Json(json!({ "session_id": id, "next_step": suggest_next_step(&workspace) })),
    )
}
