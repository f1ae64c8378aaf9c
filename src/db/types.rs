use std::future::Future;
use std::pin::Pin;

use thiserror::Error;

use crate::models::workspace::Workspace;

pub type StoreFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, StoreError>> + Send + 'a>>;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("session store unavailable: {0}")]
    Connection(String),
    #[error("timed out acquiring lock for session {0}")]
    LockTimeout(String),
    #[error("workspace serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("session store error: {0}")]
    Backend(String),
}

/// Persistence for session workspaces.
pub trait WorkspaceStore: Send + Sync {
    fn backend(&self) -> &'static str;

    fn load<'a>(&'a self, session_id: &'a str) -> StoreFuture<'a, Option<Workspace>>;

    fn save<'a>(&'a self, session_id: &'a str, workspace: &'a Workspace) -> StoreFuture<'a, ()>;

    /// Returns whether a workspace existed.
    fn delete<'a>(&'a self, session_id: &'a str) -> StoreFuture<'a, bool>;

    fn ping<'a>(&'a self) -> StoreFuture<'a, ()>;
}

pub fn workspace_key(session_id: &str) -> String {
    format!("session:{session_id}:workspace")
}

pub fn lock_key(session_id: &str) -> String {
    format!("lock:session:{session_id}")
}

#[cfg(test)]
mod tests {
    use super::{lock_key, workspace_key, StoreError};

    #[test]
    fn keys_follow_session_layout() {
        assert_eq!(workspace_key("abc"), "session:abc:workspace");
        assert_eq!(lock_key("abc"), "lock:session:abc");
    }

    #[test]
    fn serialization_errors_convert() {
        let err: StoreError = serde_json::from_str::<serde_json::Value>("{").unwrap_err().into();
        assert!(matches!(err, StoreError::Serialization(_)));
        assert!(err.to_string().starts_with("workspace serialization failed"));
    }
}
