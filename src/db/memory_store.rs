use std::time::{Duration, Instant};

use dashmap::DashMap;
use tracing::info;

use super::types::{StoreError, StoreFuture, WorkspaceStore};
use crate::models::workspace::Workspace;

/// In-process store. Entries are kept as JSON so they go through the same
/// serialization as the Redis backend.
pub struct MemoryWorkspaceStore {
    entries: DashMap<String, (String, Instant)>,
    ttl: Duration,
}

impl MemoryWorkspaceStore {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            ttl,
        }
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    fn read(&self, session_id: &str) -> Result<Option<Workspace>, StoreError> {
        let now = Instant::now();
        let Some(mut entry) = self.entries.get_mut(session_id) else {
            return Ok(None);
        };
        if entry.1 <= now {
            drop(entry);
            self.entries.remove(session_id);
            info!("[STORE] workspace expired: session={}", session_id);
            return Ok(None);
        }
        entry.1 = now + self.ttl;
        Ok(Some(serde_json::from_str(&entry.0)?))
    }
}

impl WorkspaceStore for MemoryWorkspaceStore {
    fn backend(&self) -> &'static str {
        "memory"
    }

    fn load<'a>(&'a self, session_id: &'a str) -> StoreFuture<'a, Option<Workspace>> {
        let loaded = self.read(session_id);
        Box::pin(async move { loaded })
    }

    fn save<'a>(&'a self, session_id: &'a str, workspace: &'a Workspace) -> StoreFuture<'a, ()> {
        let saved = serde_json::to_string(workspace)
            .map(|payload| {
                let now = Instant::now();
                // Abandoned sessions are never read again, so expire them here.
                self.entries.retain(|_, entry| entry.1 > now);
                self.entries.insert(session_id.to_string(), (payload, now + self.ttl));
            })
            .map_err(StoreError::from);
        Box::pin(async move { saved })
    }

    fn delete<'a>(&'a self, session_id: &'a str) -> StoreFuture<'a, bool> {
        Box::pin(async move { Ok(self.entries.remove(session_id).is_some()) })
    }

    fn ping<'a>(&'a self) -> StoreFuture<'a, ()> {
        Box::pin(async move { Ok(()) })
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use serde_json::json;

    use super::MemoryWorkspaceStore;
    use crate::db::types::WorkspaceStore;
    use crate::models::workspace::Workspace;

    #[tokio::test]
    async fn save_load_delete_cycle() {
        let store = MemoryWorkspaceStore::new(Duration::from_secs(60));
        assert!(store.load("s1").await.unwrap().is_none());

        let mut ws = Workspace::new();
        ws.append_to_history(json!({"role": "user", "content": "hi"}), 50);
        store.save("s1", &ws).await.unwrap();

        let loaded = store.load("s1").await.unwrap().expect("stored workspace");
        assert_eq!(loaded, ws);
        assert!(store.delete("s1").await.unwrap());
        assert!(!store.delete("s1").await.unwrap());
        assert_eq!(store.len(), 0);
    }

    #[tokio::test]
    async fn expired_entries_are_dropped() {
        let store = MemoryWorkspaceStore::new(Duration::ZERO);
        store.save("s1", &Workspace::new()).await.unwrap();
        assert!(store.load("s1").await.unwrap().is_none());
        assert_eq!(store.len(), 0);
    }

    #[tokio::test]
    async fn saving_sweeps_abandoned_sessions() {
        let store = MemoryWorkspaceStore::new(Duration::ZERO);
        store.save("old-1", &Workspace::new()).await.unwrap();
        store.save("old-2", &Workspace::new()).await.unwrap();
        store.save("fresh", &Workspace::new()).await.unwrap();
        assert_eq!(store.len(), 1);
    }
}
