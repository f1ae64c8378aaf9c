pub mod gate;
pub mod memory_store;
pub mod redis_store;
pub mod retry;
pub mod types;

use std::sync::Arc;
use std::time::Duration;

use once_cell::sync::OnceCell;
use tracing::info;

use crate::config::{Config, SessionStoreKind};

pub use gate::SessionGate;
pub use memory_store::MemoryWorkspaceStore;
pub use redis_store::{RedisStoreOptions, RedisWorkspaceStore};
pub use retry::RetryPolicy;
pub use types::{StoreError, WorkspaceStore};

static STORE: OnceCell<Arc<dyn WorkspaceStore>> = OnceCell::new();

pub async fn build_store(cfg: &Config) -> Result<Arc<dyn WorkspaceStore>, StoreError> {
    let store: Arc<dyn WorkspaceStore> = match cfg.session_store {
        SessionStoreKind::Redis => Arc::new(
            RedisWorkspaceStore::connect(RedisStoreOptions {
                url: cfg.redis_url(),
                ttl_seconds: cfg.session_ttl_seconds,
                lock_timeout: Duration::from_secs(cfg.session_lock_timeout_seconds),
                save_retry: RetryPolicy::default(),
            })
            .await?,
        ),
        SessionStoreKind::Memory => Arc::new(MemoryWorkspaceStore::new(Duration::from_secs(
            cfg.session_ttl_seconds,
        ))),
    };
    store.ping().await?;
    Ok(store)
}

pub async fn init_global(cfg: &Config) -> Result<Arc<dyn WorkspaceStore>, String> {
    let store = build_store(cfg).await.map_err(|e| e.to_string())?;
    STORE
        .set(store.clone())
        .map_err(|_| "session store already initialized".to_string())?;
    info!("[STORE] session store ready: backend={}", store.backend());
    Ok(store)
}

pub fn store() -> Result<Arc<dyn WorkspaceStore>, String> {
    STORE
        .get()
        .cloned()
        .ok_or_else(|| "session store not initialized".to_string())
}

#[cfg(test)]
mod tests {
    use super::build_store;
    use crate::config::Config;

    #[tokio::test]
    async fn memory_backend_builds_and_pings() {
        let cfg = Config::from_lookup(|key| match key {
            "SESSION_STORE" => Some("memory".to_string()),
            _ => None,
        })
        .unwrap();
        let store = build_store(&cfg).await.expect("memory store");
        assert_eq!(store.backend(), "memory");
    }
}
