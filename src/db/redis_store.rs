use std::time::{Duration, Instant};

use ::redis::aio::ConnectionManager;
use ::redis::{RedisError, Script};
use once_cell::sync::Lazy;
use tracing::{error, info, warn};
use uuid::Uuid;

use super::retry::{retry_with_backoff, RetryPolicy};
use super::types::{lock_key, workspace_key, StoreError, StoreFuture, WorkspaceStore};
use crate::models::workspace::Workspace;

const LOCK_POLL_INTERVAL: Duration = Duration::from_millis(50);

// Deletes the lock only if it still carries our token.
static RELEASE_LOCK: Lazy<Script> = Lazy::new(|| {
    Script::new(
        r#"
if redis.call("get", KEYS[1]) == ARGV[1] then
    return redis.call("del", KEYS[1])
else
    return 0
end
"#,
    )
});

#[derive(Debug, Clone)]
pub struct RedisStoreOptions {
    pub url: String,
    pub ttl_seconds: u64,
    pub lock_timeout: Duration,
    pub save_retry: RetryPolicy,
}

#[derive(Clone)]
pub struct RedisWorkspaceStore {
    conn: ConnectionManager,
    ttl_seconds: u64,
    lock_timeout: Duration,
    save_retry: RetryPolicy,
}

impl From<RedisError> for StoreError {
    fn from(err: RedisError) -> Self {
        if err.is_io_error() || err.is_connection_refusal() || err.is_connection_dropped() || err.is_timeout() {
            StoreError::Connection(err.to_string())
        } else {
            StoreError::Backend(err.to_string())
        }
    }
}

/// Ownership proof for `lock:session:{id}`. Must be handed back to `release_lock`.
struct LockToken {
    key: String,
    token: String,
}

impl RedisWorkspaceStore {
    pub async fn connect(opts: RedisStoreOptions) -> Result<Self, StoreError> {
        let client = ::redis::Client::open(opts.url.as_str())?;
        let conn = ConnectionManager::new(client).await?;
        info!(
            "[STORE] redis connected: ttl={}s, lock_timeout={}ms",
            opts.ttl_seconds,
            opts.lock_timeout.as_millis()
        );
        Ok(Self {
            conn,
            ttl_seconds: opts.ttl_seconds,
            lock_timeout: opts.lock_timeout,
            save_retry: opts.save_retry,
        })
    }

    async fn acquire_lock(&self, session_id: &str) -> Result<LockToken, StoreError> {
        let key = lock_key(session_id);
        let token = Uuid::new_v4().to_string();
        let ttl_ms = self.lock_timeout.as_millis() as u64;
        let deadline = Instant::now() + self.lock_timeout;
        let mut conn = self.conn.clone();

        loop {
            let acquired: Option<String> = ::redis::cmd("SET")
                .arg(&key)
                .arg(&token)
                .arg("NX")
                .arg("PX")
                .arg(ttl_ms)
                .query_async(&mut conn)
                .await?;
            if acquired.is_some() {
                return Ok(LockToken { key, token });
            }
            if Instant::now() >= deadline {
                warn!("[STORE] lock timeout: session={}", session_id);
                return Err(StoreError::LockTimeout(session_id.to_string()));
            }
            tokio::time::sleep(LOCK_POLL_INTERVAL).await;
        }
    }

    async fn release_lock(&self, lock: LockToken) {
        let mut conn = self.conn.clone();
        let released: Result<i64, RedisError> = RELEASE_LOCK
            .key(&lock.key)
            .arg(&lock.token)
            .invoke_async(&mut conn)
            .await;
        match released {
            Ok(1) => {}
            Ok(_) => warn!("[STORE] lock {} expired before release", lock.key),
            Err(err) => warn!("[STORE] lock release failed: key={}, error={}", lock.key, err),
        }
    }

    async fn load_locked(&self, session_id: &str) -> Result<Option<Workspace>, StoreError> {
        let lock = self.acquire_lock(session_id).await?;
        let result = self.read_and_touch(&workspace_key(session_id)).await;
        self.release_lock(lock).await;
        result
    }

    async fn read_and_touch(&self, key: &str) -> Result<Option<Workspace>, StoreError> {
        let mut conn = self.conn.clone();
        let raw: Option<String> = ::redis::cmd("GET").arg(key).query_async(&mut conn).await?;
        let Some(raw) = raw else {
            return Ok(None);
        };
        let workspace: Workspace = serde_json::from_str(&raw)?;
        let _: i64 = ::redis::cmd("EXPIRE")
            .arg(key)
            .arg(self.ttl_seconds)
            .query_async(&mut conn)
            .await?;
        Ok(Some(workspace))
    }

    async fn save_locked(&self, session_id: &str, payload: &str) -> Result<(), StoreError> {
        let lock = self.acquire_lock(session_id).await?;
        let mut conn = self.conn.clone();
        let result: Result<(), StoreError> = ::redis::cmd("SETEX")
            .arg(workspace_key(session_id))
            .arg(self.ttl_seconds)
            .arg(payload)
            .query_async::<_, ()>(&mut conn)
            .await
            .map_err(StoreError::from);
        self.release_lock(lock).await;
        result
    }

    async fn save_with_retry(&self, session_id: &str, workspace: &Workspace) -> Result<(), StoreError> {
        let payload = serde_json::to_string(workspace)?;
        retry_with_backoff(&self.save_retry, "save workspace", || {
            self.save_locked(session_id, &payload)
        })
        .await
        .map_err(|err| {
            error!("[STORE] workspace save failed: session={}, error={}", session_id, err);
            err
        })?;
        info!("[STORE] workspace saved: session={}, bytes={}", session_id, payload.len());
        Ok(())
    }

    async fn delete_locked(&self, session_id: &str) -> Result<bool, StoreError> {
        let lock = self.acquire_lock(session_id).await?;
        let mut conn = self.conn.clone();
        let removed: Result<i64, RedisError> = ::redis::cmd("DEL")
            .arg(workspace_key(session_id))
            .query_async(&mut conn)
            .await;
        self.release_lock(lock).await;
        Ok(removed? > 0)
    }

    async fn ping_server(&self) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        let pong: String = ::redis::cmd("PING").query_async(&mut conn).await?;
        if pong != "PONG" {
            return Err(StoreError::Backend(format!("unexpected PING reply: {pong}")));
        }
        Ok(())
    }
}

impl WorkspaceStore for RedisWorkspaceStore {
    fn backend(&self) -> &'static str {
        "redis"
    }

    fn load<'a>(&'a self, session_id: &'a str) -> StoreFuture<'a, Option<Workspace>> {
        Box::pin(async move {
            match self.load_locked(session_id).await {
                Ok(Some(ws)) => {
                    info!("[STORE] workspace loaded: session={}", session_id);
                    Ok(Some(ws))
                }
                Ok(None) => {
                    info!("[STORE] no workspace found: session={}", session_id);
                    Ok(None)
                }
                // Another holder still owns the session; starting fresh would overwrite its work.
                Err(err @ StoreError::LockTimeout(_)) => Err(err),
                // A broken or unreachable entry starts the session fresh.
                Err(err) => {
                    error!("[STORE] workspace load failed: session={}, error={}", session_id, err);
                    Ok(None)
                }
            }
        })
    }

    fn save<'a>(&'a self, session_id: &'a str, workspace: &'a Workspace) -> StoreFuture<'a, ()> {
        Box::pin(self.save_with_retry(session_id, workspace))
    }

    fn delete<'a>(&'a self, session_id: &'a str) -> StoreFuture<'a, bool> {
        Box::pin(self.delete_locked(session_id))
    }

    fn ping<'a>(&'a self) -> StoreFuture<'a, ()> {
        Box::pin(self.ping_server())
    }
}
