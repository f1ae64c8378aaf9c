use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};

/// Serializes whole turns per session inside this process, so a turn's
/// load → run → save never interleaves with another turn on the same session.
#[derive(Default, Clone)]
pub struct SessionGate {
    locks: Arc<DashMap<String, Arc<Mutex<()>>>>,
}

pub struct SessionPermit {
    guard: Option<OwnedMutexGuard<()>>,
    key: String,
    locks: Arc<DashMap<String, Arc<Mutex<()>>>>,
}

impl SessionGate {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn enter(&self, session_id: &str) -> SessionPermit {
        let lock = self
            .locks
            .entry(session_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .value()
            .clone();
        let guard = lock.lock_owned().await;
        SessionPermit {
            guard: Some(guard),
            key: session_id.to_string(),
            locks: self.locks.clone(),
        }
    }

    pub fn tracked_sessions(&self) -> usize {
        self.locks.len()
    }
}

impl Drop for SessionPermit {
    fn drop(&mut self) {
        self.guard.take();
        // Only the map still references the mutex: nobody holds or waits on it.
        self.locks
            .remove_if(&self.key, |_, lock| Arc::strong_count(lock) == 1);
    }
}
