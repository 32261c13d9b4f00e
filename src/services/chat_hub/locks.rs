use std::future::Future;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use uuid::Uuid;

/// One turn at a time per chat session.
///
/// Entries are created on first use and dropped again once nobody holds or
/// waits for them.
pub struct SessionLocks {
    locks: scc::HashMap<Uuid, Arc<Mutex<()>>>,
}

impl SessionLocks {
    pub fn new() -> Self {
        Self {
            locks: scc::HashMap::new(),
        }
    }

    pub async fn acquire(&self, session_id: Uuid) -> OwnedMutexGuard<()> {
        let lock = self
            .locks
            .entry_async(session_id)
            .await
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .get()
            .clone();

        lock.lock_owned().await
    }

    pub async fn release(&self, session_id: Uuid, guard: OwnedMutexGuard<()>) {
        drop(guard);
        self.locks
            .remove_if_async(&session_id, |lock| Arc::strong_count(lock) == 1)
            .await;
    }

    /// Runs `task` while holding the session's lock.
    pub async fn run_exclusive<F, T>(&self, session_id: Uuid, task: F) -> T
    where
        F: Future<Output = T>,
    {
        let guard = self.acquire(session_id).await;
        let output = task.await;
        self.release(session_id, guard).await;
        output
    }

    pub fn len(&self) -> usize {
        self.locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}

impl Default for SessionLocks {
    fn default() -> Self {
        Self::new()
    }
}
