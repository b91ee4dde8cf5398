//! Edge-scoped locks keyed by `(from, to)`.
//!
//! Locks are created lazily under the map lock and acquired outside it. A lock
//! taken by `task_did_finish` for an edge is held until the target activation
//! releases it, which is what the generator barriers wait on.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::error::{DagError, Result};

type EdgeKey = (String, String);

#[derive(Debug, Default)]
pub(crate) struct EdgeLocks {
    locks: tokio::sync::Mutex<HashMap<EdgeKey, Arc<Semaphore>>>,
    held: parking_lot::Mutex<HashMap<EdgeKey, OwnedSemaphorePermit>>,
}

impl EdgeLocks {
    async fn lock_for(&self, from: &str, to: &str) -> Arc<Semaphore> {
        self.locks
            .lock()
            .await
            .entry((from.to_string(), to.to_string()))
            .or_insert_with(|| Arc::new(Semaphore::new(1)))
            .clone()
    }

    /// Take the `(from, to)` lock and keep it until [`release`](Self::release).
    pub(crate) async fn acquire(&self, from: &str, to: &str) -> Result<()> {
        let permit = self
            .lock_for(from, to)
            .await
            .acquire_owned()
            .await
            .map_err(|e| DagError::Execution(format!("edge lock {from} -> {to}: {e}")))?;
        self.held
            .lock()
            .insert((from.to_string(), to.to_string()), permit);
        Ok(())
    }

    /// Release the `(from, to)` lock if held.
    pub(crate) fn release(&self, from: &str, to: &str) {
        self.held.lock().remove(&(from.to_string(), to.to_string()));
    }

    /// Wait for the current holder of `(from, to)` to release it.
    pub(crate) async fn barrier(&self, from: &str, to: &str) -> Result<()> {
        self.acquire(from, to).await?;
        self.release(from, to);
        Ok(())
    }

    pub(crate) fn held_count(&self) -> usize {
        self.held.lock().len()
    }
}
