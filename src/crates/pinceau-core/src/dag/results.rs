//! Per-run result board: one write-once slot per task id.

use std::collections::HashMap;

use parking_lot::Mutex;
use tokio::sync::watch;

use crate::error::{DagError, Result};
use crate::types::TaskData;

/// Published outcome of an activation: its data, or the reason it has none.
pub(crate) type Published = std::result::Result<TaskData, String>;

type Slot = watch::Sender<Option<Published>>;

#[derive(Debug, Default)]
pub(crate) struct ResultBoard {
    slots: Mutex<HashMap<String, Slot>>,
}

impl ResultBoard {
    fn slot(&self, task_id: &str) -> watch::Receiver<Option<Published>> {
        self.slots
            .lock()
            .entry(task_id.to_string())
            .or_insert_with(|| watch::channel(None).0)
            .subscribe()
    }

    /// Record the outcome of `task_id` and wake every reader.
    pub(crate) fn publish(&self, task_id: &str, outcome: Published) {
        self.slots
            .lock()
            .entry(task_id.to_string())
            .or_insert_with(|| watch::channel(None).0)
            .send_replace(Some(outcome));
    }

    /// Publish `outcome` only if `task_id` has no result yet.
    pub(crate) fn publish_if_absent(&self, task_id: &str, outcome: Published) -> bool {
        let mut slots = self.slots.lock();
        let slot = slots
            .entry(task_id.to_string())
            .or_insert_with(|| watch::channel(None).0);
        if slot.borrow().is_some() {
            return false;
        }
        slot.send_replace(Some(outcome));
        true
    }

    /// Wait until `task_id` has published.
    pub(crate) async fn wait(&self, task_id: &str) -> Result<Published> {
        let mut receiver = self.slot(task_id);
        let value = receiver
            .wait_for(Option::is_some)
            .await
            .map_err(|_| {
                DagError::Execution(format!("result of '{task_id}' dropped before publication"))
            })?;
        Ok(value.clone().unwrap_or_else(|| Err("no result".into())))
    }

    /// Merge the successful results of `task_ids`, later ids winning.
    pub(crate) fn collect(&self, task_ids: &[String]) -> TaskData {
        let slots = self.slots.lock();
        let mut merged = TaskData::new();
        for id in task_ids {
            if let Some(Some(Ok(data))) = slots.get(id).map(|slot| slot.borrow().clone()) {
                merged.extend(data);
            }
        }
        merged
    }

    /// Drop every slot. Pending readers fail.
    pub(crate) fn clear(&self) {
        self.slots.lock().clear();
    }
}
