use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::Mutex;

use super::CallbackHandler;
use crate::context::{Context, Event, EventKind};
use crate::types::Status;

#[derive(Default)]
struct Counts {
    running: usize,
    last: HashMap<String, Status>,
}

/// Number of DAGs currently `RUNNING`, as seen through status events.
#[derive(Default)]
pub struct DagExecutionCounter {
    counts: Mutex<Counts>,
}

impl DagExecutionCounter {
    pub const TYPE_TAG: &'static str = "dag_execution_counter";

    pub fn new() -> Self {
        Self::default()
    }

    pub fn running(&self) -> usize {
        self.counts.lock().running
    }
}

#[async_trait]
impl CallbackHandler for DagExecutionCounter {
    fn type_tag(&self) -> &str {
        Self::TYPE_TAG
    }

    fn is_event_handled(&self, event: &Event) -> bool {
        event.sender.is_dag() && event.kind == EventKind::Status
    }

    async fn on_handled_event(&self, _ctx: &Context, event: &Event) -> bool {
        let Some(status) = event.status_value() else {
            return false;
        };
        let mut counts = self.counts.lock();
        let previous = counts.last.insert(event.sender.id.clone(), status);
        match (previous == Some(Status::Running), status == Status::Running) {
            (false, true) => counts.running += 1,
            (true, false) => counts.running = counts.running.saturating_sub(1),
            _ => {}
        }
        false
    }
}
