use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;

use crate::error::Result;
use crate::node::TaskNode;
use crate::task::{Activation, Processor, Router, TaskBehavior, TaskFactory, TaskOutput};
use crate::types::{EdgeKind, Status, TaskData};

/// Passes its input to one child per activation, cycling through its usable
/// edges. The cycle restarts whenever the task goes back to `IDLE`.
#[derive(Debug, Default)]
pub struct RoundRobinTask {
    index: AtomicUsize,
}

impl RoundRobinTask {
    pub const TYPE_TAG: &'static str = "round_robin";

    pub fn factory() -> TaskFactory {
        TaskFactory::new(Self::TYPE_TAG, |_| Ok(Arc::new(RoundRobinTask::default())))
    }
}

impl TaskBehavior for RoundRobinTask {
    fn default_passthrough(&self) -> bool {
        true
    }

    fn as_processor(&self) -> Option<&dyn Processor> {
        Some(self)
    }

    fn as_router(&self) -> Option<&dyn Router> {
        Some(self)
    }

    fn on_status(&self, status: Status) {
        if status == Status::Idle {
            self.index.store(0, Ordering::SeqCst);
        }
    }
}

#[async_trait]
impl Processor for RoundRobinTask {
    async fn process(&self, _scope: &Activation<'_>, input: TaskData) -> Result<TaskOutput> {
        Ok(input.into())
    }
}

impl Router for RoundRobinTask {
    fn tasks_after(&self, node: &TaskNode, kind: EdgeKind) -> Vec<String> {
        let usable: Vec<&str> = node
            .usable_sub_edges(kind)
            .map(|edge| edge.to_id.as_str())
            .collect();
        if usable.is_empty() {
            return Vec::new();
        }
        let turn = self.index.fetch_add(1, Ordering::SeqCst) % usable.len();
        vec![usable[turn].to_string()]
    }
}
