//! Status tracers used by tests and monitoring.

use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::time::{Duration, Instant};

use super::CallbackHandler;
use crate::context::{Context, Event, EventKind};
use crate::types::Status;

#[derive(Default)]
struct TaskTraces {
    first_seen: Vec<String>,
    traces: HashMap<String, Vec<(Status, Instant)>>,
    timeline: Vec<(String, Status)>,
}

/// Records every task status transition with a monotonic timestamp.
///
/// Keys are full task ids (`"<dag id>::<task id>"`).
#[derive(Default)]
pub struct TasksExecutionTracer {
    state: Mutex<TaskTraces>,
}

impl TasksExecutionTracer {
    pub const TYPE_TAG: &'static str = "tasks_execution_tracer";

    pub fn new() -> Self {
        Self::default()
    }

    /// Full ids of every task seen, in first-seen order.
    pub fn known_tasks(&self) -> Vec<String> {
        self.state.lock().first_seen.clone()
    }

    /// Successive statuses of one task.
    pub fn statuses(&self, full_id: &str) -> Vec<Status> {
        self.state
            .lock()
            .traces
            .get(full_id)
            .map(|trace| trace.iter().map(|(status, _)| *status).collect())
            .unwrap_or_default()
    }

    /// How many times a task entered `status`.
    pub fn count(&self, full_id: &str, status: Status) -> usize {
        self.statuses(full_id)
            .into_iter()
            .filter(|s| *s == status)
            .count()
    }

    /// Every transition in arrival order.
    pub fn timeline(&self) -> Vec<(String, Status)> {
        self.state.lock().timeline.clone()
    }

    /// For each time the task entered `status`: when, and how long until the next
    /// transition (`None` while still in it).
    pub fn task_status_start_durations(
        &self,
        full_id: &str,
        status: Status,
    ) -> Vec<(Instant, Option<Duration>)> {
        let state = self.state.lock();
        let Some(trace) = state.traces.get(full_id) else {
            return Vec::new();
        };
        trace
            .iter()
            .enumerate()
            .filter(|(_, (s, _))| *s == status)
            .map(|(i, (_, start))| {
                let end = trace.get(i + 1).map(|(_, next)| next.duration_since(*start));
                (*start, end)
            })
            .collect()
    }

    pub fn clear(&self) {
        *self.state.lock() = TaskTraces::default();
    }
}

#[async_trait]
impl CallbackHandler for TasksExecutionTracer {
    fn type_tag(&self) -> &str {
        Self::TYPE_TAG
    }

    fn is_event_handled(&self, event: &Event) -> bool {
        event.sender.is_task() && event.kind == EventKind::Status
    }

    async fn on_handled_event(&self, _ctx: &Context, event: &Event) -> bool {
        let Some(status) = event.status_value() else {
            return false;
        };
        let id = event.sender.id.clone();
        let mut state = self.state.lock();
        if !state.traces.contains_key(&id) {
            state.first_seen.push(id.clone());
        }
        state
            .traces
            .entry(id.clone())
            .or_default()
            .push((status, Instant::now()));
        state.timeline.push((id, status));
        false
    }
}

/// Records DAG status transitions.
#[derive(Default)]
pub struct DagExecutionTracer {
    statuses: Mutex<Vec<(String, Status)>>,
}

impl DagExecutionTracer {
    pub const TYPE_TAG: &'static str = "dag_execution_tracer";

    pub fn new() -> Self {
        Self::default()
    }

    pub fn last_status(&self) -> Option<Status> {
        self.statuses.lock().last().map(|(_, status)| *status)
    }

    /// `(dag id, status)` in arrival order.
    pub fn statuses(&self) -> Vec<(String, Status)> {
        self.statuses.lock().clone()
    }
}

#[async_trait]
impl CallbackHandler for DagExecutionTracer {
    fn type_tag(&self) -> &str {
        Self::TYPE_TAG
    }

    fn is_event_handled(&self, event: &Event) -> bool {
        event.sender.is_dag() && event.kind == EventKind::Status
    }

    async fn on_handled_event(&self, _ctx: &Context, event: &Event) -> bool {
        if let Some(status) = event.status_value() {
            self.statuses.lock().push((event.sender.id.clone(), status));
        }
        false
    }
}
