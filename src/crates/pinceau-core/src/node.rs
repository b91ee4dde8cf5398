//! [`TaskNode`]: a task bound to its incoming and outgoing edges.

use std::sync::Arc;

use crate::edge::TaskEdge;
use crate::task::Task;
use crate::types::{EdgeKind, ProcessMode};

/// A task plus its edges. Identity is the task id.
#[derive(Clone)]
pub struct TaskNode {
    task: Arc<Task>,
    sub_edges: Vec<TaskEdge>,
    parent_edges: Vec<TaskEdge>,
}

impl TaskNode {
    pub fn new(task: Arc<Task>) -> Self {
        Self {
            task,
            sub_edges: Vec::new(),
            parent_edges: Vec::new(),
        }
    }

    pub fn id(&self) -> &str {
        self.task.id()
    }

    pub fn task(&self) -> &Arc<Task> {
        &self.task
    }

    /// Outgoing edges.
    pub fn sub_edges(&self) -> &[TaskEdge] {
        &self.sub_edges
    }

    /// Incoming edges.
    pub fn parent_edges(&self) -> &[TaskEdge] {
        &self.parent_edges
    }

    /// Resolve a `Default` edge kind from this node's task capabilities.
    pub fn resolve_kind(&self, kind: EdgeKind) -> EdgeKind {
        if kind != EdgeKind::Default {
            return kind;
        }
        if self.task.mode() == ProcessMode::Generator {
            EdgeKind::Loop
        } else if self.task.routes_conditionally() {
            EdgeKind::Conditional
        } else {
            EdgeKind::Direct
        }
    }

    /// Outgoing edges in the bucket selected by `kind`.
    pub fn usable_sub_edges(&self, kind: EdgeKind) -> impl Iterator<Item = &TaskEdge> {
        self.sub_edges
            .iter()
            .filter(move |edge| EdgeKind::admits(kind, edge.kind))
    }

    /// Target ids of [`usable_sub_edges`](Self::usable_sub_edges), deduplicated.
    pub fn usable_targets(&self, kind: EdgeKind) -> Vec<String> {
        let mut targets: Vec<String> = Vec::new();
        for edge in self.usable_sub_edges(kind) {
            if !targets.contains(&edge.to_id) {
                targets.push(edge.to_id.clone());
            }
        }
        targets
    }

    pub(crate) fn push_sub_edge(&mut self, edge: TaskEdge) {
        self.sub_edges.push(edge);
    }

    pub(crate) fn push_parent_edge(&mut self, edge: TaskEdge) {
        self.parent_edges.push(edge);
    }

    /// Remove and return the outgoing edges selected by `kind`.
    pub(crate) fn take_sub_edges(&mut self, kind: EdgeKind) -> Vec<TaskEdge> {
        let (taken, kept) = std::mem::take(&mut self.sub_edges)
            .into_iter()
            .partition(|edge| EdgeKind::admits(kind, edge.kind));
        self.sub_edges = kept;
        taken
    }

    pub(crate) fn drop_sub_edge(&mut self, edge: &TaskEdge) {
        self.sub_edges.retain(|sub| sub != edge);
    }

    pub(crate) fn drop_parent_edge(&mut self, edge: &TaskEdge) {
        self.parent_edges.retain(|parent| parent != edge);
    }

    /// Same edges around another task instance.
    pub(crate) fn with_task(&self, task: Arc<Task>) -> Self {
        Self {
            task,
            sub_edges: self.sub_edges.clone(),
            parent_edges: self.parent_edges.clone(),
        }
    }
}

impl std::fmt::Debug for TaskNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskNode")
            .field("id", &self.id())
            .field("sub_edges", &self.sub_edges)
            .field("parent_edges", &self.parent_edges)
            .finish()
    }
}
