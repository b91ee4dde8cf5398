//! The view a task gets of its own activation.

use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::context::{Context, Event, EventSender};
use crate::dag::TaskDag;
use crate::error::{DagError, Result};
use crate::task::Task;
use crate::types::{EdgeKind, TaskData};

/// Summary of a task reachable from the running one.
#[derive(Debug, Clone, PartialEq)]
pub struct DownstreamTask {
    pub id: String,
    pub label: String,
    pub description: String,
    pub kind: EdgeKind,
}

/// Borrowed handles on the context, the DAG and the task being activated.
#[derive(Clone, Copy)]
pub struct Activation<'a> {
    ctx: &'a Context,
    dag: &'a TaskDag,
    task: &'a Arc<Task>,
}

impl<'a> Activation<'a> {
    pub fn new(ctx: &'a Context, dag: &'a TaskDag, task: &'a Arc<Task>) -> Self {
        Self { ctx, dag, task }
    }

    pub fn context(&self) -> &'a Context {
        self.ctx
    }

    pub fn dag(&self) -> &'a TaskDag {
        self.dag
    }

    pub fn task(&self) -> &'a Arc<Task> {
        self.task
    }

    pub fn task_id(&self) -> &'a str {
        self.task.id()
    }

    pub fn params(&self) -> TaskData {
        self.task.params()
    }

    /// Call-time input: `input` overlaid by the task parameters.
    pub fn merged_input(&self, input: &TaskData) -> TaskData {
        let mut merged = input.clone();
        merged.extend(self.task.params());
        merged
    }

    /// Typed parameter lookup. Missing keys give `None`; values of the wrong
    /// shape fail the activation.
    pub fn param<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        match self.task.params().get(key) {
            None | Some(Value::Null) => Ok(None),
            Some(value) => serde_json::from_value(value.clone()).map(Some).map_err(|e| {
                DagError::task_execution(self.task.id(), format!("parameter '{key}': {e}"))
            }),
        }
    }

    /// Tasks reached through the outgoing edges selected by `kind`.
    pub fn downstream(&self, kind: EdgeKind) -> Vec<DownstreamTask> {
        self.dag.with_graph(|graph| {
            let Some(node) = graph.node(self.task.id()) else {
                return Vec::new();
            };
            node.usable_sub_edges(kind)
                .filter_map(|edge| {
                    graph.node(&edge.to_id).map(|target| DownstreamTask {
                        id: edge.to_id.clone(),
                        label: target.task().label(),
                        description: target.task().description(),
                        kind: edge.kind,
                    })
                })
                .collect()
        })
    }

    fn sender(&self) -> EventSender {
        EventSender::task(&self.dag.dag_id(), self.task.id())
    }

    /// Report run progress in `[0, 1]` through the owning DAG.
    pub async fn set_progress(&self, progress: f64) {
        self.dag.set_progress(self.ctx, progress).await;
    }

    pub async fn emit_data(&self, data: TaskData) {
        self.ctx.event(Event::data(self.sender(), data)).await;
    }

    /// Stream a chunk under `key`; `reset` starts the value over.
    pub async fn emit_stream(&self, key: &str, chunk: Value, reset: bool) {
        self.ctx
            .event(Event::stream(self.sender(), key, chunk, reset))
            .await;
    }

    pub async fn log(&self, message: impl Into<String>) {
        self.ctx.event(Event::log(self.sender(), message)).await;
    }

    /// Replace this task's outgoing edges with `clones`, each wired to every
    /// former target. Must be called before the task finishes.
    pub fn fork(&self, clones: Vec<Arc<Task>>) -> Result<()> {
        self.dag.splice_fan_out(self.task.id(), clones)
    }
}
