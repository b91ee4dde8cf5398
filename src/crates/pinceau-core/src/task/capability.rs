//! Capability traits a task implementation opts into.
//!
//! A task type implements [`TaskBehavior`] and exposes, through the `as_*`
//! accessors, which of the three capabilities it has:
//!
//! - [`Processor`] - one call, one result (`NORMAL` mode)
//! - [`StreamProcessor`] - `before`, a stream of items, `after` (`GENERATOR` mode)
//! - [`Router`] - picks which outgoing edges fire
//!
//! The accessors are read once, when the task is assembled, to fix its
//! [`ProcessMode`](crate::ProcessMode) and how its default edges resolve.

use async_trait::async_trait;
use futures::stream::BoxStream;

use crate::contract::TaskDataContract;
use crate::error::Result;
use crate::node::TaskNode;
use crate::task::Activation;
use crate::types::{EdgeKind, Status, TaskData};

/// Result of a single-shot activation.
///
/// `route`, when set, restricts which downstream tasks fire to the listed ids
/// (filtered against the node's usable edges).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TaskOutput {
    pub data: TaskData,
    pub route: Option<Vec<String>>,
}

impl TaskOutput {
    pub fn new(data: TaskData) -> Self {
        Self { data, route: None }
    }

    pub fn routed(data: TaskData, route: Vec<String>) -> Self {
        Self {
            data,
            route: Some(route),
        }
    }
}

impl From<TaskData> for TaskOutput {
    fn from(data: TaskData) -> Self {
        Self::new(data)
    }
}

/// Single-shot processing.
#[async_trait]
pub trait Processor: Send + Sync {
    async fn process(&self, scope: &Activation<'_>, input: TaskData) -> Result<TaskOutput>;
}

/// Streaming processing with once-per-activation hooks.
#[async_trait]
pub trait StreamProcessor: Send + Sync {
    /// Runs once before the stream; its result fires `LOOP_START` edges.
    async fn before(&self, _scope: &Activation<'_>, input: &TaskData) -> Result<TaskData> {
        Ok(input.clone())
    }

    /// Items, each firing the task's `LOOP` edges.
    fn stream<'a>(
        &'a self,
        scope: &'a Activation<'a>,
        input: TaskData,
    ) -> BoxStream<'a, Result<TaskData>>;

    /// Runs once after the stream; its result fires `LOOP_END` edges.
    async fn after(&self, _scope: &Activation<'_>, input: &TaskData) -> Result<TaskData> {
        Ok(input.clone())
    }
}

/// Custom choice of downstream tasks.
pub trait Router: Send + Sync {
    /// Ids of the tasks to fire for `kind`, a subset of `node`'s usable targets.
    fn tasks_after(&self, node: &TaskNode, kind: EdgeKind) -> Vec<String>;
}

/// A task type.
///
/// Contracts receive the task's effective parameters so that they can depend on
/// persisted variant parameters as well as constructor parameters.
pub trait TaskBehavior: Send + Sync + 'static {
    /// Fails when the contract cannot be resolved, e.g. a missing referenced DAG.
    fn required_inputs(&self, _params: &TaskData) -> Result<TaskDataContract> {
        Ok(TaskDataContract::new())
    }

    /// Outputs of the task alone, before any passthrough merge.
    fn provided_outputs(&self, _params: &TaskData) -> Result<TaskDataContract> {
        Ok(TaskDataContract::new())
    }

    fn default_passthrough(&self) -> bool {
        false
    }

    fn default_label(&self, _params: &TaskData) -> Option<String> {
        None
    }

    fn as_processor(&self) -> Option<&dyn Processor> {
        None
    }

    fn as_stream_processor(&self) -> Option<&dyn StreamProcessor> {
        None
    }

    fn as_router(&self) -> Option<&dyn Router> {
        None
    }

    /// The processor returns routing decisions in [`TaskOutput::route`].
    fn routes_dynamically(&self) -> bool {
        false
    }

    /// Called after every status change of the owning task.
    fn on_status(&self, _status: Status) {}
}
