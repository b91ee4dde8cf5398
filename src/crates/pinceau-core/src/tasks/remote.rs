//! Deferred execution of a task on a worker.
//!
//! A [`RemoteTask`] wraps a `NORMAL` task. When activated it ships the wrapped
//! task's record, the serialized context and the input to the
//! [`TaskDispatcher`] found in the context (as a [`RemoteDispatch`]
//! extension), on the queue named by `worker_tag` or by the DAG's
//! `required_worker_tag`. The result is merged over the input.
//!
//! [`LocalDispatcher`] is the in-process worker: it rebuilds the task and the
//! context from their records and runs the task as a one-task DAG.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::callbacks::HandlerRegistry;
use crate::context::{Context, ContextRecord};
use crate::contract::TaskDataContract;
use crate::dag::{DagBuilder, RunOptions};
use crate::error::{DagError, Result};
use crate::task::{
    Activation, Processor, Task, TaskBehavior, TaskFactory, TaskOutput, TaskRecord, TaskRegistry,
    WeakTaskRegistry,
};
use crate::types::{ProcessMode, TaskData};

/// Queue used when neither the task nor its DAG names one.
pub const DEFAULT_QUEUE: &str = "default";

/// Everything a worker needs to run a task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteRequest {
    pub task: TaskRecord,
    pub context: ContextRecord,
    pub input: TaskData,
}

/// Sends task requests to workers and waits for their result.
#[async_trait]
pub trait TaskDispatcher: Send + Sync {
    async fn send_task(&self, queue: &str, request: RemoteRequest) -> Result<TaskData>;
}

/// Context extension carrying the dispatcher remote tasks use.
#[derive(Clone)]
pub struct RemoteDispatch(pub Arc<dyn TaskDispatcher>);

pub struct RemoteTask {
    inner: Arc<Task>,
}

impl RemoteTask {
    pub const TYPE_TAG: &'static str = "remote";

    /// `remote` tasks build the wrapped task, given under the `task` parameter,
    /// through `registry`.
    pub fn factory(registry: WeakTaskRegistry) -> TaskFactory {
        TaskFactory::new(Self::TYPE_TAG, move |record| {
            let registry = registry
                .upgrade()
                .ok_or_else(|| DagError::Execution("task registry dropped".into()))?;
            let wrapped = record.params.get("task").cloned().ok_or_else(|| {
                DagError::validation(format!("remote task '{}' needs a 'task' record", record.id))
            })?;
            let inner = registry.create(serde_json::from_value(wrapped)?)?;
            if inner.mode() != ProcessMode::Normal {
                return Err(DagError::validation(format!(
                    "remote task '{}' can only wrap a normal task, '{}' is a generator",
                    record.id,
                    inner.id()
                )));
            }
            Ok(Arc::new(RemoteTask { inner }))
        })
    }

    /// Record of a `remote` task wrapping `inner`.
    pub fn wrap(id: impl Into<String>, inner: &Task) -> Result<TaskRecord> {
        Ok(TaskRecord::new(Self::TYPE_TAG, id)
            .with_label(inner.label())
            .with_param("task", serde_json::to_value(inner.record())?))
    }

    pub fn inner(&self) -> &Arc<Task> {
        &self.inner
    }
}

impl TaskBehavior for RemoteTask {
    fn required_inputs(&self, _params: &TaskData) -> Result<TaskDataContract> {
        self.inner.required_inputs()
    }

    fn provided_outputs(&self, _params: &TaskData) -> Result<TaskDataContract> {
        self.inner.provided_outputs(None)
    }

    fn default_passthrough(&self) -> bool {
        self.inner.is_passthrough()
    }

    fn default_label(&self, _params: &TaskData) -> Option<String> {
        Some(self.inner.label())
    }

    fn as_processor(&self) -> Option<&dyn Processor> {
        Some(self)
    }
}

#[async_trait]
impl Processor for RemoteTask {
    async fn process(&self, scope: &Activation<'_>, input: TaskData) -> Result<TaskOutput> {
        let dispatch = scope.context().cast_as::<RemoteDispatch>()?;
        let queue = scope
            .params()
            .get("worker_tag")
            .and_then(Value::as_str)
            .map(str::to_string)
            .or_else(|| scope.dag().params().required_worker_tag)
            .unwrap_or_else(|| DEFAULT_QUEUE.to_string());

        let request = RemoteRequest {
            task: self.inner.record(),
            context: scope.context().serialize(),
            input: input.clone(),
        };
        tracing::debug!(task = scope.task_id(), %queue, "dispatching remote task");
        let result = dispatch
            .0
            .send_task(&queue, request)
            .await
            .map_err(|e| DagError::Remote(format!("{} on '{queue}': {e}", scope.task_id())))?;

        let mut output = input;
        output.extend(result);
        Ok(output.into())
    }
}

/// Runs requests in this process.
#[derive(Debug, Clone)]
pub struct LocalDispatcher {
    tasks: TaskRegistry,
    handlers: HandlerRegistry,
}

impl LocalDispatcher {
    pub fn new(tasks: TaskRegistry) -> Self {
        Self {
            tasks,
            handlers: HandlerRegistry::with_builtins(),
        }
    }

    pub fn with_handlers(mut self, handlers: HandlerRegistry) -> Self {
        self.handlers = handlers;
        self
    }
}

#[async_trait]
impl TaskDispatcher for LocalDispatcher {
    async fn send_task(&self, queue: &str, request: RemoteRequest) -> Result<TaskData> {
        let ctx = Context::deserialize(&request.context, &self.handlers)?;
        let task = self.tasks.create(request.task)?;
        let task_id = task.id().to_string();
        tracing::debug!(%queue, task = %task_id, "worker received task");

        let dag = DagBuilder::new(format!("{queue}.{task_id}")).add(task).build()?;
        dag.run_for_output(&ctx, request.input, RunOptions::default())
            .await
    }
}
