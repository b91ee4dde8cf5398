//! Tasks: the unit of computation of a DAG.
//!
//! A [`Task`] is assembled by a [`TaskFactory`] from a [`TaskRecord`] (type tag,
//! id, display metadata, parameters) and a [`TaskBehavior`] implementation. The
//! behavior decides what the task *does*; the task carries what the scheduler
//! needs around it:
//!
//! - identity and status ([`GraphElement`])
//! - effective parameters: persisted variant parameters overlaid by the
//!   task's own constructor parameters
//! - the passthrough flag and the processing mode, fixed at assembly
//! - the optional type-wide concurrency limit shared by every task its
//!   factory builds
//! - a per-instance activation lock, so a task never overlaps with itself
//!
//! ```rust
//! use pinceau_core::tasks::WaitTask;
//! use pinceau_core::task::TaskRecord;
//! use serde_json::json;
//!
//! let task = WaitTask::factory()
//!     .create(TaskRecord::new("wait", "pause").with_param("wait_duration", json!(2)))
//!     .unwrap();
//! assert_eq!(task.label(), "Wait 2s");
//! assert!(task.is_passthrough());
//! ```

mod activation;
mod capability;
mod registry;

use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::{Mutex, OwnedSemaphorePermit, Semaphore};

use crate::context::{Context, Event, EventSender};
use crate::contract::TaskDataContract;
use crate::element::GraphElement;
use crate::error::{DagError, Result};
use crate::node::TaskNode;
use crate::types::{EdgeKind, ProcessMode, Status, TaskData};

pub use activation::{Activation, DownstreamTask};
pub use capability::{Processor, Router, StreamProcessor, TaskBehavior, TaskOutput};
pub use registry::{TaskRegistry, WeakTaskRegistry};

/// Serialized task: everything needed to rebuild it through a [`TaskRegistry`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskRecord {
    #[serde(rename = "type")]
    pub type_tag: String,
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub passthrough: Option<bool>,
    /// Constructor parameters
    #[serde(default)]
    pub params: TaskData,
    /// Parameters applied from a DAG variant
    #[serde(default, skip_serializing_if = "TaskData::is_empty")]
    pub variant_params: TaskData,
}

impl TaskRecord {
    pub fn new(type_tag: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            type_tag: type_tag.into(),
            id: id.into(),
            label: None,
            description: None,
            tags: Vec::new(),
            passthrough: None,
            params: TaskData::new(),
            variant_params: TaskData::new(),
        }
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.push(tag.into());
        self
    }

    pub fn with_param(mut self, key: impl Into<String>, value: Value) -> Self {
        self.params.insert(key.into(), value);
        self
    }

    pub fn with_params(mut self, params: TaskData) -> Self {
        self.params.extend(params);
        self
    }

    pub fn passthrough(mut self, passthrough: bool) -> Self {
        self.passthrough = Some(passthrough);
        self
    }
}

type BuildFn = dyn Fn(&TaskRecord) -> Result<Arc<dyn TaskBehavior>> + Send + Sync;

/// Constructor for one task type, plus its optional type-wide concurrency limit.
#[derive(Clone)]
pub struct TaskFactory {
    type_tag: Arc<str>,
    build: Arc<BuildFn>,
    limit: Option<(usize, Arc<Semaphore>)>,
}

impl TaskFactory {
    pub fn new<F>(type_tag: impl AsRef<str>, build: F) -> Self
    where
        F: Fn(&TaskRecord) -> Result<Arc<dyn TaskBehavior>> + Send + Sync + 'static,
    {
        Self {
            type_tag: Arc::from(type_tag.as_ref()),
            build: Arc::new(build),
            limit: None,
        }
    }

    /// Share `permits` activations between every task this factory builds.
    /// Zero removes the limit.
    pub fn with_max_concurrency(mut self, permits: usize) -> Self {
        self.limit = (permits > 0).then(|| (permits, Arc::new(Semaphore::new(permits))));
        self
    }

    pub fn type_tag(&self) -> &str {
        &self.type_tag
    }

    pub fn max_concurrency(&self) -> Option<usize> {
        self.limit.as_ref().map(|(permits, _)| *permits)
    }

    /// Build a task from a record. An empty id gets a fresh UUID.
    pub fn create(&self, mut record: TaskRecord) -> Result<Arc<Task>> {
        if record.type_tag.is_empty() {
            record.type_tag = self.type_tag.to_string();
        }
        if record.type_tag != *self.type_tag {
            return Err(DagError::validation(format!(
                "record of type '{}' given to the '{}' factory",
                record.type_tag, self.type_tag
            )));
        }
        let behavior = (self.build)(&record)?;
        Task::assemble(record, behavior, self.clone()).map(Arc::new)
    }
}

impl fmt::Debug for TaskFactory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskFactory")
            .field("type_tag", &self.type_tag)
            .field("max_concurrency", &self.max_concurrency())
            .finish()
    }
}

/// What changes when a task is cloned.
#[derive(Debug, Clone, Default)]
pub struct TaskOverrides {
    pub id: Option<String>,
    pub label: Option<String>,
    /// Merged over the constructor parameters
    pub params: TaskData,
}

/// A task instance. Always shared as `Arc<Task>`.
pub struct Task {
    id: String,
    type_tag: String,
    element: RwLock<GraphElement>,
    own_params: TaskData,
    variant_params: RwLock<TaskData>,
    passthrough: bool,
    mode: ProcessMode,
    conditional: bool,
    behavior: Arc<dyn TaskBehavior>,
    factory: TaskFactory,
    dag_id: RwLock<String>,
    activation: Mutex<()>,
    spawn_guard: Mutex<()>,
}

impl Task {
    fn assemble(
        record: TaskRecord,
        behavior: Arc<dyn TaskBehavior>,
        factory: TaskFactory,
    ) -> Result<Self> {
        let mode = if behavior.as_stream_processor().is_some() {
            ProcessMode::Generator
        } else if behavior.as_processor().is_some() {
            ProcessMode::Normal
        } else {
            return Err(DagError::validation(format!(
                "task type '{}' implements neither Processor nor StreamProcessor",
                record.type_tag
            )));
        };

        let mut params = record.variant_params.clone();
        params.extend(record.params.clone());

        let label = record
            .label
            .clone()
            .or_else(|| behavior.default_label(&params))
            .unwrap_or_default();
        let description = record
            .description
            .clone()
            .unwrap_or_else(|| format!("{} task", record.type_tag));
        let mut element = GraphElement::new(record.id, label, description);
        element.set_tags(record.tags);

        Ok(Self {
            id: element.id().to_string(),
            type_tag: record.type_tag,
            element: RwLock::new(element),
            own_params: record.params,
            variant_params: RwLock::new(record.variant_params),
            passthrough: record
                .passthrough
                .unwrap_or_else(|| behavior.default_passthrough()),
            mode,
            conditional: behavior.as_router().is_some() || behavior.routes_dynamically(),
            behavior,
            factory,
            dag_id: RwLock::new(String::new()),
            activation: Mutex::new(()),
            spawn_guard: Mutex::new(()),
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn type_tag(&self) -> &str {
        &self.type_tag
    }

    pub fn label(&self) -> String {
        self.element.read().label().to_string()
    }

    pub fn description(&self) -> String {
        self.element.read().description().to_string()
    }

    /// Snapshot of identity and status.
    pub fn element(&self) -> GraphElement {
        self.element.read().clone()
    }

    pub fn status(&self) -> Status {
        self.element.read().status()
    }

    pub fn error(&self) -> Option<String> {
        self.element.read().error().map(str::to_string)
    }

    pub fn mode(&self) -> ProcessMode {
        self.mode
    }

    pub fn is_passthrough(&self) -> bool {
        self.passthrough
    }

    /// Default outgoing edges resolve to `CONDITIONAL`.
    pub fn routes_conditionally(&self) -> bool {
        self.conditional
    }

    pub fn behavior(&self) -> &Arc<dyn TaskBehavior> {
        &self.behavior
    }

    pub fn factory(&self) -> &TaskFactory {
        &self.factory
    }

    /// Id of the DAG the task belongs to, empty before it joins one.
    pub fn dag_id(&self) -> String {
        self.dag_id.read().clone()
    }

    /// `"<dag id>::<task id>"`
    pub fn full_id(&self) -> String {
        format!("{}::{}", self.dag_id.read(), self.id)
    }

    pub(crate) fn attach(&self, dag_id: &str) {
        *self.dag_id.write() = dag_id.to_string();
    }

    pub fn own_params(&self) -> &TaskData {
        &self.own_params
    }

    pub fn variant_params(&self) -> TaskData {
        self.variant_params.read().clone()
    }

    pub fn set_variant_params(&self, params: TaskData) {
        *self.variant_params.write() = params;
    }

    /// Variant parameters overlaid by constructor parameters.
    pub fn params(&self) -> TaskData {
        let mut params = self.variant_params.read().clone();
        params.extend(self.own_params.clone());
        params
    }

    pub fn required_inputs(&self) -> Result<TaskDataContract> {
        self.behavior.required_inputs(&self.params())
    }

    /// Declared outputs; a passthrough task adds them to `parent` (own entries win).
    pub fn provided_outputs(&self, parent: Option<&TaskDataContract>) -> Result<TaskDataContract> {
        let own = self.behavior.provided_outputs(&self.params())?;
        Ok(match parent {
            Some(parent) if self.passthrough => own
                .iter()
                .fold(parent.clone(), |merged, (key, contract)| {
                    merged.with(key, contract.clone())
                }),
            _ => own,
        })
    }

    /// Ids of the downstream tasks to fire for `kind`.
    ///
    /// A routing decision returned by the processor wins; then the behavior's
    /// [`Router`]; otherwise every usable target.
    pub fn tasks_after(
        &self,
        node: &TaskNode,
        kind: EdgeKind,
        route: Option<&[String]>,
    ) -> Vec<String> {
        let usable = node.usable_targets(kind);
        if let Some(route) = route {
            return usable
                .into_iter()
                .filter(|id| route.contains(id))
                .collect();
        }
        match self.behavior.as_router() {
            Some(router) => router
                .tasks_after(node, kind)
                .into_iter()
                .filter(|id| usable.contains(id))
                .collect(),
            None => usable,
        }
    }

    /// Emit the status event, then record the status.
    pub async fn set_status(&self, ctx: &Context, status: Status, error: Option<String>) {
        let sender = EventSender::task(&self.dag_id.read(), &self.id);
        ctx.event(Event::status(sender, status, error.as_deref()))
            .await;
        self.element.write().set_status(status, error);
        self.behavior.on_status(status);
        tracing::debug!(task = %self.id, %status, "task status");
    }

    /// Atomically flip to `WAITING` unless an activation is already pending
    /// (`WAITING` or `SCHEDULED`). `true` when the caller owns the spawn.
    pub(crate) async fn try_mark_waiting(&self, ctx: &Context) -> bool {
        let _guard = self.spawn_guard.lock().await;
        if matches!(self.status(), Status::Waiting | Status::Scheduled) {
            return false;
        }
        self.set_status(ctx, Status::Waiting, None).await;
        true
    }

    pub(crate) fn activation_lock(&self) -> &Mutex<()> {
        &self.activation
    }

    /// Permit of the type-wide limit, when one is configured.
    pub(crate) async fn acquire_permit(&self) -> Result<Option<OwnedSemaphorePermit>> {
        match &self.factory.limit {
            Some((_, semaphore)) => semaphore
                .clone()
                .acquire_owned()
                .await
                .map(Some)
                .map_err(|e| DagError::Execution(format!("concurrency limit closed: {e}"))),
            None => Ok(None),
        }
    }

    /// Serializable form.
    pub fn record(&self) -> TaskRecord {
        let element = self.element.read();
        TaskRecord {
            type_tag: self.type_tag.clone(),
            id: self.id.clone(),
            label: Some(element.label().to_string()),
            description: Some(element.description().to_string()),
            tags: element.tags().to_vec(),
            passthrough: Some(self.passthrough),
            params: self.own_params.clone(),
            variant_params: self.variant_params.read().clone(),
        }
    }

    /// New instance through the same factory, sharing its concurrency limit.
    pub fn clone_with(&self, overrides: TaskOverrides) -> Result<Arc<Task>> {
        let mut record = self.record();
        if let Some(id) = overrides.id {
            record.id = id;
        }
        if let Some(label) = overrides.label {
            record.label = Some(label);
        }
        record.params.extend(overrides.params);
        self.factory.create(record)
    }
}

impl fmt::Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task")
            .field("id", &self.id)
            .field("type", &self.type_tag)
            .field("mode", &self.mode)
            .field("status", &self.status())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::contract::{KeyContract, ValueType};
    use crate::tasks::FunctionTask;
    use serde_json::json;

    fn echo_factory() -> TaskFactory {
        FunctionTask::factory(
            "echo",
            TaskDataContract::new().with("x", KeyContract::new(ValueType::Integer)),
            TaskDataContract::new().with("y", KeyContract::new(ValueType::String)),
            |input| async move { Ok(input) },
        )
    }

    #[test]
    fn test_params_overlay_variant_with_own() {
        let task = echo_factory()
            .create(TaskRecord::new("echo", "e").with_param("a", json!(1)))
            .unwrap();
        let mut variant = TaskData::new();
        variant.insert("a".into(), json!(0));
        variant.insert("b".into(), json!(2));
        task.set_variant_params(variant);

        let params = task.params();
        assert_eq!(params["a"], json!(1));
        assert_eq!(params["b"], json!(2));
    }

    #[test]
    fn test_passthrough_outputs_add_to_parent() {
        let task = echo_factory()
            .create(TaskRecord::new("echo", "e").passthrough(true))
            .unwrap();
        let parent = TaskDataContract::new()
            .with("x", KeyContract::new(ValueType::Integer))
            .with("y", KeyContract::new(ValueType::Integer));

        let outputs = task.provided_outputs(Some(&parent)).unwrap();
        assert_eq!(outputs.keys().collect::<Vec<_>>(), vec!["x", "y"]);
        assert_eq!(outputs.get("y").unwrap().value_type, ValueType::String);

        let plain = echo_factory().create(TaskRecord::new("echo", "p")).unwrap();
        assert_eq!(plain.provided_outputs(Some(&parent)).unwrap().len(), 1);
    }

    #[test]
    fn test_clone_keeps_type_and_limit() {
        let factory = echo_factory().with_max_concurrency(2);
        let task = factory
            .create(TaskRecord::new("echo", "e").with_param("k", json!("v")))
            .unwrap();
        let copy = task
            .clone_with(TaskOverrides {
                id: Some("e_1".into()),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(copy.id(), "e_1");
        assert_eq!(copy.params()["k"], json!("v"));
        assert_eq!(copy.factory().max_concurrency(), Some(2));
    }

    #[test]
    fn test_factory_rejects_foreign_records() {
        let err = echo_factory()
            .create(TaskRecord::new("wait", "w"))
            .unwrap_err();
        assert!(matches!(err, DagError::Validation(_)));
    }

    #[tokio::test]
    async fn test_waiting_flip_happens_once() {
        let task = echo_factory().create(TaskRecord::new("echo", "e")).unwrap();
        let ctx = Context::global();
        assert!(task.try_mark_waiting(&ctx).await);
        assert!(!task.try_mark_waiting(&ctx).await);
        assert_eq!(task.status(), Status::Waiting);

        task.set_status(&ctx, Status::Scheduled, None).await;
        assert!(!task.try_mark_waiting(&ctx).await);
        task.set_status(&ctx, Status::Running, None).await;
        assert!(task.try_mark_waiting(&ctx).await);
    }
}
