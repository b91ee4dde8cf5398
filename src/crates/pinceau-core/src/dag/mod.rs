//! DAGs of tasks and their execution.
//!
//! A [`TaskDag`] owns a [`TaskGraph`] arena, its display metadata and the
//! DAG-level parameters. It is always handled as `Arc<TaskDag>`: runs spawn
//! activations that keep the DAG alive until the run scope closes.
//!
//! # Lifecycle
//!
//! ```text
//! DagBuilder::build ──► template ──clone_dag──► variant / run instance ──run_dag──► FINISHED | ERROR
//! ```
//!
//! Templates are registered with a [`DagRegistry`](crate::DagRegistry); runs
//! happen on clones so every run gets its own result board and edge locks.
//!
//! # Contract analysis
//!
//! [`TaskDag::required_inputs`] walks from each leaf back to the roots. At
//! every task the parents' provided outputs are subtracted from what is still
//! required, and the parents' own requirements are added. A merge that fails
//! names the task where propagation broke.

mod builder;
mod graph;
mod group;
mod locks;
mod record;
mod results;
mod scheduler;

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::context::{Context, Event, EventSender};
use crate::contract::TaskDataContract;
use crate::element::GraphElement;
use crate::error::{DagError, Result};
use crate::id::DagId;
use crate::node::TaskNode;
use crate::task::{Task, TaskOverrides};
use crate::types::{Status, TaskData};

pub use builder::DagBuilder;
pub use graph::TaskGraph;
pub use record::{DagRecord, NodeRecord};
pub use scheduler::RunOptions;

/// Key of the DAG-level entry in a variant parameter map.
pub const DAG_PARAMS_KEY: &str = "__dag__";

/// DAG-level parameters.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DagParameters {
    /// Queue remote tasks of this DAG dispatch to
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub required_worker_tag: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    #[serde(flatten)]
    pub extra: TaskData,
}

pub struct TaskDag {
    id: DagId,
    original_id: String,
    element: RwLock<GraphElement>,
    params: RwLock<DagParameters>,
    graph: RwLock<TaskGraph>,
    running: AtomicBool,
}

impl TaskDag {
    pub(crate) fn from_parts(
        id: DagId,
        element: GraphElement,
        params: DagParameters,
        graph: TaskGraph,
    ) -> Self {
        let full_id = id.to_string();
        for node in graph.nodes() {
            node.task().attach(&full_id);
        }
        Self {
            original_id: id.template().to_string(),
            id,
            element: RwLock::new(element),
            params: RwLock::new(params),
            graph: RwLock::new(graph),
            running: AtomicBool::new(false),
        }
    }

    pub fn id(&self) -> &DagId {
        &self.id
    }

    /// Full id, `template[variant]:job`.
    pub fn dag_id(&self) -> String {
        self.id.to_string()
    }

    /// Template id shared by every variant and run of this DAG.
    pub fn template_id(&self) -> &str {
        &self.original_id
    }

    pub fn element(&self) -> GraphElement {
        self.element.read().clone()
    }

    pub fn label(&self) -> String {
        self.element.read().label().to_string()
    }

    pub fn status(&self) -> Status {
        self.element.read().status()
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn params(&self) -> DagParameters {
        self.params.read().clone()
    }

    pub fn set_params(&self, params: DagParameters) {
        *self.params.write() = params;
    }

    /// Run `f` against the current graph under the read lock.
    pub fn with_graph<R>(&self, f: impl FnOnce(&TaskGraph) -> R) -> R {
        f(&self.graph.read())
    }

    pub fn generation(&self) -> u64 {
        self.graph.read().generation()
    }

    pub fn len(&self) -> usize {
        self.graph.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.graph.read().is_empty()
    }

    pub fn task(&self, id: &str) -> Result<Arc<Task>> {
        self.graph
            .read()
            .node(id)
            .map(|node| node.task().clone())
            .ok_or_else(|| DagError::not_found("Task", id))
    }

    /// Snapshot of a node and its edges.
    pub fn node(&self, id: &str) -> Result<TaskNode> {
        self.graph
            .read()
            .node(id)
            .cloned()
            .ok_or_else(|| DagError::not_found("Task", id))
    }

    /// Tasks in insertion order.
    pub fn tasks(&self) -> Vec<Arc<Task>> {
        self.graph
            .read()
            .nodes()
            .map(|node| node.task().clone())
            .collect()
    }

    pub fn root_tasks(&self) -> Vec<Arc<Task>> {
        self.graph.read().roots()
    }

    pub fn leaf_tasks(&self) -> Vec<Arc<Task>> {
        self.graph.read().leaves()
    }

    /// Inputs the whole DAG needs from its caller.
    pub fn required_inputs(&self) -> Result<TaskDataContract> {
        let graph = self.graph.read();
        let mut analysis = ContractAnalysis::new(&graph);
        let mut required = TaskDataContract::new();
        for leaf in graph.leaves() {
            let leaf_required = analysis.required_inputs(leaf.id())?;
            if !required.add_all(&leaf_required) {
                return Err(DagError::contract(
                    leaf.id(),
                    format!("required inputs {leaf_required} conflict with other branches"),
                ));
            }
        }
        Ok(required)
    }

    /// Outputs the DAG's leaves provide.
    pub fn provided_outputs(&self) -> Result<TaskDataContract> {
        let graph = self.graph.read();
        let mut analysis = ContractAnalysis::new(&graph);
        let mut provided = TaskDataContract::new();
        for leaf in graph.leaves() {
            let leaf_provided = analysis.provided_outputs(leaf.id())?;
            if !provided.add_all(&leaf_provided) {
                return Err(DagError::contract(
                    leaf.id(),
                    format!("outputs {leaf_provided} conflict with other branches"),
                ));
            }
        }
        Ok(provided)
    }

    /// Check `input` against [`required_inputs`](Self::required_inputs).
    pub fn validate_input(&self, input: &TaskData) -> Result<()> {
        let problems = self.required_inputs()?.unmet(input);
        if problems.is_empty() {
            Ok(())
        } else {
            Err(DagError::contract(self.dag_id(), problems.join("; ")))
        }
    }

    /// Same structure, fresh tasks and runtime state. Without an id the clone
    /// becomes a run instance with a new job suffix.
    pub fn clone_dag(&self, id: Option<DagId>) -> Result<Arc<TaskDag>> {
        let id = id.unwrap_or_else(|| self.id.new_job());
        let graph = self
            .graph
            .read()
            .map_tasks(|task| task.clone_with(TaskOverrides::default()))?;

        let source = self.element.read();
        let mut element = GraphElement::new(id.to_string(), source.label(), source.description());
        element.set_tags(source.tags().iter().cloned());
        element.set_parent_id(Some(self.dag_id()));
        drop(source);

        let mut dag = TaskDag::from_parts(id, element, self.params(), graph);
        dag.original_id = self.original_id.clone();
        Ok(Arc::new(dag))
    }

    /// Apply a variant parameter map: task id to parameters, plus the
    /// DAG-level entry under [`DAG_PARAMS_KEY`]. Unknown task ids are skipped.
    pub fn apply_variant_params(&self, params: &TaskData) -> Result<()> {
        for (key, value) in params {
            if key == DAG_PARAMS_KEY {
                let dag_params: DagParameters = serde_json::from_value(value.clone())?;
                self.set_params(dag_params);
                continue;
            }
            let Value::Object(task_params) = value else {
                return Err(DagError::validation(format!(
                    "variant parameters for task '{key}' must be an object"
                )));
            };
            match self.task(key) {
                Ok(task) => task.set_variant_params(task_params.clone()),
                Err(_) => tracing::warn!(dag = %self.id, task = %key, "variant names an unknown task"),
            }
        }
        Ok(())
    }

    /// Variant parameters currently applied, in the shape
    /// [`apply_variant_params`](Self::apply_variant_params) accepts.
    pub fn variant_params(&self) -> Result<TaskData> {
        let mut params = TaskData::new();
        for task in self.tasks() {
            let task_params = task.variant_params();
            if !task_params.is_empty() {
                params.insert(task.id().to_string(), Value::Object(task_params));
            }
        }
        let dag_params = self.params();
        if dag_params != DagParameters::default() {
            params.insert(DAG_PARAMS_KEY.into(), serde_json::to_value(dag_params)?);
        }
        Ok(params)
    }

    /// Emit the DAG status event, then record the status.
    pub async fn set_status(&self, ctx: &Context, status: Status, error: Option<String>) {
        ctx.event(Event::status(
            EventSender::dag(self.dag_id()),
            status,
            error.as_deref(),
        ))
        .await;
        self.element.write().set_status(status, error);
        tracing::debug!(dag = %self.id, %status, "dag status");
    }

    pub async fn set_progress(&self, ctx: &Context, progress: f64) {
        ctx.event(Event::progress(
            EventSender::dag(self.dag_id()),
            progress.clamp(0.0, 1.0),
        ))
        .await;
    }

    /// Atomically replace the regular outgoing edges of `from` with `clones`.
    /// See [`TaskGraph::splice_fan_out`] for repeated splices.
    pub fn splice_fan_out(&self, from: &str, clones: Vec<Arc<Task>>) -> Result<()> {
        let dag_id = self.dag_id();
        for clone in &clones {
            clone.attach(&dag_id);
        }
        let shards = clones.len();
        let mut graph = self.graph.write();
        if !graph.splice_fan_out(from, clones)? {
            return Ok(());
        }
        tracing::info!(
            dag = %self.id,
            task = from,
            shards,
            generation = graph.generation(),
            "fan-out spliced into plan"
        );
        Ok(())
    }

    /// Monitoring snapshot: element plus nodes and edges.
    pub fn as_json(&self) -> Value {
        let graph = self.graph.read();
        let nodes: Vec<Value> = graph
            .nodes()
            .map(|node| {
                let mut task = node.task().element().as_json();
                if let Value::Object(fields) = &mut task {
                    fields.insert("type".into(), json!(node.task().type_tag()));
                }
                task
            })
            .collect();
        let edges: Vec<Value> = graph.edges().map(|edge| json!(edge)).collect();
        json!({
            "dag": self.element.read().as_json(),
            "templateId": self.original_id,
            "generation": graph.generation(),
            "nodes": nodes,
            "edges": edges,
        })
    }
}

impl std::fmt::Debug for TaskDag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskDag")
            .field("id", &self.dag_id())
            .field("status", &self.status())
            .field("tasks", &self.len())
            .finish()
    }
}

/// Memoized contract propagation over one graph snapshot.
struct ContractAnalysis<'g> {
    graph: &'g TaskGraph,
    required: HashMap<String, TaskDataContract>,
    provided: HashMap<String, TaskDataContract>,
}

impl<'g> ContractAnalysis<'g> {
    fn new(graph: &'g TaskGraph) -> Self {
        Self {
            graph,
            required: HashMap::new(),
            provided: HashMap::new(),
        }
    }

    fn parents(&self, id: &str) -> Result<(Arc<Task>, Vec<String>)> {
        let node = self
            .graph
            .node(id)
            .ok_or_else(|| DagError::not_found("Task", id))?;
        let mut parents: Vec<String> = Vec::new();
        for edge in node.parent_edges() {
            if !parents.contains(&edge.from_id) {
                parents.push(edge.from_id.clone());
            }
        }
        Ok((node.task().clone(), parents))
    }

    fn required_inputs(&mut self, id: &str) -> Result<TaskDataContract> {
        if let Some(known) = self.required.get(id) {
            return Ok(known.clone());
        }
        let (task, parents) = self.parents(id)?;
        let mut required = task.required_inputs()?;
        for parent in &parents {
            let provided = self.provided_outputs(parent)?;
            if !required.subtract_all(&provided) {
                return Err(DagError::contract(
                    id,
                    format!("'{parent}' provides {provided}, which does not match required {required}"),
                ));
            }
            let upstream = self.required_inputs(parent)?;
            if !required.add_all(&upstream) {
                return Err(DagError::contract(
                    id,
                    format!("requirements of '{parent}' {upstream} conflict with {required}"),
                ));
            }
        }
        self.required.insert(id.to_string(), required.clone());
        Ok(required)
    }

    fn provided_outputs(&mut self, id: &str) -> Result<TaskDataContract> {
        if let Some(known) = self.provided.get(id) {
            return Ok(known.clone());
        }
        let (task, parents) = self.parents(id)?;
        let provided = if parents.is_empty() {
            task.provided_outputs(None)?
        } else {
            let mut flowing = TaskDataContract::new();
            for parent in &parents {
                let upstream = self.provided_outputs(parent)?;
                if !flowing.add_all(&upstream) {
                    return Err(DagError::contract(
                        id,
                        format!("outputs of '{parent}' {upstream} conflict with {flowing}"),
                    ));
                }
            }
            task.provided_outputs(Some(&flowing))?
        };
        self.provided.insert(id.to_string(), provided.clone());
        Ok(provided)
    }
}
