//! Explicit construction of [`TaskDag`]s.

use std::sync::Arc;

use crate::dag::{DagParameters, TaskDag, TaskGraph};
use crate::element::GraphElement;
use crate::error::{DagError, Result};
use crate::id::DagId;
use crate::task::Task;
use crate::types::EdgeKind;

/// Collects tasks and edges, then validates them into a [`TaskDag`].
///
/// Edges may reference tasks added later; everything is checked in
/// [`build`](Self::build).
///
/// ```rust
/// use pinceau_core::dag::DagBuilder;
/// use pinceau_core::tasks::WaitTask;
/// use pinceau_core::task::TaskRecord;
/// use serde_json::json;
///
/// let wait = |id: &str, secs: u64| {
///     WaitTask::factory()
///         .create(TaskRecord::new("wait", id).with_param("wait_duration", json!(secs)))
///         .unwrap()
/// };
///
/// let dag = DagBuilder::new("test")
///     .label("Wait diamond")
///     .add(wait("wait_one", 0))
///     .add(wait("wait_two", 5))
///     .add(wait("wait_three", 10))
///     .add(wait("wait_five", 0))
///     .edge("wait_one", "wait_two")
///     .edge("wait_one", "wait_three")
///     .edge("wait_two", "wait_five")
///     .edge("wait_three", "wait_five")
///     .build()
///     .unwrap();
///
/// assert_eq!(dag.root_tasks().len(), 1);
/// assert_eq!(dag.leaf_tasks()[0].id(), "wait_five");
/// ```
#[derive(Debug)]
pub struct DagBuilder {
    id: String,
    label: String,
    description: String,
    tags: Vec<String>,
    params: DagParameters,
    tasks: Vec<Arc<Task>>,
    edges: Vec<(String, String, EdgeKind)>,
}

impl DagBuilder {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            label: String::new(),
            description: String::new(),
            tags: Vec::new(),
            params: DagParameters::default(),
            tasks: Vec::new(),
            edges: Vec::new(),
        }
    }

    pub fn add(&mut self, task: Arc<Task>) -> &mut Self {
        self.tasks.push(task);
        self
    }

    /// `DEFAULT` edge, resolved from the source task when built.
    pub fn edge(&mut self, from: impl Into<String>, to: impl Into<String>) -> &mut Self {
        self.edge_kind(from, to, EdgeKind::Default)
    }

    pub fn edge_kind(
        &mut self,
        from: impl Into<String>,
        to: impl Into<String>,
        kind: EdgeKind,
    ) -> &mut Self {
        self.edges.push((from.into(), to.into(), kind));
        self
    }

    /// Fired once per generator activation, before the first item.
    pub fn loop_start(&mut self, generator: impl Into<String>, task: impl Into<String>) -> &mut Self {
        self.edge_kind(generator, task, EdgeKind::LoopStart)
    }

    /// Fired once per generator activation, after the last item.
    pub fn loop_end(&mut self, generator: impl Into<String>, task: impl Into<String>) -> &mut Self {
        self.edge_kind(generator, task, EdgeKind::LoopEnd)
    }

    /// `DEFAULT` edges between consecutive ids.
    pub fn chain<I, S>(&mut self, ids: I) -> &mut Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let ids: Vec<String> = ids.into_iter().map(Into::into).collect();
        for pair in ids.windows(2) {
            self.edge(pair[0].clone(), pair[1].clone());
        }
        self
    }

    pub fn label(&mut self, label: impl Into<String>) -> &mut Self {
        self.label = label.into();
        self
    }

    pub fn description(&mut self, description: impl Into<String>) -> &mut Self {
        self.description = description.into();
        self
    }

    pub fn tag(&mut self, tag: impl Into<String>) -> &mut Self {
        self.tags.push(tag.into());
        self
    }

    pub fn worker_tag(&mut self, tag: impl Into<String>) -> &mut Self {
        self.params.required_worker_tag = Some(tag.into());
        self
    }

    pub fn params(&mut self, params: DagParameters) -> &mut Self {
        self.params = params;
        self
    }

    /// Validate and assemble. The builder is left empty.
    pub fn build(&mut self) -> Result<Arc<TaskDag>> {
        let id: DagId = self.id.parse()?;
        if id.job().is_some() {
            return Err(DagError::validation(format!(
                "'{id}' is a run id; build templates and clone them to run"
            )));
        }

        let mut graph = TaskGraph::new();
        for task in std::mem::take(&mut self.tasks) {
            graph.insert(task)?;
        }
        for (from, to, kind) in std::mem::take(&mut self.edges) {
            graph.add_child_task(&from, &to, kind)?;
        }
        graph.validate()?;

        let mut element = GraphElement::new(
            id.to_string(),
            std::mem::take(&mut self.label),
            std::mem::take(&mut self.description),
        );
        element.set_tags(std::mem::take(&mut self.tags));
        let mut params = std::mem::take(&mut self.params);
        for tag in element.tags() {
            if !params.tags.contains(tag) {
                params.tags.push(tag.clone());
            }
        }

        tracing::debug!(dag = %id, tasks = graph.len(), "dag built");
        Ok(Arc::new(TaskDag::from_parts(id, element, params, graph)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::TaskRecord;
    use crate::tasks::{RangeTask, WaitTask};
    use serde_json::json;

    fn wait(id: &str) -> Arc<Task> {
        WaitTask::factory()
            .create(TaskRecord::new("wait", id).with_param("wait_duration", json!(0)))
            .unwrap()
    }

    #[test]
    fn test_chain_and_unknown_endpoint() {
        let dag = DagBuilder::new("chain")
            .add(wait("a"))
            .add(wait("b"))
            .add(wait("c"))
            .chain(["a", "b", "c"])
            .build()
            .unwrap();
        assert_eq!(dag.node("b").unwrap().parent_edges()[0].from_id, "a");

        let err = DagBuilder::new("broken")
            .add(wait("a"))
            .edge("a", "ghost")
            .build()
            .unwrap_err();
        assert!(matches!(err, DagError::Validation(_)));
    }

    #[test]
    fn test_duplicate_ids_are_rejected() {
        let err = DagBuilder::new("dup")
            .add(wait("a"))
            .add(wait("a"))
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("duplicate task id 'a'"));
    }

    #[test]
    fn test_loop_edges_from_generator() {
        let range = RangeTask::factory()
            .create(TaskRecord::new("range", "range"))
            .unwrap();
        let dag = DagBuilder::new("gen")
            .add(range)
            .add(wait("before"))
            .add(wait("item"))
            .add(wait("after"))
            .loop_start("range", "before")
            .edge("range", "item")
            .loop_end("range", "after")
            .build()
            .unwrap();

        let node = dag.node("range").unwrap();
        let kinds: Vec<EdgeKind> = node.sub_edges().iter().map(|e| e.kind).collect();
        assert_eq!(
            kinds,
            vec![EdgeKind::LoopStart, EdgeKind::Loop, EdgeKind::LoopEnd]
        );
    }

    #[test]
    fn test_job_ids_cannot_be_built() {
        assert!(DagBuilder::new("test:1").add(wait("a")).build().is_err());
    }
}
