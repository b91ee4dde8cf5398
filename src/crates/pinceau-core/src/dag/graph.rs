//! Node arena of a DAG.
//!
//! Nodes are stored by id with a separate insertion order. Every structural
//! change bumps [`TaskGraph::generation`], so readers holding an older
//! generation know the edge set moved under them. Mutations happen under the
//! DAG's write lock and are applied whole: a reader never observes a
//! half-detached fan-out.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;

use crate::edge::TaskEdge;
use crate::error::{DagError, Result};
use crate::node::TaskNode;
use crate::task::Task;
use crate::types::{EdgeKind, ProcessMode};

#[derive(Debug, Clone, Default)]
pub struct TaskGraph {
    order: Vec<String>,
    nodes: HashMap<String, TaskNode>,
    generation: u64,
    fan_outs: HashMap<String, FanOut>,
}

/// Clones currently spliced after a task, and the targets they replaced.
#[derive(Debug, Clone, Default)]
struct FanOut {
    clones: Vec<String>,
    targets: Vec<String>,
}

impl TaskGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of structural mutations applied so far.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.nodes.contains_key(id)
    }

    pub fn node(&self, id: &str) -> Option<&TaskNode> {
        self.nodes.get(id)
    }

    pub(crate) fn node_mut(&mut self, id: &str) -> Option<&mut TaskNode> {
        self.nodes.get_mut(id)
    }

    /// Nodes in insertion order.
    pub fn nodes(&self) -> impl Iterator<Item = &TaskNode> {
        self.order.iter().filter_map(|id| self.nodes.get(id))
    }

    pub fn task_ids(&self) -> &[String] {
        &self.order
    }

    /// Every edge once, source order.
    pub fn edges(&self) -> impl Iterator<Item = &TaskEdge> {
        self.nodes().flat_map(|node| node.sub_edges().iter())
    }

    pub fn insert(&mut self, task: Arc<Task>) -> Result<()> {
        self.insert_node(TaskNode::new(task))
    }

    pub(crate) fn insert_node(&mut self, node: TaskNode) -> Result<()> {
        let id = node.id().to_string();
        if self.nodes.contains_key(&id) {
            return Err(DagError::validation(format!("duplicate task id '{id}'")));
        }
        self.order.push(id.clone());
        self.nodes.insert(id, node);
        self.generation += 1;
        Ok(())
    }

    /// Wire `from -> to`, mirrored on both nodes. Returns the resolved kind.
    pub fn add_child_task(&mut self, from: &str, to: &str, kind: EdgeKind) -> Result<EdgeKind> {
        if !self.nodes.contains_key(to) {
            return Err(DagError::validation(format!("unknown edge target '{to}'")));
        }
        let source = self
            .nodes
            .get_mut(from)
            .ok_or_else(|| DagError::validation(format!("unknown edge source '{from}'")))?;
        let resolved = source.resolve_kind(kind);
        let edge = TaskEdge::new(from, to, resolved);
        if source.sub_edges().contains(&edge) {
            return Ok(resolved);
        }
        source.push_sub_edge(edge.clone());
        if let Some(target) = self.nodes.get_mut(to) {
            target.push_parent_edge(edge);
        }
        self.generation += 1;
        Ok(resolved)
    }

    /// Restore an edge exactly as recorded, without resolving its kind.
    pub(crate) fn restore_edge(&mut self, edge: TaskEdge) -> Result<()> {
        for id in [&edge.from_id, &edge.to_id] {
            if !self.nodes.contains_key(id) {
                return Err(DagError::validation(format!(
                    "edge {} -> {} references unknown task '{id}'",
                    edge.from_id, edge.to_id
                )));
            }
        }
        if let Some(source) = self.nodes.get_mut(&edge.from_id) {
            source.push_sub_edge(edge.clone());
        }
        if let Some(target) = self.nodes.get_mut(&edge.to_id) {
            target.push_parent_edge(edge);
        }
        self.generation += 1;
        Ok(())
    }

    /// Tasks without parent edges.
    pub fn roots(&self) -> Vec<Arc<Task>> {
        self.nodes()
            .filter(|node| node.parent_edges().is_empty())
            .map(|node| node.task().clone())
            .collect()
    }

    /// Tasks without sub-edges.
    pub fn leaves(&self) -> Vec<Arc<Task>> {
        self.nodes()
            .filter(|node| node.sub_edges().is_empty())
            .map(|node| node.task().clone())
            .collect()
    }

    /// Replace the regular outgoing edges of `from` with `clones`, each wired
    /// from `from` and to every former target.
    ///
    /// Splicing again after `from` replaces the previous fan-out: clones whose
    /// id is already spliced keep their node, missing ones are added and the
    /// rest are removed. An empty `clones` restores the original edges.
    /// Returns `false` when nothing changed.
    pub fn splice_fan_out(&mut self, from: &str, clones: Vec<Arc<Task>>) -> Result<bool> {
        if !self.nodes.contains_key(from) {
            return Err(DagError::not_found("Task", from));
        }
        let previous = self.fan_outs.get(from).cloned();
        if clones.is_empty() && previous.is_none() {
            return Ok(false);
        }
        let spliced = previous
            .as_ref()
            .map(|fan_out| fan_out.clones.clone())
            .unwrap_or_default();
        let mut fresh = HashSet::new();
        for clone in &clones {
            let id = clone.id();
            let reused = spliced.iter().any(|old| old == id);
            if (!reused && self.nodes.contains_key(id)) || !fresh.insert(id.to_string()) {
                return Err(DagError::validation(format!(
                    "fan-out clone id '{id}' is already taken"
                )));
            }
        }

        let targets = match previous {
            Some(fan_out) => {
                for old in fan_out.clones.iter().filter(|old| !fresh.contains(*old)) {
                    self.remove_node(old);
                }
                fan_out.targets
            }
            None => {
                let detached = match self.nodes.get_mut(from) {
                    Some(node) => node.take_sub_edges(EdgeKind::Default),
                    None => Vec::new(),
                };
                let mut targets: Vec<String> = Vec::new();
                for edge in &detached {
                    if let Some(target) = self.nodes.get_mut(&edge.to_id) {
                        target.drop_parent_edge(edge);
                    }
                    if !targets.contains(&edge.to_id) {
                        targets.push(edge.to_id.clone());
                    }
                }
                targets
            }
        };

        if clones.is_empty() {
            for target in &targets {
                self.link(from, target);
            }
            self.fan_outs.remove(from);
            self.generation += 1;
            return Ok(true);
        }

        let mut ids = Vec::with_capacity(clones.len());
        for clone in clones {
            let clone_id = clone.id().to_string();
            ids.push(clone_id.clone());
            if self.nodes.contains_key(&clone_id) {
                continue;
            }
            self.order.push(clone_id.clone());
            self.nodes.insert(clone_id.clone(), TaskNode::new(clone));
            self.link(from, &clone_id);
            for target in &targets {
                self.link(&clone_id, target);
            }
        }
        self.fan_outs.insert(
            from.to_string(),
            FanOut {
                clones: ids,
                targets,
            },
        );
        self.generation += 1;
        Ok(true)
    }

    /// Drop `id` and every edge touching it.
    fn remove_node(&mut self, id: &str) {
        let Some(node) = self.nodes.remove(id) else {
            return;
        };
        for edge in node.sub_edges() {
            if let Some(target) = self.nodes.get_mut(&edge.to_id) {
                target.drop_parent_edge(edge);
            }
        }
        for edge in node.parent_edges() {
            if let Some(source) = self.nodes.get_mut(&edge.from_id) {
                source.drop_sub_edge(edge);
            }
        }
        self.order.retain(|kept| kept != id);
    }

    fn link(&mut self, from: &str, to: &str) {
        let Some(source) = self.nodes.get_mut(from) else {
            return;
        };
        let edge = TaskEdge::new(from, to, source.resolve_kind(EdgeKind::Default));
        source.push_sub_edge(edge.clone());
        if let Some(target) = self.nodes.get_mut(to) {
            target.push_parent_edge(edge);
        }
    }

    /// Structural checks: mirrored edges, loop phases only out of generators,
    /// no cycles.
    pub fn validate(&self) -> Result<()> {
        for node in self.nodes() {
            for edge in node.sub_edges() {
                let target = self.nodes.get(&edge.to_id).ok_or_else(|| {
                    DagError::validation(format!(
                        "edge {} -> {} has no target task",
                        edge.from_id, edge.to_id
                    ))
                })?;
                if !target.parent_edges().contains(edge) {
                    return Err(DagError::validation(format!(
                        "edge {} -> {} is not mirrored on its target",
                        edge.from_id, edge.to_id
                    )));
                }
                if matches!(edge.kind, EdgeKind::LoopStart | EdgeKind::LoopEnd)
                    && node.task().mode() != ProcessMode::Generator
                {
                    return Err(DagError::validation(format!(
                        "{} edge {} -> {} must leave a generator task",
                        edge.kind, edge.from_id, edge.to_id
                    )));
                }
            }
        }
        self.check_acyclic()
    }

    fn check_acyclic(&self) -> Result<()> {
        let mut in_degree: HashMap<&str, usize> = self
            .nodes()
            .map(|node| (node.id(), node.parent_edges().len()))
            .collect();
        let mut ready: VecDeque<&str> = in_degree
            .iter()
            .filter(|(_, degree)| **degree == 0)
            .map(|(id, _)| *id)
            .collect();
        let mut visited = 0;

        while let Some(id) = ready.pop_front() {
            visited += 1;
            let Some(node) = self.nodes.get(id) else {
                continue;
            };
            for edge in node.sub_edges() {
                if let Some(degree) = in_degree.get_mut(edge.to_id.as_str()) {
                    *degree -= 1;
                    if *degree == 0 {
                        ready.push_back(edge.to_id.as_str());
                    }
                }
            }
        }

        if visited == self.len() {
            return Ok(());
        }
        let mut stuck: Vec<&str> = in_degree
            .into_iter()
            .filter(|(_, degree)| *degree > 0)
            .map(|(id, _)| id)
            .collect();
        stuck.sort_unstable();
        Err(DagError::validation(format!(
            "cycle through tasks {}",
            stuck.join(", ")
        )))
    }

    /// Same topology around different task instances.
    pub(crate) fn map_tasks<F>(&self, mut f: F) -> Result<Self>
    where
        F: FnMut(&Arc<Task>) -> Result<Arc<Task>>,
    {
        let mut nodes = HashMap::with_capacity(self.nodes.len());
        for id in &self.order {
            if let Some(node) = self.nodes.get(id) {
                nodes.insert(id.clone(), node.with_task(f(node.task())?));
            }
        }
        Ok(Self {
            order: self.order.clone(),
            nodes,
            generation: 0,
            fan_outs: self.fan_outs.clone(),
        })
    }
}
