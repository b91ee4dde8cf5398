//! Structural records of DAGs, for persistence and remote execution.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::dag::{DagParameters, TaskDag, TaskGraph};
use crate::edge::TaskEdge;
use crate::element::GraphElement;
use crate::error::{DagError, Result};
use crate::id::DagId;
use crate::task::{TaskRecord, TaskRegistry};

/// A task and its edges.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeRecord {
    pub task: TaskRecord,
    #[serde(default)]
    pub sub_edges: Vec<TaskEdge>,
    #[serde(default)]
    pub parent_edges: Vec<TaskEdge>,
}

/// A whole DAG.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DagRecord {
    pub id: String,
    #[serde(default)]
    pub label: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,
    #[serde(default)]
    pub parameters: DagParameters,
    pub nodes: Vec<NodeRecord>,
}

impl DagRecord {
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn from_json(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }

    pub fn to_yaml(&self) -> Result<String> {
        Ok(serde_yaml::to_string(self)?)
    }

    pub fn from_yaml(text: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(text)?)
    }
}

impl TaskDag {
    pub fn serialize(&self) -> DagRecord {
        let element = self.element();
        let nodes = self.with_graph(|graph| {
            graph
                .nodes()
                .map(|node| NodeRecord {
                    task: node.task().record(),
                    sub_edges: node.sub_edges().to_vec(),
                    parent_edges: node.parent_edges().to_vec(),
                })
                .collect()
        });
        DagRecord {
            id: self.dag_id(),
            label: element.label().to_string(),
            description: element.description().to_string(),
            tags: element.tags().to_vec(),
            parent_id: element.parent_id().map(str::to_string),
            parameters: self.params(),
            nodes,
        }
    }

    /// Rebuild a DAG, creating its tasks through `registry`. Edges are restored
    /// as recorded.
    pub fn deserialize(record: &DagRecord, registry: &TaskRegistry) -> Result<Arc<TaskDag>> {
        let id: DagId = record.id.parse()?;
        let mut graph = TaskGraph::new();
        for node in &record.nodes {
            graph.insert(registry.create(node.task.clone())?)?;
        }
        for node in &record.nodes {
            for edge in &node.sub_edges {
                if edge.from_id != node.task.id {
                    return Err(DagError::validation(format!(
                        "sub-edge {} -> {} recorded under task '{}'",
                        edge.from_id, edge.to_id, node.task.id
                    )));
                }
                graph.restore_edge(edge.clone())?;
            }
        }
        for node in &record.nodes {
            let restored = graph
                .node(&node.task.id)
                .map(|restored| restored.parent_edges().to_vec())
                .unwrap_or_default();
            if let Some(missing) = node.parent_edges.iter().find(|edge| !restored.contains(edge)) {
                return Err(DagError::validation(format!(
                    "parent edge {} -> {} has no matching sub-edge",
                    missing.from_id, missing.to_id
                )));
            }
        }
        graph.validate()?;

        let mut element = GraphElement::new(id.to_string(), &record.label, &record.description);
        element.set_tags(record.tags.iter().cloned());
        element.set_parent_id(record.parent_id.clone());
        Ok(Arc::new(TaskDag::from_parts(
            id,
            element,
            record.parameters.clone(),
            graph,
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dag::DagBuilder;
    use crate::task::TaskRecord;
    use crate::types::EdgeKind;
    use serde_json::json;

    fn sample(registry: &TaskRegistry) -> Arc<TaskDag> {
        let wait = |id: &str, secs: u64| {
            registry
                .create(TaskRecord::new("wait", id).with_param("wait_duration", json!(secs)))
                .unwrap()
        };
        let range = registry
            .create(TaskRecord::new("range", "range").with_param("end", json!(3)))
            .unwrap();
        DagBuilder::new("sample[fast]")
            .label("Sample")
            .tag("demo")
            .add(range)
            .add(wait("before", 0))
            .add(wait("item", 1))
            .loop_start("range", "before")
            .edge("range", "item")
            .build()
            .unwrap()
    }

    #[test]
    fn test_yaml_record_rebuilds_the_same_graph() {
        let registry = TaskRegistry::with_builtins();
        let dag = sample(&registry);
        let yaml = dag.serialize().to_yaml().unwrap();

        let rebuilt = TaskDag::deserialize(&DagRecord::from_yaml(&yaml).unwrap(), &registry).unwrap();
        assert_eq!(rebuilt.dag_id(), "sample[fast]");
        assert_eq!(rebuilt.label(), "Sample");
        assert_eq!(rebuilt.params().tags, vec!["demo".to_string()]);
        assert_eq!(
            rebuilt.node("range").unwrap().sub_edges()[0].kind,
            EdgeKind::LoopStart
        );
        assert_eq!(rebuilt.task("item").unwrap().params()["wait_duration"], json!(1));
        assert_eq!(rebuilt.serialize(), dag.serialize());
    }

    #[test]
    fn test_dangling_edges_are_rejected() {
        let registry = TaskRegistry::with_builtins();
        let mut record = sample(&registry).serialize();
        record.nodes[0]
            .sub_edges
            .push(TaskEdge::new("range", "ghost", EdgeKind::Loop));

        let err = TaskDag::deserialize(&record, &registry).unwrap_err();
        assert!(matches!(err, DagError::Validation(_)));
    }
}
