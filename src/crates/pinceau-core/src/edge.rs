use serde::{Deserialize, Serialize};

use crate::types::EdgeKind;

/// Directed, typed connection between two tasks of one DAG.
///
/// Every edge is stored twice: in the source node's sub-edges and in the target
/// node's parent-edges.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TaskEdge {
    pub from_id: String,
    pub to_id: String,
    #[serde(rename = "type")]
    pub kind: EdgeKind,
}

impl TaskEdge {
    pub fn new(from_id: impl Into<String>, to_id: impl Into<String>, kind: EdgeKind) -> Self {
        Self {
            from_id: from_id.into(),
            to_id: to_id.into(),
            kind,
        }
    }

    /// Same endpoints, ignoring kind.
    pub fn connects(&self, from_id: &str, to_id: &str) -> bool {
        self.from_id == from_id && self.to_id == to_id
    }
}
