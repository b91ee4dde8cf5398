//! Shared vocabulary: statuses, edge kinds, processing modes and the data map
//! that flows along edges.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Data flowing between tasks: a JSON object.
pub type TaskData = Map<String, Value>;

/// Lifecycle status of a task or a DAG.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Status {
    #[default]
    Idle,
    Waiting,
    /// Parents resolved; queued for the activation lock.
    Scheduled,
    Running,
    Finished,
    Error,
}

impl Status {
    pub fn as_str(&self) -> &'static str {
        match self {
            Status::Idle => "IDLE",
            Status::Waiting => "WAITING",
            Status::Scheduled => "SCHEDULED",
            Status::Running => "RUNNING",
            Status::Finished => "FINISHED",
            Status::Error => "ERROR",
        }
    }

    /// `FINISHED` or `ERROR`.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Status::Finished | Status::Error)
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Kind of a graph edge.
///
/// `Default` only exists at construction time: inserting an edge resolves it to
/// `Direct`, `Conditional` or `Loop` from the source task's capabilities. When
/// used as a *filter* (see [`EdgeKind::admits`]) it selects the three resolved
/// kinds at once.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EdgeKind {
    Default,
    Direct,
    Conditional,
    Loop,
    LoopStart,
    LoopEnd,
}

impl EdgeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EdgeKind::Default => "DEFAULT",
            EdgeKind::Direct => "DIRECT",
            EdgeKind::Conditional => "CONDITIONAL",
            EdgeKind::Loop => "LOOP",
            EdgeKind::LoopStart => "LOOP_START",
            EdgeKind::LoopEnd => "LOOP_END",
        }
    }

    /// Whether `edge` belongs to the bucket selected by `filter`.
    pub fn admits(filter: EdgeKind, edge: EdgeKind) -> bool {
        match filter {
            EdgeKind::Default => matches!(
                edge,
                EdgeKind::Direct | EdgeKind::Conditional | EdgeKind::Loop
            ),
            other => other == edge,
        }
    }
}

impl fmt::Display for EdgeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a task produces results, fixed when the task is constructed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProcessMode {
    /// One call, one result
    Normal,
    /// `before` hook, a stream of results, `after` hook
    Generator,
}

/// Merge data maps in order; later maps win on key conflicts.
pub fn merge_data<'a>(parts: impl IntoIterator<Item = &'a TaskData>) -> TaskData {
    let mut merged = TaskData::new();
    for part in parts {
        for (key, value) in part {
            merged.insert(key.clone(), value.clone());
        }
    }
    merged
}
