//! [`GraphElement`]: identity and lifecycle shared by tasks and DAGs.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::types::Status;

/// Identity, display metadata and status of a schedulable entity.
///
/// Only the owning task or DAG mutates its element, and only from the scheduler.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphElement {
    id: String,
    label: String,
    description: String,
    tags: Vec<String>,
    status: Status,
    error: Option<String>,
    parent_id: Option<String>,
}

impl GraphElement {
    /// Create an element. An empty `id` gets a fresh UUID.
    pub fn new(id: impl Into<String>, label: impl Into<String>, description: impl Into<String>) -> Self {
        let mut id = id.into();
        if id.is_empty() {
            id = uuid::Uuid::new_v4().to_string();
        }
        let mut label = label.into();
        if label.is_empty() {
            label = id.clone();
        }
        Self {
            id,
            label,
            description: description.into(),
            tags: Vec::new(),
            status: Status::Idle,
            error: None,
            parent_id: None,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn tags(&self) -> &[String] {
        &self.tags
    }

    pub fn status(&self) -> Status {
        self.status
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn parent_id(&self) -> Option<&str> {
        self.parent_id.as_deref()
    }

    pub fn set_label(&mut self, label: impl Into<String>) {
        self.label = label.into();
    }

    pub fn set_description(&mut self, description: impl Into<String>) {
        self.description = description.into();
    }

    pub fn set_parent_id(&mut self, parent_id: Option<String>) {
        self.parent_id = parent_id;
    }

    /// Add a tag, keeping first-insertion order and ignoring duplicates.
    pub fn add_tag(&mut self, tag: impl Into<String>) {
        let tag = tag.into();
        if !self.tags.contains(&tag) {
            self.tags.push(tag);
        }
    }

    pub fn set_tags<I, S>(&mut self, tags: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags.clear();
        for tag in tags {
            self.add_tag(tag);
        }
    }

    /// Record a status. The error is kept only for [`Status::Error`].
    pub(crate) fn set_status(&mut self, status: Status, error: Option<String>) {
        self.status = status;
        self.error = if status == Status::Error { error } else { None };
    }

    /// Display-oriented snapshot used by monitoring code.
    pub fn as_json(&self) -> Value {
        json!({
            "id": self.id,
            "label": self.label,
            "description": self.description,
            "tags": self.tags,
            "status": self.status,
            "error": self.error,
            "parentId": self.parent_id,
        })
    }
}
