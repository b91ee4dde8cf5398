//! Events emitted through a [`Context`](super::Context).

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::types::{Status, TaskData};

/// What kind of entity emitted an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SenderKind {
    Task,
    Dag,
    Context,
    External,
}

impl SenderKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SenderKind::Task => "task",
            SenderKind::Dag => "dag",
            SenderKind::Context => "context",
            SenderKind::External => "external",
        }
    }
}

/// Emitter of an event. Task senders use the full id `"<dag id>::<task id>"`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EventSender {
    pub kind: SenderKind,
    pub id: String,
}

impl EventSender {
    pub fn task(dag_id: &str, task_id: &str) -> Self {
        Self {
            kind: SenderKind::Task,
            id: format!("{dag_id}::{task_id}"),
        }
    }

    pub fn dag(dag_id: impl Into<String>) -> Self {
        Self {
            kind: SenderKind::Dag,
            id: dag_id.into(),
        }
    }

    pub fn external(name: impl Into<String>) -> Self {
        Self {
            kind: SenderKind::External,
            id: name.into(),
        }
    }

    pub fn is_task(&self) -> bool {
        self.kind == SenderKind::Task
    }

    pub fn is_dag(&self) -> bool {
        self.kind == SenderKind::Dag
    }
}

impl fmt::Display for EventSender {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}::{}", self.kind.as_str(), self.id)
    }
}

/// Event name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Status,
    Progress,
    Data,
    Stream,
    Log,
    Custom(String),
}

/// A notification travelling through context layers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub sender: EventSender,
    pub kind: EventKind,
    pub payload: Value,
    pub timestamp: DateTime<Utc>,
}

impl Event {
    pub fn new(sender: EventSender, kind: EventKind, payload: Value) -> Self {
        Self {
            sender,
            kind,
            payload,
            timestamp: Utc::now(),
        }
    }

    /// `{"status": .., "error": ..}`
    pub fn status(sender: EventSender, status: Status, error: Option<&str>) -> Self {
        Self::new(
            sender,
            EventKind::Status,
            json!({ "status": status, "error": error }),
        )
    }

    /// `{"progress": ..}`
    pub fn progress(sender: EventSender, progress: f64) -> Self {
        Self::new(sender, EventKind::Progress, json!({ "progress": progress }))
    }

    /// Key/value snapshot published by a task.
    pub fn data(sender: EventSender, data: TaskData) -> Self {
        Self::new(sender, EventKind::Data, Value::Object(data))
    }

    /// Incremental value: `{key: [chunk, reset]}`.
    pub fn stream(sender: EventSender, key: &str, chunk: Value, reset: bool) -> Self {
        let mut payload = TaskData::new();
        payload.insert(key.to_string(), json!([chunk, reset]));
        Self::new(sender, EventKind::Stream, Value::Object(payload))
    }

    pub fn log(sender: EventSender, message: impl Into<String>) -> Self {
        Self::new(sender, EventKind::Log, json!({ "message": message.into() }))
    }

    pub fn custom(sender: EventSender, name: impl Into<String>, payload: Value) -> Self {
        Self::new(sender, EventKind::Custom(name.into()), payload)
    }

    /// Status carried by a status event.
    pub fn status_value(&self) -> Option<Status> {
        if self.kind != EventKind::Status {
            return None;
        }
        self.payload
            .get("status")
            .and_then(|raw| serde_json::from_value(raw.clone()).ok())
    }

    /// Error message carried by a status event.
    pub fn error_message(&self) -> Option<&str> {
        self.payload.get("error").and_then(Value::as_str)
    }

    /// Value carried by a progress event.
    pub fn progress_value(&self) -> Option<f64> {
        if self.kind != EventKind::Progress {
            return None;
        }
        self.payload.get("progress").and_then(Value::as_f64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_event_roundtrip() {
        let event = Event::status(EventSender::task("test:1", "A"), Status::Error, Some("boom"));
        assert_eq!(event.sender.id, "test:1::A");
        assert_eq!(event.status_value(), Some(Status::Error));
        assert_eq!(event.error_message(), Some("boom"));
        assert_eq!(event.progress_value(), None);
    }

    #[test]
    fn test_sender_display() {
        assert_eq!(EventSender::dag("test").to_string(), "dag::test");
    }
}
