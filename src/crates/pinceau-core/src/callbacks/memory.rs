//! Per-run buffer of everything observable about one DAG execution.

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde_json::{json, Map, Value};

use super::CallbackHandler;
use crate::context::{Context, Event, EventKind};
use crate::types::Status;

#[derive(Default)]
struct Buffer {
    status: Option<Status>,
    error: Option<String>,
    progress: Option<f64>,
    start: Option<DateTime<Utc>>,
    end: Option<DateTime<Utc>>,
    task_status: BTreeMap<String, Status>,
    task_error: BTreeMap<String, String>,
    task_data: BTreeMap<String, Map<String, Value>>,
    task_stream: BTreeMap<String, Map<String, Value>>,
}

/// Accumulates the status, progress, data and streamed values of one DAG run.
///
/// Only events whose sender belongs to `dag_id` are recorded: the DAG itself, or
/// tasks whose full id starts with `"<dag_id>::"`.
pub struct DagExecutionMemory {
    dag_id: String,
    buffer: Mutex<Buffer>,
}

impl DagExecutionMemory {
    pub const TYPE_TAG: &'static str = "dag_execution_memory";

    pub fn new(dag_id: impl Into<String>) -> Self {
        Self {
            dag_id: dag_id.into(),
            buffer: Mutex::new(Buffer::default()),
        }
    }

    pub fn dag_id(&self) -> &str {
        &self.dag_id
    }

    pub fn status(&self) -> Option<Status> {
        self.buffer.lock().status
    }

    pub fn progress(&self) -> Option<f64> {
        self.buffer.lock().progress
    }

    pub fn task_status(&self, task_id: &str) -> Option<Status> {
        self.buffer.lock().task_status.get(task_id).copied()
    }

    /// Last value published under `key` by `task_id` (plain task id, not the full id).
    pub fn task_data(&self, task_id: &str, key: &str) -> Option<Value> {
        self.buffer
            .lock()
            .task_data
            .get(task_id)
            .and_then(|data| data.get(key))
            .cloned()
    }

    /// Accumulated stream value.
    pub fn task_stream(&self, task_id: &str, key: &str) -> Option<Value> {
        self.buffer
            .lock()
            .task_stream
            .get(task_id)
            .and_then(|data| data.get(key))
            .cloned()
    }

    /// JSON snapshot of the buffer.
    pub fn as_payload(&self) -> Value {
        let buffer = self.buffer.lock();
        let deltas = |source: &BTreeMap<String, Map<String, Value>>| -> Vec<Value> {
            source
                .iter()
                .flat_map(|(task, data)| {
                    data.iter()
                        .map(move |(key, value)| json!({"task": task, "id": key, "data": value}))
                })
                .collect()
        };
        json!({
            "dagId": self.dag_id,
            "status": buffer.status,
            "error": buffer.error,
            "progress": buffer.progress,
            "startDate": buffer.start,
            "endDate": buffer.end,
            "taskStatus": buffer.task_status,
            "taskError": buffer.task_error,
            "data": deltas(&buffer.task_data),
            "streams": deltas(&buffer.task_stream),
        })
    }

    fn local_task_id<'a>(&self, full_id: &'a str) -> Option<&'a str> {
        full_id
            .strip_prefix(self.dag_id.as_str())
            .and_then(|rest| rest.strip_prefix("::"))
    }
}

fn append_chunk(previous: Option<Value>, chunk: Value) -> Value {
    match (previous, chunk) {
        (Some(Value::String(mut text)), Value::String(more)) => {
            text.push_str(&more);
            Value::String(text)
        }
        (Some(Value::Array(mut items)), Value::Array(more)) => {
            items.extend(more);
            Value::Array(items)
        }
        (_, chunk) => chunk,
    }
}

#[async_trait]
impl CallbackHandler for DagExecutionMemory {
    fn type_tag(&self) -> &str {
        Self::TYPE_TAG
    }

    fn is_event_handled(&self, event: &Event) -> bool {
        if event.sender.is_dag() {
            event.sender.id == self.dag_id
        } else {
            event.sender.is_task() && self.local_task_id(&event.sender.id).is_some()
        }
    }

    async fn on_handled_event(&self, _ctx: &Context, event: &Event) -> bool {
        let mut buffer = self.buffer.lock();

        if event.sender.is_dag() {
            match event.kind {
                EventKind::Status => {
                    if let Some(status) = event.status_value() {
                        buffer.status = Some(status);
                        buffer.error = event.error_message().map(str::to_string);
                        match status {
                            Status::Running => buffer.start = Some(Utc::now()),
                            Status::Finished | Status::Error => buffer.end = Some(Utc::now()),
                            _ => {}
                        }
                    }
                }
                EventKind::Progress => {
                    if let Some(progress) = event.progress_value() {
                        buffer.progress = Some((progress * 1000.0).round() / 1000.0);
                    }
                }
                _ => {}
            }
            return false;
        }

        let Some(task_id) = self.local_task_id(&event.sender.id) else {
            return false;
        };
        let task_id = task_id.to_string();

        match &event.kind {
            EventKind::Status => {
                if let Some(status) = event.status_value() {
                    buffer.task_status.insert(task_id.clone(), status);
                    if let Some(error) = event.error_message() {
                        buffer.task_error.insert(task_id, error.to_string());
                    }
                }
            }
            EventKind::Data => {
                if let Some(data) = event.payload.as_object() {
                    let slot = buffer.task_data.entry(task_id).or_default();
                    for (key, value) in data {
                        slot.insert(key.clone(), value.clone());
                    }
                }
            }
            EventKind::Stream => {
                if let Some(chunks) = event.payload.as_object() {
                    let slot = buffer.task_stream.entry(task_id).or_default();
                    for (key, pair) in chunks {
                        let chunk = pair.get(0).cloned().unwrap_or(Value::Null);
                        let reset = pair.get(1).and_then(Value::as_bool).unwrap_or(false);
                        let previous = if reset { None } else { slot.remove(key) };
                        slot.insert(key.clone(), append_chunk(previous, chunk));
                    }
                }
            }
            _ => {}
        }
        false
    }

    fn state(&self) -> Value {
        json!({ "dag_id": self.dag_id })
    }
}
