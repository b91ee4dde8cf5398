//! Shared fixtures for the integration tests

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use pinceau_core::callbacks::TasksExecutionTracer;
use pinceau_core::contract::TaskDataContract;
use pinceau_core::tasks::{FunctionTask, RangeTask, WaitTask};
use pinceau_core::{Context, ContextLayer, DagBuilder, DagError, Task, TaskDag, TaskData, TaskRecord, TaskRegistry};
use serde_json::Value;

/// Context whose only layer records task status transitions.
pub fn traced_context() -> (Context, Arc<TasksExecutionTracer>) {
    let tracer = Arc::new(TasksExecutionTracer::new());
    let ctx = Context::new(ContextLayer::new("test").with_handler(tracer.clone()));
    (ctx, tracer)
}

pub fn data(value: Value) -> TaskData {
    value.as_object().cloned().unwrap_or_default()
}

pub fn wait(registry: &TaskRegistry, id: &str, seconds: f64) -> Arc<Task> {
    registry.create(WaitTask::record(id, seconds)).unwrap()
}

/// Task sleeping `seconds` then adding `{key: value}` to its input.
pub fn delayed(id: &str, seconds: u64, key: &'static str, value: Value) -> Arc<Task> {
    let factory = FunctionTask::factory(
        "delayed",
        TaskDataContract::new(),
        TaskDataContract::new(),
        move |mut input| {
            let value = value.clone();
            async move {
                tokio::time::sleep(Duration::from_secs(seconds)).await;
                input.insert(key.to_string(), value);
                Ok::<_, DagError>(input)
            }
        },
    );
    factory.create(TaskRecord::new("delayed", id)).unwrap()
}

/// The `test` diamond: `wait_one` feeding `wait_two` (5s) and `wait_three`
/// (10s), both feeding `wait_five`.
pub fn wait_diamond(registry: &TaskRegistry) -> Arc<TaskDag> {
    let mut builder = DagBuilder::new("test");
    builder
        .add(wait(registry, "wait_one", 0.0))
        .add(wait(registry, "wait_two", 5.0))
        .add(wait(registry, "wait_three", 10.0))
        .add(wait(registry, "wait_five", 0.0))
        .edge("wait_one", "wait_two")
        .edge("wait_one", "wait_three")
        .edge("wait_two", "wait_five")
        .edge("wait_three", "wait_five");
    builder.build().unwrap()
}

/// The `test_yield` graph: a range over 0..5 feeding `A` (1s), then a round
/// robin between `B -> D` and `C -> E`, with `BEFORE` on the loop start and
/// `AFTER` on the loop end.
pub fn yield_dag(registry: &TaskRegistry) -> Arc<TaskDag> {
    let mut builder = DagBuilder::new("test_yield");
    builder
        .add(registry.create(RangeTask::record("range", "range", 0, 5)).unwrap())
        .add(wait(registry, "A", 1.0))
        .add(
            registry
                .create(TaskRecord::new("round_robin", "round_robin"))
                .unwrap(),
        );
    for id in ["B", "C", "D", "E", "BEFORE", "AFTER"] {
        builder.add(wait(registry, id, 0.0));
    }
    builder
        .chain(["range", "A", "round_robin"])
        .edge("round_robin", "B")
        .edge("round_robin", "C")
        .edge("B", "D")
        .edge("C", "E")
        .loop_start("range", "BEFORE")
        .loop_end("range", "AFTER");
    builder.build().unwrap()
}
