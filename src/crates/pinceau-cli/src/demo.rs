//! Demo DAGs registered at startup.

use std::sync::Arc;

use pinceau_core::tasks::{RangeTask, WaitTask};
use pinceau_core::{DagBuilder, DagRegistry, Result, TaskDag, TaskRecord, TaskRegistry};

/// `wait_one` fanning out to a 5s and a 10s wait that join on `wait_five`.
pub fn wait_diamond(tasks: &TaskRegistry) -> Result<Arc<TaskDag>> {
    let mut builder = DagBuilder::new("test");
    builder
        .add(tasks.create(WaitTask::record("wait_one", 0.0))?)
        .add(tasks.create(WaitTask::record("wait_two", 5.0))?)
        .add(tasks.create(WaitTask::record("wait_three", 10.0))?)
        .add(tasks.create(WaitTask::record("wait_five", 0.0))?)
        .edge("wait_one", "wait_two")
        .edge("wait_one", "wait_three")
        .edge("wait_two", "wait_five")
        .edge("wait_three", "wait_five")
        .label("Wait diamond")
        .description("Two branches of different length joining on one task")
        .tag("demo");
    builder.build()
}

/// Range over five items, each waiting a second, then alternating between
/// two branches. `BEFORE` runs once before the first item.
pub fn yield_demo(tasks: &TaskRegistry) -> Result<Arc<TaskDag>> {
    let mut builder = DagBuilder::new("test_yield");
    builder
        .add(tasks.create(RangeTask::record("range", "range", 0, 5))?)
        .add(tasks.create(WaitTask::record("A", 1.0))?)
        .add(tasks.create(TaskRecord::new("round_robin", "round_robin"))?);
    for id in ["B", "C", "D", "E", "BEFORE"] {
        builder.add(tasks.create(WaitTask::record(id, 0.0))?);
    }
    builder
        .chain(["range", "A", "round_robin"])
        .edge("round_robin", "B")
        .edge("round_robin", "C")
        .edge("B", "D")
        .edge("C", "E")
        .loop_start("range", "BEFORE")
        .label("Yield round robin")
        .description("A generator feeding a round robin across two branches")
        .tag("demo");
    builder.build()
}

/// Register both demos, replacing earlier registrations.
pub fn register_demos(registry: &DagRegistry) -> Result<()> {
    registry.register_or_replace(wait_diamond(registry.tasks())?)?;
    registry.register_or_replace(yield_demo(registry.tasks())?)?;
    Ok(())
}
