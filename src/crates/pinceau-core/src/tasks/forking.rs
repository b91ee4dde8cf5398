//! Dynamic fan-out.
//!
//! A [`ForkTask`] looks at the list under `fork_input_key`. When it holds more
//! than `chunk_max_size` items, the task clones itself once per chunk, splices
//! the clones into the plan between itself and its former children, and passes
//! its input on. Each clone then processes its own chunk through the
//! [`ShardProcessor`]. The children join on every clone.
//!
//! A later activation re-splices: clones with the same index are reused,
//! surplus ones are dropped, and a list that fits in one chunk restores the
//! original edges.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::contract::{KeyContract, TaskDataContract, ValueType};
use crate::error::{DagError, Result};
use crate::task::{Activation, Processor, TaskBehavior, TaskFactory, TaskOutput, TaskOverrides};
use crate::types::TaskData;

/// Work done on one chunk of a forked list.
#[async_trait]
pub trait ShardProcessor: Send + Sync + 'static {
    async fn process_shard(
        &self,
        scope: &Activation<'_>,
        shard: Vec<Value>,
        input: TaskData,
    ) -> Result<TaskData>;

    fn provided_outputs(&self, _params: &TaskData) -> TaskDataContract {
        TaskDataContract::new()
    }
}

/// Replaces the list with the shard and tags it with the shard index.
struct SliceShard;

#[async_trait]
impl ShardProcessor for SliceShard {
    async fn process_shard(
        &self,
        scope: &Activation<'_>,
        shard: Vec<Value>,
        mut input: TaskData,
    ) -> Result<TaskData> {
        let key = input_key(&scope.params()).unwrap_or_default();
        input.insert(key, Value::Array(shard));
        input.insert(
            "fork_index".into(),
            json!(scope.param::<i64>("fork_index")?.unwrap_or(-1)),
        );
        Ok(input)
    }

    fn provided_outputs(&self, params: &TaskData) -> TaskDataContract {
        let mut provided =
            TaskDataContract::new().with("fork_index", KeyContract::new(ValueType::Integer));
        if let Some(key) = input_key(params) {
            provided = provided.with(key, KeyContract::new(ValueType::Any).multiple());
        }
        provided
    }
}

fn input_key(params: &TaskData) -> Option<String> {
    params
        .get("fork_input_key")
        .and_then(Value::as_str)
        .map(str::to_string)
}

pub struct ForkTask {
    shard: Arc<dyn ShardProcessor>,
}

impl ForkTask {
    pub const TYPE_TAG: &'static str = "fork";

    /// `fork` tasks that hand each clone its slice of the list.
    pub fn factory() -> TaskFactory {
        Self::factory_with(Self::TYPE_TAG, Arc::new(SliceShard))
    }

    /// A forking task type of its own, backed by `shard`.
    pub fn factory_with(type_tag: &str, shard: Arc<dyn ShardProcessor>) -> TaskFactory {
        TaskFactory::new(type_tag, move |record| {
            if input_key(&record.params).is_none() && input_key(&record.variant_params).is_none() {
                return Err(DagError::validation(format!(
                    "fork task '{}' needs a 'fork_input_key' parameter",
                    record.id
                )));
            }
            Ok(Arc::new(ForkTask {
                shard: shard.clone(),
            }))
        })
    }

    async fn split(&self, scope: &Activation<'_>, items: &[Value], chunk: usize) -> Result<()> {
        let task = scope.task();
        let label = task.label();
        let clones = items
            .chunks(chunk)
            .enumerate()
            .map(|(i, _)| {
                let mut params = TaskData::new();
                params.insert("fork_index".into(), json!(i));
                task.clone_with(TaskOverrides {
                    id: Some(format!("{}_{i}", task.id())),
                    label: Some(format!("{label} - {i}")),
                    params,
                })
            })
            .collect::<Result<Vec<_>>>()?;
        scope.log(format!("forking into {} shards", clones.len())).await;
        scope.fork(clones)
    }
}

impl TaskBehavior for ForkTask {
    fn required_inputs(&self, params: &TaskData) -> Result<TaskDataContract> {
        Ok(match input_key(params) {
            Some(key) => TaskDataContract::new().with(key, KeyContract::new(ValueType::Any).multiple()),
            None => TaskDataContract::new(),
        })
    }

    fn provided_outputs(&self, params: &TaskData) -> Result<TaskDataContract> {
        Ok(self.shard.provided_outputs(params))
    }

    fn default_passthrough(&self) -> bool {
        true
    }

    fn as_processor(&self) -> Option<&dyn Processor> {
        Some(self)
    }
}

#[async_trait]
impl Processor for ForkTask {
    async fn process(&self, scope: &Activation<'_>, input: TaskData) -> Result<TaskOutput> {
        let key = input_key(&scope.params()).unwrap_or_default();
        let items = match input.get(&key) {
            Some(Value::Array(items)) => items.clone(),
            Some(other) => {
                return Err(DagError::task_execution(
                    scope.task_id(),
                    format!("'{key}' must be a list, got {other}"),
                ))
            }
            None => Vec::new(),
        };
        let chunk = scope.param::<usize>("chunk_max_size")?.unwrap_or(1).max(1);
        let index = scope.param::<i64>("fork_index")?.unwrap_or(-1);

        if index >= 0 {
            let shard: Vec<Value> = items
                .chunks(chunk)
                .nth(index as usize)
                .map(<[Value]>::to_vec)
                .unwrap_or_default();
            let output = self.shard.process_shard(scope, shard, input).await?;
            return Ok(output.into());
        }
        if items.len() > chunk {
            self.split(scope, &items, chunk).await?;
            return Ok(input.into());
        }
        // Small enough to handle here: undo any fan-out of an earlier activation.
        scope.fork(Vec::new())?;
        Ok(self.shard.process_shard(scope, items, input).await?.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::TaskRecord;

    #[test]
    fn test_input_key_is_required() {
        assert!(ForkTask::factory().create(TaskRecord::new("fork", "f")).is_err());

        let task = ForkTask::factory()
            .create(TaskRecord::new("fork", "f").with_param("fork_input_key", json!("docs")))
            .unwrap();
        let required = task.required_inputs().unwrap();
        assert!(required.get("docs").unwrap().multiple);
        assert!(task.provided_outputs(None).unwrap().contains_key("fork_index"));
    }
}
