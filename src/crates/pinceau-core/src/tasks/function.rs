use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::BoxFuture;
use futures::FutureExt;

use crate::contract::TaskDataContract;
use crate::error::Result;
use crate::task::{Activation, Processor, TaskBehavior, TaskFactory, TaskOutput};
use crate::types::TaskData;

type Body = dyn Fn(TaskData) -> BoxFuture<'static, Result<TaskData>> + Send + Sync;

/// A `NORMAL` task backed by a closure, for embedding and tests.
///
/// The closure receives the call-time input: merged parent results overlaid
/// by the task parameters.
///
/// ```rust
/// use pinceau_core::contract::{KeyContract, TaskDataContract, ValueType};
/// use pinceau_core::tasks::FunctionTask;
/// use pinceau_core::task::TaskRecord;
/// use serde_json::json;
///
/// let double = FunctionTask::factory(
///     "double",
///     TaskDataContract::new().with("x", KeyContract::new(ValueType::Integer)),
///     TaskDataContract::new().with("y", KeyContract::new(ValueType::Integer)),
///     |input| async move {
///         let x = input["x"].as_i64().unwrap_or_default();
///         Ok::<_, pinceau_core::DagError>(json!({"y": x * 2}).as_object().cloned().unwrap_or_default())
///     },
/// );
/// let task = double.create(TaskRecord::new("double", "d")).unwrap();
/// assert_eq!(task.required_inputs().unwrap().len(), 1);
/// ```
pub struct FunctionTask {
    required: TaskDataContract,
    provided: TaskDataContract,
    body: Arc<Body>,
}

impl FunctionTask {
    pub fn factory<F, Fut>(
        type_tag: &str,
        required: TaskDataContract,
        provided: TaskDataContract,
        body: F,
    ) -> TaskFactory
    where
        F: Fn(TaskData) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<TaskData>> + Send + 'static,
    {
        let body: Arc<Body> = Arc::new(move |input| body(input).boxed());
        TaskFactory::new(type_tag, move |_| {
            Ok(Arc::new(FunctionTask {
                required: required.clone(),
                provided: provided.clone(),
                body: body.clone(),
            }))
        })
    }
}

impl TaskBehavior for FunctionTask {
    fn required_inputs(&self, _params: &TaskData) -> Result<TaskDataContract> {
        Ok(self.required.clone())
    }

    fn provided_outputs(&self, _params: &TaskData) -> Result<TaskDataContract> {
        Ok(self.provided.clone())
    }

    fn as_processor(&self) -> Option<&dyn Processor> {
        Some(self)
    }
}

#[async_trait]
impl Processor for FunctionTask {
    async fn process(&self, scope: &Activation<'_>, input: TaskData) -> Result<TaskOutput> {
        let output = (self.body)(scope.merged_input(&input)).await?;
        Ok(output.into())
    }
}
