use std::sync::{Arc, Weak};

use async_trait::async_trait;
use serde_json::Value;

use crate::contract::TaskDataContract;
use crate::dag::{RunOptions, TaskDag};
use crate::error::{DagError, Result};
use crate::registry::DagRegistry;
use crate::task::{Activation, Processor, TaskBehavior, TaskFactory, TaskOutput};
use crate::types::TaskData;

/// Runs another registered DAG, `dag_id`, as a nested run in the caller's
/// context. Its output is the input overlaid by the nested run's leaf results.
pub struct DagCallTask {
    registry: Weak<DagRegistry>,
}

impl DagCallTask {
    pub const TYPE_TAG: &'static str = "dag_call";

    pub fn factory(registry: Weak<DagRegistry>) -> TaskFactory {
        TaskFactory::new(Self::TYPE_TAG, move |record| {
            if called_id(&record.params).is_none() {
                return Err(DagError::validation(format!(
                    "dag_call task '{}' needs a 'dag_id' parameter",
                    record.id
                )));
            }
            Ok(Arc::new(DagCallTask {
                registry: registry.clone(),
            }))
        })
    }

    fn registry(&self) -> Result<Arc<DagRegistry>> {
        self.registry
            .upgrade()
            .ok_or_else(|| DagError::Execution("DAG registry dropped".into()))
    }

    /// Contract of the called DAG; an unknown `dag_id` is an error, not an
    /// empty contract.
    fn called_contract(
        &self,
        params: &TaskData,
        contract: impl FnOnce(&TaskDag) -> Result<TaskDataContract>,
    ) -> Result<TaskDataContract> {
        let dag_id = called_id(params)
            .ok_or_else(|| DagError::validation("dag_call task has no 'dag_id' parameter"))?;
        let dag = self.registry()?.get(&dag_id)?;
        contract(&dag)
    }
}

fn called_id(params: &TaskData) -> Option<String> {
    params.get("dag_id").and_then(Value::as_str).map(str::to_string)
}

impl TaskBehavior for DagCallTask {
    fn required_inputs(&self, params: &TaskData) -> Result<TaskDataContract> {
        self.called_contract(params, |dag| dag.required_inputs())
    }

    fn provided_outputs(&self, params: &TaskData) -> Result<TaskDataContract> {
        self.called_contract(params, |dag| dag.provided_outputs())
    }

    fn default_label(&self, params: &TaskData) -> Option<String> {
        called_id(params).map(|id| format!("Call {id}"))
    }

    fn as_processor(&self) -> Option<&dyn Processor> {
        Some(self)
    }
}

#[async_trait]
impl Processor for DagCallTask {
    async fn process(&self, scope: &Activation<'_>, input: TaskData) -> Result<TaskOutput> {
        let dag_id = called_id(&scope.params())
            .ok_or_else(|| DagError::task_execution(scope.task_id(), "no dag_id parameter"))?;
        let run = self.registry()?.instantiate(&dag_id).await?;
        tracing::debug!(task = scope.task_id(), run = %run.id(), "calling nested dag");

        let result = run
            .run_for_output(scope.context(), input.clone(), RunOptions::default())
            .await
            .map_err(|e| DagError::task_execution(scope.task_id(), format!("{dag_id}: {e}")))?;

        let mut output = input;
        output.extend(result);
        Ok(output.into())
    }
}
