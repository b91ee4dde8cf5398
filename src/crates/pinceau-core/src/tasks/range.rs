use std::sync::Arc;

use async_stream::try_stream;
use async_trait::async_trait;
use futures::stream::BoxStream;
use serde_json::{json, Value};

use crate::contract::{KeyContract, TaskDataContract, ValueType};
use crate::error::{DagError, Result};
use crate::task::{Activation, StreamProcessor, TaskBehavior, TaskFactory, TaskRecord};
use crate::types::TaskData;

const DEFAULT_VARNAME: &str = "index";

/// Generator over `start..end` by `step`, bound to `varname`.
///
/// Each bound comes from the parameters, or when absent from the input keys
/// `{varname}_start`, `{varname}_end` and `{varname}_step`. Items carry the
/// input plus `varname` and `expected_iterations`.
#[derive(Debug, Default)]
pub struct RangeTask;

impl RangeTask {
    pub const TYPE_TAG: &'static str = "range";

    pub fn factory() -> TaskFactory {
        TaskFactory::new(Self::TYPE_TAG, |_| Ok(Arc::new(RangeTask)))
    }

    /// Record of a range over `start..end` with step 1.
    pub fn record(id: impl Into<String>, varname: &str, start: i64, end: i64) -> TaskRecord {
        TaskRecord::new(Self::TYPE_TAG, id)
            .with_param("varname", json!(varname))
            .with_param("start", json!(start))
            .with_param("end", json!(end))
    }
}

fn varname(params: &TaskData) -> String {
    params
        .get("varname")
        .and_then(Value::as_str)
        .unwrap_or(DEFAULT_VARNAME)
        .to_string()
}

fn bound(scope: &Activation<'_>, input: &TaskData, varname: &str, name: &str) -> Result<Option<i64>> {
    if let Some(value) = scope.param::<i64>(name)? {
        return Ok(Some(value));
    }
    match input.get(&format!("{varname}_{name}")) {
        None | Some(Value::Null) => Ok(None),
        Some(value) => value.as_i64().map(Some).ok_or_else(|| {
            DagError::task_execution(
                scope.task_id(),
                format!("{varname}_{name} must be an integer, got {value}"),
            )
        }),
    }
}

impl TaskBehavior for RangeTask {
    fn required_inputs(&self, params: &TaskData) -> Result<TaskDataContract> {
        let varname = varname(params);
        let mut required = TaskDataContract::new();
        for name in ["start", "end"] {
            if !params.contains_key(name) {
                required = required.with(format!("{varname}_{name}"), KeyContract::new(ValueType::Integer));
            }
        }
        if !params.contains_key("step") {
            required = required.with(
                format!("{varname}_step"),
                KeyContract::new(ValueType::Integer).with_default(json!(1)),
            );
        }
        Ok(required)
    }

    fn provided_outputs(&self, params: &TaskData) -> Result<TaskDataContract> {
        Ok(TaskDataContract::new()
            .with("expected_iterations", KeyContract::new(ValueType::Integer))
            .with(varname(params), KeyContract::new(ValueType::Integer)))
    }

    fn default_passthrough(&self) -> bool {
        true
    }

    fn as_stream_processor(&self) -> Option<&dyn StreamProcessor> {
        Some(self)
    }
}

#[async_trait]
impl StreamProcessor for RangeTask {
    fn stream<'a>(
        &'a self,
        scope: &'a Activation<'a>,
        input: TaskData,
    ) -> BoxStream<'a, Result<TaskData>> {
        Box::pin(try_stream! {
            let varname = varname(&scope.params());
            let start = bound(scope, &input, &varname, "start")?.unwrap_or(0);
            let end = bound(scope, &input, &varname, "end")?.ok_or_else(|| {
                DagError::task_execution(scope.task_id(), format!("no end bound for '{varname}'"))
            })?;
            let step = bound(scope, &input, &varname, "step")?.unwrap_or(1);
            if step <= 0 {
                Err::<(), _>(DagError::task_execution(
                    scope.task_id(),
                    format!("step must be positive, got {step}"),
                ))?;
            }

            let outer = input
                .get("expected_iterations")
                .and_then(Value::as_i64)
                .unwrap_or(1);
            let expected_iterations = outer * ((end - start) / step).max(0);

            let mut i = start;
            while i < end {
                let mut item = input.clone();
                item.insert(varname.clone(), json!(i));
                item.insert("expected_iterations".into(), json!(expected_iterations));
                yield item;
                i += step;
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_bounds_become_required_inputs() {
        let task = RangeTask::factory()
            .create(
                TaskRecord::new("range", "r")
                    .with_param("varname", json!("page"))
                    .with_param("start", json!(0)),
            )
            .unwrap();
        let required = task.required_inputs().unwrap();
        assert_eq!(required.keys().collect::<Vec<_>>(), vec!["page_end", "page_step"]);
        assert!(!required.get("page_step").unwrap().is_mandatory());
        assert!(task.provided_outputs(None).unwrap().contains_key("page"));
    }
}
