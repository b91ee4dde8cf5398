use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;

use crate::error::{DagError, Result};
use crate::task::{Activation, Processor, TaskBehavior, TaskFactory, TaskOutput, TaskRecord};
use crate::types::TaskData;

/// Sleeps `wait_duration` seconds, then passes its input on.
#[derive(Debug, Default)]
pub struct WaitTask;

impl WaitTask {
    pub const TYPE_TAG: &'static str = "wait";

    pub fn factory() -> TaskFactory {
        TaskFactory::new(Self::TYPE_TAG, |_| Ok(Arc::new(WaitTask)))
    }

    /// Record of a wait task sleeping `seconds`.
    pub fn record(id: impl Into<String>, seconds: f64) -> TaskRecord {
        TaskRecord::new(Self::TYPE_TAG, id).with_param("wait_duration", json!(seconds))
    }
}

impl TaskBehavior for WaitTask {
    fn default_passthrough(&self) -> bool {
        true
    }

    fn default_label(&self, params: &TaskData) -> Option<String> {
        let duration = params.get("wait_duration")?;
        Some(format!("Wait {duration}s"))
    }

    fn as_processor(&self) -> Option<&dyn Processor> {
        Some(self)
    }
}

#[async_trait]
impl Processor for WaitTask {
    async fn process(&self, scope: &Activation<'_>, input: TaskData) -> Result<TaskOutput> {
        let seconds = scope.param::<f64>("wait_duration")?.unwrap_or(0.0);
        if !seconds.is_finite() || seconds < 0.0 {
            return Err(DagError::task_execution(
                scope.task_id(),
                format!("invalid wait_duration {seconds}"),
            ));
        }
        tracing::trace!(task = scope.task_id(), seconds, "waiting");
        tokio::time::sleep(Duration::from_secs_f64(seconds)).await;
        Ok(input.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_label_follows_duration() {
        let factory = WaitTask::factory();
        let task = factory
            .create(TaskRecord::new("wait", "w").with_param("wait_duration", json!(5)))
            .unwrap();
        assert_eq!(task.label(), "Wait 5s");

        let named = factory
            .create(
                TaskRecord::new("wait", "b")
                    .with_label("B 5s")
                    .with_param("wait_duration", json!(5)),
            )
            .unwrap();
        assert_eq!(named.label(), "B 5s");

        let bare = factory.create(TaskRecord::new("wait", "bare")).unwrap();
        assert_eq!(bare.label(), "bare");
    }
}
