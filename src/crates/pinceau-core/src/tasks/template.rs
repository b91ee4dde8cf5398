use std::sync::{Arc, LazyLock};

use async_trait::async_trait;
use regex::Regex;
use serde_json::Value;

use crate::contract::{KeyContract, TaskDataContract, ValueType};
use crate::error::{DagError, Result};
use crate::task::{Activation, Processor, TaskBehavior, TaskFactory, TaskOutput};
use crate::types::TaskData;

const DEFAULT_OUTPUT_KEY: &str = "text";

static PLACEHOLDER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\{([A-Za-z_][A-Za-z0-9_]*)\}").unwrap());

/// Placeholder names of `template`, in order of first appearance.
pub(crate) fn placeholders(template: &str) -> Vec<String> {
    let mut names: Vec<String> = Vec::new();
    for captures in PLACEHOLDER.captures_iter(template) {
        let name = captures[1].to_string();
        if !names.contains(&name) {
            names.push(name);
        }
    }
    names
}

fn render(template: &str, values: &TaskData) -> std::result::Result<String, String> {
    let mut missing = Vec::new();
    let rendered = PLACEHOLDER.replace_all(template, |captures: &regex::Captures<'_>| {
        match values.get(&captures[1]) {
            Some(Value::String(text)) => text.clone(),
            Some(other) => other.to_string(),
            None => {
                missing.push(captures[1].to_string());
                String::new()
            }
        }
    });
    if missing.is_empty() {
        Ok(rendered.into_owned())
    } else {
        Err(format!("no value for {}", missing.join(", ")))
    }
}

/// Renders `template`, replacing `{name}` with the input value of `name`.
///
/// Every placeholder is a required input. The text goes to `output_key`.
#[derive(Debug, Default)]
pub struct TemplateTask;

impl TemplateTask {
    pub const TYPE_TAG: &'static str = "template";

    pub fn factory() -> TaskFactory {
        TaskFactory::new(Self::TYPE_TAG, |record| {
            if !record.params.get("template").is_some_and(Value::is_string) {
                return Err(DagError::validation(format!(
                    "template task '{}' needs a 'template' string",
                    record.id
                )));
            }
            Ok(Arc::new(TemplateTask))
        })
    }
}

fn template_of(params: &TaskData) -> &str {
    params.get("template").and_then(Value::as_str).unwrap_or_default()
}

fn output_key(params: &TaskData) -> String {
    params
        .get("output_key")
        .and_then(Value::as_str)
        .unwrap_or(DEFAULT_OUTPUT_KEY)
        .to_string()
}

impl TaskBehavior for TemplateTask {
    fn required_inputs(&self, params: &TaskData) -> Result<TaskDataContract> {
        Ok(placeholders(template_of(params))
            .into_iter()
            .filter(|name| !params.contains_key(name))
            .map(|name| (name, KeyContract::new(ValueType::Any)))
            .collect())
    }

    fn provided_outputs(&self, params: &TaskData) -> Result<TaskDataContract> {
        Ok(TaskDataContract::new().with(output_key(params), KeyContract::new(ValueType::String)))
    }

    fn as_processor(&self) -> Option<&dyn Processor> {
        Some(self)
    }
}

#[async_trait]
impl Processor for TemplateTask {
    async fn process(&self, scope: &Activation<'_>, input: TaskData) -> Result<TaskOutput> {
        let params = scope.params();
        let values = scope.merged_input(&input);
        let text = render(template_of(&params), &values)
            .map_err(|e| DagError::task_execution(scope.task_id(), e))?;

        let mut output = TaskData::new();
        output.insert(output_key(&params), Value::String(text));
        Ok(output.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::TaskRecord;
    use serde_json::json;

    #[test]
    fn test_placeholders_become_required_inputs() {
        let task = TemplateTask::factory()
            .create(
                TaskRecord::new("template", "greet")
                    .with_param("template", json!("Hello {name}, {greeting} {name}"))
                    .with_param("greeting", json!("welcome")),
            )
            .unwrap();
        assert_eq!(task.required_inputs().unwrap().keys().collect::<Vec<_>>(), vec!["name"]);
        assert!(task.provided_outputs(None).unwrap().contains_key("text"));
    }

    #[test]
    fn test_render_reports_missing_values() {
        let mut values = TaskData::new();
        values.insert("n".into(), json!(3));
        assert_eq!(render("{n} items", &values).unwrap(), "3 items");
        assert_eq!(render("{n} of {m}", &values).unwrap_err(), "no value for m");
    }

    #[test]
    fn test_template_param_is_required() {
        assert!(TemplateTask::factory()
            .create(TaskRecord::new("template", "t"))
            .is_err());
    }
}
