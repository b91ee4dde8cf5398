use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::contract::{KeyContract, TaskDataContract, ValueType};
use crate::error::{DagError, Result};
use crate::task::{Activation, DownstreamTask, Processor, TaskBehavior, TaskFactory, TaskOutput};
use crate::types::{EdgeKind, TaskData};

const DEFAULT_INPUT_KEY: &str = "query";

/// Routes each activation to the child whose id, label or description best
/// matches the text under `input_key`.
///
/// An exact match on id or label wins; otherwise the child sharing the most
/// words with the text is chosen, the first child breaking ties. The choice is
/// also written to the output under `branch`.
#[derive(Debug, Default)]
pub struct BranchTask;

impl BranchTask {
    pub const TYPE_TAG: &'static str = "branch";

    pub fn factory() -> TaskFactory {
        TaskFactory::new(Self::TYPE_TAG, |_| Ok(Arc::new(BranchTask)))
    }
}

fn input_key(params: &TaskData) -> String {
    params
        .get("input_key")
        .and_then(Value::as_str)
        .unwrap_or(DEFAULT_INPUT_KEY)
        .to_string()
}

fn words(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|word| !word.is_empty())
        .map(str::to_lowercase)
        .collect()
}

fn score(query: &str, child: &DownstreamTask) -> usize {
    let query_lower = query.trim().to_lowercase();
    if child.id.to_lowercase() == query_lower || child.label.to_lowercase() == query_lower {
        return usize::MAX;
    }
    let query_words = words(query);
    let child_words: Vec<String> = [&child.id, &child.label, &child.description]
        .into_iter()
        .flat_map(|text| words(text))
        .collect();
    query_words
        .iter()
        .filter(|word| child_words.contains(word))
        .count()
}

/// Index of the best matching child.
fn best_match(query: &str, children: &[DownstreamTask]) -> Option<usize> {
    let mut best: Option<(usize, usize)> = None;
    for (i, child) in children.iter().enumerate() {
        let s = score(query, child);
        if best.map_or(true, |(_, top)| s > top) {
            best = Some((i, s));
        }
    }
    best.map(|(i, _)| i)
}

impl TaskBehavior for BranchTask {
    fn required_inputs(&self, params: &TaskData) -> Result<TaskDataContract> {
        Ok(TaskDataContract::new().with(input_key(params), KeyContract::new(ValueType::String)))
    }

    fn provided_outputs(&self, _params: &TaskData) -> Result<TaskDataContract> {
        Ok(TaskDataContract::new().with("branch", KeyContract::new(ValueType::String)))
    }

    fn default_passthrough(&self) -> bool {
        true
    }

    fn as_processor(&self) -> Option<&dyn Processor> {
        Some(self)
    }

    fn routes_dynamically(&self) -> bool {
        true
    }
}

#[async_trait]
impl Processor for BranchTask {
    async fn process(&self, scope: &Activation<'_>, input: TaskData) -> Result<TaskOutput> {
        let key = input_key(&scope.params());
        let query = input
            .get(&key)
            .and_then(Value::as_str)
            .ok_or_else(|| DagError::task_execution(scope.task_id(), format!("no text under '{key}'")))?
            .to_string();

        let children = scope.downstream(EdgeKind::Default);
        let Some(chosen) = best_match(&query, &children) else {
            return Ok(TaskOutput::routed(input, Vec::new()));
        };
        let chosen = children[chosen].id.clone();
        tracing::debug!(task = scope.task_id(), branch = %chosen, "branch chosen");

        let mut output = input;
        output.insert("branch".into(), json!(chosen));
        Ok(TaskOutput::routed(output, vec![chosen]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn child(id: &str, description: &str) -> DownstreamTask {
        DownstreamTask {
            id: id.into(),
            label: id.into(),
            description: description.into(),
            kind: EdgeKind::Conditional,
        }
    }

    #[test]
    fn test_best_match_prefers_shared_words() {
        let children = vec![
            child("weather", "answer questions about the weather forecast"),
            child("billing", "handle invoices and payment problems"),
        ];
        assert_eq!(best_match("my payment failed", &children), Some(1));
        assert_eq!(best_match("WEATHER", &children), Some(0));
        assert_eq!(best_match("nothing in common", &children), Some(0));
        assert_eq!(best_match("x", &[]), None);
    }
}
