use std::collections::HashMap;
use std::sync::{Arc, Weak};

use parking_lot::RwLock;

use crate::error::{DagError, Result};
use crate::task::{Task, TaskFactory, TaskRecord};
use crate::tasks::{BranchTask, ForkTask, RangeTask, RemoteTask, RoundRobinTask, TemplateTask, WaitTask};

type Factories = RwLock<HashMap<String, TaskFactory>>;

/// Type tag to [`TaskFactory`] map used to rebuild tasks from records.
///
/// Cheap to clone; clones share the same table.
#[derive(Clone, Default)]
pub struct TaskRegistry {
    factories: Arc<Factories>,
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with every built-in task type.
    pub fn with_builtins() -> Self {
        let registry = Self::new();
        registry.register(WaitTask::factory());
        registry.register(RangeTask::factory());
        registry.register(RoundRobinTask::factory());
        registry.register(BranchTask::factory());
        registry.register(TemplateTask::factory());
        registry.register(ForkTask::factory());
        registry.register(RemoteTask::factory(registry.downgrade()));
        registry
    }

    /// Handle that does not keep the table alive, for factories that build
    /// other tasks.
    pub fn downgrade(&self) -> WeakTaskRegistry {
        WeakTaskRegistry(Arc::downgrade(&self.factories))
    }

    /// Add or replace the factory for its type tag.
    pub fn register(&self, factory: TaskFactory) {
        tracing::trace!(tag = factory.type_tag(), "registering task type");
        self.factories
            .write()
            .insert(factory.type_tag().to_string(), factory);
    }

    pub fn contains(&self, tag: &str) -> bool {
        self.factories.read().contains_key(tag)
    }

    pub fn get(&self, tag: &str) -> Result<TaskFactory> {
        lookup(&self.factories, tag)
    }

    /// Registered tags, sorted.
    pub fn tags(&self) -> Vec<String> {
        let mut tags: Vec<String> = self.factories.read().keys().cloned().collect();
        tags.sort();
        tags
    }

    pub fn create(&self, record: TaskRecord) -> Result<Arc<Task>> {
        self.get(&record.type_tag)?.create(record)
    }

    /// Share `permits` concurrent activations across every task of type `tag`
    /// created from now on.
    pub fn limit(&self, tag: &str, permits: usize) -> Result<()> {
        let mut factories = self.factories.write();
        let factory = factories
            .get_mut(tag)
            .ok_or_else(|| DagError::not_found("Task type", tag))?;
        *factory = factory.clone().with_max_concurrency(permits);
        Ok(())
    }
}

fn lookup(factories: &Factories, tag: &str) -> Result<TaskFactory> {
    factories
        .read()
        .get(tag)
        .cloned()
        .ok_or_else(|| DagError::not_found("Task type", tag))
}

/// Weak counterpart of [`TaskRegistry`].
#[derive(Clone, Debug, Default)]
pub struct WeakTaskRegistry(Weak<Factories>);

impl WeakTaskRegistry {
    pub fn upgrade(&self) -> Option<TaskRegistry> {
        self.0.upgrade().map(|factories| TaskRegistry { factories })
    }
}

impl std::fmt::Debug for TaskRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskRegistry")
            .field("tags", &self.tags())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_builtins_are_registered() {
        let registry = TaskRegistry::with_builtins();
        for tag in ["wait", "range", "round_robin", "branch", "template", "fork", "remote"] {
            assert!(registry.contains(tag), "missing {tag}");
        }
    }

    #[test]
    fn test_unknown_tag_is_not_found() {
        let registry = TaskRegistry::new();
        let err = registry.create(TaskRecord::new("nope", "x")).unwrap_err();
        assert!(matches!(err, DagError::NotFound { kind: "Task type", .. }));
    }

    #[test]
    fn test_limit_applies_to_new_tasks() {
        let registry = TaskRegistry::with_builtins();
        registry.limit("wait", 3).unwrap();
        let task = registry
            .create(TaskRecord::new("wait", "w").with_param("wait_duration", json!(0)))
            .unwrap();
        assert_eq!(task.factory().max_concurrency(), Some(3));
        assert!(registry.limit("missing", 1).is_err());
    }
}
