//! The [`CallbackHandler`] seam, its ordered aggregate [`CallbackManager`], and the
//! [`HandlerRegistry`] used to rebuild handlers from serialized contexts.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::context::{Context, Event};
use crate::error::{DagError, Result};

/// Observer attached to a context layer.
///
/// [`is_event_handled`](Self::is_event_handled) filters cheaply;
/// [`on_handled_event`](Self::on_handled_event) reacts and returns `true` to stop
/// propagation, both to later handlers of the same layer and to outer layers.
#[async_trait]
pub trait CallbackHandler: Send + Sync + 'static {
    /// Stable tag used by [`HandlerRegistry`].
    fn type_tag(&self) -> &str;

    fn is_event_handled(&self, _event: &Event) -> bool {
        true
    }

    async fn on_handled_event(&self, ctx: &Context, event: &Event) -> bool;

    /// Constructor arguments needed to rebuild the handler elsewhere.
    fn state(&self) -> Value {
        Value::Null
    }

    /// Process-local handlers (channels, sockets) are skipped when serializing.
    fn is_portable(&self) -> bool {
        true
    }
}

/// Filter, then react.
pub async fn dispatch(handler: &dyn CallbackHandler, ctx: &Context, event: &Event) -> bool {
    if !handler.is_event_handled(event) {
        return false;
    }
    handler.on_handled_event(ctx, event).await
}

/// Serialized form of a handler.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HandlerRecord {
    #[serde(rename = "type")]
    pub type_tag: String,
    #[serde(default)]
    pub state: Value,
}

/// Ordered list of handlers acting as one handler.
#[derive(Clone, Default)]
pub struct CallbackManager {
    handlers: Vec<Arc<dyn CallbackHandler>>,
}

impl CallbackManager {
    pub const TYPE_TAG: &'static str = "callback_manager";

    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, handler: Arc<dyn CallbackHandler>) -> Self {
        self.handlers.push(handler);
        self
    }

    pub fn push(&mut self, handler: Arc<dyn CallbackHandler>) {
        self.handlers.push(handler);
    }

    pub fn handlers(&self) -> &[Arc<dyn CallbackHandler>] {
        &self.handlers
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    /// Records of the portable handlers, in order.
    pub fn records(&self) -> Vec<HandlerRecord> {
        self.handlers
            .iter()
            .filter(|handler| handler.is_portable())
            .map(|handler| HandlerRecord {
                type_tag: handler.type_tag().to_string(),
                state: handler.state(),
            })
            .collect()
    }

    /// Rebuild a manager from records.
    pub fn from_records(records: &[HandlerRecord], registry: &HandlerRegistry) -> Result<Self> {
        let mut manager = Self::new();
        for record in records {
            manager.push(registry.build(record)?);
        }
        Ok(manager)
    }
}

impl fmt::Debug for CallbackManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.handlers.iter().map(|h| h.type_tag()))
            .finish()
    }
}

#[async_trait]
impl CallbackHandler for CallbackManager {
    fn type_tag(&self) -> &str {
        Self::TYPE_TAG
    }

    async fn on_handled_event(&self, ctx: &Context, event: &Event) -> bool {
        for handler in &self.handlers {
            if dispatch(handler.as_ref(), ctx, event).await {
                return true;
            }
        }
        false
    }

    fn state(&self) -> Value {
        serde_json::to_value(self.records()).unwrap_or(Value::Null)
    }
}

type HandlerBuilder =
    Arc<dyn Fn(&Value, &HandlerRegistry) -> Result<Arc<dyn CallbackHandler>> + Send + Sync>;

/// Type tag -> handler constructor.
#[derive(Clone, Default)]
pub struct HandlerRegistry {
    builders: HashMap<String, HandlerBuilder>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry knowing every built-in handler type.
    pub fn with_builtins() -> Self {
        use super::{
            DagExecutionCounter, DagExecutionMemory, DagExecutionTracer, TasksExecutionTracer,
            TracingHandler,
        };

        let mut registry = Self::new();
        registry.register(CallbackManager::TYPE_TAG, |state, registry| {
            let records: Vec<HandlerRecord> = serde_json::from_value(state.clone())?;
            Ok(Arc::new(CallbackManager::from_records(&records, registry)?))
        });
        registry.register(TasksExecutionTracer::TYPE_TAG, |_, _| {
            Ok(Arc::new(TasksExecutionTracer::new()))
        });
        registry.register(DagExecutionTracer::TYPE_TAG, |_, _| {
            Ok(Arc::new(DagExecutionTracer::new()))
        });
        registry.register(DagExecutionMemory::TYPE_TAG, |state, _| {
            let dag_id = state
                .get("dag_id")
                .and_then(Value::as_str)
                .ok_or_else(|| DagError::Context("execution memory needs a dag_id".into()))?;
            Ok(Arc::new(DagExecutionMemory::new(dag_id)))
        });
        registry.register(DagExecutionCounter::TYPE_TAG, |_, _| {
            Ok(Arc::new(DagExecutionCounter::new()))
        });
        registry.register(TracingHandler::TYPE_TAG, |_, _| Ok(Arc::new(TracingHandler)));
        registry
    }

    pub fn register<F>(&mut self, tag: impl Into<String>, builder: F)
    where
        F: Fn(&Value, &HandlerRegistry) -> Result<Arc<dyn CallbackHandler>> + Send + Sync + 'static,
    {
        self.builders.insert(tag.into(), Arc::new(builder));
    }

    pub fn contains(&self, tag: &str) -> bool {
        self.builders.contains_key(tag)
    }

    pub fn build(&self, record: &HandlerRecord) -> Result<Arc<dyn CallbackHandler>> {
        let builder = self
            .builders
            .get(&record.type_tag)
            .ok_or_else(|| DagError::not_found("Handler type", record.type_tag.clone()))?;
        builder(&record.state, self)
    }
}

impl fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut tags: Vec<_> = self.builders.keys().collect();
        tags.sort();
        f.debug_struct("HandlerRegistry").field("types", &tags).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::EventSender;
    use crate::types::Status;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Counting {
        seen: AtomicUsize,
        consume: bool,
    }

    #[async_trait]
    impl CallbackHandler for Counting {
        fn type_tag(&self) -> &str {
            "counting"
        }

        async fn on_handled_event(&self, _ctx: &Context, _event: &Event) -> bool {
            self.seen.fetch_add(1, Ordering::SeqCst);
            self.consume
        }
    }

    fn counting(consume: bool) -> Arc<Counting> {
        Arc::new(Counting {
            seen: AtomicUsize::new(0),
            consume,
        })
    }

    #[tokio::test]
    async fn test_manager_stops_at_first_consumer() {
        let first = counting(false);
        let second = counting(true);
        let third = counting(false);
        let manager = CallbackManager::new()
            .with(first.clone())
            .with(second.clone())
            .with(third.clone());

        let ctx = Context::global();
        let event = Event::status(EventSender::dag("d"), Status::Running, None);
        assert!(dispatch(&manager, &ctx, &event).await);
        assert_eq!(first.seen.load(Ordering::SeqCst), 1);
        assert_eq!(second.seen.load(Ordering::SeqCst), 1);
        assert_eq!(third.seen.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_unknown_handler_type_is_not_found() {
        let registry = HandlerRegistry::with_builtins();
        let err = registry
            .build(&HandlerRecord {
                type_tag: "websocket".into(),
                state: Value::Null,
            })
            .err()
            .unwrap();
        assert!(matches!(err, DagError::NotFound { .. }));
    }

    #[test]
    fn test_nested_manager_roundtrip() {
        let inner = CallbackManager::new().with(Arc::new(crate::callbacks::TracingHandler));
        let outer = CallbackManager::new()
            .with(Arc::new(inner))
            .with(Arc::new(crate::callbacks::DagExecutionMemory::new("test")));

        let records = outer.records();
        let rebuilt =
            CallbackManager::from_records(&records, &HandlerRegistry::with_builtins()).unwrap();
        assert_eq!(rebuilt.records(), records);
    }
}
