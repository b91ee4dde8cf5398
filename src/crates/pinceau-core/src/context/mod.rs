//! Layered execution contexts
//!
//! A [`Context`] is a stack of [`ContextLayer`]s, for example a process-wide
//! *global* layer wrapped by a per-run *local* layer. Each layer carries key/value
//! state, a [`CallbackManager`] and typed extensions.
//!
//! | operation | rule |
//! |-----------|------|
//! | [`get`](Context::get) | innermost layer holding the key wins |
//! | [`set`](Context::set) | always writes the innermost layer |
//! | [`update`](Context::update) | writes the innermost layer already holding the key |
//! | [`event`](Context::event) | layers innermost-first; the first handler returning `true` stops propagation |
//! | [`cast_as`](Context::cast_as) | innermost extension of the requested type |
//!
//! Wrapping never mutates the wrapped context: [`Context::with_layer`] returns a
//! new context sharing the outer layers.
//!
//! ```rust
//! use pinceau_core::context::{Context, ContextLayer};
//! use serde_json::json;
//!
//! let global = Context::global();
//! global.set("region", json!("eu"));
//!
//! let run = global.with_layer(ContextLayer::new("local"));
//! run.set("region", json!("us"));
//!
//! assert_eq!(run.get("region"), Some(json!("us")));
//! assert_eq!(global.get("region"), Some(json!("eu")));
//! ```

mod event;

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::callbacks::{dispatch, CallbackHandler, CallbackManager, HandlerRecord, HandlerRegistry};
use crate::error::{DagError, Result};
use crate::types::TaskData;

pub use event::{Event, EventKind, EventSender, SenderKind};

type Extension = Arc<dyn Any + Send + Sync>;

/// One layer of a [`Context`].
pub struct ContextLayer {
    name: String,
    values: RwLock<TaskData>,
    callbacks: CallbackManager,
    extensions: RwLock<Vec<Extension>>,
}

impl ContextLayer {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            values: RwLock::new(TaskData::new()),
            callbacks: CallbackManager::new(),
            extensions: RwLock::new(Vec::new()),
        }
    }

    pub fn with_callbacks(mut self, callbacks: CallbackManager) -> Self {
        self.callbacks = callbacks;
        self
    }

    pub fn with_handler(mut self, handler: Arc<dyn CallbackHandler>) -> Self {
        self.callbacks.push(handler);
        self
    }

    pub fn with_values(self, values: TaskData) -> Self {
        *self.values.write() = values;
        self
    }

    pub fn with_extension<T: Any + Send + Sync>(self, extension: Arc<T>) -> Self {
        self.extensions.write().push(extension);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn callbacks(&self) -> &CallbackManager {
        &self.callbacks
    }

    pub fn values(&self) -> TaskData {
        self.values.read().clone()
    }

    fn record(&self) -> LayerRecord {
        LayerRecord {
            name: self.name.clone(),
            values: self.values(),
            handlers: self.callbacks.records(),
        }
    }
}

impl fmt::Debug for ContextLayer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContextLayer")
            .field("name", &self.name)
            .field("callbacks", &self.callbacks)
            .finish()
    }
}

/// Stack of context layers. Cloning is cheap and shares the layers.
#[derive(Clone, Debug)]
pub struct Context {
    inner: Arc<ContextLayer>,
    /// Outer layers, innermost first
    outer: Vec<Arc<ContextLayer>>,
}

impl Context {
    pub fn new(layer: ContextLayer) -> Self {
        Self {
            inner: Arc::new(layer),
            outer: Vec::new(),
        }
    }

    /// Single empty layer named `global`.
    pub fn global() -> Self {
        Self::new(ContextLayer::new("global"))
    }

    /// Wrap this context with a new innermost layer.
    pub fn with_layer(&self, layer: ContextLayer) -> Self {
        let mut outer = Vec::with_capacity(self.outer.len() + 1);
        outer.push(self.inner.clone());
        outer.extend(self.outer.iter().cloned());
        Self {
            inner: Arc::new(layer),
            outer,
        }
    }

    /// Wrap with a per-run `local` layer carrying `callbacks`.
    pub fn with_local(&self, callbacks: CallbackManager) -> Self {
        self.with_layer(ContextLayer::new("local").with_callbacks(callbacks))
    }

    /// Layers, innermost first.
    pub fn layers(&self) -> impl Iterator<Item = &Arc<ContextLayer>> {
        std::iter::once(&self.inner).chain(self.outer.iter())
    }

    pub fn innermost(&self) -> &Arc<ContextLayer> {
        &self.inner
    }

    pub fn get(&self, key: &str) -> Option<Value> {
        self.layers()
            .find_map(|layer| layer.values.read().get(key).cloned())
    }

    pub fn has(&self, key: &str) -> bool {
        self.layers()
            .any(|layer| layer.values.read().contains_key(key))
    }

    pub fn set(&self, key: impl Into<String>, value: Value) {
        self.inner.values.write().insert(key.into(), value);
    }

    /// Overwrite `key` where it already lives, else set it on the innermost layer.
    pub fn update(&self, key: impl Into<String>, value: Value) {
        let key = key.into();
        let owner = self
            .layers()
            .find(|layer| layer.values.read().contains_key(&key))
            .unwrap_or(&self.inner);
        owner.values.write().insert(key, value);
    }

    /// Register an extension on the innermost layer.
    pub fn insert_extension<T: Any + Send + Sync>(&self, extension: Arc<T>) {
        self.inner.extensions.write().push(extension);
    }

    /// Innermost extension of type `T`.
    pub fn cast_as<T: Any + Send + Sync>(&self) -> Result<Arc<T>> {
        for layer in self.layers() {
            let extensions = layer.extensions.read();
            for extension in extensions.iter().rev() {
                if let Ok(found) = extension.clone().downcast::<T>() {
                    return Ok(found);
                }
            }
        }
        Err(DagError::not_found(
            "Context extension",
            std::any::type_name::<T>(),
        ))
    }

    /// Propagate an event innermost-first. Returns whether a handler consumed it.
    pub async fn event(&self, event: Event) -> bool {
        for layer in self.layers() {
            if dispatch(&layer.callbacks, self, &event).await {
                return true;
            }
        }
        false
    }

    /// Structural snapshot: layer names, values and portable handlers.
    pub fn serialize(&self) -> ContextRecord {
        let mut layers: Vec<LayerRecord> = self.layers().map(|layer| layer.record()).collect();
        layers.reverse();
        ContextRecord { layers }
    }

    /// Rebuild a context from a snapshot. Extensions are not carried over.
    pub fn deserialize(record: &ContextRecord, handlers: &HandlerRegistry) -> Result<Self> {
        let mut context: Option<Context> = None;
        for layer_record in &record.layers {
            let layer = ContextLayer::new(layer_record.name.clone())
                .with_values(layer_record.values.clone())
                .with_callbacks(CallbackManager::from_records(
                    &layer_record.handlers,
                    handlers,
                )?);
            context = Some(match context {
                Some(outer) => outer.with_layer(layer),
                None => Context::new(layer),
            });
        }
        context.ok_or_else(|| DagError::Context("a context needs at least one layer".into()))
    }
}

/// Serialized [`ContextLayer`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LayerRecord {
    pub name: String,
    #[serde(default)]
    pub values: TaskData,
    #[serde(default)]
    pub handlers: Vec<HandlerRecord>,
}

/// Serialized [`Context`], outermost layer first.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextRecord {
    pub layers: Vec<LayerRecord>,
}
