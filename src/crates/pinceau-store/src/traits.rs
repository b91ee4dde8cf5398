//! The [`DagStore`] trait: what the DAG core needs from a persistence backend.
//!
//! Two record families are stored:
//!
//! - **Variant parameters**, keyed by `(template_id, variant_name)`. The payload maps
//!   task ids to parameter objects, plus the reserved `__dag__` key for DAG-level
//!   parameters.
//! - **DAG definitions**, keyed by DAG id. The payload is an opaque serialized DAG
//!   record that the core knows how to rebuild through its task registry.
//!
//! Both payloads are `serde_json` values; the store never interprets them.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::Result;

/// Persisted parameter set for one variant of a template DAG.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VariantRecord {
    /// Template DAG id (no variant, no job suffix)
    pub template: String,
    /// Variant name
    pub variant: String,
    /// Task id -> parameters, plus `__dag__`
    pub params: Map<String, Value>,
    /// Last write time
    pub updated_at: DateTime<Utc>,
}

impl VariantRecord {
    /// Create a record stamped with the current time.
    pub fn new(
        template: impl Into<String>,
        variant: impl Into<String>,
        params: Map<String, Value>,
    ) -> Self {
        Self {
            template: template.into(),
            variant: variant.into(),
            params,
            updated_at: Utc::now(),
        }
    }
}

/// Persisted DAG definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DefinitionRecord {
    /// DAG id
    pub id: String,
    /// Serialized DAG
    pub record: Value,
    /// Last write time
    pub updated_at: DateTime<Utc>,
}

impl DefinitionRecord {
    pub fn new(id: impl Into<String>, record: Value) -> Self {
        Self {
            id: id.into(),
            record,
            updated_at: Utc::now(),
        }
    }
}

/// Backend for DAG variant parameters and DAG definitions.
///
/// Reads return `Ok(None)` for missing records; deletes of missing records
/// return [`StoreError::NotFound`](crate::StoreError::NotFound).
#[async_trait]
pub trait DagStore: Send + Sync {
    /// Load the parameters of `template[variant]`.
    async fn get_variant(&self, template: &str, variant: &str) -> Result<Option<VariantRecord>>;

    /// Insert or replace a variant record.
    async fn put_variant(&self, record: VariantRecord) -> Result<()>;

    /// Delete a variant record.
    async fn delete_variant(&self, template: &str, variant: &str) -> Result<()>;

    /// Variant names stored for `template`, sorted.
    async fn list_variants(&self, template: &str) -> Result<Vec<String>>;

    /// Load a DAG definition.
    async fn get_definition(&self, id: &str) -> Result<Option<DefinitionRecord>>;

    /// Insert or replace a DAG definition.
    async fn put_definition(&self, record: DefinitionRecord) -> Result<()>;

    /// Delete a DAG definition.
    async fn delete_definition(&self, id: &str) -> Result<()>;

    /// Stored definition ids, sorted.
    async fn list_definitions(&self) -> Result<Vec<String>>;
}
