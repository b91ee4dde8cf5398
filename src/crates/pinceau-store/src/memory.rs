//! In-memory [`DagStore`] for tests and single-process runs.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::error::{Result, StoreError};
use crate::traits::{DagStore, DefinitionRecord, VariantRecord};

type VariantStorage = Arc<RwLock<HashMap<String, BTreeMap<String, VariantRecord>>>>;
type DefinitionStorage = Arc<RwLock<BTreeMap<String, DefinitionRecord>>>;

/// Store keeping every record in process memory. Cloning shares the storage.
#[derive(Debug, Clone, Default)]
pub struct MemoryDagStore {
    variants: VariantStorage,
    definitions: DefinitionStorage,
}

impl MemoryDagStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop every record.
    pub async fn clear(&self) {
        self.variants.write().await.clear();
        self.definitions.write().await.clear();
    }
}

#[async_trait]
impl DagStore for MemoryDagStore {
    async fn get_variant(&self, template: &str, variant: &str) -> Result<Option<VariantRecord>> {
        let variants = self.variants.read().await;
        Ok(variants
            .get(template)
            .and_then(|by_name| by_name.get(variant))
            .cloned())
    }

    async fn put_variant(&self, record: VariantRecord) -> Result<()> {
        let mut variants = self.variants.write().await;
        variants
            .entry(record.template.clone())
            .or_default()
            .insert(record.variant.clone(), record);
        Ok(())
    }

    async fn delete_variant(&self, template: &str, variant: &str) -> Result<()> {
        let mut variants = self.variants.write().await;
        variants
            .get_mut(template)
            .and_then(|by_name| by_name.remove(variant))
            .map(|_| ())
            .ok_or_else(|| StoreError::NotFound(format!("{template}[{variant}]")))
    }

    async fn list_variants(&self, template: &str) -> Result<Vec<String>> {
        let variants = self.variants.read().await;
        Ok(variants
            .get(template)
            .map(|by_name| by_name.keys().cloned().collect())
            .unwrap_or_default())
    }

    async fn get_definition(&self, id: &str) -> Result<Option<DefinitionRecord>> {
        Ok(self.definitions.read().await.get(id).cloned())
    }

    async fn put_definition(&self, record: DefinitionRecord) -> Result<()> {
        self.definitions
            .write()
            .await
            .insert(record.id.clone(), record);
        Ok(())
    }

    async fn delete_definition(&self, id: &str) -> Result<()> {
        self.definitions
            .write()
            .await
            .remove(id)
            .map(|_| ())
            .ok_or_else(|| StoreError::NotFound(id.to_string()))
    }

    async fn list_definitions(&self) -> Result<Vec<String>> {
        Ok(self.definitions.read().await.keys().cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Map};

    fn params(value: serde_json::Value) -> Map<String, serde_json::Value> {
        value.as_object().cloned().unwrap()
    }

    #[tokio::test]
    async fn test_variant_roundtrip() {
        let store = MemoryDagStore::new();
        store
            .put_variant(VariantRecord::new(
                "test",
                "fast",
                params(json!({"wait_two": {"wait_duration": 1}})),
            ))
            .await
            .unwrap();

        let loaded = store.get_variant("test", "fast").await.unwrap().unwrap();
        assert_eq!(loaded.params["wait_two"]["wait_duration"], 1);
        assert_eq!(store.list_variants("test").await.unwrap(), vec!["fast"]);
        assert!(store.get_variant("test", "slow").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_delete_missing_variant_is_not_found() {
        let store = MemoryDagStore::new();
        let err = store.delete_variant("test", "nope").await.unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_definitions_are_listed_sorted() {
        let store = MemoryDagStore::new();
        for id in ["zeta", "alpha", "mid"] {
            store
                .put_definition(DefinitionRecord::new(id, json!({"id": id})))
                .await
                .unwrap();
        }
        assert_eq!(
            store.list_definitions().await.unwrap(),
            vec!["alpha", "mid", "zeta"]
        );

        store.delete_definition("mid").await.unwrap();
        assert!(store.get_definition("mid").await.unwrap().is_none());

        store.clear().await;
        assert!(store.list_definitions().await.unwrap().is_empty());
    }
}
