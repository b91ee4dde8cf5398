//! Process-wide state shared by the command handlers.

use std::sync::Arc;

use anyhow::Result;
use pinceau_core::{DagRegistry, PinceauConfig};
use pinceau_store::{DagStore, FileDagStore, MemoryDagStore};
use tracing::{debug, info};

use crate::demo;

pub struct App {
    pub config: PinceauConfig,
    pub registry: Arc<DagRegistry>,
}

impl App {
    /// Open the configured store, install the concurrency limits, register the
    /// demo DAGs and restore persisted definitions.
    pub async fn bootstrap(config: PinceauConfig) -> Result<Self> {
        let store: Arc<dyn DagStore> = match &config.store.path {
            Some(path) => {
                debug!(path = %path.display(), "using file store");
                Arc::new(FileDagStore::new(path.clone()))
            }
            None => Arc::new(MemoryDagStore::new()),
        };

        let registry = DagRegistry::new(store);
        config.apply_limits(registry.tasks())?;
        demo::register_demos(&registry)?;

        let loaded = registry.load_definitions().await?;
        if !loaded.is_empty() {
            info!(count = loaded.len(), "restored persisted DAG definitions");
        }

        Ok(Self { config, registry })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_bootstrap_registers_demos_in_memory() {
        let app = App::bootstrap(PinceauConfig::default()).await.unwrap();
        assert!(app.registry.contains("test"));
        assert!(app.registry.contains("test_yield"));
    }

    #[tokio::test]
    async fn test_bootstrap_applies_limits_and_file_store() {
        let dir = TempDir::new().unwrap();
        let mut config = PinceauConfig::from_toml("[run.max_concurrency]\nwait = 2\n").unwrap();
        config.store.path = Some(dir.path().to_path_buf());

        let app = App::bootstrap(config).await.unwrap();
        assert_eq!(app.registry.tasks().get("wait").unwrap().max_concurrency(), Some(2));
        assert!(app.registry.load_definitions().await.unwrap().is_empty());
    }
}
