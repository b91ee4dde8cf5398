//! JSON-file [`DagStore`]: one pretty-printed document per record.
//!
//! Layout under the root directory:
//!
//! ```text
//! <root>/variants/<template>/<variant>.json
//! <root>/definitions/<id>.json
//! ```

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::fs;

use crate::error::{Result, StoreError};
use crate::traits::{DagStore, DefinitionRecord, VariantRecord};

const EXTENSION: &str = "json";

/// Store persisting records as JSON files below a root directory.
#[derive(Debug, Clone)]
pub struct FileDagStore {
    root: PathBuf,
}

impl FileDagStore {
    /// Use `root` as the storage directory. It is created lazily on first write.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn variant_dir(&self, template: &str) -> Result<PathBuf> {
        Ok(self.root.join("variants").join(file_stem(template)?))
    }

    fn variant_path(&self, template: &str, variant: &str) -> Result<PathBuf> {
        Ok(self
            .variant_dir(template)?
            .join(format!("{}.{EXTENSION}", file_stem(variant)?)))
    }

    fn definition_dir(&self) -> PathBuf {
        self.root.join("definitions")
    }

    fn definition_path(&self, id: &str) -> Result<PathBuf> {
        Ok(self
            .definition_dir()
            .join(format!("{}.{EXTENSION}", file_stem(id)?)))
    }
}

/// Reject keys that would escape the store directory.
fn file_stem(key: &str) -> Result<&str> {
    if key.is_empty() || key.starts_with('.') || key.contains(['/', '\\']) {
        return Err(StoreError::Invalid(format!(
            "'{key}' cannot be used as a record key"
        )));
    }
    Ok(key)
}

async fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    match fs::read(path).await {
        Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

async fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).await?;
    }
    let bytes = serde_json::to_vec_pretty(value)?;
    fs::write(path, bytes).await?;
    tracing::debug!(path = %path.display(), "record written");
    Ok(())
}

async fn remove(path: &Path, key: String) -> Result<()> {
    match fs::remove_file(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(StoreError::NotFound(key)),
        Err(e) => Err(e.into()),
    }
}

async fn list_stems(dir: &Path) -> Result<Vec<String>> {
    let mut entries = match fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };

    let mut stems = Vec::new();
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        if path.extension().and_then(|ext| ext.to_str()) != Some(EXTENSION) {
            continue;
        }
        if let Some(stem) = path.file_stem().and_then(|stem| stem.to_str()) {
            stems.push(stem.to_string());
        }
    }
    stems.sort();
    Ok(stems)
}

#[async_trait]
impl DagStore for FileDagStore {
    async fn get_variant(&self, template: &str, variant: &str) -> Result<Option<VariantRecord>> {
        read_json(&self.variant_path(template, variant)?).await
    }

    async fn put_variant(&self, record: VariantRecord) -> Result<()> {
        let path = self.variant_path(&record.template, &record.variant)?;
        write_json(&path, &record).await
    }

    async fn delete_variant(&self, template: &str, variant: &str) -> Result<()> {
        let path = self.variant_path(template, variant)?;
        remove(&path, format!("{template}[{variant}]")).await
    }

    async fn list_variants(&self, template: &str) -> Result<Vec<String>> {
        list_stems(&self.variant_dir(template)?).await
    }

    async fn get_definition(&self, id: &str) -> Result<Option<DefinitionRecord>> {
        read_json(&self.definition_path(id)?).await
    }

    async fn put_definition(&self, record: DefinitionRecord) -> Result<()> {
        let path = self.definition_path(&record.id)?;
        write_json(&path, &record).await
    }

    async fn delete_definition(&self, id: &str) -> Result<()> {
        remove(&self.definition_path(id)?, id.to_string()).await
    }

    async fn list_definitions(&self) -> Result<Vec<String>> {
        list_stems(&self.definition_dir()).await
    }
}
