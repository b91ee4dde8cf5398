//! Layered configuration.
//!
//! Sources, later ones overriding earlier ones field by field:
//! 1. Default values
//! 2. User-level config: `~/.pinceau/config.toml`
//! 3. Project-level config: `./pinceau.toml`
//! 4. An explicit path (`--config`)
//! 5. Environment: `PINCEAU_LOG`, `PINCEAU_DEADLINE_SECS`,
//!    `PINCEAU_STORE_PATH`, `PINCEAU_WORKER_TAG`
//!
//! ```toml
//! [run]
//! deadline_secs = 600
//! worker_tag = "gpu"
//!
//! [run.max_concurrency]
//! wait = 2
//!
//! [logging]
//! level = "debug"
//!
//! [store]
//! path = "/var/lib/pinceau"
//! ```

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::fs;
use tracing::debug;

use crate::dag::RunOptions;
use crate::error::{DagError, Result};
use crate::task::TaskRegistry;

pub const ENV_LOG: &str = "PINCEAU_LOG";
pub const ENV_DEADLINE_SECS: &str = "PINCEAU_DEADLINE_SECS";
pub const ENV_STORE_PATH: &str = "PINCEAU_STORE_PATH";
pub const ENV_WORKER_TAG: &str = "PINCEAU_WORKER_TAG";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PinceauConfig {
    pub run: RunConfig,
    pub logging: LoggingConfig,
    pub store: StoreConfig,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    /// Whole-run deadline; none means runs are never cut short
    pub deadline_secs: Option<f64>,
    /// Queue for remote tasks whose DAG names none
    pub worker_tag: Option<String>,
    /// Class-level permits per task type tag
    pub max_concurrency: BTreeMap<String, usize>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Directory of the JSON-file store; in-memory when absent
    pub path: Option<PathBuf>,
}

impl PinceauConfig {
    pub fn from_toml(text: &str) -> Result<Self> {
        toml::from_str(text).map_err(|e| DagError::Configuration(format!("invalid config: {e}")))
    }

    /// Overlay the fields `other` sets.
    pub fn merge(&mut self, other: PinceauConfig) {
        if other.run.deadline_secs.is_some() {
            self.run.deadline_secs = other.run.deadline_secs;
        }
        if other.run.worker_tag.is_some() {
            self.run.worker_tag = other.run.worker_tag;
        }
        self.run.max_concurrency.extend(other.run.max_concurrency);
        if other.logging.level.is_some() {
            self.logging.level = other.logging.level;
        }
        if other.store.path.is_some() {
            self.store.path = other.store.path;
        }
    }

    /// Overlay environment variables, read through `lookup`.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(level) = lookup(ENV_LOG) {
            self.logging.level = Some(level);
        }
        if let Some(secs) = lookup(ENV_DEADLINE_SECS) {
            let secs = secs.trim().parse::<f64>().map_err(|e| {
                DagError::Configuration(format!("{ENV_DEADLINE_SECS}='{secs}': {e}"))
            })?;
            self.run.deadline_secs = Some(secs);
        }
        if let Some(path) = lookup(ENV_STORE_PATH) {
            self.store.path = Some(PathBuf::from(path));
        }
        if let Some(tag) = lookup(ENV_WORKER_TAG) {
            self.run.worker_tag = Some(tag);
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if let Some(secs) = self.run.deadline_secs {
            if !secs.is_finite() || secs <= 0.0 {
                return Err(DagError::Configuration(format!(
                    "run.deadline_secs must be positive, got {secs}"
                )));
            }
        }
        Ok(())
    }

    pub fn deadline(&self) -> Option<Duration> {
        self.run
            .deadline_secs
            .filter(|secs| secs.is_finite() && *secs > 0.0)
            .map(Duration::from_secs_f64)
    }

    pub fn run_options(&self) -> RunOptions {
        RunOptions {
            deadline: self.deadline(),
        }
    }

    /// Install the configured class-level limits on `registry`.
    pub fn apply_limits(&self, registry: &TaskRegistry) -> Result<()> {
        for (tag, permits) in &self.run.max_concurrency {
            registry.limit(tag, *permits)?;
        }
        Ok(())
    }
}

/// Loads [`PinceauConfig`] from its layered sources.
#[derive(Debug, Clone)]
pub struct ConfigLoader {
    user_config_path: Option<PathBuf>,
    project_config_path: PathBuf,
    explicit_path: Option<PathBuf>,
}

impl ConfigLoader {
    pub fn new() -> Self {
        Self {
            user_config_path: dirs::home_dir().map(|home| home.join(".pinceau").join("config.toml")),
            project_config_path: PathBuf::from("pinceau.toml"),
            explicit_path: None,
        }
    }

    /// Also read `path`, which must exist.
    pub fn with_explicit(mut self, path: impl Into<PathBuf>) -> Self {
        self.explicit_path = Some(path.into());
        self
    }

    pub fn with_user_path(mut self, path: Option<PathBuf>) -> Self {
        self.user_config_path = path;
        self
    }

    pub fn with_project_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.project_config_path = path.into();
        self
    }

    pub fn user_config_path(&self) -> Option<&Path> {
        self.user_config_path.as_deref()
    }

    pub fn project_config_path(&self) -> &Path {
        &self.project_config_path
    }

    /// Layer every source, the process environment last.
    pub async fn load(&self) -> Result<PinceauConfig> {
        self.load_with_env(|key| std::env::var(key).ok()).await
    }

    pub async fn load_with_env<F>(&self, lookup: F) -> Result<PinceauConfig>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = PinceauConfig::default();

        let optional = self
            .user_config_path
            .iter()
            .chain(std::iter::once(&self.project_config_path));
        for path in optional {
            match Self::load_from_path(path).await? {
                Some(layer) => {
                    debug!(path = %path.display(), "loaded config layer");
                    config.merge(layer);
                }
                None => debug!(path = %path.display(), "config layer not found"),
            }
        }

        if let Some(path) = &self.explicit_path {
            let layer = Self::load_from_path(path).await?.ok_or_else(|| {
                DagError::Configuration(format!("config file not found: {}", path.display()))
            })?;
            debug!(path = %path.display(), "loaded explicit config");
            config.merge(layer);
        }

        config.apply_env(lookup)?;
        config.validate()?;
        Ok(config)
    }

    async fn load_from_path(path: &Path) -> Result<Option<PinceauConfig>> {
        if !fs::try_exists(path).await.unwrap_or(false) {
            return Ok(None);
        }
        let content = fs::read_to_string(path).await.map_err(|e| {
            DagError::Configuration(format!("failed to read {}: {e}", path.display()))
        })?;
        PinceauConfig::from_toml(&content).map(Some)
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn no_env(_: &str) -> Option<String> {
        None
    }

    fn loader_in(dir: &TempDir) -> ConfigLoader {
        ConfigLoader::new()
            .with_user_path(Some(dir.path().join("user.toml")))
            .with_project_path(dir.path().join("pinceau.toml"))
    }

    #[tokio::test]
    async fn test_defaults_when_no_files() {
        let dir = TempDir::new().unwrap();
        let config = loader_in(&dir).load_with_env(no_env).await.unwrap();
        assert_eq!(config, PinceauConfig::default());
        assert!(config.run_options().deadline.is_none());
    }

    #[tokio::test]
    async fn test_project_overrides_user_field_by_field() {
        let dir = TempDir::new().unwrap();
        fs::write(
            dir.path().join("user.toml"),
            "[run]\ndeadline_secs = 30\nworker_tag = \"cpu\"\n[run.max_concurrency]\nwait = 1\n",
        )
        .await
        .unwrap();
        fs::write(
            dir.path().join("pinceau.toml"),
            "[run]\nworker_tag = \"gpu\"\n[run.max_concurrency]\nrange = 2\n[logging]\nlevel = \"debug\"\n",
        )
        .await
        .unwrap();

        let config = loader_in(&dir).load_with_env(no_env).await.unwrap();
        assert_eq!(config.run.deadline_secs, Some(30.0));
        assert_eq!(config.run.worker_tag.as_deref(), Some("gpu"));
        assert_eq!(config.run.max_concurrency.len(), 2);
        assert_eq!(config.logging.level.as_deref(), Some("debug"));
        assert_eq!(config.run_options().deadline, Some(Duration::from_secs(30)));
    }

    #[tokio::test]
    async fn test_environment_wins_and_is_checked() {
        let dir = TempDir::new().unwrap();
        let env = |key: &str| match key {
            ENV_LOG => Some("trace".to_string()),
            ENV_STORE_PATH => Some("/tmp/pinceau".to_string()),
            _ => None,
        };
        let config = loader_in(&dir).load_with_env(env).await.unwrap();
        assert_eq!(config.logging.level.as_deref(), Some("trace"));
        assert_eq!(config.store.path, Some(PathBuf::from("/tmp/pinceau")));

        let bad = |key: &str| (key == ENV_DEADLINE_SECS).then(|| "soon".to_string());
        let err = loader_in(&dir).load_with_env(bad).await.unwrap_err();
        assert!(matches!(err, DagError::Configuration(_)));
    }

    #[tokio::test]
    async fn test_missing_explicit_file_is_an_error() {
        let dir = TempDir::new().unwrap();
        let loader = loader_in(&dir).with_explicit(dir.path().join("absent.toml"));
        assert!(loader.load_with_env(no_env).await.is_err());
    }

    #[test]
    fn test_negative_deadline_is_rejected() {
        let config = PinceauConfig::from_toml("[run]\ndeadline_secs = -1\n").unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_limits_reach_the_registry() {
        let registry = TaskRegistry::with_builtins();
        let config = PinceauConfig::from_toml("[run.max_concurrency]\nwait = 3\n").unwrap();
        config.apply_limits(&registry).unwrap();
        assert_eq!(registry.get("wait").unwrap().max_concurrency(), Some(3));
    }
}
