//! Registry of DAG templates, their persisted variants and definitions.
//!
//! Templates are registered explicitly after [`DagBuilder::build`](crate::DagBuilder::build)
//! or restored from the store with [`DagRegistry::load_definition`]. A variant
//! is a clone of its template with a persisted parameter map applied; it is
//! materialized on first use and kept for later lookups. Runs always go
//! through [`DagRegistry::instantiate`], which hands out a fresh job instance.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Weak};

use parking_lot::RwLock;
use pinceau_store::{DagStore, DefinitionRecord, MemoryDagStore, StoreError, VariantRecord};

use crate::context::Context;
use crate::dag::{DagRecord, RunOptions, TaskDag};
use crate::error::{DagError, Result};
use crate::id::{DagId, DEFAULT_VARIANT};
use crate::task::TaskRegistry;
use crate::tasks::DagCallTask;
use crate::types::{Status, TaskData};

/// Selection for [`DagRegistry::list`]. Empty fields match everything.
#[derive(Debug, Clone, Default)]
pub struct DagFilter {
    /// Case-insensitive text searched in id, label and description
    pub query: Option<String>,
    pub tag: Option<String>,
    pub status: Option<Status>,
}

impl DagFilter {
    pub fn query(mut self, query: impl Into<String>) -> Self {
        self.query = Some(query.into());
        self
    }

    pub fn tag(mut self, tag: impl Into<String>) -> Self {
        self.tag = Some(tag.into());
        self
    }

    pub fn status(mut self, status: Status) -> Self {
        self.status = Some(status);
        self
    }

    fn matches(&self, dag: &TaskDag) -> bool {
        let element = dag.element();
        if let Some(status) = self.status {
            if element.status() != status {
                return false;
            }
        }
        if let Some(tag) = &self.tag {
            let tagged = element.tags().iter().any(|t| t == tag)
                || dag.params().tags.iter().any(|t| t == tag);
            if !tagged {
                return false;
            }
        }
        match &self.query {
            Some(query) => {
                let query = query.to_lowercase();
                [element.id(), element.label(), element.description()]
                    .iter()
                    .any(|field| field.to_lowercase().contains(&query))
            }
            None => true,
        }
    }
}

pub struct DagRegistry {
    templates: RwLock<BTreeMap<String, Arc<TaskDag>>>,
    variants: RwLock<HashMap<String, Arc<TaskDag>>>,
    store: Arc<dyn DagStore>,
    tasks: TaskRegistry,
}

impl DagRegistry {
    /// Registry over `store` with the built-in task types, plus `dag_call`
    /// bound to this registry.
    pub fn new(store: Arc<dyn DagStore>) -> Arc<Self> {
        Self::with_tasks(store, TaskRegistry::with_builtins())
    }

    /// Registry backed by a [`MemoryDagStore`].
    pub fn in_memory() -> Arc<Self> {
        Self::new(Arc::new(MemoryDagStore::new()))
    }

    pub fn with_tasks(store: Arc<dyn DagStore>, tasks: TaskRegistry) -> Arc<Self> {
        Arc::new_cyclic(|weak: &Weak<DagRegistry>| {
            tasks.register(DagCallTask::factory(weak.clone()));
            Self {
                templates: RwLock::new(BTreeMap::new()),
                variants: RwLock::new(HashMap::new()),
                store,
                tasks,
            }
        })
    }

    pub fn tasks(&self) -> &TaskRegistry {
        &self.tasks
    }

    pub fn store(&self) -> &Arc<dyn DagStore> {
        &self.store
    }

    /// Register a template. Fails if the id is taken or names a run instance.
    pub fn register(&self, dag: Arc<TaskDag>) -> Result<()> {
        let key = template_key(&dag)?;
        let mut templates = self.templates.write();
        if templates.contains_key(&key) {
            return Err(DagError::validation(format!(
                "DAG '{key}' is already registered"
            )));
        }
        tracing::debug!(dag = %key, tasks = dag.len(), "registered dag");
        templates.insert(key, dag);
        Ok(())
    }

    /// Register a template, replacing any previous one and its materialized variants.
    pub fn register_or_replace(&self, dag: Arc<TaskDag>) -> Result<()> {
        let key = template_key(&dag)?;
        self.forget_variants(&key);
        self.templates.write().insert(key, dag);
        Ok(())
    }

    /// A template by id, or a variant already materialized by [`variant`](Self::variant).
    pub fn get(&self, id: &str) -> Result<Arc<TaskDag>> {
        let parsed: DagId = id.parse()?;
        if !parsed.is_default_variant() {
            if let Some(dag) = self.variants.read().get(&parsed.variant_id()) {
                return Ok(dag.clone());
            }
        }
        self.templates
            .read()
            .get(parsed.template())
            .cloned()
            .ok_or_else(|| DagError::not_found("DAG", id))
    }

    pub fn contains(&self, template: &str) -> bool {
        self.templates.read().contains_key(template)
    }

    /// Unregister a template, drop its materialized variants and delete its
    /// persisted definition so that it does not come back on reload.
    pub async fn remove(&self, template: &str) -> Result<Option<Arc<TaskDag>>> {
        match self.store.delete_definition(template).await {
            Ok(()) | Err(StoreError::NotFound(_)) => {}
            Err(e) => return Err(e.into()),
        }
        self.forget_variants(template);
        let removed = self.templates.write().remove(template);
        if removed.is_some() {
            tracing::info!(dag = %template, "template removed");
        }
        Ok(removed)
    }

    /// Registered templates matching `filter`, ordered by id.
    pub fn list(&self, filter: &DagFilter) -> Vec<Arc<TaskDag>> {
        self.templates
            .read()
            .values()
            .filter(|dag| filter.matches(dag))
            .cloned()
            .collect()
    }

    /// Variant names of a template, `_default_` first.
    pub async fn variants(&self, template: &str) -> Result<Vec<String>> {
        self.template(template)?;
        let mut names = vec![DEFAULT_VARIANT.to_string()];
        for name in self.store.list_variants(template).await? {
            if name != DEFAULT_VARIANT {
                names.push(name);
            }
        }
        Ok(names)
    }

    /// Persist a variant's parameters and apply them to the variant if it is
    /// already materialized. The parameters are checked against a scratch
    /// clone first so that a bad map is never stored.
    pub async fn set_variant_params(
        &self,
        template: &str,
        variant: &str,
        params: TaskData,
    ) -> Result<()> {
        if variant.is_empty() || variant == DEFAULT_VARIANT {
            return Err(DagError::validation(
                "the default variant has no persisted parameters",
            ));
        }
        let source = self.template(template)?;
        let variant_id = DagId::new(template).with_variant(variant);
        source
            .clone_dag(Some(variant_id.new_job()))?
            .apply_variant_params(&params)?;

        self.store
            .put_variant(VariantRecord::new(template, variant, params.clone()))
            .await?;

        let materialized = self.variants.read().get(&variant_id.variant_id()).cloned();
        if let Some(dag) = materialized {
            dag.apply_variant_params(&params)?;
        }
        tracing::info!(dag = %variant_id, "variant parameters saved");
        Ok(())
    }

    pub async fn remove_variant(&self, template: &str, variant: &str) -> Result<()> {
        let variant_id = DagId::new(template).with_variant(variant);
        self.store.delete_variant(template, variant).await?;
        self.variants.write().remove(&variant_id.variant_id());
        Ok(())
    }

    /// The template itself for `_default_`, otherwise a clone of it with the
    /// persisted parameters applied.
    pub async fn variant(&self, template: &str, variant: &str) -> Result<Arc<TaskDag>> {
        let source = self.template(template)?;
        let variant_id = DagId::new(template).with_variant(variant);
        if variant_id.is_default_variant() {
            return Ok(source);
        }

        let key = variant_id.variant_id();
        if let Some(dag) = self.variants.read().get(&key) {
            return Ok(dag.clone());
        }

        let record = self
            .store
            .get_variant(template, variant)
            .await?
            .ok_or_else(|| DagError::not_found("Variant", key.clone()))?;
        let dag = source.clone_dag(Some(variant_id))?;
        dag.apply_variant_params(&record.params)?;

        Ok(self.variants.write().entry(key).or_insert(dag).clone())
    }

    /// A run instance of `id` (`template[variant]`, optionally with a job suffix).
    pub async fn instantiate(&self, id: &str) -> Result<Arc<TaskDag>> {
        let parsed: DagId = id.parse()?;
        let source = self.variant(parsed.template(), parsed.variant()).await?;
        let job = parsed.job().is_some().then_some(parsed);
        source.clone_dag(job)
    }

    /// Instantiate `id` and run it, returning the merged leaf results.
    pub async fn run(
        &self,
        id: &str,
        input: TaskData,
        ctx: &Context,
        options: RunOptions,
    ) -> Result<TaskData> {
        let dag = self.instantiate(id).await?;
        dag.validate_input(&input)?;
        dag.run_for_output(ctx, input, options).await
    }

    /// Persist the definition of a registered template.
    pub async fn save_definition(&self, template: &str) -> Result<()> {
        let dag = self.template(template)?;
        let record = serde_json::to_value(dag.serialize())?;
        self.store
            .put_definition(DefinitionRecord::new(template, record))
            .await?;
        Ok(())
    }

    /// Restore a persisted definition and register it, replacing any
    /// template of the same id.
    pub async fn load_definition(&self, template: &str) -> Result<Arc<TaskDag>> {
        let stored = self
            .store
            .get_definition(template)
            .await?
            .ok_or_else(|| DagError::not_found("Definition", template))?;
        let record: DagRecord = serde_json::from_value(stored.record)?;
        let dag = TaskDag::deserialize(&record, &self.tasks)?;
        self.register_or_replace(dag.clone())?;
        Ok(dag)
    }

    /// Restore every persisted definition. Returns the ids loaded.
    pub async fn load_definitions(&self) -> Result<Vec<String>> {
        let mut loaded = Vec::new();
        for id in self.store.list_definitions().await? {
            self.load_definition(&id).await?;
            loaded.push(id);
        }
        Ok(loaded)
    }

    fn template(&self, template: &str) -> Result<Arc<TaskDag>> {
        self.templates
            .read()
            .get(template)
            .cloned()
            .ok_or_else(|| DagError::not_found("DAG", template))
    }

    fn forget_variants(&self, template: &str) {
        self.variants
            .write()
            .retain(|key, _| key.parse::<DagId>().map_or(true, |id| id.template() != template));
    }
}

fn template_key(dag: &TaskDag) -> Result<String> {
    let id = dag.id();
    if id.job().is_some() || !id.is_default_variant() {
        return Err(DagError::validation(format!(
            "only templates can be registered, '{id}' is a variant or a run"
        )));
    }
    Ok(id.template().to_string())
}
