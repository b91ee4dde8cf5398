//! Command handlers for the `pinceau` binary.
//!
//! Handlers print to stdout. The pieces worth testing (input parsing, the run
//! itself, the tables) are split out so they can be checked without a
//! terminal.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, bail, Context as _, Result};
use clap::ValueEnum;
use futures::FutureExt;
use pinceau_core::callbacks::{DagExecutionMemory, EventChannel, TracingHandler};
use pinceau_core::tasks::{LocalDispatcher, RemoteDispatch};
use pinceau_core::visualization::{export, ExportOptions, Format};
use pinceau_core::{Context, ContextLayer, DagFilter, DagRecord, Event, TaskDag, TaskData};
use serde_json::{Map, Value};
use tokio_stream::StreamExt;
use tracing::info;

use crate::app::App;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum GraphFormat {
    Dot,
    Mermaid,
}

impl From<GraphFormat> for Format {
    fn from(format: GraphFormat) -> Self {
        match format {
            GraphFormat::Dot => Format::Dot,
            GraphFormat::Mermaid => Format::Mermaid,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum RecordFormat {
    Json,
    Yaml,
}

impl RecordFormat {
    /// YAML for `.yaml`/`.yml` files, JSON otherwise.
    pub fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|ext| ext.to_str()) {
            Some("yaml" | "yml") => RecordFormat::Yaml,
            _ => RecordFormat::Json,
        }
    }
}

/// Parse a JSON object given on the command line.
pub fn parse_object(text: &str, what: &str) -> Result<TaskData> {
    let value: Value =
        serde_json::from_str(text).with_context(|| format!("{what} is not valid JSON"))?;
    match value {
        Value::Object(map) => Ok(map),
        other => bail!("{what} must be a JSON object, got {other}"),
    }
}

/// `[id, status, tags, label]` per registered DAG.
pub fn list_rows(app: &App, filter: &DagFilter) -> Vec<[String; 4]> {
    app.registry
        .list(filter)
        .into_iter()
        .map(|dag| {
            let element = dag.element();
            [
                dag.dag_id(),
                dag.status().to_string(),
                element.tags().join(","),
                element.label().to_string(),
            ]
        })
        .collect()
}

/// Handle `list`
pub fn handle_list(app: &App, query: Option<String>, tag: Option<String>) -> Result<()> {
    let mut filter = DagFilter::default();
    if let Some(query) = query {
        filter = filter.query(query);
    }
    if let Some(tag) = tag {
        filter = filter.tag(tag);
    }

    let rows = list_rows(app, &filter);
    if rows.is_empty() {
        println!("No DAGs found");
        return Ok(());
    }

    println!("{:<24} {:<10} {:<20} {}", "ID", "Status", "Tags", "Label");
    println!("{}", "-".repeat(80));
    for [id, status, tags, label] in rows {
        println!("{id:<24} {status:<10} {tags:<20} {label}");
    }
    Ok(())
}

/// Handle `show`
pub fn handle_show(app: &App, dag: &str) -> Result<()> {
    let dag = app.registry.get(dag)?;
    println!("{}", serde_json::to_string_pretty(&dag.as_json())?);
    Ok(())
}

/// Handle `graph`
pub fn handle_graph(
    app: &App,
    dag: &str,
    format: GraphFormat,
    kinds: bool,
    status: bool,
) -> Result<()> {
    let dag = app.registry.get(dag)?;
    let options = ExportOptions {
        format: format.into(),
        show_kinds: kinds,
        show_status: status,
    };
    print!("{}", export(&dag, &options));
    Ok(())
}

/// Aggregate required inputs as a form fields map.
pub fn inputs_json(dag: &TaskDag) -> Result<Value> {
    let fields = dag
        .required_inputs()?
        .fields_map()
        .into_iter()
        .map(|(key, field)| -> Result<(String, Value)> {
            Ok((key, serde_json::to_value(field)?))
        })
        .collect::<Result<Map<String, Value>>>()?;
    Ok(Value::Object(fields))
}

/// Handle `inputs`
pub fn handle_inputs(app: &App, dag: &str) -> Result<()> {
    let dag = app.registry.get(dag)?;
    println!("{}", serde_json::to_string_pretty(&inputs_json(&dag)?)?);
    Ok(())
}

/// Arguments of `run`.
#[derive(Debug, Clone, Default)]
pub struct RunRequest {
    pub dag: String,
    pub input: Option<String>,
    pub variant: Option<String>,
    pub deadline: Option<f64>,
    pub events: bool,
}

/// What a run left behind.
pub struct RunReport {
    /// Memory snapshot, with the leaf output under `output` on success
    pub payload: Value,
    pub outcome: pinceau_core::Result<TaskData>,
}

/// Validate, instantiate and run, handing every event to `on_event` as it
/// happens when `request.events` is set.
pub async fn execute_run<F>(app: &App, request: &RunRequest, mut on_event: F) -> Result<RunReport>
where
    F: FnMut(&Event),
{
    let id = match &request.variant {
        Some(variant) => format!("{}[{variant}]", request.dag),
        None => request.dag.clone(),
    };
    let input = match &request.input {
        Some(text) => parse_object(text, "--input")?,
        None => TaskData::new(),
    };

    let dag = app.registry.instantiate(&id).await?;
    if let Some(tag) = &app.config.run.worker_tag {
        let mut params = dag.params();
        if params.required_worker_tag.is_none() {
            params.required_worker_tag = Some(tag.clone());
            dag.set_params(params);
        }
    }
    dag.validate_input(&input)?;

    let mut options = app.config.run_options();
    if let Some(secs) = request.deadline {
        if !secs.is_finite() || secs <= 0.0 {
            bail!("--deadline must be a positive number of seconds, got {secs}");
        }
        options = options.with_deadline(Duration::from_secs_f64(secs));
    }

    let memory = Arc::new(DagExecutionMemory::new(dag.dag_id()));
    let dispatcher = LocalDispatcher::new(app.registry.tasks().clone());
    let mut layer = ContextLayer::new("cli")
        .with_handler(memory.clone())
        .with_handler(Arc::new(TracingHandler))
        .with_extension(Arc::new(RemoteDispatch(Arc::new(dispatcher))));
    let (channel, mut events) = EventChannel::new();
    if request.events {
        layer = layer.with_handler(Arc::new(channel));
    }
    let ctx = Context::new(layer);

    info!(dag = %dag.id(), "starting run");
    let run = dag.run_for_output(&ctx, input, options);
    tokio::pin!(run);
    let outcome = loop {
        tokio::select! {
            outcome = &mut run => break outcome,
            Some(event) = events.next() => on_event(&event),
        }
    };
    while let Some(Some(event)) = events.next().now_or_never() {
        on_event(&event);
    }

    let mut payload = memory.as_payload();
    if let (Ok(output), Value::Object(fields)) = (&outcome, &mut payload) {
        fields.insert("output".into(), Value::Object(output.clone()));
    }
    Ok(RunReport { payload, outcome })
}

/// Handle `run`
pub async fn handle_run(app: &App, request: RunRequest) -> Result<()> {
    let report = execute_run(app, &request, |event| match serde_json::to_string(event) {
        Ok(line) => println!("{line}"),
        Err(e) => tracing::warn!(error = %e, "unprintable event"),
    })
    .await?;

    println!("{}", serde_json::to_string_pretty(&report.payload)?);
    report.outcome?;
    Ok(())
}

/// Serialized record of a registered DAG.
pub fn export_text(app: &App, dag: &str, format: RecordFormat) -> Result<String> {
    let record = app.registry.get(dag)?.serialize();
    Ok(match format {
        RecordFormat::Json => record.to_json()?,
        RecordFormat::Yaml => record.to_yaml()?,
    })
}

/// Handle `export`
pub async fn handle_export(
    app: &App,
    dag: &str,
    format: RecordFormat,
    out: Option<PathBuf>,
) -> Result<()> {
    let text = export_text(app, dag, format)?;
    match out {
        Some(path) => {
            tokio::fs::write(&path, text)
                .await
                .with_context(|| format!("failed to write {}", path.display()))?;
            println!("Exported '{dag}' to {}", path.display());
        }
        None => println!("{text}"),
    }
    Ok(())
}

/// Register a DAG record read from `path` and persist its definition.
pub async fn import_file(app: &App, path: &Path) -> Result<Arc<TaskDag>> {
    let text = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("failed to read {}", path.display()))?;
    let record = match RecordFormat::from_path(path) {
        RecordFormat::Json => DagRecord::from_json(&text)?,
        RecordFormat::Yaml => DagRecord::from_yaml(&text)?,
    };

    let dag = TaskDag::deserialize(&record, app.registry.tasks())?;
    if dag.id().job().is_some() {
        return Err(anyhow!("'{}' is a run instance, not a template", dag.id()));
    }
    app.registry.register_or_replace(dag.clone())?;
    app.registry.save_definition(dag.template_id()).await?;
    Ok(dag)
}

/// Handle `import`
pub async fn handle_import(app: &App, path: &Path) -> Result<()> {
    let dag = import_file(app, path).await?;
    println!("Imported '{}' ({} tasks)", dag.dag_id(), dag.len());
    Ok(())
}

/// Handle `variant list`
pub async fn handle_variant_list(app: &App, dag: &str) -> Result<()> {
    for name in app.registry.variants(dag).await? {
        println!("{name}");
    }
    Ok(())
}

/// Handle `variant set`
pub async fn handle_variant_set(app: &App, dag: &str, variant: &str, params: &str) -> Result<()> {
    let params = parse_object(params, "variant parameters")?;
    app.registry.set_variant_params(dag, variant, params).await?;
    println!("Saved variant '{dag}[{variant}]'");
    Ok(())
}

/// Handle `variant remove`
pub async fn handle_variant_remove(app: &App, dag: &str, variant: &str) -> Result<()> {
    app.registry.remove_variant(dag, variant).await?;
    println!("Removed variant '{dag}[{variant}]'");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pinceau_core::{EventKind, PinceauConfig};
    use pinceau_store::DagStore;
    use serde_json::json;
    use tempfile::TempDir;

    async fn app() -> App {
        App::bootstrap(PinceauConfig::default()).await.unwrap()
    }

    #[test]
    fn test_parse_object_rejects_non_objects() {
        assert_eq!(parse_object(r#"{"a": 1}"#, "input").unwrap()["a"], json!(1));
        assert!(parse_object("[1]", "input").is_err());
        assert!(parse_object("{", "input").is_err());
    }

    #[tokio::test]
    async fn test_list_filters_by_query() {
        let app = app().await;
        let rows = list_rows(&app, &DagFilter::default().query("yield"));
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0][0], "test_yield");
        assert_eq!(rows[0][1], "IDLE");
        assert_eq!(rows[0][2], "demo");
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_streams_events_and_reports_memory() {
        let app = app().await;
        let request = RunRequest {
            dag: "test".into(),
            input: Some(r#"{"seed": 7}"#.into()),
            events: true,
            ..RunRequest::default()
        };

        let mut statuses = 0;
        let report = execute_run(&app, &request, |event| {
            if event.kind == EventKind::Status {
                statuses += 1;
            }
        })
        .await
        .unwrap();

        assert!(report.outcome.is_ok());
        assert!(statuses >= 8);
        assert_eq!(report.payload["status"], json!("FINISHED"));
        assert_eq!(report.payload["taskStatus"]["wait_five"], json!("FINISHED"));
        assert_eq!(report.payload["output"]["seed"], json!(7));
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_deadline_is_reported() {
        let app = app().await;
        let request = RunRequest {
            dag: "test".into(),
            deadline: Some(1.0),
            ..RunRequest::default()
        };
        let report = execute_run(&app, &request, |_| {}).await.unwrap();
        assert!(report.outcome.is_err());
        assert_eq!(report.payload["status"], json!("ERROR"));
        assert!(report.payload.get("output").is_none());

        let bad = RunRequest {
            deadline: Some(-1.0),
            ..request
        };
        assert!(execute_run(&app, &bad, |_| {}).await.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_uses_the_variant_parameters() {
        let app = app().await;
        app.registry
            .set_variant_params(
                "test",
                "fast",
                parse_object(r#"{"__dag__": {"tags": ["fast"]}}"#, "params").unwrap(),
            )
            .await
            .unwrap();
        let request = RunRequest {
            dag: "test".into(),
            variant: Some("fast".into()),
            ..RunRequest::default()
        };
        let report = execute_run(&app, &request, |_| {}).await.unwrap();
        assert!(report.outcome.is_ok());
        assert!(report.payload["dagId"]
            .as_str()
            .unwrap()
            .starts_with("test[fast]:"));
    }

    #[tokio::test]
    async fn test_export_then_import_round_trip() {
        let dir = TempDir::new().unwrap();
        let app = app().await;
        let path = dir.path().join("diamond.yaml");
        tokio::fs::write(&path, export_text(&app, "test", RecordFormat::Yaml).unwrap())
            .await
            .unwrap();

        let text = export_text(&app, "test", RecordFormat::Json)
            .unwrap()
            .replace("\"id\": \"test\"", "\"id\": \"copy\"");
        let copy = dir.path().join("copy.json");
        tokio::fs::write(&copy, text).await.unwrap();

        let imported = import_file(&app, &path).await.unwrap();
        assert_eq!(imported.len(), 4);
        let imported = import_file(&app, &copy).await.unwrap();
        assert_eq!(imported.dag_id(), "copy");
        assert!(app.registry.contains("copy"));
        assert_eq!(
            app.registry.store().list_definitions().await.unwrap(),
            vec!["copy".to_string(), "test".to_string()]
        );
    }

    #[test]
    fn test_inputs_of_a_template_dag() {
        let registry = pinceau_core::TaskRegistry::with_builtins();
        let task = registry
            .create(
                pinceau_core::TaskRecord::new("template", "greet")
                    .with_param("template", json!("Hi {first_name}")),
            )
            .unwrap();
        let mut builder = pinceau_core::DagBuilder::new("greet");
        builder.add(task);
        let dag = builder.build().unwrap();

        let fields = inputs_json(&dag).unwrap();
        assert_eq!(fields["first_name"]["type"], json!("any"));
        assert_eq!(fields["first_name"]["optional"], json!(false));
    }

    #[test]
    fn test_record_format_follows_the_extension() {
        assert_eq!(RecordFormat::from_path(Path::new("a.yml")), RecordFormat::Yaml);
        assert_eq!(RecordFormat::from_path(Path::new("a.json")), RecordFormat::Json);
        assert_eq!(RecordFormat::from_path(Path::new("a")), RecordFormat::Json);
    }
}
