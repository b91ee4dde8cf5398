//! Records, stores, variants, nested DAG calls and remote dispatch.

mod common;

use std::sync::Arc;
use std::time::Duration;

use pinceau_core::callbacks::{EventChannel, TracingHandler};
use pinceau_core::tasks::{LocalDispatcher, RemoteDispatch, RemoteTask};
use pinceau_core::{
    Context, ContextLayer, DagBuilder, DagError, DagFilter, DagRecord, DagRegistry,
    HandlerRegistry, RunOptions, Status, TaskDag, TaskData, TaskRecord, TaskRegistry,
    DEFAULT_VARIANT,
};
use pinceau_store::{FileDagStore, MemoryDagStore};
use serde_json::json;
use tempfile::TempDir;
use tokio::time::Instant;

use common::{data, traced_context, wait, wait_diamond, yield_dag};

#[tokio::test(start_paused = true)]
async fn test_record_survives_yaml_and_runs_the_same() {
    let registry = TaskRegistry::with_builtins();
    let record = yield_dag(&registry).serialize();

    let text = record.to_yaml().unwrap();
    let parsed = DagRecord::from_yaml(&text).unwrap();
    assert_eq!(parsed, record);

    let restored = TaskDag::deserialize(&parsed, &registry).unwrap();
    assert_eq!(restored.serialize(), record);

    let (ctx, tracer) = traced_context();
    restored.run_dag(&ctx, TaskData::new()).await.unwrap();
    assert_eq!(tracer.count("test_yield::B", Status::Running), 3);
    assert_eq!(tracer.count("test_yield::C", Status::Running), 2);
    assert_eq!(tracer.count("test_yield::BEFORE", Status::Running), 1);
}

#[test]
fn test_record_with_a_dangling_edge_is_rejected() {
    let registry = TaskRegistry::with_builtins();
    let mut record = wait_diamond(&registry).serialize();
    record.nodes.retain(|node| node.task.id != "wait_five");

    let json = record.to_json().unwrap();
    let err = TaskDag::deserialize(&DagRecord::from_json(&json).unwrap(), &registry).unwrap_err();
    assert!(matches!(err, DagError::Validation(_) | DagError::NotFound { .. }));
}

#[test]
fn test_context_round_trip_keeps_portable_handlers_only() {
    let (channel, _events) = EventChannel::new();
    let ctx = Context::new(ContextLayer::new("global").with_values(data(json!({"user": "ada"}))))
        .with_layer(
            ContextLayer::new("run")
                .with_handler(Arc::new(TracingHandler))
                .with_handler(Arc::new(channel)),
        );
    ctx.set("attempt", json!(1));

    let record = ctx.serialize();
    let text = serde_json::to_string(&record).unwrap();
    let restored = Context::deserialize(
        &serde_json::from_str(&text).unwrap(),
        &HandlerRegistry::with_builtins(),
    )
    .unwrap();

    let names: Vec<&str> = restored.layers().map(|layer| layer.name()).collect();
    assert_eq!(names, vec!["run", "global"]);
    assert_eq!(restored.get("user"), Some(json!("ada")));
    assert_eq!(restored.get("attempt"), Some(json!(1)));
    assert_eq!(restored.innermost().callbacks().len(), 1);
}

fn greeting_registry() -> Arc<DagRegistry> {
    let registry = DagRegistry::in_memory();
    let greet = registry
        .tasks()
        .create(
            TaskRecord::new("template", "greet")
                .with_param("template", json!("Hello {name}"))
                .with_param("output_key", json!("greeting")),
        )
        .unwrap();
    let mut builder = DagBuilder::new("greet");
    builder.add(greet).tag("demo");
    registry.register(builder.build().unwrap()).unwrap();
    registry
}

#[tokio::test]
async fn test_dag_call_runs_the_called_dag_in_place() {
    let registry = greeting_registry();
    let call = registry
        .tasks()
        .create(TaskRecord::new("dag_call", "call").with_param("dag_id", json!("greet")))
        .unwrap();
    assert_eq!(call.label(), "Call greet");

    let mut builder = DagBuilder::new("outer");
    builder.add(call);
    registry.register(builder.build().unwrap()).unwrap();

    let outer = registry.get("outer").unwrap();
    let required: Vec<String> = outer
        .required_inputs()
        .unwrap()
        .keys()
        .map(str::to_string)
        .collect();
    assert_eq!(required, vec!["name"]);

    let output = registry
        .run(
            "outer",
            data(json!({"name": "Ada"})),
            &Context::global(),
            RunOptions::default(),
        )
        .await
        .unwrap();
    assert_eq!(output["greeting"], json!("Hello Ada"));

    let err = registry
        .run("outer", TaskData::new(), &Context::global(), RunOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, DagError::Contract { .. }));
}

#[test]
fn test_dag_call_to_an_unknown_dag_fails_validation() {
    let registry = greeting_registry();
    let call = registry
        .tasks()
        .create(TaskRecord::new("dag_call", "call").with_param("dag_id", json!("nowhere")))
        .unwrap();
    assert!(matches!(
        call.required_inputs().unwrap_err(),
        DagError::NotFound { kind: "DAG", .. }
    ));

    let mut builder = DagBuilder::new("outer");
    builder.add(call);
    let outer = builder.build().unwrap();
    assert!(matches!(
        outer.required_inputs().unwrap_err(),
        DagError::NotFound { kind: "DAG", .. }
    ));
    assert!(outer.provided_outputs().is_err());
    assert!(outer.validate_input(&data(json!({"name": "Ada"}))).is_err());
}

#[tokio::test]
async fn test_registry_lookup_and_filtering() {
    let registry = greeting_registry();
    assert!(registry.register(registry.get("greet").unwrap()).is_err());
    assert!(matches!(
        registry.get("missing").unwrap_err(),
        DagError::NotFound { kind: "DAG", .. }
    ));

    assert_eq!(registry.list(&DagFilter::default().tag("demo")).len(), 1);
    assert_eq!(registry.list(&DagFilter::default().query("GREE")).len(), 1);
    assert!(registry.list(&DagFilter::default().tag("other")).is_empty());

    let run = registry.instantiate("greet").await.unwrap();
    assert_eq!(run.template_id(), "greet");
    assert!(run.id().job().is_some());

    assert!(registry.remove("greet").await.unwrap().is_some());
    assert!(!registry.contains("greet"));
}

fn remote_dag(tasks: &TaskRegistry) -> Arc<TaskDag> {
    let inner = tasks
        .create(TaskRecord::new("template", "greet").with_param("template", json!("Hi {name}")))
        .unwrap();
    let remote = tasks
        .create(RemoteTask::wrap("remote_greet", &inner).unwrap())
        .unwrap();
    let mut builder = DagBuilder::new("remote");
    builder.add(remote).worker_tag("cpu");
    builder.build().unwrap()
}

#[tokio::test]
async fn test_remote_task_runs_on_the_local_dispatcher() {
    let tasks = TaskRegistry::with_builtins();
    let dag = remote_dag(&tasks);
    assert_eq!(
        dag.required_inputs().unwrap().keys().collect::<Vec<_>>(),
        vec!["name"]
    );

    let dispatcher = LocalDispatcher::new(tasks.clone());
    let ctx = Context::new(
        ContextLayer::new("client")
            .with_extension(Arc::new(RemoteDispatch(Arc::new(dispatcher)))),
    );
    let output = dag
        .run_for_output(&ctx, data(json!({"name": "Ada", "keep": 1})), RunOptions::default())
        .await
        .unwrap();

    assert_eq!(output["text"], json!("Hi Ada"));
    assert_eq!(output["keep"], json!(1));
    assert_eq!(dag.task("remote_greet").unwrap().status(), Status::Finished);
}

#[tokio::test]
async fn test_remote_task_without_dispatcher_fails_locally() {
    let tasks = TaskRegistry::with_builtins();
    let dag = remote_dag(&tasks);

    dag.run_dag(&Context::global(), data(json!({"name": "Ada"})))
        .await
        .unwrap();

    let task = dag.task("remote_greet").unwrap();
    assert_eq!(task.status(), Status::Error);
    assert!(task.error().unwrap_or_default().contains("not found"));
}

#[test]
fn test_remote_refuses_to_wrap_a_generator() {
    let tasks = TaskRegistry::with_builtins();
    let range = tasks
        .create(TaskRecord::new("range", "range"))
        .unwrap();
    let record = RemoteTask::wrap("remote_range", &range).unwrap();
    assert!(matches!(tasks.create(record), Err(DagError::Validation(_))));
}

/// `slow` has no duration of its own, so variants decide how long it sleeps.
fn variant_template(tasks: &TaskRegistry) -> Arc<TaskDag> {
    let mut builder = DagBuilder::new("nap");
    builder
        .add(wait(tasks, "first", 1.0))
        .add(tasks.create(TaskRecord::new("wait", "slow")).unwrap())
        .edge("first", "slow");
    builder.build().unwrap()
}

#[tokio::test(start_paused = true)]
async fn test_variants_persist_in_the_file_store() {
    let dir = TempDir::new().unwrap();
    let registry = DagRegistry::new(Arc::new(FileDagStore::new(dir.path())));
    registry.register(variant_template(registry.tasks())).unwrap();

    let params = data(json!({
        "slow": {"wait_duration": 4},
        "__dag__": {"required_worker_tag": "gpu"},
    }));
    registry.set_variant_params("nap", "long", params).await.unwrap();
    assert!(registry
        .set_variant_params("nap", DEFAULT_VARIANT, TaskData::new())
        .await
        .is_err());

    let started = Instant::now();
    registry
        .run("nap[long]", TaskData::new(), &Context::global(), RunOptions::default())
        .await
        .unwrap();
    assert!(started.elapsed() >= Duration::from_secs(5));

    let started = Instant::now();
    registry
        .run("nap", TaskData::new(), &Context::global(), RunOptions::default())
        .await
        .unwrap();
    assert!(started.elapsed() < Duration::from_secs(2));

    let reopened = DagRegistry::new(Arc::new(FileDagStore::new(dir.path())));
    reopened.register(variant_template(reopened.tasks())).unwrap();
    assert_eq!(
        reopened.variants("nap").await.unwrap(),
        vec![DEFAULT_VARIANT.to_string(), "long".to_string()]
    );
    let long = reopened.variant("nap", "long").await.unwrap();
    assert_eq!(long.params().required_worker_tag.as_deref(), Some("gpu"));
    assert_eq!(long.task("slow").unwrap().params()["wait_duration"], json!(4));
    assert_eq!(long.element().parent_id(), Some("nap"));

    reopened.remove_variant("nap", "long").await.unwrap();
    assert_eq!(reopened.variants("nap").await.unwrap(), vec![DEFAULT_VARIANT]);
    assert!(matches!(
        reopened.variant("nap", "long").await.unwrap_err(),
        DagError::NotFound { kind: "Variant", .. }
    ));
}

#[tokio::test]
async fn test_materialized_variant_sees_new_parameters() {
    let registry = DagRegistry::new(Arc::new(MemoryDagStore::new()));
    registry.register(variant_template(registry.tasks())).unwrap();

    registry
        .set_variant_params("nap", "quick", data(json!({"slow": {"wait_duration": 2}})))
        .await
        .unwrap();
    let quick = registry.variant("nap", "quick").await.unwrap();
    assert!(Arc::ptr_eq(&quick, &registry.get("nap[quick]").unwrap()));

    registry
        .set_variant_params("nap", "quick", data(json!({"slow": {"wait_duration": 0}})))
        .await
        .unwrap();
    assert_eq!(quick.task("slow").unwrap().params()["wait_duration"], json!(0));
    assert_eq!(
        quick.variant_params().unwrap(),
        data(json!({"slow": {"wait_duration": 0}}))
    );

    let bad = data(json!({"slow": "fast please"}));
    assert!(registry.set_variant_params("nap", "quick", bad).await.is_err());
}

#[tokio::test]
async fn test_definitions_reload_into_a_fresh_registry() {
    let dir = TempDir::new().unwrap();
    let registry = DagRegistry::new(Arc::new(FileDagStore::new(dir.path())));
    registry.register(wait_diamond(registry.tasks())).unwrap();
    registry.save_definition("test").await.unwrap();

    let reopened = DagRegistry::new(Arc::new(FileDagStore::new(dir.path())));
    assert_eq!(reopened.load_definitions().await.unwrap(), vec!["test"]);
    let restored = reopened.get("test").unwrap();
    assert_eq!(restored.len(), 4);
    assert_eq!(
        restored.serialize(),
        registry.get("test").unwrap().serialize()
    );
    assert!(matches!(
        reopened.load_definition("absent").await.unwrap_err(),
        DagError::NotFound { kind: "Definition", .. }
    ));
}

#[tokio::test]
async fn test_removed_definition_stays_gone_after_reload() {
    let dir = TempDir::new().unwrap();
    let registry = DagRegistry::new(Arc::new(FileDagStore::new(dir.path())));
    registry.register(wait_diamond(registry.tasks())).unwrap();
    registry.save_definition("test").await.unwrap();

    assert!(registry.remove("test").await.unwrap().is_some());
    assert!(!registry.contains("test"));
    assert!(registry.remove("test").await.unwrap().is_none());

    let reopened = DagRegistry::new(Arc::new(FileDagStore::new(dir.path())));
    assert!(reopened.load_definitions().await.unwrap().is_empty());
    assert!(!reopened.contains("test"));
}
