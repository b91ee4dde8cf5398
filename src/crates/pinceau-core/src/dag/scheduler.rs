//! Run loop of a [`TaskDag`].
//!
//! # Activation
//!
//! 1. await the published result of every parent (the first failed parent
//!    short-circuits to `ERROR`), then go `SCHEDULED`
//! 2. merge parent results, later parents winning
//! 3. take the task's activation lock and go `RUNNING`
//! 4. `NORMAL`: take a concurrency permit, `process`, then fire `DEFAULT` edges
//!    with the returned route
//! 5. `GENERATOR`: `before` fires `LOOP_START` edges, then a barrier; every item
//!    fires `DEFAULT` edges, then a barrier; `after` fires `LOOP_END` edges
//! 6. `FINISHED`, and release the `(parent, task)` edge locks
//!
//! # Firing edges
//!
//! For each target chosen by [`Task::tasks_after`]: take the `(task, target)`
//! edge lock, flip the target to `WAITING` if it is not already, publish the
//! result, then spawn the targets this call flipped. Flipping before
//! publishing means a target's activation can never finish between the
//! publication and the flip, so each activation is spawned exactly once.
//!
//! # Failure
//!
//! An error out of `process`, `before`, the item stream or `after` is local to
//! the task: it goes `ERROR`, publishes a failure marker when it published
//! nothing during the activation, and its children are not fired. Descendants
//! that have no result yet get the marker too, so a join reached through
//! another parent ends in `ERROR` instead of waiting forever. Siblings keep
//! running. Scheduler errors abort the run.

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use futures::future::{try_join_all, BoxFuture, FutureExt};
use futures::StreamExt;
use tokio::time::Instant;

use crate::context::Context;
use crate::dag::group::TaskGroup;
use crate::dag::locks::EdgeLocks;
use crate::dag::results::{Published, ResultBoard};
use crate::dag::TaskDag;
use crate::error::{DagError, Result};
use crate::task::{Activation, Task};
use crate::types::{merge_data, EdgeKind, ProcessMode, Status, TaskData};

/// Message given to tasks whose parent failed.
pub(crate) const UPSTREAM_FAILED: &str = "upstream task failed";

/// Per-run settings.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunOptions {
    /// Abort the whole run once elapsed
    pub deadline: Option<Duration>,
}

impl RunOptions {
    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = Some(deadline);
        self
    }
}

/// Mutable state of one run.
struct RunScope {
    dag: Arc<TaskDag>,
    ctx: Context,
    results: Arc<ResultBoard>,
    locks: EdgeLocks,
    group: TaskGroup,
}

/// Why an activation stopped.
enum Failure {
    /// The task itself failed; contained at the task boundary
    Task(DagError),
    /// The scheduler failed; aborts the run
    Scheduler(DagError),
}

impl From<DagError> for Failure {
    fn from(e: DagError) -> Self {
        Failure::Scheduler(e)
    }
}

/// Holds the instance's `running` flag for one run.
struct RunGuard<'a> {
    dag: &'a TaskDag,
}

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        self.dag.running.store(false, Ordering::SeqCst);
    }
}

impl TaskDag {
    /// Run the DAG to completion with default options.
    pub async fn run_dag(self: &Arc<Self>, ctx: &Context, input: TaskData) -> Result<()> {
        self.run_with(ctx, input, RunOptions::default()).await
    }

    /// Run the DAG to completion.
    ///
    /// Fails with [`DagError::Execution`] if this instance is already running;
    /// clone it to run concurrently.
    pub async fn run_with(
        self: &Arc<Self>,
        ctx: &Context,
        input: TaskData,
        options: RunOptions,
    ) -> Result<()> {
        let _guard = self.begin_run()?;
        self.execute(ctx, input, options).await.map(|_| ())
    }

    /// Run the DAG and return the merged results of its leaf tasks.
    pub async fn run_for_output(
        self: &Arc<Self>,
        ctx: &Context,
        input: TaskData,
        options: RunOptions,
    ) -> Result<TaskData> {
        let _guard = self.begin_run()?;
        self.execute(ctx, input, options).await
    }

    /// Claim the instance for one run. The claim is released when the guard
    /// drops, including when the run future is dropped half way.
    fn begin_run(&self) -> Result<RunGuard<'_>> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Err(DagError::Execution(format!(
                "DAG '{}' is already running",
                self.id()
            )));
        }
        Ok(RunGuard { dag: self })
    }

    #[tracing::instrument(name = "run_dag", skip_all, fields(dag = %self.id()))]
    async fn execute(
        self: &Arc<Self>,
        ctx: &Context,
        input: TaskData,
        options: RunOptions,
    ) -> Result<TaskData> {
        let started = Instant::now();
        match self.drive(ctx, input, options).await {
            Ok(output) => {
                self.set_status(ctx, Status::Finished, None).await;
                tracing::info!(elapsed_ms = started.elapsed().as_millis() as u64, "dag finished");
                Ok(output)
            }
            Err(e) => {
                tracing::error!(error = %e, "dag failed");
                self.set_status(ctx, Status::Error, Some(e.to_string())).await;
                Err(e)
            }
        }
    }

    async fn drive(self: &Arc<Self>, ctx: &Context, input: TaskData, options: RunOptions) -> Result<TaskData> {
        self.set_status(ctx, Status::Running, None).await;
        for task in self.tasks() {
            task.set_status(ctx, Status::Idle, None).await;
        }

        let (group, join) = TaskGroup::new();
        let results = Arc::new(ResultBoard::default());
        let scope = Arc::new(RunScope {
            dag: self.clone(),
            ctx: ctx.clone(),
            results: results.clone(),
            locks: EdgeLocks::default(),
            group,
        });
        for root in self.root_tasks() {
            let activation = scope.clone().schedule_task(root, input.clone());
            scope.group.spawn(activation);
        }
        // Only activations keep the scope open from here on.
        drop(scope);

        let deadline = options.deadline.map(|limit| {
            (
                Instant::now() + limit,
                u64::try_from(limit.as_millis()).unwrap_or(u64::MAX),
            )
        });
        let outcome = join.join(deadline).await;
        let leaves: Vec<String> = self
            .leaf_tasks()
            .iter()
            .map(|task| task.id().to_string())
            .collect();
        let output = results.collect(&leaves);
        results.clear();
        outcome.map(|()| output)
    }
}

impl RunScope {
    /// Boxed so activations can spawn activations.
    fn schedule_task(self: Arc<Self>, task: Arc<Task>, input: TaskData) -> BoxFuture<'static, Result<()>> {
        async move {
            let parents: Vec<String> = self.dag.with_graph(|graph| {
                let mut parents: Vec<String> = Vec::new();
                if let Some(node) = graph.node(task.id()) {
                    for edge in node.parent_edges() {
                        if !parents.contains(&edge.from_id) {
                            parents.push(edge.from_id.clone());
                        }
                    }
                }
                parents
            });

            let outcome = self.activate(&task, &parents, input).await;
            for parent in &parents {
                self.locks.release(parent, task.id());
            }
            outcome
        }
        .boxed()
    }

    async fn activate(self: &Arc<Self>, task: &Arc<Task>, parents: &[String], input: TaskData) -> Result<()> {
        let upstream: Vec<Published> =
            try_join_all(parents.iter().map(|parent| self.results.wait(parent))).await?;

        let upstream_failed = upstream.iter().any(|published| published.is_err());
        if !upstream_failed {
            task.set_status(&self.ctx, Status::Scheduled, None).await;
        }
        let _activation = task.activation_lock().lock().await;

        if upstream_failed {
            task.set_status(&self.ctx, Status::Error, Some(UPSTREAM_FAILED.into()))
                .await;
            self.results.publish(task.id(), Err(UPSTREAM_FAILED.into()));
            self.poison_descendants(task);
            return Ok(());
        }
        let mut parts = vec![input];
        parts.extend(upstream.into_iter().flatten());
        let input = merge_data(&parts);

        task.set_status(&self.ctx, Status::Running, None).await;
        let mut published = false;
        let outcome = match task.mode() {
            ProcessMode::Normal => self.run_normal(task, input, &mut published).await,
            ProcessMode::Generator => self.run_generator(task, input, &mut published).await,
        };

        match outcome {
            Ok(()) => {
                task.set_status(&self.ctx, Status::Finished, None).await;
                Ok(())
            }
            Err(Failure::Task(e)) => {
                tracing::warn!(task = %task.id(), error = %e, "task failed");
                let message = e.to_string();
                task.set_status(&self.ctx, Status::Error, Some(message.clone()))
                    .await;
                if !published {
                    self.results.publish(task.id(), Err(message));
                }
                self.poison_descendants(task);
                Ok(())
            }
            Err(Failure::Scheduler(e)) => Err(e),
        }
    }

    async fn run_normal(
        self: &Arc<Self>,
        task: &Arc<Task>,
        input: TaskData,
        published: &mut bool,
    ) -> std::result::Result<(), Failure> {
        let processor = task.behavior().as_processor().ok_or_else(|| {
            DagError::Execution(format!("task '{}' has no processor", task.id()))
        })?;
        let output = {
            let _permit = task.acquire_permit().await?;
            let scope = Activation::new(&self.ctx, &self.dag, task);
            processor
                .process(&scope, input)
                .await
                .map_err(Failure::Task)?
        };
        self.task_did_finish(task, output.data, EdgeKind::Default, output.route.as_deref())
            .await?;
        *published = true;
        Ok(())
    }

    async fn run_generator(
        self: &Arc<Self>,
        task: &Arc<Task>,
        input: TaskData,
        published: &mut bool,
    ) -> std::result::Result<(), Failure> {
        let processor = task.behavior().as_stream_processor().ok_or_else(|| {
            DagError::Execution(format!("task '{}' has no stream processor", task.id()))
        })?;
        let scope = Activation::new(&self.ctx, &self.dag, task);

        let before = processor
            .before(&scope, &input)
            .await
            .map_err(Failure::Task)?;
        let fired = self
            .task_did_finish(task, before, EdgeKind::LoopStart, None)
            .await?;
        *published = true;
        self.barrier(task, &fired).await?;

        let mut fired_items: Vec<String> = Vec::new();
        {
            let mut items = processor.stream(&scope, input.clone());
            loop {
                let item = {
                    let _permit = task.acquire_permit().await?;
                    items.next().await
                };
                let Some(item) = item else {
                    break;
                };
                let data = item.map_err(Failure::Task)?;
                for target in self
                    .task_did_finish(task, data, EdgeKind::Default, None)
                    .await?
                {
                    if !fired_items.contains(&target) {
                        fired_items.push(target);
                    }
                }
            }
        }
        self.barrier(task, &fired_items).await?;

        let after = processor
            .after(&scope, &input)
            .await
            .map_err(Failure::Task)?;
        self.task_did_finish(task, after, EdgeKind::LoopEnd, None)
            .await?;
        Ok(())
    }

    fn poison_descendants(&self, task: &Task) {
        let descendants = self.dag.with_graph(|graph| {
            let mut seen: Vec<String> = Vec::new();
            let mut pending = vec![task.id().to_string()];
            while let Some(id) = pending.pop() {
                let Some(node) = graph.node(&id) else {
                    continue;
                };
                for edge in node.sub_edges() {
                    if !seen.contains(&edge.to_id) {
                        seen.push(edge.to_id.clone());
                        pending.push(edge.to_id.clone());
                    }
                }
            }
            seen
        });
        for id in descendants {
            self.results
                .publish_if_absent(&id, Err(UPSTREAM_FAILED.into()));
        }
    }

    /// Wait until every activation spawned from `task` towards `targets` has
    /// finished.
    async fn barrier(&self, task: &Task, targets: &[String]) -> Result<()> {
        for target in targets {
            self.locks.barrier(task.id(), target).await?;
        }
        Ok(())
    }

    /// Publish `data` as the result of `task` and fire the edges selected by
    /// `kind`. Returns the ids of the fired targets.
    async fn task_did_finish(
        self: &Arc<Self>,
        task: &Arc<Task>,
        data: TaskData,
        kind: EdgeKind,
        route: Option<&[String]>,
    ) -> Result<Vec<String>> {
        let targets: Vec<Arc<Task>> = self.dag.with_graph(|graph| -> Result<Vec<Arc<Task>>> {
            // A later fan-out may have retired this clone; it still publishes.
            let Some(node) = graph.node(task.id()) else {
                return Ok(Vec::new());
            };
            task.tasks_after(node, kind, route)
                .into_iter()
                .map(|id| {
                    graph
                        .node(&id)
                        .map(|target| target.task().clone())
                        .ok_or_else(|| DagError::not_found("Task", id))
                })
                .collect::<Result<Vec<_>>>()
        })?;

        for target in &targets {
            self.locks.acquire(task.id(), target.id()).await?;
        }
        let mut spawn = Vec::with_capacity(targets.len());
        for target in &targets {
            if target.try_mark_waiting(&self.ctx).await {
                spawn.push(target.clone());
            }
        }
        self.results.publish(task.id(), Ok(data));
        for target in spawn {
            let activation = self.clone().schedule_task(target, TaskData::new());
            self.group.spawn(activation);
        }

        Ok(targets.iter().map(|target| target.id().to_string()).collect())
    }
}
