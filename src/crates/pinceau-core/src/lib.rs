//! # pinceau-core - Task DAG orchestration
//!
//! A workflow is a directed acyclic graph of tasks. Each task declares the keys
//! it needs and the keys it produces (its data contract); the DAG checks that
//! the wiring is coherent before anything runs, then executes tasks
//! concurrently as soon as all of their parents have produced results.
//!
//! ## Core Concepts
//!
//! ### Tasks
//!
//! A [`Task`] wraps a [`TaskBehavior`] built by a [`TaskFactory`] from a
//! [`TaskRecord`]. The behavior opts into capabilities:
//!
//! - [`Processor`]: one call, one result (`NORMAL` mode)
//! - [`StreamProcessor`]: a stream of results with `before`/`after` hooks (`GENERATOR` mode)
//! - [`Router`]: picks which children fire
//!
//! ### Edges
//!
//! | kind | fires |
//! |------|-------|
//! | `DIRECT` | once per result of a normal task |
//! | `CONDITIONAL` | for the children a router or processor selects |
//! | `LOOP` | once per item of a generator |
//! | `LOOP_START` | once, before the first item |
//! | `LOOP_END` | once, after every item's subtree has been scheduled |
//!
//! ### Runs
//!
//! [`TaskDag::run_dag`] resets the tasks, spawns the roots and waits for every
//! spawned activation. Results travel through a per-run board keyed by task
//! id. Per-edge locks keep a parent from handing a child a second result
//! before the child took the first one. Status, progress, data and log events
//! go through the [`Context`] to its callback handlers.
//!
//! ## Quick Start
//!
//! ```rust
//! use pinceau_core::{Context, DagBuilder, TaskRegistry};
//! use pinceau_core::tasks::WaitTask;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> pinceau_core::Result<()> {
//! let registry = TaskRegistry::with_builtins();
//! let mut builder = DagBuilder::new("diamond");
//! for id in ["one", "two", "three", "five"] {
//!     builder.add(registry.create(WaitTask::record(id, 0.0))?);
//! }
//! builder
//!     .edge("one", "two")
//!     .edge("one", "three")
//!     .edge("two", "five")
//!     .edge("three", "five");
//! let dag = builder.build()?;
//!
//! dag.run_dag(&Context::global(), Default::default()).await?;
//! assert_eq!(dag.task("five")?.status(), pinceau_core::Status::Finished);
//! # Ok(())
//! # }
//! ```

pub mod callbacks;
pub mod config;
pub mod context;
pub mod contract;
pub mod dag;
pub mod edge;
pub mod element;
pub mod error;
pub mod id;
pub mod node;
pub mod registry;
pub mod task;
pub mod tasks;
pub mod types;
pub mod visualization;

pub use callbacks::{CallbackHandler, CallbackManager, HandlerRegistry};
pub use config::{ConfigLoader, PinceauConfig};
pub use context::{Context, ContextLayer, ContextRecord, Event, EventKind, EventSender};
pub use contract::{KeyContract, TaskDataContract, ValueType};
pub use dag::{DagBuilder, DagParameters, DagRecord, NodeRecord, RunOptions, TaskDag, TaskGraph};
pub use edge::TaskEdge;
pub use element::GraphElement;
pub use error::{DagError, Result};
pub use id::{DagId, DEFAULT_VARIANT};
pub use node::TaskNode;
pub use registry::{DagFilter, DagRegistry};
pub use task::{
    Activation, Processor, Router, StreamProcessor, Task, TaskBehavior, TaskFactory, TaskOutput,
    TaskOverrides, TaskRecord, TaskRegistry,
};
pub use types::{EdgeKind, ProcessMode, Status, TaskData};
