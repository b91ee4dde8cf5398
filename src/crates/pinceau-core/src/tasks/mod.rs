//! Built-in task types.
//!
//! | tag | mode | routing |
//! |-----|------|---------|
//! | `wait` | normal | all edges |
//! | `range` | generator | all edges per item |
//! | `round_robin` | normal | one edge per activation, in turn |
//! | `branch` | normal | best matching child, returned from `process` |
//! | `template` | normal | all edges |
//! | `fork` | normal | splices shards into the plan |
//! | `dag_call` | normal | all edges |
//! | `remote` | normal | all edges |
//!
//! [`FunctionTask`] wraps a closure and is registered by its caller.

mod branching;
mod dag_call;
mod forking;
mod function;
mod range;
mod remote;
mod round_robin;
mod template;
mod wait;

pub use branching::BranchTask;
pub use dag_call::DagCallTask;
pub use forking::{ForkTask, ShardProcessor};
pub use function::FunctionTask;
pub use range::RangeTask;
pub use remote::{LocalDispatcher, RemoteDispatch, RemoteRequest, RemoteTask, TaskDispatcher};
pub use round_robin::RoundRobinTask;
pub use template::TemplateTask;
pub use wait::WaitTask;
