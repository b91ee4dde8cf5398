//! Callback handlers attached to context layers.
//!
//! | handler | records |
//! |---------|---------|
//! | [`TasksExecutionTracer`] | every task status transition, timestamped |
//! | [`DagExecutionTracer`] | DAG status transitions |
//! | [`DagExecutionMemory`] | status, progress, data and streams of one run |
//! | [`DagExecutionCounter`] | number of DAGs currently running |
//! | [`EventChannel`] | forwards events to a stream |
//! | [`TracingHandler`] | logs events through `tracing` |

mod channel;
mod counter;
mod handler;
mod memory;
mod tracer;

pub use channel::{EventChannel, TracingHandler};
pub use counter::DagExecutionCounter;
pub use handler::{dispatch, CallbackHandler, CallbackManager, HandlerRecord, HandlerRegistry};
pub use memory::DagExecutionMemory;
pub use tracer::{DagExecutionTracer, TasksExecutionTracer};
