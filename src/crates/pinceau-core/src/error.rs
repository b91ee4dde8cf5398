//! Error types for graph construction, analysis and execution
//!
//! Every fallible operation in this crate returns [`Result<T>`], an alias over
//! [`DagError`].
//!
//! # Error Hierarchy
//!
//! ```text
//! DagError
//! ├── Validation     - Malformed graph (duplicate id, dangling edge, cycle)
//! ├── Contract       - Incompatible wiring found during contract analysis
//! ├── TaskExecution  - A task's own processing failed (task-local)
//! ├── NotFound       - Unknown DAG, task, type tag, handler or extension
//! ├── Execution      - Run-level failure escaping the task boundary
//! ├── Remote         - Remote dispatch failed
//! ├── Timeout        - Run deadline exceeded
//! ├── Serialization  - JSON/YAML errors
//! ├── Store          - Persistence backend errors
//! ├── Configuration  - Bad configuration values
//! ├── Context        - Context layering misuse
//! └── Custom         - Application-defined errors
//! ```
//!
//! # Where errors surface
//!
//! A `TaskExecution` error raised inside a task never escapes the scheduler: it is
//! turned into an `ERROR` status on that task and a status event. `Contract`,
//! `Validation` and `NotFound` are returned synchronously to whoever builds,
//! analyses or looks up a graph. `Execution` and `Timeout` abort a whole run and
//! put the DAG itself in `ERROR`.
//!
//! ```rust
//! use pinceau_core::error::DagError;
//!
//! let err = DagError::task_execution("wait_two", "boom");
//! assert_eq!(err.to_string(), "Task 'wait_two' failed: boom");
//! assert!(err.is_task_local());
//! ```

use thiserror::Error;

/// Result type for DAG operations
pub type Result<T> = std::result::Result<T, DagError>;

/// Errors produced by the DAG core
#[derive(Error, Debug)]
pub enum DagError {
    /// Graph structure validation failed
    #[error("Graph validation failed: {0}")]
    Validation(String),

    /// Two wired tasks disagree on a data contract
    ///
    /// Raised when `add_all` or `subtract_all` refuses a merge while computing the
    /// aggregate contracts of a DAG, or when an input misses a required key.
    #[error("Contract violation at task '{task}': {detail}")]
    Contract {
        /// Task where propagation broke
        task: String,
        /// What did not match
        detail: String,
    },

    /// A task's processing failed
    #[error("Task '{task}' failed: {error}")]
    TaskExecution {
        /// Task id
        task: String,
        /// Error message
        error: String,
    },

    /// Lookup of an id in a registry failed
    #[error("{kind} '{id}' not found")]
    NotFound {
        /// What was looked up ("DAG", "Task", "Task type", ...)
        kind: &'static str,
        /// The missing id
        id: String,
    },

    /// Run-level execution failure
    #[error("Execution failed: {0}")]
    Execution(String),

    /// Remote dispatch failure
    #[error("Remote execution failed: {0}")]
    Remote(String),

    /// Run deadline exceeded
    #[error("Operation timed out after {duration_ms}ms: {operation}")]
    Timeout {
        /// What was running
        operation: String,
        /// Configured deadline
        duration_ms: u64,
    },

    /// JSON serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// YAML serialization error
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// Persistence backend error
    #[error("Store error: {0}")]
    Store(#[from] pinceau_store::StoreError),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Context error
    #[error("Context error: {0}")]
    Context(String),

    /// Custom error
    #[error("{0}")]
    Custom(String),
}

impl DagError {
    /// Create a task execution error
    pub fn task_execution(task: impl Into<String>, error: impl ToString) -> Self {
        Self::TaskExecution {
            task: task.into(),
            error: error.to_string(),
        }
    }

    /// Create a contract violation
    pub fn contract(task: impl Into<String>, detail: impl Into<String>) -> Self {
        Self::Contract {
            task: task.into(),
            detail: detail.into(),
        }
    }

    /// Create a lookup failure
    pub fn not_found(kind: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound {
            kind,
            id: id.into(),
        }
    }

    /// Create a validation error
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    /// Whether the error belongs to a single task activation rather than to the run.
    pub fn is_task_local(&self) -> bool {
        matches!(self, Self::TaskExecution { .. } | Self::Remote(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_found_message() {
        let err = DagError::not_found("DAG", "test[fast]");
        assert_eq!(err.to_string(), "DAG 'test[fast]' not found");
        assert!(!err.is_task_local());
    }

    #[test]
    fn test_store_error_converts() {
        let err: DagError = pinceau_store::StoreError::NotFound("x".into()).into();
        assert!(matches!(err, DagError::Store(_)));
    }
}
