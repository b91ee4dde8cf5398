//! # pinceau-store - Persistence boundary for DAG variants and definitions
//!
//! The DAG core does not own a database. It needs exactly two things from
//! persistence:
//!
//! - the parameter set of a **variant** of a template DAG, keyed by
//!   `(template_id, variant_name)`;
//! - persisted **DAG definitions** (serialized graphs) so that scheduled or
//!   imported DAGs can be rebuilt.
//!
//! [`DagStore`] is that contract. Two implementations ship with the crate:
//!
//! - [`MemoryDagStore`] - `Arc<RwLock<HashMap>>`, for tests and embedded use
//! - [`FileDagStore`] - one JSON document per record under a directory
//!
//! ```rust,no_run
//! use pinceau_store::{DagStore, MemoryDagStore, VariantRecord};
//! use serde_json::json;
//!
//! # async fn demo() -> pinceau_store::Result<()> {
//! let store = MemoryDagStore::new();
//! let params = json!({"wait_two": {"wait_duration": 1}}).as_object().cloned().unwrap();
//! store.put_variant(VariantRecord::new("test", "fast", params)).await?;
//! assert_eq!(store.list_variants("test").await?, vec!["fast"]);
//! # Ok(())
//! # }
//! ```

pub mod error;
pub mod file;
pub mod memory;
pub mod traits;

pub use error::{Result, StoreError};
pub use file::FileDagStore;
pub use memory::MemoryDagStore;
pub use traits::{DagStore, DefinitionRecord, VariantRecord};
