//! TILLER Context - Hierarchical Context Store
//!
//! Four independently addressable layers of session knowledge
//! (conversational, technical, project, execution) behind an immutable
//! snapshot store with atomic swap, a fixed cross-layer propagation
//! table, a lossless optimizer, and a relevance-ranked query engine.

pub mod optimize;
pub mod propagate;
pub mod query;
pub mod store;

pub use optimize::{compress, dedup, verify_and_restore, Optimizer};
pub use propagate::{derived_updates, DerivedUpdate};
pub use query::QueryEngine;
pub use store::ContextStore;
