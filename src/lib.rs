//! # Itemsync - Storage-agnostic item reconciliation
//!
//! Takes hierarchical, relation-rich records ("items") and decides for each
//! one whether to reuse a stored row, create one, merge it with a sibling
//! item or leave it out, keeping cross-references consistent.
//!
//! Itemsync provides:
//! - Item classes validated against a storage schema at definition time
//! - An arena-backed item graph with bulks, relations and merging
//! - A persister generic over a storage `Adapter`
//! - A differential deleter driven by selectors and keepers
//! - Scoped class variants and JSON transport of items

pub mod value;
pub mod schema;
pub mod item;
pub mod scope;
pub mod deleter;
pub mod adapter;
pub mod persist;
pub mod config;
pub mod ui;

// Re-exports for convenient access
pub use value::{FieldKind, Value};
pub use schema::{FieldInfo, ModelSchema, Multiplicity, RelationInfo, Schema};
pub use item::{BulkId, FieldRef, ItemClass, ItemGraph, ItemId, Norewrite, Root};
pub use scope::{ClassOverrides, ClassRegistry, Scope};
pub use deleter::{DeleterRegistry, ModelDeleter};
pub use adapter::{Adapter, MemoryAdapter};
pub use persist::{PersistSettings, Persisted, Persister};

/// Result type alias for Itemsync operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for Itemsync operations
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Multiple rows of {model} match item of class {class}: {rows}")]
    MultipleModelsMatch {
        class: String,
        model: String,
        rows: String,
    },

    #[error("Multiple items of class {class} match the same {model} row {row}")]
    MultipleItemsMatch {
        class: String,
        model: String,
        row: String,
    },

    #[error("Unknown field '{field}' on model {model}")]
    UnknownField { model: String, field: String },

    #[error("Unknown item class: {0}")]
    UnknownClass(String),

    #[error("Unknown model: {0}")]
    UnknownModel(String),

    #[error("Invalid value for {field}: {reason}")]
    InvalidValue { field: String, reason: String },

    #[error("Invalid schema: {0}")]
    InvalidSchema(String),

    #[error("Stale or foreign handle: {0}")]
    StaleHandle(String),

    #[error("Adapter error: {0}")]
    Adapter(String),

    #[error("Dump error: {0}")]
    Dump(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
