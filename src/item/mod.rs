//! Items and bulks
//!
//! An item is an in-memory description of one logical record; a bulk is an
//! ordered collection of items of one class. Both live in an `ItemGraph`.

pub mod arena;
pub mod class;
pub mod graph;
pub mod merge;
pub mod dump;

pub use arena::{Arena, Handle};
pub use class::{
    ClassConfig, FieldId, FieldRef, ItemClass, ItemClassBuilder, Modes, Norewrite, RelationId,
    RelationSettings,
};
pub use graph::{BulkData, BulkId, ItemData, ItemGraph, ItemId, Related, Root};
pub use dump::{ClassSummary, DumpDocument, DumpItem};
