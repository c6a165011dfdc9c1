//! Storage adapter contract
//!
//! The persister never talks to storage directly. Everything it needs goes
//! through the `Adapter` trait:
//! 1. batched lookups (`get`), one result list per lookup
//! 2. relation read-back for to-many fields
//! 3. row creation and updates
//! 4. selection and deletion for the deleter
//!
//! `MemoryAdapter` is a complete in-process implementation.

pub mod memory;

pub use memory::MemoryAdapter;

use crate::schema::{RelationInfo, Schema};
use crate::value::Value;
use crate::Result;
use std::collections::{BTreeMap, HashSet};
use std::fmt::Debug;
use std::hash::Hash;

/// Lookup chunk size used when neither the class nor the settings override it
pub const BATCH_SIZE: usize = 100;

/// A stored row as seen by the persister
#[derive(Debug, Clone, PartialEq)]
pub struct Row<I> {
    pub id: I,
    /// Plain field values
    pub values: BTreeMap<String, Value>,
    /// Current target of every x-to-one relation (`None` = unlinked)
    pub links: BTreeMap<String, Option<I>>,
}

impl<I> Row<I> {
    pub fn value(&self, field: &str) -> Option<&Value> {
        self.values.get(field)
    }

    pub fn link(&self, field: &str) -> Option<&I> {
        self.links.get(field).and_then(Option::as_ref)
    }
}

/// One filter on a model
#[derive(Debug, Clone, PartialEq)]
pub enum Condition<I> {
    /// Plain field equals the value (a missing value equals `Null`)
    Eq { field: String, value: Value },
    /// The row's relation contains any of the given rows
    Related { field: String, any_of: Vec<I> },
}

/// Filter of one item: rows matching every condition of any group
#[derive(Debug, Clone, PartialEq)]
pub struct Lookup<I> {
    pub groups: Vec<Vec<Condition<I>>>,
}

impl<I> Lookup<I> {
    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }
}

/// Change to one relation of a row
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkWrite<I> {
    /// x-to-one: point at a row or unlink
    Set(Option<I>),
    /// x-to-many: add rows to the set
    Add(Vec<I>),
    /// x-to-many: remove rows from the set
    Remove(Vec<I>),
    /// x-to-many: the set becomes exactly these rows
    Replace(Vec<I>),
}

/// Changes to one row, applied in a single `update` call
#[derive(Debug, Clone, PartialEq)]
pub struct RowWrite<I> {
    pub values: BTreeMap<String, Value>,
    pub links: Vec<(String, LinkWrite<I>)>,
}

impl<I> Default for RowWrite<I> {
    fn default() -> Self {
        Self {
            values: BTreeMap::new(),
            links: Vec::new(),
        }
    }
}

impl<I> RowWrite<I> {
    pub fn is_empty(&self) -> bool {
        self.values.is_empty() && self.links.is_empty()
    }
}

/// Trait for storage backends
///
/// Implementations map their own failures to `Error::Adapter`.
pub trait Adapter {
    /// Row identifier
    type Id: Clone + Eq + Hash + Ord + Debug;

    /// Models known to this backend
    fn schema(&self) -> &Schema;

    /// Default lookup and delete chunk size
    fn batch_size(&self) -> usize {
        BATCH_SIZE
    }

    /// Relations of a model as (field, related model, multiplicity, reverse)
    fn iter_relations(&self, model: &str) -> Result<Vec<RelationInfo>> {
        Ok(self.schema().iter_relations(model)?.cloned().collect())
    }

    /// Batched lookup; returns exactly one row list per lookup, in order
    fn get(&mut self, model: &str, lookups: &[Lookup<Self::Id>]) -> Result<Vec<Vec<Row<Self::Id>>>>;

    /// Current members of a to-many relation
    fn get_related_x_to_many(&mut self, model: &str, id: &Self::Id, field: &str) -> Result<Vec<Self::Id>>;

    /// The candidates already in a to-many relation
    fn related_x_to_many_contains(
        &mut self,
        model: &str,
        id: &Self::Id,
        field: &str,
        candidates: &[Self::Id],
    ) -> Result<Vec<Self::Id>> {
        let current: HashSet<Self::Id> = self.get_related_x_to_many(model, id, field)?.into_iter().collect();
        Ok(candidates.iter().filter(|c| current.contains(c)).cloned().collect())
    }

    /// Insert a row with the given plain values
    fn create(&mut self, model: &str, values: &BTreeMap<String, Value>) -> Result<Row<Self::Id>>;

    /// Apply a write to an existing row and return its new state
    fn update(&mut self, model: &str, id: &Self::Id, write: &RowWrite<Self::Id>) -> Result<Row<Self::Id>>;

    /// Ids of rows matching every condition
    fn select(&mut self, model: &str, conditions: &[Condition<Self::Id>]) -> Result<Vec<Self::Id>>;

    /// Delete rows; returns how many existed
    fn delete(&mut self, model: &str, ids: &[Self::Id]) -> Result<usize>;
}
