//! In-memory storage adapter
//!
//! Rows live in per-model tables keyed by a `u64` id. A relation and its
//! reverse share one link set, stored under whichever of the two
//! `(model, field)` names sorts first, so both ends always agree. x-to-one
//! ends are kept unique: linking a row through an x-to-one end drops its
//! previous link.

use super::{Adapter, Condition, LinkWrite, Lookup, Row, RowWrite, BATCH_SIZE};
use crate::schema::{ModelSchema, Schema};
use crate::value::Value;
use crate::{Error, Result};
use std::collections::{BTreeMap, BTreeSet};

type Table = BTreeMap<u64, BTreeMap<String, Value>>;

/// One end of a relation, resolved to its link set
struct Side {
    key: (String, String),
    /// This end is the second element of the stored pairs
    flipped: bool,
    this_one: bool,
    other_one: bool,
}

impl Side {
    /// (this row, other row) of a stored pair
    fn ends(&self, pair: (u64, u64)) -> (u64, u64) {
        if self.flipped { (pair.1, pair.0) } else { pair }
    }

    fn pair(&self, this: u64, other: u64) -> (u64, u64) {
        if self.flipped { (other, this) } else { (this, other) }
    }
}

/// Storage backend holding everything in process memory
#[derive(Debug, Clone)]
pub struct MemoryAdapter {
    schema: Schema,
    tables: BTreeMap<String, Table>,
    links: BTreeMap<(String, String), BTreeSet<(u64, u64)>>,
    next_id: u64,
    batch_size: usize,
    /// (model, number of lookups) of every `get` call
    get_calls: Vec<(String, usize)>,
}

impl MemoryAdapter {
    pub fn new(schema: Schema) -> Self {
        let tables = schema.models().map(|m| (m.name.clone(), Table::new())).collect();
        Self {
            schema,
            tables,
            links: BTreeMap::new(),
            next_id: 1,
            batch_size: BATCH_SIZE,
            get_calls: Vec::new(),
        }
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    /// Store a row directly, bypassing any item logic
    pub fn insert<K, V>(&mut self, model: &str, values: impl IntoIterator<Item = (K, V)>) -> Result<u64>
    where
        K: Into<String>,
        V: Into<Value>,
    {
        let values = values.into_iter().map(|(k, v)| (k.into(), v.into())).collect();
        Ok(self.create(model, &values)?.id)
    }

    /// Link two stored rows through `field` of `model`
    pub fn connect(&mut self, model: &str, field: &str, id: u64, target: u64) -> Result<()> {
        let side = self.side(model, field)?;
        self.link(&side, id, target);
        Ok(())
    }

    pub fn row(&self, model: &str, id: u64) -> Option<Row<u64>> {
        self.build_row(model, id).ok()
    }

    /// Every row of a model, by id
    pub fn rows(&self, model: &str) -> Vec<Row<u64>> {
        let Some(table) = self.tables.get(model) else {
            return Vec::new();
        };
        table.keys().filter_map(|id| self.row(model, *id)).collect()
    }

    pub fn len(&self, model: &str) -> usize {
        self.tables.get(model).map(BTreeMap::len).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.tables.values().all(BTreeMap::is_empty)
    }

    /// Rows linked to `id` through `field`, sorted
    pub fn linked_ids(&self, model: &str, id: u64, field: &str) -> Result<Vec<u64>> {
        let side = self.side(model, field)?;
        Ok(self.linked(&side, id))
    }

    pub fn get_calls(&self) -> &[(String, usize)] {
        &self.get_calls
    }

    pub fn clear_get_calls(&mut self) {
        self.get_calls.clear();
    }

    fn model(&self, model: &str) -> Result<&ModelSchema> {
        self.schema.model(model)
    }

    fn table(&self, model: &str) -> Result<&Table> {
        self.tables
            .get(model)
            .ok_or_else(|| Error::UnknownModel(model.to_string()))
    }

    fn side(&self, model: &str, field: &str) -> Result<Side> {
        let schema = self.model(model)?;
        let relation = schema.get_relation(field).ok_or_else(|| Error::UnknownField {
            model: model.to_string(),
            field: field.to_string(),
        })?;
        let this = (model.to_string(), field.to_string());
        let this_one = relation.multiplicity.is_x_to_one();
        Ok(match &relation.reverse {
            Some(reverse) => {
                let other = (relation.related_model.clone(), reverse.clone());
                let other_one = relation.multiplicity.reverse().is_x_to_one();
                let flipped = other < this;
                Side {
                    key: if flipped { other } else { this },
                    flipped,
                    this_one,
                    other_one,
                }
            }
            None => Side {
                key: this,
                flipped: false,
                this_one,
                other_one: false,
            },
        })
    }

    fn linked(&self, side: &Side, id: u64) -> Vec<u64> {
        let Some(pairs) = self.links.get(&side.key) else {
            return Vec::new();
        };
        let mut ids: Vec<u64> = pairs
            .iter()
            .map(|pair| side.ends(*pair))
            .filter(|(this, _)| *this == id)
            .map(|(_, other)| other)
            .collect();
        ids.sort_unstable();
        ids
    }

    fn link(&mut self, side: &Side, this: u64, other: u64) {
        let pairs = self.links.entry(side.key.clone()).or_default();
        pairs.retain(|pair| {
            let (a, b) = side.ends(*pair);
            !((side.this_one && a == this) || (side.other_one && b == other))
        });
        pairs.insert(side.pair(this, other));
    }

    fn unlink_all(&mut self, side: &Side, this: u64) {
        if let Some(pairs) = self.links.get_mut(&side.key) {
            pairs.retain(|pair| side.ends(*pair).0 != this);
        }
    }

    fn check_row(&self, model: &str, id: u64) -> Result<()> {
        if self.table(model)?.contains_key(&id) {
            Ok(())
        } else {
            Err(Error::Adapter(format!("no {} row with id {}", model, id)))
        }
    }

    fn build_row(&self, model: &str, id: u64) -> Result<Row<u64>> {
        let stored = self
            .table(model)?
            .get(&id)
            .ok_or_else(|| Error::Adapter(format!("no {} row with id {}", model, id)))?;
        let schema = self.model(model)?;
        let values = schema
            .fields
            .iter()
            .map(|f| (f.name.clone(), stored.get(&f.name).cloned().unwrap_or(Value::Null)))
            .collect();
        let mut links = BTreeMap::new();
        for relation in schema.relations.iter().filter(|r| r.multiplicity.is_x_to_one()) {
            let side = self.side(model, &relation.name)?;
            links.insert(relation.name.clone(), self.linked(&side, id).first().copied());
        }
        Ok(Row { id, values, links })
    }

    fn matches(&self, model: &str, id: u64, values: &BTreeMap<String, Value>, condition: &Condition<u64>) -> Result<bool> {
        match condition {
            Condition::Eq { field, value } => {
                if self.model(model)?.field_index(field).is_none() {
                    return Err(Error::UnknownField {
                        model: model.to_string(),
                        field: field.clone(),
                    });
                }
                Ok(values.get(field).unwrap_or(&Value::Null) == value)
            }
            Condition::Related { field, any_of } => {
                let side = self.side(model, field)?;
                Ok(self.linked(&side, id).iter().any(|linked| any_of.contains(linked)))
            }
        }
    }

    fn matching_ids(&self, model: &str, conditions: &[Condition<u64>]) -> Result<Vec<u64>> {
        let mut ids = Vec::new();
        for (id, values) in self.table(model)? {
            let mut all = true;
            for condition in conditions {
                if !self.matches(model, *id, values, condition)? {
                    all = false;
                    break;
                }
            }
            if all {
                ids.push(*id);
            }
        }
        Ok(ids)
    }
}

impl Adapter for MemoryAdapter {
    type Id = u64;

    fn schema(&self) -> &Schema {
        &self.schema
    }

    fn batch_size(&self) -> usize {
        self.batch_size
    }

    fn get(&mut self, model: &str, lookups: &[Lookup<u64>]) -> Result<Vec<Vec<Row<u64>>>> {
        self.get_calls.push((model.to_string(), lookups.len()));
        let mut results = Vec::with_capacity(lookups.len());
        for lookup in lookups {
            let mut ids = BTreeSet::new();
            for group in &lookup.groups {
                ids.extend(self.matching_ids(model, group)?);
            }
            let rows = ids
                .into_iter()
                .map(|id| self.build_row(model, id))
                .collect::<Result<Vec<_>>>()?;
            results.push(rows);
        }
        Ok(results)
    }

    fn get_related_x_to_many(&mut self, model: &str, id: &u64, field: &str) -> Result<Vec<u64>> {
        self.check_row(model, *id)?;
        self.linked_ids(model, *id, field)
    }

    fn create(&mut self, model: &str, values: &BTreeMap<String, Value>) -> Result<Row<u64>> {
        let schema = self.model(model)?;
        for field in values.keys() {
            if schema.field_index(field).is_none() {
                return Err(Error::UnknownField {
                    model: model.to_string(),
                    field: field.clone(),
                });
            }
        }
        let id = self.next_id;
        self.next_id += 1;
        self.tables
            .get_mut(model)
            .ok_or_else(|| Error::UnknownModel(model.to_string()))?
            .insert(id, values.clone());
        self.build_row(model, id)
    }

    fn update(&mut self, model: &str, id: &u64, write: &RowWrite<u64>) -> Result<Row<u64>> {
        let id = *id;
        self.check_row(model, id)?;
        let schema = self.model(model)?.clone();
        for field in write.values.keys() {
            if schema.field_index(field).is_none() {
                return Err(Error::UnknownField {
                    model: model.to_string(),
                    field: field.clone(),
                });
            }
        }

        for (field, change) in &write.links {
            let side = self.side(model, field)?;
            let related_model = schema
                .get_relation(field)
                .map(|r| r.related_model.clone())
                .unwrap_or_default();
            let targets: &[u64] = match change {
                LinkWrite::Set(Some(target)) => std::slice::from_ref(target),
                LinkWrite::Add(ids) | LinkWrite::Replace(ids) => ids,
                LinkWrite::Set(None) | LinkWrite::Remove(_) => &[],
            };
            for target in targets {
                self.check_row(&related_model, *target)?;
            }

            match change {
                LinkWrite::Set(target) => {
                    self.unlink_all(&side, id);
                    if let Some(target) = target {
                        self.link(&side, id, *target);
                    }
                }
                LinkWrite::Add(targets) => {
                    for target in targets {
                        self.link(&side, id, *target);
                    }
                }
                LinkWrite::Remove(targets) => {
                    if let Some(pairs) = self.links.get_mut(&side.key) {
                        for target in targets {
                            pairs.remove(&side.pair(id, *target));
                        }
                    }
                }
                LinkWrite::Replace(targets) => {
                    self.unlink_all(&side, id);
                    for target in targets {
                        self.link(&side, id, *target);
                    }
                }
            }
        }

        if let Some(row) = self.tables.get_mut(model).and_then(|t| t.get_mut(&id)) {
            for (field, value) in &write.values {
                row.insert(field.clone(), value.clone());
            }
        }
        self.build_row(model, id)
    }

    fn select(&mut self, model: &str, conditions: &[Condition<u64>]) -> Result<Vec<u64>> {
        self.matching_ids(model, conditions)
    }

    fn delete(&mut self, model: &str, ids: &[u64]) -> Result<usize> {
        let table = self
            .tables
            .get_mut(model)
            .ok_or_else(|| Error::UnknownModel(model.to_string()))?;
        let removed: Vec<u64> = ids.iter().filter(|id| table.remove(*id).is_some()).copied().collect();

        let mut sides = Vec::new();
        for owner in self.schema.models() {
            for relation in &owner.relations {
                let touches_this = owner.name == model;
                let touches_other = relation.related_model == model;
                if touches_this || touches_other {
                    sides.push((self.side(&owner.name, &relation.name)?, touches_this, touches_other));
                }
            }
        }
        for (side, touches_this, touches_other) in sides {
            if let Some(pairs) = self.links.get_mut(&side.key) {
                pairs.retain(|pair| {
                    let (a, b) = side.ends(*pair);
                    !((touches_this && removed.contains(&a)) || (touches_other && removed.contains(&b)))
                });
            }
        }
        Ok(removed.len())
    }
}
