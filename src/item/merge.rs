//! Processing pass run before persistence
//!
//! 1. Bulk defaults are copied onto members that lack the field.
//! 2. Items of merge-enabled classes that share a complete getter key are
//!    collapsed into one, unless two of their fields hold different
//!    non-null values. The pass repeats until nothing merges, since merging
//!    related items can make relation keys equal.

use super::class::{FieldRef, ItemClass};
use super::graph::{ItemGraph, ItemId, ItemData, Related, Root};
use crate::value::Value;
use crate::Result;

/// Outcome of `ItemGraph::process`
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ProcessStats {
    pub defaults_applied: usize,
    pub merged: usize,
}

#[derive(Debug, PartialEq)]
enum KeyPart {
    Value(Value),
    Item(ItemId),
    Items(Vec<ItemId>),
}

impl ItemGraph {
    /// Apply bulk defaults and merge equivalent items reachable from `root`
    pub fn process(&mut self, root: impl Into<Root>) -> Result<ProcessStats> {
        let root = root.into();
        let defaults_applied = self.apply_defaults(root)?;
        let merged = self.merge_items(root)?;
        if merged > 0 {
            tracing::debug!("Merged {} items", merged);
        }
        Ok(ProcessStats {
            defaults_applied,
            merged,
        })
    }

    fn apply_defaults(&mut self, root: Root) -> Result<usize> {
        let (_, bulks) = self.reachable(root)?;
        let mut applied = 0;
        for bulk in bulks {
            let defaults = self.bulk(bulk)?.defaults.clone();
            if defaults.is_empty() {
                continue;
            }
            for member in self.bulk_items(bulk)? {
                let data = self.item_mut(member)?;
                for (field, value) in &defaults {
                    if !data.fields.contains_key(field) {
                        data.fields.insert(*field, value.clone());
                        applied += 1;
                    }
                }
            }
        }
        Ok(applied)
    }

    fn merge_items(&mut self, root: Root) -> Result<usize> {
        let mut total = 0;
        loop {
            let (items, _) = self.reachable(root)?;
            let mut groups: Vec<(ItemClass, Vec<ItemId>)> = Vec::new();
            for item in items {
                let class = self.class_of(item)?;
                if !class.modes().allow_merge_items {
                    continue;
                }
                match groups.iter_mut().find(|(c, _)| *c == class) {
                    Some((_, members)) => members.push(item),
                    None => groups.push((class, vec![item])),
                }
            }

            let mut merged = 0;
            for (_, members) in groups {
                let mut survivors: Vec<ItemId> = Vec::new();
                for item in members {
                    let mut target = None;
                    for survivor in &survivors {
                        if self.mergeable(*survivor, item)? {
                            target = Some(*survivor);
                            break;
                        }
                    }
                    match target {
                        Some(survivor) => {
                            self.merge_into(survivor, item)?;
                            merged += 1;
                        }
                        None => survivors.push(item),
                    }
                }
            }

            total += merged;
            if merged == 0 {
                return Ok(total);
            }
        }
    }

    fn key(&self, data: &ItemData, group: &[FieldRef]) -> Result<Option<Vec<KeyPart>>> {
        let mut key = Vec::with_capacity(group.len());
        for field in group {
            let part = match field {
                FieldRef::Field(id) => match data.fields.get(id) {
                    Some(value) => KeyPart::Value(value.clone()),
                    None => return Ok(None),
                },
                FieldRef::Relation(id) => match data.relations.get(id) {
                    Some(Related::One(target)) => KeyPart::Item(self.resolve(*target)?),
                    Some(Related::Many(bulk)) => {
                        let mut members = self.bulk_items(*bulk)?;
                        if members.is_empty() {
                            return Ok(None);
                        }
                        members.sort();
                        KeyPart::Items(members)
                    }
                    None => return Ok(None),
                },
            };
            key.push(part);
        }
        Ok(Some(key))
    }

    fn mergeable(&self, a: ItemId, b: ItemId) -> Result<bool> {
        let (a_data, b_data) = (self.item(a)?, self.item(b)?);
        if a_data.class != b_data.class {
            return Ok(false);
        }

        let mut same_key = false;
        for group in a_data.class.getters() {
            let a_key = self.key(a_data, group)?;
            if a_key.is_some() && a_key == self.key(b_data, group)? {
                same_key = true;
                break;
            }
        }
        if !same_key {
            return Ok(false);
        }

        for (field, a_value) in &a_data.fields {
            if let Some(b_value) = b_data.fields.get(field) {
                if !a_value.is_null() && !b_value.is_null() && a_value != b_value {
                    return Ok(false);
                }
            }
        }
        for (relation, a_related) in &a_data.relations {
            if let (Related::One(x), Some(Related::One(y))) = (a_related, b_data.relations.get(relation)) {
                if self.resolve(*x)? != self.resolve(*y)? {
                    return Ok(false);
                }
            }
        }
        let modes_conflict = |x: Option<bool>, y: Option<bool>| matches!((x, y), (Some(x), Some(y)) if x != y);
        if modes_conflict(a_data.update_only, b_data.update_only)
            || modes_conflict(a_data.get_only, b_data.get_only)
        {
            return Ok(false);
        }
        Ok(true)
    }

    /// Fold `dropped` into `survivor` and alias the dropped handle
    fn merge_into(&mut self, survivor: ItemId, dropped: ItemId) -> Result<()> {
        let Some(data) = self.items.remove(dropped) else {
            return Ok(());
        };
        self.aliases.insert(dropped, survivor);

        let mut moved_bulks = Vec::new();
        {
            let target = self.item_mut(survivor)?;
            for (field, value) in data.fields {
                let slot = target.fields.entry(field).or_insert(Value::Null);
                if slot.is_null() {
                    *slot = value;
                }
            }
            target.update_only = target.update_only.or(data.update_only);
            target.get_only = target.get_only.or(data.get_only);

            for (relation, related) in data.relations {
                match (related, target.relations.get(&relation).copied()) {
                    (Related::One(item), None) => {
                        target.relations.insert(relation, Related::One(item));
                    }
                    (Related::Many(bulk), None) => {
                        target.relations.insert(relation, Related::Many(bulk));
                        moved_bulks.push((bulk, None));
                    }
                    (Related::Many(bulk), Some(Related::Many(existing))) => {
                        moved_bulks.push((bulk, Some(existing)));
                    }
                    _ => {}
                }
            }
        }

        for (bulk, into) in moved_bulks {
            match into {
                None => {
                    let data = self.bulk_mut(bulk)?;
                    if let Some((_, relation)) = data.owner {
                        data.owner = Some((survivor, relation));
                    }
                }
                Some(existing) => {
                    let members = self.bulks.remove(bulk).map(|b| b.items).unwrap_or_default();
                    let target = self.bulk_mut(existing)?;
                    for member in members {
                        if !target.items.contains(&member) {
                            target.items.push(member);
                        }
                    }
                }
            }
        }

        self.redirect(dropped, survivor);
        Ok(())
    }

    /// Replace every reference to `from` with `to`
    fn redirect(&mut self, from: ItemId, to: ItemId) {
        for (_, data) in self.items.iter_mut() {
            for related in data.relations.values_mut() {
                if *related == Related::One(from) {
                    *related = Related::One(to);
                }
            }
        }
        for (_, bulk) in self.bulks.iter_mut() {
            if bulk.items.contains(&from) {
                let mut seen = std::collections::HashSet::new();
                bulk.items = bulk
                    .items
                    .iter()
                    .map(|m| if *m == from { to } else { *m })
                    .filter(|m| seen.insert(*m))
                    .collect();
            }
            if let Some((owner, relation)) = bulk.owner {
                if owner == from {
                    bulk.owner = Some((to, relation));
                }
            }
        }
    }
}
