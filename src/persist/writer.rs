//! Write phase - bring resolved rows in line with their items
//!
//! Every write is planned against the pre-write snapshot first and applied
//! afterwards, one `update` call per row. An edge between two rows is
//! written from whichever end is planned first; the other end skips it.
//! Replacing a to-many set always executes.

use super::policy::{EndState, field_writable};
use super::resolver::{FarEnd, edge_writable};
use super::{NodeState, Persister, Run, related_items};
use crate::adapter::{Adapter, Condition, LinkWrite, Row, RowWrite};
use crate::item::class::{FieldRef, ItemClass, RelationId};
use crate::item::graph::{ItemData, ItemGraph, ItemId, Related};
use crate::schema::RelationInfo;
use crate::value::Value;
use crate::{Error, Result};
use std::collections::{HashMap, HashSet};

/// Relation pair name and row ids, oriented the same from both ends
type EdgeKey<I> = (String, String, I, I);

struct Plan<I> {
    order: Vec<(String, I)>,
    writes: HashMap<(String, I), RowWrite<I>>,
    seen: HashSet<EdgeKey<I>>,
}

impl<I: Clone + Eq + std::hash::Hash> Plan<I> {
    fn new() -> Self {
        Self {
            order: Vec::new(),
            writes: HashMap::new(),
            seen: HashSet::new(),
        }
    }

    fn entry(&mut self, model: &str, id: &I) -> &mut RowWrite<I> {
        let key = (model.to_string(), id.clone());
        if !self.writes.contains_key(&key) {
            self.order.push(key.clone());
        }
        self.writes.entry(key).or_default()
    }

    fn link(&mut self, model: &str, id: &I, field: &str, write: LinkWrite<I>) {
        self.entry(model, id).links.push((field.to_string(), write));
    }
}

fn edge_key<I: Clone>(model: &str, info: &RelationInfo, this: &I, other: &I) -> EdgeKey<I> {
    let forward = (model.to_string(), info.name.clone());
    if let Some(reverse) = &info.reverse {
        let backward = (info.related_model.clone(), reverse.clone());
        if backward < forward {
            return (backward.0, backward.1, other.clone(), this.clone());
        }
    }
    (forward.0, forward.1, this.clone(), other.clone())
}

/// The row being written and what is known about it
struct Target<'a, I> {
    class: &'a ItemClass,
    data: &'a ItemData,
    row: &'a Row<I>,
    created: bool,
}

/// A resolved row on the far end of a relation
struct Candidate<I> {
    class: ItemClass,
    row: Row<I>,
    created: bool,
}

impl<A: Adapter> Persister<A> {
    pub(super) fn write(&mut self, graph: &ItemGraph, run: &mut Run<A::Id>) -> Result<()> {
        let mut plan = Plan::new();
        for index in 0..run.nodes.len() {
            let node = &run.nodes[index];
            if node.state != NodeState::Resolved {
                continue;
            }
            let data = graph.item(node.item)?;
            if data.is_get_only() {
                continue;
            }
            let class = node.class.clone();
            let created = node.created;
            for row in node.rows.clone() {
                let target = Target {
                    class: &class,
                    data,
                    row: &row,
                    created,
                };
                self.plan_row(graph, run, &mut plan, &target)?;
            }
        }

        for key in plan.order {
            let Some(write) = plan.writes.remove(&key) else {
                continue;
            };
            if write.is_empty() {
                continue;
            }
            let (model, id) = key;
            let row = self.adapter.update(&model, &id, &write)?;
            tracing::debug!(
                "Updated {} row {:?}: {} fields, {} relations",
                model,
                id,
                write.values.len(),
                write.links.len()
            );
            run.stats.updated += 1;
            for node in run.nodes.iter_mut() {
                if node.class.model() != model {
                    continue;
                }
                for current in node.rows.iter_mut().filter(|r| r.id == id) {
                    *current = row.clone();
                }
            }
        }
        Ok(())
    }

    fn plan_row(
        &mut self,
        graph: &ItemGraph,
        run: &mut Run<A::Id>,
        plan: &mut Plan<A::Id>,
        target: &Target<'_, A::Id>,
    ) -> Result<()> {
        let class = target.class;
        let model = class.model();
        let row = target.row;

        // Created rows already hold the item's fields
        if !target.created {
            for field in class.field_ids() {
                let field_ref = FieldRef::Field(field);
                let value = match target.data.field(field) {
                    Some(value) => value.clone(),
                    None if class.is_nullable(field_ref) => Value::Null,
                    None => continue,
                };
                let name = &class.field_info(field).name;
                let current = row.value(name).cloned().unwrap_or(Value::Null);
                if field_writable(class.norewrite(field_ref), &current, &value) {
                    plan.entry(model, &row.id).values.insert(name.clone(), value);
                }
            }
        }

        for relation in class.relation_ids() {
            let info = class.relation_info(relation);
            let members = match target.data.relation(relation) {
                Some(related @ Related::Many(_)) => Some(related_items(graph, related)?),
                Some(Related::One(item)) => {
                    self.plan_x_to_one(graph, run, plan, target, relation, item)?;
                    continue;
                }
                None => None,
            };
            match members {
                Some(members) if !members.is_empty() => {
                    self.plan_x_to_many(graph, run, plan, target, relation, &members)?;
                }
                _ => self.plan_clear(run, plan, target, relation, info)?,
            }
        }
        Ok(())
    }

    /// Point an x-to-one relation at the related item's row
    fn plan_x_to_one(
        &mut self,
        graph: &ItemGraph,
        run: &mut Run<A::Id>,
        plan: &mut Plan<A::Id>,
        target: &Target<'_, A::Id>,
        relation: RelationId,
        item: ItemId,
    ) -> Result<()> {
        let class = target.class;
        let info = class.relation_info(relation);
        let other = &run.nodes[run.node_index(graph, item)?];
        if other.state != NodeState::Resolved {
            return Ok(());
        }
        if other.rows.len() > 1 {
            let ids: Vec<&A::Id> = other.rows.iter().map(|row| &row.id).collect();
            return Err(Error::MultipleModelsMatch {
                class: other.class.tag(),
                model: other.class.model().to_string(),
                rows: format!("{:?}", ids),
            });
        }
        let far = Candidate {
            class: other.class.clone(),
            row: other.rows[0].clone(),
            created: other.created,
        };

        let row = target.row;
        let key = edge_key(class.model(), info, &row.id, &far.row.id);
        let current = if target.created { None } else { row.link(&info.name) };
        if current == Some(&far.row.id) {
            plan.seen.insert(key);
            return Ok(());
        }
        if plan.seen.contains(&key) {
            return Ok(());
        }

        let this = EndState {
            created: target.created,
            occupied: current.is_some(),
        };
        let policy = class.norewrite(FieldRef::Relation(relation));
        let far_end = FarEnd {
            class: &far.class,
            row: &far.row,
            created: far.created,
        };
        if edge_writable(&mut self.adapter, &mut run.snapshot, policy, this, info, &far_end)? {
            plan.link(class.model(), &row.id, &info.name, LinkWrite::Set(Some(far.row.id.clone())));
            plan.seen.insert(key);
        }
        Ok(())
    }

    /// Add to, or replace, a to-many relation; then unlink unref'd members
    fn plan_x_to_many(
        &mut self,
        graph: &ItemGraph,
        run: &mut Run<A::Id>,
        plan: &mut Plan<A::Id>,
        target: &Target<'_, A::Id>,
        relation: RelationId,
        members: &[ItemId],
    ) -> Result<()> {
        let class = target.class;
        let model = class.model();
        let info = class.relation_info(relation);
        let row = target.row;

        let mut candidates: Vec<Candidate<A::Id>> = Vec::new();
        let mut ids = HashSet::new();
        for member in members {
            let other = &run.nodes[run.node_index(graph, *member)?];
            if other.state != NodeState::Resolved {
                continue;
            }
            for member_row in &other.rows {
                if ids.insert(member_row.id.clone()) {
                    candidates.push(Candidate {
                        class: other.class.clone(),
                        row: member_row.clone(),
                        created: other.created,
                    });
                }
            }
        }
        if candidates.is_empty() {
            return Ok(());
        }

        let policy = class.norewrite(FieldRef::Relation(relation));
        let replace = class.replaces_x_to_many(relation);
        let unref = policy.is_none() && !target.created && !replace && !class.unref_selectors(relation).is_empty();
        let current: Vec<A::Id> = if target.created {
            Vec::new()
        } else {
            run.snapshot
                .members(&mut self.adapter, model, &row.id, &info.name)?
                .to_vec()
        };
        let this = EndState {
            created: target.created,
            occupied: !current.is_empty(),
        };

        let mut writable = Vec::new();
        for candidate in &candidates {
            let far_end = FarEnd {
                class: &candidate.class,
                row: &candidate.row,
                created: candidate.created,
            };
            if edge_writable(&mut self.adapter, &mut run.snapshot, policy, this, info, &far_end)? {
                writable.push(candidate.row.id.clone());
            }
        }

        if replace {
            let wanted: HashSet<&A::Id> = writable.iter().collect();
            let stored: HashSet<&A::Id> = current.iter().collect();
            for id in &writable {
                plan.seen.insert(edge_key(model, info, &row.id, id));
            }
            if !writable.is_empty() && wanted != stored {
                plan.link(model, &row.id, &info.name, LinkWrite::Replace(writable));
            }
        } else {
            let already: HashSet<A::Id> = if target.created {
                HashSet::new()
            } else {
                self.adapter
                    .related_x_to_many_contains(model, &row.id, &info.name, &writable)?
                    .into_iter()
                    .collect()
            };
            let mut added = Vec::new();
            for id in writable {
                let key = edge_key(model, info, &row.id, &id);
                if !already.contains(&id) && !plan.seen.contains(&key) {
                    added.push(id);
                }
                plan.seen.insert(key);
            }
            if !added.is_empty() {
                plan.link(model, &row.id, &info.name, LinkWrite::Add(added));
            }
        }

        if unref {
            let removed = self.unref_members(class, relation, &candidates, &current)?;
            if !removed.is_empty() {
                tracing::debug!("Unref {} members of {}.{} on {:?}", removed.len(), model, info.name, row.id);
                plan.link(model, &row.id, &info.name, LinkWrite::Remove(removed));
            }
        }
        Ok(())
    }

    /// Stored members sharing selector values with a supplied member that
    /// were not supplied themselves
    fn unref_members(
        &mut self,
        class: &ItemClass,
        relation: RelationId,
        candidates: &[Candidate<A::Id>],
        current: &[A::Id],
    ) -> Result<Vec<A::Id>> {
        let info = class.relation_info(relation);
        let selectors = class.unref_selectors(relation);
        let supplied: HashSet<&A::Id> = candidates.iter().map(|c| &c.row.id).collect();

        let mut partitions: Vec<Vec<Condition<A::Id>>> = Vec::new();
        for candidate in candidates {
            let conditions: Vec<Condition<A::Id>> = selectors
                .iter()
                .map(|field| Condition::Eq {
                    field: field.clone(),
                    value: candidate.row.value(field).cloned().unwrap_or(Value::Null),
                })
                .collect();
            if !partitions.contains(&conditions) {
                partitions.push(conditions);
            }
        }

        let mut removed = Vec::new();
        for conditions in partitions {
            let selected: HashSet<A::Id> = self
                .adapter
                .select(&info.related_model, &conditions)?
                .into_iter()
                .collect();
            for id in current {
                if selected.contains(id) && !supplied.contains(id) && !removed.contains(id) {
                    removed.push(id.clone());
                }
            }
        }
        Ok(removed)
    }

    /// Clear an absent nullable relation on an existing row
    fn plan_clear(
        &mut self,
        run: &mut Run<A::Id>,
        plan: &mut Plan<A::Id>,
        target: &Target<'_, A::Id>,
        relation: RelationId,
        info: &RelationInfo,
    ) -> Result<()> {
        let class = target.class;
        let field_ref = FieldRef::Relation(relation);
        if target.created || !class.is_nullable(field_ref) || class.norewrite(field_ref).is_some() {
            return Ok(());
        }
        let row = target.row;
        if info.multiplicity.is_x_to_one() {
            if row.link(&info.name).is_some() {
                plan.link(class.model(), &row.id, &info.name, LinkWrite::Set(None));
            }
        } else {
            let current = run
                .snapshot
                .members(&mut self.adapter, class.model(), &row.id, &info.name)?;
            if !current.is_empty() {
                plan.link(class.model(), &row.id, &info.name, LinkWrite::Replace(Vec::new()));
            }
        }
        Ok(())
    }
}
