//! Resolution rounds - match items to stored rows, create the rest
//!
//! An item is ready once every item its getter and creator relations point
//! at has settled (resolved or given up on), so foreign keys exist before
//! they are used as filters. Each round:
//! 1. groups ready items per class and looks them up in chunks
//! 2. checks ambiguity: a row claimed by two items first, then an item
//!    matching several rows
//! 3. creates unmatched items that are allowed to be created
//!
//! If nothing is ready while items remain, the remaining items form a
//! cycle; they are resolved in one forced round with the unsettled
//! relation groups treated as unusable.

use super::policy::{EndState, edge_allowed};
use super::{NodeState, Persister, Run, Snapshot, related_items};
use crate::adapter::{Adapter, Condition, Lookup, Row};
use crate::item::class::{FieldRef, ItemClass, Norewrite, RelationId};
use crate::item::graph::{ItemData, ItemGraph};
use crate::schema::RelationInfo;
use crate::value::Value;
use crate::{Error, Result};
use std::collections::{BTreeMap, HashSet};

/// Policy and pre-write state of the far end of an edge
pub(crate) struct FarEnd<'a, I> {
    pub(crate) class: &'a ItemClass,
    pub(crate) row: &'a Row<I>,
    pub(crate) created: bool,
}

impl<A: Adapter> Persister<A> {
    pub(super) fn resolve(&mut self, graph: &ItemGraph, run: &mut Run<A::Id>) -> Result<()> {
        loop {
            let pending: Vec<usize> = (0..run.nodes.len())
                .filter(|i| run.nodes[*i].state == NodeState::Pending)
                .collect();
            if pending.is_empty() {
                return Ok(());
            }

            let mut ready = Vec::new();
            for index in &pending {
                if dependencies_settled(graph, run, *index)? {
                    ready.push(*index);
                }
            }
            if ready.is_empty() {
                tracing::warn!(
                    "Getter/creator cycle among {} items; resolving without unsettled relations",
                    pending.len()
                );
                run.stats.forced_rounds += 1;
                ready = pending;
            }

            run.stats.rounds += 1;
            tracing::debug!("Resolution round {}: {} items", run.stats.rounds, ready.len());
            self.resolve_round(graph, run, &ready)?;
        }
    }

    fn resolve_round(&mut self, graph: &ItemGraph, run: &mut Run<A::Id>, ready: &[usize]) -> Result<()> {
        let mut groups: Vec<(ItemClass, Vec<usize>)> = Vec::new();
        let mut fast = Vec::new();
        for index in ready {
            let class = &run.nodes[*index].class;
            if class.modes().fast_insert {
                fast.push(*index);
                continue;
            }
            match groups.iter_mut().find(|(c, _)| *c == *class) {
                Some((_, members)) => members.push(*index),
                None => groups.push((class.clone(), vec![*index])),
            }
        }

        for (class, members) in &groups {
            self.lookup_class(graph, run, class, members)?;
        }

        for (_, members) in &groups {
            for index in members {
                if run.nodes[*index].state == NodeState::Pending {
                    self.try_create(graph, run, *index)?;
                }
            }
        }
        for index in fast {
            self.create_row(graph, run, index)?;
        }
        Ok(())
    }

    /// Batched lookup of the ready items of one class
    fn lookup_class(
        &mut self,
        graph: &ItemGraph,
        run: &mut Run<A::Id>,
        class: &ItemClass,
        members: &[usize],
    ) -> Result<()> {
        // Items with identical lookups share one entry, so they always end
        // up in the same chunk
        let mut unique: Vec<(Lookup<A::Id>, Vec<usize>)> = Vec::new();
        for index in members {
            let lookup = build_lookup(graph, run, *index)?;
            if lookup.is_empty() {
                continue;
            }
            match unique.iter_mut().find(|(l, _)| *l == lookup) {
                Some((_, nodes)) => nodes.push(*index),
                None => unique.push((lookup, vec![*index])),
            }
        }
        if unique.is_empty() {
            return Ok(());
        }

        let batch_size = self.batch_size_for(class);
        let mut found: Vec<(usize, Vec<Row<A::Id>>)> = Vec::new();
        for chunk in unique.chunks(batch_size) {
            let lookups: Vec<Lookup<A::Id>> = chunk.iter().map(|(lookup, _)| lookup.clone()).collect();
            let results = self.adapter.get(class.model(), &lookups)?;
            run.stats.lookups += 1;
            if results.len() != lookups.len() {
                return Err(Error::Adapter(format!(
                    "get on {} returned {} result lists for {} lookups",
                    class.model(),
                    results.len(),
                    lookups.len()
                )));
            }
            tracing::debug!("Looked up {} {} items in one batch", lookups.len(), class.tag());
            for ((_, nodes), rows) in chunk.iter().zip(results) {
                let mut seen = HashSet::new();
                let rows: Vec<Row<A::Id>> = rows.into_iter().filter(|row| seen.insert(row.id.clone())).collect();
                if rows.is_empty() {
                    continue;
                }
                for node in nodes {
                    found.push((*node, rows.clone()));
                }
            }
        }

        let multi = class.modes().allow_multi_update;
        for (index, rows) in &found {
            for row in rows {
                let key = (class.model().to_string(), row.id.clone());
                match run.claims.get(&key) {
                    Some(other) if *other != *index && !multi => {
                        return Err(Error::MultipleItemsMatch {
                            class: class.tag(),
                            model: class.model().to_string(),
                            row: format!("{:?}", row.id),
                        });
                    }
                    Some(_) => {}
                    None => {
                        run.claims.insert(key, *index);
                    }
                }
            }
        }
        for (index, rows) in &found {
            if rows.len() > 1 && !multi {
                let ids: Vec<&A::Id> = rows.iter().map(|row| &row.id).collect();
                return Err(Error::MultipleModelsMatch {
                    class: class.tag(),
                    model: class.model().to_string(),
                    rows: format!("{:?}", ids),
                });
            }
            let node = &mut run.nodes[*index];
            node.rows = rows.clone();
            node.state = NodeState::Resolved;
            run.stats.matched += 1;
        }
        Ok(())
    }

    /// Create the row of an unmatched item when its modes and creators allow
    fn try_create(&mut self, graph: &ItemGraph, run: &mut Run<A::Id>, index: usize) -> Result<()> {
        let data = graph.item(run.nodes[index].item)?;
        let creatable = !data.is_get_only() && !data.is_update_only() && self.creatable(graph, run, index, data)?;
        if creatable {
            self.create_row(graph, run, index)
        } else {
            let node = &mut run.nodes[index];
            node.state = NodeState::Unresolved;
            run.stats.skipped += 1;
            tracing::debug!("Item {} of {} neither matched nor created", node.item, node.class.tag());
            Ok(())
        }
    }

    fn creatable(&mut self, graph: &ItemGraph, run: &mut Run<A::Id>, index: usize, data: &ItemData) -> Result<bool> {
        let class = run.nodes[index].class.clone();
        if class.creators().is_empty() {
            return Ok(true);
        }
        'groups: for group in class.creators() {
            for field in group {
                let satisfied = match *field {
                    FieldRef::Field(_) => data.has(*field),
                    FieldRef::Relation(relation) => self.creator_relation_ok(graph, run, &class, data, relation)?,
                };
                if !satisfied {
                    continue 'groups;
                }
            }
            return Ok(true);
        }
        Ok(false)
    }

    /// A creator relation counts when some related item resolved and the
    /// edge to it could be written on a new row
    fn creator_relation_ok(
        &mut self,
        graph: &ItemGraph,
        run: &mut Run<A::Id>,
        class: &ItemClass,
        data: &ItemData,
        relation: RelationId,
    ) -> Result<bool> {
        let Some(related) = data.relation(relation) else {
            return Ok(false);
        };
        let info = class.relation_info(relation);
        let policy = class.norewrite(FieldRef::Relation(relation));
        for item in related_items(graph, related)? {
            let other = &run.nodes[run.node_index(graph, item)?];
            if other.state != NodeState::Resolved {
                continue;
            }
            for row in &other.rows {
                let far = FarEnd {
                    class: &other.class,
                    row,
                    created: other.created,
                };
                if edge_writable(&mut self.adapter, &mut run.snapshot, policy, EndState::NEW, info, &far)? {
                    return Ok(true);
                }
            }
        }
        Ok(false)
    }

    /// Insert the item's plain fields as a new row
    fn create_row(&mut self, graph: &ItemGraph, run: &mut Run<A::Id>, index: usize) -> Result<()> {
        let node = &run.nodes[index];
        let data = graph.item(node.item)?;
        let values: BTreeMap<String, Value> = data
            .fields()
            .map(|(field, value)| (node.class.field_info(field).name.clone(), value.clone()))
            .collect();
        let model = node.class.model().to_string();
        let row = self.adapter.create(&model, &values)?;
        tracing::debug!("Created {} row {:?} for item {}", model, row.id, node.item);

        run.claims.insert((model, row.id.clone()), index);
        let node = &mut run.nodes[index];
        node.rows = vec![row];
        node.created = true;
        node.state = NodeState::Resolved;
        run.stats.created += 1;
        Ok(())
    }
}

/// Whether every item referenced by the getter and creator relations of a
/// node has settled
fn dependencies_settled<I>(graph: &ItemGraph, run: &Run<I>, index: usize) -> Result<bool>
where
    I: Clone + Eq + std::hash::Hash,
{
    let node = &run.nodes[index];
    if node.class.modes().fast_insert {
        return Ok(true);
    }
    let data = graph.item(node.item)?;
    for group in node.class.getters().iter().chain(node.class.creators()) {
        for field in group {
            let FieldRef::Relation(relation) = *field else {
                continue;
            };
            let Some(related) = data.relation(relation) else {
                continue;
            };
            for item in related_items(graph, related)? {
                let other = run.node_index(graph, item)?;
                if other != index && run.nodes[other].state == NodeState::Pending {
                    return Ok(false);
                }
            }
        }
    }
    Ok(true)
}

/// Lookup of one node: one condition group per usable getter group
fn build_lookup<I>(graph: &ItemGraph, run: &Run<I>, index: usize) -> Result<Lookup<I>>
where
    I: Clone + Eq + std::hash::Hash,
{
    let node = &run.nodes[index];
    let data = graph.item(node.item)?;
    let class = &node.class;
    let mut groups = Vec::new();
    'groups: for group in class.getters() {
        let mut conditions = Vec::with_capacity(group.len());
        for field in group {
            match *field {
                FieldRef::Field(id) => match data.field(id) {
                    Some(value) => conditions.push(Condition::Eq {
                        field: class.field_info(id).name.clone(),
                        value: value.clone(),
                    }),
                    None => continue 'groups,
                },
                FieldRef::Relation(id) => {
                    let Some(related) = data.relation(id) else {
                        continue 'groups;
                    };
                    let mut any_of = Vec::new();
                    for item in related_items(graph, related)? {
                        let other = &run.nodes[run.node_index(graph, item)?];
                        if other.state == NodeState::Resolved {
                            any_of.extend(other.rows.iter().map(|row| row.id.clone()));
                        }
                    }
                    if any_of.is_empty() {
                        continue 'groups;
                    }
                    conditions.push(Condition::Related {
                        field: class.relation_info(id).name.clone(),
                        any_of,
                    });
                }
            }
        }
        groups.push(conditions);
    }
    Ok(Lookup { groups })
}

/// Policy of the far end of `info` and whether its row already holds
/// something in the reverse relation
fn far_policy<'a, I>(info: &RelationInfo, far: &FarEnd<'a, I>) -> (Option<Norewrite>, Option<&'a RelationInfo>) {
    let Some(reverse) = &info.reverse else {
        return (None, None);
    };
    match far.class.relation_id(reverse) {
        Ok(id) => (
            far.class.norewrite(FieldRef::Relation(id)),
            Some(far.class.relation_info(id)),
        ),
        Err(_) => (None, None),
    }
}

/// Pre-write occupancy of a relation on a row
pub(crate) fn occupied<A: Adapter>(
    adapter: &mut A,
    snapshot: &mut Snapshot<A::Id>,
    model: &str,
    row: &Row<A::Id>,
    created: bool,
    relation: &RelationInfo,
) -> Result<bool> {
    if created {
        return Ok(false);
    }
    if relation.multiplicity.is_x_to_one() {
        return Ok(row.link(&relation.name).is_some());
    }
    Ok(!snapshot.members(adapter, model, &row.id, &relation.name)?.is_empty())
}

/// Whether the edge from a row in state `this` through `info` to the far
/// row may be written under both ends' policies
pub(crate) fn edge_writable<A: Adapter>(
    adapter: &mut A,
    snapshot: &mut Snapshot<A::Id>,
    policy: Option<Norewrite>,
    this: EndState,
    info: &RelationInfo,
    far: &FarEnd<'_, A::Id>,
) -> Result<bool> {
    let (far_policy, reverse) = far_policy(info, far);
    let protect = policy == Some(Norewrite::Protect) || far_policy == Some(Norewrite::Protect);
    let occupied = match reverse {
        Some(reverse) if protect => occupied(adapter, snapshot, far.class.model(), far.row, far.created, reverse)?,
        _ => false,
    };
    let other = EndState {
        created: far.created,
        occupied,
    };
    Ok(edge_allowed(policy, this, far_policy, other))
}
