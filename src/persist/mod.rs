//! Persister - Reconcile an item graph with storage
//!
//! A persist call runs in phases:
//! 1. `process()` the root (bulk defaults, merging)
//! 2. resolution rounds: look items up in batches, create the unmatched
//!    ones that may be created (see `resolver`)
//! 3. write phase: plain fields and relations, planned against the
//!    pre-write state and then applied per row (see `writer`)
//! 4. deleter feeding, and deleters flagged to run on persist
//!
//! Ambiguous matches abort the call with an error; rows written by earlier
//! rounds stay written.

mod policy;
mod resolver;
mod writer;

pub use policy::{EndState, edge_allowed, field_writable, side_allows};

use crate::adapter::{Adapter, Row};
use crate::deleter::{DeleterRegistry, Selector};
use crate::item::class::ItemClass;
use crate::item::graph::{ItemGraph, ItemId, Related, Root};
use crate::scope::ClassRegistry;
use crate::{Error, Result};
use std::collections::HashMap;
use std::sync::Arc;

/// Per-persister overrides
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PersistSettings {
    /// Lookup chunk size for classes without their own; falls back to the
    /// adapter default
    pub batch_size: Option<usize>,
    /// Run `ItemGraph::process` on the root first
    pub process: bool,
}

impl Default for PersistSettings {
    fn default() -> Self {
        Self {
            batch_size: None,
            process: true,
        }
    }
}

/// Counters of one persist call
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PersistStats {
    /// Items reachable from the root
    pub items: usize,
    pub rounds: usize,
    /// Rounds that had to break a getter/creator cycle
    pub forced_rounds: usize,
    /// Adapter `get` calls
    pub lookups: usize,
    pub matched: usize,
    pub created: usize,
    /// Items that neither matched nor could be created
    pub skipped: usize,
    /// Rows touched by the write phase
    pub updated: usize,
    pub deleted: usize,
}

impl std::fmt::Display for PersistStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "Persist Statistics:")?;
        writeln!(f, "  Items: {}", self.items)?;
        writeln!(f, "  Rounds: {} ({} forced)", self.rounds, self.forced_rounds)?;
        writeln!(f, "  Lookups: {}", self.lookups)?;
        writeln!(f, "  Matched: {}", self.matched)?;
        writeln!(f, "  Created: {}", self.created)?;
        writeln!(f, "  Skipped: {}", self.skipped)?;
        writeln!(f, "  Updated rows: {}", self.updated)?;
        write!(f, "  Deleted rows: {}", self.deleted)
    }
}

/// Outcome of a persist call
#[derive(Debug, Clone)]
pub struct Persisted<I> {
    /// Resolved root items in root order, with their rows
    entries: Vec<(ItemId, Vec<Row<I>>)>,
    /// Root items that neither matched nor were created
    skipped: Vec<ItemId>,
    stats: PersistStats,
}

impl<I> Persisted<I> {
    pub fn iter(&self) -> impl Iterator<Item = (ItemId, &[Row<I>])> {
        self.entries.iter().map(|(item, rows)| (*item, rows.as_slice()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Rows of a root item; pass the handle through `ItemGraph::resolve`
    /// if the item may have been merged
    pub fn rows_for(&self, item: ItemId) -> Option<&[Row<I>]> {
        self.entries
            .iter()
            .find(|(id, _)| *id == item)
            .map(|(_, rows)| rows.as_slice())
    }

    pub fn skipped(&self) -> &[ItemId] {
        &self.skipped
    }

    pub fn stats(&self) -> &PersistStats {
        &self.stats
    }

    /// Resolved items and, index for index, their row lists
    pub fn into_parts(self) -> (Vec<ItemId>, Vec<Vec<Row<I>>>) {
        self.entries.into_iter().unzip()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum NodeState {
    Pending,
    Resolved,
    Unresolved,
}

/// An item taking part in a persist call
#[derive(Debug, Clone)]
pub(crate) struct Node<I> {
    pub(crate) item: ItemId,
    pub(crate) class: ItemClass,
    pub(crate) state: NodeState,
    pub(crate) rows: Vec<Row<I>>,
    /// Rows were created by this call
    pub(crate) created: bool,
}

/// Items on the other end of a relation slot
pub(crate) fn related_items(graph: &ItemGraph, related: Related) -> Result<Vec<ItemId>> {
    match related {
        Related::One(item) => Ok(vec![graph.resolve(item)?]),
        Related::Many(bulk) => graph.bulk_items(bulk),
    }
}

/// To-many relation members as stored before the write phase
#[derive(Debug)]
pub(crate) struct Snapshot<I> {
    members: HashMap<(String, I, String), Vec<I>>,
}

impl<I: Clone + Eq + std::hash::Hash> Snapshot<I> {
    fn new() -> Self {
        Self {
            members: HashMap::new(),
        }
    }

    pub(crate) fn members<A>(&mut self, adapter: &mut A, model: &str, id: &I, field: &str) -> Result<&[I]>
    where
        A: Adapter<Id = I>,
    {
        let key = (model.to_string(), id.clone(), field.to_string());
        if !self.members.contains_key(&key) {
            let members = adapter.get_related_x_to_many(model, id, field)?;
            self.members.insert(key.clone(), members);
        }
        Ok(self.members.get(&key).map(Vec::as_slice).unwrap_or(&[]))
    }
}

/// State of one persist call
pub(crate) struct Run<I> {
    pub(crate) nodes: Vec<Node<I>>,
    index: HashMap<ItemId, usize>,
    /// Node each stored row was claimed by
    pub(crate) claims: HashMap<(String, I), usize>,
    pub(crate) snapshot: Snapshot<I>,
    pub(crate) stats: PersistStats,
}

impl<I: Clone + Eq + std::hash::Hash> Run<I> {
    fn new(graph: &ItemGraph, root: Root) -> Result<Self> {
        let (items, _) = graph.reachable(root)?;
        let mut nodes = Vec::with_capacity(items.len());
        let mut index = HashMap::with_capacity(items.len());
        for item in items {
            index.insert(item, nodes.len());
            nodes.push(Node {
                item,
                class: graph.class_of(item)?,
                state: NodeState::Pending,
                rows: Vec::new(),
                created: false,
            });
        }
        let stats = PersistStats {
            items: nodes.len(),
            ..PersistStats::default()
        };
        Ok(Self {
            nodes,
            index,
            claims: HashMap::new(),
            snapshot: Snapshot::new(),
            stats,
        })
    }

    pub(crate) fn node_index(&self, graph: &ItemGraph, item: ItemId) -> Result<usize> {
        let item = graph.resolve(item)?;
        self.index
            .get(&item)
            .copied()
            .ok_or_else(|| Error::StaleHandle(format!("item {:?} not reachable from the persisted root", item)))
    }

    fn finish(self, graph: &ItemGraph, root: Root) -> Result<Persisted<I>> {
        let mut entries = Vec::new();
        let mut skipped = Vec::new();
        for item in graph.root_items(root)? {
            let node = &self.nodes[self.node_index(graph, item)?];
            if node.state == NodeState::Resolved {
                entries.push((node.item, node.rows.clone()));
            } else {
                skipped.push(node.item);
            }
        }
        Ok(Persisted {
            entries,
            skipped,
            stats: self.stats,
        })
    }
}

/// Reconciles item graphs with the storage behind an adapter
pub struct Persister<A: Adapter> {
    adapter: A,
    registry: Arc<ClassRegistry>,
    settings: PersistSettings,
    deleters: DeleterRegistry<A::Id>,
}

impl<A: Adapter> Persister<A> {
    /// Create a persister; the adapter's relations must match the schema
    /// the classes were built against
    pub fn new(adapter: A, registry: Arc<ClassRegistry>) -> Result<Self> {
        for model in registry.schema().models() {
            let relations = adapter.iter_relations(&model.name)?;
            if relations != model.relations {
                return Err(Error::InvalidSchema(format!(
                    "adapter relations of {} differ from the class registry schema",
                    model.name
                )));
            }
        }
        Ok(Self {
            adapter,
            registry,
            settings: PersistSettings::default(),
            deleters: DeleterRegistry::new(),
        })
    }

    pub fn with_settings(mut self, settings: PersistSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn registry(&self) -> &Arc<ClassRegistry> {
        &self.registry
    }

    pub fn settings(&self) -> &PersistSettings {
        &self.settings
    }

    pub fn adapter(&self) -> &A {
        &self.adapter
    }

    pub fn adapter_mut(&mut self) -> &mut A {
        &mut self.adapter
    }

    pub fn into_adapter(self) -> A {
        self.adapter
    }

    pub fn deleters(&self) -> &DeleterRegistry<A::Id> {
        &self.deleters
    }

    /// New empty item graph over this persister's classes
    pub fn graph(&self) -> ItemGraph {
        ItemGraph::new(self.registry.clone())
    }

    /// Chunk size for lookups and deletes of `class`
    pub(crate) fn batch_size_for(&self, class: &ItemClass) -> usize {
        class
            .batch_size()
            .or(self.settings.batch_size)
            .unwrap_or_else(|| self.adapter.batch_size())
            .max(1)
    }

    fn fallback_batch_size(&self) -> usize {
        self.settings
            .batch_size
            .unwrap_or_else(|| self.adapter.batch_size())
            .max(1)
    }

    /// Persist an item or a bulk and everything reachable from it
    pub fn persist(&mut self, graph: &mut ItemGraph, root: impl Into<Root>) -> Result<Persisted<A::Id>> {
        let root = root.into();
        if !Arc::ptr_eq(graph.registry(), &self.registry) {
            return Err(Error::InvalidSchema(
                "item graph was built from another class registry".to_string(),
            ));
        }
        if self.settings.process {
            graph.process(root)?;
        }
        let graph: &ItemGraph = graph;

        let mut run = Run::new(graph, root)?;
        self.resolve(graph, &mut run)?;
        self.write(graph, &mut run)?;
        self.feed_deleters(graph, &run)?;
        let fallback = self.fallback_batch_size();
        run.stats.deleted = self.deleters.execute_on_persist(&mut self.adapter, fallback)?;

        let persisted = run.finish(graph, root)?;
        let stats = persisted.stats();
        tracing::info!(
            "Persisted {} items: {} matched, {} created, {} skipped, {} rows updated, {} deleted",
            stats.items,
            stats.matched,
            stats.created,
            stats.skipped,
            stats.updated,
            stats.deleted
        );
        Ok(persisted)
    }

    /// Record selector values and kept rows of every resolved item whose
    /// class has deleter selectors
    fn feed_deleters(&mut self, graph: &ItemGraph, run: &Run<A::Id>) -> Result<()> {
        for node in &run.nodes {
            if node.state != NodeState::Resolved || node.class.deleter_selectors().is_empty() {
                continue;
            }
            let data = graph.item(node.item)?;
            let mut selector = Selector::new();
            for field in node.class.deleter_selectors() {
                match data.field(*field) {
                    Some(value) => {
                        selector.insert(node.class.field_info(*field).name.clone(), value.clone());
                    }
                    None => break,
                }
            }
            if selector.len() != node.class.deleter_selectors().len() {
                continue;
            }
            self.deleters
                .deleter_for(&node.class)
                .feed(selector, node.rows.iter().map(|row| row.id.clone()));
        }
        Ok(())
    }

    /// Run the deleter of the class with type tag `class_tag`
    pub fn execute_deleter(&mut self, class_tag: &str) -> Result<usize> {
        self.registry.class(class_tag)?;
        let fallback = self.fallback_batch_size();
        let deleted = self.deleters.execute(class_tag, &mut self.adapter, fallback)?;
        tracing::info!("Deleter {} removed {} rows", class_tag, deleted);
        Ok(deleted)
    }

    /// Run every deleter of a scope
    pub fn execute_scope_deleter(&mut self, scope_id: &str) -> Result<usize> {
        if self.registry.scope(scope_id).is_none() {
            return Err(Error::UnknownClass(format!("unknown scope {}", scope_id)));
        }
        let fallback = self.fallback_batch_size();
        let deleted = self.deleters.execute_scope(Some(scope_id), &mut self.adapter, fallback)?;
        tracing::info!("Deleters of scope {} removed {} rows", scope_id, deleted);
        Ok(deleted)
    }

    pub fn execute_all_deleters(&mut self) -> Result<usize> {
        let fallback = self.fallback_batch_size();
        let deleted = self.deleters.execute_all(&mut self.adapter, fallback)?;
        tracing::info!("Deleters removed {} rows", deleted);
        Ok(deleted)
    }
}

#[cfg(test)]
mod tests;
