//! Differential deleter - Prune rows a sync run no longer produced
//!
//! During a persist, every resolved item of a class with deleter selectors
//! feeds its selector values (e.g. one per "source" tag) and the ids of its
//! rows. `execute` then deletes, per recorded selector, every stored row
//! matching the selector whose id was not kept. Selectors that were never
//! fed are left alone.
//!
//! Deleters are keyed by class type tag, so a scoped class variant has its
//! own state and never prunes rows kept by another scope.

use crate::adapter::{Adapter, Condition};
use crate::item::class::ItemClass;
use crate::value::Value;
use crate::Result;
use std::collections::{BTreeMap, BTreeSet};

/// Field values identifying one partition of a model
pub type Selector = BTreeMap<String, Value>;

/// Selector/keeper state of one item class
#[derive(Debug, Clone)]
pub struct ModelDeleter<I> {
    class_tag: String,
    scope: Option<String>,
    model: String,
    batch_size: Option<usize>,
    execute_on_persist: bool,
    /// Selectors in first-seen order with their keepers
    entries: Vec<(Selector, BTreeSet<I>)>,
}

impl<I: Clone + Ord> ModelDeleter<I> {
    pub fn new(class: &ItemClass) -> Self {
        Self {
            class_tag: class.tag(),
            scope: class.scope().map(str::to_string),
            model: class.model().to_string(),
            batch_size: class.batch_size(),
            execute_on_persist: class.deleter_execute_on_persist(),
            entries: Vec::new(),
        }
    }

    pub fn class_tag(&self) -> &str {
        &self.class_tag
    }

    pub fn scope(&self) -> Option<&str> {
        self.scope.as_deref()
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn execute_on_persist(&self) -> bool {
        self.execute_on_persist
    }

    /// Record `ids` as kept under `selector`
    pub fn feed(&mut self, selector: Selector, ids: impl IntoIterator<Item = I>) {
        match self.entries.iter_mut().find(|(s, _)| *s == selector) {
            Some((_, keepers)) => keepers.extend(ids),
            None => self.entries.push((selector, ids.into_iter().collect())),
        }
    }

    pub fn selectors(&self) -> impl Iterator<Item = &Selector> {
        self.entries.iter().map(|(s, _)| s)
    }

    pub fn keepers(&self, selector: &Selector) -> Option<&BTreeSet<I>> {
        self.entries.iter().find(|(s, _)| s == selector).map(|(_, k)| k)
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn reset(&mut self) {
        self.entries.clear();
    }

    /// Delete unkept rows of every recorded selector and reset.
    ///
    /// `fallback_batch_size` applies when the class has no override.
    pub fn execute<A>(&mut self, adapter: &mut A, fallback_batch_size: usize) -> Result<usize>
    where
        A: Adapter<Id = I>,
    {
        let batch_size = self.batch_size.unwrap_or(fallback_batch_size).max(1);
        let mut deleted = 0;
        // An entry is dropped only once its rows are gone, so a failing
        // adapter call leaves the rest for a retry.
        while let Some((selector, keepers)) = self.entries.first() {
            let conditions: Vec<Condition<I>> = selector
                .iter()
                .map(|(field, value)| Condition::Eq {
                    field: field.clone(),
                    value: value.clone(),
                })
                .collect();
            let doomed: Vec<I> = adapter
                .select(&self.model, &conditions)?
                .into_iter()
                .filter(|id| !keepers.contains(id))
                .collect();
            for chunk in doomed.chunks(batch_size) {
                deleted += adapter.delete(&self.model, chunk)?;
            }
            tracing::debug!(
                "Deleter {}: {} kept, {} deleted for {:?}",
                self.class_tag,
                keepers.len(),
                doomed.len(),
                selector
            );
            self.entries.remove(0);
        }
        Ok(deleted)
    }
}

/// Deleters of one persister, keyed by class type tag
#[derive(Debug, Clone)]
pub struct DeleterRegistry<I> {
    deleters: BTreeMap<String, ModelDeleter<I>>,
}

impl<I> Default for DeleterRegistry<I> {
    fn default() -> Self {
        Self {
            deleters: BTreeMap::new(),
        }
    }
}

impl<I: Clone + Ord> DeleterRegistry<I> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Deleter of `class`, created on first use
    pub fn deleter_for(&mut self, class: &ItemClass) -> &mut ModelDeleter<I> {
        self.deleters
            .entry(class.tag())
            .or_insert_with(|| ModelDeleter::new(class))
    }

    pub fn get(&self, class_tag: &str) -> Option<&ModelDeleter<I>> {
        self.deleters.get(class_tag)
    }

    pub fn iter(&self) -> impl Iterator<Item = &ModelDeleter<I>> {
        self.deleters.values()
    }

    /// Tags of deleters holding state
    pub fn pending(&self) -> Vec<String> {
        self.deleters
            .values()
            .filter(|d| !d.is_empty())
            .map(|d| d.class_tag.clone())
            .collect()
    }

    /// Run the deleter of `class_tag`; a class never fed deletes nothing
    pub fn execute<A>(&mut self, class_tag: &str, adapter: &mut A, fallback_batch_size: usize) -> Result<usize>
    where
        A: Adapter<Id = I>,
    {
        match self.deleters.get_mut(class_tag) {
            Some(deleter) => deleter.execute(adapter, fallback_batch_size),
            None => Ok(0),
        }
    }

    /// Run every deleter of the scope; `None` runs the unscoped ones
    pub fn execute_scope<A>(&mut self, scope: Option<&str>, adapter: &mut A, fallback_batch_size: usize) -> Result<usize>
    where
        A: Adapter<Id = I>,
    {
        let mut deleted = 0;
        for deleter in self.deleters.values_mut().filter(|d| d.scope() == scope) {
            deleted += deleter.execute(adapter, fallback_batch_size)?;
        }
        Ok(deleted)
    }

    pub fn execute_all<A>(&mut self, adapter: &mut A, fallback_batch_size: usize) -> Result<usize>
    where
        A: Adapter<Id = I>,
    {
        let mut deleted = 0;
        for deleter in self.deleters.values_mut() {
            deleted += deleter.execute(adapter, fallback_batch_size)?;
        }
        Ok(deleted)
    }

    /// Run the deleters flagged `execute_on_persist` that hold state
    pub fn execute_on_persist<A>(&mut self, adapter: &mut A, fallback_batch_size: usize) -> Result<usize>
    where
        A: Adapter<Id = I>,
    {
        let mut deleted = 0;
        for deleter in self.deleters.values_mut() {
            if deleter.execute_on_persist && !deleter.is_empty() {
                deleted += deleter.execute(adapter, fallback_batch_size)?;
            }
        }
        Ok(deleted)
    }
}
