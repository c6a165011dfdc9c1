//! Item graph - Arena-backed storage for items and bulks
//!
//! Items reference related items and bulks through handles:
//! - x-to-one relations hold one `ItemId`
//! - x-to-many relations hold a `BulkId` owned by the item
//! - setting a relation maintains its reverse on the related item
//!
//! Merging items (see `merge`) frees the merged-away slot and records an
//! alias, so every handle a caller holds keeps resolving.

use super::arena::{Arena, Handle};
use super::class::{FieldId, FieldRef, ItemClass, RelationId};
use crate::scope::ClassRegistry;
use crate::value::Value;
use crate::{Error, Result};
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::ops::RangeBounds;
use std::sync::Arc;

pub type ItemId = Handle<ItemData>;
pub type BulkId = Handle<BulkData>;

/// Value of a relation slot on an item
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Related {
    One(ItemId),
    Many(BulkId),
}

/// What gets processed, persisted or dumped
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Root {
    Item(ItemId),
    Bulk(BulkId),
}

impl From<ItemId> for Root {
    fn from(item: ItemId) -> Self {
        Root::Item(item)
    }
}

impl From<BulkId> for Root {
    fn from(bulk: BulkId) -> Self {
        Root::Bulk(bulk)
    }
}

/// One logical record
#[derive(Debug, Clone)]
pub struct ItemData {
    pub(crate) class: ItemClass,
    pub(crate) fields: BTreeMap<FieldId, Value>,
    pub(crate) relations: BTreeMap<RelationId, Related>,
    pub(crate) update_only: Option<bool>,
    pub(crate) get_only: Option<bool>,
}

impl ItemData {
    fn new(class: ItemClass) -> Self {
        Self {
            class,
            fields: BTreeMap::new(),
            relations: BTreeMap::new(),
            update_only: None,
            get_only: None,
        }
    }

    pub fn class(&self) -> &ItemClass {
        &self.class
    }

    pub fn field(&self, field: FieldId) -> Option<&Value> {
        self.fields.get(&field)
    }

    pub fn fields(&self) -> impl Iterator<Item = (FieldId, &Value)> {
        self.fields.iter().map(|(id, v)| (*id, v))
    }

    pub fn relation(&self, relation: RelationId) -> Option<Related> {
        self.relations.get(&relation).copied()
    }

    pub fn relations(&self) -> impl Iterator<Item = (RelationId, Related)> + '_ {
        self.relations.iter().map(|(id, r)| (*id, *r))
    }

    /// A field or relation has a value (null counts as a value)
    pub fn has(&self, field: FieldRef) -> bool {
        match field {
            FieldRef::Field(id) => self.fields.contains_key(&id),
            FieldRef::Relation(id) => self.relations.contains_key(&id),
        }
    }

    /// Update-only mode, item override first
    pub fn is_update_only(&self) -> bool {
        self.update_only.unwrap_or(self.class.modes().update_only_mode)
    }

    /// Get-only mode, item override first
    pub fn is_get_only(&self) -> bool {
        self.get_only.unwrap_or(self.class.modes().get_only_mode)
    }
}

/// Ordered collection of items of one class
#[derive(Debug, Clone)]
pub struct BulkData {
    pub(crate) class: ItemClass,
    pub(crate) items: Vec<ItemId>,
    pub(crate) defaults: BTreeMap<FieldId, Value>,
    /// Item and relation this bulk is the value of
    pub(crate) owner: Option<(ItemId, RelationId)>,
}

impl BulkData {
    pub fn class(&self) -> &ItemClass {
        &self.class
    }

    pub fn defaults(&self) -> impl Iterator<Item = (FieldId, &Value)> {
        self.defaults.iter().map(|(id, v)| (*id, v))
    }

    pub fn owner(&self) -> Option<(ItemId, RelationId)> {
        self.owner
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

/// All items and bulks of one sync run
pub struct ItemGraph {
    registry: Arc<ClassRegistry>,
    pub(crate) items: Arena<ItemData>,
    pub(crate) bulks: Arena<BulkData>,
    pub(crate) aliases: HashMap<ItemId, ItemId>,
}

impl ItemGraph {
    pub fn new(registry: Arc<ClassRegistry>) -> Self {
        Self {
            registry,
            items: Arena::new(),
            bulks: Arena::new(),
            aliases: HashMap::new(),
        }
    }

    pub fn registry(&self) -> &Arc<ClassRegistry> {
        &self.registry
    }

    /// Number of live items
    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn new_item(&mut self, class: &ItemClass) -> ItemId {
        self.items.insert(ItemData::new(class.clone()))
    }

    /// Create an item of the class with type tag `tag`
    pub fn new_item_of(&mut self, tag: &str) -> Result<ItemId> {
        let class = self.registry.class(tag)?;
        Ok(self.new_item(&class))
    }

    pub fn new_bulk(&mut self, class: &ItemClass) -> BulkId {
        self.bulks.insert(BulkData {
            class: class.clone(),
            items: Vec::new(),
            defaults: BTreeMap::new(),
            owner: None,
        })
    }

    /// Follow merge aliases to the live item
    pub fn resolve(&self, item: ItemId) -> Result<ItemId> {
        let mut current = item;
        let mut hops = 0;
        while let Some(next) = self.aliases.get(&current) {
            current = *next;
            hops += 1;
            if hops > self.aliases.len() {
                return Err(Error::StaleHandle(format!("alias cycle at item {:?}", item)));
            }
        }
        if self.items.contains(current) {
            Ok(current)
        } else {
            Err(Error::StaleHandle(format!("item {:?}", item)))
        }
    }

    pub fn item(&self, item: ItemId) -> Result<&ItemData> {
        let id = self.resolve(item)?;
        self.items
            .get(id)
            .ok_or_else(|| Error::StaleHandle(format!("item {:?}", item)))
    }

    pub(crate) fn item_mut(&mut self, item: ItemId) -> Result<&mut ItemData> {
        let id = self.resolve(item)?;
        self.items
            .get_mut(id)
            .ok_or_else(|| Error::StaleHandle(format!("item {:?}", item)))
    }

    pub fn bulk(&self, bulk: BulkId) -> Result<&BulkData> {
        self.bulks
            .get(bulk)
            .ok_or_else(|| Error::StaleHandle(format!("bulk {:?}", bulk)))
    }

    pub(crate) fn bulk_mut(&mut self, bulk: BulkId) -> Result<&mut BulkData> {
        self.bulks
            .get_mut(bulk)
            .ok_or_else(|| Error::StaleHandle(format!("bulk {:?}", bulk)))
    }

    pub fn class_of(&self, item: ItemId) -> Result<ItemClass> {
        Ok(self.item(item)?.class.clone())
    }

    /// Assign a plain field, coercing the value to the field's kind
    pub fn set_field(&mut self, item: ItemId, field: FieldId, value: impl Into<Value>) -> Result<()> {
        let data = self.item_mut(item)?;
        let info = data.class.checked_field(field)?;
        let value = value.into().coerce(info.kind, &info.name)?;
        data.fields.insert(field, value);
        Ok(())
    }

    /// Assign a plain field by name
    pub fn set(&mut self, item: ItemId, name: &str, value: impl Into<Value>) -> Result<()> {
        match self.class_of(item)?.field_ref(name)? {
            FieldRef::Field(id) => self.set_field(item, id, value),
            FieldRef::Relation(_) => Err(Error::InvalidValue {
                field: name.to_string(),
                reason: "is a relation, use link or bulk_of".to_string(),
            }),
        }
    }

    pub fn field(&self, item: ItemId, field: FieldId) -> Result<Option<&Value>> {
        Ok(self.item(item)?.fields.get(&field))
    }

    /// Read a plain field by name
    pub fn get(&self, item: ItemId, name: &str) -> Result<Option<&Value>> {
        let data = self.item(item)?;
        let id = data.class.field_id(name)?;
        Ok(data.fields.get(&id))
    }

    /// Remove a field or relation from the item; relations are unlinked on
    /// both ends
    pub fn unset(&mut self, item: ItemId, name: &str) -> Result<()> {
        let item = self.resolve(item)?;
        match self.class_of(item)?.field_ref(name)? {
            FieldRef::Field(id) => {
                self.item_mut(item)?.fields.remove(&id);
            }
            FieldRef::Relation(id) => self.detach(item, id)?,
        }
        Ok(())
    }

    pub fn set_update_only(&mut self, item: ItemId, mode: Option<bool>) -> Result<()> {
        self.item_mut(item)?.update_only = mode;
        Ok(())
    }

    pub fn set_get_only(&mut self, item: ItemId, mode: Option<bool>) -> Result<()> {
        self.item_mut(item)?.get_only = mode;
        Ok(())
    }

    pub fn related(&self, item: ItemId, relation: RelationId) -> Result<Option<Related>> {
        Ok(self.item(item)?.relations.get(&relation).copied())
    }

    /// Related item of an x-to-one relation, by name
    pub fn related_item(&self, item: ItemId, name: &str) -> Result<Option<ItemId>> {
        let data = self.item(item)?;
        let id = data.class.relation_id(name)?;
        match data.relations.get(&id) {
            Some(Related::One(target)) => Ok(Some(self.resolve(*target)?)),
            _ => Ok(None),
        }
    }

    /// Set an x-to-one relation, maintaining the reverse side
    pub fn link_one(&mut self, item: ItemId, relation: RelationId, target: ItemId) -> Result<()> {
        let item = self.resolve(item)?;
        let target = self.resolve(target)?;
        let class = self.class_of(item)?;
        let info = class.checked_relation(relation)?;
        if info.multiplicity.is_x_to_many() {
            return Err(Error::InvalidValue {
                field: info.name.clone(),
                reason: format!("{} relation takes a bulk", info.multiplicity),
            });
        }
        let target_class = self.class_of(target)?;
        if target_class.model() != info.related_model {
            return Err(Error::InvalidValue {
                field: info.name.clone(),
                reason: format!("expects {} item, got {}", info.related_model, target_class.model()),
            });
        }

        if let Some(Related::One(previous)) = self.item(item)?.relations.get(&relation).copied() {
            if previous == target {
                return Ok(());
            }
            self.detach(item, relation)?;
        }
        self.item_mut(item)?.relations.insert(relation, Related::One(target));
        self.attach_reverse(item, relation, target)
    }

    /// Set an x-to-one relation by name
    pub fn link(&mut self, item: ItemId, name: &str, target: ItemId) -> Result<()> {
        let relation = self.class_of(item)?.relation_id(name)?;
        self.link_one(item, relation, target)
    }

    /// Bulk behind an x-to-many relation, created on first access
    pub fn relation_bulk(&mut self, item: ItemId, relation: RelationId) -> Result<BulkId> {
        let item = self.resolve(item)?;
        let class = self.class_of(item)?;
        let info = class.checked_relation(relation)?;
        if info.multiplicity.is_x_to_one() {
            return Err(Error::InvalidValue {
                field: info.name.clone(),
                reason: format!("{} relation takes a single item", info.multiplicity),
            });
        }
        self.ensure_bulk(item, relation)
    }

    /// Bulk behind an x-to-many relation, by name
    pub fn bulk_of(&mut self, item: ItemId, name: &str) -> Result<BulkId> {
        let relation = self.class_of(item)?.relation_id(name)?;
        self.relation_bulk(item, relation)
    }

    /// Append an existing item to a bulk
    pub fn add(&mut self, bulk: BulkId, item: ItemId) -> Result<()> {
        let item = self.resolve(item)?;
        let item_model = self.class_of(item)?.model().to_string();
        let data = self.bulk_mut(bulk)?;
        if data.class.model() != item_model {
            return Err(Error::InvalidValue {
                field: data.class.name().to_string(),
                reason: format!("bulk of {} cannot hold {} item", data.class.model(), item_model),
            });
        }
        if !data.items.contains(&item) {
            data.items.push(item);
        }
        if let Some((owner, relation)) = data.owner {
            self.attach_reverse(owner, relation, item)?;
        }
        Ok(())
    }

    /// Append several existing items to a bulk
    pub fn add_all(&mut self, bulk: BulkId, items: impl IntoIterator<Item = ItemId>) -> Result<()> {
        for item in items {
            self.add(bulk, item)?;
        }
        Ok(())
    }

    /// Create an item of the bulk's class with the given fields and append it
    pub fn gen_item<K, V>(&mut self, bulk: BulkId, fields: impl IntoIterator<Item = (K, V)>) -> Result<ItemId>
    where
        K: AsRef<str>,
        V: Into<Value>,
    {
        let class = self.bulk(bulk)?.class.clone();
        let item = self.new_item(&class);
        for (name, value) in fields {
            self.set(item, name.as_ref(), value)?;
        }
        self.add(bulk, item)?;
        Ok(item)
    }

    /// Live members of a bulk, aliases resolved
    pub fn bulk_items(&self, bulk: BulkId) -> Result<Vec<ItemId>> {
        let mut seen = HashSet::new();
        let mut items = Vec::new();
        for item in &self.bulk(bulk)?.items {
            let id = self.resolve(*item)?;
            if seen.insert(id) {
                items.push(id);
            }
        }
        Ok(items)
    }

    /// Default applied to members that lack the field
    pub fn set_default(&mut self, bulk: BulkId, name: &str, value: impl Into<Value>) -> Result<()> {
        let data = self.bulk_mut(bulk)?;
        let field = data.class.field_id(name)?;
        let info = data.class.field_info(field);
        let value = value.into().coerce(info.kind, &info.name)?;
        data.defaults.insert(field, value);
        Ok(())
    }

    /// New unowned bulk with a sub-range of the members and the same defaults
    pub fn slice(&mut self, bulk: BulkId, range: impl RangeBounds<usize>) -> Result<BulkId> {
        let items = self.bulk_items(bulk)?;
        let data = self.bulk(bulk)?;
        let start = match range.start_bound() {
            std::ops::Bound::Included(s) => *s,
            std::ops::Bound::Excluded(s) => s + 1,
            std::ops::Bound::Unbounded => 0,
        };
        let end = match range.end_bound() {
            std::ops::Bound::Included(e) => e + 1,
            std::ops::Bound::Excluded(e) => *e,
            std::ops::Bound::Unbounded => items.len(),
        };
        let end = end.min(items.len());
        let members = items[start.min(end)..end].to_vec();
        let slice = BulkData {
            class: data.class.clone(),
            items: members,
            defaults: data.defaults.clone(),
            owner: None,
        };
        Ok(self.bulks.insert(slice))
    }

    /// Root items: the item itself, or the members of the bulk
    pub fn root_items(&self, root: Root) -> Result<Vec<ItemId>> {
        match root {
            Root::Item(item) => Ok(vec![self.resolve(item)?]),
            Root::Bulk(bulk) => self.bulk_items(bulk),
        }
    }

    /// Every item and bulk reachable from `root` through relations,
    /// breadth-first
    pub fn reachable(&self, root: Root) -> Result<(Vec<ItemId>, Vec<BulkId>)> {
        let mut items = Vec::new();
        let mut bulks = Vec::new();
        let mut seen_items = HashSet::new();
        let mut seen_bulks = HashSet::new();
        let mut queue = VecDeque::new();

        if let Root::Bulk(bulk) = root {
            seen_bulks.insert(bulk);
            bulks.push(bulk);
        }
        for item in self.root_items(root)? {
            if seen_items.insert(item) {
                queue.push_back(item);
            }
        }

        while let Some(item) = queue.pop_front() {
            items.push(item);
            for related in self.item(item)?.relations.values() {
                let members = match *related {
                    Related::One(target) => vec![self.resolve(target)?],
                    Related::Many(bulk) => {
                        if seen_bulks.insert(bulk) {
                            bulks.push(bulk);
                        }
                        self.bulk_items(bulk)?
                    }
                };
                for member in members {
                    if seen_items.insert(member) {
                        queue.push_back(member);
                    }
                }
            }
        }
        Ok((items, bulks))
    }

    fn ensure_bulk(&mut self, item: ItemId, relation: RelationId) -> Result<BulkId> {
        if let Some(Related::Many(bulk)) = self.item(item)?.relations.get(&relation) {
            return Ok(*bulk);
        }
        let class = self.class_of(item)?;
        let related_class = self.registry.related_class(&class, relation)?;
        let bulk = self.bulks.insert(BulkData {
            class: related_class,
            items: Vec::new(),
            defaults: BTreeMap::new(),
            owner: Some((item, relation)),
        });
        self.item_mut(item)?.relations.insert(relation, Related::Many(bulk));
        Ok(bulk)
    }

    /// Reverse field of `relation` on the related item's class
    fn reverse_of(&self, item: ItemId, relation: RelationId, target: ItemId) -> Result<Option<RelationId>> {
        let class = self.class_of(item)?;
        let Some(reverse) = class.checked_relation(relation)?.reverse.clone() else {
            return Ok(None);
        };
        Ok(Some(self.class_of(target)?.relation_id(&reverse)?))
    }

    /// Point `target`'s reverse relation at `item`
    fn attach_reverse(&mut self, item: ItemId, relation: RelationId, target: ItemId) -> Result<()> {
        let Some(reverse) = self.reverse_of(item, relation, target)? else {
            return Ok(());
        };
        let target_class = self.class_of(target)?;
        if target_class.relation_info(reverse).multiplicity.is_x_to_one() {
            self.item_mut(target)?.relations.insert(reverse, Related::One(item));
        } else {
            let bulk = self.ensure_bulk(target, reverse)?;
            let data = self.bulk_mut(bulk)?;
            if !data.items.contains(&item) {
                data.items.push(item);
            }
        }
        Ok(())
    }

    /// Remove `item` from `target`'s reverse relation
    fn detach_reverse(&mut self, item: ItemId, relation: RelationId, target: ItemId) -> Result<()> {
        let Some(reverse) = self.reverse_of(item, relation, target)? else {
            return Ok(());
        };
        match self.item(target)?.relations.get(&reverse).copied() {
            Some(Related::One(current)) if current == item => {
                self.item_mut(target)?.relations.remove(&reverse);
            }
            Some(Related::Many(bulk)) => {
                self.bulk_mut(bulk)?.items.retain(|m| *m != item);
            }
            _ => {}
        }
        Ok(())
    }

    fn detach(&mut self, item: ItemId, relation: RelationId) -> Result<()> {
        match self.item_mut(item)?.relations.remove(&relation) {
            Some(Related::One(target)) => {
                let target = self.resolve(target)?;
                self.detach_reverse(item, relation, target)?;
            }
            Some(Related::Many(bulk)) => {
                for member in self.bulk_items(bulk)? {
                    self.detach_reverse(item, relation, member)?;
                }
                self.bulks.remove(bulk);
            }
            None => {}
        }
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::item::class::tests::sample_schema;

    /// Registry with `One` (getters/creators on f_integer) and `Two`
    pub(crate) fn sample_registry() -> Arc<ClassRegistry> {
        let mut registry = ClassRegistry::new(sample_schema());
        registry
            .register(
                ItemClass::builder("One", "one")
                    .creators([["f_integer"]])
                    .getters([["f_integer"]])
                    .allow_merge_items(true),
            )
            .unwrap();
        registry
            .register(
                ItemClass::builder("Two", "two")
                    .creators([["f_integer"]])
                    .getters([["f_integer"]]),
            )
            .unwrap();
        Arc::new(registry)
    }

    #[test]
    fn test_set_and_get_fields() {
        let mut graph = ItemGraph::new(sample_registry());
        let one = graph.new_item_of("One").unwrap();
        graph.set(one, "f_integer", "10").unwrap();
        graph.set(one, "f_date", "2010-10-10").unwrap();

        assert_eq!(graph.get(one, "f_integer").unwrap(), Some(&Value::Int(10)));
        assert!(matches!(graph.get(one, "f_date").unwrap(), Some(Value::Date(_))));
        assert!(graph.set(one, "f_integre", 1).is_err());
        assert!(graph.set(one, "two_1_1", 1).is_err());

        graph.unset(one, "f_integer").unwrap();
        assert_eq!(graph.get(one, "f_integer").unwrap(), None);
    }

    #[test]
    fn test_link_sets_reverse() {
        let mut graph = ItemGraph::new(sample_registry());
        let one = graph.new_item_of("One").unwrap();
        let two = graph.new_item_of("Two").unwrap();

        graph.link(one, "two_1_1", two).unwrap();
        assert_eq!(graph.related_item(two, "one_1_1").unwrap(), Some(one));

        graph.link(one, "two_x_1", two).unwrap();
        let reverse = graph.bulk_of(two, "one_1_x").unwrap();
        assert_eq!(graph.bulk_items(reverse).unwrap(), vec![one]);

        graph.unset(one, "two_1_1").unwrap();
        assert_eq!(graph.related_item(two, "one_1_1").unwrap(), None);
    }

    #[test]
    fn test_link_rejects_wrong_model() {
        let mut graph = ItemGraph::new(sample_registry());
        let one = graph.new_item_of("One").unwrap();
        let other = graph.new_item_of("One").unwrap();
        assert!(graph.link(one, "two_1_1", other).is_err());
        assert!(graph.link(one, "parent_x_1", other).is_ok());
        assert!(graph.link(one, "two_x_x", other).is_err());
    }

    #[test]
    fn test_gen_links_reverse_relation() {
        let mut graph = ItemGraph::new(sample_registry());
        let one = graph.new_item_of("One").unwrap();
        let bulk = graph.bulk_of(one, "two_1_x").unwrap();
        let two = graph.gen_item(bulk, [("f_integer", 1)]).unwrap();

        assert_eq!(graph.related_item(two, "one_x_1").unwrap(), Some(one));
        assert_eq!(graph.bulk(bulk).unwrap().class().name(), "Two");

        let x_x = graph.bulk_of(one, "two_x_x").unwrap();
        graph.add(x_x, two).unwrap();
        graph.add(x_x, two).unwrap();
        assert_eq!(graph.bulk_items(x_x).unwrap().len(), 1);
        let back = graph.bulk_of(two, "one_x_x").unwrap();
        assert_eq!(graph.bulk_items(back).unwrap(), vec![one]);
    }

    #[test]
    fn test_slice_and_defaults() {
        let registry = sample_registry();
        let class = registry.class("Two").unwrap();
        let mut graph = ItemGraph::new(registry);
        let bulk = graph.new_bulk(&class);
        graph.set_default(bulk, "f_string", "source-1").unwrap();
        for i in 0..10 {
            graph.gen_item(bulk, [("f_integer", i)]).unwrap();
        }

        let tail = graph.slice(bulk, 5..).unwrap();
        let items = graph.bulk_items(tail).unwrap();
        assert_eq!(items.len(), 5);
        assert_eq!(graph.get(items[0], "f_integer").unwrap(), Some(&Value::Int(5)));
        assert_eq!(graph.bulk(tail).unwrap().defaults().count(), 1);

        let empty = graph.slice(bulk, 20..).unwrap();
        assert!(graph.bulk(empty).unwrap().is_empty());
    }

    #[test]
    fn test_reachable_follows_relations() {
        let mut graph = ItemGraph::new(sample_registry());
        let one = graph.new_item_of("One").unwrap();
        let parent = graph.new_item_of("One").unwrap();
        graph.link(one, "parent_x_1", parent).unwrap();
        let bulk = graph.bulk_of(one, "two_x_x").unwrap();
        graph.gen_item(bulk, [("f_integer", 1)]).unwrap();
        graph.gen_item(bulk, [("f_integer", 2)]).unwrap();

        let (items, bulks) = graph.reachable(Root::Item(one)).unwrap();
        assert_eq!(items.len(), 4);
        assert_eq!(items[0], one);
        assert!(bulks.contains(&bulk));
    }

    #[test]
    fn test_stale_handle() {
        let mut graph = ItemGraph::new(sample_registry());
        let one = graph.new_item_of("One").unwrap();
        graph.items.remove(one);
        assert!(matches!(graph.item(one), Err(Error::StaleHandle(_))));
    }
}
