//! Item transport between processes
//!
//! A dump is a JSON document holding the flat list of items and bulks
//! reachable from a root. Items carry the scope-qualified type tag of their
//! class, so a scoped item loads back into the same scope variant.

use super::class::FieldId;
use super::graph::{BulkData, BulkId, ItemGraph, ItemId, Related, Root};
use crate::value::Value;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::io::{Read, Write};

pub const DUMP_VERSION: u32 = 1;

/// Relation slot in a dump; indexes point into `items`/`bulks`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DumpRelated {
    Item(usize),
    Bulk(usize),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DumpItem {
    /// Type tag of the item class
    pub class: String,
    #[serde(default)]
    pub fields: BTreeMap<String, Value>,
    #[serde(default)]
    pub relations: BTreeMap<String, DumpRelated>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub update_only: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub get_only: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DumpBulk {
    pub class: String,
    pub items: Vec<usize>,
    #[serde(default)]
    pub defaults: BTreeMap<String, Value>,
    /// Owning item index and relation name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner: Option<(usize, String)>,
}

/// Per-class item counts of a dump
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ClassSummary {
    pub class: String,
    pub items: usize,
    /// Items among the root items
    pub roots: usize,
    /// Plain field values over all items
    pub fields: usize,
    /// Relation slots over all items
    pub relations: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DumpDocument {
    pub version: u32,
    pub root: DumpRelated,
    pub items: Vec<DumpItem>,
    pub bulks: Vec<DumpBulk>,
}

impl DumpDocument {
    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        let document: DumpDocument = serde_json::from_slice(bytes)?;
        if document.version != DUMP_VERSION {
            return Err(Error::InvalidValue {
                field: "version".to_string(),
                reason: format!("unsupported dump version {}", document.version),
            });
        }
        Ok(document)
    }

    /// Root items, as indexes into `items`
    pub fn root_items(&self) -> Vec<usize> {
        match self.root {
            DumpRelated::Item(index) => vec![index],
            DumpRelated::Bulk(index) => self.bulks.get(index).map(|b| b.items.clone()).unwrap_or_default(),
        }
    }

    /// Item counts per type tag, in first-seen order
    pub fn class_summaries(&self) -> Vec<ClassSummary> {
        let roots = self.root_items();
        let mut summaries: Vec<ClassSummary> = Vec::new();
        for (index, item) in self.items.iter().enumerate() {
            let position = match summaries.iter().position(|s| s.class == item.class) {
                Some(position) => position,
                None => {
                    summaries.push(ClassSummary {
                        class: item.class.clone(),
                        ..ClassSummary::default()
                    });
                    summaries.len() - 1
                }
            };
            let summary = &mut summaries[position];
            summary.items += 1;
            summary.fields += item.fields.len();
            summary.relations += item.relations.len();
            if roots.contains(&index) {
                summary.roots += 1;
            }
        }
        summaries
    }
}

impl ItemGraph {
    /// Snapshot of everything reachable from `root`
    pub fn to_document(&self, root: impl Into<Root>) -> Result<DumpDocument> {
        let root = root.into();
        let (items, bulks) = self.reachable(root)?;
        let item_index: HashMap<ItemId, usize> = items.iter().enumerate().map(|(i, id)| (*id, i)).collect();
        let bulk_index: HashMap<BulkId, usize> = bulks.iter().enumerate().map(|(i, id)| (*id, i)).collect();
        let lookup_item = |id: ItemId| -> Result<usize> {
            let id = self.resolve(id)?;
            item_index
                .get(&id)
                .copied()
                .ok_or_else(|| Error::StaleHandle(format!("item {:?} not in dump", id)))
        };

        let mut dump_items = Vec::with_capacity(items.len());
        for id in &items {
            let data = self.item(*id)?;
            let class = &data.class;
            let fields = data
                .fields
                .iter()
                .map(|(field, value)| (class.field_info(*field).name.clone(), value.clone()))
                .collect();
            let mut relations = BTreeMap::new();
            for (relation, related) in &data.relations {
                let slot = match related {
                    Related::One(target) => DumpRelated::Item(lookup_item(*target)?),
                    Related::Many(bulk) => DumpRelated::Bulk(bulk_index[bulk]),
                };
                relations.insert(class.relation_info(*relation).name.clone(), slot);
            }
            dump_items.push(DumpItem {
                class: class.tag(),
                fields,
                relations,
                update_only: data.update_only,
                get_only: data.get_only,
            });
        }

        let mut dump_bulks = Vec::with_capacity(bulks.len());
        for id in &bulks {
            let data = self.bulk(*id)?;
            let members = self
                .bulk_items(*id)?
                .into_iter()
                .map(lookup_item)
                .collect::<Result<Vec<_>>>()?;
            let owner = match data.owner {
                Some((owner, relation)) => {
                    let owner_class = self.class_of(owner)?;
                    Some((lookup_item(owner)?, owner_class.relation_info(relation).name.clone()))
                }
                None => None,
            };
            dump_bulks.push(DumpBulk {
                class: data.class.tag(),
                items: members,
                defaults: data
                    .defaults
                    .iter()
                    .map(|(field, value)| (data.class.field_info(*field).name.clone(), value.clone()))
                    .collect(),
                owner,
            });
        }

        let root = match root {
            Root::Item(item) => DumpRelated::Item(lookup_item(item)?),
            Root::Bulk(bulk) => DumpRelated::Bulk(bulk_index[&bulk]),
        };
        Ok(DumpDocument {
            version: DUMP_VERSION,
            root,
            items: dump_items,
            bulks: dump_bulks,
        })
    }

    /// Recreate the items of a dump in this graph; returns the new root
    pub fn from_document(&mut self, document: &DumpDocument) -> Result<Root> {
        let registry = self.registry().clone();
        let out_of_range = |what: &str, index: usize| Error::InvalidValue {
            field: what.to_string(),
            reason: format!("index {} out of range", index),
        };

        let mut items = Vec::with_capacity(document.items.len());
        for dumped in &document.items {
            let class = registry.class(&dumped.class)?;
            let item = self.new_item(&class);
            for (name, value) in &dumped.fields {
                self.set(item, name, value.clone())?;
            }
            let data = self.item_mut(item)?;
            data.update_only = dumped.update_only;
            data.get_only = dumped.get_only;
            items.push(item);
        }

        let mut bulks = Vec::with_capacity(document.bulks.len());
        for dumped in &document.bulks {
            let class = registry.class(&dumped.class)?;
            let mut defaults: BTreeMap<FieldId, Value> = BTreeMap::new();
            for (name, value) in &dumped.defaults {
                let field = class.field_id(name)?;
                let info = class.field_info(field);
                defaults.insert(field, value.clone().coerce(info.kind, &info.name)?);
            }
            let mut members = Vec::with_capacity(dumped.items.len());
            for index in &dumped.items {
                members.push(*items.get(*index).ok_or_else(|| out_of_range("bulk item", *index))?);
            }
            let owner = match &dumped.owner {
                Some((index, relation)) => {
                    let owner = *items.get(*index).ok_or_else(|| out_of_range("bulk owner", *index))?;
                    Some((owner, self.class_of(owner)?.relation_id(relation)?))
                }
                None => None,
            };
            bulks.push(self.bulks.insert(BulkData {
                class,
                items: members,
                defaults,
                owner,
            }));
        }

        for (dumped, item) in document.items.iter().zip(&items) {
            let class = self.class_of(*item)?;
            for (name, slot) in &dumped.relations {
                let relation = class.relation_id(name)?;
                let related = match *slot {
                    DumpRelated::Item(index) => {
                        Related::One(*items.get(index).ok_or_else(|| out_of_range("related item", index))?)
                    }
                    DumpRelated::Bulk(index) => {
                        Related::Many(*bulks.get(index).ok_or_else(|| out_of_range("related bulk", index))?)
                    }
                };
                self.item_mut(*item)?.relations.insert(relation, related);
            }
        }

        match document.root {
            DumpRelated::Item(index) => Ok(Root::Item(
                *items.get(index).ok_or_else(|| out_of_range("root item", index))?,
            )),
            DumpRelated::Bulk(index) => Ok(Root::Bulk(
                *bulks.get(index).ok_or_else(|| out_of_range("root bulk", index))?,
            )),
        }
    }

    /// Serialize everything reachable from `root` to JSON bytes
    pub fn dumps(&self, root: impl Into<Root>) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(&self.to_document(root)?)?)
    }

    pub fn loads(&mut self, bytes: &[u8]) -> Result<Root> {
        let document = DumpDocument::from_slice(bytes)?;
        self.from_document(&document)
    }

    pub fn dump(&self, root: impl Into<Root>, writer: impl Write) -> Result<()> {
        serde_json::to_writer_pretty(writer, &self.to_document(root)?)?;
        Ok(())
    }

    pub fn load(&mut self, mut reader: impl Read) -> Result<Root> {
        let mut bytes = Vec::new();
        reader.read_to_end(&mut bytes)?;
        self.loads(&bytes)
    }
}
