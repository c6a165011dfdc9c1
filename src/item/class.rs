//! Item classes - Per record type matching and write policy
//!
//! An item class ties a record type to a storage model and declares:
//! - `creators`: field groups, any complete one justifies creating a row
//! - `getters`: field groups used to look up existing rows
//! - `norewrite_fields`, `nullables` and per-relation settings for writes
//! - mode flags (update-only, get-only, merge, multi-update, fast insert)
//! - deleter selectors
//!
//! Field names are resolved against the model schema when the class is
//! built. Past that point everything is addressed by `FieldRef`.

use crate::schema::{FieldInfo, ModelSchema, RelationInfo, Schema};
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

/// Index of a plain field within its model
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FieldId(pub(crate) u16);

/// Index of a relation field within its model
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RelationId(pub(crate) u16);

/// A resolved field or relation of an item class
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum FieldRef {
    Field(FieldId),
    Relation(RelationId),
}

/// Rewrite protection for a field or relation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Norewrite {
    /// Only written while the stored value is empty
    Protect,
    /// Only written when the row is created by the current persist
    RequireNew,
}

/// Write settings of one relation
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelationSettings {
    /// Replace the stored set instead of appending to it (x-to-many only)
    pub replace_x_to_many: Option<bool>,
    /// Fields of the related model; stored members sharing these values
    /// with a supplied member but not supplied are unlinked
    pub unref_x_to_many: Vec<String>,
}

/// Mode flags of an item class
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Modes {
    pub update_only_mode: bool,
    pub get_only_mode: bool,
    pub allow_merge_items: bool,
    pub allow_multi_update: bool,
    pub fast_insert: bool,
}

/// Name-based class configuration, as written by the user.
///
/// Kept on the built class so scopes can layer overrides on top of it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ClassConfig {
    pub creators: Vec<Vec<String>>,
    pub getters: Vec<Vec<String>>,
    /// Policy for every field/relation not listed in `norewrite_fields`
    pub norewrite_default: Option<Norewrite>,
    /// `None` explicitly unsets the default for that field
    pub norewrite_fields: BTreeMap<String, Option<Norewrite>>,
    pub nullables: Vec<String>,
    pub replace_x_to_many: bool,
    pub relations: BTreeMap<String, RelationSettings>,
    pub modes: Modes,
    pub batch_size: Option<usize>,
    pub deleter_selectors: Vec<String>,
    pub deleter_execute_on_persist: bool,
}

/// Builder for `ItemClass`
#[derive(Debug, Clone)]
pub struct ItemClassBuilder {
    name: String,
    model: String,
    config: ClassConfig,
}

fn groups<G, S>(groups: impl IntoIterator<Item = G>) -> Vec<Vec<String>>
where
    G: IntoIterator<Item = S>,
    S: Into<String>,
{
    groups
        .into_iter()
        .map(|g| g.into_iter().map(Into::into).collect())
        .collect()
}

impl ItemClassBuilder {
    pub fn creators<G, S>(mut self, creators: impl IntoIterator<Item = G>) -> Self
    where
        G: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.config.creators = groups(creators);
        self
    }

    pub fn getters<G, S>(mut self, getters: impl IntoIterator<Item = G>) -> Self
    where
        G: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.config.getters = groups(getters);
        self
    }

    pub fn norewrite(mut self, field: &str, policy: Norewrite) -> Self {
        self.config.norewrite_fields.insert(field.to_string(), Some(policy));
        self
    }

    /// Opt a field out of the class-wide default policy
    pub fn norewrite_unset(mut self, field: &str) -> Self {
        self.config.norewrite_fields.insert(field.to_string(), None);
        self
    }

    pub fn norewrite_default(mut self, policy: Norewrite) -> Self {
        self.config.norewrite_default = Some(policy);
        self
    }

    pub fn nullables<S: Into<String>>(mut self, fields: impl IntoIterator<Item = S>) -> Self {
        self.config.nullables = fields.into_iter().map(Into::into).collect();
        self
    }

    /// Class-wide default for to-many writes
    pub fn replace_all_x_to_many(mut self, replace: bool) -> Self {
        self.config.replace_x_to_many = replace;
        self
    }

    pub fn replace_x_to_many(mut self, relation: &str, replace: bool) -> Self {
        self.config
            .relations
            .entry(relation.to_string())
            .or_default()
            .replace_x_to_many = Some(replace);
        self
    }

    pub fn unref_x_to_many<S: Into<String>>(
        mut self,
        relation: &str,
        selector_fields: impl IntoIterator<Item = S>,
    ) -> Self {
        self.config
            .relations
            .entry(relation.to_string())
            .or_default()
            .unref_x_to_many = selector_fields.into_iter().map(Into::into).collect();
        self
    }

    pub fn update_only_mode(mut self, on: bool) -> Self {
        self.config.modes.update_only_mode = on;
        self
    }

    pub fn get_only_mode(mut self, on: bool) -> Self {
        self.config.modes.get_only_mode = on;
        self
    }

    pub fn allow_merge_items(mut self, on: bool) -> Self {
        self.config.modes.allow_merge_items = on;
        self
    }

    pub fn allow_multi_update(mut self, on: bool) -> Self {
        self.config.modes.allow_multi_update = on;
        self
    }

    pub fn fast_insert(mut self, on: bool) -> Self {
        self.config.modes.fast_insert = on;
        self
    }

    pub fn batch_size(mut self, size: usize) -> Self {
        self.config.batch_size = Some(size);
        self
    }

    pub fn deleter_selectors<S: Into<String>>(mut self, fields: impl IntoIterator<Item = S>) -> Self {
        self.config.deleter_selectors = fields.into_iter().map(Into::into).collect();
        self
    }

    pub fn deleter_execute_on_persist(mut self, on: bool) -> Self {
        self.config.deleter_execute_on_persist = on;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Resolve every configured name against the schema
    pub fn build(self, schema: &Schema) -> Result<ItemClass> {
        ItemClass::from_config(self.name, self.model, None, self.config, schema)
    }
}

/// Resolved definition behind an `ItemClass` handle
#[derive(Debug)]
pub struct ClassDef {
    name: String,
    scope: Option<String>,
    model: ModelSchema,
    config: ClassConfig,
    creators: Vec<Vec<FieldRef>>,
    getters: Vec<Vec<FieldRef>>,
    norewrite: HashMap<FieldRef, Norewrite>,
    nullables: HashSet<FieldRef>,
    replace: HashSet<RelationId>,
    unref: HashMap<RelationId, Vec<String>>,
    deleter_selectors: Vec<FieldId>,
}

/// Shared handle to a validated item class
#[derive(Debug, Clone)]
pub struct ItemClass(Arc<ClassDef>);

impl PartialEq for ItemClass {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0) || (self.0.name == other.0.name && self.0.scope == other.0.scope)
    }
}

impl Eq for ItemClass {}

impl ItemClass {
    pub fn builder(name: impl Into<String>, model: impl Into<String>) -> ItemClassBuilder {
        ItemClassBuilder {
            name: name.into(),
            model: model.into(),
            config: ClassConfig::default(),
        }
    }

    pub(crate) fn from_config(
        name: String,
        model: String,
        scope: Option<String>,
        config: ClassConfig,
        schema: &Schema,
    ) -> Result<Self> {
        let model_schema = schema.model(&model)?.clone();
        let resolve = |field: &str| resolve_ref(&model_schema, field);
        let resolve_groups = |groups: &[Vec<String>]| -> Result<Vec<Vec<FieldRef>>> {
            groups
                .iter()
                .map(|g| g.iter().map(|f| resolve(f.as_str())).collect::<Result<Vec<_>>>())
                .collect()
        };

        let creators = resolve_groups(&config.creators)?;
        let getters = resolve_groups(&config.getters)?;

        let mut norewrite = HashMap::new();
        if let Some(default) = config.norewrite_default {
            for index in 0..model_schema.fields.len() {
                norewrite.insert(FieldRef::Field(FieldId(index as u16)), default);
            }
            for index in 0..model_schema.relations.len() {
                norewrite.insert(FieldRef::Relation(RelationId(index as u16)), default);
            }
        }
        for (field, policy) in &config.norewrite_fields {
            let field_ref = resolve(field)?;
            match policy {
                Some(policy) => norewrite.insert(field_ref, *policy),
                None => norewrite.remove(&field_ref),
            };
        }

        let nullables = config
            .nullables
            .iter()
            .map(|f| resolve(f.as_str()))
            .collect::<Result<HashSet<_>>>()?;

        let mut replace = HashSet::new();
        let mut unref = HashMap::new();
        for (index, relation) in model_schema.relations.iter().enumerate() {
            let id = RelationId(index as u16);
            let settings = config.relations.get(&relation.name);
            let replace_this = settings
                .and_then(|s| s.replace_x_to_many)
                .unwrap_or(config.replace_x_to_many);
            if replace_this && relation.multiplicity.is_x_to_many() {
                replace.insert(id);
            }
        }
        for (relation_name, settings) in &config.relations {
            let Some(index) = model_schema.relation_index(relation_name) else {
                return Err(unknown(&model_schema, relation_name));
            };
            let relation = &model_schema.relations[index];
            if settings.unref_x_to_many.is_empty() {
                continue;
            }
            if !relation.multiplicity.is_x_to_many() {
                return Err(Error::InvalidSchema(format!(
                    "unref_x_to_many on {}.{} which is {}",
                    model_schema.name, relation.name, relation.multiplicity
                )));
            }
            let related = schema.model(&relation.related_model)?;
            for field in &settings.unref_x_to_many {
                if related.field_index(field).is_none() {
                    return Err(unknown(related, field));
                }
            }
            unref.insert(RelationId(index as u16), settings.unref_x_to_many.clone());
        }

        let deleter_selectors = config
            .deleter_selectors
            .iter()
            .map(|f| match resolve(f.as_str())? {
                FieldRef::Field(id) => Ok(id),
                FieldRef::Relation(_) => Err(Error::InvalidSchema(format!(
                    "deleter selector {} on {} must be a plain field",
                    f, model_schema.name
                ))),
            })
            .collect::<Result<Vec<_>>>()?;

        if config.batch_size == Some(0) {
            return Err(Error::InvalidSchema(format!("batch_size of {} must be positive", name)));
        }

        Ok(Self(Arc::new(ClassDef {
            name,
            scope,
            model: model_schema,
            config,
            creators,
            getters,
            norewrite,
            nullables,
            replace,
            unref,
            deleter_selectors,
        })))
    }

    pub fn name(&self) -> &str {
        &self.0.name
    }

    pub fn model(&self) -> &str {
        &self.0.model.name
    }

    pub fn model_schema(&self) -> &ModelSchema {
        &self.0.model
    }

    pub fn scope(&self) -> Option<&str> {
        self.0.scope.as_deref()
    }

    /// Scope-qualified type tag, `scope/Name` or `Name`
    pub fn tag(&self) -> String {
        make_tag(self.scope(), self.name())
    }

    pub fn config(&self) -> &ClassConfig {
        &self.0.config
    }

    pub fn field_ref(&self, name: &str) -> Result<FieldRef> {
        resolve_ref(&self.0.model, name)
    }

    pub fn field_id(&self, name: &str) -> Result<FieldId> {
        self.0
            .model
            .field_index(name)
            .map(|i| FieldId(i as u16))
            .ok_or_else(|| unknown(&self.0.model, name))
    }

    pub fn relation_id(&self, name: &str) -> Result<RelationId> {
        self.0
            .model
            .relation_index(name)
            .map(|i| RelationId(i as u16))
            .ok_or_else(|| unknown(&self.0.model, name))
    }

    pub fn field_info(&self, id: FieldId) -> &FieldInfo {
        &self.0.model.fields[id.0 as usize]
    }

    pub fn relation_info(&self, id: RelationId) -> &RelationInfo {
        &self.0.model.relations[id.0 as usize]
    }

    /// Like `field_info`, for ids that may come from another class
    pub fn checked_field(&self, id: FieldId) -> Result<&FieldInfo> {
        self.0
            .model
            .fields
            .get(id.0 as usize)
            .ok_or_else(|| unknown(&self.0.model, &format!("field #{}", id.0)))
    }

    /// Like `relation_info`, for ids that may come from another class
    pub fn checked_relation(&self, id: RelationId) -> Result<&RelationInfo> {
        self.0
            .model
            .relations
            .get(id.0 as usize)
            .ok_or_else(|| unknown(&self.0.model, &format!("relation #{}", id.0)))
    }

    pub fn name_of(&self, field: FieldRef) -> &str {
        match field {
            FieldRef::Field(id) => &self.field_info(id).name,
            FieldRef::Relation(id) => &self.relation_info(id).name,
        }
    }

    pub fn field_ids(&self) -> impl Iterator<Item = FieldId> {
        (0..self.0.model.fields.len()).map(|i| FieldId(i as u16))
    }

    pub fn relation_ids(&self) -> impl Iterator<Item = RelationId> {
        (0..self.0.model.relations.len()).map(|i| RelationId(i as u16))
    }

    pub fn creators(&self) -> &[Vec<FieldRef>] {
        &self.0.creators
    }

    pub fn getters(&self) -> &[Vec<FieldRef>] {
        &self.0.getters
    }

    pub fn norewrite(&self, field: FieldRef) -> Option<Norewrite> {
        self.0.norewrite.get(&field).copied()
    }

    pub fn is_nullable(&self, field: FieldRef) -> bool {
        self.0.nullables.contains(&field)
    }

    pub fn replaces_x_to_many(&self, relation: RelationId) -> bool {
        self.0.replace.contains(&relation)
    }

    pub fn unref_selectors(&self, relation: RelationId) -> &[String] {
        self.0.unref.get(&relation).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn modes(&self) -> Modes {
        self.0.config.modes
    }

    pub fn batch_size(&self) -> Option<usize> {
        self.0.config.batch_size
    }

    pub fn deleter_selectors(&self) -> &[FieldId] {
        &self.0.deleter_selectors
    }

    pub fn deleter_execute_on_persist(&self) -> bool {
        self.0.config.deleter_execute_on_persist
    }
}

pub(crate) fn make_tag(scope: Option<&str>, name: &str) -> String {
    match scope {
        Some(scope) => format!("{}/{}", scope, name),
        None => name.to_string(),
    }
}

fn unknown(model: &ModelSchema, field: &str) -> Error {
    Error::UnknownField {
        model: model.name.clone(),
        field: field.to_string(),
    }
}

fn resolve_ref(model: &ModelSchema, name: &str) -> Result<FieldRef> {
    if let Some(index) = model.field_index(name) {
        return Ok(FieldRef::Field(FieldId(index as u16)));
    }
    if let Some(index) = model.relation_index(name) {
        return Ok(FieldRef::Relation(RelationId(index as u16)));
    }
    Err(unknown(model, name))
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::schema::Multiplicity;
    use crate::value::FieldKind;

    /// Two models with every relation shape between them plus a self-relation
    pub(crate) fn sample_schema() -> Schema {
        let fields = |m: ModelSchema| {
            m.field("f_integer", FieldKind::Integer)
                .field("f_float", FieldKind::Float)
                .field("f_string", FieldKind::Text)
                .field("f_text", FieldKind::Text)
                .field("f_boolean", FieldKind::Boolean)
                .field("f_date", FieldKind::Date)
        };
        let one = fields(ModelSchema::new("one"))
            .relation("two_1_1", "two", Multiplicity::OneToOne, Some("one_1_1"))
            .relation("two_1_x", "two", Multiplicity::OneToMany, Some("one_x_1"))
            .relation("two_x_1", "two", Multiplicity::ManyToOne, Some("one_1_x"))
            .relation("two_x_x", "two", Multiplicity::ManyToMany, Some("one_x_x"))
            .relation("parent_x_1", "one", Multiplicity::ManyToOne, Some("child_1_x"))
            .relation("child_1_x", "one", Multiplicity::OneToMany, Some("parent_x_1"));
        let two = fields(ModelSchema::new("two"))
            .relation("one_1_1", "one", Multiplicity::OneToOne, Some("two_1_1"))
            .relation("one_x_1", "one", Multiplicity::ManyToOne, Some("two_1_x"))
            .relation("one_1_x", "one", Multiplicity::OneToMany, Some("two_x_1"))
            .relation("one_x_x", "one", Multiplicity::ManyToMany, Some("two_x_x"));
        Schema::from_models([one, two]).unwrap()
    }

    #[test]
    fn test_build_resolves_names() {
        let schema = sample_schema();
        let class = ItemClass::builder("One", "one")
            .creators([["f_integer"]])
            .getters([vec!["f_integer"], vec!["f_float", "two_1_1"]])
            .build(&schema)
            .unwrap();

        assert_eq!(class.tag(), "One");
        assert_eq!(class.getters().len(), 2);
        assert!(matches!(class.getters()[1][1], FieldRef::Relation(_)));
        assert_eq!(class.name_of(class.getters()[1][1]), "two_1_1");
    }

    #[test]
    fn test_unknown_field_rejected_at_definition() {
        let schema = sample_schema();
        let err = ItemClass::builder("One", "one")
            .getters([["f_integre"]])
            .build(&schema)
            .unwrap_err();
        assert!(matches!(err, Error::UnknownField { ref field, .. } if field == "f_integre"));
    }

    #[test]
    fn test_norewrite_default_and_unset() {
        let schema = sample_schema();
        let class = ItemClass::builder("One", "one")
            .norewrite_default(Norewrite::Protect)
            .norewrite_unset("f_string")
            .norewrite("f_text", Norewrite::RequireNew)
            .build(&schema)
            .unwrap();

        let f_string = class.field_ref("f_string").unwrap();
        let f_text = class.field_ref("f_text").unwrap();
        let two_1_1 = class.field_ref("two_1_1").unwrap();
        assert_eq!(class.norewrite(f_string), None);
        assert_eq!(class.norewrite(f_text), Some(Norewrite::RequireNew));
        assert_eq!(class.norewrite(two_1_1), Some(Norewrite::Protect));
    }

    #[test]
    fn test_relation_settings() {
        let schema = sample_schema();
        let class = ItemClass::builder("One", "one")
            .replace_all_x_to_many(true)
            .replace_x_to_many("two_1_x", false)
            .unref_x_to_many("two_x_x", ["f_string"])
            .build(&schema)
            .unwrap();

        assert!(!class.replaces_x_to_many(class.relation_id("two_1_x").unwrap()));
        assert!(class.replaces_x_to_many(class.relation_id("two_x_x").unwrap()));
        assert!(!class.replaces_x_to_many(class.relation_id("two_1_1").unwrap()));
        assert_eq!(class.unref_selectors(class.relation_id("two_x_x").unwrap()), ["f_string"]);
    }

    #[test]
    fn test_unref_on_x_to_one_rejected() {
        let schema = sample_schema();
        let result = ItemClass::builder("One", "one")
            .unref_x_to_many("two_x_1", ["f_string"])
            .build(&schema);
        assert!(matches!(result, Err(Error::InvalidSchema(_))));
    }

    #[test]
    fn test_relation_deleter_selector_rejected() {
        let schema = sample_schema();
        let result = ItemClass::builder("One", "one")
            .deleter_selectors(["two_x_1"])
            .build(&schema);
        assert!(result.is_err());
    }
}
