//! Class registry - the explicit context holding item classes and scopes
//!
//! Maps type tags to classes and (scope, model) pairs to the class used
//! for related items generated under that scope.

use super::Scope;
use crate::item::class::{ItemClass, ItemClassBuilder, RelationId};
use crate::schema::Schema;
use crate::{Error, Result};
use std::collections::{BTreeMap, HashMap};

#[derive(Debug, Clone)]
pub struct ClassRegistry {
    schema: Schema,
    /// Classes by type tag
    classes: BTreeMap<String, ItemClass>,
    /// Tag of the class items of a model get under a scope (`None` = base)
    by_model: HashMap<(Option<String>, String), String>,
    scopes: BTreeMap<String, Scope>,
}

impl ClassRegistry {
    pub fn new(schema: Schema) -> Self {
        Self {
            schema,
            classes: BTreeMap::new(),
            by_model: HashMap::new(),
            scopes: BTreeMap::new(),
        }
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    /// Build and register a base class; one base class per model
    pub fn register(&mut self, builder: ItemClassBuilder) -> Result<ItemClass> {
        if !self.scopes.is_empty() {
            return Err(Error::InvalidSchema(format!(
                "class {} registered after scopes were added",
                builder.name()
            )));
        }
        let class = builder.build(&self.schema)?;
        let key = (None, class.model().to_string());
        if self.classes.contains_key(&class.tag()) || self.by_model.contains_key(&key) {
            return Err(Error::InvalidSchema(format!(
                "duplicate class {} for model {}",
                class.name(),
                class.model()
            )));
        }
        self.by_model.insert(key, class.tag());
        self.classes.insert(class.tag(), class.clone());
        tracing::debug!("Registered item class {} -> {}", class.name(), class.model());
        Ok(class)
    }

    /// Derive a scoped variant of every base class
    pub fn add_scope(&mut self, scope: Scope) -> Result<()> {
        if self.scopes.contains_key(scope.id()) {
            return Err(Error::InvalidSchema(format!("duplicate scope {}", scope.id())));
        }
        for class_name in scope.overrides().keys() {
            if !self.classes.contains_key(class_name) {
                return Err(Error::UnknownClass(class_name.clone()));
            }
        }

        let bases: Vec<ItemClass> = self
            .classes
            .values()
            .filter(|c| c.scope().is_none())
            .cloned()
            .collect();
        for base in bases {
            let config = match scope.overrides_for(base.name()) {
                Some(overrides) => overrides.apply(base.config()),
                None => base.config().clone(),
            };
            let variant = ItemClass::from_config(
                base.name().to_string(),
                base.model().to_string(),
                Some(scope.id().to_string()),
                config,
                &self.schema,
            )?;
            self.by_model.insert(
                (Some(scope.id().to_string()), base.model().to_string()),
                variant.tag(),
            );
            self.classes.insert(variant.tag(), variant);
        }

        tracing::debug!("Added scope {}", scope.id());
        self.scopes.insert(scope.id().to_string(), scope);
        Ok(())
    }

    /// Look up a class by type tag (`Name` or `scope/Name`)
    pub fn class(&self, tag: &str) -> Result<ItemClass> {
        self.classes
            .get(tag)
            .cloned()
            .ok_or_else(|| Error::UnknownClass(tag.to_string()))
    }

    /// The variant of base class `name` under `scope_id`
    pub fn scoped(&self, scope_id: &str, name: &str) -> Result<ItemClass> {
        self.class(&crate::item::class::make_tag(Some(scope_id), name))
    }

    pub fn scope(&self, scope_id: &str) -> Option<&Scope> {
        self.scopes.get(scope_id)
    }

    pub fn classes(&self) -> impl Iterator<Item = &ItemClass> {
        self.classes.values()
    }

    /// Class used for items of `model` under `scope`
    pub fn class_for_model(&self, scope: Option<&str>, model: &str) -> Result<ItemClass> {
        let scoped = scope.and_then(|s| self.by_model.get(&(Some(s.to_string()), model.to_string())));
        let tag = scoped
            .or_else(|| self.by_model.get(&(None, model.to_string())))
            .ok_or_else(|| Error::UnknownClass(format!("no item class for model {}", model)))?;
        self.class(tag)
    }

    /// Class of items on the other end of `relation`
    pub fn related_class(&self, class: &ItemClass, relation: RelationId) -> Result<ItemClass> {
        let info = class.relation_info(relation);
        self.class_for_model(class.scope(), &info.related_model)
    }
}
