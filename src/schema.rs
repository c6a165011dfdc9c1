//! Schema - Description of the storage models items are persisted into
//!
//! A schema is what the persister knows about storage without talking to
//! it: the plain fields of each model and its relations.
//! - `Multiplicity` is always seen from the model that owns the field
//! - every relation may name a reverse field on the related model
//! - self-relations (a model relating to itself) are allowed

use crate::value::FieldKind;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::str::FromStr;

/// Relation multiplicity, read from the owning side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Multiplicity {
    /// One row relates to at most one row, and vice versa
    #[serde(rename = "1-1")]
    OneToOne,
    /// One row relates to many rows of the other model
    #[serde(rename = "1-x")]
    OneToMany,
    /// Many rows relate to one row of the other model
    #[serde(rename = "x-1")]
    ManyToOne,
    /// Many rows relate to many rows
    #[serde(rename = "x-x")]
    ManyToMany,
}

impl Multiplicity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Multiplicity::OneToOne => "1-1",
            Multiplicity::OneToMany => "1-x",
            Multiplicity::ManyToOne => "x-1",
            Multiplicity::ManyToMany => "x-x",
        }
    }

    pub fn all() -> &'static [Multiplicity] {
        &[
            Multiplicity::OneToOne,
            Multiplicity::OneToMany,
            Multiplicity::ManyToOne,
            Multiplicity::ManyToMany,
        ]
    }

    /// The owning field holds a collection of related rows
    pub fn is_x_to_many(&self) -> bool {
        matches!(self, Multiplicity::OneToMany | Multiplicity::ManyToMany)
    }

    /// The owning field holds at most one related row
    pub fn is_x_to_one(&self) -> bool {
        !self.is_x_to_many()
    }

    /// Multiplicity of the reverse field
    pub fn reverse(&self) -> Multiplicity {
        match self {
            Multiplicity::OneToOne => Multiplicity::OneToOne,
            Multiplicity::OneToMany => Multiplicity::ManyToOne,
            Multiplicity::ManyToOne => Multiplicity::OneToMany,
            Multiplicity::ManyToMany => Multiplicity::ManyToMany,
        }
    }
}

impl FromStr for Multiplicity {
    type Err = Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().replace('_', "-").as_str() {
            "1-1" | "one-to-one" => Ok(Multiplicity::OneToOne),
            "1-x" | "one-to-many" => Ok(Multiplicity::OneToMany),
            "x-1" | "many-to-one" => Ok(Multiplicity::ManyToOne),
            "x-x" | "many-to-many" => Ok(Multiplicity::ManyToMany),
            _ => Err(Error::InvalidSchema(format!("Unknown multiplicity: {}", s))),
        }
    }
}

impl std::fmt::Display for Multiplicity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A plain (non-relation) field of a model
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldInfo {
    pub name: String,
    pub kind: FieldKind,
}

/// A relation field of a model
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelationInfo {
    /// Field name on the owning model
    pub name: String,
    /// Model on the other end
    pub related_model: String,
    /// Multiplicity seen from the owning model
    pub multiplicity: Multiplicity,
    /// Field name on the related model pointing back, if any
    pub reverse: Option<String>,
}

/// Fields and relations of one storage model
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelSchema {
    pub name: String,
    pub fields: Vec<FieldInfo>,
    pub relations: Vec<RelationInfo>,
}

impl ModelSchema {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            fields: Vec::new(),
            relations: Vec::new(),
        }
    }

    /// Add a plain field
    pub fn field(mut self, name: impl Into<String>, kind: FieldKind) -> Self {
        self.fields.push(FieldInfo {
            name: name.into(),
            kind,
        });
        self
    }

    /// Add a relation field with a reverse field on the related model
    pub fn relation(
        mut self,
        name: impl Into<String>,
        related_model: impl Into<String>,
        multiplicity: Multiplicity,
        reverse: Option<&str>,
    ) -> Self {
        self.relations.push(RelationInfo {
            name: name.into(),
            related_model: related_model.into(),
            multiplicity,
            reverse: reverse.map(str::to_string),
        });
        self
    }

    pub fn field_index(&self, name: &str) -> Option<usize> {
        self.fields.iter().position(|f| f.name == name)
    }

    pub fn relation_index(&self, name: &str) -> Option<usize> {
        self.relations.iter().position(|r| r.name == name)
    }

    pub fn get_relation(&self, name: &str) -> Option<&RelationInfo> {
        self.relations.iter().find(|r| r.name == name)
    }
}

/// All storage models known to a persister
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Schema {
    models: BTreeMap<String, ModelSchema>,
}

impl Schema {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a schema from models and check it for consistency
    pub fn from_models(models: impl IntoIterator<Item = ModelSchema>) -> Result<Self> {
        let mut schema = Self::new();
        for model in models {
            schema.add_model(model)?;
        }
        schema.validate()?;
        Ok(schema)
    }

    pub fn add_model(&mut self, model: ModelSchema) -> Result<()> {
        if self.models.contains_key(&model.name) {
            return Err(Error::InvalidSchema(format!("Duplicate model: {}", model.name)));
        }
        self.models.insert(model.name.clone(), model);
        Ok(())
    }

    pub fn model(&self, name: &str) -> Result<&ModelSchema> {
        self.models
            .get(name)
            .ok_or_else(|| Error::UnknownModel(name.to_string()))
    }

    pub fn models(&self) -> impl Iterator<Item = &ModelSchema> {
        self.models.values()
    }

    /// Relations of a model as (field, related model, multiplicity, reverse)
    pub fn iter_relations(&self, model: &str) -> Result<impl Iterator<Item = &RelationInfo>> {
        Ok(self.model(model)?.relations.iter())
    }

    /// Check field-name uniqueness and that every reverse relation points back
    pub fn validate(&self) -> Result<()> {
        for model in self.models.values() {
            let mut seen = std::collections::HashSet::new();
            let names = model
                .fields
                .iter()
                .map(|f| &f.name)
                .chain(model.relations.iter().map(|r| &r.name));
            for name in names {
                if !seen.insert(name) {
                    return Err(Error::InvalidSchema(format!(
                        "Duplicate field {} on model {}",
                        name, model.name
                    )));
                }
            }

            for relation in &model.relations {
                let related = self.models.get(&relation.related_model).ok_or_else(|| {
                    Error::InvalidSchema(format!(
                        "Relation {}.{} points to unknown model {}",
                        model.name, relation.name, relation.related_model
                    ))
                })?;

                let Some(reverse) = &relation.reverse else {
                    continue;
                };
                let back = related.get_relation(reverse).ok_or_else(|| {
                    Error::InvalidSchema(format!(
                        "Reverse {}.{} of {}.{} does not exist",
                        related.name, reverse, model.name, relation.name
                    ))
                })?;
                if back.related_model != model.name
                    || back.multiplicity != relation.multiplicity.reverse()
                    || back.reverse.as_deref() != Some(relation.name.as_str())
                {
                    return Err(Error::InvalidSchema(format!(
                        "Relation {}.{} ({}) and {}.{} ({}) are not a reverse pair",
                        model.name,
                        relation.name,
                        relation.multiplicity,
                        related.name,
                        back.name,
                        back.multiplicity
                    )));
                }
            }
        }
        Ok(())
    }
}
