//! Scopes - Namespaced variants of item classes
//!
//! A scope derives, for every registered base class, a variant carrying
//! its own getters, creators, deleter selectors and mode flags layered over
//! the base configuration. The storage model is shared; deleter state is
//! keyed by the scope id, so scoped runs never prune each other's rows.

pub mod registry;

pub use registry::ClassRegistry;

use crate::item::class::ClassConfig;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Per-class settings a scope layers over the base class.
///
/// `None` keeps the base value.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassOverrides {
    pub creators: Option<Vec<Vec<String>>>,
    pub getters: Option<Vec<Vec<String>>>,
    pub nullables: Option<Vec<String>>,
    pub deleter_selectors: Option<Vec<String>>,
    pub deleter_execute_on_persist: Option<bool>,
    pub update_only_mode: Option<bool>,
    pub get_only_mode: Option<bool>,
    pub allow_merge_items: Option<bool>,
    pub allow_multi_update: Option<bool>,
    pub fast_insert: Option<bool>,
    pub batch_size: Option<usize>,
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

impl ClassOverrides {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn creators<G, S>(mut self, creators: impl IntoIterator<Item = G>) -> Self
    where
        G: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.creators = Some(groups(creators));
        self
    }

    pub fn getters<G, S>(mut self, getters: impl IntoIterator<Item = G>) -> Self
    where
        G: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.getters = Some(groups(getters));
        self
    }

    pub fn nullables<S: Into<String>>(mut self, fields: impl IntoIterator<Item = S>) -> Self {
        self.nullables = Some(fields.into_iter().map(Into::into).collect());
        self
    }

    pub fn deleter_selectors<S: Into<String>>(mut self, fields: impl IntoIterator<Item = S>) -> Self {
        self.deleter_selectors = Some(fields.into_iter().map(Into::into).collect());
        self
    }

    pub fn deleter_execute_on_persist(mut self, on: bool) -> Self {
        self.deleter_execute_on_persist = Some(on);
        self
    }

    pub fn update_only_mode(mut self, on: bool) -> Self {
        self.update_only_mode = Some(on);
        self
    }

    pub fn get_only_mode(mut self, on: bool) -> Self {
        self.get_only_mode = Some(on);
        self
    }

    pub fn allow_merge_items(mut self, on: bool) -> Self {
        self.allow_merge_items = Some(on);
        self
    }

    pub fn allow_multi_update(mut self, on: bool) -> Self {
        self.allow_multi_update = Some(on);
        self
    }

    pub fn fast_insert(mut self, on: bool) -> Self {
        self.fast_insert = Some(on);
        self
    }

    pub fn batch_size(mut self, size: usize) -> Self {
        self.batch_size = Some(size);
        self
    }

    /// Configuration of the scoped variant
    pub fn apply(&self, base: &ClassConfig) -> ClassConfig {
        let mut config = base.clone();
        if let Some(creators) = &self.creators {
            config.creators = creators.clone();
        }
        if let Some(getters) = &self.getters {
            config.getters = getters.clone();
        }
        if let Some(nullables) = &self.nullables {
            config.nullables = nullables.clone();
        }
        if let Some(selectors) = &self.deleter_selectors {
            config.deleter_selectors = selectors.clone();
        }
        if let Some(on) = self.deleter_execute_on_persist {
            config.deleter_execute_on_persist = on;
        }
        let modes = &mut config.modes;
        modes.update_only_mode = self.update_only_mode.unwrap_or(modes.update_only_mode);
        modes.get_only_mode = self.get_only_mode.unwrap_or(modes.get_only_mode);
        modes.allow_merge_items = self.allow_merge_items.unwrap_or(modes.allow_merge_items);
        modes.allow_multi_update = self.allow_multi_update.unwrap_or(modes.allow_multi_update);
        modes.fast_insert = self.fast_insert.unwrap_or(modes.fast_insert);
        if self.batch_size.is_some() {
            config.batch_size = self.batch_size;
        }
        config
    }
}

/// A named configuration namespace
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Scope {
    id: String,
    overrides: BTreeMap<String, ClassOverrides>,
}

impl Scope {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            overrides: BTreeMap::new(),
        }
    }

    /// Override settings of the base class named `class_name`
    pub fn with(mut self, class_name: impl Into<String>, overrides: ClassOverrides) -> Self {
        self.overrides.insert(class_name.into(), overrides);
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn overrides(&self) -> &BTreeMap<String, ClassOverrides> {
        &self.overrides
    }

    pub fn overrides_for(&self, class_name: &str) -> Option<&ClassOverrides> {
        self.overrides.get(class_name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_overrides_layer_over_base() {
        let base = ClassConfig {
            creators: vec![vec!["f_integer".to_string()]],
            getters: vec![vec!["f_integer".to_string()]],
            deleter_selectors: vec!["f_string".to_string()],
            ..ClassConfig::default()
        };
        let overrides = ClassOverrides::new()
            .getters([["f_text"]])
            .allow_multi_update(true);

        let config = overrides.apply(&base);
        assert_eq!(config.getters, vec![vec!["f_text".to_string()]]);
        assert_eq!(config.creators, base.creators);
        assert_eq!(config.deleter_selectors, base.deleter_selectors);
        assert!(config.modes.allow_multi_update);
        assert!(!config.modes.fast_insert);
    }

    #[test]
    fn test_scope_keeps_overrides_by_class() {
        let scope = Scope::new("scope-a").with("One", ClassOverrides::new().batch_size(3));
        assert_eq!(scope.id(), "scope-a");
        assert_eq!(scope.overrides_for("One").and_then(|o| o.batch_size), Some(3));
        assert!(scope.overrides_for("Two").is_none());
    }
}
