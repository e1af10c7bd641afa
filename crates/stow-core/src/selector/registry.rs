// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Name → strategy lookup, driven by the `optimizer` setting.
use std::collections::BTreeMap;

use super::{
    ExhaustiveSelector, GreedySelector, MigrateAllSelector, MinCutSelector, RecomputeAllSelector,
    SelectError, Selector,
};

/// Strategy registry keyed by [`Selector::name`].
pub struct SelectorRegistry {
    selectors: BTreeMap<String, Box<dyn Selector + Send + Sync>>,
}

impl SelectorRegistry {
    /// Name of the strategy used when none is configured.
    pub const DEFAULT: &'static str = "mincut";

    /// An empty registry.
    pub fn new() -> Self {
        Self {
            selectors: BTreeMap::new(),
        }
    }

    /// Registry with every built-in strategy.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(MinCutSelector);
        registry.register(ExhaustiveSelector);
        registry.register(GreedySelector);
        registry.register(MigrateAllSelector);
        registry.register(RecomputeAllSelector);
        registry
    }

    /// Adds `selector`, replacing any strategy with the same name.
    pub fn register<S>(&mut self, selector: S)
    where
        S: Selector + Send + Sync + 'static,
    {
        self.selectors
            .insert(selector.name().to_owned(), Box::new(selector));
    }

    /// Looks up a strategy by name.
    pub fn get(&self, name: &str) -> Result<&(dyn Selector + Send + Sync), SelectError> {
        self.selectors
            .get(name)
            .map(Box::as_ref)
            .ok_or_else(|| SelectError::UnknownStrategy {
                name: name.to_owned(),
                available: self.names(),
            })
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<String> {
        self.selectors.keys().cloned().collect()
    }
}

impl Default for SelectorRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

impl std::fmt::Debug for SelectorRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SelectorRegistry")
            .field("selectors", &self.names())
            .finish()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_registered() {
        let registry = SelectorRegistry::with_defaults();
        assert_eq!(
            registry.names(),
            vec!["exhaustive", "greedy", "migrate_all", "mincut", "recompute_all"]
        );
        assert_eq!(registry.get(SelectorRegistry::DEFAULT).unwrap().name(), "mincut");
    }

    #[test]
    fn unknown_name_lists_alternatives() {
        let registry = SelectorRegistry::with_defaults();
        let err = registry.get("annealing").err().unwrap();
        assert_eq!(
            err,
            SelectError::UnknownStrategy {
                name: "annealing".to_owned(),
                available: registry.names(),
            }
        );
    }
}
