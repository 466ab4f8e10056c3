//! Pass construction by name.

use std::collections::BTreeMap;

use crate::{
    opt::{outliner::InstructionSequenceOutlinerPass, switches::ReduceSparseSwitchesPass},
    pass::{
        builtin::{ClinitCycleAnalysisPass, DexLimitsCheckPass, TypeSystemAnalysisPass},
        traits::Pass,
    },
    Error, Result,
};

/// Creates a fresh, unconfigured pass.
pub type PassFactory = fn() -> Box<dyn Pass>;

/// A [`PassFactory`] for passes whose default is their unconfigured state.
pub fn default_factory<P: Pass + Default + 'static>() -> Box<dyn Pass> {
    Box::new(P::default())
}

/// Maps pass names, as they appear in a configuration, to factories.
///
/// [`PassRegistry::default`] knows every pass of this crate; embedders add their own
/// with [`PassRegistry::register`].
#[derive(Debug, Clone)]
pub struct PassRegistry {
    factories: BTreeMap<&'static str, PassFactory>,
}

impl PassRegistry {
    /// A registry without any pass.
    #[must_use]
    pub fn empty() -> Self {
        PassRegistry {
            factories: BTreeMap::new(),
        }
    }

    /// Registers `factory` under the name of the pass it creates. A later registration
    /// under the same name replaces the earlier one.
    pub fn register(&mut self, factory: PassFactory) -> &mut Self {
        let name = factory().name();
        self.factories.insert(name, factory);
        self
    }

    /// Creates the pass called `name`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if no pass has that name.
    pub fn create(&self, name: &str) -> Result<Box<dyn Pass>> {
        self.factories
            .get(name)
            .map(|factory| factory())
            .ok_or_else(|| Error::Config(format!("unknown pass '{name}'")))
    }

    /// `true` if a pass called `name` is registered.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }

    /// Registered names in order.
    pub fn names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.factories.keys().copied()
    }
}

impl Default for PassRegistry {
    fn default() -> Self {
        let mut registry = PassRegistry::empty();
        registry
            .register(default_factory::<DexLimitsCheckPass>)
            .register(default_factory::<TypeSystemAnalysisPass>)
            .register(default_factory::<ClinitCycleAnalysisPass>)
            .register(default_factory::<ReduceSparseSwitchesPass>)
            .register(default_factory::<InstructionSequenceOutlinerPass>);
        registry
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtins_are_registered() {
        let registry = PassRegistry::default();
        assert_eq!(
            registry.names().collect::<Vec<_>>(),
            vec![
                "ClinitCycleAnalysisPass",
                "DexLimitsCheckPass",
                "InstructionSequenceOutlinerPass",
                "ReduceSparseSwitchesPass",
                "TypeSystemAnalysisPass",
            ]
        );
        assert!(registry.create("ReduceSparseSwitchesPass").is_ok());
        assert!(matches!(registry.create("NoSuchPass"), Err(Error::Config(_))));
        assert!(!PassRegistry::empty().contains("DexLimitsCheckPass"));
    }
}
