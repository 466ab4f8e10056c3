//! Analysis and checking passes that ship with the pipeline.

use std::{hash::Hash, sync::Arc};

use rustc_hash::FxHashSet;
use serde::Deserialize;

use crate::{
    analysis::ClinitGraph,
    config::{Config, ConfigView},
    ir::{
        instruction::IrInstruction, ClassId, FieldRef, MethodRef, Pool, Scope, TypeRef, TypeSystem,
    },
    pass::{
        manager::PassManager,
        metrics::as_metric,
        property::{Property, PropertyInteractions},
        traits::{AnalysisId, AnalysisResult, Pass, PreservedAnalyses},
    },
    Error, Result,
};

/// Analysis id under which [`TypeSystemAnalysisPass`] publishes a [`TypeSystem`].
pub const TYPE_SYSTEM: AnalysisId = "TypeSystem";

/// Analysis id under which [`ClinitCycleAnalysisPass`] publishes
/// [`crate::analysis::ClinitCycles`].
pub const CLINIT_CYCLES: AnalysisId = "ClinitCycles";

/// Reference limits of a single dex.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct DexLimits {
    /// Distinct method references.
    pub max_method_refs: usize,
    /// Distinct field references.
    pub max_field_refs: usize,
    /// Distinct type references.
    pub max_type_refs: usize,
}

impl Default for DexLimits {
    fn default() -> Self {
        DexLimits {
            max_method_refs: 65536,
            max_field_refs: 65536,
            max_type_refs: 65536,
        }
    }
}

/// Counts the references of every dex and fails the pipeline when a dex is over its
/// limits.
#[derive(Debug, Default)]
pub struct DexLimitsCheckPass {
    limits: DexLimits,
}

impl DexLimitsCheckPass {
    /// A check with the default limits.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A check with custom limits.
    #[must_use]
    pub fn with_limits(limits: DexLimits) -> Self {
        DexLimitsCheckPass { limits }
    }
}

/// Distinct references of one dex.
#[derive(Debug, Clone, Default)]
pub(crate) struct RefCounts {
    pub(crate) methods: FxHashSet<MethodRef>,
    pub(crate) fields: FxHashSet<FieldRef>,
    pub(crate) types: FxHashSet<TypeRef>,
}

impl RefCounts {
    pub(crate) fn collect(scope: &Scope, classes: &[ClassId]) -> Self {
        let pool = scope.pool();
        let mut refs = RefCounts::default();
        for &cid in classes {
            let class = scope.class(cid);
            refs.types.insert(class.ty);
            refs.types.extend(class.super_class);
            refs.types.extend(class.interfaces.iter().copied());
            for field in class.fields() {
                refs.fields.insert(field.field);
            }
            for method in class.methods() {
                refs.methods.insert(method.method);
                let Some(code) = &method.code else {
                    continue;
                };
                for insn in code.insns() {
                    refs.add_insn(pool, insn);
                }
            }
        }
        refs
    }

    /// Adds the members and types `insn` names.
    pub(crate) fn add_insn(&mut self, pool: &Pool, insn: &IrInstruction) {
        if let Some(m) = insn.method() {
            self.methods.insert(m);
            self.types.insert(pool.method(m).owner);
        }
        if let Some(f) = insn.field() {
            self.fields.insert(f);
            self.types.insert(pool.field(f).owner);
        }
        if let Some(t) = insn.type_ref() {
            self.types.insert(t);
        }
    }

    /// Adds everything in `other`.
    pub(crate) fn extend(&mut self, other: &RefCounts) {
        self.methods.extend(other.methods.iter().copied());
        self.fields.extend(other.fields.iter().copied());
        self.types.extend(other.types.iter().copied());
    }

    /// The first kind of reference over `limits` once `added` and `extra_methods`
    /// further method references join, as (kind, count, limit).
    pub(crate) fn over(
        &self,
        added: &RefCounts,
        extra_methods: usize,
        limits: &DexLimits,
    ) -> Option<(&'static str, usize, usize)> {
        fn union<T: Eq + Hash>(have: &FxHashSet<T>, add: &FxHashSet<T>) -> usize {
            have.len() + add.iter().filter(|x| !have.contains(x)).count()
        }
        [
            (
                "method",
                union(&self.methods, &added.methods) + extra_methods,
                limits.max_method_refs,
            ),
            ("field", union(&self.fields, &added.fields), limits.max_field_refs),
            ("type", union(&self.types, &added.types), limits.max_type_refs),
        ]
        .into_iter()
        .find(|(_, count, limit)| count > limit)
    }
}

impl Pass for DexLimitsCheckPass {
    fn name(&self) -> &'static str {
        "DexLimitsCheckPass"
    }

    fn property_interactions(&self) -> PropertyInteractions {
        PropertyInteractions::new()
            .establishes(Property::DexLimitsObeyed)
            .preserve_all()
    }

    fn bind_config(&mut self, view: &ConfigView<'_>) -> Result<()> {
        self.limits = view.bind()?;
        Ok(())
    }

    fn preserved_analyses(&self) -> PreservedAnalyses {
        PreservedAnalyses::All
    }

    fn run(
        &mut self,
        scope: &mut Scope,
        _config: &Config,
        manager: &mut PassManager,
    ) -> Result<()> {
        for store in scope.stores() {
            for (index, classes) in store.dexes.iter().enumerate() {
                let refs = RefCounts::collect(scope, classes);
                let over = refs.over(&RefCounts::default(), 0, &self.limits);
                if let Some((kind, count, limit)) = over {
                    return Err(Error::PassFatal {
                        pass: self.name().to_string(),
                        reason: format!(
                            "dex {index} of store '{}' has {count} {kind} references, limit is {limit}",
                            store.name
                        ),
                    });
                }
                manager.incr_metric("dexes", 1);
                manager.incr_metric("method_refs", as_metric(refs.methods.len()));
            }
        }
        Ok(())
    }
}

/// Builds the class hierarchy once and publishes it for later passes.
#[derive(Debug, Default)]
pub struct TypeSystemAnalysisPass {
    result: Option<Arc<TypeSystem>>,
}

impl TypeSystemAnalysisPass {
    /// Creates the pass.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl Pass for TypeSystemAnalysisPass {
    fn name(&self) -> &'static str {
        "TypeSystemAnalysisPass"
    }

    fn property_interactions(&self) -> PropertyInteractions {
        PropertyInteractions::new().preserve_all()
    }

    fn preserved_analyses(&self) -> PreservedAnalyses {
        PreservedAnalyses::All
    }

    fn analysis_id(&self) -> Option<AnalysisId> {
        Some(TYPE_SYSTEM)
    }

    fn run(
        &mut self,
        scope: &mut Scope,
        _config: &Config,
        manager: &mut PassManager,
    ) -> Result<()> {
        let types = TypeSystem::new(scope);
        manager.incr_metric("classes", as_metric(scope.len()));
        self.result = Some(Arc::new(types));
        Ok(())
    }

    fn take_result(&mut self) -> Option<AnalysisResult> {
        self.result
            .take()
            .map(|types| types as AnalysisResult)
    }

    fn destroy_result(&mut self) {
        self.result = None;
    }
}

/// Finds static-initialiser cycles and publishes the classes on them.
///
/// A cycle is not an error: it is logged and counted, and passes that move code
/// between classes avoid the classes involved.
#[derive(Debug, Default)]
pub struct ClinitCycleAnalysisPass {
    result: Option<Arc<crate::analysis::ClinitCycles>>,
}

impl ClinitCycleAnalysisPass {
    /// Creates the pass.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl Pass for ClinitCycleAnalysisPass {
    fn name(&self) -> &'static str {
        "ClinitCycleAnalysisPass"
    }

    fn property_interactions(&self) -> PropertyInteractions {
        PropertyInteractions::new().preserve_all()
    }

    fn preserved_analyses(&self) -> PreservedAnalyses {
        PreservedAnalyses::All
    }

    fn analysis_id(&self) -> Option<AnalysisId> {
        Some(CLINIT_CYCLES)
    }

    fn run(
        &mut self,
        scope: &mut Scope,
        _config: &Config,
        manager: &mut PassManager,
    ) -> Result<()> {
        let graph = ClinitGraph::new(scope);
        let report = graph.cycle_report();
        if !report.is_empty() {
            log::warn!(
                "{} class initialization cycles across {} classes",
                report.cycles.len(),
                report.classes.len()
            );
        }
        manager.incr_metric("classes_with_clinit", as_metric(graph.len()));
        manager.incr_metric("cycles", as_metric(report.cycles.len()));
        self.result = Some(Arc::new(report));
        Ok(())
    }

    fn take_result(&mut self) -> Option<AnalysisResult> {
        self.result
            .take()
            .map(|report| report as AnalysisResult)
    }

    fn destroy_result(&mut self) {
        self.result = None;
    }
}

/// Lets a pass reuse a published analysis and fall back to computing it.
pub(crate) fn shared_or_else<T, F>(manager: &PassManager, id: AnalysisId, compute: F) -> Arc<T>
where
    T: std::any::Any + Send + Sync,
    F: FnOnce() -> T,
{
    manager
        .analysis::<T>(id)
        .unwrap_or_else(|| Arc::new(compute()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        analysis::ClinitCycles,
        ir::{AccessFlags, DexClass, Pool},
        pass::metrics::MetricSink,
    };

    fn scope_with(classes: &[&str]) -> Result<Scope> {
        let pool = Arc::new(Pool::new());
        let mut scope = Scope::new(Arc::clone(&pool));
        let store = scope.add_store("classes");
        let dex = scope.add_dex(store)?;
        for name in classes {
            let ty = pool.intern_type(name);
            let class = DexClass::new(ty, AccessFlags::PUBLIC, Some(pool.known().object));
            scope.add_class(store, dex, class)?;
        }
        Ok(scope)
    }

    #[test]
    fn dex_limits_abort_over_limit() -> Result<()> {
        let mut scope = scope_with(&["LA;", "LB;", "LC;"])?;
        let tight = DexLimits {
            max_type_refs: 2,
            ..DexLimits::default()
        };
        let mut manager = PassManager::new(
            vec![Box::new(DexLimitsCheckPass::with_limits(tight))],
            Arc::new(MetricSink::new()),
        );
        let err = manager.run(&mut scope, &Config::default()).unwrap_err();
        assert!(matches!(err, Error::PassFatal { ref pass, .. } if pass == "DexLimitsCheckPass"));

        let metrics = Arc::new(MetricSink::new());
        let mut manager = PassManager::new(
            vec![Box::new(DexLimitsCheckPass::new())],
            Arc::clone(&metrics),
        );
        manager.run(&mut scope, &Config::default())?;
        assert_eq!(metrics.get("DexLimitsCheckPass.dexes"), 1);
        Ok(())
    }

    /// Reads both published analyses.
    struct Consumer {
        seen: Arc<std::sync::Mutex<(bool, bool)>>,
    }

    impl Pass for Consumer {
        fn name(&self) -> &'static str {
            "Consumer"
        }

        fn property_interactions(&self) -> PropertyInteractions {
            PropertyInteractions::new().preserve_all()
        }

        fn required_analyses(&self) -> Vec<AnalysisId> {
            vec![TYPE_SYSTEM, CLINIT_CYCLES]
        }

        fn run(&mut self, _: &mut Scope, _: &Config, manager: &mut PassManager) -> Result<()> {
            let mut seen = self.seen.lock().unwrap();
            seen.0 = manager.analysis::<TypeSystem>(TYPE_SYSTEM).is_some();
            seen.1 = manager
                .analysis::<ClinitCycles>(CLINIT_CYCLES)
                .is_some_and(|c| c.is_empty());
            Ok(())
        }
    }

    #[test]
    fn analyses_are_published() -> Result<()> {
        let mut scope = scope_with(&["LA;"])?;
        let seen = Arc::new(std::sync::Mutex::new((false, false)));
        let mut manager = PassManager::new(
            vec![
                Box::new(TypeSystemAnalysisPass::new()),
                Box::new(ClinitCycleAnalysisPass::new()),
                Box::new(Consumer {
                    seen: Arc::clone(&seen),
                }),
            ],
            Arc::new(MetricSink::new()),
        );
        manager.run(&mut scope, &Config::default())?;
        assert_eq!(*seen.lock().unwrap(), (true, true));
        Ok(())
    }
}
