//! Ordered execution of passes.

use std::{
    any::Any,
    sync::Arc,
    time::{Duration, Instant},
};

use rustc_hash::FxHashMap;

use crate::{
    config::{Config, DEFAULT_INITIAL_PROPERTIES},
    ir::{
        position::PositionPatternSwitchManager,
        printer::{show_cfg, show_entries},
        Scope,
    },
    pass::{
        metrics::MetricSink,
        property::{Property, PropertyState},
        registry::PassRegistry,
        traits::{AnalysisId, AnalysisResult, Pass},
    },
    Error, Result,
};

/// Pseudo pass name used when the end of the pipeline misses a final property.
const PIPELINE_END: &str = "<end of pipeline>";

/// Wall time of one executed pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PassTiming {
    /// The pass.
    pub pass: &'static str,
    /// Time spent in [`Pass::run`].
    pub elapsed: Duration,
}

/// Runs a pass list against a scope.
///
/// Before any pass runs, [`PassManager::validate`] replays the declarations of the
/// whole list: every required property must be established and every required analysis
/// live at the point the pass runs. During the run the manager tracks property state,
/// publishes and invalidates analysis results, and owns the metric sink and the
/// position pattern/switch registry that passes share.
pub struct PassManager {
    passes: Vec<Box<dyn Pass>>,
    initial_properties: Vec<Property>,
    final_properties: Vec<Property>,
    properties: PropertyState,
    analyses: FxHashMap<AnalysisId, (usize, AnalysisResult)>,
    metrics: Arc<MetricSink>,
    positions: PositionPatternSwitchManager,
    current: Option<&'static str>,
    timings: Vec<PassTiming>,
    verify_cfg_edits: bool,
}

impl PassManager {
    /// A manager for `passes` with the default initial properties and no final
    /// requirements.
    #[must_use]
    pub fn new(passes: Vec<Box<dyn Pass>>, metrics: Arc<MetricSink>) -> Self {
        PassManager {
            passes,
            initial_properties: DEFAULT_INITIAL_PROPERTIES.to_vec(),
            final_properties: Vec::new(),
            properties: PropertyState::new(&DEFAULT_INITIAL_PROPERTIES),
            analyses: FxHashMap::default(),
            metrics,
            positions: PositionPatternSwitchManager::new(),
            current: None,
            timings: Vec::new(),
            verify_cfg_edits: false,
        }
    }

    /// Instantiates the configured passes through `registry` and binds their options.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] for an unknown pass or property name, or an option of
    /// the wrong type.
    pub fn from_config(
        registry: &PassRegistry,
        config: &Config,
        metrics: Arc<MetricSink>,
    ) -> Result<Self> {
        let mut passes = Vec::new();
        for name in config.passes()? {
            let mut pass = registry.create(&name)?;
            pass.bind_config(&config.view(pass.name()))?;
            passes.push(pass);
        }
        let initial = config.initial_properties()?;
        Ok(PassManager::new(passes, metrics)
            .with_initial_properties(&initial)
            .with_final_properties(&config.final_properties()?)
            .with_cfg_verification(config.verify_cfg_edits()))
    }

    /// Replaces the properties established before the first pass.
    #[must_use]
    pub fn with_initial_properties(mut self, properties: &[Property]) -> Self {
        self.initial_properties = properties.to_vec();
        self.properties = PropertyState::new(properties);
        self
    }

    /// Sets the properties that must be established when the pipeline ends.
    #[must_use]
    pub fn with_final_properties(mut self, properties: &[Property]) -> Self {
        self.final_properties = properties.to_vec();
        self
    }

    /// Rechecks every method body after each pass.
    #[must_use]
    pub fn with_cfg_verification(mut self, enabled: bool) -> Self {
        self.verify_cfg_edits = enabled;
        self
    }

    /// Names of the passes, in order.
    #[must_use]
    pub fn pass_names(&self) -> Vec<&'static str> {
        self.passes.iter().map(|p| p.name()).collect()
    }

    /// Checks the declarations of the pass list without running anything.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnsatisfiedRequirement`] naming the first pass whose required
    /// property is not established, or whose required analysis is not live, at its
    /// position; or the first final property that does not hold at the end.
    pub fn validate(&self) -> Result<()> {
        let mut state = PropertyState::new(&self.initial_properties);
        let mut live: Vec<AnalysisId> = Vec::new();
        for pass in &self.passes {
            let interactions = pass.property_interactions();
            if let Some(missing) = state.first_unsatisfied(&interactions) {
                return Err(Error::UnsatisfiedRequirement {
                    pass: pass.name().to_string(),
                    requirement: missing.to_string(),
                });
            }
            if let Some(missing) = pass
                .required_analyses()
                .into_iter()
                .find(|id| !live.contains(id))
            {
                return Err(Error::UnsatisfiedRequirement {
                    pass: pass.name().to_string(),
                    requirement: missing.to_string(),
                });
            }
            state.apply(&interactions);
            let preserved = pass.preserved_analyses();
            live.retain(|id| preserved.keeps(id));
            if let Some(id) = pass.analysis_id() {
                if !live.contains(&id) {
                    live.push(id);
                }
            }
        }
        if let Some(missing) = self
            .final_properties
            .iter()
            .find(|p| !state.is_established(**p))
        {
            return Err(Error::UnsatisfiedRequirement {
                pass: PIPELINE_END.to_string(),
                requirement: missing.to_string(),
            });
        }
        Ok(())
    }

    /// Validates the pass list, then runs every pass in order.
    ///
    /// # Errors
    ///
    /// Returns the validation error before any pass runs, or the first error a pass
    /// reports, which aborts the pipeline.
    pub fn run(&mut self, scope: &mut Scope, config: &Config) -> Result<()> {
        self.validate()?;
        self.properties = PropertyState::new(&self.initial_properties);
        self.analyses.clear();
        self.timings.clear();

        let mut passes = std::mem::take(&mut self.passes);
        let outcome = self.run_passes(&mut passes, scope, config);
        self.passes = passes;
        self.current = None;
        self.analyses.clear();

        if outcome.is_ok() {
            let established: Vec<String> = self
                .properties
                .iter()
                .filter(|(_, s)| *s == crate::pass::PropertyStatus::Established)
                .map(|(p, _)| p.to_string())
                .collect();
            log::info!("pipeline finished; established: {}", established.join(", "));
        }
        outcome
    }

    fn run_passes(
        &mut self,
        passes: &mut [Box<dyn Pass>],
        scope: &mut Scope,
        config: &Config,
    ) -> Result<()> {
        for index in 0..passes.len() {
            let pass = &mut passes[index];
            let name = pass.name();
            let interactions = pass.property_interactions();
            let prefix = format!("{name}.");
            let before: FxHashMap<String, i64> =
                self.metrics.with_prefix(&prefix).into_iter().collect();

            self.current = Some(name);
            log::info!("running {name}");
            let start = Instant::now();
            pass.run(scope, config, self)?;
            let elapsed = start.elapsed();

            let published = pass
                .analysis_id()
                .and_then(|id| pass.take_result().map(|result| (id, result)));
            let preserved = pass.preserved_analyses();

            if self.verify_cfg_edits {
                verify_bodies(scope, name)?;
            }
            self.properties.apply(&interactions);

            let dropped: Vec<AnalysisId> = self
                .analyses
                .keys()
                .copied()
                .filter(|id| !preserved.keeps(id))
                .collect();
            for id in dropped {
                if let Some((producer, _)) = self.analyses.remove(id) {
                    log::debug!("{name} invalidates analysis {id}");
                    passes[producer].destroy_result();
                }
            }
            if let Some((id, result)) = published {
                self.analyses.insert(id, (index, result));
            }

            for (counter, value) in self.metrics.with_prefix(&prefix) {
                let delta = value - before.get(&counter).copied().unwrap_or(0);
                if delta != 0 {
                    log::info!("  {counter}: {delta}");
                }
            }
            log::info!("finished {name} in {:.3}s", elapsed.as_secs_f64());
            self.timings.push(PassTiming {
                pass: name,
                elapsed,
            });
        }
        Ok(())
    }

    /// The live result published under `id`, if it has type `T`.
    #[must_use]
    pub fn analysis<T: Any + Send + Sync>(&self, id: AnalysisId) -> Option<Arc<T>> {
        let (_, result) = self.analyses.get(id)?;
        Arc::clone(result).downcast::<T>().ok()
    }

    /// `true` if a result is published under `id`.
    #[must_use]
    pub fn has_analysis(&self, id: AnalysisId) -> bool {
        self.analyses.contains_key(id)
    }

    /// Adds `delta` to the counter `name` of the running pass.
    pub fn incr_metric(&self, name: &str, delta: i64) {
        match self.current {
            Some(pass) => self.metrics.incr(&format!("{pass}.{name}"), delta),
            None => self.metrics.incr(name, delta),
        }
    }

    /// The metric sink.
    #[must_use]
    pub fn metrics(&self) -> &Arc<MetricSink> {
        &self.metrics
    }

    /// The position pattern/switch registry.
    #[must_use]
    pub fn positions(&self) -> &PositionPatternSwitchManager {
        &self.positions
    }

    /// Property state: the initial state before [`PassManager::run`], the final state
    /// after it.
    #[must_use]
    pub fn properties(&self) -> &PropertyState {
        &self.properties
    }

    /// Timings of the last run.
    #[must_use]
    pub fn timings(&self) -> &[PassTiming] {
        &self.timings
    }

    /// The pass currently running.
    #[must_use]
    pub fn current_pass(&self) -> Option<&'static str> {
        self.current
    }
}

impl std::fmt::Debug for PassManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PassManager")
            .field("passes", &self.pass_names())
            .field("properties", &self.properties)
            .field("analyses", &self.analyses.keys().collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}

/// Structural recheck of every body after a pass.
fn verify_bodies(scope: &Scope, pass: &str) -> Result<()> {
    let pool = scope.pool();
    let fatal = |id: crate::ir::MethodId, err: &Error| Error::PassFatal {
        pass: pass.to_string(),
        reason: format!(
            "{id} ({}) is inconsistent: {err}",
            pool.show_method(scope.method(id).method)
        ),
    };
    for id in scope.method_ids() {
        let Some(code) = &scope.method(id).code else {
            continue;
        };
        let checked = match code.cfg() {
            Some(cfg) => cfg.verify(),
            None => {
                let mut copy = code.clone();
                copy.build_cfg(pool)
                    .and_then(|()| copy.cfg().map_or(Ok(()), |cfg| cfg.verify()))
            }
        };
        if let Err(e) = checked {
            let listing = match code.cfg() {
                Some(cfg) => show_cfg(cfg, pool),
                None => show_entries(code.entries(), pool),
            };
            log::debug!("inconsistent body after {pass}:\n{listing}");
            return Err(fatal(id, &e));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;
    use crate::{
        ir::Pool,
        pass::{PreservedAnalyses, PropertyInteractions, PropertyStatus},
    };

    /// A configurable test pass.
    struct Recorder {
        name: &'static str,
        produces: Option<AnalysisId>,
        requires: Vec<AnalysisId>,
        preserves: PreservedAnalyses,
        interactions: PropertyInteractions,
        seen: Arc<Mutex<Vec<String>>>,
    }

    impl Recorder {
        fn new(name: &'static str, seen: &Arc<Mutex<Vec<String>>>) -> Self {
            Recorder {
                name,
                produces: None,
                requires: Vec::new(),
                preserves: PreservedAnalyses::None,
                interactions: PropertyInteractions::new().preserve_all(),
                seen: Arc::clone(seen),
            }
        }
    }

    impl Pass for Recorder {
        fn name(&self) -> &'static str {
            self.name
        }

        fn property_interactions(&self) -> PropertyInteractions {
            self.interactions.clone()
        }

        fn required_analyses(&self) -> Vec<AnalysisId> {
            self.requires.clone()
        }

        fn preserved_analyses(&self) -> PreservedAnalyses {
            self.preserves.clone()
        }

        fn analysis_id(&self) -> Option<AnalysisId> {
            self.produces
        }

        fn run(
            &mut self,
            _scope: &mut Scope,
            _config: &Config,
            manager: &mut PassManager,
        ) -> Result<()> {
            for id in &self.requires {
                let value = manager.analysis::<u32>(id);
                self.seen
                    .lock()
                    .unwrap()
                    .push(format!("{} sees {id}={value:?}", self.name));
            }
            manager.incr_metric("runs", 1);
            Ok(())
        }

        fn take_result(&mut self) -> Option<AnalysisResult> {
            self.produces.map(|_| Arc::new(42_u32) as AnalysisResult)
        }

        fn destroy_result(&mut self) {
            self.seen.lock().unwrap().push(format!("{} destroyed", self.name));
        }
    }

    #[test]
    fn results_flow_and_are_destroyed() -> Result<()> {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let mut a = Recorder::new("A", &seen);
        a.produces = Some("answer");
        let mut b = Recorder::new("B", &seen);
        b.requires = vec!["answer"];
        b.preserves = PreservedAnalyses::Only(vec!["answer"]);
        let c = Recorder::new("C", &seen);

        let metrics = Arc::new(MetricSink::new());
        let mut manager =
            PassManager::new(vec![Box::new(a), Box::new(b), Box::new(c)], Arc::clone(&metrics));
        let mut scope = Scope::new(Arc::new(Pool::new()));
        manager.run(&mut scope, &Config::default())?;

        assert_eq!(
            *seen.lock().unwrap(),
            vec!["B sees answer=Some(42)".to_string(), "A destroyed".to_string()]
        );
        assert_eq!(metrics.get("A.runs"), 1);
        assert_eq!(metrics.get("C.runs"), 1);
        assert_eq!(manager.timings().len(), 3);
        Ok(())
    }

    #[test]
    fn property_requirements_are_checked_statically() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let mut breaker = Recorder::new("Breaker", &seen);
        breaker.interactions = PropertyInteractions::new().destroys(Property::HasSourceBlocks);
        let mut needs = Recorder::new("Needs", &seen);
        needs.interactions = PropertyInteractions::new()
            .requires(Property::HasSourceBlocks)
            .preserve_all();

        let mut manager = PassManager::new(
            vec![Box::new(breaker), Box::new(needs)],
            Arc::new(MetricSink::new()),
        );
        let mut scope = Scope::new(Arc::new(Pool::new()));
        let err = manager.run(&mut scope, &Config::default()).unwrap_err();
        assert!(matches!(
            err,
            Error::UnsatisfiedRequirement { ref pass, ref requirement }
                if pass == "Needs" && requirement == "HasSourceBlocks"
        ));
        assert!(manager.timings().is_empty());
    }

    #[test]
    fn final_properties_and_default_destroy() -> Result<()> {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let mut plain = Recorder::new("Plain", &seen);
        plain.interactions = PropertyInteractions::new().preserves(Property::DexLimitsObeyed);
        let metrics = Arc::new(MetricSink::new());

        let manager = PassManager::new(vec![Box::new(plain)], Arc::clone(&metrics))
            .with_final_properties(&[Property::HasSourceBlocks]);
        assert!(matches!(
            manager.validate(),
            Err(Error::UnsatisfiedRequirement { ref pass, .. }) if pass == PIPELINE_END
        ));

        let mut plain = Recorder::new("Plain", &seen);
        plain.interactions = PropertyInteractions::new().preserves(Property::DexLimitsObeyed);
        let mut manager = PassManager::new(vec![Box::new(plain)], metrics)
            .with_final_properties(&[Property::DexLimitsObeyed]);
        let mut scope = Scope::new(Arc::new(Pool::new()));
        manager.run(&mut scope, &Config::default())?;
        assert!(manager.properties().is_established(Property::DexLimitsObeyed));
        assert_eq!(
            manager.properties().status(Property::HasSourceBlocks),
            PropertyStatus::Destroyed
        );
        Ok(())
    }
}
