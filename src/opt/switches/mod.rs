//! Sparse-switch reduction.
//!
//! A sparse switch (case keys spread over more than twice their count) is looked up by
//! binary search at run time. [`ReduceSparseSwitchesPass`] replaces such switches by
//! cheaper dispatch, trying per switch, in order:
//!
//! 1. **Trivial collapse**: cases that go where the default goes are dropped; a switch
//!    left without cases disappears, one left with a single case becomes an `if-eq`.
//! 2. **Expansion**: a small switch becomes a chain of `const`/`if-eq` pairs, reusing
//!    one scratch register re-based by `add-int/lit` between keys.
//! 3. **Splitting**: dense runs of keys are hoisted into packed switches placed in front
//!    of a residual sparse switch.
//! 4. **Multiplexing**: a large switch dispatches on `(selector >> s) & (M - 1)` to one
//!    small inner test per bucket.
//!
//! For every selector value the rewritten code reaches the block the original switch
//! reached. A rewrite that needs a register or literal beyond what the container can
//! encode is abandoned and counted.
//!
//! # Example
//!
//! ```rust
//! use dexopt::{
//!     ir::{builder::CodeBuilder, opcode::RegKind, Pool},
//!     opt::switches::{ReduceSparseSwitchesOptions, SwitchReducer},
//! };
//!
//! let pool = Pool::new();
//! let mut b = CodeBuilder::new(1);
//! let (l0, l1) = (b.new_label(), b.new_label());
//! let mut code = b
//!     .load_param(RegKind::Narrow, 0)
//!     .switch(0, &[(0, l0), (1000, l1)])
//!     .ret_void()
//!     .target(l0)
//!     .ret_void()
//!     .target(l1)
//!     .ret_void()
//!     .build();
//! code.build_cfg(&pool)?;
//!
//! let options = ReduceSparseSwitchesOptions::default();
//! let mut reducer = SwitchReducer::new(&pool, &options);
//! if let Some(cfg) = code.cfg_mut() {
//!     reducer.run(cfg)?;
//! }
//! assert_eq!(reducer.stats().get("expanded_transformations"), 1);
//! # Ok::<(), dexopt::Error>(())
//! ```

mod plan;
mod reducer;

use serde::Deserialize;

use crate::{
    config::{Config, ConfigView},
    ir::Scope,
    pass::{
        manager::PassManager,
        property::PropertyInteractions,
        traits::{Pass, PreservedAnalyses},
        CLINIT_CYCLES, TYPE_SYSTEM,
    },
    Error, Result,
};

pub use plan::{
    bucket_count, max_segments, packed_runs, plan_multiplexing, split_segments, MultiplexPlan,
};
pub use reducer::{ReductionStats, SwitchReducer};

/// Thresholds of [`ReduceSparseSwitchesPass`].
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ReduceSparseSwitchesOptions {
    /// Sparse switches with at most this many cases become if-chains.
    pub max_expanded_switch_cases: usize,
    /// Sparse switches need at least this many cases to be split.
    pub min_splitting_switch_cases: usize,
    /// Sparse switches need at least this many cases to be multiplexed.
    pub min_multiplexing_switch_cases: usize,
    /// Rounds per method before giving up on a fixed point.
    pub max_iterations: usize,
}

impl Default for ReduceSparseSwitchesOptions {
    fn default() -> Self {
        ReduceSparseSwitchesOptions {
            max_expanded_switch_cases: 3,
            min_splitting_switch_cases: 10,
            min_multiplexing_switch_cases: 32,
            max_iterations: 8,
        }
    }
}

/// Runs a [`SwitchReducer`] over every method that contains a switch.
#[derive(Debug, Default)]
pub struct ReduceSparseSwitchesPass {
    options: ReduceSparseSwitchesOptions,
}

impl ReduceSparseSwitchesPass {
    /// The pass with default thresholds.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The pass with custom thresholds.
    #[must_use]
    pub fn with_options(options: ReduceSparseSwitchesOptions) -> Self {
        ReduceSparseSwitchesPass { options }
    }

    /// The thresholds in use.
    #[must_use]
    pub fn options(&self) -> &ReduceSparseSwitchesOptions {
        &self.options
    }
}

impl Pass for ReduceSparseSwitchesPass {
    fn name(&self) -> &'static str {
        "ReduceSparseSwitchesPass"
    }

    fn property_interactions(&self) -> PropertyInteractions {
        PropertyInteractions::new().preserve_all()
    }

    fn bind_config(&mut self, view: &ConfigView<'_>) -> Result<()> {
        self.options = view.bind()?;
        Ok(())
    }

    fn preserved_analyses(&self) -> PreservedAnalyses {
        PreservedAnalyses::Only(vec![TYPE_SYSTEM, CLINIT_CYCLES])
    }

    fn run(
        &mut self,
        scope: &mut Scope,
        _config: &Config,
        manager: &mut PassManager,
    ) -> Result<()> {
        let pool = scope.shared_pool();
        let options = &self.options;
        let results = scope.par_walk_methods(|id, method| -> Result<Option<ReductionStats>> {
            let Some(code) = method.code.as_mut() else {
                return Ok(None);
            };
            if !code.insns().any(|i| i.opcode().is_switch()) {
                return Ok(None);
            }
            let linear = !code.editable_cfg_built();
            if linear {
                if let Err(e) = code.build_cfg(&pool) {
                    if matches!(e, Error::MalformedBody { .. }) {
                        log::warn!("skipping {id}: {e}");
                        let mut stats = ReductionStats::default();
                        stats.bump("skipped_malformed", 1);
                        return Ok(Some(stats));
                    }
                    return Err(e);
                }
            }
            let mut reducer = SwitchReducer::new(&pool, options);
            if let Some(cfg) = code.cfg_mut() {
                reducer.run(cfg)?;
            }
            if linear {
                code.clear_cfg()?;
            }
            Ok(Some(reducer.into_stats()))
        });

        let mut total = ReductionStats::default();
        for (_, result) in results {
            if let Some(stats) = result? {
                total.merge(&stats);
            }
        }
        for (name, value) in total.iter() {
            manager.incr_metric(name, value);
        }
        Ok(())
    }
}
