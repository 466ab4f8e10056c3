//! Instruction-sequence outlining.
//!
//! Sequences of instructions that repeat across method bodies are moved into static
//! helper methods and every occurrence is replaced by a call. The pass runs in
//! phases:
//!
//! 1. **Discovery** slides windows over the big blocks of every body and groups the
//!    outlinable ones by [`Fingerprint`] ([`find_candidates`]).
//! 2. **Selection** ranks fingerprints by estimated code-unit savings and claims
//!    non-overlapping occurrences greedily ([`select`]).
//! 3. **Typing** infers what each caller passes and derives a helper prototype that
//!    satisfies both the callers and the body ([`param_types`], [`result_type`]).
//! 4. **Placement** picks the class each helper is added to ([`Placer`]).
//! 5. **Rewriting** replaces each occurrence by an `invoke-static` ([`rewrite_site`]).
//! 6. **Materialisation** adds the helpers and any holder classes to the scope.
//!
//! Helpers carry switch positions so that a stack frame inside a helper maps back to
//! the line of the call site it was entered from; each call site carries the pattern
//! position selecting its own lines.
//!
//! # Example
//!
//! ```rust
//! use std::sync::Arc;
//!
//! use dexopt::{
//!     ir::{builder::CodeBuilder, instruction::IrInstruction, opcode::IrOpcode},
//!     ir::{AccessFlags, DexClass, DexMethod, Pool, Scope},
//!     opt::outliner::InstructionSequenceOutlinerPass,
//!     pass::{MetricSink, PassManager},
//!     Config,
//! };
//!
//! let pool = Arc::new(Pool::new());
//! let mut scope = Scope::new(Arc::clone(&pool));
//! let store = scope.add_store("classes");
//! let dex = scope.add_dex(store)?;
//! let foo = pool.intern_type("LFoo;");
//! let counter = pool.intern_field(foo, "counter", pool.known().int);
//! let mut class = DexClass::new(foo, AccessFlags::PUBLIC, Some(pool.known().object));
//! for i in 0..4 {
//!     let name = format!("m{i}");
//!     let m = pool.intern_method(foo, &name, pool.intern_proto(pool.known().void, &[]));
//!     let code = CodeBuilder::new(1)
//!         .insns((0..3).flat_map(|_| {
//!             [
//!                 IrInstruction::new(IrOpcode::Sget).with_dest(0).with_field(counter),
//!                 IrInstruction::binop_lit(IrOpcode::AddIntLit, 0, 0, 1),
//!                 IrInstruction::new(IrOpcode::Sput).with_srcs(&[0]).with_field(counter),
//!             ]
//!         }))
//!         .ret_void()
//!         .build();
//!     class.add_method(DexMethod::new(m, AccessFlags::PUBLIC | AccessFlags::STATIC, Some(code)))?;
//! }
//! scope.add_class(store, dex, class)?;
//!
//! let metrics = Arc::new(MetricSink::new());
//! let mut manager = PassManager::new(
//!     vec![Box::new(InstructionSequenceOutlinerPass::default())],
//!     Arc::clone(&metrics),
//! );
//! manager.run(&mut scope, &Config::default())?;
//! assert_eq!(metrics.get("InstructionSequenceOutlinerPass.outlined_methods"), 1);
//! # Ok::<(), dexopt::Error>(())
//! ```

mod candidate;
mod placement;
mod rewrite;
mod select;
mod signature;

use std::sync::Arc;

use dashmap::DashMap;
use rustc_hash::FxHashMap;
use serde::Deserialize;

use crate::{
    analysis::{ClinitCycles, ClinitGraph, TypeInference},
    config::{Config, ConfigView},
    ir::{
        position::DexPosition, scope::ClassLocation, AccessFlags, ClassId, DexMethod, MethodId,
        MethodRef, Pool, Scope, TypeRef, TypeSystem,
    },
    pass::{
        builtin::shared_or_else,
        manager::PassManager,
        metrics::as_metric,
        property::PropertyInteractions,
        traits::{Pass, PreservedAnalyses},
        DexLimits, CLINIT_CYCLES, TYPE_SYSTEM,
    },
    utils::prefix_set::{encode_set, PrefixSetView},
    Error, Result,
};

pub use candidate::{find_candidates, Fingerprint, Occurrence, WindowLimits};
pub use placement::{HolderClass, Host, Placer, Rejection, HELPER_PREFIX};
pub use rewrite::{helper_code, rewrite_site, CallSite};
pub use select::{estimate_savings, select, Group, Selection, HELPER_OVERHEAD_UNITS};
pub use signature::{observe, param_types, result_type, Observed};

/// Settings of [`InstructionSequenceOutlinerPass`].
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct InstructionSequenceOutlinerOptions {
    /// Shortest sequence considered.
    pub min_insns_size: usize,
    /// Longest sequence considered.
    pub max_insns_size: usize,
    /// A helper is created only if it saves more than this many code units.
    pub savings_threshold: i64,
    /// Helpers a single class may hold.
    pub max_outlined_methods_per_class: usize,
    /// Whether call sites in different dexes may share a helper.
    pub reuse_outlined_methods_across_dexes: bool,
    /// Classes whose descriptor starts with one of these are left alone.
    pub excluded_class_prefixes: Vec<String>,
    /// Verify every rewritten graph.
    pub debug_recheck: bool,
}

impl Default for InstructionSequenceOutlinerOptions {
    fn default() -> Self {
        InstructionSequenceOutlinerOptions {
            min_insns_size: 3,
            max_insns_size: 77,
            savings_threshold: 10,
            max_outlined_methods_per_class: 100,
            reuse_outlined_methods_across_dexes: true,
            excluded_class_prefixes: Vec::new(),
            debug_recheck: false,
        }
    }
}

/// Outlines repeated instruction sequences into static helpers.
#[derive(Debug, Default)]
pub struct InstructionSequenceOutlinerPass {
    options: InstructionSequenceOutlinerOptions,
}

/// A helper ready to be added to the scope.
struct PlannedHelper {
    host: Host,
    method: MethodRef,
    code: crate::ir::IrCode,
}

/// What discovery found in one method.
enum Discovered {
    Skipped,
    Malformed,
    Windows(usize),
}

/// Running totals reported as metrics.
#[derive(Debug, Default)]
struct Totals {
    candidates: usize,
    skipped_malformed: usize,
    methods: usize,
    call_sites: usize,
    instructions: usize,
    savings: i64,
    rejected_types: usize,
    inaccessible: usize,
    over_dex_limits: usize,
    new_classes: usize,
}

impl InstructionSequenceOutlinerPass {
    /// The pass with default settings.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The pass with custom settings.
    #[must_use]
    pub fn with_options(options: InstructionSequenceOutlinerOptions) -> Self {
        InstructionSequenceOutlinerPass { options }
    }

    /// The settings in use.
    #[must_use]
    pub fn options(&self) -> &InstructionSequenceOutlinerOptions {
        &self.options
    }

    /// Collects every candidate window of the scope, grouped by fingerprint.
    fn discover(
        &self,
        scope: &mut Scope,
        pool: &Pool,
        totals: &mut Totals,
    ) -> Result<Vec<(Fingerprint, Vec<Occurrence>)>> {
        let excluded = encode_set(&self.options.excluded_class_prefixes)?;
        let excluded = PrefixSetView::new(&excluded);
        let limits = WindowLimits {
            min_insns: self.options.min_insns_size.max(1),
            max_insns: self.options.max_insns_size,
        };
        let table: DashMap<Fingerprint, Vec<Occurrence>> = DashMap::new();

        let results = scope.par_walk_methods(|id, method| -> Result<Discovered> {
            let Some(code) = method.code.as_ref() else {
                return Ok(Discovered::Skipped);
            };
            let owner = pool.method(method.method).owner;
            if excluded.longest_prefix(pool.type_descriptor(owner))?.is_some()
                || pool.method_name(method.method).starts_with(HELPER_PREFIX)
            {
                return Ok(Discovered::Skipped);
            }
            let built;
            let cfg = match code.cfg() {
                Some(cfg) => cfg,
                None => {
                    let mut copy = code.clone();
                    if let Err(e) = copy.build_cfg(pool) {
                        if matches!(e, Error::MalformedBody { .. }) {
                            log::warn!("skipping {id}: {e}");
                            return Ok(Discovered::Malformed);
                        }
                        return Err(e);
                    }
                    built = copy;
                    let Some(cfg) = built.cfg() else {
                        return Ok(Discovered::Skipped);
                    };
                    cfg
                }
            };
            let found = find_candidates(id, cfg, pool, limits);
            let count = found.len();
            for (fingerprint, occurrence) in found {
                table.entry(fingerprint).or_default().push(occurrence);
            }
            Ok(Discovered::Windows(count))
        });
        for (_, result) in results {
            match result? {
                Discovered::Skipped => {}
                Discovered::Malformed => totals.skipped_malformed += 1,
                Discovered::Windows(n) => totals.candidates += n,
            }
        }
        Ok(table.into_iter().collect())
    }
}

impl Pass for InstructionSequenceOutlinerPass {
    fn name(&self) -> &'static str {
        "InstructionSequenceOutlinerPass"
    }

    // The placer keeps every dex within the limits `DexLimitsCheckPass` is configured with.
    fn property_interactions(&self) -> PropertyInteractions {
        PropertyInteractions::new().preserve_all()
    }

    fn bind_config(&mut self, view: &ConfigView<'_>) -> Result<()> {
        self.options = view.bind()?;
        Ok(())
    }

    fn preserved_analyses(&self) -> PreservedAnalyses {
        PreservedAnalyses::None
    }

    #[allow(clippy::too_many_lines)]
    fn run(
        &mut self,
        scope: &mut Scope,
        config: &Config,
        manager: &mut PassManager,
    ) -> Result<()> {
        let pool = scope.shared_pool();
        let dex_limits: DexLimits = config.view("DexLimitsCheckPass").bind()?;
        let types: Arc<TypeSystem> =
            shared_or_else(manager, TYPE_SYSTEM, || TypeSystem::new(scope));
        let cycles: Arc<ClinitCycles> =
            shared_or_else(manager, CLINIT_CYCLES, || ClinitGraph::new(scope).cycle_report());
        for cycle in &cycles.cycles {
            log::info!("not placing helpers on initialisation cycle: {cycle}");
        }
        let mut totals = Totals::default();

        let table = self.discover(scope, &pool, &mut totals)?;
        let selection = select(
            table,
            &pool,
            self.options.min_insns_size,
            self.options.savings_threshold,
        )?;
        manager.incr_metric("outliner_candidates", as_metric(totals.candidates));
        manager.incr_metric("outliner_groups", as_metric(selection.repeated));
        manager.incr_metric("outliner_rejected_overlap", as_metric(selection.rejected_overlap));
        if selection.groups.is_empty() {
            return Ok(());
        }

        let observed = observe_all(scope, &pool, &types, &selection.groups)?;

        let mut placer = Placer::new(
            scope,
            &types,
            &cycles,
            self.options.max_outlined_methods_per_class,
        )
        .with_dex_limits(dex_limits);
        let mut helpers: Vec<PlannedHelper> = Vec::new();
        let mut sites: FxHashMap<MethodId, Vec<CallSite>> = FxHashMap::default();
        for (gi, group) in selection.groups.iter().enumerate() {
            for part in partition(scope, group, self.options.reuse_outlined_methods_across_dexes) {
                let Some((helper, calls)) = plan_helper(
                    &PlanContext {
                        scope,
                        pool: &pool,
                        types: &types,
                        manager: &*manager,
                        options: &self.options,
                    },
                    &mut placer,
                    group,
                    &part,
                    |oi| observed.get(&(gi, oi)),
                    &mut totals,
                )?
                else {
                    continue;
                };
                for call in calls {
                    sites.entry(call.occurrence.method).or_default().push(call);
                }
                helpers.push(helper);
            }
        }
        let holders = placer.into_holders();

        let debug_recheck = self.options.debug_recheck;
        let name = self.name();
        let rewritten = scope.par_walk_methods(|id, method| -> Result<()> {
            let Some(calls) = sites.get(&id) else {
                return Ok(());
            };
            let Some(code) = method.code.as_mut() else {
                return Ok(());
            };
            let linear = !code.editable_cfg_built();
            if linear {
                code.build_cfg(&pool)?;
            }
            if let Some(cfg) = code.cfg_mut() {
                let mut ordered: Vec<&CallSite> = calls.iter().collect();
                ordered.sort_by(|a, b| {
                    (b.occurrence.big_block, b.occurrence.start)
                        .cmp(&(a.occurrence.big_block, a.occurrence.start))
                });
                for call in ordered {
                    rewrite_site(cfg, call)?;
                }
                cfg.simplify();
                if debug_recheck {
                    cfg.verify().map_err(|e| Error::PassFatal {
                        pass: name.to_string(),
                        reason: format!("{id} is inconsistent after outlining: {e}"),
                    })?;
                }
            }
            if linear {
                code.clear_cfg()?;
            }
            Ok(())
        });
        for (_, result) in rewritten {
            result?;
        }

        let mut holder_ids: Vec<ClassId> = Vec::with_capacity(holders.len());
        for holder in &holders {
            let id = scope.add_class_near(holder.near, holder.definition(&pool))?;
            log::debug!("added holder class {}", pool.type_descriptor(holder.ty));
            holder_ids.push(id);
        }
        totals.new_classes = holders.len();
        for helper in helpers {
            let class = match helper.host {
                Host::Existing(id) => id,
                Host::Synthetic(i) => holder_ids[i],
            };
            let access = AccessFlags::PUBLIC | AccessFlags::STATIC | AccessFlags::SYNTHETIC;
            scope
                .class_mut(class)
                .add_method(DexMethod::new(helper.method, access, Some(helper.code)))?;
        }

        log::info!(
            "outlined {} sequences at {} call sites, about {} code units saved",
            totals.methods,
            totals.call_sites,
            totals.savings
        );
        manager.incr_metric("outlined_methods", as_metric(totals.methods));
        manager.incr_metric("outlined_call_sites", as_metric(totals.call_sites));
        manager.incr_metric("outlined_instructions", as_metric(totals.instructions));
        manager.incr_metric("outliner_estimated_savings", totals.savings);
        manager.incr_metric("outliner_rejected_types", as_metric(totals.rejected_types));
        manager.incr_metric("outliner_inaccessible", as_metric(totals.inaccessible));
        manager.incr_metric("outliner_over_dex_limits", as_metric(totals.over_dex_limits));
        manager.incr_metric("outliner_new_classes", as_metric(totals.new_classes));
        manager.incr_metric("outliner_skipped_malformed", as_metric(totals.skipped_malformed));
        Ok(())
    }
}

/// Argument types of a method body's `load-param*` instructions.
fn incoming_types(pool: &Pool, method: &DexMethod) -> Vec<TypeRef> {
    let data = pool.method(method.method);
    let receiver = (!method.is_static()).then_some(data.owner);
    receiver
        .into_iter()
        .chain(pool.proto(data.proto).args.iter().copied())
        .collect()
}

/// Observes every committed occurrence, keyed by (group, occurrence) index.
fn observe_all(
    scope: &mut Scope,
    pool: &Pool,
    types: &TypeSystem,
    groups: &[Group],
) -> Result<FxHashMap<(usize, usize), Observed>> {
    let mut wanted: FxHashMap<MethodId, Vec<(usize, usize)>> = FxHashMap::default();
    for (gi, group) in groups.iter().enumerate() {
        for (oi, occ) in group.occurrences.iter().enumerate() {
            wanted.entry(occ.method).or_default().push((gi, oi));
        }
    }
    let results = scope.par_walk_methods(|id, method| -> Result<Vec<((usize, usize), Observed)>> {
        let Some(keys) = wanted.get(&id) else {
            return Ok(Vec::new());
        };
        let Some(code) = method.code.as_ref() else {
            return Ok(Vec::new());
        };
        let built;
        let cfg = match code.cfg() {
            Some(cfg) => cfg,
            None => {
                let mut copy = code.clone();
                copy.build_cfg(pool)?;
                built = copy;
                let Some(cfg) = built.cfg() else {
                    return Ok(Vec::new());
                };
                cfg
            }
        };
        let params = incoming_types(pool, method);
        let inferred = TypeInference::analyze(cfg, pool, Some(types), Some(&params))
            .or_else(|_| TypeInference::analyze(cfg, pool, Some(types), None))
            .ok();
        Ok(keys
            .iter()
            .map(|&(gi, oi)| {
                let occ = &groups[gi].occurrences[oi];
                ((gi, oi), observe(cfg, inferred.as_ref(), occ))
            })
            .collect())
    });
    let mut out = FxHashMap::default();
    for (_, result) in results {
        out.extend(result?);
    }
    Ok(out)
}

/// Occurrence indices of `group` that may share one helper: all of them, or one list
/// per dex when helpers are not shared across dexes.
fn partition(
    scope: &Scope,
    group: &Group,
    across_dexes: bool,
) -> Vec<(Option<ClassLocation>, Vec<usize>)> {
    if across_dexes {
        return vec![(None, (0..group.occurrences.len()).collect())];
    }
    let mut parts: Vec<(Option<ClassLocation>, Vec<usize>)> = Vec::new();
    for (oi, occ) in group.occurrences.iter().enumerate() {
        let at = Some(scope.location(occ.method.class));
        match parts.iter_mut().find(|(loc, _)| *loc == at) {
            Some((_, list)) => list.push(oi),
            None => parts.push((at, vec![oi])),
        }
    }
    parts
}

/// Read-only state shared by every helper plan.
struct PlanContext<'a> {
    scope: &'a Scope,
    pool: &'a Pool,
    types: &'a TypeSystem,
    manager: &'a PassManager,
    options: &'a InstructionSequenceOutlinerOptions,
}

/// Types, places and names the helper for the occurrences `part` of `group`, and
/// builds its body and call sites. `None` when the part is dropped.
fn plan_helper<'o>(
    cx: &PlanContext<'_>,
    placer: &mut Placer<'_>,
    group: &Group,
    part: &(Option<ClassLocation>, Vec<usize>),
    observed: impl Fn(usize) -> Option<&'o Observed>,
    totals: &mut Totals,
) -> Result<Option<(PlannedHelper, Vec<CallSite>)>> {
    let (dex, indices) = part;
    if indices.len() < 2 {
        return Ok(None);
    }
    let fp = &group.fingerprint;
    let savings = estimate_savings(fp, indices.len(), cx.pool)?;
    if savings <= cx.options.savings_threshold {
        return Ok(None);
    }
    let Some(seen) = indices.iter().map(|&oi| observed(oi)).collect::<Option<Vec<_>>>() else {
        totals.rejected_types += 1;
        return Ok(None);
    };
    let Some(params) = param_types(fp, &seen, cx.pool, cx.types) else {
        totals.rejected_types += 1;
        return Ok(None);
    };
    let Some(rtype) = result_type(fp, &params, &seen, cx.pool, cx.types) else {
        totals.rejected_types += 1;
        return Ok(None);
    };

    let callers: Vec<MethodId> = indices.iter().map(|&oi| group.occurrences[oi].method).collect();
    let mut proto_types = params.clone();
    proto_types.push(rtype);
    let host = match placer.place(fp, &proto_types, &callers, *dex) {
        Ok(host) => host,
        Err(Rejection::Inaccessible) => {
            totals.inaccessible += 1;
            return Ok(None);
        }
        Err(Rejection::DexLimits) => {
            totals.over_dex_limits += 1;
            return Ok(None);
        }
    };
    let host_ty = placer.host_type(host);
    let proto = cx.pool.intern_proto(rtype, &params);
    let base = format!("{HELPER_PREFIX}{:016x}", fp.stable_hash(cx.pool));
    let mut name = base.clone();
    let mut k = 0;
    while cx.pool.get_method(host_ty, &name, proto).is_some() {
        k += 1;
        name = format!("{base}${k}");
    }
    let method = cx.pool.intern_method(host_ty, &name, proto);
    log::debug!(
        "outlining {} instructions from {} call sites into {}",
        fp.len(),
        indices.len(),
        cx.pool.show_method(method)
    );

    let positions = cx.manager.positions();
    let mut switch = None;
    let mut call_positions: Vec<Option<Arc<DexPosition>>> = vec![None; indices.len()];
    if seen.iter().any(|o| o.has_positions()) {
        let patterns: Vec<_> = indices
            .iter()
            .zip(&seen)
            .map(|(&oi, o)| {
                let caller = cx.scope.method(group.occurrences[oi].method).method;
                let list = o
                    .positions
                    .iter()
                    .map(|p| {
                        p.clone()
                            .unwrap_or_else(|| Arc::new(DexPosition::new(Some(caller), None, 0)))
                    })
                    .collect();
                positions.make_pattern(list)
            })
            .collect();
        call_positions = patterns
            .iter()
            .map(|&p| Some(positions.pattern_position(p)))
            .collect();
        switch = Some(positions.make_switch(patterns));
    }
    let code = helper_code(fp, Some(method), switch.map(|s| (positions, s)));

    let result_kind = fp.result.map(|(_, kind)| kind);
    let calls = indices
        .iter()
        .zip(call_positions)
        .map(|(&oi, pattern)| CallSite {
            occurrence: group.occurrences[oi].clone(),
            helper: method,
            result_kind,
            pattern,
        })
        .collect::<Vec<_>>();

    totals.methods += 1;
    totals.call_sites += calls.len();
    totals.instructions += fp.len() * calls.len();
    totals.savings += savings;
    Ok(Some((
        PlannedHelper {
            host,
            method,
            code,
        },
        calls,
    )))
}
