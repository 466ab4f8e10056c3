//! Rewriting the switch blocks of one CFG.

use std::collections::BTreeMap;

use crate::{
    cfg::{Block, BlockId, ControlFlowGraph, EdgeId, EdgeKind, InsnPos},
    ir::{
        encoding,
        instruction::{IrInstruction, Reg},
        opcode::IrOpcode,
        Pool,
    },
    opt::switches::{
        plan::{plan_multiplexing, split_segments},
        ReduceSparseSwitchesOptions,
    },
    pass::metrics::as_metric,
    Error, Result,
};

/// Counters of one reduction, keyed by metric name.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReductionStats {
    counters: BTreeMap<String, i64>,
}

impl ReductionStats {
    /// Adds `delta` to `name`.
    pub fn bump(&mut self, name: &str, delta: i64) {
        *self.counters.entry(name.to_string()).or_default() += delta;
    }

    /// The value of `name`; zero if it was never bumped.
    #[must_use]
    pub fn get(&self, name: &str) -> i64 {
        self.counters.get(name).copied().unwrap_or(0)
    }

    /// Adds every counter of `other`.
    pub fn merge(&mut self, other: &ReductionStats) {
        for (name, value) in &other.counters {
            self.bump(name, *value);
        }
    }

    /// Counters in name order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, i64)> {
        self.counters.iter().map(|(k, v)| (k.as_str(), *v))
    }

    /// `true` if nothing was counted.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.counters.is_empty()
    }
}

#[derive(Debug, Clone, Copy)]
struct Case {
    key: i32,
    edge: EdgeId,
    target: BlockId,
}

/// Where control goes from a rewritten block.
#[derive(Debug, Clone, Copy)]
enum Target {
    Block(BlockId),
    Stage(usize),
}

/// One block of a rewritten dispatch. Stage 0 reuses the switch block.
#[derive(Debug)]
struct Stage {
    insns: Vec<IrInstruction>,
    edges: Vec<(EdgeKind, Target)>,
    fallthrough: Target,
}

impl Stage {
    fn switch(selector: Reg, cases: &[Case], fallthrough: Target) -> Self {
        Stage {
            insns: vec![IrInstruction::new(IrOpcode::Switch).with_srcs(&[selector])],
            edges: cases
                .iter()
                .map(|c| (EdgeKind::Branch(Some(c.key)), Target::Block(c.target)))
                .collect(),
            fallthrough,
        }
    }
}

/// The instructions branching when `selector == key`, loading non-zero keys into
/// `scratch`. `scratch_value` tracks what `scratch` holds on this path so the next key can be
/// reached with an `add-int/lit`.
fn eq_test(
    selector: Reg,
    key: i32,
    scratch: Reg,
    scratch_value: &mut Option<i32>,
) -> Vec<IrInstruction> {
    if key == 0 {
        return vec![IrInstruction::if_testz(IrOpcode::IfEqz, selector)];
    }
    let delta =
        scratch_value.and_then(|held| i16::try_from(i64::from(key) - i64::from(held)).ok());
    let load = match delta {
        Some(delta) => {
            IrInstruction::binop_lit(IrOpcode::AddIntLit, scratch, scratch, i32::from(delta))
        }
        None => IrInstruction::const_(scratch, key),
    };
    *scratch_value = Some(key);
    vec![load, IrInstruction::if_test(IrOpcode::IfEq, selector, scratch)]
}

/// Applies the switch transformations to every switch of a CFG until nothing changes.
///
/// Each switch is first cleaned of cases that go where the default goes. What is left
/// of a sparse switch is then expanded into an if-chain, split into packed segments
/// plus a sparse residue, or multiplexed over a hash of the selector, depending on its
/// size. Blocks created by one round are revisited in the next, so a residue or an
/// inner bucket switch can itself be reduced.
pub struct SwitchReducer<'a> {
    pool: &'a Pool,
    options: &'a ReduceSparseSwitchesOptions,
    stats: ReductionStats,
}

impl<'a> SwitchReducer<'a> {
    /// A reducer with the given thresholds.
    #[must_use]
    pub fn new(pool: &'a Pool, options: &'a ReduceSparseSwitchesOptions) -> Self {
        SwitchReducer {
            pool,
            options,
            stats: ReductionStats::default(),
        }
    }

    /// Counters so far.
    #[must_use]
    pub fn stats(&self) -> &ReductionStats {
        &self.stats
    }

    /// Consumes the reducer, returning its counters.
    #[must_use]
    pub fn into_stats(self) -> ReductionStats {
        self.stats
    }

    /// Reduces `cfg` to a fixed point, at most `max_iterations` rounds. Returns the
    /// number of rounds that changed something.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidEdit`] if an edit breaks a CFG invariant.
    pub fn run(&mut self, cfg: &mut ControlFlowGraph) -> Result<usize> {
        for round in 0..self.options.max_iterations {
            if !self.reduce_once(cfg)? {
                return Ok(round);
            }
        }
        Ok(self.options.max_iterations)
    }

    /// One round over the switches present at its start.
    ///
    /// # Errors
    ///
    /// See [`SwitchReducer::run`].
    pub fn reduce_once(&mut self, cfg: &mut ControlFlowGraph) -> Result<bool> {
        let switches: Vec<BlockId> = cfg
            .blocks()
            .filter(|b| b.last_insn().is_some_and(|i| i.opcode().is_switch()))
            .map(Block::id)
            .collect();
        let mut changed = false;
        for block in switches {
            changed |= self.reduce_switch(cfg, block)?;
        }
        Ok(changed)
    }

    fn reduce_switch(&mut self, cfg: &mut ControlFlowGraph, block: BlockId) -> Result<bool> {
        let Some(pos) = cfg.last_insn_pos(block) else {
            return Ok(false);
        };
        let selector = cfg.insn(pos).and_then(|i| i.src(0));
        let (Some(selector), Some(default)) = (selector, cfg.goto_target(block)) else {
            return Ok(false);
        };
        let mut cases: Vec<Case> = cfg
            .succs(block)
            .filter_map(|(edge, e)| match e.kind() {
                EdgeKind::Branch(Some(key)) => Some(Case {
                    key,
                    edge,
                    target: e.target(),
                }),
                _ => None,
            })
            .collect();
        cases.sort_by_key(|c| c.key);

        let (trivial, live): (Vec<Case>, Vec<Case>) =
            cases.into_iter().partition(|c| c.target == default);
        for case in &trivial {
            cfg.remove_edge(case.edge)?;
        }
        let mut changed = !trivial.is_empty();
        if changed {
            self.stats
                .bump("removed_trivial_switch_cases", as_metric(trivial.len()));
        }
        let cases = live;

        match cases.as_slice() {
            [] => {
                cfg.remove_insn(pos)?;
                self.stats.bump("removed_trivial_switches", 1);
                return Ok(true);
            }
            [single] => {
                changed |= self.convert_single(cfg, block, pos, selector, default, *single)?;
                return Ok(changed);
            }
            _ => {}
        }

        let keys: Vec<i32> = cases.iter().map(|c| c.key).collect();
        if encoding::is_packed(&keys) {
            return Ok(changed);
        }
        let n = keys.len();
        let options = self.options;
        if n <= options.max_expanded_switch_cases {
            changed |= self.expand(cfg, block, pos, selector, default, &cases)?;
        } else if n >= options.min_splitting_switch_cases && !split_segments(&keys).is_empty() {
            changed |= self.split(cfg, block, pos, selector, default, &cases)?;
        } else if n >= options.min_multiplexing_switch_cases {
            changed |= self.multiplex(cfg, block, pos, selector, default, &cases)?;
        }
        Ok(changed)
    }

    fn convert_single(
        &mut self,
        cfg: &mut ControlFlowGraph,
        block: BlockId,
        pos: InsnPos,
        selector: Reg,
        default: BlockId,
        case: Case,
    ) -> Result<bool> {
        let saved = cfg.registers_size();
        let scratch = if case.key == 0 {
            0
        } else {
            match self.scratch(cfg)? {
                Some(r) => r,
                None => return Ok(false),
            }
        };
        let stage = Stage {
            insns: eq_test(selector, case.key, scratch, &mut None),
            edges: vec![(EdgeKind::Branch(None), Target::Block(case.target))],
            fallthrough: Target::Block(default),
        };
        if !self.commit(cfg, block, pos, saved, vec![stage])? {
            return Ok(false);
        }
        self.stats.bump("converted_single_case_switches", 1);
        Ok(true)
    }

    fn expand(
        &mut self,
        cfg: &mut ControlFlowGraph,
        block: BlockId,
        pos: InsnPos,
        selector: Reg,
        default: BlockId,
        cases: &[Case],
    ) -> Result<bool> {
        let saved = cfg.registers_size();
        let scratch = if cases.iter().all(|c| c.key == 0) {
            0
        } else {
            match self.scratch(cfg)? {
                Some(r) => r,
                None => return Ok(false),
            }
        };
        let mut held = None;
        let last = cases.len() - 1;
        let stages = cases
            .iter()
            .enumerate()
            .map(|(i, case)| Stage {
                insns: eq_test(selector, case.key, scratch, &mut held),
                edges: vec![(EdgeKind::Branch(None), Target::Block(case.target))],
                fallthrough: if i == last {
                    Target::Block(default)
                } else {
                    Target::Stage(i + 1)
                },
            })
            .collect();
        if !self.commit(cfg, block, pos, saved, stages)? {
            return Ok(false);
        }
        self.stats.bump("expanded_transformations", 1);
        self.stats.bump("expanded_switch_cases", as_metric(cases.len()));
        Ok(true)
    }

    fn split(
        &mut self,
        cfg: &mut ControlFlowGraph,
        block: BlockId,
        pos: InsnPos,
        selector: Reg,
        default: BlockId,
        cases: &[Case],
    ) -> Result<bool> {
        let keys: Vec<i32> = cases.iter().map(|c| c.key).collect();
        let segments = split_segments(&keys);
        let mut residue: Vec<Case> = Vec::new();
        let mut next = 0;
        for segment in &segments {
            residue.extend_from_slice(&cases[next..segment.start]);
            next = segment.end;
        }
        residue.extend_from_slice(&cases[next..]);

        let mut groups: Vec<&[Case]> = segments.iter().map(|s| &cases[s.clone()]).collect();
        if !residue.is_empty() {
            groups.push(&residue);
        }
        let last = groups.len() - 1;
        let stages = groups
            .iter()
            .enumerate()
            .map(|(i, group)| {
                let fallthrough = if i == last {
                    Target::Block(default)
                } else {
                    Target::Stage(i + 1)
                };
                Stage::switch(selector, group, fallthrough)
            })
            .collect();
        let saved = cfg.registers_size();
        if !self.commit(cfg, block, pos, saved, stages)? {
            return Ok(false);
        }
        let packed: usize = segments.iter().map(ExactSizeIterator::len).sum();
        self.stats.bump("splitting_transformations", 1);
        self.stats
            .bump("splitting_transformations_packed_segments", as_metric(segments.len()));
        self.stats
            .bump("splitting_transformations_switch_cases_packed", as_metric(packed));
        Ok(true)
    }

    #[allow(clippy::cast_possible_wrap, clippy::cast_possible_truncation)]
    fn multiplex(
        &mut self,
        cfg: &mut ControlFlowGraph,
        block: BlockId,
        pos: InsnPos,
        selector: Reg,
        default: BlockId,
        cases: &[Case],
    ) -> Result<bool> {
        let keys: Vec<i32> = cases.iter().map(|c| c.key).collect();
        let plan = plan_multiplexing(&keys);
        let prefix = format!("multiplexing[{}]", plan.buckets);
        if !plan.is_balanced() {
            self.stats.bump(&format!("{prefix}.abandoned"), 1);
            return Ok(false);
        }
        let saved = cfg.registers_size();
        let Some(hash) = self.scratch(cfg)? else {
            self.stats.bump(&format!("{prefix}.abandoned"), 1);
            return Ok(false);
        };

        let mask = plan.buckets as i32 - 1;
        let mut outer = Vec::new();
        if plan.shift > 0 {
            outer.push(IrInstruction::binop_lit(
                IrOpcode::ShrIntLit,
                hash,
                selector,
                plan.shift as i32,
            ));
            outer.push(IrInstruction::binop_lit(IrOpcode::AndIntLit, hash, hash, mask));
        } else {
            outer.push(IrInstruction::binop_lit(IrOpcode::AndIntLit, hash, selector, mask));
        }
        outer.push(IrInstruction::new(IrOpcode::Switch).with_srcs(&[hash]));

        let mut stages = vec![Stage {
            insns: outer,
            edges: Vec::new(),
            fallthrough: Target::Block(default),
        }];
        for (bucket, group) in plan.groups.iter().enumerate() {
            let inner: Vec<Case> = group.iter().map(|&i| cases[i]).collect();
            let stage = match inner.as_slice() {
                [] => continue,
                [case] => Stage {
                    insns: eq_test(selector, case.key, hash, &mut None),
                    edges: vec![(EdgeKind::Branch(None), Target::Block(case.target))],
                    fallthrough: Target::Block(default),
                },
                _ => Stage::switch(selector, &inner, Target::Block(default)),
            };
            let next = stages.len();
            stages[0]
                .edges
                .push((EdgeKind::Branch(Some(bucket as i32)), Target::Stage(next)));
            stages.push(stage);
        }

        if !self.commit(cfg, block, pos, saved, stages)? {
            self.stats.bump(&format!("{prefix}.abandoned"), 1);
            return Ok(false);
        }
        self.stats.bump(&format!("{prefix}.transformations"), 1);
        self.stats.bump(&format!("{prefix}.switch_cases"), as_metric(cases.len()));
        self.stats
            .bump(&format!("{prefix}.inefficiency"), as_metric(plan.inefficiency()));
        Ok(true)
    }

    /// A fresh non-wide register, or `None` once the register file is full.
    fn scratch(&mut self, cfg: &mut ControlFlowGraph) -> Result<Option<Reg>> {
        match cfg.allocate_temp(false) {
            Ok(reg) => Ok(Some(reg)),
            Err(Error::EncodingOverflow(reason)) => {
                log::debug!("switch rewrite abandoned: {reason}");
                self.stats.bump("abandoned_encoding", 1);
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    /// Replaces the switch at `pos` by `stages`. Stage 0 goes into `block`, which keeps
    /// its `Goto` edge for the stage's fallthrough; the other stages get new blocks.
    ///
    /// Nothing is changed, and `false` returned, if an instruction of the rewrite has
    /// no encoding; the register file is then shrunk back to `saved`.
    fn commit(
        &mut self,
        cfg: &mut ControlFlowGraph,
        block: BlockId,
        pos: InsnPos,
        saved: u32,
        stages: Vec<Stage>,
    ) -> Result<bool> {
        if let Some(bad) = stages
            .iter()
            .flat_map(|s| s.insns.iter())
            .find(|i| !encoding::is_encodable(i, self.pool))
        {
            log::debug!("switch rewrite abandoned: {} has no encoding", bad.show(self.pool));
            cfg.set_registers_size(saved);
            self.stats.bump("abandoned_encoding", 1);
            return Ok(false);
        }

        cfg.remove_insn(pos)?;
        let goto = cfg
            .goto_succ(block)
            .ok_or_else(|| invalid_edit!("switch block {} lost its default edge", block))?;
        let blocks: Vec<BlockId> = (0..stages.len())
            .map(|i| if i == 0 { block } else { cfg.create_block() })
            .collect();
        let resolve = |target: Target| match target {
            Target::Block(b) => b,
            Target::Stage(i) => blocks[i],
        };

        for (i, stage) in stages.into_iter().enumerate() {
            let here = blocks[i];
            cfg.append_insns(here, stage.insns)?;
            for (kind, target) in stage.edges {
                cfg.add_edge(here, resolve(target), kind)?;
            }
            if i == 0 {
                cfg.set_edge_target(goto, resolve(stage.fallthrough))?;
            } else {
                cfg.add_edge(here, resolve(stage.fallthrough), EdgeKind::Goto)?;
            }
        }
        Ok(true)
    }
}
