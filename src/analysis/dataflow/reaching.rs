//! Reaching definitions analysis.
//!
//! Computes, for each program point, which register definitions may reach it without
//! an intervening redefinition. A definition is identified by the [`InsnPos`] of the
//! instruction that writes the register. Writing either half of a register pair kills
//! every definition touching that half.
//!
//! # Algorithm
//!
//! For each block B:
//! - `IN[B]`  = ∪{OUT[P] | P is a predecessor of B}
//! - `OUT[B]` = replay of B's definitions over `IN[B]`
//!
//! Along a throw edge the last instruction of the predecessor did not complete, so
//! the handler sees the state from just before it.

use rustc_hash::FxHashMap;

use crate::{
    analysis::dataflow::{
        framework::{AnalysisResults, DataFlowAnalysis, Direction},
        lattice::MeetSemiLattice,
        solver::DataFlowSolver,
    },
    cfg::{Block, BlockId, ControlFlowGraph, Edge, InsnPos},
    ir::instruction::{IrInstruction, Reg},
    utils::BitSet,
};

/// The reaching-definition state at one point.
#[derive(Debug, Clone, PartialEq)]
pub struct DefSet {
    reaching: BitSet,
    /// The state before the block's last instruction, seen by handlers.
    before_last: BitSet,
}

impl DefSet {
    fn new(defs: usize) -> Self {
        Self {
            reaching: BitSet::new(defs),
            before_last: BitSet::new(defs),
        }
    }

    /// The reaching definition indexes.
    #[must_use]
    pub const fn as_bitset(&self) -> &BitSet {
        &self.reaching
    }
}

impl MeetSemiLattice for DefSet {
    /// A definition reaches if it reaches along any predecessor.
    fn meet(&self, other: &Self) -> Self {
        let mut reaching = self.reaching.clone();
        reaching.union_with(&other.reaching);
        let mut before_last = self.before_last.clone();
        before_last.union_with(&other.before_last);
        Self {
            reaching,
            before_last,
        }
    }

    fn is_bottom(&self) -> bool {
        self.reaching.count() == self.reaching.len()
    }
}

/// Reaching definitions over a CFG.
pub struct ReachingDefinitions {
    /// Position of each definition.
    defs: Vec<InsnPos>,
    /// Definition index of each defining position.
    index_of: FxHashMap<InsnPos, usize>,
    /// Definitions writing each register slot.
    by_slot: Vec<BitSet>,
}

impl ReachingDefinitions {
    /// Numbers every definition of `cfg`.
    #[must_use]
    pub fn new(cfg: &ControlFlowGraph) -> Self {
        let registers = cfg.registers_size() as usize;
        let mut defs = Vec::new();
        let mut slots_of = Vec::new();
        for (pos, insn) in cfg.instructions() {
            let slots = insn.def_slots();
            if !slots.is_empty() {
                defs.push(pos);
                slots_of.push(slots);
            }
        }
        let mut by_slot = vec![BitSet::new(defs.len()); registers];
        for (d, slots) in slots_of.iter().enumerate() {
            for &slot in slots {
                if let Some(set) = by_slot.get_mut(slot as usize) {
                    set.insert(d);
                }
            }
        }
        let index_of = defs.iter().enumerate().map(|(i, p)| (*p, i)).collect();
        Self {
            defs,
            index_of,
            by_slot,
        }
    }

    /// Runs the analysis.
    #[must_use]
    pub fn analyze(cfg: &ControlFlowGraph) -> ReachingDefs {
        let (results, analysis) =
            DataFlowSolver::new(ReachingDefinitions::new(cfg)).solve_with_analysis(cfg);
        ReachingDefs { analysis, results }
    }

    /// Number of definitions.
    #[must_use]
    pub fn def_count(&self) -> usize {
        self.defs.len()
    }

    fn step(&self, pos: InsnPos, insn: &IrInstruction, state: &mut BitSet) {
        let Some(&d) = self.index_of.get(&pos) else {
            return;
        };
        for slot in insn.def_slots() {
            if let Some(killed) = self.by_slot.get(slot as usize) {
                state.difference_with(killed);
            }
        }
        state.insert(d);
    }

    /// Replays `block` over `input` up to (excluding) entry index `stop`, or fully.
    fn replay(&self, id: BlockId, block: &Block, input: &BitSet, stop: Option<usize>) -> DefSet {
        let mut state = input.clone();
        let mut before_last = BitSet::new(self.defs.len());
        let last = block.last_insn_index();
        for (index, insn) in block.indexed_insns() {
            if stop.is_some_and(|s| index >= s) {
                break;
            }
            if Some(index) == last {
                before_last = state.clone();
            }
            self.step(InsnPos::new(id, index), insn, &mut state);
        }
        DefSet {
            reaching: state,
            before_last,
        }
    }
}

impl DataFlowAnalysis for ReachingDefinitions {
    type Lattice = DefSet;
    const DIRECTION: Direction = Direction::Forward;

    fn boundary(&self, _cfg: &ControlFlowGraph) -> Self::Lattice {
        DefSet::new(self.defs.len())
    }

    fn initial(&self, _cfg: &ControlFlowGraph) -> Self::Lattice {
        DefSet::new(self.defs.len())
    }

    fn transfer(
        &self,
        block_id: BlockId,
        block: &Block,
        input: &Self::Lattice,
        _cfg: &ControlFlowGraph,
    ) -> Self::Lattice {
        self.replay(block_id, block, &input.reaching, None)
    }

    fn edge_state(&self, edge: &Edge, state: &Self::Lattice) -> Self::Lattice {
        if edge.kind().is_throw() {
            DefSet {
                reaching: state.before_last.clone(),
                before_last: BitSet::new(self.defs.len()),
            }
        } else {
            state.clone()
        }
    }
}

/// Solved reaching definitions of one CFG.
pub struct ReachingDefs {
    analysis: ReachingDefinitions,
    results: AnalysisResults<DefSet>,
}

impl ReachingDefs {
    /// Positions of the definitions of `reg` that may reach the point just before the
    /// instruction at `pos`, in position order.
    #[must_use]
    pub fn defs_reaching(&self, cfg: &ControlFlowGraph, pos: InsnPos, reg: Reg) -> Vec<InsnPos> {
        let (Some(block), Some(input)) = (cfg.block(pos.block), self.results.in_state(pos.block))
        else {
            return Vec::new();
        };
        let state = self
            .analysis
            .replay(pos.block, block, &input.reaching, Some(pos.index));
        let Some(of_reg) = self.analysis.by_slot.get(reg as usize) else {
            return Vec::new();
        };
        let mut hits = state.reaching;
        hits.intersect_with(of_reg);
        let mut out: Vec<InsnPos> = hits.iter().map(|d| self.analysis.defs[d]).collect();
        out.sort();
        out
    }

    /// Definitions reaching the start of `block`.
    #[must_use]
    pub fn reaching_in(&self, block: BlockId) -> Vec<InsnPos> {
        self.results
            .in_state(block)
            .map(|s| s.reaching.iter().map(|d| self.analysis.defs[d]).collect())
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{cfg::EdgeKind, ir::opcode::IrOpcode};

    #[test]
    fn branches_merge_definitions() {
        let mut cfg = ControlFlowGraph::new(2);
        let entry = cfg.entry();
        let left = cfg.create_block();
        let join = cfg.create_block();
        cfg.append_insns(
            entry,
            vec![
                IrInstruction::const_(0, 1),
                IrInstruction::const_(1, 0),
                IrInstruction::if_testz(IrOpcode::IfEqz, 1),
            ],
        )
        .unwrap();
        cfg.append_insns(left, vec![IrInstruction::const_(0, 2)]).unwrap();
        cfg.append_insns(join, vec![IrInstruction::new(IrOpcode::Return).with_srcs(&[0])])
            .unwrap();
        cfg.add_edge(entry, left, EdgeKind::Goto).unwrap();
        cfg.add_edge(entry, join, EdgeKind::Branch(None)).unwrap();
        cfg.add_edge(left, join, EdgeKind::Goto).unwrap();

        let rd = ReachingDefinitions::analyze(&cfg);
        let at_return = rd.defs_reaching(&cfg, InsnPos::new(join, 0), 0);
        assert_eq!(at_return, vec![InsnPos::new(entry, 0), InsnPos::new(left, 0)]);

        let in_left = rd.defs_reaching(&cfg, InsnPos::new(left, 0), 0);
        assert_eq!(in_left, vec![InsnPos::new(entry, 0)]);
    }

    #[test]
    fn wide_definition_kills_overlapping_halves() {
        let mut cfg = ControlFlowGraph::new(3);
        let entry = cfg.entry();
        cfg.append_insns(
            entry,
            vec![
                IrInstruction::const_(1, 4),
                IrInstruction::const_wide(0, 9),
                IrInstruction::new(IrOpcode::ReturnWide).with_srcs(&[0]),
            ],
        )
        .unwrap();
        let rd = ReachingDefinitions::analyze(&cfg);
        let at_return = rd.defs_reaching(&cfg, InsnPos::new(entry, 2), 1);
        assert_eq!(at_return, vec![InsnPos::new(entry, 1)]);
    }
}
