//! Live register analysis.
//!
//! A register is *live* at a program point if some path from that point reads it
//! before writing it. Register pairs holding wide values occupy two slots, and each
//! slot is tracked separately.
//!
//! # Algorithm
//!
//! This is a backward data flow analysis:
//!
//! - `OUT[B]` = ∪{IN[S] | S is a successor of B}
//! - `IN[B]`  = replay of B's instructions from last to first over `OUT[B]`
//!
//! Exceptional successors are handled separately. Throw edges leave only from a
//! block's last instruction, and when that instruction throws it has not written its
//! destination. The state arriving over a throw edge is therefore added *before* the
//! last instruction, where its destination is not yet killed.

use crate::{
    analysis::dataflow::{
        framework::{AnalysisResults, DataFlowAnalysis, Direction},
        lattice::MeetSemiLattice,
        solver::DataFlowSolver,
    },
    cfg::{Block, BlockId, ControlFlowGraph, Edge, InsnPos},
    ir::{instruction::IrInstruction, Pool},
    utils::BitSet,
};

/// The liveness state at one point.
#[derive(Debug, Clone, PartialEq)]
pub struct LiveSet {
    /// Live register slots.
    live: BitSet,
    /// Slots live into exception handlers, pending application before the last
    /// instruction of the block.
    via_throw: BitSet,
}

impl LiveSet {
    /// An empty state over `registers` slots.
    #[must_use]
    pub fn new(registers: usize) -> Self {
        Self {
            live: BitSet::new(registers),
            via_throw: BitSet::new(registers),
        }
    }

    /// `true` if `reg` is live.
    #[must_use]
    pub fn is_live(&self, reg: u32) -> bool {
        let idx = reg as usize;
        idx < self.live.len() && self.live.contains(idx)
    }

    /// The live slots.
    #[must_use]
    pub const fn as_bitset(&self) -> &BitSet {
        &self.live
    }

    /// Number of live slots.
    #[must_use]
    pub fn count(&self) -> usize {
        self.live.count()
    }
}

impl MeetSemiLattice for LiveSet {
    /// A register is live if it is live on any successor path.
    fn meet(&self, other: &Self) -> Self {
        let mut live = self.live.clone();
        live.union_with(&other.live);
        let mut via_throw = self.via_throw.clone();
        via_throw.union_with(&other.via_throw);
        Self { live, via_throw }
    }

    fn is_bottom(&self) -> bool {
        self.live.count() == self.live.len()
    }
}

/// Live register analysis over a CFG.
pub struct Liveness<'a> {
    pool: &'a Pool,
    registers: usize,
}

impl<'a> Liveness<'a> {
    /// A liveness analysis for `cfg`'s register file.
    #[must_use]
    pub fn new(cfg: &ControlFlowGraph, pool: &'a Pool) -> Self {
        Self {
            pool,
            registers: cfg.registers_size() as usize,
        }
    }

    /// Runs the analysis.
    #[must_use]
    pub fn analyze(cfg: &ControlFlowGraph, pool: &'a Pool) -> LiveRegisters<'a> {
        let results = DataFlowSolver::new(Liveness::new(cfg, pool)).solve(cfg);
        LiveRegisters { pool, results }
    }

    /// Applies `insn` backwards to `live`.
    fn step(&self, insn: &IrInstruction, live: &mut BitSet) {
        for slot in insn.def_slots() {
            if (slot as usize) < self.registers {
                live.remove(slot as usize);
            }
        }
        for slot in insn.use_slots(self.pool) {
            if (slot as usize) < self.registers {
                live.insert(slot as usize);
            }
        }
    }

    /// Replays `block` backwards from `output`. With `stop`, only the instructions
    /// after entry index `stop` are replayed.
    fn replay(&self, block: &Block, output: &LiveSet, stop: Option<usize>) -> BitSet {
        let mut live = output.live.clone();
        let Some(last) = block.last_insn_index() else {
            live.union_with(&output.via_throw);
            return live;
        };
        for (index, insn) in block.indexed_insns().rev() {
            if stop.is_some_and(|s| index <= s) {
                break;
            }
            self.step(insn, &mut live);
            if index == last {
                live.union_with(&output.via_throw);
            }
        }
        live
    }
}

impl DataFlowAnalysis for Liveness<'_> {
    type Lattice = LiveSet;
    const DIRECTION: Direction = Direction::Backward;

    fn boundary(&self, _cfg: &ControlFlowGraph) -> Self::Lattice {
        LiveSet::new(self.registers)
    }

    fn initial(&self, _cfg: &ControlFlowGraph) -> Self::Lattice {
        LiveSet::new(self.registers)
    }

    fn transfer(
        &self,
        _block_id: BlockId,
        block: &Block,
        output: &Self::Lattice,
        _cfg: &ControlFlowGraph,
    ) -> Self::Lattice {
        LiveSet {
            live: self.replay(block, output, None),
            via_throw: BitSet::new(self.registers),
        }
    }

    fn edge_state(&self, edge: &Edge, state: &Self::Lattice) -> Self::Lattice {
        if edge.kind().is_throw() {
            LiveSet {
                live: BitSet::new(self.registers),
                via_throw: state.live.clone(),
            }
        } else {
            state.clone()
        }
    }
}

/// Solved liveness of one CFG.
pub struct LiveRegisters<'a> {
    pool: &'a Pool,
    results: AnalysisResults<LiveSet>,
}

impl LiveRegisters<'_> {
    /// Slots live on entry to `block`.
    #[must_use]
    pub fn live_in(&self, block: BlockId) -> Option<&BitSet> {
        self.results.in_state(block).map(LiveSet::as_bitset)
    }

    /// Slots live after the last instruction of `block` on its normal successors.
    #[must_use]
    pub fn live_out(&self, block: BlockId) -> Option<&BitSet> {
        self.results.out_state(block).map(LiveSet::as_bitset)
    }

    /// Slots live immediately after the instruction at `pos`.
    ///
    /// For the last instruction of a block this is the normal-path live-out. For any
    /// earlier instruction it includes everything live into the block's handlers.
    #[must_use]
    pub fn live_out_at(&self, cfg: &ControlFlowGraph, pos: InsnPos) -> BitSet {
        let registers = cfg.registers_size() as usize;
        let (Some(block), Some(output)) = (cfg.block(pos.block), self.results.out_state(pos.block))
        else {
            return BitSet::new(registers);
        };
        let analysis = Liveness {
            pool: self.pool,
            registers,
        };
        analysis.replay(block, output, Some(pos.index))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        cfg::EdgeKind,
        ir::{
            instruction::IrInstruction,
            opcode::{IrOpcode, RegKind},
        },
    };

    #[test]
    fn wide_pairs_and_straight_line() {
        let pool = Pool::new();
        let mut cfg = ControlFlowGraph::new(4);
        let entry = cfg.entry();
        cfg.append_insns(
            entry,
            vec![
                IrInstruction::const_wide(0, 5),
                IrInstruction::const_(2, 1),
                IrInstruction::new(IrOpcode::ReturnWide).with_srcs(&[0]),
            ],
        )
        .unwrap();
        let live = Liveness::analyze(&cfg, &pool);
        assert_eq!(live.live_in(entry).map(BitSet::count), Some(0));

        let after_first = live.live_out_at(&cfg, InsnPos::new(entry, 0));
        assert!(after_first.contains(0) && after_first.contains(1));
        assert!(!after_first.contains(2));
    }

    #[test]
    fn throwing_insn_keeps_destination_live_into_handler() {
        let pool = Pool::new();
        let mut cfg = ControlFlowGraph::new(2);
        let entry = cfg.entry();
        let body = cfg.create_block();
        let next = cfg.create_block();
        let handler = cfg.create_block();
        let owner = pool.intern_type("LFoo;");
        let proto = pool.intern_proto(pool.known().int, &[]);
        let callee = pool.intern_method(owner, "f", proto);

        cfg.append_insns(entry, vec![IrInstruction::const_(0, 7)]).unwrap();
        cfg.append_insns(
            body,
            vec![IrInstruction::invoke(IrOpcode::InvokeStatic, callee, &[])],
        )
        .unwrap();
        cfg.append_insns(
            next,
            vec![
                IrInstruction::new(IrOpcode::MoveResult).with_dest(0),
                IrInstruction::new(IrOpcode::Return).with_srcs(&[0]),
            ],
        )
        .unwrap();
        cfg.append_insns(
            handler,
            vec![IrInstruction::new(IrOpcode::return_for(RegKind::Narrow)).with_srcs(&[0])],
        )
        .unwrap();
        cfg.add_edge(entry, body, EdgeKind::Goto).unwrap();
        cfg.add_edge(body, next, EdgeKind::Goto).unwrap();
        cfg.add_edge(
            body,
            handler,
            EdgeKind::Throw {
                catch_type: None,
                index: 0,
            },
        )
        .unwrap();

        let live = Liveness::analyze(&cfg, &pool);
        // v0 is redefined on the normal path but read by the handler
        assert!(live.live_in(body).is_some_and(|s| s.contains(0)));
        assert!(live.live_out(body).is_some_and(|s| !s.contains(0)));
    }
}
