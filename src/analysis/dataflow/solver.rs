//! Worklist-based data flow solver.
//!
//! This module provides the iterative solver that computes fixpoints for
//! data flow analyses. It uses a worklist algorithm seeded in reverse postorder
//! (forward) or postorder (backward).
//!
//! # Algorithm
//!
//! 1. Initialize all blocks with the initial value
//! 2. Set the boundary value at entry (forward) or at blocks without successors (backward)
//! 3. Add all live blocks to the worklist in traversal order
//! 4. While the worklist is non-empty:
//!    a. Remove a block from the worklist
//!    b. Compute the input by merging the edge states of predecessors/successors
//!    c. Apply the transfer function to get the output
//!    d. If the output changed, add affected blocks to the worklist
//! 5. Call the finalize hook for post-processing
//!
//! # Complexity
//!
//! The total work is O(n * h) where n is the number of blocks and h the lattice
//! height.

use std::collections::VecDeque;

use crate::{
    analysis::dataflow::framework::{AnalysisResults, DataFlowAnalysis, Direction},
    cfg::{BlockId, ControlFlowGraph},
    utils::graph::{
        algorithms::{postorder, reverse_postorder},
        GraphBase, NodeId,
    },
};

/// Worklist-based data flow solver.
///
/// # Usage
///
/// ```rust,ignore
/// use dexopt::analysis::dataflow::{DataFlowSolver, ReachingDefinitions};
///
/// let analysis = ReachingDefinitions::new(&cfg, &pool);
/// let results = DataFlowSolver::new(analysis).solve(&cfg);
/// let in_state = results.in_state(block_id);
/// ```
pub struct DataFlowSolver<A: DataFlowAnalysis> {
    /// The analysis being solved.
    analysis: A,
    /// Input state for each block slot.
    in_states: Vec<A::Lattice>,
    /// Output state for each block slot.
    out_states: Vec<A::Lattice>,
    /// Worklist of blocks to process.
    worklist: VecDeque<BlockId>,
    /// Whether each block is currently in the worklist.
    in_worklist: Vec<bool>,
    /// Number of iterations performed.
    iterations: usize,
}

impl<A: DataFlowAnalysis> DataFlowSolver<A> {
    /// Creates a new solver for the given analysis.
    #[must_use]
    pub fn new(analysis: A) -> Self {
        Self {
            analysis,
            in_states: Vec::new(),
            out_states: Vec::new(),
            worklist: VecDeque::new(),
            in_worklist: Vec::new(),
            iterations: 0,
        }
    }

    /// Solves the analysis to a fixpoint.
    pub fn solve(self, cfg: &ControlFlowGraph) -> AnalysisResults<A::Lattice> {
        self.solve_with_analysis(cfg).0
    }

    /// Solves the analysis and hands the analysis back alongside the results.
    pub fn solve_with_analysis(
        mut self,
        cfg: &ControlFlowGraph,
    ) -> (AnalysisResults<A::Lattice>, A) {
        if cfg.node_count() == 0 {
            return (AnalysisResults::new(Vec::new(), Vec::new()), self.analysis);
        }
        self.initialize(cfg);
        self.iterate(cfg);
        self.analysis
            .finalize(&self.in_states, &self.out_states, cfg);
        log::trace!(
            "dataflow fixpoint after {} iterations over {} blocks",
            self.iterations,
            cfg.num_blocks()
        );
        (
            AnalysisResults::new(self.in_states, self.out_states),
            self.analysis,
        )
    }

    /// Returns the number of iterations performed.
    #[must_use]
    pub const fn iterations(&self) -> usize {
        self.iterations
    }

    fn initialize(&mut self, cfg: &ControlFlowGraph) {
        let slots = cfg.node_count();
        let initial = self.analysis.initial(cfg);
        let boundary = self.analysis.boundary(cfg);

        self.in_states = vec![initial.clone(); slots];
        self.out_states = vec![initial; slots];
        self.in_worklist = vec![false; slots];

        match A::DIRECTION {
            Direction::Forward => {
                self.in_states[cfg.entry().index()] = boundary;
            }
            Direction::Backward => {
                for block in cfg.blocks() {
                    if cfg.succs(block.id()).next().is_none() {
                        self.out_states[block.id().index()] = boundary.clone();
                    }
                }
            }
        }

        let start = NodeId::from(cfg.entry());
        let order = match A::DIRECTION {
            Direction::Forward => reverse_postorder(cfg, start),
            Direction::Backward => postorder(cfg, start),
        };
        for node in order {
            self.enqueue(BlockId::from(node));
        }
        // blocks unreachable from the entry still get a state
        for block in cfg.blocks() {
            self.enqueue(block.id());
        }
    }

    fn enqueue(&mut self, block: BlockId) {
        let idx = block.index();
        if idx < self.in_worklist.len() && !self.in_worklist[idx] {
            self.worklist.push_back(block);
            self.in_worklist[idx] = true;
        }
    }

    fn iterate(&mut self, cfg: &ControlFlowGraph) {
        while let Some(block) = self.worklist.pop_front() {
            self.in_worklist[block.index()] = false;
            self.iterations += 1;

            let changed = match A::DIRECTION {
                Direction::Forward => self.process_forward(block, cfg),
                Direction::Backward => self.process_backward(block, cfg),
            };

            if changed {
                self.add_affected_to_worklist(block, cfg);
            }
        }
    }

    /// Returns `true` if the output state changed.
    fn process_forward(&mut self, id: BlockId, cfg: &ControlFlowGraph) -> bool {
        let Some(block) = cfg.block(id) else {
            return false;
        };

        // the entry keeps its boundary value
        if id != cfg.entry() {
            let mut merged: Option<A::Lattice> = None;
            for (_, edge) in cfg.preds(id) {
                let state = self
                    .analysis
                    .edge_state(edge, &self.out_states[edge.src().index()]);
                merged = Some(match merged {
                    None => state,
                    Some(acc) => self.analysis.merge(&acc, &state),
                });
            }
            if let Some(input) = merged {
                self.in_states[id.index()] = input;
            }
        }

        let output = self
            .analysis
            .transfer(id, block, &self.in_states[id.index()], cfg);
        let changed = output != self.out_states[id.index()];
        self.out_states[id.index()] = output;
        changed
    }

    /// Returns `true` if the input state changed.
    fn process_backward(&mut self, id: BlockId, cfg: &ControlFlowGraph) -> bool {
        let Some(block) = cfg.block(id) else {
            return false;
        };

        let mut merged: Option<A::Lattice> = None;
        for (_, edge) in cfg.succs(id) {
            let state = self
                .analysis
                .edge_state(edge, &self.in_states[edge.target().index()]);
            merged = Some(match merged {
                None => state,
                Some(acc) => self.analysis.merge(&acc, &state),
            });
        }
        // blocks without successors keep their boundary value
        if let Some(output) = merged {
            self.out_states[id.index()] = output;
        }

        let input = self
            .analysis
            .transfer(id, block, &self.out_states[id.index()], cfg);
        let changed = input != self.in_states[id.index()];
        self.in_states[id.index()] = input;
        changed
    }

    fn add_affected_to_worklist(&mut self, block: BlockId, cfg: &ControlFlowGraph) {
        match A::DIRECTION {
            Direction::Forward => {
                let succs: Vec<BlockId> = cfg.succs(block).map(|(_, e)| e.target()).collect();
                for succ in succs {
                    self.enqueue(succ);
                }
            }
            Direction::Backward => {
                let preds: Vec<BlockId> = cfg.preds(block).map(|(_, e)| e.src()).collect();
                for pred in preds {
                    self.enqueue(pred);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        analysis::dataflow::lattice::MeetSemiLattice,
        cfg::{Block, EdgeKind},
        ir::{instruction::IrInstruction, opcode::IrOpcode},
    };

    /// A simple constant lattice for testing.
    #[derive(Debug, Clone, PartialEq)]
    enum TestLattice {
        Top,
        Value(i32),
        Bottom,
    }

    impl MeetSemiLattice for TestLattice {
        fn meet(&self, other: &Self) -> Self {
            match (self, other) {
                (Self::Top, x) | (x, Self::Top) => x.clone(),
                (Self::Value(a), Self::Value(b)) if a == b => Self::Value(*a),
                _ => Self::Bottom,
            }
        }

        fn is_bottom(&self) -> bool {
            matches!(self, Self::Bottom)
        }
    }

    /// Propagates the entry value, adding one per instruction.
    struct Counting;

    impl DataFlowAnalysis for Counting {
        type Lattice = TestLattice;
        const DIRECTION: Direction = Direction::Forward;

        fn boundary(&self, _cfg: &ControlFlowGraph) -> Self::Lattice {
            TestLattice::Value(0)
        }

        fn initial(&self, _cfg: &ControlFlowGraph) -> Self::Lattice {
            TestLattice::Top
        }

        #[allow(clippy::cast_possible_truncation, clippy::cast_possible_wrap)]
        fn transfer(
            &self,
            _block_id: BlockId,
            block: &Block,
            input: &Self::Lattice,
            _cfg: &ControlFlowGraph,
        ) -> Self::Lattice {
            match input {
                TestLattice::Value(v) => TestLattice::Value(v + block.insn_count() as i32),
                other => other.clone(),
            }
        }
    }

    #[test]
    fn diamond_merges_to_bottom_when_paths_differ() {
        let mut cfg = ControlFlowGraph::new(1);
        let entry = cfg.entry();
        let left = cfg.create_block();
        let right = cfg.create_block();
        let join = cfg.create_block();
        cfg.append_insns(entry, vec![IrInstruction::if_testz(IrOpcode::IfEqz, 0)])
            .unwrap();
        cfg.append_insns(left, vec![IrInstruction::const_(0, 1)]).unwrap();
        cfg.append_insns(join, vec![IrInstruction::new(IrOpcode::ReturnVoid)])
            .unwrap();
        cfg.add_edge(entry, left, EdgeKind::Goto).unwrap();
        cfg.add_edge(entry, right, EdgeKind::Branch(None)).unwrap();
        cfg.add_edge(left, join, EdgeKind::Goto).unwrap();
        cfg.add_edge(right, join, EdgeKind::Goto).unwrap();

        let solver = DataFlowSolver::new(Counting);
        assert_eq!(solver.iterations(), 0);
        let results = solver.solve(&cfg);
        assert_eq!(results.out_state(left), Some(&TestLattice::Value(2)));
        assert_eq!(results.out_state(right), Some(&TestLattice::Value(1)));
        assert_eq!(results.in_state(join), Some(&TestLattice::Bottom));
    }
}
