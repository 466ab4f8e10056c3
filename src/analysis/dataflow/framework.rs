//! Data flow analysis framework trait and direction.
//!
//! This module defines the core abstraction for data flow analyses. Any
//! specific analysis (reaching definitions, liveness, type inference)
//! implements the [`DataFlowAnalysis`] trait to work with the solver.

use crate::{
    analysis::dataflow::lattice::MeetSemiLattice,
    cfg::{Block, BlockId, ControlFlowGraph, Edge},
};

/// Direction of data flow analysis.
///
/// The direction determines how information propagates through the CFG
/// and which states are combined at control flow merge points.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Information flows forward, from entry to exit.
    ///
    /// At join points (blocks with multiple predecessors), values from
    /// all predecessors are combined using the meet operation.
    ///
    /// Examples: reaching definitions, type inference.
    Forward,

    /// Information flows backward, from exit to entry.
    ///
    /// At split points (blocks with multiple successors), values from
    /// all successors are combined.
    ///
    /// Examples: live registers.
    Backward,
}

/// A data flow analysis over a [`ControlFlowGraph`].
///
/// Implementations provide the transfer function and boundary conditions;
/// the solver handles iteration to a fixpoint.
///
/// # Transfer Functions
///
/// For forward analyses: `out[B] = transfer(B, in[B])`
/// For backward analyses: `in[B] = transfer(B, out[B])`
///
/// # Edges
///
/// Before states are combined, each one passes through [`DataFlowAnalysis::edge_state`]
/// with the edge it flows along. Analyses that treat exceptional edges differently
/// (the throwing instruction did not complete) override it; the default passes the
/// state through unchanged.
///
/// # Example
///
/// ```rust,ignore
/// use dexopt::analysis::dataflow::{DataFlowAnalysis, Direction};
///
/// struct MyAnalysis;
///
/// impl DataFlowAnalysis for MyAnalysis {
///     type Lattice = MyLattice;
///     const DIRECTION: Direction = Direction::Forward;
///
///     fn boundary(&self, _cfg: &ControlFlowGraph) -> Self::Lattice {
///         MyLattice::initial_at_entry()
///     }
///
///     fn initial(&self, _cfg: &ControlFlowGraph) -> Self::Lattice {
///         MyLattice::top()
///     }
///
///     fn transfer(
///         &self,
///         block_id: BlockId,
///         block: &Block,
///         input: &Self::Lattice,
///         cfg: &ControlFlowGraph,
///     ) -> Self::Lattice {
///         todo!()
///     }
/// }
/// ```
pub trait DataFlowAnalysis {
    /// The lattice type for this analysis.
    type Lattice: MeetSemiLattice;

    /// The direction of this analysis.
    const DIRECTION: Direction;

    /// Returns the value at the boundary of the method.
    ///
    /// For forward analyses, this is the value at the entry block.
    /// For backward analyses, this is the value after blocks without successors.
    fn boundary(&self, cfg: &ControlFlowGraph) -> Self::Lattice;

    /// Returns the initial value for interior blocks.
    fn initial(&self, cfg: &ControlFlowGraph) -> Self::Lattice;

    /// Computes the transfer function for a basic block.
    ///
    /// # Arguments
    ///
    /// * `block_id` - The block being processed
    /// * `block` - The block itself
    /// * `input` - The abstract state flowing into (forward) or out of (backward) the block
    /// * `cfg` - The complete graph for context
    fn transfer(
        &self,
        block_id: BlockId,
        block: &Block,
        input: &Self::Lattice,
        cfg: &ControlFlowGraph,
    ) -> Self::Lattice;

    /// Combines two states at a merge point. Defaults to [`MeetSemiLattice::meet`].
    fn merge(&self, a: &Self::Lattice, b: &Self::Lattice) -> Self::Lattice {
        a.meet(b)
    }

    /// The state seen across `edge` when the state at its far end is `state`.
    fn edge_state(&self, _edge: &Edge, state: &Self::Lattice) -> Self::Lattice {
        state.clone()
    }

    /// Called when analysis is complete.
    ///
    /// The default implementation does nothing.
    fn finalize(
        &mut self,
        _in_states: &[Self::Lattice],
        _out_states: &[Self::Lattice],
        _cfg: &ControlFlowGraph,
    ) {
    }
}

/// Results of a data flow analysis.
///
/// States are indexed by [`BlockId::index`]; slots of removed blocks hold the
/// analysis' initial value.
#[derive(Debug, Clone)]
pub struct AnalysisResults<L> {
    /// Input state for each block (before transfer function).
    pub in_states: Vec<L>,
    /// Output state for each block (after transfer function).
    pub out_states: Vec<L>,
}

impl<L: Clone> AnalysisResults<L> {
    /// Creates new analysis results with the given states.
    #[must_use]
    pub fn new(in_states: Vec<L>, out_states: Vec<L>) -> Self {
        Self {
            in_states,
            out_states,
        }
    }

    /// Returns the input state for a block, or `None` if out of bounds.
    #[must_use]
    pub fn in_state(&self, block: BlockId) -> Option<&L> {
        self.in_states.get(block.index())
    }

    /// Returns the output state for a block, or `None` if out of bounds.
    #[must_use]
    pub fn out_state(&self, block: BlockId) -> Option<&L> {
        self.out_states.get(block.index())
    }

    /// Returns the number of block slots.
    #[must_use]
    pub fn block_count(&self) -> usize {
        self.in_states.len()
    }
}
