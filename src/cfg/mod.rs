//! Control-flow graphs of method bodies.
//!
//! A [`ControlFlowGraph`] is built from the linear form of a body
//! ([`ControlFlowGraph::build`]), edited by passes, and serialised back
//! ([`ControlFlowGraph::linearize`]). Blocks and edges live in arenas addressed by
//! [`BlockId`] and [`EdgeId`]; removed slots are tombstoned, so ids stay valid for the
//! lifetime of the graph and are never reused.
//!
//! # Invariants
//!
//! - Blocks hold instructions, positions, source blocks and debug entries. Labels, try
//!   markers and catch markers exist only in linear form; in CFG form they are edges.
//! - `goto` is never stored. Every block that does not end in a return or `throw` has
//!   exactly one [`EdgeKind::Goto`] successor, which is the fall-through of `if-*`
//!   instructions and the default of `switch` instructions.
//! - Branch instructions and terminators only appear as the last instruction of a block.
//! - Throw edges leave from the last instruction of a block; every other instruction of
//!   such a block is non-throwing. Edges of one block are ordered like the handler chain
//!   they came from, innermost first, with a catch-all last.
//! - A block starting with `move-result*` is reached only through the `Goto` edge of the
//!   block whose last instruction produced the result.
//!
//! [`ControlFlowGraph::verify`] checks all of the above.
//!
//! # Example
//!
//! ```rust,ignore
//! let mut cfg = ControlFlowGraph::build(entries, registers_size, &pool)?;
//! for (pos, insn) in cfg.instructions() {
//!     println!("{pos:?}: {}", insn.show(&pool));
//! }
//! let linear = cfg.linearize()?;
//! ```

mod big_blocks;
mod build;
mod edit;
mod linearize;

use std::fmt;

pub use big_blocks::{big_blocks, BigBlock};

use crate::{
    ir::{
        entry::{MethodItemEntry, SourceBlock},
        instruction::{IrInstruction, Reg, MAX_REGISTER},
        TypeRef,
    },
    utils::{
        graph::{GraphBase, NodeId, Predecessors, RootedGraph, Successors},
        CompactVec,
    },
    Error, Result,
};

define_handle!(
    /// A basic block.
    BlockId, "B"
);
define_handle!(
    /// A CFG edge.
    EdgeId, "E"
);

impl From<BlockId> for NodeId {
    fn from(block: BlockId) -> Self {
        NodeId::new(block.index())
    }
}

impl From<NodeId> for BlockId {
    fn from(node: NodeId) -> Self {
        BlockId::from_index(node.index())
    }
}

/// The kind of a CFG edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EdgeKind {
    /// Unconditional flow: fall-through, the implied `goto`, the not-taken side of an
    /// `if-*`, or the default of a `switch`.
    Goto,
    /// A taken branch: `None` for `if-*`, `Some(key)` for a switch case.
    Branch(Option<i32>),
    /// Exceptional flow into a handler.
    Throw {
        /// Caught type, `None` for catch-all.
        catch_type: Option<TypeRef>,
        /// Position of the handler in the block's chain (0 is tried first).
        index: u32,
    },
    /// Synthetic edge into the exit block.
    Ghost,
}

impl EdgeKind {
    /// `true` for throw edges.
    #[must_use]
    pub fn is_throw(self) -> bool {
        matches!(self, EdgeKind::Throw { .. })
    }
}

/// A directed edge between two blocks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Edge {
    src: BlockId,
    target: BlockId,
    kind: EdgeKind,
}

impl Edge {
    /// Source block.
    #[must_use]
    pub fn src(&self) -> BlockId {
        self.src
    }

    /// Target block.
    #[must_use]
    pub fn target(&self) -> BlockId {
        self.target
    }

    /// Edge kind.
    #[must_use]
    pub fn kind(&self) -> EdgeKind {
        self.kind
    }
}

/// A basic block.
#[derive(Debug, Clone)]
pub struct Block {
    id: BlockId,
    entries: Vec<MethodItemEntry>,
    preds: CompactVec<EdgeId>,
    succs: CompactVec<EdgeId>,
}

impl Block {
    fn new(id: BlockId) -> Self {
        Block {
            id,
            entries: Vec::new(),
            preds: CompactVec::new(),
            succs: CompactVec::new(),
        }
    }

    /// The block's id.
    #[must_use]
    pub fn id(&self) -> BlockId {
        self.id
    }

    /// All entries in order.
    #[must_use]
    pub fn entries(&self) -> &[MethodItemEntry] {
        &self.entries
    }

    /// Mutable entries. Callers must keep the block-level invariants; structural
    /// changes should go through the editing methods of [`ControlFlowGraph`].
    pub(crate) fn entries_mut(&mut self) -> &mut Vec<MethodItemEntry> {
        &mut self.entries
    }

    /// Incoming edges.
    #[must_use]
    pub fn preds(&self) -> &CompactVec<EdgeId> {
        &self.preds
    }

    /// Outgoing edges.
    #[must_use]
    pub fn succs(&self) -> &CompactVec<EdgeId> {
        &self.succs
    }

    /// Iterates the instructions.
    pub fn insns(&self) -> impl DoubleEndedIterator<Item = &IrInstruction> {
        self.entries.iter().filter_map(MethodItemEntry::as_insn)
    }

    /// Iterates `(entry index, instruction)` pairs.
    pub fn indexed_insns(&self) -> impl DoubleEndedIterator<Item = (usize, &IrInstruction)> {
        self.entries
            .iter()
            .enumerate()
            .filter_map(|(i, e)| e.as_insn().map(|insn| (i, insn)))
    }

    /// Number of instructions.
    #[must_use]
    pub fn insn_count(&self) -> usize {
        self.insns().count()
    }

    /// `true` if the block holds no instruction.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        !self.entries.iter().any(MethodItemEntry::is_insn)
    }

    /// The first instruction.
    #[must_use]
    pub fn first_insn(&self) -> Option<&IrInstruction> {
        self.insns().next()
    }

    /// The last instruction.
    #[must_use]
    pub fn last_insn(&self) -> Option<&IrInstruction> {
        self.insns().next_back()
    }

    /// Entry index of the last instruction.
    #[must_use]
    pub fn last_insn_index(&self) -> Option<usize> {
        self.entries.iter().rposition(MethodItemEntry::is_insn)
    }

    /// Entry index of the first instruction.
    #[must_use]
    pub fn first_insn_index(&self) -> Option<usize> {
        self.entries.iter().position(MethodItemEntry::is_insn)
    }

    /// Iterates the source blocks.
    pub fn source_blocks(&self) -> impl Iterator<Item = &SourceBlock> {
        self.entries.iter().filter_map(|e| match e {
            MethodItemEntry::SourceBlock(sb) => Some(sb),
            _ => None,
        })
    }

    /// `true` if the block starts with a `move-result*` (or `move-exception`) that
    /// must stay attached to what precedes it.
    #[must_use]
    pub fn starts_with_move_result(&self) -> bool {
        self.first_insn()
            .is_some_and(|insn| insn.opcode().is_move_result())
    }

    /// `true` if the block ends in a return or `throw`.
    #[must_use]
    pub fn ends_in_terminal(&self) -> bool {
        self.last_insn().is_some_and(|i| i.opcode().is_terminal())
    }
}

/// Position of an instruction: the block plus the entry index inside it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct InsnPos {
    /// The block.
    pub block: BlockId,
    /// Index into the block's entries.
    pub index: usize,
}

impl InsnPos {
    /// Creates a position.
    #[must_use]
    pub fn new(block: BlockId, index: usize) -> Self {
        InsnPos { block, index }
    }
}

impl fmt::Display for InsnPos {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.block, self.index)
    }
}

/// A method body in graph form. See the [module documentation](self).
#[derive(Debug, Clone)]
pub struct ControlFlowGraph {
    blocks: Vec<Option<Block>>,
    edges: Vec<Option<Edge>>,
    entry: BlockId,
    exit: Option<BlockId>,
    synthetic_exit: bool,
    registers_size: u32,
}

impl ControlFlowGraph {
    /// An empty graph with a single empty entry block.
    #[must_use]
    pub fn new(registers_size: u32) -> Self {
        let entry = BlockId::from_index(0);
        ControlFlowGraph {
            blocks: vec![Some(Block::new(entry))],
            edges: Vec::new(),
            entry,
            exit: None,
            synthetic_exit: false,
            registers_size,
        }
    }

    /// The entry block.
    #[must_use]
    pub fn entry(&self) -> BlockId {
        self.entry
    }

    /// The exit block, once [`ControlFlowGraph::calculate_exit_block`] ran.
    #[must_use]
    pub fn exit(&self) -> Option<BlockId> {
        self.exit
    }

    /// Number of registers the body uses.
    #[must_use]
    pub fn registers_size(&self) -> u32 {
        self.registers_size
    }

    /// Overrides the register count.
    pub fn set_registers_size(&mut self, size: u32) {
        self.registers_size = size;
    }

    /// Reserves a fresh register (a pair if `wide`) past the current register file.
    ///
    /// # Errors
    ///
    /// Returns [`Error::EncodingOverflow`] if the register file would exceed the
    /// 16-bit register space.
    pub fn allocate_temp(&mut self, wide: bool) -> Result<Reg> {
        let reg = self.registers_size;
        let width = if wide { 2 } else { 1 };
        let last = reg + width - 1;
        if last > MAX_REGISTER {
            return Err(Error::EncodingOverflow(format!(
                "temporary v{reg} exceeds the register file"
            )));
        }
        self.registers_size = reg + width;
        Ok(reg)
    }

    /// The block, if live.
    #[must_use]
    pub fn block(&self, id: BlockId) -> Option<&Block> {
        self.blocks.get(id.index()).and_then(Option::as_ref)
    }

    pub(crate) fn block_mut(&mut self, id: BlockId) -> Option<&mut Block> {
        self.blocks.get_mut(id.index()).and_then(Option::as_mut)
    }

    fn live_block(&self, id: BlockId) -> Result<&Block> {
        self.block(id)
            .ok_or_else(|| invalid_edit!("block {} does not exist", id))
    }

    fn live_block_mut(&mut self, id: BlockId) -> Result<&mut Block> {
        self.block_mut(id)
            .ok_or_else(|| invalid_edit!("block {} does not exist", id))
    }

    /// Iterates the live blocks in id order.
    pub fn blocks(&self) -> impl Iterator<Item = &Block> {
        self.blocks.iter().flatten()
    }

    /// The ids of the live blocks in id order.
    #[must_use]
    pub fn block_ids(&self) -> Vec<BlockId> {
        self.blocks().map(Block::id).collect()
    }

    /// Number of live blocks.
    #[must_use]
    pub fn num_blocks(&self) -> usize {
        self.blocks().count()
    }

    /// The edge, if live.
    #[must_use]
    pub fn edge(&self, id: EdgeId) -> Option<&Edge> {
        self.edges.get(id.index()).and_then(Option::as_ref)
    }

    /// Iterates the live edges.
    pub fn edges(&self) -> impl Iterator<Item = (EdgeId, &Edge)> {
        self.edges
            .iter()
            .enumerate()
            .filter_map(|(i, e)| e.as_ref().map(|e| (EdgeId::from_index(i), e)))
    }

    /// Number of live edges.
    #[must_use]
    pub fn num_edges(&self) -> usize {
        self.edges.iter().flatten().count()
    }

    /// Incoming edges of `block`.
    pub fn preds(&self, block: BlockId) -> impl Iterator<Item = (EdgeId, &Edge)> {
        self.edge_list(block, |b| &b.preds)
    }

    /// Outgoing edges of `block`.
    pub fn succs(&self, block: BlockId) -> impl Iterator<Item = (EdgeId, &Edge)> {
        self.edge_list(block, |b| &b.succs)
    }

    fn edge_list(
        &self,
        block: BlockId,
        list: impl Fn(&Block) -> &CompactVec<EdgeId>,
    ) -> impl Iterator<Item = (EdgeId, &Edge)> {
        self.block(block)
            .map(|b| list(b).as_slice())
            .unwrap_or_default()
            .iter()
            .filter_map(|&e| self.edge(e).map(|edge| (e, edge)))
    }

    /// The `Goto` successor edge of `block`.
    #[must_use]
    pub fn goto_succ(&self, block: BlockId) -> Option<EdgeId> {
        self.succs(block)
            .find(|(_, e)| e.kind == EdgeKind::Goto)
            .map(|(id, _)| id)
    }

    /// The target of the `Goto` successor of `block`.
    #[must_use]
    pub fn goto_target(&self, block: BlockId) -> Option<BlockId> {
        self.goto_succ(block)
            .and_then(|e| self.edge(e))
            .map(Edge::target)
    }

    /// The `Branch` successor edges of `block`.
    #[must_use]
    pub fn branch_succs(&self, block: BlockId) -> Vec<EdgeId> {
        self.succs(block)
            .filter(|(_, e)| matches!(e.kind, EdgeKind::Branch(_)))
            .map(|(id, _)| id)
            .collect()
    }

    /// The `Throw` successor edges of `block`, in handler-chain order.
    #[must_use]
    pub fn throw_succs(&self, block: BlockId) -> Vec<EdgeId> {
        let mut out: Vec<(u32, EdgeId)> = self
            .succs(block)
            .filter_map(|(id, e)| match e.kind {
                EdgeKind::Throw { index, .. } => Some((index, id)),
                _ => None,
            })
            .collect();
        out.sort_unstable();
        out.into_iter().map(|(_, id)| id).collect()
    }

    /// The handler chain of `block` as `(catch type, handler)` pairs in order.
    #[must_use]
    pub fn catch_signature(&self, block: BlockId) -> Vec<(Option<TypeRef>, BlockId)> {
        self.throw_succs(block)
            .into_iter()
            .filter_map(|e| self.edge(e))
            .filter_map(|e| match e.kind {
                EdgeKind::Throw { catch_type, .. } => Some((catch_type, e.target)),
                _ => None,
            })
            .collect()
    }

    /// `true` if `block` is the target of a throw edge.
    #[must_use]
    pub fn is_handler(&self, block: BlockId) -> bool {
        self.preds(block).any(|(_, e)| e.kind.is_throw())
    }

    /// Iterates every instruction with its position, blocks in id order.
    pub fn instructions(&self) -> impl Iterator<Item = (InsnPos, &IrInstruction)> {
        self.blocks().flat_map(|b| {
            b.indexed_insns()
                .map(move |(i, insn)| (InsnPos::new(b.id, i), insn))
        })
    }

    /// The instruction at `pos`.
    #[must_use]
    pub fn insn(&self, pos: InsnPos) -> Option<&IrInstruction> {
        self.block(pos.block)?.entries.get(pos.index)?.as_insn()
    }

    /// The instruction at `pos`, mutably. Changing the opcode between families that
    /// affect the block's edges breaks the graph; [`ControlFlowGraph::verify`] detects it.
    pub fn insn_mut(&mut self, pos: InsnPos) -> Option<&mut IrInstruction> {
        self.block_mut(pos.block)?
            .entries
            .get_mut(pos.index)?
            .as_insn_mut()
    }

    /// Position of the last instruction of `block`.
    #[must_use]
    pub fn last_insn_pos(&self, block: BlockId) -> Option<InsnPos> {
        self.block(block)?
            .last_insn_index()
            .map(|i| InsnPos::new(block, i))
    }

    /// The position entry in effect at `pos` within its block, searching backwards.
    #[must_use]
    pub fn position_at(
        &self,
        pos: InsnPos,
    ) -> Option<&std::sync::Arc<crate::ir::position::DexPosition>> {
        let block = self.block(pos.block)?;
        let end = pos.index.min(block.entries.len());
        block.entries[..end]
            .iter()
            .rev()
            .find_map(MethodItemEntry::as_position)
    }

    /// Total number of instructions.
    #[must_use]
    pub fn num_insns(&self) -> usize {
        self.blocks().map(Block::insn_count).sum()
    }
}

impl GraphBase for ControlFlowGraph {
    fn node_count(&self) -> usize {
        self.blocks.len()
    }

    fn node_ids(&self) -> impl Iterator<Item = NodeId> {
        self.blocks().map(|b| NodeId::from(b.id))
    }
}

impl Successors for ControlFlowGraph {
    fn successors(&self, node: NodeId) -> impl Iterator<Item = NodeId> {
        self.succs(BlockId::from(node))
            .map(|(_, e)| NodeId::from(e.target))
    }
}

impl Predecessors for ControlFlowGraph {
    fn predecessors(&self, node: NodeId) -> impl Iterator<Item = NodeId> {
        self.preds(BlockId::from(node)).map(|(_, e)| NodeId::from(e.src))
    }
}

impl RootedGraph for ControlFlowGraph {
    fn entry(&self) -> NodeId {
        NodeId::from(self.entry)
    }
}
