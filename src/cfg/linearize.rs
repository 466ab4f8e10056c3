//! CFG to linear form.

use std::sync::Arc;

use rustc_hash::{FxHashMap, FxHashSet};

use crate::{
    cfg::{Block, BlockId, ControlFlowGraph, EdgeKind},
    ir::{
        entry::{CatchEntry, CatchId, MethodItemEntry},
        instruction::{IrInstruction, Label, Operand, SwitchCase},
        opcode::IrOpcode,
        position::DexPosition,
        TypeRef,
    },
    Result,
};

type Signature = Vec<(Option<TypeRef>, BlockId)>;

impl ControlFlowGraph {
    /// Serialises the graph back into a linear body.
    ///
    /// Blocks are laid out in id order, except that a block starting with a
    /// `move-result*` is placed right after its producer. `goto`s are emitted only where
    /// the fall-through successor is not the next block; labels only where needed. Try
    /// regions are rebuilt from the handler chain of each throwing block, and repeated
    /// positions are dropped.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::InvalidEdit`] if a `move-result*` block can not be placed
    /// after its producer.
    pub fn linearize(&self) -> Result<Vec<MethodItemEntry>> {
        let order = self.layout()?;
        let next_of: FxHashMap<BlockId, Option<BlockId>> = order
            .iter()
            .enumerate()
            .map(|(i, b)| (*b, order.get(i + 1).copied()))
            .collect();

        let mut labels: FxHashMap<BlockId, Label> = FxHashMap::default();
        for &b in &order {
            for (_, e) in self.succs(b) {
                let needs_label = match e.kind {
                    EdgeKind::Branch(_) => true,
                    EdgeKind::Goto => next_of.get(&b).copied().flatten() != Some(e.target),
                    EdgeKind::Throw { .. } | EdgeKind::Ghost => false,
                };
                if needs_label {
                    let next = Label::from_index(labels.len());
                    labels.entry(e.target).or_insert(next);
                }
            }
        }

        // Handler chains, one catch id per distinct signature.
        let mut chain_ids: FxHashMap<Signature, CatchId> = FxHashMap::default();
        let mut catches_at: FxHashMap<BlockId, Vec<CatchEntry>> = FxHashMap::default();
        let mut block_try: FxHashMap<BlockId, Option<CatchId>> = FxHashMap::default();
        for &b in &order {
            let signature = self.catch_signature(b);
            if signature.is_empty() {
                continue;
            }
            let fresh = CatchId::from_index(chain_ids.len());
            let id = *chain_ids.entry(signature.clone()).or_insert_with(|| {
                for (i, (catch_type, handler)) in signature.iter().enumerate() {
                    catches_at.entry(*handler).or_default().push(CatchEntry {
                        id: fresh,
                        catch_type: *catch_type,
                        index: u32::try_from(i).unwrap_or(u32::MAX),
                    });
                }
                fresh
            });
            block_try.insert(b, Some(id));
        }

        let mut out = Vec::with_capacity(self.num_insns() + order.len() * 2);
        let mut open_try: Option<CatchId> = None;
        let mut last_position: Option<Arc<DexPosition>> = None;

        for (i, &b) in order.iter().enumerate() {
            let Some(block) = self.block(b) else {
                continue;
            };
            let wanted = match block_try.get(&b) {
                Some(id) => *id,
                None if block.insns().any(IrInstruction::may_throw) => None,
                None => open_try,
            };
            if wanted != open_try {
                if let Some(id) = open_try.take() {
                    out.push(MethodItemEntry::TryEnd(id));
                }
            }
            if let Some(label) = labels.get(&b) {
                out.push(MethodItemEntry::Target(*label));
            }
            if let Some(catches) = catches_at.get(&b) {
                out.extend(catches.iter().map(|c| MethodItemEntry::Catch(*c)));
            }
            if wanted != open_try {
                if let Some(id) = wanted {
                    out.push(MethodItemEntry::TryStart(id));
                }
                open_try = wanted;
            }

            let last_index = block.last_insn_index();
            for (index, entry) in block.entries().iter().enumerate() {
                match entry {
                    MethodItemEntry::Position(pos) => {
                        let repeated = last_position
                            .as_ref()
                            .is_some_and(|last| Arc::ptr_eq(last, pos) || **last == **pos);
                        if !repeated {
                            last_position = Some(pos.clone());
                            out.push(entry.clone());
                        }
                    }
                    MethodItemEntry::Insn(insn) if Some(index) == last_index => {
                        out.push(MethodItemEntry::Insn(self.with_targets(b, insn, &labels)));
                    }
                    _ => out.push(entry.clone()),
                }
            }

            if let Some(target) = self.goto_target(b) {
                let next = order.get(i + 1).copied();
                if next != Some(target) {
                    let label = labels
                        .get(&target)
                        .copied()
                        .ok_or_else(|| invalid_edit!("no label for {}", target))?;
                    out.push(MethodItemEntry::Insn(
                        IrInstruction::new(IrOpcode::Goto).with_operand(Operand::Branch(label)),
                    ));
                }
            }
        }
        if let Some(id) = open_try {
            out.push(MethodItemEntry::TryEnd(id));
        }
        Ok(out)
    }

    /// The block order used by [`ControlFlowGraph::linearize`].
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::InvalidEdit`] if a `move-result*` block has no unique
    /// producer to follow.
    pub fn layout(&self) -> Result<Vec<BlockId>> {
        let skip_exit = if self.synthetic_exit { self.exit } else { None };
        let attached: FxHashSet<BlockId> = self
            .blocks()
            .filter(|b| b.starts_with_move_result())
            .map(Block::id)
            .collect();

        let mut placed = vec![false; self.blocks.len()];
        let mut order = Vec::with_capacity(self.blocks.len());
        let seeds = std::iter::once(self.entry).chain(self.blocks().map(Block::id));
        for seed in seeds {
            if placed[seed.index()] || attached.contains(&seed) || Some(seed) == skip_exit {
                continue;
            }
            let mut current = seed;
            loop {
                placed[current.index()] = true;
                order.push(current);
                match self.goto_target(current) {
                    Some(next) if attached.contains(&next) && !placed[next.index()] => {
                        current = next;
                    }
                    _ => break,
                }
            }
        }
        if let Some(orphan) = attached.iter().find(|b| !placed[b.index()]) {
            return Err(invalid_edit!("move-result block {} has no producer", orphan));
        }
        Ok(order)
    }

    /// Restores branch and switch operands on the last instruction of `block`.
    fn with_targets(
        &self,
        block: BlockId,
        insn: &IrInstruction,
        labels: &FxHashMap<BlockId, Label>,
    ) -> IrInstruction {
        let op = insn.opcode();
        let mut out = insn.clone();
        if op.is_conditional_branch() {
            let target = self
                .succs(block)
                .find(|(_, e)| e.kind == EdgeKind::Branch(None))
                .and_then(|(_, e)| labels.get(&e.target).copied());
            if let Some(label) = target {
                out.set_operand(Operand::Branch(label));
            }
        } else if op.is_switch() {
            let mut cases: Vec<SwitchCase> = self
                .succs(block)
                .filter_map(|(_, e)| match e.kind {
                    EdgeKind::Branch(Some(key)) => labels
                        .get(&e.target)
                        .map(|&target| SwitchCase { key, target }),
                    _ => None,
                })
                .collect();
            cases.sort_by_key(|c| c.key);
            out.set_operand(Operand::Switch(cases));
        }
        out
    }
}
