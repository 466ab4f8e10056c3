//! Structural edits and the invariant checker.

use rustc_hash::FxHashSet;

use crate::{
    cfg::{Block, BlockId, ControlFlowGraph, Edge, EdgeId, EdgeKind, InsnPos},
    ir::{entry::MethodItemEntry, instruction::IrInstruction},
    Result,
};

impl ControlFlowGraph {
    /// Appends a new empty block and returns its id.
    pub fn create_block(&mut self) -> BlockId {
        let id = BlockId::from_index(self.blocks.len());
        self.blocks.push(Some(Block::new(id)));
        id
    }

    /// Adds an edge.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::InvalidEdit`] if an endpoint does not exist, or `src`
    /// already has a `Goto` edge, an `if` branch edge, or a case edge with the same key.
    pub fn add_edge(&mut self, src: BlockId, target: BlockId, kind: EdgeKind) -> Result<EdgeId> {
        self.live_block(target)?;
        let clash = self.succs(src).any(|(_, e)| match (e.kind, kind) {
            (EdgeKind::Goto, EdgeKind::Goto) => true,
            (EdgeKind::Branch(a), EdgeKind::Branch(b)) => a == b,
            _ => false,
        });
        if clash {
            return Err(invalid_edit!("{} already has a {:?} edge", src, kind));
        }
        let id = EdgeId::from_index(self.edges.len());
        self.live_block_mut(src)?.succs.push(id);
        self.edges.push(Some(Edge { src, target, kind }));
        if let Some(block) = self.block_mut(target) {
            block.preds.push(id);
        }
        Ok(id)
    }

    /// Removes an edge.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::InvalidEdit`] if the edge does not exist.
    pub fn remove_edge(&mut self, edge: EdgeId) -> Result<()> {
        if self.edge(edge).is_none() {
            return Err(invalid_edit!("edge {} does not exist", edge));
        }
        self.delete_edge(edge);
        Ok(())
    }

    /// Points an edge at a different block.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::InvalidEdit`] if the edge or the new target does not exist.
    pub fn set_edge_target(&mut self, edge: EdgeId, target: BlockId) -> Result<()> {
        if self.edge(edge).is_none() {
            return Err(invalid_edit!("edge {} does not exist", edge));
        }
        self.live_block(target)?;
        self.retarget(edge, target);
        Ok(())
    }

    /// Removes a block and all its edges.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::InvalidEdit`] for the entry block or a block that does not
    /// exist.
    pub fn remove_block(&mut self, block: BlockId) -> Result<()> {
        if block == self.entry {
            return Err(invalid_edit!("cannot remove the entry block {}", block));
        }
        self.live_block(block)?;
        self.delete_block(block);
        Ok(())
    }

    pub(crate) fn delete_edge(&mut self, edge: EdgeId) {
        let Some(e) = self.edges.get_mut(edge.index()).and_then(Option::take) else {
            return;
        };
        if let Some(src) = self.block_mut(e.src) {
            src.succs.remove_item(&edge);
        }
        if let Some(target) = self.block_mut(e.target) {
            target.preds.remove_item(&edge);
        }
    }

    pub(crate) fn retarget(&mut self, edge: EdgeId, target: BlockId) {
        let Some(old) = self.edge(edge).map(Edge::target) else {
            return;
        };
        if old == target {
            return;
        }
        if let Some(block) = self.block_mut(old) {
            block.preds.remove_item(&edge);
        }
        if let Some(e) = self.edges.get_mut(edge.index()).and_then(Option::as_mut) {
            e.target = target;
        }
        if let Some(block) = self.block_mut(target) {
            block.preds.push(edge);
        }
    }

    fn resource(&mut self, edge: EdgeId, src: BlockId) {
        let Some(old) = self.edge(edge).map(Edge::src) else {
            return;
        };
        if let Some(block) = self.block_mut(old) {
            block.succs.remove_item(&edge);
        }
        if let Some(e) = self.edges.get_mut(edge.index()).and_then(Option::as_mut) {
            e.src = src;
        }
        if let Some(block) = self.block_mut(src) {
            block.succs.push(edge);
        }
    }

    pub(crate) fn delete_block(&mut self, block: BlockId) {
        let Some(b) = self.block(block) else {
            return;
        };
        let edges: Vec<EdgeId> = b.preds.iter().chain(b.succs.iter()).copied().collect();
        for e in edges {
            self.delete_edge(e);
        }
        self.blocks[block.index()] = None;
        if self.exit == Some(block) {
            self.exit = None;
            self.synthetic_exit = false;
        }
    }

    /// Appends instructions at the end of a block. Only the last appended instruction
    /// may end the block; the caller adds the matching edges.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::InvalidEdit`] if the block already ends in a branch or
    /// terminator, or a non-final instruction would end the block.
    pub fn append_insns(&mut self, block: BlockId, insns: Vec<IrInstruction>) -> Result<()> {
        let b = self.live_block(block)?;
        if b.last_insn().is_some_and(|i| i.opcode().ends_block()) {
            return Err(invalid_edit!("{} already ends in a branch or terminator", block));
        }
        check_straight_line(&insns, true)?;
        let b = self.live_block_mut(block)?;
        b.entries.extend(insns.into_iter().map(MethodItemEntry::Insn));
        self.normalize_throws(block)
    }

    /// Inserts instructions before the entry at `pos`.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::InvalidEdit`] if `pos` is out of range, the instructions
    /// include a branch or terminator, or the insertion would separate a `move-result`
    /// from its producer.
    pub fn insert_before(&mut self, pos: InsnPos, insns: Vec<IrInstruction>) -> Result<()> {
        check_straight_line(&insns, false)?;
        let block = self.live_block(pos.block)?;
        if pos.index > block.entries.len() {
            return Err(invalid_edit!("insertion point {} is out of range", pos));
        }
        let before_move_result = block.entries[pos.index..]
            .iter()
            .find_map(MethodItemEntry::as_insn)
            .is_some_and(|i| i.opcode().is_move_result());
        if before_move_result {
            return Err(invalid_edit!("insertion at {} separates a move-result", pos));
        }
        let b = self.live_block_mut(pos.block)?;
        b.entries
            .splice(pos.index..pos.index, insns.into_iter().map(MethodItemEntry::Insn));
        self.normalize_throws(pos.block)
    }

    /// Inserts instructions after the instruction at `pos`.
    ///
    /// When `pos` is a throwing instruction that ends its block, the block is split and
    /// the instructions start the new block.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::InvalidEdit`] if `pos` is not an instruction or ends its
    /// block with a branch or terminator, the instructions include a branch or
    /// terminator, or the insertion would separate a `move-result` from its producer.
    pub fn insert_after(&mut self, pos: InsnPos, insns: Vec<IrInstruction>) -> Result<()> {
        check_straight_line(&insns, false)?;
        let insn = self
            .insn(pos)
            .ok_or_else(|| invalid_edit!("{} is not an instruction", pos))?;
        if insn.opcode().ends_block() {
            return Err(invalid_edit!("cannot insert after {} at {}", insn.opcode(), pos));
        }
        let produces_result = insn.opcode().has_move_result();
        let is_last = self.last_insn_pos(pos.block) == Some(pos);
        let next_is_move_result = if is_last {
            self.goto_target(pos.block)
                .and_then(|t| self.block(t))
                .is_some_and(Block::starts_with_move_result)
        } else {
            self.block(pos.block)
                .and_then(|b| b.entries[pos.index + 1..].iter().find_map(MethodItemEntry::as_insn))
                .is_some_and(|i| i.opcode().is_move_result())
        };
        if produces_result && next_is_move_result {
            return Err(invalid_edit!("insertion at {} separates a move-result", pos));
        }

        let throws_at_end = is_last && insn.may_throw() && !self.throw_succs(pos.block).is_empty();
        if throws_at_end {
            let tail = self.split_block(pos)?;
            let at = self
                .block(tail)
                .map_or(0, |b| b.entries.iter().take_while(|e| !e.is_insn()).count());
            return self.insert_before(InsnPos::new(tail, at), insns);
        }
        let b = self.live_block_mut(pos.block)?;
        let at = pos.index + 1;
        b.entries.splice(at..at, insns.into_iter().map(MethodItemEntry::Insn));
        self.normalize_throws(pos.block)
    }

    /// Replaces the instruction at `pos` by `insns`.
    ///
    /// A branch or terminator can only be replaced by a sequence ending in an
    /// instruction with the same edge shape (conditional, switch, return or `throw`).
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::InvalidEdit`] if `pos` is not an instruction or the
    /// replacement does not keep the block's edges meaningful.
    pub fn replace_insn(&mut self, pos: InsnPos, insns: Vec<IrInstruction>) -> Result<()> {
        let old = self
            .insn(pos)
            .ok_or_else(|| invalid_edit!("{} is not an instruction", pos))?
            .opcode();
        if old.ends_block() {
            let Some((last, init)) = insns.split_last() else {
                return Err(invalid_edit!("cannot replace {} at {} by nothing", old, pos));
            };
            check_straight_line(init, false)?;
            let op = last.opcode();
            let same_shape = (old.is_conditional_branch() && op.is_conditional_branch())
                || (old.is_switch() && op.is_switch())
                || (old.is_return() && op.is_return())
                || (old.is_throw() && op.is_throw());
            if !same_shape {
                return Err(invalid_edit!("cannot replace {} by {} at {}", old, op, pos));
            }
        } else {
            check_straight_line(&insns, false)?;
        }
        let b = self.live_block_mut(pos.block)?;
        b.entries
            .splice(pos.index..=pos.index, insns.into_iter().map(MethodItemEntry::Insn));
        self.normalize_throws(pos.block)
    }

    /// Replaces the straight-line instruction at `pos` by a mix of instructions and
    /// position, source-block or debug entries.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::InvalidEdit`] if `pos` is not an instruction, the old
    /// instruction ends its block, or `entries` holds a branch, terminator, label or
    /// try/catch marker.
    pub fn replace_insn_with_entries(
        &mut self,
        pos: InsnPos,
        entries: Vec<MethodItemEntry>,
    ) -> Result<()> {
        let old = self
            .insn(pos)
            .ok_or_else(|| invalid_edit!("{} is not an instruction", pos))?
            .opcode();
        if old.ends_block() {
            return Err(invalid_edit!("cannot replace {} at {} by entries", old, pos));
        }
        let mut insns = Vec::new();
        for entry in &entries {
            match entry {
                MethodItemEntry::Insn(insn) => insns.push(insn.clone()),
                MethodItemEntry::Position(_)
                | MethodItemEntry::SourceBlock(_)
                | MethodItemEntry::Debug(_) => {}
                _ => return Err(invalid_edit!("structural entry in replacement at {}", pos)),
            }
        }
        check_straight_line(&insns, false)?;
        let b = self.live_block_mut(pos.block)?;
        b.entries.splice(pos.index..=pos.index, entries);
        self.normalize_throws(pos.block)
    }

    /// Removes the instruction at `pos`. Removing an `if-*` removes its branch edge;
    /// removing a switch removes its case edges.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::InvalidEdit`] if `pos` is not an instruction, is a return
    /// or `throw`, or produces a result that a following `move-result` still consumes.
    pub fn remove_insn(&mut self, pos: InsnPos) -> Result<()> {
        let insn = self
            .insn(pos)
            .ok_or_else(|| invalid_edit!("{} is not an instruction", pos))?;
        let op = insn.opcode();
        if op.is_terminal() {
            return Err(invalid_edit!("cannot remove terminator {} at {}", op, pos));
        }
        if op.has_move_result() {
            let is_last = self.last_insn_pos(pos.block) == Some(pos);
            let consumed = if is_last {
                self.goto_target(pos.block)
                    .and_then(|t| self.block(t))
                    .is_some_and(Block::starts_with_move_result)
            } else {
                self.block(pos.block)
                    .and_then(|b| {
                        b.entries[pos.index + 1..]
                            .iter()
                            .find_map(MethodItemEntry::as_insn)
                    })
                    .is_some_and(|i| i.opcode().is_move_result())
            };
            if consumed {
                return Err(invalid_edit!("result of {} at {} is still consumed", op, pos));
            }
        }
        if op.is_conditional_branch() || op.is_switch() {
            for e in self.branch_succs(pos.block) {
                self.delete_edge(e);
            }
        }
        self.live_block_mut(pos.block)?.entries.remove(pos.index);
        self.normalize_throws(pos.block)
    }

    /// Splits `pos.block` after the instruction at `pos`. The entries that follow move
    /// to a new block which takes over the normal successors; the old block falls
    /// through to it. Throw edges stay with whichever part still throws. Returns the
    /// new block.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::InvalidEdit`] if `pos` is not an instruction or ends the
    /// block with a branch or terminator.
    pub fn split_block(&mut self, pos: InsnPos) -> Result<BlockId> {
        let insn = self
            .insn(pos)
            .ok_or_else(|| invalid_edit!("{} is not an instruction", pos))?;
        if insn.opcode().ends_block() {
            return Err(invalid_edit!("cannot split after {} at {}", insn.opcode(), pos));
        }
        let position = self.position_at(InsnPos::new(pos.block, pos.index + 1)).cloned();
        let tail = self.create_block();

        let mut moved = self.live_block_mut(pos.block)?.entries.split_off(pos.index + 1);
        let leading_position = moved
            .iter()
            .take_while(|e| !e.is_insn())
            .any(|e| matches!(e, MethodItemEntry::Position(_)));
        if !leading_position {
            if let Some(position) = position {
                moved.insert(0, MethodItemEntry::Position(position));
            }
        }
        self.live_block_mut(tail)?.entries = moved;

        let succs: Vec<(EdgeId, EdgeKind, BlockId)> = self
            .succs(pos.block)
            .map(|(id, e)| (id, e.kind, e.target))
            .collect();
        let head_throws = self
            .block(pos.block)
            .is_some_and(|b| b.insns().any(IrInstruction::may_throw));
        let tail_throws = self
            .block(tail)
            .is_some_and(|b| b.insns().any(IrInstruction::may_throw));
        for (id, kind, target) in succs {
            if kind.is_throw() {
                if tail_throws {
                    self.add_edge(tail, target, kind)?;
                }
                if !head_throws {
                    self.delete_edge(id);
                }
            } else {
                self.resource(id, tail);
            }
        }
        self.add_edge(pos.block, tail, EdgeKind::Goto)?;
        if self.exit == Some(pos.block) {
            self.exit = Some(tail);
        }
        Ok(tail)
    }

    /// Appends `b` to `a` when `a` falls through only into `b` and `b` has no other
    /// predecessor.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::InvalidEdit`] if the merge is not legal: `b` is the entry,
    /// `a` has other successors or throw edges, or `b` has other predecessors.
    pub fn merge_blocks(&mut self, a: BlockId, b: BlockId) -> Result<()> {
        if a == b || b == self.entry {
            return Err(invalid_edit!("cannot merge {} into {}", b, a));
        }
        let first = self.live_block(a)?;
        let second = self.live_block(b)?;
        let link = match first.succs.as_slice() {
            [only] => *only,
            _ => return Err(invalid_edit!("{} has more than one successor", a)),
        };
        let links = self
            .edge(link)
            .is_some_and(|e| e.kind == EdgeKind::Goto && e.target == b);
        if !links || second.preds.len() != 1 {
            return Err(invalid_edit!("{} does not fall through only into {}", a, b));
        }

        self.delete_edge(link);
        let entries = std::mem::take(&mut self.live_block_mut(b)?.entries);
        self.live_block_mut(a)?.entries.extend(entries);
        let succs: Vec<EdgeId> = self.succs(b).map(|(id, _)| id).collect();
        for e in succs {
            self.resource(e, a);
        }
        let was_exit = self.exit == Some(b);
        self.delete_block(b);
        if was_exit {
            self.exit = Some(a);
        }
        Ok(())
    }

    /// Gives `to` the same handler chain as `from`.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::InvalidEdit`] if `to` already has throw edges or a block
    /// does not exist.
    pub fn copy_throw_edges(&mut self, from: BlockId, to: BlockId) -> Result<()> {
        self.live_block(from)?;
        self.live_block(to)?;
        if !self.throw_succs(to).is_empty() {
            return Err(invalid_edit!("{} already has throw edges", to));
        }
        let edges: Vec<(BlockId, EdgeKind)> = self
            .throw_succs(from)
            .into_iter()
            .filter_map(|e| self.edge(e))
            .map(|e| (e.target, e.kind))
            .collect();
        for (target, kind) in edges {
            self.add_edge(to, target, kind)?;
        }
        Ok(())
    }

    /// Drops unreachable blocks and empty pass-through blocks, and merges blocks
    /// linked by a lone fall-through. Returns the number of blocks removed.
    pub fn simplify(&mut self) -> usize {
        let mut removed = 0;
        loop {
            let before = removed;
            removed += self.remove_unreachable_blocks();
            removed += self.remove_empty_goto_blocks();
            let pairs: Vec<(BlockId, BlockId)> = self
                .blocks()
                .filter_map(|b| match b.succs.as_slice() {
                    [only] => self.edge(*only).map(|e| (b.id, e.target, e.kind)),
                    _ => None,
                })
                .filter(|(a, t, kind)| {
                    *kind == EdgeKind::Goto
                        && a != t
                        && *t != self.entry
                        && Some(*t) != self.exit
                        && self.block(*t).is_some_and(|tb| tb.preds.len() == 1)
                })
                .map(|(a, t, _)| (a, t))
                .collect();
            let mut gone = FxHashSet::default();
            for (a, b) in pairs {
                if gone.contains(&a) || gone.contains(&b) {
                    continue;
                }
                if self.merge_blocks(a, b).is_ok() {
                    gone.insert(b);
                    removed += 1;
                }
            }
            if removed == before {
                return removed;
            }
        }
    }

    /// Establishes a single exit block. If exactly one block leaves the method, it
    /// becomes the exit; otherwise a synthetic empty exit is created and every leaving
    /// block gets a [`EdgeKind::Ghost`] edge into it. Returns the exit.
    pub fn calculate_exit_block(&mut self) -> BlockId {
        if self.synthetic_exit {
            if let Some(old) = self.exit {
                self.delete_block(old);
            }
        }
        let leaving: Vec<BlockId> = self
            .blocks()
            .filter(|b| b.ends_in_terminal())
            .map(Block::id)
            .collect();
        if let [only] = leaving.as_slice() {
            self.exit = Some(*only);
            self.synthetic_exit = false;
            return *only;
        }
        let exit = self.create_block();
        for b in leaving {
            let id = EdgeId::from_index(self.edges.len());
            self.edges.push(Some(Edge {
                src: b,
                target: exit,
                kind: EdgeKind::Ghost,
            }));
            if let Some(block) = self.block_mut(b) {
                block.succs.push(id);
            }
            if let Some(block) = self.block_mut(exit) {
                block.preds.push(id);
            }
        }
        self.exit = Some(exit);
        self.synthetic_exit = true;
        exit
    }

    /// `true` if the exit block was synthesised by [`ControlFlowGraph::calculate_exit_block`].
    #[must_use]
    pub fn has_synthetic_exit(&self) -> bool {
        self.synthetic_exit
    }

    /// Removes throw edges from blocks that no longer throw and splits blocks with
    /// throw edges after every throwing instruction that is not last.
    fn normalize_throws(&mut self, block: BlockId) -> Result<()> {
        if self.throw_succs(block).is_empty() {
            return Ok(());
        }
        let mut current = block;
        loop {
            let Some(b) = self.block(current) else {
                return Ok(());
            };
            let last = b.last_insn_index();
            let early_throw = b
                .indexed_insns()
                .find(|(i, insn)| insn.may_throw() && Some(*i) != last)
                .map(|(i, _)| i);
            match early_throw {
                Some(index) => current = self.split_block(InsnPos::new(current, index))?,
                None => break,
            }
        }
        let throws = self
            .block(current)
            .and_then(Block::last_insn)
            .is_some_and(IrInstruction::may_throw);
        if !throws {
            for e in self.throw_succs(current) {
                self.delete_edge(e);
            }
        }
        Ok(())
    }

    /// Checks every structural invariant.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::InvalidEdit`] describing the first violation.
    pub fn verify(&self) -> Result<()> {
        self.live_block(self.entry)?;
        for (id, e) in self.edges() {
            let src = self.live_block(e.src)?;
            let target = self.live_block(e.target)?;
            if !src.succs.contains(&id) || !target.preds.contains(&id) {
                return Err(invalid_edit!("edge {} is not linked from its endpoints", id));
            }
            if e.kind == EdgeKind::Ghost && Some(e.target) != self.exit {
                return Err(invalid_edit!("ghost edge {} does not lead to the exit", id));
            }
        }
        for block in self.blocks() {
            for e in block.succs.iter().chain(block.preds.iter()) {
                if self.edge(*e).is_none() {
                    return Err(invalid_edit!("{} references dead edge {}", block.id, e));
                }
            }
            self.verify_block(block)?;
        }
        Ok(())
    }

    fn verify_block(&self, block: &Block) -> Result<()> {
        let id = block.id;
        let insns: Vec<&IrInstruction> = block.insns().collect();
        for (i, insn) in insns.iter().enumerate() {
            let op = insn.opcode();
            if op.is_goto() {
                return Err(invalid_edit!("{} stores a goto", id));
            }
            if op.ends_block() && i + 1 != insns.len() {
                return Err(invalid_edit!("{} has {} before its end", id, op));
            }
            if op.is_move_result() {
                let producer_ok = if i == 0 {
                    let mut preds = self.preds(id);
                    match (preds.next(), preds.next()) {
                        (Some((_, e)), None) => {
                            e.kind == EdgeKind::Goto
                                && self
                                    .block(e.src)
                                    .and_then(Block::last_insn)
                                    .is_some_and(|p| p.opcode().has_move_result())
                        }
                        _ => false,
                    }
                } else {
                    insns[i - 1].opcode().has_move_result()
                };
                if !producer_ok {
                    return Err(invalid_edit!("{} has a move-result without producer", id));
                }
            }
        }

        let mut gotos = 0;
        let mut ifs = 0;
        let mut keys = FxHashSet::default();
        let mut throw_indices = Vec::new();
        for (_, e) in self.succs(id) {
            match e.kind {
                EdgeKind::Goto => gotos += 1,
                EdgeKind::Branch(None) => ifs += 1,
                EdgeKind::Branch(Some(key)) => {
                    if !keys.insert(key) {
                        return Err(invalid_edit!("{} repeats case key {}", id, key));
                    }
                }
                EdgeKind::Throw { index, .. } => throw_indices.push(index),
                EdgeKind::Ghost => {}
            }
        }

        let last = insns.last().map(|i| i.opcode());
        let shape_ok = match last {
            Some(op) if op.is_terminal() => gotos == 0 && ifs == 0 && keys.is_empty(),
            Some(op) if op.is_conditional_branch() => gotos == 1 && ifs == 1 && keys.is_empty(),
            Some(op) if op.is_switch() => gotos == 1 && ifs == 0,
            _ if self.synthetic_exit && Some(id) == self.exit => gotos == 0 && ifs == 0,
            _ => gotos == 1 && ifs == 0 && keys.is_empty(),
        };
        if !shape_ok {
            return Err(invalid_edit!(
                "{} has {} goto, {} branch and {} case edges for {:?}",
                id,
                gotos,
                ifs,
                keys.len(),
                last
            ));
        }

        if !throw_indices.is_empty() {
            if !insns.last().is_some_and(|i| i.may_throw()) {
                return Err(invalid_edit!("{} has throw edges but does not throw", id));
            }
            if insns[..insns.len() - 1].iter().any(|i| i.may_throw()) {
                return Err(invalid_edit!("{} throws before its last instruction", id));
            }
            throw_indices.sort_unstable();
            #[allow(clippy::cast_possible_truncation)]
            let dense = throw_indices
                .iter()
                .enumerate()
                .all(|(i, &index)| index == i as u32);
            if !dense {
                return Err(invalid_edit!("{} has a gap in its handler chain", id));
            }
        }
        Ok(())
    }
}

fn check_straight_line(insns: &[IrInstruction], allow_last: bool) -> Result<()> {
    let count = insns.len();
    for (i, insn) in insns.iter().enumerate() {
        let op = insn.opcode();
        if op.is_goto() {
            return Err(invalid_edit!("goto is expressed by edges"));
        }
        if op.ends_block() && !(allow_last && i + 1 == count) {
            return Err(invalid_edit!("{} can only end a block", op));
        }
    }
    Ok(())
}
