//! Linear form to CFG.

use std::sync::Arc;

use rustc_hash::{FxHashMap, FxHashSet};

use crate::{
    cfg::{Block, BlockId, ControlFlowGraph, EdgeKind},
    ir::{
        entry::{CatchEntry, CatchId, MethodItemEntry},
        instruction::{Label, Operand},
        position::DexPosition,
        Pool,
    },
    Result,
};

/// A block under construction.
#[derive(Default)]
struct Pending {
    entries: Vec<MethodItemEntry>,
    try_id: Option<CatchId>,
    has_insn: bool,
}

impl ControlFlowGraph {
    /// Builds a CFG from a linear body.
    ///
    /// Every instruction is validated against the pool. `goto` instructions become
    /// edges; branch and switch operands are cleared and replaced by edges; try and
    /// catch markers become throw edges; unreachable blocks are dropped.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::MalformedBody`] when a label is defined twice or never,
    /// try regions are nested or unbalanced, a try has no handlers, a catch-all is not
    /// last in its chain, a switch repeats a key, control falls off the end of the
    /// body, or an instruction is malformed.
    pub fn build(
        entries: Vec<MethodItemEntry>,
        registers_size: u32,
        pool: &Pool,
    ) -> Result<ControlFlowGraph> {
        let chains = collect_catch_chains(&entries)?;
        check_labels(&entries)?;
        for insn in entries.iter().filter_map(MethodItemEntry::as_insn) {
            insn.validate(pool)?;
        }

        let (pending, label_block, handler_block) = split_blocks(entries);

        let mut cfg = ControlFlowGraph {
            blocks: Vec::with_capacity(pending.len()),
            edges: Vec::with_capacity(pending.len() * 2),
            entry: BlockId::from_index(0),
            exit: None,
            synthetic_exit: false,
            registers_size,
        };
        let mut tries = Vec::with_capacity(pending.len());
        for (i, p) in pending.into_iter().enumerate() {
            let mut block = Block::new(BlockId::from_index(i));
            block.entries = p.entries;
            cfg.blocks.push(Some(block));
            tries.push(p.try_id);
        }

        let resolve = |label: Label| -> Result<BlockId> {
            label_block
                .get(&label)
                .copied()
                .ok_or_else(|| malformed_body!("branch to undefined label {}", label))
        };

        let count = cfg.blocks.len();
        let mut falls_off = Vec::new();
        for i in 0..count {
            let id = BlockId::from_index(i);
            let next = (i + 1 < count).then(|| BlockId::from_index(i + 1));
            let mut new_edges: Vec<(BlockId, EdgeKind)> = Vec::new();

            let (last_op, last_operand) = {
                let Some(block) = cfg.block_mut(id) else {
                    continue;
                };
                // goto is implied by the edge
                if let Some(idx) = block.last_insn_index() {
                    if block.entries[idx]
                        .as_insn()
                        .is_some_and(|insn| insn.opcode().is_goto())
                    {
                        let entry = block.entries.remove(idx);
                        if let Some(insn) = entry.as_insn() {
                            let target = insn
                                .branch_target()
                                .ok_or_else(|| malformed_body!("goto without a target"))?;
                            new_edges.push((resolve(target)?, EdgeKind::Goto));
                        }
                    }
                }
                match block.last_insn_index() {
                    Some(idx) if new_edges.is_empty() => {
                        match block.entries[idx].as_insn_mut() {
                            Some(insn) => {
                                let op = insn.opcode();
                                let operand = if op.is_conditional_branch() || op.is_switch() {
                                    let operand = insn.operand().clone();
                                    insn.set_operand(Operand::None);
                                    operand
                                } else {
                                    Operand::None
                                };
                                (Some(op), operand)
                            }
                            None => (None, Operand::None),
                        }
                    }
                    Some(idx) => (
                        block.entries[idx].as_insn().map(|insn| insn.opcode()),
                        Operand::None,
                    ),
                    None => (None, Operand::None),
                }
            };

            if new_edges.is_empty() {
                match last_op {
                    Some(op) if op.is_terminal() => {}
                    Some(op) if op.is_conditional_branch() => {
                        let Operand::Branch(target) = last_operand else {
                            return Err(malformed_body!("{} without a target", op));
                        };
                        new_edges.push((resolve(target)?, EdgeKind::Branch(None)));
                        push_fallthrough(&mut new_edges, &mut falls_off, id, next);
                    }
                    Some(op) if op.is_switch() => {
                        let Operand::Switch(cases) = last_operand else {
                            return Err(malformed_body!("switch without cases"));
                        };
                        let mut seen = FxHashSet::default();
                        for case in cases {
                            if !seen.insert(case.key) {
                                return Err(malformed_body!(
                                    "switch repeats case key {}",
                                    case.key
                                ));
                            }
                            new_edges
                                .push((resolve(case.target)?, EdgeKind::Branch(Some(case.key))));
                        }
                        push_fallthrough(&mut new_edges, &mut falls_off, id, next);
                    }
                    _ => push_fallthrough(&mut new_edges, &mut falls_off, id, next),
                }
            }

            let throws = cfg
                .block(id)
                .and_then(Block::last_insn)
                .is_some_and(|insn| insn.may_throw());
            if throws {
                if let Some(try_id) = tries[i] {
                    let chain = chains.get(&try_id).map(Vec::as_slice).unwrap_or_default();
                    for (index, catch) in chain.iter().enumerate() {
                        let handler = handler_block
                            .get(&(catch.id, catch.index))
                            .copied()
                            .ok_or_else(|| malformed_body!("catch {} has no handler", catch.id))?;
                        #[allow(clippy::cast_possible_truncation)]
                        let kind = EdgeKind::Throw {
                            catch_type: catch.catch_type,
                            index: index as u32,
                        };
                        new_edges.push((handler, kind));
                    }
                }
            }

            for (target, kind) in new_edges {
                cfg.add_edge(id, target, kind)?;
            }
        }

        cfg.remove_unreachable_blocks();
        if let Some(block) = falls_off.into_iter().find(|b| cfg.block(*b).is_some()) {
            return Err(malformed_body!("control falls off the end of the body in {}", block));
        }
        cfg.remove_empty_goto_blocks();
        Ok(cfg)
    }
}

fn push_fallthrough(
    edges: &mut Vec<(BlockId, EdgeKind)>,
    falls_off: &mut Vec<BlockId>,
    block: BlockId,
    next: Option<BlockId>,
) {
    match next {
        Some(next) => edges.push((next, EdgeKind::Goto)),
        None => falls_off.push(block),
    }
}

/// Checks that every label is defined once and every referenced label is defined.
fn check_labels(entries: &[MethodItemEntry]) -> Result<()> {
    let mut defined = FxHashSet::default();
    for entry in entries {
        if let MethodItemEntry::Target(label) = entry {
            if !defined.insert(*label) {
                return Err(malformed_body!("label {} is defined twice", label));
            }
        }
    }
    for insn in entries.iter().filter_map(MethodItemEntry::as_insn) {
        let mut referenced: Vec<Label> = insn.branch_target().into_iter().collect();
        if let Some(cases) = insn.switch_cases() {
            referenced.extend(cases.iter().map(|c| c.target));
        }
        if insn.opcode().is_branch() && !insn.opcode().is_switch() && referenced.is_empty() {
            return Err(malformed_body!("{} without a target", insn.opcode()));
        }
        if let Some(missing) = referenced.iter().find(|l| !defined.contains(*l)) {
            return Err(malformed_body!("branch to undefined label {}", missing));
        }
    }
    Ok(())
}

/// Validates try markers and returns each catch chain sorted by index.
fn collect_catch_chains(
    entries: &[MethodItemEntry],
) -> Result<FxHashMap<CatchId, Vec<CatchEntry>>> {
    let mut open: Option<CatchId> = None;
    let mut used = Vec::new();
    let mut chains: FxHashMap<CatchId, Vec<CatchEntry>> = FxHashMap::default();

    for entry in entries {
        match entry {
            MethodItemEntry::TryStart(id) => {
                if let Some(outer) = open {
                    return Err(malformed_body!("try {} opened inside try {}", id, outer));
                }
                open = Some(*id);
                used.push(*id);
            }
            MethodItemEntry::TryEnd(id) => match open {
                Some(current) if current == *id => open = None,
                Some(current) => {
                    return Err(malformed_body!("try {} closed while {} is open", id, current))
                }
                None => return Err(malformed_body!("try {} closed but never opened", id)),
            },
            MethodItemEntry::Catch(catch) => chains.entry(catch.id).or_default().push(*catch),
            _ => {}
        }
    }
    if let Some(id) = open {
        return Err(malformed_body!("try {} is never closed", id));
    }

    for chain in chains.values_mut() {
        chain.sort_by_key(|c| c.index);
        if chain.windows(2).any(|w| w[0].index == w[1].index) {
            return Err(malformed_body!("catch {} repeats a handler index", chain[0].id));
        }
        let last = chain.len() - 1;
        if chain[..last].iter().any(|c| c.catch_type.is_none()) {
            return Err(malformed_body!("catch-all of {} is not last in its chain", chain[0].id));
        }
    }
    if let Some(id) = used.iter().find(|id| !chains.contains_key(id)) {
        return Err(malformed_body!("try {} has no handlers", id));
    }
    Ok(chains)
}

type Split = (
    Vec<Pending>,
    FxHashMap<Label, BlockId>,
    FxHashMap<(CatchId, u32), BlockId>,
);

/// Cuts the body into blocks. Labels, try markers and catches are consumed; positions
/// are rematerialised at the start of each block that does not begin with its own.
fn split_blocks(entries: Vec<MethodItemEntry>) -> Split {
    let mut blocks: Vec<Pending> = vec![Pending::default()];
    let mut label_block = FxHashMap::default();
    let mut handler_block = FxHashMap::default();
    let mut try_state: Option<CatchId> = None;
    let mut need_new = false;
    let mut current_position: Option<Arc<DexPosition>> = None;

    let start_block = |blocks: &mut Vec<Pending>, need_new: &mut bool, force: bool| {
        let has_insn = blocks.last().is_some_and(|b| b.has_insn);
        if *need_new || (force && has_insn) {
            blocks.push(Pending::default());
            *need_new = false;
        }
    };

    for entry in entries {
        match entry {
            MethodItemEntry::Target(label) => {
                start_block(&mut blocks, &mut need_new, true);
                label_block.insert(label, BlockId::from_index(blocks.len() - 1));
            }
            MethodItemEntry::Catch(catch) => {
                start_block(&mut blocks, &mut need_new, true);
                let block = BlockId::from_index(blocks.len() - 1);
                handler_block.insert((catch.id, catch.index), block);
            }
            MethodItemEntry::TryStart(id) => {
                start_block(&mut blocks, &mut need_new, true);
                try_state = Some(id);
            }
            MethodItemEntry::TryEnd(_) => {
                start_block(&mut blocks, &mut need_new, true);
                try_state = None;
            }
            MethodItemEntry::Insn(insn) => {
                start_block(&mut blocks, &mut need_new, false);
                let ends = insn.opcode().ends_block() || (insn.may_throw() && try_state.is_some());
                if let Some(block) = blocks.last_mut() {
                    if !block.has_insn {
                        block.try_id = try_state;
                        block.has_insn = true;
                        let own_position = block
                            .entries
                            .iter()
                            .any(|e| matches!(e, MethodItemEntry::Position(_)));
                        if !own_position {
                            if let Some(pos) = &current_position {
                                block.entries.insert(0, MethodItemEntry::Position(pos.clone()));
                            }
                        }
                    }
                    block.entries.push(MethodItemEntry::Insn(insn));
                }
                need_new = ends;
            }
            MethodItemEntry::Position(pos) => {
                start_block(&mut blocks, &mut need_new, false);
                current_position = Some(pos.clone());
                if let Some(block) = blocks.last_mut() {
                    block.entries.push(MethodItemEntry::Position(pos));
                }
            }
            other => {
                start_block(&mut blocks, &mut need_new, false);
                if let Some(block) = blocks.last_mut() {
                    block.entries.push(other);
                }
            }
        }
    }
    (blocks, label_block, handler_block)
}

impl ControlFlowGraph {
    /// Removes every block not reachable from the entry. Returns the number removed.
    pub(crate) fn remove_unreachable_blocks(&mut self) -> usize {
        let mut reachable = vec![false; self.blocks.len()];
        let mut stack = vec![self.entry];
        while let Some(b) = stack.pop() {
            if reachable[b.index()] {
                continue;
            }
            reachable[b.index()] = true;
            stack.extend(self.succs(b).map(|(_, e)| e.target));
        }
        let dead: Vec<BlockId> = self
            .blocks()
            .map(Block::id)
            .filter(|b| !reachable[b.index()] && Some(*b) != self.exit)
            .collect();
        for b in &dead {
            self.delete_block(*b);
        }
        dead.len()
    }

    /// Removes blocks that hold nothing and only forward to their `Goto` successor.
    pub(crate) fn remove_empty_goto_blocks(&mut self) -> usize {
        let candidates: Vec<BlockId> = self
            .blocks()
            .filter(|b| {
                b.entries.iter().all(|e| matches!(e, MethodItemEntry::Position(_)))
                    && b.id != self.entry
                    && Some(b.id) != self.exit
                    && b.succs.len() == 1
            })
            .map(Block::id)
            .collect();
        let mut removed = 0;
        for b in candidates {
            let Some(target) = self.goto_target(b) else {
                continue;
            };
            if target == b || self.is_handler(b) {
                continue;
            }
            let preds: Vec<_> = self.preds(b).map(|(id, _)| id).collect();
            for e in preds {
                self.retarget(e, target);
            }
            self.delete_block(b);
            removed += 1;
        }
        removed
    }
}
