//! Big blocks: chains of blocks that execute as one straight line.

use crate::cfg::{BlockId, ControlFlowGraph, EdgeKind};

/// A maximal chain of blocks `b0 -> b1 -> ... -> bn` where each `bi` falls through only
/// into `bi+1`, each `bi+1` is reached only from `bi`, and all blocks share the same
/// handler chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BigBlock {
    /// The blocks in execution order.
    pub blocks: Vec<BlockId>,
}

impl BigBlock {
    /// The first block.
    #[must_use]
    pub fn head(&self) -> BlockId {
        self.blocks[0]
    }
}

/// Partitions the live blocks of `cfg` into big blocks, ordered by head id.
#[must_use]
pub fn big_blocks(cfg: &ControlFlowGraph) -> Vec<BigBlock> {
    let mut seen = vec![false; cfg.blocks.len()];
    let mut out = Vec::new();
    let skip = if cfg.synthetic_exit { cfg.exit } else { None };

    for block in cfg.blocks() {
        let id = block.id();
        if seen[id.index()] || Some(id) == skip || continues_from(cfg, id).is_some() {
            continue;
        }
        let mut chain = vec![id];
        seen[id.index()] = true;
        let mut current = id;
        while let Some(next) = unique_successor(cfg, current) {
            if seen[next.index()] || continues_from(cfg, next) != Some(current) {
                break;
            }
            seen[next.index()] = true;
            chain.push(next);
            current = next;
        }
        out.push(BigBlock { blocks: chain });
    }

    // blocks on a cycle of lone fall-throughs have no head; emit them singly
    for block in cfg.blocks() {
        let id = block.id();
        if !seen[id.index()] && Some(id) != skip {
            out.push(BigBlock { blocks: vec![id] });
        }
    }
    out.sort_by_key(BigBlock::head);
    out
}

/// The block `b` continues, if `b`'s only predecessor falls through only into `b`
/// with the same handler chain.
fn continues_from(cfg: &ControlFlowGraph, b: BlockId) -> Option<BlockId> {
    if b == cfg.entry() {
        return None;
    }
    let mut preds = cfg.preds(b);
    let (_, edge) = preds.next()?;
    if preds.next().is_some() || edge.kind() != EdgeKind::Goto || edge.src() == b {
        return None;
    }
    let p = edge.src();
    (unique_successor(cfg, p) == Some(b) && cfg.catch_signature(p) == cfg.catch_signature(b))
        .then_some(p)
}

/// The `Goto` target of `b` when that is its only non-throw successor.
fn unique_successor(cfg: &ControlFlowGraph, b: BlockId) -> Option<BlockId> {
    let mut normal = cfg.succs(b).filter(|(_, e)| !e.kind().is_throw());
    let (_, edge) = normal.next()?;
    if normal.next().is_some() || edge.kind() != EdgeKind::Goto {
        return None;
    }
    Some(edge.target())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{instruction::IrInstruction, opcode::IrOpcode};

    #[test]
    fn chains_follow_lone_fallthroughs() {
        let mut cfg = ControlFlowGraph::new(2);
        let entry = cfg.entry();
        let b1 = cfg.create_block();
        let b2 = cfg.create_block();
        let b3 = cfg.create_block();
        cfg.append_insns(entry, vec![IrInstruction::const_(0, 1)]).unwrap();
        cfg.append_insns(b1, vec![IrInstruction::const_(1, 2)]).unwrap();
        cfg.append_insns(b2, vec![IrInstruction::if_testz(IrOpcode::IfEqz, 0)])
            .unwrap();
        cfg.append_insns(b3, vec![IrInstruction::new(IrOpcode::ReturnVoid)])
            .unwrap();
        cfg.add_edge(entry, b1, EdgeKind::Goto).unwrap();
        cfg.add_edge(b1, b2, EdgeKind::Goto).unwrap();
        cfg.add_edge(b2, b3, EdgeKind::Goto).unwrap();
        cfg.add_edge(b2, b3, EdgeKind::Branch(None)).unwrap();
        cfg.verify().unwrap();

        let bbs = big_blocks(&cfg);
        assert_eq!(bbs.len(), 2);
        assert_eq!(bbs[0].blocks, vec![entry, b1, b2]);
        assert_eq!(bbs[1].blocks, vec![b3]);
    }
}
