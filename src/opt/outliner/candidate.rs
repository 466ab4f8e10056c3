//! Candidate discovery.
//!
//! Each body is cut into big blocks and a window `[i, j)` slides over the instructions
//! of every big block. A window is a candidate when moving it into a static method
//! cannot change what the caller observes:
//!
//! - no instruction ends a block, touches a monitor, defines a parameter or a caught
//!   exception, calls `super`, or needs a call site or class-initialisation barrier;
//! - a `move-result` is never separated from its producer;
//! - every `new-instance` is initialised inside the window, and no `<init>` runs on an
//!   object created outside of it;
//! - at most one register written inside the window is live after it, and nothing
//!   written before a throwing instruction is read by a handler;
//! - a register is always used with the same width and never overlaps the other half
//!   of a pair.
//!
//! Every candidate is summarised as a [`Fingerprint`], the window over registers
//! renumbered by order of first appearance. It doubles as the helper body.

use std::hash::{Hash, Hasher};

use rustc_hash::{FxHashMap, FxHashSet, FxHasher};

use crate::{
    analysis::{LiveRegisters, Liveness},
    cfg::{big_blocks, Block, ControlFlowGraph, InsnPos},
    ir::{
        encoding::{self, MAX_INVOKE_WORDS},
        entry::MethodItemEntry,
        instruction::{IrInstruction, Reg},
        opcode::{IrOpcode, OpcodeFamily, RegKind},
        MethodId, Pool,
    },
    utils::BitSet,
    Result,
};

/// Normalised form of a candidate. Windows with equal fingerprints can share a helper.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Fingerprint {
    /// The instructions over helper registers.
    pub insns: Vec<IrInstruction>,
    /// Helper registers that receive the arguments, in parameter order.
    pub params: Vec<(Reg, RegKind)>,
    /// Helper register returned to the caller, if any.
    pub result: Option<(Reg, RegKind)>,
    /// Size of the helper's register file.
    pub registers: u32,
}

impl Fingerprint {
    /// Number of instructions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.insns.len()
    }

    /// `true` for an empty window.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.insns.is_empty()
    }

    /// Argument words an invoke of the helper passes.
    #[must_use]
    pub fn arg_words(&self) -> usize {
        self.params
            .iter()
            .map(|(_, kind)| if *kind == RegKind::Wide { 2 } else { 1 })
            .sum()
    }

    /// Code units of the body including payloads, without the return.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::EncodingOverflow`] if an instruction has no encoding.
    pub fn body_units(&self, pool: &Pool) -> Result<usize> {
        self.insns
            .iter()
            .map(|insn| encoding::insn_units_with_payload(insn, pool))
            .sum()
    }

    /// A hash that depends only on the printed instructions, so helper names do not
    /// change with interning order.
    #[must_use]
    pub fn stable_hash(&self, pool: &Pool) -> u64 {
        let mut hasher = FxHasher::default();
        for insn in &self.insns {
            insn.show(pool).hash(&mut hasher);
        }
        self.params.hash(&mut hasher);
        self.result.hash(&mut hasher);
        hasher.finish()
    }
}

/// One place where a fingerprint occurs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Occurrence {
    /// The calling method.
    pub method: MethodId,
    /// Index of the big block, in [`big_blocks`] order.
    pub big_block: usize,
    /// Offset of the first instruction within the big block.
    pub start: usize,
    /// Positions of the window's instructions.
    pub insns: Vec<InsnPos>,
    /// Caller registers passed as arguments, in parameter order.
    pub args: Vec<Reg>,
    /// Caller register that receives the result.
    pub result: Option<Reg>,
}

impl Occurrence {
    /// Offset one past the last instruction.
    #[must_use]
    pub fn end(&self) -> usize {
        self.start + self.insns.len()
    }

    /// Sort key giving program order within the scope.
    #[must_use]
    pub fn key(&self) -> (MethodId, usize, usize) {
        (self.method, self.big_block, self.start)
    }

    /// `true` if both windows share an instruction.
    #[must_use]
    pub fn overlaps(&self, other: &Occurrence) -> bool {
        self.method == other.method
            && self.big_block == other.big_block
            && self.start < other.end()
            && other.start < self.end()
    }
}

/// Window length bounds.
#[derive(Debug, Clone, Copy)]
pub struct WindowLimits {
    /// Shortest window.
    pub min_insns: usize,
    /// Longest window.
    pub max_insns: usize,
}

/// Every candidate window of one method body.
#[must_use]
pub fn find_candidates(
    method: MethodId,
    cfg: &ControlFlowGraph,
    pool: &Pool,
    limits: WindowLimits,
) -> Vec<(Fingerprint, Occurrence)> {
    let live = Liveness::analyze(cfg, pool);
    let mut out = Vec::new();
    for (index, big) in big_blocks(cfg).iter().enumerate() {
        let insns: Vec<(InsnPos, &IrInstruction)> = big
            .blocks
            .iter()
            .filter_map(|&b| cfg.block(b))
            .flat_map(|block| {
                block
                    .indexed_insns()
                    .map(move |(i, insn)| (InsnPos::new(block.id(), i), insn))
            })
            .collect();
        if insns.len() < limits.min_insns.max(1) {
            continue;
        }
        let live_after: Vec<BitSet> = insns
            .iter()
            .map(|(pos, _)| live.live_out_at(cfg, *pos))
            .collect();
        let handlers = handler_live_in(cfg, &live, big.head());

        for start in 0..insns.len() {
            let mut window = Window::new(pool);
            let last = (start + limits.max_insns).min(insns.len());
            for end in start..last {
                let (pos, insn) = insns[end];
                if !window.push(insn, handlers.as_ref()) {
                    break;
                }
                if end + 1 - start < limits.min_insns {
                    continue;
                }
                if result_consumed(cfg, pos, insn) {
                    continue;
                }
                let Some((fingerprint, args, result)) = window.finish(&live_after[end]) else {
                    continue;
                };
                let occurrence = Occurrence {
                    method,
                    big_block: index,
                    start,
                    insns: insns[start..=end].iter().map(|(p, _)| *p).collect(),
                    args,
                    result,
                };
                out.push((fingerprint, occurrence));
            }
        }
    }
    out
}

/// Slots live into any handler of the big block headed by `head`.
fn handler_live_in(
    cfg: &ControlFlowGraph,
    live: &LiveRegisters<'_>,
    head: crate::cfg::BlockId,
) -> Option<BitSet> {
    let handlers = cfg.catch_signature(head);
    let mut set = BitSet::new(cfg.registers_size() as usize);
    for (_, handler) in &handlers {
        if let Some(live_in) = live.live_in(*handler) {
            set.union_with(live_in);
        }
    }
    (!handlers.is_empty()).then_some(set)
}

/// `true` if `insn` at `pos` produces a result that the next instruction consumes.
fn result_consumed(cfg: &ControlFlowGraph, pos: InsnPos, insn: &IrInstruction) -> bool {
    if !insn.opcode().has_move_result() {
        return false;
    }
    if cfg.last_insn_pos(pos.block) == Some(pos) {
        return cfg
            .goto_target(pos.block)
            .and_then(|t| cfg.block(t))
            .is_some_and(Block::starts_with_move_result);
    }
    cfg.block(pos.block)
        .and_then(|b| b.entries()[pos.index + 1..].iter().find_map(MethodItemEntry::as_insn))
        .is_some_and(|next| next.opcode().is_move_result())
}

fn outlinable(op: IrOpcode) -> bool {
    !(op.ends_block()
        || op.is_monitor()
        || op.is_load_param()
        || matches!(
            op,
            IrOpcode::InvokeSuper | IrOpcode::InvokePolymorphic | IrOpcode::InvokeCustom
        )
        || matches!(
            op.family(),
            OpcodeFamily::MoveException | OpcodeFamily::InitClass | OpcodeFamily::Nop
        ))
}

/// A window under extension.
struct Window<'p> {
    pool: &'p Pool,
    insns: Vec<IrInstruction>,
    /// Caller register to helper register and width.
    map: FxHashMap<Reg, (Reg, bool)>,
    next: Reg,
    /// (caller, helper, kind) per parameter.
    params: Vec<(Reg, Reg, RegKind)>,
    /// Caller registers written, with the kind of their last write.
    defs: Vec<(Reg, RegKind)>,
    written: FxHashSet<Reg>,
    /// Registers narrowed by `check-cast` without being rewritten.
    refined: FxHashSet<Reg>,
    /// `new-instance` results still waiting for their `<init>`.
    uninit: FxHashSet<Reg>,
}

impl<'p> Window<'p> {
    fn new(pool: &'p Pool) -> Self {
        Window {
            pool,
            insns: Vec::new(),
            map: FxHashMap::default(),
            next: 0,
            params: Vec::new(),
            defs: Vec::new(),
            written: FxHashSet::default(),
            refined: FxHashSet::default(),
            uninit: FxHashSet::default(),
        }
    }

    /// Helper register for `reg`, allocating one on first sight. `None` when the use
    /// disagrees with an earlier width or overlaps a pair.
    fn map_reg(&mut self, reg: Reg, wide: bool) -> Option<Reg> {
        if let Some(&(helper, was_wide)) = self.map.get(&reg) {
            return (was_wide == wide).then_some(helper);
        }
        if reg > 0 && self.map.get(&(reg - 1)).is_some_and(|&(_, w)| w) {
            return None;
        }
        if wide && self.map.contains_key(&(reg + 1)) {
            return None;
        }
        let helper = self.next;
        self.next += if wide { 2 } else { 1 };
        self.map.insert(reg, (helper, wide));
        Some(helper)
    }

    /// Appends `insn`. Returns `false` if neither this window nor any extension of it
    /// can be a candidate.
    fn push(&mut self, insn: &IrInstruction, handlers: Option<&BitSet>) -> bool {
        let op = insn.opcode();
        if !outlinable(op) || (self.insns.is_empty() && op.is_move_result()) {
            return false;
        }
        if insn.may_throw() {
            if let Some(live) = handlers {
                if self.written.iter().any(|&r| live.contains(r as usize)) {
                    return false;
                }
            }
        }
        if op == IrOpcode::InvokeDirect && insn.method().is_some_and(|m| self.pool.is_init(m)) {
            let receiver = insn.src(0);
            if !receiver.is_some_and(|r| self.uninit.remove(&r)) {
                return false;
            }
        }

        let mut normalized = insn.clone();
        for (i, &reg) in insn.srcs().iter().enumerate() {
            let Some(kind) = insn.src_kind(i, self.pool) else {
                return false;
            };
            let fresh = !self.map.contains_key(&reg);
            let Some(helper) = self.map_reg(reg, kind == RegKind::Wide) else {
                return false;
            };
            if fresh {
                self.params.push((reg, helper, kind));
            }
            normalized.srcs_mut()[i] = helper;
        }
        if let Some(dest) = insn.dest() {
            let Some(kind) = op.dest_kind() else {
                return false;
            };
            let Some(helper) = self.map_reg(dest, kind == RegKind::Wide) else {
                return false;
            };
            normalized.set_dest(helper);
            self.written.extend(insn.def_slots());
            self.refined.remove(&dest);
            self.uninit.remove(&dest);
            match self.defs.iter_mut().find(|(r, _)| *r == dest) {
                Some(def) => def.1 = kind,
                None => self.defs.push((dest, kind)),
            }
            if op == IrOpcode::NewInstance {
                self.uninit.insert(dest);
            }
        }
        if op == IrOpcode::CheckCast {
            if let Some(src) = insn.src(0) {
                self.refined.insert(src);
            }
        }
        self.insns.push(normalized);
        true
    }

    /// The fingerprint, arguments and result register of the current window, if it is
    /// a candidate given the slots live after it.
    fn finish(&self, live_after: &BitSet) -> Option<(Fingerprint, Vec<Reg>, Option<Reg>)> {
        if !self.uninit.is_empty() {
            return None;
        }
        if self
            .refined
            .iter()
            .any(|&r| live_after.contains(r as usize))
        {
            return None;
        }
        let mut live_defs = self.defs.iter().filter(|(reg, kind)| {
            live_after.contains(*reg as usize)
                || (*kind == RegKind::Wide && live_after.contains(*reg as usize + 1))
        });
        let result = live_defs.next().copied();
        if live_defs.next().is_some() {
            return None;
        }
        let fingerprint = Fingerprint {
            insns: self.insns.clone(),
            params: self.params.iter().map(|&(_, h, k)| (h, k)).collect(),
            result: result.and_then(|(reg, kind)| self.map.get(&reg).map(|&(h, _)| (h, kind))),
            registers: self.next.max(1),
        };
        if fingerprint.arg_words() > MAX_INVOKE_WORDS {
            return None;
        }
        let args = self.params.iter().map(|&(reg, _, _)| reg).collect();
        Some((fingerprint, args, result.map(|(reg, _)| reg)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::builder::CodeBuilder;

    fn limits() -> WindowLimits {
        WindowLimits {
            min_insns: 2,
            max_insns: 8,
        }
    }

    #[test]
    fn registers_are_renumbered_by_first_appearance() -> Result<()> {
        let pool = Pool::new();
        let body = |a: Reg, b: Reg| {
            CodeBuilder::new(8)
                .load_param(RegKind::Narrow, 7)
                .insn(IrInstruction::binop_lit(IrOpcode::AddIntLit, a, 7, 3))
                .insn(IrInstruction::binop_lit(IrOpcode::MulIntLit, b, a, 5))
                .ret(RegKind::Narrow, b)
                .build()
        };
        let mut one = body(0, 1);
        let mut two = body(4, 2);
        one.build_cfg(&pool)?;
        two.build_cfg(&pool)?;
        let id = MethodId::new(crate::ir::ClassId::from_index(0), 0);
        let a = find_candidates(id, one.cfg().expect("cfg"), &pool, limits());
        let b = find_candidates(id, two.cfg().expect("cfg"), &pool, limits());
        assert_eq!(a.len(), 1);
        assert_eq!(a[0].0, b[0].0);
        let fp = &a[0].0;
        assert_eq!(fp.params, vec![(0, RegKind::Narrow)]);
        assert_eq!(fp.result, Some((2, RegKind::Narrow)));
        assert_eq!(a[0].1.args, vec![7]);
        assert_eq!(b[0].1.result, Some(2));
        Ok(())
    }

    #[test]
    fn two_live_outs_reject_the_window() -> Result<()> {
        let pool = Pool::new();
        let mut code = CodeBuilder::new(3)
            .insn(IrInstruction::const_(0, 1))
            .insn(IrInstruction::const_(1, 2))
            .insn(IrInstruction::new(IrOpcode::AddInt).with_dest(2).with_srcs(&[0, 1]))
            .ret(RegKind::Narrow, 2)
            .build();
        code.build_cfg(&pool)?;
        let id = MethodId::new(crate::ir::ClassId::from_index(0), 0);
        let found = find_candidates(id, code.cfg().expect("cfg"), &pool, limits());
        // [const, const] leaves v0 and v1 live; the other windows leave one value
        let lens: Vec<usize> = found.iter().map(|(fp, _)| fp.len()).collect();
        assert_eq!(lens, vec![3, 2]);
        assert_eq!(found[1].1.start, 1);
        Ok(())
    }

    #[test]
    fn constructors_and_monitors_bound_windows() -> Result<()> {
        let pool = Pool::new();
        let k = *pool.known();
        let foo = pool.intern_type("LFoo;");
        let init = pool.intern_method(foo, "<init>", pool.intern_proto(k.void, &[]));
        let mut code = CodeBuilder::new(2)
            .load_param(RegKind::Object, 1)
            .insn(IrInstruction::new(IrOpcode::NewInstance).with_dest(0).with_type(foo))
            .invoke(IrOpcode::InvokeDirect, init, &[0])
            .insn(IrInstruction::new(IrOpcode::MonitorEnter).with_srcs(&[1]))
            .invoke(IrOpcode::InvokeDirect, init, &[1])
            .ret(RegKind::Object, 0)
            .build();
        code.build_cfg(&pool)?;
        let id = MethodId::new(crate::ir::ClassId::from_index(0), 0);
        let found = find_candidates(id, code.cfg().expect("cfg"), &pool, limits());
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].0.insns[0].opcode(), IrOpcode::NewInstance);
        assert_eq!(found[0].0.result, Some((0, RegKind::Object)));
        Ok(())
    }

    #[test]
    fn wide_pairs_may_not_alias() {
        let pool = Pool::new();
        let mut window = Window::new(&pool);
        assert!(window.push(&IrInstruction::const_wide(0, 7), None));
        assert!(!window.push(&IrInstruction::const_(1, 3), None));

        let mut window = Window::new(&pool);
        assert!(window.push(&IrInstruction::const_(1, 3), None));
        assert!(!window.push(&IrInstruction::const_wide(0, 7), None));
    }
}
