//! Helper bodies and call-site rewriting.

use std::sync::Arc;

use crate::{
    cfg::{BlockId, ControlFlowGraph, EdgeKind},
    ir::{
        builder::CodeBuilder,
        entry::{MethodItemEntry, SourceBlock},
        instruction::IrInstruction,
        opcode::{IrOpcode, RegKind},
        position::{DexPosition, PositionPatternSwitchManager, SwitchId},
        IrCode, MethodRef,
    },
    opt::outliner::candidate::{Fingerprint, Occurrence},
    Result,
};

/// The body of the helper for `fingerprint`.
///
/// With `method`, the body opens with a source block of the helper. With `positions`
/// as well, every instruction is preceded by a switch position whose index is the
/// instruction's offset, so a frame of the helper resolves to the line of the call
/// site it came from.
#[must_use]
pub fn helper_code(
    fingerprint: &Fingerprint,
    method: Option<MethodRef>,
    positions: Option<(&PositionPatternSwitchManager, SwitchId)>,
) -> IrCode {
    let mut b = CodeBuilder::new(fingerprint.registers.max(1));
    if let Some(m) = method {
        b = b.source_block(SourceBlock::new(m, 0));
    }
    for &(reg, kind) in &fingerprint.params {
        b = b.load_param(kind, reg);
    }
    for (index, insn) in fingerprint.insns.iter().enumerate() {
        if let (Some(m), Some((manager, switch))) = (method, positions) {
            let index = u32::try_from(index).unwrap_or(u32::MAX);
            b = b.position(manager.switch_position(m, switch, index));
        }
        b = b.insn(insn.clone());
    }
    let b = match fingerprint.result {
        Some((reg, kind)) => b.ret(kind, reg),
        None => b.ret_void(),
    };
    b.build()
}

/// One occurrence to replace by a call.
#[derive(Debug, Clone)]
pub struct CallSite {
    /// The window being replaced.
    pub occurrence: Occurrence,
    /// The helper to call.
    pub helper: MethodRef,
    /// Width of the returned value.
    pub result_kind: Option<RegKind>,
    /// Position selecting this call site's pattern in the helper.
    pub pattern: Option<Arc<DexPosition>>,
}

/// Replaces the window of `site` by an `invoke-static` of the helper and, when the
/// window leaves a value behind, its `move-result`.
///
/// # Errors
///
/// Returns [`crate::Error::InvalidEdit`] if the window no longer matches the graph.
pub fn rewrite_site(cfg: &mut ControlFlowGraph, site: &CallSite) -> Result<()> {
    let occ = &site.occurrence;
    let Some((&first, rest)) = occ.insns.split_first() else {
        return Ok(());
    };
    let handlers: Vec<(BlockId, EdgeKind)> = cfg
        .throw_succs(first.block)
        .into_iter()
        .filter_map(|e| cfg.edge(e))
        .map(|e| (e.target(), e.kind()))
        .collect();
    let resume = site
        .pattern
        .as_ref()
        .and(cfg.position_at(first))
        .cloned();

    for &pos in rest.iter().rev() {
        cfg.remove_insn(pos)?;
    }
    if !handlers.is_empty() && cfg.throw_succs(first.block).is_empty() {
        for (target, kind) in handlers {
            cfg.add_edge(first.block, target, kind)?;
        }
    }

    let mut entries = Vec::with_capacity(4);
    if let Some(pattern) = &site.pattern {
        entries.push(MethodItemEntry::Position(Arc::clone(pattern)));
    }
    entries.push(MethodItemEntry::Insn(IrInstruction::invoke(
        IrOpcode::InvokeStatic,
        site.helper,
        &occ.args,
    )));
    if let (Some(reg), Some(kind)) = (occ.result, site.result_kind) {
        entries.push(MethodItemEntry::Insn(
            IrInstruction::new(IrOpcode::move_result_for(kind)).with_dest(reg),
        ));
    }
    if let Some(resume) = resume {
        entries.push(MethodItemEntry::Position(resume));
    }
    cfg.replace_insn_with_entries(first, entries)
}
