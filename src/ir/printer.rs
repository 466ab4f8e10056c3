//! Human-readable listings of bodies, for logs and assertion messages.

use std::fmt::Write;

use crate::{
    cfg::{ControlFlowGraph, EdgeKind},
    ir::{
        entry::{DebugEntry, MethodItemEntry},
        position::PositionKind,
        Pool,
    },
};

/// Renders one entry on a single line.
#[must_use]
pub fn show_entry(entry: &MethodItemEntry, pool: &Pool) -> String {
    match entry {
        MethodItemEntry::Insn(insn) => insn.show(pool),
        MethodItemEntry::TryStart(id) => format!("TRY_START {id}"),
        MethodItemEntry::TryEnd(id) => format!("TRY_END {id}"),
        MethodItemEntry::Catch(c) => match c.catch_type {
            Some(t) => format!("CATCH {}[{}] {}", c.id, c.index, pool.type_descriptor(t)),
            None => format!("CATCH {}[{}] <any>", c.id, c.index),
        },
        MethodItemEntry::Position(p) => {
            let file = p.file.map_or("<unknown>", |f| pool.str(f));
            match p.kind {
                PositionKind::Normal => format!("POSITION {}:{}", file, p.line),
                PositionKind::Pattern(id) => format!("POSITION {}:{} pattern {}", file, p.line, id),
                PositionKind::Switch { switch, index } => {
                    format!("POSITION switch {switch}[{index}]")
                }
            }
        }
        MethodItemEntry::SourceBlock(sb) => {
            format!("SOURCE_BLOCK {}#{}", pool.show_method(sb.src), sb.id)
        }
        MethodItemEntry::Target(label) => format!("{label}:"),
        MethodItemEntry::Debug(d) => match d {
            DebugEntry::StartLocal { reg, name, .. } => format!(
                "DEBUG start-local v{} {}",
                reg,
                name.map_or("", |n| pool.str(n))
            ),
            DebugEntry::EndLocal(reg) => format!("DEBUG end-local v{reg}"),
            DebugEntry::RestartLocal(reg) => format!("DEBUG restart-local v{reg}"),
            DebugEntry::PrologueEnd => "DEBUG prologue-end".to_string(),
            DebugEntry::EpilogueBegin => "DEBUG epilogue-begin".to_string(),
        },
    }
}

/// Renders a linear body, one entry per line.
#[must_use]
pub fn show_entries(entries: &[MethodItemEntry], pool: &Pool) -> String {
    let mut out = String::new();
    for entry in entries {
        let indent = if matches!(entry, MethodItemEntry::Target(_)) {
            ""
        } else {
            "  "
        };
        let _ = writeln!(out, "{indent}{}", show_entry(entry, pool));
    }
    out
}

/// Renders a CFG block by block with the edges of each block.
#[must_use]
pub fn show_cfg(cfg: &ControlFlowGraph, pool: &Pool) -> String {
    let mut out = String::new();
    for block in cfg.blocks() {
        let preds: Vec<String> = cfg.preds(block.id()).map(|(_, e)| e.src().to_string()).collect();
        let _ = write!(out, "{}", block.id());
        if block.id() == cfg.entry() {
            out.push_str(" (entry)");
        }
        if Some(block.id()) == cfg.exit() {
            out.push_str(" (exit)");
        }
        let _ = writeln!(out, " preds: [{}]", preds.join(", "));
        for entry in block.entries() {
            let _ = writeln!(out, "  {}", show_entry(entry, pool));
        }
        for (_, e) in cfg.succs(block.id()) {
            let kind = match e.kind() {
                EdgeKind::Goto => "goto".to_string(),
                EdgeKind::Branch(None) => "branch".to_string(),
                EdgeKind::Branch(Some(key)) => format!("case {key}"),
                EdgeKind::Throw { catch_type: Some(t), .. } => {
                    format!("throw {}", pool.type_descriptor(t))
                }
                EdgeKind::Throw { catch_type: None, .. } => "throw <any>".to_string(),
                EdgeKind::Ghost => "ghost".to_string(),
            };
            let _ = writeln!(out, "  -> {} ({kind})", e.target());
        }
    }
    out
}
