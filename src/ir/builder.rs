//! Fluent construction of linear method bodies.
//!
//! ```rust,ignore
//! let mut b = CodeBuilder::new(2);
//! let done = b.new_label();
//! let code = b
//!     .load_param(RegKind::Narrow, 1)
//!     .if_(IrOpcode::IfEqz, &[1], done)
//!     .insn(IrInstruction::const_(0, 1))
//!     .target(done)
//!     .ret_void()
//!     .build();
//! ```

use std::sync::Arc;

use crate::ir::{
    code::IrCode,
    entry::{CatchEntry, CatchId, DebugEntry, MethodItemEntry, SourceBlock},
    instruction::{IrInstruction, Label, Operand, Reg, SwitchCase},
    opcode::{IrOpcode, RegKind},
    position::DexPosition,
    MethodRef, StringRef, TypeRef,
};

/// Builder for linear bodies. Labels and catch ids are allocated through `&mut self`;
/// everything else chains by value.
#[derive(Debug, Default)]
pub struct CodeBuilder {
    registers_size: u32,
    entries: Vec<MethodItemEntry>,
    next_label: usize,
    next_catch: usize,
}

impl CodeBuilder {
    /// A builder for a body with `registers_size` registers.
    #[must_use]
    pub fn new(registers_size: u32) -> Self {
        CodeBuilder {
            registers_size,
            ..Self::default()
        }
    }

    /// Allocates a fresh label.
    pub fn new_label(&mut self) -> Label {
        self.next_label += 1;
        Label::from_index(self.next_label - 1)
    }

    /// Allocates a fresh catch id.
    pub fn new_catch(&mut self) -> CatchId {
        self.next_catch += 1;
        CatchId::from_index(self.next_catch - 1)
    }

    /// Appends an arbitrary entry.
    #[must_use]
    pub fn entry(mut self, entry: MethodItemEntry) -> Self {
        self.entries.push(entry);
        self
    }

    /// Appends an instruction.
    #[must_use]
    pub fn insn(self, insn: IrInstruction) -> Self {
        self.entry(MethodItemEntry::Insn(insn))
    }

    /// Appends several instructions.
    #[must_use]
    pub fn insns(mut self, insns: impl IntoIterator<Item = IrInstruction>) -> Self {
        self.entries
            .extend(insns.into_iter().map(MethodItemEntry::Insn));
        self
    }

    /// Appends a `load-param*` defining `reg`.
    #[must_use]
    pub fn load_param(self, kind: RegKind, reg: Reg) -> Self {
        self.insn(IrInstruction::new(IrOpcode::load_param_for(kind)).with_dest(reg))
    }

    /// Places `label` here.
    #[must_use]
    pub fn target(self, label: Label) -> Self {
        self.entry(MethodItemEntry::Target(label))
    }

    /// Appends `goto label`.
    #[must_use]
    pub fn goto(self, label: Label) -> Self {
        self.insn(IrInstruction::new(IrOpcode::Goto).with_operand(Operand::Branch(label)))
    }

    /// Appends a conditional branch to `label`.
    #[must_use]
    pub fn if_(self, opcode: IrOpcode, srcs: &[Reg], label: Label) -> Self {
        self.insn(
            IrInstruction::new(opcode)
                .with_srcs(srcs)
                .with_operand(Operand::Branch(label)),
        )
    }

    /// Appends a switch on `reg`; control falls through to the next entry by default.
    #[must_use]
    pub fn switch(self, reg: Reg, cases: &[(i32, Label)]) -> Self {
        let cases = cases
            .iter()
            .map(|&(key, target)| SwitchCase { key, target })
            .collect();
        self.insn(
            IrInstruction::new(IrOpcode::Switch)
                .with_srcs(&[reg])
                .with_operand(Operand::Switch(cases)),
        )
    }

    /// Appends an invoke.
    #[must_use]
    pub fn invoke(self, opcode: IrOpcode, method: MethodRef, args: &[Reg]) -> Self {
        self.insn(IrInstruction::invoke(opcode, method, args))
    }

    /// Appends the `move-result*` of kind `kind` into `dest`.
    #[must_use]
    pub fn move_result(self, kind: RegKind, dest: Reg) -> Self {
        self.insn(IrInstruction::new(IrOpcode::move_result_for(kind)).with_dest(dest))
    }

    /// Appends `return-void`.
    #[must_use]
    pub fn ret_void(self) -> Self {
        self.insn(IrInstruction::new(IrOpcode::ReturnVoid))
    }

    /// Appends a return of `reg`.
    #[must_use]
    pub fn ret(self, kind: RegKind, reg: Reg) -> Self {
        self.insn(IrInstruction::new(IrOpcode::return_for(kind)).with_srcs(&[reg]))
    }

    /// Opens a try region covered by chain `id`.
    #[must_use]
    pub fn try_start(self, id: CatchId) -> Self {
        self.entry(MethodItemEntry::TryStart(id))
    }

    /// Closes the try region `id`.
    #[must_use]
    pub fn try_end(self, id: CatchId) -> Self {
        self.entry(MethodItemEntry::TryEnd(id))
    }

    /// Starts a handler of chain `id` here.
    #[must_use]
    pub fn catch(self, id: CatchId, catch_type: Option<TypeRef>, index: u32) -> Self {
        self.entry(MethodItemEntry::Catch(CatchEntry {
            id,
            catch_type,
            index,
        }))
    }

    /// Appends a position entry.
    #[must_use]
    pub fn position(self, position: Arc<DexPosition>) -> Self {
        self.entry(MethodItemEntry::Position(position))
    }

    /// Appends an ordinary position for `line` in `file`.
    #[must_use]
    pub fn line(self, method: Option<MethodRef>, file: Option<StringRef>, line: u32) -> Self {
        self.position(Arc::new(DexPosition::new(method, file, line)))
    }

    /// Appends a source block.
    #[must_use]
    pub fn source_block(self, block: SourceBlock) -> Self {
        self.entry(MethodItemEntry::SourceBlock(block))
    }

    /// Appends a debug entry.
    #[must_use]
    pub fn debug(self, entry: DebugEntry) -> Self {
        self.entry(MethodItemEntry::Debug(entry))
    }

    /// The entries built so far.
    #[must_use]
    pub fn into_entries(self) -> Vec<MethodItemEntry> {
        self.entries
    }

    /// Finishes the body in linear form.
    #[must_use]
    pub fn build(self) -> IrCode {
        IrCode::new(self.registers_size, self.entries)
    }
}
