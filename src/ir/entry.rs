//! Method-body entries: the tagged items a linear body is made of.

use std::sync::Arc;

use crate::ir::{
    instruction::{IrInstruction, Label, Reg},
    position::DexPosition,
    MethodRef, StringRef, TypeRef,
};

define_handle!(
    /// Identifies one catch-handler chain of a linear body.
    CatchId, "C"
);

/// A handler entry point.
///
/// All `Catch` entries with the same `id` form one handler chain; `index` orders the
/// chain (lowest index is tried first). A catch-all (`catch_type == None`) must carry
/// the highest index of its chain. The entry marks the start of the handler code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CatchEntry {
    /// The chain this handler belongs to.
    pub id: CatchId,
    /// The caught exception type, or `None` for catch-all.
    pub catch_type: Option<TypeRef>,
    /// Position of the handler within its chain.
    pub index: u32,
}

/// Local-variable debug information.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DebugEntry {
    /// A local variable becomes live in `reg`.
    StartLocal {
        /// Register holding the local.
        reg: Reg,
        /// Variable name.
        name: Option<StringRef>,
        /// Declared type.
        ty: Option<TypeRef>,
    },
    /// The local in the register goes out of scope.
    EndLocal(Reg),
    /// A previously ended local comes back into scope.
    RestartLocal(Reg),
    /// End of the method prologue.
    PrologueEnd,
    /// Start of the method epilogue.
    EpilogueBegin,
}

/// Profile value of one interaction at a source block.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SourceBlockVal {
    /// Normalised hit count.
    pub val: f32,
    /// Percentage of runs in which the block was reached at all.
    pub appear100: f32,
}

/// A profile marker: identifies a block of the original source method.
#[derive(Debug, Clone, PartialEq)]
pub struct SourceBlock {
    /// The method the block was originally part of.
    pub src: MethodRef,
    /// Block identifier within `src`.
    pub id: u32,
    /// One optional value per profiled interaction.
    pub vals: Vec<Option<SourceBlockVal>>,
}

impl SourceBlock {
    /// A source block without profile values.
    #[must_use]
    pub fn new(src: MethodRef, id: u32) -> Self {
        SourceBlock {
            src,
            id,
            vals: Vec::new(),
        }
    }

    /// `true` if any interaction saw this block executed.
    #[must_use]
    pub fn is_hot(&self) -> bool {
        self.vals.iter().flatten().any(|v| v.val > 0.0)
    }
}

/// One item of a linear method body.
#[derive(Debug, Clone, PartialEq)]
pub enum MethodItemEntry {
    /// An instruction.
    Insn(IrInstruction),
    /// Start of a try region whose throwing instructions are covered by chain `id`.
    TryStart(CatchId),
    /// End of the try region opened with the same id.
    TryEnd(CatchId),
    /// A handler entry point.
    Catch(CatchEntry),
    /// Source position for the following instructions.
    Position(Arc<DexPosition>),
    /// Profile marker.
    SourceBlock(SourceBlock),
    /// A branch target.
    Target(Label),
    /// Local-variable debug information.
    Debug(DebugEntry),
}

impl MethodItemEntry {
    /// The instruction, if this entry is one.
    #[must_use]
    pub fn as_insn(&self) -> Option<&IrInstruction> {
        match self {
            MethodItemEntry::Insn(insn) => Some(insn),
            _ => None,
        }
    }

    /// The instruction, mutably.
    pub fn as_insn_mut(&mut self) -> Option<&mut IrInstruction> {
        match self {
            MethodItemEntry::Insn(insn) => Some(insn),
            _ => None,
        }
    }

    /// `true` for instruction entries.
    #[must_use]
    pub fn is_insn(&self) -> bool {
        matches!(self, MethodItemEntry::Insn(_))
    }

    /// The position, if this entry is one.
    #[must_use]
    pub fn as_position(&self) -> Option<&Arc<DexPosition>> {
        match self {
            MethodItemEntry::Position(pos) => Some(pos),
            _ => None,
        }
    }
}

impl From<IrInstruction> for MethodItemEntry {
    fn from(insn: IrInstruction) -> Self {
        MethodItemEntry::Insn(insn)
    }
}
