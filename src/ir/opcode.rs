//! The abstract, width-free opcode set of the IR.
//!
//! Container opcodes that differ only in operand width (`const/4`, `const/16`, `const`,
//! `const/high16`, `move` vs `move/from16`, the `/2addr` and `/lit8` binary ops, the
//! `/range` invokes, `const-string/jumbo`, `packed-switch` vs `sparse-switch`) collapse
//! into a single [`IrOpcode`]. The encoding layer ([`crate::ir::encoding`]) picks the
//! concrete form when sizes are needed.
//!
//! Besides the container families the set has three pseudo opcodes:
//!
//! - `load-param`, `load-param-wide`, `load-param-object` define the incoming argument
//!   registers at the top of the entry block and are never encoded.
//! - `init-class` marks a point where a class must be initialised; it lowers to nothing
//!   or to a static field access.

use strum::{Display, EnumCount, EnumIter, EnumString, IntoStaticStr};

/// Operand-layout families of [`IrOpcode`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub enum OpcodeFamily {
    Nop,
    Move,
    MoveResult,
    MoveException,
    Return,
    Const,
    ConstRef,
    Monitor,
    CheckCast,
    InstanceOf,
    ArrayLength,
    NewInstance,
    NewArray,
    FilledNewArray,
    FillArrayData,
    Throw,
    Goto,
    IfTest,
    IfTestZ,
    Switch,
    Compare,
    ArrayGet,
    ArrayPut,
    InstanceGet,
    InstancePut,
    StaticGet,
    StaticPut,
    Invoke,
    Unary,
    Binary,
    BinaryLit,
    LoadParam,
    InitClass,
}

/// The kind of non-register operand an opcode carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub enum OperandKind {
    None,
    Literal,
    String,
    Type,
    Field,
    Method,
    Proto,
    CallSite,
    MethodHandle,
    Data,
    Branch,
    Switch,
}

/// Abstract opcodes. Names render in the container's lower-case dashed style.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Display,
    EnumString,
    EnumIter,
    EnumCount,
    IntoStaticStr,
)]
#[strum(serialize_all = "kebab-case")]
#[allow(missing_docs)]
pub enum IrOpcode {
    Nop,
    Move,
    MoveWide,
    MoveObject,
    MoveResult,
    MoveResultWide,
    MoveResultObject,
    MoveException,
    ReturnVoid,
    Return,
    ReturnWide,
    ReturnObject,
    Const,
    ConstWide,
    ConstString,
    ConstClass,
    ConstMethodHandle,
    ConstMethodType,
    MonitorEnter,
    MonitorExit,
    CheckCast,
    InstanceOf,
    ArrayLength,
    NewInstance,
    NewArray,
    FilledNewArray,
    FillArrayData,
    Throw,
    Goto,
    Switch,
    CmplFloat,
    CmpgFloat,
    CmplDouble,
    CmpgDouble,
    CmpLong,
    IfEq,
    IfNe,
    IfLt,
    IfGe,
    IfGt,
    IfLe,
    IfEqz,
    IfNez,
    IfLtz,
    IfGez,
    IfGtz,
    IfLez,
    Aget,
    AgetWide,
    AgetObject,
    AgetBoolean,
    AgetByte,
    AgetChar,
    AgetShort,
    Aput,
    AputWide,
    AputObject,
    AputBoolean,
    AputByte,
    AputChar,
    AputShort,
    Iget,
    IgetWide,
    IgetObject,
    IgetBoolean,
    IgetByte,
    IgetChar,
    IgetShort,
    Iput,
    IputWide,
    IputObject,
    IputBoolean,
    IputByte,
    IputChar,
    IputShort,
    Sget,
    SgetWide,
    SgetObject,
    SgetBoolean,
    SgetByte,
    SgetChar,
    SgetShort,
    Sput,
    SputWide,
    SputObject,
    SputBoolean,
    SputByte,
    SputChar,
    SputShort,
    InvokeVirtual,
    InvokeSuper,
    InvokeDirect,
    InvokeStatic,
    InvokeInterface,
    InvokePolymorphic,
    InvokeCustom,
    NegInt,
    NotInt,
    NegLong,
    NotLong,
    NegFloat,
    NegDouble,
    IntToLong,
    IntToFloat,
    IntToDouble,
    LongToInt,
    LongToFloat,
    LongToDouble,
    FloatToInt,
    FloatToLong,
    FloatToDouble,
    DoubleToInt,
    DoubleToLong,
    DoubleToFloat,
    IntToByte,
    IntToChar,
    IntToShort,
    AddInt,
    SubInt,
    MulInt,
    DivInt,
    RemInt,
    AndInt,
    OrInt,
    XorInt,
    ShlInt,
    ShrInt,
    UshrInt,
    AddLong,
    SubLong,
    MulLong,
    DivLong,
    RemLong,
    AndLong,
    OrLong,
    XorLong,
    ShlLong,
    ShrLong,
    UshrLong,
    AddFloat,
    SubFloat,
    MulFloat,
    DivFloat,
    RemFloat,
    AddDouble,
    SubDouble,
    MulDouble,
    DivDouble,
    RemDouble,
    AddIntLit,
    RsubIntLit,
    MulIntLit,
    DivIntLit,
    RemIntLit,
    AndIntLit,
    OrIntLit,
    XorIntLit,
    ShlIntLit,
    ShrIntLit,
    UshrIntLit,
    LoadParam,
    LoadParamWide,
    LoadParamObject,
    InitClass,
}

/// Value category of a register produced or consumed by an opcode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RegKind {
    /// A 32-bit non-reference value (int, float, boolean, ...).
    Narrow,
    /// A 64-bit value occupying a register pair.
    Wide,
    /// A reference.
    Object,
}

impl IrOpcode {
    /// The operand-layout family.
    #[must_use]
    #[allow(clippy::enum_glob_use)]
    pub fn family(self) -> OpcodeFamily {
        use IrOpcode::*;
        use OpcodeFamily as F;
        match self {
            Nop => F::Nop,
            Move | MoveWide | MoveObject => F::Move,
            MoveResult | MoveResultWide | MoveResultObject => F::MoveResult,
            MoveException => F::MoveException,
            ReturnVoid | Return | ReturnWide | ReturnObject => F::Return,
            Const | ConstWide => F::Const,
            ConstString | ConstClass | ConstMethodHandle | ConstMethodType => F::ConstRef,
            MonitorEnter | MonitorExit => F::Monitor,
            CheckCast => F::CheckCast,
            InstanceOf => F::InstanceOf,
            ArrayLength => F::ArrayLength,
            NewInstance => F::NewInstance,
            NewArray => F::NewArray,
            FilledNewArray => F::FilledNewArray,
            FillArrayData => F::FillArrayData,
            Throw => F::Throw,
            Goto => F::Goto,
            Switch => F::Switch,
            CmplFloat | CmpgFloat | CmplDouble | CmpgDouble | CmpLong => F::Compare,
            IfEq | IfNe | IfLt | IfGe | IfGt | IfLe => F::IfTest,
            IfEqz | IfNez | IfLtz | IfGez | IfGtz | IfLez => F::IfTestZ,
            Aget | AgetWide | AgetObject | AgetBoolean | AgetByte | AgetChar | AgetShort => {
                F::ArrayGet
            }
            Aput | AputWide | AputObject | AputBoolean | AputByte | AputChar | AputShort => {
                F::ArrayPut
            }
            Iget | IgetWide | IgetObject | IgetBoolean | IgetByte | IgetChar | IgetShort => {
                F::InstanceGet
            }
            Iput | IputWide | IputObject | IputBoolean | IputByte | IputChar | IputShort => {
                F::InstancePut
            }
            Sget | SgetWide | SgetObject | SgetBoolean | SgetByte | SgetChar | SgetShort => {
                F::StaticGet
            }
            Sput | SputWide | SputObject | SputBoolean | SputByte | SputChar | SputShort => {
                F::StaticPut
            }
            InvokeVirtual | InvokeSuper | InvokeDirect | InvokeStatic | InvokeInterface
            | InvokePolymorphic | InvokeCustom => F::Invoke,
            NegInt | NotInt | NegLong | NotLong | NegFloat | NegDouble | IntToLong
            | IntToFloat | IntToDouble | LongToInt | LongToFloat | LongToDouble | FloatToInt
            | FloatToLong | FloatToDouble | DoubleToInt | DoubleToLong | DoubleToFloat
            | IntToByte | IntToChar | IntToShort => F::Unary,
            AddInt | SubInt | MulInt | DivInt | RemInt | AndInt | OrInt | XorInt | ShlInt
            | ShrInt | UshrInt | AddLong | SubLong | MulLong | DivLong | RemLong | AndLong
            | OrLong | XorLong | ShlLong | ShrLong | UshrLong | AddFloat | SubFloat
            | MulFloat | DivFloat | RemFloat | AddDouble | SubDouble | MulDouble | DivDouble
            | RemDouble => F::Binary,
            AddIntLit | RsubIntLit | MulIntLit | DivIntLit | RemIntLit | AndIntLit
            | OrIntLit | XorIntLit | ShlIntLit | ShrIntLit | UshrIntLit => F::BinaryLit,
            LoadParam | LoadParamWide | LoadParamObject => F::LoadParam,
            InitClass => F::InitClass,
        }
    }

    /// The kind of the non-register operand.
    #[must_use]
    pub fn operand_kind(self) -> OperandKind {
        match self {
            IrOpcode::Const | IrOpcode::ConstWide => OperandKind::Literal,
            IrOpcode::ConstString => OperandKind::String,
            IrOpcode::ConstMethodHandle => OperandKind::MethodHandle,
            IrOpcode::ConstMethodType => OperandKind::Proto,
            IrOpcode::InvokeCustom => OperandKind::CallSite,
            IrOpcode::ConstClass
            | IrOpcode::CheckCast
            | IrOpcode::InstanceOf
            | IrOpcode::NewInstance
            | IrOpcode::NewArray
            | IrOpcode::FilledNewArray
            | IrOpcode::InitClass => OperandKind::Type,
            IrOpcode::FillArrayData => OperandKind::Data,
            IrOpcode::Goto => OperandKind::Branch,
            IrOpcode::Switch => OperandKind::Switch,
            _ => match self.family() {
                OpcodeFamily::IfTest | OpcodeFamily::IfTestZ => OperandKind::Branch,
                OpcodeFamily::InstanceGet
                | OpcodeFamily::InstancePut
                | OpcodeFamily::StaticGet
                | OpcodeFamily::StaticPut => OperandKind::Field,
                OpcodeFamily::Invoke => OperandKind::Method,
                OpcodeFamily::BinaryLit => OperandKind::Literal,
                _ => OperandKind::None,
            },
        }
    }

    /// The category of the destination register, if the opcode writes one.
    #[must_use]
    #[allow(clippy::enum_glob_use)]
    pub fn dest_kind(self) -> Option<RegKind> {
        use IrOpcode::*;
        match self {
            Move | MoveResult | Const | InstanceOf | ArrayLength | Aget | AgetBoolean
            | AgetByte | AgetChar | AgetShort | Iget | IgetBoolean | IgetByte | IgetChar
            | IgetShort | Sget | SgetBoolean | SgetByte | SgetChar | SgetShort | CmplFloat
            | CmpgFloat | CmplDouble | CmpgDouble | CmpLong | NegInt | NotInt | NegFloat
            | IntToFloat | LongToInt | LongToFloat | FloatToInt | DoubleToInt
            | DoubleToFloat | IntToByte | IntToChar | IntToShort | LoadParam => {
                Some(RegKind::Narrow)
            }
            MoveWide | MoveResultWide | ConstWide | AgetWide | IgetWide | SgetWide
            | NegLong | NotLong | NegDouble | IntToLong | IntToDouble | LongToDouble
            | FloatToLong | FloatToDouble | DoubleToLong | LoadParamWide => Some(RegKind::Wide),
            MoveObject | MoveResultObject | MoveException | ConstString | ConstClass
            | ConstMethodHandle | ConstMethodType | NewInstance | NewArray | AgetObject
            | IgetObject | SgetObject | LoadParamObject => Some(RegKind::Object),
            _ => match self.family() {
                OpcodeFamily::Binary => Some(if self.binary_is_wide() {
                    RegKind::Wide
                } else {
                    RegKind::Narrow
                }),
                OpcodeFamily::BinaryLit => Some(RegKind::Narrow),
                _ => None,
            },
        }
    }

    /// `true` if the opcode writes a destination register.
    #[must_use]
    pub fn has_dest(self) -> bool {
        self.dest_kind().is_some()
    }

    /// `true` if the destination is a register pair.
    #[must_use]
    pub fn dest_is_wide(self) -> bool {
        self.dest_kind() == Some(RegKind::Wide)
    }

    /// Number of source registers, or `None` for the variable-arity opcodes (invokes
    /// and `filled-new-array`).
    #[must_use]
    pub fn src_count(self) -> Option<usize> {
        let count = match self.family() {
            OpcodeFamily::Nop
            | OpcodeFamily::MoveResult
            | OpcodeFamily::MoveException
            | OpcodeFamily::Const
            | OpcodeFamily::ConstRef
            | OpcodeFamily::NewInstance
            | OpcodeFamily::Goto
            | OpcodeFamily::StaticGet
            | OpcodeFamily::LoadParam
            | OpcodeFamily::InitClass => 0,
            OpcodeFamily::Return => usize::from(self != IrOpcode::ReturnVoid),
            OpcodeFamily::Move
            | OpcodeFamily::Monitor
            | OpcodeFamily::CheckCast
            | OpcodeFamily::InstanceOf
            | OpcodeFamily::ArrayLength
            | OpcodeFamily::NewArray
            | OpcodeFamily::FillArrayData
            | OpcodeFamily::Throw
            | OpcodeFamily::Switch
            | OpcodeFamily::IfTestZ
            | OpcodeFamily::InstanceGet
            | OpcodeFamily::StaticPut
            | OpcodeFamily::Unary
            | OpcodeFamily::BinaryLit => 1,
            OpcodeFamily::IfTest
            | OpcodeFamily::Compare
            | OpcodeFamily::ArrayGet
            | OpcodeFamily::InstancePut
            | OpcodeFamily::Binary => 2,
            OpcodeFamily::ArrayPut => 3,
            OpcodeFamily::Invoke | OpcodeFamily::FilledNewArray => return None,
        };
        Some(count)
    }

    /// Category of fixed source operand `index`. Variable-arity opcodes depend on the
    /// referenced prototype and report `None`.
    #[must_use]
    #[allow(clippy::enum_glob_use)]
    pub fn src_kind(self, index: usize) -> Option<RegKind> {
        use IrOpcode::*;
        let count = self.src_count()?;
        if index >= count {
            return None;
        }
        let kind = match self {
            MoveWide | ReturnWide | CmpLong | CmplDouble | CmpgDouble | NegLong | NotLong
            | NegDouble | LongToInt | LongToFloat | LongToDouble | DoubleToInt
            | DoubleToLong | DoubleToFloat => RegKind::Wide,
            MoveObject | ReturnObject | MonitorEnter | MonitorExit | CheckCast | InstanceOf
            | ArrayLength | FillArrayData | Throw => RegKind::Object,
            AputWide | IputWide | SputWide if index == 0 => RegKind::Wide,
            AputObject | IputObject | SputObject if index == 0 => RegKind::Object,
            _ => match self.family() {
                // aget: (array, index); aput: (value, array, index)
                OpcodeFamily::ArrayGet if index == 0 => RegKind::Object,
                OpcodeFamily::ArrayPut if index == 1 => RegKind::Object,
                OpcodeFamily::InstanceGet => RegKind::Object,
                OpcodeFamily::InstancePut if index == 1 => RegKind::Object,
                OpcodeFamily::Binary => {
                    let shift = matches!(self, ShlLong | ShrLong | UshrLong);
                    if self.binary_is_wide() && !(shift && index == 1) {
                        RegKind::Wide
                    } else {
                        RegKind::Narrow
                    }
                }
                _ => RegKind::Narrow,
            },
        };
        Some(kind)
    }

    fn binary_is_wide(self) -> bool {
        matches!(
            self,
            IrOpcode::AddLong
                | IrOpcode::SubLong
                | IrOpcode::MulLong
                | IrOpcode::DivLong
                | IrOpcode::RemLong
                | IrOpcode::AndLong
                | IrOpcode::OrLong
                | IrOpcode::XorLong
                | IrOpcode::ShlLong
                | IrOpcode::ShrLong
                | IrOpcode::UshrLong
                | IrOpcode::AddDouble
                | IrOpcode::SubDouble
                | IrOpcode::MulDouble
                | IrOpcode::DivDouble
                | IrOpcode::RemDouble
        )
    }

    /// `true` if executing the instruction may raise an exception.
    #[must_use]
    pub fn may_throw(self) -> bool {
        match self.family() {
            OpcodeFamily::ConstRef
            | OpcodeFamily::Monitor
            | OpcodeFamily::CheckCast
            | OpcodeFamily::InstanceOf
            | OpcodeFamily::ArrayLength
            | OpcodeFamily::NewInstance
            | OpcodeFamily::NewArray
            | OpcodeFamily::FilledNewArray
            | OpcodeFamily::FillArrayData
            | OpcodeFamily::Throw
            | OpcodeFamily::ArrayGet
            | OpcodeFamily::ArrayPut
            | OpcodeFamily::InstanceGet
            | OpcodeFamily::InstancePut
            | OpcodeFamily::StaticGet
            | OpcodeFamily::StaticPut
            | OpcodeFamily::Invoke
            | OpcodeFamily::InitClass => true,
            OpcodeFamily::Binary | OpcodeFamily::BinaryLit => matches!(
                self,
                IrOpcode::DivInt
                    | IrOpcode::RemInt
                    | IrOpcode::DivLong
                    | IrOpcode::RemLong
                    | IrOpcode::DivIntLit
                    | IrOpcode::RemIntLit
            ),
            _ => false,
        }
    }

    /// `true` for `goto`, the `if-*` families and `switch`.
    #[must_use]
    pub fn is_branch(self) -> bool {
        matches!(
            self.family(),
            OpcodeFamily::Goto | OpcodeFamily::IfTest | OpcodeFamily::IfTestZ | OpcodeFamily::Switch
        )
    }

    /// `true` for the two `if-*` families.
    #[must_use]
    pub fn is_conditional_branch(self) -> bool {
        matches!(self.family(), OpcodeFamily::IfTest | OpcodeFamily::IfTestZ)
    }

    /// `true` for `goto`.
    #[must_use]
    pub fn is_goto(self) -> bool {
        self == IrOpcode::Goto
    }

    /// `true` for `switch`.
    #[must_use]
    pub fn is_switch(self) -> bool {
        self == IrOpcode::Switch
    }

    /// `true` for the return family.
    #[must_use]
    pub fn is_return(self) -> bool {
        self.family() == OpcodeFamily::Return
    }

    /// `true` for `throw`.
    #[must_use]
    pub fn is_throw(self) -> bool {
        self == IrOpcode::Throw
    }

    /// `true` if control never falls through: returns and `throw`.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        self.is_return() || self.is_throw()
    }

    /// `true` for any instruction that must end a basic block.
    #[must_use]
    pub fn ends_block(self) -> bool {
        self.is_branch() || self.is_terminal()
    }

    /// `true` for the invoke family.
    #[must_use]
    pub fn is_invoke(self) -> bool {
        self.family() == OpcodeFamily::Invoke
    }

    /// `true` for the `move-result*` family.
    #[must_use]
    pub fn is_move_result(self) -> bool {
        self.family() == OpcodeFamily::MoveResult
    }

    /// `true` for the `load-param*` pseudo opcodes.
    #[must_use]
    pub fn is_load_param(self) -> bool {
        self.family() == OpcodeFamily::LoadParam
    }

    /// `true` if the opcode's result is delivered through a following `move-result*`.
    #[must_use]
    pub fn has_move_result(self) -> bool {
        self.is_invoke() || self == IrOpcode::FilledNewArray
    }

    /// `true` for the monitor family.
    #[must_use]
    pub fn is_monitor(self) -> bool {
        self.family() == OpcodeFamily::Monitor
    }

    /// The `move-result*` variant for a value of `kind`.
    #[must_use]
    pub fn move_result_for(kind: RegKind) -> IrOpcode {
        match kind {
            RegKind::Narrow => IrOpcode::MoveResult,
            RegKind::Wide => IrOpcode::MoveResultWide,
            RegKind::Object => IrOpcode::MoveResultObject,
        }
    }

    /// The `move*` variant for a value of `kind`.
    #[must_use]
    pub fn move_for(kind: RegKind) -> IrOpcode {
        match kind {
            RegKind::Narrow => IrOpcode::Move,
            RegKind::Wide => IrOpcode::MoveWide,
            RegKind::Object => IrOpcode::MoveObject,
        }
    }

    /// The `return*` variant for a value of `kind`.
    #[must_use]
    pub fn return_for(kind: RegKind) -> IrOpcode {
        match kind {
            RegKind::Narrow => IrOpcode::Return,
            RegKind::Wide => IrOpcode::ReturnWide,
            RegKind::Object => IrOpcode::ReturnObject,
        }
    }

    /// The `load-param*` variant for a value of `kind`.
    #[must_use]
    pub fn load_param_for(kind: RegKind) -> IrOpcode {
        match kind {
            RegKind::Narrow => IrOpcode::LoadParam,
            RegKind::Wide => IrOpcode::LoadParamWide,
            RegKind::Object => IrOpcode::LoadParamObject,
        }
    }

    /// For binary ops with a literal form, that form.
    #[must_use]
    pub fn to_literal_form(self) -> Option<IrOpcode> {
        Some(match self {
            IrOpcode::AddInt => IrOpcode::AddIntLit,
            IrOpcode::SubInt => IrOpcode::RsubIntLit,
            IrOpcode::MulInt => IrOpcode::MulIntLit,
            IrOpcode::DivInt => IrOpcode::DivIntLit,
            IrOpcode::RemInt => IrOpcode::RemIntLit,
            IrOpcode::AndInt => IrOpcode::AndIntLit,
            IrOpcode::OrInt => IrOpcode::OrIntLit,
            IrOpcode::XorInt => IrOpcode::XorIntLit,
            IrOpcode::ShlInt => IrOpcode::ShlIntLit,
            IrOpcode::ShrInt => IrOpcode::ShrIntLit,
            IrOpcode::UshrInt => IrOpcode::UshrIntLit,
            _ => return None,
        })
    }

    /// For the `if-*` families, the opcode testing the negated condition.
    #[must_use]
    pub fn invert_condition(self) -> Option<IrOpcode> {
        Some(match self {
            IrOpcode::IfEq => IrOpcode::IfNe,
            IrOpcode::IfNe => IrOpcode::IfEq,
            IrOpcode::IfLt => IrOpcode::IfGe,
            IrOpcode::IfGe => IrOpcode::IfLt,
            IrOpcode::IfGt => IrOpcode::IfLe,
            IrOpcode::IfLe => IrOpcode::IfGt,
            IrOpcode::IfEqz => IrOpcode::IfNez,
            IrOpcode::IfNez => IrOpcode::IfEqz,
            IrOpcode::IfLtz => IrOpcode::IfGez,
            IrOpcode::IfGez => IrOpcode::IfLtz,
            IrOpcode::IfGtz => IrOpcode::IfLez,
            IrOpcode::IfLez => IrOpcode::IfGtz,
            _ => return None,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::str::FromStr;

    use strum::IntoEnumIterator;

    use super::*;

    #[test]
    fn names_are_dashed() {
        assert_eq!(IrOpcode::MoveResultObject.to_string(), "move-result-object");
        assert_eq!(IrOpcode::AddIntLit.to_string(), "add-int-lit");
        assert_eq!(IrOpcode::from_str("invoke-static"), Ok(IrOpcode::InvokeStatic));
    }

    #[test]
    fn every_opcode_is_classified_consistently() {
        for op in IrOpcode::iter() {
            if let Some(count) = op.src_count() {
                for i in 0..count {
                    assert!(op.src_kind(i).is_some(), "{op} src {i}");
                }
                assert!(op.src_kind(count).is_none(), "{op}");
            }
            if op.ends_block() {
                assert!(!op.has_dest(), "{op} ends a block but writes a register");
            }
            if op.is_conditional_branch() {
                assert!(op.invert_condition().is_some());
            }
        }
    }

    #[test]
    fn widths() {
        assert_eq!(IrOpcode::ShlLong.src_kind(0), Some(RegKind::Wide));
        assert_eq!(IrOpcode::ShlLong.src_kind(1), Some(RegKind::Narrow));
        assert_eq!(IrOpcode::AputWide.src_kind(0), Some(RegKind::Wide));
        assert_eq!(IrOpcode::AputWide.src_kind(1), Some(RegKind::Object));
        assert_eq!(IrOpcode::AputWide.src_kind(2), Some(RegKind::Narrow));
        assert_eq!(IrOpcode::IputObject.src_kind(1), Some(RegKind::Object));
        assert!(IrOpcode::CmpLong.src_kind(1) == Some(RegKind::Wide));
        assert!(!IrOpcode::CmpLong.dest_is_wide());
        assert!(IrOpcode::AddDouble.dest_is_wide());
        assert!(IrOpcode::DivIntLit.may_throw());
        assert!(!IrOpcode::AddIntLit.may_throw());
        assert!(IrOpcode::InvokeStatic.src_count().is_none());
    }
}
