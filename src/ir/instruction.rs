//! IR instructions.
//!
//! An [`IrInstruction`] is a single tagged value: an [`IrOpcode`], an optional
//! destination register, the source registers and one [`Operand`]. Registers are virtual
//! (`u32`); the encoding layer checks them against the container's 4/8/16-bit register
//! fields when sizes are requested.
//!
//! Wide (64-bit) values occupy the register pair `r, r + 1` and are named by the low
//! register. Invoke sources list one register per argument, wide arguments included;
//! the pair is implied by the prototype.

use std::{fmt, sync::Arc};

use crate::{
    ir::{
        opcode::{IrOpcode, OpcodeFamily, OperandKind, RegKind},
        CallSiteRef, FieldRef, MethodHandleRef, MethodRef, Pool, ProtoRef, StringRef, TypeRef,
    },
    Result,
};

/// A virtual register.
pub type Reg = u32;

/// Highest register number the container format can address.
pub const MAX_REGISTER: Reg = 0xffff;

define_handle!(
    /// A branch target in the linear form of a body.
    Label, "L"
);

/// One case of a linear-form switch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SwitchCase {
    /// Case key.
    pub key: i32,
    /// Case target.
    pub target: Label,
}

/// The payload of `fill-array-data`: element width in bytes plus the raw little-endian
/// element data.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FillArrayData {
    /// Width of one element in bytes (1, 2, 4 or 8).
    pub element_width: u16,
    /// Raw element bytes, `element_width * count` long.
    pub data: Vec<u8>,
}

impl FillArrayData {
    /// Number of elements.
    #[must_use]
    pub fn len(&self) -> usize {
        if self.element_width == 0 {
            0
        } else {
            self.data.len() / usize::from(self.element_width)
        }
    }

    /// `true` if the payload holds no elements.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// The non-register operand of an instruction.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
#[allow(missing_docs)]
pub enum Operand {
    #[default]
    None,
    Literal(i64),
    String(StringRef),
    Type(TypeRef),
    Field(FieldRef),
    Method(MethodRef),
    Proto(ProtoRef),
    CallSite(CallSiteRef),
    MethodHandle(MethodHandleRef),
    Data(Arc<FillArrayData>),
    /// Linear form only; in CFG form branch targets are edges.
    Branch(Label),
    /// Linear form only; in CFG form case targets are edges.
    Switch(Vec<SwitchCase>),
}

impl Operand {
    fn kind(&self) -> OperandKind {
        match self {
            Operand::None => OperandKind::None,
            Operand::Literal(_) => OperandKind::Literal,
            Operand::String(_) => OperandKind::String,
            Operand::Type(_) => OperandKind::Type,
            Operand::Field(_) => OperandKind::Field,
            Operand::Method(_) => OperandKind::Method,
            Operand::Proto(_) => OperandKind::Proto,
            Operand::CallSite(_) => OperandKind::CallSite,
            Operand::MethodHandle(_) => OperandKind::MethodHandle,
            Operand::Data(_) => OperandKind::Data,
            Operand::Branch(_) => OperandKind::Branch,
            Operand::Switch(_) => OperandKind::Switch,
        }
    }
}

/// A single IR instruction.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct IrInstruction {
    opcode: IrOpcode,
    dest: Option<Reg>,
    srcs: Vec<Reg>,
    operand: Operand,
}

impl IrInstruction {
    /// Creates an instruction with no registers and no operand.
    #[must_use]
    pub fn new(opcode: IrOpcode) -> Self {
        IrInstruction {
            opcode,
            dest: None,
            srcs: Vec::new(),
            operand: Operand::None,
        }
    }

    /// Sets the destination register.
    #[must_use]
    pub fn with_dest(mut self, dest: Reg) -> Self {
        self.dest = Some(dest);
        self
    }

    /// Sets the source registers.
    #[must_use]
    pub fn with_srcs(mut self, srcs: &[Reg]) -> Self {
        self.srcs = srcs.to_vec();
        self
    }

    /// Sets the operand.
    #[must_use]
    pub fn with_operand(mut self, operand: Operand) -> Self {
        self.operand = operand;
        self
    }

    /// Sets a literal operand.
    #[must_use]
    pub fn with_literal(self, value: i64) -> Self {
        self.with_operand(Operand::Literal(value))
    }

    /// Sets a type operand.
    #[must_use]
    pub fn with_type(self, ty: TypeRef) -> Self {
        self.with_operand(Operand::Type(ty))
    }

    /// Sets a field operand.
    #[must_use]
    pub fn with_field(self, field: FieldRef) -> Self {
        self.with_operand(Operand::Field(field))
    }

    /// Sets a method operand.
    #[must_use]
    pub fn with_method(self, method: MethodRef) -> Self {
        self.with_operand(Operand::Method(method))
    }

    /// Sets a string operand.
    #[must_use]
    pub fn with_string(self, string: StringRef) -> Self {
        self.with_operand(Operand::String(string))
    }

    /// `const dest, value` (`const-wide` for wide destinations is [`Self::const_wide`]).
    #[must_use]
    pub fn const_(dest: Reg, value: i32) -> Self {
        Self::new(IrOpcode::Const)
            .with_dest(dest)
            .with_literal(i64::from(value))
    }

    /// `const-wide dest, value`.
    #[must_use]
    pub fn const_wide(dest: Reg, value: i64) -> Self {
        Self::new(IrOpcode::ConstWide)
            .with_dest(dest)
            .with_literal(value)
    }

    /// A register-to-register move of the given kind.
    #[must_use]
    pub fn move_(kind: RegKind, dest: Reg, src: Reg) -> Self {
        Self::new(IrOpcode::move_for(kind))
            .with_dest(dest)
            .with_srcs(&[src])
    }

    /// An invoke of `method` with one source register per argument.
    #[must_use]
    pub fn invoke(opcode: IrOpcode, method: MethodRef, args: &[Reg]) -> Self {
        Self::new(opcode).with_srcs(args).with_method(method)
    }

    /// A two-register `if-*` comparison.
    #[must_use]
    pub fn if_test(opcode: IrOpcode, a: Reg, b: Reg) -> Self {
        Self::new(opcode).with_srcs(&[a, b])
    }

    /// A zero-comparison `if-*z`.
    #[must_use]
    pub fn if_testz(opcode: IrOpcode, a: Reg) -> Self {
        Self::new(opcode).with_srcs(&[a])
    }

    /// A binary op with a literal: `dest = src <op> literal`.
    #[must_use]
    pub fn binop_lit(opcode: IrOpcode, dest: Reg, src: Reg, literal: i32) -> Self {
        Self::new(opcode)
            .with_dest(dest)
            .with_srcs(&[src])
            .with_literal(i64::from(literal))
    }

    /// The opcode.
    #[must_use]
    pub fn opcode(&self) -> IrOpcode {
        self.opcode
    }

    /// Replaces the opcode. The caller keeps registers and operand consistent.
    pub fn set_opcode(&mut self, opcode: IrOpcode) {
        self.opcode = opcode;
    }

    /// The destination register.
    #[must_use]
    pub fn dest(&self) -> Option<Reg> {
        self.dest
    }

    /// Replaces the destination register.
    pub fn set_dest(&mut self, dest: Reg) {
        self.dest = Some(dest);
    }

    /// The source registers.
    #[must_use]
    pub fn srcs(&self) -> &[Reg] {
        &self.srcs
    }

    /// Source register `index`.
    #[must_use]
    pub fn src(&self, index: usize) -> Option<Reg> {
        self.srcs.get(index).copied()
    }

    /// Replaces source register `index`.
    ///
    /// # Panics
    ///
    /// Panics if `index` is out of range.
    pub fn set_src(&mut self, index: usize, reg: Reg) {
        self.srcs[index] = reg;
    }

    /// Mutable access to all sources.
    pub fn srcs_mut(&mut self) -> &mut [Reg] {
        &mut self.srcs
    }

    /// The operand.
    #[must_use]
    pub fn operand(&self) -> &Operand {
        &self.operand
    }

    /// Replaces the operand.
    pub fn set_operand(&mut self, operand: Operand) {
        self.operand = operand;
    }

    /// The literal operand.
    #[must_use]
    pub fn literal(&self) -> Option<i64> {
        match self.operand {
            Operand::Literal(v) => Some(v),
            _ => None,
        }
    }

    /// The type operand.
    #[must_use]
    pub fn type_ref(&self) -> Option<TypeRef> {
        match self.operand {
            Operand::Type(t) => Some(t),
            _ => None,
        }
    }

    /// The field operand.
    #[must_use]
    pub fn field(&self) -> Option<FieldRef> {
        match self.operand {
            Operand::Field(f) => Some(f),
            _ => None,
        }
    }

    /// The method operand.
    #[must_use]
    pub fn method(&self) -> Option<MethodRef> {
        match self.operand {
            Operand::Method(m) => Some(m),
            _ => None,
        }
    }

    /// The string operand.
    #[must_use]
    pub fn string(&self) -> Option<StringRef> {
        match self.operand {
            Operand::String(s) => Some(s),
            _ => None,
        }
    }

    /// The branch target (linear form).
    #[must_use]
    pub fn branch_target(&self) -> Option<Label> {
        match self.operand {
            Operand::Branch(l) => Some(l),
            _ => None,
        }
    }

    /// The switch cases (linear form).
    #[must_use]
    pub fn switch_cases(&self) -> Option<&[SwitchCase]> {
        match &self.operand {
            Operand::Switch(cases) => Some(cases),
            _ => None,
        }
    }

    /// Shorthand for `self.opcode().may_throw()`.
    #[must_use]
    pub fn may_throw(&self) -> bool {
        self.opcode.may_throw()
    }

    /// Category of source `index`, resolving invoke and `filled-new-array` arguments
    /// through the pool.
    #[must_use]
    pub fn src_kind(&self, index: usize, pool: &Pool) -> Option<RegKind> {
        if let Some(kind) = self.opcode.src_kind(index) {
            return Some(kind);
        }
        match self.opcode.family() {
            OpcodeFamily::Invoke => {
                let method = self.method()?;
                let proto = pool.proto(pool.method(method).proto);
                let receiver = usize::from(self.has_receiver());
                if index < receiver {
                    return Some(RegKind::Object);
                }
                let arg = *proto.args.get(index - receiver)?;
                Some(reg_kind_of(pool, arg))
            }
            OpcodeFamily::FilledNewArray => {
                if index >= self.srcs.len() {
                    return None;
                }
                let component = pool.array_component(self.type_ref()?)?;
                Some(reg_kind_of(pool, component))
            }
            _ => None,
        }
    }

    /// `true` if source `index` names a register pair.
    #[must_use]
    pub fn src_is_wide(&self, index: usize, pool: &Pool) -> bool {
        self.src_kind(index, pool) == Some(RegKind::Wide)
    }

    /// `true` for invokes that pass `this` as their first source.
    #[must_use]
    pub fn has_receiver(&self) -> bool {
        matches!(
            self.opcode,
            IrOpcode::InvokeVirtual
                | IrOpcode::InvokeSuper
                | IrOpcode::InvokeDirect
                | IrOpcode::InvokeInterface
                | IrOpcode::InvokePolymorphic
        )
    }

    /// Registers written, pair halves included.
    #[must_use]
    pub fn def_slots(&self) -> Vec<Reg> {
        match self.dest {
            Some(d) if self.opcode.dest_is_wide() => vec![d, d + 1],
            Some(d) => vec![d],
            None => Vec::new(),
        }
    }

    /// Registers read, pair halves included.
    #[must_use]
    pub fn use_slots(&self, pool: &Pool) -> Vec<Reg> {
        let mut out = Vec::with_capacity(self.srcs.len() + 1);
        for (i, &r) in self.srcs.iter().enumerate() {
            out.push(r);
            if self.src_is_wide(i, pool) {
                out.push(r + 1);
            }
        }
        out
    }

    /// Number of 32-bit argument words an invoke passes (`this` included).
    #[must_use]
    pub fn arg_words(&self, pool: &Pool) -> usize {
        (0..self.srcs.len())
            .map(|i| if self.src_is_wide(i, pool) { 2 } else { 1 })
            .sum()
    }

    /// Checks register arity, operand kind and register limits.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::MalformedBody`] describing the first inconsistency.
    pub fn validate(&self, pool: &Pool) -> Result<()> {
        let op = self.opcode;
        if op.has_dest() != self.dest.is_some() {
            return Err(malformed_body!(
                "{} {} a destination register",
                op,
                if op.has_dest() { "requires" } else { "does not take" }
            ));
        }
        let expected_srcs = match op.family() {
            OpcodeFamily::Invoke => match self.method() {
                Some(m) => {
                    let proto = pool.method(m).proto;
                    Some(pool.proto(proto).args.len() + usize::from(self.has_receiver()))
                }
                None if op == IrOpcode::InvokeCustom => None,
                None => return Err(malformed_body!("{} without a method operand", op)),
            },
            _ => op.src_count(),
        };
        if let Some(expected) = expected_srcs {
            if expected != self.srcs.len() {
                return Err(malformed_body!(
                    "{} expects {} source registers, found {}",
                    op,
                    expected,
                    self.srcs.len()
                ));
            }
        }

        let kind = self.operand.kind();
        let expected_kind = op.operand_kind();
        let operand_ok = kind == expected_kind
            // in CFG form the targets of branches live on edges
            || (matches!(expected_kind, OperandKind::Branch | OperandKind::Switch)
                && kind == OperandKind::None);
        if !operand_ok {
            return Err(malformed_body!(
                "{} expects a {:?} operand, found {:?}",
                op,
                expected_kind,
                kind
            ));
        }
        if let Operand::Literal(v) = self.operand {
            let fits = match op {
                IrOpcode::ConstWide => true,
                IrOpcode::Const => i32::try_from(v).is_ok() || u32::try_from(v).is_ok(),
                _ => i16::try_from(v).is_ok(),
            };
            if !fits {
                return Err(malformed_body!("literal {} out of range for {}", v, op));
            }
        }

        let mut regs: Vec<(Reg, bool)> = self
            .srcs
            .iter()
            .enumerate()
            .map(|(i, &r)| (r, self.src_is_wide(i, pool)))
            .collect();
        if let Some(d) = self.dest {
            regs.push((d, op.dest_is_wide()));
        }
        for (reg, wide) in regs {
            let last = if wide { reg.checked_add(1) } else { Some(reg) };
            if last.map_or(true, |l| l > MAX_REGISTER) {
                return Err(malformed_body!("register v{} exceeds the register file", reg));
            }
        }
        Ok(())
    }

    /// A stable textual rendering using the pool for names.
    #[must_use]
    pub fn show(&self, pool: &Pool) -> String {
        let mut out = self.opcode.to_string();
        let mut regs = Vec::new();
        if let Some(d) = self.dest {
            regs.push(format!("v{d}"));
        }
        regs.extend(self.srcs.iter().map(|r| format!("v{r}")));
        if !regs.is_empty() {
            out.push(' ');
            out.push_str(&regs.join(", "));
        }
        let operand = match &self.operand {
            Operand::None => None,
            Operand::Literal(v) => Some(format!("#{v}")),
            Operand::String(s) => Some(format!("{:?}", pool.str(*s))),
            Operand::Type(t) => Some(pool.type_descriptor(*t).to_string()),
            Operand::Field(f) => Some(pool.show_field(*f)),
            Operand::Method(m) => Some(pool.show_method(*m)),
            Operand::Proto(p) => Some(pool.show_proto(*p)),
            Operand::CallSite(c) => Some(c.to_string()),
            Operand::MethodHandle(h) => Some(h.to_string()),
            Operand::Data(d) => Some(format!("<{} x {} bytes>", d.len(), d.element_width)),
            Operand::Branch(l) => Some(l.to_string()),
            Operand::Switch(cases) => Some(
                cases
                    .iter()
                    .map(|c| format!("{} -> {}", c.key, c.target))
                    .collect::<Vec<_>>()
                    .join(", "),
            ),
        };
        if let Some(operand) = operand {
            out.push_str(if regs.is_empty() { " " } else { ", " });
            out.push_str(&operand);
        }
        out
    }
}

impl fmt::Debug for IrInstruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.opcode)?;
        if let Some(d) = self.dest {
            write!(f, " v{d}")?;
        }
        for s in &self.srcs {
            write!(f, " v{s}")?;
        }
        if self.operand != Operand::None {
            write!(f, " {:?}", self.operand)?;
        }
        Ok(())
    }
}

/// The register category holding values of type `t`.
#[must_use]
pub fn reg_kind_of(pool: &Pool, t: TypeRef) -> RegKind {
    if pool.is_wide(t) {
        RegKind::Wide
    } else if pool.is_reference(t) {
        RegKind::Object
    } else {
        RegKind::Narrow
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invoke_widths_follow_the_proto() {
        let pool = Pool::new();
        let k = *pool.known();
        let foo = pool.intern_type("LFoo;");
        let proto = pool.intern_proto(k.void, &[k.long, k.int]);
        let m = pool.intern_method(foo, "bar", proto);

        let insn = IrInstruction::invoke(IrOpcode::InvokeVirtual, m, &[0, 1, 3]);
        assert!(insn.validate(&pool).is_ok());
        assert_eq!(insn.src_kind(0, &pool), Some(RegKind::Object));
        assert!(insn.src_is_wide(1, &pool));
        assert!(!insn.src_is_wide(2, &pool));
        assert_eq!(insn.use_slots(&pool), vec![0, 1, 2, 3]);
        assert_eq!(insn.arg_words(&pool), 4);

        let wrong = IrInstruction::invoke(IrOpcode::InvokeStatic, m, &[0, 1, 3]);
        assert!(matches!(
            wrong.validate(&pool),
            Err(crate::Error::MalformedBody { .. })
        ));
    }

    #[test]
    fn validate_rejects_bad_shapes() {
        let pool = Pool::new();
        assert!(IrInstruction::new(IrOpcode::Const).validate(&pool).is_err());
        assert!(IrInstruction::const_(0, 7).validate(&pool).is_ok());
        let lit = IrInstruction::binop_lit(IrOpcode::AddIntLit, 0, 1, 70_000);
        assert!(lit.validate(&pool).is_err());
        let wide = IrInstruction::const_wide(MAX_REGISTER, 1);
        assert!(wide.validate(&pool).is_err());
        // branches without a target are legal in CFG form
        assert!(IrInstruction::if_testz(IrOpcode::IfEqz, 0)
            .validate(&pool)
            .is_ok());
    }

    #[test]
    fn show_is_readable() {
        let pool = Pool::new();
        let insn = IrInstruction::binop_lit(IrOpcode::AddIntLit, 1, 2, -3);
        assert_eq!(insn.show(&pool), "add-int-lit v1, v2, #-3");
        let ret = IrInstruction::new(IrOpcode::ReturnVoid);
        assert_eq!(ret.show(&pool), "return-void");
    }
}
