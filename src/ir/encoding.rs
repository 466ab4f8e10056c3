//! Container encodings of abstract instructions.
//!
//! The IR hides operand widths. This module maps each [`IrInstruction`] to the narrowest
//! container form that can carry its registers and literal, and reports the size in
//! 16-bit code units. An instruction no form can carry is an
//! [`crate::Error::EncodingOverflow`]; transformations use that to abandon rewrites that
//! would not survive serialization.
//!
//! Register limits per form follow the container's instruction formats: `4` bits in
//! the two-register `12x`/`22c`/`22t` forms, `8` bits in `23x`/`21c`/`22b` and friends, and
//! `16` bits only for `move/16`-style and range forms.
//!
//! # Switch payloads
//!
//! A switch is encoded as `packed-switch` when its keys are dense and as
//! `sparse-switch` otherwise. With `n` keys spanning `range = max - min + 1` values:
//!
//! | Form | Payload size (code units) |
//! |------|---------------------------|
//! | packed | `4 + 2 * range` |
//! | sparse | `2 + 4 * n` |
//!
//! [`is_packed`] picks packed iff `range <= 2 * n`, where it is never larger than the
//! sparse payload.

use crate::{
    ir::{
        instruction::{FillArrayData, IrInstruction, Operand, Reg},
        opcode::{IrOpcode, OpcodeFamily},
        Pool,
    },
    Error, Result,
};

/// Size of an `invoke-*` (both regular and range forms).
pub const INVOKE_UNITS: usize = 3;
/// Size of a `move-result*`.
pub const MOVE_RESULT_UNITS: usize = 1;
/// Size of a `return*`.
pub const RETURN_UNITS: usize = 1;
/// Size of the switch instruction itself, without payload.
pub const SWITCH_UNITS: usize = 3;
/// Largest number of argument words an invoke can pass.
pub const MAX_INVOKE_WORDS: usize = 255;

/// Which container form was selected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EncodingForm {
    /// The only form of the opcode.
    Plain,
    /// 4-bit registers or literal (`const/4`, `move`, `12x`).
    Short,
    /// 8-bit destination, 16-bit source (`move/from16`) or 16-bit literal (`const/16`).
    From16,
    /// 16-bit registers (`move/16`).
    Sixteen,
    /// High-half literal (`const/high16`, `const-wide/high16`).
    High16,
    /// 32-bit literal (`const`, `const-wide/32`).
    Wide32,
    /// 64-bit literal (`const-wide`).
    Wide64,
    /// Two-address binary op (`add-int/2addr`).
    TwoAddr,
    /// 8-bit literal binary op.
    Lit8,
    /// 16-bit literal binary op.
    Lit16,
    /// Range form of an invoke or `filled-new-array`.
    Range,
}

/// The selected encoding of one instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Encoding {
    /// Selected form.
    pub form: EncodingForm,
    /// Size in code units (payloads excluded).
    pub units: usize,
}

impl Encoding {
    fn new(form: EncodingForm, units: usize) -> Self {
        Encoding { form, units }
    }
}

fn fits4(r: Reg) -> bool {
    r <= 0xf
}

fn fits8(r: Reg) -> bool {
    r <= 0xff
}

fn fits16(r: Reg) -> bool {
    r <= 0xffff
}

fn overflow(insn: &IrInstruction, what: &str) -> Error {
    Error::EncodingOverflow(format!("{what} in {insn:?}"))
}

/// Selects the narrowest legal encoding of `insn`.
///
/// # Errors
///
/// Returns [`Error::EncodingOverflow`] if a register or the literal does not fit any
/// form of the opcode.
pub fn select(insn: &IrInstruction, pool: &Pool) -> Result<Encoding> {
    let op = insn.opcode();
    let dest = insn.dest();
    let srcs = insn.srcs();
    let pair_ok = |i: usize| {
        srcs.get(i)
            .map_or(true, |&r| !insn.src_is_wide(i, pool) || r.checked_add(1).is_some_and(fits16))
    };
    let dest_pair_ok =
        dest.map_or(true, |d| !op.dest_is_wide() || d.checked_add(1).is_some_and(fits16));
    if !(0..srcs.len()).all(pair_ok) || !dest_pair_ok {
        return Err(overflow(insn, "register pair beyond the register file"));
    }

    let all = |limit: fn(Reg) -> bool| dest.map_or(true, limit) && srcs.iter().all(|&r| limit(r));

    let enc = match op.family() {
        OpcodeFamily::Nop => Encoding::new(EncodingForm::Plain, 1),
        OpcodeFamily::Move => {
            if all(fits4) {
                Encoding::new(EncodingForm::Short, 1)
            } else if dest.is_some_and(fits8) && all(fits16) {
                Encoding::new(EncodingForm::From16, 2)
            } else if all(fits16) {
                Encoding::new(EncodingForm::Sixteen, 3)
            } else {
                return Err(overflow(insn, "move register"));
            }
        }
        OpcodeFamily::MoveResult
        | OpcodeFamily::MoveException
        | OpcodeFamily::Return
        | OpcodeFamily::Monitor
        | OpcodeFamily::Throw => {
            if !all(fits8) {
                return Err(overflow(insn, "8-bit register"));
            }
            Encoding::new(EncodingForm::Plain, 1)
        }
        OpcodeFamily::Const => return select_const(insn),
        OpcodeFamily::ConstRef
        | OpcodeFamily::CheckCast
        | OpcodeFamily::NewInstance
        | OpcodeFamily::IfTestZ
        | OpcodeFamily::Compare
        | OpcodeFamily::ArrayGet
        | OpcodeFamily::ArrayPut
        | OpcodeFamily::StaticGet
        | OpcodeFamily::StaticPut
        | OpcodeFamily::Binary => {
            if op.family() == OpcodeFamily::Binary {
                let two_addr = dest == srcs.first().copied() && all(fits4);
                if two_addr {
                    return Ok(Encoding::new(EncodingForm::TwoAddr, 1));
                }
            }
            if !all(fits8) {
                return Err(overflow(insn, "8-bit register"));
            }
            Encoding::new(EncodingForm::Plain, 2)
        }
        OpcodeFamily::InstanceOf
        | OpcodeFamily::NewArray
        | OpcodeFamily::IfTest
        | OpcodeFamily::InstanceGet
        | OpcodeFamily::InstancePut => {
            if !all(fits4) {
                return Err(overflow(insn, "4-bit register"));
            }
            Encoding::new(EncodingForm::Plain, 2)
        }
        OpcodeFamily::ArrayLength | OpcodeFamily::Unary => {
            if !all(fits4) {
                return Err(overflow(insn, "4-bit register"));
            }
            Encoding::new(EncodingForm::Plain, 1)
        }
        OpcodeFamily::FillArrayData | OpcodeFamily::Switch => {
            if !all(fits8) {
                return Err(overflow(insn, "8-bit register"));
            }
            Encoding::new(EncodingForm::Plain, 3)
        }
        OpcodeFamily::Goto => Encoding::new(EncodingForm::Plain, 1),
        OpcodeFamily::Invoke | OpcodeFamily::FilledNewArray => {
            let words = insn.arg_words(pool);
            if words > MAX_INVOKE_WORDS {
                return Err(overflow(insn, "argument word count"));
            }
            if !all(fits16) {
                return Err(overflow(insn, "16-bit register"));
            }
            let wide_high_ok = (0..srcs.len())
                .all(|i| !insn.src_is_wide(i, pool) || srcs[i].checked_add(1).is_some_and(fits4));
            if words <= 5 && all(fits4) && wide_high_ok {
                Encoding::new(EncodingForm::Plain, INVOKE_UNITS)
            } else {
                Encoding::new(EncodingForm::Range, INVOKE_UNITS)
            }
        }
        OpcodeFamily::BinaryLit => return select_binop_lit(insn),
        OpcodeFamily::LoadParam | OpcodeFamily::InitClass => Encoding::new(EncodingForm::Plain, 0),
    };
    Ok(enc)
}

fn select_const(insn: &IrInstruction) -> Result<Encoding> {
    let Some(dest) = insn.dest() else {
        return Err(overflow(insn, "missing destination"));
    };
    if !fits8(dest) {
        return Err(overflow(insn, "8-bit register"));
    }
    let value = insn.literal().unwrap_or(0);
    if insn.opcode() == IrOpcode::ConstWide {
        return Ok(if i16::try_from(value).is_ok() {
            Encoding::new(EncodingForm::From16, 2)
        } else if i32::try_from(value).is_ok() {
            Encoding::new(EncodingForm::Wide32, 3)
        } else if value & 0x0000_ffff_ffff_ffff == 0 {
            Encoding::new(EncodingForm::High16, 2)
        } else {
            Encoding::new(EncodingForm::Wide64, 5)
        });
    }

    #[allow(clippy::cast_possible_truncation)]
    let value = value as i32;
    Ok(if (-8..=7).contains(&value) && fits4(dest) {
        Encoding::new(EncodingForm::Short, 1)
    } else if i16::try_from(value).is_ok() {
        Encoding::new(EncodingForm::From16, 2)
    } else if value & 0xffff == 0 {
        Encoding::new(EncodingForm::High16, 2)
    } else {
        Encoding::new(EncodingForm::Wide32, 3)
    })
}

fn select_binop_lit(insn: &IrInstruction) -> Result<Encoding> {
    let (Some(dest), Some(src)) = (insn.dest(), insn.src(0)) else {
        return Err(overflow(insn, "missing register"));
    };
    let value = insn.literal().unwrap_or(0);
    let shift = matches!(
        insn.opcode(),
        IrOpcode::ShlIntLit | IrOpcode::ShrIntLit | IrOpcode::UshrIntLit
    );
    if i8::try_from(value).is_ok() && fits8(dest) && fits8(src) {
        return Ok(Encoding::new(EncodingForm::Lit8, 2));
    }
    if !shift && i16::try_from(value).is_ok() && fits4(dest) && fits4(src) {
        return Ok(Encoding::new(EncodingForm::Lit16, 2));
    }
    Err(overflow(insn, "literal or register width"))
}

/// Size of `insn` in code units, payloads excluded.
///
/// # Errors
///
/// See [`select`].
pub fn insn_units(insn: &IrInstruction, pool: &Pool) -> Result<usize> {
    Ok(select(insn, pool)?.units)
}

/// Size of `insn` plus any payload it carries in linear form.
///
/// # Errors
///
/// See [`select`].
pub fn insn_units_with_payload(insn: &IrInstruction, pool: &Pool) -> Result<usize> {
    let base = insn_units(insn, pool)?;
    let payload = match insn.operand() {
        Operand::Switch(cases) => {
            let keys: Vec<i32> = cases.iter().map(|c| c.key).collect();
            switch_payload_units(&keys)
        }
        Operand::Data(data) => fill_array_payload_units(data),
        _ => 0,
    };
    Ok(base + payload)
}

/// `true` if an instruction fits some container form.
#[must_use]
pub fn is_encodable(insn: &IrInstruction, pool: &Pool) -> bool {
    select(insn, pool).is_ok()
}

/// Number of values spanned by `keys` (`max - min + 1`), or 0 for no keys.
#[must_use]
pub fn key_range(keys: &[i32]) -> u64 {
    match (keys.iter().min(), keys.iter().max()) {
        (Some(&min), Some(&max)) => {
            #[allow(clippy::cast_sign_loss)]
            let span = (i64::from(max) - i64::from(min) + 1) as u64;
            span
        }
        _ => 0,
    }
}

/// `true` if a switch over `keys` is encoded as a packed switch.
#[must_use]
pub fn is_packed(keys: &[i32]) -> bool {
    !keys.is_empty() && key_range(keys) <= 2 * keys.len() as u64
}

/// Payload size of a packed switch spanning `range` keys.
#[must_use]
pub fn packed_switch_payload_units(range: u64) -> usize {
    usize::try_from(4 + 2 * range).unwrap_or(usize::MAX)
}

/// Payload size of a sparse switch with `count` keys.
#[must_use]
pub fn sparse_switch_payload_units(count: usize) -> usize {
    2 + 4 * count
}

/// Payload size of the form [`is_packed`] selects for `keys`.
#[must_use]
pub fn switch_payload_units(keys: &[i32]) -> usize {
    if is_packed(keys) {
        packed_switch_payload_units(key_range(keys))
    } else {
        sparse_switch_payload_units(keys.len())
    }
}

/// Payload size of a `fill-array-data`.
#[must_use]
pub fn fill_array_payload_units(data: &FillArrayData) -> usize {
    4 + data.data.len().div_ceil(2)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::opcode::RegKind;

    fn form(insn: &IrInstruction) -> (EncodingForm, usize) {
        let pool = Pool::new();
        let enc = select(insn, &pool).unwrap();
        (enc.form, enc.units)
    }

    #[test]
    fn const_picks_narrowest() {
        assert_eq!(form(&IrInstruction::const_(0, 7)), (EncodingForm::Short, 1));
        assert_eq!(form(&IrInstruction::const_(0, 8)), (EncodingForm::From16, 2));
        assert_eq!(form(&IrInstruction::const_(20, -3)), (EncodingForm::From16, 2));
        assert_eq!(
            form(&IrInstruction::const_(0, 0x1234_0000)),
            (EncodingForm::High16, 2)
        );
        assert_eq!(
            form(&IrInstruction::const_(0, 0x1234_5678)),
            (EncodingForm::Wide32, 3)
        );
        assert_eq!(
            form(&IrInstruction::const_wide(0, 1 << 60)),
            (EncodingForm::High16, 2)
        );
        assert_eq!(
            form(&IrInstruction::const_wide(0, 0x1234_5678_9abc)),
            (EncodingForm::Wide64, 5)
        );
        let pool = Pool::new();
        assert!(matches!(
            select(&IrInstruction::const_(256, 0), &pool),
            Err(Error::EncodingOverflow(_))
        ));
    }

    #[test]
    fn moves_and_binops() {
        assert_eq!(
            form(&IrInstruction::move_(RegKind::Narrow, 1, 2)),
            (EncodingForm::Short, 1)
        );
        assert_eq!(
            form(&IrInstruction::move_(RegKind::Narrow, 200, 3000)),
            (EncodingForm::From16, 2)
        );
        assert_eq!(
            form(&IrInstruction::move_(RegKind::Object, 3000, 200)),
            (EncodingForm::Sixteen, 3)
        );
        let add = IrInstruction::new(IrOpcode::AddInt)
            .with_dest(1)
            .with_srcs(&[1, 2]);
        assert_eq!(form(&add), (EncodingForm::TwoAddr, 1));
        let lit = IrInstruction::binop_lit(IrOpcode::AddIntLit, 1, 2, 1000);
        assert_eq!(form(&lit), (EncodingForm::Lit16, 2));
        let pool = Pool::new();
        let shl = IrInstruction::binop_lit(IrOpcode::ShlIntLit, 1, 2, 1000);
        assert!(select(&shl, &pool).is_err());
        let if_eq = IrInstruction::if_test(IrOpcode::IfEq, 3, 16);
        assert!(select(&if_eq, &pool).is_err());
    }

    #[test]
    fn switch_payloads() {
        assert!(is_packed(&[1, 2, 3]));
        assert!(is_packed(&[100, 101]));
        assert!(!is_packed(&[0, 50]));
        assert!(!is_packed(&[0, 3, 6, 9, 12]));
        assert_eq!(switch_payload_units(&[1, 2, 3]), 10);
        assert_eq!(switch_payload_units(&[0, 50]), 10);
        assert_eq!(key_range(&[i32::MIN, i32::MAX]), 1 << 32);
    }
}
