//! Parameter and return types of a helper.
//!
//! Types come from two sides. The instructions of the body demand types of the values
//! they consume (an invoke wants its prototype, a field store wants the field type),
//! and type inference at every call site tells what the caller actually passes. A
//! parameter gets the weakest type the body demands; the callers are only checked
//! against it. The result must be at least as precise as what every caller held in
//! its result register, since no cast follows the call. Otherwise the group is
//! dropped.

use std::sync::Arc;

use crate::{
    analysis::{InferredTypes, RegType, TypeInference},
    cfg::ControlFlowGraph,
    ir::{
        instruction::{IrInstruction, Reg},
        opcode::{IrOpcode, OpcodeFamily, RegKind},
        position::DexPosition,
        types::TypeCategory,
        Pool, TypeRef, TypeSystem,
    },
    opt::outliner::{candidate::Fingerprint, rewrite::helper_code, Occurrence},
};

/// What the caller holds at one occurrence, read before the rewrite.
#[derive(Debug, Clone)]
pub struct Observed {
    /// Types of the argument registers before the first instruction.
    pub args: Vec<RegType>,
    /// Type of the result register after the last instruction.
    pub result: Option<RegType>,
    /// Position in effect at each instruction.
    pub positions: Vec<Option<Arc<DexPosition>>>,
}

impl Observed {
    /// `true` if any instruction of the occurrence carries a position.
    #[must_use]
    pub fn has_positions(&self) -> bool {
        self.positions.iter().any(Option::is_some)
    }
}

/// Reads the argument and result types of `occurrence` from `inferred`.
#[must_use]
pub fn observe(
    cfg: &ControlFlowGraph,
    inferred: Option<&InferredTypes<'_>>,
    occurrence: &Occurrence,
) -> Observed {
    let before = occurrence
        .insns
        .first()
        .and_then(|&pos| inferred?.state_before(cfg, pos));
    let after = occurrence
        .insns
        .last()
        .and_then(|&pos| inferred?.state_after(cfg, pos));
    Observed {
        args: occurrence
            .args
            .iter()
            .map(|&r| before.as_ref().map_or(RegType::Top, |env| env.get(r)))
            .collect(),
        result: occurrence
            .result
            .map(|r| after.as_ref().map_or(RegType::Top, |env| env.get(r))),
        positions: occurrence
            .insns
            .iter()
            .map(|&pos| cfg.position_at(pos).cloned())
            .collect(),
    }
}

/// What a body asks of one parameter register.
#[derive(Debug, Default)]
struct Demands {
    types: Vec<TypeRef>,
    array: bool,
}

/// Types the instructions of `fingerprint` require of helper register `reg` while it
/// still holds the incoming argument.
fn demands_of(fingerprint: &Fingerprint, reg: Reg, kind: RegKind, pool: &Pool) -> Demands {
    let mut demands = Demands::default();
    for insn in &fingerprint.insns {
        let mut narrowed = false;
        for (i, &src) in insn.srcs().iter().enumerate() {
            if src == reg {
                demand_at(insn, i, pool, &mut demands);
                narrowed |= insn.opcode().family() == OpcodeFamily::CheckCast;
            }
        }
        // Later uses see the cast type, which the cast itself guarantees.
        if narrowed {
            break;
        }
        let wide_dest = insn.opcode().dest_is_wide();
        let clobbers = insn.def_slots().iter().any(|&d| {
            d == reg || (kind == RegKind::Wide && d == reg + 1) || (wide_dest && d + 1 == reg)
        });
        if clobbers {
            break;
        }
    }
    demands
}

fn demand_at(insn: &IrInstruction, index: usize, pool: &Pool, demands: &mut Demands) {
    let op = insn.opcode();
    match op.family() {
        OpcodeFamily::Invoke => {
            let Some(method) = insn.method() else { return };
            let data = pool.method(method);
            let receiver = usize::from(insn.has_receiver());
            if index < receiver {
                demands.types.push(data.owner);
            } else if let Some(&arg) = pool.proto(data.proto).args.get(index - receiver) {
                demands.types.push(arg);
            }
        }
        OpcodeFamily::InstanceGet => {
            if let Some(f) = insn.field() {
                demands.types.push(pool.field(f).owner);
            }
        }
        OpcodeFamily::InstancePut => {
            if let Some(f) = insn.field() {
                let field = pool.field(f);
                demands
                    .types
                    .push(if index == 0 { field.ty } else { field.owner });
            }
        }
        OpcodeFamily::StaticPut => {
            if let Some(f) = insn.field() {
                demands.types.push(pool.field(f).ty);
            }
        }
        OpcodeFamily::FilledNewArray => {
            if let Some(component) = insn.type_ref().and_then(|t| pool.array_component(t)) {
                demands.types.push(component);
            }
        }
        // Any reference may be cast or tested.
        OpcodeFamily::CheckCast | OpcodeFamily::InstanceOf => {}
        OpcodeFamily::ArrayGet if index == 0 => demands.array = true,
        OpcodeFamily::ArrayPut if index == 1 => demands.array = true,
        OpcodeFamily::ArrayLength | OpcodeFamily::FillArrayData => demands.array = true,
        _ => {}
    }
}

/// Chooses parameter types for `fingerprint` given what each occurrence passes.
/// `None` if no choice fits every call site.
#[must_use]
pub fn param_types(
    fingerprint: &Fingerprint,
    observed: &[&Observed],
    pool: &Pool,
    types: &TypeSystem,
) -> Option<Vec<TypeRef>> {
    fingerprint
        .params
        .iter()
        .enumerate()
        .map(|(i, &(reg, kind))| {
            let demands = demands_of(fingerprint, reg, kind, pool);
            let seen: Vec<RegType> = observed
                .iter()
                .map(|o| o.args.get(i).copied().unwrap_or(RegType::Top))
                .collect();
            match kind {
                RegKind::Object => reference_param(&demands, &seen, pool, types),
                RegKind::Narrow | RegKind::Wide => primitive_param(kind, &demands, &seen, pool),
            }
        })
        .collect()
}

fn reference_param(
    demands: &Demands,
    seen: &[RegType],
    pool: &Pool,
    types: &TypeSystem,
) -> Option<TypeRef> {
    let mut joined: Option<TypeRef> = None;
    let mut unknown = false;
    for t in seen {
        match *t {
            RegType::Zero => {}
            RegType::Reference(Some(ty)) => {
                joined = Some(joined.map_or(ty, |j| types.common_supertype(j, ty)));
            }
            RegType::Reference(None) => unknown = true,
            _ => return None,
        }
    }
    let satisfies = |c: TypeRef| {
        demands.types.iter().all(|&d| types.is_subtype(c, d))
            && (!demands.array || pool.is_array(c))
    };
    // The weakest type meeting every demand is the demand implied by all the others.
    let demanded = if demands.array {
        None
    } else if demands.types.is_empty() {
        Some(pool.known().object)
    } else {
        demands.types.iter().copied().find(|&c| satisfies(c))
    };
    let chosen = match demanded {
        Some(c) => c,
        None if unknown => return None,
        None => joined.filter(|&j| satisfies(j))?,
    };
    // A caller of unknown type fed the same value to the same instructions before.
    joined
        .map_or(true, |j| types.is_subtype(j, chosen))
        .then_some(chosen)
}

fn primitive_param(
    kind: RegKind,
    demands: &Demands,
    seen: &[RegType],
    pool: &Pool,
) -> Option<TypeRef> {
    let declared = demands.types.first().copied();
    if let Some(d) = declared {
        if demands.types.iter().any(|&t| pool.category(t) != pool.category(d)) {
            return None;
        }
    }
    let category = match declared {
        Some(d) => pool.category(d),
        None => observed_category(kind, seen)?,
    };
    if !seen.iter().all(|&t| compatible(t, category)) {
        return None;
    }
    let known = pool.known();
    let ty = match (declared, category) {
        (Some(d), _) => d,
        (None, TypeCategory::IntLike) => known.int,
        (None, TypeCategory::Float) => known.float,
        (None, TypeCategory::Long) => known.long,
        (None, TypeCategory::Double) => known.double,
        _ => return None,
    };
    (pool.category(ty).is_wide() == (kind == RegKind::Wide)).then_some(ty)
}

fn observed_category(kind: RegKind, seen: &[RegType]) -> Option<TypeCategory> {
    let mut category = None;
    for t in seen {
        let c = match t {
            RegType::Int => TypeCategory::IntLike,
            RegType::Float => TypeCategory::Float,
            RegType::Long => TypeCategory::Long,
            RegType::Double => TypeCategory::Double,
            RegType::Const | RegType::Zero | RegType::WideConst => continue,
            _ => return None,
        };
        match category {
            Some(prev) if prev != c => return None,
            _ => category = Some(c),
        }
    }
    Some(category.unwrap_or(if kind == RegKind::Wide {
        TypeCategory::Long
    } else {
        TypeCategory::IntLike
    }))
}

fn compatible(t: RegType, category: TypeCategory) -> bool {
    match category {
        TypeCategory::IntLike => matches!(t, RegType::Int | RegType::Const | RegType::Zero),
        TypeCategory::Float => matches!(t, RegType::Float | RegType::Const | RegType::Zero),
        TypeCategory::Long => matches!(t, RegType::Long | RegType::WideConst),
        TypeCategory::Double => matches!(t, RegType::Double | RegType::WideConst),
        _ => false,
    }
}

/// The declared type of the value the body leaves in `reg`, when its last writer
/// names one.
fn declared_result(fingerprint: &Fingerprint, reg: Reg, pool: &Pool) -> Option<TypeRef> {
    let known = pool.known();
    let (index, writer) = fingerprint
        .insns
        .iter()
        .enumerate()
        .rev()
        .find(|(_, i)| i.dest() == Some(reg))?;
    let op = writer.opcode();
    match op.family() {
        OpcodeFamily::MoveResult => {
            let producer = fingerprint.insns.get(index.checked_sub(1)?)?;
            match producer.opcode().family() {
                OpcodeFamily::Invoke => {
                    Some(pool.proto(pool.method(producer.method()?).proto).rtype)
                }
                OpcodeFamily::FilledNewArray => producer.type_ref(),
                _ => None,
            }
        }
        OpcodeFamily::StaticGet | OpcodeFamily::InstanceGet => Some(pool.field(writer.field()?).ty),
        OpcodeFamily::NewInstance | OpcodeFamily::NewArray | OpcodeFamily::CheckCast => {
            writer.type_ref()
        }
        OpcodeFamily::ArrayGet => match op {
            IrOpcode::AgetBoolean => Some(known.boolean),
            IrOpcode::AgetByte => Some(known.byte),
            IrOpcode::AgetChar => Some(known.char),
            IrOpcode::AgetShort => Some(known.short),
            _ => None,
        },
        _ => None,
    }
}

/// Chooses the return type of the helper for `fingerprint` with parameter types
/// `params`. `None` if the result cannot be typed, or if some call site in `observed`
/// held a more precise reference than the helper would return.
#[must_use]
pub fn result_type(
    fingerprint: &Fingerprint,
    params: &[TypeRef],
    observed: &[&Observed],
    pool: &Pool,
    types: &TypeSystem,
) -> Option<TypeRef> {
    let known = pool.known();
    let Some((reg, kind)) = fingerprint.result else {
        return Some(known.void);
    };
    let declared = declared_result(fingerprint, reg, pool);
    let mut code = helper_code(fingerprint, None, None);
    code.build_cfg(pool).ok()?;
    let cfg = code.cfg()?;
    let inferred = TypeInference::analyze(cfg, pool, Some(types), Some(params)).ok()?;
    let ret = cfg
        .instructions()
        .find(|(_, i)| i.opcode().is_return())
        .map(|(pos, _)| pos)?;
    let inferred = inferred.state_before(cfg, ret)?.get(reg);

    match kind {
        RegKind::Object => {
            let rtype = match inferred {
                RegType::Reference(Some(t)) => t,
                RegType::Reference(None) | RegType::Zero => {
                    declared.filter(|&t| pool.is_reference(t)).unwrap_or(known.object)
                }
                _ => return None,
            };
            let precise = observed.iter().all(|o| match o.result {
                Some(RegType::Reference(Some(held))) => types.is_subtype(rtype, held),
                _ => true,
            });
            precise.then_some(rtype)
        }
        RegKind::Narrow | RegKind::Wide => {
            if let Some(d) = declared.filter(|&t| !pool.is_reference(t)) {
                return Some(d);
            }
            match inferred {
                RegType::Int | RegType::Const | RegType::Zero if kind == RegKind::Narrow => {
                    Some(known.int)
                }
                RegType::Float if kind == RegKind::Narrow => Some(known.float),
                RegType::Long | RegType::WideConst if kind == RegKind::Wide => Some(known.long),
                RegType::Double if kind == RegKind::Wide => Some(known.double),
                _ => None,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{AccessFlags, DexClass, Scope};

    fn hierarchy() -> crate::Result<(Arc<Pool>, TypeSystem)> {
        let pool = Arc::new(Pool::new());
        let mut scope = Scope::new(Arc::clone(&pool));
        let store = scope.add_store("classes");
        let dex = scope.add_dex(store)?;
        let object = pool.known().object;
        let base = pool.intern_type("LBase;");
        scope.add_class(store, dex, DexClass::new(base, AccessFlags::PUBLIC, Some(object)))?;
        for name in ["LA;", "LB;"] {
            let ty = pool.intern_type(name);
            scope.add_class(store, dex, DexClass::new(ty, AccessFlags::PUBLIC, Some(base)))?;
        }
        let types = TypeSystem::new(&scope);
        Ok((pool, types))
    }

    fn observed(args: Vec<RegType>) -> Observed {
        Observed {
            args,
            result: None,
            positions: Vec::new(),
        }
    }

    fn calls_run(pool: &Pool, first: Option<IrInstruction>) -> Fingerprint {
        let base = pool.intern_type("LBase;");
        let run = pool.intern_method(base, "run", pool.intern_proto(pool.known().void, &[]));
        let mut insns: Vec<IrInstruction> = first.into_iter().collect();
        for _ in 0..3 {
            insns.push(IrInstruction::invoke(IrOpcode::InvokeVirtual, run, &[0]));
        }
        Fingerprint {
            insns,
            params: vec![(0, RegKind::Object)],
            result: None,
            registers: 1,
        }
    }

    #[test]
    fn reference_params_take_the_weakest_demand() -> crate::Result<()> {
        let (pool, types) = hierarchy()?;
        let a = pool.intern_type("LA;");
        let b = pool.intern_type("LB;");
        let base = pool.intern_type("LBase;");
        let fingerprint = calls_run(&pool, None);

        let first = observed(vec![RegType::Reference(Some(a))]);
        let second = observed(vec![RegType::Reference(Some(b))]);
        assert_eq!(
            param_types(&fingerprint, &[&first, &second], &pool, &types),
            Some(vec![base])
        );
        assert_eq!(
            param_types(&fingerprint, &[&first, &first], &pool, &types),
            Some(vec![base])
        );
        let unknown = observed(vec![RegType::Reference(None)]);
        assert_eq!(
            param_types(&fingerprint, &[&unknown, &first], &pool, &types),
            Some(vec![base])
        );
        let null = observed(vec![RegType::Zero]);
        assert_eq!(
            param_types(&fingerprint, &[&null, &null], &pool, &types),
            Some(vec![base])
        );
        let int = observed(vec![RegType::Int]);
        assert_eq!(param_types(&fingerprint, &[&first, &int], &pool, &types), None);
        Ok(())
    }

    #[test]
    fn casts_leave_the_parameter_untyped() -> crate::Result<()> {
        let (pool, types) = hierarchy()?;
        let a = pool.intern_type("LA;");
        let cast = IrInstruction::new(IrOpcode::CheckCast).with_srcs(&[0]).with_type(a);
        let fingerprint = calls_run(&pool, Some(cast));

        let unknown = observed(vec![RegType::Reference(None)]);
        let first = observed(vec![RegType::Reference(Some(a))]);
        assert_eq!(
            param_types(&fingerprint, &[&unknown, &first], &pool, &types),
            Some(vec![pool.known().object])
        );
        Ok(())
    }

    #[test]
    fn results_are_never_less_precise_than_the_callers() -> crate::Result<()> {
        let (pool, types) = hierarchy()?;
        let a = pool.intern_type("LA;");
        let base = pool.intern_type("LBase;");
        let holder = pool.intern_type("LHolder;");
        let field = pool.intern_field(holder, "current", base);
        let mut fingerprint = calls_run(&pool, None);
        fingerprint
            .insns
            .insert(0, IrInstruction::new(IrOpcode::SgetObject).with_dest(0).with_field(field));
        fingerprint.params.clear();
        fingerprint.result = Some((0, RegKind::Object));

        let with_result = |held: RegType| Observed {
            args: Vec::new(),
            result: Some(held),
            positions: Vec::new(),
        };
        let exact = with_result(RegType::Reference(Some(base)));
        let null = with_result(RegType::Zero);
        assert_eq!(
            result_type(&fingerprint, &[], &[&exact, &null], &pool, &types),
            Some(base)
        );
        let narrower = with_result(RegType::Reference(Some(a)));
        assert_eq!(
            result_type(&fingerprint, &[], &[&exact, &narrower], &pool, &types),
            None
        );
        Ok(())
    }

    #[test]
    fn primitive_params_follow_their_uses() -> crate::Result<()> {
        let (pool, types) = hierarchy()?;
        let known = pool.known();
        let fingerprint = Fingerprint {
            insns: vec![
                IrInstruction::binop_lit(IrOpcode::AddIntLit, 1, 0, 1),
                IrInstruction::binop_lit(IrOpcode::MulIntLit, 1, 1, 3),
                IrInstruction::binop_lit(IrOpcode::AddIntLit, 1, 1, 5),
            ],
            params: vec![(0, RegKind::Narrow)],
            result: Some((1, RegKind::Narrow)),
            registers: 2,
        };
        let constant = observed(vec![RegType::Const]);
        let int = observed(vec![RegType::Int]);
        let params = param_types(&fingerprint, &[&constant, &int], &pool, &types);
        assert_eq!(params, Some(vec![known.int]));
        assert_eq!(
            result_type(&fingerprint, &[known.int], &[&constant, &int], &pool, &types),
            Some(known.int)
        );
        let float = observed(vec![RegType::Float]);
        assert_eq!(param_types(&fingerprint, &[&int, &float], &pool, &types), None);
        Ok(())
    }
}
