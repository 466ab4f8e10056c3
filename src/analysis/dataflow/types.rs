//! Register type inference.
//!
//! A forward analysis assigning every register slot a [`RegType`] at each program
//! point. The lattice distinguishes constants from computed values so that a `0`
//! stays usable as both a null reference and a number until a use decides:
//!
//! ```text
//!                      Top (conflict)
//!        /         |          |           \
//!    Scalar   WideScalar   WideHigh   Reference(_)
//!    /    \     /    \                    |
//!  Int  Float Long  Double                |
//!    \   /      \   /                     |
//!    Const    WideConst                   |
//!       \                                /
//!        +------------- Zero -----------+
//!                        |
//!                 Bottom (no value)
//! ```
//!
//! Two references merge to their most specific common supertype when a
//! [`TypeSystem`] is available, and to an unknown reference otherwise.

use rustc_hash::FxHashMap;

use crate::{
    analysis::dataflow::{
        framework::{AnalysisResults, DataFlowAnalysis, Direction},
        lattice::MeetSemiLattice,
        solver::DataFlowSolver,
    },
    cfg::{Block, BlockId, ControlFlowGraph, Edge, EdgeKind, InsnPos},
    ir::{
        hierarchy::TypeSystem,
        instruction::{IrInstruction, Reg},
        opcode::{IrOpcode, OpcodeFamily, RegKind},
        types::TypeCategory,
        Pool, TypeRef,
    },
    Result,
};

/// The abstract type of one register slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RegType {
    /// Not yet written on any path.
    Bottom,
    /// The constant `0` (also `null`).
    Zero,
    /// A non-zero 32-bit constant of unknown interpretation.
    Const,
    /// An `int`, `boolean`, `byte`, `char` or `short`.
    Int,
    /// A `float`.
    Float,
    /// A 32-bit value that is `int` on some paths and `float` on others.
    Scalar,
    /// Low half of a `long`.
    Long,
    /// Low half of a `double`.
    Double,
    /// Low half of a 64-bit constant.
    WideConst,
    /// Low half of a 64-bit value of unknown interpretation.
    WideScalar,
    /// High half of any 64-bit value.
    WideHigh,
    /// A reference of the given type, or of unknown type.
    Reference(Option<TypeRef>),
    /// Conflicting values.
    Top,
}

impl RegType {
    /// `true` for the low half of a register pair.
    #[must_use]
    pub fn is_wide(self) -> bool {
        matches!(
            self,
            RegType::Long | RegType::Double | RegType::WideConst | RegType::WideScalar
        )
    }

    /// `true` if the value may be used as a reference.
    #[must_use]
    pub fn is_reference(self) -> bool {
        matches!(self, RegType::Zero | RegType::Reference(_))
    }

    /// The register kind a value of this type is moved with, if determined.
    #[must_use]
    pub fn reg_kind(self) -> Option<RegKind> {
        match self {
            RegType::Reference(_) => Some(RegKind::Object),
            RegType::Const | RegType::Int | RegType::Float | RegType::Scalar => {
                Some(RegKind::Narrow)
            }
            t if t.is_wide() => Some(RegKind::Wide),
            _ => None,
        }
    }

    /// The type of a value declared as `ty`.
    #[must_use]
    pub fn of(pool: &Pool, ty: TypeRef) -> RegType {
        match pool.category(ty) {
            TypeCategory::IntLike => RegType::Int,
            TypeCategory::Float => RegType::Float,
            TypeCategory::Long => RegType::Long,
            TypeCategory::Double => RegType::Double,
            TypeCategory::Reference => RegType::Reference(Some(ty)),
            TypeCategory::Void | TypeCategory::Invalid => RegType::Bottom,
        }
    }

    /// Merges two values flowing into the same point. `refs` merges two distinct known
    /// reference types, `None` meaning unknown.
    #[must_use]
    pub fn merge<F>(self, other: RegType, refs: &F) -> RegType
    where
        F: Fn(TypeRef, TypeRef) -> Option<TypeRef>,
    {
        use RegType::{
            Bottom, Const, Double, Float, Int, Long, Reference, Scalar, Top, WideConst,
            WideScalar, Zero,
        };
        if self == other {
            return self;
        }
        match (self, other) {
            (Bottom, x) | (x, Bottom) => x,
            (Zero, x @ (Const | Int | Float | Scalar | Reference(_)))
            | (x @ (Const | Int | Float | Scalar | Reference(_)), Zero) => x,
            (Const, x @ (Int | Float | Scalar)) | (x @ (Int | Float | Scalar), Const) => x,
            (Int | Float | Scalar, Int | Float | Scalar) => Scalar,
            (WideConst, x @ (Long | Double | WideScalar))
            | (x @ (Long | Double | WideScalar), WideConst) => x,
            (Long | Double | WideScalar, Long | Double | WideScalar) => WideScalar,
            (Reference(Some(a)), Reference(Some(b))) => Reference(refs(a, b)),
            (Reference(_), Reference(_)) => Reference(None),
            _ => Top,
        }
    }
}

/// Register types at one program point, plus the pending invoke result.
#[derive(Debug, Clone, PartialEq)]
pub struct TypeEnv {
    regs: Vec<RegType>,
    result: RegType,
}

impl TypeEnv {
    /// All registers unwritten.
    #[must_use]
    pub fn new(registers: usize) -> Self {
        Self {
            regs: vec![RegType::Bottom; registers],
            result: RegType::Bottom,
        }
    }

    /// The type of `reg`; [`RegType::Top`] beyond the register file.
    #[must_use]
    pub fn get(&self, reg: Reg) -> RegType {
        self.regs.get(reg as usize).copied().unwrap_or(RegType::Top)
    }

    /// The type a following `move-result*` would read.
    #[must_use]
    pub fn result(&self) -> RegType {
        self.result
    }

    /// Number of register slots.
    #[must_use]
    pub fn len(&self) -> usize {
        self.regs.len()
    }

    /// `true` for an empty register file.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.regs.is_empty()
    }

    /// Writing slot `r` breaks any pair it was part of.
    fn clobber(&mut self, r: usize) {
        match self.regs[r] {
            t if t.is_wide() => {
                if let Some(high) = self.regs.get_mut(r + 1) {
                    *high = RegType::Top;
                }
            }
            RegType::WideHigh if r > 0 => self.regs[r - 1] = RegType::Top,
            _ => {}
        }
    }

    fn set(&mut self, reg: Reg, ty: RegType) {
        let r = reg as usize;
        if r >= self.regs.len() {
            return;
        }
        self.clobber(r);
        if ty.is_wide() && r + 1 < self.regs.len() {
            self.clobber(r + 1);
            self.regs[r + 1] = RegType::WideHigh;
        }
        self.regs[r] = ty;
    }

    fn merge<F>(&self, other: &Self, refs: &F) -> Self
    where
        F: Fn(TypeRef, TypeRef) -> Option<TypeRef>,
    {
        Self {
            regs: self
                .regs
                .iter()
                .zip(&other.regs)
                .map(|(a, b)| a.merge(*b, refs))
                .collect(),
            result: self.result.merge(other.result, refs),
        }
    }
}

/// Solver state: the environment after a block and the one before its last
/// instruction, which handlers see.
#[derive(Debug, Clone, PartialEq)]
pub struct TypeState {
    after: TypeEnv,
    before_last: TypeEnv,
}

fn distinct_unknown(_: TypeRef, _: TypeRef) -> Option<TypeRef> {
    None
}

impl MeetSemiLattice for TypeState {
    fn meet(&self, other: &Self) -> Self {
        Self {
            after: self.after.merge(&other.after, &distinct_unknown),
            before_last: self.before_last.merge(&other.before_last, &distinct_unknown),
        }
    }

    fn is_bottom(&self) -> bool {
        self.after.regs.iter().all(|t| *t == RegType::Top)
    }
}

/// Type inference over a CFG.
pub struct TypeInference<'a> {
    pool: &'a Pool,
    types: Option<&'a TypeSystem>,
    registers: usize,
    params: FxHashMap<InsnPos, RegType>,
}

impl<'a> TypeInference<'a> {
    /// Prepares the analysis. `params` are the incoming argument types in `load-param`
    /// order (receiver first for instance methods); without them parameters get the
    /// least specific type of their register kind.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::MalformedBody`] if the number of `load-param*`
    /// instructions does not match `params`.
    pub fn new(
        cfg: &ControlFlowGraph,
        pool: &'a Pool,
        types: Option<&'a TypeSystem>,
        params: Option<&[TypeRef]>,
    ) -> Result<Self> {
        let loads: Vec<(InsnPos, &IrInstruction)> = cfg
            .instructions()
            .filter(|(_, i)| i.opcode().is_load_param())
            .collect();
        let mut map = FxHashMap::default();
        match params {
            Some(params) => {
                if params.len() != loads.len() {
                    return Err(malformed_body!(
                        "{} load-param instructions for {} parameters",
                        loads.len(),
                        params.len()
                    ));
                }
                for ((pos, _), ty) in loads.iter().zip(params) {
                    map.insert(*pos, RegType::of(pool, *ty));
                }
            }
            None => {
                for (pos, insn) in &loads {
                    map.insert(*pos, least_specific(insn.opcode().dest_kind()));
                }
            }
        }
        Ok(Self {
            pool,
            types,
            registers: cfg.registers_size() as usize,
            params: map,
        })
    }

    /// Runs the analysis.
    ///
    /// # Errors
    ///
    /// See [`TypeInference::new`].
    pub fn analyze(
        cfg: &ControlFlowGraph,
        pool: &'a Pool,
        types: Option<&'a TypeSystem>,
        params: Option<&[TypeRef]>,
    ) -> Result<InferredTypes<'a>> {
        let analysis = TypeInference::new(cfg, pool, types, params)?;
        let (results, analysis) = DataFlowSolver::new(analysis).solve_with_analysis(cfg);
        Ok(InferredTypes { analysis, results })
    }

    fn merge_refs(&self, a: TypeRef, b: TypeRef) -> Option<TypeRef> {
        self.types.map(|ts| ts.common_supertype(a, b))
    }

    /// The exception type a `move-exception` in `block` receives.
    fn caught_type(&self, cfg: &ControlFlowGraph, block: BlockId) -> RegType {
        let throwable = self.pool.known().throwable;
        let mut caught: Option<TypeRef> = None;
        for (_, edge) in cfg.preds(block) {
            if let EdgeKind::Throw { catch_type, .. } = edge.kind() {
                let t = catch_type.unwrap_or(throwable);
                caught = Some(match caught {
                    None => t,
                    Some(c) if c == t => c,
                    Some(c) => self.merge_refs(c, t).unwrap_or(throwable),
                });
            }
        }
        RegType::Reference(Some(caught.unwrap_or(throwable)))
    }

    /// Applies `insn` at `pos` to `env`.
    #[allow(clippy::too_many_lines)]
    fn step(&self, cfg: &ControlFlowGraph, pos: InsnPos, insn: &IrInstruction, env: &mut TypeEnv) {
        let op = insn.opcode();
        let known = self.pool.known();
        let dest = insn.dest();
        let produced = match op.family() {
            OpcodeFamily::Const => Some(match (op, insn.literal()) {
                (IrOpcode::ConstWide, _) => RegType::WideConst,
                (_, Some(0)) => RegType::Zero,
                _ => RegType::Const,
            }),
            OpcodeFamily::ConstRef => Some(RegType::Reference(Some(match op {
                IrOpcode::ConstString => known.string,
                IrOpcode::ConstClass => known.class,
                IrOpcode::ConstMethodHandle => known.method_handle,
                _ => known.method_type,
            }))),
            OpcodeFamily::Move => Some(insn.src(0).map_or(RegType::Top, |r| env.get(r))),
            OpcodeFamily::MoveResult => {
                let t = env.result;
                env.result = RegType::Bottom;
                Some(match (op, t) {
                    (IrOpcode::MoveResultObject, t) if t.is_reference() => t,
                    (IrOpcode::MoveResultObject, _) => RegType::Reference(None),
                    (IrOpcode::MoveResultWide, t) if t.is_wide() => t,
                    (IrOpcode::MoveResultWide, _) => RegType::WideScalar,
                    (_, RegType::Bottom) => RegType::Scalar,
                    (_, t) => t,
                })
            }
            OpcodeFamily::MoveException => Some(self.caught_type(cfg, pos.block)),
            OpcodeFamily::CheckCast => {
                if let (Some(r), Some(t)) = (insn.src(0), insn.type_ref()) {
                    env.set(r, RegType::Reference(Some(t)));
                }
                None
            }
            OpcodeFamily::InstanceOf | OpcodeFamily::ArrayLength | OpcodeFamily::Compare => {
                Some(RegType::Int)
            }
            OpcodeFamily::NewInstance | OpcodeFamily::NewArray => {
                Some(RegType::Reference(insn.type_ref()))
            }
            OpcodeFamily::FilledNewArray => {
                env.result = RegType::Reference(insn.type_ref());
                None
            }
            OpcodeFamily::Invoke => {
                env.result = insn
                    .method()
                    .map_or(RegType::Top, |m| {
                        RegType::of(self.pool, self.pool.proto(self.pool.method(m).proto).rtype)
                    });
                None
            }
            OpcodeFamily::ArrayGet => {
                let array = insn.src(0).map_or(RegType::Top, |r| env.get(r));
                let component = match array {
                    RegType::Reference(Some(arr)) => self.pool.array_component(arr),
                    _ => None,
                };
                Some(match op {
                    IrOpcode::AgetObject => {
                        RegType::Reference(component.filter(|c| self.pool.is_reference(*c)))
                    }
                    IrOpcode::AgetWide => match component.map(|c| RegType::of(self.pool, c)) {
                        Some(t @ (RegType::Long | RegType::Double)) => t,
                        _ => RegType::WideScalar,
                    },
                    IrOpcode::Aget => match component.map(|c| RegType::of(self.pool, c)) {
                        Some(t @ (RegType::Int | RegType::Float)) => t,
                        _ => RegType::Scalar,
                    },
                    _ => RegType::Int,
                })
            }
            OpcodeFamily::InstanceGet | OpcodeFamily::StaticGet => insn
                .field()
                .map(|f| RegType::of(self.pool, self.pool.field(f).ty)),
            OpcodeFamily::Unary | OpcodeFamily::Binary | OpcodeFamily::BinaryLit => {
                Some(arithmetic_result(op))
            }
            OpcodeFamily::LoadParam => Some(
                self.params
                    .get(&pos)
                    .copied()
                    .unwrap_or_else(|| least_specific(op.dest_kind())),
            ),
            _ => None,
        };
        if let (Some(d), Some(t)) = (dest, produced) {
            env.set(d, t);
        } else if let (Some(d), None) = (dest, produced) {
            env.set(d, least_specific(op.dest_kind()));
        }
    }

    fn replay(
        &self,
        cfg: &ControlFlowGraph,
        id: BlockId,
        block: &Block,
        input: &TypeEnv,
        stop: Option<usize>,
    ) -> TypeState {
        let mut env = input.clone();
        let mut before_last = TypeEnv::new(self.registers);
        let last = block.last_insn_index();
        for (index, insn) in block.indexed_insns() {
            if stop.is_some_and(|s| index >= s) {
                break;
            }
            if Some(index) == last {
                before_last = env.clone();
            }
            self.step(cfg, InsnPos::new(id, index), insn, &mut env);
        }
        TypeState {
            after: env,
            before_last,
        }
    }
}

/// The result type of an arithmetic or conversion opcode.
#[allow(clippy::enum_glob_use)]
fn arithmetic_result(op: IrOpcode) -> RegType {
    use IrOpcode::*;
    match op {
        NegFloat | IntToFloat | LongToFloat | DoubleToFloat | AddFloat | SubFloat | MulFloat
        | DivFloat | RemFloat => RegType::Float,
        NegDouble | IntToDouble | LongToDouble | FloatToDouble | AddDouble | SubDouble
        | MulDouble | DivDouble | RemDouble => RegType::Double,
        _ if op.dest_is_wide() => RegType::Long,
        _ => RegType::Int,
    }
}

fn least_specific(kind: Option<RegKind>) -> RegType {
    match kind {
        Some(RegKind::Narrow) => RegType::Scalar,
        Some(RegKind::Wide) => RegType::WideScalar,
        Some(RegKind::Object) => RegType::Reference(None),
        None => RegType::Top,
    }
}

impl DataFlowAnalysis for TypeInference<'_> {
    type Lattice = TypeState;
    const DIRECTION: Direction = Direction::Forward;

    fn boundary(&self, _cfg: &ControlFlowGraph) -> Self::Lattice {
        TypeState {
            after: TypeEnv::new(self.registers),
            before_last: TypeEnv::new(self.registers),
        }
    }

    fn initial(&self, cfg: &ControlFlowGraph) -> Self::Lattice {
        self.boundary(cfg)
    }

    fn transfer(
        &self,
        block_id: BlockId,
        block: &Block,
        input: &Self::Lattice,
        cfg: &ControlFlowGraph,
    ) -> Self::Lattice {
        self.replay(cfg, block_id, block, &input.after, None)
    }

    fn merge(&self, a: &Self::Lattice, b: &Self::Lattice) -> Self::Lattice {
        let refs = |x: TypeRef, y: TypeRef| self.merge_refs(x, y);
        TypeState {
            after: a.after.merge(&b.after, &refs),
            before_last: a.before_last.merge(&b.before_last, &refs),
        }
    }

    fn edge_state(&self, edge: &Edge, state: &Self::Lattice) -> Self::Lattice {
        if edge.kind().is_throw() {
            TypeState {
                after: state.before_last.clone(),
                before_last: TypeEnv::new(self.registers),
            }
        } else {
            state.clone()
        }
    }
}

/// Solved register types of one CFG.
pub struct InferredTypes<'a> {
    analysis: TypeInference<'a>,
    results: AnalysisResults<TypeState>,
}

impl InferredTypes<'_> {
    /// Register types on entry to `block`.
    #[must_use]
    pub fn state_at(&self, block: BlockId) -> Option<&TypeEnv> {
        self.results.in_state(block).map(|s| &s.after)
    }

    /// Register types on exit from `block` along its normal successors.
    #[must_use]
    pub fn state_at_exit(&self, block: BlockId) -> Option<&TypeEnv> {
        self.results.out_state(block).map(|s| &s.after)
    }

    /// Register types just before the instruction at `pos`.
    #[must_use]
    pub fn state_before(&self, cfg: &ControlFlowGraph, pos: InsnPos) -> Option<TypeEnv> {
        let block = cfg.block(pos.block)?;
        let input = self.results.in_state(pos.block)?;
        Some(
            self.analysis
                .replay(cfg, pos.block, block, &input.after, Some(pos.index))
                .after,
        )
    }

    /// Register types just after the instruction at `pos` on its normal path.
    #[must_use]
    pub fn state_after(&self, cfg: &ControlFlowGraph, pos: InsnPos) -> Option<TypeEnv> {
        let block = cfg.block(pos.block)?;
        let input = self.results.in_state(pos.block)?;
        Some(
            self.analysis
                .replay(cfg, pos.block, block, &input.after, Some(pos.index + 1))
                .after,
        )
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::{
        cfg::EdgeKind,
        ir::{
            class::{AccessFlags, DexClass},
            scope::Scope,
        },
    };

    #[test]
    fn lattice_merges() {
        let none = |_: TypeRef, _: TypeRef| None;
        assert_eq!(RegType::Zero.merge(RegType::Const, &none), RegType::Const);
        assert_eq!(RegType::Int.merge(RegType::Float, &none), RegType::Scalar);
        assert_eq!(RegType::Long.merge(RegType::WideConst, &none), RegType::Long);
        assert_eq!(RegType::Int.merge(RegType::Long, &none), RegType::Top);
        assert_eq!(RegType::Bottom.merge(RegType::WideHigh, &none), RegType::WideHigh);
        assert_eq!(
            RegType::Zero.merge(RegType::Reference(None), &none),
            RegType::Reference(None)
        );
    }

    #[test]
    fn references_merge_to_common_supertype() {
        let pool = Arc::new(Pool::new());
        let mut scope = Scope::new(Arc::clone(&pool));
        let store = scope.add_store("classes");
        let dex = scope.add_dex(store).unwrap();
        let base = pool.intern_type("LBase;");
        let a = pool.intern_type("LA;");
        let b = pool.intern_type("LB;");
        for (ty, sup) in [(base, pool.known().object), (a, base), (b, base)] {
            scope
                .add_class(store, dex, DexClass::new(ty, AccessFlags::PUBLIC, Some(sup)))
                .unwrap();
        }
        let ts = TypeSystem::new(&scope);

        let mut cfg = ControlFlowGraph::new(2);
        let entry = cfg.entry();
        let left = cfg.create_block();
        let right = cfg.create_block();
        let join = cfg.create_block();
        cfg.append_insns(
            entry,
            vec![
                IrInstruction::new(IrOpcode::LoadParam).with_dest(1),
                IrInstruction::if_testz(IrOpcode::IfEqz, 1),
            ],
        )
        .unwrap();
        cfg.append_insns(
            left,
            vec![IrInstruction::new(IrOpcode::NewInstance).with_dest(0).with_type(a)],
        )
        .unwrap();
        cfg.append_insns(
            right,
            vec![IrInstruction::new(IrOpcode::NewInstance).with_dest(0).with_type(b)],
        )
        .unwrap();
        cfg.append_insns(
            join,
            vec![IrInstruction::new(IrOpcode::ReturnObject).with_srcs(&[0])],
        )
        .unwrap();
        cfg.add_edge(entry, left, EdgeKind::Goto).unwrap();
        cfg.add_edge(entry, right, EdgeKind::Branch(None)).unwrap();
        cfg.add_edge(left, join, EdgeKind::Goto).unwrap();
        cfg.add_edge(right, join, EdgeKind::Goto).unwrap();

        let inferred =
            TypeInference::analyze(&cfg, &pool, Some(&ts), Some(&[pool.known().int])).unwrap();
        let at_join = inferred.state_at(join).unwrap();
        assert_eq!(at_join.get(0), RegType::Reference(Some(base)));
        assert_eq!(at_join.get(1), RegType::Int);

        let untyped = TypeInference::analyze(&cfg, &pool, None, None).unwrap();
        assert_eq!(untyped.state_at(join).unwrap().get(0), RegType::Reference(None));
        assert_eq!(untyped.state_at(join).unwrap().get(1), RegType::Scalar);

        assert!(TypeInference::analyze(&cfg, &pool, None, Some(&[])).is_err());
    }

    #[test]
    fn wide_writes_split_pairs() {
        let pool = Pool::new();
        let mut cfg = ControlFlowGraph::new(3);
        let entry = cfg.entry();
        cfg.append_insns(
            entry,
            vec![
                IrInstruction::const_wide(0, 1),
                IrInstruction::const_(1, 3),
                IrInstruction::new(IrOpcode::ReturnVoid),
            ],
        )
        .unwrap();
        let inferred = TypeInference::analyze(&cfg, &pool, None, None).unwrap();
        let mid = inferred
            .state_before(&cfg, InsnPos::new(entry, 1))
            .unwrap();
        assert_eq!(mid.get(0), RegType::WideConst);
        assert_eq!(mid.get(1), RegType::WideHigh);
        let end = inferred
            .state_before(&cfg, InsnPos::new(entry, 2))
            .unwrap();
        assert_eq!(end.get(0), RegType::Top);
        assert_eq!(end.get(1), RegType::Const);
    }
}
