//! CFG integration tests: linear/CFG round trips, structural edits, malformed bodies
//! and the dataflow analyses over a built graph.

use rustc_hash::FxHashMap;

use dexopt::{
    analysis::{Liveness, ReachingDefinitions, RegType, TypeInference},
    cfg::{ControlFlowGraph, EdgeKind, InsnPos},
    ir::{
        builder::CodeBuilder,
        entry::{CatchId, MethodItemEntry},
        instruction::IrInstruction,
        opcode::{IrOpcode, RegKind},
        IrCode, Pool, TypeRef,
    },
    Error, Result,
};

/// What an instruction means in a linear body: its opcode, its line and, for
/// instructions that may throw, the handler types covering it.
type Observed = (IrOpcode, Option<u32>, Vec<Option<TypeRef>>);

fn observe(entries: &[MethodItemEntry]) -> Vec<Observed> {
    let mut chains: FxHashMap<CatchId, Vec<(u32, Option<TypeRef>)>> = FxHashMap::default();
    for entry in entries {
        if let MethodItemEntry::Catch(c) = entry {
            chains.entry(c.id).or_default().push((c.index, c.catch_type));
        }
    }
    for chain in chains.values_mut() {
        chain.sort_by_key(|(index, _)| *index);
    }

    let mut out = Vec::new();
    let mut line = None;
    let mut open = None;
    for entry in entries {
        match entry {
            MethodItemEntry::Position(pos) => line = Some(pos.line),
            MethodItemEntry::TryStart(id) => open = Some(*id),
            MethodItemEntry::TryEnd(_) => open = None,
            MethodItemEntry::Insn(insn) => {
                let covered = match open {
                    Some(id) if insn.may_throw() => chains
                        .get(&id)
                        .map(|c| c.iter().map(|(_, ty)| *ty).collect())
                        .unwrap_or_default(),
                    _ => Vec::new(),
                };
                out.push((insn.opcode(), line, covered));
            }
            _ => {}
        }
    }
    out
}

/// `static int work(int)`: a guarded call, a sign test, a switch and a handler.
fn guarded_switch(pool: &Pool) -> (IrCode, TypeRef) {
    let owner = pool.intern_type("Lcom/app/Work;");
    let int = pool.known().int;
    let compute = pool.intern_method(owner, "compute", pool.intern_proto(int, &[int]));
    let runtime = pool.intern_type("Ljava/lang/RuntimeException;");
    let file = Some(pool.intern_string("Work.java"));

    let mut b = CodeBuilder::new(3);
    let (negative, one, two) = (b.new_label(), b.new_label(), b.new_label());
    let chain = b.new_catch();
    let code = b
        .line(None, file, 10)
        .load_param(RegKind::Narrow, 2)
        .try_start(chain)
        .invoke(IrOpcode::InvokeStatic, compute, &[2])
        .move_result(RegKind::Narrow, 0)
        .try_end(chain)
        .line(None, file, 11)
        .if_(IrOpcode::IfLtz, &[0], negative)
        .switch(0, &[(1, one), (2, two)])
        .ret(RegKind::Narrow, 0)
        .target(one)
        .line(None, file, 12)
        .insn(
            IrInstruction::new(IrOpcode::AddIntLit)
                .with_dest(0)
                .with_srcs(&[0])
                .with_literal(1),
        )
        .ret(RegKind::Narrow, 0)
        .target(two)
        .insn(IrInstruction::const_(0, 7))
        .ret(RegKind::Narrow, 0)
        .target(negative)
        .line(None, file, 13)
        .insn(IrInstruction::const_(0, -1))
        .ret(RegKind::Narrow, 0)
        .catch(chain, Some(runtime), 0)
        .line(None, file, 14)
        .insn(IrInstruction::const_(0, 0))
        .ret(RegKind::Narrow, 0)
        .build();
    (code, runtime)
}

fn find(cfg: &ControlFlowGraph, opcode: IrOpcode) -> InsnPos {
    cfg.instructions()
        .find(|(_, insn)| insn.opcode() == opcode)
        .map(|(pos, _)| pos)
        .expect("instruction present")
}

#[test]
fn test_round_trip_keeps_order_lines_and_coverage() -> Result<()> {
    let pool = Pool::new();
    let (mut code, runtime) = guarded_switch(&pool);
    let before = observe(code.entries());

    code.build_cfg(&pool)?;
    code.cfg().expect("built").verify()?;
    code.clear_cfg()?;
    let after = observe(code.entries());

    assert_eq!(before, after);
    let invoke = after
        .iter()
        .find(|(op, _, _)| *op == IrOpcode::InvokeStatic)
        .expect("invoke survives");
    assert_eq!(invoke.1, Some(10));
    assert_eq!(invoke.2, vec![Some(runtime)]);
    assert!(
        after.iter().all(|(op, _, _)| *op != IrOpcode::Goto),
        "id order falls through everywhere"
    );
    Ok(())
}

#[test]
fn test_round_trip_is_stable() -> Result<()> {
    let pool = Pool::new();
    let (mut code, _) = guarded_switch(&pool);
    let original = observe(code.entries());
    // The first layout may move try boundaries; after that the shape is settled.
    code.build_cfg(&pool)?;
    code.clear_cfg()?;
    let first = code.entries().to_vec();
    code.build_cfg(&pool)?;
    let blocks = code.cfg().expect("rebuilt").num_blocks();
    code.clear_cfg()?;

    code.build_cfg(&pool)?;
    assert_eq!(code.cfg().expect("rebuilt").num_blocks(), blocks);
    code.clear_cfg()?;
    assert_eq!(observe(&first), original);
    assert_eq!(observe(code.entries()), original);
    Ok(())
}

#[test]
fn test_branch_and_switch_edges() -> Result<()> {
    let pool = Pool::new();
    let (mut code, runtime) = guarded_switch(&pool);
    code.build_cfg(&pool)?;
    let cfg = code.cfg().expect("built");

    let switch = find(cfg, IrOpcode::Switch);
    let mut kinds: Vec<EdgeKind> = cfg.succs(switch.block).map(|(_, e)| e.kind()).collect();
    kinds.sort_by_key(|k| format!("{k:?}"));
    assert_eq!(
        kinds,
        vec![
            EdgeKind::Branch(Some(1)),
            EdgeKind::Branch(Some(2)),
            EdgeKind::Goto
        ]
    );

    let test = find(cfg, IrOpcode::IfLtz);
    assert_eq!(cfg.branch_succs(test.block).len(), 1);
    assert!(cfg.goto_target(test.block).is_some());

    let invoke = find(cfg, IrOpcode::InvokeStatic);
    let handlers = cfg.catch_signature(invoke.block);
    assert_eq!(handlers.len(), 1);
    assert_eq!(handlers[0].0, Some(runtime));
    assert!(cfg.is_handler(handlers[0].1));
    Ok(())
}

#[test]
fn test_split_then_merge_restores_the_body() -> Result<()> {
    let pool = Pool::new();
    let mut code = CodeBuilder::new(2)
        .insn(IrInstruction::const_(0, 1))
        .insn(IrInstruction::const_(1, 2))
        .insn(
            IrInstruction::new(IrOpcode::AddInt)
                .with_dest(0)
                .with_srcs(&[0, 1]),
        )
        .ret(RegKind::Narrow, 0)
        .build();
    let before = observe(code.entries());
    code.build_cfg(&pool)?;
    let cfg = code.cfg_mut().expect("built");
    assert_eq!(cfg.num_blocks(), 1);

    let first = find(cfg, IrOpcode::Const);
    let tail = cfg.split_block(first)?;
    cfg.verify()?;
    assert_eq!(cfg.num_blocks(), 2);
    assert_eq!(cfg.goto_target(first.block), Some(tail));
    assert_eq!(cfg.block(tail).map(|b| b.insn_count()), Some(3));

    cfg.merge_blocks(first.block, tail)?;
    cfg.verify()?;
    assert_eq!(cfg.num_blocks(), 1);
    code.clear_cfg()?;
    assert_eq!(observe(code.entries()), before);
    Ok(())
}

#[test]
fn test_illegal_edits_are_rejected() -> Result<()> {
    let pool = Pool::new();
    let (mut code, _) = guarded_switch(&pool);
    code.build_cfg(&pool)?;
    let cfg = code.cfg_mut().expect("built");

    let switch = find(cfg, IrOpcode::Switch);
    assert!(matches!(cfg.split_block(switch), Err(Error::InvalidEdit { .. })));
    let entry = cfg.entry();
    let other = find(cfg, IrOpcode::AddIntLit).block;
    assert!(matches!(cfg.merge_blocks(other, entry), Err(Error::InvalidEdit { .. })));
    cfg.verify()?;
    Ok(())
}

#[test]
fn test_unreachable_code_is_dropped() -> Result<()> {
    let pool = Pool::new();
    let mut code = CodeBuilder::new(1)
        .ret_void()
        .insn(IrInstruction::const_(0, 3))
        .ret_void()
        .build();
    code.build_cfg(&pool)?;
    assert_eq!(code.count_insns(), 1);
    code.clear_cfg()?;
    assert_eq!(code.entries().len(), 1);
    Ok(())
}

#[test]
fn test_malformed_bodies_stay_linear() {
    let pool = Pool::new();

    let mut falls_off = CodeBuilder::new(1).insn(IrInstruction::const_(0, 1)).build();
    let entries = falls_off.entries().to_vec();
    assert!(matches!(
        falls_off.build_cfg(&pool),
        Err(Error::MalformedBody { .. })
    ));
    assert!(!falls_off.editable_cfg_built());
    assert_eq!(falls_off.entries(), entries.as_slice());

    let mut b = CodeBuilder::new(1);
    let nowhere = b.new_label();
    let mut dangling = b.goto(nowhere).build();
    assert!(matches!(
        dangling.build_cfg(&pool),
        Err(Error::MalformedBody { .. })
    ));

    let mut b = CodeBuilder::new(1);
    let chain = b.new_catch();
    let mut unclosed = b.try_start(chain).ret_void().catch(chain, None, 0).ret_void().build();
    assert!(matches!(
        unclosed.build_cfg(&pool),
        Err(Error::MalformedBody { .. })
    ));
}

#[test]
fn test_dataflow_over_a_built_body() -> Result<()> {
    let pool = Pool::new();
    let (mut code, _) = guarded_switch(&pool);
    code.build_cfg(&pool)?;
    let cfg = code.cfg().expect("built");

    let live = Liveness::analyze(cfg, &pool);
    let test = find(cfg, IrOpcode::IfLtz);
    let live_in = live.live_in(test.block).expect("solved");
    assert!(live_in.contains(0));
    assert!(!live_in.contains(2), "the argument is dead after the call");
    let invoke = find(cfg, IrOpcode::InvokeStatic);
    assert!(live.live_in(invoke.block).expect("solved").contains(2));

    let reaching = ReachingDefinitions::analyze(cfg);
    let switch = find(cfg, IrOpcode::Switch);
    let result = find(cfg, IrOpcode::MoveResult);
    assert_eq!(reaching.defs_reaching(cfg, switch, 0), vec![result]);
    let add = find(cfg, IrOpcode::AddIntLit);
    let ret = cfg.last_insn_pos(add.block).expect("block returns");
    assert_eq!(reaching.defs_reaching(cfg, ret, 0), vec![add]);

    let int = pool.known().int;
    let types = TypeInference::analyze(cfg, &pool, None, Some([int].as_slice()))?;
    let at_switch = types.state_before(cfg, switch).expect("reachable");
    assert_eq!(at_switch.get(0), RegType::Int);
    assert_eq!(at_switch.get(2), RegType::Int);
    let after_add = types.state_after(cfg, add).expect("reachable");
    assert_eq!(after_add.get(0), RegType::Int);

    assert!(TypeInference::analyze(cfg, &pool, None, Some(&[][..])).is_err());
    Ok(())
}
