//! Sparse-switch reduction integration tests.
//!
//! Every test builds a method whose switch cases each return a distinct marker,
//! reduces it, and then checks both the shape of the result and, by evaluating the
//! CFG on a range of selector values, that every value still reaches the same case.

use std::collections::HashMap;

use dexopt::{
    cfg::{BlockId, ControlFlowGraph, EdgeKind},
    ir::{
        builder::CodeBuilder,
        instruction::{IrInstruction, Reg},
        opcode::{IrOpcode, RegKind},
        IrCode, Pool,
    },
    opt::switches::{ReduceSparseSwitchesOptions, ReductionStats, SwitchReducer},
    Result,
};

/// Marker returned when the default is taken.
const DEFAULT: i64 = -1;

/// A method `int m(int r0)` switching on `r0`.
///
/// Case `i` returns `i` unless its key is listed in `to_default`, in which case it
/// branches to the default block.
fn switch_method(keys: &[i32], to_default: &[i32]) -> IrCode {
    let mut b = CodeBuilder::new(2);
    let default = b.new_label();
    let labels: Vec<_> = keys.iter().map(|_| b.new_label()).collect();
    let cases: Vec<(i32, _)> = keys
        .iter()
        .zip(&labels)
        .map(|(&k, &l)| if to_default.contains(&k) { (k, default) } else { (k, l) })
        .collect();
    let mut b = b.load_param(RegKind::Narrow, 1).switch(1, &cases).target(default);
    b = b
        .insn(IrInstruction::const_(0, DEFAULT as i32))
        .ret(RegKind::Narrow, 0);
    for (i, (&key, label)) in keys.iter().zip(labels).enumerate() {
        if to_default.contains(&key) {
            continue;
        }
        b = b
            .target(label)
            .insn(IrInstruction::const_(0, i as i32))
            .ret(RegKind::Narrow, 0);
    }
    b.build()
}

fn build(code: &mut IrCode, pool: &Pool) -> Result<ControlFlowGraph> {
    code.build_cfg(pool)?;
    Ok(code.cfg().expect("cfg was just built").clone())
}

fn branch_target(cfg: &ControlFlowGraph, block: BlockId, key: Option<i32>) -> Option<BlockId> {
    cfg.succs(block)
        .find(|(_, e)| e.kind() == EdgeKind::Branch(key))
        .map(|(_, e)| e.target())
}

/// Runs the method on `selector` and returns the value it returns.
fn eval(cfg: &ControlFlowGraph, selector: i32) -> i64 {
    let mut regs: HashMap<Reg, i32> = HashMap::new();
    let mut block = cfg.entry();
    for _ in 0..10_000 {
        let mut next = None;
        for insn in cfg.block(block).expect("live block").insns() {
            let a = insn.src(0).map(|r| regs[&r]);
            let b = insn.src(1).map(|r| regs[&r]);
            let lit = insn.literal().map(|l| l as i32);
            let value = match insn.opcode() {
                IrOpcode::LoadParam => Some(selector),
                IrOpcode::Const => lit,
                IrOpcode::AddIntLit => Some(a.expect("src").wrapping_add(lit.expect("lit"))),
                IrOpcode::AndIntLit => Some(a.expect("src") & lit.expect("lit")),
                IrOpcode::ShrIntLit => Some(a.expect("src") >> (lit.expect("lit") & 31)),
                IrOpcode::IfEqz => {
                    if a == Some(0) {
                        next = branch_target(cfg, block, None);
                    }
                    None
                }
                IrOpcode::IfEq => {
                    if a == b {
                        next = branch_target(cfg, block, None);
                    }
                    None
                }
                IrOpcode::Switch => {
                    next = branch_target(cfg, block, a);
                    None
                }
                IrOpcode::Return => return i64::from(a.expect("returned register")),
                other => panic!("unexpected {other:?} in a switch method"),
            };
            if let (Some(dest), Some(value)) = (insn.dest(), value) {
                regs.insert(dest, value);
            }
        }
        block = next
            .or_else(|| cfg.goto_target(block))
            .expect("block without a successor");
    }
    panic!("evaluation did not terminate");
}

/// Selector values worth trying for `keys`.
fn selectors_near(keys: &[i32]) -> Vec<i32> {
    let mut values = vec![i32::MIN, -1, 0, 1, i32::MAX];
    for &k in keys {
        values.extend([k.wrapping_sub(1), k, k.wrapping_add(1)]);
    }
    values
}

fn assert_same_dispatch(before: &ControlFlowGraph, after: &ControlFlowGraph, keys: &[i32]) {
    for v in selectors_near(keys) {
        assert_eq!(eval(before, v), eval(after, v), "selector {v}");
    }
}

fn switch_keys(cfg: &ControlFlowGraph) -> Vec<Vec<i32>> {
    let mut switches: Vec<Vec<i32>> = cfg
        .blocks()
        .filter(|b| b.last_insn().is_some_and(|i| i.opcode() == IrOpcode::Switch))
        .map(|b| {
            let mut keys: Vec<i32> = cfg
                .succs(b.id())
                .filter_map(|(_, e)| match e.kind() {
                    EdgeKind::Branch(Some(k)) => Some(k),
                    _ => None,
                })
                .collect();
            keys.sort_unstable();
            keys
        })
        .collect();
    switches.sort();
    switches
}

fn reduce_once(
    cfg: &mut ControlFlowGraph,
    pool: &Pool,
    options: &ReduceSparseSwitchesOptions,
) -> Result<ReductionStats> {
    let mut reducer = SwitchReducer::new(pool, options);
    reducer.reduce_once(cfg)?;
    cfg.verify()?;
    Ok(reducer.into_stats())
}

#[test]
fn test_trivial_cases_are_removed() -> Result<()> {
    let pool = Pool::new();
    let keys = [0, 50, 100];
    let mut code = switch_method(&keys, &[50]);
    let before = build(&mut code, &pool)?;
    let mut cfg = before.clone();
    let options = ReduceSparseSwitchesOptions {
        max_expanded_switch_cases: 0,
        ..ReduceSparseSwitchesOptions::default()
    };

    let stats = reduce_once(&mut cfg, &pool, &options)?;

    assert_eq!(stats.get("removed_trivial_switch_cases"), 1);
    assert_eq!(switch_keys(&cfg), vec![vec![0, 100]]);
    assert_same_dispatch(&before, &cfg, &keys);
    Ok(())
}

#[test]
fn test_switch_without_live_cases_disappears() -> Result<()> {
    let pool = Pool::new();
    let keys = [7, 700];
    let mut code = switch_method(&keys, &keys);
    let before = build(&mut code, &pool)?;
    let mut cfg = before.clone();

    let stats = reduce_once(&mut cfg, &pool, &ReduceSparseSwitchesOptions::default())?;

    assert_eq!(stats.get("removed_trivial_switch_cases"), 2);
    assert_eq!(stats.get("removed_trivial_switches"), 1);
    assert!(switch_keys(&cfg).is_empty());
    assert_same_dispatch(&before, &cfg, &keys);
    Ok(())
}

#[test]
fn test_single_case_becomes_if() -> Result<()> {
    let pool = Pool::new();
    for keys in [[0, 900], [123_456, 900]] {
        let mut code = switch_method(&keys, &[900]);
        let before = build(&mut code, &pool)?;
        let mut cfg = before.clone();

        let stats = reduce_once(&mut cfg, &pool, &ReduceSparseSwitchesOptions::default())?;

        assert_eq!(stats.get("converted_single_case_switches"), 1);
        assert!(switch_keys(&cfg).is_empty());
        assert_same_dispatch(&before, &cfg, &keys);
    }
    Ok(())
}

#[test]
fn test_small_sparse_switch_expands_to_if_chain() -> Result<()> {
    let pool = Pool::new();
    let keys = [-40_000, 5, 70_000];
    let mut code = switch_method(&keys, &[]);
    let before = build(&mut code, &pool)?;
    let mut cfg = before.clone();

    let stats = reduce_once(&mut cfg, &pool, &ReduceSparseSwitchesOptions::default())?;

    assert_eq!(stats.get("expanded_transformations"), 1);
    assert_eq!(stats.get("expanded_switch_cases"), 3);
    assert!(switch_keys(&cfg).is_empty());
    let rebased = cfg
        .instructions()
        .filter(|(_, i)| i.opcode() == IrOpcode::AddIntLit)
        .count();
    assert_eq!(rebased, 0, "key deltas exceed 16 bits");
    assert_same_dispatch(&before, &cfg, &keys);
    Ok(())
}

#[test]
fn test_expansion_rebases_scratch_register() -> Result<()> {
    let pool = Pool::new();
    let keys = [10, 300, 9000];
    let mut code = switch_method(&keys, &[]);
    let before = build(&mut code, &pool)?;
    let mut cfg = before.clone();

    reduce_once(&mut cfg, &pool, &ReduceSparseSwitchesOptions::default())?;

    let consts = cfg
        .instructions()
        .filter(|(_, i)| i.opcode() == IrOpcode::Const && i.literal() == Some(10))
        .count();
    let rebased = cfg
        .instructions()
        .filter(|(_, i)| i.opcode() == IrOpcode::AddIntLit)
        .count();
    assert_eq!(consts, 1);
    assert_eq!(rebased, 2);
    assert_same_dispatch(&before, &cfg, &keys);
    Ok(())
}

#[test]
fn test_packed_segments_are_split_off() -> Result<()> {
    let pool = Pool::new();
    let keys = [0, 50, 100, 101];
    let mut code = switch_method(&keys, &[]);
    let before = build(&mut code, &pool)?;
    let mut cfg = before.clone();
    let options = ReduceSparseSwitchesOptions {
        min_splitting_switch_cases: 4,
        ..ReduceSparseSwitchesOptions::default()
    };

    let stats = reduce_once(&mut cfg, &pool, &options)?;

    assert_eq!(stats.get("splitting_transformations"), 1);
    assert_eq!(stats.get("splitting_transformations_packed_segments"), 1);
    assert_eq!(stats.get("splitting_transformations_switch_cases_packed"), 2);
    assert_eq!(switch_keys(&cfg), vec![vec![0, 50], vec![100, 101]]);
    assert_same_dispatch(&before, &cfg, &keys);
    Ok(())
}

fn multiplexing_options() -> ReduceSparseSwitchesOptions {
    ReduceSparseSwitchesOptions {
        max_expanded_switch_cases: 0,
        min_splitting_switch_cases: usize::MAX,
        min_multiplexing_switch_cases: 5,
        ..ReduceSparseSwitchesOptions::default()
    }
}

#[test]
fn test_multiplexing_masks_the_selector() -> Result<()> {
    let pool = Pool::new();
    let keys = [0, 3, 6, 9, 12];
    let mut code = switch_method(&keys, &[]);
    let before = build(&mut code, &pool)?;
    let mut cfg = before.clone();

    let stats = reduce_once(&mut cfg, &pool, &multiplexing_options())?;

    assert_eq!(stats.get("multiplexing[4].transformations"), 1);
    assert_eq!(stats.get("multiplexing[4].switch_cases"), 5);
    assert_eq!(stats.get("multiplexing[4].inefficiency"), 0);
    assert!(!cfg
        .instructions()
        .any(|(_, i)| i.opcode() == IrOpcode::ShrIntLit));
    let mask = cfg
        .instructions()
        .find(|(_, i)| i.opcode() == IrOpcode::AndIntLit)
        .and_then(|(_, i)| i.literal());
    assert_eq!(mask, Some(3));
    // Outer dispatch over the buckets, one inner switch for the bucket {0, 12}.
    assert_eq!(switch_keys(&cfg), vec![vec![0, 1, 2, 3], vec![0, 12]]);
    assert_same_dispatch(&before, &cfg, &keys);
    Ok(())
}

#[test]
fn test_multiplexing_skips_constant_low_bits() -> Result<()> {
    let pool = Pool::new();
    let keys = [0, 6, 12, 18, 24];
    let mut code = switch_method(&keys, &[]);
    let before = build(&mut code, &pool)?;
    let mut cfg = before.clone();

    let stats = reduce_once(&mut cfg, &pool, &multiplexing_options())?;

    assert_eq!(stats.get("multiplexing[4].transformations"), 1);
    let shift = cfg
        .instructions()
        .find(|(_, i)| i.opcode() == IrOpcode::ShrIntLit)
        .and_then(|(_, i)| i.literal());
    assert_eq!(shift, Some(1));
    assert_eq!(switch_keys(&cfg), vec![vec![0, 1, 2, 3], vec![0, 24]]);
    assert_same_dispatch(&before, &cfg, &keys);
    Ok(())
}

#[test]
fn test_unbalanced_multiplexing_is_abandoned() -> Result<()> {
    let pool = Pool::new();
    // One bit per key, four apart: any two-bit window sees at most one of them.
    let keys = [0, 1 << 4, 1 << 8, 1 << 16, 1 << 24];
    let mut code = switch_method(&keys, &[]);
    let mut cfg = build(&mut code, &pool)?;

    let stats = reduce_once(&mut cfg, &pool, &multiplexing_options())?;

    assert_eq!(stats.get("multiplexing[4].abandoned"), 1);
    assert_eq!(stats.get("multiplexing[4].transformations"), 0);
    assert_eq!(switch_keys(&cfg), vec![keys.to_vec()]);
    Ok(())
}

#[test]
fn test_reduction_reaches_a_fixed_point() -> Result<()> {
    let pool = Pool::new();
    let key_sets: Vec<Vec<i32>> = vec![
        vec![1, 2, 3, 4, 5, 6, 1000, 2000, 3000, 4000, 5000, 6000],
        (0..40).map(|i| i * 7919 - 100_000).collect(),
        (0..64).map(|i| i * i * 31).collect(),
        vec![-5, 0, 5, 1 << 20, 1 << 21, 1 << 22, 1 << 23, 1 << 24, 1 << 25, 1 << 26],
    ];
    let options = ReduceSparseSwitchesOptions {
        max_iterations: 32,
        ..ReduceSparseSwitchesOptions::default()
    };
    for keys in key_sets {
        let to_default: Vec<i32> = keys.iter().copied().skip(3).step_by(7).collect();
        let mut code = switch_method(&keys, &to_default);
        let before = build(&mut code, &pool)?;
        let mut cfg = before.clone();

        let mut reducer = SwitchReducer::new(&pool, &options);
        let rounds = reducer.run(&mut cfg)?;
        assert!(rounds < options.max_iterations, "no fixed point for {keys:?}");
        assert!(!reducer.reduce_once(&mut cfg)?, "changed after a fixed point");
        assert!(reducer.stats().get("removed_trivial_switch_cases") > 0);
        cfg.verify()?;
        assert_same_dispatch(&before, &cfg, &keys);

        let linear = cfg.linearize()?;
        let mut relinked = IrCode::new(cfg.registers_size(), linear);
        let rebuilt = build(&mut relinked, &pool)?;
        assert_same_dispatch(&before, &rebuilt, &keys);
    }
    Ok(())
}

#[test]
fn test_multiplexing_without_encodable_scratch_is_abandoned() -> Result<()> {
    let pool = Pool::new();
    let keys = [0, 3, 6, 9, 12];
    let mut code = switch_method(&keys, &[]);
    let mut cfg = build(&mut code, &pool)?;
    // The scratch register fits the register file but no 8-bit operand.
    cfg.set_registers_size(0xffff);
    let before = cfg.clone();

    let stats = reduce_once(&mut cfg, &pool, &multiplexing_options())?;

    assert_eq!(stats.get("abandoned_encoding"), 1);
    assert_eq!(stats.get("multiplexing[4].abandoned"), 1);
    assert_eq!(stats.get("multiplexing[4].transformations"), 0);
    assert_eq!(cfg.registers_size(), 0xffff);
    assert_eq!(cfg.num_blocks(), before.num_blocks());
    assert_eq!(switch_keys(&cfg), vec![keys.to_vec()]);
    assert_same_dispatch(&before, &cfg, &keys);
    Ok(())
}
