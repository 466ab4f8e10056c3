//! Instruction-sequence outliner integration tests.
//!
//! The programs here are small: a handful of static methods sharing one sequence of
//! field updates. Each test runs the outliner through a [`PassManager`] and inspects
//! the scope afterwards.

use std::sync::Arc;

use dexopt::{
    ir::{
        builder::CodeBuilder,
        entry::MethodItemEntry,
        instruction::IrInstruction,
        opcode::IrOpcode,
        position::{DexPosition, PositionKind},
        AccessFlags, DexClass, DexField, DexMethod, IrCode, MethodRef, Pool, Scope, TypeRef,
    },
    opt::outliner::{
        InstructionSequenceOutlinerOptions, InstructionSequenceOutlinerPass, HELPER_PREFIX,
    },
    pass::{
        DexLimitsCheckPass, MetricSink, PassManager, PassRegistry, Property, PropertyStatus,
    },
    Config, Result,
};
use serde_json::json;

const PASS: &str = "InstructionSequenceOutlinerPass";

struct Program {
    pool: Arc<Pool>,
    scope: Scope,
    store: usize,
    dex: usize,
}

impl Program {
    fn new() -> Result<Self> {
        let pool = Arc::new(Pool::new());
        let mut scope = Scope::new(Arc::clone(&pool));
        let store = scope.add_store("classes");
        let dex = scope.add_dex(store)?;
        Ok(Program {
            pool,
            scope,
            store,
            dex,
        })
    }

    /// A public class with the two static int fields the shared sequence updates.
    fn class_with_fields(&self, descriptor: &str) -> Result<DexClass> {
        let ty = self.pool.intern_type(descriptor);
        let mut class = DexClass::new(ty, AccessFlags::PUBLIC, Some(self.pool.known().object));
        for name in ["total", "last"] {
            let field = self.pool.intern_field(ty, name, self.pool.known().int);
            class.add_field(DexField::new(field, AccessFlags::PUBLIC | AccessFlags::STATIC))?;
        }
        Ok(class)
    }

    fn static_method(&self, owner: TypeRef, name: &str, code: IrCode) -> (MethodRef, DexMethod) {
        let proto = self.pool.intern_proto(self.pool.known().void, &[]);
        let method = self.pool.intern_method(owner, name, proto);
        let access = AccessFlags::PUBLIC | AccessFlags::STATIC;
        (method, DexMethod::new(method, access, Some(code)))
    }

    fn method_named(&self, class: TypeRef, name: &str) -> &DexMethod {
        let id = self.scope.class_by_type(class).expect("class exists");
        self.scope
            .class(id)
            .methods()
            .iter()
            .find(|m| self.pool.method_name(m.method) == name)
            .expect("method exists")
    }

    fn helpers(&self, class: TypeRef) -> Vec<&DexMethod> {
        let id = self.scope.class_by_type(class).expect("class exists");
        self.scope
            .class(id)
            .methods()
            .iter()
            .filter(|m| self.pool.method_name(m.method).starts_with(HELPER_PREFIX))
            .collect()
    }
}

/// `total += 100000; last = 100000;` on the static fields of `owner`.
///
/// Eleven code units: the wide literal makes the `const` three units long, and with
/// `total` as the second operand `add-int` has no two-address form.
fn sequence(pool: &Pool, owner: TypeRef) -> Vec<IrInstruction> {
    let int = pool.known().int;
    let total = pool.intern_field(owner, "total", int);
    let last = pool.intern_field(owner, "last", int);
    vec![
        IrInstruction::new(IrOpcode::Sget).with_dest(0).with_field(total),
        IrInstruction::const_(1, 100_000),
        IrInstruction::new(IrOpcode::AddInt).with_dest(0).with_srcs(&[1, 0]),
        IrInstruction::new(IrOpcode::Sput).with_srcs(&[0]).with_field(total),
        IrInstruction::new(IrOpcode::Sput).with_srcs(&[1]).with_field(last),
    ]
}

fn opcodes(code: &IrCode) -> Vec<IrOpcode> {
    code.insns().map(IrInstruction::opcode).collect()
}

fn run(
    scope: &mut Scope,
    pass: InstructionSequenceOutlinerPass,
) -> Result<(PassManager, Arc<MetricSink>)> {
    let metrics = Arc::new(MetricSink::new());
    let mut manager = PassManager::new(vec![Box::new(pass)], Arc::clone(&metrics));
    manager.run(scope, &Config::default())?;
    Ok((manager, metrics))
}

fn metric(metrics: &MetricSink, name: &str) -> i64 {
    metrics.get(&format!("{PASS}.{name}"))
}

#[test]
fn test_sibling_methods_share_one_helper() -> Result<()> {
    let mut p = Program::new()?;
    let foo = p.pool.intern_type("LFoo;");
    let mut class = p.class_with_fields("LFoo;")?;
    for i in 0..4 {
        let code = CodeBuilder::new(2)
            .insns(sequence(&p.pool, foo))
            .ret_void()
            .build();
        let (_, method) = p.static_method(foo, &format!("m{i}"), code);
        class.add_method(method)?;
    }
    p.scope.add_class(p.store, p.dex, class)?;

    let (_, metrics) = run(&mut p.scope, InstructionSequenceOutlinerPass::default())?;

    assert_eq!(metric(&metrics, "outlined_methods"), 1);
    assert_eq!(metric(&metrics, "outlined_call_sites"), 4);
    assert_eq!(metric(&metrics, "outlined_instructions"), 20);
    assert_eq!(metric(&metrics, "outliner_new_classes"), 0);

    let helpers = p.helpers(foo);
    assert_eq!(helpers.len(), 1);
    let helper = helpers[0];
    assert!(helper.is_static());
    assert!(helper.access.contains(AccessFlags::SYNTHETIC));
    let body = helper.code.as_ref().expect("helper has code");
    let mut expected: Vec<IrOpcode> = sequence(&p.pool, foo)
        .iter()
        .map(IrInstruction::opcode)
        .collect();
    expected.push(IrOpcode::ReturnVoid);
    assert_eq!(opcodes(body), expected);

    for i in 0..4 {
        let caller = p.method_named(foo, &format!("m{i}"));
        let code = caller.code.as_ref().expect("caller keeps its code");
        assert_eq!(opcodes(code), vec![IrOpcode::InvokeStatic, IrOpcode::ReturnVoid]);
        let callee = code.insns().find_map(IrInstruction::method);
        assert_eq!(callee, Some(helper.method));
    }
    Ok(())
}

#[test]
fn test_helper_moves_to_the_common_base_class() -> Result<()> {
    let mut p = Program::new()?;
    let base = p.pool.intern_type("Lcom/app/Base;");
    let base_class = p.class_with_fields("Lcom/app/Base;")?;
    p.scope.add_class(p.store, p.dex, base_class)?;
    for name in ["Lcom/app/A;", "Lcom/app/B;"] {
        let ty = p.pool.intern_type(name);
        let mut class = DexClass::new(ty, AccessFlags::PUBLIC, Some(base));
        let code = CodeBuilder::new(2)
            .insns(sequence(&p.pool, base))
            .insns(sequence(&p.pool, base))
            .ret_void()
            .build();
        let (_, method) = p.static_method(ty, "run", code);
        class.add_method(method)?;
        p.scope.add_class(p.store, p.dex, class)?;
    }
    let pass = InstructionSequenceOutlinerPass::with_options(InstructionSequenceOutlinerOptions {
        savings_threshold: 0,
        ..InstructionSequenceOutlinerOptions::default()
    });

    let (_, metrics) = run(&mut p.scope, pass)?;

    assert_eq!(metric(&metrics, "outlined_methods"), 1);
    assert_eq!(metric(&metrics, "outliner_new_classes"), 0);
    let helpers = p.helpers(base);
    assert_eq!(helpers.len(), 1);
    for name in ["Lcom/app/A;", "Lcom/app/B;"] {
        let ty = p.pool.intern_type(name);
        assert!(p.helpers(ty).is_empty());
        let code = p.method_named(ty, "run").code.as_ref().expect("code");
        let callee = code.insns().find_map(IrInstruction::method);
        assert_eq!(callee.map(|m| p.pool.method(m).owner), Some(base));
    }
    Ok(())
}

#[test]
fn test_unrelated_callers_get_a_holder_class() -> Result<()> {
    let mut p = Program::new()?;
    let shared = p.pool.intern_type("Lcom/app/Counters;");
    let counters = p.class_with_fields("Lcom/app/Counters;")?;
    p.scope.add_class(p.store, p.dex, counters)?;
    for name in ["Lcom/app/First;", "Lcom/app/Second;"] {
        let ty = p.pool.intern_type(name);
        let access = AccessFlags::PUBLIC | AccessFlags::FINAL;
        let mut class = DexClass::new(ty, access, Some(p.pool.known().object));
        for m in ["a", "b"] {
            let code = CodeBuilder::new(2)
                .insns(sequence(&p.pool, shared))
                .ret_void()
                .build();
            let (_, method) = p.static_method(ty, m, code);
            class.add_method(method)?;
        }
        p.scope.add_class(p.store, p.dex, class)?;
    }

    let (_, metrics) = run(&mut p.scope, InstructionSequenceOutlinerPass::default())?;

    assert_eq!(metric(&metrics, "outlined_methods"), 1);
    assert_eq!(metric(&metrics, "outliner_new_classes"), 1);
    let holder = p
        .pool
        .get_type("Lcom/app/$Outlined$0;")
        .expect("holder type interned");
    let id = p.scope.class_by_type(holder).expect("holder class added");
    let class = p.scope.class(id);
    assert!(class.is_final());
    assert!(class.access.contains(AccessFlags::SYNTHETIC));
    assert_eq!(p.helpers(holder).len(), 1);
    Ok(())
}

#[test]
fn test_call_sites_keep_their_lines() -> Result<()> {
    let mut p = Program::new()?;
    let foo = p.pool.intern_type("LFoo;");
    let mut class = p.class_with_fields("LFoo;")?;
    for i in 0..4 {
        let proto = p.pool.intern_proto(p.pool.known().void, &[]);
        let m = p.pool.intern_method(foo, &format!("m{i}"), proto);
        let mut b = CodeBuilder::new(2);
        for (k, insn) in sequence(&p.pool, foo).into_iter().enumerate() {
            b = b.line(Some(m), None, 100 * i + k as u32).insn(insn);
        }
        let code = b.ret_void().build();
        class.add_method(DexMethod::new(m, AccessFlags::PUBLIC | AccessFlags::STATIC, Some(code)))?;
    }
    p.scope.add_class(p.store, p.dex, class)?;

    let (manager, _) = run(&mut p.scope, InstructionSequenceOutlinerPass::default())?;

    let positions = manager.positions();
    let helper = p.helpers(foo)[0].code.as_ref().expect("helper code");
    let inner: Vec<&Arc<DexPosition>> = helper
        .entries()
        .iter()
        .filter_map(MethodItemEntry::as_position)
        .filter(|pos| matches!(pos.kind, PositionKind::Switch { .. }))
        .collect();
    assert_eq!(inner.len(), 5);

    for i in 0..4u32 {
        let code = p.method_named(foo, &format!("m{i}")).code.as_ref().expect("code");
        let entries = code.entries();
        let call = entries
            .windows(2)
            .find_map(|w| match (&w[0], &w[1]) {
                (MethodItemEntry::Position(pos), MethodItemEntry::Insn(insn))
                    if insn.opcode() == IrOpcode::InvokeStatic =>
                {
                    Some(Arc::clone(pos))
                }
                _ => None,
            })
            .expect("call site carries a pattern position");
        assert!(matches!(call.kind, PositionKind::Pattern(_)));
        assert_eq!(call.line, 100 * i);
        for (k, pos) in inner.iter().enumerate() {
            let resolved = positions.resolve(pos, &call).map(|r| r.line);
            assert_eq!(resolved, Some(100 * i + k as u32));
        }
    }
    Ok(())
}

#[test]
fn test_outlined_calls_stay_covered_by_handlers() -> Result<()> {
    let mut p = Program::new()?;
    let foo = p.pool.intern_type("LFoo;");
    let mut class = p.class_with_fields("LFoo;")?;
    for i in 0..4 {
        let mut b = CodeBuilder::new(2);
        let chain = b.new_catch();
        let code = b
            .try_start(chain)
            .insns(sequence(&p.pool, foo))
            .try_end(chain)
            .ret_void()
            .catch(chain, None, 0)
            .ret_void()
            .build();
        let (_, method) = p.static_method(foo, &format!("m{i}"), code);
        class.add_method(method)?;
    }
    p.scope.add_class(p.store, p.dex, class)?;

    let (_, metrics) = run(&mut p.scope, InstructionSequenceOutlinerPass::default())?;
    assert_eq!(metric(&metrics, "outlined_call_sites"), 4);

    for i in 0..4 {
        let mut code = p
            .method_named(foo, &format!("m{i}"))
            .code
            .clone()
            .expect("code");
        code.build_cfg(&p.pool)?;
        let cfg = code.cfg().expect("cfg");
        let (call, _) = cfg
            .instructions()
            .find(|(_, insn)| insn.opcode() == IrOpcode::InvokeStatic)
            .expect("call site");
        assert_eq!(cfg.throw_succs(call.block).len(), 1);
    }
    Ok(())
}

#[test]
fn test_excluded_classes_are_left_alone() -> Result<()> {
    let mut p = Program::new()?;
    let foo = p.pool.intern_type("Lcom/vendor/Foo;");
    let mut class = p.class_with_fields("Lcom/vendor/Foo;")?;
    for i in 0..4 {
        let code = CodeBuilder::new(2)
            .insns(sequence(&p.pool, foo))
            .ret_void()
            .build();
        let (_, method) = p.static_method(foo, &format!("m{i}"), code);
        class.add_method(method)?;
    }
    p.scope.add_class(p.store, p.dex, class)?;
    let config = Config::new(json!({
        "passes": [PASS],
        "InstructionSequenceOutlinerPass": { "excluded_class_prefixes": ["Lcom/vendor/"] }
    }))?;
    let metrics = Arc::new(MetricSink::new());

    dexopt::run(&mut p.scope, &config, Arc::clone(&metrics))?;

    assert_eq!(metric(&metrics, "outlined_methods"), 0);
    assert!(p.helpers(foo).is_empty());
    let code = p.method_named(foo, "m0").code.as_ref().expect("code");
    assert_eq!(opcodes(code).len(), 6);
    Ok(())
}

#[test]
fn test_savings_threshold_is_respected() -> Result<()> {
    let mut p = Program::new()?;
    let foo = p.pool.intern_type("LFoo;");
    let mut class = p.class_with_fields("LFoo;")?;
    // Two occurrences save 2 * (11 - 3) - (11 + 1 + 8) = -4 code units.
    for i in 0..2 {
        let code = CodeBuilder::new(2)
            .insns(sequence(&p.pool, foo))
            .ret_void()
            .build();
        let (_, method) = p.static_method(foo, &format!("m{i}"), code);
        class.add_method(method)?;
    }
    p.scope.add_class(p.store, p.dex, class)?;

    let (_, metrics) = run(&mut p.scope, InstructionSequenceOutlinerPass::default())?;

    assert_eq!(metric(&metrics, "outlined_methods"), 0);
    assert!(p.helpers(foo).is_empty());
    Ok(())
}

#[test]
fn test_full_dex_takes_no_helpers() -> Result<()> {
    for (max_method_refs, outlined) in [(4, 0), (5, 1)] {
        let mut p = Program::new()?;
        let foo = p.pool.intern_type("LFoo;");
        let mut class = p.class_with_fields("LFoo;")?;
        for i in 0..4 {
            let code = CodeBuilder::new(2)
                .insns(sequence(&p.pool, foo))
                .ret_void()
                .build();
            let (_, method) = p.static_method(foo, &format!("m{i}"), code);
            class.add_method(method)?;
        }
        p.scope.add_class(p.store, p.dex, class)?;
        let config = Config::new(json!({
            "passes": ["DexLimitsCheckPass", PASS],
            "DexLimitsCheckPass": { "max_method_refs": max_method_refs }
        }))?;
        let metrics = Arc::new(MetricSink::new());
        let mut manager =
            PassManager::from_config(&PassRegistry::default(), &config, Arc::clone(&metrics))?;

        manager.run(&mut p.scope, &config)?;

        assert_eq!(metric(&metrics, "outlined_methods"), outlined);
        assert_eq!(metric(&metrics, "outliner_over_dex_limits"), 1 - outlined);
        assert_eq!(p.helpers(foo).len(), usize::try_from(outlined).unwrap_or(0));
        assert_eq!(
            manager.properties().status(Property::DexLimitsObeyed),
            PropertyStatus::Established
        );
        // The dex still passes its own check after the outliner.
        let mut recheck = PassManager::new(
            vec![Box::new(DexLimitsCheckPass::with_limits(dexopt::pass::DexLimits {
                max_method_refs,
                ..dexopt::pass::DexLimits::default()
            }))],
            Arc::new(MetricSink::new()),
        );
        recheck.run(&mut p.scope, &config)?;
    }
    Ok(())
}
