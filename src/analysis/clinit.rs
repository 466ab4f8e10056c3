//! Static-initialiser dependency graph.
//!
//! Running a class' `<clinit>` triggers initialisation of its superclass and of every
//! internal class whose static members, constructors or `init-class` markers it
//! touches. A cycle in that relation makes the observed initial values depend on
//! which class is touched first, so code moved across such classes (by the outliner)
//! could change program behaviour.
//!
//! [`ClinitGraph::check_cycles`] reports the first cycle as a [`CycleDetected`];
//! [`ClinitGraph::cycle_report`] collects every class that lies on a cycle.

use rustc_hash::{FxHashMap, FxHashSet};

use crate::{
    error::CycleDetected,
    ir::{
        opcode::{IrOpcode, OpcodeFamily},
        Scope, TypeRef,
    },
    utils::graph::{algorithms::find_cycle, DirectedGraph, NodeId, Successors},
};

/// Dependencies between classes that have a static initialiser.
#[derive(Debug, Clone)]
pub struct ClinitGraph {
    graph: DirectedGraph<TypeRef>,
    nodes: FxHashMap<TypeRef, NodeId>,
}

/// All classes found on initialisation cycles.
#[derive(Debug, Clone, Default)]
pub struct ClinitCycles {
    /// One representative chain per distinct cycle, in discovery order.
    pub cycles: Vec<CycleDetected>,
    /// Every class on any cycle.
    pub classes: FxHashSet<TypeRef>,
}

impl ClinitCycles {
    /// `true` if `ty` lies on an initialisation cycle.
    #[must_use]
    pub fn contains(&self, ty: TypeRef) -> bool {
        self.classes.contains(&ty)
    }

    /// `true` if no cycle was found.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.cycles.is_empty()
    }
}

impl ClinitGraph {
    /// Builds the graph over the internal classes of `scope` that define `<clinit>`.
    #[must_use]
    pub fn new(scope: &Scope) -> Self {
        let pool = scope.pool();
        let mut graph = DirectedGraph::new();
        let mut nodes = FxHashMap::default();
        for (_, class) in scope.classes() {
            if class.has_clinit(pool) {
                nodes.insert(class.ty, graph.add_node(class.ty));
            }
        }

        for (_, class) in scope.classes() {
            let Some(&from) = nodes.get(&class.ty) else {
                continue;
            };
            let mut targets: Vec<TypeRef> = Vec::new();
            // superclasses initialise first, even ones without their own <clinit>
            let mut sup = class.super_class;
            while let Some(s) = sup {
                targets.push(s);
                sup = scope
                    .class_by_type(s)
                    .and_then(|id| scope.class(id).super_class);
            }
            for method in class.methods() {
                if !pool.is_clinit(method.method) {
                    continue;
                }
                let Some(code) = &method.code else {
                    continue;
                };
                for insn in code.insns() {
                    let owner = match insn.opcode().family() {
                        OpcodeFamily::StaticGet | OpcodeFamily::StaticPut => {
                            insn.field().map(|f| pool.field(f).owner)
                        }
                        OpcodeFamily::Invoke => insn
                            .method()
                            .filter(|m| {
                                insn.opcode() == IrOpcode::InvokeStatic || pool.is_init(*m)
                            })
                            .map(|m| pool.method(m).owner),
                        OpcodeFamily::NewInstance | OpcodeFamily::InitClass => insn.type_ref(),
                        _ => None,
                    };
                    if let Some(owner) = owner {
                        targets.push(owner);
                    }
                }
            }
            for target in targets {
                if let Some(&to) = nodes.get(&target) {
                    if to != from && !graph.has_edge(from, to) {
                        // both endpoints were just created by add_node
                        let _ = graph.add_edge(from, to);
                    }
                }
            }
        }
        Self { graph, nodes }
    }

    /// Number of classes with a static initialiser.
    #[must_use]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// `true` if no class has a static initialiser.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Classes whose initialisation `ty`'s `<clinit>` triggers directly.
    #[must_use]
    pub fn dependencies(&self, ty: TypeRef) -> Vec<TypeRef> {
        self.nodes
            .get(&ty)
            .map(|&n| {
                self.graph
                    .successors(n)
                    .filter_map(|s| self.graph.node(s).copied())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Fails with the first initialisation cycle found, scanning classes in scope
    /// order.
    ///
    /// # Errors
    ///
    /// Returns [`CycleDetected`] carrying the closed class chain.
    pub fn check_cycles(&self) -> std::result::Result<(), CycleDetected> {
        for (node, _) in self.graph.nodes() {
            if let Some(cycle) = find_cycle(&self.graph, node) {
                return Err(self.chain(&cycle));
            }
        }
        Ok(())
    }

    /// Every distinct cycle and the set of classes on them.
    #[must_use]
    pub fn cycle_report(&self) -> ClinitCycles {
        let mut report = ClinitCycles::default();
        for (node, ty) in self.graph.nodes() {
            if report.classes.contains(ty) {
                continue;
            }
            if let Some(cycle) = find_cycle(&self.graph, node) {
                let chain = self.chain(&cycle);
                if chain.chain.iter().all(|t| report.classes.contains(t)) {
                    continue;
                }
                log::debug!("class initialisation cycle of {} classes", chain.chain.len() - 1);
                report.classes.extend(chain.chain.iter().copied());
                report.cycles.push(chain);
            }
        }
        report
    }

    fn chain(&self, cycle: &[NodeId]) -> CycleDetected {
        CycleDetected {
            chain: cycle
                .iter()
                .filter_map(|n| self.graph.node(*n).copied())
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::ir::{
        builder::CodeBuilder, class::DexClass, instruction::IrInstruction, AccessFlags, DexField,
        DexMethod, Pool,
    };

    fn class_with_clinit(pool: &Pool, name: &str, reads: Option<TypeRef>) -> DexClass {
        let ty = pool.intern_type(name);
        let mut class = DexClass::new(ty, AccessFlags::PUBLIC, Some(pool.known().object));
        let int = pool.known().int;
        let field = pool.intern_field(ty, "X", int);
        class
            .add_field(DexField::new(field, AccessFlags::PUBLIC | AccessFlags::STATIC))
            .unwrap();
        let mut body = CodeBuilder::new(1);
        if let Some(other) = reads {
            let read = pool.intern_field(other, "X", int);
            body = body.insn(IrInstruction::new(IrOpcode::Sget).with_dest(0).with_field(read));
        }
        let proto = pool.intern_proto(pool.known().void, &[]);
        let clinit = pool.intern_method(ty, "<clinit>", proto);
        class
            .add_method(DexMethod::new(
                clinit,
                AccessFlags::STATIC | AccessFlags::CONSTRUCTOR,
                Some(body.ret_void().build()),
            ))
            .unwrap();
        class
    }

    #[test]
    fn detects_two_class_cycle() {
        let pool = Arc::new(Pool::new());
        let a = pool.intern_type("LA;");
        let b = pool.intern_type("LB;");
        let c = pool.intern_type("LC;");
        let mut scope = Scope::new(Arc::clone(&pool));
        let store = scope.add_store("classes");
        let dex = scope.add_dex(store).unwrap();
        scope.add_class(store, dex, class_with_clinit(&pool, "LA;", Some(b))).unwrap();
        scope.add_class(store, dex, class_with_clinit(&pool, "LB;", Some(a))).unwrap();
        scope.add_class(store, dex, class_with_clinit(&pool, "LC;", Some(a))).unwrap();

        let graph = ClinitGraph::new(&scope);
        assert_eq!(graph.len(), 3);
        assert_eq!(graph.dependencies(c), vec![a]);

        let err = graph.check_cycles().unwrap_err();
        assert_eq!(err.chain, vec![a, b, a]);

        let report = graph.cycle_report();
        assert_eq!(report.cycles.len(), 1);
        assert!(report.contains(a) && report.contains(b));
        assert!(!report.contains(c));
    }

    #[test]
    fn acyclic_scope_passes() {
        let pool = Arc::new(Pool::new());
        let a = pool.intern_type("LA;");
        let mut scope = Scope::new(Arc::clone(&pool));
        let store = scope.add_store("classes");
        let dex = scope.add_dex(store).unwrap();
        scope.add_class(store, dex, class_with_clinit(&pool, "LA;", None)).unwrap();
        scope.add_class(store, dex, class_with_clinit(&pool, "LB;", Some(a))).unwrap();

        let graph = ClinitGraph::new(&scope);
        assert!(graph.check_cycles().is_ok());
        assert!(graph.cycle_report().is_empty());
    }
}
