//! Class hierarchy queries over a [`Scope`].
//!
//! [`TypeSystem`] is a snapshot of the super/interface relations and access flags of
//! every internal class, taken when it is built. It answers the questions the
//! transformations ask repeatedly: is `a` a subtype of `b`, what is the most specific
//! common supertype of two references, and may code placed in a host class reference a
//! given class, method or field.
//!
//! External classes (referenced but not defined in the scope) have an unknown super
//! chain. They are treated as direct subclasses of `java.lang.Object`, and members of
//! external classes are assumed accessible.

use std::sync::Arc;

use rustc_hash::{FxHashMap, FxHashSet};

use crate::ir::{
    class::AccessFlags,
    scope::Scope,
    FieldRef, MethodRef, Pool, ProtoRef, StringRef, TypeRef,
};

#[derive(Debug, Clone)]
struct ClassInfo {
    super_class: Option<TypeRef>,
    interfaces: Vec<TypeRef>,
    access: AccessFlags,
}

/// Hierarchy snapshot of a scope. See the [module documentation](self).
#[derive(Debug, Clone)]
pub struct TypeSystem {
    pool: Arc<Pool>,
    classes: FxHashMap<TypeRef, ClassInfo>,
    children: FxHashMap<TypeRef, Vec<TypeRef>>,
    methods: FxHashMap<(TypeRef, StringRef, ProtoRef), AccessFlags>,
    fields: FxHashMap<(TypeRef, StringRef, TypeRef), AccessFlags>,
}

impl TypeSystem {
    /// Builds the snapshot.
    #[must_use]
    pub fn new(scope: &Scope) -> Self {
        let pool = scope.shared_pool();
        let mut classes = FxHashMap::default();
        let mut children: FxHashMap<TypeRef, Vec<TypeRef>> = FxHashMap::default();
        let mut methods = FxHashMap::default();
        let mut fields = FxHashMap::default();

        for (_, class) in scope.classes() {
            classes.insert(
                class.ty,
                ClassInfo {
                    super_class: class.super_class,
                    interfaces: class.interfaces.iter().copied().collect(),
                    access: class.access,
                },
            );
            if let Some(sup) = class.super_class {
                children.entry(sup).or_default().push(class.ty);
            }
            for m in class.methods() {
                let d = pool.method(m.method);
                methods.insert((class.ty, d.name, d.proto), m.access);
            }
            for f in class.fields() {
                let d = pool.field(f.field);
                fields.insert((class.ty, d.name, d.ty), f.access);
            }
        }

        TypeSystem {
            pool,
            classes,
            children,
            methods,
            fields,
        }
    }

    /// `true` if `ty` is defined in the scope.
    #[must_use]
    pub fn is_internal(&self, ty: TypeRef) -> bool {
        self.classes.contains_key(&ty)
    }

    /// `true` if `ty` is internal and final.
    #[must_use]
    pub fn is_final(&self, ty: TypeRef) -> bool {
        self.classes
            .get(&ty)
            .is_some_and(|c| c.access.contains(AccessFlags::FINAL))
    }

    /// `true` if `ty` is an internal interface.
    #[must_use]
    pub fn is_interface(&self, ty: TypeRef) -> bool {
        self.classes
            .get(&ty)
            .is_some_and(|c| c.access.contains(AccessFlags::INTERFACE))
    }

    /// The declared super class of an internal `ty`.
    #[must_use]
    pub fn super_class(&self, ty: TypeRef) -> Option<TypeRef> {
        self.classes.get(&ty).and_then(|c| c.super_class)
    }

    /// Direct subclasses of `ty` within the scope.
    #[must_use]
    pub fn children(&self, ty: TypeRef) -> &[TypeRef] {
        self.children.get(&ty).map_or(&[], Vec::as_slice)
    }

    /// `ty` followed by its super classes, ending at `java.lang.Object`.
    #[must_use]
    pub fn super_chain(&self, ty: TypeRef) -> Vec<TypeRef> {
        let object = self.pool.known().object;
        let mut chain = vec![ty];
        let mut current = ty;
        while let Some(sup) = self.super_class(current) {
            // guards against malformed input with a super cycle
            if chain.contains(&sup) {
                break;
            }
            chain.push(sup);
            current = sup;
        }
        if *chain.last().unwrap_or(&object) != object && self.pool.is_reference(ty) {
            chain.push(object);
        }
        chain
    }

    /// Every interface `ty` implements, directly or through supers and super interfaces.
    #[must_use]
    pub fn all_interfaces(&self, ty: TypeRef) -> FxHashSet<TypeRef> {
        let mut out = FxHashSet::default();
        let mut stack: Vec<TypeRef> = self.super_chain(ty);
        while let Some(t) = stack.pop() {
            if let Some(info) = self.classes.get(&t) {
                for &i in &info.interfaces {
                    if out.insert(i) {
                        stack.push(i);
                    }
                }
            }
        }
        out
    }

    /// `true` if a value of type `sub` may be used where `sup` is expected.
    #[must_use]
    pub fn is_subtype(&self, sub: TypeRef, sup: TypeRef) -> bool {
        if sub == sup {
            return true;
        }
        let known = self.pool.known();
        if !self.pool.is_reference(sub) || !self.pool.is_reference(sup) {
            return false;
        }
        if sup == known.object {
            return true;
        }
        if let Some(component) = self.pool.array_component(sub) {
            if sup == known.cloneable || sup == known.serializable {
                return true;
            }
            return match self.pool.array_component(sup) {
                Some(sup_component) => {
                    self.pool.is_reference(component)
                        && self.is_subtype(component, sup_component)
                }
                None => false,
            };
        }
        if self.pool.is_array(sup) {
            return false;
        }
        self.super_chain(sub).contains(&sup) || self.all_interfaces(sub).contains(&sup)
    }

    /// The most specific class both `a` and `b` are subtypes of.
    ///
    /// Interfaces are not considered; unrelated types meet at `java.lang.Object`.
    #[must_use]
    pub fn common_supertype(&self, a: TypeRef, b: TypeRef) -> TypeRef {
        if self.is_subtype(a, b) {
            return b;
        }
        if self.is_subtype(b, a) {
            return a;
        }
        if let (Some(ca), Some(cb)) = (self.pool.array_component(a), self.pool.array_component(b))
        {
            if self.pool.is_reference(ca) && self.pool.is_reference(cb) {
                return self.pool.make_array(self.common_supertype(ca, cb));
            }
            return self.pool.known().object;
        }
        self.super_chain(a)
            .into_iter()
            .find(|t| self.is_subtype(b, *t))
            .unwrap_or(self.pool.known().object)
    }

    /// `true` if code in `host` may reference class `ty`.
    #[must_use]
    pub fn can_access_class(&self, host: TypeRef, ty: TypeRef) -> bool {
        let element = self.element_class(ty);
        let Some(target) = element else {
            return true;
        };
        match self.classes.get(&target) {
            None => true,
            Some(info) => {
                target == host
                    || info.access.contains(AccessFlags::PUBLIC)
                    || self.same_package(host, target)
            }
        }
    }

    /// `true` if code in `host` may call `method`.
    #[must_use]
    pub fn can_access_method(&self, host: TypeRef, method: MethodRef) -> bool {
        let d = *self.pool.method(method);
        if !self.can_access_class(host, d.owner) {
            return false;
        }
        let declared = self
            .super_chain(d.owner)
            .into_iter()
            .find_map(|t| self.methods.get(&(t, d.name, d.proto)).map(|a| (t, *a)));
        match declared {
            Some((owner, access)) => self.member_accessible(host, owner, access),
            None => true,
        }
    }

    /// `true` if code in `host` may read or write `field`.
    #[must_use]
    pub fn can_access_field(&self, host: TypeRef, field: FieldRef) -> bool {
        let d = *self.pool.field(field);
        if !self.can_access_class(host, d.owner) {
            return false;
        }
        let declared = self
            .super_chain(d.owner)
            .into_iter()
            .find_map(|t| self.fields.get(&(t, d.name, d.ty)).map(|a| (t, *a)));
        match declared {
            Some((owner, access)) => self.member_accessible(host, owner, access),
            None => true,
        }
    }

    fn member_accessible(&self, host: TypeRef, owner: TypeRef, access: AccessFlags) -> bool {
        if access.contains(AccessFlags::PUBLIC) {
            return true;
        }
        if access.contains(AccessFlags::PRIVATE) {
            return host == owner;
        }
        if self.same_package(host, owner) {
            return true;
        }
        access.contains(AccessFlags::PROTECTED) && self.is_subtype(host, owner)
    }

    fn same_package(&self, a: TypeRef, b: TypeRef) -> bool {
        self.pool.package_of(a) == self.pool.package_of(b)
    }

    /// The class an array type bottoms out at, or `None` for primitives.
    fn element_class(&self, ty: TypeRef) -> Option<TypeRef> {
        let mut t = ty;
        while let Some(c) = self.pool.array_component(t) {
            t = c;
        }
        self.pool.is_reference(t).then_some(t)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::class::{DexClass, DexMethod};

    struct Fixture {
        pool: Arc<Pool>,
        ts: TypeSystem,
    }

    // Base <- A, Base <- B (final); C in another package; I interface implemented by A.
    fn fixture() -> Fixture {
        let pool = Arc::new(Pool::new());
        let mut scope = Scope::new(Arc::clone(&pool));
        let store = scope.add_store("classes");
        let dex = scope.add_dex(store).unwrap();
        let object = pool.known().object;
        let t = |d: &str| pool.intern_type(d);

        scope
            .add_class(store, dex, DexClass::new(t("Lp/Base;"), AccessFlags::PUBLIC, Some(object)))
            .unwrap();
        let mut a = DexClass::new(t("Lp/A;"), AccessFlags::empty(), Some(t("Lp/Base;")));
        a.interfaces.push(t("Lp/I;"));
        let proto = pool.intern_proto(pool.known().void, &[]);
        a.add_method(DexMethod::new(
            pool.intern_method(t("Lp/A;"), "secret", proto),
            AccessFlags::PRIVATE,
            None,
        ))
        .unwrap();
        a.add_method(DexMethod::new(
            pool.intern_method(t("Lp/A;"), "shared", proto),
            AccessFlags::PROTECTED,
            None,
        ))
        .unwrap();
        scope.add_class(store, dex, a).unwrap();
        scope
            .add_class(
                store,
                dex,
                DexClass::new(
                    t("Lp/B;"),
                    AccessFlags::PUBLIC | AccessFlags::FINAL,
                    Some(t("Lp/Base;")),
                ),
            )
            .unwrap();
        scope
            .add_class(
                store,
                dex,
                DexClass::new(
                    t("Lp/I;"),
                    AccessFlags::PUBLIC | AccessFlags::INTERFACE | AccessFlags::ABSTRACT,
                    Some(object),
                ),
            )
            .unwrap();
        scope
            .add_class(store, dex, DexClass::new(t("Lq/C;"), AccessFlags::PUBLIC, Some(object)))
            .unwrap();
        let ts = TypeSystem::new(&scope);
        Fixture { pool, ts }
    }

    #[test]
    fn subtyping() {
        let Fixture { pool, ts } = fixture();
        let t = |d: &str| pool.intern_type(d);
        assert!(ts.is_subtype(t("Lp/A;"), t("Lp/Base;")));
        assert!(ts.is_subtype(t("Lp/A;"), t("Lp/I;")));
        assert!(!ts.is_subtype(t("Lp/Base;"), t("Lp/A;")));
        assert!(ts.is_subtype(t("[Lp/A;"), t("[Lp/Base;")));
        assert!(ts.is_subtype(t("[I"), pool.known().cloneable));
        assert!(!ts.is_subtype(t("[I"), t("[J")));
        assert!(ts.is_final(t("Lp/B;")));
        assert_eq!(ts.children(t("Lp/Base;")).len(), 2);
    }

    #[test]
    fn common_supertypes() {
        let Fixture { pool, ts } = fixture();
        let t = |d: &str| pool.intern_type(d);
        assert_eq!(ts.common_supertype(t("Lp/A;"), t("Lp/B;")), t("Lp/Base;"));
        assert_eq!(ts.common_supertype(t("Lp/A;"), t("Lq/C;")), pool.known().object);
        assert_eq!(ts.common_supertype(t("[Lp/A;"), t("[Lp/B;")), t("[Lp/Base;"));
        assert_eq!(ts.common_supertype(t("Lp/A;"), t("Lp/Base;")), t("Lp/Base;"));
    }

    #[test]
    fn access_rules() {
        let Fixture { pool, ts } = fixture();
        let t = |d: &str| pool.intern_type(d);
        let proto = pool.intern_proto(pool.known().void, &[]);
        let secret = pool.intern_method(t("Lp/A;"), "secret", proto);
        let shared = pool.intern_method(t("Lp/A;"), "shared", proto);

        assert!(ts.can_access_method(t("Lp/A;"), secret));
        assert!(!ts.can_access_method(t("Lp/B;"), secret));
        assert!(ts.can_access_method(t("Lp/B;"), shared));
        // A is package-private
        assert!(!ts.can_access_class(t("Lq/C;"), t("Lp/A;")));
        assert!(ts.can_access_class(t("Lq/C;"), t("[Lp/B;")));
        assert!(ts.can_access_class(t("Lq/C;"), t("Ljava/util/List;")));
    }
}
