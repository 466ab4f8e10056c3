//! The whole-program view: every internal class, grouped into stores and dexes.
//!
//! A [`Scope`] owns the class definitions being optimized in a single arena indexed by
//! [`ClassId`]. Classes are grouped the way the containers are laid out on disk: a
//! [`DexStore`] is an ordered list of dexes and a dex is an ordered list of classes.
//! Iteration order is the order in which classes were added, so anything derived from
//! walking the scope is deterministic.
//!
//! Methods are addressed by [`MethodId`], a `(class, slot)` pair that stays stable as
//! long as no method is removed from its class. Passes that need exclusive access to
//! many bodies at once use [`Scope::par_walk_methods`], which hands each body to exactly
//! one rayon worker and returns the per-method results sorted by id.
//!
//! # Example
//!
//! ```rust
//! use std::sync::Arc;
//! use dexopt::ir::{AccessFlags, DexClass, Pool, Scope};
//!
//! let pool = Arc::new(Pool::new());
//! let mut scope = Scope::new(pool.clone());
//! let store = scope.add_store("classes");
//! let dex = scope.add_dex(store)?;
//! let foo = pool.intern_type("Lcom/example/Foo;");
//! let id = scope.add_class(
//!     store,
//!     dex,
//!     DexClass::new(foo, AccessFlags::PUBLIC, Some(pool.known().object)),
//! )?;
//! assert_eq!(scope.class_by_type(foo), Some(id));
//! # Ok::<(), dexopt::Error>(())
//! ```

use std::{fmt, sync::Arc};

use rayon::prelude::*;
use rustc_hash::FxHashMap;

use crate::{
    ir::{
        class::{DexClass, DexField, DexMethod},
        FieldRef, MethodRef, Pool, TypeRef,
    },
    Error, Result,
};

define_handle!(
    /// A class definition in a [`Scope`].
    ClassId, "c"
);

/// A method definition: its class and its slot in the class's method list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct MethodId {
    /// The owning class.
    pub class: ClassId,
    /// Slot in [`DexClass::methods`].
    pub index: u32,
}

impl MethodId {
    /// Creates a method id.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn new(class: ClassId, index: usize) -> Self {
        MethodId {
            class,
            index: index as u32,
        }
    }
}

impl fmt::Display for MethodId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.class, self.index)
    }
}

/// A named group of dexes shipped together (the primary APK, a feature module).
#[derive(Debug, Clone, Default)]
pub struct DexStore {
    /// Store name.
    pub name: String,
    /// Classes of each dex, in order.
    pub dexes: Vec<Vec<ClassId>>,
}

/// Where a class lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ClassLocation {
    /// Index into [`Scope::stores`].
    pub store: usize,
    /// Index into [`DexStore::dexes`].
    pub dex: usize,
}

/// All internal class definitions. See the [module documentation](self).
pub struct Scope {
    pool: Arc<Pool>,
    classes: Vec<DexClass>,
    locations: Vec<ClassLocation>,
    by_type: FxHashMap<TypeRef, ClassId>,
    stores: Vec<DexStore>,
}

impl Scope {
    /// An empty scope over `pool`.
    #[must_use]
    pub fn new(pool: Arc<Pool>) -> Self {
        Scope {
            pool,
            classes: Vec::new(),
            locations: Vec::new(),
            by_type: FxHashMap::default(),
            stores: Vec::new(),
        }
    }

    /// The interning pool.
    #[must_use]
    pub fn pool(&self) -> &Pool {
        &self.pool
    }

    /// A shared handle to the interning pool.
    #[must_use]
    pub fn shared_pool(&self) -> Arc<Pool> {
        Arc::clone(&self.pool)
    }

    /// Adds an empty store and returns its index.
    pub fn add_store(&mut self, name: &str) -> usize {
        self.stores.push(DexStore {
            name: name.to_string(),
            dexes: Vec::new(),
        });
        self.stores.len() - 1
    }

    /// Adds an empty dex to `store` and returns its index within the store.
    ///
    /// # Errors
    ///
    /// Returns [`Error::OutOfBounds`] for an unknown store.
    pub fn add_dex(&mut self, store: usize) -> Result<usize> {
        let store = self.stores.get_mut(store).ok_or(out_of_bounds_error!())?;
        store.dexes.push(Vec::new());
        Ok(store.dexes.len() - 1)
    }

    /// Adds `class` at the end of dex `dex` of store `store`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::DuplicateDefinition`] if the type already has a definition and
    /// [`Error::OutOfBounds`] for an unknown store or dex.
    pub fn add_class(&mut self, store: usize, dex: usize, class: DexClass) -> Result<ClassId> {
        if self.by_type.contains_key(&class.ty) {
            return Err(Error::DuplicateDefinition(
                self.pool.type_descriptor(class.ty).to_string(),
            ));
        }
        let id = ClassId::from_index(self.classes.len());
        let slot = self
            .stores
            .get_mut(store)
            .and_then(|s| s.dexes.get_mut(dex))
            .ok_or(out_of_bounds_error!())?;
        slot.push(id);
        self.by_type.insert(class.ty, id);
        self.classes.push(class);
        self.locations.push(ClassLocation { store, dex });
        Ok(id)
    }

    /// Adds `class` to the same dex as `near`.
    ///
    /// # Errors
    ///
    /// See [`Scope::add_class`].
    pub fn add_class_near(&mut self, near: ClassId, class: DexClass) -> Result<ClassId> {
        let at = self.location(near);
        self.add_class(at.store, at.dex, class)
    }

    /// The stores, in order.
    #[must_use]
    pub fn stores(&self) -> &[DexStore] {
        &self.stores
    }

    /// Number of classes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.classes.len()
    }

    /// `true` if the scope holds no class.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.classes.is_empty()
    }

    /// The class definition `id`.
    ///
    /// # Panics
    ///
    /// Panics if `id` does not belong to this scope.
    #[must_use]
    pub fn class(&self, id: ClassId) -> &DexClass {
        &self.classes[id.index()]
    }

    /// The class definition `id`, mutably.
    ///
    /// # Panics
    ///
    /// Panics if `id` does not belong to this scope.
    pub fn class_mut(&mut self, id: ClassId) -> &mut DexClass {
        &mut self.classes[id.index()]
    }

    /// The store and dex holding class `id`.
    #[must_use]
    pub fn location(&self, id: ClassId) -> ClassLocation {
        self.locations[id.index()]
    }

    /// All classes in scope order.
    pub fn classes(&self) -> impl Iterator<Item = (ClassId, &DexClass)> {
        self.classes
            .iter()
            .enumerate()
            .map(|(i, c)| (ClassId::from_index(i), c))
    }

    /// The definition of `ty`, if it is internal.
    #[must_use]
    pub fn class_by_type(&self, ty: TypeRef) -> Option<ClassId> {
        self.by_type.get(&ty).copied()
    }

    /// `true` if `ty` is defined in this scope.
    #[must_use]
    pub fn is_internal(&self, ty: TypeRef) -> bool {
        self.by_type.contains_key(&ty)
    }

    /// The method `id`.
    ///
    /// # Panics
    ///
    /// Panics if `id` does not belong to this scope.
    #[must_use]
    pub fn method(&self, id: MethodId) -> &DexMethod {
        &self.classes[id.class.index()].methods()[id.index as usize]
    }

    /// The method `id`, mutably.
    ///
    /// # Panics
    ///
    /// Panics if `id` does not belong to this scope.
    pub fn method_mut(&mut self, id: MethodId) -> &mut DexMethod {
        &mut self.classes[id.class.index()].methods_mut()[id.index as usize]
    }

    /// Ids of every method in scope order.
    #[must_use]
    pub fn method_ids(&self) -> Vec<MethodId> {
        self.classes()
            .flat_map(|(cid, class)| (0..class.methods().len()).map(move |i| MethodId::new(cid, i)))
            .collect()
    }

    /// The definition of exactly `method`, without walking super classes.
    #[must_use]
    pub fn method_def(&self, method: MethodRef) -> Option<MethodId> {
        let owner = self.class_by_type(self.pool.method(method).owner)?;
        let index = self.class(owner).find_method(method)?;
        Some(MethodId::new(owner, index))
    }

    /// Resolves `method` to the definition a call would reach, walking the super chain
    /// of its owner. Returns `None` once the walk leaves the scope.
    #[must_use]
    pub fn resolve_method(&self, method: MethodRef) -> Option<MethodId> {
        let data = *self.pool.method(method);
        let mut current = Some(data.owner);
        while let Some(ty) = current {
            let cid = self.class_by_type(ty)?;
            let class = self.class(cid);
            let hit = class.methods().iter().position(|m| {
                let d = self.pool.method(m.method);
                d.name == data.name && d.proto == data.proto
            });
            if let Some(index) = hit {
                return Some(MethodId::new(cid, index));
            }
            current = class.super_class;
        }
        None
    }

    /// Resolves `field` to its declaring class and definition, walking the super chain
    /// of its owner.
    #[must_use]
    pub fn resolve_field(&self, field: FieldRef) -> Option<(ClassId, &DexField)> {
        let data = *self.pool.field(field);
        let mut current = Some(data.owner);
        while let Some(ty) = current {
            let cid = self.class_by_type(ty)?;
            let class = self.class(cid);
            let hit = class.fields().iter().find(|f| {
                let d = self.pool.field(f.field);
                d.name == data.name && d.ty == data.ty
            });
            if let Some(def) = hit {
                return Some((cid, def));
            }
            current = class.super_class;
        }
        None
    }

    /// Calls `f` for every method in scope order.
    pub fn walk_methods<F>(&self, mut f: F)
    where
        F: FnMut(MethodId, &DexMethod),
    {
        for (cid, class) in self.classes() {
            for (i, method) in class.methods().iter().enumerate() {
                f(MethodId::new(cid, i), method);
            }
        }
    }

    /// Runs `f` on every method in parallel, one worker per method, and returns the
    /// results sorted by [`MethodId`].
    pub fn par_walk_methods<F, R>(&mut self, f: F) -> Vec<(MethodId, R)>
    where
        F: Fn(MethodId, &mut DexMethod) -> R + Sync + Send,
        R: Send,
    {
        let f = &f;
        let mut out: Vec<(MethodId, R)> = self
            .classes
            .par_iter_mut()
            .enumerate()
            .flat_map_iter(|(ci, class)| {
                let cid = ClassId::from_index(ci);
                class
                    .methods_mut()
                    .iter_mut()
                    .enumerate()
                    .map(|(i, m)| {
                        let id = MethodId::new(cid, i);
                        (id, f(id, m))
                    })
                    .collect::<Vec<_>>()
            })
            .collect();
        out.sort_by_key(|(id, _)| *id);
        out
    }
}

impl fmt::Debug for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scope")
            .field("classes", &self.classes.len())
            .field("stores", &self.stores)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::class::AccessFlags;

    fn scope_with(pool: &Arc<Pool>, types: &[&str]) -> Scope {
        let mut scope = Scope::new(Arc::clone(pool));
        let store = scope.add_store("classes");
        let dex = scope.add_dex(store).unwrap();
        let mut parent = pool.known().object;
        for desc in types {
            let ty = pool.intern_type(desc);
            scope
                .add_class(store, dex, DexClass::new(ty, AccessFlags::PUBLIC, Some(parent)))
                .unwrap();
            parent = ty;
        }
        scope
    }

    #[test]
    fn duplicate_class_is_rejected() {
        let pool = Arc::new(Pool::new());
        let mut scope = scope_with(&pool, &["LA;"]);
        let a = pool.intern_type("LA;");
        let err = scope
            .add_class(0, 0, DexClass::new(a, AccessFlags::PUBLIC, None))
            .unwrap_err();
        assert!(matches!(err, Error::DuplicateDefinition(ref d) if d == "LA;"));
        let b = DexClass::new(pool.intern_type("LB;"), AccessFlags::PUBLIC, None);
        assert!(scope.add_class(0, 7, b).is_err());
    }

    #[test]
    fn resolve_walks_super_chain() {
        let pool = Arc::new(Pool::new());
        let mut scope = scope_with(&pool, &["LA;", "LB;"]);
        let a = pool.intern_type("LA;");
        let b = pool.intern_type("LB;");
        let proto = pool.intern_proto(pool.known().void, &[]);
        let on_a = pool.intern_method(a, "run", proto);
        let a_id = scope.class_by_type(a).unwrap();
        scope
            .class_mut(a_id)
            .add_method(DexMethod::new(on_a, AccessFlags::PUBLIC, None))
            .unwrap();

        let via_b = pool.intern_method(b, "run", proto);
        assert_eq!(scope.resolve_method(via_b), Some(MethodId::new(a_id, 0)));
        assert_eq!(scope.method_def(via_b), None);
        let missing = pool.intern_method(b, "walk", proto);
        assert_eq!(scope.resolve_method(missing), None);
    }

    #[test]
    fn parallel_walk_is_ordered() {
        let pool = Arc::new(Pool::new());
        let mut scope = scope_with(&pool, &["LA;", "LB;", "LC;"]);
        let proto = pool.intern_proto(pool.known().void, &[]);
        for (cid, name) in [(0, "x"), (0, "y"), (2, "z")] {
            let owner = scope.class(ClassId::from_index(cid)).ty;
            let m = pool.intern_method(owner, name, proto);
            scope
                .class_mut(ClassId::from_index(cid))
                .add_method(DexMethod::new(m, AccessFlags::STATIC, None))
                .unwrap();
        }
        let ids: Vec<MethodId> = scope
            .par_walk_methods(|id, _| id)
            .into_iter()
            .map(|(_, r)| r)
            .collect();
        assert_eq!(ids, scope.method_ids());
        assert_eq!(ids.len(), 3);
    }
}
