//! Where a helper lives.
//!
//! Hosts are tried in order: the callers' own class when they all share one, the
//! closest common superclass of the callers that can take the helper, and finally a
//! synthetic holder class next to the first caller. A host must be able to reference
//! everything the body touches and every caller must be able to reach it. Classes on
//! a class-initialisation cycle never take helpers, and no dex may grow past its
//! reference limits.

use rustc_hash::FxHashMap;

use crate::{
    analysis::ClinitCycles,
    ir::{
        scope::ClassLocation, AccessFlags, ClassId, DexClass, MethodId, Pool, Scope, TypeRef,
        TypeSystem,
    },
    opt::outliner::candidate::Fingerprint,
    pass::builtin::{DexLimits, RefCounts},
};

/// Prefix of every helper method name.
pub const HELPER_PREFIX: &str = "$outlined$";

/// Infix of synthetic holder class names.
const HOLDER_INFIX: &str = "$Outlined$";

/// The class a helper is added to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Host {
    /// A class already in scope.
    Existing(ClassId),
    /// A holder class planned by the [`Placer`], by index.
    Synthetic(usize),
}

/// A holder class to create.
#[derive(Debug, Clone)]
pub struct HolderClass {
    /// The class type.
    pub ty: TypeRef,
    /// Class next to which it is added.
    pub near: ClassId,
    /// Helpers planned into it.
    pub helpers: usize,
}

impl HolderClass {
    /// The definition to add to the scope.
    #[must_use]
    pub fn definition(&self, pool: &Pool) -> DexClass {
        DexClass::new(
            self.ty,
            AccessFlags::PUBLIC | AccessFlags::FINAL | AccessFlags::SYNTHETIC,
            Some(pool.known().object),
        )
    }
}

/// Why no host was found.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rejection {
    /// The body references something no candidate host may access.
    Inaccessible,
    /// Every accessible host would push a dex over its reference limits.
    DexLimits,
}

/// References of one dex plus the helpers planned into it.
#[derive(Debug, Default)]
struct DexBudget {
    refs: RefCounts,
    helpers: usize,
}

/// Assigns hosts to helpers and keeps per-class helper counts.
pub struct Placer<'a> {
    scope: &'a Scope,
    types: &'a TypeSystem,
    cycles: &'a ClinitCycles,
    limit: usize,
    counts: FxHashMap<ClassId, usize>,
    holders: Vec<HolderClass>,
    open: FxHashMap<(String, ClassLocation), usize>,
    dex_limits: DexLimits,
    budgets: FxHashMap<ClassLocation, DexBudget>,
    over_limits: bool,
}

impl<'a> Placer<'a> {
    /// A placer over `scope`. Helpers already present count against `limit`.
    #[must_use]
    pub fn new(
        scope: &'a Scope,
        types: &'a TypeSystem,
        cycles: &'a ClinitCycles,
        limit: usize,
    ) -> Self {
        let pool = scope.pool();
        let mut counts = FxHashMap::default();
        for (id, class) in scope.classes() {
            let n = class
                .methods()
                .iter()
                .filter(|m| pool.method_name(m.method).starts_with(HELPER_PREFIX))
                .count();
            if n > 0 {
                counts.insert(id, n);
            }
        }
        let mut budgets = FxHashMap::default();
        for (store_index, store) in scope.stores().iter().enumerate() {
            for (dex, classes) in store.dexes.iter().enumerate() {
                let location = ClassLocation {
                    store: store_index,
                    dex,
                };
                let budget = DexBudget {
                    refs: RefCounts::collect(scope, classes),
                    helpers: 0,
                };
                budgets.insert(location, budget);
            }
        }
        Placer {
            scope,
            types,
            cycles,
            limit,
            counts,
            holders: Vec::new(),
            open: FxHashMap::default(),
            dex_limits: DexLimits::default(),
            budgets,
            over_limits: false,
        }
    }

    /// Uses `limits` instead of the default dex reference limits.
    #[must_use]
    pub fn with_dex_limits(mut self, limits: DexLimits) -> Self {
        self.dex_limits = limits;
        self
    }

    /// Planned holder classes.
    #[must_use]
    pub fn holders(&self) -> &[HolderClass] {
        &self.holders
    }

    /// Consumes the placer, returning the holder classes to create.
    #[must_use]
    pub fn into_holders(self) -> Vec<HolderClass> {
        self.holders
    }

    /// The type of `host`.
    #[must_use]
    pub fn host_type(&self, host: Host) -> TypeRef {
        match host {
            Host::Existing(id) => self.scope.class(id).ty,
            Host::Synthetic(i) => self.holders[i].ty,
        }
    }

    /// Chooses a host for a helper with `fingerprint` and prototype types `sig`
    /// called from `callers`. `dex` pins the host to one dex when helpers may not be
    /// shared across dexes.
    ///
    /// # Errors
    ///
    /// Returns [`Rejection::Inaccessible`] when the body cannot be hosted anywhere, or
    /// [`Rejection::DexLimits`] when the only accessible hosts sit in a full dex.
    pub fn place(
        &mut self,
        fingerprint: &Fingerprint,
        sig: &[TypeRef],
        callers: &[MethodId],
        dex: Option<ClassLocation>,
    ) -> Result<Host, Rejection> {
        self.over_limits = false;
        let Some(first) = callers.first() else {
            return Err(Rejection::Inaccessible);
        };
        let caller_types: Vec<TypeRef> = callers
            .iter()
            .map(|m| self.scope.class(m.class).ty)
            .collect();

        if callers.iter().all(|m| m.class == first.class)
            && self.usable(first.class, dex)
            && self.hosts(caller_types[0], fingerprint, sig)
            && self.fits(first.class, caller_types[0], fingerprint, sig, callers)
        {
            return Ok(self.claim(Host::Existing(first.class), fingerprint, sig, callers));
        }

        let object = self.scope.pool().known().object;
        let common = caller_types
            .iter()
            .skip(1)
            .fold(caller_types[0], |acc, &t| self.types.common_supertype(acc, t));
        for ty in self.types.super_chain(common) {
            if ty == object {
                break;
            }
            let Some(id) = self.scope.class_by_type(ty) else {
                break;
            };
            let reachable = caller_types
                .iter()
                .all(|&c| self.types.can_access_class(c, ty));
            if !self.types.is_final(ty)
                && reachable
                && self.usable(id, dex)
                && self.hosts(ty, fingerprint, sig)
                && self.fits(id, ty, fingerprint, sig, callers)
            {
                return Ok(self.claim(Host::Existing(id), fingerprint, sig, callers));
            }
        }

        match self.holder_for(first.class, fingerprint, sig, callers) {
            Ok(host) => Ok(self.claim(host, fingerprint, sig, callers)),
            Err(Rejection::Inaccessible) if self.over_limits => Err(Rejection::DexLimits),
            Err(e) => Err(e),
        }
    }

    fn claim(
        &mut self,
        host: Host,
        fingerprint: &Fingerprint,
        sig: &[TypeRef],
        callers: &[MethodId],
    ) -> Host {
        let (near, ty) = match host {
            Host::Existing(id) => {
                *self.counts.entry(id).or_default() += 1;
                (id, self.scope.class(id).ty)
            }
            Host::Synthetic(i) => {
                self.holders[i].helpers += 1;
                (self.holders[i].near, self.holders[i].ty)
            }
        };
        for (location, added) in self.added_refs(near, ty, fingerprint, sig, callers) {
            let budget = self.budgets.entry(location).or_default();
            budget.refs.extend(&added);
            budget.helpers += 1;
        }
        host
    }

    /// References a helper in `host` (a class of the dex of `near`) adds to each dex:
    /// its body and prototype where it lives, and its owner where it is called.
    fn added_refs(
        &self,
        near: ClassId,
        host: TypeRef,
        fingerprint: &Fingerprint,
        sig: &[TypeRef],
        callers: &[MethodId],
    ) -> Vec<(ClassLocation, RefCounts)> {
        let pool = self.scope.pool();
        let home = self.scope.location(near);
        let mut body = RefCounts::default();
        body.types.insert(host);
        body.types.insert(pool.known().object);
        body.types.extend(sig.iter().copied());
        for insn in &fingerprint.insns {
            body.add_insn(pool, insn);
        }
        let mut added = vec![(home, body)];
        for caller in callers {
            let location = self.scope.location(caller.class);
            if added.iter().all(|(l, _)| *l != location) {
                let mut call = RefCounts::default();
                call.types.insert(host);
                added.push((location, call));
            }
        }
        added
    }

    /// `true` if every dex involved stays within its limits with one more helper in
    /// `host`. Remembers a refusal for [`Rejection::DexLimits`].
    fn fits(
        &mut self,
        near: ClassId,
        host: TypeRef,
        fingerprint: &Fingerprint,
        sig: &[TypeRef],
        callers: &[MethodId],
    ) -> bool {
        let fits = self
            .added_refs(near, host, fingerprint, sig, callers)
            .iter()
            .all(|(location, added)| {
                let Some(budget) = self.budgets.get(location) else {
                    return true;
                };
                budget
                    .refs
                    .over(added, budget.helpers + 1, &self.dex_limits)
                    .is_none()
            });
        self.over_limits |= !fits;
        fits
    }

    /// `true` if class `id` may take another helper.
    fn usable(&self, id: ClassId, dex: Option<ClassLocation>) -> bool {
        let class = self.scope.class(id);
        !class.is_interface()
            && !self.cycles.contains(class.ty)
            && self.counts.get(&id).copied().unwrap_or(0) < self.limit
            && dex.map_or(true, |d| self.scope.location(id) == d)
    }

    /// `true` if a helper in `host` can reference everything `fingerprint` and the
    /// prototype name.
    fn hosts(&self, host: TypeRef, fingerprint: &Fingerprint, sig: &[TypeRef]) -> bool {
        let ts = self.types;
        sig.iter().all(|&t| ts.can_access_class(host, t))
            && fingerprint.insns.iter().all(|insn| {
                insn.type_ref().map_or(true, |t| ts.can_access_class(host, t))
                    && insn.field().map_or(true, |f| ts.can_access_field(host, f))
                    && insn.method().map_or(true, |m| ts.can_access_method(host, m))
            })
    }

    /// An open holder class in the package and dex of `near`, created on demand.
    fn holder_for(
        &mut self,
        near: ClassId,
        fingerprint: &Fingerprint,
        sig: &[TypeRef],
        callers: &[MethodId],
    ) -> Result<Host, Rejection> {
        let pool = self.scope.pool();
        let near_ty = self.scope.class(near).ty;
        let package = pool.package_of(near_ty).to_owned();
        let location = self.scope.location(near);
        let key = (package.clone(), location);

        if let Some(&i) = self.open.get(&key) {
            if self.holders[i].helpers < self.limit {
                let ty = self.holders[i].ty;
                if !self.hosts(ty, fingerprint, sig) {
                    return Err(Rejection::Inaccessible);
                }
                return if self.fits(near, ty, fingerprint, sig, callers) {
                    Ok(Host::Synthetic(i))
                } else {
                    Err(Rejection::DexLimits)
                };
            }
        }

        let ty = (0..)
            .map(|n| format!("{package}{HOLDER_INFIX}{n};"))
            .find(|name| {
                let taken = pool.get_type(name).is_some_and(|t| {
                    self.scope.is_internal(t) || self.holders.iter().any(|h| h.ty == t)
                });
                !taken
            })
            .map(|name| pool.intern_type(&name))
            .ok_or(Rejection::Inaccessible)?;
        if !self.hosts(ty, fingerprint, sig) {
            return Err(Rejection::Inaccessible);
        }
        if !self.fits(near, ty, fingerprint, sig, callers) {
            return Err(Rejection::DexLimits);
        }
        self.holders.push(HolderClass {
            ty,
            near,
            helpers: 0,
        });
        let index = self.holders.len() - 1;
        self.open.insert(key, index);
        log::debug!("planned holder class {}", pool.type_descriptor(ty));
        Ok(Host::Synthetic(index))
    }
}
