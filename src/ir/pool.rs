//! The interning pool for strings, types, prototypes, field and method references.
//!
//! Every reference an instruction or definition carries is a small `Copy` handle into a
//! [`Pool`]. Interning the same value twice yields the same handle, so handle equality is
//! value equality and the hot paths of the optimizer never compare strings.
//!
//! # Architecture
//!
//! Each reference kind lives in its own append-only [`boxcar::Vec`] arena, which gives
//! lock-free reads through `&Pool`. A [`dashmap::DashMap`] per kind maps the interned value
//! to its handle. Insertions go through the map's entry API, so `intern(x)` is
//! linearizable: concurrent callers with equal inputs race on one shard lock and all of
//! them observe the single handle the winner allocated.
//!
//! The pool is explicitly threaded: a [`crate::ir::Scope`] owns an `Arc<Pool>` and every
//! component that needs to intern receives it from there. Tests create a fresh pool per
//! case.
//!
//! # Example
//!
//! ```rust
//! use dexopt::ir::Pool;
//!
//! let pool = Pool::new();
//! let a = pool.intern_type("Lcom/example/Foo;");
//! let b = pool.intern_type("Lcom/example/Foo;");
//! assert_eq!(a, b);
//! assert_eq!(pool.type_descriptor(a), "Lcom/example/Foo;");
//! ```

use std::fmt;

use dashmap::DashMap;

use crate::{
    ir::types::{self, TypeCategory},
    utils::mutf8,
};

define_handle!(
    /// An interned string constant (MUTF-8 bytes).
    StringRef, "s"
);
define_handle!(
    /// An interned type descriptor (`I`, `Ljava/lang/Object;`, `[J`, ...).
    TypeRef, "t"
);
define_handle!(
    /// An interned method prototype: return type plus ordered parameter types.
    ProtoRef, "p"
);
define_handle!(
    /// An interned field reference: owner, name and type.
    FieldRef, "f"
);
define_handle!(
    /// An interned method reference: owner, name and prototype.
    MethodRef, "m"
);
define_handle!(
    /// An index into the container's call-site table (passed through untouched).
    CallSiteRef, "cs"
);
define_handle!(
    /// An index into the container's method-handle table (passed through untouched).
    MethodHandleRef, "mh"
);

/// A stored string: the canonical MUTF-8 bytes and the decoded text.
struct PooledString {
    bytes: Box<[u8]>,
    text: Box<str>,
}

/// The data behind a [`ProtoRef`].
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ProtoData {
    /// Return type.
    pub rtype: TypeRef,
    /// Parameter types, in declaration order.
    pub args: Box<[TypeRef]>,
}

/// The data behind a [`FieldRef`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FieldData {
    /// Declaring (or referencing) class.
    pub owner: TypeRef,
    /// Field name.
    pub name: StringRef,
    /// Field type.
    pub ty: TypeRef,
}

/// The data behind a [`MethodRef`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MethodData {
    /// Declaring (or referencing) class.
    pub owner: TypeRef,
    /// Method name.
    pub name: StringRef,
    /// Prototype.
    pub proto: ProtoRef,
}

/// Handles of types every pass needs, interned when the pool is created.
#[derive(Debug, Clone, Copy)]
#[allow(missing_docs)]
pub struct KnownTypes {
    pub void: TypeRef,
    pub boolean: TypeRef,
    pub byte: TypeRef,
    pub short: TypeRef,
    pub char: TypeRef,
    pub int: TypeRef,
    pub long: TypeRef,
    pub float: TypeRef,
    pub double: TypeRef,
    pub object: TypeRef,
    pub string: TypeRef,
    pub class: TypeRef,
    pub throwable: TypeRef,
    pub cloneable: TypeRef,
    pub serializable: TypeRef,
    pub method_handle: TypeRef,
    pub method_type: TypeRef,
}

/// The interning pool. See the [module documentation](self).
pub struct Pool {
    strings: boxcar::Vec<PooledString>,
    string_ids: DashMap<Box<[u8]>, StringRef>,
    types: boxcar::Vec<StringRef>,
    type_ids: DashMap<StringRef, TypeRef>,
    protos: boxcar::Vec<ProtoData>,
    proto_ids: DashMap<ProtoData, ProtoRef>,
    fields: boxcar::Vec<FieldData>,
    field_ids: DashMap<FieldData, FieldRef>,
    methods: boxcar::Vec<MethodData>,
    method_ids: DashMap<MethodData, MethodRef>,
    known: KnownTypes,
}

impl Pool {
    /// Creates a pool with the [`KnownTypes`] pre-interned.
    #[must_use]
    pub fn new() -> Self {
        let mut pool = Pool {
            strings: boxcar::Vec::new(),
            string_ids: DashMap::new(),
            types: boxcar::Vec::new(),
            type_ids: DashMap::new(),
            protos: boxcar::Vec::new(),
            proto_ids: DashMap::new(),
            fields: boxcar::Vec::new(),
            field_ids: DashMap::new(),
            methods: boxcar::Vec::new(),
            method_ids: DashMap::new(),
            known: KnownTypes {
                void: TypeRef(0),
                boolean: TypeRef(0),
                byte: TypeRef(0),
                short: TypeRef(0),
                char: TypeRef(0),
                int: TypeRef(0),
                long: TypeRef(0),
                float: TypeRef(0),
                double: TypeRef(0),
                object: TypeRef(0),
                string: TypeRef(0),
                class: TypeRef(0),
                throwable: TypeRef(0),
                cloneable: TypeRef(0),
                serializable: TypeRef(0),
                method_handle: TypeRef(0),
                method_type: TypeRef(0),
            },
        };
        pool.known = KnownTypes {
            void: pool.intern_type("V"),
            boolean: pool.intern_type("Z"),
            byte: pool.intern_type("B"),
            short: pool.intern_type("S"),
            char: pool.intern_type("C"),
            int: pool.intern_type("I"),
            long: pool.intern_type("J"),
            float: pool.intern_type("F"),
            double: pool.intern_type("D"),
            object: pool.intern_type("Ljava/lang/Object;"),
            string: pool.intern_type("Ljava/lang/String;"),
            class: pool.intern_type("Ljava/lang/Class;"),
            throwable: pool.intern_type("Ljava/lang/Throwable;"),
            cloneable: pool.intern_type("Ljava/lang/Cloneable;"),
            serializable: pool.intern_type("Ljava/io/Serializable;"),
            method_handle: pool.intern_type("Ljava/lang/invoke/MethodHandle;"),
            method_type: pool.intern_type("Ljava/lang/invoke/MethodType;"),
        };
        pool
    }

    /// The well-known types.
    #[must_use]
    pub fn known(&self) -> &KnownTypes {
        &self.known
    }

    // ---- strings -------------------------------------------------------------------

    /// Interns a Rust string (stored as its MUTF-8 encoding).
    pub fn intern_string(&self, text: &str) -> StringRef {
        let bytes = mutf8::encode(text);
        intern_into!(
            self.string_ids,
            self.strings,
            bytes.clone().into_boxed_slice(),
            StringRef,
            PooledString {
                bytes: bytes.into_boxed_slice(),
                text: text.into(),
            }
        )
    }

    /// Interns raw MUTF-8 bytes, which may hold unpaired surrogates.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Malformed`] if `bytes` is not valid MUTF-8.
    pub fn intern_string_mutf8(&self, bytes: &[u8]) -> crate::Result<StringRef> {
        let units = mutf8::decode_utf16(bytes)?;
        let text = String::from_utf16_lossy(&units);
        Ok(intern_into!(
            self.string_ids,
            self.strings,
            Box::<[u8]>::from(bytes),
            StringRef,
            PooledString {
                bytes: bytes.into(),
                text: text.into_boxed_str(),
            }
        ))
    }

    /// Looks up a string without interning it.
    #[must_use]
    pub fn get_string(&self, text: &str) -> Option<StringRef> {
        let bytes = mutf8::encode(text);
        self.string_ids.get(bytes.as_slice()).map(|r| *r)
    }

    /// The decoded text of a string. Unpaired surrogates are shown as U+FFFD; use
    /// [`Pool::string_bytes`] for the lossless form.
    #[must_use]
    pub fn str(&self, s: StringRef) -> &str {
        &self.strings[s.index()].text
    }

    /// The canonical MUTF-8 bytes of a string.
    #[must_use]
    pub fn string_bytes(&self, s: StringRef) -> &[u8] {
        &self.strings[s.index()].bytes
    }

    /// Number of interned strings.
    #[must_use]
    pub fn string_count(&self) -> usize {
        self.strings.count()
    }

    // ---- types ---------------------------------------------------------------------

    /// Interns a type descriptor.
    pub fn intern_type(&self, descriptor: &str) -> TypeRef {
        let name = self.intern_string(descriptor);
        intern_into!(self.type_ids, self.types, name, TypeRef, name)
    }

    /// Looks up a type without interning it.
    #[must_use]
    pub fn get_type(&self, descriptor: &str) -> Option<TypeRef> {
        let name = self.get_string(descriptor)?;
        self.type_ids.get(&name).map(|r| *r)
    }

    /// The descriptor of a type.
    #[must_use]
    pub fn type_descriptor(&self, t: TypeRef) -> &str {
        self.str(self.types[t.index()])
    }

    /// The descriptor string handle of a type.
    #[must_use]
    pub fn type_name(&self, t: TypeRef) -> StringRef {
        self.types[t.index()]
    }

    /// Number of interned types.
    #[must_use]
    pub fn type_count(&self) -> usize {
        self.types.count()
    }

    /// Category of a type.
    #[must_use]
    pub fn category(&self, t: TypeRef) -> TypeCategory {
        types::category(self.type_descriptor(t))
    }

    /// `true` for `J` and `D`.
    #[must_use]
    pub fn is_wide(&self, t: TypeRef) -> bool {
        types::is_wide(self.type_descriptor(t))
    }

    /// `true` for class and array types.
    #[must_use]
    pub fn is_reference(&self, t: TypeRef) -> bool {
        types::is_reference(self.type_descriptor(t))
    }

    /// `true` for array types.
    #[must_use]
    pub fn is_array(&self, t: TypeRef) -> bool {
        self.type_descriptor(t).starts_with('[')
    }

    /// The component type of an array type.
    #[must_use]
    pub fn array_component(&self, t: TypeRef) -> Option<TypeRef> {
        let desc = self.type_descriptor(t);
        desc.strip_prefix('[').map(|c| self.intern_type(c))
    }

    /// The array type with component `t`.
    pub fn make_array(&self, t: TypeRef) -> TypeRef {
        let desc = format!("[{}", self.type_descriptor(t));
        self.intern_type(&desc)
    }

    /// The package prefix of a class type, e.g. `Lcom/example/` for
    /// `Lcom/example/Foo;`. Arrays report the package of their element type.
    #[must_use]
    pub fn package_of(&self, t: TypeRef) -> &str {
        types::package_name(self.type_descriptor(t))
    }

    // ---- prototypes ----------------------------------------------------------------

    /// Interns a prototype.
    pub fn intern_proto(&self, rtype: TypeRef, args: &[TypeRef]) -> ProtoRef {
        let data = ProtoData {
            rtype,
            args: args.into(),
        };
        intern_into!(self.proto_ids, self.protos, data.clone(), ProtoRef, data)
    }

    /// The data behind a prototype.
    #[must_use]
    pub fn proto(&self, p: ProtoRef) -> &ProtoData {
        &self.protos[p.index()]
    }

    /// The shorty descriptor of a prototype (`VIL` for `(ILjava/lang/Object;)V`).
    #[must_use]
    pub fn shorty(&self, p: ProtoRef) -> String {
        let proto = self.proto(p);
        std::iter::once(proto.rtype)
            .chain(proto.args.iter().copied())
            .map(|t| types::shorty_char(self.type_descriptor(t)))
            .collect()
    }

    /// Number of 32-bit argument words the parameters of `p` occupy (without `this`).
    #[must_use]
    pub fn arg_words(&self, p: ProtoRef) -> usize {
        self.proto(p)
            .args
            .iter()
            .map(|&t| if self.is_wide(t) { 2 } else { 1 })
            .sum()
    }

    // ---- fields and methods --------------------------------------------------------

    /// Interns a field reference.
    pub fn intern_field(&self, owner: TypeRef, name: &str, ty: TypeRef) -> FieldRef {
        let data = FieldData {
            owner,
            name: self.intern_string(name),
            ty,
        };
        intern_into!(self.field_ids, self.fields, data, FieldRef, data)
    }

    /// The data behind a field reference.
    #[must_use]
    pub fn field(&self, f: FieldRef) -> &FieldData {
        &self.fields[f.index()]
    }

    /// Number of interned field references.
    #[must_use]
    pub fn field_count(&self) -> usize {
        self.fields.count()
    }

    /// Interns a method reference.
    pub fn intern_method(&self, owner: TypeRef, name: &str, proto: ProtoRef) -> MethodRef {
        let data = MethodData {
            owner,
            name: self.intern_string(name),
            proto,
        };
        intern_into!(self.method_ids, self.methods, data, MethodRef, data)
    }

    /// Looks up a method reference without interning it.
    #[must_use]
    pub fn get_method(&self, owner: TypeRef, name: &str, proto: ProtoRef) -> Option<MethodRef> {
        let data = MethodData {
            owner,
            name: self.get_string(name)?,
            proto,
        };
        self.method_ids.get(&data).map(|r| *r)
    }

    /// The data behind a method reference.
    #[must_use]
    pub fn method(&self, m: MethodRef) -> &MethodData {
        &self.methods[m.index()]
    }

    /// Number of interned method references.
    #[must_use]
    pub fn method_count(&self) -> usize {
        self.methods.count()
    }

    /// Name of a method.
    #[must_use]
    pub fn method_name(&self, m: MethodRef) -> &str {
        self.str(self.method(m).name)
    }

    /// `true` for instance and static initializers.
    #[must_use]
    pub fn is_init(&self, m: MethodRef) -> bool {
        self.method_name(m) == "<init>"
    }

    /// `true` for static initializers.
    #[must_use]
    pub fn is_clinit(&self, m: MethodRef) -> bool {
        self.method_name(m) == "<clinit>"
    }

    // ---- display -------------------------------------------------------------------

    /// Formats a prototype as a descriptor: `(ILjava/lang/String;)V`.
    #[must_use]
    pub fn show_proto(&self, p: ProtoRef) -> String {
        let proto = self.proto(p);
        let mut out = String::from("(");
        for &arg in proto.args.iter() {
            out.push_str(self.type_descriptor(arg));
        }
        out.push(')');
        out.push_str(self.type_descriptor(proto.rtype));
        out
    }

    /// Formats a field reference: `LFoo;.bar:I`.
    #[must_use]
    pub fn show_field(&self, f: FieldRef) -> String {
        let field = self.field(f);
        format!(
            "{}.{}:{}",
            self.type_descriptor(field.owner),
            self.str(field.name),
            self.type_descriptor(field.ty)
        )
    }

    /// Formats a method reference: `LFoo;.bar:(I)V`.
    #[must_use]
    pub fn show_method(&self, m: MethodRef) -> String {
        let method = self.method(m);
        format!(
            "{}.{}:{}",
            self.type_descriptor(method.owner),
            self.str(method.name),
            self.show_proto(method.proto)
        )
    }
}

impl Default for Pool {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Pool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pool")
            .field("strings", &self.strings.count())
            .field("types", &self.types.count())
            .field("protos", &self.protos.count())
            .field("fields", &self.fields.count())
            .field("methods", &self.methods.count())
            .finish()
    }
}
