//! Class, field and method definitions.
//!
//! A reference ([`TypeRef`], [`FieldRef`], [`MethodRef`]) may or may not have a
//! definition. Definitions exist only for *internal* classes, the ones being optimized;
//! everything else is external and known only by its references.

use bitflags::bitflags;

use crate::{
    ir::{code::IrCode, FieldRef, MethodHandleRef, MethodRef, ProtoRef, StringRef, TypeRef},
    Error, Result,
};

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    /// Access flags of classes, fields and methods.
    pub struct AccessFlags : u32 {
        /// Visible everywhere
        const PUBLIC = 0x0001;
        /// Visible only to the defining class
        const PRIVATE = 0x0002;
        /// Visible to the package and subclasses
        const PROTECTED = 0x0004;
        /// Not bound to an instance
        const STATIC = 0x0008;
        /// Not subclassable / not overridable / not assignable after construction
        const FINAL = 0x0010;
        /// Method acquires the receiver's monitor
        const SYNCHRONIZED = 0x0020;
        /// Field is volatile
        const VOLATILE = 0x0040;
        /// Compiler-generated bridge method
        const BRIDGE = 0x0040;
        /// Field is not serialized
        const TRANSIENT = 0x0080;
        /// Method takes a variable number of arguments
        const VARARGS = 0x0080;
        /// Method is implemented natively
        const NATIVE = 0x0100;
        /// Class is an interface
        const INTERFACE = 0x0200;
        /// Class or method is abstract
        const ABSTRACT = 0x0400;
        /// Strict floating point
        const STRICT = 0x0800;
        /// Not present in source
        const SYNTHETIC = 0x1000;
        /// Class is an annotation type
        const ANNOTATION = 0x2000;
        /// Class or field is an enum (constant)
        const ENUM = 0x4000;
        /// Method is a constructor
        const CONSTRUCTOR = 0x1_0000;
        /// Method is declared `synchronized`
        const DECLARED_SYNCHRONIZED = 0x2_0000;
    }
}

impl AccessFlags {
    /// `true` if neither public, private nor protected.
    #[must_use]
    pub fn is_package_private(self) -> bool {
        !self.intersects(AccessFlags::PUBLIC | AccessFlags::PRIVATE | AccessFlags::PROTECTED)
    }
}

/// Retention of an annotation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AnnotationVisibility {
    /// Visible at build time only.
    Build,
    /// Visible at runtime.
    Runtime,
    /// Used by the runtime itself.
    System,
}

/// An annotation instance.
#[derive(Debug, Clone, PartialEq)]
pub struct Annotation {
    /// Retention.
    pub visibility: AnnotationVisibility,
    /// Annotation type.
    pub ty: TypeRef,
    /// Name/value pairs.
    pub elements: Vec<(StringRef, EncodedValue)>,
}

/// A constant value as stored in static initializers and annotations.
#[derive(Debug, Clone, PartialEq)]
#[allow(missing_docs)]
pub enum EncodedValue {
    Byte(i8),
    Short(i16),
    Char(u16),
    Int(i32),
    Long(i64),
    Float(f32),
    Double(f64),
    MethodType(ProtoRef),
    MethodHandle(MethodHandleRef),
    String(StringRef),
    Type(TypeRef),
    Field(FieldRef),
    Method(MethodRef),
    Enum(FieldRef),
    Array(Vec<EncodedValue>),
    Annotation(Box<Annotation>),
    Null,
    Boolean(bool),
}

/// A field definition.
#[derive(Debug, Clone, PartialEq)]
pub struct DexField {
    /// The field this defines.
    pub field: FieldRef,
    /// Access flags.
    pub access: AccessFlags,
    /// Initial value of a static field.
    pub static_value: Option<EncodedValue>,
    /// Annotations.
    pub annotations: Vec<Annotation>,
}

impl DexField {
    /// A definition without initial value or annotations.
    #[must_use]
    pub fn new(field: FieldRef, access: AccessFlags) -> Self {
        DexField {
            field,
            access,
            static_value: None,
            annotations: Vec::new(),
        }
    }

    /// `true` for static fields.
    #[must_use]
    pub fn is_static(&self) -> bool {
        self.access.contains(AccessFlags::STATIC)
    }
}

/// A method definition.
#[derive(Debug)]
pub struct DexMethod {
    /// The method this defines.
    pub method: MethodRef,
    /// Access flags.
    pub access: AccessFlags,
    /// Body; `None` for abstract and native methods.
    pub code: Option<IrCode>,
    /// Annotations.
    pub annotations: Vec<Annotation>,
    /// Parameter annotations by parameter index.
    pub param_annotations: Vec<(u32, Vec<Annotation>)>,
}

impl DexMethod {
    /// A definition with an optional body and no annotations.
    #[must_use]
    pub fn new(method: MethodRef, access: AccessFlags, code: Option<IrCode>) -> Self {
        DexMethod {
            method,
            access,
            code,
            annotations: Vec::new(),
            param_annotations: Vec::new(),
        }
    }

    /// `true` for static methods.
    #[must_use]
    pub fn is_static(&self) -> bool {
        self.access.contains(AccessFlags::STATIC)
    }

    /// `true` for methods dispatched directly: static, private and constructors.
    #[must_use]
    pub fn is_direct(&self) -> bool {
        self.access
            .intersects(AccessFlags::STATIC | AccessFlags::PRIVATE | AccessFlags::CONSTRUCTOR)
    }

    /// `true` for virtual methods.
    #[must_use]
    pub fn is_virtual(&self) -> bool {
        !self.is_direct()
    }
}

/// A class definition.
#[derive(Debug)]
pub struct DexClass {
    /// The class this defines.
    pub ty: TypeRef,
    /// Access flags.
    pub access: AccessFlags,
    /// Superclass (`None` only for `java.lang.Object`).
    pub super_class: Option<TypeRef>,
    /// Implemented interfaces.
    pub interfaces: crate::utils::CompactVec<TypeRef>,
    /// Source file name.
    pub source_file: Option<StringRef>,
    /// Annotations.
    pub annotations: Vec<Annotation>,
    fields: Vec<DexField>,
    methods: Vec<DexMethod>,
}

impl DexClass {
    /// An empty class.
    #[must_use]
    pub fn new(ty: TypeRef, access: AccessFlags, super_class: Option<TypeRef>) -> Self {
        DexClass {
            ty,
            access,
            super_class,
            interfaces: crate::utils::CompactVec::new(),
            source_file: None,
            annotations: Vec::new(),
            fields: Vec::new(),
            methods: Vec::new(),
        }
    }

    /// `true` for interfaces.
    #[must_use]
    pub fn is_interface(&self) -> bool {
        self.access.contains(AccessFlags::INTERFACE)
    }

    /// `true` for final classes.
    #[must_use]
    pub fn is_final(&self) -> bool {
        self.access.contains(AccessFlags::FINAL)
    }

    /// All field definitions, static and instance.
    #[must_use]
    pub fn fields(&self) -> &[DexField] {
        &self.fields
    }

    /// Static fields.
    pub fn sfields(&self) -> impl Iterator<Item = &DexField> {
        self.fields.iter().filter(|f| f.is_static())
    }

    /// Instance fields.
    pub fn ifields(&self) -> impl Iterator<Item = &DexField> {
        self.fields.iter().filter(|f| !f.is_static())
    }

    /// All method definitions in definition order. Indices into this slice are stable:
    /// new methods are only ever appended.
    #[must_use]
    pub fn methods(&self) -> &[DexMethod] {
        &self.methods
    }

    /// Mutable access to all method definitions.
    pub fn methods_mut(&mut self) -> &mut [DexMethod] {
        &mut self.methods
    }

    /// Direct methods (static, private, constructors).
    pub fn dmethods(&self) -> impl Iterator<Item = &DexMethod> {
        self.methods.iter().filter(|m| m.is_direct())
    }

    /// Virtual methods.
    pub fn vmethods(&self) -> impl Iterator<Item = &DexMethod> {
        self.methods.iter().filter(|m| m.is_virtual())
    }

    /// Index of the definition of `method`.
    #[must_use]
    pub fn find_method(&self, method: MethodRef) -> Option<usize> {
        self.methods.iter().position(|m| m.method == method)
    }

    /// The definition of `field`.
    #[must_use]
    pub fn find_field(&self, field: FieldRef) -> Option<&DexField> {
        self.fields.iter().find(|f| f.field == field)
    }

    /// Adds a method definition and returns its index.
    ///
    /// # Errors
    ///
    /// Returns [`Error::DuplicateDefinition`] if the method is already defined here.
    pub fn add_method(&mut self, method: DexMethod) -> Result<usize> {
        if self.find_method(method.method).is_some() {
            return Err(Error::DuplicateDefinition(format!("{:?}", method.method)));
        }
        self.methods.push(method);
        Ok(self.methods.len() - 1)
    }

    /// Adds a field definition.
    ///
    /// # Errors
    ///
    /// Returns [`Error::DuplicateDefinition`] if the field is already defined here.
    pub fn add_field(&mut self, field: DexField) -> Result<()> {
        if self.find_field(field.field).is_some() {
            return Err(Error::DuplicateDefinition(format!("{:?}", field.field)));
        }
        self.fields.push(field);
        Ok(())
    }

    /// `true` if the class has a static initializer with a body.
    #[must_use]
    pub fn has_clinit(&self, pool: &crate::ir::Pool) -> bool {
        self.methods
            .iter()
            .any(|m| m.code.is_some() && pool.is_clinit(m.method))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::Pool;

    #[test]
    fn duplicate_definitions_are_rejected() {
        let pool = Pool::new();
        let k = *pool.known();
        let foo = pool.intern_type("LFoo;");
        let proto = pool.intern_proto(k.void, &[]);
        let m = pool.intern_method(foo, "run", proto);
        let mut class = DexClass::new(foo, AccessFlags::PUBLIC, Some(k.object));
        assert_eq!(
            class
                .add_method(DexMethod::new(m, AccessFlags::PUBLIC, None))
                .ok(),
            Some(0)
        );
        assert!(matches!(
            class.add_method(DexMethod::new(m, AccessFlags::PUBLIC, None)),
            Err(Error::DuplicateDefinition(_))
        ));
        assert_eq!(class.vmethods().count(), 1);
        assert_eq!(class.dmethods().count(), 0);
    }

    #[test]
    fn package_private() {
        assert!(AccessFlags::STATIC.is_package_private());
        assert!(!(AccessFlags::PUBLIC | AccessFlags::STATIC).is_package_private());
    }
}
