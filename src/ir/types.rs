//! Descriptor-level helpers for type names.
//!
//! These operate on the raw descriptor strings; [`crate::ir::Pool`] exposes the same
//! predicates on [`crate::ir::TypeRef`] handles.

/// Coarse classification of a type descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TypeCategory {
    /// `V`
    Void,
    /// `Z`, `B`, `S`, `C`, `I`
    IntLike,
    /// `F`
    Float,
    /// `J`
    Long,
    /// `D`
    Double,
    /// `L...;` or `[...`
    Reference,
    /// Anything that is not a valid descriptor.
    Invalid,
}

impl TypeCategory {
    /// `true` for the two 64-bit categories.
    #[must_use]
    pub fn is_wide(self) -> bool {
        matches!(self, TypeCategory::Long | TypeCategory::Double)
    }
}

/// Classifies a descriptor.
#[must_use]
pub fn category(descriptor: &str) -> TypeCategory {
    match descriptor.as_bytes().first() {
        Some(b'V') if descriptor.len() == 1 => TypeCategory::Void,
        Some(b'Z' | b'B' | b'S' | b'C' | b'I') if descriptor.len() == 1 => TypeCategory::IntLike,
        Some(b'F') if descriptor.len() == 1 => TypeCategory::Float,
        Some(b'J') if descriptor.len() == 1 => TypeCategory::Long,
        Some(b'D') if descriptor.len() == 1 => TypeCategory::Double,
        Some(b'L') if descriptor.ends_with(';') && descriptor.len() > 2 => TypeCategory::Reference,
        Some(b'[') if descriptor.len() > 1 => TypeCategory::Reference,
        _ => TypeCategory::Invalid,
    }
}

/// `true` for `J` and `D`.
#[must_use]
pub fn is_wide(descriptor: &str) -> bool {
    category(descriptor).is_wide()
}

/// `true` for class and array descriptors.
#[must_use]
pub fn is_reference(descriptor: &str) -> bool {
    category(descriptor) == TypeCategory::Reference
}

/// `true` for the primitive descriptors, `V` excluded.
#[must_use]
pub fn is_primitive(descriptor: &str) -> bool {
    matches!(
        category(descriptor),
        TypeCategory::IntLike | TypeCategory::Float | TypeCategory::Long | TypeCategory::Double
    )
}

/// The shorty character of a descriptor: references collapse to `L`.
#[must_use]
pub fn shorty_char(descriptor: &str) -> char {
    match descriptor.as_bytes().first() {
        Some(b'[' | b'L') => 'L',
        Some(&c) => char::from(c),
        None => 'V',
    }
}

/// The element type of an array descriptor (all dimensions stripped).
#[must_use]
pub fn element_type(descriptor: &str) -> &str {
    descriptor.trim_start_matches('[')
}

/// The package prefix of a class descriptor including the trailing `/`, e.g.
/// `Lcom/example/` for `Lcom/example/Foo;`. Classes in the default package yield `L`;
/// primitives yield the empty string.
#[must_use]
pub fn package_name(descriptor: &str) -> &str {
    let element = element_type(descriptor);
    if !element.starts_with('L') {
        return "";
    }
    match element.rfind('/') {
        Some(slash) => &element[..=slash],
        None => "L",
    }
}

/// The simple name of a class descriptor: `Foo` for `Lcom/example/Foo;`.
#[must_use]
pub fn simple_name(descriptor: &str) -> &str {
    let element = element_type(descriptor);
    let trimmed = element
        .strip_prefix('L')
        .and_then(|s| s.strip_suffix(';'))
        .unwrap_or(element);
    match trimmed.rfind('/') {
        Some(slash) => &trimmed[slash + 1..],
        None => trimmed,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn categories() {
        assert_eq!(category("V"), TypeCategory::Void);
        assert_eq!(category("Z"), TypeCategory::IntLike);
        assert_eq!(category("J"), TypeCategory::Long);
        assert_eq!(category("[I"), TypeCategory::Reference);
        assert_eq!(category("LFoo;"), TypeCategory::Reference);
        assert_eq!(category("L;"), TypeCategory::Invalid);
        assert_eq!(category("II"), TypeCategory::Invalid);
        assert!(is_primitive("D"));
        assert!(!is_primitive("V"));
    }

    #[test]
    fn names() {
        assert_eq!(package_name("Lcom/example/Foo;"), "Lcom/example/");
        assert_eq!(package_name("[[Lcom/example/Foo;"), "Lcom/example/");
        assert_eq!(package_name("LFoo;"), "L");
        assert_eq!(package_name("I"), "");
        assert_eq!(simple_name("Lcom/example/Foo;"), "Foo");
        assert_eq!(shorty_char("[I"), 'L');
        assert_eq!(shorty_char("J"), 'J');
    }
}
