/// Declares a `Copy` index handle with the crate's standard set of derives and helpers.
///
/// Handles compare by index, so two handles into the same arena are equal exactly when
/// they refer to the same slot. The `Debug` and `Display` forms print `prefix` followed
/// by the index, which keeps dumps of CFGs and pools short.
///
/// ```rust, ignore
///  define_handle!(
///      /// A basic block.
///      BlockId, "B"
///  );
///  let b = BlockId::from_index(3);
///  assert_eq!(b.to_string(), "B3");
/// ```
macro_rules! define_handle {
    ($(#[$meta:meta])* $name:ident, $prefix:literal) => {
        $(#[$meta])*
        #[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
        pub struct $name(pub(crate) u32);

        impl $name {
            /// The raw arena index.
            #[must_use]
            #[inline]
            pub const fn index(self) -> usize {
                self.0 as usize
            }

            /// Creates a handle from a raw arena index.
            #[must_use]
            #[inline]
            #[allow(clippy::cast_possible_truncation)]
            pub const fn from_index(index: usize) -> Self {
                $name(index as u32)
            }
        }

        impl std::fmt::Debug for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, concat!($prefix, "{}"), self.0)
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, concat!($prefix, "{}"), self.0)
            }
        }
    };
}

/// Interns `$value` into an append-only arena, deduplicating through a `DashMap`.
///
/// The map's entry lock is held while the arena slot is allocated, so concurrent
/// callers with equal keys observe exactly one handle.
///
/// ```rust, ignore
///  let handle = intern_into!(self.type_ids, self.types, key, TypeRef, data);
/// ```
macro_rules! intern_into {
    ($map:expr, $arena:expr, $key:expr, $handle:ident, $value:expr) => {{
        match $map.entry($key) {
            dashmap::mapref::entry::Entry::Occupied(entry) => *entry.get(),
            dashmap::mapref::entry::Entry::Vacant(entry) => {
                let handle = $handle::from_index($arena.push($value));
                entry.insert(handle);
                handle
            }
        }
    }};
}
