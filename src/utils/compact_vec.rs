//! A small-size-optimised vector for handle-sized elements.
//!
//! Most CFG blocks have one or two predecessors and successors, and most classes
//! implement zero or one interface. [`CompactVec`] keeps those cases cheap:
//!
//! | Length | Representation | Heap allocations |
//! |--------|----------------|------------------|
//! | 0 | `Empty` | none |
//! | 1 | element inline | none |
//! | 2 | boxed pair | one (exact size) |
//! | 3+ | boxed growable buffer | two |
//!
//! The discriminant is stored next to the payload, so the whole value is two words for
//! handle-sized `T`. Elements are typed handles, which have no null value; raw
//! pointers go in through [`CompactVec::push_ptr`], which rejects null.
//!
//! Every operation that removes elements moves the value back to the smallest
//! representation that can hold the remaining elements.

use std::{
    ops::{Index, Range},
    ptr::NonNull,
};

/// An insertion-ordered vector specialised for zero, one or two elements.
#[derive(Clone, PartialEq, Eq, Hash)]
pub enum CompactVec<T> {
    /// No elements.
    Empty,
    /// Exactly one element, stored inline.
    One(T),
    /// Exactly two elements in an exactly sized heap pair.
    Two(Box<[T; 2]>),
    /// Three or more elements.
    Many(Box<Vec<T>>),
}

impl<T> CompactVec<T> {
    /// Creates an empty vector. Does not allocate.
    #[must_use]
    pub const fn new() -> Self {
        CompactVec::Empty
    }

    /// Number of elements.
    #[must_use]
    pub fn len(&self) -> usize {
        match self {
            CompactVec::Empty => 0,
            CompactVec::One(_) => 1,
            CompactVec::Two(_) => 2,
            CompactVec::Many(v) => v.len(),
        }
    }

    /// Returns `true` if there are no elements.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        matches!(self, CompactVec::Empty)
    }

    /// Returns `true` if the current representation holds a heap allocation.
    #[must_use]
    pub fn is_heap_allocated(&self) -> bool {
        matches!(self, CompactVec::Two(_) | CompactVec::Many(_))
    }

    /// The elements as a slice, in insertion order.
    #[must_use]
    pub fn as_slice(&self) -> &[T] {
        match self {
            CompactVec::Empty => &[],
            CompactVec::One(v) => std::slice::from_ref(v),
            CompactVec::Two(pair) => &pair[..],
            CompactVec::Many(v) => v.as_slice(),
        }
    }

    /// The elements as a mutable slice.
    pub fn as_mut_slice(&mut self) -> &mut [T] {
        match self {
            CompactVec::Empty => &mut [],
            CompactVec::One(v) => std::slice::from_mut(v),
            CompactVec::Two(pair) => &mut pair[..],
            CompactVec::Many(v) => v.as_mut_slice(),
        }
    }

    /// Iterates the elements in insertion order.
    pub fn iter(&self) -> std::slice::Iter<'_, T> {
        self.as_slice().iter()
    }

    /// Returns the element at `index`.
    #[must_use]
    pub fn get(&self, index: usize) -> Option<&T> {
        self.as_slice().get(index)
    }

    /// First element.
    #[must_use]
    pub fn first(&self) -> Option<&T> {
        self.as_slice().first()
    }

    /// Last element.
    #[must_use]
    pub fn last(&self) -> Option<&T> {
        self.as_slice().last()
    }

    /// Appends an element.
    pub fn push(&mut self, value: T) {
        *self = match std::mem::take(self) {
            CompactVec::Empty => CompactVec::One(value),
            CompactVec::One(first) => CompactVec::Two(Box::new([first, value])),
            CompactVec::Two(pair) => {
                let [a, b] = *pair;
                let mut v = Vec::with_capacity(4);
                v.push(a);
                v.push(b);
                v.push(value);
                CompactVec::Many(Box::new(v))
            }
            CompactVec::Many(mut v) => {
                v.push(value);
                CompactVec::Many(v)
            }
        };
    }

    /// Removes and returns the last element.
    pub fn pop(&mut self) -> Option<T> {
        let (rest, popped) = match std::mem::take(self) {
            CompactVec::Empty => (CompactVec::Empty, None),
            CompactVec::One(v) => (CompactVec::Empty, Some(v)),
            CompactVec::Two(pair) => {
                let [a, b] = *pair;
                (CompactVec::One(a), Some(b))
            }
            CompactVec::Many(mut v) => {
                let popped = v.pop();
                (Self::from_vec(*v), popped)
            }
        };
        *self = rest;
        popped
    }

    /// Removes the element at `index`, preserving the order of the remaining elements.
    ///
    /// # Panics
    ///
    /// Panics if `index >= self.len()`.
    pub fn remove(&mut self, index: usize) -> T {
        let mut v = std::mem::take(self).into_vec();
        let removed = v.remove(index);
        *self = Self::from_vec(v);
        removed
    }

    /// Removes the elements in `range`.
    ///
    /// # Panics
    ///
    /// Panics if the range is out of bounds.
    pub fn erase(&mut self, range: Range<usize>) {
        if range.is_empty() {
            assert!(range.start <= self.len(), "range out of bounds");
            return;
        }
        let mut v = std::mem::take(self).into_vec();
        v.drain(range);
        *self = Self::from_vec(v);
    }

    /// Keeps only the elements for which `keep` returns `true`.
    pub fn retain(&mut self, keep: impl FnMut(&T) -> bool) {
        let mut v = std::mem::take(self).into_vec();
        v.retain(keep);
        *self = Self::from_vec(v);
    }

    /// Removes all elements and releases any heap storage.
    pub fn clear(&mut self) {
        *self = CompactVec::Empty;
    }

    /// Converts into a plain vector.
    #[must_use]
    pub fn into_vec(self) -> Vec<T> {
        match self {
            CompactVec::Empty => Vec::new(),
            CompactVec::One(v) => vec![v],
            CompactVec::Two(pair) => Vec::from(*pair),
            CompactVec::Many(v) => *v,
        }
    }

    /// Builds the smallest representation holding the elements of `v`.
    #[must_use]
    pub fn from_vec(mut v: Vec<T>) -> Self {
        match v.len() {
            0 => CompactVec::Empty,
            1 => v.pop().map_or(CompactVec::Empty, CompactVec::One),
            2 => {
                let b = v.pop();
                let a = v.pop();
                match (a, b) {
                    (Some(a), Some(b)) => CompactVec::Two(Box::new([a, b])),
                    _ => CompactVec::Empty,
                }
            }
            _ => CompactVec::Many(Box::new(v)),
        }
    }
}

impl<T> Default for CompactVec<T> {
    fn default() -> Self {
        CompactVec::Empty
    }
}

impl<T: PartialEq> CompactVec<T> {
    /// Returns `true` if `value` is an element.
    #[must_use]
    pub fn contains(&self, value: &T) -> bool {
        self.as_slice().contains(value)
    }

    /// Removes the first element equal to `value`, returning whether one was found.
    pub fn remove_item(&mut self, value: &T) -> bool {
        match self.iter().position(|v| v == value) {
            Some(pos) => {
                self.remove(pos);
                true
            }
            None => false,
        }
    }
}

impl<U> CompactVec<NonNull<U>> {
    /// Appends a raw pointer.
    ///
    /// # Panics
    ///
    /// Panics if `ptr` is null.
    pub fn push_ptr(&mut self, ptr: *mut U) {
        match NonNull::new(ptr) {
            Some(ptr) => self.push(ptr),
            None => panic!("null element pushed into a CompactVec"),
        }
    }
}

impl<T: std::fmt::Debug> std::fmt::Debug for CompactVec<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.iter()).finish()
    }
}

impl<T> Index<usize> for CompactVec<T> {
    type Output = T;

    fn index(&self, index: usize) -> &T {
        &self.as_slice()[index]
    }
}

impl<T> FromIterator<T> for CompactVec<T> {
    fn from_iter<I: IntoIterator<Item = T>>(iter: I) -> Self {
        Self::from_vec(iter.into_iter().collect())
    }
}

impl<T> Extend<T> for CompactVec<T> {
    fn extend<I: IntoIterator<Item = T>>(&mut self, iter: I) {
        for item in iter {
            self.push(item);
        }
    }
}

impl<'a, T> IntoIterator for &'a CompactVec<T> {
    type Item = &'a T;
    type IntoIter = std::slice::Iter<'a, T>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

impl<T> IntoIterator for CompactVec<T> {
    type Item = T;
    type IntoIter = std::vec::IntoIter<T>;

    fn into_iter(self) -> Self::IntoIter {
        self.into_vec().into_iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn representation_tracks_length() {
        let mut v: CompactVec<u32> = CompactVec::new();
        assert!(!v.is_heap_allocated());
        v.push(1);
        assert!(matches!(v, CompactVec::One(1)));
        assert!(!v.is_heap_allocated());
        v.push(2);
        assert!(matches!(v, CompactVec::Two(_)));
        v.push(3);
        assert!(matches!(v, CompactVec::Many(_)));
        assert_eq!(v.as_slice(), &[1, 2, 3]);

        assert_eq!(v.pop(), Some(3));
        assert!(matches!(v, CompactVec::Two(_)));
        assert_eq!(v.pop(), Some(2));
        assert!(matches!(v, CompactVec::One(1)));
    }

    #[test]
    fn erase_shrinks_representation() {
        let mut v: CompactVec<u32> = (0..6).collect();
        v.erase(1..5);
        assert_eq!(v.as_slice(), &[0, 5]);
        assert!(matches!(v, CompactVec::Two(_)));
        v.erase(0..1);
        assert!(matches!(v, CompactVec::One(5)));
        v.erase(0..0);
        assert_eq!(v.len(), 1);
    }

    #[test]
    fn clear_drops_storage() {
        let mut v: CompactVec<u64> = (0..10).collect();
        assert!(v.is_heap_allocated());
        v.clear();
        assert!(v.is_empty());
        assert!(!v.is_heap_allocated());
    }

    #[test]
    fn remove_item_and_retain() {
        let mut v: CompactVec<u32> = [4, 5, 6, 5].into_iter().collect();
        assert!(v.remove_item(&5));
        assert_eq!(v.as_slice(), &[4, 6, 5]);
        v.retain(|x| *x != 4);
        assert_eq!(v.as_slice(), &[6, 5]);
        assert!(!v.remove_item(&42));
        assert!(v.contains(&6));
    }

    #[test]
    fn two_words_for_handles() {
        assert_eq!(
            std::mem::size_of::<CompactVec<u32>>(),
            2 * std::mem::size_of::<usize>()
        );
    }
}
