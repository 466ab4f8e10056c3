//! A fixed-capacity bit vector.
//!
//! Liveness and reaching definitions track sets of small integers (register numbers,
//! definition indices). [`BitSet`] stores 64 of them per word and provides the in-place
//! set operations the dataflow transfer functions need. Every in-place operation reports
//! whether it changed the receiver, which is what the worklist solver uses to decide
//! whether to revisit neighbours.
//!
//! # Example
//!
//! ```rust
//! use dexopt::utils::BitSet;
//!
//! let mut live = BitSet::new(16);
//! live.insert(3);
//! live.insert(4);
//!
//! let mut killed = BitSet::new(16);
//! killed.insert(4);
//! live.difference_with(&killed);
//!
//! assert_eq!(live.iter().collect::<Vec<_>>(), vec![3]);
//! ```

/// A bit vector for efficient set operations on small integers.
#[derive(Clone, PartialEq, Eq, Hash, Default)]
pub struct BitSet {
    /// The bits, stored as a vector of words.
    words: Vec<u64>,
    /// The number of addressable bits.
    len: usize,
}

impl BitSet {
    /// Creates a new empty bit set with the given capacity.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            words: vec![0; capacity.div_ceil(64)],
            len: capacity,
        }
    }

    /// Creates a new bit set with all bits set.
    #[must_use]
    pub fn full(capacity: usize) -> Self {
        let mut set = Self::new(capacity);
        set.fill();
        set
    }

    /// Returns the capacity of this bit set.
    #[must_use]
    pub const fn len(&self) -> usize {
        self.len
    }

    /// Returns `true` if no bit is set.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.words.iter().all(|&w| w == 0)
    }

    /// Sets the bit at `index`, returning `true` if it was previously clear.
    ///
    /// # Panics
    ///
    /// Panics if `index >= self.len()`.
    pub fn insert(&mut self, index: usize) -> bool {
        assert!(index < self.len, "index out of bounds");
        let mask = 1u64 << (index % 64);
        let word = &mut self.words[index / 64];
        let was_clear = *word & mask == 0;
        *word |= mask;
        was_clear
    }

    /// Clears the bit at `index`, returning `true` if it was previously set.
    ///
    /// # Panics
    ///
    /// Panics if `index >= self.len()`.
    pub fn remove(&mut self, index: usize) -> bool {
        assert!(index < self.len, "index out of bounds");
        let mask = 1u64 << (index % 64);
        let word = &mut self.words[index / 64];
        let was_set = *word & mask != 0;
        *word &= !mask;
        was_set
    }

    /// Returns `true` if the bit at `index` is set. Indices past the capacity are never set.
    #[must_use]
    pub fn contains(&self, index: usize) -> bool {
        if index >= self.len {
            return false;
        }
        self.words[index / 64] & (1u64 << (index % 64)) != 0
    }

    /// Returns the number of bits set.
    #[must_use]
    pub fn count(&self) -> usize {
        self.words.iter().map(|w| w.count_ones() as usize).sum()
    }

    /// Clears all bits.
    pub fn clear(&mut self) {
        self.words.fill(0);
    }

    /// Sets all bits.
    pub fn fill(&mut self) {
        self.words.fill(u64::MAX);
        if !self.len.is_multiple_of(64) {
            if let Some(last) = self.words.last_mut() {
                *last = (1u64 << (self.len % 64)) - 1;
            }
        }
    }

    /// In-place union. Returns `true` if `self` changed.
    pub fn union_with(&mut self, other: &Self) -> bool {
        self.combine(other, |a, b| a | b)
    }

    /// In-place intersection. Returns `true` if `self` changed.
    pub fn intersect_with(&mut self, other: &Self) -> bool {
        self.combine(other, |a, b| a & b)
    }

    /// Removes every bit set in `other`. Returns `true` if `self` changed.
    pub fn difference_with(&mut self, other: &Self) -> bool {
        self.combine(other, |a, b| a & !b)
    }

    /// Returns `true` if `self` and `other` share at least one bit.
    #[must_use]
    pub fn intersects(&self, other: &Self) -> bool {
        self.words
            .iter()
            .zip(other.words.iter())
            .any(|(a, b)| a & b != 0)
    }

    /// Returns an iterator over the indices of set bits, in ascending order.
    pub fn iter(&self) -> BitSetIter<'_> {
        BitSetIter {
            set: self,
            word_idx: 0,
            current: self.words.first().copied().unwrap_or(0),
        }
    }

    fn combine(&mut self, other: &Self, op: impl Fn(u64, u64) -> u64) -> bool {
        assert_eq!(self.len, other.len, "bit sets must have same length");
        let mut changed = false;
        for (a, b) in self.words.iter_mut().zip(other.words.iter()) {
            let new = op(*a, *b);
            changed |= new != *a;
            *a = new;
        }
        changed
    }
}

impl std::fmt::Debug for BitSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_set().entries(self.iter()).finish()
    }
}

/// Iterator over the set bits in a [`BitSet`].
pub struct BitSetIter<'a> {
    set: &'a BitSet,
    word_idx: usize,
    current: u64,
}

impl Iterator for BitSetIter<'_> {
    type Item = usize;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if self.current != 0 {
                let bit = self.current.trailing_zeros() as usize;
                self.current &= self.current - 1;
                return Some(self.word_idx * 64 + bit);
            }
            self.word_idx += 1;
            self.current = *self.set.words.get(self.word_idx)?;
        }
    }
}

impl FromIterator<usize> for BitSet {
    /// Collects indices into a set just large enough to hold the largest one.
    fn from_iter<I: IntoIterator<Item = usize>>(iter: I) -> Self {
        let items: Vec<usize> = iter.into_iter().collect();
        let capacity = items.iter().max().map_or(0, |m| m + 1);
        let mut set = BitSet::new(capacity);
        for item in items {
            set.insert(item);
        }
        set
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_reports_novelty() {
        let mut regs = BitSet::new(70);
        assert!(regs.insert(65));
        assert!(!regs.insert(65));
        assert!(regs.remove(65));
        assert!(!regs.remove(65));
        assert!(regs.is_empty());
    }

    #[test]
    fn contains_past_capacity_is_false() {
        let regs = BitSet::full(10);
        assert!(regs.contains(9));
        assert!(!regs.contains(10));
        assert_eq!(regs.count(), 10);
    }

    #[test]
    fn set_operations_report_change() {
        let mut a: BitSet = BitSet::new(128);
        let mut b = BitSet::new(128);
        a.insert(1);
        a.insert(100);
        b.insert(100);

        assert!(!a.union_with(&b));
        b.insert(64);
        assert!(a.union_with(&b));
        assert_eq!(a.iter().collect::<Vec<_>>(), vec![1, 64, 100]);

        assert!(a.intersect_with(&b));
        assert_eq!(a.iter().collect::<Vec<_>>(), vec![64, 100]);

        assert!(a.difference_with(&b));
        assert!(a.is_empty());
        assert!(!a.intersects(&b));
    }

    #[test]
    fn iteration_crosses_words() {
        let set: BitSet = [0usize, 63, 64, 129].into_iter().collect();
        assert_eq!(set.len(), 130);
        assert_eq!(set.iter().collect::<Vec<_>>(), vec![0, 63, 64, 129]);
        assert_eq!(format!("{set:?}"), "{0, 63, 64, 129}");
    }

    #[test]
    fn fill_masks_tail() {
        let mut set = BitSet::new(65);
        set.fill();
        assert_eq!(set.count(), 65);
        set.clear();
        assert_eq!(set.count(), 0);
    }
}
