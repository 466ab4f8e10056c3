//! Lattice traits for data flow analysis.
//!
//! A lattice defines how abstract values combine at control flow join points.
//!
//! The solver combines states with meet in both directions; backward analyses
//! meet the states of successors. Bottom is the element past which no further meet
//! can change a state.

use std::fmt::Debug;

use crate::utils::BitSet;

/// A meet semi-lattice with a meet (greatest lower bound) operation.
///
/// The meet operation must be idempotent, commutative and associative.
///
/// # Examples
///
/// ```rust,ignore
/// impl MeetSemiLattice for ConstantLattice {
///     fn meet(&self, other: &Self) -> Self {
///         match (self, other) {
///             (Self::Top, x) | (x, Self::Top) => x.clone(),
///             (Self::Const(a), Self::Const(b)) if a == b => Self::Const(*a),
///             _ => Self::Bottom,
///         }
///     }
/// }
/// ```
pub trait MeetSemiLattice: Clone + Debug + PartialEq {
    /// Computes the meet (greatest lower bound) of two lattice elements.
    #[must_use]
    fn meet(&self, other: &Self) -> Self;

    /// Returns `true` if this is the bottom element.
    ///
    /// Once bottom is reached, further meets cannot change the value.
    fn is_bottom(&self) -> bool;
}

impl MeetSemiLattice for BitSet {
    /// Meet is union (may analysis).
    fn meet(&self, other: &Self) -> Self {
        let mut result = self.clone();
        result.union_with(other);
        result
    }

    fn is_bottom(&self) -> bool {
        self.count() == self.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bitset_meet_is_union() {
        let mut a = BitSet::new(8);
        a.insert(1);
        a.insert(2);
        let mut b = BitSet::new(8);
        b.insert(2);
        b.insert(3);
        assert_eq!(a.meet(&b).iter().collect::<Vec<_>>(), vec![1, 2, 3]);
        assert!(!a.is_bottom());
        assert!(BitSet::full(4).is_bottom());
    }
}
