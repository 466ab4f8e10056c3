//! Shared data structures and byte codecs.
//!
//! - [`BitSet`] - dense bit vector for dataflow sets
//! - [`CompactVec`] - small-size-optimised vector used for CFG edge lists
//! - [`graph`] - graph traits, a plain directed graph and traversal algorithms
//! - [`leb128`], [`mutf8`] - the container's integer and string encodings
//! - [`Parser`] - bounds-checked cursor over encoded bytes
//! - [`prefix_set`] - trie codec for shipping sets of string prefixes

mod bitset;
mod compact_vec;
pub mod graph;
pub mod leb128;
pub mod mutf8;
mod parser;
pub mod prefix_set;

pub use bitset::{BitSet, BitSetIter};
pub use compact_vec::CompactVec;
pub use parser::Parser;
