//! Graph algorithms over the [`crate::utils::graph`] traits.

mod cycles;
mod traversal;

pub use cycles::find_cycle;
pub use traversal::{postorder, reverse_postorder};
