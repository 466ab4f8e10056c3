//! Generic directed graph infrastructure.
//!
//! - [`NodeId`] - strongly typed node identifier
//! - [`GraphBase`], [`Successors`], [`Predecessors`], [`RootedGraph`] - the traits
//!   algorithms are written against
//! - [`DirectedGraph`] - a plain adjacency-list graph with node payloads
//! - [`algorithms`] - traversals and cycle detection

pub mod algorithms;
mod directed;
mod node;
mod traits;

pub use directed::DirectedGraph;
pub use node::NodeId;
pub use traits::{GraphBase, Predecessors, RootedGraph, Successors};
