//! Data flow analysis framework over method CFGs.
//!
//! This module provides a generic framework for computing properties that
//! propagate along control flow edges. It supports both forward and backward
//! analyses using a worklist-based solver.
//!
//! # Architecture
//!
//! The framework is built around three core abstractions:
//!
//! - **Lattice**: Defines the domain of abstract values and how they meet
//! - **Analysis**: Specifies transfer functions, boundary conditions and edge handling
//! - **Solver**: Iteratively computes fixpoints using a worklist algorithm
//!
//! # Analyses Provided
//!
//! - [`ReachingDefinitions`]: Which register definitions may reach each program point
//! - [`Liveness`]: Which register slots are live at each program point
//! - [`TypeInference`]: The abstract type of every register slot
//!
//! # Example
//!
//! ```rust,ignore
//! use dexopt::analysis::dataflow::Liveness;
//!
//! code.build_cfg(&pool)?;
//! let cfg = code.cfg().unwrap();
//! let live = Liveness::analyze(cfg, &pool);
//! for block in cfg.blocks() {
//!     println!("{}: {:?}", block.id(), live.live_in(block.id()));
//! }
//! ```

mod framework;
mod lattice;
mod liveness;
mod reaching;
mod solver;
mod types;

pub use framework::{AnalysisResults, DataFlowAnalysis, Direction};
pub use lattice::MeetSemiLattice;
pub use liveness::{LiveRegisters, LiveSet, Liveness};
pub use reaching::{DefSet, ReachingDefinitions, ReachingDefs};
pub use solver::DataFlowSolver;
pub use types::{InferredTypes, RegType, TypeEnv, TypeInference, TypeState};
