//! Program analysis infrastructure.
//!
//! This module provides the analyses optimisation passes query before they
//! rewrite code. Per-method analyses run over the [`crate::cfg::ControlFlowGraph`]
//! of a single body; scope-wide analyses look at every class at once.
//!
//! # Architecture
//!
//! - [`dataflow`] - Generic worklist framework plus liveness, reaching definitions
//!   and register type inference
//! - [`clinit`] - Dependencies between static initialisers and cycle detection
//!
//! The class hierarchy itself ([`crate::ir::TypeSystem`]) lives next to the scope
//! it is built from.
//!
//! # Usage
//!
//! ```rust,ignore
//! use dexopt::analysis::{Liveness, ReachingDefinitions};
//!
//! code.build_cfg(&pool)?;
//! let cfg = code.cfg().unwrap();
//! let live = Liveness::analyze(cfg, &pool);
//! let defs = ReachingDefinitions::analyze(cfg);
//! ```

pub mod clinit;
pub mod dataflow;

pub use clinit::{ClinitCycles, ClinitGraph};
pub use dataflow::{
    DataFlowAnalysis, DataFlowSolver, Direction, InferredTypes, LiveRegisters, Liveness,
    ReachingDefinitions, ReachingDefs, RegType, TypeEnv, TypeInference,
};
