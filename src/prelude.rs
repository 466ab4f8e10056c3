//! # dexopt Prelude
//!
//! The types most programs driving the optimizer need, in one import.
//!
//! ```rust
//! use dexopt::prelude::*;
//! ```

// ================================================================================================
// Core Types and Error Handling
// ================================================================================================

/// The main error type for all dexopt operations
pub use crate::Error;

/// The result type used throughout dexopt
pub use crate::Result;

/// Pipeline configuration
pub use crate::Config;

// ================================================================================================
// Program Model
// ================================================================================================

/// The interning pool and its handles
pub use crate::ir::{FieldRef, KnownTypes, MethodRef, Pool, ProtoRef, StringRef, TypeRef};

/// Classes, members and the scope holding them
pub use crate::ir::{AccessFlags, ClassId, DexClass, DexField, DexMethod, MethodId, Scope};

/// Method bodies
pub use crate::ir::{
    builder::CodeBuilder,
    entry::MethodItemEntry,
    instruction::IrInstruction,
    opcode::{IrOpcode, RegKind},
    IrCode,
};

/// Source positions
pub use crate::ir::position::{DexPosition, PositionPatternSwitchManager};

/// Class hierarchy queries
pub use crate::ir::TypeSystem;

// ================================================================================================
// Control Flow and Analysis
// ================================================================================================

/// Control-flow graphs
pub use crate::cfg::{BlockId, ControlFlowGraph, EdgeKind, InsnPos};

/// Dataflow framework and analyses
pub use crate::analysis::dataflow::{
    DataFlowAnalysis, DataFlowSolver, Liveness, ReachingDefinitions, TypeInference,
};

// ================================================================================================
// Passes
// ================================================================================================

/// Pass infrastructure
pub use crate::pass::{MetricSink, Pass, PassManager, PassRegistry, Property};

/// Built-in transformation passes
pub use crate::opt::{
    outliner::InstructionSequenceOutlinerPass, switches::ReduceSparseSwitchesPass,
};
