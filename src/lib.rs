// Copyright 2025 Johann Kempter
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//
// SPDX-License-Identifier: Apache-2.0

#![doc(html_no_source)]
#![deny(missing_docs)]
#![allow(clippy::too_many_arguments)]

//! # dexopt
//!
//! A whole-program, ahead-of-time optimizer for Android dex bytecode. `dexopt` loads
//! nothing itself: callers hand over a [`ir::Scope`] of class definitions and a
//! [`Config`], and the crate runs a configurable pipeline of passes over it.
//!
//! ## Features
//!
//! - **Interning pool** - strings, types, prototypes and member references shared by
//!   every method, safe to intern into from many threads at once
//! - **Editable CFGs** - bodies switch between a linear list of method items and a
//!   control-flow graph with typed edges, try regions and source positions intact
//! - **Dataflow analyses** - liveness, reaching definitions and type inference on a
//!   shared monotone-framework solver
//! - **Checked pipelines** - every pass declares the program properties it needs,
//!   establishes and destroys, and the whole pass list is validated before it runs
//! - **Instruction-sequence outlining** - repeated code moves into shared static
//!   helpers, with stack traces mapped back to the original lines
//! - **Sparse-switch reduction** - binary-search switches become if-chains, packed
//!   switches or multiplexed dispatch
//!
//! ## Quick Start
//!
//! ```rust
//! use std::sync::Arc;
//!
//! use dexopt::{
//!     ir::{Pool, Scope},
//!     pass::MetricSink,
//!     Config,
//! };
//! use serde_json::json;
//!
//! let mut scope = Scope::new(Arc::new(Pool::new()));
//! let config = Config::new(json!({
//!     "passes": ["ReduceSparseSwitchesPass", "InstructionSequenceOutlinerPass"],
//!     "InstructionSequenceOutlinerPass": { "min_insns_size": 4 }
//! }))?;
//! let metrics = Arc::new(MetricSink::new());
//! dexopt::run(&mut scope, &config, Arc::clone(&metrics))?;
//! for (name, value) in metrics.snapshot() {
//!     println!("{name}: {value}");
//! }
//! # Ok::<(), dexopt::Error>(())
//! ```
//!
//! ## Architecture
//!
//! - [`utils`] - bit sets, compact vectors, graph algorithms and the byte codecs
//! - [`ir`] - pool, opcodes, instructions, method items, classes and the scope
//! - [`cfg`] - control-flow graphs: construction, editing, linearisation
//! - [`analysis`] - dataflow framework and the analyses built on it
//! - [`pass`] - properties, the pass trait, the manager and the registry
//! - [`opt`] - the transformation passes
//! - [`config`] - the pipeline configuration
//! - [`Error`] and [`Result`] - error handling
//!
//! ## Concurrency
//!
//! Passes fan out over method bodies with rayon, one worker per body. A worker owns
//! its body exclusively and shares only the pool, which interns through lock-striped
//! maps and append-only arenas. Everything that touches more than one body, such as
//! choosing which sequences to outline or adding classes, happens between parallel
//! phases on the calling thread.
//!
//! ## Logging
//!
//! The crate logs through the [`log`] facade and never installs a logger. The pass
//! manager reports each pass with its timing and metric deltas at `info`.

#[macro_use]
pub(crate) mod macros;

/// Error and result types.
///
/// Every fallible operation of the crate returns [`Result`]. Structural problems
/// with a body surface as [`Error::MalformedBody`] or [`Error::InvalidEdit`],
/// pipeline problems as [`Error::UnsatisfiedRequirement`] or [`Error::PassFatal`],
/// and codec problems as [`Error::Malformed`] or [`Error::OutOfBounds`].
#[macro_use]
pub mod error;

/// Convenient re-exports of the most commonly used types and traits.
///
/// # Example
///
/// ```rust
/// use dexopt::prelude::*;
///
/// let pool = std::sync::Arc::new(Pool::new());
/// let scope = Scope::new(pool);
/// assert!(scope.is_empty());
/// ```
pub mod prelude;

pub mod analysis;
pub mod cfg;
pub mod config;
pub mod ir;
pub mod opt;
pub mod pass;
pub mod utils;

use std::sync::Arc;

pub use config::Config;
pub use error::{CycleDetected, Error};

/// `dexopt` Result type
///
/// A type alias for [`std::result::Result<T, Error>`] where the error type is always
/// [`Error`].
pub type Result<T> = std::result::Result<T, Error>;

/// Runs the pipeline `config` describes over `scope`.
///
/// Passes are resolved through [`pass::PassRegistry::default`], configured from their
/// entries in `config`, validated as a whole and then run in order. Counters land in
/// `metrics`, prefixed with the name of the pass that recorded them.
///
/// # Errors
///
/// Returns [`Error::Config`] for an unknown pass or a badly typed option,
/// [`Error::UnsatisfiedRequirement`] if the pass list fails validation, and the first
/// error a pass reports otherwise. A failed run may leave `scope` partially
/// transformed.
pub fn run(scope: &mut ir::Scope, config: &Config, metrics: Arc<pass::MetricSink>) -> Result<()> {
    let registry = pass::PassRegistry::default();
    let mut manager = pass::PassManager::from_config(&registry, config, metrics)?;
    manager.run(scope, config)
}
