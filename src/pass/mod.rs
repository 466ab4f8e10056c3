//! The pass pipeline.
//!
//! A pipeline is an ordered list of [`Pass`]es run by a [`PassManager`]. Passes
//! declare how they interact with program-wide [`Property`]s and which analysis
//! results they need, publish and keep; the manager checks those declarations for the
//! whole list before touching the program and aborts on the first inconsistency.
//!
//! # Example
//!
//! ```rust
//! use std::sync::Arc;
//! use dexopt::{config::Config, ir::{Pool, Scope}, pass::{MetricSink, PassManager, PassRegistry}};
//! use serde_json::json;
//!
//! let config = Config::new(json!({
//!     "passes": ["TypeSystemAnalysisPass", "ReduceSparseSwitchesPass"],
//!     "ReduceSparseSwitchesPass": { "max_expanded_switch_cases": 2 }
//! }))?;
//! let metrics = Arc::new(MetricSink::new());
//! let mut manager = PassManager::from_config(&PassRegistry::default(), &config, metrics)?;
//! let mut scope = Scope::new(Arc::new(Pool::new()));
//! manager.run(&mut scope, &config)?;
//! # Ok::<(), dexopt::Error>(())
//! ```

pub mod builtin;
pub mod manager;
pub mod metrics;
pub mod property;
pub mod registry;
pub mod traits;

pub use builtin::{
    ClinitCycleAnalysisPass, DexLimits, DexLimitsCheckPass, TypeSystemAnalysisPass,
    CLINIT_CYCLES, TYPE_SYSTEM,
};
pub use manager::{PassManager, PassTiming};
pub use metrics::MetricSink;
pub use property::{Interaction, Property, PropertyInteractions, PropertyState, PropertyStatus};
pub use registry::{default_factory, PassFactory, PassRegistry};
pub use traits::{AnalysisId, AnalysisResult, Pass, PreservedAnalyses};
