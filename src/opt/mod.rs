//! Transformation passes.
//!
//! - [`switches`]: replaces sparse switches by cheaper dispatch;
//! - [`outliner`]: moves repeated instruction sequences into shared helper methods.

pub mod outliner;
pub mod switches;
