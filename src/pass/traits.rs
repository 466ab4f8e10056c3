//! The pass trait.

use std::{any::Any, sync::Arc};

use crate::{
    config::{Config, ConfigView},
    ir::Scope,
    pass::{manager::PassManager, property::PropertyInteractions},
    Result,
};

/// Identifies the result type of an analysis pass.
pub type AnalysisId = &'static str;

/// A type-erased analysis result.
pub type AnalysisResult = Arc<dyn Any + Send + Sync>;

/// Which cached analysis results survive a pass.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum PreservedAnalyses {
    /// Every result survives.
    All,
    /// Only the listed results survive.
    Only(Vec<AnalysisId>),
    /// No result survives.
    #[default]
    None,
}

impl PreservedAnalyses {
    /// `true` if `id` survives.
    #[must_use]
    pub fn keeps(&self, id: AnalysisId) -> bool {
        match self {
            PreservedAnalyses::All => true,
            PreservedAnalyses::Only(ids) => ids.contains(&id),
            PreservedAnalyses::None => false,
        }
    }
}

/// A unit of the optimisation pipeline.
///
/// The manager calls [`Pass::bind_config`] once before validation, checks the
/// declarations of every pass against each other, then calls [`Pass::run`] in order.
///
/// # Analysis Passes
///
/// A pass that returns `Some` from [`Pass::analysis_id`] publishes a result after it
/// ran ([`Pass::take_result`]). Later passes read it through
/// [`PassManager::analysis`] as long as every pass in between preserved it. When the
/// result is invalidated the manager drops it and calls [`Pass::destroy_result`] on
/// the producer.
pub trait Pass: Send + Sync {
    /// Unique name, also the key of the pass' options in the configuration.
    fn name(&self) -> &'static str;

    /// How the pass affects each property.
    fn property_interactions(&self) -> PropertyInteractions;

    /// Copies the options this pass recognises out of `view`.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Config`] for options with the wrong type.
    fn bind_config(&mut self, _view: &ConfigView<'_>) -> Result<()> {
        Ok(())
    }

    /// Analysis results that must be live when the pass runs.
    fn required_analyses(&self) -> Vec<AnalysisId> {
        Vec::new()
    }

    /// Analysis results that survive the pass.
    fn preserved_analyses(&self) -> PreservedAnalyses {
        PreservedAnalyses::None
    }

    /// The result this pass publishes, for analysis passes.
    fn analysis_id(&self) -> Option<AnalysisId> {
        None
    }

    /// Runs the pass.
    ///
    /// # Errors
    ///
    /// Any error aborts the pipeline; passes report deliberate aborts as
    /// [`crate::Error::PassFatal`].
    fn run(&mut self, scope: &mut Scope, config: &Config, manager: &mut PassManager)
        -> Result<()>;

    /// Hands the published result to the manager. Called once after [`Pass::run`].
    fn take_result(&mut self) -> Option<AnalysisResult> {
        None
    }

    /// Releases whatever the pass still holds of an invalidated result.
    fn destroy_result(&mut self) {}
}
