//! The validation role: pre-flight stage checks without running the job.

use anyhow::Result;

use crate::chain::{PipelineRole, StageChain};
use crate::config::TaskConfig;
use crate::framework::BucketLogger;
use crate::registry::ModuleRegistry;
use crate::stage::ValidationMessage;

/// Runs only stage initialization and per-stage self-validation, producing
/// diagnostic messages. No data is processed, so a bucket's pipeline can be
/// checked without scheduling the distributed job.
pub struct ValidationProcessor {
    chain: StageChain,
}

impl std::fmt::Debug for ValidationProcessor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ValidationProcessor").finish_non_exhaustive()
    }
}

impl ValidationProcessor {
    /// Resolve every enabled stage, unfiltered, and run the initialization
    /// hooks with an unknown stage transition.
    ///
    /// # Errors
    /// Module instantiation failure surfaces here, which is itself a useful
    /// validation result.
    pub fn setup(
        config: &TaskConfig,
        registry: &ModuleRegistry,
        logger: Option<Box<dyn BucketLogger>>,
    ) -> Result<Self> {
        let mut chain = StageChain::resolve(config, PipelineRole::Validation, registry, logger)?;
        chain.initialize(PipelineRole::Validation);
        Ok(Self { chain })
    }

    /// Run each binding's self-validation and concatenate the diagnostics.
    #[must_use]
    pub fn validate(&self) -> Vec<ValidationMessage> {
        let bucket = self.chain.bucket().clone();
        self.chain
            .bindings()
            .iter()
            .flat_map(|binding| {
                binding
                    .module
                    .validate_module(&binding.context, &bucket, &binding.config)
            })
            .collect()
    }

    /// The resolved chain, mainly for inspection in tests.
    #[must_use]
    pub fn chain(&self) -> &StageChain {
        &self.chain
    }
}
