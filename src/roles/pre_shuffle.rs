//! The pre-shuffle role: single-record ingest ahead of the shuffle boundary.

use anyhow::{Context, Result};
use log::debug;
use serde_json::Value;

use crate::chain::{PipelineRole, StageChain};
use crate::config::TaskConfig;
use crate::framework::{BucketLogger, FLUSH_TIMEOUT, TaskContext};
use crate::record::{PendingRecord, grouping_key};
use crate::registry::ModuleRegistry;

/// Consumes one record at a time, forwards through the accumulator, and on
/// completion of the chain either writes a shuffle key/value pair or emits
/// directly to the sink if the pipeline has no shuffle boundary.
pub struct PreShuffleProcessor {
    chain: StageChain,
}

impl PreShuffleProcessor {
    /// Resolve bindings with the pre-shuffle filter (configs up to, exclusive
    /// of, the first grouping stage) and run topology inference.
    ///
    /// # Errors
    /// Module instantiation failure aborts the task.
    pub fn setup(
        config: &TaskConfig,
        registry: &ModuleRegistry,
        logger: Option<Box<dyn BucketLogger>>,
    ) -> Result<Self> {
        let mut chain = StageChain::resolve(config, PipelineRole::PreShuffle, registry, logger)?;
        chain.initialize(PipelineRole::PreShuffle);
        Ok(Self { chain })
    }

    /// Ingest one record; dispatches through the chain once the batch
    /// threshold is reached.
    ///
    /// # Errors
    /// A stage's processing error propagates and aborts the task.
    pub fn process(&mut self, seq: u64, record: Value, task: &mut dyn TaskContext) -> Result<()> {
        debug!("pre-shuffle ingest seq={seq}");
        self.chain.push(PendingRecord::new(seq, record));
        self.dispatch(false, task)
    }

    /// Flush the accumulator, notify every binding of completion, and flush
    /// downstream output with a bounded wait.
    ///
    /// # Errors
    /// A flush timeout or failure is escalated as fatal.
    pub fn teardown(&mut self, task: &mut dyn TaskContext) -> Result<()> {
        self.dispatch(true, task)?;
        for binding in self.chain.bindings_mut() {
            binding.module.on_stage_complete(true);
        }
        task.flush_output(FLUSH_TIMEOUT)
            .context("downstream flush failed at pre-shuffle teardown")
    }

    /// The resolved chain, mainly for inspection in tests.
    #[must_use]
    pub fn chain(&self) -> &StageChain {
        &self.chain
    }

    fn dispatch(&mut self, flush: bool, task: &mut dyn TaskContext) -> Result<()> {
        let grouping_fields = self
            .chain
            .grouping()
            .map(|g| g.config.grouping_fields.clone());
        self.chain
            .check_batch(flush, task, &mut |records, task| {
                final_stage(grouping_fields.as_deref(), records, task)
            })
    }
}

/// Route the tail output: keyed shuffle writes when a grouping spec exists,
/// direct sink emits otherwise.
fn final_stage(
    grouping_fields: Option<&[String]>,
    records: Vec<PendingRecord>,
    task: &mut dyn TaskContext,
) -> Result<()> {
    match grouping_fields {
        Some(fields) => {
            for pending in records {
                // A precomputed key (local pre-aggregation handoff) wins over
                // projecting the grouping fields.
                let key = pending
                    .key
                    .unwrap_or_else(|| grouping_key(fields, &pending.record));
                task.write_shuffle(key, pending.record)?;
            }
        }
        None => {
            for pending in records {
                task.emit(pending.record)?;
            }
        }
    }
    Ok(())
}
