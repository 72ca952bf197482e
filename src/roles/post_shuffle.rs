//! The post-shuffle roles: aggregation and local pre-aggregation.
//!
//! Both consume grouped record sets sharing a shuffle key and differ only in
//! where output goes — local pre-aggregation writes keyed pairs back across
//! the shuffle boundary, aggregation emits to the sink — so one processor
//! covers both, switched by a flag.

use anyhow::{Context, Result};
use serde_json::Value;

use crate::chain::{PipelineRole, StageChain};
use crate::config::TaskConfig;
use crate::framework::{BucketLogger, FLUSH_TIMEOUT, TaskContext};
use crate::record::{PendingRecord, grouping_key};
use crate::registry::ModuleRegistry;

/// Consumes grouped records sharing a key, special-casing the single-stage
/// pipeline, and re-enters the accumulator for any stages beyond the shuffle
/// boundary.
pub struct GroupProcessor {
    chain: StageChain,
    local_preaggregation: bool,
    /// True iff exactly one binding resolved; the group output then goes
    /// straight out without touching the accumulator.
    single_stage: bool,
}

impl GroupProcessor {
    /// Set up the aggregation role: all configs from (and including) the
    /// first grouping stage onward.
    ///
    /// # Errors
    /// Fails if no stage resolves for the role or a module cannot be
    /// instantiated.
    pub fn aggregation(
        config: &TaskConfig,
        registry: &ModuleRegistry,
        logger: Option<Box<dyn BucketLogger>>,
    ) -> Result<Self> {
        Self::setup(config, registry, logger, false)
    }

    /// Set up the local pre-aggregation role: exactly the configs declaring
    /// grouping fields.
    ///
    /// # Errors
    /// Fails if no stage resolves for the role or a module cannot be
    /// instantiated.
    pub fn local_preaggregation(
        config: &TaskConfig,
        registry: &ModuleRegistry,
        logger: Option<Box<dyn BucketLogger>>,
    ) -> Result<Self> {
        Self::setup(config, registry, logger, true)
    }

    fn setup(
        config: &TaskConfig,
        registry: &ModuleRegistry,
        logger: Option<Box<dyn BucketLogger>>,
        local_preaggregation: bool,
    ) -> Result<Self> {
        let role = if local_preaggregation {
            PipelineRole::LocalPreAggregation
        } else {
            PipelineRole::Aggregation
        };
        let mut chain = StageChain::resolve(config, role, registry, logger)?;
        chain.head()?; // a post-shuffle task with no stages cannot make progress
        chain.initialize(role);
        let single_stage = chain.is_single_stage();
        Ok(Self {
            chain,
            local_preaggregation,
            single_stage,
        })
    }

    /// Process every record sharing `key`.
    ///
    /// The head module is invoked on a **freshly cloned instance** so per-key
    /// mutable state never leaks across group keys. Records are indexed
    /// monotonically within the group and progress is signalled every
    /// `batch_size` records while the group is drained.
    ///
    /// # Errors
    /// A stage's processing error propagates and aborts the task.
    pub fn process_group<I>(&mut self, key: &Value, records: I, task: &mut dyn TaskContext) -> Result<()>
    where
        I: IntoIterator<Item = Value>,
    {
        let batch_size = self.chain.batch_size();

        let mut group = Vec::new();
        for (index, record) in records.into_iter().enumerate() {
            if index % batch_size == 0 {
                task.progress();
            }
            group.push(PendingRecord::new(index as u64, record));
        }

        let head = self.chain.head()?;
        // Never the shared long-lived instance: a fresh clone per group key.
        let mut module = head.module.clone_for_new_grouping();
        let mut scratch = head.context.fresh_clone();
        module.on_object_batch(&mut scratch, &group, None, Some(key))?;
        let output = scratch.take_output();

        if self.single_stage {
            // Nothing downstream to buffer for.
            for pending in output {
                if self.local_preaggregation {
                    task.write_shuffle(key.clone(), pending.record)?;
                } else {
                    task.emit(pending.record)?;
                }
            }
        } else {
            for pending in output {
                self.chain.push(pending);
                self.dispatch(false, task)?;
            }
        }

        // Should be empty by construction; clear residue just in case.
        scratch.clear_output();
        Ok(())
    }

    /// Flush the accumulator and notify completion: secondary bindings first,
    /// the head binding last as the task's top-level stage, then a bounded
    /// downstream flush.
    ///
    /// # Errors
    /// A flush timeout or failure is escalated as fatal.
    pub fn teardown(&mut self, task: &mut dyn TaskContext) -> Result<()> {
        self.dispatch(true, task)?;

        let bindings = self.chain.bindings_mut();
        for binding in bindings.iter_mut().skip(1) {
            binding.module.on_stage_complete(false);
        }
        if let Some(head) = bindings.first_mut() {
            head.module.on_stage_complete(true);
        }

        task.flush_output(FLUSH_TIMEOUT)
            .context("downstream flush failed at post-shuffle teardown")
    }

    /// The resolved chain, mainly for inspection in tests.
    #[must_use]
    pub fn chain(&self) -> &StageChain {
        &self.chain
    }

    /// Whether the single-stage optimization is active.
    #[must_use]
    pub fn is_single_stage(&self) -> bool {
        self.single_stage
    }

    fn dispatch(&mut self, flush: bool, task: &mut dyn TaskContext) -> Result<()> {
        let local = self.local_preaggregation;
        let grouping_fields = self
            .chain
            .grouping()
            .map(|g| g.config.grouping_fields.clone());
        self.chain.check_batch(flush, task, &mut |records, task| {
            final_stage(local, grouping_fields.as_deref(), records, task)
        })
    }
}

/// Route the tail output of the post-grouping chain: back across the shuffle
/// boundary for local pre-aggregation, straight to the sink for aggregation.
fn final_stage(
    local_preaggregation: bool,
    grouping_fields: Option<&[String]>,
    records: Vec<PendingRecord>,
    task: &mut dyn TaskContext,
) -> Result<()> {
    for pending in records {
        if local_preaggregation {
            let key = match (pending.key, grouping_fields) {
                (Some(key), _) => key,
                (None, Some(fields)) => grouping_key(fields, &pending.record),
                (None, None) => Value::Object(Default::default()),
            };
            task.write_shuffle(key, pending.record)?;
        } else {
            task.emit(pending.record)?;
        }
    }
    Ok(())
}
