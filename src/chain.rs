//! Stage binding resolution, topology inference, and the batch
//! accumulator/dispatcher shared by every role processor.
//!
//! A [`StageChain`] owns the ordered [`StageBinding`]s for one task
//! execution plus the buffer of pending records. Records are ingested one at
//! a time (or drained from a group) and dispatched through the bound-stage
//! chain whenever the buffer reaches the configured batch size, or
//! unconditionally on the end-of-task flush. Stages run serially, each one's
//! output feeding the next; the tail output goes to the role's final-stage
//! handler, which routes it to the shuffle boundary or the sink.
//!
//! The chain is also where a stage's abstract position is inferred: list
//! order and the executing [`PipelineRole`] fully determine the
//! `(previous, next)` transition each module receives at initialization.

use anyhow::{Context, Result, anyhow};
use log::{Level, debug, info};
use serde::Serialize;
use serde_json::json;

use crate::config::{Bucket, StageConfig, TaskConfig};
use crate::context::StageContext;
use crate::framework::{BucketLogEntry, BucketLogger, FLUSH_TIMEOUT, TaskContext, bucket_log};
use crate::record::{PendingRecord, UNKNOWN_GROUPING_FIELD};
use crate::registry::ModuleRegistry;
use crate::stage::{EnrichmentModule, ProcessingStage};

/// The execution role a task runs the shared configuration model in.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PipelineRole {
    /// One record at a time, before redistribution.
    PreShuffle,
    /// Pre-combines records sharing a key on the same node, before the full
    /// shuffle.
    LocalPreAggregation,
    /// Receives all records for a key after the shuffle.
    Aggregation,
    /// Runs stage self-validation only; no data is processed.
    Validation,
}

impl PipelineRole {
    /// Human-readable role label for diagnostics.
    pub fn label(self) -> &'static str {
        match self {
            PipelineRole::PreShuffle => "pre_shuffle",
            PipelineRole::LocalPreAggregation => "local_pre_aggregation",
            PipelineRole::Aggregation => "aggregation",
            PipelineRole::Validation => "validation",
        }
    }

    /// The conceptual stage feeding this role's first binding.
    fn starting_stage(self) -> ProcessingStage {
        match self {
            PipelineRole::PreShuffle => ProcessingStage::Input,
            PipelineRole::LocalPreAggregation | PipelineRole::Aggregation => {
                ProcessingStage::Grouping
            }
            PipelineRole::Validation => ProcessingStage::Unknown,
        }
    }

    /// The stage this role's last binding feeds into.
    fn tail_stage(self, grouping_present: bool) -> ProcessingStage {
        match self {
            PipelineRole::PreShuffle if grouping_present => ProcessingStage::Grouping,
            PipelineRole::PreShuffle => ProcessingStage::Output,
            PipelineRole::LocalPreAggregation => ProcessingStage::Grouping,
            PipelineRole::Aggregation => ProcessingStage::Output,
            PipelineRole::Validation => ProcessingStage::Unknown,
        }
    }

    /// Which of the full ordered (enabled) config list belongs to this role.
    fn select(self, configs: Vec<(usize, StageConfig)>) -> Vec<(usize, StageConfig)> {
        match self {
            PipelineRole::PreShuffle => configs
                .into_iter()
                .take_while(|(_, cfg)| !cfg.has_grouping())
                .collect(),
            PipelineRole::LocalPreAggregation => configs
                .into_iter()
                .filter(|(_, cfg)| cfg.has_grouping())
                .collect(),
            PipelineRole::Aggregation => configs
                .into_iter()
                .skip_while(|(_, cfg)| !cfg.has_grouping())
                .collect(),
            PipelineRole::Validation => configs,
        }
    }
}

/// Cumulative in/out counters for one binding, scoped to one task execution.
///
/// Owned exclusively by its binding and updated only from the single-threaded
/// dispatch path, so no synchronization is needed.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct StageStats {
    pub input: u64,
    pub output: u64,
}

/// The single stage whose configuration designates the shuffle key fields:
/// the first enabled config, in declared order across the entire list, with
/// non-empty grouping fields.
#[derive(Clone, Debug)]
pub struct GroupingSpec {
    /// Position in the full (effective) config list.
    pub index: usize,
    pub config: StageConfig,
}

impl GroupingSpec {
    /// The declared key fields, with the unknown-fields sentinel removed.
    pub fn known_fields(&self) -> Vec<String> {
        self.config
            .grouping_fields
            .iter()
            .filter(|f| f.as_str() != UNKNOWN_GROUPING_FIELD)
            .cloned()
            .collect()
    }
}

/// One configured, instantiated enrichment stage.
pub struct StageBinding {
    pub module: Box<dyn EnrichmentModule>,
    /// Private cloned execution context; never shared with another binding.
    pub context: StageContext,
    pub config: StageConfig,
    /// Position of `config` in the full (effective) config list.
    pub config_index: usize,
    pub stats: StageStats,
}

/// Handler for the last stage's output on a dispatch pass.
pub type FinalStage<'a> =
    &'a mut dyn FnMut(Vec<PendingRecord>, &mut dyn TaskContext) -> Result<()>;

/// Ordered stage bindings plus the pending-record buffer for one task.
pub struct StageChain {
    bindings: Vec<StageBinding>,
    grouping: Option<GroupingSpec>,
    bucket: Bucket,
    batch: Vec<PendingRecord>,
    batch_size: usize,
    logger: Option<Box<dyn BucketLogger>>,
}

impl StageChain {
    /// Resolve the bucket's ordered configuration into the bindings relevant
    /// to `role`, instantiating each module through the registry.
    ///
    /// Also determines the [`GroupingSpec`] across the entire unfiltered
    /// configuration and attaches the bucket logging handle.
    ///
    /// # Errors
    /// A module factory failure is fatal: it is logged with full detail and
    /// propagated, aborting the owning task.
    pub fn resolve(
        config: &TaskConfig,
        role: PipelineRole,
        registry: &ModuleRegistry,
        mut logger: Option<Box<dyn BucketLogger>>,
    ) -> Result<Self> {
        let stages = config.effective_stages();

        let grouping = stages
            .iter()
            .enumerate()
            .filter(|(_, cfg)| cfg.enabled)
            .find(|(_, cfg)| cfg.has_grouping())
            .map(|(index, cfg)| GroupingSpec {
                index,
                config: cfg.clone(),
            });

        let enabled: Vec<(usize, StageConfig)> = stages
            .into_iter()
            .enumerate()
            .filter(|(_, cfg)| cfg.enabled)
            .collect();

        let mut bindings = Vec::new();
        for (config_index, stage_config) in role.select(enabled) {
            let name = stage_config.display_name().to_string();
            let reference = stage_config.module.clone();
            info!("trying to launch stage {name} with entry point {reference:?}");

            let module = match registry.instantiate(reference.as_deref()) {
                Ok(module) => module,
                Err(e) => {
                    bucket_log(
                        &mut logger,
                        Level::Error,
                        BucketLogEntry::new(
                            false,
                            format!("{name}.on_stage_initialize"),
                            format!(
                                "error initializing {name}:{}: {e}",
                                reference.as_deref().unwrap_or("(unknown entry)")
                            ),
                        )
                        .with_details(json!({ "full_error": format!("{e:?}") })),
                    );
                    return Err(e.context(format!("failed to instantiate stage {name}")));
                }
            };

            bucket_log(
                &mut logger,
                Level::Info,
                BucketLogEntry::new(
                    true,
                    format!("{name}.on_stage_initialize"),
                    format!(
                        "initialized stage {name}:{}",
                        reference.as_deref().unwrap_or("(passthrough)")
                    ),
                ),
            );
            info!("completed initialization of stage {name}");

            let context = StageContext::new(config.batch_size)
                .with_overrides(stage_config.technology_overrides.clone());
            bindings.push(StageBinding {
                module,
                context,
                config: stage_config,
                config_index,
                stats: StageStats::default(),
            });
        }

        Ok(Self {
            bindings,
            grouping,
            bucket: config.bucket.clone(),
            batch: Vec::new(),
            batch_size: config.batch_size,
            logger,
        })
    }

    /// Run topology inference and each module's one-time initialization hook.
    ///
    /// `previous` starts at the role's starting stage and becomes `Batch`
    /// after the first binding; `next` is `Batch` while another binding
    /// follows, then the role's tail stage. The grouping field names go to
    /// the last binding only, and only when a grouping spec exists.
    pub fn initialize(&mut self, role: PipelineRole) {
        info!(
            "setup {} for {} grouping={:?}",
            role.label(),
            self.bucket.full_name,
            self.grouping.as_ref().map(|g| g.config.display_name()),
        );

        let grouping_fields = self.grouping.as_ref().map(GroupingSpec::known_fields);
        let grouping_present = self.grouping.is_some();
        let count = self.bindings.len();

        let mut previous = role.starting_stage();
        for (i, binding) in self.bindings.iter_mut().enumerate() {
            let last = i + 1 == count;
            let next = if last {
                role.tail_stage(grouping_present)
            } else {
                ProcessingStage::Batch
            };
            info!(
                "set up enrichment module {} as ({previous:?}, {next:?})",
                binding.config.display_name()
            );
            binding.module.on_stage_initialize(
                &mut binding.context,
                &self.bucket,
                &binding.config,
                (previous, next),
                if last { grouping_fields.clone() } else { None },
            );
            previous = ProcessingStage::Batch;
        }
    }

    /// Buffer a record until the next dispatch.
    pub fn push(&mut self, record: PendingRecord) {
        self.batch.push(record);
    }

    /// Number of records currently buffered.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.batch.len()
    }

    #[must_use]
    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    #[must_use]
    pub fn bucket(&self) -> &Bucket {
        &self.bucket
    }

    #[must_use]
    pub fn grouping(&self) -> Option<&GroupingSpec> {
        self.grouping.as_ref()
    }

    #[must_use]
    pub fn bindings(&self) -> &[StageBinding] {
        &self.bindings
    }

    pub fn bindings_mut(&mut self) -> &mut [StageBinding] {
        &mut self.bindings
    }

    /// Whether exactly one binding resolved for this role.
    #[must_use]
    pub fn is_single_stage(&self) -> bool {
        self.bindings.len() == 1
    }

    /// Whether the binding at `index` is the designated grouping stage.
    fn is_grouping_binding(&self, index: usize) -> bool {
        matches!(&self.grouping, Some(g) if g.index == self.bindings[index].config_index)
    }

    /// Dispatch the buffered records through the chain if the batch threshold
    /// has been reached, or unconditionally when `flush` is set.
    ///
    /// The grouping binding is skipped — its shuffle work happens outside the
    /// chain. Every other binding's output becomes the next one's input and
    /// its stats accumulate the in/out sizes. On a flush pass, each binding
    /// that ever saw input gets a completion entry on the bucket log and the
    /// log is flushed with a bounded wait. If the original buffer was
    /// non-empty, the tail output is handed to `final_stage`.
    ///
    /// # Errors
    /// A stage's batch error is not caught locally; it propagates and aborts
    /// the task. A bucket-log flush timeout or failure is likewise escalated.
    pub fn check_batch(
        &mut self,
        flush: bool,
        task: &mut dyn TaskContext,
        final_stage: FinalStage<'_>,
    ) -> Result<()> {
        if flush {
            info!("completing task {}", task.task_id());
        }
        if self.batch.len() < self.batch_size && !flush {
            return Ok(());
        }

        task.progress();

        let had_input = !self.batch.is_empty();
        let mut current = std::mem::take(&mut self.batch);

        for i in 0..self.bindings.len() {
            if had_input && !self.is_grouping_binding(i) {
                let binding = &mut self.bindings[i];
                binding.context.clear_output();

                let batch_in = current.len();
                binding.module.on_object_batch(
                    &mut binding.context,
                    &current,
                    Some(batch_in),
                    None,
                )?;
                current = binding.context.take_output();
                let batch_out = current.len();

                binding.stats.input += batch_in as u64;
                binding.stats.output += batch_out as u64;

                let name = binding.config.display_name().to_string();
                let stats = binding.stats;
                debug!(
                    "batch stage {name} task={} in={batch_in} out={batch_out} \
                     cumul_in={} cumul_out={}",
                    task.task_id(),
                    stats.input,
                    stats.output
                );
                bucket_log(
                    &mut self.logger,
                    Level::Trace,
                    BucketLogEntry::new(
                        true,
                        format!("{name}.on_object_batch"),
                        format!(
                            "new batch stage {name} task={} in={batch_in} out={batch_out} \
                             cumul_in={} cumul_out={}",
                            task.task_id(),
                            stats.input,
                            stats.output
                        ),
                    ),
                );
            }

            if flush && self.bindings[i].stats.input > 0 {
                let name = self.bindings[i].config.display_name().to_string();
                let stats = self.bindings[i].stats;
                info!(
                    "stage {name} completed, output records={} final_stage={}",
                    current.len(),
                    i + 1 == self.bindings.len()
                );
                bucket_log(
                    &mut self.logger,
                    Level::Info,
                    BucketLogEntry::new(
                        true,
                        format!("{name}.complete_batch_final_stage"),
                        format!(
                            "completed stage {name} task={} in={} out={}",
                            task.task_id(),
                            stats.input,
                            stats.output
                        ),
                    )
                    .with_details(serde_json::to_value(stats)?),
                );
                if let Some(logger) = self.logger.as_mut() {
                    logger
                        .flush(FLUSH_TIMEOUT)
                        .with_context(|| format!("bucket log flush failed after stage {name}"))?;
                }
            }
        }

        if had_input {
            final_stage(current, task)?;
        }
        Ok(())
    }

    /// The first binding of the chain, or an error if the role resolved none.
    pub(crate) fn head(&self) -> Result<&StageBinding> {
        self.bindings
            .first()
            .ok_or_else(|| anyhow!("no enrichment stages resolved for this role"))
    }
}
