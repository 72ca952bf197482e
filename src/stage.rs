//! The enrichment-stage capability contract.
//!
//! User logic plugs into the pipeline by implementing [`EnrichmentModule`].
//! The orchestration core never inspects what a module does with its records;
//! it only drives the lifecycle: one `on_stage_initialize` at setup, any
//! number of `on_object_batch` calls, and one `on_stage_complete` at
//! teardown. A module learns where it sits in the pipeline purely from the
//! `(previous, next)` [`ProcessingStage`] pair it receives at initialization —
//! e.g. `(Input, Grouping)` means "sole pre-shuffle stage feeding the shuffle"
//! while `(Batch, Output)` means "last stage before the sink".

use anyhow::Result;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::config::{Bucket, StageConfig};
use crate::context::StageContext;
use crate::record::PendingRecord;

/// Abstract position of a stage in the pipeline topology.
///
/// Computed once at setup from list order and the executing role, immutable
/// thereafter.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProcessingStage {
    Unknown,
    /// Raw task input, before any stage has run.
    Input,
    /// Mid-pipeline, fed by another stage's batch output.
    Batch,
    /// The shuffle boundary.
    Grouping,
    /// The sink.
    Output,
}

/// The `(previous, next)` pair handed to a module at initialization.
pub type StageTransition = (ProcessingStage, ProcessingStage);

/// Diagnostic message produced by a module's self-validation.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ValidationMessage {
    pub success: bool,
    /// Component that produced the message.
    pub source: String,
    /// Operation being validated, e.g. `"my_stage.validate"`.
    pub command: String,
    pub message: String,
}

impl ValidationMessage {
    pub fn success(
        source: impl Into<String>,
        command: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            success: true,
            source: source.into(),
            command: command.into(),
            message: message.into(),
        }
    }

    pub fn failure(
        source: impl Into<String>,
        command: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            success: false,
            source: source.into(),
            command: command.into(),
            message: message.into(),
        }
    }
}

/// Capability contract for pluggable enrichment logic.
///
/// Implementations write their results into the private [`StageContext`] they
/// are handed; the dispatcher takes the buffered output as the next stage's
/// input (or routes it to the shuffle boundary / sink if this is the last
/// stage).
pub trait EnrichmentModule: Send {
    /// Called once per binding at setup.
    ///
    /// `grouping_fields` is populated only for the last stage of a chain that
    /// feeds a shuffle boundary, letting that stage know the key fields.
    fn on_stage_initialize(
        &mut self,
        context: &mut StageContext,
        bucket: &Bucket,
        config: &StageConfig,
        transition: StageTransition,
        grouping_fields: Option<Vec<String>>,
    );

    /// Process one batch of records, writing results through `context`.
    ///
    /// `batch_size_hint` is the input size when known. `grouping_key` is set
    /// when the batch is a grouped record set sharing one shuffle key.
    fn on_object_batch(
        &mut self,
        context: &mut StageContext,
        records: &[PendingRecord],
        batch_size_hint: Option<usize>,
        grouping_key: Option<&Value>,
    ) -> Result<()>;

    /// Return a fresh, state-isolated instance for use under a new shuffle
    /// key. Mutable state accumulated under one key must never be observable
    /// under another.
    fn clone_for_new_grouping(&self) -> Box<dyn EnrichmentModule>;

    /// Called once per binding at task teardown. `is_original` is true for
    /// the binding driving the task (the head binding post-shuffle, every
    /// binding pre-shuffle).
    fn on_stage_complete(&mut self, is_original: bool) {
        let _ = is_original;
    }

    /// Pre-flight self-check, used only by the validation role. No data is
    /// processed.
    fn validate_module(
        &self,
        context: &StageContext,
        bucket: &Bucket,
        config: &StageConfig,
    ) -> Vec<ValidationMessage> {
        let _ = (context, bucket, config);
        Vec::new()
    }
}

/// The documented no-op module: copies its input to its output unchanged.
///
/// Configs whose module reference is absent, or names nothing in the
/// registry, resolve to this, so a misconfigured optional stage degrades to a
/// passthrough instead of failing the pipeline.
#[derive(Clone, Copy, Debug, Default)]
pub struct Passthrough;

impl EnrichmentModule for Passthrough {
    fn on_stage_initialize(
        &mut self,
        _context: &mut StageContext,
        _bucket: &Bucket,
        _config: &StageConfig,
        _transition: StageTransition,
        _grouping_fields: Option<Vec<String>>,
    ) {
    }

    fn on_object_batch(
        &mut self,
        context: &mut StageContext,
        records: &[PendingRecord],
        _batch_size_hint: Option<usize>,
        _grouping_key: Option<&Value>,
    ) -> Result<()> {
        for record in records {
            context.emit_record(record.clone());
        }
        Ok(())
    }

    fn clone_for_new_grouping(&self) -> Box<dyn EnrichmentModule> {
        Box::new(Passthrough)
    }
}
