//! Per-stage execution context.
//!
//! Every resolved stage gets its own [`StageContext`], cloned from the task's
//! settings. The context is the only channel a module has for producing
//! output: `on_object_batch` writes results through [`StageContext::emit`] (or
//! its keyed variant) and the dispatcher adopts the buffered output as the
//! next stage's input. Contexts are never shared between stages, so one
//! stage's output can never interleave with another's.

use serde_json::Value;

use crate::record::PendingRecord;

/// Private execution context owned by one stage binding.
#[derive(Debug, Default)]
pub struct StageContext {
    batch_size: usize,
    technology_overrides: Option<Value>,
    output: Vec<PendingRecord>,
    next_seq: u64,
}

impl StageContext {
    /// Create a context carrying the task's batch size.
    #[must_use]
    pub fn new(batch_size: usize) -> Self {
        Self {
            batch_size,
            technology_overrides: None,
            output: Vec::new(),
            next_seq: 0,
        }
    }

    /// Attach the stage's technology overrides.
    #[must_use]
    pub fn with_overrides(mut self, overrides: Option<Value>) -> Self {
        self.technology_overrides = overrides;
        self
    }

    /// Batch size hint inherited from the task configuration.
    #[must_use]
    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// The stage's opaque configuration overrides, if any.
    pub fn technology_overrides(&self) -> Option<&Value> {
        self.technology_overrides.as_ref()
    }

    /// Emit an output record. The context assigns the sequence id.
    pub fn emit(&mut self, record: Value) {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.output.push(PendingRecord::new(seq, record));
    }

    /// Emit an output record with a precomputed shuffle key.
    ///
    /// The key short-circuits grouping-field projection when the record
    /// reaches a shuffle boundary.
    pub fn emit_keyed(&mut self, record: Value, key: Value) {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.output.push(PendingRecord::with_key(seq, record, key));
    }

    /// Emit an already-wrapped record, preserving its sequence id and key.
    pub fn emit_record(&mut self, record: PendingRecord) {
        self.output.push(record);
    }

    /// Records emitted since the last clear.
    pub fn output(&self) -> &[PendingRecord] {
        &self.output
    }

    /// Drain the buffered output, leaving the context empty.
    pub fn take_output(&mut self) -> Vec<PendingRecord> {
        std::mem::take(&mut self.output)
    }

    /// Discard any buffered output.
    pub fn clear_output(&mut self) {
        self.output.clear();
    }

    /// A fresh context with the same settings and an empty buffer.
    ///
    /// Used for per-group scratch contexts so a group's output never touches
    /// the long-lived binding context.
    #[must_use]
    pub fn fresh_clone(&self) -> Self {
        Self {
            batch_size: self.batch_size,
            technology_overrides: self.technology_overrides.clone(),
            output: Vec::new(),
            next_seq: 0,
        }
    }
}
