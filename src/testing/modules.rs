//! Instrumented enrichment modules for tests.

use std::sync::{Arc, Mutex};

use anyhow::{Result, bail};
use serde_json::Value;

use crate::config::{Bucket, StageConfig};
use crate::context::StageContext;
use crate::record::PendingRecord;
use crate::stage::{EnrichmentModule, StageTransition, ValidationMessage};

/// One lifecycle call observed by a [`RecordingModule`].
#[derive(Clone, Debug, PartialEq)]
pub enum ModuleEvent {
    Initialized {
        label: String,
        transition: StageTransition,
        grouping_fields: Option<Vec<String>>,
    },
    Batch {
        label: String,
        records: Vec<Value>,
        batch_size_hint: Option<usize>,
        grouping_key: Option<Value>,
    },
    Cloned {
        label: String,
    },
    Completed {
        label: String,
        is_original: bool,
    },
}

/// Passthrough module that records every lifecycle call into a shared event
/// log. Clones for new groupings share the same log.
pub struct RecordingModule {
    label: String,
    events: Arc<Mutex<Vec<ModuleEvent>>>,
}

impl RecordingModule {
    pub fn new(label: impl Into<String>, events: Arc<Mutex<Vec<ModuleEvent>>>) -> Self {
        Self {
            label: label.into(),
            events,
        }
    }

    fn record(&self, event: ModuleEvent) {
        self.events.lock().unwrap().push(event);
    }
}

impl EnrichmentModule for RecordingModule {
    fn on_stage_initialize(
        &mut self,
        _context: &mut StageContext,
        _bucket: &Bucket,
        _config: &StageConfig,
        transition: StageTransition,
        grouping_fields: Option<Vec<String>>,
    ) {
        self.record(ModuleEvent::Initialized {
            label: self.label.clone(),
            transition,
            grouping_fields,
        });
    }

    fn on_object_batch(
        &mut self,
        context: &mut StageContext,
        records: &[PendingRecord],
        batch_size_hint: Option<usize>,
        grouping_key: Option<&Value>,
    ) -> Result<()> {
        self.record(ModuleEvent::Batch {
            label: self.label.clone(),
            records: records.iter().map(|r| r.record.clone()).collect(),
            batch_size_hint,
            grouping_key: grouping_key.cloned(),
        });
        for record in records {
            context.emit_record(record.clone());
        }
        Ok(())
    }

    fn clone_for_new_grouping(&self) -> Box<dyn EnrichmentModule> {
        self.record(ModuleEvent::Cloned {
            label: self.label.clone(),
        });
        Box::new(RecordingModule {
            label: self.label.clone(),
            events: Arc::clone(&self.events),
        })
    }

    fn on_stage_complete(&mut self, is_original: bool) {
        self.record(ModuleEvent::Completed {
            label: self.label.clone(),
            is_original,
        });
    }

    fn validate_module(
        &self,
        _context: &StageContext,
        _bucket: &Bucket,
        config: &StageConfig,
    ) -> Vec<ValidationMessage> {
        vec![ValidationMessage::success(
            "recording_module",
            format!("{}.validate", config.display_name()),
            format!("{} validated", self.label),
        )]
    }
}

/// Stamps `field: true` onto every record it sees, so tests can observe which
/// stages a record passed through and in what order.
#[derive(Clone, Debug)]
pub struct TagModule {
    field: String,
}

impl TagModule {
    pub fn new(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
        }
    }
}

impl EnrichmentModule for TagModule {
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
        for pending in records {
            let mut tagged = pending.clone();
            if let Some(obj) = tagged.record.as_object_mut() {
                obj.insert(self.field.clone(), Value::Bool(true));
            }
            context.emit_record(tagged);
        }
        Ok(())
    }

    fn clone_for_new_grouping(&self) -> Box<dyn EnrichmentModule> {
        Box::new(self.clone())
    }
}

/// Keeps a per-instance record counter and stamps it onto each record as
/// `instance_count`. A fresh clone restarts from zero, which makes any state
/// leak between group keys immediately visible.
#[derive(Clone, Debug, Default)]
pub struct CountingModule {
    seen: u64,
}

impl CountingModule {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl EnrichmentModule for CountingModule {
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
        for pending in records {
            self.seen += 1;
            let mut counted = pending.clone();
            if let Some(obj) = counted.record.as_object_mut() {
                obj.insert("instance_count".to_string(), Value::from(self.seen));
            }
            context.emit_record(counted);
        }
        Ok(())
    }

    fn clone_for_new_grouping(&self) -> Box<dyn EnrichmentModule> {
        // State isolation contract: the clone starts fresh.
        Box::new(CountingModule::new())
    }
}

/// Fails every batch call, for error-propagation tests.
#[derive(Clone, Debug)]
pub struct FailingModule {
    message: String,
}

impl FailingModule {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl EnrichmentModule for FailingModule {
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
        _context: &mut StageContext,
        _records: &[PendingRecord],
        _batch_size_hint: Option<usize>,
        _grouping_key: Option<&Value>,
    ) -> Result<()> {
        bail!("{}", self.message);
    }

    fn clone_for_new_grouping(&self) -> Box<dyn EnrichmentModule> {
        Box::new(self.clone())
    }

    fn validate_module(
        &self,
        _context: &StageContext,
        _bucket: &Bucket,
        config: &StageConfig,
    ) -> Vec<ValidationMessage> {
        vec![ValidationMessage::failure(
            "failing_module",
            format!("{}.validate", config.display_name()),
            self.message.clone(),
        )]
    }
}
