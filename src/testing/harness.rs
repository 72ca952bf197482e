//! In-memory framework collaborators for driving pipelines in tests.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{Result, bail};
use log::Level;
use serde_json::Value;

use crate::framework::{BucketLogEntry, BucketLogger, TaskContext};

/// An in-memory task context: collects everything the pipeline hands to the
/// framework so tests can assert on it afterwards.
#[derive(Debug, Default)]
pub struct MemoryTask {
    id: String,
    emitted: Vec<Value>,
    shuffled: Vec<(Value, Value)>,
    progress_calls: usize,
    flush_calls: usize,
    fail_flush: bool,
}

impl MemoryTask {
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ..Self::default()
        }
    }

    /// Make `flush_output` fail, simulating an unresponsive downstream sink.
    #[must_use]
    pub fn with_failing_flush(mut self) -> Self {
        self.fail_flush = true;
        self
    }

    /// Records emitted to the sink, in order.
    #[must_use]
    pub fn emitted(&self) -> &[Value] {
        &self.emitted
    }

    /// Raw `(key, record)` shuffle writes, in order.
    #[must_use]
    pub fn shuffled(&self) -> &[(Value, Value)] {
        &self.shuffled
    }

    /// Shuffle writes grouped by key, the way a reducer would see them. Keys
    /// are compared by their JSON serialization.
    #[must_use]
    pub fn grouped(&self) -> BTreeMap<String, Vec<Value>> {
        let mut groups: BTreeMap<String, Vec<Value>> = BTreeMap::new();
        for (key, record) in &self.shuffled {
            groups.entry(key.to_string()).or_default().push(record.clone());
        }
        groups
    }

    #[must_use]
    pub fn progress_calls(&self) -> usize {
        self.progress_calls
    }

    #[must_use]
    pub fn flush_calls(&self) -> usize {
        self.flush_calls
    }
}

impl TaskContext for MemoryTask {
    fn task_id(&self) -> &str {
        &self.id
    }

    fn progress(&mut self) {
        self.progress_calls += 1;
    }

    fn write_shuffle(&mut self, key: Value, record: Value) -> Result<()> {
        self.shuffled.push((key, record));
        Ok(())
    }

    fn emit(&mut self, record: Value) -> Result<()> {
        self.emitted.push(record);
        Ok(())
    }

    fn flush_output(&mut self, _timeout: Duration) -> Result<()> {
        if self.fail_flush {
            bail!("downstream sink did not respond within the flush bound");
        }
        self.flush_calls += 1;
        Ok(())
    }
}

/// Captured bucket-log state, shared between the logger handed to the
/// pipeline and the test that inspects it.
#[derive(Debug, Default)]
struct CapturedLog {
    entries: Vec<(Level, BucketLogEntry)>,
    flush_calls: usize,
}

/// A [`BucketLogger`] that captures entries in memory.
///
/// Cloning shares the captured state, so keep a clone around to inspect after
/// moving the original into a processor.
#[derive(Clone, Debug, Default)]
pub struct MemoryBucketLogger {
    captured: Arc<Mutex<CapturedLog>>,
    fail_flush: bool,
}

impl MemoryBucketLogger {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `flush` fail, simulating an unresponsive logging backend.
    #[must_use]
    pub fn with_failing_flush(mut self) -> Self {
        self.fail_flush = true;
        self
    }

    /// Snapshot of all captured entries.
    #[must_use]
    pub fn entries(&self) -> Vec<(Level, BucketLogEntry)> {
        self.captured.lock().unwrap().entries.clone()
    }

    /// Captured messages for one command, e.g. `"stage_a.on_object_batch"`.
    #[must_use]
    pub fn messages_for(&self, command: &str) -> Vec<String> {
        self.captured
            .lock()
            .unwrap()
            .entries
            .iter()
            .filter(|(_, entry)| entry.command == command)
            .map(|(_, entry)| entry.message.clone())
            .collect()
    }

    #[must_use]
    pub fn flush_calls(&self) -> usize {
        self.captured.lock().unwrap().flush_calls
    }
}

impl BucketLogger for MemoryBucketLogger {
    fn log(&mut self, level: Level, entry: BucketLogEntry) {
        self.captured.lock().unwrap().entries.push((level, entry));
    }

    fn flush(&mut self, _timeout: Duration) -> Result<()> {
        if self.fail_flush {
            bail!("bucket log backend did not respond within the flush bound");
        }
        self.captured.lock().unwrap().flush_calls += 1;
        Ok(())
    }
}
