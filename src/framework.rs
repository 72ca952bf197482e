//! Interfaces to the surrounding distributed execution framework.
//!
//! The orchestration core runs inside one task of a larger
//! distribution/shuffle/aggregation framework. Everything the core needs from
//! that framework — liveness reporting, the shuffle boundary, the record
//! sink, the bucket-scoped log — is behind the two traits here, so the core
//! itself stays framework-agnostic and tests can drive it with in-memory
//! collaborators (see [`crate::testing`]).

use std::time::Duration;

use anyhow::Result;
use log::Level;
use serde::Serialize;
use serde_json::Value;

/// Bound on end-of-task flushes of asynchronous downstream sinks. Exceeding
/// it is an unrecoverable error for the task, never retried locally.
pub const FLUSH_TIMEOUT: Duration = Duration::from_secs(60);

/// Per-task-attempt handle the framework passes into every processing call.
///
/// A task context is a single logical thread of control: the core calls it
/// synchronously and never shares it across task instances.
pub trait TaskContext {
    /// Identifier of this task attempt, for diagnostics.
    fn task_id(&self) -> &str;

    /// Liveness signal, so the framework does not mistake legitimate
    /// large-batch processing for a stall.
    fn progress(&mut self) {}

    /// Write a `(key, record)` pair across the shuffle boundary.
    fn write_shuffle(&mut self, key: Value, record: Value) -> Result<()>;

    /// Emit a final record to the downstream sink.
    fn emit(&mut self, record: Value) -> Result<()>;

    /// Flush any asynchronous downstream output, waiting at most `timeout`.
    ///
    /// # Errors
    /// A timeout or sink failure must be reported as an error; the core
    /// escalates it as fatal at teardown.
    fn flush_output(&mut self, timeout: Duration) -> Result<()> {
        let _ = timeout;
        Ok(())
    }
}

/// One structured entry on the bucket-scoped log.
#[derive(Clone, Debug, Serialize)]
pub struct BucketLogEntry {
    pub success: bool,
    /// Component that produced the entry.
    pub source: String,
    /// Operation the entry refers to, e.g. `"my_stage.on_object_batch"`.
    pub command: String,
    pub message: String,
    /// Optional structured payload (e.g. cumulative stage stats).
    pub details: Option<Value>,
}

impl BucketLogEntry {
    pub fn new(success: bool, command: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            success,
            source: "enrichflow".to_string(),
            command: command.into(),
            message: message.into(),
            details: None,
        }
    }

    #[must_use]
    pub fn with_details(mut self, details: Value) -> Self {
        self.details = Some(details);
        self
    }
}

/// Bucket-scoped structured log, provided by the surrounding platform.
///
/// Entries are emitted as the pipeline progresses, independent of whether the
/// task ultimately succeeds, so operators can see per-stage in/out counts
/// even on failure.
pub trait BucketLogger {
    fn log(&mut self, level: Level, entry: BucketLogEntry);

    /// Flush buffered entries, waiting at most `timeout`.
    ///
    /// # Errors
    /// A timeout or failure is escalated by the caller, not swallowed.
    fn flush(&mut self, timeout: Duration) -> Result<()> {
        let _ = timeout;
        Ok(())
    }
}

/// Log an entry if a bucket logger is attached.
pub(crate) fn bucket_log(
    logger: &mut Option<Box<dyn BucketLogger>>,
    level: Level,
    entry: BucketLogEntry,
) {
    if let Some(logger) = logger.as_mut() {
        logger.log(level, entry);
    }
}
