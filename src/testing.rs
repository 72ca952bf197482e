//! Testing utilities for enrichment pipelines.
//!
//! Everything the orchestration core needs from its surroundings is behind a
//! trait, so pipelines can be exercised entirely in memory. This module
//! provides the in-memory collaborators and instrumented stage modules used
//! by the crate's own tests, and useful for testing user enrichment modules:
//!
//! - [`MemoryTask`] — a [`TaskContext`](crate::framework::TaskContext) that
//!   records emitted records, shuffle writes, progress signals, and flushes;
//! - [`MemoryBucketLogger`] — captures bucket-log entries for inspection;
//! - [`RecordingModule`] — passthrough stage that records every lifecycle
//!   call it receives;
//! - [`TagModule`] — stamps a marker field onto each record, to make stage
//!   order observable;
//! - [`CountingModule`] — keeps per-instance mutable state, to verify the
//!   per-group clone isolation contract;
//! - [`FailingModule`] — fails its batch call, for error propagation tests.
//!
//! # Quick start
//!
//! ```
//! use enrichflow::config::{Bucket, StageConfig, TaskConfig};
//! use enrichflow::registry::ModuleRegistry;
//! use enrichflow::roles::PreShuffleProcessor;
//! use enrichflow::testing::MemoryTask;
//! use serde_json::json;
//!
//! # fn main() -> anyhow::Result<()> {
//! let config = TaskConfig::new(
//!     Bucket::named("/test/bucket"),
//!     vec![StageConfig::named("noop")],
//! );
//! let registry = ModuleRegistry::new();
//! let mut task = MemoryTask::new("attempt_0");
//!
//! let mut processor = PreShuffleProcessor::setup(&config, &registry, None)?;
//! processor.process(0, json!({"a": 1}), &mut task)?;
//! processor.teardown(&mut task)?;
//!
//! assert_eq!(task.emitted(), &[json!({"a": 1})]);
//! # Ok(())
//! # }
//! ```

pub mod harness;
pub mod modules;

pub use harness::{MemoryBucketLogger, MemoryTask};
pub use modules::{CountingModule, FailingModule, ModuleEvent, RecordingModule, TagModule};
