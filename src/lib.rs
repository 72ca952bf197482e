//! # Enrichflow
//!
//! The **in-task orchestration core** of a distributed batch-enrichment
//! pipeline. Enrichflow runs inside each unit of a larger record-distribution
//! / shuffle / aggregation framework and chains an ordered, user-configured
//! list of pluggable enrichment stages over the records a task owns: batching
//! them for efficiency, routing grouped records through the shuffle boundary,
//! and guaranteeing every stage a complete, correctly-ordered, correctly-
//! batched view of its input regardless of which phase it executes in.
//!
//! ## Key ideas
//!
//! - **One configuration, three roles** — the same ordered stage list drives
//!   the pre-shuffle, local pre-aggregation, and post-shuffle aggregation
//!   phases; each role takes the slice of the list that belongs to it.
//! - **Topology by position** — a stage's place in the abstract pipeline
//!   (input, mid-pipeline batch, shuffle boundary, sink) is inferred purely
//!   from list order and role, and handed to the stage as a
//!   `(previous, next)` transition pair at initialization.
//! - **Serial chaining** — stages execute one feeding the next; the output of
//!   the last stage goes to the shuffle boundary or the sink.
//! - **Pluggable by configuration** — stage implementations are looked up by
//!   name in a [`ModuleRegistry`]; unknown references degrade to a no-op
//!   passthrough.
//!
//! ## Quick start
//!
//! ```
//! use enrichflow::config::{Bucket, StageConfig, TaskConfig};
//! use enrichflow::registry::ModuleRegistry;
//! use enrichflow::roles::PreShuffleProcessor;
//! use enrichflow::testing::MemoryTask;
//! use serde_json::json;
//!
//! # fn main() -> anyhow::Result<()> {
//! // Two stages; the second one designates the shuffle key fields.
//! let config = TaskConfig::new(
//!     Bucket::named("/acme/events"),
//!     vec![
//!         StageConfig::named("clean"),
//!         StageConfig::named("by_user").with_grouping(["user_id"]),
//!     ],
//! )
//! .with_batch_size(2);
//!
//! let registry = ModuleRegistry::new(); // both resolve to passthrough here
//! let mut task = MemoryTask::new("attempt_0");
//!
//! let mut mapper = PreShuffleProcessor::setup(&config, &registry, None)?;
//! mapper.process(0, json!({"user_id": "u1", "n": 1}), &mut task)?;
//! mapper.process(1, json!({"user_id": "u2", "n": 2}), &mut task)?;
//! mapper.teardown(&mut task)?;
//!
//! // Records were keyed by projecting the grouping fields.
//! assert_eq!(task.shuffled()[0].0, json!({"user_id": "u1"}));
//! # Ok(())
//! # }
//! ```
//!
//! ## Execution model
//!
//! Each task execution is a single logical thread of control: records (or
//! grouped record sets) arrive one at a time and are processed synchronously.
//! Records buffer in the accumulator until the batch threshold (default 100)
//! is reached, then dispatch through the stage chain; at task teardown a
//! forced flush empties the buffer, every binding is notified of completion,
//! and asynchronous downstream output is flushed with a bounded wait.
//!
//! Failure is surfaced, not retried: a stage load failure, a stage processing
//! error, or a flush timeout aborts the task, leaving retry to the
//! surrounding scheduler at task-attempt granularity.
//!
//! ## Module overview
//!
//! - [`config`] — stage and task configuration surface
//! - [`record`] — record types and grouping-key projection
//! - [`stage`] — the enrichment-stage capability contract
//! - [`context`] — per-stage private execution contexts
//! - [`registry`] — module reference → factory lookup
//! - [`chain`] — binding resolution, topology inference, batch dispatch
//! - [`roles`] — the framework-facing role processors
//! - [`framework`] — traits the surrounding framework implements
//! - [`testing`] — in-memory collaborators and instrumented test modules

pub mod chain;
pub mod config;
pub mod context;
pub mod framework;
pub mod record;
pub mod registry;
pub mod roles;
pub mod stage;
pub mod testing;

pub use chain::{GroupingSpec, PipelineRole, StageBinding, StageChain, StageStats};
pub use config::{Bucket, DEFAULT_BATCH_SIZE, StageConfig, TaskConfig};
pub use context::StageContext;
pub use framework::{BucketLogEntry, BucketLogger, FLUSH_TIMEOUT, TaskContext};
pub use record::{PendingRecord, grouping_key, json_property};
pub use registry::ModuleRegistry;
pub use roles::{GroupProcessor, PreShuffleProcessor, ValidationProcessor};
pub use stage::{EnrichmentModule, Passthrough, ProcessingStage, StageTransition, ValidationMessage};
