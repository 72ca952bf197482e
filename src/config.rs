//! Declarative configuration consumed by the orchestration core.
//!
//! A task is configured with an ordered list of [`StageConfig`]s plus a batch
//! size. Order matters: the position of each stage in the list, combined with
//! the role a task runs in, is the only thing that determines where the stage
//! sits in the pipeline topology (see [`crate::chain`]).

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Batch size used when the task config does not specify one.
pub const DEFAULT_BATCH_SIZE: usize = 100;

/// Identity of the bucket that owns this pipeline, used for log scoping.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Bucket {
    pub full_name: String,
}

impl Bucket {
    pub fn named(full_name: impl Into<String>) -> Self {
        Self {
            full_name: full_name.into(),
        }
    }
}

/// Configuration for one enrichment stage.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StageConfig {
    /// Display name, used in diagnostics only.
    #[serde(default)]
    pub name: Option<String>,
    /// Disabled stages are dropped before any role filtering.
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Non-empty marks this stage as a grouping candidate; the first enabled
    /// one in declared order designates the shuffle key fields.
    #[serde(default)]
    pub grouping_fields: Vec<String>,
    /// Registry reference of the module implementation. `None`, or a name the
    /// registry doesn't know, resolves to the no-op passthrough.
    #[serde(default)]
    pub module: Option<String>,
    /// Opaque per-stage settings, carried verbatim on the stage's context.
    #[serde(default)]
    pub technology_overrides: Option<Value>,
}

fn default_enabled() -> bool {
    true
}

impl Default for StageConfig {
    fn default() -> Self {
        Self {
            name: None,
            enabled: true,
            grouping_fields: Vec::new(),
            module: None,
            technology_overrides: None,
        }
    }
}

impl StageConfig {
    /// A stage config with just a display name, defaulting everything else.
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            ..Self::default()
        }
    }

    /// Set the module reference.
    #[must_use]
    pub fn with_module(mut self, module: impl Into<String>) -> Self {
        self.module = Some(module.into());
        self
    }

    /// Set the grouping fields.
    #[must_use]
    pub fn with_grouping<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.grouping_fields = fields.into_iter().map(Into::into).collect();
        self
    }

    /// Mark the stage disabled.
    #[must_use]
    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    /// Name for diagnostics, falling back to a placeholder.
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or("(no name)")
    }

    /// Whether this config declares any grouping fields.
    pub fn has_grouping(&self) -> bool {
        !self.grouping_fields.is_empty()
    }
}

/// Full configuration for one task execution.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TaskConfig {
    #[serde(default)]
    pub bucket: Bucket,
    /// Ordered enrichment stage list. An empty list behaves as a single
    /// default passthrough stage.
    #[serde(default)]
    pub stages: Vec<StageConfig>,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
}

fn default_batch_size() -> usize {
    DEFAULT_BATCH_SIZE
}

impl Default for TaskConfig {
    fn default() -> Self {
        Self {
            bucket: Bucket::default(),
            stages: Vec::new(),
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }
}

impl TaskConfig {
    /// Build a task config for the given bucket and stage list.
    pub fn new(bucket: Bucket, stages: Vec<StageConfig>) -> Self {
        Self {
            bucket,
            stages,
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }

    /// Override the batch size.
    #[must_use]
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    /// The effective stage list: an empty config runs one passthrough stage.
    pub fn effective_stages(&self) -> Vec<StageConfig> {
        if self.stages.is_empty() {
            vec![StageConfig::default()]
        } else {
            self.stages.clone()
        }
    }
}
