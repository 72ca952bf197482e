//! Tests for the pre-shuffle role: shuffle-key derivation and sink routing.

use anyhow::Result;
use enrichflow::testing::MemoryTask;
use enrichflow::{
    Bucket, EnrichmentModule, ModuleRegistry, PendingRecord, PreShuffleProcessor, StageConfig,
    StageContext, StageTransition, TaskConfig,
};
use serde_json::{Value, json};

fn keyed_config(fields: &[&str]) -> TaskConfig {
    TaskConfig::new(
        Bucket::named("/pre_shuffle/bucket"),
        vec![
            StageConfig::named("clean"),
            StageConfig::named("group").with_grouping(fields.iter().copied()),
        ],
    )
}

#[test]
fn grouping_key_projects_declared_fields() -> Result<()> {
    let registry = ModuleRegistry::new();
    let mut processor = PreShuffleProcessor::setup(&keyed_config(&["a", "c"]), &registry, None)?;
    let mut task = MemoryTask::new("attempt_0");

    processor.process(0, json!({"a": 1, "b": 2, "c": 3}), &mut task)?;
    processor.teardown(&mut task)?;

    assert_eq!(task.shuffled().len(), 1);
    let (key, record) = &task.shuffled()[0];
    assert_eq!(key, &json!({"a": 1, "c": 3}));
    assert_eq!(record, &json!({"a": 1, "b": 2, "c": 3}));
    Ok(())
}

#[test]
fn missing_grouping_fields_are_omitted_from_the_key() -> Result<()> {
    let registry = ModuleRegistry::new();
    let mut processor = PreShuffleProcessor::setup(&keyed_config(&["a", "c"]), &registry, None)?;
    let mut task = MemoryTask::new("attempt_0");

    processor.process(0, json!({"a": 1, "b": 2}), &mut task)?;
    processor.teardown(&mut task)?;

    assert_eq!(task.shuffled()[0].0, json!({"a": 1}));
    Ok(())
}

#[test]
fn dotted_paths_resolve_nested_values() -> Result<()> {
    let registry = ModuleRegistry::new();
    let mut processor =
        PreShuffleProcessor::setup(&keyed_config(&["geo.city"]), &registry, None)?;
    let mut task = MemoryTask::new("attempt_0");

    processor.process(0, json!({"geo": {"city": "Oslo"}, "n": 1}), &mut task)?;
    processor.teardown(&mut task)?;

    assert_eq!(task.shuffled()[0].0, json!({"geo.city": "Oslo"}));
    Ok(())
}

/// Emits its input under a fixed precomputed key, the way the local
/// pre-aggregation handoff does.
struct FixedKeyModule;

impl EnrichmentModule for FixedKeyModule {
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
            context.emit_keyed(pending.record.clone(), json!({"precomputed": true}));
        }
        Ok(())
    }

    fn clone_for_new_grouping(&self) -> Box<dyn EnrichmentModule> {
        Box::new(FixedKeyModule)
    }
}

#[test]
fn precomputed_keys_win_over_field_projection() -> Result<()> {
    let mut registry = ModuleRegistry::new();
    registry.register("fixed_key", || Ok(Box::new(FixedKeyModule)));
    let config = TaskConfig::new(
        Bucket::named("/pre_shuffle/bucket"),
        vec![
            StageConfig::named("fixed_key").with_module("fixed_key"),
            StageConfig::named("group").with_grouping(["a"]),
        ],
    );
    let mut processor = PreShuffleProcessor::setup(&config, &registry, None)?;
    let mut task = MemoryTask::new("attempt_0");

    processor.process(0, json!({"a": 1}), &mut task)?;
    processor.teardown(&mut task)?;

    assert_eq!(task.shuffled()[0].0, json!({"precomputed": true}));
    Ok(())
}

#[test]
fn pipeline_without_grouping_emits_straight_to_the_sink() -> Result<()> {
    let registry = ModuleRegistry::new();
    let config = TaskConfig::new(
        Bucket::named("/pre_shuffle/bucket"),
        vec![StageConfig::named("clean")],
    );
    let mut processor = PreShuffleProcessor::setup(&config, &registry, None)?;
    let mut task = MemoryTask::new("attempt_0");

    processor.process(0, json!({"a": 1}), &mut task)?;
    processor.process(1, json!({"a": 2}), &mut task)?;
    processor.teardown(&mut task)?;

    assert!(task.shuffled().is_empty());
    assert_eq!(task.emitted(), &[json!({"a": 1}), json!({"a": 2})]);
    assert_eq!(task.flush_calls(), 1);
    Ok(())
}

#[test]
fn empty_stage_list_behaves_as_a_single_passthrough() -> Result<()> {
    let registry = ModuleRegistry::new();
    let config = TaskConfig::new(Bucket::named("/pre_shuffle/bucket"), Vec::new());
    let mut processor = PreShuffleProcessor::setup(&config, &registry, None)?;
    let mut task = MemoryTask::new("attempt_0");

    processor.process(0, json!({"a": 1}), &mut task)?;
    processor.teardown(&mut task)?;

    assert_eq!(task.emitted(), &[json!({"a": 1})]);
    Ok(())
}

#[test]
fn sink_flush_failure_is_escalated_at_teardown() -> Result<()> {
    let registry = ModuleRegistry::new();
    let config = TaskConfig::new(
        Bucket::named("/pre_shuffle/bucket"),
        vec![StageConfig::named("clean")],
    );
    let mut processor = PreShuffleProcessor::setup(&config, &registry, None)?;
    let mut task = MemoryTask::new("attempt_0").with_failing_flush();

    processor.process(0, json!({"a": 1}), &mut task)?;
    let err = processor
        .teardown(&mut task)
        .expect_err("sink flush timeout must be fatal");
    assert!(err.to_string().contains("downstream flush failed"));
    Ok(())
}
