//! Tests for the batch accumulator and dispatcher: threshold behavior,
//! counter accumulation, completion logging, and failure propagation.

use std::sync::{Arc, Mutex};

use anyhow::Result;
use enrichflow::testing::{FailingModule, MemoryBucketLogger, MemoryTask, ModuleEvent, RecordingModule};
use enrichflow::{Bucket, ModuleRegistry, PreShuffleProcessor, StageConfig, TaskConfig};
use log::Level;
use serde_json::json;

type Events = Arc<Mutex<Vec<ModuleEvent>>>;

fn single_stage_setup(
    batch_size: usize,
    events: &Events,
) -> Result<PreShuffleProcessor> {
    let mut registry = ModuleRegistry::new();
    let events = Arc::clone(events);
    registry.register("rec", move || {
        Ok(Box::new(RecordingModule::new("rec", Arc::clone(&events))))
    });
    let config = TaskConfig::new(
        Bucket::named("/batching/bucket"),
        vec![StageConfig::named("rec").with_module("rec")],
    )
    .with_batch_size(batch_size);
    PreShuffleProcessor::setup(&config, &registry, None)
}

fn batch_sizes(events: &Events) -> Vec<usize> {
    events
        .lock()
        .unwrap()
        .iter()
        .filter_map(|e| match e {
            ModuleEvent::Batch { records, .. } => Some(records.len()),
            _ => None,
        })
        .collect()
}

#[test]
fn dispatch_fires_exactly_at_threshold() -> Result<()> {
    let events: Events = Arc::default();
    let mut processor = single_stage_setup(3, &events)?;
    let mut task = MemoryTask::new("attempt_0");

    for seq in 0..7u64 {
        processor.process(seq, json!({"seq": seq}), &mut task)?;
        // The buffer never exceeds the threshold and empties when it hits it.
        assert!(processor.chain().pending() < 3);
    }
    assert_eq!(batch_sizes(&events), vec![3, 3]);

    processor.teardown(&mut task)?;
    assert_eq!(batch_sizes(&events), vec![3, 3, 1]);
    assert_eq!(processor.chain().pending(), 0);
    assert_eq!(task.emitted().len(), 7);
    Ok(())
}

#[test]
fn buffer_is_empty_after_every_dispatch() -> Result<()> {
    let events: Events = Arc::default();
    let mut processor = single_stage_setup(2, &events)?;
    let mut task = MemoryTask::new("attempt_0");

    processor.process(0, json!({"n": 0}), &mut task)?;
    assert_eq!(processor.chain().pending(), 1);
    processor.process(1, json!({"n": 1}), &mut task)?;
    assert_eq!(processor.chain().pending(), 0);
    processor.process(2, json!({"n": 2}), &mut task)?;
    assert_eq!(processor.chain().pending(), 1);
    processor.teardown(&mut task)?;
    assert_eq!(processor.chain().pending(), 0);
    Ok(())
}

#[test]
fn batch_size_hint_matches_input_size() -> Result<()> {
    let events: Events = Arc::default();
    let mut processor = single_stage_setup(3, &events)?;
    let mut task = MemoryTask::new("attempt_0");

    for seq in 0..3u64 {
        processor.process(seq, json!({"seq": seq}), &mut task)?;
    }

    let hints: Vec<Option<usize>> = events
        .lock()
        .unwrap()
        .iter()
        .filter_map(|e| match e {
            ModuleEvent::Batch {
                batch_size_hint, ..
            } => Some(*batch_size_hint),
            _ => None,
        })
        .collect();
    assert_eq!(hints, vec![Some(3)]);
    Ok(())
}

#[test]
fn stats_accumulate_across_dispatches() -> Result<()> {
    let events: Events = Arc::default();
    let mut processor = single_stage_setup(3, &events)?;
    let mut task = MemoryTask::new("attempt_0");

    let mut last_input = 0;
    for seq in 0..7u64 {
        processor.process(seq, json!({"seq": seq}), &mut task)?;
        let stats = processor.chain().bindings()[0].stats;
        // Counters never decrease.
        assert!(stats.input >= last_input);
        last_input = stats.input;
    }
    processor.teardown(&mut task)?;

    let stats = processor.chain().bindings()[0].stats;
    assert_eq!(stats.input, 7);
    assert_eq!(stats.output, 7);
    Ok(())
}

#[test]
fn stats_are_attributed_per_binding() -> Result<()> {
    let events: Events = Arc::default();
    let mut registry = ModuleRegistry::new();
    for label in ["first", "second"] {
        let events = Arc::clone(&events);
        registry.register(label, move || {
            Ok(Box::new(RecordingModule::new(label, Arc::clone(&events))))
        });
    }
    let config = TaskConfig::new(
        Bucket::named("/batching/bucket"),
        vec![
            StageConfig::named("first").with_module("first"),
            StageConfig::named("second").with_module("second"),
        ],
    )
    .with_batch_size(2);
    let mut processor = PreShuffleProcessor::setup(&config, &registry, None)?;
    let mut task = MemoryTask::new("attempt_0");

    for seq in 0..5u64 {
        processor.process(seq, json!({"seq": seq}), &mut task)?;
    }
    processor.teardown(&mut task)?;

    for binding in processor.chain().bindings() {
        assert_eq!(binding.stats.input, 5);
        assert_eq!(binding.stats.output, 5);
    }
    Ok(())
}

#[test]
fn empty_task_flushes_without_batch_calls() -> Result<()> {
    let events: Events = Arc::default();
    let mut processor = single_stage_setup(3, &events)?;
    let mut task = MemoryTask::new("attempt_0");

    processor.teardown(&mut task)?;

    assert!(batch_sizes(&events).is_empty());
    assert!(task.emitted().is_empty());
    let completed: Vec<bool> = events
        .lock()
        .unwrap()
        .iter()
        .filter_map(|e| match e {
            ModuleEvent::Completed { is_original, .. } => Some(*is_original),
            _ => None,
        })
        .collect();
    assert_eq!(completed, vec![true]);
    Ok(())
}

#[test]
fn stage_failure_propagates_out_of_dispatch() -> Result<()> {
    let mut registry = ModuleRegistry::new();
    registry.register("boom", || Ok(Box::new(FailingModule::new("stage exploded"))));
    let config = TaskConfig::new(
        Bucket::named("/batching/bucket"),
        vec![StageConfig::named("boom").with_module("boom")],
    )
    .with_batch_size(2);
    let mut processor = PreShuffleProcessor::setup(&config, &registry, None)?;
    let mut task = MemoryTask::new("attempt_0");

    processor.process(0, json!({"n": 0}), &mut task)?;
    let err = processor
        .process(1, json!({"n": 1}), &mut task)
        .expect_err("dispatch should surface the stage error");
    assert!(err.to_string().contains("stage exploded"));
    Ok(())
}

#[test]
fn flush_writes_completion_entries_to_the_bucket_log() -> Result<()> {
    let events: Events = Arc::default();
    let mut registry = ModuleRegistry::new();
    {
        let events = Arc::clone(&events);
        registry.register("rec", move || {
            Ok(Box::new(RecordingModule::new("rec", Arc::clone(&events))))
        });
    }
    let config = TaskConfig::new(
        Bucket::named("/batching/bucket"),
        vec![StageConfig::named("rec").with_module("rec")],
    )
    .with_batch_size(2);
    let logger = MemoryBucketLogger::new();
    let mut processor =
        PreShuffleProcessor::setup(&config, &registry, Some(Box::new(logger.clone())))?;
    let mut task = MemoryTask::new("attempt_7");

    for seq in 0..3u64 {
        processor.process(seq, json!({"seq": seq}), &mut task)?;
    }
    processor.teardown(&mut task)?;

    let batches = logger.messages_for("rec.on_object_batch");
    assert_eq!(batches.len(), 2);
    assert!(batches[0].contains("task=attempt_7"));

    let completions = logger.messages_for("rec.complete_batch_final_stage");
    assert_eq!(completions.len(), 1);
    assert!(completions[0].contains("in=3 out=3"));
    assert!(logger.flush_calls() >= 1);

    let completion_level = logger
        .entries()
        .into_iter()
        .find(|(_, e)| e.command == "rec.complete_batch_final_stage")
        .map(|(level, _)| level);
    assert_eq!(completion_level, Some(Level::Info));
    Ok(())
}

#[test]
fn bucket_log_flush_failure_is_escalated() -> Result<()> {
    let events: Events = Arc::default();
    let mut registry = ModuleRegistry::new();
    {
        let events = Arc::clone(&events);
        registry.register("rec", move || {
            Ok(Box::new(RecordingModule::new("rec", Arc::clone(&events))))
        });
    }
    let config = TaskConfig::new(
        Bucket::named("/batching/bucket"),
        vec![StageConfig::named("rec").with_module("rec")],
    );
    let logger = MemoryBucketLogger::new().with_failing_flush();
    let mut processor =
        PreShuffleProcessor::setup(&config, &registry, Some(Box::new(logger)))?;
    let mut task = MemoryTask::new("attempt_0");

    processor.process(0, json!({"n": 0}), &mut task)?;
    let err = processor
        .teardown(&mut task)
        .expect_err("log flush timeout must be fatal");
    assert!(err.to_string().contains("bucket log flush failed"));
    Ok(())
}
