//! File-watcher driven hot reload tests

use std::fs;
use std::sync::Arc;
use std::time::Duration;

use component_runtime::{
    compiler_fn, Component, ComponentDefinition, DefinitionSet, HotReloadConfig, RuntimeConfig,
    RuntimeEnvironment, RuntimeError, SchedulerConfig,
};
use serde_json::json;

use crate::wait_until;

/// `Counter` whose `increment` adds `step`.
fn counter(step: i64) -> Arc<ComponentDefinition> {
    ComponentDefinition::builder("Counter")
        .state("counter", 0)
        .method("increment", move |state, _| {
            let next = state["counter"].as_i64().unwrap_or(0) + step;
            state.insert("counter".into(), json!(next));
            Ok(json!(next))
        })
        .build()
}

fn runtime() -> RuntimeEnvironment {
    let config = RuntimeConfig {
        scheduler: SchedulerConfig {
            num_workers: 2,
            idle_timeout_ms: 5,
            join_timeout_ms: 2000,
        },
        hot_reload: HotReloadConfig {
            debounce_ms: 20,
            poll_interval_ms: 10,
            ..HotReloadConfig::default()
        },
        ..RuntimeConfig::default()
    };

    // Source text is the step, e.g. "10".
    RuntimeEnvironment::new(
        config,
        compiler_fn(|source| {
            let mut set = DefinitionSet::new();
            set.insert("Counter".to_string(), counter(source.trim().parse()?));
            Ok(set)
        }),
    )
}

#[test]
fn test_file_change_swaps_definition_and_keeps_state() {
    let dir = tempfile::tempdir().unwrap();
    let file = dir.path().join("counter.cmp");
    fs::write(&file, "1").unwrap();

    let runtime = runtime();
    runtime.register_component("Counter", counter(1), &file);
    runtime.watch_directory(dir.path()).unwrap();
    runtime.start().unwrap();

    let instance = Component::new(counter(1));
    runtime.register_instance(&instance);
    instance.call("increment", &[]).unwrap();
    instance.call("increment", &[]).unwrap();
    assert_eq!(instance.get("counter"), Some(json!(2)));

    let before = runtime.hot_reloader().definition("Counter").unwrap();
    fs::write(&file, "10").unwrap();

    let reloaded = wait_until(Duration::from_secs(10), || {
        !Arc::ptr_eq(&instance.definition(), &before)
    });
    assert!(reloaded, "definition was not swapped after the file changed");

    assert_eq!(instance.get("counter"), Some(json!(2)));
    assert_eq!(instance.call("increment", &[]).unwrap(), json!(12));
    assert!(Arc::ptr_eq(
        &runtime.hot_reloader().definition("Counter").unwrap(),
        &instance.definition()
    ));
}

#[test]
fn test_other_files_are_ignored() {
    let dir = tempfile::tempdir().unwrap();
    let file = dir.path().join("counter.cmp");
    fs::write(&file, "1").unwrap();

    let runtime = runtime();
    let original = counter(1);
    runtime.register_component("Counter", Arc::clone(&original), &file);
    runtime.watch_directory(dir.path()).unwrap();
    runtime.start().unwrap();

    fs::write(dir.path().join("notes.txt"), "10").unwrap();
    fs::write(dir.path().join("other.cmp"), "10").unwrap();
    std::thread::sleep(Duration::from_millis(300));

    assert!(Arc::ptr_eq(
        &runtime.hot_reloader().definition("Counter").unwrap(),
        &original
    ));
}

#[test]
fn test_broken_source_keeps_old_definition() {
    let dir = tempfile::tempdir().unwrap();
    let file = dir.path().join("counter.cmp");
    fs::write(&file, "1").unwrap();

    let runtime = runtime();
    let original = counter(1);
    runtime.register_component("Counter", Arc::clone(&original), &file);

    let instance = Component::new(Arc::clone(&original));
    runtime.register_instance(&instance);

    fs::write(&file, "not a number").unwrap();
    let report = runtime.hot_reloader().reload_file(&file);
    assert_eq!(report.instances_updated, 0);
    assert_eq!(report.failures.len(), 1);
    assert!(Arc::ptr_eq(&instance.definition(), &original));
}

#[test]
fn test_watch_missing_directory_fails() {
    let dir = tempfile::tempdir().unwrap();
    let runtime = runtime();
    let err = runtime
        .watch_directory(dir.path().join("missing"))
        .unwrap_err();
    assert!(matches!(err, RuntimeError::WatchPath { .. }));
}
