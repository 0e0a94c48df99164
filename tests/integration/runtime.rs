//! RuntimeEnvironment end-to-end tests

use std::sync::Arc;
use std::time::Duration;

use component_runtime::{
    compiler_fn, Component, ComponentDefinition, ComponentHandle, DefinitionSet, GcConfig,
    LifecycleState, RuntimeConfig, RuntimeEnvironment, SchedulerConfig, TaskPriority,
};
use parking_lot::Mutex;
use serde_json::json;

use crate::wait_until;

fn config(ttl_ms: u64) -> RuntimeConfig {
    RuntimeConfig {
        scheduler: SchedulerConfig {
            num_workers: 2,
            idle_timeout_ms: 5,
            join_timeout_ms: 2000,
        },
        gc: GcConfig {
            ttl_ms,
            sweep_interval_ms: 20,
            join_timeout_ms: 2000,
        },
        ..RuntimeConfig::default()
    }
}

fn runtime(ttl_ms: u64) -> RuntimeEnvironment {
    RuntimeEnvironment::new(
        config(ttl_ms),
        compiler_fn(|_| Ok(DefinitionSet::new())),
    )
}

/// A definition that records every hook it runs.
fn recording(log: &Arc<Mutex<Vec<String>>>) -> Arc<ComponentDefinition> {
    let mount = Arc::clone(log);
    let update = Arc::clone(log);
    let unmount = Arc::clone(log);
    let cleanup = Arc::clone(log);
    ComponentDefinition::builder("Widget")
        .state("clicks", 0)
        .on_mount(move |c| {
            mount.lock().push(format!("mount:{}", c.id()));
            Ok(())
        })
        .on_update(move |_, old| {
            update.lock().push(format!("update:{}", old["clicks"]));
            Ok(())
        })
        .on_unmount(move |_| {
            unmount.lock().push("unmount".to_string());
            Ok(())
        })
        .cleanup(move |_| {
            cleanup.lock().push("cleanup".to_string());
            Ok(())
        })
        .build()
}

fn instance(
    runtime: &RuntimeEnvironment,
    definition: Arc<ComponentDefinition>,
) -> ComponentHandle {
    let instance = Component::new(definition);
    runtime.register_instance(&instance);
    instance
}

#[test]
fn test_start_stop_idempotent() {
    let runtime = runtime(1000);
    assert!(!runtime.is_running());

    runtime.start().unwrap();
    runtime.start().unwrap();
    assert!(runtime.is_running());
    assert!(runtime.scheduler().is_running());
    assert!(runtime.garbage_collector().is_running());
    assert!(runtime.hot_reloader().is_running());
    assert_eq!(runtime.scheduler().worker_count(), 2);

    runtime.stop();
    runtime.stop();
    assert!(!runtime.is_running());
    assert!(!runtime.scheduler().is_running());
    assert!(!runtime.garbage_collector().is_running());
    assert!(!runtime.hot_reloader().is_running());

    runtime.start().unwrap();
    assert!(runtime.is_running());
}

#[test]
fn test_lifecycle_hooks_run_in_order() {
    let runtime = runtime(60_000);
    runtime.start().unwrap();

    let log = Arc::new(Mutex::new(Vec::new()));
    let widget = instance(&runtime, recording(&log));
    let gc = runtime.garbage_collector();
    assert_eq!(gc.state_of(widget.id()), Some(LifecycleState::Created));

    assert!(runtime.mount_component(&widget).is_some());
    assert!(wait_until(Duration::from_secs(5), || log.lock().len() == 1));

    let old = widget.state();
    widget.set_state("clicks", 3);
    assert!(runtime.update_component(&widget, old).is_some());
    assert!(wait_until(Duration::from_secs(5), || log.lock().len() == 2));

    assert!(runtime.unmount_component(&widget).is_some());
    assert!(wait_until(Duration::from_secs(5), || log.lock().len() == 3));

    assert_eq!(
        *log.lock(),
        vec![
            format!("mount:{}", widget.id()),
            "update:0".to_string(),
            "unmount".to_string(),
        ]
    );
    assert_eq!(gc.state_of(widget.id()), Some(LifecycleState::Unmounted));
}

#[test]
fn test_missing_hook_schedules_nothing() {
    let runtime = runtime(60_000);
    let plain = instance(&runtime, ComponentDefinition::builder("Plain").build());

    assert!(runtime.mount_component(&plain).is_none());
    assert!(runtime.unmount_component(&plain).is_none());
    assert!(runtime.scheduler().is_empty());
    assert_eq!(
        runtime.garbage_collector().state_of(plain.id()),
        Some(LifecycleState::Unmounted)
    );
}

#[test]
fn test_unmounted_component_is_collected_and_cleaned() {
    let runtime = runtime(30);
    runtime.start().unwrap();

    let log = Arc::new(Mutex::new(Vec::new()));
    let widget = instance(&runtime, recording(&log));
    runtime.mount_component(&widget);
    runtime.unmount_component(&widget);

    let gc = runtime.garbage_collector();
    assert!(wait_until(Duration::from_secs(5), || !gc.contains(widget.id())));
    assert!(wait_until(Duration::from_secs(5), || log
        .lock()
        .contains(&"cleanup".to_string())));
    assert_eq!(log.lock().last().map(String::as_str), Some("cleanup"));
}

#[test]
fn test_mounted_component_survives_sweeps() {
    let runtime = runtime(10);
    runtime.start().unwrap();

    let widget = instance(&runtime, ComponentDefinition::builder("Live").build());
    runtime.mount_component(&widget);

    std::thread::sleep(Duration::from_millis(150));
    assert!(runtime.garbage_collector().contains(widget.id()));
    assert_eq!(
        runtime.garbage_collector().state_of(widget.id()),
        Some(LifecycleState::Mounted)
    );
}

#[test]
fn test_schedule_task_priority_order() {
    let runtime = RuntimeEnvironment::new(
        RuntimeConfig {
            scheduler: SchedulerConfig {
                num_workers: 1,
                ..config(1000).scheduler
            },
            ..config(1000)
        },
        compiler_fn(|_| Ok(DefinitionSet::new())),
    );

    let order = Arc::new(Mutex::new(Vec::new()));
    for (name, priority) in [
        ("low", TaskPriority::Low),
        ("critical", TaskPriority::Critical),
        ("normal", TaskPriority::Normal),
        ("high", TaskPriority::High),
    ] {
        let order = Arc::clone(&order);
        runtime.schedule_task(
            move || {
                order.lock().push(name);
                Ok(Some(json!(name)))
            },
            priority,
            None,
            name,
        );
    }

    runtime.start().unwrap();
    assert!(wait_until(Duration::from_secs(5), || order.lock().len() == 4));
    assert_eq!(*order.lock(), vec!["critical", "high", "normal", "low"]);
}

#[test]
fn test_failing_hook_does_not_stop_runtime() {
    let runtime = runtime(60_000);
    runtime.start().unwrap();

    let broken = instance(
        &runtime,
        ComponentDefinition::builder("Broken")
            .on_mount(|_| anyhow::bail!("render failed"))
            .on_unmount(|_| panic!("unmount exploded"))
            .build(),
    );
    runtime.mount_component(&broken);
    runtime.unmount_component(&broken);

    let stats = Arc::clone(runtime.scheduler().stats());
    assert!(wait_until(Duration::from_secs(5), || stats.executed() == 2));

    let ran = Arc::new(Mutex::new(false));
    let flag = Arc::clone(&ran);
    runtime.schedule_task(
        move || {
            *flag.lock() = true;
            Ok(None)
        },
        TaskPriority::Normal,
        None,
        "after-failures",
    );
    assert!(wait_until(Duration::from_secs(5), || *ran.lock()));
}

#[test]
fn test_separate_environments_are_isolated() {
    let first = runtime(60_000);
    let second = runtime(60_000);

    let widget = instance(&first, ComponentDefinition::builder("Solo").build());
    assert!(first.garbage_collector().contains(widget.id()));
    assert!(!second.garbage_collector().contains(widget.id()));
}
