//! 热重载机制
//!
//! Watches component source files and swaps the definition of every live
//! instance when its file changes, keeping instance state.
//!
//! # 架构
//!
//! ```text
//! notify watcher → event thread (debounce + classify) → HIGH reload task
//!     → DefinitionCompiler::derive_definitions → swap definition per instance
//! ```
//!
//! The registry maps a definition name to its current definition, its source
//! file, and a weak set of live instances. Instances are never kept alive by
//! the registry; dead entries are pruned whenever the set is read.

use std::collections::HashSet;
use std::fs;
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use crossbeam::channel::{self, Receiver, RecvTimeoutError};
use indexmap::{IndexMap, IndexSet};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::runtime::component::{
    Component, ComponentDefinition, ComponentHandle, ComponentId, Hook,
};
use crate::runtime::error::RuntimeError;
use crate::runtime::scheduler::task::panic_message;
use crate::runtime::scheduler::{Scheduler, TaskId, TaskPriority};
use crate::runtime::worker::WorkerGroup;

/// Definitions derived from one source file, keyed by name.
pub type DefinitionSet = IndexMap<String, Arc<ComponentDefinition>>;

/// Re-derives component definitions from source text.
pub trait DefinitionCompiler: Send + Sync {
    fn derive_definitions(
        &self,
        source: &str,
    ) -> anyhow::Result<DefinitionSet>;
}

impl<F> DefinitionCompiler for F
where
    F: Fn(&str) -> anyhow::Result<DefinitionSet> + Send + Sync,
{
    fn derive_definitions(
        &self,
        source: &str,
    ) -> anyhow::Result<DefinitionSet> {
        self(source)
    }
}

/// Pin a closure to the compiler signature so its argument and error types
/// are inferred.
pub fn compiler_fn<F>(f: F) -> F
where
    F: Fn(&str) -> anyhow::Result<DefinitionSet> + Send + Sync,
{
    f
}

/// 热重载配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HotReloadConfig {
    /// Source-file extension to react to, without the dot
    pub extension: String,
    /// 防抖时间（毫秒）, events within one window trigger one reload per file
    pub debounce_ms: u64,
    /// How often the event thread re-checks for shutdown
    pub poll_interval_ms: u64,
    /// Upper bound on waiting for the event thread during `stop()`
    pub join_timeout_ms: u64,
}

impl Default for HotReloadConfig {
    fn default() -> Self {
        Self {
            extension: "cmp".to_string(),
            debounce_ms: 100,
            poll_interval_ms: 50,
            join_timeout_ms: 1000,
        }
    }
}

impl HotReloadConfig {
    #[inline]
    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    #[inline]
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    #[inline]
    pub fn join_timeout(&self) -> Duration {
        Duration::from_millis(self.join_timeout_ms)
    }
}

/// Outcome of reloading one source file.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ReloadReport {
    /// The reloaded file
    pub file: PathBuf,
    /// Registered definitions that were replaced
    pub definitions: Vec<String>,
    /// Instances swapped to their new definition
    pub instances_updated: usize,
    /// Derivation or per-instance failures
    pub failures: Vec<String>,
}

struct ReloadEntry {
    definition: Arc<ComponentDefinition>,
    file_path: PathBuf,
    instances: Vec<Weak<Component>>,
}

impl ReloadEntry {
    /// Drop refs to instances that no longer exist.
    fn prune(&mut self) {
        self.instances.retain(|weak| weak.strong_count() > 0);
    }

    fn live_instances(&mut self) -> Vec<ComponentHandle> {
        self.prune();
        self.instances.iter().filter_map(Weak::upgrade).collect()
    }

    fn contains(
        &self,
        instance: &ComponentHandle,
    ) -> bool {
        self.instances
            .iter()
            .any(|weak| std::ptr::eq(weak.as_ptr(), Arc::as_ptr(instance)))
    }

    fn remove(
        &mut self,
        instance: &ComponentHandle,
    ) {
        let target = Arc::as_ptr(instance);
        self.instances
            .retain(|weak| weak.strong_count() > 0 && !std::ptr::eq(weak.as_ptr(), target));
    }
}

struct ReloaderShared {
    config: HotReloadConfig,
    entries: Mutex<IndexMap<String, ReloadEntry>>,
    pending: Mutex<HashSet<PathBuf>>,
    compiler: Arc<dyn DefinitionCompiler>,
    scheduler: Arc<Scheduler>,
}

impl ReloaderShared {
    fn governs(
        &self,
        path: &Path,
    ) -> bool {
        self.entries
            .lock()
            .values()
            .any(|entry| entry.file_path == path)
    }

    fn schedule_reload(
        self: &Arc<Self>,
        path: &Path,
    ) -> Option<TaskId> {
        let path = normalize_path(path);
        if !self.governs(&path) {
            debug!(path = %path.display(), "changed file governs no registered component");
            return None;
        }
        if !self.pending.lock().insert(path.clone()) {
            debug!(path = %path.display(), "reload already pending");
            return None;
        }

        let shared = Arc::clone(self);
        let name = format!("hot-reload:{}", path.display());
        let id = self.scheduler.schedule(
            move || {
                shared.pending.lock().remove(&path);
                let report = shared.reload_file(&path);
                Ok(Some(serde_json::to_value(&report)?))
            },
            TaskPriority::High,
            None,
            name,
        );
        Some(id)
    }

    fn reload_file(
        &self,
        path: &Path,
    ) -> ReloadReport {
        let path = normalize_path(path);
        let started = Instant::now();
        let mut report = ReloadReport {
            file: path.clone(),
            ..ReloadReport::default()
        };

        let derived = match self.derive(&path) {
            Ok(derived) => derived,
            Err(reason) => {
                error!(path = %path.display(), error = %reason, "hot reload failed");
                report.failures.push(reason);
                return report;
            }
        };

        // Registry lock is released before any instance code runs.
        let targets: Vec<(String, Arc<ComponentDefinition>, Vec<ComponentHandle>)> = {
            let mut entries = self.entries.lock();
            entries
                .iter_mut()
                .filter(|(_, entry)| entry.file_path == path)
                .filter_map(|(name, entry)| {
                    let definition = derived.get(name)?.clone();
                    entry.definition = Arc::clone(&definition);
                    Some((name.clone(), definition, entry.live_instances()))
                })
                .collect()
        };

        for (name, definition, instances) in targets {
            for instance in instances {
                let id = instance.id();
                let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
                    reload_instance(&instance, &definition)
                }));
                match outcome {
                    Ok(Ok(())) => report.instances_updated += 1,
                    Ok(Err(err)) => {
                        error!(component = %id, definition = %name, error = %format!("{:#}", err), "instance reload failed");
                        report
                            .failures
                            .push(format!("{} ({}): {:#}", name, id, err));
                    }
                    Err(payload) => {
                        let message = panic_message(payload.as_ref());
                        error!(component = %id, definition = %name, panic = %message, "instance reload panicked");
                        report
                            .failures
                            .push(format!("{} ({}): panicked: {}", name, id, message));
                    }
                }
            }
            report.definitions.push(name);
        }

        info!(
            path = %path.display(),
            definitions = report.definitions.len(),
            instances = report.instances_updated,
            failures = report.failures.len(),
            elapsed_us = started.elapsed().as_micros() as u64,
            "hot reload finished"
        );
        report
    }

    fn derive(
        &self,
        path: &Path,
    ) -> Result<DefinitionSet, String> {
        let source = fs::read_to_string(path)
            .map_err(|e| format!("failed to read {}: {}", path.display(), e))?;
        match panic::catch_unwind(AssertUnwindSafe(|| self.compiler.derive_definitions(&source))) {
            Ok(Ok(derived)) => Ok(derived),
            Ok(Err(err)) => Err(format!(
                "failed to derive definitions from {}: {:#}",
                path.display(),
                err
            )),
            Err(payload) => Err(format!(
                "compiler panicked on {}: {}",
                path.display(),
                panic_message(payload.as_ref())
            )),
        }
    }
}

/// Swap one instance to `definition` and run its `onUpdate(old_state)`.
fn reload_instance(
    instance: &ComponentHandle,
    definition: &Arc<ComponentDefinition>,
) -> anyhow::Result<()> {
    let old_state = instance.swap_definition(Arc::clone(definition));
    match instance.invoke(&Hook::Update(old_state)) {
        Some(result) => result,
        None => Ok(()),
    }
}

struct ActiveWatch {
    watcher: RecommendedWatcher,
    events: WorkerGroup,
    running: Arc<AtomicBool>,
}

/// 热重载器
///
/// Owns the definition registry and, while running, a `notify` watcher plus
/// the event thread that turns file changes into reload tasks.
pub struct HotReloader {
    shared: Arc<ReloaderShared>,
    watch_dirs: Mutex<IndexSet<PathBuf>>,
    active: Mutex<Option<ActiveWatch>>,
}

impl std::fmt::Debug for HotReloader {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        let running = self.is_running();
        let watch_dirs = self.watched_directories();
        f.debug_struct("HotReloader")
            .field("config", &self.shared.config)
            .field("watch_dirs", &watch_dirs)
            .field("definitions", &self.registered_names())
            .field("running", &running)
            .finish()
    }
}

impl HotReloader {
    /// 创建新的热重载器（不启动监听）
    pub fn new(
        config: HotReloadConfig,
        scheduler: Arc<Scheduler>,
        compiler: Arc<dyn DefinitionCompiler>,
    ) -> Self {
        Self {
            shared: Arc::new(ReloaderShared {
                config,
                entries: Mutex::new(IndexMap::new()),
                pending: Mutex::new(HashSet::new()),
                compiler,
                scheduler,
            }),
            watch_dirs: Mutex::new(IndexSet::new()),
            active: Mutex::new(None),
        }
    }

    #[inline]
    pub fn config(&self) -> &HotReloadConfig {
        &self.shared.config
    }

    /// Record (or replace) the definition for `name` and the file governing it.
    ///
    /// Live instances already tracked under `name` stay tracked.
    pub fn register_component(
        &self,
        name: impl Into<String>,
        definition: Arc<ComponentDefinition>,
        file_path: impl AsRef<Path>,
    ) {
        let name = name.into();
        let file_path = normalize_path(file_path.as_ref());
        debug!(definition = %name, path = %file_path.display(), "component definition registered");

        let mut entries = self.shared.entries.lock();
        match entries.get_mut(&name) {
            Some(entry) => {
                entry.definition = definition;
                entry.file_path = file_path;
            }
            None => {
                entries.insert(
                    name,
                    ReloadEntry {
                        definition,
                        file_path,
                        instances: Vec::new(),
                    },
                );
            }
        }
    }

    /// Track `instance` under its definition name, if that name is registered.
    ///
    /// The instance is removed from every other entry. Returns whether it is
    /// now tracked.
    pub fn register_instance(
        &self,
        instance: &ComponentHandle,
    ) -> bool {
        let name = instance.definition_name();
        let mut entries = self.shared.entries.lock();

        for (entry_name, entry) in entries.iter_mut() {
            if *entry_name != name {
                entry.remove(instance);
            }
        }

        match entries.get_mut(&name) {
            Some(entry) => {
                entry.prune();
                if !entry.contains(instance) {
                    entry.instances.push(Arc::downgrade(instance));
                }
                true
            }
            None => {
                debug!(component = %instance.id(), definition = %name, "no hot-reload entry for instance");
                false
            }
        }
    }

    /// Current definition registered under `name`.
    pub fn definition(
        &self,
        name: &str,
    ) -> Option<Arc<ComponentDefinition>> {
        self.shared
            .entries
            .lock()
            .get(name)
            .map(|entry| Arc::clone(&entry.definition))
    }

    /// Live instances tracked under `name`.
    pub fn live_instances(
        &self,
        name: &str,
    ) -> Vec<ComponentHandle> {
        self.shared
            .entries
            .lock()
            .get_mut(name)
            .map(ReloadEntry::live_instances)
            .unwrap_or_default()
    }

    /// Whether `instance` is tracked under `name`.
    pub fn tracks(
        &self,
        name: &str,
        id: ComponentId,
    ) -> bool {
        self.live_instances(name)
            .iter()
            .any(|instance| instance.id() == id)
    }

    pub fn registered_names(&self) -> Vec<String> {
        self.shared.entries.lock().keys().cloned().collect()
    }

    pub fn watched_directories(&self) -> Vec<PathBuf> {
        self.watch_dirs.lock().iter().cloned().collect()
    }

    /// Watch `directory` recursively. Idempotent per directory.
    ///
    /// Before [`start`](Self::start) the directory is only recorded.
    pub fn watch(
        &self,
        directory: impl AsRef<Path>,
    ) -> Result<(), RuntimeError> {
        let requested = directory.as_ref();
        let directory = requested
            .canonicalize()
            .map_err(|e| RuntimeError::WatchPath {
                path: requested.to_path_buf(),
                reason: e.to_string(),
            })?;
        if !directory.is_dir() {
            return Err(RuntimeError::WatchPath {
                path: directory,
                reason: "not a directory".to_string(),
            });
        }

        let mut active = self.active.lock();
        let mut dirs = self.watch_dirs.lock();
        if dirs.contains(&directory) {
            return Ok(());
        }

        if let Some(active) = active.as_mut() {
            active
                .watcher
                .watch(&directory, RecursiveMode::Recursive)
                .map_err(|e| RuntimeError::WatchPath {
                    path: directory.clone(),
                    reason: e.to_string(),
                })?;
        }

        info!(path = %directory.display(), "watching directory");
        dirs.insert(directory);
        Ok(())
    }

    /// Create the watcher, attach recorded directories and start the event
    /// thread. No-op if already running.
    pub fn start(&self) -> Result<(), RuntimeError> {
        let mut active = self.active.lock();
        if active.is_some() {
            return Ok(());
        }

        let (event_tx, event_rx) = channel::unbounded::<notify::Result<Event>>();
        let mut watcher = notify::recommended_watcher(move |result: notify::Result<Event>| {
            let _ = event_tx.send(result);
        })
        .map_err(|e| RuntimeError::WatcherInit(e.to_string()))?;

        for directory in self.watch_dirs.lock().iter() {
            watcher
                .watch(directory, RecursiveMode::Recursive)
                .map_err(|e| RuntimeError::WatchPath {
                    path: directory.clone(),
                    reason: e.to_string(),
                })?;
        }

        let running = Arc::new(AtomicBool::new(true));
        let flag = Arc::clone(&running);
        let shared = Arc::clone(&self.shared);
        let events = WorkerGroup::spawn("hot-reload-events", 1, move |_| {
            event_loop(&shared, &event_rx, &flag)
        });

        *active = Some(ActiveWatch {
            watcher,
            events,
            running,
        });
        info!(extension = %self.shared.config.extension, "hot reloader started");
        Ok(())
    }

    /// Drop the watcher and join the event thread. No-op if not running.
    pub fn stop(&self) {
        let Some(ActiveWatch {
            watcher,
            events,
            running,
        }) = self.active.lock().take()
        else {
            return;
        };

        running.store(false, Ordering::SeqCst);
        drop(watcher);
        events.join(self.shared.config.join_timeout());
        self.shared.pending.lock().clear();
        info!("hot reloader stopped");
    }

    pub fn is_running(&self) -> bool {
        self.active.lock().is_some()
    }

    /// Schedule a HIGH priority reload of `path`, unless one is already
    /// pending or no registered component is governed by the file.
    pub fn schedule_reload(
        &self,
        path: impl AsRef<Path>,
    ) -> Option<TaskId> {
        self.shared.schedule_reload(path.as_ref())
    }

    /// Reload `path` on the calling thread.
    pub fn reload_file(
        &self,
        path: impl AsRef<Path>,
    ) -> ReloadReport {
        self.shared.reload_file(path.as_ref())
    }
}

impl Drop for HotReloader {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Event thread: collect raw events for one debounce window, then schedule
/// one reload per changed source file.
fn event_loop(
    shared: &Arc<ReloaderShared>,
    events: &Receiver<notify::Result<Event>>,
    running: &AtomicBool,
) {
    let debounce = shared.config.debounce();
    let poll = shared.config.poll_interval();
    let mut pending: Vec<Event> = Vec::new();
    let mut window_started: Option<Instant> = None;

    while running.load(Ordering::SeqCst) {
        match events.recv_timeout(poll) {
            Ok(Ok(event)) => {
                window_started.get_or_insert_with(Instant::now);
                pending.push(event);
            }
            Ok(Err(err)) => warn!(error = %err, "file watcher error"),
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => break,
        }

        if window_started.is_some_and(|started| started.elapsed() >= debounce) {
            for path in classify_events(&pending, &shared.config.extension) {
                shared.schedule_reload(&path);
            }
            pending.clear();
            window_started = None;
        }
    }
}

/// Changed source files in `events`, deduplicated, in first-seen order.
///
/// Creations and modifications count; removals and access events don't.
fn classify_events(
    events: &[Event],
    extension: &str,
) -> Vec<PathBuf> {
    let mut changed = IndexSet::new();

    for event in events {
        let relevant = matches!(
            event.kind,
            EventKind::Create(_) | EventKind::Modify(_) | EventKind::Any
        );
        for path in &event.paths {
            if path.extension().and_then(|ext| ext.to_str()) != Some(extension) {
                continue;
            }
            if relevant {
                changed.insert(path.clone());
            } else {
                debug!(path = %path.display(), kind = ?event.kind, "ignoring file event");
            }
        }
    }

    changed.into_iter().collect()
}

/// Canonical form of `path` when it exists, otherwise `path` as given.
fn normalize_path(path: &Path) -> PathBuf {
    path.canonicalize().unwrap_or_else(|_| path.to_path_buf())
}
