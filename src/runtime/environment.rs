//! Runtime environment facade
//!
//! [`RuntimeEnvironment`] is the composition root handed to the interpreter:
//! one [`Scheduler`], one [`GarbageCollector`] and one [`HotReloader`], all
//! sharing the scheduler. There is no process-wide instance; embedders
//! construct as many isolated environments as they need.
//!
//! ```text
//! stopped ──start()──▶ running ──stop()──▶ stopped
//!   start: scheduler → gc → hot reloader
//!   stop:  hot reloader → gc → scheduler
//! ```

use std::path::Path;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{error, info};

use crate::runtime::component::{ComponentDefinition, ComponentHandle, ComponentId, Hook, State};
use crate::runtime::error::RuntimeError;
use crate::runtime::gc::GarbageCollector;
use crate::runtime::hot_reload::{DefinitionCompiler, HotReloader};
use crate::runtime::scheduler::{Scheduler, TaskId, TaskOutput, TaskPriority};
use crate::util::config::RuntimeConfig;

/// Lifecycle runtime shared by the interpreter and server layers.
pub struct RuntimeEnvironment {
    config: RuntimeConfig,
    scheduler: Arc<Scheduler>,
    gc: GarbageCollector,
    hot_reloader: HotReloader,
    running: Mutex<bool>,
}

impl std::fmt::Debug for RuntimeEnvironment {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        f.debug_struct("RuntimeEnvironment")
            .field("running", &self.is_running())
            .field("scheduler", &self.scheduler)
            .field("gc", &self.gc)
            .field("hot_reloader", &self.hot_reloader)
            .finish()
    }
}

impl RuntimeEnvironment {
    /// Build a stopped environment that re-derives definitions with `compiler`.
    pub fn new<C>(
        config: RuntimeConfig,
        compiler: C,
    ) -> Self
    where
        C: DefinitionCompiler + 'static,
    {
        Self::with_compiler(config, Arc::new(compiler))
    }

    /// Build from a TOML file (defaults if it does not exist) plus
    /// `COMPONENT_RUNTIME_*` environment overrides.
    pub fn from_config_file<C>(
        path: impl AsRef<Path>,
        compiler: C,
    ) -> Result<Self, RuntimeError>
    where
        C: DefinitionCompiler + 'static,
    {
        let config = RuntimeConfig::load_or_default(path)?;
        Ok(Self::new(config, compiler))
    }

    pub fn with_compiler(
        config: RuntimeConfig,
        compiler: Arc<dyn DefinitionCompiler>,
    ) -> Self {
        let scheduler = Arc::new(Scheduler::with_config(config.scheduler.clone()));
        let gc = GarbageCollector::new(config.gc.clone(), Arc::clone(&scheduler));
        let hot_reloader = HotReloader::new(
            config.hot_reload.clone(),
            Arc::clone(&scheduler),
            compiler,
        );

        Self {
            config,
            scheduler,
            gc,
            hot_reloader,
            running: Mutex::new(false),
        }
    }

    /// Start the scheduler, then the collector, then the hot reloader.
    ///
    /// No-op if already running. If the file watcher cannot be created the
    /// already started services are stopped again and the error returned.
    pub fn start(&self) -> Result<(), RuntimeError> {
        let mut running = self.running.lock();
        if *running {
            return Ok(());
        }

        self.scheduler.start(self.config.scheduler.num_workers);
        self.gc.start();
        if let Err(err) = self.hot_reloader.start() {
            error!(error = %err, "runtime failed to start");
            self.gc.stop();
            self.scheduler.stop();
            return Err(err);
        }

        *running = true;
        info!("runtime environment started");
        Ok(())
    }

    /// Stop the services in reverse start order. No-op if stopped.
    pub fn stop(&self) {
        let mut running = self.running.lock();
        if !*running {
            return;
        }

        self.hot_reloader.stop();
        self.gc.stop();
        self.scheduler.stop();

        *running = false;
        info!("runtime environment stopped");
    }

    pub fn is_running(&self) -> bool {
        *self.running.lock()
    }

    /// Register (or replace) a component definition and its source file.
    pub fn register_component(
        &self,
        name: impl Into<String>,
        definition: Arc<ComponentDefinition>,
        file_path: impl AsRef<Path>,
    ) {
        self.hot_reloader
            .register_component(name, definition, file_path);
    }

    /// Track a new instance for collection and hot reload.
    pub fn register_instance(
        &self,
        instance: &ComponentHandle,
    ) {
        self.gc.register(Arc::clone(instance));
        self.hot_reloader.register_instance(instance);
    }

    /// Mark `instance` mounted and schedule its `onMount` hook.
    pub fn mount_component(
        &self,
        instance: &ComponentHandle,
    ) -> Option<TaskId> {
        self.gc.mount(instance);
        self.scheduler
            .schedule_hook(instance, Hook::Mount, TaskPriority::Normal)
    }

    /// Mark `instance` updated and schedule `onUpdate(old_state)`.
    pub fn update_component(
        &self,
        instance: &ComponentHandle,
        old_state: State,
    ) -> Option<TaskId> {
        self.gc.update(instance);
        self.scheduler
            .schedule_hook(instance, Hook::Update(old_state), TaskPriority::Normal)
    }

    /// Mark `instance` unmounted and schedule its `onUnmount` hook.
    pub fn unmount_component(
        &self,
        instance: &ComponentHandle,
    ) -> Option<TaskId> {
        self.gc.unmount(instance);
        self.scheduler
            .schedule_hook(instance, Hook::Unmount, TaskPriority::Normal)
    }

    /// Watch a directory for source changes.
    pub fn watch_directory(
        &self,
        path: impl AsRef<Path>,
    ) -> Result<(), RuntimeError> {
        self.hot_reloader.watch(path)
    }

    /// Schedule arbitrary work on the runtime's scheduler.
    pub fn schedule_task<F>(
        &self,
        callback: F,
        priority: TaskPriority,
        component: Option<ComponentId>,
        name: impl Into<String>,
    ) -> TaskId
    where
        F: FnOnce() -> anyhow::Result<TaskOutput> + Send + 'static,
    {
        self.scheduler
            .schedule(callback, priority, component, name)
    }

    #[inline]
    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    #[inline]
    pub fn scheduler(&self) -> &Arc<Scheduler> {
        &self.scheduler
    }

    #[inline]
    pub fn garbage_collector(&self) -> &GarbageCollector {
        &self.gc
    }

    #[inline]
    pub fn hot_reloader(&self) -> &HotReloader {
        &self.hot_reloader
    }
}

impl Drop for RuntimeEnvironment {
    fn drop(&mut self) {
        self.stop();
    }
}
