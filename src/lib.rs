//! Component lifecycle runtime
//!
//! Runtime services for an interpreter of a declarative component language:
//!
//! - [`runtime::scheduler`]: priority task scheduler on a fixed worker pool
//! - [`runtime::gc`]: lifecycle tracking and TTL collection of unmounted
//!   components
//! - [`runtime::hot_reload`]: file watching and in-place definition swaps
//!   that keep instance state
//! - [`runtime::environment`]: the facade that owns all three
//!
//! # Example
//!
//! ```no_run
//! use component_runtime::{
//!     compiler_fn, Component, ComponentDefinition, DefinitionSet, RuntimeConfig,
//!     RuntimeEnvironment,
//! };
//!
//! fn main() -> anyhow::Result<()> {
//!     let compiler = compiler_fn(|_source: &str| Ok(DefinitionSet::new()));
//!     let runtime = RuntimeEnvironment::new(RuntimeConfig::default(), compiler);
//!     runtime.start()?;
//!
//!     let counter = ComponentDefinition::builder("Counter")
//!         .state("count", 0)
//!         .on_mount(|_| Ok(()))
//!         .build();
//!     runtime.register_component("Counter", counter.clone(), "ui/counter.cmp");
//!
//!     let instance = Component::new(counter);
//!     runtime.register_instance(&instance);
//!     runtime.mount_component(&instance);
//!
//!     runtime.stop();
//!     Ok(())
//! }
//! ```

#![doc(html_root_url = "https://docs.rs/component-runtime")]
#![warn(rust_2018_idioms)]

pub mod runtime;
pub mod util;

pub use runtime::{
    compiler_fn, Capability, Component, ComponentDefinition, ComponentHandle, ComponentId,
    ComponentRef, DefinitionBuilder, DefinitionCompiler, DefinitionSet, GarbageCollector,
    GcConfig, Hook, HotReloadConfig, HotReloader, LifecycleState, ReloadReport,
    RuntimeEnvironment, RuntimeError, Scheduler, SchedulerConfig, State, Task, TaskId,
    TaskPriority,
};
pub use util::config::{ConfigError, RuntimeConfig};
pub use util::logger::{LogConfig, LogLevel};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Crate name
pub const NAME: &str = env!("CARGO_PKG_NAME");
