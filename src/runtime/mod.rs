//! Runtime system
//!
//! Component lifecycle services: the priority task scheduler, the garbage
//! collector for unmounted components, the hot reloader, and the
//! [`RuntimeEnvironment`] that composes them.

pub mod component;
pub mod environment;
pub mod error;
pub mod gc;
pub mod hot_reload;
pub mod scheduler;

mod worker;

pub use component::{
    Capability, Component, ComponentDefinition, ComponentHandle, ComponentId, DefinitionBuilder,
    Hook, State,
};
pub use environment::RuntimeEnvironment;
pub use error::RuntimeError;
pub use gc::{ComponentRef, GarbageCollector, GcConfig, LifecycleState};
pub use hot_reload::{
    compiler_fn, DefinitionCompiler, DefinitionSet, HotReloadConfig, HotReloader, ReloadReport,
};
pub use scheduler::{Scheduler, SchedulerConfig, Task, TaskId, TaskPriority};
