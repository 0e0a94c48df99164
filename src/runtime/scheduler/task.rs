//! Task definitions for the scheduler.
//!
//! A [`Task`] is immutable once built: it is consumed exactly once by
//! [`Task::execute`], which runs the callback behind a panic guard.

use std::any::Any;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::runtime::component::ComponentId;

/// Optional result produced by a task callback.
pub type TaskOutput = Option<Value>;

/// The deferred work carried by a task.
pub type TaskCallback = Box<dyn FnOnce() -> anyhow::Result<TaskOutput> + Send + 'static>;

/// Creation order across every task in the process. Breaks ties between
/// tasks whose `created_at` instants compare equal.
static SEQUENCE: AtomicU64 = AtomicU64::new(0);

/// Unique task identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskId(pub u64);

impl TaskId {
    /// Get the inner value.
    #[inline]
    pub fn inner(&self) -> u64 {
        self.0
    }
}

impl From<u64> for TaskId {
    fn from(val: u64) -> Self {
        Self(val)
    }
}

impl fmt::Display for TaskId {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        write!(f, "Task({})", self.0)
    }
}

/// Task ID generator.
#[derive(Debug, Default)]
pub struct TaskIdGenerator {
    next: AtomicU64,
}

impl TaskIdGenerator {
    /// Create a new generator starting at 0.
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    /// Generate the next ID.
    #[inline]
    pub fn next(&self) -> TaskId {
        TaskId(self.next.fetch_add(1, Ordering::Relaxed))
    }
}

/// Task priority levels.
///
/// Each level has an explicit weight; higher weights are dequeued first.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Ord, PartialOrd, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum TaskPriority {
    /// Low priority tasks (GC cleanup).
    Low = 0,
    /// Normal priority (default, lifecycle hooks).
    #[default]
    Normal = 1,
    /// High priority tasks (hot reload).
    High = 2,
    /// Critical priority tasks.
    Critical = 3,
}

impl TaskPriority {
    /// Ordinal weight of this level.
    #[inline]
    pub const fn weight(self) -> u8 {
        self as u8
    }
}

/// Why a task produced no result.
#[derive(Debug, thiserror::Error)]
pub enum TaskError {
    /// The callback returned an error.
    #[error("{0:#}")]
    Failed(anyhow::Error),
    /// The callback panicked.
    #[error("panicked: {0}")]
    Panicked(String),
}

/// A unit of deferred work.
pub struct Task {
    id: TaskId,
    name: String,
    priority: TaskPriority,
    created_at: Instant,
    sequence: u64,
    component: Option<ComponentId>,
    callback: TaskCallback,
}

impl fmt::Debug for Task {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.debug_struct("Task")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("priority", &self.priority)
            .field("created_at", &self.created_at)
            .field("component", &self.component)
            .finish()
    }
}

impl Task {
    /// Create a new task. An empty `name` falls back to the task ID.
    pub fn new<F>(
        id: TaskId,
        priority: TaskPriority,
        component: Option<ComponentId>,
        name: impl Into<String>,
        callback: F,
    ) -> Self
    where
        F: FnOnce() -> anyhow::Result<TaskOutput> + Send + 'static,
    {
        let name = name.into();
        let sequence = SEQUENCE.fetch_add(1, Ordering::Relaxed);
        Self {
            id,
            name: if name.is_empty() { id.to_string() } else { name },
            priority,
            created_at: Instant::now(),
            sequence,
            component,
            callback: Box::new(callback),
        }
    }

    #[inline]
    pub fn id(&self) -> TaskId {
        self.id
    }

    /// Diagnostic label.
    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[inline]
    pub fn priority(&self) -> TaskPriority {
        self.priority
    }

    #[inline]
    pub fn created_at(&self) -> Instant {
        self.created_at
    }

    /// Component this task was scheduled for. Metadata only.
    #[inline]
    pub fn component(&self) -> Option<ComponentId> {
        self.component
    }

    #[inline]
    pub(crate) fn sequence(&self) -> u64 {
        self.sequence
    }

    /// Run the callback, converting errors and panics into [`TaskError`].
    pub fn execute(self) -> Result<TaskOutput, TaskError> {
        match panic::catch_unwind(AssertUnwindSafe(self.callback)) {
            Ok(Ok(output)) => Ok(output),
            Ok(Err(err)) => Err(TaskError::Failed(err)),
            Err(payload) => Err(TaskError::Panicked(panic_message(payload.as_ref()))),
        }
    }
}

/// Best-effort text of a panic payload.
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
