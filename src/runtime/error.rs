//! Runtime error types

use std::path::PathBuf;

use crate::util::config::ConfigError;

/// Errors surfaced by the runtime to its embedder.
///
/// Failures inside interpreted code (hooks, methods, compiler, task
/// callbacks) never appear here; they are logged where they happen.
#[derive(Debug, thiserror::Error)]
pub enum RuntimeError {
    /// The OS file watcher could not be created
    #[error("failed to initialize file watcher: {0}")]
    WatcherInit(String),
    /// A directory could not be watched
    #[error("cannot watch {}: {reason}", path.display())]
    WatchPath { path: PathBuf, reason: String },
    /// Configuration could not be loaded
    #[error(transparent)]
    Config(#[from] ConfigError),
}
