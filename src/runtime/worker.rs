//! Named background threads with a bounded shutdown join.
//!
//! Every long-lived thread in the runtime (scheduler workers, the GC sweep
//! loop, the hot-reload event loop) is spawned through [`WorkerGroup`]. Each
//! thread holds a clone of an exit sender that is dropped when the thread
//! body returns or unwinds, so the group can wait for all of them with a
//! deadline instead of blocking forever on `JoinHandle::join`.

use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam::channel::{self, Receiver, RecvTimeoutError};
use tracing::{debug, error, warn};

/// A fixed set of named threads running the same body.
#[derive(Debug)]
pub(crate) struct WorkerGroup {
    prefix: String,
    handles: Vec<JoinHandle<()>>,
    exited: Receiver<()>,
}

impl WorkerGroup {
    /// Spawn `count` threads named `{prefix}-{index}`, each running `body(index)`.
    ///
    /// A thread that fails to spawn is logged and skipped; the group keeps
    /// whatever threads it could start.
    pub(crate) fn spawn<F>(
        prefix: &str,
        count: usize,
        body: F,
    ) -> Self
    where
        F: Fn(usize) + Send + Sync + 'static,
    {
        let body = Arc::new(body);
        let (exit_tx, exited) = channel::unbounded::<()>();
        let mut handles = Vec::with_capacity(count);

        for index in 0..count {
            let body = Arc::clone(&body);
            let exit_tx = exit_tx.clone();
            let spawned = thread::Builder::new()
                .name(format!("{}-{}", prefix, index))
                .spawn(move || {
                    // Dropped on return and on unwind.
                    let _exit = exit_tx;
                    body(index);
                });

            match spawned {
                Ok(handle) => handles.push(handle),
                Err(err) => error!(worker = %prefix, index, error = %err, "failed to spawn thread"),
            }
        }

        debug!(worker = %prefix, threads = handles.len(), "worker group started");

        Self {
            prefix: prefix.to_string(),
            handles,
            exited,
        }
    }

    /// Number of threads that were successfully spawned.
    pub(crate) fn len(&self) -> usize {
        self.handles.len()
    }

    /// Wait up to `timeout` for every thread to exit.
    ///
    /// Threads that exited are joined; threads still running at the deadline
    /// are detached. Returns `true` when the whole group exited in time.
    pub(crate) fn join(
        self,
        timeout: Duration,
    ) -> bool {
        let deadline = Instant::now() + timeout;
        let drained = loop {
            match self.exited.recv_deadline(deadline) {
                Ok(()) => continue,
                Err(RecvTimeoutError::Disconnected) => break true,
                Err(RecvTimeoutError::Timeout) => break false,
            }
        };

        let mut detached = 0usize;
        for handle in self.handles {
            if drained || handle.is_finished() {
                if handle.join().is_err() {
                    warn!(worker = %self.prefix, "thread panicked");
                }
            } else {
                detached += 1;
            }
        }

        if drained {
            debug!(worker = %self.prefix, "worker group joined");
        } else {
            warn!(
                worker = %self.prefix,
                detached,
                timeout_ms = timeout.as_millis() as u64,
                "threads still running after join timeout, detaching"
            );
        }

        drained
    }
}
