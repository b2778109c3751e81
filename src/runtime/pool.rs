//! The worker pool and its ready queue.
//!
//! A fixed set of worker threads shares one FIFO queue of ready tasks.
//! Workers pop under the queue lock and run with the lock released, so a
//! running task can submit and enqueue successors freely. Waiters
//! participate through [`PoolShared::try_run_one`] instead of spinning
//! idle.

use crate::runtime::RuntimeCore;
use crate::runtime::runtime::RuntimeConfig;
use crate::task::TaskRef;
use crate::utils::SpinLock;
use crate::utils::thread::set_current_thread_name;
use anyhow::Result;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use tracing::error;

/// The queue side of the pool, embedded in [`RuntimeCore`] so tasks can
/// re-enqueue themselves.
pub(crate) struct PoolShared {
    ready: SpinLock<VecDeque<TaskRef>>,
    alive: AtomicBool,
}

impl PoolShared {
    pub(crate) fn new() -> Self {
        Self {
            ready: SpinLock::new(VecDeque::new()),
            alive: AtomicBool::new(true),
        }
    }

    pub(crate) fn enqueue(&self, task: TaskRef) {
        self.ready.lock().push_back(task);
    }

    pub(crate) fn pop(&self) -> Option<TaskRef> {
        self.ready.lock().pop_front()
    }

    /// One iteration of the worker loop, callable from any thread. Returns
    /// whether a task was run.
    pub(crate) fn try_run_one(&self) -> bool {
        match self.pop() {
            Some(task) => {
                task.run();
                true
            }
            None => false,
        }
    }
}

fn worker_loop(core: &RuntimeCore) {
    while core.pool.alive.load(Ordering::Acquire) {
        if !core.pool.try_run_one() {
            thread::yield_now();
        }
    }
}

/// Owns the worker threads. Workers are joined (never detached) so
/// destruction is race-free; in disabled mode the pool is empty.
pub(crate) struct ThreadPool {
    core: Arc<RuntimeCore>,
    handles: Mutex<Vec<thread::JoinHandle<()>>>,
}

impl std::fmt::Debug for ThreadPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ThreadPool").finish_non_exhaustive()
    }
}

impl ThreadPool {
    /// A pool with no threads, for inline (disabled) mode.
    pub(crate) fn inline(core: Arc<RuntimeCore>) -> Self {
        Self {
            core,
            handles: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn spawn(core: Arc<RuntimeCore>, cfg: &RuntimeConfig) -> Result<Self> {
        let mut handles = Vec::with_capacity(cfg.worker_threads);

        for _ in 0..cfg.worker_threads {
            let worker_core = core.clone();
            let name = cfg.thread_name.next();
            let spawned = thread::Builder::new().name(name.clone()).spawn(move || {
                // Kernel-side name too, truncated to the pthread limit.
                set_current_thread_name(&name);
                worker_loop(&worker_core)
            });

            match spawned {
                Ok(handle) => handles.push(handle),
                Err(err) => {
                    // Thread creation is fatal at construction; unwind the
                    // workers that did start before reporting it.
                    core.pool.alive.store(false, Ordering::Release);
                    for handle in handles {
                        let _ = handle.join();
                    }
                    return Err(err.into());
                }
            }
        }

        Ok(Self {
            core,
            handles: Mutex::new(handles),
        })
    }

    /// Stop and join every worker. The caller drains the queue first; this
    /// only flips the alive flag and waits for the loops to observe it.
    pub(crate) fn shutdown(&self) {
        self.core.pool.alive.store(false, Ordering::Release);

        let mut handles = self.handles.lock();
        let panicked = handles
            .drain(..)
            .map(|handle| handle.join())
            .filter(Result::is_err)
            .count();
        if panicked > 0 {
            error!(panicked, "worker thread(s) panicked");
        }
    }
}

#[cfg(test)]
impl ThreadPool {
    pub(crate) fn worker_count(&self) -> usize {
        self.handles.lock().len()
    }

    pub(crate) fn worker_names(&self) -> Vec<String> {
        self.handles
            .lock()
            .iter()
            .map(|handle| handle.thread().name().unwrap_or_default().to_string())
            .collect()
    }
}
