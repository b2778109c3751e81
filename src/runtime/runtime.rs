use crate::dep::Dep;
use crate::runtime::pool::ThreadPool;
use crate::runtime::{DEFAULT_GROUP, EPHEMERAL_GROUP, GroupId, RuntimeCore};
use crate::sentinel::AccessMode;
use crate::task::{ProbeFn, Work};
use anyhow::Result;
use smallvec::SmallVec;
use std::fmt;
use std::hint;
use std::ops::Range;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use tracing::debug;

/// Environment variable that disables parallelism for a runtime built while
/// it is set: no threads are spawned and submissions execute inline on the
/// calling thread. Debugging fallback.
pub const DISABLE_ENV: &str = "DISABLE_MINIRUN";

#[derive(Clone)]
pub(crate) struct ThreadNameFn(Arc<dyn Fn() -> String + Send + Sync + 'static>);

impl ThreadNameFn {
    pub(crate) fn next(&self) -> String {
        (self.0)()
    }
}

fn default_thread_name_fn() -> ThreadNameFn {
    let counter = Arc::new(AtomicUsize::new(0));

    ThreadNameFn(Arc::new(move || {
        let prev = counter.fetch_add(1, Ordering::Relaxed);
        format!("minirun-worker-{}", prev)
    }))
}

impl fmt::Debug for ThreadNameFn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // The closure itself isn't printable.
        f.debug_tuple("ThreadNameFn").field(&"<function>").finish()
    }
}

/// Builds a [`Runtime`].
///
/// The only knobs are the worker count and the thread naming; everything
/// else about scheduling is fixed by the dependency model.
#[derive(Debug)]
pub struct Builder {
    /// The number of worker threads.
    ///
    /// Defaults to one less than the hardware concurrency, so the thread
    /// that submits and waits has a core of its own.
    worker_threads: Option<usize>,

    /// Name fn used for threads spawned by the runtime.
    thread_name: ThreadNameFn,

    /// Test override for the `DISABLE_MINIRUN` environment check.
    disabled: Option<bool>,
}

impl Default for Builder {
    fn default() -> Self {
        Self::new()
    }
}

impl Builder {
    pub fn new() -> Self {
        Self {
            worker_threads: None,
            thread_name: default_thread_name_fn(),
            disabled: None,
        }
    }

    pub fn worker_threads(mut self, val: usize) -> Self {
        assert!(val > 0, "Worker threads cannot be set to 0");
        self.worker_threads = Some(val);
        self
    }

    /// Sets the name of threads spawned by the runtime's pool.
    ///
    /// The default name is "minirun-worker-{N}".
    pub fn thread_name(mut self, val: impl Into<String>) -> Self {
        let val = val.into();
        self.thread_name = ThreadNameFn(Arc::new(move || val.clone()));
        self
    }

    /// Sets a function used to generate the name of threads spawned by the
    /// runtime's pool.
    pub fn thread_name_fn<F>(mut self, f: F) -> Self
    where
        F: Fn() -> String + Send + Sync + 'static,
    {
        self.thread_name = ThreadNameFn(Arc::new(f));
        self
    }

    #[cfg(test)]
    pub(crate) fn disabled(mut self, val: bool) -> Self {
        self.disabled = Some(val);
        self
    }

    /// Creates the configured [`Runtime`].
    ///
    /// The returned runtime is ready to accept tasks. Failing to spawn a
    /// worker thread is fatal here; nothing about construction is
    /// recoverable.
    pub fn try_build(self) -> Result<Runtime> {
        let cfg: RuntimeConfig = self.try_into()?;

        let core = Arc::new(RuntimeCore::new());
        let pool = if cfg.disabled {
            ThreadPool::inline(core.clone())
        } else {
            ThreadPool::spawn(core.clone(), &cfg)?
        };

        debug!(
            workers = cfg.worker_threads,
            disabled = cfg.disabled,
            "minirun runtime started"
        );

        Ok(Runtime { core, pool, cfg })
    }
}

// Resolved builder, consumed by the pool and the submission paths.
#[derive(Debug, Clone)]
pub(crate) struct RuntimeConfig {
    pub(crate) worker_threads: usize,
    pub(crate) thread_name: ThreadNameFn,
    pub(crate) disabled: bool,
}

impl TryFrom<Builder> for RuntimeConfig {
    type Error = anyhow::Error;

    fn try_from(builder: Builder) -> Result<Self, Self::Error> {
        let worker_threads = match builder.worker_threads {
            Some(val) => val,
            // Leave one core to the submitting thread.
            None => thread::available_parallelism()?.get().saturating_sub(1).max(1),
        };

        let disabled = builder
            .disabled
            .unwrap_or_else(|| std::env::var_os(DISABLE_ENV).is_some());

        Ok(RuntimeConfig {
            worker_threads,
            thread_name: builder.thread_name,
            disabled,
        })
    }
}

/// The task runtime: a worker pool plus the per-key dependency tracking
/// that orders submissions touching the same memory.
///
/// Submission is fire-and-forget: declare what a closure reads and writes,
/// and the runtime runs it once every earlier conflicting task has
/// finished. Writers on a key run in submission order; readers between two
/// writers run between them and may overlap each other.
///
/// ```
/// use minirun::{Builder, deps};
/// # use std::sync::Arc;
/// # use std::sync::atomic::{AtomicU64, Ordering};
///
/// let rt = Builder::new().worker_threads(2).try_build()?;
/// let cell = Arc::new(AtomicU64::new(0));
///
/// let producer = cell.clone();
/// rt.task(move || producer.store(7, Ordering::Relaxed))
///     .writes(deps![&*cell])
///     .submit();
///
/// let consumer = cell.clone();
/// rt.task(move || assert_eq!(consumer.load(Ordering::Relaxed), 7))
///     .reads(deps![&*cell])
///     .submit();
///
/// rt.taskwait();
/// # Ok::<(), anyhow::Error>(())
/// ```
///
/// Closures must not panic: a panicking task never decrements the running
/// counters and `taskwait` will hang. Dropping the runtime drains all
/// submitted work first.
#[derive(Debug)]
pub struct Runtime {
    core: Arc<RuntimeCore>,
    pool: ThreadPool,
    cfg: RuntimeConfig,
}

impl Runtime {
    /// Submit a closure with no declared dependencies into the default
    /// group.
    pub fn create_task<F>(&self, fun: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.task(fun).submit();
    }

    /// Start building a task around `fun`; declare keys, group, and an
    /// optional completion probe on the returned builder, then `submit`.
    pub fn task<F>(&self, fun: F) -> TaskBuilder<'_>
    where
        F: FnOnce() + Send + 'static,
    {
        TaskBuilder {
            runtime: self,
            work: Work::Sync(Box::new(fun)),
            in_keys: SmallVec::new(),
            out_keys: SmallVec::new(),
            group: DEFAULT_GROUP,
        }
    }

    /// Start building a task whose closure returns its own completion
    /// probe, so the closure can capture async state (a device stream, an
    /// in-flight request) at first call.
    pub fn task_deferred_probe<F, P>(&self, fun: F) -> TaskBuilder<'_>
    where
        F: FnOnce() -> P + Send + 'static,
        P: FnMut() -> bool + Send + 'static,
    {
        TaskBuilder {
            runtime: self,
            work: Work::DeferredProbe(Box::new(move || Box::new(fun()) as ProbeFn)),
            in_keys: SmallVec::new(),
            out_keys: SmallVec::new(),
            group: DEFAULT_GROUP,
        }
    }

    /// Block until every task submitted so far (in any group) has
    /// finalized. The calling thread participates by running ready tasks
    /// instead of spinning idle.
    pub fn taskwait(&self) {
        while self.core.registry.global_running() != 0 {
            if !self.core.pool.try_run_one() {
                thread::yield_now();
            }
        }
    }

    /// Like [`Runtime::taskwait`], scoped to one group. Tasks in other
    /// groups may still be running when this returns.
    pub fn taskwait_group(&self, group: GroupId) {
        let state = self.core.registry.group(group);
        while state.running() != 0 {
            if !self.core.pool.try_run_one() {
                thread::yield_now();
            }
        }
    }

    /// Submit one independent task per index in `range` and, for the
    /// ephemeral group, wait for all of them.
    pub fn parallel_for<F>(&self, range: Range<usize>, fun: F, group: GroupId)
    where
        F: Fn(usize) + Send + Sync + 'static,
    {
        self.parallel_for_step(range, 1, fun, group);
    }

    /// [`Runtime::parallel_for`] with a stride.
    pub fn parallel_for_step<F>(&self, range: Range<usize>, step: usize, fun: F, group: GroupId)
    where
        F: Fn(usize) + Send + Sync + 'static,
    {
        assert!(step > 0, "parallel_for step cannot be 0");

        let fun = Arc::new(fun);
        let mut index = range.start;
        while index < range.end {
            let fun = fun.clone();
            self.task(move || fun(index)).group(group).submit();
            match index.checked_add(step) {
                Some(next) => index = next,
                None => break,
            }
        }

        if group == EPHEMERAL_GROUP {
            self.taskwait_group(EPHEMERAL_GROUP);
        }
    }

    /// Submit one independent task per item and, for the ephemeral group,
    /// wait for all of them.
    pub fn parallel_for_each<I, F>(&self, items: I, fun: F, group: GroupId)
    where
        I: IntoIterator,
        I::Item: Send + 'static,
        F: Fn(I::Item) + Send + Sync + 'static,
    {
        let fun = Arc::new(fun);
        for item in items {
            let fun = fun.clone();
            self.task(move || fun(item)).group(group).submit();
        }

        if group == EPHEMERAL_GROUP {
            self.taskwait_group(EPHEMERAL_GROUP);
        }
    }

    /// [`Runtime::parallel_for_each`] with `chunk_size` items handled per
    /// task, for work too fine-grained to submit per item.
    pub fn parallel_for_each_chunked<I, F>(
        &self,
        items: I,
        chunk_size: usize,
        fun: F,
        group: GroupId,
    ) where
        I: IntoIterator,
        I::Item: Send + 'static,
        F: Fn(I::Item) + Send + Sync + 'static,
    {
        assert!(chunk_size > 0, "parallel_for_each chunk size cannot be 0");

        let fun = Arc::new(fun);
        let mut iter = items.into_iter();
        loop {
            let chunk: Vec<_> = iter.by_ref().take(chunk_size).collect();
            if chunk.is_empty() {
                break;
            }
            let fun = fun.clone();
            self.task(move || {
                for item in chunk {
                    fun(item);
                }
            })
            .group(group)
            .submit();
        }

        if group == EPHEMERAL_GROUP {
            self.taskwait_group(EPHEMERAL_GROUP);
        }
    }

    fn submit(&self, work: Work, in_keys: &[Dep], out_keys: &[Dep], group: GroupId) {
        if self.cfg.disabled {
            return Self::submit_inline(work);
        }

        self.core.registry.increment_running(group);

        let task = self.core.freelist.acquire(&self.core);
        task.prepare(work, group);

        let state = self.core.registry.group(group);
        {
            // One submission's insertions are atomic per group: otherwise
            // two multi-key submissions could interleave their writer
            // blocks across sentinels and order against each other both
            // ways.
            let _wiring = state.submit_lock.lock();
            for key in in_keys {
                state.sentinel(*key).add_dep(&task, AccessMode::Read);
            }
            for key in out_keys {
                state.sentinel(*key).add_dep(&task, AccessMode::Write);
            }
        }

        task.activate();
    }

    // Disabled mode: the submission order itself satisfies every declared
    // dependency, so the closure runs to completion right here.
    fn submit_inline(work: Work) {
        match work {
            Work::Sync(fun) => fun(),
            Work::Async { fun, mut probe } => {
                fun();
                while !probe() {
                    hint::spin_loop();
                }
            }
            Work::DeferredProbe(fun) => {
                let mut probe = fun();
                while !probe() {
                    hint::spin_loop();
                }
            }
        }
    }
}

impl Drop for Runtime {
    fn drop(&mut self) {
        self.taskwait();
        self.pool.shutdown();
        // Pooled tasks hold the core alive; dropping them breaks the cycle.
        self.core.freelist.clear();
        debug!("minirun runtime shut down");
    }
}

// Test-only helpers
#[cfg(test)]
impl Runtime {
    pub(crate) fn core(&self) -> &Arc<RuntimeCore> {
        &self.core
    }

    pub(crate) fn worker_count(&self) -> usize {
        self.pool.worker_count()
    }

    pub(crate) fn worker_names(&self) -> Vec<String> {
        self.pool.worker_names()
    }
}

/// One pending submission: the closure, its declared read/write keys, its
/// group, and optionally an async completion probe. Dropping the builder
/// without [`TaskBuilder::submit`] discards the task.
#[must_use = "a task does nothing until submitted"]
pub struct TaskBuilder<'rt> {
    runtime: &'rt Runtime,
    work: Work,
    in_keys: SmallVec<[Dep; 8]>,
    out_keys: SmallVec<[Dep; 8]>,
    group: GroupId,
}

impl TaskBuilder<'_> {
    /// Declare the keys this task reads.
    pub fn reads(mut self, keys: impl IntoIterator<Item = Dep>) -> Self {
        self.in_keys.extend(keys);
        self
    }

    /// Declare the keys this task writes.
    pub fn writes(mut self, keys: impl IntoIterator<Item = Dep>) -> Self {
        self.out_keys.extend(keys);
        self
    }

    pub fn group(mut self, group: GroupId) -> Self {
        self.group = group;
        self
    }

    /// Attach an async completion probe: the task's closure starts the
    /// work, and the task finalizes only once `probe` reports done. While
    /// it doesn't, the worker yields the task back to the queue's tail.
    pub fn probe<P>(mut self, probe: P) -> Self
    where
        P: FnMut() -> bool + Send + 'static,
    {
        self.work = match self.work {
            Work::Sync(fun) | Work::Async { fun, .. } => Work::Async {
                fun,
                probe: Box::new(probe),
            },
            Work::DeferredProbe(_) => {
                panic!("probe() cannot be combined with a deferred-probe task")
            }
        };
        self
    }

    /// Hand the task to the runtime.
    pub fn submit(self) {
        self.runtime
            .submit(self.work, &self.in_keys, &self.out_keys, self.group);
    }
}
