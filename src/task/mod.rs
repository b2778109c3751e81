//! The task object and its lifecycle.
//!
//! A task is prepared for one submission, wired to the sentinels of its
//! declared keys, activated, executed by a worker (possibly several times
//! while an async probe reports not-done), then finalized and recycled. The
//! runtime owns every task; queues and sentinels hold [`TaskRef`] handles.

pub(crate) mod freelist;

use crate::runtime::{GroupId, RuntimeCore};
use crate::sentinel::Sentinel;
use crate::utils::SpinLock;
use parking_lot::Mutex;
use smallvec::SmallVec;
use std::mem;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

pub(crate) type TaskRef = Arc<Task>;

pub(crate) type WorkFn = Box<dyn FnOnce() + Send + 'static>;
pub(crate) type ProbeFn = Box<dyn FnMut() -> bool + Send + 'static>;

/// The user work carried by one submission.
pub(crate) enum Work {
    /// Plain closure; the task finalizes as soon as it returns.
    Sync(WorkFn),
    /// Closure plus a completion probe. The probe is polled on every
    /// dequeue (including right after the closure runs); the task
    /// finalizes once it reports done.
    Async { fun: WorkFn, probe: ProbeFn },
    /// Closure whose return value is the completion probe, letting the
    /// closure capture async state at first call.
    DeferredProbe(Box<dyn FnOnce() -> ProbeFn + Send + 'static>),
}

// Most submissions declare a handful of keys; keep the finish lists on the
// task until a submission spills past this.
const FINISH_LIST_SPILL_THRESHOLD: usize = 8;

type SentinelList = SmallVec<[Arc<Sentinel>; FINISH_LIST_SPILL_THRESHOLD]>;

/// State touched only by the submitting thread (during wiring, before
/// activation) or by the single worker currently executing the task.
struct ExecState {
    work: Option<Work>,
    probe: Option<ProbeFn>,
    started: bool,
    group: GroupId,
    /// Sentinels to `decrease_in` at finalization, one per declared in-key.
    on_finish_decrease: SentinelList,
    /// Sentinels to `emit_out` at finalization, one per declared out-key.
    on_finish_emit_out: SentinelList,
}

pub(crate) struct Task {
    exec: Mutex<ExecState>,
    /// Remaining unsatisfied dependencies plus the activation ticket. The
    /// lock is held across decrement-and-test so "reaches zero" enqueues
    /// exactly once.
    countdown: SpinLock<usize>,
    finished: AtomicBool,
    core: Arc<RuntimeCore>,
}

impl Task {
    pub(crate) fn new(core: Arc<RuntimeCore>) -> Self {
        Self {
            exec: Mutex::new(ExecState {
                work: None,
                probe: None,
                started: false,
                group: 0,
                on_finish_decrease: SmallVec::new(),
                on_finish_emit_out: SmallVec::new(),
            }),
            countdown: SpinLock::new(0),
            finished: AtomicBool::new(false),
            core,
        }
    }

    /// Reinitialize a recycled task for one submission. The countdown
    /// starts at 1: the activation ticket, removed by [`Task::activate`]
    /// once every dependency has been wired.
    pub(crate) fn prepare(self: &Arc<Self>, work: Work, group: GroupId) {
        let mut exec = self.exec.lock();
        exec.work = Some(work);
        exec.probe = None;
        exec.started = false;
        exec.group = group;
        exec.on_finish_decrease.clear();
        exec.on_finish_emit_out.clear();
        drop(exec);

        self.finished.store(false, Ordering::Relaxed);
        *self.countdown.lock() = 1;
    }

    pub(crate) fn record_decrease_in(&self, sentinel: Arc<Sentinel>) {
        self.exec.lock().on_finish_decrease.push(sentinel);
    }

    pub(crate) fn record_emit_out(&self, sentinel: Arc<Sentinel>) {
        self.exec.lock().on_finish_emit_out.push(sentinel);
    }

    pub(crate) fn increase_countdown(&self) {
        *self.countdown.lock() += 1;
    }

    pub(crate) fn decrease_countdown(self: &Arc<Self>) {
        let mut countdown = self.countdown.lock();
        debug_assert!(*countdown > 0, "Task::decrease_countdown: underflow");
        *countdown -= 1;
        if *countdown == 0 {
            self.core.pool.enqueue(self.clone());
        }
    }

    /// Remove the activation ticket. Called once all sentinel insertions of
    /// the submission are done; a task with no unsatisfied dependencies
    /// becomes ready here.
    pub(crate) fn activate(self: &Arc<Self>) {
        self.decrease_countdown();
    }

    /// Worker-side invocation.
    pub(crate) fn run(self: Arc<Self>) {
        let first = {
            let mut exec = self.exec.lock();
            if exec.started {
                None
            } else {
                exec.started = true;
                exec.work.take()
            }
        };

        match first {
            Some(Work::Sync(fun)) => {
                fun();
                self.finalize();
            }
            Some(Work::Async { fun, probe }) => {
                self.exec.lock().probe = Some(probe);
                fun();
                self.poll_probe();
            }
            Some(Work::DeferredProbe(fun)) => {
                let probe = fun();
                self.exec.lock().probe = Some(probe);
                self.poll_probe();
            }
            // Re-dequeued async task: only the probe is left to poll.
            None => self.poll_probe(),
        }
    }

    /// Poll the completion probe; not-done yields the task back to the tail
    /// of the ready queue so the worker can make progress elsewhere.
    fn poll_probe(self: Arc<Self>) {
        let mut probe = {
            let mut exec = self.exec.lock();
            exec.probe
                .take()
                .expect("Task::poll_probe: async task without a probe")
        };
        if probe() {
            self.finalize();
        } else {
            self.exec.lock().probe = Some(probe);
            let core = self.core.clone();
            core.pool.enqueue(self);
        }
    }

    /// Retire the task: advance every sentinel it touched, recycle the
    /// object, and drop it from the running counts (in that order, so the
    /// counters only reach zero once the task is fully gone).
    fn finalize(self: Arc<Self>) {
        self.finished.store(true, Ordering::Release);

        let (decrease, emit_out, group) = {
            let mut exec = self.exec.lock();
            (
                mem::take(&mut exec.on_finish_decrease),
                mem::take(&mut exec.on_finish_emit_out),
                exec.group,
            )
        };
        for sentinel in decrease {
            sentinel.decrease_in();
        }
        for sentinel in emit_out {
            sentinel.emit_out();
        }

        let core = self.core.clone();
        core.freelist.release(self);
        core.registry.decrement_running(group);
    }
}

#[cfg(test)]
impl Task {
    pub(crate) fn countdown_value(&self) -> usize {
        *self.countdown.lock()
    }

    pub(crate) fn is_finished(&self) -> bool {
        self.finished.load(Ordering::Acquire)
    }
}
