//! Task recycling.
//!
//! Submission rate can be high relative to allocator throughput, so task
//! objects are pooled: acquired for one submission, returned at
//! finalization, and preallocated in batches when the pool runs dry. The
//! list never shrinks; the runtime clears it wholesale at teardown.

use crate::runtime::RuntimeCore;
use crate::task::{Task, TaskRef};
use crate::utils::SpinLock;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

/// How many tasks to preallocate when the free-list underflows.
const PREALLOC_BATCH: usize = 100;

pub(crate) struct TaskFreeList {
    tasks: SpinLock<Vec<TaskRef>>,
    /// Total tasks ever allocated; `len()` catches back up to this once all
    /// in-flight work has finalized.
    allocated: AtomicUsize,
}

impl TaskFreeList {
    pub(crate) fn new() -> Self {
        Self {
            tasks: SpinLock::new(Vec::new()),
            allocated: AtomicUsize::new(0),
        }
    }

    pub(crate) fn acquire(&self, core: &Arc<RuntimeCore>) -> TaskRef {
        let mut tasks = self.tasks.lock();
        if tasks.is_empty() {
            tasks.reserve(PREALLOC_BATCH);
            for _ in 0..PREALLOC_BATCH {
                tasks.push(Arc::new(Task::new(core.clone())));
            }
            self.allocated.fetch_add(PREALLOC_BATCH, Ordering::Relaxed);
        }
        tasks
            .pop()
            .expect("TaskFreeList::acquire: list is non-empty after growth")
    }

    pub(crate) fn release(&self, task: TaskRef) {
        self.tasks.lock().push(task);
    }

    /// Drop every pooled task. Tasks hold the runtime core alive; clearing
    /// the list at teardown breaks that cycle.
    pub(crate) fn clear(&self) {
        self.tasks.lock().clear();
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.tasks.lock().len()
    }

    #[cfg(test)]
    pub(crate) fn allocated(&self) -> usize {
        self.allocated.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_grows_in_batches_and_recycles() {
        let core = Arc::new(RuntimeCore::new());
        let list = &core.freelist;

        let task = list.acquire(&core);
        assert_eq!(list.len(), PREALLOC_BATCH - 1);
        assert_eq!(list.allocated(), PREALLOC_BATCH);

        list.release(task);
        assert_eq!(list.len(), PREALLOC_BATCH);
    }

    #[test]
    fn test_underflow_triggers_another_batch() {
        let core = Arc::new(RuntimeCore::new());
        let list = &core.freelist;

        let held: Vec<_> = (0..PREALLOC_BATCH).map(|_| list.acquire(&core)).collect();
        assert_eq!(list.len(), 0);

        let extra = list.acquire(&core);
        assert_eq!(list.allocated(), 2 * PREALLOC_BATCH);

        list.release(extra);
        for task in held {
            list.release(task);
        }
        assert_eq!(list.len(), list.allocated());
    }
}
