use crate::task::freelist::TaskFreeList;

// Public API
pub mod runtime;
pub use runtime::{Builder, Runtime, TaskBuilder};

// Exports
pub(crate) mod pool;
pub(crate) mod registry;

use pool::PoolShared;
use registry::GroupRegistry;


/// Partition tag: dependencies and running counts are scoped per group, so
/// tasks in different groups never order against each other.
pub type GroupId = u32;

/// The group submissions land in when none is specified.
pub const DEFAULT_GROUP: GroupId = 0;

/// Reserved group used by the parallel-for helpers: they submit into it and
/// drain it before returning.
pub const EPHEMERAL_GROUP: GroupId = GroupId::MAX;

/// State shared between the facade, the workers, and every task: the ready
/// queue, the group/sentinel registry, and the task free-list. Tasks keep
/// the core alive through their own handle; the runtime breaks that cycle
/// at teardown by clearing the free-list.
pub(crate) struct RuntimeCore {
    pub(crate) pool: PoolShared,
    pub(crate) registry: GroupRegistry,
    pub(crate) freelist: TaskFreeList,
}

impl RuntimeCore {
    pub(crate) fn new() -> Self {
        Self {
            pool: PoolShared::new(),
            registry: GroupRegistry::new(),
            freelist: TaskFreeList::new(),
        }
    }
}

impl std::fmt::Debug for RuntimeCore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RuntimeCore").finish_non_exhaustive()
    }
}
