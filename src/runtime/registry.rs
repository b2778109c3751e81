//! Group bookkeeping: sentinel maps, running counters, submission locks.
//!
//! Two-level mapping `group -> (key -> sentinel)`, created lazily and never
//! deleted while the runtime lives; key cardinality is bounded by program
//! intent, so the simpler no-GC policy wins over refcounting sentinels.

use crate::dep::Dep;
use crate::runtime::GroupId;
use crate::sentinel::Sentinel;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

pub(crate) struct GroupRegistry {
    groups: DashMap<GroupId, Arc<GroupState>>,
    global_running: AtomicUsize,
}

/// Everything scoped to one group: its sentinels, its running-task count,
/// and the lock that makes one submission's dependency wiring atomic.
pub(crate) struct GroupState {
    sentinels: DashMap<Dep, Arc<Sentinel>>,
    running: AtomicUsize,
    pub(crate) submit_lock: Mutex<()>,
}

impl GroupState {
    fn new() -> Self {
        Self {
            sentinels: DashMap::new(),
            running: AtomicUsize::new(0),
            submit_lock: Mutex::new(()),
        }
    }

    pub(crate) fn sentinel(&self, key: Dep) -> Arc<Sentinel> {
        self.sentinels
            .entry(key)
            .or_insert_with(|| Arc::new(Sentinel::new()))
            .clone()
    }

    pub(crate) fn running(&self) -> usize {
        self.running.load(Ordering::Acquire)
    }
}

impl GroupRegistry {
    pub(crate) fn new() -> Self {
        Self {
            groups: DashMap::new(),
            global_running: AtomicUsize::new(0),
        }
    }

    pub(crate) fn group(&self, group: GroupId) -> Arc<GroupState> {
        self.groups
            .entry(group)
            .or_insert_with(|| Arc::new(GroupState::new()))
            .clone()
    }

    pub(crate) fn increment_running(&self, group: GroupId) {
        self.global_running.fetch_add(1, Ordering::Relaxed);
        self.group(group).running.fetch_add(1, Ordering::Relaxed);
    }

    /// Release ordering so a waiter that observes zero also observes every
    /// effect of the finished tasks.
    pub(crate) fn decrement_running(&self, group: GroupId) {
        self.group(group).running.fetch_sub(1, Ordering::Release);
        self.global_running.fetch_sub(1, Ordering::Release);
    }

    pub(crate) fn global_running(&self) -> usize {
        self.global_running.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_scope_per_group() {
        let registry = GroupRegistry::new();

        registry.increment_running(0);
        registry.increment_running(7);
        assert_eq!(registry.global_running(), 2);
        assert_eq!(registry.group(0).running(), 1);
        assert_eq!(registry.group(7).running(), 1);

        registry.decrement_running(7);
        assert_eq!(registry.global_running(), 1);
        assert_eq!(registry.group(7).running(), 0);
        assert_eq!(registry.group(0).running(), 1);
    }

    #[test]
    fn test_sentinels_are_created_once_per_key() {
        let registry = GroupRegistry::new();
        let group = registry.group(0);

        let key = Dep::raw(0x1000);
        let first = group.sentinel(key);
        let second = group.sentinel(key);
        assert!(Arc::ptr_eq(&first, &second));

        // Same key in another group tracks independently.
        let other = registry.group(1).sentinel(key);
        assert!(!Arc::ptr_eq(&first, &other));
    }
}
