//! Per-key access tracking.
//!
//! A [`Sentinel`] serializes tasks touching one dependency key under the
//! rule: writers are ordered against everything, readers only against
//! writers. Internally it keeps a FIFO of [`Block`]s, one per epoch. The
//! head block is the epoch currently allowed to run; later blocks wait
//! behind the writers that opened them.

use crate::task::TaskRef;
use crate::utils::SpinLock;
use std::collections::VecDeque;
use std::process;
use std::sync::Arc;
use tracing::error;

/// How a task accesses a key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum AccessMode {
    Read,
    Write,
}

/// One epoch in the sentinel's FIFO.
///
/// `pending_readers` counts readers admitted to this epoch that have not yet
/// finished. `writer` is the writer that opened this block (`None` for the
/// initial block, and cleared once the writer departs). Readers submitted
/// while the writer is still queued or running are parked in
/// `blocked_readers` and released when the writer retires.
struct Block {
    writer: Option<TaskRef>,
    pending_readers: u64,
    blocked_readers: VecDeque<TaskRef>,
    writer_satisfied: bool,
}

impl Block {
    fn new(writer: Option<TaskRef>) -> Self {
        Self {
            writer,
            pending_readers: 0,
            blocked_readers: VecDeque::new(),
            writer_satisfied: false,
        }
    }
}

struct State {
    blocks: VecDeque<Block>,
}

/// Tracks readers and writers of a single key within one group.
///
/// Sentinels are created on demand by the registry and live for the whole
/// runtime; every transition happens under the sentinel's own lock.
pub(crate) struct Sentinel {
    state: SpinLock<State>,
}

impl Sentinel {
    pub(crate) fn new() -> Self {
        Self {
            state: SpinLock::new(State {
                blocks: VecDeque::new(),
            }),
        }
    }

    /// Record `task`'s access to this key during submission.
    ///
    /// Readers join the tail epoch; if any block is queued ahead of the tail
    /// the reader is parked behind the tail's writer and its countdown is
    /// bumped. Writers always open a fresh block and wait for promotion.
    pub(crate) fn add_dep(self: &Arc<Self>, task: &TaskRef, mode: AccessMode) {
        let mut state = self.state.lock();
        if state.blocks.is_empty() {
            state.blocks.push_back(Block::new(None));
        }

        match mode {
            AccessMode::Read => {
                task.record_decrease_in(self.clone());
                let parked = state.blocks.len() > 1;
                let tail = state
                    .blocks
                    .back_mut()
                    .expect("Sentinel::add_dep: block list is never empty here");
                tail.pending_readers += 1;
                if parked {
                    // A writer is queued ahead; run only after it retires.
                    task.increase_countdown();
                    tail.blocked_readers.push_back(task.clone());
                }
            }
            AccessMode::Write => {
                task.record_emit_out(self.clone());
                task.increase_countdown();
                state.blocks.push_back(Block::new(Some(task.clone())));
            }
        }

        Self::try_advance(&mut state);
    }

    /// A reader of this key finished: retire it from the head epoch.
    pub(crate) fn decrease_in(&self) {
        let mut state = self.state.lock();
        let head = state
            .blocks
            .front_mut()
            .expect("Sentinel::decrease_in: reader finished with no block");
        debug_assert!(head.pending_readers > 0);
        head.pending_readers -= 1;
        Self::try_advance(&mut state);
    }

    /// A writer of this key finished: retire its predecessor epoch and
    /// release the readers parked behind the writer.
    pub(crate) fn emit_out(&self) {
        let mut state = self.state.lock();
        let retired = state
            .blocks
            .pop_front()
            .expect("Sentinel::emit_out: writer finished with no block");
        if retired.pending_readers != 0 {
            // A reader of the previous epoch is still marked pending while
            // its successor writer retires. The ordering protocol is broken
            // and no recovery is possible.
            error!(
                pending_readers = retired.pending_readers,
                "sentinel retired a block with pending readers"
            );
            process::abort();
        }

        // The new head is the departed writer's own block. Its writer slot
        // has done its job; clearing it opens the epoch so try_advance can
        // promote the next writer once the released readers drain.
        if let Some(head) = state.blocks.front_mut() {
            head.writer = None;
            let parked = std::mem::take(&mut head.blocked_readers);
            for reader in parked {
                reader.decrease_countdown();
            }
        }

        Self::try_advance(&mut state);
    }

    /// Promote the next queued writer if the head epoch has fully drained.
    fn try_advance(state: &mut State) {
        let Some(head) = state.blocks.front() else {
            return;
        };
        if head.pending_readers != 0 || head.writer.is_some() {
            return;
        }
        let Some(next) = state.blocks.get_mut(1) else {
            return;
        };
        if next.writer_satisfied {
            return;
        }
        if let Some(writer) = &next.writer {
            next.writer_satisfied = true;
            writer.decrease_countdown();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::RuntimeCore;
    use crate::task::Work;

    fn harness() -> (Arc<RuntimeCore>, Arc<Sentinel>) {
        (Arc::new(RuntimeCore::new()), Arc::new(Sentinel::new()))
    }

    fn task(core: &Arc<RuntimeCore>) -> TaskRef {
        let task = core.freelist.acquire(core);
        task.prepare(Work::Sync(Box::new(|| {})), 0);
        task
    }

    #[test]
    fn test_first_writer_is_satisfied_immediately() {
        let (core, sentinel) = harness();
        let writer = task(&core);

        sentinel.add_dep(&writer, AccessMode::Write);
        // The countdown bump and the immediate promotion cancel out: only
        // the activation ticket remains.
        assert_eq!(writer.countdown_value(), 1);

        writer.activate();
        assert!(core.pool.pop().is_some());
    }

    #[test]
    fn test_reader_on_idle_key_runs_immediately() {
        let (core, sentinel) = harness();
        let reader = task(&core);

        sentinel.add_dep(&reader, AccessMode::Read);
        assert_eq!(reader.countdown_value(), 1);

        reader.activate();
        assert!(core.pool.pop().is_some());
    }

    #[test]
    fn test_reader_parks_behind_queued_writer() {
        let (core, sentinel) = harness();
        let writer = task(&core);
        let reader = task(&core);

        sentinel.add_dep(&writer, AccessMode::Write);
        sentinel.add_dep(&reader, AccessMode::Read);
        writer.activate();
        reader.activate();

        // Only the writer is ready; the reader is parked in its block.
        assert_eq!(reader.countdown_value(), 1);
        assert!(core.pool.pop().is_some());
        assert!(core.pool.pop().is_none());

        // Writer retires: parked reader is released.
        sentinel.emit_out();
        assert!(core.pool.pop().is_some());
    }

    #[test]
    fn test_second_writer_waits_for_released_readers() {
        let (core, sentinel) = harness();
        let w1 = task(&core);
        let r1 = task(&core);
        let w2 = task(&core);

        sentinel.add_dep(&w1, AccessMode::Write);
        sentinel.add_dep(&r1, AccessMode::Read);
        sentinel.add_dep(&w2, AccessMode::Write);
        w1.activate();
        r1.activate();
        w2.activate();

        // w1 ready, r1 parked, w2 queued two blocks back.
        assert!(core.pool.pop().is_some());
        assert!(core.pool.pop().is_none());

        // w1 retires: r1 runs, w2 still gated on r1.
        sentinel.emit_out();
        assert!(core.pool.pop().is_some());
        assert!(core.pool.pop().is_none());

        // r1 retires: w2 is promoted.
        sentinel.decrease_in();
        assert!(core.pool.pop().is_some());
    }

    #[test]
    fn test_writer_behind_active_readers() {
        let (core, sentinel) = harness();
        let r1 = task(&core);
        let r2 = task(&core);
        let w = task(&core);

        sentinel.add_dep(&r1, AccessMode::Read);
        sentinel.add_dep(&r2, AccessMode::Read);
        sentinel.add_dep(&w, AccessMode::Write);
        r1.activate();
        r2.activate();
        w.activate();

        // Both readers run concurrently; the writer waits.
        assert!(core.pool.pop().is_some());
        assert!(core.pool.pop().is_some());
        assert!(core.pool.pop().is_none());

        sentinel.decrease_in();
        assert!(core.pool.pop().is_none());
        sentinel.decrease_in();
        assert!(core.pool.pop().is_some());
    }
}
