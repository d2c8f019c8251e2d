//! # Priority Inheritance
//!
//! A task's effective priority is the maximum of its base priority and the
//! effective priority of the head waiter of every mutex it owns. Wait lists
//! are priority ordered, so the head is always the strongest claim.
//!
//! When a task's effective priority changes, its position in whatever
//! structure holds it is fixed up. If that structure is the wait list of a
//! mutex, the mutex owner's priority depends on it in turn, so the change
//! propagates along the ownership chain. The walk is iterative and bounded
//! by [`MAX_MUTEX_NESTING`]; it stops at the first task whose priority does
//! not change.

use crate::config::MAX_MUTEX_NESTING;
use crate::object::{GuardId, ObjState, TaskId};
use crate::port::Port;
use crate::scheduler::Scheduler;

impl<P: Port> Scheduler<P> {
    /// `max(base, head waiter priority of each mutex owned by id)`.
    pub(crate) fn inherited_priority(&self, id: TaskId, base: u8) -> u8 {
        let mut prio = base;
        let mut owned = self.tasks[id.index()].owned;
        while let Some(guard) = owned {
            let guard = &self.guards[guard.index()];
            if let Some(head) = guard.head {
                prio = prio.max(self.tasks[head.index()].prio);
            }
            owned = guard.next_owned;
        }
        prio
    }

    /// Recompute the effective priority of `id` from `base` and propagate
    /// the change along the chain of mutex owners it is blocked behind.
    pub(crate) fn recompute_priority(&mut self, id: TaskId, base: u8) {
        let mut task = id;
        let mut base = base;

        for _ in 0..MAX_MUTEX_NESTING {
            let prio = self.inherited_priority(task, base);
            let old = self.tasks[task.index()].prio;
            if prio == old {
                return;
            }
            self.tasks[task.index()].prio = prio;
            log::trace!("task {:?}: priority {} -> {}", task, old, prio);

            match self.tasks[task.index()].hdr.state {
                ObjState::Ready if task == self.current => {
                    self.ready_reposition_current(task);
                    return;
                }
                ObjState::Ready => {
                    self.ready_remove(task);
                    self.ready_insert(task);
                    return;
                }
                ObjState::Delayed => {
                    let Some(guard) = self.wait_detach(task) else {
                        return;
                    };
                    self.wait_append(task, guard);
                    let Some(owner) = self.guards[guard.index()].owner else {
                        return;
                    };
                    base = self.tasks[owner.index()].base;
                    task = owner;
                }
                ObjState::Stopped | ObjState::Timer | ObjState::Idle => return,
            }
        }

        debug_assert!(false, "mutex ownership chain deeper than MAX_MUTEX_NESTING");
    }

    // -----------------------------------------------------------------------
    // Ownership chains
    // -----------------------------------------------------------------------

    /// Record `id` as the owner of `guard`.
    pub(crate) fn own(&mut self, guard: GuardId, id: TaskId) {
        debug_assert!(self.guards[guard.index()].owner.is_none());
        let tcb = &mut self.tasks[id.index()];
        self.guards[guard.index()].owner = Some(id);
        self.guards[guard.index()].next_owned = tcb.owned;
        tcb.owned = Some(guard);
    }

    /// Clear the owner of `guard` and unlink it from the owner's chain.
    /// Returns the former owner. The caller recomputes its priority.
    pub(crate) fn disown(&mut self, guard: GuardId) -> Option<TaskId> {
        let owner = self.guards[guard.index()].owner.take()?;
        let after = self.guards[guard.index()].next_owned.take();

        if self.tasks[owner.index()].owned == Some(guard) {
            self.tasks[owner.index()].owned = after;
        } else {
            let mut cursor = self.tasks[owner.index()].owned;
            while let Some(g) = cursor {
                if self.guards[g.index()].next_owned == Some(guard) {
                    self.guards[g.index()].next_owned = after;
                    break;
                }
                cursor = self.guards[g.index()].next_owned;
            }
        }
        Some(owner)
    }

    /// Mutexes owned by `id`, most recently acquired first.
    pub fn owned_guards(&self, id: TaskId) -> impl Iterator<Item = GuardId> + '_ {
        let mut cursor = self.tasks[id.index()].owned;
        core::iter::from_fn(move || {
            let guard = cursor?;
            cursor = self.guards[guard.index()].next_owned;
            Some(guard)
        })
    }
}

// ---------------------------------------------------------------------------
// Unit tests (host-only)
// ---------------------------------------------------------------------------
