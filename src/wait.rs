//! # Block/Wake Protocol
//!
//! A *guard* is the wait-list root embedded (by index) in every object tasks
//! can block on: mutexes, mailboxes, timers and the private sleep guard.
//! Wait lists are doubly linked through the task blocks, ordered by
//! effective priority with FIFO among equals.
//!
//! A blocked task is a member of two structures at once: its guard's wait
//! list and the timer queue (state `Delayed`). Whichever path ends the wait
//! first (an explicit wake or the timeout dispatcher) unlinks it from both
//! inside the same critical section, so the loser of the race finds nothing
//! left to do.
//!
//! Blocking is split in two phases. [`Scheduler::wait`] either resolves the
//! request synchronously or parks the current task and requests a switch;
//! once the task runs again the caller reads [`Scheduler::event`].

use crate::config::MAX_GUARDS;
use crate::error::{Event, Timeout, IMMEDIATE};
use crate::object::{GuardId, Node, ObjState, TaskId};
use crate::port::Port;
use crate::scheduler::Scheduler;

/// Wait-list root.
#[derive(Debug, Clone, Copy, Default)]
pub struct Guard {
    /// Highest-priority waiter.
    pub(crate) head: Option<TaskId>,
    /// Task holding the object, for objects with ownership (mutexes).
    pub(crate) owner: Option<TaskId>,
    /// Next guard in the owner's chain of held mutexes.
    pub(crate) next_owned: Option<GuardId>,
}

pub(crate) fn arena() -> [Guard; MAX_GUARDS] {
    [Guard::default(); MAX_GUARDS]
}

impl<P: Port> Scheduler<P> {
    // -----------------------------------------------------------------------
    // Wait-list primitives
    // -----------------------------------------------------------------------

    /// Queue `id` on `guard` behind every waiter of equal or higher
    /// priority.
    pub(crate) fn wait_append(&mut self, id: TaskId, guard: GuardId) {
        let prio = self.tasks[id.index()].prio;
        let mut prev = None;
        let mut next = self.guards[guard.index()].head;
        while let Some(n) = next {
            if prio > self.tasks[n.index()].prio {
                break;
            }
            prev = Some(n);
            next = self.tasks[n.index()].wait_next;
        }

        let tcb = &mut self.tasks[id.index()];
        tcb.guard = Some(guard);
        tcb.wait_prev = prev;
        tcb.wait_next = next;

        match prev {
            None => self.guards[guard.index()].head = Some(id),
            Some(p) => self.tasks[p.index()].wait_next = Some(id),
        }
        if let Some(n) = next {
            self.tasks[n.index()].wait_prev = Some(id);
        }
    }

    /// Take `id` out of its wait list. Returns the guard it was queued on.
    pub(crate) fn wait_detach(&mut self, id: TaskId) -> Option<GuardId> {
        let tcb = &mut self.tasks[id.index()];
        let guard = tcb.guard.take()?;
        let prev = tcb.wait_prev.take();
        let next = tcb.wait_next.take();

        match prev {
            None => self.guards[guard.index()].head = next,
            Some(p) => self.tasks[p.index()].wait_next = next,
        }
        if let Some(n) = next {
            self.tasks[n.index()].wait_prev = prev;
        }
        Some(guard)
    }

    /// Detach a waiter and record why its wait ended. If the wait list
    /// belonged to an owned object, the owner may have lost its reason to
    /// run boosted.
    pub(crate) fn release_waiter(&mut self, id: TaskId, event: Event) {
        self.tasks[id.index()].event = event;
        if let Some(guard) = self.wait_detach(id) {
            self.reevaluate_owner(guard);
        }
    }

    /// Recompute the priority of `guard`'s owner, if it has one.
    pub(crate) fn reevaluate_owner(&mut self, guard: GuardId) {
        if let Some(owner) = self.guards[guard.index()].owner {
            let base = self.tasks[owner.index()].base;
            self.recompute_priority(owner, base);
        }
    }

    // -----------------------------------------------------------------------
    // Block
    // -----------------------------------------------------------------------

    /// Block the current task on `guard`.
    ///
    /// Returns `Some(Timeout)` without touching any queue when the timeout
    /// resolves to zero. Otherwise the task becomes `Delayed`, is linked
    /// into the wait list and the timer queue, a switch is requested and
    /// `None` is returned: the outcome is read with [`Scheduler::event`]
    /// after the task is resumed.
    pub fn wait(&mut self, guard: GuardId, timeout: Timeout) -> Option<Event> {
        let now = self.now();
        let delay = timeout.delay_from(now);
        if delay == IMMEDIATE {
            return Some(Event::Timeout);
        }

        let cur = self.current;
        debug_assert_eq!(self.tasks[cur.index()].hdr.state, ObjState::Ready);

        self.ready_remove(cur);
        {
            let hdr = &mut self.tasks[cur.index()].hdr;
            hdr.start = now;
            hdr.delay = delay;
        }
        self.timer_insert(Node::Task(cur), ObjState::Delayed);
        self.wait_append(cur, guard);
        self.reevaluate_owner(guard);

        log::trace!("task {:?} blocked on {:?}", cur, guard);
        P::request_switch();
        None
    }

    // -----------------------------------------------------------------------
    // Wake
    // -----------------------------------------------------------------------

    /// End the wait of a `Delayed` task with `event`: out of the wait list
    /// and the timer queue, back into the ready queue.
    pub(crate) fn wake_task(&mut self, id: TaskId, event: Event) {
        debug_assert_eq!(self.tasks[id.index()].hdr.state, ObjState::Delayed);
        self.tasks[id.index()].event = event;
        let guard = self.wait_detach(id);
        self.timer_remove(Node::Task(id));
        self.ready_insert(id);
        if let Some(guard) = guard {
            self.reevaluate_owner(guard);
        }
        log::trace!("task {:?} woken: {}", id, event);
    }

    /// Wake the head waiter of `guard`, if any.
    pub fn wake_one(&mut self, guard: GuardId, event: Event) -> Option<TaskId> {
        let id = self.guards[guard.index()].head?;
        self.wake_task(id, event);
        Some(id)
    }

    /// Wake every waiter of `guard`, in wait-list order.
    pub fn wake_all(&mut self, guard: GuardId, event: Event) {
        while self.wake_one(guard, event).is_some() {}
    }

    /// Whether anything is blocked on `guard`.
    #[inline]
    pub fn has_waiters(&self, guard: GuardId) -> bool {
        self.guards[guard.index()].head.is_some()
    }

    /// Waiters of `guard`, head first.
    pub fn waiters(&self, guard: GuardId) -> impl Iterator<Item = TaskId> + '_ {
        let mut cursor = self.guards[guard.index()].head;
        core::iter::from_fn(move || {
            let id = cursor?;
            cursor = self.tasks[id.index()].wait_next;
            Some(id)
        })
    }
}

// ---------------------------------------------------------------------------
// Unit tests (host-only)
// ---------------------------------------------------------------------------
