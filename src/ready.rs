//! # Ready Queue
//!
//! Circular doubly linked list anchored on the idle task. Members are kept
//! in non-increasing effective-priority order and FIFO within a priority,
//! so the idle task's successor is always the task that should run.
//!
//! The same `link_before`/`unlink` primitives serve the timer queue; only
//! the position search differs.

use crate::object::{Header, Node, ObjState, TaskId};
use crate::port::Port;
use crate::scheduler::Scheduler;

impl<P: Port> Scheduler<P> {
    // -----------------------------------------------------------------------
    // Ring primitives
    // -----------------------------------------------------------------------

    #[inline]
    pub(crate) fn hdr(&self, node: Node) -> &Header {
        match node {
            Node::Task(t) => &self.tasks[t.index()].hdr,
            Node::Timer(t) => &self.timers[t.index()].hdr,
        }
    }

    #[inline]
    pub(crate) fn hdr_mut(&mut self, node: Node) -> &mut Header {
        match node {
            Node::Task(t) => &mut self.tasks[t.index()].hdr,
            Node::Timer(t) => &mut self.timers[t.index()].hdr,
        }
    }

    /// Link `node` into the ring that holds `next`, just in front of it.
    pub(crate) fn link_before(&mut self, node: Node, next: Node) {
        let prev = self.hdr(next).prev;
        {
            let hdr = self.hdr_mut(node);
            hdr.prev = prev;
            hdr.next = next;
        }
        self.hdr_mut(next).prev = node;
        self.hdr_mut(prev).next = node;
    }

    /// Take `node` out of its ring, leaving it linked to itself.
    pub(crate) fn unlink(&mut self, node: Node) {
        let Header { prev, next, .. } = *self.hdr(node);
        self.hdr_mut(next).prev = prev;
        self.hdr_mut(prev).next = next;
        let hdr = self.hdr_mut(node);
        hdr.prev = node;
        hdr.next = node;
    }

    // -----------------------------------------------------------------------
    // Ready ring
    // -----------------------------------------------------------------------

    /// Successor of `id` in the ready ring.
    #[inline]
    pub(crate) fn next_ready(&self, id: TaskId) -> TaskId {
        match self.tasks[id.index()].hdr.next {
            Node::Task(t) => t,
            Node::Timer(_) => unreachable!("timer linked into the ready queue"),
        }
    }

    /// The highest-priority Ready task, or the idle task when none is.
    #[inline]
    pub fn head(&self) -> TaskId {
        self.next_ready(TaskId::IDLE)
    }

    /// Ready tasks in scheduling order, idle task excluded.
    pub fn ready_tasks(&self) -> impl Iterator<Item = TaskId> + '_ {
        let mut cursor = self.head();
        core::iter::from_fn(move || {
            if cursor == TaskId::IDLE {
                return None;
            }
            let id = cursor;
            cursor = self.next_ready(id);
            Some(id)
        })
    }

    /// First member a task of priority `prio` must precede to land at the
    /// tail of its band.
    fn tail_of_band(&self, prio: u8) -> TaskId {
        let mut next = self.head();
        while next != TaskId::IDLE && self.tasks[next.index()].prio >= prio {
            next = self.next_ready(next);
        }
        next
    }

    /// First member a task of priority `prio` must precede to land at the
    /// front of its band.
    fn front_of_band(&self, prio: u8) -> TaskId {
        let mut next = self.head();
        while next != TaskId::IDLE && self.tasks[next.index()].prio > prio {
            next = self.next_ready(next);
        }
        next
    }

    /// Link a detached task at the tail of its priority band.
    pub(crate) fn ready_link(&mut self, id: TaskId) {
        let next = self.tail_of_band(self.tasks[id.index()].prio);
        self.link_before(Node::Task(id), Node::Task(next));
    }

    /// Make a task Ready. If it becomes the head, run the preemption check.
    pub(crate) fn ready_insert(&mut self, id: TaskId) {
        self.tasks[id.index()].hdr.state = ObjState::Ready;
        self.ready_link(id);
        if self.head() == id {
            self.preempt_check();
        }
    }

    /// Unlink a task from the ready ring. The caller sets the new state.
    pub(crate) fn ready_remove(&mut self, id: TaskId) {
        debug_assert_ne!(id, TaskId::IDLE, "the idle task never leaves the ready queue");
        self.unlink(Node::Task(id));
    }

    /// Re-position the running task after its effective priority changed.
    /// It goes to the front of its new band so a boost never costs it the
    /// processor to a peer; a switch is requested only if something now
    /// outranks it.
    pub(crate) fn ready_reposition_current(&mut self, id: TaskId) {
        self.ready_remove(id);
        let next = self.front_of_band(self.tasks[id.index()].prio);
        self.link_before(Node::Task(id), Node::Task(next));
        if self.head() != id {
            P::request_switch();
        }
    }

    /// Context-switch trigger: request a switch if the head should displace
    /// the running task.
    pub(crate) fn preempt_check(&self) {
        let head = self.head();
        let cur = self.current;
        if head == cur {
            return;
        }
        let running = &self.tasks[cur.index()];
        if running.hdr.state != ObjState::Ready || self.tasks[head.index()].prio > running.prio {
            P::request_switch();
        }
    }
}

// ---------------------------------------------------------------------------
// Unit tests (host-only)
// ---------------------------------------------------------------------------
