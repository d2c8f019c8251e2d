//! # Task Control Block
//!
//! Defines the task model for WakeOS. Each task carries two priorities:
//! the immutable-by-the-kernel *base* priority assigned by its creator, and
//! the *effective* priority the ready queue and wait lists are ordered by.
//! The two differ only while the task owns a mutex that a higher-priority
//! task is blocked on.

use crate::config::MAX_TASKS;
use crate::error::Event;
use crate::object::{GuardId, Header, Node, ObjState, TaskId};
use crate::port::TaskFn;

// ---------------------------------------------------------------------------
// Task state machine
// ---------------------------------------------------------------------------
//
//   ┌──────────┐   task_start()   ┌─────────┐   wait()/sleep   ┌─────────┐
//   │ Stopped  │ ───────────────► │  Ready  │ ───────────────► │ Delayed │
//   └──────────┘                  └─────────┘                  └─────────┘
//        ▲                          ▲    │                          │
//        │        task_kill()       │    │   wake / timeout         │
//        └──────────────────────────┼────┘◄─────────────────────────┘
//                                   └──── (also from Delayed)

/// Task Control Block (TCB).
///
/// TCBs are stored in a fixed arena inside the scheduler and never freed;
/// a stopped task reuses its own block when started again.
pub struct Task<C> {
    pub(crate) hdr: Header,

    /// Priority assigned by the application (higher = more important).
    pub(crate) base: u8,

    /// Effective priority after inheritance. Always `>= base`.
    pub(crate) prio: u8,

    /// Body, re-entered by the port's trampoline whenever it returns.
    pub(crate) entry: Option<TaskFn>,

    /// Stack region handed to the port when the task is (re)started.
    pub(crate) stack: Option<&'static mut [u32]>,

    /// Saved execution context. `None` until the port has built one or
    /// the task has been switched out at least once.
    pub(crate) context: Option<C>,

    /// Event code written by whoever ended the last wait.
    pub(crate) event: Event,

    /// Wait list the task is queued on while Delayed.
    pub(crate) guard: Option<GuardId>,

    /// Neighbours within the guard's wait list. `wait_prev == None` means
    /// the task is the head.
    pub(crate) wait_next: Option<TaskId>,
    pub(crate) wait_prev: Option<TaskId>,

    /// Head of the chain of mutexes this task owns.
    pub(crate) owned: Option<GuardId>,
}

impl<C> Task<C> {
    /// An unallocated block.
    pub(crate) fn vacant(id: TaskId) -> Self {
        Self {
            hdr: Header::detached(Node::Task(id), ObjState::Stopped),
            base: 0,
            prio: 0,
            entry: None,
            stack: None,
            context: None,
            event: Event::Success,
            guard: None,
            wait_next: None,
            wait_prev: None,
            owned: None,
        }
    }

    /// Initialize a freshly allocated block with its priority and body.
    pub(crate) fn init(&mut self, prio: u8, entry: TaskFn, stack: &'static mut [u32]) {
        self.base = prio;
        self.prio = prio;
        self.entry = Some(entry);
        self.stack = Some(stack);
    }

    /// Current identity tag.
    #[inline]
    pub fn state(&self) -> ObjState {
        self.hdr.state
    }

    /// Base priority as assigned by the application.
    #[inline]
    pub fn base_priority(&self) -> u8 {
        self.base
    }

    /// Effective priority, including inheritance.
    #[inline]
    pub fn priority(&self) -> u8 {
        self.prio
    }

    /// Whether the task is parked in the timer queue.
    #[inline]
    pub fn is_delayed(&self) -> bool {
        self.hdr.state == ObjState::Delayed
    }

    /// Whether the task is linked into a wait list.
    #[inline]
    pub fn is_waiting(&self) -> bool {
        self.guard.is_some()
    }
}

/// Build the initial TCB arena.
pub(crate) fn arena<C>() -> [Task<C>; MAX_TASKS] {
    core::array::from_fn(|i| Task::vacant(TaskId(i as u16)))
}

// ---------------------------------------------------------------------------
// Unit tests (host-only)
// ---------------------------------------------------------------------------
