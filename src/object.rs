//! # Control-Block Header
//!
//! Every schedulable or timed entity (task, timer) starts with the same
//! header: an identity tag and the `prev`/`next` pair used by whichever
//! circular queue currently holds it. The ready queue and the timer queue
//! share these links, which is what makes "member of exactly one queue"
//! an invariant rather than a convention.
//!
//! Control blocks live in fixed arenas inside the scheduler and are named by
//! typed indices instead of pointers.
//!
//! ```text
//!   ready queue                        timer queue
//!   ┌──────┐   ┌────┐   ┌────┐         ┌──────┐   ┌─────┐   ┌────┐
//!   │ IDLE │──►│ T3 │──►│ T1 │──┐      │ WAIT │──►│ Tm0 │──►│ T2 │──┐
//!   └──────┘   └────┘   └────┘  │      └──────┘   └─────┘   └────┘  │
//!      ▲                        │         ▲                         │
//!      └────────────────────────┘         └─────────────────────────┘
//! ```

use crate::error::Tick;

/// Index of a task control block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskId(pub(crate) u16);

impl TaskId {
    /// The idle task, sentinel of the ready queue.
    pub const IDLE: Self = Self(0);
    /// The boot thread, adopted as a task at construction.
    pub const MAIN: Self = Self(1);

    #[inline]
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

/// Index of a timer control block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TimerId(pub(crate) u16);

impl TimerId {
    /// The infinite timer, sentinel of the timer queue.
    pub const WAIT: Self = Self(0);

    #[inline]
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

/// Index of a wait-list root ("guard") owned by a synchronization object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GuardId(pub(crate) u16);

impl GuardId {
    /// Private guard that sleeping tasks wait on. Nothing releases it
    /// except `task_resume` and the timeout.
    pub const SLEEP: Self = Self(0);

    #[inline]
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

/// A position in one of the circular queues.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Node {
    Task(TaskId),
    Timer(TimerId),
}

/// Identity tag: which queue, if any, holds the entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjState {
    /// In no queue.
    Stopped,
    /// Task in the ready queue.
    Ready,
    /// Task in the timer queue (and usually in a wait list).
    Delayed,
    /// Timer counting down in the timer queue.
    Timer,
    /// The idle task; never leaves the ready queue.
    Idle,
}

/// Header shared by task and timer control blocks.
///
/// `start` and `delay` live here rather than in the bodies because the
/// timer queue orders tasks and timers by the same expiry arithmetic.
#[derive(Debug, Clone, Copy)]
pub struct Header {
    pub state: ObjState,
    pub prev: Node,
    pub next: Node,
    /// Absolute time the countdown started.
    pub start: Tick,
    /// Countdown length from `start`; `INFINITE` never expires.
    pub delay: Tick,
}

impl Header {
    /// A header linked to itself, i.e. the sole member of its own ring.
    pub const fn detached(this: Node, state: ObjState) -> Self {
        Self {
            state,
            prev: this,
            next: this,
            start: 0,
            delay: 0,
        }
    }

    /// Absolute expiry time, modulo the counter range.
    #[inline]
    pub fn expiry(&self) -> Tick {
        self.start.wrapping_add(self.delay)
    }
}
