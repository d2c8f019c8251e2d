//! # WakeOS
//!
//! A preemptive, priority-based real-time scheduler core for single-core
//! microcontrollers, with priority inheritance and a tick or tick-less
//! timer queue.
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────────────────────────────────────────────────┐
//! │                    Application Tasks                   │
//! ├────────────────────────────────────────────────────────┤
//! │                 Kernel API (kernel.rs)                 │
//! │    critical section per call · two-phase blocking      │
//! ├──────────────────┬─────────────────┬───────────────────┤
//! │ Primitives       │ Scheduler core  │ Block/Wake        │
//! │ mutex.rs         │ scheduler.rs    │ wait.rs           │
//! │ mailbox.rs       │ ready.rs        │ priority.rs       │
//! │                  │ timer.rs        │                   │
//! ├──────────────────┴─────────────────┴───────────────────┤
//! │       Control blocks (object.rs, task.rs)              │
//! ├────────────────────────────────────────────────────────┤
//! │     Port trait (port.rs) · Cortex-M4 port (arch/)      │
//! └────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Scheduling Model
//!
//! - The ready queue is ordered by effective priority, FIFO within a
//!   priority. Its head is the task that should run.
//! - A task blocks on a wait list with a timeout and sits in the timer
//!   queue at the same time. An explicit wake and the timeout race inside
//!   the critical section; exactly one of them ends the wait.
//! - A task owning a mutex runs at the priority of its strongest waiter.
//! - Preemption is requested, never performed: the port's switch interrupt
//!   calls back into [`Scheduler::switch_context`].
//!
//! ## Memory Model
//!
//! - **No heap**: control blocks live in fixed arenas sized in `config.rs`
//! - **Typed indices** (`TaskId`, `TimerId`, `GuardId`) instead of pointers
//! - **Critical sections**: a guard that restores the interrupt mask on drop

#![cfg_attr(not(test), no_std)]

pub mod arch;
pub mod config;
pub mod error;
pub mod kernel;
pub mod mailbox;
pub mod mutex;
pub mod object;
pub mod port;
pub mod priority;
pub mod ready;
pub mod scheduler;
pub mod sync;
pub mod task;
pub mod timer;
pub mod wait;

pub use error::{Event, KernelError, MailboxError, MutexError, Tick, Timeout};
pub use kernel::Kernel;
pub use mailbox::Mailbox;
pub use mutex::Mutex;
pub use object::{GuardId, TaskId, TimerId};
pub use port::{Port, TaskFn};
pub use scheduler::Scheduler;
pub use sync::Shared;
