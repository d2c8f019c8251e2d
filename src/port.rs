//! # Port Interface
//!
//! The narrow hardware abstraction the scheduler core calls but does not
//! implement. A port is a type with associated functions only: interrupt
//! masking, the switch request and the alarm are global hardware state, so
//! there is nothing to hold a reference to.
//!
//! Two timekeeping strategies are supported and selected by
//! [`Port::TICKLESS`]:
//!
//! - **Tick mode** (`false`): the port calls `Scheduler::tick` from a
//!   periodic interrupt and the scheduler keeps its own counter.
//! - **Tick-less mode** (`true`): the port exposes a free-running counter
//!   through [`Port::now`] and a one-shot alarm that the scheduler programs
//!   for the exact expiry of the timer-queue head.

use crate::error::Tick;

/// Task body. Re-entered by the port's trampoline whenever it returns.
pub type TaskFn = fn();

/// Hardware abstraction layer consumed by the scheduler core.
pub trait Port: 'static {
    /// Saved interrupt-mask state returned by [`Port::lock`].
    type Token: Copy;

    /// A task's saved execution context (typically its stack pointer).
    type Context: Copy;

    /// Whether time comes from [`Port::now`] and the alarm (tick-less) or
    /// from `Scheduler::tick` calls (periodic tick).
    const TICKLESS: bool = false;

    /// Mask the interrupts that can reenter the scheduler and return the
    /// previous mask state. Nestable.
    fn lock() -> Self::Token;

    /// Restore the mask state saved by the matching [`Port::lock`].
    fn unlock(token: Self::Token);

    /// Whether the caller runs in interrupt context.
    fn in_isr() -> bool;

    /// Ask for a context switch as soon as the lock is released.
    fn request_switch();

    /// Current value of the free-running counter. Tick-less ports only.
    fn now() -> Tick {
        0
    }

    /// Program the one-shot alarm for absolute time `at`. A compare-match
    /// alarm set for a time already reached need not fire; the scheduler
    /// follows up with [`Port::force_alarm`] in that case. Tick-less ports
    /// only.
    fn arm_alarm(_at: Tick) {}

    /// Cancel the one-shot alarm. Tick-less ports only.
    fn disarm_alarm() {}

    /// Pend the alarm interrupt now, so the dispatcher runs as soon as the
    /// lock is released. Used when the earliest expiry is already due and a
    /// compare-match would not fire until the counter wraps. Tick-less
    /// ports only.
    fn force_alarm() {}

    /// Build the initial execution context for `entry` running on `stack`.
    fn init_context(entry: TaskFn, stack: &mut [u32]) -> Self::Context;

    /// Body of the idle task.
    fn idle() {
        core::hint::spin_loop();
    }
}

// ---------------------------------------------------------------------------
// Host mock (tests only)
// ---------------------------------------------------------------------------
