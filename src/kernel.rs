//! # Kernel
//!
//! Process-wide front end over one [`Scheduler`]. Every entry point takes
//! the critical section, so tasks and interrupt handlers can call it freely;
//! the scheduler itself never locks.
//!
//! ## Startup Sequence
//!
//! ```text
//! reset_handler (cortex-m-rt)
//!   └─► main()
//!         ├─► KERNEL.init(idle_stack)  ← Adopt boot thread, set up idle
//!         ├─► KERNEL.task_create() …   ← Register tasks, timers, objects
//!         └─► arch::start()            ← Launch scheduler (no return)
//!               ├─► Configure SysTick
//!               ├─► Set interrupt priorities
//!               └─► Resume the ready head
//! ```
//!
//! ## Blocking
//!
//! A blocking call runs in two critical sections. The first either
//! completes the request or parks the caller and requests a switch; the
//! port takes the switch as soon as the lock is released. When the caller
//! runs again, the second section collects the outcome the waker left
//! behind.

use core::cell::UnsafeCell;

use crate::error::{Event, KernelError, MailboxError, MutexError, Tick, Timeout};
use crate::mailbox::Mailbox;
use crate::mutex::Mutex;
use crate::object::{TaskId, TimerId};
use crate::port::{Port, TaskFn};
use crate::scheduler::Scheduler;
use crate::sync::{CriticalSection, Shared};
use crate::timer::TimerProc;

/// Global kernel instance for port `P`.
pub struct Kernel<P: Port> {
    sched: UnsafeCell<Option<Scheduler<P>>>,
}

// Every access goes through `enter`, which holds the critical section.
unsafe impl<P: Port> Sync for Kernel<P> {}

impl<P: Port> Kernel<P> {
    pub const fn new() -> Self {
        Self {
            sched: UnsafeCell::new(None),
        }
    }

    /// Build the scheduler. The calling thread becomes the main task.
    pub fn init(&self, idle_stack: &'static mut [u32]) -> Result<(), KernelError> {
        let _cs = CriticalSection::<P>::enter();
        // SAFETY: the critical section is held
        let slot = unsafe { &mut *self.sched.get() };
        if slot.is_some() {
            return Err(KernelError::BadState);
        }
        *slot = Some(Scheduler::new(idle_stack));
        log::debug!("kernel initialized");
        Ok(())
    }

    fn enter<R>(&self, f: impl FnOnce(&CriticalSection<P>, &mut Scheduler<P>) -> R) -> R {
        let cs = CriticalSection::<P>::enter();
        // SAFETY: the critical section is held, and `f` cannot reach
        // `self.sched` again except through another `enter`, which it must
        // not call.
        let slot = unsafe { &mut *self.sched.get() };
        let Some(sched) = slot.as_mut() else {
            panic!("kernel used before init");
        };
        f(&cs, sched)
    }

    /// Run `f` on the scheduler inside the critical section. `f` must not
    /// call back into the kernel.
    pub fn with<R>(&self, f: impl FnOnce(&mut Scheduler<P>) -> R) -> R {
        self.enter(|_, sched| f(sched))
    }

    /// Two-phase blocking call: `start` either resolves the request or
    /// parks the caller; in the latter case `finish` collects the outcome
    /// after the caller is resumed.
    pub fn block_on<R>(
        &self,
        start: impl FnOnce(&CriticalSection<P>, &mut Scheduler<P>) -> Option<R>,
        finish: impl FnOnce(&CriticalSection<P>, &mut Scheduler<P>) -> R,
    ) -> R {
        debug_assert!(!P::in_isr(), "blocking call from interrupt context");
        match self.enter(start) {
            Some(outcome) => outcome,
            None => self.enter(finish),
        }
    }

    // -----------------------------------------------------------------------
    // Interrupt entry points
    // -----------------------------------------------------------------------

    /// Periodic tick handler.
    pub fn on_tick(&self) {
        self.with(|s| s.tick());
    }

    /// Alarm handler for tick-less ports.
    pub fn on_alarm(&self) {
        self.with(|s| s.dispatch_timers());
    }

    /// Switch handler: store the outgoing context, return the incoming one.
    pub fn on_switch(&self, saved: P::Context) -> P::Context {
        self.with(|s| s.switch_context(saved))
    }

    // -----------------------------------------------------------------------
    // Tasks
    // -----------------------------------------------------------------------

    pub fn current(&self) -> TaskId {
        self.with(|s| s.current())
    }

    pub fn now(&self) -> Tick {
        self.with(|s| s.now())
    }

    pub fn task_create(
        &self,
        prio: u8,
        entry: TaskFn,
        stack: &'static mut [u32],
    ) -> Result<TaskId, KernelError> {
        self.with(|s| s.task_create(prio, entry, stack))
    }

    pub fn task_start(&self, id: TaskId) -> Result<(), KernelError> {
        self.with(|s| s.task_start(id))
    }

    pub fn task_kill(&self, id: TaskId) -> Result<(), KernelError> {
        self.with(|s| s.task_kill(id))
    }

    pub fn task_stop(&self) -> Result<(), KernelError> {
        self.with(|s| s.task_stop())
    }

    pub fn task_yield(&self) {
        self.with(|s| s.task_yield())
    }

    pub fn task_set_base_priority(&self, id: TaskId, prio: u8) {
        self.with(|s| s.task_set_base_priority(id, prio))
    }

    pub fn task_resume(&self, id: TaskId) -> bool {
        self.with(|s| s.task_resume(id))
    }

    /// Sleep for `delay` ticks. `Timeout` unless resumed early.
    pub fn sleep_for(&self, delay: Tick) -> Event {
        self.block_on(|_, s| s.sleep_for(delay), |_, s| s.event(s.current()))
    }

    /// Sleep until the clock reads `time`.
    pub fn sleep_until(&self, time: Tick) -> Event {
        self.block_on(|_, s| s.sleep_until(time), |_, s| s.event(s.current()))
    }

    // -----------------------------------------------------------------------
    // Timers
    // -----------------------------------------------------------------------

    pub fn timer_create(&self) -> Result<TimerId, KernelError> {
        self.with(|s| s.timer_create())
    }

    pub fn timer_set_proc(&self, id: TimerId, proc_: Option<TimerProc<P>>) {
        self.with(|s| s.timer_set_proc(id, proc_))
    }

    pub fn timer_start_for(&self, id: TimerId, delay: Tick, period: Tick) {
        self.with(|s| s.timer_start_for(id, delay, period))
    }

    pub fn timer_start_until(&self, id: TimerId, time: Tick) {
        self.with(|s| s.timer_start_until(id, time))
    }

    pub fn timer_stop(&self, id: TimerId) {
        self.with(|s| s.timer_stop(id))
    }

    /// Block until the timer's next expiry.
    pub fn timer_wait(&self, id: TimerId, timeout: Timeout) -> Event {
        self.block_on(|_, s| s.timer_wait(id, timeout), |_, s| s.event(s.current()))
    }

    // -----------------------------------------------------------------------
    // Mutexes
    // -----------------------------------------------------------------------

    pub fn mutex_create(&self) -> Result<Mutex, KernelError> {
        self.with(|s| Mutex::new(s))
    }

    pub fn mutex_lock(&self, mutex: Mutex, timeout: Timeout) -> Result<(), MutexError> {
        self.block_on(|_, s| mutex.lock(s, timeout), |_, s| mutex.collect(s))
    }

    pub fn mutex_unlock(&self, mutex: Mutex) -> Result<(), MutexError> {
        self.with(|s| mutex.unlock(s))
    }

    pub fn mutex_kill(&self, mutex: Mutex) {
        self.with(|s| mutex.kill(s))
    }

    // -----------------------------------------------------------------------
    // Mailboxes
    // -----------------------------------------------------------------------

    /// Allocate a mailbox into `slot`.
    pub fn mailbox_create<T: Send, const N: usize>(
        &self,
        slot: &Shared<Mailbox<T, N>>,
    ) -> Result<(), KernelError> {
        self.enter(|cs, s| {
            let mailbox = Mailbox::new(s)?;
            slot.put(cs, mailbox);
            Ok(())
        })
    }

    /// Post to the mailbox in `slot`. The message comes back if the buffer
    /// is full or the mailbox was never created.
    pub fn mailbox_give<T: Send, const N: usize>(
        &self,
        slot: &Shared<Mailbox<T, N>>,
        value: T,
    ) -> Result<(), T> {
        self.enter(|cs, s| {
            slot.lock(cs, |mailbox| match mailbox {
                Some(mailbox) => mailbox.give(s, value),
                None => Err(value),
            })
        })
    }

    /// Receive from the mailbox in `slot`.
    pub fn mailbox_take<T: Send, const N: usize>(
        &self,
        slot: &Shared<Mailbox<T, N>>,
        timeout: Timeout,
    ) -> Result<T, MailboxError> {
        self.block_on(
            |cs, s| {
                slot.lock(cs, |mailbox| match mailbox {
                    Some(mailbox) => mailbox.take(s, timeout),
                    None => Some(Err(MailboxError::Stopped)),
                })
            },
            |cs, s| {
                slot.lock(cs, |mailbox| match mailbox {
                    Some(mailbox) => mailbox.collect(s),
                    None => Err(MailboxError::Stopped),
                })
            },
        )
    }

    pub fn mailbox_kill<T: Send, const N: usize>(&self, slot: &Shared<Mailbox<T, N>>) {
        self.enter(|cs, s| {
            slot.lock(cs, |mailbox| {
                if let Some(mailbox) = mailbox {
                    mailbox.kill(s);
                }
            })
        })
    }
}

impl<P: Port> Default for Kernel<P> {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Unit tests (host-only)
// ---------------------------------------------------------------------------
//
// The mock port never performs a switch, so a call that parks the caller
// collects immediately. Tests drive the second phase by hand where the
// interleaving matters.

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object::ObjState;
    use crate::port::mock::{self, TickPort, TicklessPort};

    fn body() {}

    fn kernel() -> &'static Kernel<TickPort> {
        mock::init_logging();
        let kernel = Box::leak(Box::new(Kernel::new()));
        kernel.init(mock::stack()).unwrap();
        kernel
    }

    #[test]
    fn test_init_once() {
        let k = kernel();
        assert_eq!(k.init(mock::stack()), Err(KernelError::BadState));
        assert_eq!(k.current(), TaskId::MAIN);
    }

    #[test]
    fn test_every_entry_point_locks() {
        let k = kernel();
        k.with(|_| assert_eq!(mock::lock_depth(), 1));
        assert_eq!(mock::lock_depth(), 0);
    }

    #[test]
    fn test_tick_advances_time() {
        let k = kernel();
        for _ in 0..3 {
            k.on_tick();
        }
        assert_eq!(k.now(), 3);
    }

    #[test]
    fn test_mailbox_round_trip_through_kernel() {
        static SLOT: Shared<Mailbox<u32, 2>> = Shared::new();
        let k = kernel();
        k.mailbox_create(&SLOT).unwrap();
        k.mailbox_give(&SLOT, 7).unwrap();
        assert_eq!(k.mailbox_take(&SLOT, Timeout::NONE), Ok(7));
        assert_eq!(k.mailbox_take(&SLOT, Timeout::NONE), Err(MailboxError::Empty));
    }

    #[test]
    fn test_mailbox_uncreated_slot() {
        static SLOT: Shared<Mailbox<u8, 1>> = Shared::new();
        let k = kernel();
        assert_eq!(k.mailbox_give(&SLOT, 1), Err(1));
        assert_eq!(k.mailbox_take(&SLOT, Timeout::FOREVER), Err(MailboxError::Stopped));
    }

    #[test]
    fn test_blocking_call_parks_then_collects() {
        let k = kernel();
        let m = k.mutex_create().unwrap();
        let t = k.task_create(2, body, mock::stack()).unwrap();
        k.task_start(t).unwrap();
        k.on_switch(body);
        k.mutex_lock(m, Timeout::NONE).unwrap();
        k.task_stop().unwrap();
        assert_eq!(k.on_switch(body) as usize, body as fn() as usize);
        assert_eq!(k.current(), TaskId::MAIN);

        // The abandoned mutex was released with the task
        assert_eq!(k.mutex_lock(m, Timeout::NONE), Ok(()));

        // Parked on a held mutex. The mock cannot switch, so the second
        // phase runs early; only the queue state is meaningful here.
        k.task_start(t).unwrap();
        k.on_switch(body);
        let _ = k.mutex_lock(m, Timeout::For(5));
        k.with(|s| assert_eq!(s.task(t).state(), ObjState::Delayed));

        // Back on the owner, releasing hands the mutex over
        k.on_switch(body);
        assert_eq!(k.current(), TaskId::MAIN);
        k.mutex_unlock(m).unwrap();
        k.with(|s| {
            assert_eq!(m.owner(s), Some(t));
            assert_eq!(s.event(t), Event::Success);
        });
    }

    #[test]
    fn test_tickless_overdue_timer_runs_from_alarm() {
        mock::init_logging();
        mock::set_now(500);
        let k: &'static Kernel<TicklessPort> = Box::leak(Box::new(Kernel::new()));
        k.init(mock::stack()).unwrap();
        let t = k.timer_create().unwrap();

        k.timer_start_until(t, 400);
        assert!(mock::take_pending_alarm());
        k.on_alarm();
        assert!(!k.with(|s| s.timer_is_armed(t)));
        assert_eq!(mock::alarm(), None);
    }

    #[test]
    fn test_sleep_resumed_early() {
        let k = kernel();
        k.with(|s| {
            s.sleep_for(50);
            s.switch_context(body);
            assert!(s.task_resume(TaskId::MAIN));
            s.switch_context(body);
        });
        assert_eq!(k.with(|s| s.event(TaskId::MAIN)), Event::Success);
    }
}
