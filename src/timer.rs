//! # Timer Queue and Tick Dispatcher
//!
//! Every task with a pending timeout and every running timer sits in one
//! circular list anchored on the infinite sentinel timer `WAIT`. The list
//! is ordered by absolute expiry; entries that never expire collect at the
//! tail in insertion order, just before the sentinel.
//!
//! All arithmetic is modulo the counter range. An entry stores the time
//! its countdown started and its length, and is due once
//! `now - start >= delay` (wrapping subtraction). Ordering compares two
//! entries relative to the same origin, so it stays correct across a
//! counter wrap as long as no single delay exceeds half the range.
//!
//! ## Timekeeping
//!
//! - Tick mode: [`Scheduler::tick`] advances the counter and calls
//!   [`Scheduler::dispatch_timers`].
//! - Tick-less mode: the port's alarm interrupt calls
//!   [`Scheduler::dispatch_timers`] directly. The expiry test reprograms the
//!   alarm for the head it stops at, so the alarm always targets the
//!   earliest pending expiry. A new head that is already due pends the
//!   alarm interrupt through [`Port::force_alarm`].

use crate::config::MAX_TIMERS;
use crate::error::{Event, KernelError, Tick, Timeout, INFINITE};
use crate::object::{GuardId, Header, Node, ObjState, TimerId};
use crate::port::Port;
use crate::scheduler::Scheduler;

/// Callback run from the dispatcher each time a timer fires. It runs inside
/// the critical section and receives the scheduler, so it may wake tasks or
/// restart timers but must not block.
pub type TimerProc<P> = &'static dyn Fn(&mut Scheduler<P>, TimerId);

/// Timer control block.
pub struct Timer<P: Port> {
    pub(crate) hdr: Header,
    /// Reload value after each expiry. `0` makes the timer one-shot.
    pub(crate) period: Tick,
    pub(crate) proc_: Option<TimerProc<P>>,
    /// Tasks waiting for the next expiry. `None` only for the sentinel.
    pub(crate) guard: Option<GuardId>,
}

impl<P: Port> Timer<P> {
    fn vacant(id: TimerId) -> Self {
        Self {
            hdr: Header::detached(Node::Timer(id), ObjState::Stopped),
            period: 0,
            proc_: None,
            guard: None,
        }
    }
}

pub(crate) fn arena<P: Port>() -> [Timer<P>; MAX_TIMERS] {
    core::array::from_fn(|i| Timer::vacant(TimerId(i as u16)))
}

impl<P: Port> Scheduler<P> {
    // -----------------------------------------------------------------------
    // Timer queue
    // -----------------------------------------------------------------------

    #[inline]
    fn timer_head(&self) -> Node {
        self.timers[TimerId::WAIT.index()].hdr.next
    }

    /// Insert `node` by expiry and tag it with `state`. `start` and `delay`
    /// must already be set.
    pub(crate) fn timer_insert(&mut self, node: Node, state: ObjState) {
        let (start, delay) = {
            let hdr = self.hdr_mut(node);
            hdr.state = state;
            (hdr.start, hdr.delay)
        };

        let mut next = Node::Timer(TimerId::WAIT);
        if delay != INFINITE {
            let deadline = start.wrapping_add(delay);
            loop {
                next = self.hdr(next).next;
                let hdr = self.hdr(next);
                if hdr.delay == INFINITE || hdr.delay > deadline.wrapping_sub(hdr.start) {
                    break;
                }
            }
        }
        self.link_before(node, next);

        if self.timer_head() == node {
            self.program_alarm();
        }
    }

    /// Unlink `node` from the timer queue and mark it Stopped. The caller
    /// sets any other state.
    pub(crate) fn timer_remove(&mut self, node: Node) {
        let was_head = self.timer_head() == node;
        self.unlink(node);
        self.hdr_mut(node).state = ObjState::Stopped;
        if was_head {
            self.program_alarm();
        }
    }

    /// Point the alarm at the head's expiry. Tick mode has no alarm.
    ///
    /// A head that is already due, or falls due while the alarm is being
    /// set, pends the alarm interrupt instead of waiting for a match.
    fn program_alarm(&self) {
        if !P::TICKLESS {
            return;
        }
        let head = *self.hdr(self.timer_head());
        if head.delay == INFINITE {
            P::disarm_alarm();
            return;
        }
        P::arm_alarm(head.expiry());
        if head.delay <= P::now().wrapping_sub(head.start) {
            P::force_alarm();
        }
    }

    /// Whether `node` is due.
    ///
    /// In tick-less mode the test also leaves the alarm programmed for
    /// `node` when it is not due yet, and checks the clock again afterwards
    /// in case it passed the deadline while the alarm was being set.
    fn expired(&self, node: Node) -> bool {
        let hdr = *self.hdr(node);
        if !P::TICKLESS {
            return hdr.delay != INFINITE && hdr.delay <= self.counter.wrapping_sub(hdr.start);
        }

        P::disarm_alarm();
        if hdr.delay == INFINITE {
            return false;
        }
        if hdr.delay <= P::now().wrapping_sub(hdr.start) {
            return true;
        }
        P::arm_alarm(hdr.expiry());
        if hdr.delay > P::now().wrapping_sub(hdr.start) {
            return false;
        }
        P::disarm_alarm();
        true
    }

    /// Expire everything that is due, head first: fire timers and time out
    /// delayed tasks. Runs from the tick (tick mode) or the alarm interrupt
    /// (tick-less mode).
    pub fn dispatch_timers(&mut self) {
        loop {
            let head = self.timer_head();
            if !self.expired(head) {
                break;
            }
            match head {
                Node::Timer(t) => self.timer_fire(t),
                Node::Task(t) => self.wake_task(t, Event::Timeout),
            }
        }
    }

    /// Advance a due timer to its next period and release its waiters.
    ///
    /// The next expiry is computed from the previous one, not from the
    /// current time, so a periodic timer does not drift when dispatch runs
    /// late.
    fn timer_fire(&mut self, id: TimerId) {
        self.timer_remove(Node::Timer(id));
        let timer = &mut self.timers[id.index()];
        timer.hdr.start = timer.hdr.start.wrapping_add(timer.hdr.delay);
        timer.hdr.delay = timer.period;
        let (proc_, guard, period) = (timer.proc_, timer.guard, timer.period);

        if period != 0 {
            self.timer_insert(Node::Timer(id), ObjState::Timer);
        }
        log::trace!("timer {:?} fired", id);

        if let Some(f) = proc_ {
            f(self, id);
        }
        if let Some(guard) = guard {
            self.wake_all(guard, Event::Success);
        }
    }

    // -----------------------------------------------------------------------
    // Timer objects
    // -----------------------------------------------------------------------

    /// Allocate a stopped timer.
    pub fn timer_create(&mut self) -> Result<TimerId, KernelError> {
        self.timer_alloc()
    }

    /// Set or clear the callback run on every expiry.
    pub fn timer_set_proc(&mut self, id: TimerId, proc_: Option<TimerProc<P>>) {
        self.timers[id.index()].proc_ = proc_;
    }

    /// (Re)start a timer: first expiry `delay` ticks from now, then every
    /// `period` ticks. A zero `period` makes it one-shot.
    pub fn timer_start_for(&mut self, id: TimerId, delay: Tick, period: Tick) {
        debug_assert_ne!(id, TimerId::WAIT);
        let now = self.now();
        self.timer_restart(id, now, delay, period);
    }

    /// (Re)start a one-shot timer that expires at absolute time `time`. A
    /// time already passed expires on the next dispatch.
    pub fn timer_start_until(&mut self, id: TimerId, time: Tick) {
        debug_assert_ne!(id, TimerId::WAIT);
        let now = self.now();
        let delay = Timeout::Until(time).delay_from(now);
        self.timer_restart(id, now, delay, 0);
    }

    fn timer_restart(&mut self, id: TimerId, start: Tick, delay: Tick, period: Tick) {
        if self.timers[id.index()].hdr.state == ObjState::Timer {
            self.timer_remove(Node::Timer(id));
        }
        let timer = &mut self.timers[id.index()];
        timer.hdr.start = start;
        timer.hdr.delay = delay;
        timer.period = period;
        self.timer_insert(Node::Timer(id), ObjState::Timer);
        log::trace!("timer {:?} armed: delay {} period {}", id, delay, period);
    }

    /// Disarm a timer. Tasks waiting on it are released with `Stopped`.
    pub fn timer_stop(&mut self, id: TimerId) {
        debug_assert_ne!(id, TimerId::WAIT);
        if self.timers[id.index()].hdr.state == ObjState::Timer {
            self.timer_remove(Node::Timer(id));
        }
        if let Some(guard) = self.timers[id.index()].guard {
            self.wake_all(guard, Event::Stopped);
        }
    }

    /// Block the current task until the timer's next expiry.
    pub fn timer_wait(&mut self, id: TimerId, timeout: Timeout) -> Option<Event> {
        match self.timers[id.index()].guard {
            Some(guard) if self.timer_is_armed(id) => self.wait(guard, timeout),
            _ => Some(Event::Stopped),
        }
    }

    /// Whether the timer is counting down.
    #[inline]
    pub fn timer_is_armed(&self, id: TimerId) -> bool {
        self.timers[id.index()].hdr.state == ObjState::Timer
    }

    /// Members of the timer queue, earliest expiry first, sentinel excluded.
    pub fn timer_queue(&self) -> impl Iterator<Item = Node> + '_ {
        let mut cursor = self.timer_head();
        core::iter::from_fn(move || {
            if cursor == Node::Timer(TimerId::WAIT) {
                return None;
            }
            let node = cursor;
            cursor = self.hdr(node).next;
            Some(node)
        })
    }
}

// ---------------------------------------------------------------------------
// Unit tests (host-only)
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MAX_TASKS;
    use crate::object::TaskId;
    use crate::port::mock::{self, TickPort, TicklessPort};
    use core::sync::atomic::{AtomicU32, Ordering};
    use quickcheck_macros::quickcheck;

    fn body() {}

    fn sched() -> Scheduler<TickPort> {
        mock::init_logging();
        Scheduler::new(mock::stack())
    }

    fn ticks(s: &mut Scheduler<TickPort>, n: u32) {
        for _ in 0..n {
            s.tick();
        }
    }

    fn expiries<P: Port>(s: &Scheduler<P>) -> Vec<Option<Tick>> {
        s.timer_queue()
            .map(|n| {
                let hdr = s.hdr(n);
                (hdr.delay != INFINITE).then(|| hdr.delay - s.now().wrapping_sub(hdr.start))
            })
            .collect()
    }

    #[test]
    fn test_one_shot_fires_once() {
        let mut s = sched();
        let t = s.timer_create().unwrap();
        s.timer_start_for(t, 5, 0);
        assert!(s.timer_is_armed(t));
        ticks(&mut s, 4);
        assert!(s.timer_is_armed(t));
        s.tick();
        assert!(!s.timer_is_armed(t));
        assert_eq!(s.timer_queue().count(), 0);
    }

    #[test]
    fn test_periodic_does_not_drift() {
        static FIRED: AtomicU32 = AtomicU32::new(0);
        fn count(_: &mut Scheduler<TickPort>, _: TimerId) {
            FIRED.fetch_add(1, Ordering::Relaxed);
        }

        let mut s = sched();
        let t = s.timer_create().unwrap();
        s.timer_set_proc(t, Some(&count));
        s.timer_start_for(t, 10, 10);

        // Dispatch running late must not push later expiries back
        s.counter = 25;
        s.dispatch_timers();
        assert_eq!(FIRED.load(Ordering::Relaxed), 2);
        assert_eq!(s.timers[t.index()].hdr.expiry(), 30);

        ticks(&mut s, 5);
        assert_eq!(FIRED.load(Ordering::Relaxed), 3);
        assert_eq!(s.timers[t.index()].hdr.expiry(), 40);
    }

    #[test]
    fn test_timer_wait_and_stop() {
        let mut s = sched();
        let t = s.timer_create().unwrap();
        assert_eq!(s.timer_wait(t, Timeout::FOREVER), Some(Event::Stopped));

        s.timer_start_for(t, 3, 0);
        assert_eq!(s.timer_wait(t, Timeout::FOREVER), None);
        s.switch_context(body);
        ticks(&mut s, 3);
        assert_eq!(s.event(TaskId::MAIN), Event::Success);

        s.switch_context(body);
        s.timer_start_for(t, 3, 0);
        s.timer_wait(t, Timeout::FOREVER);
        s.timer_stop(t);
        assert_eq!(s.event(TaskId::MAIN), Event::Stopped);
        assert!(!s.timer_is_armed(t));
    }

    #[test]
    fn test_restart_repositions() {
        let mut s = sched();
        let a = s.timer_create().unwrap();
        let b = s.timer_create().unwrap();
        s.timer_start_for(a, 5, 0);
        s.timer_start_for(b, 8, 0);
        s.timer_start_for(a, 20, 0);
        assert_eq!(
            s.timer_queue().collect::<Vec<_>>(),
            vec![Node::Timer(b), Node::Timer(a)]
        );
    }

    #[test]
    fn test_start_until_past_fires_next_dispatch() {
        let mut s = sched();
        ticks(&mut s, 50);
        let t = s.timer_create().unwrap();
        s.timer_start_until(t, 40);
        s.dispatch_timers();
        assert!(!s.timer_is_armed(t));
    }

    #[test]
    fn test_infinite_entries_collect_at_tail() {
        let mut s = sched();
        s.sleep(Timeout::FOREVER);
        let t = s.timer_create().unwrap();
        s.timer_start_for(t, 100, 0);
        assert_eq!(
            s.timer_queue().collect::<Vec<_>>(),
            vec![Node::Timer(t), Node::Task(TaskId::MAIN)]
        );
    }

    #[test]
    fn test_ordering_across_wrap() {
        let mut s = sched();
        s.counter = Tick::MAX - 2;
        let a = s.timer_create().unwrap();
        let b = s.timer_create().unwrap();
        s.timer_start_for(a, 10, 0);
        s.timer_start_for(b, 1, 0);
        assert_eq!(
            s.timer_queue().collect::<Vec<_>>(),
            vec![Node::Timer(b), Node::Timer(a)]
        );
        ticks(&mut s, 1);
        assert!(!s.timer_is_armed(b));
        ticks(&mut s, 8);
        assert!(s.timer_is_armed(a));
        ticks(&mut s, 1);
        assert_eq!(s.counter, 7);
        assert!(!s.timer_is_armed(a));
    }

    #[test]
    fn test_tickless_alarm_tracks_head() {
        mock::init_logging();
        mock::set_now(1000);
        let mut s: Scheduler<TicklessPort> = Scheduler::new(mock::stack());
        let a = s.timer_create().unwrap();
        let b = s.timer_create().unwrap();

        s.timer_start_for(a, 50, 0);
        assert_eq!(mock::alarm(), Some(1050));
        s.timer_start_for(b, 20, 0);
        assert_eq!(mock::alarm(), Some(1020));

        mock::set_now(1020);
        s.dispatch_timers();
        assert!(!s.timer_is_armed(b));
        assert_eq!(mock::alarm(), Some(1050));

        s.timer_stop(a);
        assert_eq!(mock::alarm(), None);
    }

    #[test]
    fn test_tickless_matches_tick_mode() {
        mock::init_logging();
        mock::set_now(0);
        let mut tickless: Scheduler<TicklessPort> = Scheduler::new(mock::stack());
        let mut ticked = sched();
        let a = tickless.timer_create().unwrap();
        let b = ticked.timer_create().unwrap();
        tickless.timer_start_for(a, 7, 0);
        ticked.timer_start_for(b, 7, 0);

        for now in 1..=7 {
            mock::set_now(now);
            tickless.dispatch_timers();
            ticked.tick();
            assert_eq!(tickless.timer_is_armed(a), ticked.timer_is_armed(b), "at {}", now);
        }
        assert!(!ticked.timer_is_armed(b));
    }

    #[test]
    fn test_tickless_overdue_head_pends_alarm() {
        mock::init_logging();
        mock::set_now(500);
        let mut s: Scheduler<TicklessPort> = Scheduler::new(mock::stack());
        let a = s.timer_create().unwrap();
        let b = s.timer_create().unwrap();

        s.timer_start_for(a, 50, 0);
        assert!(!mock::take_pending_alarm());

        s.timer_start_until(b, 400);
        assert!(mock::take_pending_alarm());

        // What the pended interrupt runs
        s.dispatch_timers();
        assert!(!s.timer_is_armed(b));
        assert!(s.timer_is_armed(a));
        assert_eq!(mock::alarm(), Some(550));
        assert!(!mock::take_pending_alarm());
    }

    #[test]
    fn test_tickless_zero_delay_pends_alarm() {
        mock::init_logging();
        mock::set_now(10);
        let mut s: Scheduler<TicklessPort> = Scheduler::new(mock::stack());
        let t = s.timer_create().unwrap();
        s.timer_start_for(t, 0, 0);
        assert!(mock::take_pending_alarm());
        s.dispatch_timers();
        assert!(!s.timer_is_armed(t));
    }

    #[quickcheck]
    fn timer_queue_sorted_by_expiry(ops: Vec<(u16, u8)>, advance: u8) -> bool {
        let mut s = sched();
        s.counter = Tick::MAX - u32::from(advance);
        let mut timers = Vec::new();
        let mut tasks = Vec::new();
        for (delay, kind) in ops {
            let delay = u32::from(delay) + 1;
            match kind % 3 {
                0 if timers.len() < MAX_TIMERS - 1 => {
                    let t = s.timer_create().unwrap();
                    s.timer_start_for(t, delay, 0);
                    timers.push(t);
                }
                k @ (1 | 2) if tasks.len() < MAX_TASKS - 2 => {
                    // Each sleeper outranks every earlier one, so it runs
                    // as soon as it is started
                    let prio = tasks.len() as u8 + 1;
                    let t = s.task_create(prio, body, mock::stack()).unwrap();
                    s.task_start(t).unwrap();
                    s.switch_context(body);
                    let timeout = if k == 1 { Timeout::For(delay) } else { Timeout::FOREVER };
                    s.sleep(timeout);
                    s.switch_context(body);
                    tasks.push(t);
                }
                _ => continue,
            }
            ticks(&mut s, 1);
        }

        // No finite expiry may follow an infinite one
        let remaining = expiries(&s);
        let sorted = remaining.windows(2).all(|w| match (w[0], w[1]) {
            (Some(a), Some(b)) => a <= b,
            (Some(_), None) | (None, None) => true,
            (None, Some(_)) => false,
        });

        let armed = timers.iter().filter(|&&t| s.timer_is_armed(t)).count();
        let delayed = tasks
            .iter()
            .filter(|&&t| s.task(t).state() == ObjState::Delayed)
            .count();

        // Walking back from the sentinel visits the same nodes
        let forward: Vec<Node> = s.timer_queue().collect();
        let mut backward = Vec::new();
        let mut cursor = s.hdr(Node::Timer(TimerId::WAIT)).prev;
        while cursor != Node::Timer(TimerId::WAIT) && backward.len() <= forward.len() {
            backward.push(cursor);
            cursor = s.hdr(cursor).prev;
        }
        backward.reverse();

        sorted && remaining.len() == armed + delayed && backward == forward
    }
}
