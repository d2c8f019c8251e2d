//! # Mailbox
//!
//! Bounded FIFO of messages built on the block/wake protocol. A message
//! given while a receiver waits skips the buffer: it is dropped into the
//! receiver's delivery slot and the receiver is woken in the same critical
//! section, so no other task can steal it. Otherwise it is queued in a
//! `heapless::Deque`.
//!
//! ```text
//!   give(v) ──► waiter? ── yes ──► inbox[waiter] = v, wake(Success)
//!                  │
//!                  no ──► buffer.push_back(v)
//!
//!   take()  ──► buffer.pop_front() ── some ──► Ok(v)
//!                  │
//!                  none ──► wait(timeout) ... collect() ──► inbox[self]
//! ```

use heapless::Deque;

use crate::config::MAX_TASKS;
use crate::error::{Event, KernelError, MailboxError, Timeout};
use crate::object::GuardId;
use crate::port::Port;
use crate::scheduler::Scheduler;

/// Mailbox holding up to `N` undelivered messages of type `T`.
pub struct Mailbox<T, const N: usize> {
    guard: GuardId,
    buffer: Deque<T, N>,
    inbox: [Option<T>; MAX_TASKS],
}

impl<T, const N: usize> Mailbox<T, N> {
    pub fn new<P: Port>(s: &mut Scheduler<P>) -> Result<Self, KernelError> {
        Ok(Self {
            guard: s.guard_create()?,
            buffer: Deque::new(),
            inbox: core::array::from_fn(|_| None),
        })
    }

    /// Number of buffered messages.
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Post a message. Hands it to the head waiter if there is one;
    /// otherwise buffers it, giving it back if the buffer is full.
    pub fn give<P: Port>(&mut self, s: &mut Scheduler<P>, value: T) -> Result<(), T> {
        match s.wake_one(self.guard, Event::Success) {
            Some(receiver) => {
                self.inbox[receiver.index()] = Some(value);
                Ok(())
            }
            None => self.buffer.push_back(value),
        }
    }

    /// Receive a message for the current task.
    ///
    /// `Some` is the final outcome. `None` means the caller was queued and
    /// a switch requested; call [`Mailbox::collect`] after resumption.
    ///
    /// A message delivered to a receiver that was killed before collecting
    /// it stays in that task's slot and is returned by the next `take` the
    /// restarted task makes, ahead of the buffer.
    pub fn take<P: Port>(
        &mut self,
        s: &mut Scheduler<P>,
        timeout: Timeout,
    ) -> Option<Result<T, MailboxError>> {
        if let Some(value) = self.inbox[s.current().index()].take() {
            return Some(Ok(value));
        }
        if let Some(value) = self.buffer.pop_front() {
            return Some(Ok(value));
        }
        let event = s.wait(self.guard, timeout)?;
        debug_assert_eq!(event, Event::Timeout);
        Some(Err(MailboxError::Empty))
    }

    /// Outcome of a take that suspended the caller.
    pub fn collect<P: Port>(&mut self, s: &Scheduler<P>) -> Result<T, MailboxError> {
        let cur = s.current();
        match s.event(cur) {
            Event::Success => self.inbox[cur.index()].take().ok_or(MailboxError::Empty),
            Event::Timeout => Err(MailboxError::Timeout),
            Event::Stopped => Err(MailboxError::Stopped),
        }
    }

    /// Discard buffered messages and release every waiter with `Stopped`.
    pub fn kill<P: Port>(&mut self, s: &mut Scheduler<P>) {
        self.buffer.clear();
        s.wake_all(self.guard, Event::Stopped);
        log::debug!("mailbox {:?} killed", self.guard);
    }
}

// ---------------------------------------------------------------------------
// Unit tests (host-only)
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object::{ObjState, TaskId};
    use crate::port::mock::{self, TickPort};

    fn body() {}

    fn sched() -> Scheduler<TickPort> {
        mock::init_logging();
        Scheduler::new(mock::stack())
    }

    fn run(s: &mut Scheduler<TickPort>, prio: u8) -> TaskId {
        let t = s.task_create(prio, body, mock::stack()).unwrap();
        s.task_start(t).unwrap();
        s.switch_context(body);
        assert_eq!(s.current(), t);
        t
    }

    #[test]
    fn test_direct_delivery_to_waiter() {
        let mut s = sched();
        let mut mb: Mailbox<u32, 4> = Mailbox::new(&mut s).unwrap();
        let rx = run(&mut s, 3);
        assert!(mb.take(&mut s, Timeout::FOREVER).is_none());
        s.switch_context(body);
        assert_eq!(s.current(), TaskId::MAIN);

        assert_eq!(mb.give(&mut s, 42), Ok(()));
        assert!(mb.is_empty());
        assert_eq!(s.task(rx).state(), ObjState::Ready);
        s.switch_context(body);
        assert_eq!(s.current(), rx);
        assert_eq!(mb.collect(&s), Ok(42));
    }

    #[test]
    fn test_buffered_fifo() {
        let mut s = sched();
        let mut mb: Mailbox<u32, 4> = Mailbox::new(&mut s).unwrap();
        mb.give(&mut s, 7).unwrap();
        mb.give(&mut s, 9).unwrap();
        assert_eq!(mb.len(), 2);
        assert_eq!(mb.take(&mut s, Timeout::NONE), Some(Ok(7)));
        assert_eq!(mb.take(&mut s, Timeout::NONE), Some(Ok(9)));
        assert_eq!(mb.take(&mut s, Timeout::NONE), Some(Err(MailboxError::Empty)));
    }

    #[test]
    fn test_full_buffer_returns_message() {
        let mut s = sched();
        let mut mb: Mailbox<u8, 2> = Mailbox::new(&mut s).unwrap();
        mb.give(&mut s, 1).unwrap();
        mb.give(&mut s, 2).unwrap();
        assert_eq!(mb.give(&mut s, 3), Err(3));
    }

    #[test]
    fn test_take_times_out() {
        let mut s = sched();
        let mut mb: Mailbox<u32, 4> = Mailbox::new(&mut s).unwrap();
        assert!(mb.take(&mut s, Timeout::For(5)).is_none());
        s.switch_context(body);
        for _ in 0..5 {
            s.tick();
        }
        s.switch_context(body);
        assert_eq!(mb.collect(&s), Err(MailboxError::Timeout));

        // A late give is buffered, not delivered to the timed-out task
        mb.give(&mut s, 1).unwrap();
        assert_eq!(mb.len(), 1);
    }

    #[test]
    fn test_kill_with_two_waiters() {
        let mut s = sched();
        let mut mb: Mailbox<u32, 4> = Mailbox::new(&mut s).unwrap();
        let a = run(&mut s, 2);
        mb.take(&mut s, Timeout::FOREVER);
        s.switch_context(body);
        let b = run(&mut s, 2);
        mb.take(&mut s, Timeout::FOREVER);
        s.switch_context(body);

        mb.kill(&mut s);
        assert!(!s.has_waiters(mb.guard));
        for t in [a, b] {
            assert_eq!(s.event(t), Event::Stopped);
        }
        s.switch_context(body);
        assert_eq!(s.current(), a);
        assert_eq!(mb.collect(&s), Err(MailboxError::Stopped));
    }

    #[test]
    fn test_delivery_survives_receiver_kill() {
        let mut s = sched();
        let mut mb: Mailbox<u32, 4> = Mailbox::new(&mut s).unwrap();
        let rx = run(&mut s, 3);
        assert!(mb.take(&mut s, Timeout::FOREVER).is_none());
        s.switch_context(body);

        assert_eq!(mb.give(&mut s, 42), Ok(()));
        s.task_kill(rx).unwrap();
        s.switch_context(body);
        assert_eq!(s.task(rx).state(), ObjState::Stopped);

        mb.give(&mut s, 43).unwrap();
        s.task_start(rx).unwrap();
        s.switch_context(body);
        assert_eq!(s.current(), rx);
        assert_eq!(mb.take(&mut s, Timeout::NONE), Some(Ok(42)));
        assert_eq!(mb.take(&mut s, Timeout::NONE), Some(Ok(43)));
        assert_eq!(mb.take(&mut s, Timeout::NONE), Some(Err(MailboxError::Empty)));
    }

    #[test]
    fn test_receivers_served_by_priority() {
        let mut s = sched();
        let mut mb: Mailbox<u32, 4> = Mailbox::new(&mut s).unwrap();
        let low = run(&mut s, 1);
        mb.take(&mut s, Timeout::FOREVER);
        s.switch_context(body);
        let high = run(&mut s, 4);
        mb.take(&mut s, Timeout::FOREVER);
        s.switch_context(body);

        mb.give(&mut s, 10).unwrap();
        mb.give(&mut s, 20).unwrap();
        assert_eq!(mb.inbox[high.index()], Some(10));
        assert_eq!(mb.inbox[low.index()], Some(20));
    }
}
