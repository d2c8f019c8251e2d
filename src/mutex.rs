//! # Priority-Inheriting Mutex
//!
//! A mutex is a guard with an owner. While tasks wait on it, the owner runs
//! at the highest of their priorities. Unlock hands ownership straight to the
//! head waiter, so the mutex is never observed free while someone waits.
//!
//! Locking follows the two-phase blocking protocol: [`Mutex::lock`] returns
//! `None` when the caller was suspended, and [`Mutex::collect`] reads the
//! outcome once the caller runs again.

use crate::error::{Event, KernelError, MutexError, Timeout};
use crate::object::{GuardId, TaskId};
use crate::port::Port;
use crate::scheduler::Scheduler;

/// Handle to a mutex living in the scheduler's guard arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Mutex {
    guard: GuardId,
}

impl Mutex {
    pub fn new<P: Port>(s: &mut Scheduler<P>) -> Result<Self, KernelError> {
        Ok(Self {
            guard: s.guard_create()?,
        })
    }

    /// The task holding the mutex.
    pub fn owner<P: Port>(&self, s: &Scheduler<P>) -> Option<TaskId> {
        s.guards[self.guard.index()].owner
    }

    /// Acquire the mutex for the current task.
    ///
    /// `Some` is the final outcome. `None` means the caller was queued and
    /// a switch requested; call [`Mutex::collect`] after resumption.
    pub fn lock<P: Port>(
        &self,
        s: &mut Scheduler<P>,
        timeout: Timeout,
    ) -> Option<Result<(), MutexError>> {
        let cur = s.current();
        match self.owner(s) {
            None => {
                s.own(self.guard, cur);
                log::trace!("mutex {:?} taken by {:?}", self.guard, cur);
                Some(Ok(()))
            }
            Some(owner) if owner == cur => Some(Err(MutexError::WouldDeadlock)),
            Some(_) => s.wait(self.guard, timeout).map(MutexError::check),
        }
    }

    /// Outcome of a lock that suspended the caller.
    pub fn collect<P: Port>(&self, s: &Scheduler<P>) -> Result<(), MutexError> {
        MutexError::check(s.event(s.current()))
    }

    /// Release the mutex held by the current task and hand it to the head
    /// waiter, if any.
    pub fn unlock<P: Port>(&self, s: &mut Scheduler<P>) -> Result<(), MutexError> {
        let cur = s.current();
        if self.owner(s) != Some(cur) {
            return Err(MutexError::NotOwner);
        }
        s.disown(self.guard);
        let base = s.tasks[cur.index()].base;
        s.recompute_priority(cur, base);

        if let Some(next) = s.wake_one(self.guard, Event::Success) {
            s.own(self.guard, next);
            s.reevaluate_owner(self.guard);
            log::trace!("mutex {:?} handed to {:?}", self.guard, next);
        }
        Ok(())
    }

    /// Reset the mutex: drop the owner and release every waiter with
    /// `Stopped`.
    pub fn kill<P: Port>(&self, s: &mut Scheduler<P>) {
        if let Some(owner) = s.disown(self.guard) {
            let base = s.tasks[owner.index()].base;
            s.recompute_priority(owner, base);
        }
        s.wake_all(self.guard, Event::Stopped);
        log::debug!("mutex {:?} killed", self.guard);
    }
}

// ---------------------------------------------------------------------------
// Unit tests (host-only)
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object::ObjState;
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
    fn test_uncontended_lock_unlock() {
        let mut s = sched();
        let m = Mutex::new(&mut s).unwrap();
        assert_eq!(m.lock(&mut s, Timeout::NONE), Some(Ok(())));
        assert_eq!(m.owner(&s), Some(TaskId::MAIN));
        assert_eq!(m.lock(&mut s, Timeout::NONE), Some(Err(MutexError::WouldDeadlock)));
        assert_eq!(m.unlock(&mut s), Ok(()));
        assert_eq!(m.owner(&s), None);
        assert_eq!(m.unlock(&mut s), Err(MutexError::NotOwner));
    }

    #[test]
    fn test_try_lock_on_held_mutex_times_out() {
        let mut s = sched();
        let m = Mutex::new(&mut s).unwrap();
        m.lock(&mut s, Timeout::NONE);
        run(&mut s, 2);
        assert_eq!(m.lock(&mut s, Timeout::NONE), Some(Err(MutexError::Timeout)));
    }

    #[test]
    fn test_inheritance_and_hand_off() {
        let mut s = sched();
        let m = Mutex::new(&mut s).unwrap();
        let b = run(&mut s, 1);
        assert_eq!(m.lock(&mut s, Timeout::FOREVER), Some(Ok(())));

        let a = run(&mut s, 5);
        assert_eq!(m.lock(&mut s, Timeout::FOREVER), None);
        assert!(s.task(b).priority() >= 5);
        s.switch_context(body);
        assert_eq!(s.current(), b);

        let before = mock::switch_requests();
        assert_eq!(m.unlock(&mut s), Ok(()));
        assert_eq!(s.task(b).priority(), 1);
        assert_eq!(m.owner(&s), Some(a));
        assert_eq!(s.head(), a);
        assert!(mock::switch_requests() > before);

        s.switch_context(body);
        assert_eq!(s.current(), a);
        assert_eq!(m.collect(&s), Ok(()));
    }

    #[test]
    fn test_new_owner_inherits_remaining_waiters() {
        let mut s = sched();
        let m = Mutex::new(&mut s).unwrap();
        let owner = run(&mut s, 1);
        m.lock(&mut s, Timeout::FOREVER);
        let mid = run(&mut s, 3);
        m.lock(&mut s, Timeout::FOREVER);
        s.switch_context(body);
        let top = run(&mut s, 6);
        m.lock(&mut s, Timeout::FOREVER);
        s.switch_context(body);
        assert_eq!(s.current(), owner);

        m.unlock(&mut s).unwrap();
        assert_eq!(m.owner(&s), Some(top));
        s.switch_context(body);
        assert_eq!(s.current(), top);

        // Second release goes to the remaining waiter
        m.unlock(&mut s).unwrap();
        assert_eq!(m.owner(&s), Some(mid));
        assert_eq!(s.task(top).priority(), 6);
    }

    #[test]
    fn test_lock_timeout_drops_boost() {
        let mut s = sched();
        let m = Mutex::new(&mut s).unwrap();
        let low = run(&mut s, 1);
        m.lock(&mut s, Timeout::FOREVER);
        let high = run(&mut s, 4);
        assert_eq!(m.lock(&mut s, Timeout::For(2)), None);
        s.switch_context(body);
        assert_eq!(s.task(low).priority(), 4);

        s.tick();
        s.tick();
        assert_eq!(s.task(low).priority(), 1);
        s.switch_context(body);
        assert_eq!(s.current(), high);
        assert_eq!(m.collect(&s), Err(MutexError::Timeout));
    }

    #[test]
    fn test_kill_wakes_all_with_stopped() {
        let mut s = sched();
        let m = Mutex::new(&mut s).unwrap();
        let owner = run(&mut s, 1);
        m.lock(&mut s, Timeout::FOREVER);
        let w1 = run(&mut s, 2);
        m.lock(&mut s, Timeout::FOREVER);
        s.switch_context(body);
        let w2 = run(&mut s, 2);
        m.lock(&mut s, Timeout::FOREVER);
        s.switch_context(body);

        m.kill(&mut s);
        assert_eq!(m.owner(&s), None);
        assert_eq!(s.task(owner).priority(), 1);
        for w in [w1, w2] {
            assert_eq!(s.task(w).state(), ObjState::Ready);
            assert_eq!(s.event(w), Event::Stopped);
        }
        assert!(!s.has_waiters(m.guard));
    }
}
