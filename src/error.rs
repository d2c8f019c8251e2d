//! # Events and Errors
//!
//! The scheduler has no recoverable exceptions. Every blocking call ends with
//! one of three [`Event`] codes, written into the waiting task by whoever
//! released it. Primitives built on top translate events into their own
//! domain errors but never drop `Stopped` or `Timeout` on the floor.

use core::fmt;

/// A point in time or a duration, in kernel ticks. Free-running and
/// allowed to wrap: every comparison goes through `wrapping_sub`.
pub type Tick = u32;

/// Delay value meaning "do not wait at all".
pub const IMMEDIATE: Tick = 0;

/// Delay value meaning "wait until explicitly released". Never expires.
pub const INFINITE: Tick = Tick::MAX;

/// Why a blocked task was released.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    /// Released by the object it was waiting on.
    Success,
    /// The object was killed (or the waiter itself stopped) while waiting.
    Stopped,
    /// The requested delay elapsed with no release.
    Timeout,
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Success => "success",
            Self::Stopped => "stopped",
            Self::Timeout => "timeout",
        })
    }
}

/// How long a blocking call may wait.
///
/// `Timeout::NONE` polls, `Timeout::FOREVER` blocks until an explicit
/// wake. Everything in between is either relative (`For`) or an absolute
/// deadline (`Until`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Timeout {
    /// Wait for at most this many ticks from now.
    For(Tick),
    /// Wait until the clock reaches this tick.
    Until(Tick),
}

impl Timeout {
    /// Never block.
    pub const NONE: Self = Self::For(IMMEDIATE);
    /// Block until woken explicitly.
    pub const FOREVER: Self = Self::For(INFINITE);

    /// Resolve into a delay relative to `now`.
    ///
    /// A deadline that already passed (more than half the counter range
    /// behind `now`) resolves to [`IMMEDIATE`] rather than to a wait of
    /// almost a full counter period.
    pub fn delay_from(self, now: Tick) -> Tick {
        match self {
            Self::For(delay) => delay,
            Self::Until(deadline) => {
                let delay = deadline.wrapping_sub(now);
                if delay > Tick::MAX / 2 {
                    IMMEDIATE
                } else {
                    delay
                }
            }
        }
    }
}

/// Errors reported by non-blocking kernel calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KernelError {
    /// The control-block arena of the requested kind is exhausted.
    OutOfBlocks,
    /// The object is not in a state that allows the request, e.g.
    /// starting a task that is already running.
    BadState,
}

impl fmt::Display for KernelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::OutOfBlocks => f.write_str("control-block arena exhausted"),
            Self::BadState => f.write_str("object in wrong state for request"),
        }
    }
}

/// Errors reported by [`Mutex`](crate::mutex::Mutex) operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MutexError {
    /// Unlock by a task that does not hold the mutex.
    NotOwner,
    /// Lock by the task that already holds it.
    WouldDeadlock,
    /// The timeout elapsed before the mutex became free.
    Timeout,
    /// The mutex was killed, or its owner stopped, while waiting.
    Stopped,
}

impl MutexError {
    /// Map the event that ended a lock wait.
    pub fn check(event: Event) -> Result<(), Self> {
        match event {
            Event::Success => Ok(()),
            Event::Stopped => Err(Self::Stopped),
            Event::Timeout => Err(Self::Timeout),
        }
    }
}

impl fmt::Display for MutexError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotOwner => f.write_str("mutex not held by caller"),
            Self::WouldDeadlock => f.write_str("mutex already held by caller"),
            Self::Timeout => f.write_str("timed out waiting for mutex"),
            Self::Stopped => f.write_str("mutex killed"),
        }
    }
}

/// Errors reported by mailbox receive operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MailboxError {
    /// Nothing buffered and the caller did not want to wait.
    Empty,
    /// The timeout elapsed with nothing delivered.
    Timeout,
    /// The mailbox was killed while waiting.
    Stopped,
}

impl fmt::Display for MailboxError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Empty => f.write_str("mailbox empty"),
            Self::Timeout => f.write_str("timed out waiting for message"),
            Self::Stopped => f.write_str("mailbox killed"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_relative_timeout() {
        assert_eq!(Timeout::For(25).delay_from(1000), 25);
        assert_eq!(Timeout::NONE.delay_from(7), IMMEDIATE);
        assert_eq!(Timeout::FOREVER.delay_from(7), INFINITE);
    }

    #[test]
    fn test_deadline_across_wrap() {
        let now = Tick::MAX - 4;
        assert_eq!(Timeout::Until(5).delay_from(now), 10);
    }

    #[test]
    fn test_past_deadline_is_immediate() {
        assert_eq!(Timeout::Until(90).delay_from(100), IMMEDIATE);
        assert_eq!(Timeout::Until(100).delay_from(100), IMMEDIATE);
    }

    #[test]
    fn test_display() {
        assert_eq!(Event::Timeout.to_string(), "timeout");
        assert_eq!(KernelError::OutOfBlocks.to_string(), "control-block arena exhausted");
        assert_eq!(MailboxError::Stopped.to_string(), "mailbox killed");
    }

    #[test]
    fn test_mutex_event_mapping() {
        assert_eq!(MutexError::check(Event::Success), Ok(()));
        assert_eq!(MutexError::check(Event::Timeout), Err(MutexError::Timeout));
        assert_eq!(MutexError::check(Event::Stopped), Err(MutexError::Stopped));
    }
}
