//! # Critical Sections
//!
//! Interrupt-safe critical sections over a [`Port`]. All shared scheduler
//! state must be accessed within one to prevent data races between the
//! foreground task and interrupt handlers.
//!
//! The guard restores the saved mask state when it is dropped, so early
//! returns and `?` leave the critical section as reliably as the happy path.

use core::cell::RefCell;
use core::marker::PhantomData;

use crate::port::Port;

/// Proof that the scheduler lock is held. Unlocks on drop.
pub struct CriticalSection<P: Port> {
    token: P::Token,
    // Not `Send`: the saved mask belongs to the context that took it.
    _not_send: PhantomData<*const P>,
}

impl<P: Port> CriticalSection<P> {
    /// Mask interrupts, remembering the previous mask state.
    #[inline]
    pub fn enter() -> Self {
        Self {
            token: P::lock(),
            _not_send: PhantomData,
        }
    }
}

impl<P: Port> Drop for CriticalSection<P> {
    #[inline]
    fn drop(&mut self) {
        P::unlock(self.token);
    }
}

/// Execute a closure within a critical section.
///
/// # Usage
/// ```ignore
/// sync::critical_section::<CortexM4, _, _>(|_cs| {
///     // Access shared state safely
/// });
/// ```
///
/// Keep critical sections as short as possible to minimize interrupt latency.
#[inline]
pub fn critical_section<P, F, R>(f: F) -> R
where
    P: Port,
    F: FnOnce(&CriticalSection<P>) -> R,
{
    let cs = CriticalSection::enter();
    f(&cs)
}

/// A value shared between tasks and interrupt handlers, reachable only
/// while a [`CriticalSection`] is held.
///
/// Starts empty so it can be placed in a `static` before the kernel has
/// allocated whatever goes inside. The `RefCell` catches reentrant access
/// from within the closure.
pub struct Shared<T> {
    slot: RefCell<Option<T>>,
}

// Single core: holding the critical section excludes every other context.
unsafe impl<T: Send> Sync for Shared<T> {}

impl<T> Shared<T> {
    pub const fn new() -> Self {
        Self {
            slot: RefCell::new(None),
        }
    }

    /// Store `value`, returning the previous one.
    pub fn put<P: Port>(&self, _cs: &CriticalSection<P>, value: T) -> Option<T> {
        self.slot.borrow_mut().replace(value)
    }

    /// Run `f` on the stored value, `None` if nothing was stored yet.
    pub fn lock<P: Port, R>(
        &self,
        _cs: &CriticalSection<P>,
        f: impl FnOnce(Option<&mut T>) -> R,
    ) -> R {
        f(self.slot.borrow_mut().as_mut())
    }
}

impl<T> Default for Shared<T> {
    fn default() -> Self {
        Self::new()
    }
}
