//! # Scheduler
//!
//! The process-wide scheduler context: the control-block arenas, the
//! currently running task and the tick counter. Queue manipulation is split
//! over sibling modules that all extend [`Scheduler`]:
//!
//! | Module        | Concern                                        |
//! |---------------|------------------------------------------------|
//! | `ready`       | ready queue, context-switch trigger            |
//! | `timer`       | timer/delay queue, tick dispatcher, timers     |
//! | `wait`        | wait lists, block/wake protocol                |
//! | `priority`    | priority inheritance, mutex ownership chains   |
//!
//! Every method here assumes the caller holds the critical section. The
//! [`Kernel`](crate::kernel::Kernel) wrapper takes it on each entry point.
//!
//! ## Scheduling Algorithm
//!
//! The head of the ready queue is, by definition, the task that should be
//! running. Structural changes that give the queue a new head request a
//! switch through the port; the port's switch interrupt then calls
//! [`Scheduler::switch_context`], which makes the head current. If the
//! running task is itself still the head when the switch happens, it is
//! moved behind the other tasks of its priority first: that is how both
//! explicit yields and round-robin quanta are delivered.

use crate::config::{IDLE_PRIO, MAIN_PRIO, MAX_GUARDS, MAX_TASKS, MAX_TIMERS, ROBIN_QUANTUM};
use crate::error::{Event, KernelError, Tick, Timeout, INFINITE};
use crate::object::{GuardId, Header, Node, ObjState, TaskId, TimerId};
use crate::port::{Port, TaskFn};
use crate::task::{self, Task};
use crate::timer::{self, Timer};
use crate::wait::{self, Guard};

// ---------------------------------------------------------------------------
// Scheduler struct
// ---------------------------------------------------------------------------

/// The central scheduler state.
///
/// ## Design Notes
///
/// - Tasks, timers and wait-list roots live in fixed arrays (no heap)
/// - Task 0 is the idle task, task 1 the adopted boot thread
/// - Timer 0 is the infinite sentinel of the timer queue
/// - Guard 0 is the wait list sleeping tasks park on
pub struct Scheduler<P: Port> {
    pub(crate) tasks: [Task<P::Context>; MAX_TASKS],
    pub(crate) timers: [Timer<P>; MAX_TIMERS],
    pub(crate) guards: [Guard; MAX_GUARDS],

    task_count: usize,
    timer_count: usize,
    guard_count: usize,

    /// Task currently owning the processor.
    pub(crate) current: TaskId,

    /// Tick counter. Unused by tick-less ports, which read the hardware
    /// counter instead.
    pub(crate) counter: Tick,

    /// Ticks since the last switch, for round-robin slicing.
    robin: Tick,

    /// Context of the idle task, handed out whenever a task without a
    /// context would otherwise be resumed.
    idle_context: P::Context,
}

impl<P: Port> Scheduler<P> {
    /// Create a scheduler whose idle task runs on `idle_stack`.
    ///
    /// The calling thread is adopted as the main task: it is Ready, at the
    /// head of the ready queue and current.
    pub fn new(idle_stack: &'static mut [u32]) -> Self {
        let idle_context = P::init_context(P::idle, idle_stack);

        let mut sched = Self {
            tasks: task::arena(),
            timers: timer::arena(),
            guards: wait::arena(),
            task_count: 2,
            timer_count: 1,
            guard_count: 1,
            current: TaskId::MAIN,
            counter: 0,
            robin: 0,
            idle_context,
        };

        let idle = &mut sched.tasks[TaskId::IDLE.index()];
        idle.base = IDLE_PRIO;
        idle.prio = IDLE_PRIO;
        idle.entry = Some(P::idle as TaskFn);
        idle.context = Some(idle_context);
        idle.hdr = Header {
            state: ObjState::Idle,
            prev: Node::Task(TaskId::MAIN),
            next: Node::Task(TaskId::MAIN),
            start: 0,
            delay: INFINITE,
        };

        let main = &mut sched.tasks[TaskId::MAIN.index()];
        main.base = MAIN_PRIO;
        main.prio = MAIN_PRIO;
        main.hdr = Header {
            state: ObjState::Ready,
            prev: Node::Task(TaskId::IDLE),
            next: Node::Task(TaskId::IDLE),
            start: 0,
            delay: 0,
        };

        let wait = &mut sched.timers[TimerId::WAIT.index()];
        wait.hdr = Header::detached(Node::Timer(TimerId::WAIT), ObjState::Timer);
        wait.hdr.delay = INFINITE;

        log::debug!("scheduler up: main task at priority {}", MAIN_PRIO);
        sched
    }

    // -----------------------------------------------------------------------
    // Arena allocation
    // -----------------------------------------------------------------------

    /// Carve a task control block out of the arena. The task is Stopped
    /// until [`Scheduler::task_start`].
    pub fn task_create(
        &mut self,
        prio: u8,
        entry: TaskFn,
        stack: &'static mut [u32],
    ) -> Result<TaskId, KernelError> {
        if self.task_count >= MAX_TASKS {
            return Err(KernelError::OutOfBlocks);
        }
        let id = TaskId(self.task_count as u16);
        self.task_count += 1;
        self.tasks[id.index()].init(prio, entry, stack);
        Ok(id)
    }

    pub(crate) fn timer_alloc(&mut self) -> Result<TimerId, KernelError> {
        if self.timer_count >= MAX_TIMERS {
            return Err(KernelError::OutOfBlocks);
        }
        let guard = self.guard_create()?;
        let id = TimerId(self.timer_count as u16);
        self.timer_count += 1;
        self.timers[id.index()].guard = Some(guard);
        Ok(id)
    }

    /// Reserve a wait-list root for a synchronization object.
    pub fn guard_create(&mut self) -> Result<GuardId, KernelError> {
        if self.guard_count >= MAX_GUARDS {
            return Err(KernelError::OutOfBlocks);
        }
        let id = GuardId(self.guard_count as u16);
        self.guard_count += 1;
        Ok(id)
    }

    // -----------------------------------------------------------------------
    // Queries
    // -----------------------------------------------------------------------

    /// The task owning the processor.
    #[inline]
    pub fn current(&self) -> TaskId {
        self.current
    }

    /// Read access to a task control block.
    #[inline]
    pub fn task(&self, id: TaskId) -> &Task<P::Context> {
        &self.tasks[id.index()]
    }

    /// Current time: the tick counter, or the hardware counter on
    /// tick-less ports.
    #[inline]
    pub fn now(&self) -> Tick {
        if P::TICKLESS {
            P::now()
        } else {
            self.counter
        }
    }

    /// Event code left by the last wait of `id`.
    #[inline]
    pub fn event(&self, id: TaskId) -> Event {
        self.tasks[id.index()].event
    }

    // -----------------------------------------------------------------------
    // Task lifecycle
    // -----------------------------------------------------------------------

    /// Build the task's initial context and make it Ready.
    pub fn task_start(&mut self, id: TaskId) -> Result<(), KernelError> {
        let tcb = &mut self.tasks[id.index()];
        if tcb.hdr.state != ObjState::Stopped {
            return Err(KernelError::BadState);
        }
        let (Some(entry), Some(stack)) = (tcb.entry, tcb.stack.as_deref_mut()) else {
            return Err(KernelError::BadState);
        };
        let context = P::init_context(entry, stack);
        tcb.context = Some(context);
        tcb.prio = tcb.base;
        tcb.event = Event::Success;

        log::debug!("task {:?} started at priority {}", id, tcb.base);
        self.ready_insert(id);
        Ok(())
    }

    /// Terminate a task: take it out of every queue, abandon the mutexes
    /// it owns (their waiters see `Stopped`) and leave it Stopped. The
    /// block stays allocated and can be started again.
    pub fn task_kill(&mut self, id: TaskId) -> Result<(), KernelError> {
        match self.tasks[id.index()].hdr.state {
            ObjState::Ready => self.ready_remove(id),
            ObjState::Delayed => {
                self.release_waiter(id, Event::Stopped);
                self.timer_remove(Node::Task(id));
            }
            ObjState::Stopped | ObjState::Idle | ObjState::Timer => {
                return Err(KernelError::BadState);
            }
        }

        while let Some(guard) = self.tasks[id.index()].owned {
            self.disown(guard);
            self.wake_all(guard, Event::Stopped);
        }

        let tcb = &mut self.tasks[id.index()];
        tcb.hdr.state = ObjState::Stopped;
        tcb.prio = tcb.base;
        log::debug!("task {:?} stopped", id);

        if id == self.current {
            P::request_switch();
        }
        Ok(())
    }

    /// Terminate the current task. It keeps running until the requested
    /// switch is taken.
    pub fn task_stop(&mut self) -> Result<(), KernelError> {
        self.task_kill(self.current)
    }

    /// Give way to the next Ready task of the same priority, if any.
    pub fn task_yield(&mut self) {
        let cur = self.current;
        if self.head() != cur {
            return;
        }
        let next = self.next_ready(cur);
        if next != TaskId::IDLE && self.tasks[next.index()].prio == self.tasks[cur.index()].prio {
            P::request_switch();
        }
    }

    /// Assign a new base priority. The effective priority is recomputed
    /// through the inheritance engine, so it never drops below what owned
    /// mutexes demand.
    pub fn task_set_base_priority(&mut self, id: TaskId, prio: u8) {
        self.tasks[id.index()].base = prio;
        self.recompute_priority(id, prio);
    }

    /// Put the current task to sleep. Only the timeout or
    /// [`Scheduler::task_resume`] ends it.
    pub fn sleep(&mut self, timeout: Timeout) -> Option<Event> {
        self.wait(GuardId::SLEEP, timeout)
    }

    /// Sleep for `delay` ticks.
    pub fn sleep_for(&mut self, delay: Tick) -> Option<Event> {
        self.sleep(Timeout::For(delay))
    }

    /// Sleep until the clock reads `time`.
    pub fn sleep_until(&mut self, time: Tick) -> Option<Event> {
        self.sleep(Timeout::Until(time))
    }

    /// Wake a sleeping task early with `Success`. Returns whether the task
    /// was asleep.
    pub fn task_resume(&mut self, id: TaskId) -> bool {
        if self.tasks[id.index()].guard != Some(GuardId::SLEEP) {
            return false;
        }
        self.wake_task(id, Event::Success);
        true
    }

    // -----------------------------------------------------------------------
    // Interrupt entry points
    // -----------------------------------------------------------------------

    /// Periodic tick (tick mode only): advance the counter, expire due
    /// timers and deliver the round-robin quantum.
    pub fn tick(&mut self) {
        debug_assert!(!P::TICKLESS, "tick() called on a tick-less port");
        self.counter = self.counter.wrapping_add(1);
        self.dispatch_timers();

        if ROBIN_QUANTUM > 0 {
            self.robin += 1;
            if self.robin >= ROBIN_QUANTUM {
                self.robin = 0;
                self.task_yield();
            }
        }
    }

    /// Context-switch handler, called from the port's switch interrupt
    /// with the context just saved for the outgoing task. Returns the
    /// context to resume.
    pub fn switch_context(&mut self, saved: P::Context) -> P::Context {
        let cur = self.current;
        self.tasks[cur.index()].context = Some(saved);

        let mut next = self.head();
        if next == cur && cur != TaskId::IDLE {
            // Still the head: rotate behind the rest of its band
            self.ready_remove(cur);
            self.ready_link(cur);
            next = self.head();
        }

        self.current = next;
        self.robin = 0;
        self.context_of(next)
    }

    /// Hand the processor to the ready head without resuming the boot
    /// thread afterwards. For ports that cannot adopt the boot thread as
    /// the main task; its block is left Stopped.
    pub fn launch(&mut self) -> P::Context {
        if self.tasks[TaskId::MAIN.index()].hdr.state == ObjState::Ready {
            self.ready_remove(TaskId::MAIN);
            self.tasks[TaskId::MAIN.index()].hdr.state = ObjState::Stopped;
        }
        let next = self.head();
        self.current = next;
        self.robin = 0;
        self.context_of(next)
    }

    fn context_of(&self, id: TaskId) -> P::Context {
        let context = self.tasks[id.index()].context;
        debug_assert!(context.is_some(), "resuming task {:?} without a context", id);
        context.unwrap_or(self.idle_context)
    }
}

// ---------------------------------------------------------------------------
// Unit tests (host-only)
// ---------------------------------------------------------------------------
