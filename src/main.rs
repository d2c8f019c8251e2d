//! # WakeOS Example Firmware
//!
//! Three tasks sharing a mailbox and a mutex, driven by a periodic timer:
//!
//! | Task       | Priority | Behavior                                         |
//! |------------|----------|--------------------------------------------------|
//! | `consumer` | 3        | Takes readings from the mailbox, folds them into the statistics under the mutex |
//! | `sampler`  | 2        | Waits on the sample timer, posts one reading per expiry |
//! | `reporter` | 1        | Sleeps, then holds the mutex while it summarizes |
//!
//! ## Expected Dynamics
//!
//! 1. Every `SAMPLE_PERIOD` ticks the timer fires. Its callback bumps the
//!    heartbeat counter and the expiry releases `sampler`.
//! 2. `sampler` posts a reading. `consumer` is blocked on the mailbox, so
//!    the reading goes straight to it and it preempts `sampler`.
//! 3. When `consumer` finds the mutex held by `reporter`, `reporter` runs
//!    at priority 3 until it unlocks. `sampler` cannot slip in between.

#![no_std]
#![no_main]

use core::sync::atomic::{AtomicU32, Ordering};

use cortex_m::interrupt;
use cortex_m_rt::entry;
use panic_halt as _;

use wakeos::arch::cortex_m4::{self, CortexM4, KERNEL};
use wakeos::config::STACK_WORDS;
use wakeos::sync::{self, Shared};
use wakeos::{Mailbox, Mutex, Scheduler, Tick, TimerId, Timeout};

/// Sampling period in ticks (100 ms at 1 kHz).
const SAMPLE_PERIOD: Tick = 100;

/// Reporting interval in ticks.
const REPORT_PERIOD: Tick = 1000;

static READINGS: Shared<Mailbox<u32, 8>> = Shared::new();
static STATS_LOCK: Shared<Mutex> = Shared::new();
static SAMPLE_TIMER: Shared<TimerId> = Shared::new();
static STATS: Shared<Stats> = Shared::new();

static HEARTBEAT: AtomicU32 = AtomicU32::new(0);

#[derive(Clone, Copy, Default)]
struct Stats {
    count: u32,
    sum: u32,
    max: u32,
}

/// A fresh `'static` task stack per expansion.
macro_rules! stack {
    () => {{
        let stack: &'static mut [u32] =
            cortex_m::singleton!(: [u32; STACK_WORDS] = [0; STACK_WORDS])
                .expect("stack taken twice");
        stack
    }};
}

/// Copy a handle out of a shared slot.
fn handle<T: Copy + Send>(slot: &Shared<T>) -> Option<T> {
    sync::critical_section::<CortexM4, _, _>(|cs| slot.lock(cs, |v| v.copied()))
}

// ---------------------------------------------------------------------------
// Timer callback
// ---------------------------------------------------------------------------

fn heartbeat(_: &mut Scheduler<CortexM4>, _: TimerId) {
    HEARTBEAT.fetch_add(1, Ordering::Relaxed);
}

// ---------------------------------------------------------------------------
// Task entry points
// ---------------------------------------------------------------------------

/// **Sampler** (Priority 2)
///
/// One reading per timer expiry. A full mailbox drops the reading.
fn sampler() {
    let Some(timer) = handle(&SAMPLE_TIMER) else {
        return;
    };
    let mut reading: u32 = 0;
    loop {
        if KERNEL.timer_wait(timer, Timeout::FOREVER) != wakeos::Event::Success {
            return;
        }
        // Stand-in for an ADC read
        reading = reading.wrapping_mul(1_103_515_245).wrapping_add(12_345) % 4096;
        let _ = KERNEL.mailbox_give(&READINGS, reading);
    }
}

/// **Consumer** (Priority 3)
fn consumer() {
    let Some(lock) = handle(&STATS_LOCK) else {
        return;
    };
    loop {
        let Ok(reading) = KERNEL.mailbox_take(&READINGS, Timeout::FOREVER) else {
            return;
        };
        if KERNEL.mutex_lock(lock, Timeout::FOREVER).is_err() {
            return;
        }
        sync::critical_section::<CortexM4, _, _>(|cs| {
            STATS.lock(cs, |stats| {
                if let Some(stats) = stats {
                    stats.count += 1;
                    stats.sum = stats.sum.wrapping_add(reading);
                    stats.max = stats.max.max(reading);
                }
            })
        });
        let _ = KERNEL.mutex_unlock(lock);
    }
}

/// **Reporter** (Priority 1)
///
/// Holds the mutex across a slow summary, which is what gives `consumer`
/// something to inherit against.
fn reporter() {
    let Some(lock) = handle(&STATS_LOCK) else {
        return;
    };
    loop {
        KERNEL.sleep_for(REPORT_PERIOD);
        if KERNEL.mutex_lock(lock, Timeout::FOREVER).is_err() {
            return;
        }
        let snapshot = handle(&STATS).unwrap_or_default();
        let mut _mean = 0;
        for _ in 0..10_000 {
            _mean = snapshot.sum.checked_div(snapshot.count).unwrap_or(0);
        }
        let _ = KERNEL.mutex_unlock(lock);
    }
}

// ---------------------------------------------------------------------------
// Main entry point
// ---------------------------------------------------------------------------

/// Firmware entry point. Builds the kernel objects and starts the
/// scheduler. Does not return.
#[entry]
fn main() -> ! {
    // Setup runs masked: no switch may be taken before `start`
    interrupt::disable();

    let cp = cortex_m::Peripherals::take().unwrap();

    KERNEL.init(stack!()).expect("kernel initialized twice");

    let lock = KERNEL.mutex_create().expect("out of guards");
    KERNEL.mailbox_create(&READINGS).expect("out of guards");

    let timer = KERNEL.timer_create().expect("out of timers");
    KERNEL.timer_set_proc(timer, Some(&heartbeat));
    KERNEL.timer_start_for(timer, SAMPLE_PERIOD, SAMPLE_PERIOD);

    sync::critical_section::<CortexM4, _, _>(|cs| {
        STATS_LOCK.put(cs, lock);
        SAMPLE_TIMER.put(cs, timer);
        STATS.put(cs, Stats::default());
    });

    let tasks: [(u8, fn(), &'static mut [u32]); 3] = [
        (3, consumer, stack!()),
        (2, sampler, stack!()),
        (1, reporter, stack!()),
    ];
    for (prio, entry, stack) in tasks {
        let task = KERNEL
            .task_create(prio, entry, stack)
            .expect("out of task blocks");
        KERNEL.task_start(task).expect("task already started");
    }

    cortex_m4::start(cp)
}
