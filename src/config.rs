//! # WakeOS Configuration
//!
//! Compile-time constants governing the scheduler and system behavior.
//! All limits are fixed at compile time. There is no dynamic allocation.

use crate::error::Tick;

/// Number of task control blocks in the arena, including the idle and
/// main tasks. Blocks are handed out by a bump allocator and never
/// returned, so this bounds the number of `task_create` calls.
pub const MAX_TASKS: usize = 16;

/// Number of timer control blocks in the arena, including the infinite
/// sentinel that terminates the timer queue.
pub const MAX_TIMERS: usize = 8;

/// Number of wait-list roots ("guards") in the arena. Every timer, mutex
/// and mailbox consumes one; slot 0 is the private sleep guard.
pub const MAX_GUARDS: usize = 24;

/// Deepest chain of nested mutex ownership the priority-inheritance walk
/// follows. A longer chain is a configuration error.
pub const MAX_MUTEX_NESTING: usize = 8;

/// Priority of the boot thread once it is adopted as the main task.
pub const MAIN_PRIO: u8 = 0;

/// Priority of the idle task. Nothing may rank below it.
pub const IDLE_PRIO: u8 = 0;

/// Round-robin quantum in ticks. Every `ROBIN_QUANTUM` ticks the running
/// task gives way to the next task of equal priority, if any. `0`
/// disables time slicing.
pub const ROBIN_QUANTUM: Tick = 10;

/// SysTick frequency in Hz. Determines scheduler tick granularity.
pub const TICK_HZ: u32 = 1000;

/// System clock frequency in Hz (default for STM32F4 at 16 MHz HSI).
pub const SYSTEM_CLOCK_HZ: u32 = 16_000_000;

/// Stack size in words for the demo firmware tasks. Must be large enough
/// for the deepest call chain plus the hardware exception frame (8 words)
/// and the software-saved context (8 words for R4-R11).
pub const STACK_WORDS: usize = 256;
