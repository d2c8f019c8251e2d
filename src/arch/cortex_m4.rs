//! # Cortex-M4 Port Layer
//!
//! Implements [`Port`] for the ARM Cortex-M4 (Thumb-2) in tick mode:
//! PRIMASK critical sections, PendSV context switches and a SysTick
//! driven scheduler tick.
//!
//! ## Context Switch Mechanism
//!
//! The Cortex-M4 uses a split-stack model:
//! - **MSP** (Main Stack Pointer): Used by the kernel and interrupt handlers
//! - **PSP** (Process Stack Pointer): Used by tasks in Thread mode
//!
//! On exception entry, the hardware automatically stacks R0-R3, R12, LR, PC,
//! and xPSR onto the process stack. The PendSV handler manually saves and
//! restores R4-R11, which completes the full context save/restore. A task's
//! context is therefore just its PSP with R4-R11 pushed on top.
//!
//! ## Interrupt Priorities
//!
//! - SysTick: Priority 0xFF (lowest)
//! - PendSV: Priority 0xFF (lowest), runs only when no other ISR is active
//!
//! A switch requested inside a critical section is taken as soon as
//! PRIMASK is cleared.

use core::arch::{asm, global_asm};

use cortex_m::interrupt;
use cortex_m::peripheral::scb::VectActive;
use cortex_m::peripheral::syst::SystClkSource;
use cortex_m::peripheral::SCB;
use cortex_m::register::primask;

use crate::config::{SYSTEM_CLOCK_HZ, TICK_HZ};
use crate::kernel::Kernel;
use crate::port::{Port, TaskFn};

/// The kernel instance the exception handlers below drive.
pub static KERNEL: Kernel<CortexM4> = Kernel::new();

/// Cortex-M4 port marker.
pub enum CortexM4 {}

/// Initial xPSR: only the Thumb bit set.
const XPSR_THUMB: u32 = 0x0100_0000;

/// Words in a fresh frame: R4-R11, then R0-R3, R12, LR, PC, xPSR.
const FRAME_WORDS: usize = 16;

impl Port for CortexM4 {
    /// Whether interrupts were enabled before `lock`.
    type Token = bool;

    /// Saved PSP.
    type Context = *mut u32;

    fn lock() -> bool {
        let was_active = primask::read().is_active();
        interrupt::disable();
        was_active
    }

    fn unlock(was_active: bool) {
        if was_active {
            // SAFETY: restores the state `lock` found
            unsafe { interrupt::enable() }
        }
    }

    fn in_isr() -> bool {
        SCB::vect_active() != VectActive::ThreadMode
    }

    fn request_switch() {
        SCB::set_pendsv();
    }

    /// Lay out an exception frame at the top of `stack` that "returns" into
    /// the task trampoline with `entry` in R0.
    fn init_context(entry: TaskFn, stack: &mut [u32]) -> *mut u32 {
        debug_assert!(stack.len() > FRAME_WORDS + 1, "task stack too small");

        // AAPCS: SP must be 8-byte aligned at the exception boundary
        let mut top = stack.len();
        if (stack.as_ptr() as usize + top * 4) % 8 != 0 {
            top -= 1;
        }
        let frame = &mut stack[top - FRAME_WORDS..top];
        frame.fill(0);
        frame[8] = entry as usize as u32; // R0
        frame[13] = task_trampoline as usize as u32; // LR
        frame[14] = (task_trampoline as usize as u32) & !1; // PC
        frame[15] = XPSR_THUMB;
        frame.as_mut_ptr()
    }

    fn idle() {
        cortex_m::asm::wfi();
    }
}

/// Every task starts here. Task bodies are plain functions; one that
/// returns is simply called again.
#[allow(improper_ctypes_definitions)]
extern "C" fn task_trampoline(entry: TaskFn) -> ! {
    loop {
        entry();
    }
}

// ---------------------------------------------------------------------------
// SysTick configuration
// ---------------------------------------------------------------------------

/// Configure the SysTick timer for the scheduler tick.
///
/// Sets up SysTick to fire at `TICK_HZ` frequency using the processor
/// clock. Each tick enters `SysTick` which calls [`Kernel::on_tick`].
pub fn configure_systick(syst: &mut cortex_m::peripheral::SYST) {
    let reload = SYSTEM_CLOCK_HZ / TICK_HZ - 1;
    syst.set_reload(reload);
    syst.clear_current();
    syst.set_clock_source(SystClkSource::Core);
    syst.enable_counter();
    syst.enable_interrupt();
}

// ---------------------------------------------------------------------------
// Interrupt priority configuration
// ---------------------------------------------------------------------------

/// Set PendSV and SysTick to the lowest interrupt priority.
pub fn set_interrupt_priorities() {
    unsafe {
        // System Handler Priority Register 3 (SHPR3): 0xE000_ED20
        // Bits [23:16] = PendSV priority
        // Bits [31:24] = SysTick priority
        let shpr3: *mut u32 = 0xE000_ED20 as *mut u32;
        let val = core::ptr::read_volatile(shpr3);
        let val = val | (0xFF << 16) | (0xFF << 24);
        core::ptr::write_volatile(shpr3, val);
    }
}

// ---------------------------------------------------------------------------
// Launch
// ---------------------------------------------------------------------------

/// Start the scheduler. **Does not return.**
///
/// The boot thread is not resumed afterwards: its task block is retired
/// and the ready head takes over on the process stack.
pub fn start(mut core_peripherals: cortex_m::Peripherals) -> ! {
    // No tick or switch may run before the PSP is valid
    interrupt::disable();
    configure_systick(&mut core_peripherals.SYST);
    set_interrupt_priorities();

    let first = KERNEL.with(|s| s.launch());
    log::debug!("launching first task");

    // SAFETY: `first` was built by `init_context` or saved by PendSV
    unsafe { start_first_task(first) }
}

/// Switch Thread mode to the PSP and branch into the task whose frame
/// sits at `psp`, as an exception return would.
///
/// # Safety
/// Must only be called once, with a frame built by `init_context`.
unsafe fn start_first_task(psp: *mut u32) -> ! {
    asm!(
        // Skip the software-saved R4-R11
        "adds r0, #32",
        "msr psp, r0",

        // Thread mode on PSP (CONTROL.SPSEL = 1)
        "movs r0, #2",
        "msr control, r0",
        "isb",

        // Unstack the hardware frame by hand
        "pop {{r0-r3, r12}}",
        "pop {{r4}}",          // LR
        "pop {{r5}}",          // PC
        "pop {{r6}}",          // xPSR
        "mov lr, r4",
        "orr r5, r5, #1",      // Thumb state for bx

        "cpsie i",
        "bx r5",

        in("r0") psp,
        options(noreturn)
    );
}

// ---------------------------------------------------------------------------
// PendSV handler (context switch)
// ---------------------------------------------------------------------------
//
// 1. Push R4-R11 onto the outgoing task's stack (PSP)
// 2. Hand that PSP to the scheduler, get the incoming one back
// 3. Pop R4-R11 from the incoming stack and return on it
//
// EXC_RETURN is preserved on the main stack across the call; the extra
// register keeps MSP 8-byte aligned.
global_asm!(
    ".syntax unified",
    ".thumb",
    ".section .text.PendSV",
    ".global PendSV",
    ".type PendSV, %function",
    ".thumb_func",
    "PendSV:",
    "    mrs r0, psp",
    "    stmdb r0!, {{r4-r11}}",
    "    push {{r1, lr}}",
    "    bl wakeos_switch",
    "    pop {{r1, lr}}",
    "    ldmia r0!, {{r4-r11}}",
    "    msr psp, r0",
    "    bx lr",
);

/// Called from PendSV with the outgoing PSP; returns the incoming one.
#[no_mangle]
extern "C" fn wakeos_switch(saved: *mut u32) -> *mut u32 {
    KERNEL.on_switch(saved)
}

// ---------------------------------------------------------------------------
// SysTick handler
// ---------------------------------------------------------------------------

/// SysTick exception handler: scheduler tick entry point. The tick raises
/// PendSV itself when the ready head changes.
#[no_mangle]
pub extern "C" fn SysTick() {
    KERNEL.on_tick();
}
