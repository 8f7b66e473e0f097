//! Cortex-M4 port.
//!
//! Hardware-specific code for the ARM Cortex-M4 (Thumb-2) processor:
//! context switching via PendSV, SysTick configuration, and the naked asm
//! needed to launch the first task. The split-stack model is the usual one
//! — MSP for the kernel and exception handlers, PSP for tasks in thread
//! mode. On exception entry the hardware stacks R0–R3, R12, LR, PC and
//! xPSR; PendSV additionally saves and restores R4–R11 by hand, which
//! completes the context save/restore.
//!
//! SysTick and PendSV are both set to the lowest interrupt priority so
//! PendSV never preempts an application interrupt handler.

use core::arch::{asm, naked_asm};

use super::Port;
use crate::config::SYSTEM_CLOCK_HZ;
use crate::task::Task;

const ICSR: *mut u32 = 0xE000_ED04 as *mut u32;
const SHPR3: *mut u32 = 0xE000_ED20 as *mut u32;
const SYST_CSR: *mut u32 = 0xE000_E010 as *mut u32;
const SYST_RVR: *mut u32 = 0xE000_E014 as *mut u32;
const SYST_CVR: *mut u32 = 0xE000_E018 as *mut u32;

const SYST_CSR_ENABLE: u32 = 1 << 0;
const SYST_CSR_TICKINT: u32 = 1 << 1;
const SYST_CSR_CLKSOURCE: u32 = 1 << 2;

pub struct Cortex4;

impl Port for Cortex4 {
    fn init_stack(task: &mut Task, entry: fn() -> !) {
        let len = task.stack.len();
        let frame = &mut task.stack[len - 16..];
        frame[0..8].fill(0); // software-saved R4-R11
        frame[8] = 0; // R0
        frame[9] = 0; // R1
        frame[10] = 0; // R2
        frame[11] = 0; // R3
        frame[12] = 0; // R12
        frame[13] = task_exit as usize as u32; // LR: where the task returns to
        frame[14] = entry as usize as u32; // PC: task entry point
        frame[15] = 0x0100_0000; // xPSR: Thumb bit set
        task.stack_ptr = frame.as_mut_ptr();
    }

    fn configure_tick(hz: u32) {
        unsafe {
            // lowest priority for both exceptions driving the scheduler
            let val = core::ptr::read_volatile(SHPR3);
            core::ptr::write_volatile(SHPR3, val | (0xFF << 16) | (0xFF << 24));

            let reload = SYSTEM_CLOCK_HZ / hz - 1;
            core::ptr::write_volatile(SYST_RVR, reload);
            core::ptr::write_volatile(SYST_CVR, 0);
            core::ptr::write_volatile(
                SYST_CSR,
                SYST_CSR_ENABLE | SYST_CSR_TICKINT | SYST_CSR_CLKSOURCE,
            );
        }
    }

    #[inline]
    fn request_switch() {
        unsafe {
            core::ptr::write_volatile(ICSR, 1 << 28); // PENDSVSET
        }
    }

    unsafe fn start_first_task(psp: *mut u32) -> ! {
        asm!(
            "adds r0, #32",   // skip the 8 software-saved registers
            "msr psp, r0",
            "movs r0, #2",    // CONTROL.SPSEL = 1: use PSP in thread mode
            "msr control, r0",
            "isb",
            "pop {{r0-r3, r12}}",
            "pop {{r4}}",     // discard LR, the task never returns via it
            "pop {{r5}}",     // PC
            "pop {{r6}}",     // discard xPSR, set by the processor
            "cpsie i",
            "bx r5",
            in("r0") psp,
            options(noreturn)
        );
    }
}

fn task_exit() -> ! {
    loop {
        cortex_m::asm::wfi();
    }
}

#[no_mangle]
#[unsafe(naked)]
pub unsafe extern "C" fn PendSV() {
    naked_asm!(
        "mrs r0, psp",
        "stmdb r0!, {{r4-r11}}",
        "bl {save_context}",
        "bl {select_next}",
        "ldmia r0!, {{r4-r11}}",
        "msr psp, r0",
        "ldr r0, =0xFFFFFFFD",
        "bx r0",
        save_context = sym save_current_context,
        select_next = sym select_next_context,
    );
}

#[no_mangle]
unsafe extern "C" fn save_current_context(psp: *mut u32) {
    crate::kernel::context_switch_save(psp);
}

#[no_mangle]
unsafe extern "C" fn select_next_context() -> *mut u32 {
    crate::kernel::context_switch_next()
}

#[no_mangle]
pub unsafe extern "C" fn SysTick() {
    crate::kernel::enter_isr();
    crate::kernel::tick();
    crate::kernel::exit_isr();
}
