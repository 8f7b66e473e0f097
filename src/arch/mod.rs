//! Architecture abstraction boundary.
//!
//! The kernel core never touches Cortex-M registers directly — it calls
//! through [`Port`]. Exactly one implementation is compiled in: the
//! on-target [`cortex_m4`] port when the `demo` feature selects a real
//! Cortex-M4 build, or the [`host`] port otherwise, which makes the
//! scheduler, lists, mutex and condvar logic unit-testable on the
//! development machine.

use crate::task::Task;

/// The architecture-specific half of a context switch: stack frame layout,
/// the SysTick reload, and the asm needed to launch the very first task.
pub trait Port {
    /// Lay out the initial stack frame for a task about to run `entry` for
    /// the first time, and set `task.stack_ptr` accordingly.
    fn init_stack(task: &mut Task, entry: fn() -> !);

    /// Configure the periodic tick interrupt to fire at `hz`.
    fn configure_tick(hz: u32);

    /// Request a deferred context switch (on Cortex-M4, pends PendSV).
    fn request_switch();

    /// Switch into the first task and never return.
    ///
    /// # Safety
    /// Must be called exactly once, with a stack pointer produced by
    /// `init_stack`.
    unsafe fn start_first_task(sp: *mut u32) -> !;
}

#[cfg(feature = "demo")]
mod cortex_m4;
#[cfg(feature = "demo")]
pub use cortex_m4::Cortex4 as ActivePort;

#[cfg(not(feature = "demo"))]
mod host;
#[cfg(not(feature = "demo"))]
pub use host::Host as ActivePort;
