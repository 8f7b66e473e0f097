//! Host test port.
//!
//! Provides no real context switching. Kernel logic under test drives the
//! scheduler, lists, mutex and condvar state machines directly and asserts
//! on the resulting state — it never actually dispatches into a task entry
//! point, so this port only needs to keep `init_stack` well-defined enough
//! that the stack pointer field is non-null and in range.

use super::Port;
use crate::task::Task;

pub struct Host;

impl Port for Host {
    fn init_stack(task: &mut Task, _entry: fn() -> !) {
        // Point at the top of the stack array; nothing ever pops a frame
        // off it on the host port.
        let len = task.stack.len();
        task.stack_ptr = task.stack[len - 1..].as_mut_ptr();
    }

    fn configure_tick(_hz: u32) {}

    fn request_switch() {}

    unsafe fn start_first_task(_sp: *mut u32) -> ! {
        unreachable!("the host port never dispatches into a task")
    }
}
