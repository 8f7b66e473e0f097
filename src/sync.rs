//! Critical-section abstraction shared by every kernel operation.
//!
//! All mutation of kernel state — the task arena, ready queues, mutex and
//! condvar slabs — happens inside [`critical_section`]. On target this
//! disables interrupts for the duration of the closure; on the host test
//! port there is nothing to disable, so the closure just runs.

#[cfg(feature = "demo")]
#[inline]
pub fn critical_section<F, R>(f: F) -> R
where
    F: FnOnce() -> R,
{
    cortex_m::interrupt::free(|_cs| f())
}

#[cfg(not(feature = "demo"))]
#[inline]
pub fn critical_section<F, R>(f: F) -> R
where
    F: FnOnce() -> R,
{
    f()
}
