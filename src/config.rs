//! Compile-time constants governing the kernel's static storage and timing.
//!
//! Every limit here bounds a fixed-size array baked into the binary — there
//! is no dynamic allocation anywhere in the kernel.

/// Maximum number of tasks the system can manage simultaneously.
/// Bounds the static task arena. Each task consumes `STACK_SIZE` bytes
/// of RAM regardless of whether it is ever created.
pub const MAX_TASKS: usize = 8;

/// Number of distinct priority levels, numbered `0..MAX_PRIO` with 0 the
/// lowest. Must not exceed 32 — the ready mask is a single `u32`.
pub const MAX_PRIO: usize = 8;

/// Maximum length, in bytes, of a task name. Names longer than this are
/// truncated by a bounded copy (see [`crate::task::Task::set_name`]).
pub const NAME_LEN_MAX: usize = 16;

/// Per-task stack size in bytes.
pub const STACK_SIZE: usize = 1024;

/// Maximum number of mutexes that may exist at once (static slab capacity).
pub const MAX_MUTEXES: usize = 8;

/// Maximum number of condition variables that may exist at once (static
/// slab capacity).
pub const MAX_CONDVARS: usize = 8;

/// System tick frequency in Hz.
pub const SYS_HZ: u32 = 1000;

/// Milliseconds per tick, derived from [`SYS_HZ`].
pub const TICK_MS: u32 = 1000 / SYS_HZ;

/// Sentinel wait time meaning "block forever" — never decremented by the
/// tick handler.
pub const TICKS_INFINITE: u32 = u32::MAX;

/// Reference system clock, used by the on-target port to derive the
/// SysTick reload value from [`SYS_HZ`].
pub const SYSTEM_CLOCK_HZ: u32 = 16_000_000;
