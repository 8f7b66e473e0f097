//! Task control blocks.
//!
//! A [`Task`] holds everything the scheduler needs to run, block and resume
//! a thread of execution: its saved stack pointer, its three list link
//! slots (see [`crate::list`]), and its scheduling-relevant attributes.
//! Tasks never move once created — the kernel addresses them by
//! [`TaskId`], never by reference, so the whole arena can live in a single
//! `static`.

use crate::config::{MAX_TASKS, NAME_LEN_MAX, STACK_SIZE};
use crate::list::{AllLink, Link, LinkSelector, ReadyLink, TaskId, WaitingLink};

/// Lifecycle state of a task, sampled by [`crate::kernel::task_state`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    /// Slot is free; no task occupies it.
    Dead,
    /// On a ready queue, eligible to run.
    Ready,
    /// Currently executing on the CPU.
    Running,
    /// Sleeping for a bounded number of ticks (`sleep`), not waiting on
    /// any synchronization object.
    Sleeping,
    /// Blocked on a mutex or condition variable, with or without a
    /// timeout.
    Blocked,
}

/// Identifies which external list, if any, currently holds a blocked
/// task's ready/pending link. The link slot itself is reused across
/// roles (own ready queue, a mutex's pending list, a condvar's waiting
/// list), so the kernel needs this to know which one to unlink from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum BlockedOn {
    None,
    Mutex(u16),
    Cond(u16),
}

/// A task control block.
#[derive(Clone, Copy)]
pub struct Task {
    pub(crate) stack: [u32; STACK_SIZE / 4],
    pub(crate) stack_ptr: *mut u32,
    pub(crate) ready_link: Link,
    pub(crate) waiting_link: Link,
    pub(crate) all_link: Link,
    pub(crate) prio: u8,
    pub(crate) prio_mask: u32,
    pub(crate) wait_time: u32,
    pub(crate) has_timeout: bool,
    pub(crate) blocked_on: BlockedOn,
    pub(crate) id: TaskId,
    pub(crate) switch_count: u32,
    pub(crate) total_ticks: u32,
    pub(crate) state: TaskState,
    name: [u8; NAME_LEN_MAX],
    name_len: u8,
}

impl Task {
    pub const EMPTY: Task = Task {
        stack: [0; STACK_SIZE / 4],
        stack_ptr: core::ptr::null_mut(),
        ready_link: Link::EMPTY,
        waiting_link: Link::EMPTY,
        all_link: Link::EMPTY,
        prio: 0,
        prio_mask: 0,
        wait_time: crate::config::TICKS_INFINITE,
        has_timeout: false,
        blocked_on: BlockedOn::None,
        id: TaskId::new(0),
        switch_count: 0,
        total_ticks: 0,
        state: TaskState::Dead,
        name: [0; NAME_LEN_MAX],
        name_len: 0,
    };

    /// Builds an empty, dead slot tagged with the given arena index.
    /// Used only to seed the static arena; `create` fills in the rest.
    pub fn empty(id: TaskId) -> Self {
        let mut t = Task::EMPTY;
        t.id = id;
        t
    }

    /// Bounded copy of `name` into the fixed-size name buffer. At most
    /// `NAME_LEN_MAX` bytes are copied; the rest of `name`, if any, is
    /// silently dropped. No NUL terminator is used or required — this is
    /// not a C string.
    pub fn set_name(&mut self, name: &str) {
        let bytes = name.as_bytes();
        let len = core::cmp::min(bytes.len(), NAME_LEN_MAX);
        self.name[..len].copy_from_slice(&bytes[..len]);
        self.name_len = len as u8;
    }

    /// The task's name, or `""` if it was never set or is not valid UTF-8.
    pub fn name(&self) -> &str {
        core::str::from_utf8(&self.name[..self.name_len as usize]).unwrap_or("")
    }

    pub fn id(&self) -> TaskId {
        self.id
    }

    pub fn priority(&self) -> u8 {
        self.prio
    }

    pub fn state(&self) -> TaskState {
        self.state
    }
}

impl LinkSelector for ReadyLink {
    fn link(task: &Task) -> &Link {
        &task.ready_link
    }
    fn link_mut(task: &mut Task) -> &mut Link {
        &mut task.ready_link
    }
}

impl LinkSelector for WaitingLink {
    fn link(task: &Task) -> &Link {
        &task.waiting_link
    }
    fn link_mut(task: &mut Task) -> &mut Link {
        &mut task.waiting_link
    }
}

impl LinkSelector for AllLink {
    fn link(task: &Task) -> &Link {
        &task.all_link
    }
    fn link_mut(task: &mut Task) -> &mut Link {
        &mut task.all_link
    }
}

/// The fixed-size task arena backing the whole kernel.
pub type Pool = [Task; MAX_TASKS];

// SAFETY: `Task` contains a raw `stack_ptr`, but it is only ever
// dereferenced by the architecture port under a critical section, never
// shared across real threads — the kernel itself runs on one core.
unsafe impl Send for Task {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bounded_name_copy_truncates() {
        let mut t = Task::empty(TaskId::new(0));
        t.set_name("this-name-is-way-too-long-for-the-buffer");
        assert_eq!(t.name().len(), NAME_LEN_MAX);
        assert_eq!(t.name(), "this-name-is-way");
    }

    #[test]
    fn short_name_round_trips_exactly() {
        let mut t = Task::empty(TaskId::new(0));
        t.set_name("producer");
        assert_eq!(t.name(), "producer");
    }

    #[test]
    fn empty_task_is_dead() {
        let t = Task::empty(TaskId::new(3));
        assert_eq!(t.state(), TaskState::Dead);
        assert_eq!(t.id(), TaskId::new(3));
    }
}
