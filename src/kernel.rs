//! The kernel singleton: task arena, ready queues, tick handling, and the
//! scheduling decision itself.
//!
//! Everything here mutates one `static` [`Kernel`] instance, always from
//! inside [`sync::critical_section`]. Mutex and condition-variable
//! operations (`src/mutex.rs`, `src/cond.rs`) are additional `impl Kernel`
//! blocks over the same struct — they share its task arena and ready
//! queues directly rather than going through a second lock.

use crate::arch::{ActivePort, Port};
use crate::config::{MAX_MUTEXES, MAX_PRIO, MAX_TASKS, TICKS_INFINITE, TICK_MS};
use crate::cond::CondSlot;
use crate::error::{Error, Result};
use crate::list::{AllLink, ReadyLink, TaskId, TaskList, WaitingLink};
use crate::mutex::MutexSlot;
use crate::sync::critical_section;
use crate::task::{BlockedOn, Task, TaskState};

/// How long a blocking call should wait before giving up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Timeout {
    /// Fail immediately rather than block at all.
    Immediate,
    /// Block for at most this many ticks.
    Ticks(u32),
    /// Block until woken, however long that takes.
    Infinite,
}

impl Timeout {
    /// Converts a millisecond duration to a tick-rounded timeout, per the
    /// kernel's ceiling-with-minimum-one-tick rounding rule.
    pub fn from_millis(ms: u32) -> Self {
        if ms == 0 {
            Timeout::Immediate
        } else {
            Timeout::Ticks(core::cmp::max(1, (ms + TICK_MS - 1) / TICK_MS))
        }
    }
}

/// Attributes used to create a new task.
pub struct TaskConfig<'a> {
    pub name: &'a str,
    pub priority: u8,
}

pub struct Kernel {
    pub(crate) tasks: [Task; MAX_TASKS],
    pub(crate) task_count: usize,
    pub(crate) intr_level: u8,
    pub(crate) ticks: u64,
    pub(crate) ready_mask: u32,
    pub(crate) schedule_enabled: bool,
    pub(crate) running: bool,
    pub(crate) current: Option<TaskId>,
    pub(crate) all_tasks: TaskList<AllLink>,
    pub(crate) waiting: TaskList<WaitingLink>,
    pub(crate) ready: [TaskList<ReadyLink>; MAX_PRIO],
    pub(crate) mutexes: [MutexSlot; MAX_MUTEXES],
    pub(crate) condvars: [CondSlot; crate::config::MAX_CONDVARS],
}

impl Kernel {
    pub const fn new() -> Self {
        Kernel {
            tasks: [Task::EMPTY; MAX_TASKS],
            task_count: 0,
            intr_level: 0,
            ticks: 0,
            ready_mask: 0,
            schedule_enabled: true,
            running: false,
            current: None,
            all_tasks: TaskList::new(),
            waiting: TaskList::new(),
            ready: [TaskList::new(); MAX_PRIO],
            mutexes: [MutexSlot::EMPTY; MAX_MUTEXES],
            condvars: [CondSlot::EMPTY; crate::config::MAX_CONDVARS],
        }
    }

    // -- scheduling -------------------------------------------------------

    /// Picks the highest-priority ready task and, if it differs from the
    /// current one, commits the switch in kernel bookkeeping and requests
    /// the architecture port perform the actual register swap. A no-op
    /// while inside an interrupt handler or while scheduling is disabled —
    /// callers in that situation are relying on [`exit_isr`] or
    /// [`schedule_enable`] to reschedule later.
    pub(crate) fn schedule(&mut self) -> TaskId {
        if self.intr_level != 0 || !self.schedule_enabled || self.ready_mask == 0 {
            return self.current.unwrap_or(TaskId::new(0));
        }

        let highest = core::cmp::min(31 - self.ready_mask.leading_zeros(), (MAX_PRIO - 1) as u32) as usize;
        let next = match self.ready[highest].front() {
            Some(id) => id,
            None => return self.current.unwrap_or(TaskId::new(0)),
        };

        if Some(next) != self.current {
            let already_running = self.current.is_some();
            if let Some(cur) = self.current {
                if self.tasks[cur.index()].state == TaskState::Running {
                    self.tasks[cur.index()].state = TaskState::Ready;
                }
            }
            self.tasks[next.index()].state = TaskState::Running;
            self.tasks[next.index()].switch_count += 1;
            log::trace!("schedule: switch to id={} prio={}", next.index(), highest);
            self.current = Some(next);
            if already_running {
                ActivePort::request_switch();
            }
        }
        next
    }

    /// Unlinks `id` from whatever currently holds its ready/pending link
    /// (its own priority queue isn't touched here — only a mutex's pending
    /// list or a condvar's waiting list) and from the global timed-wait
    /// list if it has an active timeout. Shared by tick-driven timeouts,
    /// mutex hand-off and condvar wakeups.
    pub(crate) fn clear_blocking_links(&mut self, id: TaskId) {
        let idx = id.index();
        match self.tasks[idx].blocked_on {
            BlockedOn::None => {}
            BlockedOn::Mutex(slot) => self.mutexes[slot as usize].pending.remove(&mut self.tasks, id),
            BlockedOn::Cond(slot) => self.condvars[slot as usize].waiting.remove(&mut self.tasks, id),
        }
        self.tasks[idx].blocked_on = BlockedOn::None;
        if self.tasks[idx].has_timeout {
            self.waiting.remove(&mut self.tasks, id);
            self.tasks[idx].has_timeout = false;
        }
    }

    pub(crate) fn requeue_ready(&mut self, id: TaskId) {
        let idx = id.index();
        self.tasks[idx].state = TaskState::Ready;
        self.tasks[idx].wait_time = TICKS_INFINITE;
        let prio = self.tasks[idx].prio as usize;
        self.ready[prio].push_back(&mut self.tasks, id);
        self.ready_mask |= self.tasks[idx].prio_mask;
    }

    /// Moves a blocked or sleeping task back onto its priority's ready
    /// queue, wherever it currently is.
    pub(crate) fn wake(&mut self, id: TaskId) {
        self.clear_blocking_links(id);
        self.requeue_ready(id);
    }

    // -- tick / interrupt bookkeeping --------------------------------------

    pub(crate) fn do_tick(&mut self) {
        self.ticks += 1;
        let mut cur = self.waiting.front();
        while let Some(id) = cur {
            let next = TaskList::<WaitingLink>::next_of(&self.tasks, id);
            let idx = id.index();
            if self.tasks[idx].wait_time != TICKS_INFINITE {
                self.tasks[idx].wait_time = self.tasks[idx].wait_time.saturating_sub(1);
                if self.tasks[idx].wait_time == 0 {
                    self.wake(id);
                }
            }
            cur = next;
        }
    }

    // -- task lifecycle -----------------------------------------------------

    fn create_task(&mut self, entry: fn() -> !, config: TaskConfig) -> Result<TaskId> {
        debug_assert_eq!(self.intr_level, 0, "create must not be called from an ISR");
        if (config.priority as usize) >= MAX_PRIO {
            return Err(Error::Invalid);
        }
        let idx = self
            .tasks
            .iter()
            .position(|t| t.state() == TaskState::Dead)
            .ok_or(Error::NoFree)?;

        let mut task = Task::empty(TaskId::new(idx));
        task.prio = config.priority;
        task.prio_mask = 1 << config.priority;
        task.set_name(config.name);
        task.state = TaskState::Ready;
        ActivePort::init_stack(&mut task, entry);
        self.tasks[idx] = task;
        self.task_count += 1;

        let id = TaskId::new(idx);
        self.all_tasks.push_back(&mut self.tasks, id);
        self.ready[config.priority as usize].push_back(&mut self.tasks, id);
        self.ready_mask |= self.tasks[idx].prio_mask;

        log::debug!("create: {} id={} prio={}", config.name, idx, config.priority);

        if self.running {
            self.schedule();
        }
        Ok(id)
    }

    fn delete_task(&mut self, id: TaskId) -> Result<()> {
        debug_assert_eq!(self.intr_level, 0, "delete must not be called from an ISR");
        let idx = id.index();
        match self.tasks[idx].state {
            TaskState::Dead => return Err(Error::NoSuchTask),
            TaskState::Blocked => return Err(Error::Blocking),
            TaskState::Ready | TaskState::Running => {
                let prio = self.tasks[idx].prio as usize;
                self.ready[prio].remove(&mut self.tasks, id);
                if self.ready[prio].is_empty() {
                    self.ready_mask &= !self.tasks[idx].prio_mask;
                }
            }
            TaskState::Sleeping => {
                self.waiting.remove(&mut self.tasks, id);
            }
        }
        self.all_tasks.remove(&mut self.tasks, id);
        self.tasks[idx] = Task::empty(id);
        self.task_count -= 1;
        if self.current == Some(id) {
            self.current = None;
        }
        log::debug!("delete: id={}", idx);
        self.schedule();
        Ok(())
    }

    fn sleep(&mut self, ms: u32) -> Result<()> {
        debug_assert_eq!(self.intr_level, 0, "sleep must not be called from an ISR");
        let id = self.current.ok_or(Error::Invalid)?;
        let ticks = if ms == 0 {
            1
        } else {
            core::cmp::max(1, (ms + TICK_MS - 1) / TICK_MS)
        };
        let idx = id.index();
        let prio = self.tasks[idx].prio as usize;
        self.ready[prio].remove(&mut self.tasks, id);
        if self.ready[prio].is_empty() {
            self.ready_mask &= !self.tasks[idx].prio_mask;
        }
        self.tasks[idx].state = TaskState::Sleeping;
        self.tasks[idx].wait_time = ticks;
        self.tasks[idx].has_timeout = true;
        self.waiting.push_back(&mut self.tasks, id);
        self.schedule();
        Ok(())
    }

    fn yield_now(&mut self) {
        let id = match self.current {
            Some(id) => id,
            None => return,
        };
        let prio = self.tasks[id.index()].prio as usize;
        self.ready[prio].remove(&mut self.tasks, id);
        self.ready[prio].push_back(&mut self.tasks, id);
        self.schedule();
    }

    fn set_priority(&mut self, id: TaskId, new_prio: u8) -> Result<u8> {
        if new_prio as usize >= MAX_PRIO {
            return Err(Error::Invalid);
        }
        let idx = id.index();
        if self.tasks[idx].state() == TaskState::Dead {
            return Err(Error::NoSuchTask);
        }
        let old_prio = self.tasks[idx].prio;
        if old_prio == new_prio {
            return Ok(old_prio);
        }
        match self.tasks[idx].state {
            TaskState::Ready | TaskState::Running => {
                self.ready[old_prio as usize].remove(&mut self.tasks, id);
                if self.ready[old_prio as usize].is_empty() {
                    self.ready_mask &= !self.tasks[idx].prio_mask;
                }
                self.tasks[idx].prio = new_prio;
                self.tasks[idx].prio_mask = 1 << new_prio;
                self.ready[new_prio as usize].push_back(&mut self.tasks, id);
                self.ready_mask |= self.tasks[idx].prio_mask;
            }
            _ => {
                // Sleeping or blocked: only the stored priority changes here.
                // It takes effect the next time the task re-enters a ready
                // queue (on wake), matching the original kernel's behavior
                // of never re-splicing a task that is not currently ready.
                self.tasks[idx].prio = new_prio;
                self.tasks[idx].prio_mask = 1 << new_prio;
            }
        }
        self.schedule();
        Ok(old_prio)
    }
}

static mut KERNEL: Kernel = Kernel::new();

pub(crate) fn with_kernel<R>(f: impl FnOnce(&mut Kernel) -> R) -> R {
    critical_section(|| unsafe {
        #[allow(static_mut_refs)]
        f(&mut KERNEL)
    })
}

fn idle_task_entry() -> ! {
    loop {
        #[cfg(feature = "demo")]
        cortex_m::asm::wfi();
        #[cfg(not(feature = "demo"))]
        core::hint::spin_loop();
    }
}

/// Resets the kernel to a fresh state with a single idle task at priority
/// 0. Must be called once before any other kernel API.
pub fn init() {
    with_kernel(|k| {
        *k = Kernel::new();
        k.create_task(idle_task_entry, TaskConfig { name: "idle", priority: 0 })
            .expect("idle task creation cannot fail on a fresh kernel");
    });
}

/// Creates a new task. Fails with [`Error::NoFree`] once [`crate::config::MAX_TASKS`]
/// tasks exist, or [`Error::Invalid`] if `priority` is out of range.
pub fn create(entry: fn() -> !, config: TaskConfig) -> Result<TaskId> {
    with_kernel(|k| k.create_task(entry, config))
}

/// Deletes a task. Fails with [`Error::Blocking`] if the task is currently
/// blocked on a mutex or condition variable — the kernel has no way to
/// recover the pending/waiting list that is holding it without that
/// primitive's cooperation.
pub fn delete(id: TaskId) -> Result<()> {
    with_kernel(|k| k.delete_task(id))
}

/// Puts the calling task to sleep for at least `ms` milliseconds, rounded
/// up to whole ticks with a minimum of one tick (even for `ms == 0`).
pub fn sleep(ms: u32) -> Result<()> {
    with_kernel(|k| k.sleep(ms))
}

/// Yields the CPU to another ready task at the same priority, if any.
pub fn yield_now() {
    with_kernel(|k| k.yield_now());
}

/// Changes a task's priority, returning its previous priority.
pub fn set_priority(id: TaskId, priority: u8) -> Result<u8> {
    with_kernel(|k| k.set_priority(id, priority))
}

pub fn priority(id: TaskId) -> Result<u8> {
    with_kernel(|k| {
        if k.tasks[id.index()].state() == TaskState::Dead {
            Err(Error::NoSuchTask)
        } else {
            Ok(k.tasks[id.index()].priority())
        }
    })
}

pub fn state(id: TaskId) -> TaskState {
    with_kernel(|k| k.tasks[id.index()].state())
}

pub fn current() -> Option<TaskId> {
    with_kernel(|k| k.current)
}

pub fn ticks() -> u64 {
    with_kernel(|k| k.ticks)
}

pub fn schedule_enable() {
    with_kernel(|k| {
        k.schedule_enabled = true;
        k.schedule();
    });
}

pub fn schedule_disable() {
    with_kernel(|k| k.schedule_enabled = false);
}

/// Marks entry into an interrupt handler. Nesting saturates at 255.
pub fn enter_isr() {
    with_kernel(|k| k.intr_level = k.intr_level.saturating_add(1));
}

/// Marks exit from an interrupt handler. Once nesting returns to zero and
/// scheduling is enabled, reschedules.
pub fn exit_isr() {
    with_kernel(|k| {
        k.intr_level = k.intr_level.saturating_sub(1);
        if k.intr_level == 0 && k.schedule_enabled {
            k.schedule();
        }
    });
}

/// Runs one tick's worth of timed-wait bookkeeping. Called from the
/// periodic tick interrupt, between [`enter_isr`] and [`exit_isr`].
pub fn tick() {
    with_kernel(|k| k.do_tick());
}

/// Starts multitasking and never returns. Only meaningful on-target.
#[cfg(feature = "demo")]
pub fn start() -> ! {
    let sp = with_kernel(|k| {
        k.running = true;
        let id = k.schedule();
        k.tasks[id.index()].stack_ptr
    });
    ActivePort::configure_tick(crate::config::SYS_HZ);
    unsafe { ActivePort::start_first_task(sp) }
}

/// Stores the outgoing task's saved stack pointer. Called only from the
/// architecture port's context-switch exception handler.
///
/// # Safety
/// Must only be called from within the port's context-switch handler.
pub(crate) unsafe fn context_switch_save(psp: *mut u32) {
    #[allow(static_mut_refs)]
    if let Some(id) = KERNEL.current {
        KERNEL.tasks[id.index()].stack_ptr = psp;
    }
}

/// Returns the incoming task's stack pointer after making the scheduling
/// decision. Called only from the architecture port's context-switch
/// exception handler.
///
/// # Safety
/// Must only be called from within the port's context-switch handler.
pub(crate) unsafe fn context_switch_next() -> *mut u32 {
    #[allow(static_mut_refs)]
    {
        let next = KERNEL.schedule();
        KERNEL.tasks[next.index()].stack_ptr
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::TaskState;
    use crate::test_support;

    /// Resets the shared kernel and returns the cross-test serialization
    /// guard; hold it for the whole test, since every test here mutates
    /// the one `static mut KERNEL` and libtest runs tests on many threads.
    #[must_use]
    fn fresh() -> std::sync::MutexGuard<'static, ()> {
        let guard = test_support::lock();
        init();
        guard
    }

    #[test]
    fn idle_task_exists_at_priority_zero() {
        let _guard = fresh();
        assert_eq!(priority(TaskId::new(0)).unwrap(), 0);
    }

    #[test]
    fn create_assigns_distinct_ids_and_ready_state() {
        let _guard = fresh();
        let a = create(|| loop {}, TaskConfig { name: "a", priority: 3 }).unwrap();
        let b = create(|| loop {}, TaskConfig { name: "b", priority: 3 }).unwrap();
        assert_ne!(a, b);
        assert_eq!(state(a), TaskState::Ready);
    }

    #[test]
    fn no_free_slots_once_max_tasks_reached() {
        let _guard = fresh();
        // idle already occupies one slot.
        for _ in 1..crate::config::MAX_TASKS {
            create(|| loop {}, TaskConfig { name: "t", priority: 1 }).unwrap();
        }
        let err = create(|| loop {}, TaskConfig { name: "overflow", priority: 1 });
        assert_eq!(err, Err(Error::NoFree));
    }

    #[test]
    fn invalid_priority_rejected() {
        let _guard = fresh();
        let err = create(|| loop {}, TaskConfig { name: "bad", priority: 255 });
        assert_eq!(err, Err(Error::Invalid));
    }

    #[test]
    fn higher_priority_task_preempts_lower_on_schedule() {
        let _guard = fresh();
        let low = create(|| loop {}, TaskConfig { name: "low", priority: 1 }).unwrap();
        with_kernel(|k| {
            k.running = true;
            k.schedule();
        });
        assert_eq!(current(), Some(low));

        let high = create(|| loop {}, TaskConfig { name: "high", priority: 5 }).unwrap();
        assert_eq!(current(), Some(high));
    }

    #[test]
    fn yield_now_moves_task_to_tail_of_its_priority() {
        let _guard = fresh();
        let a = create(|| loop {}, TaskConfig { name: "a", priority: 2 }).unwrap();
        let b = create(|| loop {}, TaskConfig { name: "b", priority: 2 }).unwrap();
        with_kernel(|k| {
            k.running = true;
            k.schedule();
        });
        assert_eq!(current(), Some(a));
        yield_now();
        assert_eq!(current(), Some(b));
        yield_now();
        assert_eq!(current(), Some(a));
    }

    #[test]
    fn sleep_removes_from_ready_and_tick_wakes_it_after_exact_duration() {
        let _guard = fresh();
        let a = create(|| loop {}, TaskConfig { name: "a", priority: 2 }).unwrap();
        with_kernel(|k| {
            k.running = true;
            k.schedule();
        });
        assert_eq!(current(), Some(a));
        with_kernel(|k| k.current = Some(a));
        sleep(3).unwrap();
        assert_eq!(state(a), TaskState::Sleeping);
        tick();
        tick();
        assert_eq!(state(a), TaskState::Sleeping);
        tick();
        assert_eq!(state(a), TaskState::Ready);
    }

    #[test]
    fn delete_frees_the_slot_for_reuse() {
        let _guard = fresh();
        let a = create(|| loop {}, TaskConfig { name: "a", priority: 2 }).unwrap();
        delete(a).unwrap();
        assert_eq!(state(a), TaskState::Dead);
        let b = create(|| loop {}, TaskConfig { name: "b", priority: 2 }).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn set_priority_resplices_ready_queues() {
        let _guard = fresh();
        let a = create(|| loop {}, TaskConfig { name: "a", priority: 2 }).unwrap();
        let b = create(|| loop {}, TaskConfig { name: "b", priority: 3 }).unwrap();
        with_kernel(|k| {
            k.running = true;
            k.schedule();
        });
        assert_eq!(current(), Some(b));
        set_priority(a, 5).unwrap();
        assert_eq!(current(), Some(a));
        assert_eq!(priority(b).unwrap(), 3);
    }
}
