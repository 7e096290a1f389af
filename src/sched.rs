// Copyright (c) 2025 Sirocco Project Contributors
// SPDX-License-Identifier: Apache-2.0

//! # The scheduler
//!
//! A [`Kernel`] owns the task arena, the ready queue, and kernel time.  It
//! schedules cooperatively and strictly by priority: the most urgent ready
//! task runs, and it keeps running until it blocks, sleeps, yields, or
//! exits.  Those are the only reschedule points; between them a task cannot
//! lose the processor.
//!
//! All scheduler state is guarded by the global critical section, the same
//! one every synchronization object uses for its own state.  That single
//! guard is what lets a lock mutate its record, adjust an owner's priority,
//! and move tasks between queues as one atomic step.
//!
//! `Kernel` is a cheap cloneable handle; clone it into every task that needs
//! to call kernel services.
//!
//! ## Priorities
//!
//! Priority changes go through one narrow capability,
//! [`Kernel::change_task_priority`], which also repositions the task in
//! whatever queue currently orders it.  [`Kernel::defer_priority`] records a
//! change for a task whose effective priority is currently controlled by a
//! lock it owns; the lock applies the deferred value when the task fully
//! releases it.
//!
//! ## Time
//!
//! The kernel has no tick source of its own.  Whoever embeds it calls
//! [`Kernel::tick_announce`] to advance time; expired sleeps and bounded
//! waits wake there, timed-out waiters with [`Error::Timeout`] recorded as
//! their wake reason.

use alloc::vec::Vec;

use core::cell::RefCell;

use critical_section::{CriticalSection, Mutex as CsMutex};
use log::trace;

use crate::error::{Error, Result};
use crate::pend::{self, PendState};
use crate::sync::Arc;
use crate::task::{Priority, Task, TaskId, TaskState, PRIO_INVALID};
use crate::time::{Duration, Tick, Timeout};

cfg_if::cfg_if! {
    if #[cfg(feature = "std")] {
        mod port;

        /// Pick the next task and switch to it.  This is where the calling
        /// task may suspend; it returns once the caller is current again.
        pub(crate) fn reschedule(shared: &Arc<KernelShared>) {
            port::reschedule(shared);
        }
    } else {
        /// Without a port there is no execution context to switch; wake
        /// order alone decides who would run, so this is a decision point
        /// with nothing to suspend.
        pub(crate) fn reschedule(_shared: &Arc<KernelShared>) {}
    }
}

/// Scheduler state, one instance per kernel, inside the critical section.
pub(crate) struct KernelState {
    pub(crate) tasks: Vec<Task>,
    /// Ready tasks, most urgent first, FIFO among equal priorities.
    pub(crate) ready: Vec<TaskId>,
    pub(crate) current: Option<TaskId>,
    pub(crate) sched_lock: u32,
    pub(crate) irq_nesting: u32,
    pub(crate) now: Tick,
}

impl KernelState {
    pub(crate) fn new() -> KernelState {
        KernelState {
            tasks: Vec::new(),
            ready: Vec::new(),
            current: None,
            sched_lock: 0,
            irq_nesting: 0,
            now: 0,
        }
    }

    pub(crate) fn insert_ready(&mut self, id: TaskId) {
        let prio = self.tasks[id.0].prio;
        let at = self
            .ready
            .iter()
            .position(|t| self.tasks[t.0].prio > prio)
            .unwrap_or(self.ready.len());
        self.ready.insert(at, id);
    }

    pub(crate) fn remove_ready(&mut self, id: TaskId) {
        if let Some(at) = self.ready.iter().position(|t| *t == id) {
            self.ready.remove(at);
        }
    }

    pub(crate) fn highest_ready(&self) -> Option<TaskId> {
        self.ready.first().copied()
    }

    /// Change a task's effective priority and reposition it in whatever
    /// queue orders it.  Does not reschedule; callers do that once their
    /// critical section closes.
    pub(crate) fn change_task_priority(
        &mut self,
        cs: CriticalSection,
        id: TaskId,
        new_prio: Priority,
    ) {
        let (state, queue) = {
            let t = &mut self.tasks[id.0];
            if t.prio == new_prio {
                return;
            }
            trace!("task {}: priority {} -> {}", t.name, t.prio, new_prio);
            t.prio = new_prio;
            (t.state, t.pend_on.clone())
        };
        if state.contains(TaskState::READY) {
            self.remove_ready(id);
            self.insert_ready(id);
        } else if state.contains(TaskState::PENDING) {
            if let Some(q) = queue {
                q.reposition(cs, self, id);
            }
        }
    }
}

pub(crate) struct KernelShared {
    pub(crate) state: CsMutex<RefCell<KernelState>>,
}

/// Handle to a kernel instance.
///
/// All methods are callable from task context; the handful that are also
/// meaningful from interrupt context say so.
#[derive(Clone)]
pub struct Kernel {
    pub(crate) shared: Arc<KernelShared>,
}

impl Kernel {
    /// Create an empty kernel with no tasks.
    pub fn new() -> Kernel {
        Kernel {
            shared: Arc::new(KernelShared {
                state: CsMutex::new(RefCell::new(KernelState::new())),
            }),
        }
    }

    fn with_state<R>(&self, f: impl FnOnce(CriticalSection, &mut KernelState) -> R) -> R {
        critical_section::with(|cs| {
            let mut k = self.shared.state.borrow_ref_mut(cs);
            f(cs, &mut k)
        })
    }

    /// Adopt the calling thread as the kernel's initial task.
    ///
    /// Must be called exactly once, before any other task exists.  Fails
    /// with [`Error::InvalidArgument`] on a second call or on the reserved
    /// priority.
    #[cfg(feature = "std")]
    pub fn init_main(&self, prio: Priority) -> Result<TaskId> {
        if prio == PRIO_INVALID {
            return Err(Error::InvalidArgument);
        }
        self.with_state(|_cs, k| {
            if k.current.is_some() {
                return Err(Error::InvalidArgument);
            }
            let id = TaskId(k.tasks.len());
            let mut main = Task::new("main", prio);
            main.state = TaskState::READY;
            main.thread = Some(std::thread::current());
            k.tasks.push(main);
            k.insert_ready(id);
            k.current = Some(id);
            Ok(id)
        })
    }

    /// Create a task running `body` at `prio`.
    ///
    /// The new task is ready immediately; if it is more urgent than the
    /// caller, the caller is preempted right here and resumes only once the
    /// new task blocks or exits.  A task that returns from its body exits,
    /// releasing any locks it still owns.
    #[cfg(feature = "std")]
    pub fn spawn<F>(&self, name: &'static str, prio: Priority, body: F) -> Result<TaskId>
    where
        F: FnOnce() + Send + 'static,
    {
        if prio == PRIO_INVALID {
            return Err(Error::InvalidArgument);
        }
        let id = self.with_state(|_cs, k| {
            if k.current.is_none() {
                return Err(Error::InvalidArgument);
            }
            let id = TaskId(k.tasks.len());
            let mut t = Task::new(name, prio);
            t.state = TaskState::READY;
            k.tasks.push(t);
            k.insert_ready(id);
            Ok(id)
        })?;
        port::launch(self.shared.clone(), id, name, body);
        reschedule(&self.shared);
        Ok(id)
    }

    /// Handle of the task currently running, if the kernel has started.
    pub fn current(&self) -> Option<TaskId> {
        self.with_state(|_cs, k| k.current)
    }

    /// Effective priority of a task, or [`PRIO_INVALID`] for a handle that
    /// names no task.
    pub fn priority_of(&self, id: TaskId) -> Priority {
        self.with_state(|_cs, k| k.tasks.get(id.0).map(|t| t.prio).unwrap_or(PRIO_INVALID))
    }

    /// Change a task's effective priority.
    ///
    /// The task is repositioned in its ready or wait queue, and the caller
    /// is preempted here if the change makes another task the most urgent.
    pub fn change_task_priority(&self, id: TaskId, prio: Priority) -> Result<()> {
        if prio == PRIO_INVALID {
            return Err(Error::InvalidArgument);
        }
        self.with_state(|cs, k| {
            if id.0 >= k.tasks.len() {
                return Err(Error::InvalidArgument);
            }
            k.change_task_priority(cs, id, prio);
            Ok(())
        })?;
        reschedule(&self.shared);
        Ok(())
    }

    /// Record a priority to apply when `id` next fully releases a lock it
    /// owns.  Overwrites any previously deferred value.
    pub fn defer_priority(&self, id: TaskId, prio: Priority) -> Result<()> {
        if prio == PRIO_INVALID {
            return Err(Error::InvalidArgument);
        }
        self.with_state(|_cs, k| {
            let t = k.tasks.get_mut(id.0).ok_or(Error::InvalidArgument)?;
            t.prio_pending = prio;
            Ok(())
        })
    }

    /// Lock the scheduler, disabling preemption.  Nests.
    pub fn sched_lock(&self) {
        self.with_state(|_cs, k| k.sched_lock += 1);
    }

    /// Undo one [`sched_lock`]; rescheduling resumes when the count reaches
    /// zero, and the caller is preempted here if it is no longer the most
    /// urgent ready task.
    ///
    /// [`sched_lock`]: Kernel::sched_lock
    pub fn sched_unlock(&self) {
        let unlocked = self.with_state(|_cs, k| {
            k.sched_lock = k.sched_lock.saturating_sub(1);
            k.sched_lock == 0
        });
        if unlocked {
            reschedule(&self.shared);
        }
    }

    /// Whether the scheduler is currently locked.
    pub fn is_locked(&self) -> bool {
        self.with_state(|_cs, k| k.sched_lock > 0)
    }

    /// Enter simulated interrupt context.  Nests.
    pub fn irq_enter(&self) {
        self.with_state(|_cs, k| k.irq_nesting += 1);
    }

    /// Leave simulated interrupt context.
    pub fn irq_exit(&self) {
        self.with_state(|_cs, k| k.irq_nesting = k.irq_nesting.saturating_sub(1));
    }

    /// Whether execution is in (simulated) interrupt context.
    pub fn in_irq(&self) -> bool {
        self.with_state(|_cs, k| k.irq_nesting > 0)
    }

    /// Kernel time, in ticks since the kernel was created.
    pub fn now(&self) -> Tick {
        self.with_state(|_cs, k| k.now)
    }

    /// Yield the processor to tasks of equal urgency.
    ///
    /// The caller goes to the back of its priority class; with no other
    /// ready task of the same priority this returns immediately.
    #[cfg(feature = "std")]
    pub fn yield_now(&self) {
        self.with_state(|_cs, k| {
            if let Some(me) = k.current {
                k.remove_ready(me);
                k.insert_ready(me);
            }
        });
        reschedule(&self.shared);
    }

    /// Put the current task to sleep for `d` ticks of kernel time.
    ///
    /// A zero-length sleep degenerates to [`yield_now`].
    ///
    /// [`yield_now`]: Kernel::yield_now
    #[cfg(feature = "std")]
    pub fn sleep(&self, d: Duration) -> Result<()> {
        let timeout: Timeout = d.into();
        let Some(delay) = timeout.delay() else {
            self.yield_now();
            return Ok(());
        };
        self.with_state(|_cs, k| {
            if k.irq_nesting > 0 {
                return Err(Error::CalledFromInterrupt);
            }
            if k.sched_lock > 0 {
                return Err(Error::SchedulerLocked);
            }
            let me = k.current.ok_or(Error::InvalidArgument)?;
            k.remove_ready(me);
            let t = &mut k.tasks[me.0];
            t.state.remove(TaskState::READY);
            t.state.insert(TaskState::SLEEPING);
            t.wake_at = Some(k.now + delay);
            Ok(())
        })?;
        reschedule(&self.shared);
        Ok(())
    }

    /// Advance kernel time by `ticks` and wake everything that came due.
    ///
    /// Sleeps simply end; bounded waits that expire here resume their
    /// waiter with [`Error::Timeout`], after dropping it from the wait
    /// queue it was blocked on.
    pub fn tick_announce(&self, ticks: Tick) {
        self.with_state(|cs, k| {
            k.now += ticks;
            let now = k.now;
            for i in 0..k.tasks.len() {
                let due = match k.tasks[i].wake_at {
                    Some(at) => at <= now,
                    None => false,
                };
                if !due || k.tasks[i].state.contains(TaskState::DEAD) {
                    continue;
                }
                let id = TaskId(i);
                if k.tasks[i].state.contains(TaskState::PENDING) {
                    if let Some(q) = k.tasks[i].pend_on.clone() {
                        q.remove(cs, id);
                    }
                    trace!("task {}: wait timed out", k.tasks[i].name);
                    pend::wake_task(k, id, PendState::Timeout);
                } else if k.tasks[i].state.contains(TaskState::SLEEPING) {
                    pend::wake_task(k, id, PendState::None);
                }
            }
        });
        reschedule(&self.shared);
    }
}

impl Default for Kernel {
    fn default() -> Kernel {
        Kernel::new()
    }
}
