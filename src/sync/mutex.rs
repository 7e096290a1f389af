// Copyright (c) 2025 Sirocco Project Contributors
// SPDX-License-Identifier: Apache-2.0

//! Priority-inheritance mutex.
//!
//! An exclusive lock for cooperating tasks.  Three things distinguish it
//! from a bare binary semaphore:
//!
//! - **Recursion.**  The owner may acquire the lock again; a nesting counter
//!   tracks the depth, and the lock is released only when `post` has undone
//!   every `pend`.  The intermediate calls return [`Status::RecursiveLock`]
//!   so callers can tell the difference.
//! - **Priority inheritance.**  While a more urgent task waits for the
//!   lock, the owner runs at the waiter's priority.  The boost is applied
//!   the moment the waiter blocks, raised monotonically as more urgent
//!   waiters arrive, and undone exactly when the owner fully releases the
//!   lock.  This bounds priority inversion: the owner can be preempted only
//!   by tasks more urgent than every waiter.
//! - **Hand-off.**  Releasing a contended lock wakes the most urgent
//!   waiter, which takes ownership as it resumes.
//!
//! Every state transition happens inside the global critical section, and
//! the only point a caller can suspend is the block in
//! [`Mutex::pend_timed`]; each operation invokes the reschedule point after
//! its critical section closes, so scheduling follows ownership immediately.
//!
//! A [`Mutex`] is a cloneable handle; clone it into every task that uses
//! the lock.  The priority snapshot kept while the lock is held means a
//! mutex is meaningful only for tasks of one kernel instance.

use core::cell::RefCell;
use core::fmt;

use critical_section::{CriticalSection, Mutex as CsMutex};
use log::trace;

use crate::error::{Error, Result};
use crate::object::ObjectType;
use crate::pend::{self, PendObject, PendState};
use crate::sched::{self, Kernel, KernelShared, KernelState};
use crate::sync::Arc;
use crate::task::{TaskId, Priority, PRIO_INVALID};
use crate::time::{Forever, Timeout};

/// Non-failure outcome of an acquisition or release.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Status {
    /// Ownership changed: the lock was acquired, or fully released.
    Success,
    /// The caller already held the lock; only the recursion depth changed.
    RecursiveLock,
}

struct MutexState {
    /// Recursion depth; zero exactly when the lock is free.
    nesting: u32,
    owner: Option<TaskId>,
    /// The owner's priority when it first took the lock, restored on full
    /// release.  Meaningless while the lock is free.
    owner_orig_prio: Priority,
}

pub(crate) struct MutexObject {
    kernel: Arc<KernelShared>,
    pub(crate) pend: Arc<PendObject>,
    state: CsMutex<RefCell<MutexState>>,
}

impl MutexObject {
    /// Record `task` as a fresh owner at depth one.
    fn grant(this: &Arc<Self>, _cs: CriticalSection, k: &mut KernelState, st: &mut MutexState, task: TaskId) {
        st.nesting = 1;
        st.owner = Some(task);
        st.owner_orig_prio = k.tasks[task.0].prio;
        k.tasks[task.0].held.push(this.clone());
    }

    /// Clear ownership and put the outgoing owner's priority back: the
    /// deferred value if one was recorded while the task was boosted,
    /// otherwise the snapshot taken at first acquisition.
    fn release_owner(
        this: &Arc<Self>,
        cs: CriticalSection,
        k: &mut KernelState,
        st: &mut MutexState,
        unlink: bool,
    ) {
        let Some(owner) = st.owner.take() else {
            return;
        };
        let deferred = k.tasks[owner.0].prio_pending;
        if deferred != PRIO_INVALID {
            k.tasks[owner.0].prio_pending = PRIO_INVALID;
            trace!("task {}: applying deferred priority {}", k.tasks[owner.0].name, deferred);
            k.change_task_priority(cs, owner, deferred);
        } else if k.tasks[owner.0].prio != st.owner_orig_prio {
            k.change_task_priority(cs, owner, st.owner_orig_prio);
        }
        st.owner_orig_prio = PRIO_INVALID;
        if unlink {
            k.tasks[owner.0].held.retain(|m| !Arc::ptr_eq(m, this));
        }
    }

    /// Called by the scheduler when a task exits while still owning this
    /// lock.  Ownership is torn down and every waiter is woken with the
    /// owner-died reason; their pends fail rather than hang.
    pub(crate) fn release_on_owner_exit(this: &Arc<Self>, cs: CriticalSection, k: &mut KernelState) {
        let mut st = this.state.borrow_ref_mut(cs);
        if st.owner.is_none() {
            return;
        }
        Self::release_owner(this, cs, k, &mut st, false);
        st.nesting = 0;
        this.pend.wake_all(cs, k, PendState::OwnerDie);
    }
}

/// What `pend_timed` decided inside its critical section.
enum PendPath {
    Done(Result<Status>),
    Block(TaskId),
}

/// A mutual-exclusion lock with recursion and priority inheritance.
///
/// See the [module documentation](self) for semantics.
#[derive(Clone)]
pub struct Mutex {
    item: Arc<MutexObject>,
}

impl Mutex {
    /// Create a mutex on the given kernel: free, no owner, empty queue.
    pub fn create(kernel: &Kernel) -> Result<Mutex> {
        Ok(Mutex {
            item: Arc::new(MutexObject {
                kernel: kernel.shared.clone(),
                pend: Arc::new(PendObject::new(ObjectType::Mutex)),
                state: CsMutex::new(RefCell::new(MutexState {
                    nesting: 0,
                    owner: None,
                    owner_orig_prio: PRIO_INVALID,
                })),
            }),
        })
    }

    #[cfg(feature = "object-verify")]
    fn verify(&self) -> Result<()> {
        critical_section::with(|cs| {
            if self.item.pend.verify(cs, ObjectType::Mutex) {
                Ok(())
            } else {
                Err(Error::ObjectInvalid)
            }
        })
    }

    #[cfg(not(feature = "object-verify"))]
    fn verify(&self) -> Result<()> {
        Ok(())
    }

    /// Acquire the lock, waiting as long as necessary.
    ///
    /// Equivalent to [`pend_timed`] with [`Forever`].
    ///
    /// [`pend_timed`]: Mutex::pend_timed
    pub fn pend(&self) -> Result<Status> {
        self.pend_timed(Forever)
    }

    /// Acquire the lock, waiting at most `timeout`.
    ///
    /// Returns [`Status::Success`] on a fresh acquisition and
    /// [`Status::RecursiveLock`] when the caller already held the lock and
    /// only went one level deeper.  With [`NoWait`] a contended lock fails
    /// immediately with [`Error::WouldBlock`]; that polling form is the one
    /// acquisition allowed from interrupt context, since it can never
    /// block.  A bounded wait that expires fails with [`Error::Timeout`],
    /// and a waiter can also see [`Error::ObjectDestroyed`] or
    /// [`Error::OwnerDied`] if the lock or its owner goes away.
    ///
    /// While the caller waits, the owner is boosted to the caller's
    /// priority if it is less urgent.
    ///
    /// [`NoWait`]: crate::time::NoWait
    pub fn pend_timed<T>(&self, timeout: T) -> Result<Status>
    where
        T: Into<Timeout>,
    {
        let timeout: Timeout = timeout.into();
        self.verify()?;

        let me = match critical_section::with(|cs| {
            let mut k = self.item.kernel.state.borrow_ref_mut(cs);
            let mut st = self.item.state.borrow_ref_mut(cs);
            self.try_acquire(cs, &mut k, &mut st, timeout)
        }) {
            PendPath::Done(result) => return result,
            PendPath::Block(me) => me,
        };

        // The single suspension point.  We resume when a post hands the
        // lock over, the timeout expires, or the object is torn down.
        sched::reschedule(&self.item.kernel);

        let reason =
            critical_section::with(|cs| self.item.kernel.state.borrow_ref(cs).tasks[me.0].pend_state);
        pend::state_to_result(reason)?;

        // The lock was handed to us.  Take ownership, then re-check the
        // boost: a more urgent waiter may have arrived between the wake and
        // this point, and ownership must never leave the queue's most
        // urgent waiter effectively ahead of the owner.
        critical_section::with(|cs| {
            let mut k = self.item.kernel.state.borrow_ref_mut(cs);
            let mut st = self.item.state.borrow_ref_mut(cs);
            MutexObject::grant(&self.item, cs, &mut k, &mut st, me);
            let highest = self.item.pend.highest_pending_prio(cs, &k);
            if k.tasks[me.0].prio > highest {
                k.change_task_priority(cs, me, highest);
            }
        });
        Ok(Status::Success)
    }

    fn try_acquire(
        &self,
        cs: CriticalSection,
        k: &mut KernelState,
        st: &mut MutexState,
        timeout: Timeout,
    ) -> PendPath {
        let Some(me) = k.current else {
            return PendPath::Done(Err(Error::InvalidArgument));
        };

        // Any form that could block is meaningless in interrupt context.
        if !timeout.is_no_wait() && k.irq_nesting > 0 {
            return PendPath::Done(Err(Error::CalledFromInterrupt));
        }

        if st.nesting == 0 {
            // Uncontended: no waiters yet, so no boost to consider.
            MutexObject::grant(&self.item, cs, k, st, me);
            return PendPath::Done(Ok(Status::Success));
        }

        if st.owner == Some(me) {
            if st.nesting == u32::MAX {
                return PendPath::Done(Err(Error::NestingOverflow));
            }
            st.nesting += 1;
            return PendPath::Done(Ok(Status::RecursiveLock));
        }

        if timeout.is_no_wait() {
            return PendPath::Done(Err(Error::WouldBlock));
        }

        if k.sched_lock > 0 {
            // Blocking now would never be undone: with preemption off the
            // owner cannot run to release the lock.
            return PendPath::Done(Err(Error::SchedulerLocked));
        }

        let owner = st.owner.expect("an owned lock has an owner");
        let my_prio = k.tasks[me.0].prio;
        if k.tasks[owner.0].prio > my_prio {
            // Priority inversion: the owner is less urgent than we are.
            // Run it at our priority until it lets go.
            trace!(
                "task {}: inherits priority {} from task {}",
                k.tasks[owner.0].name,
                my_prio,
                k.tasks[me.0].name
            );
            k.change_task_priority(cs, owner, my_prio);
        }

        pend::block_task(&self.item.pend, cs, k, me, timeout);
        PendPath::Block(me)
    }

    /// Release one level of the lock.
    ///
    /// Fails with [`Error::NotOwner`] unless the caller holds the lock.
    /// While recursion remains the call returns [`Status::RecursiveLock`]
    /// and ownership is unchanged.  The final release restores the owner's
    /// priority (or applies a deferred change), and if tasks are waiting,
    /// hands the lock to the most urgent one, which resumes as the new
    /// owner.
    pub fn post(&self) -> Result<Status> {
        self.verify()?;
        let result = critical_section::with(|cs| {
            let mut k = self.item.kernel.state.borrow_ref_mut(cs);
            let mut st = self.item.state.borrow_ref_mut(cs);

            let me = k.current.ok_or(Error::NotOwner)?;
            if st.owner != Some(me) {
                return Err(Error::NotOwner);
            }
            if st.nesting == 0 {
                // Releasing an already-released lock.
                return Err(Error::NestingOverflow);
            }

            st.nesting -= 1;
            if st.nesting > 0 {
                return Ok(Status::RecursiveLock);
            }

            MutexObject::release_owner(&self.item, cs, &mut k, &mut st, true);

            if self.item.pend.is_empty(cs) {
                return Ok(Status::Success);
            }
            if let Some(next) = self.item.pend.wake_one(cs, &mut k, PendState::Post) {
                trace!("lock handed off to task {}", k.tasks[next.0].name);
            }
            Ok(Status::Success)
        });
        if matches!(result, Ok(Status::Success)) {
            // The release may have dropped our priority or readied a
            // waiter; either can change who should run.
            sched::reschedule(&self.item.kernel);
        }
        result
    }

    /// Destroy the mutex.
    ///
    /// Every blocked waiter is force-woken and fails its pend with
    /// [`Error::ObjectDestroyed`]; any owner is released and has its
    /// priority restored.  The object fails verification afterwards, so
    /// later calls through any handle return [`Error::ObjectInvalid`].
    pub fn destroy(&self) -> Result<()> {
        self.verify()?;
        critical_section::with(|cs| {
            let mut k = self.item.kernel.state.borrow_ref_mut(cs);
            let mut st = self.item.state.borrow_ref_mut(cs);
            if !self.item.pend.is_empty(cs) {
                self.item.pend.wake_all(cs, &mut k, PendState::Destroy);
            }
            self.item.pend.deinit(cs);
            st.nesting = 0;
            if st.owner.is_some() {
                MutexObject::release_owner(&self.item, cs, &mut k, &mut st, true);
            }
        });
        sched::reschedule(&self.item.kernel);
        Ok(())
    }

    /// The task currently owning the lock, if any.
    pub fn owner(&self) -> Option<TaskId> {
        critical_section::with(|cs| self.item.state.borrow_ref(cs).owner)
    }

    /// Current recursion depth; zero when the lock is free.
    pub fn nesting(&self) -> u32 {
        critical_section::with(|cs| self.item.state.borrow_ref(cs).nesting)
    }

    /// Number of tasks blocked waiting for the lock.
    pub fn waiter_count(&self) -> usize {
        critical_section::with(|cs| self.item.pend.len(cs))
    }
}

impl fmt::Debug for Mutex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        critical_section::with(|cs| {
            let st = self.item.state.borrow_ref(cs);
            write!(f, "Mutex {{ owner: {:?}, nesting: {} }}", st.owner, st.nesting)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sched::Kernel;

    #[test]
    fn pend_outside_task_context_is_rejected() {
        let kernel = Kernel::new();
        let m = Mutex::create(&kernel).unwrap();
        assert_eq!(m.pend(), Err(Error::InvalidArgument));
        assert_eq!(m.post(), Err(Error::NotOwner));
    }

    #[test]
    fn nesting_counter_saturates() {
        let kernel = Kernel::new();
        kernel.init_main(5).unwrap();
        let m = Mutex::create(&kernel).unwrap();
        assert_eq!(m.pend(), Ok(Status::Success));

        critical_section::with(|cs| {
            m.item.state.borrow_ref_mut(cs).nesting = u32::MAX;
        });
        assert_eq!(m.pend(), Err(Error::NestingOverflow));
        assert_eq!(m.nesting(), u32::MAX);
    }

    #[test]
    fn releasing_an_unheld_lock_is_guarded() {
        let kernel = Kernel::new();
        let me = kernel.init_main(5).unwrap();
        let m = Mutex::create(&kernel).unwrap();

        // Force the inconsistent shape directly; it cannot be reached
        // through the API, but the release path still refuses it.
        critical_section::with(|cs| {
            let mut st = m.item.state.borrow_ref_mut(cs);
            st.owner = Some(me);
            st.nesting = 0;
        });
        assert_eq!(m.post(), Err(Error::NestingOverflow));
    }

    #[cfg(feature = "object-verify")]
    #[test]
    fn destroyed_mutex_fails_verification() {
        let kernel = Kernel::new();
        kernel.init_main(5).unwrap();
        let m = Mutex::create(&kernel).unwrap();
        m.destroy().unwrap();
        assert_eq!(m.pend(), Err(Error::ObjectInvalid));
        assert_eq!(m.post(), Err(Error::ObjectInvalid));
        assert_eq!(m.destroy(), Err(Error::ObjectInvalid));
    }
}
