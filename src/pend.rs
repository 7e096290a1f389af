// Copyright (c) 2025 Sirocco Project Contributors
// SPDX-License-Identifier: Apache-2.0

//! Wait queues.
//!
//! A `PendObject` is the blocking half of every waitable kernel object: a
//! verification header plus a queue of blocked tasks.  Waiters are kept
//! ordered by priority, most urgent first; among waiters of equal priority
//! the queue is FIFO, first blocked is first woken.  That ordering is part
//! of the contract: whoever wakes one waiter always gets the most urgent
//! pending task in O(1).
//!
//! All access happens inside a critical section.  The queue stores only
//! [`TaskId`] handles; task records stay in the scheduler's arena.

use alloc::vec::Vec;

use core::cell::RefCell;

use critical_section::{CriticalSection, Mutex as CsMutex};

use crate::error::{Error, Result};
use crate::object::{ObjectHeader, ObjectType};
use crate::sched::KernelState;
use crate::sync::Arc;
use crate::task::{Priority, TaskId, TaskState, PRIO_INVALID};
use crate::time::Timeout;

/// Why a blocked task was woken.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub(crate) enum PendState {
    /// Not woken yet, or woken outside a wait (sleep expiry).
    None,
    /// The object was posted to the task; the wait succeeded.
    Post,
    /// The wait deadline expired.
    Timeout,
    /// The object was destroyed out from under the waiter.
    Destroy,
    /// The owning task exited without releasing the object.
    OwnerDie,
}

/// Translate a wake reason into the caller-visible result of the wait.
pub(crate) fn state_to_result(state: PendState) -> Result<()> {
    match state {
        PendState::None | PendState::Post => Ok(()),
        PendState::Timeout => Err(Error::Timeout),
        PendState::Destroy => Err(Error::ObjectDestroyed),
        PendState::OwnerDie => Err(Error::OwnerDied),
    }
}

pub(crate) struct PendObject {
    inner: CsMutex<RefCell<PendInner>>,
}

struct PendInner {
    header: ObjectHeader,
    waiters: Vec<TaskId>,
}

impl PendInner {
    fn insert_sorted(&mut self, k: &KernelState, id: TaskId) {
        let prio = k.tasks[id.0].prio;
        let at = self
            .waiters
            .iter()
            .position(|w| k.tasks[w.0].prio > prio)
            .unwrap_or(self.waiters.len());
        self.waiters.insert(at, id);
    }
}

impl PendObject {
    pub(crate) fn new(tag: ObjectType) -> PendObject {
        PendObject {
            inner: CsMutex::new(RefCell::new(PendInner {
                header: ObjectHeader::new(tag),
                waiters: Vec::new(),
            })),
        }
    }

    pub(crate) fn verify(&self, cs: CriticalSection, tag: ObjectType) -> bool {
        self.inner.borrow_ref(cs).header.verify(tag)
    }

    /// Tear the object down.  Any remaining waiters are dropped from the
    /// queue without being woken; callers drain the queue first.
    pub(crate) fn deinit(&self, cs: CriticalSection) {
        let mut q = self.inner.borrow_ref_mut(cs);
        q.header.deinit();
        q.waiters.clear();
    }

    pub(crate) fn is_empty(&self, cs: CriticalSection) -> bool {
        self.inner.borrow_ref(cs).waiters.is_empty()
    }

    pub(crate) fn len(&self, cs: CriticalSection) -> usize {
        self.inner.borrow_ref(cs).waiters.len()
    }

    /// Priority of the most urgent waiter, or `PRIO_INVALID` if none.
    pub(crate) fn highest_pending_prio(&self, cs: CriticalSection, k: &KernelState) -> Priority {
        self.inner
            .borrow_ref(cs)
            .waiters
            .first()
            .map(|w| k.tasks[w.0].prio)
            .unwrap_or(PRIO_INVALID)
    }

    fn insert(&self, cs: CriticalSection, k: &KernelState, id: TaskId) {
        self.inner.borrow_ref_mut(cs).insert_sorted(k, id);
    }

    /// Drop a task from the queue, if present.
    pub(crate) fn remove(&self, cs: CriticalSection, id: TaskId) {
        self.inner.borrow_ref_mut(cs).waiters.retain(|w| *w != id);
    }

    /// Re-sort one waiter after its priority changed.
    pub(crate) fn reposition(&self, cs: CriticalSection, k: &KernelState, id: TaskId) {
        let mut q = self.inner.borrow_ref_mut(cs);
        if let Some(at) = q.waiters.iter().position(|w| *w == id) {
            q.waiters.remove(at);
            q.insert_sorted(k, id);
        }
    }

    /// Wake the most urgent waiter with the given reason.  Returns the task
    /// woken, or `None` if the queue was empty.
    pub(crate) fn wake_one(
        &self,
        cs: CriticalSection,
        k: &mut KernelState,
        reason: PendState,
    ) -> Option<TaskId> {
        let id = {
            let mut q = self.inner.borrow_ref_mut(cs);
            if q.waiters.is_empty() {
                return None;
            }
            q.waiters.remove(0)
        };
        wake_task(k, id, reason);
        Some(id)
    }

    /// Wake every waiter with the given reason.
    pub(crate) fn wake_all(&self, cs: CriticalSection, k: &mut KernelState, reason: PendState) {
        while self.wake_one(cs, k, reason).is_some() {}
    }
}

/// Block a task on `queue` with the given timeout.  The task leaves the
/// ready queue here; the caller suspends it at the next reschedule point.
pub(crate) fn block_task(
    queue: &Arc<PendObject>,
    cs: CriticalSection,
    k: &mut KernelState,
    id: TaskId,
    timeout: Timeout,
) {
    k.remove_ready(id);
    let deadline = timeout.delay().map(|d| k.now + d);
    let t = &mut k.tasks[id.0];
    t.state.remove(TaskState::READY);
    t.state.insert(TaskState::PENDING);
    t.pend_state = PendState::None;
    t.pend_on = Some(queue.clone());
    t.wake_at = deadline;
    queue.insert(cs, &*k, id);
}

/// Make a blocked or sleeping task ready again, recording why.
pub(crate) fn wake_task(k: &mut KernelState, id: TaskId, reason: PendState) {
    let t = &mut k.tasks[id.0];
    t.pend_state = reason;
    t.pend_on = None;
    t.wake_at = None;
    t.state.remove(TaskState::PENDING | TaskState::SLEEPING);
    t.state.insert(TaskState::READY);
    k.insert_ready(id);
}
