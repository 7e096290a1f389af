// Copyright (c) 2025 Sirocco Project Contributors
// SPDX-License-Identifier: Apache-2.0

//! # Tasks
//!
//! A task is the unit of scheduling.  Task records live in an arena owned by
//! the scheduler; everything else in the kernel refers to a task through its
//! [`TaskId`] handle, never through a pointer into the arena.
//!
//! A task's `prio` field is its *effective* priority and may be raised above
//! what the task was created with while it owns a contended lock.  The
//! original value is kept by the lock and restored when the task releases it;
//! see [`crate::sync::Mutex`].

use alloc::vec::Vec;

use bitflags::bitflags;

use crate::pend::{PendObject, PendState};
use crate::sync::mutex::MutexObject;
use crate::sync::Arc;
use crate::time::Tick;

/// A scheduling priority.  Lower numeric values are more urgent.
pub type Priority = u8;

/// The reserved "no priority" sentinel.  No task may be created with this
/// priority; it marks an absent deferred priority and the result of querying
/// a handle that names no task.
pub const PRIO_INVALID: Priority = u8::MAX;

/// Handle to a task in the scheduler's arena.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct TaskId(pub(crate) usize);

bitflags! {
    /// Scheduling state of a task.
    #[derive(Clone, Copy, PartialEq, Eq, Debug)]
    pub(crate) struct TaskState: u8 {
        /// Eligible to run; a member of the ready queue.
        const READY = 1 << 0;
        /// Blocked on a wait queue.
        const PENDING = 1 << 1;
        /// Waiting for a tick deadline only.
        const SLEEPING = 1 << 2;
        /// Exited; never scheduled again.
        const DEAD = 1 << 3;
    }
}

pub(crate) struct Task {
    pub(crate) name: &'static str,
    /// Effective priority, including any inheritance boost.
    pub(crate) prio: Priority,
    /// Deferred priority to apply when the task fully releases a lock;
    /// `PRIO_INVALID` when no change is outstanding.
    pub(crate) prio_pending: Priority,
    pub(crate) state: TaskState,
    /// Why the task was last woken from a wait queue.
    pub(crate) pend_state: PendState,
    /// The wait queue the task is blocked on, if any.  Kept here so tick
    /// expiry can remove the task from that queue.
    pub(crate) pend_on: Option<Arc<PendObject>>,
    /// Tick deadline for a bounded wait or sleep.
    pub(crate) wake_at: Option<Tick>,
    /// Locks this task currently owns.
    pub(crate) held: Vec<Arc<MutexObject>>,
    /// Backing thread on the hosted port.
    #[cfg(feature = "std")]
    pub(crate) thread: Option<std::thread::Thread>,
}

impl Task {
    pub(crate) fn new(name: &'static str, prio: Priority) -> Task {
        Task {
            name,
            prio,
            prio_pending: PRIO_INVALID,
            state: TaskState::empty(),
            pend_state: PendState::None,
            pend_on: None,
            wake_at: None,
            held: Vec::new(),
            #[cfg(feature = "std")]
            thread: None,
        }
    }
}
