// Copyright (c) 2025 Sirocco Project Contributors
// SPDX-License-Identifier: Apache-2.0

//! Hosted context switch.
//!
//! Every task is backed by an OS thread, and the scheduler's choice of
//! current task decides which single thread is allowed to run: all others
//! sit in `thread::park`.  The baton changes hands in [`reschedule`], the
//! one place a task can suspend, which keeps the hosted kernel behaving
//! like a single cooperative core even though the host has real threads.
//!
//! Parking is tolerant of spurious wakeups; a thread only proceeds once the
//! scheduler actually names it current.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::thread;

use log::{error, trace};

use super::KernelShared;
use crate::sync::Arc;
use crate::sync::mutex::MutexObject;
use crate::task::{TaskId, TaskState};

/// Create the backing thread for a freshly spawned task.  The thread waits
/// until the scheduler makes the task current, runs the body, then exits
/// the task.
pub(crate) fn launch<F>(shared: Arc<KernelShared>, id: TaskId, name: &'static str, body: F)
where
    F: FnOnce() + Send + 'static,
{
    let their = shared.clone();
    let handle = thread::Builder::new()
        .name(name.into())
        .spawn(move || {
            wait_until_current(&their, id);
            if catch_unwind(AssertUnwindSafe(body)).is_err() {
                // Propagating would strand every parked thread, so tear the
                // task down and let its owner notice the missing results.
                error!("task {} panicked; tearing it down", name);
            }
            exit_current(&their, id);
        })
        .expect("failed to create a task thread");
    critical_section::with(|cs| {
        let mut k = shared.state.borrow_ref_mut(cs);
        k.tasks[id.0].thread = Some(handle.thread().clone());
    });
}

/// Hand the processor to the most urgent ready task.
///
/// Returns immediately if the scheduler is locked or the caller is still
/// the best choice.  Otherwise the caller's thread parks until the caller
/// is made current again.
pub(crate) fn reschedule(shared: &Arc<KernelShared>) {
    let Some(me) = critical_section::with(|cs| shared.state.borrow_ref(cs).current) else {
        return;
    };
    let target = critical_section::with(|cs| {
        let mut k = shared.state.borrow_ref_mut(cs);
        if k.sched_lock > 0 {
            return None;
        }
        let next = match k.highest_ready() {
            Some(next) => next,
            None => panic!("no runnable task: every task is blocked or dead"),
        };
        if next == me {
            return None;
        }
        trace!("switch {} -> {}", k.tasks[me.0].name, k.tasks[next.0].name);
        k.current = Some(next);
        Some(
            k.tasks[next.0]
                .thread
                .clone()
                .expect("ready task has no backing thread"),
        )
    });
    let Some(next_thread) = target else {
        return;
    };
    next_thread.unpark();
    wait_until_current(shared, me);
}

fn wait_until_current(shared: &Arc<KernelShared>, me: TaskId) {
    loop {
        let current = critical_section::with(|cs| shared.state.borrow_ref(cs).current);
        if current == Some(me) {
            return;
        }
        thread::park();
    }
}

/// Terminate the current task: mark it dead, release everything it still
/// owns, and hand the processor on.  Never returns to the task.
fn exit_current(shared: &Arc<KernelShared>, me: TaskId) {
    let target = critical_section::with(|cs| {
        let mut k = shared.state.borrow_ref_mut(cs);
        k.remove_ready(me);
        {
            let t = &mut k.tasks[me.0];
            trace!("task {} exited", t.name);
            t.state = TaskState::DEAD;
            t.thread = None;
            t.wake_at = None;
        }
        // A task may exit while still owning locks; waiters must not hang.
        let held = core::mem::take(&mut k.tasks[me.0].held);
        for m in held {
            MutexObject::release_on_owner_exit(&m, cs, &mut k);
        }
        let next = match k.highest_ready() {
            Some(next) => next,
            None => panic!("no runnable task: every task is blocked or dead"),
        };
        k.current = Some(next);
        k.tasks[next.0]
            .thread
            .clone()
            .expect("ready task has no backing thread")
    });
    target.unpark();
}
