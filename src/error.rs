// Copyright (c) 2025 Sirocco Project Contributors
// SPDX-License-Identifier: Apache-2.0

//! # Kernel errors
//!
//! Every fallible kernel service returns [`Result`].  The error cases are a
//! closed enum rather than a wrapped integer code: callers match on the
//! condition they care about, and nothing is lost translating to and from an
//! errno space.  A failing call never leaves the object it was invoked on in
//! a half-changed state.

use core::fmt;

/// An error returned by a kernel service.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Error {
    /// An argument was unusable: an out-of-range priority, a task handle
    /// that names no task, or a service invoked outside task context.
    InvalidArgument,
    /// The object failed runtime verification.  Either it was never
    /// initialized or it has been destroyed.
    ObjectInvalid,
    /// A blocking wait was requested from interrupt context.
    CalledFromInterrupt,
    /// The object is unavailable and the caller asked not to wait.
    WouldBlock,
    /// A blocking wait was requested while the scheduler is locked; the
    /// caller could never be resumed.
    SchedulerLocked,
    /// The recursive-lock counter would overflow, or a release was attempted
    /// on a lock that is not held.
    NestingOverflow,
    /// A lock release was attempted by a task that does not own the lock.
    NotOwner,
    /// The wait timed out before the object became available.
    Timeout,
    /// The object was destroyed while the caller was waiting on it.
    ObjectDestroyed,
    /// The task owning the object exited while the caller was waiting on it.
    OwnerDied,
}

impl core::error::Error for Error {}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let msg = match self {
            Error::InvalidArgument => "invalid argument",
            Error::ObjectInvalid => "object failed verification",
            Error::CalledFromInterrupt => "blocking call from interrupt context",
            Error::WouldBlock => "operation would block",
            Error::SchedulerLocked => "scheduler is locked",
            Error::NestingOverflow => "lock nesting overflow",
            Error::NotOwner => "caller does not own the lock",
            Error::Timeout => "wait timed out",
            Error::ObjectDestroyed => "object destroyed while waiting",
            Error::OwnerDied => "lock owner exited while waiting",
        };
        write!(f, "{}", msg)
    }
}

/// Wraps a value with a possible kernel error.
pub type Result<T> = core::result::Result<T, Error>;
