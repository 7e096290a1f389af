// Copyright (c) 2025 Sirocco Project Contributors
// SPDX-License-Identifier: Apache-2.0

//! Sirocco is a small cooperative real-time kernel core.
//!
//! The kernel schedules tasks strictly by priority (a lower numeric value is
//! more urgent), measures time in ticks, and blocks tasks on priority-ordered
//! wait queues.  Its centerpiece is [`sync::Mutex`], an exclusive lock with
//! recursive acquisition and priority inheritance: while a task waits for a
//! lock held by a less urgent task, the holder runs at the waiter's priority,
//! which bounds how long the waiter can be held up by unrelated work.
//!
//! Scheduling is cooperative.  A task keeps the processor until it blocks,
//! sleeps, yields, or exits; at each of those points the most urgent ready
//! task runs next.  On the hosted port (the `std` feature, on by default)
//! every task is backed by an OS thread and exactly one of those threads is
//! runnable at a time, so the kernel behaves the same under `cargo test` as
//! it would on a single embedded core.
//!
//! ```
//! use sirocco::sched::Kernel;
//! use sirocco::sync::{Mutex, Status};
//!
//! let kernel = Kernel::new();
//! kernel.init_main(8).unwrap();
//!
//! let lock = Mutex::create(&kernel).unwrap();
//! assert_eq!(lock.pend(), Ok(Status::Success));
//! assert_eq!(lock.post(), Ok(Status::Success));
//! ```

#![cfg_attr(not(feature = "std"), no_std)]
#![deny(missing_docs)]

extern crate alloc;

pub mod error;
mod object;
mod pend;
pub mod sched;
pub mod sync;
pub mod task;
pub mod time;

pub use error::{Error, Result};
