// Copyright (c) 2025 Sirocco Project Contributors
// SPDX-License-Identifier: Apache-2.0

//! Synchronization primitives.
//!
//! The centerpiece is [`Mutex`], an exclusive lock with recursive
//! acquisition and priority inheritance.  This module also re-exports the
//! reference-counting and atomic types the rest of the kernel is built on,
//! so applications use the same ones.

pub mod atomic {
    //! Re-export portable atomic.
    //!
    //! Although `core` contains a
    //! [`sync::atomic`](https://doc.rust-lang.org/stable/core/sync/atomic/index.html)
    //! module, those types are missing on targets without atomic
    //! instructions.  The [`portable-atomic`](https://crates.io/crates/portable-atomic)
    //! crate re-exports the core types where they exist and fills them in
    //! where they don't, so this is the atomics module kernel code uses.

    pub use portable_atomic::*;
}

pub use portable_atomic_util::Arc;
pub use portable_atomic_util::Weak;

pub(crate) mod mutex;

pub use mutex::{Mutex, Status};
