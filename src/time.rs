// Copyright (c) 2025 Sirocco Project Contributors
// SPDX-License-Identifier: Apache-2.0

//! # Kernel time
//!
//! The kernel counts time in ticks.  Tick arithmetic is done with the types
//! from the `fugit` crate, which keeps the tick rate in the type and makes
//! unit mistakes a compile error.
//!
//! Blocking services take anything that converts [`Into`] a [`Timeout`]:
//! [`Forever`] to wait indefinitely, [`NoWait`] to poll, or a [`Duration`]
//! for a bounded wait.  A zero-length `Duration` converts to the same value
//! as [`NoWait`].

/// Tick rate of the kernel clock, in ticks per second.
pub const SYS_FREQUENCY: u32 = 1000;

/// A count of kernel ticks.
pub type Tick = u64;

/// A span of time, measured in kernel ticks.
pub type Duration = fugit::TimerDurationU64<SYS_FREQUENCY>;

/// The timeout argument accepted by blocking services.
///
/// Construct one through the conversions from [`Forever`], [`NoWait`], or
/// [`Duration`] rather than directly.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct Timeout(pub(crate) i64);

impl Timeout {
    /// True if this timeout waits indefinitely.
    pub fn is_forever(self) -> bool {
        self.0 < 0
    }

    /// True if this timeout does not wait at all.
    pub fn is_no_wait(self) -> bool {
        self.0 == 0
    }

    /// The bounded delay in ticks, or `None` for the forever and no-wait
    /// sentinels.
    pub(crate) fn delay(self) -> Option<Tick> {
        if self.0 > 0 {
            Some(self.0 as Tick)
        } else {
            None
        }
    }
}

/// Represents an infinite timeout.  Calls using this value wait as long as
/// necessary for the operation to complete.
#[derive(Clone, Copy, Default, Debug)]
pub struct Forever;

/// Represents a null timeout.  Calls using this value do not wait if the
/// operation cannot be performed immediately.
#[derive(Clone, Copy, Default, Debug)]
pub struct NoWait;

impl From<Forever> for Timeout {
    fn from(_: Forever) -> Timeout {
        Timeout(-1)
    }
}

impl From<NoWait> for Timeout {
    fn from(_: NoWait) -> Timeout {
        Timeout(0)
    }
}

impl From<Duration> for Timeout {
    fn from(value: Duration) -> Timeout {
        // Saturate rather than wrap; a delay this long is forever in
        // everything but name, and negative values are sentinels.
        let ticks = value.ticks().min(i64::MAX as u64);
        Timeout(ticks as i64)
    }
}
