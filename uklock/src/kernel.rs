// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! The kernel ulock ABI: blocking and waking on a shared lock word.

use std::sync::atomic::AtomicU32;
use std::time::Duration;
use thiserror::Error;
use ukdef::Uid;

/// Deadline for a blocking ulock wait.
#[derive(Copy, Clone, Debug)]
pub enum Timeout {
    /// Wait until woken or cancelled.
    Infinite,
    /// Wait at most this long.
    Relative(Duration),
    /// Wait until this point on the kernel's monotonic clock.
    Absolute(Duration),
}

/// Wait-queue discipline the kernel applies to a lock word.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum UlockKind {
    /// Ownership handoff: a successful wait leaves the caller owning the
    /// word.
    Mutex,
    /// Plain notification: a successful wait means the word left the
    /// blocked state.
    Event,
}

/// How a kernel ulock wait ended.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum UlockWait {
    /// Woken by a waker; for [`UlockKind::Mutex`], ownership was handed
    /// over.
    Woken,
    /// The lock word changed before the kernel could block; retry the
    /// user-space path.
    Stale,
    /// The wait was cancelled from outside. Not an error: the caller
    /// decides whether to retry or give up.
    Cancelled,
    /// The timeout elapsed.
    TimedOut,
}

/// An unexpected kernel completion code. Cancellation and timeouts are
/// [`UlockWait`] outcomes, never errors.
#[derive(Copy, Clone, PartialEq, Eq, Debug, Error)]
#[error("kernel ulock error {0:#x}")]
pub struct KernelError(pub u32);

/// The microkernel's block/wake primitive for user-space locks.
///
/// All contention resolution goes through these calls; the primitives built
/// on top never spin beyond their initial compare-and-swap attempt.
pub trait UlockKernel {
    /// Blocks the calling thread on `word` until woken, cancelled, or timed
    /// out.
    ///
    /// `caller` is the blocking thread's identity, used for mutex ownership
    /// handoff and as the [`Self::cancel_wait`] target.
    fn ulock_wait(
        &self,
        word: &AtomicU32,
        kind: UlockKind,
        caller: Uid,
        timeout: Timeout,
    ) -> Result<UlockWait, KernelError>;

    /// Wakes one waiter blocked on `word`. For mutexes this transfers
    /// ownership to the woken thread.
    fn ulock_wake(&self, word: &AtomicU32, kind: UlockKind) -> Result<(), KernelError>;

    /// Forces `target` out of a blocked [`Self::ulock_wait`]; the victim
    /// observes [`UlockWait::Cancelled`].
    fn cancel_wait(&self, target: Uid) -> Result<(), KernelError>;
}
