// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! The single-waiter user event.

use crate::kernel::KernelError;
use crate::kernel::Timeout;
use crate::kernel::UlockKernel;
use crate::kernel::UlockKind;
use crate::kernel::UlockWait;
use std::sync::atomic::AtomicU32;
use std::sync::atomic::Ordering;
use std::time::Duration;
use ukdef::ulock;
use ukdef::Uid;

/// Result of a [`UkEvent`] wait that did not fail in the kernel.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
#[must_use]
pub enum EventWait {
    /// At least one signal arrived; all pending signals were consumed.
    Signaled,
    /// The wait was cancelled from outside.
    Cancelled,
    /// The deadline elapsed with no signal.
    TimedOut,
}

/// A single-pending-flag notification object.
///
/// Any number of threads may [`signal`](Self::signal); at most one thread may
/// ever [`wait`](Self::wait) on a given instance. Signals are not counted:
/// however many arrive before a wait, the waiter wakes once and the flag is
/// clear afterwards.
#[repr(C)]
#[derive(Debug)]
pub struct UkEvent {
    lock: AtomicU32,
    wait_uid: AtomicU32,
}

impl UkEvent {
    pub const fn new() -> Self {
        Self {
            lock: AtomicU32::new(0),
            wait_uid: AtomicU32::new(0),
        }
    }

    /// Discards a pending signal without waking anyone.
    pub fn clear_pending(&self) {
        let _ = self.lock.compare_exchange(
            ulock::EVENT_PENDING,
            0,
            Ordering::AcqRel,
            Ordering::Relaxed,
        );
    }

    /// Whether the consumer is currently blocked on the event.
    pub fn is_waiting(&self) -> bool {
        self.lock.load(Ordering::Acquire) == ulock::WAITERS
    }

    /// Marks the event pending and wakes the waiter if one is blocked.
    pub fn signal(&self, kernel: &impl UlockKernel) -> Result<(), KernelError> {
        loop {
            let state = self.lock.load(Ordering::Relaxed);
            if state == 0 {
                // No waiter: just leave the signal pending.
                if self
                    .lock
                    .compare_exchange(0, ulock::EVENT_PENDING, Ordering::Release, Ordering::Relaxed)
                    .is_err()
                {
                    continue;
                }
                return Ok(());
            } else if state == ulock::WAITERS {
                if self
                    .lock
                    .compare_exchange(
                        state,
                        ulock::WAITERS | ulock::EVENT_PENDING,
                        Ordering::Release,
                        Ordering::Relaxed,
                    )
                    .is_err()
                {
                    continue;
                }
                return kernel.ulock_wake(&self.lock, UlockKind::Event);
            } else {
                // Already pending, or another signaler is mid-wake.
                return Ok(());
            }
        }
    }

    /// Consumes all pending signals, blocking until at least one arrives.
    /// `caller` is the consumer's own identity, recorded for cancellation.
    pub fn wait(&self, kernel: &impl UlockKernel, caller: Uid) -> Result<EventWait, KernelError> {
        self.wait_with(kernel, caller, Timeout::Infinite)
    }

    /// Like [`Self::wait`] with a relative deadline.
    pub fn wait_timeout(
        &self,
        kernel: &impl UlockKernel,
        caller: Uid,
        timeout: Duration,
    ) -> Result<EventWait, KernelError> {
        self.wait_with(kernel, caller, Timeout::Relative(timeout))
    }

    /// Like [`Self::wait`] with an absolute deadline on the kernel clock.
    pub fn wait_timeout_abs(
        &self,
        kernel: &impl UlockKernel,
        caller: Uid,
        deadline: Duration,
    ) -> Result<EventWait, KernelError> {
        self.wait_with(kernel, caller, Timeout::Absolute(deadline))
    }

    fn wait_with(
        &self,
        kernel: &impl UlockKernel,
        caller: Uid,
        timeout: Timeout,
    ) -> Result<EventWait, KernelError> {
        let result = loop {
            let state = self.lock.load(Ordering::Relaxed);
            if state == 0 {
                // Nothing pending: announce the waiter and block.
                if self
                    .lock
                    .compare_exchange(0, ulock::WAITERS, Ordering::AcqRel, Ordering::Relaxed)
                    .is_err()
                {
                    continue;
                }
                self.wait_uid.store(caller.into_raw(), Ordering::Release);
                let wait = kernel.ulock_wait(&self.lock, UlockKind::Event, caller, timeout);
                self.wait_uid.store(0, Ordering::Release);
                match wait? {
                    UlockWait::Stale => continue,
                    UlockWait::Woken => break EventWait::Signaled,
                    UlockWait::Cancelled => break EventWait::Cancelled,
                    UlockWait::TimedOut => break EventWait::TimedOut,
                }
            } else {
                // Pending signal (or a stale waiter word): consume it.
                break EventWait::Signaled;
            }
        };

        // Whatever happened, the wait consumed every prior signal.
        self.lock.store(0, Ordering::Release);
        Ok(result)
    }
}

impl Default for UkEvent {
    fn default() -> Self {
        Self::new()
    }
}
