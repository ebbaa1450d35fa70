// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! The robust user-space mutex.

use crate::kernel::KernelError;
use crate::kernel::Timeout;
use crate::kernel::UlockKernel;
use crate::kernel::UlockKind;
use crate::kernel::UlockWait;
use std::sync::atomic::AtomicU32;
use std::sync::atomic::Ordering;
use ukdef::ulock;
use ukdef::Uid;

/// Result of a [`UkMutex::lock`] attempt that did not fail in the kernel.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
#[must_use]
pub enum Acquire {
    /// The caller owns the mutex.
    Acquired,
    /// The wait was cancelled before the mutex was acquired; the caller must
    /// retry or abort, it does not own the mutex.
    Cancelled,
}

/// A compare-and-swap mutex sharing its lock word with the kernel's robust
/// ulock object.
///
/// The low 20 bits of the lock word hold the owner's UID (0 when unlocked);
/// bit 31 flags queued waiters. Contended paths block in the kernel via
/// [`UlockKernel`], never by spinning.
#[repr(C)]
#[derive(Debug)]
pub struct UkMutex {
    lock: AtomicU32,
    wait_uid: AtomicU32,
}

impl UkMutex {
    pub const fn new() -> Self {
        Self {
            lock: AtomicU32::new(ulock::FREE),
            wait_uid: AtomicU32::new(0),
        }
    }

    /// Whether `uid` currently owns the mutex.
    pub fn locked_by(&self, uid: Uid) -> bool {
        self.lock.load(Ordering::Acquire) & ulock::OWNER_MASK
            == uid.into_raw() & ulock::OWNER_MASK
    }

    /// The raw lock word, for diagnostics.
    pub fn raw_lock_word(&self) -> u32 {
        self.lock.load(Ordering::Relaxed)
    }

    /// The thread blocked on the mutex, for [`UlockKernel::cancel_wait`]
    /// callers. [`Uid::NONE`] when nobody is blocked.
    pub fn waiting_uid(&self) -> Uid {
        Uid::from_raw(self.wait_uid.load(Ordering::Acquire))
    }

    /// Acquires the mutex for `caller`, blocking in the kernel on
    /// contention.
    pub fn lock(&self, kernel: &impl UlockKernel, caller: Uid) -> Result<Acquire, KernelError> {
        let owner = caller.into_raw() & ulock::OWNER_MASK;

        loop {
            if self.lock.load(Ordering::Relaxed) == ulock::FREE
                && self
                    .lock
                    .compare_exchange(ulock::FREE, owner, Ordering::Acquire, Ordering::Relaxed)
                    .is_ok()
            {
                return Ok(Acquire::Acquired);
            }

            // Let the kernel handle the contention. Record the caller so it
            // can be targeted by cancellation while blocked.
            self.wait_uid.store(caller.into_raw(), Ordering::Release);
            let wait = kernel.ulock_wait(&self.lock, UlockKind::Mutex, caller, Timeout::Infinite);
            self.wait_uid.store(0, Ordering::Release);
            match wait? {
                UlockWait::Stale => continue,
                UlockWait::Cancelled => return Ok(Acquire::Cancelled),
                // Ownership was handed over inside the kernel.
                UlockWait::Woken => return Ok(Acquire::Acquired),
                UlockWait::TimedOut => unreachable!("infinite wait timed out"),
            }
        }
    }

    /// Releases the mutex held by `caller`, waking one queued waiter if any.
    pub fn unlock(&self, kernel: &impl UlockKernel, caller: Uid) -> Result<(), KernelError> {
        let owner = caller.into_raw() & ulock::OWNER_MASK;
        debug_assert!(self.locked_by(caller));

        // Uncontended fast path: no waiters bit, plain owner word.
        if self
            .lock
            .compare_exchange(owner, ulock::FREE, Ordering::Release, Ordering::Relaxed)
            .is_ok()
        {
            return Ok(());
        }

        kernel.ulock_wake(&self.lock, UlockKind::Mutex)
    }

    /// Transfers ownership without the lock/unlock protocol.
    ///
    /// Used only by exception-handling code for priority-inheritance lock
    /// stealing; ordinary callers must go through [`Self::lock`]. The
    /// waiters bit is always set so the kernel queue stays live.
    pub fn set_owner(&self, owner: Uid) {
        let word = (owner.into_raw() & ulock::OWNER_MASK) | ulock::WAITERS;
        self.lock.store(word, Ordering::Release);
    }
}

impl Default for UkMutex {
    fn default() -> Self {
        Self::new()
    }
}
