// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! User-space synchronization primitives over the microkernel's robust ulock
//! ABI.
//!
//! [`UkMutex`] and [`UkEvent`] share their lock-word layout with the kernel's
//! ulock object so the kernel can resolve contention, hand over ownership,
//! and clean up after crashed owners. The fast paths are single
//! compare-and-swap attempts; every blocked path goes through the
//! [`UlockKernel`] trait, which the integration backs with the real kernel
//! calls.

#![forbid(unsafe_code)]

mod event;
mod kernel;
mod mutex;

pub use event::EventWait;
pub use event::UkEvent;
pub use kernel::KernelError;
pub use kernel::Timeout;
pub use kernel::UlockKernel;
pub use kernel::UlockKind;
pub use kernel::UlockWait;
pub use mutex::Acquire;
pub use mutex::UkMutex;

#[cfg(test)]
pub(crate) mod fake {
    //! An in-process stand-in for the kernel side of the ulock ABI, just
    //! enough for exercising the primitives under real threads.

    use crate::kernel::KernelError;
    use crate::kernel::Timeout;
    use crate::kernel::UlockKernel;
    use crate::kernel::UlockKind;
    use crate::kernel::UlockWait;
    use parking_lot::Condvar;
    use parking_lot::Mutex;
    use std::collections::HashSet;
    use std::sync::atomic::AtomicU32;
    use std::sync::atomic::Ordering;
    use std::time::Instant;
    use ukdef::ulock;
    use ukdef::Uid;

    #[derive(Default)]
    struct State {
        cancelled: HashSet<u32>,
        waiters: usize,
    }

    pub struct FakeKernel {
        state: Mutex<State>,
        cv: Condvar,
        base: Instant,
    }

    impl FakeKernel {
        pub fn new() -> Self {
            Self {
                state: Mutex::new(State::default()),
                cv: Condvar::new(),
                base: Instant::now(),
            }
        }

        /// Blocks the test thread until some thread is queued in the
        /// kernel.
        pub fn wait_for_waiter(&self) {
            let mut state = self.state.lock();
            while state.waiters == 0 {
                self.cv.wait(&mut state);
            }
        }

        fn deadline(&self, timeout: Timeout) -> Option<Instant> {
            match timeout {
                Timeout::Infinite => None,
                Timeout::Relative(d) => Some(Instant::now() + d),
                Timeout::Absolute(d) => Some(self.base + d),
            }
        }
    }

    impl UlockKernel for FakeKernel {
        fn ulock_wait(
            &self,
            word: &AtomicU32,
            kind: UlockKind,
            caller: Uid,
            timeout: Timeout,
        ) -> Result<UlockWait, KernelError> {
            let mut state = self.state.lock();
            state.waiters += 1;
            self.cv.notify_all();

            let result = match kind {
                UlockKind::Mutex => loop {
                    if state.cancelled.remove(&caller.into_raw()) {
                        break UlockWait::Cancelled;
                    }
                    let cur = word.load(Ordering::SeqCst);
                    if cur & ulock::OWNER_MASK == 0 {
                        // Hand the mutex to the woken waiter.
                        word.store(caller.into_raw() & ulock::OWNER_MASK, Ordering::SeqCst);
                        break UlockWait::Woken;
                    }
                    word.store(cur | ulock::WAITERS, Ordering::SeqCst);
                    self.cv.wait(&mut state);
                },
                UlockKind::Event => {
                    if word.load(Ordering::SeqCst) != ulock::WAITERS {
                        state.waiters -= 1;
                        return Ok(UlockWait::Stale);
                    }
                    let deadline = self.deadline(timeout);
                    loop {
                        if word.load(Ordering::SeqCst) != ulock::WAITERS {
                            break UlockWait::Woken;
                        }
                        match deadline {
                            None => self.cv.wait(&mut state),
                            Some(deadline) => {
                                if self.cv.wait_until(&mut state, deadline).timed_out() {
                                    break if word.load(Ordering::SeqCst) == ulock::WAITERS {
                                        UlockWait::TimedOut
                                    } else {
                                        UlockWait::Woken
                                    };
                                }
                            }
                        }
                    }
                }
            };

            state.waiters -= 1;
            Ok(result)
        }

        fn ulock_wake(&self, word: &AtomicU32, kind: UlockKind) -> Result<(), KernelError> {
            let _state = self.state.lock();
            if kind == UlockKind::Mutex {
                // Release the word so a queued waiter can take ownership.
                word.store(ulock::FREE, Ordering::SeqCst);
            }
            self.cv.notify_all();
            Ok(())
        }

        fn cancel_wait(&self, target: Uid) -> Result<(), KernelError> {
            let mut state = self.state.lock();
            state.cancelled.insert(target.into_raw());
            self.cv.notify_all();
            Ok(())
        }
    }
}
