// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! The syscall table: a typed mapping from syscall number to handler.

use ukdef::errno::ENOSYS;

/// One system call implementation.
///
/// Arguments arrive widened to machine words from the architecture's fixed
/// argument registers; the result is the raw signed convention (negative
/// errno on failure) before any architecture-specific encoding.
pub trait Syscall: Send + Sync {
    fn invoke(&self, args: [u64; 6]) -> i64;
}

impl<F> Syscall for F
where
    F: Fn([u64; 6]) -> i64 + Send + Sync,
{
    fn invoke(&self, args: [u64; 6]) -> i64 {
        self(args)
    }
}

/// Fixed-size dispatch table supplied by the emulated kernel.
///
/// Numbers outside the table, or unassigned slots, resolve to `-ENOSYS`
/// without invoking anything.
pub struct SyscallTable {
    entries: Vec<Option<Box<dyn Syscall>>>,
}

impl SyscallTable {
    pub fn new(len: usize) -> Self {
        Self {
            entries: (0..len).map(|_| None).collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Assigns `handler` to syscall number `nr`.
    ///
    /// Panics if `nr` is outside the table; the table size is a build-time
    /// property of the emulated kernel.
    pub fn register(&mut self, nr: usize, handler: impl Syscall + 'static) {
        self.entries[nr] = Some(Box::new(handler));
    }

    /// Executes syscall `nr`, or returns `-ENOSYS`.
    pub fn invoke(&self, nr: u64, args: [u64; 6]) -> i64 {
        usize::try_from(nr)
            .ok()
            .and_then(|nr| self.entries.get(nr))
            .and_then(|entry| entry.as_deref())
            .map_or(-ENOSYS, |handler| handler.invoke(args))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::sync::atomic::Ordering;
    use std::sync::Arc;

    #[test]
    fn out_of_range_numbers_do_not_invoke() {
        let calls = Arc::new(AtomicUsize::new(0));
        let mut table = SyscallTable::new(8);
        table.register(3, {
            let calls = calls.clone();
            move |_args: [u64; 6]| {
                calls.fetch_add(1, Ordering::Relaxed);
                0
            }
        });

        assert_eq!(table.invoke(8, [0; 6]), -ukdef::errno::ENOSYS);
        assert_eq!(table.invoke(u64::MAX, [0; 6]), -ukdef::errno::ENOSYS);
        assert_eq!(table.invoke(2, [0; 6]), -ukdef::errno::ENOSYS);
        assert_eq!(calls.load(Ordering::Relaxed), 0);

        assert_eq!(table.invoke(3, [0; 6]), 0);
        assert_eq!(calls.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn arguments_pass_through() {
        let mut table = SyscallTable::new(4);
        table.register(1, |args: [u64; 6]| args.iter().sum::<u64>() as i64);
        assert_eq!(table.invoke(1, [1, 2, 3, 4, 5, 6]), 21);
    }
}
