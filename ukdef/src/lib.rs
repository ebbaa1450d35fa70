// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Definitions for the microkernel ABI shared by the exception bridge: trap
//! classification codes, the exception-code word, packed thread identities
//! (UIDs), and the user-lock word layout.
//!
//! Everything here mirrors on-the-wire kernel layouts and must not change
//! without a matching kernel update.

#![no_std]
#![forbid(unsafe_code)]

use bitfield_struct::bitfield;
use zerocopy::FromBytes;
use zerocopy::Immutable;
use zerocopy::IntoBytes;
use zerocopy::KnownLayout;

/// Trap classification delivered in the upper half of the exception-code
/// word.
///
/// The kernel may be newer than this crate, so this is an open enumeration
/// over `u16` rather than a closed `enum`; values above
/// [`TrapCode::CORRUPTED_CONTEXT`] indicate a protocol mismatch and must be
/// treated as fatal by the dispatcher.
#[derive(Copy, Clone, PartialEq, Eq, Hash, IntoBytes, FromBytes, Immutable, KnownLayout)]
#[repr(transparent)]
pub struct TrapCode(pub u16);

impl TrapCode {
    /// No trap: the thread was stopped while running in user space.
    pub const NONE: Self = Self(0);
    pub const ILLEGAL_INSTRUCTION: Self = Self(1);
    pub const BREAKPOINT: Self = Self(2);
    pub const ARITHMETIC_OVERFLOW: Self = Self(3);
    pub const FP_EXCEPTION: Self = Self(4);
    pub const BUS_ERROR: Self = Self(5);
    pub const SEGMENT_VIOLATION: Self = Self(6);
    pub const TRAP: Self = Self(7);
    /// Non-kernel system call trapped for emulation.
    pub const SYSTEM_CALL: Self = Self(8);
    /// FPU instruction executed with the FPU disabled.
    pub const FP_UNAVAILABLE: Self = Self(9);
    /// Corrupted register context (kernel-detected internal error).
    pub const CORRUPTED_CONTEXT: Self = Self(10);

    /// Whether this value lies within the known enumeration.
    pub const fn is_known(self) -> bool {
        self.0 <= Self::CORRUPTED_CONTEXT.0
    }
}

impl core::fmt::Debug for TrapCode {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let name = match *self {
            Self::NONE => "NONE",
            Self::ILLEGAL_INSTRUCTION => "ILLEGAL_INSTRUCTION",
            Self::BREAKPOINT => "BREAKPOINT",
            Self::ARITHMETIC_OVERFLOW => "ARITHMETIC_OVERFLOW",
            Self::FP_EXCEPTION => "FP_EXCEPTION",
            Self::BUS_ERROR => "BUS_ERROR",
            Self::SEGMENT_VIOLATION => "SEGMENT_VIOLATION",
            Self::TRAP => "TRAP",
            Self::SYSTEM_CALL => "SYSTEM_CALL",
            Self::FP_UNAVAILABLE => "FP_UNAVAILABLE",
            Self::CORRUPTED_CONTEXT => "CORRUPTED_CONTEXT",
            Self(other) => return write!(f, "TrapCode({other})"),
        };
        f.write_str(name)
    }
}

/// Page-fault qualifier bits in the lower half of the exception-code word.
///
/// Only meaningful when the trap code is a bus or segment fault. The `align`
/// bit exists only from [`ApiVersion::ALIGN_FLAG`] on; older kernels report
/// alignment faults with an unstructured nonzero low half.
#[bitfield(u16)]
#[derive(PartialEq, Eq)]
pub struct PfFlags {
    pub nomap: bool,
    pub read: bool,
    pub write: bool,
    pub exec: bool,
    pub align: bool,
    #[bits(11)]
    _reserved: u16,
}

impl PfFlags {
    /// True if any qualifier bit is set.
    pub const fn any(self) -> bool {
        self.into_bits() != 0
    }
}

/// The exception-code context word: trap classification in the upper 16 bits,
/// page-fault qualifier bits in the lower 16.
#[derive(Copy, Clone, PartialEq, Eq, Debug, IntoBytes, FromBytes, Immutable, KnownLayout)]
#[repr(transparent)]
pub struct ExceptionCode(pub u32);

impl ExceptionCode {
    /// The code written back when replying to a handled exception: resume the
    /// thread, nothing pending.
    pub const CONTINUE: Self = Self::new(TrapCode::NONE, PfFlags::new());

    pub const fn new(trap: TrapCode, pf: PfFlags) -> Self {
        Self((trap.0 as u32) << 16 | pf.into_bits() as u32)
    }

    pub const fn trap(self) -> TrapCode {
        TrapCode((self.0 >> 16) as u16)
    }

    pub const fn pf(self) -> PfFlags {
        PfFlags::from_bits(self.0 as u16)
    }

    /// Alignment-fault test, gated on the kernel API version.
    ///
    /// True iff the trap is a bus error and the page-fault bits identify an
    /// unaligned access under the active encoding.
    pub const fn is_alignment_fault(self, version: ApiVersion) -> bool {
        if self.trap().0 != TrapCode::BUS_ERROR.0 {
            return false;
        }
        if version.has_align_flag() {
            self.pf().align()
        } else {
            self.pf().any()
        }
    }
}

/// Kernel API version from the kinfo page, `0xMMMmm` encoded.
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Debug)]
pub struct ApiVersion(pub u32);

impl ApiVersion {
    /// First version reporting alignment faults with a dedicated flag bit.
    pub const ALIGN_FLAG: Self = Self(0x30006);

    pub const fn has_align_flag(self) -> bool {
        self.0 >= Self::ALIGN_FLAG.0
    }
}

/// The resource partition the emulated kernel task runs in. Fixed by the
/// integration, not negotiated.
pub const RESOURCE_PARTITION: u32 = 63;

const UID_THREAD_BITS: u32 = 9;
const UID_TASK_BITS: u32 = 11;

/// Thread id addressing every thread of a task in one message.
pub const THREAD_ALL: u16 = (1 << UID_THREAD_BITS) - 1;

/// Packed thread identity: resource partition, task number, and thread
/// number in one kernel-addressable word.
///
/// The all-zero value doubles as "no sender/no owner" in both the IPC reply
/// protocol and the mutex owner field.
#[derive(Copy, Clone, PartialEq, Eq, Hash, IntoBytes, FromBytes, Immutable, KnownLayout)]
#[repr(transparent)]
pub struct Uid(u32);

impl Uid {
    /// No thread: never a valid sender or lock owner.
    pub const NONE: Self = Self(0);

    pub const fn new(task: u16, thread: u16) -> Self {
        Self(
            RESOURCE_PARTITION << (UID_TASK_BITS + UID_THREAD_BITS)
                | (task as u32 & ((1 << UID_TASK_BITS) - 1)) << UID_THREAD_BITS
                | (thread as u32 & ((1 << UID_THREAD_BITS) - 1)),
        )
    }

    /// The broadcast UID for all threads of `task`.
    pub const fn all_threads(task: u16) -> Self {
        Self::new(task, THREAD_ALL)
    }

    pub const fn task(self) -> u16 {
        (self.0 >> UID_THREAD_BITS) as u16 & ((1 << UID_TASK_BITS) - 1)
    }

    pub const fn thread(self) -> u16 {
        self.0 as u16 & ((1 << UID_THREAD_BITS) - 1)
    }

    pub const fn is_none(self) -> bool {
        self.0 == 0
    }

    pub const fn from_raw(raw: u32) -> Self {
        Self(raw)
    }

    pub const fn into_raw(self) -> u32 {
        self.0
    }
}

impl core::fmt::Debug for Uid {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        if self.is_none() {
            f.write_str("Uid::NONE")
        } else {
            write!(f, "Uid({}:{})", self.task(), self.thread())
        }
    }
}

/// Layout of the kernel ulock word shared with [`UkMutex`]/[`UkEvent`]
/// implementations.
pub mod ulock {
    /// Unowned mutex / clear event.
    pub const FREE: u32 = 0;
    /// Mutex owner UIDs are truncated to this many low bits in the lock word.
    pub const OWNER_MASK: u32 = 0xfffff;
    /// Set while the kernel has threads queued on the word.
    pub const WAITERS: u32 = 1 << 31;
    /// Event-pending flag (events only).
    pub const EVENT_PENDING: u32 = 1 << 0;
}

/// POSIX signal numbers a classified trap can resolve to. Closed set: the
/// dispatcher never produces anything else.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
#[repr(i32)]
pub enum Signal {
    Ill = 4,
    Trap = 5,
    Bus = 7,
    Fpe = 8,
    Segv = 11,
}

/// Error numbers and syscall-restart sentinels shared with the emulated
/// kernel's signal path.
pub mod errno {
    /// Syscall number out of table range or unassigned.
    pub const ENOSYS: i64 = 38;
    /// Results in `(-MAX_ERRNO, 0)` are error codes, not values.
    pub const MAX_ERRNO: i64 = 4095;

    /// Restart if the signal had no handler.
    pub const ERESTARTNOHAND: i64 = 514;
    /// Restart according to the handler's `SA_RESTART`.
    pub const ERESTARTSYS: i64 = 512;
    /// Always restart, invisibly to user space.
    pub const ERESTARTNOINTR: i64 = 513;

    /// Whether a raw syscall result demands signal delivery before resuming.
    pub const fn is_restart_sentinel(result: i64) -> bool {
        result == -ERESTARTNOHAND || result == -ERESTARTSYS || result == -ERESTARTNOINTR
    }
}
