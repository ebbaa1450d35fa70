// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Register context layouts for the exception bridge.
//!
//! Each supported architecture freezes trapped CPU state into a fixed-length
//! word array whose layout is dictated by the microkernel; that array is the
//! IPC payload exchanged with the kernel, byte for byte. The
//! [`RegisterContext`] trait is the architecture-uniform accessor contract the
//! dispatch layer programs against, so trap routing never touches raw offsets
//! of the wrong architecture.

#![no_std]
#![forbid(unsafe_code)]

pub mod arm;
pub mod ppc;
pub mod x64;

use ukdef::ApiVersion;
use ukdef::ExceptionCode;
use ukdef::PfFlags;
use ukdef::TrapCode;

/// The architecture families with a context layout.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum Architecture {
    Arm,
    X64,
    PowerPc,
}

/// Uniform access to a frozen trap context.
///
/// Reads of the exception-code word are only meaningful after the kernel has
/// populated the frame; the exception loop guarantees that before handing the
/// context to a dispatcher.
pub trait RegisterContext {
    /// The layout's architecture family.
    const ARCH: Architecture;

    /// The wire view of the register frame. Its length is the exact kernel
    /// message size; anything else on the wire is corruption.
    fn payload(&self) -> &[u8];

    /// Mutable wire view, filled in by the exception loop on receive.
    fn payload_mut(&mut self) -> &mut [u8];

    /// The exception-code word (trap classification plus page-fault bits).
    fn ex_code(&self) -> ExceptionCode;

    fn set_ex_code(&mut self, code: ExceptionCode);

    /// Program counter at trap time.
    fn pc(&self) -> u64;

    fn set_pc(&mut self, pc: u64);

    /// Stack pointer at trap time.
    fn sp(&self) -> u64;

    /// Faulting address for bus/segment faults.
    fn fault_addr(&self) -> u64;

    /// Normalizes the raw kernel frame after delivery: mirrors trap words,
    /// saves syscall-restart registers, and steps the PC past trapped
    /// syscall instructions. Called once per received message.
    fn post_receive(&mut self);

    /// The syscall number from the architecture's designated register.
    fn syscall_number(&self) -> u64;

    /// The six fixed argument registers.
    fn syscall_args(&self) -> [u64; 6];

    /// Writes a syscall result back, applying the architecture's error
    /// convention.
    fn set_syscall_return(&mut self, result: i64);

    /// The result as user space will observe it (sign-extended).
    fn syscall_return(&self) -> i64;

    /// Trap classification from the exception-code word.
    fn trap_code(&self) -> TrapCode {
        self.ex_code().trap()
    }

    /// Page-fault qualifier bits from the exception-code word.
    fn pf_flags(&self) -> PfFlags {
        self.ex_code().pf()
    }

    /// See [`ExceptionCode::is_alignment_fault`].
    fn is_alignment_fault(&self, version: ApiVersion) -> bool {
        self.ex_code().is_alignment_fault(version)
    }
}
