// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! The x86-64 context layout: a 90-word frame of integer, segment, and
//! FXSAVE state.

use crate::Architecture;
use crate::RegisterContext;
use ukdef::ExceptionCode;
use ukdef::PfFlags;
use ukdef::TrapCode;
use zerocopy::IntoBytes;

/// Word offsets into the frame. Kernel-defined; do not reorder.
pub mod offset {
    pub const RDI: usize = 0;
    pub const RSI: usize = 1;
    pub const RDX: usize = 2;
    pub const R10: usize = 3;
    pub const R8: usize = 4;
    pub const R9: usize = 5;
    pub const RCX: usize = 6;
    pub const R11: usize = 7;
    pub const RAX: usize = 8;
    pub const RBX: usize = 9;
    pub const RBP: usize = 10;
    pub const R12: usize = 11;
    pub const R13: usize = 12;
    pub const R14: usize = 13;
    pub const R15: usize = 14;
    /// Exception vector; doubles as the fault address on pagefaults.
    pub const VECTOR: usize = 15;
    /// Hardware error code of the exception, if any.
    pub const ERROR: usize = 16;
    pub const RIP: usize = 17;
    pub const CS: usize = 18;
    pub const RFLAGS: usize = 19;
    pub const RSP: usize = 20;
    pub const SS: usize = 21;
    pub const FS_BASE: usize = 22;
    pub const GS_BASE: usize = 23;
    pub const EX_CODE: usize = 24;
    pub const USED_FPU: usize = 25;
    pub const X_FCW_FSW: usize = 26;
    pub const MXCSR: usize = 29;

    pub const FAULT: usize = VECTOR;
}

/// Frame length in words.
pub const FRAME_WORDS: usize = 90;

/// Vector of a general protection fault.
pub const VECTOR_GP: u64 = 13;
/// Vector of a page fault.
pub const VECTOR_PF: u64 = 14;

/// GPF error code the kernel reports for a trapped `int 0x80` (8*n+2).
const GP_ERROR_INT80: u64 = 0x402;

/// Saved x86-64 CPU state of one kernel thread.
#[derive(Clone)]
pub struct X64Context {
    words: [u64; FRAME_WORDS],
    /// Trap number after conversion, for the fault-fixup path.
    pub trap: u64,
    /// rax at syscall entry (the syscall number), or `!0` for other traps.
    pub orig_ax: u64,
    /// Whether the frame belongs to a user-mode thread.
    pub is_user: bool,
}

impl X64Context {
    pub fn new() -> Self {
        Self {
            words: [0; FRAME_WORDS],
            trap: 0,
            orig_ax: !0,
            is_user: true,
        }
    }

    pub fn word(&self, index: usize) -> u64 {
        self.words[index]
    }

    pub fn set_word(&mut self, index: usize, value: u64) {
        self.words[index] = value;
    }

    /// The hardware exception vector.
    pub fn vector(&self) -> u64 {
        self.words[offset::VECTOR]
    }

    /// The hardware error code pushed with the exception.
    pub fn error_code(&self) -> u64 {
        self.words[offset::ERROR]
    }

    /// Lazily enables the FPU/SSE state in the saved control word.
    pub fn enable_fpu(&mut self) {
        self.words[offset::USED_FPU] = 1;
    }

    pub fn fpu_enabled(&self) -> bool {
        self.words[offset::USED_FPU] != 0
    }
}

impl Default for X64Context {
    fn default() -> Self {
        Self::new()
    }
}

impl RegisterContext for X64Context {
    const ARCH: Architecture = Architecture::X64;

    fn payload(&self) -> &[u8] {
        self.words.as_bytes()
    }

    fn payload_mut(&mut self) -> &mut [u8] {
        self.words.as_mut_bytes()
    }

    fn ex_code(&self) -> ExceptionCode {
        ExceptionCode(self.words[offset::EX_CODE] as u32)
    }

    fn set_ex_code(&mut self, code: ExceptionCode) {
        self.words[offset::EX_CODE] = code.0.into();
    }

    fn pc(&self) -> u64 {
        self.words[offset::RIP]
    }

    fn set_pc(&mut self, pc: u64) {
        self.words[offset::RIP] = pc;
    }

    fn sp(&self) -> u64 {
        self.words[offset::RSP]
    }

    fn fault_addr(&self) -> u64 {
        self.words[offset::FAULT]
    }

    fn post_receive(&mut self) {
        self.trap = self.words[offset::VECTOR];

        // The kernel reports a trapped `int 0x80` as a GPF with error code
        // 0x402 rather than a syscall trap; translate it back.
        if self.trap_code() == TrapCode::BUS_ERROR
            && self.words[offset::VECTOR] == VECTOR_GP
            && self.words[offset::ERROR] == GP_ERROR_INT80
        {
            self.set_ex_code(ExceptionCode::new(TrapCode::SYSTEM_CALL, PfFlags::new()));
            self.trap = 0x80;
            // Fault-style delivery points at the instruction itself.
            self.words[offset::RIP] = self.words[offset::RIP].wrapping_add(2);
        }

        if self.trap_code() == TrapCode::SEGMENT_VIOLATION {
            self.trap = VECTOR_PF;
        }

        self.orig_ax = if self.trap_code() == TrapCode::SYSTEM_CALL {
            self.words[offset::RAX]
        } else {
            !0
        };
    }

    fn syscall_number(&self) -> u64 {
        self.orig_ax
    }

    fn syscall_args(&self) -> [u64; 6] {
        [
            self.words[offset::RDI],
            self.words[offset::RSI],
            self.words[offset::RDX],
            self.words[offset::R10],
            self.words[offset::R8],
            self.words[offset::R9],
        ]
    }

    fn set_syscall_return(&mut self, result: i64) {
        self.words[offset::RAX] = result as u64;
    }

    fn syscall_return(&self) -> i64 {
        self.words[offset::RAX] as i64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn payload_is_frame_only() {
        let ctx = X64Context::new();
        assert_eq!(ctx.payload().len(), FRAME_WORDS * 8);
    }

    #[test]
    fn int80_gpf_becomes_syscall() {
        let mut ctx = X64Context::new();
        ctx.set_word(offset::VECTOR, VECTOR_GP);
        ctx.set_word(offset::ERROR, 0x402);
        ctx.set_word(offset::RIP, 0x1000);
        ctx.set_word(offset::RAX, 11);
        ctx.set_ex_code(ExceptionCode::new(TrapCode::BUS_ERROR, PfFlags::new()));
        ctx.post_receive();
        assert_eq!(ctx.trap_code(), TrapCode::SYSTEM_CALL);
        assert_eq!(ctx.trap, 0x80);
        assert_eq!(ctx.pc(), 0x1002);
        assert_eq!(ctx.orig_ax, 11);
    }

    #[test]
    fn other_gpf_stays_bus_error() {
        let mut ctx = X64Context::new();
        ctx.set_word(offset::VECTOR, VECTOR_GP);
        ctx.set_word(offset::ERROR, 0);
        ctx.set_ex_code(ExceptionCode::new(TrapCode::BUS_ERROR, PfFlags::new()));
        ctx.post_receive();
        assert_eq!(ctx.trap_code(), TrapCode::BUS_ERROR);
        assert_eq!(ctx.trap, VECTOR_GP);
        assert_eq!(ctx.orig_ax, !0);
    }

    #[test]
    fn int80_fixup_wraps_at_the_address_limit() {
        let mut ctx = X64Context::new();
        ctx.set_word(offset::VECTOR, VECTOR_GP);
        ctx.set_word(offset::ERROR, 0x402);
        ctx.set_word(offset::RIP, u64::MAX - 1);
        ctx.set_ex_code(ExceptionCode::new(TrapCode::BUS_ERROR, PfFlags::new()));
        ctx.post_receive();
        assert_eq!(ctx.trap_code(), TrapCode::SYSTEM_CALL);
        assert_eq!(ctx.pc(), 0);
    }

    #[test]
    fn pagefault_trap_mirrors_vector_14() {
        let mut ctx = X64Context::new();
        ctx.set_word(offset::VECTOR, 0xdead_beef);
        ctx.set_ex_code(ExceptionCode::new(TrapCode::SEGMENT_VIOLATION, PfFlags::new()));
        ctx.post_receive();
        assert_eq!(ctx.trap, VECTOR_PF);
    }
}
