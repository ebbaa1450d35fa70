// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! The PowerPC (OEA) context layout: a 108-word frame of integer, special,
//! and floating-point state.

use crate::Architecture;
use crate::RegisterContext;
use ukdef::errno::MAX_ERRNO;
use ukdef::ExceptionCode;
use zerocopy::IntoBytes;

/// Word offsets into the frame. Kernel-defined; do not reorder.
pub mod offset {
    pub const R0: usize = 0;
    /// Stack pointer.
    pub const R1: usize = 1;
    /// TLS pointer.
    pub const R2: usize = 2;
    pub const R3: usize = 3;
    pub const R4: usize = 4;
    pub const R5: usize = 5;
    pub const R6: usize = 6;
    pub const R7: usize = 7;
    pub const R8: usize = 8;
    pub const CR: usize = 32;
    pub const XER: usize = 33;
    pub const LR: usize = 34;
    pub const CTR: usize = 35;
    /// Data address register: fault address of storage interrupts.
    pub const DAR: usize = 36;
    pub const EX_CODE: usize = 37;
    /// Data storage interrupt status.
    pub const DSISR: usize = 38;
    /// Saved program counter.
    pub const SRR0: usize = 39;
    /// Saved MSR bits.
    pub const SRR1: usize = 40;
    /// Entry vector, right-shifted by 8 on the wire.
    pub const TRAP: usize = 41;
    pub const FR0: usize = 42;
    pub const FPSCR: usize = 106;

    pub const PC: usize = SRR0;
    pub const MSR: usize = SRR1;
    pub const SP: usize = R1;
    pub const FAULT: usize = DAR;
}

/// Frame length in words.
pub const FRAME_WORDS: usize = 108;

/// MSR floating-point enable.
pub const MSR_FP: u32 = 1 << 13;
/// MSR SPE APU enable (e500 cores).
pub const MSR_SPE: u32 = 1 << 25;

/// CR0 summary-overflow bit, the syscall error flag.
pub const CR_SO: u32 = 0x1000_0000;

/// Alignment-interrupt vector on OEA cores.
pub const ALIGNMENT_TRAP_OEA: u32 = 0x600;
/// Alignment-interrupt vector on BookE cores.
pub const ALIGNMENT_TRAP_BOOKE: u32 = 0x500;

/// `mfspr rD, PVR` instruction, rD masked out.
pub const INST_MFSPR_PVR: u32 = 0x7c1f42a6;
pub const INST_MFSPR_PVR_MASK: u32 = 0xfc1fffff;

/// Syscall-entry trap word.
pub const TRAP_SYSCALL: u32 = 0x0c00;

/// Saved PowerPC CPU state of one kernel thread.
#[derive(Clone)]
pub struct PpcContext {
    words: [u32; FRAME_WORDS],
    /// Entry vector after the post-receive shift.
    pub trap: u32,
    /// r3 at syscall entry, kept for syscall restart.
    pub orig_r3: u32,
    /// Raw (signed, un-negated) result of the last syscall.
    pub result: i64,
    /// Whether the frame belongs to a user-mode thread.
    pub is_user: bool,
}

impl PpcContext {
    pub fn new() -> Self {
        Self {
            words: [0; FRAME_WORDS],
            trap: 0,
            orig_r3: 0,
            result: 0,
            is_user: true,
        }
    }

    pub fn word(&self, index: usize) -> u32 {
        self.words[index]
    }

    pub fn set_word(&mut self, index: usize, value: u32) {
        self.words[index] = value;
    }

    /// Lazily enables the FPU in the saved MSR.
    pub fn enable_fpu(&mut self) {
        self.words[offset::MSR] |= MSR_FP;
    }

    pub fn fpu_enabled(&self) -> bool {
        self.words[offset::MSR] & MSR_FP != 0
    }

    /// Marks the frame as a clean syscall entry: fixed trap word, error flag
    /// clear, entry r3 saved for restart.
    pub fn begin_syscall(&mut self) {
        self.trap = TRAP_SYSCALL;
        self.words[offset::TRAP] = TRAP_SYSCALL;
        self.words[offset::CR] &= !CR_SO;
        self.orig_r3 = self.words[offset::R3];
        self.result = 0;
    }
}

impl Default for PpcContext {
    fn default() -> Self {
        Self::new()
    }
}

impl RegisterContext for PpcContext {
    const ARCH: Architecture = Architecture::PowerPc;

    fn payload(&self) -> &[u8] {
        self.words.as_bytes()
    }

    fn payload_mut(&mut self) -> &mut [u8] {
        self.words.as_mut_bytes()
    }

    fn ex_code(&self) -> ExceptionCode {
        ExceptionCode(self.words[offset::EX_CODE])
    }

    fn set_ex_code(&mut self, code: ExceptionCode) {
        self.words[offset::EX_CODE] = code.0;
    }

    fn pc(&self) -> u64 {
        self.words[offset::PC].into()
    }

    fn set_pc(&mut self, pc: u64) {
        self.words[offset::PC] = pc as u32;
    }

    fn sp(&self) -> u64 {
        self.words[offset::SP].into()
    }

    fn fault_addr(&self) -> u64 {
        self.words[offset::DAR].into()
    }

    fn post_receive(&mut self) {
        // The kernel ships the entry vector right-shifted by 8.
        self.words[offset::TRAP] <<= 8;
        self.trap = self.words[offset::TRAP];
        self.result = 0;
    }

    fn syscall_number(&self) -> u64 {
        self.words[offset::R0].into()
    }

    fn syscall_args(&self) -> [u64; 6] {
        [
            self.words[offset::R3].into(),
            self.words[offset::R4].into(),
            self.words[offset::R5].into(),
            self.words[offset::R6].into(),
            self.words[offset::R7].into(),
            self.words[offset::R8].into(),
        ]
    }

    fn set_syscall_return(&mut self, result: i64) {
        self.result = result;
        if result < 0 && result > -MAX_ERRNO {
            // Errors are reported positive with the summary-overflow flag.
            self.words[offset::CR] |= CR_SO;
            self.words[offset::R3] = (-result) as u32;
        } else {
            self.words[offset::R3] = result as u32;
        }
    }

    fn syscall_return(&self) -> i64 {
        self.result
    }
}
