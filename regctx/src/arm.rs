// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! The ARM context layout: an 88-word frame of integer, control, and VFP
//! state.

use crate::Architecture;
use crate::RegisterContext;
use ukdef::ExceptionCode;
use ukdef::TrapCode;
use zerocopy::IntoBytes;

/// Word offsets into the frame. Kernel-defined; do not reorder.
pub mod offset {
    pub const R0: usize = 0;
    pub const R1: usize = 1;
    pub const R2: usize = 2;
    pub const R3: usize = 3;
    pub const R4: usize = 4;
    pub const R5: usize = 5;
    pub const R6: usize = 6;
    pub const R7: usize = 7;
    pub const R11: usize = 11;
    pub const R12: usize = 12;
    pub const R13: usize = 13;
    pub const R14: usize = 14;
    pub const R15: usize = 15;
    pub const CPSR: usize = 16;
    pub const TLS: usize = 17;
    pub const FAULT: usize = 18;
    pub const EX_CODE: usize = 19;
    pub const FPEXC: usize = 20;
    pub const FPSCR: usize = 21;
    pub const FPINST: usize = 22;
    pub const FPINST2: usize = 23;
    pub const FPREGS: usize = 24;

    pub const PC: usize = R15;
    pub const SP: usize = R13;
    pub const LR: usize = R14;
    pub const FP: usize = R11;
    pub const IP: usize = R12;
}

/// Frame length in words.
pub const FRAME_WORDS: usize = 88;

/// CPSR Thumb-state bit.
pub const CPSR_THUMB: u32 = 1 << 5;
/// CPSR value of a fresh user-mode thread.
pub const CPSR_USER: u32 = 0x10;

/// FPEXC enable bit.
pub const FPEXC_EN: u32 = 1 << 30;
/// FPSCR round-to-nearest (all mode bits clear).
pub const FPSCR_ROUND_NEAREST: u32 = 0;

/// An undefined instruction matching this (condition-masked) pattern is the
/// kernel breakpoint.
pub const BREAKPOINT_MASK: u32 = 0x0fffffff;
pub const BREAKPOINT_INSTR: u32 = 0x07f001f0;

/// Saved ARM CPU state of one kernel thread.
#[derive(Clone)]
pub struct ArmContext {
    words: [u32; FRAME_WORDS],
    /// r0 at syscall entry, kept for syscall restart.
    pub orig_r0: u32,
    /// Whether the frame belongs to a user-mode thread.
    pub is_user: bool,
}

impl ArmContext {
    pub fn new() -> Self {
        let mut words = [0; FRAME_WORDS];
        words[offset::CPSR] = CPSR_USER;
        Self {
            words,
            orig_r0: 0,
            is_user: true,
        }
    }

    pub fn word(&self, index: usize) -> u32 {
        self.words[index]
    }

    pub fn set_word(&mut self, index: usize, value: u32) {
        self.words[index] = value;
    }

    /// Whether the thread trapped in Thumb state.
    pub fn thumb(&self) -> bool {
        self.words[offset::CPSR] & CPSR_THUMB != 0
    }

    /// Lazily enables the VFP unit in the saved control state.
    pub fn enable_fpu(&mut self) {
        self.words[offset::FPEXC] = FPEXC_EN;
        self.words[offset::FPSCR] = FPSCR_ROUND_NEAREST;
    }

    pub fn fpu_enabled(&self) -> bool {
        self.words[offset::FPEXC] & FPEXC_EN != 0
    }
}

impl Default for ArmContext {
    fn default() -> Self {
        Self::new()
    }
}

impl RegisterContext for ArmContext {
    const ARCH: Architecture = Architecture::Arm;

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
        self.words[offset::FAULT].into()
    }

    fn post_receive(&mut self) {
        if self.trap_code() == TrapCode::SYSTEM_CALL {
            // Keep r0 for syscall restart, and don't re-execute the SWI.
            self.orig_r0 = self.words[offset::R0];
            let step = if self.thumb() { 2 } else { 4 };
            self.words[offset::PC] = self.words[offset::PC].wrapping_add(step);
        }
    }

    fn syscall_number(&self) -> u64 {
        self.words[offset::R7].into()
    }

    fn syscall_args(&self) -> [u64; 6] {
        [
            self.words[offset::R0].into(),
            self.words[offset::R1].into(),
            self.words[offset::R2].into(),
            self.words[offset::R3].into(),
            self.words[offset::R4].into(),
            self.words[offset::R5].into(),
        ]
    }

    fn set_syscall_return(&mut self, result: i64) {
        self.words[offset::R0] = result as u32;
    }

    fn syscall_return(&self) -> i64 {
        self.words[offset::R0] as i32 as i64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ukdef::PfFlags;

    #[test]
    fn payload_is_frame_only() {
        let ctx = ArmContext::new();
        assert_eq!(ctx.payload().len(), FRAME_WORDS * 4);
    }

    #[test]
    fn syscall_post_receive_steps_pc() {
        let mut ctx = ArmContext::new();
        ctx.set_word(offset::R0, 77);
        ctx.set_word(offset::PC, 0x8000);
        ctx.set_ex_code(ExceptionCode::new(TrapCode::SYSTEM_CALL, PfFlags::new()));
        ctx.post_receive();
        assert_eq!(ctx.pc(), 0x8004);
        assert_eq!(ctx.orig_r0, 77);

        // Thumb state steps by a halfword.
        let mut ctx = ArmContext::new();
        ctx.set_word(offset::CPSR, CPSR_USER | CPSR_THUMB);
        ctx.set_word(offset::PC, 0x8000);
        ctx.set_ex_code(ExceptionCode::new(TrapCode::SYSTEM_CALL, PfFlags::new()));
        ctx.post_receive();
        assert_eq!(ctx.pc(), 0x8002);
    }

    #[test]
    fn non_syscall_post_receive_is_inert() {
        let mut ctx = ArmContext::new();
        ctx.set_word(offset::PC, 0x8000);
        ctx.set_ex_code(ExceptionCode::new(TrapCode::BUS_ERROR, PfFlags::new()));
        ctx.post_receive();
        assert_eq!(ctx.pc(), 0x8000);
    }

    #[test]
    fn syscall_return_sign_extends() {
        let mut ctx = ArmContext::new();
        ctx.set_syscall_return(-38);
        assert_eq!(ctx.syscall_return(), -38);
    }
}
