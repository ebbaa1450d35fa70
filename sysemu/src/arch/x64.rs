// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! x86-64 trap classification and syscall convention.
//!
//! The x86 kernel folds most traps into the bus-error classification, so the
//! hardware vector word carries the real distinction.

use crate::dispatch::ArchDispatch;
use crate::dispatch::ExceptionOutcome;
use crate::dispatch::TaskServices;
use crate::dispatch::TraceEvent;
use crate::syscall::SyscallTable;
use regctx::x64::X64Context;
use regctx::RegisterContext;
use ukdef::errno::is_restart_sentinel;
use ukdef::errno::ENOSYS;
use ukdef::ApiVersion;
use ukdef::Signal;

/// x86-64 family dispatcher.
pub struct X64Dispatch {
    api_version: ApiVersion,
}

impl X64Dispatch {
    pub fn new(api_version: ApiVersion) -> Self {
        Self { api_version }
    }
}

impl ArchDispatch for X64Dispatch {
    type Ctx = X64Context;

    fn handle_exception(
        &self,
        ctx: &mut Self::Ctx,
        services: &mut impl TaskServices<Self::Ctx>,
    ) -> ExceptionOutcome {
        match ctx.vector() {
            // Divide error, coprocessor overrun, x87 FP error.
            0 | 9 | 16 => ExceptionOutcome::Signal(Signal::Fpe),
            // Debug and int3.
            1 | 3 => ExceptionOutcome::Signal(Signal::Trap),
            // Overflow, bound range, double fault, invalid TSS, stray PF.
            4 | 5 | 8 | 10 | 14 => ExceptionOutcome::Signal(Signal::Segv),
            // Invalid opcode.
            6 => ExceptionOutcome::Signal(Signal::Ill),
            // Device not available / SIMD: lazy FPU enable.
            7 | 19 => {
                if services.has_fpu() {
                    ctx.enable_fpu();
                    ExceptionOutcome::Handled
                } else {
                    ExceptionOutcome::Signal(Signal::Fpe)
                }
            }
            // Segment not present, stack segment.
            11 | 12 => ExceptionOutcome::Signal(Signal::Bus),
            // General protection: cli/sti and port I/O emulation first.
            13 => {
                if services.emulate_privileged(ctx) {
                    ExceptionOutcome::Handled
                } else {
                    ExceptionOutcome::Signal(Signal::Segv)
                }
            }
            // Alignment check.
            17 => {
                if ctx.is_alignment_fault(self.api_version) && services.fix_alignment(ctx) {
                    ExceptionOutcome::Handled
                } else {
                    ExceptionOutcome::Signal(Signal::Bus)
                }
            }
            vector => {
                tracing::warn!(vector, pc = ctx.pc(), "unhandled x86 vector");
                ExceptionOutcome::Signal(Signal::Bus)
            }
        }
    }

    fn handle_syscall(
        &self,
        ctx: &mut Self::Ctx,
        table: &SyscallTable,
        services: &mut impl TaskServices<Self::Ctx>,
    ) {
        // The return register reads as -ENOSYS until the call completes, so
        // tracers observe the same entry state native kernels present.
        ctx.set_syscall_return(-ENOSYS);
        if services.trace_syscalls() {
            services.trace_syscall(ctx, TraceEvent::Entry);
        }

        let result = table.invoke(ctx.syscall_number(), ctx.syscall_args());
        ctx.set_syscall_return(result);
        if is_restart_sentinel(result) {
            services.deliver_signals(ctx);
        }

        if services.trace_syscalls() {
            services.trace_syscall(ctx, TraceEvent::Exit);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arch::testing::TestServices;
    use regctx::x64::offset;
    use ukdef::ExceptionCode;
    use ukdef::PfFlags;
    use ukdef::TrapCode;

    fn ctx_with_vector(vector: u64) -> X64Context {
        let mut ctx = X64Context::new();
        ctx.set_word(offset::VECTOR, vector);
        ctx.set_ex_code(ExceptionCode::new(TrapCode::BUS_ERROR, PfFlags::new()));
        ctx
    }

    #[test]
    fn every_vector_resolves_without_panicking() {
        let arch = X64Dispatch::new(ApiVersion::ALIGN_FLAG);
        for vector in 0..32u64 {
            let mut ctx = ctx_with_vector(vector);
            let mut services = TestServices::new();
            let _ = arch.handle_exception(&mut ctx, &mut services);
        }
    }

    #[test]
    fn device_not_available_enables_the_fpu() {
        let arch = X64Dispatch::new(ApiVersion::ALIGN_FLAG);
        let mut ctx = ctx_with_vector(7);
        let mut services = TestServices::new();
        assert_eq!(
            arch.handle_exception(&mut ctx, &mut services),
            ExceptionOutcome::Handled
        );
        assert!(ctx.fpu_enabled());

        services.has_fpu = false;
        let mut ctx = ctx_with_vector(7);
        assert_eq!(
            arch.handle_exception(&mut ctx, &mut services),
            ExceptionOutcome::Signal(Signal::Fpe)
        );
    }

    #[test]
    fn gpf_tries_privileged_emulation_first() {
        let arch = X64Dispatch::new(ApiVersion::ALIGN_FLAG);
        let mut services = TestServices::new();
        services.can_emulate_privileged = true;
        let mut ctx = ctx_with_vector(13);
        assert_eq!(
            arch.handle_exception(&mut ctx, &mut services),
            ExceptionOutcome::Handled
        );

        services.can_emulate_privileged = false;
        let mut ctx = ctx_with_vector(13);
        assert_eq!(
            arch.handle_exception(&mut ctx, &mut services),
            ExceptionOutcome::Signal(Signal::Segv)
        );
    }

    #[test]
    fn alignment_check_uses_the_fixup() {
        let arch = X64Dispatch::new(ApiVersion::ALIGN_FLAG);
        let mut services = TestServices::new();
        services.can_fix_alignment = true;
        let mut ctx = ctx_with_vector(17);
        ctx.set_ex_code(ExceptionCode::new(
            TrapCode::BUS_ERROR,
            PfFlags::new().with_align(true),
        ));
        assert_eq!(
            arch.handle_exception(&mut ctx, &mut services),
            ExceptionOutcome::Handled
        );

        // No fixup registered: signal instead.
        services.can_fix_alignment = false;
        let mut ctx = ctx_with_vector(17);
        ctx.set_ex_code(ExceptionCode::new(
            TrapCode::BUS_ERROR,
            PfFlags::new().with_align(true),
        ));
        assert_eq!(
            arch.handle_exception(&mut ctx, &mut services),
            ExceptionOutcome::Signal(Signal::Bus)
        );
    }

    #[test]
    fn tracer_sees_enosys_at_entry() {
        let arch = X64Dispatch::new(ApiVersion::ALIGN_FLAG);
        let mut table = SyscallTable::new(8);
        table.register(2, |_args: [u64; 6]| 0x55);

        let mut ctx = X64Context::new();
        ctx.set_word(offset::RAX, 2);
        ctx.set_ex_code(ExceptionCode::new(TrapCode::SYSTEM_CALL, PfFlags::new()));
        ctx.post_receive();

        let mut services = TestServices::new();
        services.trace = true;
        arch.handle_syscall(&mut ctx, &table, &mut services);
        assert_eq!(services.traces[0], (TraceEvent::Entry, -ENOSYS));
        assert_eq!(services.traces[1], (TraceEvent::Exit, 0x55));
        assert_eq!(ctx.word(offset::RAX), 0x55);
    }

    #[test]
    fn arguments_follow_the_sysv_order() {
        let arch = X64Dispatch::new(ApiVersion::ALIGN_FLAG);
        let mut table = SyscallTable::new(8);
        table.register(1, |args: [u64; 6]| {
            assert_eq!(args, [10, 20, 30, 40, 50, 60]);
            0
        });

        let mut ctx = X64Context::new();
        ctx.set_word(offset::RAX, 1);
        ctx.set_word(offset::RDI, 10);
        ctx.set_word(offset::RSI, 20);
        ctx.set_word(offset::RDX, 30);
        ctx.set_word(offset::R10, 40);
        ctx.set_word(offset::R8, 50);
        ctx.set_word(offset::R9, 60);
        ctx.set_ex_code(ExceptionCode::new(TrapCode::SYSTEM_CALL, PfFlags::new()));
        ctx.post_receive();

        let mut services = TestServices::new();
        arch.handle_syscall(&mut ctx, &table, &mut services);
        assert_eq!(ctx.syscall_return(), 0);
    }
}
