// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! PowerPC trap classification and syscall convention.

use crate::dispatch::ArchDispatch;
use crate::dispatch::ExceptionOutcome;
use crate::dispatch::TaskServices;
use crate::dispatch::TraceEvent;
use crate::syscall::SyscallTable;
use regctx::ppc::offset;
use regctx::ppc::PpcContext;
use regctx::ppc::ALIGNMENT_TRAP_BOOKE;
use regctx::ppc::ALIGNMENT_TRAP_OEA;
use regctx::ppc::INST_MFSPR_PVR;
use regctx::ppc::INST_MFSPR_PVR_MASK;
use regctx::ppc::MSR_SPE;
use regctx::RegisterContext;
use ukdef::errno::is_restart_sentinel;
use ukdef::Signal;
use ukdef::TrapCode;

/// PowerPC family dispatcher.
pub struct PpcDispatch {
    alignment_trap: u32,
    /// Core has the SPE APU in place of a classic FPU (e500).
    spe: bool,
}

impl PpcDispatch {
    /// Dispatcher for classic OEA cores.
    pub fn new() -> Self {
        Self {
            alignment_trap: ALIGNMENT_TRAP_OEA,
            spe: false,
        }
    }

    /// Dispatcher for BookE cores, optionally with SPE.
    pub fn book_e(spe: bool) -> Self {
        Self {
            alignment_trap: ALIGNMENT_TRAP_BOOKE,
            spe,
        }
    }
}

impl Default for PpcDispatch {
    fn default() -> Self {
        Self::new()
    }
}

impl ArchDispatch for PpcDispatch {
    type Ctx = PpcContext;

    fn handle_exception(
        &self,
        ctx: &mut Self::Ctx,
        services: &mut impl TaskServices<Self::Ctx>,
    ) -> ExceptionOutcome {
        // Alignment interrupts arrive as bus errors; the entry vector is the
        // reliable discriminator.
        if ctx.trap == self.alignment_trap && services.fix_alignment(ctx) {
            ctx.set_pc(ctx.pc() + 4);
            return ExceptionOutcome::Handled;
        }

        match ctx.trap_code() {
            TrapCode::FP_UNAVAILABLE => {
                ctx.enable_fpu();
                if self.spe {
                    ctx.set_word(offset::MSR, ctx.word(offset::MSR) | MSR_SPE);
                }
                ExceptionOutcome::Handled
            }
            TrapCode::ILLEGAL_INSTRUCTION => {
                // User space reads the processor version with `mfspr rD,PVR`,
                // which is privileged here. Emulate just that.
                if let Some(instr) = services.read_instruction(ctx, ctx.pc()) {
                    if instr & INST_MFSPR_PVR_MASK == INST_MFSPR_PVR {
                        let rd = (instr >> 21) as usize & 0x1f;
                        ctx.set_word(rd, services.pvr());
                        ctx.set_pc(ctx.pc() + 4);
                        return ExceptionOutcome::Handled;
                    }
                }
                ExceptionOutcome::Signal(Signal::Ill)
            }
            TrapCode::ARITHMETIC_OVERFLOW => ExceptionOutcome::Signal(Signal::Ill),
            TrapCode::FP_EXCEPTION => ExceptionOutcome::Signal(Signal::Fpe),
            TrapCode::BREAKPOINT | TrapCode::TRAP => ExceptionOutcome::Signal(Signal::Trap),
            TrapCode::BUS_ERROR => ExceptionOutcome::Signal(Signal::Bus),
            code => {
                tracing::warn!(code = code.0, trap = ctx.trap, pc = ctx.pc(), "unhandled ppc trap");
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
        ctx.begin_syscall();
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
