// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! ARM trap classification and the EABI syscall convention.

use crate::dispatch::ArchDispatch;
use crate::dispatch::ExceptionOutcome;
use crate::dispatch::TaskServices;
use crate::dispatch::TraceEvent;
use crate::syscall::SyscallTable;
use regctx::arm::ArmContext;
use regctx::arm::BREAKPOINT_INSTR;
use regctx::arm::BREAKPOINT_MASK;
use regctx::RegisterContext;
use ukdef::errno::is_restart_sentinel;
use ukdef::ApiVersion;
use ukdef::Signal;
use ukdef::TrapCode;

/// ARM family dispatcher.
pub struct ArmDispatch {
    api_version: ApiVersion,
}

impl ArmDispatch {
    pub fn new(api_version: ApiVersion) -> Self {
        Self { api_version }
    }
}

impl ArchDispatch for ArmDispatch {
    type Ctx = ArmContext;

    fn handle_exception(
        &self,
        ctx: &mut Self::Ctx,
        services: &mut impl TaskServices<Self::Ctx>,
    ) -> ExceptionOutcome {
        match ctx.trap_code() {
            TrapCode::ILLEGAL_INSTRUCTION => {
                // The kernel breakpoint is an undefined instruction; decode
                // it before giving up. Condition bits don't matter.
                if let Some(instr) = services.read_instruction(ctx, ctx.pc()) {
                    if instr & BREAKPOINT_MASK == BREAKPOINT_INSTR {
                        services.breakpoint(ctx, instr);
                        return ExceptionOutcome::Handled;
                    }
                }
                ExceptionOutcome::Signal(Signal::Ill)
            }
            TrapCode::BREAKPOINT | TrapCode::TRAP => ExceptionOutcome::Signal(Signal::Trap),
            TrapCode::ARITHMETIC_OVERFLOW | TrapCode::FP_EXCEPTION => {
                ExceptionOutcome::Signal(Signal::Fpe)
            }
            TrapCode::FP_UNAVAILABLE => {
                if services.has_fpu() {
                    ctx.enable_fpu();
                    ExceptionOutcome::Handled
                } else {
                    ExceptionOutcome::Signal(Signal::Fpe)
                }
            }
            TrapCode::BUS_ERROR => {
                if ctx.is_alignment_fault(self.api_version) && services.fix_alignment(ctx) {
                    ExceptionOutcome::Handled
                } else {
                    ExceptionOutcome::Signal(Signal::Bus)
                }
            }
            code => {
                tracing::warn!(code = code.0, pc = ctx.pc(), "unhandled arm trap");
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
