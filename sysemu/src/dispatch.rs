// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Architecture-neutral trap routing.

use crate::ipc::FatalError;
use crate::syscall::SyscallTable;
use regctx::RegisterContext;
use ukdef::Signal;
use ukdef::TrapCode;

/// What a classified trap resolved to.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
#[must_use]
pub enum ExceptionOutcome {
    /// Resolved in place (emulated, fixed up, or lazily enabled); nothing
    /// reaches the faulting thread.
    Handled,
    /// The fault is the thread's problem: deliver this signal.
    Signal(Signal),
}

/// Syscall trace hook points.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum TraceEvent {
    Entry,
    Exit,
}

/// The collaborators a dispatcher calls back into, owned by the component
/// instance rather than process-wide state.
///
/// Implementations wrap the emulated kernel's thread state, address-space
/// access, and signal machinery; the dispatch core stays free of globals.
pub trait TaskServices<C: RegisterContext> {
    /// Whether the owning thread's capability set includes an FPU.
    fn has_fpu(&self) -> bool;

    /// Reads the instruction word at `addr` in the faulting address space.
    fn read_instruction(&mut self, ctx: &C, addr: u64) -> Option<u32>;

    /// Attempts to emulate an unaligned access in place. No handler is
    /// registered by default.
    fn fix_alignment(&mut self, ctx: &mut C) -> bool {
        let _ = ctx;
        false
    }

    /// x86 only: privileged-instruction emulation (cli/sti, I/O ports) on a
    /// general protection fault.
    fn emulate_privileged(&mut self, ctx: &mut C) -> bool {
        let _ = ctx;
        false
    }

    /// A breakpoint trap discovered by instruction decode.
    fn breakpoint(&mut self, ctx: &mut C, instr: u32);

    /// Resolves a page fault; the returned outcome is applied as-is.
    fn page_fault(&mut self, ctx: &mut C) -> ExceptionOutcome;

    /// Queues `signal` against the owning thread.
    fn force_signal(&mut self, ctx: &mut C, signal: Signal);

    /// Runs pending-signal delivery so a restartable syscall result can be
    /// rewritten before the thread resumes.
    fn deliver_signals(&mut self, ctx: &mut C);

    /// Whether syscall tracing is armed for the thread.
    fn trace_syscalls(&self) -> bool {
        false
    }

    /// Syscall trace callout.
    fn trace_syscall(&mut self, ctx: &mut C, event: TraceEvent) {
        let _ = (ctx, event);
    }

    /// Processor version register, for PowerPC `mfspr` emulation.
    fn pvr(&self) -> u32 {
        0
    }
}

/// One architecture family's trap and syscall semantics.
///
/// Selected once at startup; there is no conditional compilation in the
/// routing core.
pub trait ArchDispatch {
    type Ctx: RegisterContext;

    /// Maps a non-syscall trap to a signal outcome, emulating what can be
    /// resolved in place.
    fn handle_exception(
        &self,
        ctx: &mut Self::Ctx,
        services: &mut impl TaskServices<Self::Ctx>,
    ) -> ExceptionOutcome;

    /// Executes one system call and prepares the context for resumption.
    fn handle_syscall(
        &self,
        ctx: &mut Self::Ctx,
        table: &SyscallTable,
        services: &mut impl TaskServices<Self::Ctx>,
    );
}

/// Routes one received trap context.
///
/// Trap codes outside the closed enumeration (and kernel-reported context
/// corruption) are a desynchronization between the emulated task and the
/// kernel: fatal, never ignored.
pub fn dispatch<A: ArchDispatch>(
    arch: &A,
    ctx: &mut A::Ctx,
    table: &SyscallTable,
    services: &mut impl TaskServices<A::Ctx>,
) -> Result<(), FatalError> {
    let trap = ctx.trap_code();
    if !trap.is_known() || trap == TrapCode::CORRUPTED_CONTEXT {
        tracing::error!(code = trap.0, "trap code outside protocol");
        return Err(FatalError::UnknownTrap(trap.0));
    }

    match trap {
        TrapCode::SYSTEM_CALL => arch.handle_syscall(ctx, table, services),
        TrapCode::SEGMENT_VIOLATION => {
            let outcome = services.page_fault(ctx);
            apply(outcome, ctx, services);
        }
        // Stopped while running in user space; nothing to do.
        TrapCode::NONE => {}
        _ => {
            let outcome = arch.handle_exception(ctx, services);
            tracing::trace!(code = trap.0, ?outcome, pc = ctx.pc(), "exception");
            apply(outcome, ctx, services);
        }
    }
    Ok(())
}

fn apply<C: RegisterContext>(
    outcome: ExceptionOutcome,
    ctx: &mut C,
    services: &mut impl TaskServices<C>,
) {
    match outcome {
        ExceptionOutcome::Handled => {}
        ExceptionOutcome::Signal(signal) => services.force_signal(ctx, signal),
    }
}
