// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! The per-thread exception loop.

use crate::dispatch::dispatch;
use crate::dispatch::ArchDispatch;
use crate::dispatch::TaskServices;
use crate::ipc::reply_and_wait_for_exception;
use crate::ipc::ExceptionPort;
use crate::ipc::FatalError;
use crate::ipc::Wait;
use crate::syscall::SyscallTable;
use regctx::RegisterContext;
use std::convert::Infallible;
use thiserror::Error;
use ukdef::ExceptionCode;
use ukdef::Uid;

/// Why [`ExceptionLoop::run`] stopped.
#[derive(Debug, Error)]
pub enum TaskHalt {
    /// The kernel preempted the loop for higher-priority work. Call
    /// [`ExceptionLoop::run`] again to resume.
    #[error("preempted by the kernel")]
    Preempted,
    /// Task/kernel desynchronization; the owning task must terminate.
    #[error(transparent)]
    Fatal(#[from] FatalError),
}

/// The perpetual request/reply cycle with the microkernel for one kernel
/// thread.
///
/// Owns the thread's register context and everything dispatch needs, so no
/// process-wide state is involved. Each kernel thread runs its own instance;
/// instances never share contexts.
pub struct ExceptionLoop<A: ArchDispatch, P, S> {
    arch: A,
    port: P,
    services: S,
    table: SyscallTable,
    ctx: A::Ctx,
    uid: Uid,
}

impl<A, P, S> ExceptionLoop<A, P, S>
where
    A: ArchDispatch,
    A::Ctx: Default,
    P: ExceptionPort,
    S: TaskServices<A::Ctx>,
{
    pub fn new(arch: A, port: P, services: S, table: SyscallTable) -> Self {
        let mut ctx = A::Ctx::default();
        // First cycle has nothing to reply to and no trap pending.
        ctx.set_ex_code(ExceptionCode::CONTINUE);
        Self {
            arch,
            port,
            services,
            table,
            ctx,
            uid: Uid::NONE,
        }
    }

    /// The thread context as of the last received trap.
    pub fn context(&self) -> &A::Ctx {
        &self.ctx
    }

    pub fn port(&self) -> &P {
        &self.port
    }

    pub fn services(&self) -> &S {
        &self.services
    }

    pub fn services_mut(&mut self) -> &mut S {
        &mut self.services
    }

    /// Runs the loop until preempted or fatally desynchronized. Normal
    /// operation never returns.
    pub fn run(&mut self) -> Result<Infallible, TaskHalt> {
        loop {
            self.step()?;
        }
    }

    /// One reply/wait/dispatch cycle.
    pub fn step(&mut self) -> Result<(), TaskHalt> {
        match reply_and_wait_for_exception(&mut self.port, &mut self.ctx, &mut self.uid)? {
            Wait::Preempted => {
                // Resume with a clean frame state, as if stopped in user
                // space.
                self.ctx.set_ex_code(ExceptionCode::CONTINUE);
                return Err(TaskHalt::Preempted);
            }
            Wait::Trapped => {}
        }

        self.ctx.post_receive();
        dispatch(&self.arch, &mut self.ctx, &self.table, &mut self.services)?;
        Ok(())
    }
}
