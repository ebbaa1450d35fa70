// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! System-call and exception emulation for tasks hosted on the microkernel.
//!
//! A hosted task never sees traps directly: the kernel freezes the faulting
//! thread, writes its register context into an IPC message, and delivers it
//! to the task's exception thread. [`ExceptionLoop`] is that thread's engine.
//! Each received context is normalized, classified by an architecture
//! dispatcher, resolved through the [`SyscallTable`] or the task's
//! [`TaskServices`], and replied to so the thread resumes.
//!
//! There is no process-wide state: every collaborator the loop needs is owned
//! by the loop instance, and each kernel thread runs its own loop.

#![forbid(unsafe_code)]

pub mod arch;
mod dispatch;
mod ipc;
mod syscall;
mod task;

pub use dispatch::dispatch;
pub use dispatch::ArchDispatch;
pub use dispatch::ExceptionOutcome;
pub use dispatch::TaskServices;
pub use dispatch::TraceEvent;
pub use ipc::reply_and_wait_for_exception;
pub use ipc::ExceptionPort;
pub use ipc::FatalError;
pub use ipc::IpcError;
pub use ipc::Received;
pub use ipc::Wait;
pub use ipc::Wakeup;
pub use syscall::Syscall;
pub use syscall::SyscallTable;
pub use task::ExceptionLoop;
pub use task::TaskHalt;
