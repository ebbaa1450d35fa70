// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! The exception IPC protocol with the microkernel.

use regctx::RegisterContext;
use thiserror::Error;
use ukdef::ExceptionCode;
use ukdef::Uid;

/// A delivered exception message.
#[derive(Copy, Clone, Debug)]
pub struct Received {
    /// The faulting thread, addressee of the eventual reply.
    pub sender: Uid,
    /// Payload bytes the kernel wrote.
    pub len: usize,
}

/// Why a blocking receive returned.
#[derive(Copy, Clone, Debug)]
pub enum Wakeup {
    /// A trap/pagefault message arrived.
    Message(Received),
    /// The kernel cancelled the wait to let higher-priority work run. Not
    /// an error; the loop resumes afterwards.
    Preempted,
}

/// IPC-layer failure. Any of these after a successful startup means the
/// channel to the kernel is corrupt; there is no retry.
#[derive(Debug, Error)]
pub enum IpcError {
    #[error("ipc completion code {0:#x}")]
    Completion(u32),
    #[error("sysemu wait failed with {0:#x}")]
    Sysemu(u32),
}

/// Unrecoverable desynchronization between the emulated task and the
/// kernel. The owning task must terminate; continuing would process a
/// corrupted register context.
#[derive(Debug, Error)]
pub enum FatalError {
    #[error("exception ipc failed")]
    Ipc(#[source] IpcError),
    #[error("exception message size mismatch: expected {expected}, got {got}")]
    SizeMismatch { expected: usize, got: usize },
    #[error("trap code {0:#x} outside protocol")]
    UnknownTrap(u16),
}

/// The kernel endpoint delivering traps and accepting replies.
pub trait ExceptionPort {
    /// Replies to `reply_to` with the payload (if set), then blocks until
    /// the kernel delivers the next exception into `payload`.
    fn reply_and_receive(
        &mut self,
        reply_to: Option<Uid>,
        payload: &mut [u8],
    ) -> Result<Wakeup, IpcError>;
}

/// How one reply-and-wait cycle ended, short of a fatal error.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
#[must_use]
pub enum Wait {
    /// A new trap was received; `uid` addresses its sender.
    Trapped,
    /// The kernel preempted the wait. No reply is outstanding anymore.
    Preempted,
}

/// Replies to the previous exception (if `uid` names one) and blocks for
/// the next, leaving the new sender in `uid` and the trap frame in `ctx`.
///
/// A reply marks the context as "continue" so the faulting thread resumes.
/// The kernel channel is assumed reliable: a bad completion code or a
/// size-mismatched message is fatal corruption, not a retry condition.
pub fn reply_and_wait_for_exception<C: RegisterContext>(
    port: &mut impl ExceptionPort,
    ctx: &mut C,
    uid: &mut Uid,
) -> Result<Wait, FatalError> {
    let reply_to = if uid.is_none() {
        None
    } else {
        ctx.set_ex_code(ExceptionCode::CONTINUE);
        Some(*uid)
    };

    let expected = ctx.payload().len();
    match port.reply_and_receive(reply_to, ctx.payload_mut()) {
        Ok(Wakeup::Message(received)) => {
            if received.len != expected {
                tracing::error!(
                    expected,
                    got = received.len,
                    "exception message size mismatch"
                );
                return Err(FatalError::SizeMismatch {
                    expected,
                    got: received.len,
                });
            }
            *uid = received.sender;
            Ok(Wait::Trapped)
        }
        Ok(Wakeup::Preempted) => {
            // The reply (if any) went out before the kernel cancelled the
            // wait; nothing is outstanding.
            *uid = Uid::NONE;
            Ok(Wait::Preempted)
        }
        Err(err) => {
            tracing::error!(error = &err as &dyn std::error::Error, "exception ipc failed");
            Err(FatalError::Ipc(err))
        }
    }
}
