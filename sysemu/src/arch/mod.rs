// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Per-architecture trap classifiers and syscall entry conventions.

mod arm;
mod ppc;
mod x64;

pub use arm::ArmDispatch;
pub use ppc::PpcDispatch;
pub use x64::X64Dispatch;

#[cfg(test)]
pub(crate) mod testing {
    use crate::dispatch::ExceptionOutcome;
    use crate::dispatch::TaskServices;
    use crate::dispatch::TraceEvent;
    use regctx::RegisterContext;
    use ukdef::Signal;

    /// Scriptable [`TaskServices`] recording every callback.
    pub struct TestServices {
        pub has_fpu: bool,
        pub can_fix_alignment: bool,
        pub can_emulate_privileged: bool,
        pub instruction: Option<u32>,
        pub pvr: u32,
        pub trace: bool,
        pub signals: Vec<Signal>,
        pub breakpoints: Vec<u32>,
        pub page_faults: usize,
        pub deliveries: usize,
        /// Trace callouts with the syscall return register as seen at the
        /// callout.
        pub traces: Vec<(TraceEvent, i64)>,
    }

    impl TestServices {
        pub fn new() -> Self {
            Self {
                has_fpu: true,
                can_fix_alignment: false,
                can_emulate_privileged: false,
                instruction: None,
                pvr: 0,
                trace: false,
                signals: Vec::new(),
                breakpoints: Vec::new(),
                page_faults: 0,
                deliveries: 0,
                traces: Vec::new(),
            }
        }
    }

    impl<C: RegisterContext> TaskServices<C> for TestServices {
        fn has_fpu(&self) -> bool {
            self.has_fpu
        }

        fn read_instruction(&mut self, _ctx: &C, _addr: u64) -> Option<u32> {
            self.instruction
        }

        fn fix_alignment(&mut self, _ctx: &mut C) -> bool {
            self.can_fix_alignment
        }

        fn emulate_privileged(&mut self, _ctx: &mut C) -> bool {
            self.can_emulate_privileged
        }

        fn breakpoint(&mut self, _ctx: &mut C, instr: u32) {
            self.breakpoints.push(instr);
        }

        fn page_fault(&mut self, _ctx: &mut C) -> ExceptionOutcome {
            self.page_faults += 1;
            ExceptionOutcome::Handled
        }

        fn force_signal(&mut self, _ctx: &mut C, signal: Signal) {
            self.signals.push(signal);
        }

        fn deliver_signals(&mut self, _ctx: &mut C) {
            self.deliveries += 1;
        }

        fn trace_syscalls(&self) -> bool {
            self.trace
        }

        fn trace_syscall(&mut self, ctx: &mut C, event: TraceEvent) {
            self.traces.push((event, ctx.syscall_return()));
        }

        fn pvr(&self) -> u32 {
            self.pvr
        }
    }
}
