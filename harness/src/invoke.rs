// invoke.rs - Calling into the image as if it were a function
//
// A call is: arguments into r0-r3, lr at the trap, run from the entry until
// pc reaches the trap, results out of r0/r1. Nothing is reset between calls;
// the image's globals are expected to carry over.

use crate::error::{HarnessError, Result};
use crate::substrate::{Reg, Substrate};
use crate::trap::TrapRegion;
use tracing::debug;

/// One call site, built fresh for every invocation
#[derive(Debug, Clone, Copy)]
pub struct CallDescriptor<'a> {
    pub entry: u32,
    pub args: &'a [u32],
    pub return_trap: u32,
}

/// Drives single calls against a substrate
#[derive(Debug, Clone)]
pub struct Invoker {
    trap: TrapRegion,
    stack_top: u32,
    max_instructions: u64,
}

impl Invoker {
    pub fn new(trap: TrapRegion, stack_top: u32, max_instructions: u64) -> Self {
        Self {
            trap,
            stack_top,
            max_instructions,
        }
    }

    /// Describe a call to `entry` returning into this invoker's trap
    pub fn describe<'a>(&self, entry: u32, args: &'a [u32]) -> CallDescriptor<'a> {
        CallDescriptor {
            entry,
            args,
            return_trap: self.trap.return_address(),
        }
    }

    /// Call `entry` with `args` and return (r0, r1)
    pub fn invoke(
        &self,
        substrate: &mut (impl Substrate + ?Sized),
        entry: u32,
        args: &[u32],
    ) -> Result<[u32; 2]> {
        self.call(substrate, &self.describe(entry, args))
    }

    pub fn call(
        &self,
        substrate: &mut (impl Substrate + ?Sized),
        call: &CallDescriptor<'_>,
    ) -> Result<[u32; 2]> {
        if call.args.len() > Reg::ARGS.len() {
            return Err(HarnessError::TooManyArgs {
                entry: call.entry,
                count: call.args.len(),
            });
        }

        let stop = call.return_trap & !1;
        if !self.trap.contains(stop) {
            return Err(HarnessError::UnknownAddress { addr: stop });
        }

        for (&reg, &value) in Reg::ARGS.iter().zip(call.args) {
            substrate.set_reg(reg, value)?;
        }
        substrate.set_reg(Reg::Sp, self.stack_top)?;
        substrate.set_reg(Reg::Lr, call.return_trap)?;

        substrate.run_until(call.entry, stop, self.max_instructions)?;

        let pc = substrate.reg(Reg::Pc)?;
        if pc != stop {
            return Err(HarnessError::TrapNotReached {
                entry: call.entry,
                pc,
            });
        }

        let result = [substrate.reg(Reg::R0)?, substrate.reg(Reg::R1)?];
        debug!(
            "call 0x{:08x}({:x?}) -> r0=0x{:08x} r1=0x{:08x}",
            call.entry, call.args, result[0], result[1]
        );
        Ok(result)
    }
}
