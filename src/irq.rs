//! Interrupt table — which process handles which interrupt line
//!
//! Populated by `connect`. An interrupt on a line nobody connected to is
//! a fault, not something to ignore.
//!
//! Author: Moroya Sakamoto

use crate::config::N_INTERRUPTS;
use crate::fault::Fault;
use crate::process::Pid;

/// IRQ line → handler process
pub struct IrqTable {
    handlers: [Option<Pid>; N_INTERRUPTS],
}

impl IrqTable {
    pub const fn new() -> Self {
        Self {
            handlers: [None; N_INTERRUPTS],
        }
    }

    fn line(irq: i32) -> Option<usize> {
        usize::try_from(irq).ok().filter(|&i| i < N_INTERRUPTS)
    }

    /// Register `pid` as the handler of `irq`, replacing any earlier one
    pub fn connect(&mut self, irq: i32, pid: Pid) -> Result<(), Fault> {
        let line = Self::line(irq).ok_or(Fault::NoSuchIrq(irq))?;
        self.handlers[line] = Some(pid);
        Ok(())
    }

    /// Handler registered for `irq`
    pub fn handler(&self, irq: i32) -> Result<Pid, Fault> {
        Self::line(irq)
            .and_then(|line| self.handlers[line])
            .ok_or(Fault::UnexpectedInterrupt(irq))
    }
}

impl Default for IrqTable {
    fn default() -> Self {
        Self::new()
    }
}
