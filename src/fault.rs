//! Fatal kernel faults
//!
//! The kernel has nothing above it to recover from a broken invariant,
//! so every fault is terminal: it is logged and then the system halts
//! through the panic path. Faults are never returned as `Result`s.
//!
//! Author: Moroya Sakamoto

use core::fmt;

use crate::process::{Pid, Priority, State};

/// Broad category of a fault
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultClass {
    /// A fixed-size table or arena is full
    Capacity,
    /// A message or interrupt aimed at something that is not a live process
    InvalidDestination,
    /// A process used the kernel interface in a way it forbids
    ProtocolMisuse,
    /// A process overran its stack
    MemorySafety,
}

/// Every condition that halts the kernel
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    TooManyProcesses,
    OutOfMemory { requested: usize, available: usize },
    TooManyTimeouts,
    NoSuchProcess(i32),
    DeadProcess(Pid),
    NoSuchIrq(i32),
    UnexpectedInterrupt(i32),
    ReplyViaSendrec,
    BadState { pid: Pid, state: State, op: &'static str },
    AlreadyQueued(Pid),
    UnknownSyscall(u8),
    MissingMessage(u8),
    BadArgument { op: u8, value: i32 },
    BadPriority(Priority),
    StartAfterLaunch,
    BeforeLaunch(&'static str),
    TimeoutAlreadySet(Pid),
    TimeoutNotSet(Pid),
    StackOverflow(Pid),
}

impl Fault {
    pub fn class(&self) -> FaultClass {
        match self {
            Fault::TooManyProcesses | Fault::OutOfMemory { .. } | Fault::TooManyTimeouts => {
                FaultClass::Capacity
            }
            Fault::NoSuchProcess(_)
            | Fault::DeadProcess(_)
            | Fault::NoSuchIrq(_)
            | Fault::UnexpectedInterrupt(_) => FaultClass::InvalidDestination,
            Fault::StackOverflow(_) => FaultClass::MemorySafety,
            _ => FaultClass::ProtocolMisuse,
        }
    }
}

impl fmt::Display for Fault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Fault::TooManyProcesses => f.write_str("too many processes"),
            Fault::OutOfMemory { requested, available } => write!(
                f,
                "out of memory: stack of {requested} bytes, {available} left"
            ),
            Fault::TooManyTimeouts => f.write_str("too many timeouts"),
            Fault::NoSuchProcess(pid) => write!(f, "sending to a non-existent process {pid}"),
            Fault::DeadProcess(pid) => write!(f, "sending to a dead process {pid}"),
            Fault::NoSuchIrq(irq) => write!(f, "can't connect to irq {irq}"),
            Fault::UnexpectedInterrupt(irq) => write!(f, "unexpected interrupt {irq}"),
            Fault::ReplyViaSendrec => f.write_str("sendrec may not be used to send REPLY message"),
            Fault::BadState { pid, state, op } => {
                write!(f, "bad state {state:?} of process {pid} in {op}")
            }
            Fault::AlreadyQueued(pid) => write!(f, "process {pid} is already queued"),
            Fault::UnknownSyscall(op) => write!(f, "unknown syscall {op}"),
            Fault::MissingMessage(op) => write!(f, "syscall {op} needs a message"),
            Fault::BadArgument { op, value } => write!(f, "bad argument {value} to syscall {op}"),
            Fault::BadPriority(p) => write!(f, "bad priority {}", p.0),
            Fault::StartAfterLaunch => f.write_str("start() called after scheduler startup"),
            Fault::BeforeLaunch(op) => write!(f, "{op}() called before scheduler startup"),
            Fault::TimeoutAlreadySet(pid) => write!(f, "timeout already set for process {pid}"),
            Fault::TimeoutNotSet(pid) => write!(f, "cancelling an unset timeout of process {pid}"),
            Fault::StackOverflow(pid) => write!(f, "stack overflow in process {pid}"),
        }
    }
}

/// Log `fault` and halt. `context` names the current process, if any.
#[cold]
#[track_caller]
pub fn halt(fault: Fault, context: Option<&str>) -> ! {
    match context {
        Some(name) => log::error!("panic: {} in process {}", fault, name),
        None => log::error!("panic: {}", fault),
    }
    panic!("{}", fault)
}
