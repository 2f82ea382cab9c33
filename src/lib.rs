//! microkern — Message-Passing Microkernel
//!
//! Priority scheduling fused with rendezvous IPC.
//!
//! Small single-core kernel for microcontrollers:
//! - Fixed process table and stack arena (no heap, no allocation)
//! - Three ready-queue priorities plus an idle process
//! - Synchronous send / receive / sendrec with typed messages
//! - Interrupts delivered to driver processes as messages
//! - Receive timeouts driven by a periodic tick
//!
//! Everything the kernel owns lives in one [`Kernel`]. A port calls
//! [`Kernel::system_call`] from its trap handler, [`Kernel::interrupt_request`]
//! from its interrupt handlers and [`Kernel::preempt`] when an interrupt
//! asked for a switch; each returns the context to resume.
//!
//! Author: Moroya Sakamoto

#![no_std]

#[cfg(feature = "std")]
extern crate std;

pub mod config;
pub mod fault;
pub mod frame;
pub mod global;
mod ipc;
pub mod irq;
pub mod kernel;
pub mod message;
pub mod process;
pub mod scheduler;
pub mod store;
pub mod syscall;
pub mod timer;

pub use config::{Config, SchedPolicy};
pub use fault::{Fault, FaultClass};
pub use frame::TrapFrame;
pub use kernel::{Kernel, KernelStats};
pub use message::{Message, MessageType, Payload};
pub use process::{Continuation, Pid, Priority, ProcessFn, State};
pub use syscall::Syscall;

use static_assertions::const_assert;

// Priorities HANDLER..LOW each own a queue; IDLE is the one past the end
const_assert!(Priority::IDLE.0 as usize == config::NPRIO);
const_assert!(config::NPROCS <= u16::MAX as usize);
const_assert!(core::mem::size_of::<Message>() <= 64);
const_assert!(config::IDLE_STACK >= frame::FRAME_WORDS * 4);

#[cfg(feature = "std")]
impl std::error::Error for Fault {}
