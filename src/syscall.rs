//! System call dispatcher
//!
//! A trap arrives as a `TrapFrame`: the operation code from the trap
//! instruction plus the caller's saved r0..r2. It is decoded once into a
//! `Syscall` and then carried out on the current process's behalf.
//!
//! Author: Moroya Sakamoto

use crate::fault::Fault;
use crate::frame::TrapFrame;
use crate::kernel::Kernel;
use crate::message::{Message, MessageType};
use crate::process::{Continuation, Pid, State};

pub const SYS_YIELD: u8 = 0;
pub const SYS_SEND: u8 = 1;
pub const SYS_RECEIVE: u8 = 2;
pub const SYS_SENDREC: u8 = 3;
pub const SYS_EXIT: u8 = 4;
pub const SYS_DUMP: u8 = 5;
pub const SYS_TICK: u8 = 6;

/// A decoded kernel request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Syscall {
    /// Give up the CPU to any ready process of equal or higher priority
    Yield,
    Send { dest: i32, msg: Message },
    /// `timeout`: `None` waits forever, `Some(0)` polls
    Receive {
        filter: MessageType,
        timeout: Option<u32>,
    },
    SendRec { dest: i32, msg: Message },
    Exit,
    Dump,
    /// Issued by the timer driver for every tick
    Tick { ms: u32 },
}

impl Syscall {
    /// Decode the arguments of a trap
    ///
    /// Register layout: SEND/SENDREC take the destination in r0 and the
    /// message alongside; RECEIVE takes the filter in r0 and the timeout
    /// in r2, negative meaning forever; TICK takes milliseconds in r0.
    /// A filter outside the type range (other than -1 for ANY) or a
    /// negative tick is rejected.
    pub fn decode(frame: &TrapFrame) -> Result<Self, Fault> {
        let [r0, _, r2] = frame.args;
        let message = || frame.message.ok_or(Fault::MissingMessage(frame.op));
        let bad = |value| Fault::BadArgument { op: frame.op, value };
        match frame.op {
            SYS_YIELD => Ok(Syscall::Yield),
            SYS_SEND => Ok(Syscall::Send {
                dest: r0,
                msg: message()?,
            }),
            SYS_RECEIVE => Ok(Syscall::Receive {
                filter: match r0 {
                    -1 => MessageType::ANY,
                    ty => MessageType(u16::try_from(ty).map_err(|_| bad(r0))?),
                },
                timeout: u32::try_from(r2).ok(),
            }),
            SYS_SENDREC => Ok(Syscall::SendRec {
                dest: r0,
                msg: message()?,
            }),
            SYS_EXIT => Ok(Syscall::Exit),
            SYS_DUMP => Ok(Syscall::Dump),
            SYS_TICK => Ok(Syscall::Tick {
                ms: u32::try_from(r0).map_err(|_| bad(r0))?,
            }),
            op => Err(Fault::UnknownSyscall(op)),
        }
    }

    /// Trap frame that decodes back to this call, as a user-side stub builds it
    pub fn encode(&self) -> TrapFrame {
        match *self {
            Syscall::Yield => TrapFrame::new(SYS_YIELD, [0; 3]),
            Syscall::Send { dest, msg } => TrapFrame::with_message(SYS_SEND, [dest, 0, 0], msg),
            Syscall::Receive { filter, timeout } => {
                let r2 = timeout.map_or(-1, |ms| i32::try_from(ms).unwrap_or(i32::MAX));
                let r0 = if filter == MessageType::ANY {
                    -1
                } else {
                    i32::from(filter.0)
                };
                TrapFrame::new(SYS_RECEIVE, [r0, 0, r2])
            }
            Syscall::SendRec { dest, msg } => {
                TrapFrame::with_message(SYS_SENDREC, [dest, 0, 0], msg)
            }
            Syscall::Exit => TrapFrame::new(SYS_EXIT, [0; 3]),
            Syscall::Dump => TrapFrame::new(SYS_DUMP, [0; 3]),
            Syscall::Tick { ms } => {
                TrapFrame::new(SYS_TICK, [i32::try_from(ms).unwrap_or(i32::MAX), 0, 0])
            }
        }
    }
}

impl Kernel {
    /// Trap entry: save the caller's context, check its stack, carry out
    /// the request and return the context to resume
    pub fn system_call(&mut self, psp: Continuation, frame: &TrapFrame) -> Continuation {
        let me = self.current;
        self.save_context(psp);
        if !self.procs.stack_intact(me) {
            self.fail(Fault::StackOverflow(me));
        }
        let r = Syscall::decode(frame);
        let call = self.ok(r);
        self.dispatch(call)
    }

    /// Carry out `call` for the current process
    pub fn dispatch(&mut self, call: Syscall) -> Continuation {
        self.stats.syscalls += 1;
        log::trace!("syscall: {} {:?}", self.current, call);
        match call {
            Syscall::Yield => {
                self.make_ready(self.current);
                self.reschedule();
            }
            Syscall::Send { dest, msg } => self.send(dest, msg),
            Syscall::Receive { filter, timeout } => self.receive(filter, timeout),
            Syscall::SendRec { dest, msg } => self.sendrec(dest, msg),
            Syscall::Exit => {
                let me = self.current;
                if me == Pid::IDLE {
                    self.fail(Fault::BadState {
                        pid: me,
                        state: self.procs[me].state,
                        op: "exit",
                    });
                }
                self.procs[me].state = State::Dead;
                log::info!("exit: pid {}", me);
                self.reschedule();
            }
            Syscall::Dump => self.dump_to_log(),
            Syscall::Tick { ms } => self.tick(ms),
        }
        self.resume()
    }
}
