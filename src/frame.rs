//! Trap frames — what the trampoline hands to the kernel, and the fake
//! exception frame a new process starts from
//!
//! The layout matches a Cortex-M exception entry: eight words pushed by
//! the port's trampoline (exception-return value, r4–r11), then the
//! eight the hardware stacks itself (r0–r3, r12, lr, pc, psr).
//!
//! Author: Moroya Sakamoto

use crate::message::Message;

/// Words in a saved frame
pub const FRAME_WORDS: usize = 17;

/// Word offsets within a saved frame
pub const ERV_SAVE: usize = 0;
pub const R0_SAVE: usize = 9;
pub const R1_SAVE: usize = 10;
pub const R2_SAVE: usize = 11;
pub const LR_SAVE: usize = 14;
pub const PC_SAVE: usize = 15;
pub const PSR_SAVE: usize = 16;

/// Exception return to thread mode on the process stack
pub const EXC_RETURN: usize = 0xffff_fffd;
/// Initial PSR with the Thumb bit set
pub const INIT_PSR: usize = 0x0100_0000;

/// Arguments of one trap, copied out of the caller's saved frame
///
/// Arguments are never read from live registers: an interrupt taken
/// between the trap and its dispatch may have clobbered them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrapFrame {
    /// Operation code from the trap instruction
    pub op: u8,
    /// Saved r0..r2
    pub args: [i32; 3],
    /// Copy of the caller's message buffer, for SEND and SENDREC
    pub message: Option<Message>,
}

impl TrapFrame {
    pub const fn new(op: u8, args: [i32; 3]) -> Self {
        Self {
            op,
            args,
            message: None,
        }
    }

    pub const fn with_message(op: u8, args: [i32; 3], message: Message) -> Self {
        Self {
            op,
            args,
            message: Some(message),
        }
    }
}

/// Build the frame a new process is first resumed from
///
/// Writes it at the top of `stack` and returns its word offset. `entry`
/// runs with `arg` in r0 and returns to `exit_vector`.
pub fn initial_frame(stack: &mut [usize], entry: usize, arg: usize, exit_vector: usize) -> usize {
    let sp = stack.len() - FRAME_WORDS;
    let frame = &mut stack[sp..];
    frame.fill(0);
    frame[PSR_SAVE] = INIT_PSR;
    frame[PC_SAVE] = entry & !0x1;
    frame[LR_SAVE] = exit_vector;
    frame[R0_SAVE] = arg;
    frame[ERV_SAVE] = EXC_RETURN;
    sp
}
