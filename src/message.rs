//! Messages — fixed-size values moved between processes by the kernel
//!
//! A message is 16 bytes on a 32-bit target: a type tag, the sender's
//! pid (filled in by the kernel, never by the caller) and three payload
//! slots. Each slot holds exactly one shape at a time.
//!
//! Author: Moroya Sakamoto

use crate::process::Pid;

/// Message type tag
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MessageType(pub u16);

impl MessageType {
    /// Receive filter accepting every type
    pub const ANY: MessageType = MessageType(u16::MAX);
    /// Hardware interrupt notification
    pub const INTERRUPT: MessageType = MessageType(1);
    /// Answer to a `sendrec` request
    pub const REPLY: MessageType = MessageType(2);
    /// Synthesized when a receive deadline passes
    pub const TIMEOUT: MessageType = MessageType(3);
    /// First type free for drivers and applications
    pub const FIRST_USER: MessageType = MessageType(16);

    /// Does a receive filter of `self` accept a message of type `ty`?
    #[inline]
    pub fn accepts(self, ty: MessageType) -> bool {
        self == MessageType::ANY || self == ty
    }

    pub fn is_reserved(self) -> bool {
        self.0 < Self::FIRST_USER.0 || self == Self::ANY
    }
}

/// One payload slot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Payload {
    Int(i32),
    /// Opaque pointer or driver handle
    Handle(usize),
    Bytes([u8; 4]),
}

impl Default for Payload {
    fn default() -> Self {
        Payload::Int(0)
    }
}

/// Number of payload slots in a message
pub const PAYLOAD_SLOTS: usize = 3;

/// Fixed-size IPC message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Message {
    /// Type tag, chosen by the sender
    pub ty: MessageType,
    /// Stamped by the kernel at delivery
    pub sender: Pid,
    /// Payload slots
    pub payload: [Payload; PAYLOAD_SLOTS],
}

impl Message {
    /// Message with an empty payload
    pub const fn new(ty: MessageType) -> Self {
        Self {
            ty,
            sender: Pid::HARDWARE,
            payload: [Payload::Int(0); PAYLOAD_SLOTS],
        }
    }

    /// Message carrying one integer in the first slot
    pub const fn with_int(ty: MessageType, value: i32) -> Self {
        let mut msg = Self::new(ty);
        msg.payload[0] = Payload::Int(value);
        msg
    }

    /// Kernel-originated message (INTERRUPT or TIMEOUT)
    pub(crate) const fn special(ty: MessageType) -> Self {
        Self::new(ty)
    }

    /// Set a slot, builder style
    pub fn set(mut self, slot: usize, value: Payload) -> Self {
        self.payload[slot] = value;
        self
    }

    /// Integer in `slot`, if that slot holds one
    pub fn int(&self, slot: usize) -> Option<i32> {
        match self.payload.get(slot) {
            Some(Payload::Int(v)) => Some(*v),
            _ => None,
        }
    }

    pub fn handle(&self, slot: usize) -> Option<usize> {
        match self.payload.get(slot) {
            Some(Payload::Handle(h)) => Some(*h),
            _ => None,
        }
    }

    pub fn bytes(&self, slot: usize) -> Option<[u8; 4]> {
        match self.payload.get(slot) {
            Some(Payload::Bytes(b)) => Some(*b),
            _ => None,
        }
    }

    /// Was this message synthesized by the kernel rather than sent by a process?
    pub fn from_hardware(&self) -> bool {
        self.sender == Pid::HARDWARE
    }
}
