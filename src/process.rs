//! Process descriptors — static, no-alloc control blocks
//!
//! One descriptor per process, created once and never freed. Links
//! between descriptors are slot indices, not pointers: a descriptor sits
//! in at most one queue at a time and records which one in `link`.
//!
//! Author: Moroya Sakamoto

use core::fmt;

use heapless::String;

use crate::config::NAME_LEN;
use crate::message::{Message, MessageType};

/// Process identifier, an index into the process table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(transparent)]
pub struct Pid(pub u16);

impl Pid {
    /// The idle process is always created first
    pub const IDLE: Pid = Pid(0);
    /// Pseudo-sender for kernel-made messages; never a real process
    pub const HARDWARE: Pid = Pid(u16::MAX);

    #[inline]
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for Pid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if *self == Pid::HARDWARE {
            f.write_str("HARDWARE")
        } else {
            write!(f, "{}", self.0)
        }
    }
}

/// Process body; receives the argument given to `start`
pub type ProcessFn = fn(usize);

/// Scheduling priority (lower number = higher priority)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Priority(pub u8);

impl Priority {
    /// Reserved for processes connected to an interrupt line
    pub const HANDLER: Priority = Priority(0);
    /// Responsive
    pub const HIGH: Priority = Priority(1);
    /// Normal; every process starts here
    pub const LOW: Priority = Priority(2);
    /// The idle process only; never queued
    pub const IDLE: Priority = Priority(3);

    /// Ready-queue index, `None` for the idle level
    #[inline]
    pub fn queue(self) -> Option<usize> {
        if self < Priority::IDLE {
            Some(self.0 as usize)
        } else {
            None
        }
    }
}

/// Process state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    /// Exited; terminal
    Dead,
    /// Running or ready to run
    Active,
    /// Blocked in `send`
    Sending,
    /// Blocked in `receive`
    Receiving,
    /// Blocked in `sendrec` before the request was taken
    SendRec,
    /// The idle process
    Idling,
}

impl State {
    /// Fixed-width tag used by the process dump
    pub const fn tag(self) -> &'static str {
        match self {
            State::Dead => "[DEAD]   ",
            State::Active => "[ACTIVE] ",
            State::Sending => "[SEND]   ",
            State::Receiving => "[RECEIVE]",
            State::SendRec => "[SENDREC]",
            State::Idling => "[IDLE]   ",
        }
    }
}

/// Which queue a descriptor is linked into
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Link {
    /// Ready queue of the given priority level
    Ready(u8),
    /// Waiting list of senders owned by the given receiver
    Waiting(Pid),
}

/// Opaque saved execution context: the stack pointer the trampoline
/// resumes from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Continuation(pub usize);

/// Where a process resumes, as kept in its descriptor
///
/// Stacks in the arena are recorded by word offset so the record stays
/// valid when the kernel value moves; it becomes an address again only
/// when handed back to the port.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SavedContext {
    /// Word offset into the stack arena
    Arena(usize),
    /// Address outside the arena, e.g. the boot stack idle runs on
    Foreign(usize),
}

impl Default for SavedContext {
    fn default() -> Self {
        SavedContext::Foreign(0)
    }
}

/// Region of the stack arena owned by one process (in words)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StackRegion {
    pub base: usize,
    pub words: usize,
}

impl StackRegion {
    pub const fn bytes(&self) -> usize {
        self.words * core::mem::size_of::<usize>()
    }
}

/// Process descriptor
#[derive(Debug, Clone)]
pub struct Process {
    pub pid: Pid,
    pub name: String<NAME_LEN>,
    pub state: State,
    pub context: SavedContext,
    pub stack: StackRegion,
    pub priority: Priority,
    /// Head of the list of processes waiting to send to this one
    pub waiting: Option<Pid>,
    /// Interrupt arrived while not receiving
    pub pending: bool,
    /// Type accepted while receiving
    pub filter: MessageType,
    /// Outgoing message while queued as a sender, delivered message after
    pub slot: Option<Message>,
    /// Remaining time (ms) until a TIMEOUT; set iff in the timeout registry
    pub deadline: Option<i32>,
    /// Next descriptor in whichever queue `link` names
    pub next: Option<Pid>,
    pub link: Option<Link>,
    /// Accumulated run time (ms)
    pub runtime_ms: u64,
    /// Times picked by the scheduler
    pub turns: u32,
}

impl Process {
    /// Fresh descriptor: ACTIVE, LOW priority, accepting anything
    pub fn new(pid: Pid, name: &str, stack: StackRegion) -> Self {
        Self {
            pid,
            name: truncated(name),
            state: State::Active,
            context: SavedContext::default(),
            stack,
            priority: Priority::LOW,
            waiting: None,
            pending: false,
            filter: MessageType::ANY,
            slot: None,
            deadline: None,
            next: None,
            link: None,
            runtime_ms: 0,
            turns: 0,
        }
    }

    pub fn is_dead(&self) -> bool {
        self.state == State::Dead
    }

    /// Is this process blocked in receive with a filter that takes `ty`?
    #[inline]
    pub fn accepts(&self, ty: MessageType) -> bool {
        self.state == State::Receiving && self.filter.accepts(ty)
    }

    /// Average run time per turn, the ordering key of the scored policy
    pub fn score(&self) -> u64 {
        self.runtime_ms / u64::from(self.turns.max(1))
    }
}

/// Copy at most `NAME_LEN` bytes of `name`, cutting on a char boundary
fn truncated(name: &str) -> String<NAME_LEN> {
    let mut end = name.len().min(NAME_LEN);
    while !name.is_char_boundary(end) {
        end -= 1;
    }
    let mut out = String::new();
    // Cannot fail: `end <= NAME_LEN`
    let _ = out.push_str(&name[..end]);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn region() -> StackRegion {
        StackRegion { base: 0, words: 64 }
    }

    #[test]
    fn test_process_creation() {
        let p = Process::new(Pid(3), "serial", region());
        assert_eq!(p.state, State::Active);
        assert_eq!(p.priority, Priority::LOW);
        assert_eq!(p.filter, MessageType::ANY);
        assert!(p.waiting.is_none());
        assert!(p.deadline.is_none());
        assert!(p.link.is_none());
        assert!(!p.pending);
        assert_eq!(p.name.as_str(), "serial");
    }

    #[test]
    fn test_long_name_truncated() {
        let p = Process::new(Pid(1), "a-very-long-process-name", region());
        assert_eq!(p.name.len(), NAME_LEN);
        assert_eq!(p.name.as_str(), "a-very-long-pro");
    }

    #[test]
    fn test_name_truncation_respects_utf8() {
        let p = Process::new(Pid(1), "ééééééééé", region());
        assert!(p.name.len() <= NAME_LEN);
        assert_eq!(p.name.as_str(), "ééééééé");
    }

    #[test]
    fn test_priority_ordering() {
        assert!(Priority::HANDLER < Priority::HIGH);
        assert!(Priority::HIGH < Priority::LOW);
        assert!(Priority::LOW < Priority::IDLE);
        assert_eq!(Priority::LOW.queue(), Some(2));
        assert_eq!(Priority::IDLE.queue(), None);
    }

    #[test]
    fn test_accepts_only_when_receiving() {
        let mut p = Process::new(Pid(1), "rx", region());
        assert!(!p.accepts(MessageType(20)));
        p.state = State::Receiving;
        assert!(p.accepts(MessageType(20)));
        p.filter = MessageType::REPLY;
        assert!(!p.accepts(MessageType(20)));
        assert!(p.accepts(MessageType::REPLY));
    }

    #[test]
    fn test_score() {
        let mut p = Process::new(Pid(1), "busy", region());
        assert_eq!(p.score(), 0);
        p.runtime_ms = 90;
        p.turns = 3;
        assert_eq!(p.score(), 30);
    }

    #[test]
    fn test_pid_display() {
        use core::fmt::Write;
        let mut s: String<16> = String::new();
        write!(s, "{} {}", Pid(7), Pid::HARDWARE).unwrap();
        assert_eq!(s.as_str(), "7 HARDWARE");
    }
}
