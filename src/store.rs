//! Process store — fixed table of descriptors plus the stack arena
//!
//! Both grow in one direction only. A slot, once handed out, belongs to
//! its process for the life of the system; there is no delete.
//!
//! Author: Moroya Sakamoto

use heapless::Vec;

use crate::config::{NPROCS, STACK_ARENA_BYTES};
use crate::fault::Fault;
use crate::process::{Continuation, Pid, Process, SavedContext, StackRegion};

/// Filler for fresh stacks; the lowest word must keep it forever
pub const BLANK: usize = 0xdead_beef;

const WORD: usize = core::mem::size_of::<usize>();
const ARENA_WORDS: usize = STACK_ARENA_BYTES / WORD;

/// Round `x` up to a multiple of `n` (a power of two)
const fn round_up(x: usize, n: usize) -> usize {
    (x + n - 1) & !(n - 1)
}

/// Descriptor table and stack arena
pub struct ProcessTable {
    procs: Vec<Process, NPROCS>,
    arena: [usize; ARENA_WORDS],
    /// First free word of the arena
    brk: usize,
}

impl ProcessTable {
    pub const fn new() -> Self {
        Self {
            procs: Vec::new(),
            arena: [0; ARENA_WORDS],
            brk: 0,
        }
    }

    /// Allocate the next descriptor and a blanked stack of `stack_size` bytes
    pub fn create(&mut self, name: &str, stack_size: usize) -> Result<Pid, Fault> {
        if self.procs.is_full() {
            return Err(Fault::TooManyProcesses);
        }
        let words = round_up(stack_size.max(WORD), 8) / WORD;
        let available = (ARENA_WORDS - self.brk) * WORD;
        if words * WORD > available {
            return Err(Fault::OutOfMemory {
                requested: words * WORD,
                available,
            });
        }

        let stack = StackRegion {
            base: self.brk,
            words,
        };
        self.brk += words;
        self.arena[stack.base..stack.base + words].fill(BLANK);

        let pid = Pid(self.procs.len() as u16);
        // Capacity checked above
        let _ = self.procs.push(Process::new(pid, name, stack));
        Ok(pid)
    }

    /// Validate a destination: it must exist and not be dead
    pub fn lookup(&self, dest: i32) -> Result<Pid, Fault> {
        let p = usize::try_from(dest)
            .ok()
            .and_then(|i| self.procs.get(i))
            .ok_or(Fault::NoSuchProcess(dest))?;
        if p.is_dead() {
            return Err(Fault::DeadProcess(p.pid));
        }
        Ok(p.pid)
    }

    /// Number of descriptors handed out
    pub fn len(&self) -> usize {
        self.procs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.procs.is_empty()
    }

    pub fn get(&self, pid: Pid) -> Option<&Process> {
        self.procs.get(pid.index())
    }

    pub fn iter(&self) -> impl Iterator<Item = &Process> {
        self.procs.iter()
    }

    /// Stack words of `pid`, lowest address first
    pub fn stack(&self, pid: Pid) -> &[usize] {
        let r = self[pid].stack;
        &self.arena[r.base..r.base + r.words]
    }

    pub fn stack_mut(&mut self, pid: Pid) -> &mut [usize] {
        let r = self[pid].stack;
        &mut self.arena[r.base..r.base + r.words]
    }

    /// Is the guard word at the base of the stack still blank?
    pub fn stack_intact(&self, pid: Pid) -> bool {
        self.stack(pid).first() == Some(&BLANK)
    }

    /// Bytes of stack ever written, measured from the top down
    pub fn stack_used(&self, pid: Pid) -> usize {
        let stack = self.stack(pid);
        let blank = stack.iter().take_while(|&&w| w == BLANK).count();
        (stack.len() - blank) * WORD
    }

    /// Address of word `offset` in the stack of `pid`
    pub fn stack_addr(&self, pid: Pid, offset: usize) -> usize {
        self.stack(pid).as_ptr() as usize + offset * WORD
    }

    /// Record a stack pointer from the port in move-independent form
    pub fn save(&self, psp: Continuation) -> SavedContext {
        let base = self.arena.as_ptr() as usize;
        match psp.0.checked_sub(base) {
            Some(off) if off < ARENA_WORDS * WORD && off % WORD == 0 => {
                SavedContext::Arena(off / WORD)
            }
            _ => SavedContext::Foreign(psp.0),
        }
    }

    /// Address to resume `ctx` from, at the arena's current location
    pub fn resolve(&self, ctx: SavedContext) -> Continuation {
        match ctx {
            SavedContext::Arena(word) => Continuation(self.arena.as_ptr() as usize + word * WORD),
            SavedContext::Foreign(addr) => Continuation(addr),
        }
    }

    /// Bytes of arena not yet handed out
    pub fn free_bytes(&self) -> usize {
        (ARENA_WORDS - self.brk) * WORD
    }
}

impl Default for ProcessTable {
    fn default() -> Self {
        Self::new()
    }
}

impl core::ops::Index<Pid> for ProcessTable {
    type Output = Process;

    fn index(&self, pid: Pid) -> &Process {
        &self.procs[pid.index()]
    }
}

impl core::ops::IndexMut<Pid> for ProcessTable {
    fn index_mut(&mut self, pid: Pid) -> &mut Process {
        &mut self.procs[pid.index()]
    }
}
