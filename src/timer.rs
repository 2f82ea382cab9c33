//! Timeout registry — receive deadlines driven by periodic ticks
//!
//! Deadlines are relative: each registered process keeps the time left
//! measured from the last full scan, and `ticks` counts the milliseconds
//! since that scan. A scan only happens once the earliest deadline has
//! been passed, so most ticks are a single addition.
//!
//! A timer fires on the tick *after* it becomes due. If ticks arrive at
//! regular intervals this guarantees no timer fires early, even one set
//! just before a tick.
//!
//! Author: Moroya Sakamoto

use heapless::Vec;

use crate::config::NPROCS;
use crate::fault::Fault;
use crate::process::Pid;
use crate::store::ProcessTable;

/// Processes with an active receive deadline
pub struct TimeoutRegistry {
    entries: Vec<Pid, NPROCS>,
    /// Milliseconds since the last scan
    ticks: i32,
    /// Earliest deadline; negative when overdue but not yet fired
    next_due: Option<i32>,
}

impl TimeoutRegistry {
    pub const fn new() -> Self {
        Self {
            entries: Vec::new(),
            ticks: 0,
            next_due: None,
        }
    }

    /// Register a deadline `ms` from now for `pid`
    pub fn set(&mut self, procs: &mut ProcessTable, pid: Pid, ms: u32) -> Result<(), Fault> {
        let p = &mut procs[pid];
        if p.deadline.is_some() {
            return Err(Fault::TimeoutAlreadySet(pid));
        }
        let due = self
            .ticks
            .saturating_add(i32::try_from(ms).unwrap_or(i32::MAX));
        self.entries
            .push(pid)
            .map_err(|_| Fault::TooManyTimeouts)?;
        p.deadline = Some(due);
        if self.next_due.map_or(true, |next| due < next) {
            self.next_due = Some(due);
        }
        Ok(())
    }

    /// Drop the deadline of `pid` before it fires
    pub fn cancel(&mut self, procs: &mut ProcessTable, pid: Pid) -> Result<(), Fault> {
        if procs[pid].deadline.take().is_none() {
            return Err(Fault::TimeoutNotSet(pid));
        }
        let idx = self
            .entries
            .iter()
            .position(|&e| e == pid)
            .ok_or(Fault::TimeoutNotSet(pid))?;
        self.entries.swap_remove(idx);
        if self.entries.is_empty() {
            self.next_due = None;
            self.ticks = 0;
        }
        Ok(())
    }

    /// Account for `ms` elapsed milliseconds
    ///
    /// Returns the processes whose deadline has passed. They are already
    /// out of the registry; delivering TIMEOUT is the caller's job.
    pub fn tick(&mut self, procs: &mut ProcessTable, ms: u32) -> Vec<Pid, NPROCS> {
        let mut expired = Vec::new();
        let ms = i32::try_from(ms).unwrap_or(i32::MAX);
        let Some(next_due) = self.next_due else {
            return expired;
        };
        if self.ticks <= next_due {
            self.ticks = self.ticks.saturating_add(ms);
            return expired;
        }

        let elapsed = self.ticks.saturating_add(ms);
        let mut next = None;
        let ticks = self.ticks;
        self.entries.retain(|&pid| {
            let p = &mut procs[pid];
            match p.deadline {
                Some(d) if d >= ticks => {
                    let left = d - elapsed;
                    p.deadline = Some(left);
                    if next.map_or(true, |n| left < n) {
                        next = Some(left);
                    }
                    true
                }
                _ => {
                    p.deadline = None;
                    // Same capacity as `entries`
                    let _ = expired.push(pid);
                    false
                }
            }
        });

        self.ticks = 0;
        self.next_due = next;
        expired
    }

    /// Number of registered deadlines
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, pid: Pid) -> bool {
        self.entries.contains(&pid)
    }

    /// Milliseconds accumulated since the last scan
    pub fn ticks(&self) -> i32 {
        self.ticks
    }

    pub fn next_due(&self) -> Option<i32> {
        self.next_due
    }
}

impl Default for TimeoutRegistry {
    fn default() -> Self {
        Self::new()
    }
}
