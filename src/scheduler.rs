//! Ready queues and strict-priority selection
//!
//! One intrusive queue per non-idle priority level, threaded through the
//! descriptors' `next` fields. `choose_next` always takes the head of the
//! most urgent non-empty queue and falls back to the idle process.
//! There is no time slicing: a process keeps the CPU until it blocks,
//! yields, exits, or an interrupt wakes a more urgent handler.
//!
//! Author: Moroya Sakamoto

use crate::config::{SchedPolicy, NPRIO};
use crate::fault::Fault;
use crate::process::{Link, Pid, Priority, State};
use crate::store::ProcessTable;

#[derive(Debug, Clone, Copy, Default)]
struct Queue {
    head: Option<Pid>,
    tail: Option<Pid>,
}

/// Per-priority ready queues
pub struct Scheduler {
    queues: [Queue; NPRIO],
    policy: SchedPolicy,
    /// Process picked by the last `choose_next`
    last: Option<Pid>,
    /// Uptime when `last` was dispatched
    dispatched_at: u64,
    /// Total context switches
    pub context_switches: u32,
}

impl Scheduler {
    pub const fn new(policy: SchedPolicy) -> Self {
        Self {
            queues: [Queue {
                head: None,
                tail: None,
            }; NPRIO],
            policy,
            last: None,
            dispatched_at: 0,
            context_switches: 0,
        }
    }

    pub fn policy(&self) -> SchedPolicy {
        self.policy
    }

    /// Mark `pid` ACTIVE and queue it at its priority level
    ///
    /// The idle process is never queued; it is what `choose_next` falls
    /// back to when every queue is empty.
    pub fn make_ready(&mut self, procs: &mut ProcessTable, pid: Pid) -> Result<(), Fault> {
        let p = &mut procs[pid];
        let Some(level) = p.priority.queue() else {
            return Ok(());
        };
        if p.is_dead() {
            return Err(Fault::BadState {
                pid,
                state: p.state,
                op: "make_ready",
            });
        }
        if p.link.is_some() {
            return Err(Fault::AlreadyQueued(pid));
        }
        p.state = State::Active;
        p.next = None;
        p.link = Some(Link::Ready(level as u8));

        match self.policy {
            SchedPolicy::Fifo => self.push_back(procs, level, pid),
            SchedPolicy::Scored => self.insert_scored(procs, level, pid),
        }
        Ok(())
    }

    fn push_back(&mut self, procs: &mut ProcessTable, level: usize, pid: Pid) {
        let q = &mut self.queues[level];
        match q.tail {
            Some(tail) => procs[tail].next = Some(pid),
            None => q.head = Some(pid),
        }
        q.tail = Some(pid);
    }

    /// Insert behind every queued process whose score is no larger
    fn insert_scored(&mut self, procs: &mut ProcessTable, level: usize, pid: Pid) {
        let score = procs[pid].score();
        let mut prev = None;
        let mut cur = self.queues[level].head;
        while let Some(c) = cur {
            if procs[c].score() > score {
                break;
            }
            prev = Some(c);
            cur = procs[c].next;
        }

        procs[pid].next = cur;
        let q = &mut self.queues[level];
        match prev {
            Some(p) => procs[p].next = Some(pid),
            None => q.head = Some(pid),
        }
        if cur.is_none() {
            q.tail = Some(pid);
        }
    }

    /// Dequeue the next process to run
    ///
    /// `now` is the kernel uptime in ms; the time since the previous
    /// decision is charged to the process that had the CPU.
    pub fn choose_next(&mut self, procs: &mut ProcessTable, now: u64) -> Pid {
        self.charge(procs, now);
        let next = self.pop_highest(procs).unwrap_or(Pid::IDLE);

        if self.last != Some(next) {
            self.context_switches += 1;
        }
        procs[next].turns = procs[next].turns.saturating_add(1);
        self.last = Some(next);
        log::trace!("sched: run {} ({})", next, procs[next].name);
        next
    }

    /// Charge the time since the last decision to the process holding the CPU
    pub fn charge(&mut self, procs: &mut ProcessTable, now: u64) {
        if let Some(last) = self.last {
            procs[last].runtime_ms += now.saturating_sub(self.dispatched_at);
        }
        self.dispatched_at = now;
    }

    fn pop_highest(&mut self, procs: &mut ProcessTable) -> Option<Pid> {
        for q in self.queues.iter_mut() {
            if let Some(head) = q.head {
                let p = &mut procs[head];
                q.head = p.next.take();
                if q.head.is_none() {
                    q.tail = None;
                }
                p.link = None;
                return Some(head);
            }
        }
        None
    }

    /// Number of processes queued at `priority`
    pub fn queued(&self, procs: &ProcessTable, priority: Priority) -> usize {
        let Some(level) = priority.queue() else {
            return 0;
        };
        let mut n = 0;
        let mut cur = self.queues[level].head;
        while let Some(pid) = cur {
            n += 1;
            cur = procs[pid].next;
        }
        n
    }

    /// Total processes waiting for the CPU
    pub fn ready_count(&self, procs: &ProcessTable) -> usize {
        [Priority::HANDLER, Priority::HIGH, Priority::LOW]
            .iter()
            .map(|&p| self.queued(procs, p))
            .sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table_with(n: usize) -> ProcessTable {
        let mut procs = ProcessTable::new();
        let idle = procs.create("IDLE", 64).unwrap();
        procs[idle].priority = Priority::IDLE;
        procs[idle].state = State::Idling;
        for _ in 0..n {
            procs.create("p", 64).unwrap();
        }
        procs
    }

    #[test]
    fn test_empty_falls_back_to_idle() {
        let mut procs = table_with(0);
        let mut sched = Scheduler::new(SchedPolicy::Fifo);
        assert_eq!(sched.choose_next(&mut procs, 0), Pid::IDLE);
    }

    #[test]
    fn test_idle_is_never_queued() {
        let mut procs = table_with(0);
        let mut sched = Scheduler::new(SchedPolicy::Fifo);
        sched.make_ready(&mut procs, Pid::IDLE).unwrap();
        assert_eq!(sched.ready_count(&procs), 0);
        assert_eq!(procs[Pid::IDLE].state, State::Idling);
    }

    #[test]
    fn test_fifo_within_priority() {
        let mut procs = table_with(3);
        let mut sched = Scheduler::new(SchedPolicy::Fifo);
        for i in [2, 1, 3] {
            sched.make_ready(&mut procs, Pid(i)).unwrap();
        }
        assert_eq!(sched.choose_next(&mut procs, 0), Pid(2));
        assert_eq!(sched.choose_next(&mut procs, 0), Pid(1));
        assert_eq!(sched.choose_next(&mut procs, 0), Pid(3));
        assert_eq!(sched.choose_next(&mut procs, 0), Pid::IDLE);
    }

    #[test]
    fn test_priority_order() {
        let mut procs = table_with(3);
        procs[Pid(3)].priority = Priority::HANDLER;
        procs[Pid(2)].priority = Priority::HIGH;
        let mut sched = Scheduler::new(SchedPolicy::Fifo);
        for i in 1..=3 {
            sched.make_ready(&mut procs, Pid(i)).unwrap();
        }
        assert_eq!(sched.choose_next(&mut procs, 0), Pid(3));
        assert_eq!(sched.choose_next(&mut procs, 0), Pid(2));
        assert_eq!(sched.choose_next(&mut procs, 0), Pid(1));
    }

    #[test]
    fn test_double_queue_rejected() {
        let mut procs = table_with(1);
        let mut sched = Scheduler::new(SchedPolicy::Fifo);
        sched.make_ready(&mut procs, Pid(1)).unwrap();
        assert_eq!(
            sched.make_ready(&mut procs, Pid(1)),
            Err(Fault::AlreadyQueued(Pid(1)))
        );
    }

    #[test]
    fn test_dead_process_rejected() {
        let mut procs = table_with(1);
        procs[Pid(1)].state = State::Dead;
        let mut sched = Scheduler::new(SchedPolicy::Fifo);
        assert!(matches!(
            sched.make_ready(&mut procs, Pid(1)),
            Err(Fault::BadState { .. })
        ));
    }

    #[test]
    fn test_scored_puts_starved_first() {
        let mut procs = table_with(3);
        procs[Pid(1)].runtime_ms = 100;
        procs[Pid(1)].turns = 1;
        procs[Pid(2)].runtime_ms = 10;
        procs[Pid(2)].turns = 1;
        procs[Pid(3)].runtime_ms = 50;
        procs[Pid(3)].turns = 1;
        let mut sched = Scheduler::new(SchedPolicy::Scored);
        for i in 1..=3 {
            sched.make_ready(&mut procs, Pid(i)).unwrap();
        }
        assert_eq!(sched.choose_next(&mut procs, 0), Pid(2));
        assert_eq!(sched.choose_next(&mut procs, 0), Pid(3));
        assert_eq!(sched.choose_next(&mut procs, 0), Pid(1));
    }

    #[test]
    fn test_scored_ties_keep_arrival_order() {
        let mut procs = table_with(3);
        let mut sched = Scheduler::new(SchedPolicy::Scored);
        for i in [3, 1, 2] {
            sched.make_ready(&mut procs, Pid(i)).unwrap();
        }
        assert_eq!(sched.choose_next(&mut procs, 0), Pid(3));
        assert_eq!(sched.choose_next(&mut procs, 0), Pid(1));
        assert_eq!(sched.choose_next(&mut procs, 0), Pid(2));
    }

    #[test]
    fn test_runtime_accounting_and_switches() {
        let mut procs = table_with(2);
        let mut sched = Scheduler::new(SchedPolicy::Fifo);
        sched.make_ready(&mut procs, Pid(1)).unwrap();
        sched.make_ready(&mut procs, Pid(2)).unwrap();

        assert_eq!(sched.choose_next(&mut procs, 0), Pid(1));
        assert_eq!(sched.choose_next(&mut procs, 30), Pid(2));
        assert_eq!(procs[Pid(1)].runtime_ms, 30);
        assert_eq!(sched.choose_next(&mut procs, 45), Pid::IDLE);
        assert_eq!(procs[Pid(2)].runtime_ms, 15);
        assert_eq!(sched.context_switches, 3);
        assert_eq!(procs[Pid(1)].turns, 1);
    }

    #[test]
    fn test_requeue_after_dequeue() {
        let mut procs = table_with(1);
        let mut sched = Scheduler::new(SchedPolicy::Fifo);
        sched.make_ready(&mut procs, Pid(1)).unwrap();
        assert_eq!(sched.choose_next(&mut procs, 0), Pid(1));
        assert!(procs[Pid(1)].link.is_none());
        sched.make_ready(&mut procs, Pid(1)).unwrap();
        assert_eq!(sched.queued(&procs, Priority::LOW), 1);
    }
}
