//! Rendezvous engine — send, receive, sendrec and interrupt delivery
//!
//! The engine is the only code that moves processes between blocked and
//! ready. A message moves by value from the sender's slot to the
//! receiver's slot at the moment both sides are ready; until then the
//! sender waits on the receiver's `waiting` list, in arrival order.
//!
//! All of this runs on the current process's behalf, inside one
//! `&mut Kernel` call, so no interrupt ever sees a half-updated queue.
//!
//! Author: Moroya Sakamoto

use crate::fault::Fault;
use crate::kernel::Kernel;
use crate::message::{Message, MessageType};
use crate::process::{Continuation, Link, Pid, Priority, State};

impl Kernel {
    /// Validate a destination pid, halting if it is absent or dead
    fn find_dest(&self, dest: i32) -> Pid {
        let r = self.procs.lookup(dest);
        self.ok(r)
    }

    /// Drop a receive deadline that a real message beat to it
    fn cancel_timeout(&mut self, pid: Pid) {
        if self.procs[pid].deadline.is_some() {
            let r = self.timeouts.cancel(&mut self.procs, pid);
            self.ok(r);
        }
    }

    /// Move `src`'s message into `dest`'s slot and make `dest` ready
    fn deliver(&mut self, dest: Pid, src: Pid) {
        let Some(mut msg) = self.procs[src].slot.take() else {
            self.fail(Fault::BadState {
                pid: src,
                state: self.procs[src].state,
                op: "deliver",
            });
        };
        msg.sender = src;
        self.cancel_timeout(dest);
        self.procs[dest].slot = Some(msg);
        log::debug!("ipc: {} -> {} type {}", src, dest, msg.ty.0);
        self.make_ready(dest);
    }

    /// Put a kernel-made message in `dest`'s slot
    fn deliver_special(&mut self, dest: Pid, ty: MessageType) {
        self.procs[dest].slot = Some(Message::special(ty));
        if ty == MessageType::TIMEOUT {
            self.stats.timeouts_fired += 1;
        }
    }

    /// Append the current process to `dest`'s waiting list
    fn queue_sender(&mut self, dest: Pid) {
        let me = self.current;
        if self.procs[me].link.is_some() {
            self.fail(Fault::AlreadyQueued(me));
        }
        self.procs[me].next = None;
        self.procs[me].link = Some(Link::Waiting(dest));

        match self.procs[dest].waiting {
            None => self.procs[dest].waiting = Some(me),
            Some(head) => {
                let mut r = head;
                while let Some(next) = self.procs[r].next {
                    r = next;
                }
                self.procs[r].next = Some(me);
            }
        }
        log::debug!("ipc: {} waits to send to {}", me, dest);
    }

    /// Unlink the first sender waiting on `dest` whose message `filter` takes
    fn find_sender(&mut self, dest: Pid, filter: MessageType) -> Option<Pid> {
        let mut prev: Option<Pid> = None;
        let mut cur = self.procs[dest].waiting;
        while let Some(src) = cur {
            let ty = self.procs[src].slot.map(|m| m.ty);
            if ty.map_or(false, |ty| filter.accepts(ty)) {
                let next = self.procs[src].next.take();
                match prev {
                    None => self.procs[dest].waiting = next,
                    Some(p) => self.procs[p].next = next,
                }
                self.procs[src].link = None;
                return Some(src);
            }
            prev = cur;
            cur = self.procs[src].next;
        }
        None
    }

    /// Second half of sendrec: wait for the REPLY
    fn await_reply(&mut self, pid: Pid) {
        // A REPLY may already be queued, though never from the process
        // the request just went to
        if let Some(src) = self.find_sender(pid, MessageType::REPLY) {
            self.deliver(pid, src);
            self.make_ready(src);
        } else {
            let p = &mut self.procs[pid];
            p.state = State::Receiving;
            p.filter = MessageType::REPLY;
        }
    }

    /// Send `msg` to `dest`, blocking until it is taken
    pub(crate) fn send(&mut self, dest: i32, msg: Message) {
        let dest = self.find_dest(dest);
        let me = self.current;
        self.procs[me].slot = Some(msg);

        if self.procs[dest].accepts(msg.ty) {
            self.deliver(dest, me);
            self.make_ready(me);
        } else {
            self.procs[me].state = State::Sending;
            self.queue_sender(dest);
        }
        self.reschedule();
    }

    /// Receive a message of type `filter`
    ///
    /// `timeout`: `None` waits forever, `Some(0)` polls, `Some(ms)` waits
    /// at most about `ms` of tick time before a TIMEOUT arrives.
    pub(crate) fn receive(&mut self, filter: MessageType, timeout: Option<u32>) {
        let me = self.current;
        self.procs[me].slot = None;

        // Pending interrupt first
        if self.procs[me].pending && filter.accepts(MessageType::INTERRUPT) {
            self.procs[me].pending = false;
            self.deliver_special(me, MessageType::INTERRUPT);
            return;
        }

        if filter != MessageType::INTERRUPT {
            if let Some(src) = self.find_sender(me, filter) {
                self.deliver(me, src);
                match self.procs[src].state {
                    State::Sending => self.make_ready(src),
                    State::SendRec => self.await_reply(src),
                    state => self.fail(Fault::BadState {
                        pid: src,
                        state,
                        op: "receive",
                    }),
                }
                self.reschedule();
                return;
            }
        }

        if timeout == Some(0) {
            self.deliver_special(me, MessageType::TIMEOUT);
            return;
        }

        let p = &mut self.procs[me];
        p.state = State::Receiving;
        p.filter = filter;
        if let Some(ms) = timeout {
            let r = self.timeouts.set(&mut self.procs, me, ms);
            self.ok(r);
        }
        log::debug!("ipc: {} receives type {}", me, filter.0);
        self.reschedule();
    }

    /// Send a request and wait for its REPLY as one step
    ///
    /// Nothing else runs between handing over the request and starting to
    /// wait, so a lower-priority process cannot slip in and delay the
    /// reply.
    pub(crate) fn sendrec(&mut self, dest: i32, msg: Message) {
        let dest = self.find_dest(dest);
        if msg.ty == MessageType::REPLY {
            self.fail(Fault::ReplyViaSendrec);
        }
        let me = self.current;
        self.procs[me].slot = Some(msg);

        if self.procs[dest].accepts(msg.ty) {
            self.deliver(dest, me);
            self.await_reply(me);
        } else {
            self.procs[me].state = State::SendRec;
            self.queue_sender(dest);
        }
        self.reschedule();
    }

    /// Notify `dest` of a hardware interrupt
    ///
    /// Delivered at once if `dest` is waiting for one, otherwise left
    /// pending; a second interrupt before the first is taken is folded
    /// into it. Returns true when the current process should be
    /// preempted so the handler runs promptly.
    pub fn interrupt(&mut self, dest: Pid) -> bool {
        let dest = self.find_dest(i32::from(dest.0));
        self.stats.interrupts += 1;

        if self.procs[dest].accepts(MessageType::INTERRUPT) {
            self.cancel_timeout(dest);
            self.deliver_special(dest, MessageType::INTERRUPT);
            self.make_ready(dest);
            self.procs[self.current].priority > Priority::HANDLER
        } else {
            let p = &mut self.procs[dest];
            if p.pending {
                self.stats.coalesced += 1;
                log::warn!("irq: interrupt for {} coalesced", dest);
            }
            p.pending = true;
            false
        }
    }

    /// Entry from the common interrupt handler for line `irq`
    ///
    /// The port disables the line before calling; the handler process
    /// re-enables it once it has dealt with the cause.
    pub fn interrupt_request(&mut self, irq: i32) -> bool {
        let r = self.irqs.handler(irq);
        let pid = self.ok(r);
        self.interrupt(pid)
    }

    /// Context switch after an interrupt asked for preemption
    pub fn preempt(&mut self, psp: Continuation) -> Continuation {
        self.save_context(psp);
        self.make_ready(self.current);
        self.reschedule();
        self.resume()
    }

    /// Advance time by `ms` and wake every receiver whose deadline passed
    pub(crate) fn tick(&mut self, ms: u32) {
        self.uptime_ms += u64::from(ms);
        self.sched.charge(&mut self.procs, self.uptime_ms);
        let expired = self.timeouts.tick(&mut self.procs, ms);
        for pid in expired {
            log::debug!("timer: {} timed out", pid);
            self.deliver_special(pid, MessageType::TIMEOUT);
            self.make_ready(pid);
        }
    }
}
