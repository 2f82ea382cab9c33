//! Kernel — the single owned context holding all kernel state
//!
//! Process table, ready queues, timeout registry and interrupt table
//! live together in one `Kernel`, built once at boot. Every trap and
//! interrupt is handled by one `&mut Kernel` call, which is what makes
//! each kernel operation a single atomic step.
//!
//! Author: Moroya Sakamoto

use core::fmt::{self, Write};

use crate::config::{Config, IDLE_STACK, STACK};
use crate::fault::{self, Fault};
use crate::frame;
use crate::irq::IrqTable;
use crate::message::Message;
use crate::process::{Continuation, Pid, Priority, Process, ProcessFn, SavedContext, State};
use crate::scheduler::Scheduler;
use crate::store::ProcessTable;
use crate::timer::TimeoutRegistry;

/// Kernel instance
pub struct Kernel {
    pub(crate) procs: ProcessTable,
    pub(crate) sched: Scheduler,
    pub(crate) timeouts: TimeoutRegistry,
    pub(crate) irqs: IrqTable,
    pub(crate) stats: KernelStats,
    config: Config,
    /// Process owning the CPU; the idle process during boot
    pub(crate) current: Pid,
    running: bool,
    pub(crate) uptime_ms: u64,
}

impl Kernel {
    /// Create the kernel and its idle process (pid 0)
    pub fn new(config: Config) -> Self {
        let mut kernel = Self {
            procs: ProcessTable::new(),
            sched: Scheduler::new(config.policy),
            timeouts: TimeoutRegistry::new(),
            irqs: IrqTable::new(),
            stats: KernelStats::default(),
            config,
            current: Pid::IDLE,
            running: false,
            uptime_ms: 0,
        };
        let created = kernel.procs.create("IDLE", IDLE_STACK);
        let idle = kernel.ok(created);
        let p = &mut kernel.procs[idle];
        p.state = State::Idling;
        p.priority = Priority::IDLE;
        kernel
    }

    /// Kernel with default configuration and FIFO queues, for host testing
    pub fn testing() -> Self {
        Self::new(Config::new().with_policy(crate::config::SchedPolicy::Fifo))
    }

    /// Halt on `fault`, naming the current process
    #[cold]
    #[track_caller]
    pub(crate) fn fail(&self, fault: Fault) -> ! {
        let name = self.procs.get(self.current).map(|p| p.name.as_str());
        fault::halt(fault, name)
    }

    /// Unwrap a kernel-internal result, halting on a fault
    #[inline]
    #[track_caller]
    pub(crate) fn ok<T>(&self, r: Result<T, Fault>) -> T {
        match r {
            Ok(v) => v,
            Err(fault) => self.fail(fault),
        }
    }

    /// Create a process that will run `entry(arg)` once the kernel launches
    ///
    /// A `stack_size` of zero asks for the default [`STACK`].
    pub fn start(&mut self, name: &str, entry: ProcessFn, arg: usize, stack_size: usize) -> Pid {
        if self.running {
            self.fail(Fault::StartAfterLaunch);
        }
        let stack_size = if stack_size == 0 { STACK } else { stack_size };
        // Room for the initial frame and the guard word below it
        let stack_size = stack_size.max((frame::FRAME_WORDS + 1) * core::mem::size_of::<usize>());
        let created = self.procs.create(name, stack_size);
        let pid = self.ok(created);
        let exit_vector = self.config.exit_vector;
        let sp = frame::initial_frame(self.procs.stack_mut(pid), entry as usize, arg, exit_vector);
        self.procs[pid].context = SavedContext::Arena(self.procs[pid].stack.base + sp);
        self.make_ready(pid);
        log::info!(
            "start: pid {} '{}' stack {} bytes",
            pid,
            name,
            self.procs[pid].stack.bytes()
        );
        pid
    }

    /// Start scheduling: the boot context becomes the idle process and
    /// yields straight away. Returns the first process to resume.
    pub fn launch(&mut self) -> Continuation {
        self.running = true;
        self.current = Pid::IDLE;
        log::info!("launch: {} processes", self.procs.len());
        self.reschedule();
        self.resume()
    }

    /// Bind the current process to interrupt line `irq`
    ///
    /// The process is raised to HANDLER priority so it runs ahead of
    /// ordinary work when the interrupt arrives.
    pub fn connect(&mut self, irq: i32) {
        if !self.running {
            self.fail(Fault::BeforeLaunch("connect"));
        }
        let pid = self.current;
        let r = self.irqs.connect(irq, pid);
        self.ok(r);
        self.procs[pid].priority = Priority::HANDLER;
        log::debug!("connect: irq {} -> pid {}", irq, pid);
    }

    /// Set the current process's priority; HANDLER comes only from `connect`
    pub fn set_priority(&mut self, level: Priority) {
        if !self.running {
            self.fail(Fault::BeforeLaunch("set_priority"));
        }
        if level != Priority::HIGH && level != Priority::LOW {
            self.fail(Fault::BadPriority(level));
        }
        let pid = self.current;
        self.procs[pid].priority = level;
    }

    pub(crate) fn make_ready(&mut self, pid: Pid) {
        let r = self.sched.make_ready(&mut self.procs, pid);
        self.ok(r);
    }

    /// Record where the current process stopped
    pub(crate) fn save_context(&mut self, psp: Continuation) {
        let ctx = self.procs.save(psp);
        self.procs[self.current].context = ctx;
    }

    /// Where the current process resumes
    pub(crate) fn resume(&self) -> Continuation {
        self.procs.resolve(self.procs[self.current].context)
    }

    /// Pick the next current process
    pub(crate) fn reschedule(&mut self) {
        self.current = self.sched.choose_next(&mut self.procs, self.uptime_ms);
        self.stats.context_switches = self.sched.context_switches;
    }

    /// Process owning the CPU
    pub fn current(&self) -> Pid {
        self.current
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    /// Address `pid` would resume from, at the kernel's present location
    pub fn continuation(&self, pid: Pid) -> Option<Continuation> {
        self.procs.get(pid).map(|p| self.procs.resolve(p.context))
    }

    /// Descriptor of `pid`, if it exists
    pub fn process(&self, pid: Pid) -> Option<&Process> {
        self.procs.get(pid)
    }

    /// State of `pid`
    pub fn state(&self, pid: Pid) -> Option<State> {
        self.procs.get(pid).map(|p| p.state)
    }

    /// Message held in `pid`'s slot
    pub fn message(&self, pid: Pid) -> Option<Message> {
        self.procs.get(pid).and_then(|p| p.slot)
    }

    /// Take the delivered message out of `pid`'s slot, as the resume path
    /// does when copying it back to the process's buffer
    pub fn take_message(&mut self, pid: Pid) -> Option<Message> {
        self.procs.get(pid)?;
        self.procs[pid].slot.take()
    }

    /// Stack words of `pid`, for the port's context switch code
    pub fn stack_mut(&mut self, pid: Pid) -> &mut [usize] {
        self.procs.stack_mut(pid)
    }

    /// Number of processes created, idle included
    pub fn process_count(&self) -> usize {
        self.procs.len()
    }

    /// Milliseconds of tick time seen so far
    pub fn uptime_ms(&self) -> u64 {
        self.uptime_ms
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn stats(&self) -> KernelStats {
        let mut stats = self.stats;
        stats.uptime_ms = self.uptime_ms;
        stats.ready = self.sched.ready_count(&self.procs);
        stats.timeouts_pending = self.timeouts.len();
        stats
    }

    /// Write a snapshot of every descriptor: state, stack use, name
    pub fn dump<W: fmt::Write>(&self, out: &mut W) -> fmt::Result {
        writeln!(out, "PROCESS DUMP")?;
        for p in self.procs.iter() {
            self.dump_line(p, out)?;
            writeln!(out)?;
        }
        writeln!(out, "free stack: {} bytes", self.procs.free_bytes())
    }

    fn dump_line<W: fmt::Write>(&self, p: &Process, out: &mut W) -> fmt::Result {
        let mut stk: heapless::String<24> = heapless::String::new();
        write!(stk, "{}/{}", self.procs.stack_used(p.pid), p.stack.bytes())?;
        write!(
            out,
            "{:>2}: {} {:08x} stk={:<9} {}",
            p.pid.0,
            p.state.tag(),
            self.procs.stack_addr(p.pid, 0),
            stk.as_str(),
            p.name
        )
    }

    /// The dump, one `log` record per process
    pub(crate) fn dump_to_log(&self) {
        log::info!("PROCESS DUMP");
        for p in self.procs.iter() {
            let mut line: heapless::String<80> = heapless::String::new();
            // A line too long for the buffer is cut short, not lost
            let _ = self.dump_line(p, &mut line);
            log::info!("{}", line);
        }
        log::info!("free stack: {} bytes", self.procs.free_bytes());
    }
}

/// Kernel execution statistics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct KernelStats {
    /// Tick time seen (ms)
    pub uptime_ms: u64,
    /// Context switches
    pub context_switches: u32,
    /// Traps dispatched
    pub syscalls: u32,
    /// Interrupt notifications raised
    pub interrupts: u32,
    /// Interrupts folded into an already pending one
    pub coalesced: u32,
    /// TIMEOUT messages delivered, immediate ones included
    pub timeouts_fired: u32,
    /// Processes waiting for the CPU
    pub ready: usize,
    /// Receive deadlines registered
    pub timeouts_pending: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn body(_arg: usize) {}

    #[test]
    fn test_kernel_creation() {
        let kernel = Kernel::testing();
        assert_eq!(kernel.process_count(), 1);
        assert_eq!(kernel.current(), Pid::IDLE);
        assert_eq!(kernel.state(Pid::IDLE), Some(State::Idling));
        assert_eq!(kernel.process(Pid::IDLE).unwrap().priority, Priority::IDLE);
        assert!(!kernel.is_running());
    }

    #[test]
    fn test_start_builds_initial_frame() {
        let mut kernel = Kernel::new(Config::new().with_exit_vector(0x4001));
        let pid = kernel.start("worker", body, 42, 256);
        assert_eq!(pid, Pid(1));
        assert_eq!(kernel.state(pid), Some(State::Active));

        let cont = kernel.continuation(pid).unwrap();
        let stack = kernel.stack_mut(pid);
        let sp = stack.len() - frame::FRAME_WORDS;
        assert_eq!(cont.0, stack.as_ptr() as usize + sp * core::mem::size_of::<usize>());
        assert_eq!(stack[sp + frame::R0_SAVE], 42);
        assert_eq!(stack[sp + frame::LR_SAVE], 0x4001);
        assert_eq!(stack[sp + frame::PC_SAVE], (body as usize) & !1);
    }

    #[test]
    fn test_launch_runs_first_ready() {
        let mut kernel = Kernel::testing();
        let a = kernel.start("a", body, 0, 256);
        let _b = kernel.start("b", body, 0, 256);
        let cont = kernel.launch();
        assert!(kernel.is_running());
        assert_eq!(kernel.current(), a);
        assert_eq!(Some(cont), kernel.continuation(a));
    }

    #[test]
    fn test_launch_with_nothing_runs_idle() {
        let mut kernel = Kernel::testing();
        kernel.launch();
        assert_eq!(kernel.current(), Pid::IDLE);
    }

    #[test]
    #[should_panic(expected = "start() called after scheduler startup")]
    fn test_start_after_launch_is_fatal() {
        let mut kernel = Kernel::testing();
        kernel.launch();
        kernel.start("late", body, 0, 256);
    }

    #[test]
    #[should_panic(expected = "too many processes")]
    fn test_too_many_processes_is_fatal() {
        let mut kernel = Kernel::testing();
        for _ in 0..crate::config::NPROCS {
            kernel.start("p", body, 0, 64);
        }
    }

    #[test]
    fn test_set_priority() {
        let mut kernel = Kernel::testing();
        let a = kernel.start("a", body, 0, 256);
        kernel.launch();
        kernel.set_priority(Priority::HIGH);
        assert_eq!(kernel.process(a).unwrap().priority, Priority::HIGH);
    }

    #[test]
    #[should_panic(expected = "bad priority 0")]
    fn test_handler_priority_not_settable() {
        let mut kernel = Kernel::testing();
        kernel.start("a", body, 0, 256);
        kernel.launch();
        kernel.set_priority(Priority::HANDLER);
    }

    #[test]
    fn test_dump_lists_every_process() {
        let mut kernel = Kernel::testing();
        kernel.start("serial", body, 0, 256);
        kernel.start("radio", body, 0, 256);
        let mut out: heapless::String<512> = heapless::String::new();
        kernel.dump(&mut out).unwrap();
        assert!(out.starts_with("PROCESS DUMP\n"));
        assert_eq!(out.lines().count(), 5);
        assert!(out.contains("[IDLE]"));
        assert!(out.contains("serial"));
        assert!(out.contains("radio"));
        let frame_bytes = frame::FRAME_WORDS * core::mem::size_of::<usize>();
        let mut used: heapless::String<16> = heapless::String::new();
        fmt::Write::write_fmt(&mut used, format_args!("stk={}/256", frame_bytes)).unwrap();
        assert!(out.contains(used.as_str()));
        let free = crate::config::STACK_ARENA_BYTES - crate::config::IDLE_STACK - 2 * 256;
        let mut footer: heapless::String<32> = heapless::String::new();
        fmt::Write::write_fmt(&mut footer, format_args!("free stack: {} bytes", free)).unwrap();
        assert!(out.contains(footer.as_str()));
    }

    #[test]
    fn test_zero_stack_size_gets_default() {
        let mut kernel = Kernel::testing();
        let pid = kernel.start("dflt", body, 0, 0);
        assert_eq!(kernel.process(pid).unwrap().stack.bytes(), STACK);
    }

    #[test]
    fn test_continuation_survives_move() {
        let mut kernel = Kernel::testing();
        let a = kernel.start("a", body, 0, 256);
        let sp = kernel.stack_mut(a).len() - frame::FRAME_WORDS;

        let mut moved = [kernel];
        let kernel = &mut moved[0];
        let cont = kernel.launch();
        let stack = kernel.stack_mut(a);
        let base = stack.as_ptr() as usize;
        let word = core::mem::size_of::<usize>();
        assert!(cont.0 >= base && cont.0 < base + stack.len() * word);
        assert_eq!(cont.0, base + sp * word);
        assert_eq!(stack[sp + frame::ERV_SAVE], frame::EXC_RETURN);
    }

    #[test]
    #[should_panic(expected = "connect() called before scheduler startup")]
    fn test_connect_before_launch_is_fatal() {
        let mut kernel = Kernel::testing();
        kernel.start("a", body, 0, 256);
        kernel.connect(1);
    }

    #[test]
    #[should_panic(expected = "set_priority() called before scheduler startup")]
    fn test_set_priority_before_launch_is_fatal() {
        let mut kernel = Kernel::testing();
        kernel.set_priority(Priority::HIGH);
    }

    #[test]
    fn test_stats_snapshot() {
        let mut kernel = Kernel::testing();
        kernel.start("a", body, 0, 256);
        kernel.start("b", body, 0, 256);
        let stats = kernel.stats();
        assert_eq!(stats.ready, 2);
        assert_eq!(stats.timeouts_pending, 0);
        kernel.launch();
        assert_eq!(kernel.stats().ready, 1);
        assert_eq!(kernel.stats().context_switches, 1);
    }
}
