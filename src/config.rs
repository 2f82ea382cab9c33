//! Kernel configuration — compile-time capacities plus boot-time options
//!
//! Capacities are constants so every table in the kernel is a fixed-size
//! array. The few choices that a board port makes at boot live in [`Config`].
//!
//! Author: Moroya Sakamoto

/// Maximum number of processes, idle process included
pub const NPROCS: usize = 32;

/// Number of non-idle priority levels (HANDLER, HIGH, LOW)
pub const NPRIO: usize = 3;

/// Number of external interrupt lines a handler can connect to
pub const N_INTERRUPTS: usize = 32;

/// Stack size of the idle process (bytes)
pub const IDLE_STACK: usize = 128;

/// Stack size for processes started with a size of zero (bytes)
pub const STACK: usize = 1024;

/// Bytes available for all process stacks together
pub const STACK_ARENA_BYTES: usize = 16 * 1024;

/// Longest process name kept for diagnostics
pub const NAME_LEN: usize = 15;

/// Ready-queue ordering policy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedPolicy {
    /// Strict arrival order within a priority level
    Fifo,
    /// Ordered by average run time per turn; CPU-starved processes go first
    Scored,
}

impl SchedPolicy {
    /// Policy selected by the `scored-sched` feature
    pub const fn from_features() -> Self {
        if cfg!(feature = "scored-sched") {
            SchedPolicy::Scored
        } else {
            SchedPolicy::Fifo
        }
    }
}

/// Boot-time kernel options
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Config {
    /// How each ready queue is ordered
    pub policy: SchedPolicy,
    /// Address a process body returns to; the port's `exit` stub.
    /// Zero makes a returning body fault instead of exiting.
    pub exit_vector: usize,
}

impl Config {
    /// Defaults for the current feature set
    pub const fn new() -> Self {
        Self {
            policy: SchedPolicy::from_features(),
            exit_vector: 0,
        }
    }

    /// Same configuration with a different policy
    pub const fn with_policy(mut self, policy: SchedPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Same configuration with the port's exit stub
    pub const fn with_exit_vector(mut self, addr: usize) -> Self {
        self.exit_vector = addr;
        self
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::new()
    }
}
