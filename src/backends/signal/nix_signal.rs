// SIGSTOP/SIGCONT process controller

use super::ProcessController;
use crate::backends::BackendPriority;
use anyhow::{Context, Result};
use nix::sys::signal::{Signal, kill};
use nix::unistd::Pid;

/// Suspends with SIGSTOP and resumes with SIGCONT
pub struct SignalController;

impl SignalController {
    pub fn new() -> Self {
        Self
    }

    fn send(pid: i32, signal: Signal) -> Result<()> {
        // pid 0/1 and negative pids address process groups or init
        if pid <= 1 {
            anyhow::bail!("Refusing to signal pid {}", pid);
        }

        kill(Pid::from_raw(pid), signal)
            .with_context(|| format!("Failed to send {} to PID {}", signal, pid))
    }
}

impl Default for SignalController {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcessController for SignalController {
    fn name(&self) -> &'static str {
        "sigstop"
    }

    fn priority(&self) -> BackendPriority {
        BackendPriority::Best
    }

    fn suspend(&self, pid: i32) -> Result<()> {
        Self::send(pid, Signal::SIGSTOP)
    }

    fn resume(&self, pid: i32) -> Result<()> {
        Self::send(pid, Signal::SIGCONT)
    }
}
