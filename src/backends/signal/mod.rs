// Process suspension capability
//
// Suspend/resume are fire-and-forget: the OS offers no acknowledgment, so an
// `Ok` only means the signal was delivered to a live pid.

use super::{BackendInfo, BackendPriority};
use anyhow::Result;

pub mod nix_signal;

pub use nix_signal::SignalController;

/// Suspends and resumes foreign processes
pub trait ProcessController: Send + Sync {
    /// Backend name (e.g., "sigstop")
    fn name(&self) -> &'static str;

    fn priority(&self) -> BackendPriority;

    /// Stop the process
    fn suspend(&self, pid: i32) -> Result<()>;

    /// Continue a previously stopped process
    fn resume(&self, pid: i32) -> Result<()>;

    fn info(&self) -> BackendInfo {
        BackendInfo {
            name: self.name(),
            priority: self.priority(),
            available: true,
        }
    }
}
