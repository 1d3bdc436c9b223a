// OS service supervision (launchd)

use super::{BackendInfo, BackendPriority};
use anyhow::Result;
use std::path::Path;

pub mod launchctl;

pub use launchctl::Launchctl;

/// Loads and unloads user-tier service descriptors
pub trait ServiceSupervisor: Send + Sync {
    fn name(&self) -> &'static str;

    fn priority(&self) -> BackendPriority;

    fn is_available(&self) -> bool;

    /// Start supervising the descriptor at `descriptor`
    fn load(&self, descriptor: &Path) -> Result<()>;

    /// Stop supervising the descriptor at `descriptor`. Not-loaded is not an error.
    fn unload(&self, descriptor: &Path) -> Result<()>;

    fn info(&self) -> BackendInfo {
        BackendInfo {
            name: self.name(),
            priority: self.priority(),
            available: self.is_available(),
        }
    }
}
