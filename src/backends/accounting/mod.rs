// Per-process byte accounting sources
//
// The agent never captures packets itself. It asks an OS utility for
// already-aggregated per-process counters and parses the text it prints.

use super::{BackendInfo, BackendPriority};
use anyhow::Result;
use std::future::Future;
use std::pin::Pin;

pub mod nettop;

pub use nettop::NettopSource;

/// An in-flight accounting read
pub type ReadFuture<'a> = Pin<Box<dyn Future<Output = Result<String>> + Send + 'a>>;

/// A source of raw per-process accounting output
pub trait AccountingSource: Send + Sync {
    /// Backend name (e.g., "nettop")
    fn name(&self) -> &'static str;

    /// Backend priority for display
    fn priority(&self) -> BackendPriority;

    /// Check if this source is usable on the current system
    fn is_available(&self) -> bool;

    /// Run one single-shot listing and return its complete stdout.
    ///
    /// Dropping the future must abandon the read (and reap the utility).
    fn read(&self) -> ReadFuture<'_>;

    fn info(&self) -> BackendInfo {
        BackendInfo {
            name: self.name(),
            priority: self.priority(),
            available: self.is_available(),
        }
    }
}
