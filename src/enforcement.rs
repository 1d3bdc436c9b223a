// Focus-mode enforcement: suspends noisy, non-whitelisted processes

use crate::backends::signal::ProcessController;
use crate::process::ConnectionSample;
use std::collections::BTreeMap;

/// Combined in+out rate above which a non-whitelisted process is suspended
pub const DEFAULT_SUSPEND_THRESHOLD: f64 = 10.0 * 1024.0;

/// Case-insensitive substring match of any whitelist entry against `process_name`
pub fn is_whitelisted(whitelist: &[String], process_name: &str) -> bool {
    let name = process_name.to_lowercase();
    whitelist
        .iter()
        .any(|entry| name.contains(&entry.to_lowercase()))
}

/// A signal the engine sent this tick
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EnforcementAction {
    Suspended { pid: i32, name: String },
    Resumed { pid: i32, name: String },
}

/// Owns the paused-process set.
///
/// A pid is in the set iff this engine sent it SIGSTOP and has not since sent
/// SIGCONT. Dropping the engine resumes every member.
pub struct EnforcementEngine {
    controller: Box<dyn ProcessController>,
    /// pid -> process name at suspension time
    paused: BTreeMap<i32, String>,
    threshold: f64,
}

impl EnforcementEngine {
    pub fn new(controller: Box<dyn ProcessController>, threshold: f64) -> Self {
        log::debug!("Using process controller: {}", controller.name());
        Self {
            controller,
            paused: BTreeMap::new(),
            threshold,
        }
    }

    pub fn is_paused(&self, pid: i32) -> bool {
        self.paused.contains_key(&pid)
    }

    pub fn paused_pids(&self) -> Vec<i32> {
        self.paused.keys().copied().collect()
    }

    /// Run one enforcement pass over a tick's samples.
    ///
    /// Does nothing unless `focus_active`. Suspension is sticky: a paused
    /// process that goes quiet stays paused until it is whitelisted or focus
    /// ends.
    pub fn apply(
        &mut self,
        connections: &[ConnectionSample],
        whitelist: &[String],
        focus_active: bool,
    ) -> Vec<EnforcementAction> {
        let mut actions = Vec::new();
        if !focus_active {
            return actions;
        }

        for conn in connections {
            let Some(pid) = conn.pid else { continue };
            if pid <= 1 {
                continue;
            }

            if is_whitelisted(whitelist, &conn.process_name) {
                if self.paused.contains_key(&pid) {
                    self.resume(pid, &mut actions);
                }
            } else if conn.current_speed() > self.threshold && !self.paused.contains_key(&pid) {
                self.suspend(pid, &conn.process_name, &mut actions);
            }
        }

        actions
    }

    /// Resume every paused process and empty the set
    pub fn resume_all(&mut self) -> Vec<EnforcementAction> {
        let mut actions = Vec::new();
        for pid in self.paused_pids() {
            self.resume(pid, &mut actions);
        }
        actions
    }

    fn suspend(&mut self, pid: i32, name: &str, actions: &mut Vec<EnforcementAction>) {
        match self.controller.suspend(pid) {
            Ok(()) => {
                log::info!("Suspended {} (PID {})", name, pid);
                self.paused.insert(pid, name.to_string());
                actions.push(EnforcementAction::Suspended {
                    pid,
                    name: name.to_string(),
                });
            }
            Err(e) => log::warn!("Failed to suspend {} (PID {}): {:#}", name, pid, e),
        }
    }

    fn resume(&mut self, pid: i32, actions: &mut Vec<EnforcementAction>) {
        let Some(name) = self.paused.remove(&pid) else {
            return;
        };

        // The pid leaves the set either way; a failed SIGCONT means it is gone
        match self.controller.resume(pid) {
            Ok(()) => log::info!("Resumed {} (PID {})", name, pid),
            Err(e) => log::warn!("Failed to resume {} (PID {}): {:#}", name, pid, e),
        }
        actions.push(EnforcementAction::Resumed { pid, name });
    }
}

impl Drop for EnforcementEngine {
    fn drop(&mut self) {
        if !self.paused.is_empty() {
            log::info!("Resuming {} paused process(es) on shutdown", self.paused.len());
            self.resume_all();
        }
    }
}
