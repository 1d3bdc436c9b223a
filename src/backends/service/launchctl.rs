// launchctl-backed service supervisor

use super::ServiceSupervisor;
use crate::backends::{BackendPriority, command_exists, run_command};
use anyhow::Result;
use std::path::Path;

const LAUNCHCTL: &str = "/bin/launchctl";

pub struct Launchctl;

impl Launchctl {
    pub fn new() -> Self {
        Self
    }
}

impl Default for Launchctl {
    fn default() -> Self {
        Self::new()
    }
}

impl ServiceSupervisor for Launchctl {
    fn name(&self) -> &'static str {
        "launchctl"
    }

    fn priority(&self) -> BackendPriority {
        BackendPriority::Good
    }

    fn is_available(&self) -> bool {
        command_exists(LAUNCHCTL)
    }

    fn load(&self, descriptor: &Path) -> Result<()> {
        let path = descriptor.to_string_lossy();

        // Unload first so a changed descriptor is picked up
        let _ = run_command(LAUNCHCTL, &["unload", &path]);

        let output = run_command(LAUNCHCTL, &["load", "-w", &path])?;
        if !output.success {
            anyhow::bail!("launchctl load {} failed: {}", path, output.stderr.trim());
        }

        log::debug!("launchctl loaded {}", path);
        Ok(())
    }

    fn unload(&self, descriptor: &Path) -> Result<()> {
        let path = descriptor.to_string_lossy();
        let target = format!("gui/{}", nix::unistd::getuid());

        let output = run_command(LAUNCHCTL, &["bootout", &target, &path])?;
        if !output.success {
            // Already gone or never loaded
            log::debug!("launchctl bootout {}: {}", path, output.stderr.trim());
        }

        Ok(())
    }
}
