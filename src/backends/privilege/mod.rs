// Out-of-process privilege escalation
//
// The agent never runs as root to install the system tier. It hands a shell
// script to an executor that obtains administrator authority (prompting the
// user) and reports whether the script ran to success. Callers must re-check
// ground truth afterwards; a success here proves nothing about disk state.

use super::{BackendInfo, BackendPriority};
use anyhow::Result;

pub mod osascript;

pub use osascript::OsascriptExecutor;

/// Runs shell scripts with administrator authority
pub trait PrivilegedExecutor: Send + Sync {
    fn name(&self) -> &'static str;

    fn priority(&self) -> BackendPriority;

    fn is_available(&self) -> bool;

    /// Run `script` elevated. Errors if the user declines or the script fails.
    fn run_elevated(&self, script: &str) -> Result<()>;

    fn info(&self) -> BackendInfo {
        BackendInfo {
            name: self.name(),
            priority: self.priority(),
            available: self.is_available(),
        }
    }
}

/// Quote a value for inclusion in a POSIX shell command
pub fn shell_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', r"'\''"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shell_quote() {
        assert_eq!(shell_quote("/Applications/Net Pulse.app"), "'/Applications/Net Pulse.app'");
        assert_eq!(shell_quote("it's"), r"'it'\''s'");
    }
}
