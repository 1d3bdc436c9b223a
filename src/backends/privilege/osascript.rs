// osascript "with administrator privileges" executor

use super::PrivilegedExecutor;
use crate::backends::{BackendPriority, command_exists, run_command};
use anyhow::Result;

const OSASCRIPT: &str = "/usr/bin/osascript";

/// Elevates through AppleScript's `do shell script ... with administrator privileges`,
/// which shows the standard macOS authorization prompt.
pub struct OsascriptExecutor;

impl OsascriptExecutor {
    pub fn new() -> Self {
        Self
    }

    /// Build the AppleScript source that runs `script` as root
    fn apple_script(script: &str) -> String {
        let escaped = script.replace('\\', "\\\\").replace('"', "\\\"");
        format!("do shell script \"{}\" with administrator privileges", escaped)
    }
}

impl Default for OsascriptExecutor {
    fn default() -> Self {
        Self::new()
    }
}

impl PrivilegedExecutor for OsascriptExecutor {
    fn name(&self) -> &'static str {
        "osascript"
    }

    fn priority(&self) -> BackendPriority {
        BackendPriority::Good
    }

    fn is_available(&self) -> bool {
        command_exists(OSASCRIPT)
    }

    fn run_elevated(&self, script: &str) -> Result<()> {
        let source = Self::apple_script(script);
        log::debug!("Requesting elevation for: {}", script);

        let output = run_command(OSASCRIPT, &["-e", &source])?;
        if !output.success {
            // -128 is "User canceled." from the authorization prompt
            anyhow::bail!("Elevated helper failed: {}", output.stderr.trim());
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_apple_script_escaping() {
        let source = OsascriptExecutor::apple_script(r#"rm -f "/Library/x.plist""#);
        assert_eq!(
            source,
            r#"do shell script "rm -f \"/Library/x.plist\"" with administrator privileges"#
        );
    }
}
