// Backend trait definitions and core types
//
// Every piece of the agent that touches the host (the accounting utility,
// process signals, launchd, privilege escalation) sits behind a trait in one
// of these modules so the agent can be exercised with recording fakes.

pub mod accounting;
pub mod privilege;
pub mod service;
pub mod signal;

#[cfg(test)]
pub mod fakes;

use anyhow::{Context, Result};
use std::process::Command;

/// Backend priority ranking (higher = better)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum BackendPriority {
    Good = 2,     // Solid implementation, spawns an external process
    Best = 4,     // Native API
}

/// Backend metadata for `status` output
#[derive(Debug, Clone)]
pub struct BackendInfo {
    pub name: &'static str,
    pub priority: BackendPriority,
    pub available: bool,
}

/// Output of a finished external command
#[derive(Debug, Clone)]
pub struct CommandOutput {
    pub success: bool,
    pub stdout: String,
    pub stderr: String,
}

/// Run a command to completion and capture its output.
///
/// Only a spawn failure is an error; a non-zero exit is reported through
/// `CommandOutput::success` so callers decide how soft the failure is.
pub fn run_command(program: &str, args: &[&str]) -> Result<CommandOutput> {
    let output = Command::new(program)
        .args(args)
        .output()
        .with_context(|| format!("Failed to execute {}", program))?;

    Ok(output.into())
}

/// Async `run_command`. Dropping the future kills the child, so a caller's
/// timeout never leaves the process behind.
pub async fn run_command_async(program: &str, args: &[&str]) -> Result<CommandOutput> {
    let output = tokio::process::Command::new(program)
        .args(args)
        .kill_on_drop(true)
        .output()
        .await
        .with_context(|| format!("Failed to execute {}", program))?;

    Ok(output.into())
}

impl From<std::process::Output> for CommandOutput {
    fn from(output: std::process::Output) -> Self {
        Self {
            success: output.status.success(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        }
    }
}

/// Check whether a command is on PATH (or an absolute path that exists)
pub fn command_exists(program: &str) -> bool {
    if program.starts_with('/') {
        return std::path::Path::new(program).exists();
    }

    Command::new("which")
        .arg(program)
        .output()
        .map(|o| o.status.success())
        .unwrap_or(false)
}
