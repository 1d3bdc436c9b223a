// nettop-based accounting source

use super::{AccountingSource, ReadFuture};
use crate::backends::{BackendPriority, command_exists, run_command_async};
use anyhow::Result;
use std::path::PathBuf;

/// Accounting source backed by `nettop`
///
/// Executes `nettop -L 1 -P`: one sample in CSV "logging" mode, collapsed
/// per process. Column 2 holds `<name>.<pid>`, columns 5 and 6 hold the
/// cumulative inbound/outbound byte counts.
pub struct NettopSource {
    utility: PathBuf,
}

impl NettopSource {
    pub fn new(utility: impl Into<PathBuf>) -> Self {
        Self {
            utility: utility.into(),
        }
    }

    async fn listing(&self) -> Result<String> {
        let program = self.utility.to_string_lossy();
        let output = run_command_async(&program, &["-L", "1", "-P"]).await?;

        if !output.success {
            anyhow::bail!("{} exited abnormally: {}", program, output.stderr.trim());
        }

        Ok(output.stdout)
    }
}

impl AccountingSource for NettopSource {
    fn name(&self) -> &'static str {
        "nettop"
    }

    fn priority(&self) -> BackendPriority {
        BackendPriority::Good
    }

    fn is_available(&self) -> bool {
        command_exists(&self.utility.to_string_lossy())
    }

    fn read(&self) -> ReadFuture<'_> {
        Box::pin(self.listing())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::os::unix::fs::PermissionsExt;
    use std::path::Path;
    use std::time::Duration;

    fn utility(dir: &Path, body: &str) -> NettopSource {
        let path = dir.join("nettop");
        fs::write(&path, format!("#!/bin/sh\n{}\n", body)).unwrap();
        fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
        NettopSource::new(path)
    }

    #[tokio::test]
    async fn test_read_returns_stdout() {
        let dir = tempfile::tempdir().unwrap();
        let source = utility(dir.path(), "echo \"time,,interface\"");

        assert!(source.is_available());
        assert_eq!(source.read().await.unwrap().trim(), "time,,interface");
    }

    #[tokio::test]
    async fn test_abnormal_exit_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let source = utility(dir.path(), "echo denied >&2; exit 1");

        let err = source.read().await.unwrap_err();
        assert!(err.to_string().contains("denied"));
    }

    #[tokio::test]
    async fn test_hung_utility_can_be_abandoned() {
        let dir = tempfile::tempdir().unwrap();
        let source = utility(dir.path(), "exec sleep 30");

        let started = std::time::Instant::now();
        let result = tokio::time::timeout(Duration::from_millis(300), source.read()).await;

        assert!(result.is_err());
        assert!(started.elapsed() < Duration::from_secs(5));
    }
}
