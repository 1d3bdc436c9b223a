// Durable policy storage
//
// `PolicyFile` is the raw JSON document on disk. `PolicyStore` owns the one
// live `Policy`: readers get a copy, writers get a copy to mutate which is
// stamped, persisted, and then swapped in.

use super::Policy;
use anyhow::{Context, Result};
use chrono::Utc;
use std::convert::Infallible;
use std::fs;
use std::path::{Path, PathBuf};

const SUPPORT_DIR: &str = "NetPulse";
const POLICY_FILE: &str = "policy_config.json";

/// The policy document on disk
#[derive(Debug, Clone)]
pub struct PolicyFile {
    path: PathBuf,
}

impl PolicyFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// `<application support>/NetPulse/policy_config.json`, creating the directory
    pub fn default_location() -> Result<Self> {
        let base = dirs::data_dir().context("Could not determine application support directory")?;
        let dir = base.join(SUPPORT_DIR);

        fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create support directory: {:?}", dir))?;

        Ok(Self::new(dir.join(POLICY_FILE)))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the stored policy. Absent and corrupt documents both yield `None`.
    pub fn load(&self) -> Option<Policy> {
        let contents = match fs::read_to_string(&self.path) {
            Ok(contents) => contents,
            Err(e) => {
                log::debug!("No policy at {:?} ({}), using defaults", self.path, e);
                return None;
            }
        };

        match serde_json::from_str(&contents) {
            Ok(policy) => Some(policy),
            Err(e) => {
                log::warn!("Ignoring unreadable policy at {:?}: {}", self.path, e);
                None
            }
        }
    }

    /// Stamp `last_updated` and atomically replace the stored document
    pub fn save(&self, policy: &mut Policy) -> Result<()> {
        policy.last_updated = Utc::now();

        let contents = serde_json::to_string_pretty(policy).context("Failed to serialize policy")?;
        let tmp = self.path.with_extension("json.tmp");

        fs::write(&tmp, contents).with_context(|| format!("Failed to write {:?}", tmp))?;
        fs::rename(&tmp, &self.path)
            .with_context(|| format!("Failed to replace policy file {:?}", self.path))?;

        log::debug!("Saved policy to {:?}", self.path);
        Ok(())
    }
}

/// Sole owner of the live policy
pub struct PolicyStore {
    /// `None` when the support directory is unusable; the session then runs on
    /// an in-memory policy
    file: Option<PolicyFile>,
    current: Policy,
}

impl PolicyStore {
    /// Open the store at its default location, falling back to memory
    pub fn open_default() -> Self {
        match PolicyFile::default_location() {
            Ok(file) => Self::open(Some(file)),
            Err(e) => {
                log::error!("Policy storage unavailable, using in-memory defaults: {:#}", e);
                Self::open(None)
            }
        }
    }

    /// Load from `file`, seeding (and persisting) the default policy on first run
    pub fn open(file: Option<PolicyFile>) -> Self {
        let loaded = file.as_ref().and_then(PolicyFile::load);

        let mut store = Self {
            current: loaded.clone().unwrap_or_default(),
            file,
        };

        if loaded.is_none() {
            log::info!("Seeding default policy");
            store.update(|_| ());
        }

        store
    }

    #[cfg(test)]
    pub fn in_memory(policy: Policy) -> Self {
        Self {
            file: None,
            current: policy,
        }
    }

    /// Copy of the live policy
    pub fn snapshot(&self) -> Policy {
        self.current.clone()
    }

    pub fn current(&self) -> &Policy {
        &self.current
    }

    /// Pick up changes another process (e.g. the CLI) wrote to the file.
    ///
    /// An absent or unreadable file leaves the in-memory policy as it is.
    pub fn refresh(&mut self) {
        if let Some(policy) = self.file.as_ref().and_then(PolicyFile::load) {
            self.current = policy;
        }
    }

    /// Backing file, `None` for a memory-only store
    pub fn location(&self) -> Option<&Path> {
        self.file.as_ref().map(PolicyFile::path)
    }

    /// Apply `f` to a copy of the freshly loaded policy; commit only if it
    /// succeeds.
    ///
    /// A failed save is logged and the change still takes effect in memory.
    pub fn try_update<T, E>(&mut self, f: impl FnOnce(&mut Policy) -> Result<T, E>) -> Result<T, E> {
        self.refresh();
        let mut next = self.current.clone();
        let value = f(&mut next)?;

        match &self.file {
            Some(file) => {
                if let Err(e) = file.save(&mut next) {
                    log::error!("Failed to persist policy: {:#}", e);
                }
            }
            None => next.last_updated = Utc::now(),
        }

        self.current = next;
        Ok(value)
    }

    pub fn update<T>(&mut self, f: impl FnOnce(&mut Policy) -> T) -> T {
        match self.try_update(|p| Ok::<T, Infallible>(f(p))) {
            Ok(value) => value,
            Err(never) => match never {},
        }
    }
}
