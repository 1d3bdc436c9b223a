// The agent scheduler
//
// One task owns every piece of mutable state: the policy store, the paused
// set (inside the enforcement engine) and the sampler's counters. Anything
// that can block (the accounting utility, HTTP, elevation prompts) runs on
// another task and reports back to this loop, so enforcement passes are
// strictly serialized and a user toggle never races a tick.

use crate::backends::accounting::AccountingSource;
use crate::config::Config;
use crate::credential::CredentialGate;
use crate::enforcement::{EnforcementAction, EnforcementEngine};
use crate::error::GuardError;
use crate::monitor::TrafficSampler;
use crate::netinfo;
use crate::persistence::{PersistenceManager, is_running_as_root};
use crate::policy::{
    EnforcementState, MergeOutcome, PolicyClient, PolicyStore, RemotePolicyDocument,
};
use crate::process::{ConnectionSample, SortMode, TrafficSnapshot};
use anyhow::Result;
use chrono::{DateTime, Utc};
use std::future::Future;
use std::net::IpAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{mpsc, watch};
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::{MissedTickBehavior, interval};

/// Read-only view published after every change, for whatever presents it
#[derive(Debug, Clone, Default)]
pub struct AgentSnapshot {
    pub connections: Vec<ConnectionSample>,
    pub total_in: u64,
    pub total_out: u64,
    pub sort_mode: SortMode,
    pub state: EnforcementState,
    pub meeting_mode_permitted: bool,
    pub hardening_permitted: bool,
    pub paused_pids: Vec<i32>,
    pub is_registered: bool,
    pub is_hardened: bool,
    pub persistence_enabled: bool,
    pub public_ip: Option<IpAddr>,
    pub local_ip: Option<IpAddr>,
    pub last_policy_sync: Option<DateTime<Utc>>,
    /// `None` when the policy lives only in memory
    pub policy_path: Option<PathBuf>,
    pub status_message: String,
}

/// A user intent from the presentation layer
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Intent {
    ToggleFocus,
    SetPassword {
        new_secret: String,
        current: Option<String>,
    },
    SetPersistence {
        enabled: bool,
        password: Option<String>,
    },
    Harden {
        password: String,
    },
    Relax {
        password: String,
    },
    SyncPolicy,
    SetSortMode(SortMode),
    Status,
    Quit {
        password: Option<String>,
    },
}

impl FromStr for Intent {
    type Err = anyhow::Error;

    /// Parse one control line, e.g. `focus`, `persist off <password>`, `quit <password>`
    fn from_str(line: &str) -> Result<Self> {
        let mut words = line.split_whitespace();
        let command = words.next().unwrap_or_default();
        let arg = words.next().map(str::to_string);
        let rest = words.next().map(str::to_string);

        let intent = match (command, arg) {
            ("focus", None) => Intent::ToggleFocus,
            ("sync", None) => Intent::SyncPolicy,
            ("status", None) => Intent::Status,
            ("password", Some(new_secret)) => Intent::SetPassword {
                new_secret,
                current: rest,
            },
            ("persist", Some(toggle)) if toggle == "on" => Intent::SetPersistence {
                enabled: true,
                password: rest,
            },
            ("persist", Some(toggle)) if toggle == "off" => Intent::SetPersistence {
                enabled: false,
                password: rest,
            },
            ("harden", Some(password)) => Intent::Harden { password },
            ("relax", Some(password)) => Intent::Relax { password },
            ("sort", Some(mode)) if mode == "total" => Intent::SetSortMode(SortMode::Total),
            ("sort", Some(mode)) if mode == "speed" => Intent::SetSortMode(SortMode::Speed),
            ("quit", password) => Intent::Quit { password },
            _ => anyhow::bail!("Unrecognized command: {:?}", line.trim()),
        };

        Ok(intent)
    }
}

/// Whether the loop keeps running after an intent
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Quit,
}

/// Result of work finished off the agent task
#[derive(Debug)]
pub enum Job {
    Hardened(Result<(), GuardError>),
    Relaxed(Result<(), GuardError>),
    PolicyFetched(Result<RemotePolicyDocument, GuardError>),
    PublicIp(Result<IpAddr>),
}

/// Everything the agent is built from
pub struct AgentParts {
    pub config: Config,
    /// Where launch preferences are saved; `None` keeps them in memory
    pub config_path: Option<PathBuf>,
    pub store: PolicyStore,
    pub source: Arc<dyn AccountingSource>,
    pub engine: EnforcementEngine,
    pub persistence: Arc<PersistenceManager>,
    pub policy_client: Option<PolicyClient>,
}

pub struct Agent {
    config: Config,
    config_path: Option<PathBuf>,
    store: PolicyStore,
    gate: CredentialGate,
    source: Arc<dyn AccountingSource>,
    sampler: TrafficSampler,
    engine: EnforcementEngine,
    persistence: Arc<PersistenceManager>,
    policy_client: Option<PolicyClient>,
    traffic: TrafficSnapshot,
    public_ip: Option<IpAddr>,
    local_ip: Option<IpAddr>,
    last_policy_sync: Option<DateTime<Utc>>,
    status_message: String,
    snapshot_tx: watch::Sender<AgentSnapshot>,
}

impl Agent {
    pub fn new(parts: AgentParts) -> Self {
        let gate = CredentialGate::new(parts.config.require_current_password);
        let sampler = TrafficSampler::new(parts.config.tick_interval());
        let (snapshot_tx, _) = watch::channel(AgentSnapshot::default());

        let agent = Self {
            config: parts.config,
            config_path: parts.config_path,
            store: parts.store,
            gate,
            source: parts.source,
            sampler,
            engine: parts.engine,
            persistence: parts.persistence,
            policy_client: parts.policy_client,
            traffic: TrafficSnapshot::default(),
            public_ip: None,
            local_ip: None,
            last_policy_sync: None,
            status_message: String::new(),
            snapshot_tx,
        };
        agent.publish();
        agent
    }

    pub fn subscribe(&self) -> watch::Receiver<AgentSnapshot> {
        self.snapshot_tx.subscribe()
    }

    pub fn snapshot(&self) -> AgentSnapshot {
        let policy = self.store.current();
        AgentSnapshot {
            connections: self.traffic.sorted(self.config.sort_mode),
            total_in: self.traffic.total_in,
            total_out: self.traffic.total_out,
            sort_mode: self.config.sort_mode,
            state: policy.current_state,
            meeting_mode_permitted: policy.meeting_mode_permitted(),
            hardening_permitted: policy.hardening_permitted(),
            paused_pids: self.engine.paused_pids(),
            is_registered: self.persistence.is_registered(),
            is_hardened: self.persistence.is_hardened(),
            persistence_enabled: self.config.persistence_enabled,
            public_ip: self.public_ip,
            local_ip: self.local_ip,
            last_policy_sync: self.last_policy_sync,
            policy_path: self.store.location().map(PathBuf::from),
            status_message: self.status_message.clone(),
        }
    }

    fn publish(&self) {
        self.snapshot_tx.send_replace(self.snapshot());
    }

    fn set_status(&mut self, message: impl Into<String>) {
        self.status_message = message.into();
    }

    fn save_preferences(&self) {
        if let Some(path) = &self.config_path {
            if let Err(e) = self.config.save_to(path) {
                log::warn!("Failed to save preferences: {:#}", e);
            }
        }
    }

    /// Apply launch preferences: first launch enables persistence; later
    /// launches refresh the user-tier descriptor unless hardened.
    pub fn startup(&mut self) {
        if is_running_as_root() {
            log::info!("Running as root: acting as the system-tier daemon");
        }
        if !self.gate.has_custom_credential(&self.store) {
            log::warn!("The default password is still in use; change it with `set-password`");
        }

        if !self.config.has_launched_before {
            log::info!("First launch: enabling persistence");
            self.config.has_launched_before = true;
            self.config.persistence_enabled = true;
            self.save_preferences();
            if let Err(e) = self.persistence.register() {
                log::warn!("Failed to register auto-start: {}", e);
            }
        } else if self.config.persistence_enabled && !self.persistence.is_hardened() {
            if let Err(e) = self.persistence.register() {
                log::warn!("Failed to refresh auto-start: {}", e);
            }
        }

        match netinfo::local_ip() {
            Ok(ip) => self.local_ip = Some(ip),
            Err(e) => log::debug!("Local IP unavailable: {:#}", e),
        }

        self.publish();
    }

    /// Ingest one successful listing and run the tick's enforcement pass
    pub fn ingest_tick(&mut self, output: &str, now: Instant) -> Vec<EnforcementAction> {
        let snapshot = self.sampler.ingest(output, now);

        // Enforcement reads a copy of the policy for the whole pass
        self.store.refresh();
        let policy = self.store.snapshot();
        let mut actions = self
            .engine
            .apply(&snapshot.connections, &policy.whitelist, policy.is_focus());

        // Focus ended outside this process (CLI sync or toggle)
        if !policy.is_focus() && !self.engine.paused_pids().is_empty() {
            log::info!("Focus no longer active, resuming paused processes");
            actions.extend(self.engine.resume_all());
        }

        for action in &actions {
            self.status_message = match action {
                EnforcementAction::Suspended { pid, name } => format!("Paused {} (PID {})", name, pid),
                EnforcementAction::Resumed { pid, name } => format!("Resumed {} (PID {})", name, pid),
            };
        }

        let engine = &self.engine;
        self.traffic = snapshot.with_paused(|pid| engine.is_paused(pid));
        self.publish();
        actions
    }

    /// Handle one intent. Refusals come back as `GuardError`.
    pub fn handle_intent(&mut self, intent: Intent, jobs: &mut JoinSet<Job>) -> Result<Flow, GuardError> {
        log::debug!("Intent: {:?}", redact(&intent));

        let result = match intent {
            Intent::ToggleFocus => self.toggle_focus().map(|_| Flow::Continue),
            Intent::SetPassword { new_secret, current } => self
                .gate
                .set_credential(&mut self.store, &new_secret, current.as_deref())
                .map(|_| {
                    self.set_status("Password updated");
                    Flow::Continue
                }),
            Intent::SetPersistence { enabled, password } => self
                .set_persistence(enabled, password.as_deref().unwrap_or_default())
                .map(|_| Flow::Continue),
            Intent::Harden { password } => self.start_hardening(&password, jobs).map(|_| Flow::Continue),
            Intent::Relax { password } => self.start_relax(&password, jobs).map(|_| Flow::Continue),
            Intent::SyncPolicy => self.start_policy_sync(jobs).map(|_| Flow::Continue),
            Intent::SetSortMode(mode) => {
                self.config.sort_mode = mode;
                self.save_preferences();
                Ok(Flow::Continue)
            }
            Intent::Status => {
                print_status(&self.snapshot());
                Ok(Flow::Continue)
            }
            Intent::Quit { password } => self.quit(password.as_deref()),
        };

        if let Err(e) = &result {
            log::warn!("Refused: {}", e);
            self.set_status(format!("Refused: {}", e));
        }
        self.publish();
        result
    }

    /// Normal <-> Focus. Leaving focus resumes every paused process before returning.
    pub fn toggle_focus(&mut self) -> Result<EnforcementState, GuardError> {
        self.store.refresh();
        if self.store.current().is_focus() {
            self.store.update(|p| p.leave_focus());
            let resumed = self.engine.resume_all();
            log::info!("Focus off, resumed {} process(es)", resumed.len());
            self.set_status("Focus mode off");
        } else {
            self.store.try_update(|p| p.enter_focus())?;
            log::info!("Focus on");
            self.set_status("Focus mode on");
        }

        let state = self.store.current().current_state;
        self.publish();
        Ok(state)
    }

    fn set_persistence(&mut self, enabled: bool, password: &str) -> Result<(), GuardError> {
        if enabled {
            self.persistence.register()?;
            self.set_status("Persistence enabled");
        } else {
            let auth = self.gate.authorize(&mut self.store, password)?;
            self.persistence.unregister(&auth)?;
            self.set_status("Persistence disabled");
        }

        self.config.persistence_enabled = enabled;
        self.save_preferences();
        Ok(())
    }

    fn start_hardening(&mut self, password: &str, jobs: &mut JoinSet<Job>) -> Result<(), GuardError> {
        let auth = self.gate.authorize(&mut self.store, password)?;
        if !self.store.current().hardening_permitted() {
            return Err(GuardError::FeatureDisabled("hardening"));
        }
        if self.persistence.is_hardened() {
            self.set_status("Already hardened");
            return Ok(());
        }

        let persistence = Arc::clone(&self.persistence);
        jobs.spawn_blocking(move || Job::Hardened(persistence.elevate_to_hardened(&auth)));
        self.set_status("Waiting for administrator authorization...");
        Ok(())
    }

    fn start_relax(&mut self, password: &str, jobs: &mut JoinSet<Job>) -> Result<(), GuardError> {
        let auth = self.gate.authorize(&mut self.store, password)?;
        if !self.persistence.is_hardened() {
            self.set_status("Not hardened");
            return Ok(());
        }

        let persistence = Arc::clone(&self.persistence);
        jobs.spawn_blocking(move || Job::Relaxed(persistence.relax_hardening(&auth)));
        self.set_status("Waiting for administrator authorization...");
        Ok(())
    }

    fn start_policy_sync(&mut self, jobs: &mut JoinSet<Job>) -> Result<(), GuardError> {
        let client = self
            .policy_client
            .clone()
            .ok_or_else(|| GuardError::PolicyFetch("no policy endpoint configured".to_string()))?;

        log::debug!("Syncing policy from {}", client.endpoint());
        jobs.spawn(async move { Job::PolicyFetched(client.fetch().await) });
        Ok(())
    }

    fn start_public_ip_lookup(&self, jobs: &mut JoinSet<Job>) {
        let endpoint = self.config.public_ip_endpoint.clone();
        if endpoint.is_empty() {
            return;
        }
        jobs.spawn(async move { Job::PublicIp(netinfo::fetch_public_ip(&endpoint).await) });
    }

    /// Quitting while hardened, or while the user tier would respawn us, is gated
    fn quit(&mut self, password: Option<&str>) -> Result<Flow, GuardError> {
        let hardened = self.persistence.is_hardened();
        let registered = self.persistence.is_registered();

        if hardened || registered {
            let auth = self
                .gate
                .authorize(&mut self.store, password.unwrap_or_default())?;
            if !hardened {
                self.persistence.unregister(&auth)?;
                self.config.persistence_enabled = false;
                self.save_preferences();
            } else {
                log::info!("Quitting; the system daemon stays active");
            }
        }

        Ok(Flow::Quit)
    }

    /// Merge a fetched document; leaving focus resumes everything immediately
    pub fn apply_remote_policy(&mut self, document: &RemotePolicyDocument) -> MergeOutcome {
        let outcome = match self.store.try_update(|p| match p.merge_remote(document) {
            applied @ MergeOutcome::Applied { .. } => Ok(applied),
            ignored => Err(ignored),
        }) {
            Ok(outcome) | Err(outcome) => outcome,
        };

        if outcome.ended_focus() {
            let resumed = self.engine.resume_all();
            log::info!("Policy ended focus, resumed {} process(es)", resumed.len());
        }

        self.last_policy_sync = Some(Utc::now());
        self.publish();
        outcome
    }

    /// Fold a finished background job back into agent state
    pub fn finish_job(&mut self, job: Job) {
        match job {
            Job::Hardened(result) => match result {
                Ok(()) => self.set_status("Hardened: system daemon installed"),
                Err(e) => {
                    log::warn!("Hardening failed: {}", e);
                    self.set_status(format!("Hardening failed: {}", e));
                }
            },
            Job::Relaxed(result) => match result {
                Ok(()) => self.set_status("Hardening relaxed"),
                Err(e) => {
                    log::warn!("Relaxing hardening failed: {}", e);
                    self.set_status(format!("Relax failed: {}", e));
                }
            },
            Job::PolicyFetched(result) => match result {
                Ok(document) => {
                    let outcome = self.apply_remote_policy(&document);
                    self.set_status(match outcome {
                        MergeOutcome::Applied { new_state, .. } => {
                            format!("Policy v{} applied ({})", document.meta.version, new_state)
                        }
                        MergeOutcome::Ignored { local_version, .. } => {
                            format!("Policy up to date (v{})", local_version)
                        }
                    });
                }
                Err(e) => {
                    log::warn!("{}", e);
                    self.set_status(e.to_string());
                }
            },
            Job::PublicIp(result) => match result {
                Ok(ip) => self.public_ip = Some(ip),
                Err(e) => log::warn!("Public IP lookup failed: {:#}", e),
            },
        }

        // Ground truth after any elevated helper
        self.publish();
    }

    /// Resume everything this agent paused
    pub fn shutdown(&mut self) {
        let resumed = self.engine.resume_all();
        if !resumed.is_empty() {
            log::info!("Shutdown: resumed {} process(es)", resumed.len());
        }
        self.publish();
    }

    /// Read the accounting source on its own task. A read that outlives the
    /// sample timeout is dropped (killing the utility) and reported as failed.
    fn spawn_sample(&self) -> JoinHandle<(Result<String>, Instant)> {
        let source = Arc::clone(&self.source);
        let limit = self.config.sample_timeout();
        tokio::spawn(async move {
            let output = match tokio::time::timeout(limit, source.read()).await {
                Ok(output) => output,
                Err(_) => Err(anyhow::anyhow!(
                    "{} did not finish within {:?}",
                    source.name(),
                    limit
                )),
            };
            (output, Instant::now())
        })
    }

    /// Run until `shutdown` resolves or an authorized quit arrives. Paused
    /// processes are always resumed on the way out.
    pub async fn run(
        mut self,
        mut intents: mpsc::Receiver<Intent>,
        shutdown: impl Future<Output = ()>,
    ) -> Result<()> {
        tokio::pin!(shutdown);

        let mut ticker = interval(self.config.tick_interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        let sync_period = self.config.policy_sync_interval();
        let mut sync_ticker = interval(sync_period.unwrap_or(self.config.tick_interval()));
        sync_ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        let mut sampling: Option<JoinHandle<(Result<String>, Instant)>> = None;
        let mut jobs: JoinSet<Job> = JoinSet::new();

        self.start_public_ip_lookup(&mut jobs);
        if self.policy_client.is_some() && sync_period.is_none() {
            // Periodic sync covers startup through its first immediate tick
            let _ = self.start_policy_sync(&mut jobs);
        }

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    log::info!("Shutdown requested");
                    break;
                }

                _ = ticker.tick() => {
                    if sampling.is_some() {
                        log::debug!("Previous sample still running, skipping tick");
                    } else {
                        sampling = Some(self.spawn_sample());
                    }
                }

                finished = async {
                    match sampling.as_mut() {
                        Some(handle) => handle.await,
                        None => std::future::pending().await,
                    }
                } => {
                    sampling = None;
                    match finished {
                        Ok((Ok(output), at)) => {
                            let actions = self.ingest_tick(&output, at);
                            log::trace!("Tick finished with {} action(s)", actions.len());
                        }
                        Ok((Err(e), _)) => log::warn!("Sampling failed, keeping previous snapshot: {:#}", e),
                        Err(e) => log::warn!("Sampling task failed: {}", e),
                    }
                }

                Some(intent) = intents.recv() => {
                    if let Ok(Flow::Quit) = self.handle_intent(intent, &mut jobs) {
                        break;
                    }
                }

                Some(joined) = jobs.join_next() => {
                    match joined {
                        Ok(job) => self.finish_job(job),
                        Err(e) => log::warn!("Background job failed: {}", e),
                    }
                }

                _ = sync_ticker.tick(), if sync_period.is_some() && self.policy_client.is_some() => {
                    let _ = self.start_policy_sync(&mut jobs);
                }
            }
        }

        if let Some(handle) = sampling {
            handle.abort();
        }
        self.shutdown();
        Ok(())
    }
}

/// Keep secrets out of debug logs
fn redact(intent: &Intent) -> Intent {
    const HIDDEN: &str = "***";
    match intent {
        Intent::SetPassword { current, .. } => Intent::SetPassword {
            new_secret: HIDDEN.to_string(),
            current: current.as_ref().map(|_| HIDDEN.to_string()),
        },
        Intent::SetPersistence { enabled, password } => Intent::SetPersistence {
            enabled: *enabled,
            password: password.as_ref().map(|_| HIDDEN.to_string()),
        },
        Intent::Harden { .. } => Intent::Harden {
            password: HIDDEN.to_string(),
        },
        Intent::Relax { .. } => Intent::Relax {
            password: HIDDEN.to_string(),
        },
        Intent::Quit { password } => Intent::Quit {
            password: password.as_ref().map(|_| HIDDEN.to_string()),
        },
        other => other.clone(),
    }
}

/// Human-readable status block
pub fn print_status(snapshot: &AgentSnapshot) {
    println!("State:        {}", snapshot.state);
    println!(
        "Features:     meeting mode {}, hardening {}",
        if snapshot.meeting_mode_permitted { "permitted" } else { "disabled" },
        if snapshot.hardening_permitted { "permitted" } else { "disabled" }
    );
    println!(
        "Persistence:  {} (user agent {}, hardened {})",
        if snapshot.persistence_enabled { "enabled" } else { "disabled" },
        if snapshot.is_registered { "present" } else { "absent" },
        if snapshot.is_hardened { "yes" } else { "no" }
    );
    println!("Paused PIDs:  {:?}", snapshot.paused_pids);
    match &snapshot.policy_path {
        Some(path) => println!("Policy file:  {}", path.display()),
        None => println!("Policy file:  (in memory)"),
    }
    println!(
        "Traffic:      {} in / {} out across {} process(es), sorted by {:?}",
        ConnectionSample::format_bytes(snapshot.total_in),
        ConnectionSample::format_bytes(snapshot.total_out),
        snapshot.connections.len(),
        snapshot.sort_mode
    );
    if let Some(ip) = snapshot.public_ip {
        println!("Public IP:    {}", ip);
    }
    if let Some(ip) = snapshot.local_ip {
        println!("Local IP:     {}", ip);
    }
    if let Some(at) = snapshot.last_policy_sync {
        println!("Policy sync:  {}", at.to_rfc3339());
    }
    if !snapshot.status_message.is_empty() {
        println!("Status:       {}", snapshot.status_message);
    }
}
