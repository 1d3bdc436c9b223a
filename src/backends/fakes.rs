// Recording backends for tests

use super::BackendPriority;
use super::accounting::{AccountingSource, ReadFuture};
use super::privilege::PrivilegedExecutor;
use super::service::ServiceSupervisor;
use super::signal::ProcessController;
use anyhow::Result;
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::Semaphore;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Signal {
    Stop(i32),
    Cont(i32),
}

/// Records every suspend/resume in order
#[derive(Clone, Default)]
pub struct FakeController {
    pub calls: Arc<Mutex<Vec<Signal>>>,
    /// Pids whose suspend should fail (e.g. already exited)
    pub dead: Arc<Mutex<Vec<i32>>>,
}

impl FakeController {
    pub fn calls(&self) -> Vec<Signal> {
        self.calls.lock().unwrap().clone()
    }
}

impl ProcessController for FakeController {
    fn name(&self) -> &'static str {
        "fake"
    }

    fn priority(&self) -> BackendPriority {
        BackendPriority::Best
    }

    fn suspend(&self, pid: i32) -> Result<()> {
        if self.dead.lock().unwrap().contains(&pid) {
            anyhow::bail!("no such process {}", pid);
        }
        self.calls.lock().unwrap().push(Signal::Stop(pid));
        Ok(())
    }

    fn resume(&self, pid: i32) -> Result<()> {
        self.calls.lock().unwrap().push(Signal::Cont(pid));
        Ok(())
    }
}

/// Runs "elevated" scripts by calling a closure standing in for root
#[derive(Clone)]
pub struct FakeExecutor {
    pub scripts: Arc<Mutex<Vec<String>>>,
    pub effect: Arc<dyn Fn(&str) -> Result<()> + Send + Sync>,
}

impl FakeExecutor {
    pub fn new(effect: impl Fn(&str) -> Result<()> + Send + Sync + 'static) -> Self {
        Self {
            scripts: Arc::default(),
            effect: Arc::new(effect),
        }
    }

    pub fn scripts(&self) -> Vec<String> {
        self.scripts.lock().unwrap().clone()
    }
}

impl PrivilegedExecutor for FakeExecutor {
    fn name(&self) -> &'static str {
        "fake"
    }

    fn priority(&self) -> BackendPriority {
        BackendPriority::Good
    }

    fn is_available(&self) -> bool {
        true
    }

    fn run_elevated(&self, script: &str) -> Result<()> {
        self.scripts.lock().unwrap().push(script.to_string());
        (self.effect)(script)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServiceCall {
    Load(PathBuf),
    Unload(PathBuf),
}

#[derive(Clone, Default)]
pub struct FakeSupervisor {
    pub calls: Arc<Mutex<Vec<ServiceCall>>>,
}

impl FakeSupervisor {
    pub fn calls(&self) -> Vec<ServiceCall> {
        self.calls.lock().unwrap().clone()
    }
}

impl ServiceSupervisor for FakeSupervisor {
    fn name(&self) -> &'static str {
        "fake"
    }

    fn priority(&self) -> BackendPriority {
        BackendPriority::Good
    }

    fn is_available(&self) -> bool {
        true
    }

    fn load(&self, descriptor: &Path) -> Result<()> {
        self.calls
            .lock()
            .unwrap()
            .push(ServiceCall::Load(descriptor.to_path_buf()));
        Ok(())
    }

    fn unload(&self, descriptor: &Path) -> Result<()> {
        self.calls
            .lock()
            .unwrap()
            .push(ServiceCall::Unload(descriptor.to_path_buf()));
        Ok(())
    }
}

/// Replays queued listings; an empty queue is a spawn failure
#[derive(Clone, Default)]
pub struct FakeSource {
    pub outputs: Arc<Mutex<VecDeque<Result<String, String>>>>,
    /// Reads started, including ones still waiting on the gate
    pub reads: Arc<AtomicUsize>,
    /// When set, every read waits for one permit before it replays
    pub gate: Option<Arc<Semaphore>>,
}

impl FakeSource {
    /// A source whose reads hang until the returned semaphore grants permits
    pub fn gated() -> (Self, Arc<Semaphore>) {
        let gate = Arc::new(Semaphore::new(0));
        let source = Self {
            gate: Some(Arc::clone(&gate)),
            ..Self::default()
        };
        (source, gate)
    }

    pub fn reads(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }

    async fn replay(&self) -> Result<String> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        if let Some(gate) = &self.gate {
            gate.acquire().await?.forget();
        }

        let next = self.outputs.lock().unwrap().pop_front();
        match next {
            Some(Ok(output)) => Ok(output),
            Some(Err(message)) => Err(anyhow::anyhow!(message)),
            None => anyhow::bail!("accounting utility not found"),
        }
    }

    pub fn push(&self, output: &str) {
        self.outputs.lock().unwrap().push_back(Ok(output.to_string()));
    }

    pub fn push_failure(&self, message: &str) {
        self.outputs
            .lock()
            .unwrap()
            .push_back(Err(message.to_string()));
    }
}

impl AccountingSource for FakeSource {
    fn name(&self) -> &'static str {
        "fake"
    }

    fn priority(&self) -> BackendPriority {
        BackendPriority::Good
    }

    fn is_available(&self) -> bool {
        true
    }

    fn read(&self) -> ReadFuture<'_> {
        Box::pin(self.replay())
    }
}
