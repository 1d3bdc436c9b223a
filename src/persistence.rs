// Auto-start registration at two privilege tiers
//
// User tier: a LaunchAgent descriptor in ~/Library/LaunchAgents that this
// process writes and loads itself.
// Hardened tier: a LaunchDaemon descriptor in /Library/LaunchDaemons that only
// an elevated helper can install or remove.
//
// Registration state is never cached; every query looks at the filesystem.

use crate::backends::privilege::{PrivilegedExecutor, shell_quote};
use crate::backends::service::ServiceSupervisor;
use crate::credential::Authorized;
use crate::error::GuardError;
use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};

/// Reverse-domain identifier of both descriptors
pub const SERVICE_LABEL: &str = "io.netpulse.agent";

/// Identifiers used by earlier releases; removed before registering
pub const LEGACY_SERVICE_LABELS: &[&str] = &[
    "com.netpulse.agent",
    "id.emiro.netpulse",
    "com.emir.netpulse",
];

const SYSTEM_DAEMONS_DIR: &str = "/Library/LaunchDaemons";
const SYSTEM_SUPPORT_DIR: &str = "/Library/Application Support/NetPulse";
const HARDENING_SCRIPT: &str = "harden_agent.sh";

/// Where descriptors live and what they point at
#[derive(Debug, Clone)]
pub struct PersistenceLayout {
    pub user_agents_dir: PathBuf,
    pub system_daemons_dir: PathBuf,
    pub system_support_dir: PathBuf,
    /// Executable the descriptors launch
    pub executable: PathBuf,
    /// Installation path handed to the hardening helper (app bundle or binary dir)
    pub install_path: PathBuf,
    pub hardening_script: PathBuf,
}

impl PersistenceLayout {
    /// Resolve the layout for the running executable
    pub fn detect(hardening_script: Option<PathBuf>) -> Result<Self> {
        let home = dirs::home_dir().context("Could not determine home directory")?;
        let executable = std::env::current_exe().context("Could not resolve own executable")?;
        let install_path = install_path_for(&executable);

        let hardening_script = hardening_script.unwrap_or_else(|| {
            executable
                .parent()
                .map(|dir| dir.join(HARDENING_SCRIPT))
                .unwrap_or_else(|| PathBuf::from(HARDENING_SCRIPT))
        });

        Ok(Self {
            user_agents_dir: home.join("Library/LaunchAgents"),
            system_daemons_dir: PathBuf::from(SYSTEM_DAEMONS_DIR),
            system_support_dir: PathBuf::from(SYSTEM_SUPPORT_DIR),
            executable,
            install_path,
            hardening_script,
        })
    }
}

/// `/Applications/NetPulse.app/Contents/MacOS/netpulse` -> `/Applications/NetPulse.app`,
/// otherwise the directory holding the binary
fn install_path_for(executable: &Path) -> PathBuf {
    executable
        .ancestors()
        .find(|p| p.extension().is_some_and(|ext| ext == "app"))
        .or_else(|| executable.parent())
        .unwrap_or(executable)
        .to_path_buf()
}

fn descriptor_name(label: &str) -> String {
    format!("{}.plist", label)
}

fn xml_escape(value: &str) -> String {
    value
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

/// Render a launchd descriptor with run-at-load and keep-alive
pub fn render_descriptor(label: &str, executable: &Path) -> String {
    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<!DOCTYPE plist PUBLIC "-//Apple//DTD PLIST 1.0//EN" "http://www.apple.com/DTDs/PropertyList-1.0.dtd">
<plist version="1.0">
<dict>
    <key>Label</key>
    <string>{label}</string>
    <key>ProgramArguments</key>
    <array>
        <string>{program}</string>
        <string>run</string>
    </array>
    <key>RunAtLoad</key>
    <true/>
    <key>KeepAlive</key>
    <true/>
    <key>ProcessType</key>
    <string>Interactive</string>
</dict>
</plist>
"#,
        label = xml_escape(label),
        program = xml_escape(&executable.to_string_lossy()),
    )
}

pub fn is_running_as_root() -> bool {
    nix::unistd::geteuid().is_root()
}

pub struct PersistenceManager {
    layout: PersistenceLayout,
    supervisor: Box<dyn ServiceSupervisor>,
    executor: Box<dyn PrivilegedExecutor>,
}

impl PersistenceManager {
    pub fn new(
        layout: PersistenceLayout,
        supervisor: Box<dyn ServiceSupervisor>,
        executor: Box<dyn PrivilegedExecutor>,
    ) -> Self {
        Self {
            layout,
            supervisor,
            executor,
        }
    }

    pub fn user_descriptor(&self) -> PathBuf {
        self.layout.user_agents_dir.join(descriptor_name(SERVICE_LABEL))
    }

    pub fn system_descriptor(&self) -> PathBuf {
        self.layout.system_daemons_dir.join(descriptor_name(SERVICE_LABEL))
    }

    pub fn is_registered(&self) -> bool {
        self.user_descriptor().exists()
    }

    pub fn is_hardened(&self) -> bool {
        self.system_descriptor().exists()
    }

    /// Write and load the user-tier descriptor. Idempotent; ungated.
    pub fn register(&self) -> Result<(), GuardError> {
        self.remove_legacy_descriptors();

        let descriptor = self.user_descriptor();
        self.write_user_descriptor(&descriptor)
            .map_err(GuardError::storage)?;
        log::info!("Persistence: wrote {:?}", descriptor);

        self.supervisor
            .load(&descriptor)
            .map_err(GuardError::storage)?;
        Ok(())
    }

    fn write_user_descriptor(&self, descriptor: &Path) -> Result<()> {
        fs::create_dir_all(&self.layout.user_agents_dir).with_context(|| {
            format!("Failed to create {:?}", self.layout.user_agents_dir)
        })?;

        let contents = render_descriptor(SERVICE_LABEL, &self.layout.executable);
        let tmp = descriptor.with_extension("plist.tmp");
        fs::write(&tmp, contents).with_context(|| format!("Failed to write {:?}", tmp))?;
        fs::rename(&tmp, descriptor).with_context(|| format!("Failed to replace {:?}", descriptor))?;
        Ok(())
    }

    fn remove_legacy_descriptors(&self) {
        for label in LEGACY_SERVICE_LABELS {
            let legacy = self.layout.user_agents_dir.join(descriptor_name(label));
            if !legacy.exists() {
                continue;
            }

            if let Err(e) = self.supervisor.unload(&legacy) {
                log::warn!("Failed to unload legacy agent {}: {:#}", label, e);
            }
            match fs::remove_file(&legacy) {
                Ok(()) => log::info!("Persistence: cleaned up legacy agent {}", label),
                Err(e) => log::warn!("Failed to remove legacy agent {:?}: {}", legacy, e),
            }
        }
    }

    /// Unload and delete the user-tier descriptor
    pub fn unregister(&self, _auth: &Authorized) -> Result<(), GuardError> {
        let descriptor = self.user_descriptor();
        if !descriptor.exists() {
            return Ok(());
        }

        if let Err(e) = self.supervisor.unload(&descriptor) {
            log::warn!("Failed to unload {:?}: {:#}", descriptor, e);
        }
        fs::remove_file(&descriptor)
            .with_context(|| format!("Failed to remove {:?}", descriptor))
            .map_err(GuardError::storage)?;

        log::info!("Persistence: user agent removed");
        Ok(())
    }

    /// Install the system-tier descriptor through the elevated helper
    pub fn elevate_to_hardened(&self, _auth: &Authorized) -> Result<(), GuardError> {
        let script_path = &self.layout.hardening_script;
        if !script_path.exists() {
            return Err(GuardError::Elevation(format!(
                "hardening helper not found at {:?}",
                script_path
            )));
        }

        let script = format!(
            "{} {}",
            shell_quote(&script_path.to_string_lossy()),
            shell_quote(&self.layout.install_path.to_string_lossy())
        );

        if let Err(e) = self.executor.run_elevated(&script) {
            log::warn!("Hardening helper failed: {:#}", e);
        }

        if self.is_hardened() {
            log::info!("Persistence: hardened (system daemon installed)");
            Ok(())
        } else {
            Err(GuardError::Elevation(
                "system descriptor absent after hardening helper".to_string(),
            ))
        }
    }

    /// Remove the system-tier descriptor and support directory through the elevated helper
    pub fn relax_hardening(&self, _auth: &Authorized) -> Result<(), GuardError> {
        let descriptor = shell_quote(&self.system_descriptor().to_string_lossy());
        let support = shell_quote(&self.layout.system_support_dir.to_string_lossy());
        let script = format!(
            "launchctl unload {descriptor}; rm -f {descriptor}; rm -rf {support}"
        );

        if let Err(e) = self.executor.run_elevated(&script) {
            log::warn!("Relax helper failed: {:#}", e);
        }

        if self.is_hardened() {
            Err(GuardError::Elevation(
                "system descriptor still present after relax helper".to_string(),
            ))
        } else {
            log::info!("Persistence: hardening relaxed");
            Ok(())
        }
    }
}
