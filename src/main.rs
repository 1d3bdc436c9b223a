mod agent;
mod backends;
mod config;
mod credential;
mod enforcement;
mod error;
mod monitor;
mod netinfo;
mod persistence;
mod policy;
mod process;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::signal;
use tokio::sync::mpsc;
use tokio::task::JoinSet;

use crate::agent::{Agent, AgentParts, Intent};
use crate::backends::BackendInfo;
use crate::backends::accounting::{AccountingSource, NettopSource};
use crate::backends::privilege::{OsascriptExecutor, PrivilegedExecutor};
use crate::backends::service::{Launchctl, ServiceSupervisor};
use crate::backends::signal::{ProcessController, SignalController};
use crate::config::Config;
use crate::enforcement::{EnforcementEngine, is_whitelisted};
use crate::monitor::TrafficSampler;
use crate::persistence::{PersistenceLayout, PersistenceManager};
use crate::policy::{PolicyClient, PolicyStore};
use crate::process::ConnectionSample;

/// NetPulse - per-process network monitor with focus-mode enforcement
#[derive(Parser, Debug)]
#[command(name = "netpulse")]
#[command(version)]
#[command(about = "Per-process network monitor that pauses noisy apps during focus", long_about = None)]
struct Args {
    /// Log at info level when RUST_LOG is not set
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the agent; reads control lines on stdin
    Run {
        /// Enter focus mode immediately
        #[arg(long)]
        focus: bool,

        /// Remote policy endpoint (overrides the config file)
        #[arg(long, value_name = "URL")]
        policy_endpoint: Option<String>,
    },

    /// Take two samples one interval apart and print the table
    Sample,

    /// Show policy, persistence and backend state
    Status,

    /// Replace the control password
    SetPassword {
        new_password: String,

        /// Current password (required when the config asks for it)
        #[arg(long)]
        current: Option<String>,
    },

    /// Enable or disable the user-level auto-start registration
    Persistence {
        #[arg(value_enum)]
        action: Toggle,

        /// Required to disable
        #[arg(long)]
        password: Option<String>,
    },

    /// Install the system-level daemon (prompts for administrator rights)
    Harden {
        #[arg(long)]
        password: String,
    },

    /// Remove the system-level daemon (prompts for administrator rights)
    Relax {
        #[arg(long)]
        password: String,
    },

    /// Fetch and merge the remote policy once
    Sync {
        #[arg(long, value_name = "URL")]
        policy_endpoint: Option<String>,
    },
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
enum Toggle {
    Enable,
    Disable,
}

fn init_logging(verbose: bool) {
    if std::env::var("RUST_LOG").is_ok() {
        pretty_env_logger::formatted_builder()
            .parse_default_env()
            .init();
    } else if verbose {
        pretty_env_logger::formatted_builder()
            .filter_level(log::LevelFilter::Info)
            .init();
    }
}

fn build_agent(config: Config, policy_endpoint: Option<String>) -> Result<Agent> {
    let config_path = Config::config_path().ok();

    let layout = PersistenceLayout::detect(config.hardening_script.clone())?;
    let persistence = PersistenceManager::new(
        layout,
        Box::new(Launchctl::new()),
        Box::new(OsascriptExecutor::new()),
    );

    let engine = EnforcementEngine::new(Box::new(SignalController::new()), config.suspend_threshold);
    let source = NettopSource::new(&config.accounting_utility);
    if !source.is_available() {
        log::warn!(
            "Accounting utility {:?} not found; traffic will stay empty",
            config.accounting_utility
        );
    }

    let policy_client = policy_endpoint
        .or_else(|| config.policy_endpoint.clone())
        .map(PolicyClient::new);

    Ok(Agent::new(AgentParts {
        config,
        config_path,
        store: PolicyStore::open_default(),
        source: Arc::new(source),
        engine,
        persistence: Arc::new(persistence),
        policy_client,
    }))
}

/// Resolves on Ctrl-C or SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            log::warn!("Failed to listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                log::warn!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}

/// Forward stdin control lines to the agent until EOF
fn spawn_stdin_reader(intents: mpsc::Sender<Intent>) {
    tokio::spawn(async move {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        loop {
            match lines.next_line().await {
                Ok(Some(line)) if line.trim().is_empty() => continue,
                Ok(Some(line)) => match line.parse::<Intent>() {
                    Ok(intent) => {
                        if intents.send(intent).await.is_err() {
                            break;
                        }
                    }
                    Err(e) => eprintln!("{}", e),
                },
                Ok(None) => break,
                Err(e) => {
                    log::warn!("Failed to read stdin: {}", e);
                    break;
                }
            }
        }
    });
}

async fn run_agent(config: Config, focus: bool, policy_endpoint: Option<String>) -> Result<()> {
    let mut agent = build_agent(config, policy_endpoint)?;
    agent.startup();

    if focus {
        if let Err(e) = agent.toggle_focus() {
            log::warn!("Could not enter focus mode: {}", e);
        }
    }

    println!("NetPulse v{} running (Ctrl+C to stop)", env!("CARGO_PKG_VERSION"));
    println!("Commands: focus | sync | status | sort total|speed | password <new> [current]");
    println!("          persist on|off [password] | harden <password> | relax <password> | quit [password]");

    let (intent_tx, intent_rx) = mpsc::channel(16);
    spawn_stdin_reader(intent_tx);

    // Echo status changes
    let mut snapshots = agent.subscribe();
    tokio::spawn(async move {
        let mut last = String::new();
        while snapshots.changed().await.is_ok() {
            let message = snapshots.borrow_and_update().status_message.clone();
            if !message.is_empty() && message != last {
                println!("{}", message);
                last = message;
            }
        }
    });

    agent.run(intent_rx, shutdown_signal()).await?;
    println!("NetPulse stopped; all paused processes resumed");
    Ok(())
}

/// Run one intent outside the tick loop, waiting for any background job it starts
async fn run_once(mut agent: Agent, intent: Intent) -> Result<()> {
    let mut jobs = JoinSet::new();
    agent.handle_intent(intent, &mut jobs)?;

    while let Some(joined) = jobs.join_next().await {
        agent.finish_job(joined.context("Background job panicked")?);
    }

    let snapshot = agent.snapshot();
    if !snapshot.status_message.is_empty() {
        println!("{}", snapshot.status_message);
    }
    Ok(())
}

async fn read_listing(source: &NettopSource, limit: Duration) -> Result<(String, Instant)> {
    let output = tokio::time::timeout(limit, source.read())
        .await
        .with_context(|| format!("{} did not finish within {:?}", source.name(), limit))??;
    Ok((output, Instant::now()))
}

async fn run_sample(config: &Config) -> Result<()> {
    let source = NettopSource::new(&config.accounting_utility);
    if !source.is_available() {
        anyhow::bail!("Accounting utility {:?} not found", config.accounting_utility);
    }

    let mut sampler = TrafficSampler::new(config.tick_interval());
    let (first, at) = read_listing(&source, config.sample_timeout()).await?;
    sampler.ingest(&first, at);

    tokio::time::sleep(config.tick_interval()).await;
    let (second, at) = read_listing(&source, config.sample_timeout()).await?;
    let snapshot = sampler.ingest(&second, at);

    let store = PolicyStore::open_default();
    let whitelist = &store.current().whitelist;

    println!(
        "{:>7}  {:<32} {:>12} {:>12} {:>10}  WL",
        "PID", "PROCESS", "DOWN", "UP", "TOTAL"
    );
    for conn in snapshot.sorted(config.sort_mode) {
        println!(
            "{:>7}  {:<32} {:>12} {:>12} {:>10}  {}",
            conn.pid.map(|p| p.to_string()).unwrap_or_else(|| "-".to_string()),
            truncate(&conn.process_name, 32),
            ConnectionSample::format_rate(conn.speed_in),
            ConnectionSample::format_rate(conn.speed_out),
            ConnectionSample::format_bytes(conn.total_bytes()),
            if is_whitelisted(whitelist, &conn.process_name) { "*" } else { "" }
        );
    }
    println!();
    println!(
        "Total: {} in / {} out",
        ConnectionSample::format_bytes(snapshot.total_in),
        ConnectionSample::format_bytes(snapshot.total_out)
    );

    Ok(())
}

fn truncate(name: &str, width: usize) -> String {
    if name.chars().count() <= width {
        name.to_string()
    } else {
        let mut short: String = name.chars().take(width - 1).collect();
        short.push('~');
        short
    }
}

fn print_backends(config: &Config) {
    let infos: [(&str, BackendInfo); 4] = [
        ("Accounting", NettopSource::new(&config.accounting_utility).info()),
        ("Signals", SignalController::new().info()),
        ("Service", Launchctl::new().info()),
        ("Elevation", OsascriptExecutor::new().info()),
    ];

    println!("NetPulse v{} - Backends", env!("CARGO_PKG_VERSION"));
    for (role, info) in infos {
        let status = if info.available { "available" } else { "unavailable" };
        println!(
            "  {:12} {:12} [priority: {:?}] {}",
            role, info.name, info.priority, status
        );
    }
    println!();
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(args.verbose);

    let config = Config::load().unwrap_or_default();

    match args.command {
        Command::Run {
            focus,
            policy_endpoint,
        } => run_agent(config, focus, policy_endpoint).await,
        Command::Sample => run_sample(&config).await,
        Command::Status => {
            print_backends(&config);
            run_once(build_agent(config, None)?, Intent::Status).await
        }
        Command::SetPassword {
            new_password,
            current,
        } => {
            let intent = Intent::SetPassword {
                new_secret: new_password,
                current,
            };
            run_once(build_agent(config, None)?, intent).await
        }
        Command::Persistence { action, password } => {
            let intent = Intent::SetPersistence {
                enabled: action == Toggle::Enable,
                password,
            };
            run_once(build_agent(config, None)?, intent).await
        }
        Command::Harden { password } => {
            run_once(build_agent(config, None)?, Intent::Harden { password }).await
        }
        Command::Relax { password } => {
            run_once(build_agent(config, None)?, Intent::Relax { password }).await
        }
        Command::Sync { policy_endpoint } => {
            run_once(build_agent(config, policy_endpoint)?, Intent::SyncPolicy).await
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Args::command().debug_assert();
    }

    #[test]
    fn test_parse_run_flags() {
        let args = Args::parse_from([
            "netpulse",
            "--verbose",
            "run",
            "--focus",
            "--policy-endpoint",
            "https://policy.example.com/get",
        ]);
        assert!(args.verbose);
        match args.command {
            Command::Run {
                focus,
                policy_endpoint,
            } => {
                assert!(focus);
                assert_eq!(policy_endpoint.as_deref(), Some("https://policy.example.com/get"));
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn test_parse_persistence_toggle() {
        let args = Args::parse_from(["netpulse", "persistence", "disable", "--password", "pw"]);
        match args.command {
            Command::Persistence { action, password } => {
                assert_eq!(action, Toggle::Disable);
                assert_eq!(password.as_deref(), Some("pw"));
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn test_harden_requires_password() {
        assert!(Args::try_parse_from(["netpulse", "harden"]).is_err());
    }

    #[test]
    fn test_truncate() {
        assert_eq!(truncate("Dropbox", 32), "Dropbox");
        assert_eq!(truncate("Google Chrome Helper", 10), "Google Ch~");
    }
}
