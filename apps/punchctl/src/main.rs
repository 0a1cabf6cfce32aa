//! # punchctl
//!
//! Operator CLI and daemon for the punchsync attendance engine.
//!
//! ## Architecture
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                            punchctl                                     │
//! │                                                                         │
//! │  run ──────► scheduler + pool + worker (hosts the engine)              │
//! │  sync ─────► one-shot worker cycle against one/all terminals           │
//! │  register/list/deactivate ──► Device Registry (punch-db)               │
//! │  map ──────► employee mapping table                                    │
//! │  log/quarantine ──► audit trail queries                                │
//! │  clear-logs/restart ──► direct terminal session (punch-sync link)      │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use punch_core::validation;
use punch_core::{DEFAULT_SYNC_INTERVAL_SECS, DEFAULT_TERMINAL_PORT};
use punch_db::{Database, DbConfig, NewTerminal};
use punch_sync::{
    ConnectionPool, EngineConfig, Scheduler, SyncWorker, TerminalLink,
};

// =============================================================================
// CLI Definition
// =============================================================================

#[derive(Parser)]
#[command(name = "punchctl", version, about = "Fingerprint terminal sync engine")]
struct Cli {
    /// Path to the engine config file.
    #[arg(long, global = true, default_value = "punchsync.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the sync engine daemon.
    Run,

    /// Register a terminal in the Device Registry.
    Register {
        /// Business id for the terminal (unique).
        terminal_id: String,
        /// Human-readable name, e.g. "Main Entrance".
        #[arg(long)]
        name: String,
        /// IP address or hostname.
        #[arg(long)]
        host: String,
        /// TCP port.
        #[arg(long, default_value_t = DEFAULT_TERMINAL_PORT)]
        port: u16,
        /// Communication key for the handshake (0 = none).
        #[arg(long, default_value_t = 0)]
        comm_key: u32,
        /// Seconds between scheduled sync cycles.
        #[arg(long, default_value_t = DEFAULT_SYNC_INTERVAL_SECS)]
        interval: i64,
        /// Free-text location.
        #[arg(long)]
        location: Option<String>,
        /// Free-text description.
        #[arg(long)]
        description: Option<String>,
    },

    /// List registered terminals.
    List {
        /// Include deactivated terminals.
        #[arg(long)]
        all: bool,
    },

    /// Deactivate a terminal (stops scheduling; keeps its history).
    Deactivate { terminal_id: String },

    /// Manage terminal-user to employee mappings.
    #[command(subcommand)]
    Map(MapCommand),

    /// Run a sync cycle right now, outside the scheduler.
    Sync {
        /// Terminal to sync.
        terminal_id: Option<String>,
        /// Sync every active terminal instead.
        #[arg(long, conflicts_with = "terminal_id")]
        all: bool,
    },

    /// Show recent sync cycles from the audit trail.
    Log {
        /// Only show cycles for this terminal.
        #[arg(long)]
        terminal: Option<String>,
        /// Number of entries to show.
        #[arg(long, default_value_t = 20)]
        limit: i64,
    },

    /// Show quarantined (unmapped) events for a terminal.
    Quarantine { terminal_id: String },

    /// Clear the attendance log ON the terminal itself.
    ClearLogs {
        terminal_id: String,
        /// Required: this erases data on the device.
        #[arg(long)]
        yes: bool,
    },

    /// Reboot a terminal.
    Restart { terminal_id: String },
}

#[derive(Subcommand)]
enum MapCommand {
    /// Map a terminal-local user id to a central employee id.
    Add {
        terminal_id: String,
        terminal_user_id: String,
        employee_id: String,
    },
    /// Remove a mapping.
    Remove {
        terminal_id: String,
        terminal_user_id: String,
    },
    /// List mappings for a terminal.
    List { terminal_id: String },
}

// =============================================================================
// Entry Point
// =============================================================================

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let cli = Cli::parse();
    let config = EngineConfig::load(Some(&cli.config))?;
    let db = Database::new(DbConfig::new(&config.database.path)).await?;

    match cli.command {
        Command::Run => run_daemon(db, config).await?,
        Command::Register {
            terminal_id,
            name,
            host,
            port,
            comm_key,
            interval,
            location,
            description,
        } => {
            validation::validate_terminal_id(&terminal_id)?;
            validation::validate_host(&host)?;
            validation::validate_port(port)?;
            validation::validate_sync_interval(interval)?;

            let terminal = db
                .terminals()
                .create(NewTerminal {
                    terminal_id,
                    name,
                    host,
                    port,
                    comm_key,
                    sync_interval_secs: interval,
                    location,
                    description,
                })
                .await?;
            println!(
                "Registered {} ({}) at {}",
                terminal.terminal_id,
                terminal.name,
                terminal.address()
            );
        }
        Command::List { all } => {
            let terminals = if all {
                db.terminals().list_all().await?
            } else {
                db.terminals().list_active().await?
            };
            println!(
                "{:<12} {:<20} {:<22} {:<8} {:<20} ACTIVE",
                "TERMINAL", "NAME", "ADDRESS", "STATUS", "LAST SYNC"
            );
            for t in terminals {
                let last = t
                    .last_sync_at
                    .map(|at| at.format("%Y-%m-%d %H:%M:%S").to_string())
                    .unwrap_or_else(|| "never".to_string());
                println!(
                    "{:<12} {:<20} {:<22} {:<8} {:<20} {}",
                    t.terminal_id,
                    t.name,
                    t.address(),
                    t.status,
                    last,
                    if t.is_active { "yes" } else { "no" }
                );
            }
        }
        Command::Deactivate { terminal_id } => {
            db.terminals().deactivate(&terminal_id).await?;
            println!("Deactivated {}", terminal_id);
        }
        Command::Map(map_cmd) => run_map(&db, map_cmd).await?,
        Command::Sync { terminal_id, all } => run_sync(&db, &config, terminal_id, all).await?,
        Command::Log { terminal, limit } => {
            let entries = match terminal {
                Some(id) => db.sync_log().recent_for_terminal(&id, limit).await?,
                None => db.sync_log().recent(limit).await?,
            };
            println!(
                "{:<12} {:<20} {:<8} {:>7} {:>7} {:>6}  DETAIL",
                "TERMINAL", "STARTED", "OUTCOME", "FETCHED", "WRITTEN", "QUAR"
            );
            for e in entries {
                println!(
                    "{:<12} {:<20} {:<8} {:>7} {:>7} {:>6}  {}",
                    e.terminal_id,
                    e.started_at.format("%Y-%m-%d %H:%M:%S"),
                    e.outcome,
                    e.records_fetched,
                    e.records_written,
                    e.quarantined,
                    e.error_detail.as_deref().unwrap_or("-")
                );
            }
        }
        Command::Quarantine { terminal_id } => {
            let events = db.attendance().quarantined_for_terminal(&terminal_id).await?;
            if events.is_empty() {
                println!("No quarantined events for {}", terminal_id);
            }
            for q in events {
                println!(
                    "{}  user {:<8} ({})  {:?}",
                    q.event_timestamp.format("%Y-%m-%d %H:%M:%S"),
                    q.terminal_user_id,
                    q.terminal_user_name.as_deref().unwrap_or("unenrolled"),
                    q.kind
                );
            }
        }
        Command::ClearLogs { terminal_id, yes } => {
            if !yes {
                return Err("clear-logs erases the device log; pass --yes to confirm".into());
            }
            let terminal = db.terminals().get(&terminal_id).await?;
            let mut link = TerminalLink::connect(&terminal, config.io_timeout()).await?;
            link.clear_logs().await?;
            link.disconnect().await;
            println!("Cleared attendance log on {}", terminal_id);
        }
        Command::Restart { terminal_id } => {
            let terminal = db.terminals().get(&terminal_id).await?;
            let mut link = TerminalLink::connect(&terminal, config.io_timeout()).await?;
            link.restart().await?;
            println!("Restart sent to {}", terminal_id);
        }
    }

    Ok(())
}

// =============================================================================
// Subcommand Bodies
// =============================================================================

/// Hosts the engine: scheduler loop, connection pool, idle-session probe.
async fn run_daemon(db: Database, config: EngineConfig) -> Result<(), Box<dyn std::error::Error>> {
    info!("Starting punchsync engine");

    let pool = ConnectionPool::new(config.io_timeout(), config.idle_threshold());
    let probe = pool.spawn_probe(config.probe_interval());

    let worker = SyncWorker::new(db.clone(), pool, config.policy.to_policy()?);
    let (scheduler, handle) = Scheduler::new(
        db.clone(),
        worker,
        config.tick_interval(),
        config.engine.max_concurrent_syncs,
    );
    let scheduler_task = tokio::spawn(scheduler.run());

    shutdown_signal().await;

    if let Err(e) = handle.shutdown().await {
        warn!(error = %e, "Scheduler already stopped");
    }
    scheduler_task.await?;
    probe.abort();
    db.close().await;

    info!("Engine shutdown complete");
    Ok(())
}

async fn run_map(db: &Database, cmd: MapCommand) -> Result<(), Box<dyn std::error::Error>> {
    match cmd {
        MapCommand::Add {
            terminal_id,
            terminal_user_id,
            employee_id,
        } => {
            let mapping = db
                .mappings()
                .register(&terminal_id, &terminal_user_id, &employee_id)
                .await?;
            println!(
                "Mapped {}/{} -> {}",
                mapping.terminal_id, mapping.terminal_user_id, mapping.employee_id
            );
        }
        MapCommand::Remove {
            terminal_id,
            terminal_user_id,
        } => {
            db.mappings().remove(&terminal_id, &terminal_user_id).await?;
            println!("Removed mapping {}/{}", terminal_id, terminal_user_id);
        }
        MapCommand::List { terminal_id } => {
            for m in db.mappings().list_for_terminal(&terminal_id).await? {
                println!("{:<12} -> {}", m.terminal_user_id, m.employee_id);
            }
        }
    }
    Ok(())
}

/// One-shot sync cycles, bypassing the scheduler's due check.
async fn run_sync(
    db: &Database,
    config: &EngineConfig,
    terminal_id: Option<String>,
    all: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let pool = ConnectionPool::new(config.io_timeout(), config.idle_threshold());
    let worker = SyncWorker::new(db.clone(), pool, config.policy.to_policy()?);

    let targets = match (terminal_id, all) {
        (Some(id), _) => vec![db.terminals().get(&id).await?],
        (None, true) => db.terminals().list_active().await?,
        (None, false) => return Err("pass a terminal id or --all".into()),
    };

    for terminal in targets {
        match worker.run_cycle(&terminal).await {
            Ok(report) if report.outcome.is_none() => {
                println!("{}: busy, skipped", terminal.terminal_id);
            }
            Ok(report) => {
                println!(
                    "{}: {} fetched, {} written, {} quarantined",
                    terminal.terminal_id, report.fetched, report.written, report.quarantined
                );
            }
            Err(e) => {
                println!("{}: failed - {}", terminal.terminal_id, e);
            }
        }
    }
    Ok(())
}

/// Resolves when the daemon should shut down.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received");
}
