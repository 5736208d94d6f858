//! CURA Core - command line entry point
//!
//! ```bash
//! cura-core run --events events.jsonl
//! cura-core run --raw < sensor.bin
//! cura-core vault list
//! cura-core vault restore <id> --force
//! cura-core config
//! ```

use std::fs::File;
use std::io::{self, BufReader, Read};
use std::path::PathBuf;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use clap::{Parser, Subcommand};

use cura_core::constants;
use cura_core::logic::config::AgentConfig;
use cura_core::logic::pipeline::{JsonLinesSink, TriageService};
use cura_core::logic::queue::QueueError;
use cura_core::logic::sensor::{JsonLinesSource, KernelEvent, RecordSource, ReplayError};
use cura_core::logic::vault::{NoOwnership, RestoreMode, VaultManager};

#[derive(Parser)]
#[command(name = "cura-core")]
#[command(version = constants::APP_VERSION)]
#[command(about = "Host threat triage: kernel events in, verdicts out", long_about = None)]
struct Cli {
    /// JSON config file
    #[arg(long, short, env = "CURA_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Triage a sensor stream; verdicts are written to stdout as JSON lines
    Run {
        /// Event file (stdin when omitted)
        #[arg(long, short)]
        events: Option<PathBuf>,

        /// Input is fixed-layout sensor records instead of JSON lines
        #[arg(long)]
        raw: bool,

        /// Drop events the queue rejects instead of retrying
        #[arg(long)]
        drop_on_full: bool,
    },
    /// Inspect or act on the artifact vault (service must be stopped)
    Vault {
        #[command(subcommand)]
        action: VaultCommands,
    },
    /// Print the effective configuration
    Config,
}

#[derive(Subcommand)]
enum VaultCommands {
    /// List entries, newest first
    List {
        #[arg(long)]
        pid: Option<u32>,
    },
    /// Restore an entry to its original path
    Restore {
        id: String,
        /// Overwrite the original even if it changed since capture
        #[arg(long)]
        force: bool,
    },
    /// Irreversibly delete an entry's stored content
    Purge { id: String },
    /// Usage and counts
    Stats,
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    if let Err(e) = run(cli) {
        log::error!("{}", e);
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> Result<(), String> {
    let config = AgentConfig::load(cli.config.as_deref()).map_err(|e| e.to_string())?;

    match cli.command {
        Commands::Run { events, raw, drop_on_full } => {
            let input: Box<dyn Read> = match &events {
                Some(path) => Box::new(
                    File::open(path).map_err(|e| format!("cannot open {}: {}", path.display(), e))?,
                ),
                None => Box::new(io::stdin()),
            };
            let source: Box<dyn Iterator<Item = Result<KernelEvent, ReplayError>>> = if raw {
                Box::new(RecordSource::new(input))
            } else {
                Box::new(JsonLinesSource::new(BufReader::new(input)))
            };
            replay(config, source, drop_on_full)
        }
        Commands::Vault { action } => vault(config, action),
        Commands::Config => {
            println!("{}", config.to_json_pretty());
            Ok(())
        }
    }
}

fn replay(
    config: AgentConfig,
    source: Box<dyn Iterator<Item = Result<KernelEvent, ReplayError>>>,
    drop_on_full: bool,
) -> Result<(), String> {
    let shutdown_timeout = config.service.shutdown_timeout();
    let sink = Arc::new(JsonLinesSink::new(io::stdout()));
    let service = TriageService::new(config, sink).map_err(|e| e.to_string())?;
    service.start().map_err(|e| e.to_string())?;

    let (mut accepted, mut dropped, mut malformed) = (0u64, 0u64, 0u64);
    for item in source {
        let event = match item {
            Ok(event) => event,
            Err(e) => {
                log::warn!("Skipping malformed sensor input: {}", e);
                malformed += 1;
                continue;
            }
        };

        // The replay sensor applies its own backpressure
        loop {
            match service.submit(event.clone()) {
                Ok(()) => {
                    accepted += 1;
                    break;
                }
                Err(QueueError::Full { .. }) if !drop_on_full => {
                    thread::sleep(Duration::from_millis(2));
                }
                Err(_) => {
                    dropped += 1;
                    break;
                }
            }
        }
    }

    let report = service.shutdown(shutdown_timeout);
    log::info!(
        "Replay done: {} accepted, {} dropped, {} malformed, {} failed safe",
        accepted,
        dropped,
        malformed,
        report.unfinished
    );
    Ok(())
}

fn vault(config: AgentConfig, action: VaultCommands) -> Result<(), String> {
    let manager = VaultManager::open(&config.vault, &config.data_dir).map_err(|e| e.to_string())?;
    let parse = |id: &str| uuid::Uuid::parse_str(id).map_err(|e| format!("invalid vault id '{}': {}", id, e));

    let value = match action {
        VaultCommands::List { pid } => {
            let entries = match pid {
                Some(pid) => manager.entries_for_pid(pid),
                None => manager.list(),
            };
            serde_json::to_value(entries)
        }
        VaultCommands::Restore { id, force } => {
            let mode = if force { RestoreMode::Overwrite } else { RestoreMode::Strict };
            let entry = manager
                .restore(&parse(&id)?, &NoOwnership, mode)
                .map_err(|e| e.to_string())?;
            serde_json::to_value(entry)
        }
        VaultCommands::Purge { id } => {
            let entry = manager.purge(&parse(&id)?).map_err(|e| e.to_string())?;
            serde_json::to_value(entry)
        }
        VaultCommands::Stats => serde_json::to_value(manager.stats()),
    }
    .map_err(|e| e.to_string())?;

    println!("{}", serde_json::to_string_pretty(&value).map_err(|e| e.to_string())?);
    Ok(())
}
