// Tailgate - main.rs
//
// Application entry point. Handles:
// 1. CLI argument parsing
// 2. Config loading (before logging, so [logging] level can apply)
// 3. Logging initialisation (debug mode support)
// 4. Runtime construction (current-thread scheduler, bounded blocking pool)
// 5. Dispatch to the `sources`, `tail`, `clear` and `ls` subcommands
//
// Tailed content and listings go to stdout; diagnostics go to stderr.

use clap::{Parser, Subcommand};
use serde::Serialize;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tailgate::app::catalog::Catalog;
use tailgate::app::service::{ServiceSettings, TailService};
use tailgate::core::model::{Locality, TailRecord};
use tailgate::platform::config::{self, AppConfig, PlatformPaths};
use tailgate::platform::ssh::SshConnector;
use tailgate::util;

/// Tailgate - real-time log tailing for local files and SSH-reachable hosts.
#[derive(Parser, Debug)]
#[command(name = "tailgate", version, about)]
struct Cli {
    /// Config file (defaults to the platform config directory).
    #[arg(short = 'c', long = "config", global = true)]
    config: Option<PathBuf>,

    /// Enable debug logging (equivalent to RUST_LOG=debug).
    #[arg(short = 'd', long = "debug", global = true)]
    debug: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List configured sources and remote directories.
    Sources {
        #[arg(long)]
        json: bool,
    },
    /// Print a source's recent lines, then follow it until Ctrl-C.
    Tail { id: String },
    /// Truncate a source's file to zero length.
    Clear { id: String },
    /// List log files in a directory on a configured server.
    Ls {
        /// Server name or host:port.
        server: String,
        path: String,
        #[arg(short = 'p', long = "pattern", default_value = util::constants::DEFAULT_SCAN_PATTERN)]
        pattern: String,
        #[arg(short = 'r', long = "recursive")]
        recursive: bool,
        #[arg(long)]
        json: bool,
    },
}

fn main() {
    let cli = Cli::parse();

    let config_path = cli
        .config
        .clone()
        .unwrap_or_else(|| PlatformPaths::resolve().config_file());
    let loaded = config::load_config(&config_path);

    let config_level = loaded
        .as_ref()
        .ok()
        .and_then(|(config, _)| config.log_level.clone());
    util::logging::init(cli.debug, config_level.as_deref());

    tracing::info!(
        version = util::constants::APP_VERSION,
        debug = cli.debug,
        config = %config_path.display(),
        "Tailgate starting"
    );

    let (config, warnings) = match loaded {
        Ok(loaded) => loaded,
        Err(e) => {
            tracing::error!(error = %e, "Failed to load config");
            eprintln!("Error: {e}");
            std::process::exit(2);
        }
    };
    for warning in &warnings {
        tracing::warn!(warning = %warning, "Config warning");
    }

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .max_blocking_threads(config.runtime.blocking_threads)
        .build();
    let runtime = match runtime {
        Ok(rt) => rt,
        Err(e) => {
            tracing::error!(error = %e, "Failed to build async runtime");
            eprintln!("Error: failed to start runtime: {e}");
            std::process::exit(1);
        }
    };

    let code = runtime.block_on(run(cli.command, config));
    std::process::exit(code);
}

async fn run(command: Command, config: AppConfig) -> i32 {
    let settings = ServiceSettings {
        max_connections: config.runtime.max_connections,
        tail_window_bytes: config.runtime.tail_window_bytes,
        ..ServiceSettings::default()
    };
    let reap_interval = config.runtime.reap_interval;
    let catalog = Catalog::new(config.sources, config.servers, config.remote_directories);
    let service = TailService::new(catalog, Arc::new(SshConnector::new()), settings);

    let code = match command {
        Command::Sources { json } => print_sources(&service, json),
        Command::Tail { id } => follow(&service, &id, reap_interval).await,
        Command::Clear { id } => {
            if service.clear(&id).await {
                println!("Cleared {id}");
                0
            } else {
                eprintln!("Could not clear '{id}' (see log output for the reason)");
                1
            }
        }
        Command::Ls {
            server,
            path,
            pattern,
            recursive,
            json,
        } => list(&service, &server, &path, &pattern, recursive, json).await,
    };

    service.shutdown().await;
    tracing::debug!(code, "Tailgate exiting");
    code
}

/// Stream records to stdout until a terminal sentinel or Ctrl-C, reaping
/// idle pooled sessions on an interval meanwhile.
async fn follow(service: &TailService, id: &str, reap_interval: Duration) -> i32 {
    let mut stream = service.tail(id);
    let mut reaper =
        tokio::time::interval_at(tokio::time::Instant::now() + reap_interval, reap_interval);
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    let stdout = std::io::stdout();
    loop {
        tokio::select! {
            record = stream.next() => {
                let Some(record) = record else {
                    return 0;
                };
                let mut out = stdout.lock();
                if writeln!(out, "{record}").and_then(|_| out.flush()).is_err() {
                    // Downstream pipe closed.
                    return 0;
                }
                if record.is_terminal() {
                    return match record {
                        TailRecord::Disappeared => 0,
                        _ => 1,
                    };
                }
            }
            _ = reaper.tick() => {
                let reaped = service.reap_idle().await;
                if reaped > 0 {
                    tracing::debug!(reaped, "Idle sessions reaped");
                }
            }
            _ = &mut ctrl_c => {
                tracing::info!("Interrupted; stopping tail");
                return 0;
            }
        }
    }
}

#[derive(Serialize)]
struct SourceRow {
    id: String,
    path: String,
    encoding: String,
    server: Option<String>,
}

#[derive(Serialize)]
struct DirectoryRow {
    id_prefix: String,
    path: String,
    pattern: String,
    recursive: bool,
}

#[derive(Serialize)]
struct Listing {
    sources: Vec<SourceRow>,
    directories: Vec<DirectoryRow>,
}

fn print_sources(service: &TailService, json: bool) -> i32 {
    let sources = service
        .sources()
        .iter()
        .map(|s| SourceRow {
            id: s.id.clone(),
            path: s.path_str(),
            encoding: s.encoding.clone(),
            server: match s.locality() {
                Locality::Local => None,
                Locality::Remote(server) => Some(server.name.clone()),
            },
        })
        .collect::<Vec<_>>();
    let directories = service
        .catalog()
        .directories()
        .iter()
        .map(|d| DirectoryRow {
            id_prefix: format!("{}/{}/", d.server.name, d.name),
            path: d.path.clone(),
            pattern: d.pattern.clone(),
            recursive: d.recursive,
        })
        .collect::<Vec<_>>();

    if json {
        return print_json(&Listing {
            sources,
            directories,
        });
    }

    for row in &sources {
        match &row.server {
            Some(server) => println!("{}\t{}:{}", row.id, server, row.path),
            None => println!("{}\t{}", row.id, row.path),
        }
    }
    for dir in &directories {
        println!("{}*\t{} ({})", dir.id_prefix, dir.path, dir.pattern);
    }
    0
}

async fn list(
    service: &TailService,
    server: &str,
    path: &str,
    pattern: &str,
    recursive: bool,
    json: bool,
) -> i32 {
    let Some(profile) = service.catalog().server(server) else {
        eprintln!("No server configured with name or id '{server}'");
        return 1;
    };

    match service
        .list_remote_directory(&profile, path, pattern, recursive)
        .await
    {
        Ok(files) if json => print_json(&files),
        Ok(files) => {
            for file in &files {
                println!("{}", file.path);
            }
            0
        }
        Err(e) => {
            eprintln!("Error: {e}");
            1
        }
    }
}

fn print_json<T: Serialize>(value: &T) -> i32 {
    match serde_json::to_string_pretty(value) {
        Ok(text) => {
            println!("{text}");
            0
        }
        Err(e) => {
            tracing::error!(error = %e, "Failed to serialise output");
            1
        }
    }
}
