//! Hub Client - command line entry point
//!
//! One-shot commands connect, run a single query and print JSON to stdout.
//! `watch` stays connected and prints one JSON line per state change.

use std::time::Duration;

use clap::Parser;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use hub_client::cli::{Cli, Commands, ConfigSubcommand};
use hub_client::config::{self, ClientConfig};
use hub_client::error::{Error, Result};
use hub_client::{logging, version, ConnectionStatus, HubClient, StateChangeEvent};

fn main() -> Result<()> {
    // Parse CLI arguments first (before logging, so we know verbosity)
    let cli = Cli::parse();

    match &cli.command {
        Commands::Version => {
            version::print_version();
            return Ok(());
        }
        Commands::Config { subcommand } => {
            logging::init_simple(tracing::Level::WARN)?;
            return handle_config_command(cli.config.as_deref(), subcommand.clone());
        }
        _ => {}
    }

    let config = match ClientConfig::load(cli.config.as_deref()) {
        Ok(cfg) => cfg,
        Err(e) => {
            eprint!("{}", e.format_for_terminal());
            std::process::exit(e.exit_code());
        }
    };

    // Guards must outlive the runtime so buffered file logs get flushed
    let _log_guards = logging::init_logging(&config.logging, cli.verbose, cli.quiet)?;

    let build = version::build_info();
    debug!(version = %build.full_version(), target = %build.target, "Starting hub client");

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .worker_threads(2)
        .thread_name("hub-client")
        .build()
        .map_err(|e| Error::Internal(format!("Failed to create async runtime: {}", e)))?;

    if let Err(e) = runtime.block_on(run_command(config, cli.command)) {
        error!(error = %e.format_for_log(), "Command failed");
        eprint!("{}", e.format_for_terminal());
        std::process::exit(e.exit_code());
    }

    Ok(())
}

async fn run_command(config: ClientConfig, command: Commands) -> Result<()> {
    let client = HubClient::new(config);

    // Listeners registered before connect so no status change is missed
    let (status_tx, status_rx) = mpsc::unbounded_channel();
    client.on_connection_status(move |status| {
        let _ = status_tx.send(status.clone());
    });

    if let Err(e) = client.connect().await {
        client.disconnect().await;
        return Err(e);
    }
    info!(hub_version = ?client.hub_version(), "Connected to hub");

    let result = execute(&client, command, status_rx).await;
    client.disconnect().await;
    result
}

async fn execute(
    client: &HubClient,
    command: Commands,
    status_rx: mpsc::UnboundedReceiver<ConnectionStatus>,
) -> Result<()> {
    match command {
        Commands::Watch { entities } => watch(client, &entities, status_rx).await,
        Commands::States { domain } => {
            let states = client.get_states().await?;
            let states: Vec<_> = match domain {
                Some(domain) => states.into_iter().filter(|s| s.domain() == domain).collect(),
                None => states,
            };
            print_json(&states)
        }
        Commands::State { entity_id } => match client.get_state(&entity_id).await? {
            Some(state) => print_json(&state),
            None => Err(Error::Command {
                code: Some("not_found".to_string()),
                message: format!("Entity {} not found", entity_id),
            }),
        },
        Commands::Call { domain, service, data } => {
            let service_data = parse_service_data(data.as_deref())?;
            let result = client.call_service(&domain, &service, service_data).await?;
            print_json(&result)
        }
        Commands::History { entity_ids, window, minimal } => {
            let (start, end) = window.resolve(chrono::Utc::now());
            let history = client.get_history(start, end, &entity_ids, minimal).await?;
            print_json(&history)
        }
        Commands::Statistics { statistic_ids, window, period } => {
            let (start, end) = window.resolve(chrono::Utc::now());
            let statistics = client.get_statistics(start, end, &statistic_ids, period).await?;
            print_json(&statistics)
        }
        Commands::Ping { count } => ping(client, count).await,
        Commands::Version | Commands::Config { .. } => Err(Error::Internal(
            "Local command reached the hub session".to_string(),
        )),
    }
}

/// Print state changes until Ctrl+C or until the connection is given up
async fn watch(
    client: &HubClient,
    filters: &[String],
    mut status_rx: mpsc::UnboundedReceiver<ConnectionStatus>,
) -> Result<()> {
    let mut changes = client.state_changes();
    let shutdown_signal = tokio::signal::ctrl_c();
    tokio::pin!(shutdown_signal);

    info!(filters = ?filters, "Watching state changes");

    loop {
        tokio::select! {
            _ = &mut shutdown_signal => {
                info!("Shutdown signal received");
                return Ok(());
            }

            Some(event) = changes.recv() => {
                if matches_filters(&event, filters) {
                    println!("{}", serde_json::to_string(&event)?);
                }
            }

            Some(status) = status_rx.recv() => match status {
                ConnectionStatus::Connected => debug!("Hub connection up"),
                ConnectionStatus::Disconnected { reason } => {
                    warn!(reason = %reason, "Connection lost, reconnecting")
                }
                ConnectionStatus::AuthRejected { message } => {
                    return Err(Error::AuthenticationFailed { message });
                }
                ConnectionStatus::ReconnectExhausted { attempts } => {
                    return Err(Error::MaxReconnectAttempts { attempts });
                }
                ConnectionStatus::Stopped { message } => {
                    return Err(Error::connection_lost(message));
                }
            },
        }
    }
}

async fn ping(client: &HubClient, count: u32) -> Result<()> {
    let url = client.config().hub.url.clone();
    for n in 0..count.max(1) {
        if n > 0 {
            tokio::time::sleep(Duration::from_secs(1)).await;
        }
        let latency = client.ping().await?;
        println!(
            "pong from {}: seq={} time={:.1} ms",
            url,
            n + 1,
            latency.as_secs_f64() * 1000.0
        );
    }
    Ok(())
}

/// Empty filter list matches everything; a trailing '.' means prefix
fn matches_filters(event: &StateChangeEvent, filters: &[String]) -> bool {
    filters.is_empty()
        || filters.iter().any(|f| {
            if f.ends_with('.') {
                event.entity_id.starts_with(f.as_str())
            } else {
                event.entity_id == *f
            }
        })
}

fn parse_service_data(data: Option<&str>) -> Result<Option<Value>> {
    let Some(raw) = data else {
        return Ok(None);
    };
    let value: Value = serde_json::from_str(raw)?;
    if !value.is_object() {
        return Err(Error::config_field_invalid(
            "data",
            "Service data must be a JSON object",
        ));
    }
    Ok(Some(value))
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn handle_config_command(config_path: Option<&str>, subcommand: ConfigSubcommand) -> Result<()> {
    match subcommand {
        ConfigSubcommand::Show => {
            let mut cfg = ClientConfig::load(config_path)?;
            if cfg.hub.token.is_some() {
                cfg.hub.token = Some("<redacted>".to_string());
            }
            println!("{}", toml::to_string_pretty(&cfg)?);
        }
        ConfigSubcommand::Init { path, force } => {
            let written = config::init_config(path.as_deref(), force)?;
            println!("Created configuration file: {}", written.display());
        }
        ConfigSubcommand::Validate => match ClientConfig::load(config_path) {
            Ok(_) => println!("Configuration is valid."),
            Err(e) => {
                eprint!("{}", e.format_for_terminal());
                std::process::exit(e.exit_code());
            }
        },
    }

    Ok(())
}
