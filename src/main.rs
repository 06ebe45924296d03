//! Chat Relay - entry point
//!
//! `serve` runs the coordinator, its WebSocket listener and the console chat
//! adapter. `relay` runs a relay client with the echo engine.

mod cli;

use std::path::Path;
use std::sync::Arc;

use clap::Parser;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, warn};

use chat_relay::chat::ConsoleChat;
use chat_relay::config::{self, RelayConfig};
use chat_relay::coordinator::{Coordinator, CoordinatorServer};
use chat_relay::error::{Error, Result};
use chat_relay::logging::{self, LogGuards};
use chat_relay::relay::{identity, ClientEvent, EchoEngine, RelayClient, RelayClientConfig, TaskEngine};
use chat_relay::version;

use crate::cli::{Cli, Commands, ConfigSubcommand};

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Commands that don't need the runtime or full logging
    match &cli.command {
        Commands::Version { detailed } => {
            let info = version::build_info();
            if *detailed {
                print!("{}", info);
            } else {
                println!("{}", info.short_version());
            }
            return Ok(());
        }
        Commands::Config { subcommand } => {
            logging::init_simple(tracing::Level::WARN)?;
            if let Err(e) = handle_config_command(subcommand.clone()) {
                eprint!("{}", e.format_for_terminal());
                std::process::exit(e.exit_code());
            }
            return Ok(());
        }
        _ => {}
    }

    let config_path = match &cli.command {
        Commands::Serve { config, .. } | Commands::Relay { config, .. } => config.clone(),
        _ => None,
    };

    let config = match RelayConfig::load(config_path.as_deref()) {
        Ok(cfg) => cfg,
        Err(e) => {
            eprint!("{}", e.format_for_terminal());
            std::process::exit(e.exit_code());
        }
    };

    // The guards must be kept alive for the lifetime of the program
    let _log_guards: LogGuards = logging::init_logging(&config.logging, cli.verbose, cli.quiet)?;

    let build = version::build_info();
    info!(
        version = %build.full_version(),
        target = %build.target,
        profile = %build.profile,
        "Starting chat-relay"
    );

    let result = match cli.command {
        Commands::Serve { listen, .. } => run_serve(config, listen),
        Commands::Relay { url, client_id, .. } => run_relay(config, url, client_id),
        Commands::Version { .. } | Commands::Config { .. } => Ok(()),
    };

    if let Err(e) = result {
        error!("{}", e.format_for_log());
        eprint!("{}", e.format_for_terminal());
        std::process::exit(e.exit_code());
    }
    Ok(())
}

fn build_runtime() -> Result<tokio::runtime::Runtime> {
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .thread_name("chat-relay")
        .build()
        .map_err(|e| Error::Internal(format!("Failed to create async runtime: {}", e)))
}

/// Run the coordinator until Ctrl-C
fn run_serve(mut config: RelayConfig, listen: Option<String>) -> Result<()> {
    if let Some(listen) = listen {
        config.coordinator.listen_addr = listen;
    }

    info!(
        listen_addr = %config.coordinator.listen_addr,
        ack_timeout_ms = config.coordinator.ack_timeout_ms,
        quiet_window_ms = config.coordinator.quiet_window_ms,
        "Configuration loaded"
    );

    build_runtime()?.block_on(async move {
        let (chat_tx, chat_rx) = mpsc::unbounded_channel();
        let (coordinator, handle) = Coordinator::new(&config.coordinator, chat_tx.clone());
        let coordinator_task = tokio::spawn(coordinator.run());

        let server = CoordinatorServer::bind(&config.coordinator.listen_addr, handle.clone()).await?;
        let (stop_tx, stop_rx) = oneshot::channel::<()>();
        let server_task = tokio::spawn(server.run(async {
            let _ = stop_rx.await;
        }));

        let console = ConsoleChat::new(handle.clone(), config.chat.clone(), chat_tx, chat_rx);

        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Shutdown signal received");
            }
            result = console.run() => {
                if let Err(e) = result {
                    warn!(error = %e, "Console chat stopped");
                }
            }
        }

        let _ = stop_tx.send(());
        handle.shutdown().await;
        if let Err(e) = coordinator_task.await {
            warn!(error = %e, "Coordinator task ended abnormally");
        }
        match server_task.await {
            Ok(result) => result?,
            Err(e) => warn!(error = %e, "Listener task ended abnormally"),
        }

        info!("Coordinator shut down");
        Ok(())
    })
}

/// Run a relay client until Ctrl-C or a fatal error
fn run_relay(mut config: RelayConfig, url: Option<String>, client_id: Option<String>) -> Result<()> {
    if let Some(url) = url {
        config.client.url = url;
        config.validate()?;
    }

    let client_id = match client_id.or_else(|| config.client.id.clone()) {
        Some(id) => id,
        None => identity::load_or_create(Path::new(&config.client.id_file))?,
    };

    info!(client_id = %client_id, url = %config.client.url, "Configuration loaded");

    build_runtime()?.block_on(async move {
        let engine: Arc<dyn TaskEngine> = Arc::new(EchoEngine::new());
        let client_config = RelayClientConfig::from_settings(&config.client, client_id);
        let mut client = RelayClient::new(client_config, engine);
        let mut events = client
            .take_events()
            .ok_or_else(|| Error::Internal("client events already taken".to_string()))?;
        client.connect()?;

        let shutdown_signal = tokio::signal::ctrl_c();
        tokio::pin!(shutdown_signal);

        loop {
            tokio::select! {
                _ = &mut shutdown_signal => {
                    info!("Shutdown signal received");
                    break;
                }
                event = events.recv() => match event {
                    Some(ClientEvent::Connected) => info!("Connected to coordinator"),
                    Some(ClientEvent::LeaderChanged { is_leader }) => {
                        info!(is_leader, "Leader status updated");
                    }
                    Some(ClientEvent::Disconnected { reason }) => {
                        warn!(reason = %reason, "Disconnected from coordinator");
                    }
                    Some(ClientEvent::Reconnecting { attempt, delay }) => {
                        debug!(attempt, delay_ms = delay.as_millis() as u64, "Reconnect scheduled");
                    }
                    Some(ClientEvent::Error { message, fatal: true }) => {
                        error!(message = %message, "Fatal client error");
                        break;
                    }
                    Some(ClientEvent::Error { message, .. }) => {
                        warn!(message = %message, "Client error");
                    }
                    None => break,
                },
            }
        }

        client.disconnect().await;
        info!("Relay client shut down");
        Ok(())
    })
}

/// Handle configuration subcommands
fn handle_config_command(subcommand: ConfigSubcommand) -> Result<()> {
    match subcommand {
        ConfigSubcommand::Show { config } => {
            let cfg = RelayConfig::load(config.as_deref())?;
            println!("{}", toml::to_string_pretty(&cfg)?);
        }
        ConfigSubcommand::Init { path, force } => {
            let created = config::init_config(path.as_deref(), force)?;
            println!("Created configuration file: {}", created.display());
        }
        ConfigSubcommand::Validate { config } => match RelayConfig::load(config.as_deref()) {
            Ok(_) => println!("Configuration is valid."),
            Err(e) => {
                eprint!("{}", e.format_for_terminal());
                std::process::exit(e.exit_code());
            }
        },
    }

    Ok(())
}
