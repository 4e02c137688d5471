//! mkube CLI
//!
//! Entry point for the service tunnel:
//! - `tunnel` keeps load-balancer services reachable until interrupted
//! - `tunnel --cleanup` removes tunnels left behind by dead processes
//! - `tunnel list` shows the tunnel registry
//! - `config` inspects and creates the configuration file

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use mk_core::config::{self, TunnelConfig};
use mk_core::error::ConfigError;
use mkube::commands;

#[derive(Parser)]
#[command(name = "mkube")]
#[command(author, version, about = "Service tunnel for local Kubernetes clusters")]
#[command(propagate_version = true)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress all output except errors
    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Connect to LoadBalancer services of the cluster
    ///
    /// Runs until interrupted or until the cluster machine stops.
    Tunnel {
        /// Remove tunnels left behind by dead processes and exit
        #[arg(long)]
        cleanup: bool,

        /// Machine and cluster profile to tunnel into (overrides config)
        #[arg(short, long)]
        profile: Option<String>,

        /// Do not install a host route to the service CIDR
        #[arg(long)]
        no_route: bool,

        /// Do not forward service ports over SSH
        #[arg(long)]
        no_forward: bool,

        #[command(subcommand)]
        action: Option<TunnelAction>,
    },

    /// Manage configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum TunnelAction {
    /// List registered tunnels on this host
    List,
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Show current configuration
    Show,
    /// Show config file path
    Path,
    /// Write a configuration file with default settings
    Init {
        /// Overwrite an existing file
        #[arg(short, long)]
        force: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_level = match (cli.quiet, cli.verbose) {
        (true, _) => "error",
        (false, 0) => "warn",
        (false, 1) => "info",
        (false, 2) => "debug",
        (false, _) => "trace",
    };

    // stdout carries the status snapshots
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| log_level.into()),
        ))
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr),
        )
        .init();

    match cli.command {
        Commands::Config { action } => match action {
            ConfigAction::Show => {
                let config = load_tunnel_config(cli.config.as_ref())?;
                commands::config_show(cli.config.as_ref(), &config)?;
            }
            ConfigAction::Path => commands::config_path(cli.config.as_ref()),
            ConfigAction::Init { force } => commands::config_init(cli.config.as_ref(), force)?,
        },

        Commands::Tunnel {
            cleanup,
            profile,
            no_route,
            no_forward,
            action,
        } => {
            let mut config = load_tunnel_config(cli.config.as_ref())?;
            if let Some(profile) = profile {
                config.profile = profile;
            }
            if no_route {
                config.route = false;
            }
            if no_forward {
                config.forward = false;
            }

            if let Some(TunnelAction::List) = action {
                commands::list_command(&config)?;
            } else if cleanup {
                commands::cleanup_command(&config).await?;
            } else {
                run_tunnel(&config).await?;
            }
        }
    }

    Ok(())
}

/// Load the tunnel configuration, falling back to defaults when no file exists
fn load_tunnel_config(path: Option<&PathBuf>) -> Result<TunnelConfig> {
    let path = path.cloned().unwrap_or_else(config::default_config_path);

    match config::load_config::<TunnelConfig>(&path) {
        Ok(config) => Ok(config),
        Err(ConfigError::NotFound(_)) => {
            tracing::debug!("No config file at {:?}, using defaults", path);
            Ok(TunnelConfig::default())
        }
        Err(e) => Err(e).with_context(|| format!("Failed to load config from {:?}", path)),
    }
}

/// Run the tunnel until Ctrl+C, SIGTERM or the machine stops
async fn run_tunnel(config: &TunnelConfig) -> Result<()> {
    let cancel = CancellationToken::new();

    #[cfg(unix)]
    let mut terminate =
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .context("Failed to install SIGTERM handler")?;

    let cancel_clone = cancel.clone();
    tokio::spawn(async move {
        let ctrl_c = tokio::signal::ctrl_c();

        #[cfg(unix)]
        let terminate = terminate.recv();

        #[cfg(not(unix))]
        let terminate = std::future::pending::<Option<()>>();

        tokio::select! {
            _ = ctrl_c => {
                tracing::info!("Received Ctrl+C, closing tunnel...");
            }
            _ = terminate => {
                tracing::info!("Received SIGTERM, closing tunnel...");
            }
        }

        cancel_clone.cancel();
    });

    commands::tunnel_command(config, cancel).await?;
    Ok(())
}
