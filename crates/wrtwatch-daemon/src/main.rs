//! wrtwatch Daemon - Main entry point
//!
//! Polls OpenWrt routers, resolves device identities, and serves the REST
//! API and WebSocket event stream.

mod api;
mod config;
mod server;
mod state;
mod ws;

use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser, Debug)]
#[command(name = "wrtwatch")]
#[command(about = "OpenWrt device identity tracker daemon")]
#[command(version)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "wrtwatch.toml")]
    config: PathBuf,

    /// Bind address for web server
    #[arg(short, long)]
    bind: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    log_level: String,

    /// Run a single polling cycle, print the device table, and exit
    #[arg(long)]
    poll_once: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    let level = match args.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(true)
        .finish();

    tracing::subscriber::set_global_default(subscriber)?;

    info!("wrtwatch v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration
    let mut config = config::load_config(&args.config)?;

    // Override bind address if specified
    if let Some(bind) = args.bind {
        config.daemon.bind = bind;
    }

    info!(
        sources = config.sources.len(),
        interval = config.daemon.poll_interval_secs,
        "Configuration loaded"
    );

    // Create application state
    let state = state::AppState::new(config.clone())?;

    if args.poll_once {
        // Single cycle mode
        info!("Running single polling cycle");
        let summary = state.run_cycle().await?;
        let devices = state.devices().await;
        println!(
            "Resolved {} devices from {} records:",
            summary.devices, summary.records
        );
        for device in devices {
            let hostname = device.resolved_hostname.as_deref().unwrap_or("-");
            let status = if device.online { "online" } else { "offline" };
            println!("  - {} ({}) {}", device.primary_mac, hostname, status);
            for mac in device.member_macs.iter().filter(|m| **m != device.primary_mac) {
                println!("      member {}", mac);
            }
            for ip in &device.ipv4_addresses {
                println!("      ipv4 {}", ip);
            }
        }
        let pending = state.pending().await;
        if !pending.is_empty() {
            println!("Pending association:");
            for mac in pending {
                println!("  - {}", mac);
            }
        }
    } else {
        // Daemon mode - run web server and polling loop
        server::run(state, &config.daemon.bind, config.daemon.tls.as_ref()).await?;
    }

    Ok(())
}
