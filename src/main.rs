//! figma-mcp-bridge: MCP server that lets AI assistants drive Figma
//!
//! Tool calls arriving on stdin are forwarded over a WebSocket relay to the
//! Figma plugin; the plugin's replies go back out on stdout.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use tracing::{error, info, Level};
use tracing_subscriber::EnvFilter;

use figma_mcp_bridge::bridge::FigmaBridge;
use figma_mcp_bridge::config::{self, Config};
use figma_mcp_bridge::mcp::server::McpServer;

/// MCP server that forwards tool calls to a Figma plugin.
///
/// The plugin and this server meet on a WebSocket relay; both must join the
/// same channel before commands flow.
#[derive(Parser, Debug)]
#[command(name = "figma-mcp-bridge")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Relay host name
    #[arg(long, value_name = "HOST")]
    server: Option<String>,

    /// Relay port
    #[arg(long, value_name = "PORT")]
    port: Option<u16>,

    /// Base reconnection interval in milliseconds
    #[arg(long, value_name = "MS")]
    reconnect_interval: Option<u64>,

    /// Channel to join on every connection
    #[arg(long, value_name = "NAME")]
    channel: Option<String>,

    /// Path to configuration file
    #[arg(long, value_name = "CONFIG_FILE")]
    config: Option<PathBuf>,

    /// Increase logging verbosity (-v for info, -vv for debug, -vvv for trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Decrease logging verbosity (only show errors)
    #[arg(short, long)]
    quiet: bool,
}

impl Args {
    /// Applies command-line overrides on top of the loaded configuration.
    fn apply(&self, cfg: &mut Config) {
        if let Some(server) = &self.server {
            cfg.server.clone_from(server);
        }
        if let Some(port) = self.port {
            cfg.port = port;
        }
        if let Some(interval) = self.reconnect_interval {
            // The backoff cap stays put; an interval above it is clamped.
            cfg.reconnect.interval_ms = interval.min(cfg.reconnect.max_delay_ms);
        }
        if self.channel.is_some() {
            cfg.channel.clone_from(&self.channel);
        }
    }
}

/// Determines the log level from CLI arguments.
#[allow(clippy::match_same_arms)] // Explicit "warn" arm for clarity
fn get_log_level(verbose: u8, quiet: bool, config_level: &str) -> Level {
    if quiet {
        return Level::ERROR;
    }

    match verbose {
        0 => match config_level.to_lowercase().as_str() {
            "trace" => Level::TRACE,
            "debug" => Level::DEBUG,
            "info" => Level::INFO,
            "warn" => Level::WARN,
            "error" => Level::ERROR,
            _ => Level::WARN,
        },
        1 => Level::INFO,
        2 => Level::DEBUG,
        _ => Level::TRACE,
    }
}

/// Initialises the tracing subscriber. stdout belongs to MCP, so logs go to stderr.
fn init_tracing(level: Level) {
    let filter = EnvFilter::from_default_env().add_directive(level.into());

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

/// Interactive-use notice printed to stderr at startup.
fn license_notice() -> String {
    format!(
        "figma-mcp-bridge {}  Copyright (C) 2026  The Embedded Society\n\
         This program comes with ABSOLUTELY NO WARRANTY.\n\
         This is free software, licensed under GPL-3.0-or-later.\n",
        env!("CARGO_PKG_VERSION")
    )
}

fn load(args: &Args) -> Result<Config, ExitCode> {
    let mut cfg = config::load_config(args.config.as_deref()).map_err(|e| {
        eprintln!("Configuration error: {e}");
        ExitCode::FAILURE
    })?;
    args.apply(&mut cfg);
    cfg.validate().map_err(|e| {
        eprintln!("Configuration error: {e}");
        ExitCode::FAILURE
    })?;
    Ok(cfg)
}

/// Entry point for the figma-mcp-bridge server.
fn main() -> ExitCode {
    let args = Args::parse();

    let cfg = match load(&args) {
        Ok(cfg) => cfg,
        Err(code) => return code,
    };

    init_tracing(get_log_level(args.verbose, args.quiet, &cfg.logging.level));

    // Display GPL license notice (required by GPLv3 Section 5d)
    eprintln!("{}", license_notice());

    let settings = cfg.bridge_settings();
    info!(
        version = env!("CARGO_PKG_VERSION"),
        url = %settings.url,
        channel = ?settings.default_channel,
        "Starting figma-mcp-bridge"
    );

    let runtime = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            error!(error = %e, "Failed to create Tokio runtime");
            return ExitCode::FAILURE;
        }
    };

    let result = runtime.block_on(async {
        let bridge = FigmaBridge::start(settings);
        let mut server = McpServer::new(bridge.clone());
        info!("MCP server ready, waiting for client connection...");
        let result = server.run().await;
        bridge.shutdown().await;
        result
    });

    match result {
        Ok(()) => {
            info!("Server shut down gracefully");
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!(error = %e, "Server error");
            ExitCode::FAILURE
        }
    }
}
