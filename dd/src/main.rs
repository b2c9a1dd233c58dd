//! dashd - dashboard backend daemon
//!
//! CLI entry point: run the server in the foreground or manage a running one.

use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::Parser;
use colored::Colorize;
use eyre::{Context, Result};
use tracing::{debug, info, warn};

use dashd::cli::{Cli, Command};
use dashd::config::Config;
use dashd::control::ControlClient;
use dashd::daemon::PidFile;
use dashd::logging::{LogSink, resolve_level, setup_logging};
use dashd::server::{Server, ServerOptions};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config_path = Config::locate(cli.config.as_deref());

    // Read the log level early; a broken file is reported properly by the command itself
    let config_log_level = Config::load(config_path.as_deref()).ok().and_then(|c| c.log_level);

    // Priority: CLI > config > -d count > INFO
    let level = resolve_level(cli.log_level.as_deref(), config_log_level.as_deref(), cli.debug)?;
    let sink = LogSink::stderr();
    setup_logging(level, sink.clone()).context("Failed to setup logging")?;

    debug!(command = ?cli.command, ?config_path, "main: dispatching command");
    match cli.command {
        Command::Run => {
            debug!("main: matched Run command");
            cmd_run(config_path, cli.debug, sink).await
        }
        Command::Check => {
            debug!("main: matched Check command");
            cmd_check(config_path.as_deref())
        }
        Command::Reload => {
            debug!("main: matched Reload command");
            cmd_reload(config_path.as_deref())
        }
        Command::Stop { timeout } => {
            debug!(timeout, "main: matched Stop command");
            cmd_stop(config_path.as_deref(), Duration::from_secs(timeout))
        }
        Command::Status => {
            debug!("main: matched Status command");
            cmd_status(config_path.as_deref()).await
        }
        Command::Ping => {
            debug!("main: matched Ping command");
            cmd_ping(config_path.as_deref()).await
        }
    }
}

/// Run the server until SIGINT/SIGTERM
async fn cmd_run(config_path: Option<PathBuf>, debug_level: u8, sink: LogSink) -> Result<()> {
    debug!(?config_path, debug_level, "cmd_run: called");
    let server = Server::new(ServerOptions {
        config_path,
        debug_level,
        log_sink: sink,
        ..ServerOptions::default()
    });

    let report = server.run().await?;
    if !report.is_clean() {
        warn!(
            remaining = report.remaining_connections,
            stragglers = ?report.straggler_workers,
            "Shutdown did not complete cleanly"
        );
    }
    info!(elapsed = ?report.elapsed, "dashd exiting");
    Ok(())
}

/// Validate the configuration without starting anything
fn cmd_check(config_path: Option<&Path>) -> Result<()> {
    debug!(?config_path, "cmd_check: called");
    let config = Config::load(config_path)?;
    config.validate().context("Configuration is invalid")?;

    let source = config_path
        .map(|p| p.display().to_string())
        .unwrap_or_else(|| "defaults".to_string());
    println!("{} Configuration OK ({})", "✓".green(), source);
    println!("  bind:    {}", config.bind);
    println!("  origins: {}", config.origins.len());
    for (name, origin) in &config.origins {
        println!("    {} ({})", name.cyan(), origin.connector.kind());
    }
    Ok(())
}

fn cmd_reload(config_path: Option<&Path>) -> Result<()> {
    debug!(?config_path, "cmd_reload: called");
    let pid_file = pid_file(config_path)?;
    let pid = pid_file.reload()?;
    println!("{} Reload requested (PID: {})", "✓".green(), pid);
    Ok(())
}

fn cmd_stop(config_path: Option<&Path>, timeout: Duration) -> Result<()> {
    debug!(?config_path, ?timeout, "cmd_stop: called");
    let pid_file = pid_file(config_path)?;
    let pid = pid_file.stop(timeout)?;
    println!("{} dashd stopped (PID: {})", "✓".green(), pid);
    Ok(())
}

/// Report the pid file state, and the server's own view when it answers
async fn cmd_status(config_path: Option<&Path>) -> Result<()> {
    debug!(?config_path, "cmd_status: called");
    let config = Config::load(config_path)?;

    match &config.pid_file {
        Some(path) => {
            let status = PidFile::new(path).status();
            match status.pid {
                Some(pid) => println!("dashd is {} (PID: {})", "running".green(), pid),
                None => println!("dashd is {}", "not running".red()),
            }
            println!("  PID file: {}", status.pid_file.display());
        }
        None => println!("No pid-file configured; asking the control address"),
    }

    let client = ControlClient::new(config.bind_addr()?);
    match client.stats().await {
        Ok(stats) => {
            println!("  State:       {}", stats.state);
            println!("  Uptime:      {}s", stats.uptime_secs);
            println!("  Connections: {}", stats.connections);
            if let Some(catalog) = &stats.catalog {
                println!("  Sources:     {}", catalog.sources);
            }
            println!("  Items:       {}", stats.library_items);
            for (name, status) in &stats.workers {
                println!("    {:<20} {:?}", name, status);
            }
        }
        Err(e) => {
            debug!(error = %e, "cmd_status: control address not answering");
            println!("  Control:     {} ({})", "unreachable".yellow(), client.addr());
        }
    }
    Ok(())
}

async fn cmd_ping(config_path: Option<&Path>) -> Result<()> {
    debug!(?config_path, "cmd_ping: called");
    let config = Config::load(config_path)?;
    let client = ControlClient::new(config.bind_addr()?);
    let version = client
        .ping()
        .await
        .context(format!("dashd is not answering on {}", client.addr()))?;
    println!("{} dashd {} answering on {}", "✓".green(), version, client.addr());
    Ok(())
}

fn pid_file(config_path: Option<&Path>) -> Result<PidFile> {
    let config = Config::load(config_path)?;
    let path = config
        .pid_file
        .ok_or_else(|| eyre::eyre!("No pid-file configured; cannot find the running daemon"))?;
    Ok(PidFile::new(path))
}
