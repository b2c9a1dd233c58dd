//! CLI command definitions and subcommands

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// dashd - dashboard backend daemon
#[derive(Debug, Parser)]
#[command(
    name = "dashd",
    about = "Dashboard backend daemon: metric origin catalog with reload and graceful shutdown",
    version = env!("CARGO_PKG_VERSION"),
)]
pub struct Cli {
    /// Path to config file
    #[arg(short, long, global = true, help = "Path to config file")]
    pub config: Option<PathBuf>,

    /// Log level (TRACE, DEBUG, INFO, WARN, ERROR)
    #[arg(
        short = 'l',
        long = "log-level",
        global = true,
        help = "Log level (TRACE, DEBUG, INFO, WARN, ERROR)"
    )]
    pub log_level: Option<String>,

    /// Debug level; repeat for more detail
    #[arg(short = 'd', long = "debug", global = true, action = clap::ArgAction::Count)]
    pub debug: u8,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Command,
}

/// CLI subcommands
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run the server in the foreground until SIGINT/SIGTERM
    Run,

    /// Load and validate the configuration, then exit
    Check,

    /// Ask the running daemon to reload its configuration (SIGHUP)
    Reload,

    /// Ask the running daemon to stop (SIGTERM) and wait for it to exit
    Stop {
        /// Seconds to wait for the daemon to exit
        #[arg(short, long, default_value_t = 30)]
        timeout: u64,
    },

    /// Show whether the daemon is running
    Status,

    /// Check the daemon answers on its control address
    Ping,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_global_flags() {
        let cli = Cli::parse_from(["dashd", "-c", "/etc/dashd.yml", "-dd", "run"]);
        assert_eq!(cli.config, Some(PathBuf::from("/etc/dashd.yml")));
        assert_eq!(cli.debug, 2);
        assert!(matches!(cli.command, Command::Run));
    }

    #[test]
    fn test_parse_stop_timeout() {
        let cli = Cli::parse_from(["dashd", "stop", "--timeout", "5", "--log-level", "warn"]);
        assert!(matches!(cli.command, Command::Stop { timeout: 5 }));
        assert_eq!(cli.log_level.as_deref(), Some("warn"));
    }

    #[test]
    fn test_command_required() {
        assert!(Cli::try_parse_from(["dashd"]).is_err());
    }
}
