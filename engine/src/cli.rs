//! Command-line interface for the `cadence` binary

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Cadence: per-actor decision scheduler for multi-agent simulations
#[derive(Parser, Debug)]
#[command(name = "cadence")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Output in JSON format
    #[arg(long, global = true)]
    pub json: bool,

    /// Set log level (error, warn, info, debug, trace)
    #[arg(long, global = true, value_name = "LEVEL")]
    pub log: Option<String>,

    /// Specify alternate configuration file
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the scheduler until Ctrl+C or SIGTERM
    Run {
        /// Rescan the store for newly active actors this often (0 disables)
        #[arg(long, default_value = "60", value_name = "SECS")]
        rescan_secs: u64,
    },

    /// Show actors with their checkpoint and memory state
    Status,

    /// Print the effective configuration as TOML
    Config,

    /// Set a runtime tunable (e.g. `paused true`); omit the value to clear it
    Tune {
        key: String,
        value: Option<String>,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_run_with_global_flags() {
        let cli = Cli::parse_from(["cadence", "--json", "--config", "/tmp/c.toml", "run"]);
        assert!(cli.json);
        assert_eq!(cli.config, Some(PathBuf::from("/tmp/c.toml")));
        assert!(matches!(cli.command, Command::Run { rescan_secs: 60 }));
    }

    #[test]
    fn test_parse_tune() {
        let cli = Cli::parse_from(["cadence", "tune", "paused", "true"]);
        match cli.command {
            Command::Tune { key, value } => {
                assert_eq!(key, "paused");
                assert_eq!(value.as_deref(), Some("true"));
            }
            other => panic!("unexpected command {:?}", other),
        }

        let cli = Cli::parse_from(["cadence", "tune", "paused"]);
        assert!(matches!(cli.command, Command::Tune { value: None, .. }));
    }
}
