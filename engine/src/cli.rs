//! Command-line interface
//!
//! Defines the commands and global flags for the `strand` binary using
//! clap's derive API.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Strand agent task runtime
///
/// Decomposes a goal into steps, drives them through a model-in-the-loop
/// orchestrator, and executes the directives the model emits.
#[derive(Parser, Debug)]
#[command(name = "strand")]
#[command(version, about, long_about = None)]
pub struct Cli {
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
    /// Run a goal to completion and print the outcome
    Run {
        /// The goal to work toward
        goal: String,

        /// User key the per-user workflow invariant is scoped to
        #[arg(long, default_value = "local")]
        user: String,

        /// Directory to write the debug artifact into
        #[arg(long, value_name = "DIR")]
        artifacts: Option<PathBuf>,
    },

    /// Manage configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

/// Configuration subcommands
#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Print the active configuration as TOML
    Show,

    /// Print the configuration file path
    Path,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_run_command() {
        let cli = Cli::parse_from(["strand", "run", "reboot the gateway"]);
        match cli.command {
            Command::Run { goal, user, .. } => {
                assert_eq!(goal, "reboot the gateway");
                assert_eq!(user, "local");
            }
            other => panic!("expected Run, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_global_flags() {
        let cli = Cli::parse_from(["strand", "--log", "debug", "config", "path"]);
        assert_eq!(cli.log.as_deref(), Some("debug"));
        assert!(matches!(
            cli.command,
            Command::Config {
                action: ConfigAction::Path
            }
        ));
    }
}
