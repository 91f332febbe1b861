//! Command-line interface for cardtpl.
//!
//! # Commands
//!
//! - `resolve` - run a refresh pass over a dashboard and write the result
//! - `validate` - run a refresh pass without writing and report every problem
//!
//! # Examples
//!
//! ```bash
//! # Print the resolved dashboard as YAML
//! cardtpl resolve ui-lovelace.yaml
//!
//! # Write it as JSON, and one file per view
//! cardtpl resolve ui-lovelace.yaml -o resolved.json --format json --views-dir views/
//!
//! # Check every dashboard under a directory; fail on card-level errors too
//! cardtpl validate dashboards/ --strict
//! ```
//!
//! # Global Options
//!
//! - `--verbose` - debug logging
//! - `--quiet` - errors only
//! - `--config` - configuration file (default `~/.cardtpl/config.toml`)
//!
//! Logs go to stderr; `RUST_LOG` overrides the level chosen by the flags.

mod resolve;
mod validate;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use crate::config::EngineConfig;

/// Command-line arguments.
#[derive(Parser, Debug)]
#[command(
    name = "cardtpl",
    about = "Resolve card template references in dashboard configurations",
    version,
    long_about = "cardtpl expands references to reusable card templates in a dashboard \
                  document, rendering partials and context into concrete cards."
)]
pub struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Show debug output
    #[arg(short, long, global = true, conflicts_with = "quiet")]
    verbose: bool,

    /// Only show errors
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Path to a configuration file
    #[arg(short, long, global = true, env = "CARDTPL_CONFIG")]
    config: Option<String>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Resolve a dashboard and write the result
    Resolve(resolve::ResolveCommand),

    /// Check a dashboard, or every dashboard under a directory
    Validate(validate::ValidateCommand),
}

impl Cli {
    /// Set up logging, load configuration, and run the command.
    pub async fn execute(self) -> Result<()> {
        init_logging(self.log_level());

        let config = EngineConfig::load_with_optional(self.config.as_deref()).await?;
        tracing::debug!("Using configuration: {:?}", config);

        match self.command {
            Commands::Resolve(cmd) => cmd.execute(config, self.quiet).await,
            Commands::Validate(cmd) => cmd.execute(config, self.quiet).await,
        }
    }

    /// Log level selected by the global flags.
    #[must_use]
    pub fn log_level(&self) -> &'static str {
        if self.verbose {
            "debug"
        } else if self.quiet {
            "error"
        } else {
            "info"
        }
    }
}

/// Install the stderr subscriber. `RUST_LOG` wins over `level` when set.
fn init_logging(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}
