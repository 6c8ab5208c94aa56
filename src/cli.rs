//! CLI argument parsing with clap derive

use anyhow::Result;
use clap::{Parser, Subcommand};

use crate::commands;

/// Fan-out benchmark deployments across a fleet of remote instances
#[derive(Parser)]
#[command(
    name = "fleetbench",
    version,
    propagate_version = true,
    subcommand_required = true,
    arg_required_else_help = true
)]
pub struct Cli {
    /// Output in JSON format
    #[arg(long, global = true)]
    pub json: bool,

    /// Suppress non-error output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Disable colored output
    #[arg(long, global = true, env = "NO_COLOR")]
    pub no_color: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Run every host in the fleet file through its full lifecycle
    Deploy(commands::deploy::DeployArgs),

    /// Show version
    Version,
}

impl Cli {
    /// Execute the CLI command.
    ///
    /// # Errors
    ///
    /// Returns an error if the command fails.
    pub async fn run(self) -> Result<()> {
        let Cli { no_color, quiet, json, command } = self;
        match command {
            Command::Deploy(args) => {
                let ctx = crate::output::OutputContext::new(no_color, quiet);
                commands::deploy::run(&ctx, json, &args).await
            }
            Command::Version => {
                commands::version::run(json);
                Ok(())
            }
        }
    }
}
