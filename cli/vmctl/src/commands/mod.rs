//! CLI commands.

mod crds;
mod render;

use anyhow::Result;
use clap::{Parser, Subcommand};

use crate::output::OutputFormat;

/// vmkit CLI - Inspect the resources vmkit manages.
#[derive(Debug, Parser)]
#[command(name = "vmctl")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Output format.
    #[arg(long, global = true, value_enum, default_value_t = OutputFormat::Yaml, env = "VMCTL_FORMAT")]
    format: OutputFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Print the custom resource definitions.
    Crds(crds::CrdsCommand),

    /// Render the workloads for a VM manifest (offline).
    Render(render::RenderCommand),

    /// Show CLI version.
    Version,
}

impl Cli {
    /// Run the CLI command.
    pub fn run(self) -> Result<()> {
        let ctx = CommandContext {
            format: self.format,
        };

        match self.command {
            Commands::Crds(cmd) => cmd.run(ctx),
            Commands::Render(cmd) => cmd.run(ctx),
            Commands::Version => {
                println!("vmctl {}", env!("CARGO_PKG_VERSION"));
                Ok(())
            }
        }
    }
}

/// Shared command context.
pub struct CommandContext {
    pub format: OutputFormat,
}
