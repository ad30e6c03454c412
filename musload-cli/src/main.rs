//! CLI for the musload serial boot loader.

#![allow(
    clippy::print_stdout,
    clippy::print_stderr,
    clippy::missing_docs_in_private_items
)]

mod boot;

use anyhow::Result;
use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::Shell;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    name = "musload",
    version,
    about = "Upload firmware images to musoc targets over a serial line"
)]
struct Cli {
    /// Increase log verbosity (-v info, -vv debug, -vvv trace). RUST_LOG overrides.
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Upload an image: wait for the target to reset, then stream the image.
    Boot(boot::BootArgs),

    /// List serial ports.
    #[command(visible_alias = "ls")]
    Ports {
        /// Output format.
        #[arg(long, default_value = "text")]
        format: OutputFormat,
    },

    /// Generate shell completion scripts.
    #[command(hide = true)]
    Completion {
        /// Target shell.
        shell: Shell,
    },
}

/// Output format for command results.
#[derive(Debug, Clone, Copy, Default, clap::ValueEnum)]
pub(crate) enum OutputFormat {
    /// Human-readable text.
    #[default]
    Text,
    /// Machine-readable JSON.
    Json,
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose);
    if let Err(e) = cli.dispatch().await {
        eprintln!("musload: {e:#}");
        std::process::exit(1);
    }
}

impl Cli {
    async fn dispatch(self) -> Result<()> {
        match self.command {
            Command::Boot(args) => args.run().await,
            Command::Ports { format } => ports(format),
            Command::Completion { shell } => {
                clap_complete::generate(shell, &mut Self::command(), "musload", &mut std::io::stdout());
                Ok(())
            }
        }
    }
}

/// Installs a stderr subscriber; `RUST_LOG` wins over `-v`.
fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn ports(format: OutputFormat) -> Result<()> {
    let list = musload::available_ports()?;

    if matches!(format, OutputFormat::Json) {
        println!("{}", serde_json::to_string_pretty(&list)?);
        return Ok(());
    }

    if list.is_empty() {
        println!("No serial ports.");
        return Ok(());
    }
    println!("{:<24} {}", "PORT", "DESCRIPTION");
    for p in &list {
        println!("{:<24} {}", p.name, p.description);
    }
    Ok(())
}
