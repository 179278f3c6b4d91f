//! harel - hierarchical statechart interpreter
//!
//! Validates JSON charts, runs them against a list of events, or drives
//! them interactively.

mod commands;
mod repl;

use clap::{Parser, Subcommand};
use colored::Colorize;
use harel_runtime::{Config, LogConfig};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "harel")]
#[command(about = "Hierarchical statechart interpreter")]
#[command(version)]
struct Cli {
    /// YAML configuration file
    #[arg(short, long, env = "HAREL_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Check that a chart parses and builds
    Validate {
        /// Chart JSON (or @file.json to read from file)
        chart: String,
    },

    /// Start a chart and send it a sequence of events
    Run {
        /// Chart JSON (or @file.json to read from file)
        chart: String,

        /// Events to send, in order
        #[arg(short, long, value_delimiter = ',')]
        events: Vec<String>,

        /// Initial context JSON, replacing the chart's
        #[arg(short, long)]
        ctx: Option<String>,

        /// Print every microstep
        #[arg(short, long)]
        trace: bool,

        /// After the events, wait until the instance terminates
        #[arg(short, long)]
        wait: bool,
    },

    /// Start a chart and drive it interactively
    Repl {
        /// Chart JSON (or @file.json to read from file)
        chart: String,

        /// Initial context JSON, replacing the chart's
        #[arg(short, long)]
        ctx: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let config = match Config::load_from(cli.config.clone()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{}: {}", "Error".red(), e);
            std::process::exit(1);
        }
    };
    init_logging(&config.log);
    if let Some(path) = &cli.config {
        tracing::debug!("loaded config from {}", path.display());
    }

    match cli.command {
        Commands::Repl { chart, ctx } => {
            let interpreter = commands::instantiate(&chart, ctx.as_deref(), &config)?;
            repl::run(interpreter).await?;
        }
        cmd => match commands::execute(cmd, &config).await {
            Ok(output) => println!("{}", output),
            Err(e) => {
                eprintln!("{}: {}", "Error".red(), e);
                std::process::exit(1);
            }
        },
    }

    Ok(())
}

fn init_logging(log: &LogConfig) {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&log.filter)),
        )
        .with_ansi(log.ansi)
        .with_writer(std::io::stderr)
        .init();
}
