mod commands;
mod config;

use clap::{Parser, Subcommand};
use colored::Colorize;
use commands::{replay, simulate, ReplayArgs, SimulateArgs};
use tracing_subscriber::EnvFilter;

/// Vellum CLI - inspect and exercise collaborative document sessions
#[derive(Parser, Debug)]
#[command(name = "vellum")]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Rebuild a document from a server command log
    Replay(ReplayArgs),

    /// Run random concurrent edits against an in-memory server and check convergence
    Simulate(SimulateArgs),
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_target(false)
        .init();

    let cli = Cli::parse();

    let cwd = match std::env::current_dir() {
        Ok(dir) => dir.display().to_string(),
        Err(err) => {
            eprintln!("{} Cannot get current directory: {}", "Error:".red().bold(), err);
            std::process::exit(1);
        }
    };

    let result = match cli.command {
        Command::Replay(args) => replay(args, &cwd),
        Command::Simulate(args) => simulate(args, &cwd),
    };

    if let Err(err) = result {
        eprintln!();
        eprintln!("{} {}", "Error:".red().bold(), err);
        eprintln!();
        std::process::exit(1);
    }
}
