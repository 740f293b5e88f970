// ABOUTME: fleet CLI entry point.
// ABOUTME: Provides init, run, check, and status subcommands.

use clap::{ArgAction, Parser, Subcommand};
use fleet::{run_check, run_init, run_status, run_supervisor, SupervisorOptions};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "fleet")]
#[command(about = "Supervisor that keeps one worker process running per desired agent")]
#[command(version)]
struct Cli {
    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a starter configuration file
    Init {
        /// Path to configuration file
        #[arg(long)]
        config: Option<PathBuf>,
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
    /// Run the supervisor
    Run {
        /// Path to configuration file
        #[arg(long, env = "FLEET_CONFIG")]
        config: Option<PathBuf>,
        /// Liveness endpoint port (overrides the config file)
        #[arg(long, env = "PORT")]
        port: Option<u16>,
    },
    /// Fetch the desired workers once and print them
    Check {
        /// Path to configuration file
        #[arg(long, env = "FLEET_CONFIG")]
        config: Option<PathBuf>,
    },
    /// Show the workers a running supervisor reports
    Status {
        /// Liveness endpoint address
        #[arg(long, default_value = "127.0.0.1:8081")]
        addr: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present (ignore errors if not found)
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();
    fleet_log::init_with_level(fleet_log::level_from_verbosity(cli.verbose));

    match cli.command {
        Commands::Init { config, force } => run_init(config, force),
        Commands::Run { config, port } => {
            run_supervisor(SupervisorOptions {
                config_path: config,
                port,
            })
            .await
        }
        Commands::Check { config } => run_check(config).await,
        Commands::Status { addr } => run_status(&addr).await,
    }
}
