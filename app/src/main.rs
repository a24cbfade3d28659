use clap::{Parser, Subcommand};
use ev_core::telemetry;
use std::process;

mod server;
mod ws;

#[derive(Parser)]
#[command(name = "ev-edge")]
#[command(about = "Real-time video-analytics edge service")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the server (default)
    Start,
    /// Validate configuration and exit
    CheckConfig,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let config = match ev_config::Config::load() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to load configuration: {}", e);
            process::exit(1);
        }
    };

    telemetry::init_tracing(&config.obs.log_format, &config.obs.log_level);
    tracing::debug!(?config, "configuration loaded");

    match cli.command.unwrap_or(Commands::Start) {
        Commands::CheckConfig => {
            tracing::info!("configuration is valid");
        }
        Commands::Start => {
            if let Err(e) = server::run(config).await {
                tracing::error!(error = %e, "server exited with an error");
                process::exit(1);
            }
        }
    }
}
