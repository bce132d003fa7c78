mod backends;
mod cmd;
mod config;
mod error;

use clap::Parser;
use config::{Cli, Commands};

#[tokio::main]
async fn main() {
    // Logs go to stderr; stdout carries command output.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let result = match &cli.command {
        Commands::Serve => cmd::serve::run(&cli).await,
        Commands::Submit(args) => cmd::submit::run(&cli, args).await,
        Commands::Stats => cmd::query::stats(&cli).await,
        Commands::List(args) => cmd::query::list(&cli, args).await,
        Commands::Get(args) => cmd::query::get(&cli, args).await,
    };
    if let Err(e) = result {
        tracing::error!(error = %e, "command failed");
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}
