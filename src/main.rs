use std::{path::PathBuf, process::exit};

use clap::Parser;
use tracing::error;
use tracing_subscriber::EnvFilter;

use crate::{check::Conclusion, config::Config};

mod action;
mod check;
mod config;
mod github;
#[cfg(test)]
mod testutil;

#[derive(clap::Parser)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Subcommand, Clone)]
enum Commands {
    /// Receive check requests and GitHub webhooks over HTTP.
    Serve,
    /// Publish the diagnostics of a check request stored in a JSON file, and
    /// print the result.
    ///
    /// This requires the GitHub App credentials to be available to the CI
    /// job. The exit code is 1 if the check failed.
    Check {
        /// Path to the check request.
        request: PathBuf,
    },
}

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    if std::env::var("LOG_STYLE").as_deref().unwrap_or("human") == "json" {
        tracing_subscriber::fmt()
            .with_env_filter(EnvFilter::from_default_env())
            .event_format(tracing_subscriber::fmt::format::json())
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(EnvFilter::from_default_env())
            .init();
    }

    let args = Cli::parse();
    let config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            error!("Invalid configuration: {:?}", e);
            exit(1)
        }
    };

    match args.command {
        Commands::Serve => {
            if let Err(e) = github::main(config).await {
                error!("{:?}", e);
                exit(1)
            }
        }
        Commands::Check { request } => match action::main(config, &request).await {
            Ok(Conclusion::Failure) => exit(1),
            Ok(_) => {}
            Err(e) => {
                error!("{:?}", e);
                exit(1)
            }
        },
    }
}
