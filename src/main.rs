// mixsort - order a batch of tracks into a smooth DJ playlist.
//
// `mixsort serve` runs the HTTP service (default), `mixsort sort <dir>`
// processes a local folder in one go.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use mixsort_lib::config::{Config, CONFIG_ENV};
use mixsort_lib::scanner::Scanner;
use mixsort_lib::server;
use mixsort_lib::session::analysis::ReportOutcome;

#[derive(Parser, Debug)]
#[command(name = "mixsort")]
#[command(about = "Analyze tracks (tempo, key, energy) and sequence them into a playlist")]
#[command(version)]
struct Args {
    /// TOML config file
    #[arg(short, long, global = true, env = CONFIG_ENV)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the HTTP service
    Serve {
        /// Address to bind (overrides config)
        #[arg(long)]
        host: Option<String>,

        /// Port to listen on (overrides config)
        #[arg(short, long)]
        port: Option<u16>,
    },
    /// Sort a local folder and write the playlist bundle
    Sort {
        /// Folder to scan recursively
        dir: PathBuf,

        /// Where to write the zip (default: export dir from config)
        #[arg(short, long)]
        out: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let mut config =
        Config::load(args.config.as_deref()).context("Failed to load configuration")?;

    let default_filter = format!(
        "mixsort={0},mixsort_lib={0},tower_http=info",
        config.server.log_level
    );
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    match args.command.unwrap_or(Command::Serve { host: None, port: None }) {
        Command::Serve { host, port } => {
            if let Some(host) = host {
                config.server.host = host;
            }
            if let Some(port) = port {
                config.server.port = port;
            }
            info!("Starting mixsort on {}:{}", config.server.host, config.server.port);
            server::serve(config).await
        }
        Command::Sort { dir, out } => {
            let result = Scanner::sort_directory(&dir, out.as_deref(), &config)
                .await
                .with_context(|| format!("Failed to sort {}", dir.display()))?;

            for report in &result.reports {
                if let ReportOutcome::Success { bpm, key, energy } = &report.outcome {
                    println!(
                        "{:<40} {:>7.2} BPM  {:>7}  energy {:.3}",
                        report.file,
                        bpm,
                        key.to_string(),
                        energy
                    );
                }
            }
            println!("Playlist written to {}", result.bundle.path.display());
            Ok(())
        }
    }
}
