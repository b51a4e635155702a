use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use liveframe_core::SpoofPolicy;
use tracing_subscriber::EnvFilter;

mod frames;
mod local;
mod models;
mod submit;

#[derive(Parser)]
#[command(name = "liveframe", version, about = "Face liveness scoring tools")]
struct Cli {
    #[command(subcommand)]
    cmd: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the full pipeline locally and print the result record.
    Score {
        #[arg(required = true)]
        files: Vec<PathBuf>,
        #[arg(long)]
        model_dir: Option<PathBuf>,
        #[arg(long, default_value_t = SpoofPolicy::LogOnly)]
        spoof_policy: SpoofPolicy,
        /// Print per-frame diagnostics after the record.
        #[arg(long)]
        report: bool,
    },
    /// Print the spoof heuristic measurements for each image.
    Spoof {
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },
    /// Send the images to a running liveframed.
    Submit {
        #[arg(required = true)]
        files: Vec<PathBuf>,
        #[arg(long, default_value = "http://127.0.0.1:8000")]
        url: String,
    },
    /// Show model file status, optionally downloading what is missing.
    Models {
        #[arg(long)]
        model_dir: Option<PathBuf>,
        #[arg(long)]
        fetch: bool,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match cli.cmd {
        Commands::Score {
            files,
            model_dir,
            spoof_policy,
            report,
        } => local::score(&files, model_dir, spoof_policy, report),
        Commands::Spoof { files } => local::spoof(&files),
        Commands::Submit { files, url } => submit::run(&files, &url),
        Commands::Models { model_dir, fetch } => {
            let dir = model_dir.unwrap_or_else(liveframe_models::default_model_dir);
            models::run(&dir, fetch)
        }
    }
}
