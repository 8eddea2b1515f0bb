use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

mod client;

use client::{OculusClient, UploadOptions};

#[derive(Parser)]
#[command(name = "oculus", about = "Oculus image detection CLI")]
struct Cli {
    /// Base URL of the oculusd HTTP API
    #[arg(long, env = "OCULUS_SERVER", default_value = "http://127.0.0.1:8000", global = true)]
    server: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Upload an image and run the selected detectors
    Upload {
        path: PathBuf,
        /// Run object detection
        #[arg(long)]
        objects: bool,
        /// Run pose estimation
        #[arg(long)]
        poses: bool,
        /// Run facial emotion recognition
        #[arg(long)]
        emotions: bool,
        /// Object confidence threshold, in percent (server default: 60)
        #[arg(long)]
        threshold: Option<i64>,
    },
    /// Mark one detection of a record as verified
    Verify {
        record_id: String,
        /// Position of the detection in the record
        index: usize,
    },
    /// List recent records
    History {
        /// Case-insensitive class name filter
        #[arg(short, long)]
        search: Option<String>,
    },
    /// Delete every record and its stored image
    Clear,
    /// Show detection counts per class
    Analytics {
        #[arg(short, long)]
        limit: Option<usize>,
    },
    /// Show daemon status
    Health,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let client = OculusClient::new(&cli.server);
    tracing::debug!(server = %cli.server, "using oculusd");

    let response = match cli.command {
        Commands::Upload {
            path,
            objects,
            poses,
            emotions,
            threshold,
        } => {
            let options = UploadOptions {
                objects,
                poses,
                emotions,
                threshold,
            };
            client.upload(&path, &options).await?
        }
        Commands::Verify { record_id, index } => client.verify(&record_id, index).await?,
        Commands::History { search } => client.history(search.as_deref()).await?,
        Commands::Clear => client.clear().await?,
        Commands::Analytics { limit } => client.analytics(limit).await?,
        Commands::Health => client.health().await?,
    };

    println!("{}", serde_json::to_string_pretty(&response)?);
    Ok(())
}
