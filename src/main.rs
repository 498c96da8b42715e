//! Blobpart CLI - stream local files to the blob service

use blobpart::multipart::slicer::reader_stream;
use blobpart::{BlobApiClient, Config, UploadCoordinator, UploadOptions, UploadProgress};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

/// Upload a file as a multipart upload
#[derive(Parser, Debug)]
#[command(name = "blobpart")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "config.yaml")]
    config: PathBuf,

    /// Local file to upload
    file: PathBuf,

    /// Destination pathname on the blob store
    pathname: String,

    /// Content type to record on the blob
    #[arg(long)]
    content_type: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Initialize logging
    let level = match args.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(true)
        .json()
        .finish();

    tracing::subscriber::set_global_default(subscriber)?;

    info!("Starting blobpart v{}", env!("CARGO_PKG_VERSION"));

    let config = Config::load(&args.config)?;
    info!("Loaded configuration from {:?}", args.config);

    let client = Arc::new(BlobApiClient::new(&config.service)?);
    let coordinator = UploadCoordinator::new(client, config.upload);

    let file = tokio::fs::File::open(&args.file).await?;
    let content_length = file.metadata().await?.len();

    let options = UploadOptions {
        content_type: args.content_type,
        content_length: Some(content_length),
        cancel: None,
        progress: Some(Arc::new(|p: UploadProgress| {
            eprintln!("{} / {} bytes ({:.2}%)", p.loaded, p.total, p.percentage);
        })),
    };

    let blob = coordinator
        .upload(&args.pathname, reader_stream(file), options)
        .await?;

    println!("{}", serde_json::to_string_pretty(&blob)?);

    Ok(())
}
