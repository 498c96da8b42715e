//! Blobpart Library
//!
//! Client for a JSON/HTTP blob-storage service, built around a concurrent,
//! memory-bounded multipart upload engine.
//!
//! # Features
//!
//! - **Streamed multipart uploads**: slice any byte stream into parts and
//!   upload them concurrently without buffering the whole body
//! - **Bounded memory**: backpressure keeps buffered payload under
//!   `max_concurrent_uploads * part_size * headroom` bytes
//! - **Typed failures**: aborts, validation errors and service outages are
//!   distinct; session errors carry the upload id and key for cleanup
//! - **Manual mode**: create a session and push numbered parts yourself
//!
//! # Example
//!
//! ```no_run
//! use blobpart::{BlobApiClient, Config, UploadCoordinator, UploadOptions};
//! use blobpart::multipart::slicer::reader_stream;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load("config.yaml")?;
//!     let client = Arc::new(BlobApiClient::new(&config.service)?);
//!     let coordinator = UploadCoordinator::new(client, config.upload);
//!
//!     let file = tokio::fs::File::open("video.mp4").await?;
//!     let blob = coordinator
//!         .upload("videos/video.mp4", reader_stream(file), UploadOptions::default())
//!         .await?;
//!
//!     println!("uploaded to {}", blob.url);
//!     Ok(())
//! }
//! ```

pub mod client;
pub mod config;
pub mod error;
pub mod metrics;
pub mod multipart;
pub mod progress;

// Re-export commonly used types
pub use client::{BlobApiClient, BlobObject, CreateUploadResponse, MultipartApi, UploadOptions, UploadSession};
pub use config::{Config, RetryConfig, ServiceConfig, UploadConfig};
pub use error::BlobError;
pub use multipart::coordinator::UploadCoordinator;
pub use multipart::manual::MultipartUploader;
pub use multipart::{CompletedPart, SessionState};
pub use progress::{ProgressCallback, UploadProgress};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
