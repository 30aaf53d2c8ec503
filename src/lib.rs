//! ctlog-s3 Library
//!
//! Hedged, S3-compatible object storage backend for Certificate Transparency
//! log sequencers.
//!
//! # Features
//!
//! - **Hedged Uploads**: a duplicate PUT races a primary that is slower than 75ms
//! - **Conditional Writes**: create-only immutable objects on stores that support `If-Match: ""`
//! - **Transparent Compression**: gzip on upload, gunzip on fetch
//! - **Prometheus Metrics**: request, size, compression and hedge collectors per backend
//!
//! # Example
//!
//! ```no_run
//! use ctlog_s3::{Backend, Config, S3Backend};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load("config.yaml")?;
//!     let backend = S3Backend::new(&config.s3).await?;
//!     for key in backend.list("tile/").await? {
//!         println!("{}", key);
//!     }
//!     Ok(())
//! }
//! ```

pub mod backend;
pub mod config;
pub mod metrics;
pub mod s3;
pub mod upload;

// Re-export commonly used types
pub use backend::Backend;
pub use config::Config;
pub use s3::{S3Backend, S3BackendError};
pub use upload::UploadOptions;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
