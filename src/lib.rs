//! Chunk Uploadr Library
//!
//! Chunked, concurrent upload engine for block, page, append and range
//! storage backends.
//!
//! # Features
//!
//! - **Two chunking modes**: buffered chunks for any reader, or bounded
//!   sub-stream windows read straight from a shared seekable source
//! - **Bounded parallelism**: at most `max_concurrency` chunks in flight,
//!   results always ordered by offset
//! - **Backend sinks**: block staging, page ranges (sparse pages skipped),
//!   append blocks, Data Lake appends, file ranges
//! - **Progress**: one cumulative byte counter per upload
//!
//! # Example
//!
//! ```no_run
//! use chunk_uploadr::{config::Config, service::local::LocalDirectory, upload::{ChunkSink, Uploader}};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load("config.yaml")?;
//!     let dest = Arc::new(LocalDirectory::open("/tmp/uploads", "data.bin")?);
//!     dest.create_file(11)?;
//!
//!     let sink = Arc::new(ChunkSink::file_range(dest, None));
//!     let uploader = Uploader::new(config.upload);
//!     let outcome = uploader
//!         .upload_seekable(std::io::Cursor::new(b"hello world".to_vec()), Some(11), sink, None)
//!         .await?;
//!     println!("{} ranges", outcome.tokens().len());
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod metrics;
pub mod service;
pub mod upload;

// Re-export commonly used types
pub use config::Config;
pub use upload::{UploadError, UploadOutcome, UploadPlan, Uploader};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
