//! Chunk Uploadr - chunked, concurrent file upload
//!
//! Uploads a local file into a destination directory through the
//! file-range or block-staging backend.

use anyhow::Context;
use chunk_uploadr::{
    config::Config,
    metrics,
    service::local::LocalDirectory,
    upload::{ChunkSink, ChunkToken, ProgressCallback, UploadOutcome, Uploader},
};
use clap::{Parser, ValueEnum};
use std::fs::File;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

/// Storage backend used for the destination
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Backend {
    /// Write ranges in place at their offsets
    FileRange,
    /// Stage blocks, then commit the block list
    Block,
}

/// Chunk Uploadr - chunked, concurrent file upload
#[derive(Parser, Debug)]
#[command(name = "chunk-uploadr")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// File to upload
    file: PathBuf,

    /// Destination directory
    #[arg(short, long)]
    dest: PathBuf,

    /// Destination file name (defaults to the source file name)
    #[arg(short, long)]
    name: Option<String>,

    /// Destination backend
    #[arg(short, long, value_enum, default_value_t = Backend::FileRange)]
    backend: Backend,

    /// Path to configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Bytes per chunk (overrides the configuration)
    #[arg(long)]
    chunk_size: Option<u64>,

    /// Maximum chunks in flight (overrides the configuration)
    #[arg(long)]
    concurrency: Option<usize>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long)]
    log_level: Option<String>,
}

fn init_logging(level: &str, format: &str) -> anyhow::Result<()> {
    let level = match level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let builder = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(true)
        .with_thread_ids(true)
        .with_writer(std::io::stderr);

    if format == "pretty" {
        tracing::subscriber::set_global_default(builder.pretty().finish())?;
    } else {
        tracing::subscriber::set_global_default(builder.json().finish())?;
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => Config::load(path)
            .with_context(|| format!("Failed to load configuration from {:?}", path))?,
        None => Config::default(),
    };
    if let Some(chunk_size) = args.chunk_size {
        config.upload.chunk_size = chunk_size;
    }
    if let Some(concurrency) = args.concurrency {
        config.upload.max_concurrency = concurrency;
    }
    if let Some(level) = &args.log_level {
        config.logging.level = level.clone();
    }
    config.validate()?;

    init_logging(&config.logging.level, &config.logging.format)?;
    info!("Starting Chunk Uploadr v{}", env!("CARGO_PKG_VERSION"));

    let name = match &args.name {
        Some(name) => name.clone(),
        None => args
            .file
            .file_name()
            .and_then(|n| n.to_str())
            .map(str::to_owned)
            .context("Source path has no file name")?,
    };

    let source = File::open(&args.file)
        .with_context(|| format!("Failed to open {:?}", args.file))?;
    let size = source.metadata()?.len();
    let dest = Arc::new(LocalDirectory::open(&args.dest, &name)?);

    let progress: ProgressCallback = Arc::new(|current, total| {
        tracing::debug!(transferred = current, total = ?total, "Upload progress");
    });
    let uploader = Uploader::new(config.upload.clone());

    let etag = match args.backend {
        Backend::FileRange => {
            dest.create_file(size)?;
            let sink = Arc::new(ChunkSink::file_range(dest.clone(), None));
            let outcome = uploader
                .upload_seekable(source, Some(size), sink, Some(progress))
                .await?;
            info!(ranges = outcome.tokens().len(), "Uploaded file ranges");
            last_range_etag(&outcome)
        }
        Backend::Block => {
            let sink = Arc::new(ChunkSink::block_staging(dest.clone()));
            let outcome = uploader
                .upload_seekable(source, Some(size), sink, Some(progress))
                .await?;
            let block_ids: Vec<String> = outcome
                .tokens()
                .iter()
                .filter_map(|token| match token {
                    ChunkToken::BlockId(id) => Some(id.clone()),
                    ChunkToken::Range { .. } => None,
                })
                .collect();
            dest.commit_block_list(&block_ids)?.etag
        }
    };

    println!(
        "Uploaded {} bytes to {} (etag {})",
        size,
        dest.path().display(),
        etag.as_deref().unwrap_or("-")
    );

    if config.metrics.enabled {
        print!("{}", metrics::render());
    }

    Ok(())
}

fn last_range_etag(outcome: &UploadOutcome) -> Option<String> {
    outcome.tokens().iter().rev().find_map(|token| match token {
        ChunkToken::Range { response, .. } => response.etag.clone(),
        ChunkToken::BlockId(_) => None,
    })
}
