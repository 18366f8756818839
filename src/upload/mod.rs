//! Upload module
//!
//! Splits a source stream into chunks or sub-streams and uploads them with
//! bounded parallelism through a backend-specific [`sink::ChunkSink`].

use crate::service::{ResponseHeaders, ServiceError};
use bytes::Bytes;
use thiserror::Error;

pub mod iter_stream;
pub mod progress;
pub mod scheduler;
pub mod sequencer;
pub mod sink;
pub mod substream;
pub mod uploader;

pub use iter_stream::IterStreamer;
pub use progress::{ProgressCallback, ProgressTracker};
pub use scheduler::{upload_data_chunks, upload_substream_blocks};
pub use sequencer::{ChunkTransform, DataChunks, SubStreamBlocks, Transforms};
pub use sink::ChunkSink;
pub use substream::{OversizedRead, SeekableSource, SharedSource, SubStream};
pub use uploader::Uploader;

/// Upload errors
#[derive(Error, Debug)]
pub enum UploadError {
    #[error("Stream must support seek: {0}")]
    StreamNotSeekable(#[source] std::io::Error),

    #[error("Unable to determine content length of upload data")]
    LengthRequired,

    #[error("Upload data should be of type bytes: {0}")]
    InvalidChunkType(String),

    #[error("IO error: {0}")]
    IoFailure(#[source] std::io::Error),

    #[error("Chunk upload at offset {offset} failed: {source}")]
    SinkFailure {
        offset: u64,
        #[source]
        source: ServiceError,
    },

    #[error("Transform error: {0}")]
    Transform(String),

    #[error("Invalid upload plan: {0}")]
    InvalidPlan(String),

    #[error("{sink} sink does not support {mode} uploads")]
    UnsupportedMode {
        sink: &'static str,
        mode: &'static str,
    },

    #[error("Upload task failed: {0}")]
    TaskFailed(String),
}

impl From<std::io::Error> for UploadError {
    fn from(e: std::io::Error) -> Self {
        match OversizedRead::find(&e) {
            Some(oversized) => UploadError::InvalidChunkType(oversized.to_string()),
            None => UploadError::IoFailure(e),
        }
    }
}

/// Size and parallelism of one upload call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UploadPlan {
    pub total_size: Option<u64>,
    pub chunk_size: u64,
    pub concurrency: usize,
    /// Ask the service to verify a per-chunk content hash
    pub validate_content: bool,
}

impl UploadPlan {
    pub fn new(total_size: Option<u64>, chunk_size: u64, concurrency: usize) -> Self {
        Self {
            total_size,
            chunk_size,
            concurrency,
            validate_content: false,
        }
    }

    pub fn with_validate_content(mut self, validate_content: bool) -> Self {
        self.validate_content = validate_content;
        self
    }

    pub fn validate(&self) -> Result<(), UploadError> {
        if self.chunk_size == 0 {
            return Err(UploadError::InvalidPlan("chunk_size must be > 0".into()));
        }
        if self.concurrency == 0 {
            return Err(UploadError::InvalidPlan("concurrency must be >= 1".into()));
        }
        Ok(())
    }

    /// Whether chunks are uploaded from more than one task
    pub fn is_parallel(&self) -> bool {
        self.concurrency > 1
    }
}

/// A materialized chunk: logical offset plus (possibly transformed) payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    pub offset: u64,
    pub data: Bytes,
}

/// Identifier returned by a sink for one uploaded chunk
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChunkToken {
    /// Staged block id, later committed with a block list
    BlockId(String),
    /// Uploaded file range and the service response
    Range {
        content_range: String,
        response: ResponseHeaders,
    },
}

/// A sink token together with the offset it was uploaded from
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkResult {
    pub offset: u64,
    pub token: ChunkToken,
}

/// Aggregated result of `upload_data_chunks`
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UploadOutcome {
    /// Tokens sorted by ascending offset
    Ordered(Vec<ChunkToken>),
    /// Last response observed by a sink that returns no tokens
    Merged(Option<ResponseHeaders>),
}

impl UploadOutcome {
    pub fn tokens(&self) -> &[ChunkToken] {
        match self {
            UploadOutcome::Ordered(tokens) => tokens,
            UploadOutcome::Merged(_) => &[],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plan_validation() {
        assert!(UploadPlan::new(Some(10), 4, 1).validate().is_ok());
        assert!(UploadPlan::new(None, 0, 1).validate().is_err());
        assert!(UploadPlan::new(None, 4, 0).validate().is_err());
    }

    #[test]
    fn test_plan_parallel() {
        assert!(!UploadPlan::new(None, 4, 1).is_parallel());
        assert!(UploadPlan::new(None, 4, 3).is_parallel());
    }

    #[test]
    fn test_merged_outcome_has_no_tokens() {
        let outcome = UploadOutcome::Merged(None);
        assert!(outcome.tokens().is_empty());
    }
}
