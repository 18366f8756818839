//! Storage service contracts
//!
//! The chunk engine never talks to a storage service directly. Each backend
//! operation (`stage_block`, `upload_pages`, `append_block`, `append_data`,
//! `upload_range`) is an async trait implemented by the caller's generated
//! client, and the engine only relies on the contract described here.
//!
//! # Example
//!
//! ```no_run
//! use async_trait::async_trait;
//! use chunk_uploadr::service::{BlockStagingService, ChunkBody, RequestOptions, ServiceError};
//!
//! struct MyBlobClient;
//!
//! #[async_trait]
//! impl BlockStagingService for MyBlobClient {
//!     async fn stage_block(
//!         &self,
//!         block_id: String,
//!         body: ChunkBody,
//!         options: RequestOptions,
//!     ) -> Result<(), ServiceError> {
//!         // PUT ?comp=block&blockid=...
//!         let _ = (block_id, body.into_bytes()?, options);
//!         Ok(())
//!     }
//! }
//! ```

use crate::upload::substream::SubStream;
use async_trait::async_trait;
use bytes::Bytes;
use std::collections::BTreeMap;
use std::io::{self, Read, Seek, SeekFrom};

pub mod local;

/// Error returned by a backend operation.
pub type ServiceError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Payload of a single chunk upload.
#[derive(Debug)]
pub enum ChunkBody {
    /// A materialized chunk held in memory
    Bytes(Bytes),
    /// A bounded window over the shared source stream
    Stream(SubStream),
}

impl ChunkBody {
    /// Number of bytes the body will produce
    pub fn len(&self) -> u64 {
        match self {
            ChunkBody::Bytes(data) => data.len() as u64,
            ChunkBody::Stream(stream) => stream.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Read the whole body into memory.
    ///
    /// Sub-stream bodies are rewound first so a retried call sends the
    /// window from its start.
    pub fn into_bytes(self) -> io::Result<Bytes> {
        match self {
            ChunkBody::Bytes(data) => Ok(data),
            ChunkBody::Stream(mut stream) => {
                stream.seek(SeekFrom::Start(0))?;
                let mut buf = Vec::with_capacity(stream.len() as usize);
                stream.read_to_end(&mut buf)?;
                Ok(Bytes::from(buf))
            }
        }
    }
}

/// Optimistic-concurrency headers (`If-Match` and friends).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AccessConditions {
    pub if_match: Option<String>,
    pub if_none_match: Option<String>,
    pub if_modified_since: Option<String>,
    pub if_unmodified_since: Option<String>,
}

/// Append blob position conditions (`x-ms-blob-condition-appendpos`).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AppendPositionConditions {
    pub append_position: Option<u64>,
    pub max_size: Option<u64>,
}

/// Per-call options handed to every backend operation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestOptions {
    pub content_length: u64,
    /// Total size of the upload, when known
    pub data_stream_total: Option<u64>,
    /// Bytes already reported as transferred when the call was issued
    pub upload_stream_current: u64,
    pub validate_content: bool,
    pub access_conditions: Option<AccessConditions>,
    pub append_conditions: Option<AppendPositionConditions>,
}

/// Response headers returned by a backend operation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResponseHeaders {
    pub etag: Option<String>,
    pub last_modified: Option<String>,
    /// Offset at which an append landed (`x-ms-blob-append-offset`)
    pub blob_append_offset: Option<u64>,
    pub extra: BTreeMap<String, String>,
}

impl ResponseHeaders {
    pub fn with_etag(etag: impl Into<String>) -> Self {
        Self {
            etag: Some(etag.into()),
            ..Default::default()
        }
    }
}

/// Block blob `Put Block`.
#[async_trait]
pub trait BlockStagingService: Send + Sync {
    async fn stage_block(
        &self,
        block_id: String,
        body: ChunkBody,
        options: RequestOptions,
    ) -> Result<(), ServiceError>;
}

/// Page blob `Put Page`. `range` is formatted as `bytes={start}-{end}`.
#[async_trait]
pub trait PageRangeService: Send + Sync {
    async fn upload_pages(
        &self,
        body: ChunkBody,
        range: String,
        options: RequestOptions,
    ) -> Result<ResponseHeaders, ServiceError>;
}

/// Append blob `Append Block`.
#[async_trait]
pub trait AppendBlockService: Send + Sync {
    async fn append_block(
        &self,
        body: ChunkBody,
        options: RequestOptions,
    ) -> Result<ResponseHeaders, ServiceError>;
}

/// Data Lake `Append Data` at an explicit position.
#[async_trait]
pub trait AppendDataService: Send + Sync {
    async fn append_data(
        &self,
        body: ChunkBody,
        position: u64,
        options: RequestOptions,
    ) -> Result<ResponseHeaders, ServiceError>;
}

/// File share `Put Range`.
#[async_trait]
pub trait FileRangeService: Send + Sync {
    async fn upload_range(
        &self,
        body: ChunkBody,
        offset: u64,
        length: u64,
        options: RequestOptions,
    ) -> Result<ResponseHeaders, ServiceError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bytes_body_len() {
        let body = ChunkBody::Bytes(Bytes::from_static(b"hello"));
        assert_eq!(body.len(), 5);
        assert!(!body.is_empty());
        assert_eq!(body.into_bytes().unwrap(), Bytes::from_static(b"hello"));
    }

    #[test]
    fn test_response_headers_with_etag() {
        let headers = ResponseHeaders::with_etag("\"0x1\"");
        assert_eq!(headers.etag.as_deref(), Some("\"0x1\""));
        assert!(headers.blob_append_offset.is_none());
    }
}
