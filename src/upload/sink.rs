//! Chunk sinks
//!
//! A sink uploads one chunk through a backend service and turns the
//! response into an optional [`ChunkResult`]. Sinks are shared by every
//! in-flight task of an upload, so the only mutable state they carry is
//! access-condition and append-position bookkeeping behind a mutex that is
//! never held across an await.
//!
//! | Sink | Token | Ordering |
//! |------|-------|----------|
//! | `BlockStaging` | block id derived from the offset | sorted by offset |
//! | `PageRange` | none, all-zero chunks skipped | any |
//! | `AppendBlock` | none | strictly sequential |
//! | `AppendData` | none | positional |
//! | `FileRange` | content range + response | sorted by offset |

use super::substream::{OversizedRead, SubStream};
use super::{ChunkResult, ChunkToken, UploadError};
use crate::metrics;
use crate::service::{
    AccessConditions, AppendBlockService, AppendDataService, AppendPositionConditions,
    BlockStagingService, ChunkBody, FileRangeService, PageRangeService, RequestOptions,
    ResponseHeaders, ServiceError,
};
use base64::engine::general_purpose::STANDARD as BASE64_STANDARD;
use base64::Engine;
use bytes::Bytes;
use parking_lot::Mutex;
use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use std::io;
use std::sync::Arc;

/// Characters left unescaped when quoting a block id (`/` plus RFC 3986
/// unreserved)
const BLOCK_ID_QUOTE_SET: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'_')
    .remove(b'.')
    .remove(b'-')
    .remove(b'~')
    .remove(b'/');

/// Per-call context the scheduler hands to a sink
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkContext {
    pub total_size: Option<u64>,
    pub chunk_size: u64,
    pub parallel: bool,
    pub validate_content: bool,
    /// Progress counter value when the chunk was dispatched
    pub upload_stream_current: u64,
}

impl ChunkContext {
    fn request_options(&self, content_length: u64) -> RequestOptions {
        RequestOptions {
            content_length,
            data_stream_total: self.total_size,
            upload_stream_current: self.upload_stream_current,
            validate_content: self.validate_content,
            ..Default::default()
        }
    }
}

/// Block id for a materialized chunk: `base64(quote(base64("{offset:032}")))`.
///
/// Deterministic in the offset, so a retried chunk stages the same block.
pub fn block_id_for_offset(offset: u64) -> String {
    let index = format!("{:032}", offset);
    let encoded = BASE64_STANDARD.encode(index);
    let quoted = utf8_percent_encode(&encoded, BLOCK_ID_QUOTE_SET).to_string();
    BASE64_STANDARD.encode(quoted)
}

/// Block id for a sub-stream block: `BlockId{n:05}` where `n` is the block
/// number.
pub fn block_id_for_block(index: u64, chunk_size: u64) -> String {
    format!("BlockId{:05}", index / chunk_size)
}

/// `bytes={start}-{end}` with an inclusive end
fn content_range(offset: u64, length: u64) -> String {
    format!("bytes={}-{}", offset, offset + length.saturating_sub(1))
}

fn sink_failure(offset: u64) -> impl FnOnce(ServiceError) -> UploadError {
    move |source| {
        // A service that failed to drain a sub-stream hands the read error back.
        let oversized = source
            .downcast_ref::<io::Error>()
            .and_then(OversizedRead::find)
            .map(|e| e.to_string());
        match oversized {
            Some(message) => UploadError::InvalidChunkType(message),
            None => UploadError::SinkFailure { offset, source },
        }
    }
}

/// Block blob staging
pub struct BlockStagingSink {
    service: Arc<dyn BlockStagingService>,
}

/// Page blob range upload
pub struct PageRangeSink {
    service: Arc<dyn PageRangeService>,
    conditions: Mutex<Option<AccessConditions>>,
    response: Mutex<Option<ResponseHeaders>>,
}

/// Append blob positional append
pub struct AppendBlockSink {
    service: Arc<dyn AppendBlockService>,
    conditions: Mutex<Option<AccessConditions>>,
    append_conditions: AppendPositionConditions,
    current_length: Mutex<Option<u64>>,
    response: Mutex<Option<ResponseHeaders>>,
}

/// Data Lake file positional append
pub struct AppendDataSink {
    service: Arc<dyn AppendDataService>,
    conditions: Mutex<Option<AccessConditions>>,
    start_position: u64,
    response: Mutex<Option<ResponseHeaders>>,
}

/// File share range upload
pub struct FileRangeSink {
    service: Arc<dyn FileRangeService>,
    conditions: Mutex<Option<AccessConditions>>,
}

/// Backend-specific chunk uploader
pub enum ChunkSink {
    BlockStaging(BlockStagingSink),
    PageRange(PageRangeSink),
    AppendBlock(AppendBlockSink),
    AppendData(AppendDataSink),
    FileRange(FileRangeSink),
}

impl ChunkSink {
    /// Stage blocks of a block blob. Access conditions never apply to
    /// staging.
    pub fn block_staging(service: Arc<dyn BlockStagingService>) -> Self {
        ChunkSink::BlockStaging(BlockStagingSink { service })
    }

    pub fn page_range(
        service: Arc<dyn PageRangeService>,
        conditions: Option<AccessConditions>,
    ) -> Self {
        ChunkSink::PageRange(PageRangeSink {
            service,
            conditions: Mutex::new(conditions),
            response: Mutex::new(None),
        })
    }

    /// Append blocks to an append blob. Must run with a concurrency of 1.
    pub fn append_block(
        service: Arc<dyn AppendBlockService>,
        conditions: Option<AccessConditions>,
        append_conditions: AppendPositionConditions,
    ) -> Self {
        ChunkSink::AppendBlock(AppendBlockSink {
            service,
            conditions: Mutex::new(conditions),
            append_conditions,
            current_length: Mutex::new(None),
            response: Mutex::new(None),
        })
    }

    /// Append data to a Data Lake file, chunk offsets counted from
    /// `start_position` (0 for a freshly created file).
    pub fn append_data(
        service: Arc<dyn AppendDataService>,
        conditions: Option<AccessConditions>,
        start_position: u64,
    ) -> Self {
        ChunkSink::AppendData(AppendDataSink {
            service,
            conditions: Mutex::new(conditions),
            start_position,
            response: Mutex::new(None),
        })
    }

    pub fn file_range(
        service: Arc<dyn FileRangeService>,
        conditions: Option<AccessConditions>,
    ) -> Self {
        ChunkSink::FileRange(FileRangeSink {
            service,
            conditions: Mutex::new(conditions),
        })
    }

    pub fn name(&self) -> &'static str {
        match self {
            ChunkSink::BlockStaging(_) => "block_staging",
            ChunkSink::PageRange(_) => "page_range",
            ChunkSink::AppendBlock(_) => "append_block",
            ChunkSink::AppendData(_) => "append_data",
            ChunkSink::FileRange(_) => "file_range",
        }
    }

    /// Whether the sink can upload [`SubStream`] windows directly
    pub fn supports_substreams(&self) -> bool {
        matches!(
            self,
            ChunkSink::BlockStaging(_) | ChunkSink::AppendData(_) | ChunkSink::FileRange(_)
        )
    }

    /// Whether chunk positions depend on earlier responses
    pub fn requires_sequential(&self) -> bool {
        matches!(self, ChunkSink::AppendBlock(_))
    }

    fn conditions(&self) -> Option<&Mutex<Option<AccessConditions>>> {
        match self {
            ChunkSink::BlockStaging(_) => None,
            ChunkSink::PageRange(sink) => Some(&sink.conditions),
            ChunkSink::AppendBlock(sink) => Some(&sink.conditions),
            ChunkSink::AppendData(sink) => Some(&sink.conditions),
            ChunkSink::FileRange(sink) => Some(&sink.conditions),
        }
    }

    /// Drop access conditions. Conditional headers race against
    /// out-of-order completion, so parallel uploads never send them.
    pub fn disable_access_conditions(&self) {
        if let Some(conditions) = self.conditions() {
            if conditions.lock().take().is_some() {
                tracing::debug!(sink = self.name(), "Access conditions disabled for parallel upload");
            }
        }
    }

    /// Access conditions the next call would send
    pub fn access_conditions(&self) -> Option<AccessConditions> {
        self.conditions().and_then(|c| c.lock().clone())
    }

    /// Last response observed by sinks that return no tokens
    pub fn response_headers(&self) -> Option<ResponseHeaders> {
        match self {
            ChunkSink::PageRange(sink) => sink.response.lock().clone(),
            ChunkSink::AppendBlock(sink) => sink.response.lock().clone(),
            ChunkSink::AppendData(sink) => sink.response.lock().clone(),
            ChunkSink::BlockStaging(_) | ChunkSink::FileRange(_) => None,
        }
    }

    /// Append offset seeded by the first append, if any
    pub fn current_length(&self) -> Option<u64> {
        match self {
            ChunkSink::AppendBlock(sink) => *sink.current_length.lock(),
            _ => None,
        }
    }

    /// Upload one materialized chunk
    #[tracing::instrument(
        name = "upload.chunk",
        skip(self, data, cx),
        fields(
            sink = self.name(),
            chunk.offset = offset,
            chunk.bytes = data.len()
        ),
        err
    )]
    pub async fn upload_chunk(
        &self,
        offset: u64,
        data: Bytes,
        cx: &ChunkContext,
    ) -> Result<Option<ChunkResult>, UploadError> {
        let length = data.len() as u64;
        let mut options = cx.request_options(length);

        match self {
            ChunkSink::BlockStaging(sink) => {
                let block_id = block_id_for_offset(offset);
                sink.service
                    .stage_block(block_id.clone(), ChunkBody::Bytes(data), options)
                    .await
                    .map_err(sink_failure(offset))?;
                Ok(Some(ChunkResult {
                    offset,
                    token: ChunkToken::BlockId(block_id),
                }))
            }
            ChunkSink::PageRange(sink) => {
                // Pages are zero-initialized, so empty pages need no upload.
                if data.iter().all(|b| *b == 0) {
                    tracing::debug!(offset = offset, bytes = length, "Skipping empty pages");
                    metrics::record_sparse_skip(length);
                    return Ok(None);
                }

                options.access_conditions = sink.conditions.lock().clone();
                let response = sink
                    .service
                    .upload_pages(ChunkBody::Bytes(data), content_range(offset, length), options)
                    .await
                    .map_err(sink_failure(offset))?;

                if !cx.parallel {
                    if let Some(conditions) = sink.conditions.lock().as_mut() {
                        conditions.if_match = response.etag.clone();
                    }
                }
                *sink.response.lock() = Some(response);
                Ok(None)
            }
            ChunkSink::AppendBlock(sink) => {
                let current_length = *sink.current_length.lock();
                let mut append_conditions = sink.append_conditions.clone();
                if let Some(current_length) = current_length {
                    append_conditions.append_position = Some(current_length + offset);
                }
                options.access_conditions = sink.conditions.lock().clone();
                options.append_conditions = Some(append_conditions);

                let response = sink
                    .service
                    .append_block(ChunkBody::Bytes(data), options)
                    .await
                    .map_err(sink_failure(offset))?;

                if current_length.is_none() {
                    let seeded = response.blob_append_offset.ok_or_else(|| {
                        sink_failure(offset)("append response is missing the append offset".into())
                    })?;
                    tracing::debug!(append_offset = seeded, "Seeded append position");
                    *sink.current_length.lock() = Some(seeded);
                }
                *sink.response.lock() = Some(response);
                Ok(None)
            }
            ChunkSink::AppendData(sink) => {
                options.access_conditions = sink.conditions.lock().clone();
                let response = sink
                    .service
                    .append_data(
                        ChunkBody::Bytes(data),
                        sink.start_position + offset,
                        options,
                    )
                    .await
                    .map_err(sink_failure(offset))?;

                if !cx.parallel {
                    if let Some(conditions) = sink.conditions.lock().as_mut() {
                        conditions.if_match = response.etag.clone();
                    }
                }
                *sink.response.lock() = Some(response);
                Ok(None)
            }
            ChunkSink::FileRange(sink) => {
                options.access_conditions = sink.conditions.lock().clone();
                let response = sink
                    .service
                    .upload_range(ChunkBody::Bytes(data), offset, length, options)
                    .await
                    .map_err(sink_failure(offset))?;
                Ok(Some(ChunkResult {
                    offset,
                    token: ChunkToken::Range {
                        content_range: content_range(offset, length),
                        response,
                    },
                }))
            }
        }
    }

    /// Upload one sub-stream window starting at logical offset `index`
    #[tracing::instrument(
        name = "upload.substream_block",
        skip(self, stream, cx),
        fields(
            sink = self.name(),
            chunk.offset = index,
            chunk.bytes = stream.len()
        ),
        err
    )]
    pub async fn upload_substream(
        &self,
        index: u64,
        stream: SubStream,
        cx: &ChunkContext,
    ) -> Result<Option<ChunkResult>, UploadError> {
        let length = stream.len();
        let mut options = cx.request_options(length);

        match self {
            ChunkSink::BlockStaging(sink) => {
                let block_id = block_id_for_block(index, cx.chunk_size);
                sink.service
                    .stage_block(block_id.clone(), ChunkBody::Stream(stream), options)
                    .await
                    .map_err(sink_failure(index))?;
                Ok(Some(ChunkResult {
                    offset: index,
                    token: ChunkToken::BlockId(block_id),
                }))
            }
            ChunkSink::AppendData(sink) => {
                options.access_conditions = sink.conditions.lock().clone();
                let response = sink
                    .service
                    .append_data(
                        ChunkBody::Stream(stream),
                        sink.start_position + index,
                        options,
                    )
                    .await
                    .map_err(sink_failure(index))?;
                *sink.response.lock() = Some(response);
                Ok(None)
            }
            ChunkSink::FileRange(sink) => {
                options.access_conditions = sink.conditions.lock().clone();
                let response = sink
                    .service
                    .upload_range(ChunkBody::Stream(stream), index, length, options)
                    .await
                    .map_err(sink_failure(index))?;
                Ok(Some(ChunkResult {
                    offset: index,
                    token: ChunkToken::Range {
                        content_range: content_range(index, length),
                        response,
                    },
                }))
            }
            ChunkSink::PageRange(_) | ChunkSink::AppendBlock(_) => Err(UploadError::UnsupportedMode {
                sink: self.name(),
                mode: "sub-stream",
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_block_id_matches_service_encoding() {
        assert_eq!(
            block_id_for_offset(0),
            "TURBd01EQXdNREF3TURBd01EQXdNREF3TURBd01EQXdNREF3TURBd01EQSUzRA=="
        );
        assert_eq!(
            block_id_for_offset(4194304),
            "TURBd01EQXdNREF3TURBd01EQXdNREF3TURBd01EQXdNRFF4T1RRek1EUSUzRA=="
        );
    }

    #[test]
    fn test_block_id_is_deterministic() {
        assert_eq!(block_id_for_offset(8388608), block_id_for_offset(8388608));
        assert_ne!(block_id_for_offset(0), block_id_for_offset(1));
    }

    #[test]
    fn test_substream_block_id() {
        assert_eq!(block_id_for_block(0, 4), "BlockId00000");
        assert_eq!(block_id_for_block(12, 4), "BlockId00003");
    }

    #[test]
    fn test_content_range_is_inclusive() {
        assert_eq!(content_range(0, 512), "bytes=0-511");
        assert_eq!(content_range(4096, 1), "bytes=4096-4096");
    }
}
