//! Upload strategy selection
//!
//! [`Uploader`] turns an [`UploadConfig`] into per-call [`UploadPlan`]s and
//! picks between buffered chunks and sub-stream windows.

use super::iter_stream::IterStreamer;
use super::progress::ProgressCallback;
use super::scheduler::{upload_data_chunks, upload_substream_blocks};
use super::sequencer::Transforms;
use super::sink::ChunkSink;
use super::substream::SeekableSource;
use super::{UploadError, UploadOutcome, UploadPlan};
use crate::config::UploadConfig;
use bytes::Bytes;
use std::io::Read;
use std::sync::Arc;

/// Configured entry point for whole-stream uploads
#[derive(Debug, Clone, Default)]
pub struct Uploader {
    config: UploadConfig,
}

impl Uploader {
    pub fn new(config: UploadConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &UploadConfig {
        &self.config
    }

    /// Plan for one upload through `sink`.
    ///
    /// Sinks whose positions depend on earlier responses always get a
    /// concurrency of 1.
    pub fn plan(&self, total_size: Option<u64>, sink: &ChunkSink) -> UploadPlan {
        let concurrency = if sink.requires_sequential() {
            1
        } else {
            self.config.max_concurrency
        };
        UploadPlan::new(total_size, self.config.chunk_size, concurrency)
            .with_validate_content(self.config.validate_content)
    }

    /// Whether a seekable source is uploaded as sub-stream windows
    pub fn uses_substreams(&self, sink: &ChunkSink) -> bool {
        sink.supports_substreams()
            && !self.config.use_byte_buffer
            && self.config.chunk_size >= self.config.min_large_chunk_upload_threshold
    }

    /// Upload a seekable source starting at its current position.
    ///
    /// Large chunks are read by the sink straight from the source; smaller
    /// ones are buffered first.
    pub async fn upload_seekable<S: SeekableSource + 'static>(
        &self,
        source: S,
        total_size: Option<u64>,
        sink: Arc<ChunkSink>,
        progress: Option<ProgressCallback>,
    ) -> Result<UploadOutcome, UploadError> {
        let plan = self.plan(total_size, &sink);

        if !self.uses_substreams(&sink) {
            return upload_data_chunks(source, plan, sink, Transforms::none(), progress).await;
        }

        tracing::debug!(
            sink = sink.name(),
            chunk_size = plan.chunk_size,
            "Using sub-stream upload"
        );
        let tokens = upload_substream_blocks(source, plan, sink.clone(), progress).await?;
        if tokens.is_empty() {
            return Ok(UploadOutcome::Merged(sink.response_headers()));
        }
        Ok(UploadOutcome::Ordered(tokens))
    }

    /// Upload any reader as buffered chunks, applying `transforms`
    pub async fn upload_reader<R: Read>(
        &self,
        source: R,
        total_size: Option<u64>,
        sink: Arc<ChunkSink>,
        transforms: Transforms,
        progress: Option<ProgressCallback>,
    ) -> Result<UploadOutcome, UploadError> {
        let plan = self.plan(total_size, &sink);
        upload_data_chunks(source, plan, sink, transforms, progress).await
    }

    /// Upload a sequence of byte pieces as one stream
    pub async fn upload_iter<P>(
        &self,
        pieces: P,
        total_size: Option<u64>,
        sink: Arc<ChunkSink>,
        progress: Option<ProgressCallback>,
    ) -> Result<UploadOutcome, UploadError>
    where
        P: IntoIterator,
        P::Item: Into<Bytes>,
    {
        let source = IterStreamer::new(pieces);
        self.upload_reader(source, total_size, sink, Transforms::none(), progress)
            .await
    }
}
