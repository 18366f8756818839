//! Shared recording fakes for the service contracts

#![allow(dead_code)]

use async_trait::async_trait;
use bytes::Bytes;
use chunk_uploadr::service::{
    AppendBlockService, AppendDataService, BlockStagingService, ChunkBody, FileRangeService,
    PageRangeService, RequestOptions, ResponseHeaders, ServiceError,
};
use parking_lot::Mutex;
use rand::Rng;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

pub const MIB: u64 = 1024 * 1024;

/// Deterministic, non-zero test payload
pub fn payload(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8 + 1).collect()
}

/// Tracks how many calls are running at once
#[derive(Default)]
pub struct InFlight {
    current: AtomicUsize,
    max: AtomicUsize,
    started: AtomicUsize,
    finished: AtomicUsize,
}

impl InFlight {
    /// Returns the 0-based index of the call
    pub fn enter(&self) -> usize {
        let call = self.started.fetch_add(1, Ordering::SeqCst);
        let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
        self.max.fetch_max(now, Ordering::SeqCst);
        call
    }

    pub fn exit(&self) {
        self.current.fetch_sub(1, Ordering::SeqCst);
        self.finished.fetch_add(1, Ordering::SeqCst);
    }

    pub fn max(&self) -> usize {
        self.max.load(Ordering::SeqCst)
    }

    pub fn started(&self) -> usize {
        self.started.load(Ordering::SeqCst)
    }

    pub fn finished(&self) -> usize {
        self.finished.load(Ordering::SeqCst)
    }
}

/// Random delay up to `max_ms`, to shuffle completion order
pub async fn jitter(max_ms: u64) {
    if max_ms == 0 {
        return;
    }
    let ms = rand::rng().random_range(0..=max_ms);
    tokio::time::sleep(Duration::from_millis(ms)).await;
}

/// Block staging fake: records every staged block
#[derive(Default)]
pub struct RecordingBlocks {
    pub staged: Mutex<Vec<(String, Bytes, RequestOptions)>>,
    pub in_flight: InFlight,
    pub jitter_ms: u64,
    /// Fail the n-th call (0-based) after it has run
    pub fail_at_call: Option<usize>,
}

impl RecordingBlocks {
    pub fn with_jitter(jitter_ms: u64) -> Arc<Self> {
        Arc::new(Self {
            jitter_ms,
            ..Default::default()
        })
    }

    pub fn block_ids(&self) -> Vec<String> {
        self.staged.lock().iter().map(|(id, _, _)| id.clone()).collect()
    }
}

#[async_trait]
impl BlockStagingService for RecordingBlocks {
    async fn stage_block(
        &self,
        block_id: String,
        body: ChunkBody,
        options: RequestOptions,
    ) -> Result<(), ServiceError> {
        let call = self.in_flight.enter();
        let data = body.into_bytes();
        jitter(self.jitter_ms).await;
        self.in_flight.exit();

        if self.fail_at_call == Some(call) {
            return Err(format!("injected failure for block {}", block_id).into());
        }
        self.staged.lock().push((block_id, data?, options));
        Ok(())
    }
}

/// Page range fake: records ranges and answers with a fresh ETag per call
#[derive(Default)]
pub struct RecordingPages {
    pub calls: Mutex<Vec<(String, Bytes, RequestOptions)>>,
    pub in_flight: InFlight,
    pub jitter_ms: u64,
}

#[async_trait]
impl PageRangeService for RecordingPages {
    async fn upload_pages(
        &self,
        body: ChunkBody,
        range: String,
        options: RequestOptions,
    ) -> Result<ResponseHeaders, ServiceError> {
        self.in_flight.enter();
        let data = body.into_bytes();
        jitter(self.jitter_ms).await;
        self.in_flight.exit();

        let mut calls = self.calls.lock();
        calls.push((range, data?, options));
        Ok(ResponseHeaders::with_etag(format!("\"etag-{}\"", calls.len())))
    }
}

/// Append blob fake whose blob already holds `existing` bytes
pub struct RecordingAppends {
    pub existing: u64,
    pub calls: Mutex<Vec<(Bytes, RequestOptions)>>,
}

impl RecordingAppends {
    pub fn new(existing: u64) -> Arc<Self> {
        Arc::new(Self {
            existing,
            calls: Mutex::new(Vec::new()),
        })
    }

    pub fn positions(&self) -> Vec<Option<u64>> {
        self.calls
            .lock()
            .iter()
            .map(|(_, o)| o.append_conditions.as_ref().and_then(|c| c.append_position))
            .collect()
    }
}

#[async_trait]
impl AppendBlockService for RecordingAppends {
    async fn append_block(
        &self,
        body: ChunkBody,
        options: RequestOptions,
    ) -> Result<ResponseHeaders, ServiceError> {
        let data = body.into_bytes()?;
        let mut calls = self.calls.lock();
        let landed = self.existing + calls.iter().map(|(d, _)| d.len() as u64).sum::<u64>();
        calls.push((data, options));
        Ok(ResponseHeaders {
            etag: Some(format!("\"append-{}\"", calls.len())),
            blob_append_offset: Some(landed),
            ..Default::default()
        })
    }
}

/// Data Lake fake: records each append position
#[derive(Default)]
pub struct RecordingDataLake {
    pub calls: Mutex<Vec<(u64, Bytes, RequestOptions)>>,
    pub jitter_ms: u64,
}

#[async_trait]
impl AppendDataService for RecordingDataLake {
    async fn append_data(
        &self,
        body: ChunkBody,
        position: u64,
        options: RequestOptions,
    ) -> Result<ResponseHeaders, ServiceError> {
        let data = body.into_bytes();
        jitter(self.jitter_ms).await;
        let mut calls = self.calls.lock();
        calls.push((position, data?, options));
        Ok(ResponseHeaders::with_etag(format!("\"dl-{}\"", calls.len())))
    }
}

/// File range fake: records every range
#[derive(Default)]
pub struct RecordingRanges {
    pub calls: Mutex<Vec<(u64, u64, Bytes)>>,
    pub in_flight: InFlight,
    pub jitter_ms: u64,
}

#[async_trait]
impl FileRangeService for RecordingRanges {
    async fn upload_range(
        &self,
        body: ChunkBody,
        offset: u64,
        length: u64,
        _options: RequestOptions,
    ) -> Result<ResponseHeaders, ServiceError> {
        self.in_flight.enter();
        let data = body.into_bytes();
        jitter(self.jitter_ms).await;
        self.in_flight.exit();

        self.calls.lock().push((offset, length, data?));
        Ok(ResponseHeaders::with_etag(format!("\"range-{}\"", offset)))
    }
}
