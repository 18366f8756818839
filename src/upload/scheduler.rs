//! Concurrency scheduler
//!
//! Drives a chunk sequence through a [`ChunkSink`].
//!
//! # Design
//!
//! - `concurrency == 1`: chunks are read and uploaded one after another in
//!   the calling task; nothing is spawned.
//! - `concurrency > 1`: each chunk runs in its own spawned task, and a
//!   [`FuturesUnordered`] of their handles holds at most `concurrency` of
//!   them. Every completed task frees exactly one slot, which is refilled
//!   from the sequence right away, so the set stays full until the sequence
//!   runs dry and is then drained.
//! - The first error stops submission. Tasks already running are drained
//!   (not aborted) and the first error is returned.
//! - Results are re-sorted by offset; completion order never leaks out.

use super::progress::{ProgressCallback, ProgressTracker};
use super::sequencer::{DataChunks, SubStreamBlocks, Transforms};
use super::sink::{ChunkContext, ChunkSink};
use super::substream::{shared_source, SeekableSource, SourceAccess, SubStream};
use super::{Chunk, ChunkResult, ChunkToken, UploadError, UploadOutcome, UploadPlan};
use crate::metrics;
use futures::stream::{FuturesUnordered, StreamExt};
use std::io::Read;
use std::sync::Arc;
use std::time::Instant;

/// One unit of work handed to a chunk task
enum Work {
    Data(Chunk),
    Block(u64, SubStream),
}

impl From<Chunk> for Work {
    fn from(chunk: Chunk) -> Self {
        Work::Data(chunk)
    }
}

impl From<(u64, SubStream)> for Work {
    fn from((index, stream): (u64, SubStream)) -> Self {
        Work::Block(index, stream)
    }
}

/// Upload materialized chunks read from `source`.
///
/// Returns the sink tokens ordered by offset, or the last response headers
/// for sinks that return no tokens (page, append).
#[tracing::instrument(
    name = "upload.data_chunks",
    skip(source, plan, sink, transforms, progress),
    fields(
        sink = sink.name(),
        upload.total_size = ?plan.total_size,
        upload.chunk_size = plan.chunk_size,
        upload.concurrency = plan.concurrency
    ),
    err
)]
pub async fn upload_data_chunks<R: Read>(
    source: R,
    plan: UploadPlan,
    sink: Arc<ChunkSink>,
    transforms: Transforms,
    progress: Option<ProgressCallback>,
) -> Result<UploadOutcome, UploadError> {
    plan.validate()?;
    prepare_sink(&sink, &plan);

    let tracker = Arc::new(ProgressTracker::new(plan.total_size, progress));
    let chunks = DataChunks::new(source, plan.total_size, plan.chunk_size, transforms);
    let outcome = run(chunks.map(|c| c.map(Work::from)), &plan, &sink, &tracker).await;
    metrics::record_upload(
        "chunks",
        outcome.as_ref().map_or(0, |r| r.len()),
        outcome.is_ok(),
    );
    let mut results = outcome?;

    tracing::info!(
        bytes = tracker.transferred(),
        tokens = results.len(),
        "Chunk upload completed"
    );

    if results.is_empty() {
        return Ok(UploadOutcome::Merged(sink.response_headers()));
    }
    Ok(UploadOutcome::Ordered(into_ordered_tokens(&mut results)))
}

/// Upload `source` as sub-stream windows read directly by the sink.
///
/// `source` must be seekable; its current position is the start of the
/// upload. Returns the sink tokens ordered by offset, empty when the sink
/// produces none.
#[tracing::instrument(
    name = "upload.substream_blocks",
    skip(source, plan, sink, progress),
    fields(
        sink = sink.name(),
        upload.total_size = ?plan.total_size,
        upload.chunk_size = plan.chunk_size,
        upload.concurrency = plan.concurrency
    ),
    err
)]
pub async fn upload_substream_blocks<S: SeekableSource + 'static>(
    source: S,
    plan: UploadPlan,
    sink: Arc<ChunkSink>,
    progress: Option<ProgressCallback>,
) -> Result<Vec<ChunkToken>, UploadError> {
    plan.validate()?;
    if !sink.supports_substreams() {
        return Err(UploadError::UnsupportedMode {
            sink: sink.name(),
            mode: "sub-stream",
        });
    }
    prepare_sink(&sink, &plan);

    let access = if plan.is_parallel() {
        SourceAccess::Locked
    } else {
        SourceAccess::Exclusive
    };
    let blocks =
        SubStreamBlocks::new(shared_source(source), plan.total_size, plan.chunk_size, access)?;
    let plan = UploadPlan {
        total_size: Some(blocks.total_size()),
        ..plan
    };
    let tracker = Arc::new(ProgressTracker::new(plan.total_size, progress));

    let outcome = run(blocks.map(|b| b.map(Work::from)), &plan, &sink, &tracker).await;
    metrics::record_upload(
        "substream",
        outcome.as_ref().map_or(0, |r| r.len()),
        outcome.is_ok(),
    );
    let mut results = outcome?;

    tracing::info!(
        bytes = tracker.transferred(),
        tokens = results.len(),
        "Sub-stream upload completed"
    );
    Ok(into_ordered_tokens(&mut results))
}

fn prepare_sink(sink: &ChunkSink, plan: &UploadPlan) {
    if plan.is_parallel() {
        sink.disable_access_conditions();
        if sink.requires_sequential() {
            tracing::warn!(
                sink = sink.name(),
                concurrency = plan.concurrency,
                "Sink appends positionally and is not safe for parallel upload"
            );
        }
    }
}

fn into_ordered_tokens(results: &mut Vec<ChunkResult>) -> Vec<ChunkToken> {
    results.sort_by_key(|r| r.offset);
    results.drain(..).map(|r| r.token).collect()
}

/// Feed `items` through the sink, sequentially or with bounded parallelism.
async fn run<I>(
    items: I,
    plan: &UploadPlan,
    sink: &Arc<ChunkSink>,
    tracker: &Arc<ProgressTracker>,
) -> Result<Vec<ChunkResult>, UploadError>
where
    I: Iterator<Item = Result<Work, UploadError>>,
{
    let cx = ChunkContext {
        total_size: plan.total_size,
        chunk_size: plan.chunk_size,
        parallel: plan.is_parallel(),
        validate_content: plan.validate_content,
        upload_stream_current: 0,
    };
    let mut results = Vec::new();

    if !plan.is_parallel() {
        for item in items {
            if let Some(result) = process(sink.clone(), tracker.clone(), cx, item?).await? {
                results.push(result);
            }
        }
        return Ok(results);
    }

    let mut items = items.fuse();
    let mut in_flight = FuturesUnordered::new();
    let mut first_error: Option<UploadError> = None;

    for item in items.by_ref().take(plan.concurrency) {
        match item {
            Ok(work) => {
                in_flight.push(tokio::spawn(process(sink.clone(), tracker.clone(), cx, work)));
            }
            Err(e) => {
                first_error = Some(e);
                break;
            }
        }
    }

    // Wait for any task to finish, then refill its slot.
    while let Some(joined) = in_flight.next().await {
        let outcome = joined
            .map_err(|e| UploadError::TaskFailed(e.to_string()))
            .and_then(|r| r);

        match outcome {
            Ok(Some(result)) => results.push(result),
            Ok(None) => {}
            Err(e) if first_error.is_none() => {
                tracing::warn!(
                    error = %e,
                    in_flight = in_flight.len(),
                    "Chunk failed, draining in-flight uploads"
                );
                first_error = Some(e);
            }
            Err(e) => {
                tracing::debug!(error = %e, "Additional chunk failure while draining");
            }
        }

        if first_error.is_none() {
            match items.next() {
                Some(Ok(work)) => {
                    in_flight.push(tokio::spawn(process(sink.clone(), tracker.clone(), cx, work)));
                }
                Some(Err(e)) => first_error = Some(e),
                None => {}
            }
        }
    }

    match first_error {
        Some(e) => Err(e),
        None => Ok(results),
    }
}

/// Upload one chunk and account for it
async fn process(
    sink: Arc<ChunkSink>,
    tracker: Arc<ProgressTracker>,
    cx: ChunkContext,
    work: Work,
) -> Result<Option<ChunkResult>, UploadError> {
    let cx = ChunkContext {
        upload_stream_current: tracker.transferred(),
        ..cx
    };
    let started = Instant::now();
    let in_flight = metrics::InFlightGuard::enter(&metrics::CHUNKS_IN_FLIGHT);

    let (length, result) = match work {
        Work::Data(chunk) => {
            let length = chunk.data.len() as u64;
            (length, sink.upload_chunk(chunk.offset, chunk.data, &cx).await)
        }
        Work::Block(index, stream) => {
            let length = stream.len();
            (length, sink.upload_substream(index, stream, &cx).await)
        }
    };

    drop(in_flight);
    match &result {
        Ok(_) => {
            tracker.add(length);
            metrics::record_chunk_success(sink.name(), length, started.elapsed().as_secs_f64());
        }
        Err(_) => metrics::record_chunk_failure(sink.name()),
    }
    result
}
