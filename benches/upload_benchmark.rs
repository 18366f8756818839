//! Upload benchmarks

use async_trait::async_trait;
use chunk_uploadr::service::{BlockStagingService, ChunkBody, RequestOptions, ServiceError};
use chunk_uploadr::upload::sink::block_id_for_offset;
use chunk_uploadr::upload::{
    upload_data_chunks, upload_substream_blocks, ChunkSink, DataChunks, Transforms, UploadPlan,
};
use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use std::io::Cursor;
use std::sync::Arc;

const CHUNK_SIZE: u64 = 64 * 1024;

/// Accepts every block after reading its body
struct DiscardBlocks;

#[async_trait]
impl BlockStagingService for DiscardBlocks {
    async fn stage_block(
        &self,
        _block_id: String,
        body: ChunkBody,
        _options: RequestOptions,
    ) -> Result<(), ServiceError> {
        black_box(body.into_bytes()?);
        Ok(())
    }
}

fn benchmark_chunking(c: &mut Criterion) {
    let mut group = c.benchmark_group("chunking");

    for size in [1024 * 1024, 8 * 1024 * 1024].iter() {
        let data = vec![1u8; *size];
        group.throughput(Throughput::Bytes(*size as u64));
        group.bench_with_input(format!("{}_bytes", size), &data, |b, data| {
            b.iter(|| {
                let chunks = DataChunks::new(
                    Cursor::new(data.as_slice()),
                    Some(data.len() as u64),
                    CHUNK_SIZE,
                    Transforms::none(),
                );
                black_box(chunks.count());
            });
        });
    }

    group.finish();
}

fn benchmark_block_ids(c: &mut Criterion) {
    c.bench_function("block_id_for_offset", |b| {
        let mut offset = 0u64;
        b.iter(|| {
            offset += CHUNK_SIZE;
            black_box(block_id_for_offset(offset));
        });
    });
}

fn benchmark_uploads(c: &mut Criterion) {
    let runtime = tokio::runtime::Runtime::new().unwrap();
    let size = 8 * 1024 * 1024;
    let data = vec![1u8; size];
    let mut group = c.benchmark_group("upload");
    group.throughput(Throughput::Bytes(size as u64));

    for concurrency in [1usize, 4] {
        group.bench_function(format!("data_chunks_x{}", concurrency), |b| {
            b.to_async(&runtime).iter(|| async {
                let sink = Arc::new(ChunkSink::block_staging(Arc::new(DiscardBlocks)));
                upload_data_chunks(
                    Cursor::new(data.as_slice()),
                    UploadPlan::new(Some(size as u64), CHUNK_SIZE, concurrency),
                    sink,
                    Transforms::none(),
                    None,
                )
                .await
                .unwrap()
            });
        });

        group.bench_function(format!("substream_blocks_x{}", concurrency), |b| {
            b.to_async(&runtime).iter(|| async {
                let sink = Arc::new(ChunkSink::block_staging(Arc::new(DiscardBlocks)));
                upload_substream_blocks(
                    Cursor::new(data.clone()),
                    UploadPlan::new(Some(size as u64), CHUNK_SIZE, concurrency),
                    sink,
                    None,
                )
                .await
                .unwrap()
            });
        });
    }

    group.finish();
}

criterion_group!(benches, benchmark_chunking, benchmark_block_ids, benchmark_uploads);
criterion_main!(benches);
