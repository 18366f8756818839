//! Chunk sequencing
//!
//! Turns a source stream into the ordered sequence of work items fed to the
//! scheduler, in one of two modes:
//!
//! - [`DataChunks`]: reads fixed-size buffers into memory, running the
//!   optional padding and encryption hooks at chunk boundaries. Works on any
//!   [`Read`] source, including ones of unknown length.
//! - [`SubStreamBlocks`]: computes chunk boundaries up front and hands out
//!   [`SubStream`] windows without reading. Needs a seekable source.

use super::substream::{OversizedRead, SharedSource, SourceAccess, SubStream, MAX_READ_BUFFER_SIZE};
use super::{Chunk, UploadError};
use bytes::Bytes;
use std::io::{self, Read, Seek, SeekFrom};

/// Opaque per-chunk transform, e.g. a block cipher or its padder.
pub trait ChunkTransform: Send {
    /// Transform a full chunk
    fn update(&mut self, data: &[u8]) -> Result<Vec<u8>, UploadError>;

    /// Flush whatever the transform still holds. Called once, after the
    /// `update` of the terminal chunk.
    fn finalize(&mut self) -> Result<Vec<u8>, UploadError>;
}

/// Transforms applied to materialized chunks, padder first
#[derive(Default)]
pub struct Transforms {
    pub padder: Option<Box<dyn ChunkTransform>>,
    pub encryptor: Option<Box<dyn ChunkTransform>>,
}

impl Transforms {
    pub fn none() -> Self {
        Self::default()
    }

    fn apply(&mut self, data: Vec<u8>, terminal: bool) -> Result<Vec<u8>, UploadError> {
        let mut data = data;
        for transform in [self.padder.as_mut(), self.encryptor.as_mut()]
            .into_iter()
            .flatten()
        {
            let mut out = transform.update(&data)?;
            if terminal {
                out.extend(transform.finalize()?);
            }
            data = out;
        }
        Ok(data)
    }
}

/// Size of the first read buffer of a chunk; it doubles up to the chunk size.
const INITIAL_READ_BUFFER_SIZE: usize = MAX_READ_BUFFER_SIZE as usize;

/// Materialized chunks read from a [`Read`] source
pub struct DataChunks<R> {
    source: R,
    chunk_size: usize,
    total_size: Option<u64>,
    transforms: Transforms,
    offset: u64,
    finished: bool,
}

impl<R: Read> DataChunks<R> {
    pub fn new(source: R, total_size: Option<u64>, chunk_size: u64, transforms: Transforms) -> Self {
        Self {
            source,
            chunk_size: chunk_size as usize,
            total_size,
            transforms,
            offset: 0,
            finished: false,
        }
    }

    fn next_chunk(&mut self) -> Result<Option<Chunk>, UploadError> {
        let limit = match self.total_size {
            Some(total) => {
                let remaining = total.saturating_sub(self.offset);
                self.chunk_size.min(usize::try_from(remaining).unwrap_or(usize::MAX))
            }
            None => self.chunk_size,
        };
        let mut data = vec![0u8; limit.min(INITIAL_READ_BUFFER_SIZE)];
        let mut len = 0;

        // Buffer until we either reach the end of the stream or get a whole chunk.
        while len < limit {
            if len == data.len() {
                let grow = len.min(limit - len);
                data.resize(len + grow, 0);
            }
            let read_size = data.len() - len;

            let n = match self.source.read(&mut data[len..]) {
                Ok(n) => n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            };
            if n > read_size {
                return Err(UploadError::InvalidChunkType(
                    OversizedRead {
                        reported: n,
                        requested: read_size,
                    }
                    .to_string(),
                ));
            }
            if n == 0 {
                break;
            }
            len += n;
        }

        data.truncate(len);
        let terminal = len < self.chunk_size;
        let payload = self.transforms.apply(data, terminal)?;

        if terminal {
            self.finished = true;
            if payload.is_empty() {
                return Ok(None);
            }
        }

        let chunk = Chunk {
            offset: self.offset,
            data: Bytes::from(payload),
        };
        // Offsets track plaintext positions, not transformed lengths.
        self.offset += len as u64;
        Ok(Some(chunk))
    }
}

impl<R: Read> Iterator for DataChunks<R> {
    type Item = Result<Chunk, UploadError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }
        match self.next_chunk() {
            Ok(chunk) => chunk.map(Ok),
            Err(e) => {
                self.finished = true;
                Some(Err(e))
            }
        }
    }
}

/// Sub-stream windows over a shared seekable source
pub struct SubStreamBlocks {
    source: SharedSource,
    access: SourceAccess,
    base: u64,
    chunk_size: u64,
    total_size: u64,
    blocks: u64,
    last_block_size: u64,
    next_block: u64,
}

impl SubStreamBlocks {
    /// Plan the windows for `total_size` bytes starting at the source's
    /// current position.
    ///
    /// An unknown `total_size` is probed by seeking to the end of the
    /// source; if that fails the upload needs [`DataChunks`] instead.
    pub fn new(
        source: SharedSource,
        total_size: Option<u64>,
        chunk_size: u64,
        access: SourceAccess,
    ) -> Result<Self, UploadError> {
        let (base, total) = {
            let mut stream = source.lock();
            let base = stream
                .stream_position()
                .map_err(UploadError::StreamNotSeekable)?;
            let total = match total_size {
                Some(total) => total,
                None => probe_length(&mut **stream, base).ok_or(UploadError::LengthRequired)?,
            };
            (base, total)
        };

        let blocks = total.div_ceil(chunk_size);
        let last_block_size = match total % chunk_size {
            0 => chunk_size,
            rest => rest,
        };

        tracing::debug!(
            total_size = total,
            chunk_size = chunk_size,
            blocks = blocks,
            "Planned sub-stream blocks"
        );

        Ok(Self {
            source,
            access,
            base,
            chunk_size,
            total_size: total,
            blocks,
            last_block_size,
            next_block: 0,
        })
    }

    /// Bytes covered by all windows, probed if it was not given
    pub fn total_size(&self) -> u64 {
        self.total_size
    }

    /// Number of windows this sequence yields in total
    pub fn block_count(&self) -> u64 {
        self.blocks
    }
}

impl Iterator for SubStreamBlocks {
    type Item = Result<(u64, SubStream), UploadError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.next_block >= self.blocks {
            return None;
        }
        let i = self.next_block;
        self.next_block += 1;

        let index = i * self.chunk_size;
        let length = if i == self.blocks - 1 {
            self.last_block_size
        } else {
            self.chunk_size
        };
        Some(
            SubStream::new(self.source.clone(), self.base + index, length, self.access)
                .map(|stream| (index, stream)),
        )
    }
}

/// Remaining length from `current`, restoring the position afterwards
fn probe_length<S: Seek + ?Sized>(stream: &mut S, current: u64) -> Option<u64> {
    let end = stream.seek(SeekFrom::End(0)).ok()?;
    stream.seek(SeekFrom::Start(current)).ok()?;
    end.checked_sub(current)
}
