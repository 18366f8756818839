//! Seekable sub-stream
//!
//! A read-only, bounded window `[begin, begin + length)` onto a source stream
//! shared by every window of the same upload. Each window keeps its own
//! position and a forward read-ahead cache; the shared source is only ever
//! touched while its mutex is held.
//!
//! # Example
//!
//! ```
//! use chunk_uploadr::upload::substream::{shared_source, SourceAccess, SubStream};
//! use std::io::{Cursor, Read};
//!
//! let source = shared_source(Cursor::new(b"hello world".to_vec()));
//! let mut window = SubStream::new(source, 6, 5, SourceAccess::Locked).unwrap();
//!
//! let mut text = String::new();
//! window.read_to_string(&mut text).unwrap();
//! assert_eq!(text, "world");
//! ```

use super::UploadError;
use parking_lot::Mutex;
use std::fmt;
use std::io::{self, Read, Seek, SeekFrom};
use std::sync::Arc;
use thiserror::Error;

/// Upper bound on the read-ahead cache of a single window (4MB)
pub const MAX_READ_BUFFER_SIZE: u64 = 4 * 1024 * 1024;

/// A readable, seekable source that can be moved across tasks
pub trait SeekableSource: Read + Seek + Send {}

impl<T: Read + Seek + Send> SeekableSource for T {}

/// Source stream shared by all windows of one upload
pub type SharedSource = Arc<Mutex<Box<dyn SeekableSource>>>;

/// Wrap a source so it can be shared by several windows
pub fn shared_source<S: SeekableSource + 'static>(source: S) -> SharedSource {
    Arc::new(Mutex::new(Box::new(source)))
}

/// How a window repositions the shared source before reading
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceAccess {
    /// Windows are read from several tasks. Every refill seeks to the
    /// absolute offset and verifies it landed there.
    Locked,
    /// Windows are read one after another from a single task. The source is
    /// only repositioned when it is not already at the wanted offset.
    Exclusive,
}

/// Bounded window over a [`SharedSource`]
pub struct SubStream {
    source: SharedSource,
    access: SourceAccess,
    begin: u64,
    length: u64,
    position: u64,
    max_buffer_size: u64,
    buffer: Vec<u8>,
    buffer_start: u64,
}

impl SubStream {
    /// Create a window of `length` bytes starting at absolute offset `begin`.
    ///
    /// Fails with [`UploadError::StreamNotSeekable`] if the source cannot
    /// report its position.
    pub fn new(
        source: SharedSource,
        begin: u64,
        length: u64,
        access: SourceAccess,
    ) -> Result<Self, UploadError> {
        source
            .lock()
            .stream_position()
            .map_err(UploadError::StreamNotSeekable)?;

        Ok(Self {
            source,
            access,
            begin,
            length,
            position: 0,
            max_buffer_size: length.min(MAX_READ_BUFFER_SIZE),
            buffer: Vec::new(),
            buffer_start: 0,
        })
    }

    /// Window length in bytes
    pub fn len(&self) -> u64 {
        self.length
    }

    pub fn is_empty(&self) -> bool {
        self.length == 0
    }

    /// Absolute offset of the window in the shared source
    pub fn begin(&self) -> u64 {
        self.begin
    }

    /// Current position relative to the start of the window
    pub fn tell(&self) -> u64 {
        self.position
    }

    fn buffer_covers(&self, pos: u64) -> bool {
        pos >= self.buffer_start && pos < self.buffer_start + self.buffer.len() as u64
    }

    /// Replace the cache with the bytes following the current position.
    /// Returns the number of bytes cached; zero means the source ran dry.
    fn refill(&mut self) -> io::Result<usize> {
        let desired = self.max_buffer_size.min(self.length - self.position) as usize;
        let absolute = self.begin + self.position;
        let mut buf = vec![0u8; desired];

        let read = {
            let mut source = self.source.lock();
            match self.access {
                SourceAccess::Locked => {
                    source.seek(SeekFrom::Start(absolute))?;
                }
                SourceAccess::Exclusive => {
                    // A retried chunk re-reads its window, so the source may
                    // sit past the wanted offset.
                    if source.stream_position()? != absolute {
                        source.seek(SeekFrom::Start(absolute))?;
                    }
                }
            }
            if source.stream_position()? != absolute {
                return Err(io::Error::other(
                    "Stream failed to seek to the desired location",
                ));
            }
            read_fully(&mut **source, &mut buf)?
        };

        buf.truncate(read);
        self.buffer = buf;
        self.buffer_start = self.position;
        Ok(read)
    }
}

impl Read for SubStream {
    fn read(&mut self, out: &mut [u8]) -> io::Result<usize> {
        let wanted = (out.len() as u64).min(self.length - self.position) as usize;
        let mut filled = 0;

        while filled < wanted {
            if !self.buffer_covers(self.position) && self.refill()? == 0 {
                break;
            }
            let cursor = (self.position - self.buffer_start) as usize;
            let available = &self.buffer[cursor..];
            let n = available.len().min(wanted - filled);
            out[filled..filled + n].copy_from_slice(&available[..n]);
            filled += n;
            self.position += n as u64;
        }

        Ok(filled)
    }
}

impl Seek for SubStream {
    /// Positions outside the window are clamped to `[0, len]`.
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let target = match pos {
            SeekFrom::Start(n) => i128::from(n),
            SeekFrom::Current(delta) => i128::from(self.position) + i128::from(delta),
            SeekFrom::End(delta) => i128::from(self.length) + i128::from(delta),
        };
        let target = target.clamp(0, i128::from(self.length)) as u64;

        if !self.buffer_covers(target) {
            self.buffer = Vec::new();
        }
        self.position = target;
        Ok(target)
    }

    fn stream_position(&mut self) -> io::Result<u64> {
        Ok(self.position)
    }
}

impl fmt::Debug for SubStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubStream")
            .field("begin", &self.begin)
            .field("length", &self.length)
            .field("position", &self.position)
            .field("access", &self.access)
            .field("buffered", &self.buffer.len())
            .finish()
    }
}

/// A reader claimed to have read more bytes than the buffer it was given.
///
/// Carried inside an [`io::Error`] of kind `InvalidData` when it comes out of
/// a [`Read`] impl, and surfaced as [`UploadError::InvalidChunkType`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("source reported {reported} bytes for a {requested} byte read")]
pub struct OversizedRead {
    pub reported: usize,
    pub requested: usize,
}

impl OversizedRead {
    /// Find an oversized read wrapped in an I/O error
    pub fn find(err: &io::Error) -> Option<&OversizedRead> {
        err.get_ref()
            .and_then(|inner| inner.downcast_ref::<OversizedRead>())
    }
}

impl From<OversizedRead> for io::Error {
    fn from(e: OversizedRead) -> Self {
        io::Error::new(io::ErrorKind::InvalidData, e)
    }
}

/// Read until `buf` is full or the reader is exhausted.
pub(crate) fn read_fully<R: Read + ?Sized>(reader: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) if n > buf.len() - filled => {
                return Err(OversizedRead {
                    reported: n,
                    requested: buf.len() - filled,
                }
                .into());
            }
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}
