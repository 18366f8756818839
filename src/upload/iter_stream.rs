//! Streaming adapter over an iterator of byte pieces
//!
//! Lets generator-style sources (an iterator of `String`, `Vec<u8>`,
//! `Bytes`, ...) feed the same chunking path as a real stream.
//!
//! # Example
//!
//! ```
//! use chunk_uploadr::upload::IterStreamer;
//! use std::io::Read;
//!
//! let mut stream = IterStreamer::new(vec!["ab", "cde", "f"]);
//! let mut buf = [0u8; 4];
//! assert_eq!(stream.read(&mut buf).unwrap(), 4);
//! assert_eq!(&buf, b"abcd");
//! ```

use bytes::{Bytes, BytesMut};
use std::io::{self, Read, Seek, SeekFrom};

/// [`Read`] adapter that concatenates the pieces of an iterator
pub struct IterStreamer<I: Iterator> {
    pieces: I,
    leftover: Bytes,
}

impl<I> IterStreamer<I>
where
    I: Iterator,
    I::Item: Into<Bytes>,
{
    pub fn new<P: IntoIterator<IntoIter = I>>(pieces: P) -> Self {
        Self {
            pieces: pieces.into_iter(),
            leftover: Bytes::new(),
        }
    }

    /// Read up to `size` bytes, pulling whole pieces until enough are
    /// available. Returns fewer bytes only once the iterator is exhausted.
    pub fn read_bytes(&mut self, size: usize) -> Bytes {
        if self.leftover.len() >= size {
            return self.leftover.split_to(size);
        }

        let mut data = BytesMut::with_capacity(size);
        data.extend_from_slice(&self.leftover);
        self.leftover.clear();

        while data.len() < size {
            match self.pieces.next() {
                Some(piece) => {
                    let piece: Bytes = piece.into();
                    data.extend_from_slice(&piece);
                }
                None => return data.freeze(),
            }
        }

        let mut data = data.freeze();
        self.leftover = data.split_off(size);
        data
    }

    /// Bytes pulled from the iterator but not yet read
    pub fn buffered(&self) -> usize {
        self.leftover.len()
    }
}

impl<I> Read for IterStreamer<I>
where
    I: Iterator,
    I::Item: Into<Bytes>,
{
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let data = self.read_bytes(buf.len());
        buf[..data.len()].copy_from_slice(&data);
        Ok(data.len())
    }
}

impl<I: Iterator> Seek for IterStreamer<I> {
    fn seek(&mut self, _pos: SeekFrom) -> io::Result<u64> {
        Err(io::Error::new(
            io::ErrorKind::Unsupported,
            "Data generator is not seekable",
        ))
    }

    fn stream_position(&mut self) -> io::Result<u64> {
        Err(io::Error::new(
            io::ErrorKind::Unsupported,
            "Data generator does not support tell",
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_carries_leftover_between_reads() {
        let mut stream = IterStreamer::new(vec![b"hello".to_vec(), b"world".to_vec()]);

        assert_eq!(stream.read_bytes(3), Bytes::from_static(b"hel"));
        assert_eq!(stream.buffered(), 2);
        assert_eq!(stream.read_bytes(4), Bytes::from_static(b"lowo"));
        assert_eq!(stream.read_bytes(10), Bytes::from_static(b"rld"));
        assert_eq!(stream.buffered(), 0);
        assert!(stream.read_bytes(10).is_empty());
    }

    #[test]
    fn test_string_pieces() {
        let pieces = vec![String::from("añ"), String::from("b")];
        let mut stream = IterStreamer::new(pieces);
        let mut out = Vec::new();
        stream.read_to_end(&mut out).unwrap();
        assert_eq!(out, "añb".as_bytes());
    }

    #[test]
    fn test_seek_and_tell_unsupported() {
        let mut stream = IterStreamer::new(Vec::<Bytes>::new());
        let err = stream.seek(SeekFrom::Start(0)).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::Unsupported);
        assert!(stream.stream_position().is_err());
    }
}
