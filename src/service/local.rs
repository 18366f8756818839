//! Local filesystem backend
//!
//! Stores one destination file in a directory and serves two of the
//! service contracts against it:
//!
//! - [`FileRangeService`]: each range is written in place at its offset, so
//!   ranges may land in any order.
//! - [`BlockStagingService`]: blocks are staged as separate files and only
//!   become the destination once [`LocalDirectory::commit_block_list`] is
//!   called.
//!
//! Every response carries a quoted SHA-256 ETag and an RFC 2822
//! `Last-Modified` stamp.
//!
//! # Example
//!
//! ```no_run
//! use chunk_uploadr::service::local::LocalDirectory;
//!
//! # fn main() -> std::io::Result<()> {
//! let dest = LocalDirectory::open("/tmp/uploads", "report.bin")?;
//! dest.create_file(10 * 1024 * 1024)?;
//! println!("Writing to {:?}", dest.path());
//! # Ok(())
//! # }
//! ```

use super::{
    BlockStagingService, ChunkBody, FileRangeService, RequestOptions, ResponseHeaders,
    ServiceError,
};
use async_trait::async_trait;
use sha2::{Digest, Sha256};
use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

/// Directory holding the staging area of one destination file
const STAGING_DIR: &str = ".staging";

/// A destination file inside a local directory
#[derive(Debug, Clone)]
pub struct LocalDirectory {
    path: PathBuf,
    staging: PathBuf,
}

impl LocalDirectory {
    /// Open `name` inside `root`, creating `root` if needed
    pub fn open<P: AsRef<Path>>(root: P, name: &str) -> io::Result<Self> {
        let root = root.as_ref();
        if name.is_empty() || name.contains(['/', '\\']) || name == "." || name == ".." {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("invalid destination name '{}'", name),
            ));
        }
        fs::create_dir_all(root)?;

        Ok(Self {
            path: root.join(name),
            staging: root.join(STAGING_DIR).join(name),
        })
    }

    /// Path of the destination file
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Create (or truncate) the destination at its final size. Range
    /// uploads expect the file to exist.
    pub fn create_file(&self, size: u64) -> io::Result<ResponseHeaders> {
        let file = File::create(&self.path)?;
        file.set_len(size)?;
        tracing::debug!(path = ?self.path, size = size, "Created destination file");
        Ok(response_for(&[]))
    }

    /// Block ids staged so far and not yet committed
    pub fn staged_blocks(&self) -> io::Result<Vec<String>> {
        let entries = match fs::read_dir(&self.staging) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e),
        };

        let mut ids = Vec::new();
        for entry in entries {
            let name = entry?.file_name();
            let Some(name) = name.to_str() else { continue };
            if let Some(id) = hex::decode(name).ok().and_then(|raw| String::from_utf8(raw).ok()) {
                ids.push(id);
            }
        }
        ids.sort();
        Ok(ids)
    }

    /// Concatenate staged blocks, in list order, into the destination.
    ///
    /// Fails with `NotFound` if any listed block was never staged; the
    /// destination is left untouched in that case. The staging area is
    /// removed once the commit succeeds.
    #[tracing::instrument(
        name = "local.commit_block_list",
        skip(self, block_ids),
        fields(path = ?self.path, blocks = block_ids.len()),
        err
    )]
    pub fn commit_block_list(&self, block_ids: &[String]) -> io::Result<ResponseHeaders> {
        let blocks: Vec<PathBuf> = block_ids.iter().map(|id| self.block_path(id)).collect();
        if let Some((id, _)) = block_ids.iter().zip(&blocks).find(|(_, p)| !p.is_file()) {
            return Err(io::Error::new(
                io::ErrorKind::NotFound,
                format!("block '{}' was not staged", id),
            ));
        }

        let temp = self.temp_path();
        let mut hasher = Sha256::new();
        let mut out = File::create(&temp)?;
        let mut buf = vec![0u8; 64 * 1024];
        for block in &blocks {
            let mut file = File::open(block)?;
            loop {
                let n = file.read(&mut buf)?;
                if n == 0 {
                    break;
                }
                hasher.update(&buf[..n]);
                out.write_all(&buf[..n])?;
            }
        }
        out.flush()?;
        fs::rename(&temp, &self.path)?;

        match fs::remove_dir_all(&self.staging) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(e),
        }
        tracing::info!(path = ?self.path, "Committed block list");

        Ok(ResponseHeaders {
            etag: Some(format!("\"{}\"", hex::encode(hasher.finalize()))),
            last_modified: Some(chrono::Utc::now().to_rfc2822()),
            ..Default::default()
        })
    }

    /// Staged block file. Block ids are hex encoded since they may contain
    /// `/`.
    fn block_path(&self, block_id: &str) -> PathBuf {
        self.staging.join(hex::encode(block_id))
    }

    fn temp_path(&self) -> PathBuf {
        let dir = self.path.parent().unwrap_or_else(|| Path::new("."));
        dir.join(format!(".chunk-uploadr-{}.tmp", uuid::Uuid::new_v4()))
    }
}

fn response_for(data: &[u8]) -> ResponseHeaders {
    let mut hasher = Sha256::new();
    hasher.update(data);
    ResponseHeaders {
        etag: Some(format!("\"{}\"", hex::encode(hasher.finalize()))),
        last_modified: Some(chrono::Utc::now().to_rfc2822()),
        ..Default::default()
    }
}

/// Read the body and check it against the declared length
fn read_body(body: ChunkBody, options: &RequestOptions) -> Result<bytes::Bytes, ServiceError> {
    let data = body.into_bytes()?;
    if options.validate_content && data.len() as u64 != options.content_length {
        return Err(format!(
            "content length mismatch: declared {}, received {}",
            options.content_length,
            data.len()
        )
        .into());
    }
    Ok(data)
}

#[async_trait]
impl FileRangeService for LocalDirectory {
    async fn upload_range(
        &self,
        body: ChunkBody,
        offset: u64,
        length: u64,
        options: RequestOptions,
    ) -> Result<ResponseHeaders, ServiceError> {
        let data = read_body(body, &options)?;
        if data.len() as u64 != length {
            return Err(format!("range of {} bytes received {} bytes", length, data.len()).into());
        }

        let mut file = OpenOptions::new().write(true).open(&self.path)?;
        file.seek(SeekFrom::Start(offset))?;
        file.write_all(&data)?;
        file.flush()?;

        Ok(response_for(&data))
    }
}

#[async_trait]
impl BlockStagingService for LocalDirectory {
    async fn stage_block(
        &self,
        block_id: String,
        body: ChunkBody,
        options: RequestOptions,
    ) -> Result<(), ServiceError> {
        let data = read_body(body, &options)?;
        fs::create_dir_all(&self.staging)?;

        // Write under a unique name, then rename into place.
        let temp = self
            .staging
            .join(format!(".{}.tmp", uuid::Uuid::new_v4()));
        let mut file = File::create(&temp)?;
        file.write_all(&data)?;
        file.flush()?;
        fs::rename(&temp, self.block_path(&block_id))?;

        tracing::trace!(block_id = %block_id, bytes = data.len(), "Staged block");
        Ok(())
    }
}
