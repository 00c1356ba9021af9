use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;

use sha2::{Digest, Sha256};

use crate::TransferError;
use crate::types::{Chunk, ChunkPlan};

// ---------------------------------------------------------------------------
// Checksum helpers
// ---------------------------------------------------------------------------

/// Computes SHA-256 of `data` and returns the hex-encoded digest.
pub fn checksum_bytes(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

/// Computes SHA-256 of an entire file and returns the hex-encoded digest.
pub fn calculate_file_checksum(path: &Path) -> Result<String, TransferError> {
    let mut file = std::fs::File::open(path)?;
    let mut digest = Sha256Digest::new();
    let mut buf = [0u8; 8192];
    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        digest.update(&buf[..n]);
    }
    Ok(digest.finalize())
}

/// Incremental SHA-256 over a byte stream.
#[derive(Default, Clone)]
pub struct Sha256Digest {
    hasher: Sha256,
    bytes: u64,
}

impl Sha256Digest {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update(&mut self, data: &[u8]) {
        self.hasher.update(data);
        self.bytes += data.len() as u64;
    }

    /// Number of bytes hashed so far.
    pub fn bytes(&self) -> u64 {
        self.bytes
    }

    /// Consumes the digest and returns the lowercase hex encoding.
    pub fn finalize(self) -> String {
        hex::encode(self.hasher.finalize())
    }
}

/// Writer adapter that hashes every byte written through it.
pub struct HashingWriter<W: Write> {
    inner: W,
    digest: Sha256Digest,
}

impl<W: Write> HashingWriter<W> {
    pub fn new(inner: W) -> Self {
        Self {
            inner,
            digest: Sha256Digest::new(),
        }
    }

    /// Flushes the inner writer and returns it with the hex digest.
    pub fn finish(mut self) -> Result<(W, String), TransferError> {
        self.inner.flush()?;
        Ok((self.inner, self.digest.finalize()))
    }
}

impl<W: Write> Write for HashingWriter<W> {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        let n = self.inner.write(buf)?;
        self.digest.update(&buf[..n]);
        Ok(n)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.inner.flush()
    }
}

// ---------------------------------------------------------------------------
// ChunkReader
// ---------------------------------------------------------------------------

/// Reads individual chunks of a planned file with automatic SHA-256 checksums.
pub struct ChunkReader {
    file: std::fs::File,
    plan: ChunkPlan,
}

impl ChunkReader {
    /// Opens `path` for chunked reading under `plan`.
    ///
    /// Fails if the file size no longer matches the plan.
    pub fn open(path: &Path, plan: ChunkPlan) -> Result<Self, TransferError> {
        let file = std::fs::File::open(path)?;
        let size = file.metadata()?.len();
        if size != plan.total_size() {
            return Err(TransferError::InvalidPlan(format!(
                "file is {size} bytes, plan expects {}",
                plan.total_size()
            )));
        }
        Ok(Self { file, plan })
    }

    /// Reads chunk `index` and computes its checksum.
    pub fn read_chunk(&mut self, index: u32) -> Result<Chunk, TransferError> {
        let span = self.plan.span(index)?;
        self.file.seek(SeekFrom::Start(span.offset))?;
        let mut data = vec![0u8; span.size as usize];
        self.file.read_exact(&mut data)?;
        let checksum = checksum_bytes(&data);
        Ok(Chunk {
            span,
            data,
            checksum,
        })
    }

    pub fn plan(&self) -> &ChunkPlan {
        &self.plan
    }
}
