use crate::TransferError;

/// Byte range of one chunk within its file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ChunkSpan {
    pub index: u32,
    pub offset: u64,
    pub size: u64,
}

impl ChunkSpan {
    /// Exclusive end offset.
    pub fn end(&self) -> u64 {
        self.offset + self.size
    }
}

/// A chunk of file data read for upload.
#[derive(Debug, Clone)]
pub struct Chunk {
    pub span: ChunkSpan,
    /// Raw chunk data.
    pub data: Vec<u8>,
    /// SHA-256 hex checksum of `data`.
    pub checksum: String,
}

/// Fixed partition of `[0, total_size)` into equally sized chunks, the last
/// one possibly short.
///
/// A plan is decided once per transfer and never changes afterwards, which
/// is what lets both sides resume by chunk index.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkPlan {
    total_size: u64,
    chunk_size: u64,
    chunk_count: u32,
}

impl ChunkPlan {
    /// Partitions `total_size` bytes into chunks of `chunk_size`.
    pub fn new(total_size: u64, chunk_size: u64) -> Result<Self, TransferError> {
        if total_size == 0 {
            return Err(TransferError::InvalidPlan("file is empty".into()));
        }
        if chunk_size == 0 {
            return Err(TransferError::InvalidPlan("chunk size must be positive".into()));
        }
        let count = total_size.div_ceil(chunk_size);
        let chunk_count = u32::try_from(count).map_err(|_| {
            TransferError::InvalidPlan(format!("{count} chunks exceed the index space"))
        })?;
        Ok(Self {
            total_size,
            chunk_size,
            chunk_count,
        })
    }

    /// Rebuilds a plan from a declared manifest, rejecting an inconsistent
    /// chunk count.
    pub fn from_manifest(
        total_size: u64,
        chunk_size: u64,
        chunk_count: u32,
    ) -> Result<Self, TransferError> {
        let plan = Self::new(total_size, chunk_size)?;
        if plan.chunk_count != chunk_count {
            return Err(TransferError::InvalidPlan(format!(
                "declared {chunk_count} chunks, but {total_size} bytes at {chunk_size} per chunk is {}",
                plan.chunk_count
            )));
        }
        Ok(plan)
    }

    pub fn total_size(&self) -> u64 {
        self.total_size
    }

    pub fn chunk_size(&self) -> u64 {
        self.chunk_size
    }

    pub fn chunk_count(&self) -> u32 {
        self.chunk_count
    }

    /// Returns the span of chunk `index`.
    pub fn span(&self, index: u32) -> Result<ChunkSpan, TransferError> {
        if index >= self.chunk_count {
            return Err(TransferError::IndexOutOfRange {
                index,
                count: self.chunk_count,
            });
        }
        let offset = u64::from(index) * self.chunk_size;
        let size = self.chunk_size.min(self.total_size - offset);
        Ok(ChunkSpan {
            index,
            offset,
            size,
        })
    }

    /// Iterates over every span in index order.
    pub fn spans(&self) -> impl Iterator<Item = ChunkSpan> + '_ {
        (0..self.chunk_count).filter_map(|i| self.span(i).ok())
    }

    /// Sum of the sizes of the given chunks; out-of-range indices count as zero.
    pub fn bytes_in(&self, indices: &[u32]) -> u64 {
        indices
            .iter()
            .filter_map(|&i| self.span(i).ok())
            .map(|s| s.size)
            .sum()
    }
}
