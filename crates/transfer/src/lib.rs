//! Chunk planning and checksums.
//!
//! Shared by the sender and the coordinator so both sides agree on how a
//! file is partitioned and how a chunk digest is computed.

mod chunked;
mod types;
mod validation;

pub use chunked::{
    ChunkReader, HashingWriter, Sha256Digest, calculate_file_checksum, checksum_bytes,
};
pub use types::{Chunk, ChunkPlan, ChunkSpan};
pub use validation::{is_valid_checksum, validate_filename};

/// Errors produced by the transfer crate.
#[derive(Debug, thiserror::Error)]
pub enum TransferError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("checksum mismatch: expected {expected}, got {actual}")]
    ChecksumMismatch { expected: String, actual: String },

    #[error("invalid chunk plan: {0}")]
    InvalidPlan(String),

    #[error("chunk index {index} out of range (chunk count {count})")]
    IndexOutOfRange { index: u32, count: u32 },

    #[error("invalid filename: {0}")]
    InvalidFilename(String),
}
