//! Sender error types.

use std::path::PathBuf;

use ferry_protocol::FailureReason;

use crate::client::ClientError;

/// Errors that end a transfer session.
#[derive(Debug, thiserror::Error)]
pub enum SendError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("transfer error: {0}")]
    Transfer(#[from] ferry_transfer::TransferError),

    #[error("coordinator error: {0}")]
    Client(#[from] ClientError),

    #[error("chunk {index} failed after {attempts} attempts: {last_error}")]
    ChunkExhausted {
        index: u32,
        attempts: u32,
        last_error: String,
    },

    #[error("assembly failed: {message}")]
    AssemblyFailed {
        reason: Option<FailureReason>,
        message: String,
    },

    #[error("{} chunks still missing after the final upload round", missing.len())]
    Incomplete { missing: Vec<u32> },

    #[error("refusing to send empty file {}", .0.display())]
    EmptyFile(PathBuf),

    #[error("path has no usable file name: {}", .0.display())]
    InvalidPath(PathBuf),

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("connection pool closed")]
    PoolClosed,

    #[error("upload engine stopped")]
    EngineStopped,

    #[error("cancelled")]
    Cancelled,
}
