//! Request and response bodies exchanged over HTTP.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{AssemblyFailure, ChunkOutcome, Priority, TransferStatus};

/// Body of `POST /upload/init`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InitUploadRequest {
    /// Explicit identity; when absent the coordinator derives one from the
    /// manifest so re-sending the same file re-attaches to the same transfer.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transfer_id: Option<String>,
    pub filename: String,
    pub total_size: u64,
    pub chunk_count: u32,
    pub chunk_size: u64,
    pub overall_checksum: String,
    #[serde(default)]
    pub priority: Priority,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InitUploadResponse {
    pub transfer_id: String,
    /// `true` if an existing transfer with the same identity was re-attached.
    pub resumed: bool,
    /// Indices already stored, ascending.
    #[serde(default)]
    pub stored_chunks: Vec<u32>,
    /// Chunking of the transfer. On re-attach this is the stored plan,
    /// which wins over the one in the request.
    pub chunk_size: u64,
    pub chunk_count: u32,
}

/// Query string of `POST /upload/chunk`; the body carries the raw bytes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkQuery {
    pub transfer_id: String,
    pub chunk_index: u32,
    pub checksum: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkUploadResponse {
    pub outcome: ChunkOutcome,
    /// Chunks stored for the transfer after this request.
    pub received: u32,
    pub total: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MissingResponse {
    pub transfer_id: String,
    /// Unstored indices, ascending.
    pub missing: Vec<u32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssembleResponse {
    pub transfer_id: String,
    pub status: TransferStatus,
    pub checksum_match: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assembled_checksum: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<AssemblyFailure>,
}

/// Transfer metadata returned by `GET /files` and `GET /files/{id}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransferInfo {
    pub transfer_id: String,
    pub filename: String,
    pub total_size: u64,
    pub chunk_count: u32,
    pub chunk_size: u64,
    pub priority: Priority,
    pub overall_checksum: String,
    pub status: TransferStatus,
    pub received_chunks: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<AssemblyFailure>,
}

impl TransferInfo {
    /// Returns the share of stored chunks as a percentage (0-100).
    pub fn percentage(&self) -> f64 {
        if self.chunk_count == 0 {
            return 0.0;
        }
        f64::from(self.received_chunks) / f64::from(self.chunk_count) * 100.0
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub timestamp: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Machine-readable error code carried in every error response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorCode {
    #[serde(rename = "unknown_transfer")]
    UnknownTransfer,
    #[serde(rename = "index_out_of_range")]
    IndexOutOfRange,
    #[serde(rename = "chunk_conflict")]
    ChunkConflict,
    #[serde(rename = "corrupt_chunk")]
    CorruptChunk,
    #[serde(rename = "transfer_closed")]
    TransferClosed,
    #[serde(rename = "manifest_mismatch")]
    ManifestMismatch,
    #[serde(rename = "invalid_request")]
    InvalidRequest,
    #[serde(rename = "not_ready")]
    NotReady,
    #[serde(rename = "internal")]
    Internal,
}

impl ErrorCode {
    /// HTTP status the coordinator answers with for this code.
    pub fn http_status(self) -> u16 {
        match self {
            ErrorCode::UnknownTransfer => 404,
            ErrorCode::IndexOutOfRange | ErrorCode::InvalidRequest => 400,
            ErrorCode::ChunkConflict
            | ErrorCode::TransferClosed
            | ErrorCode::ManifestMismatch
            | ErrorCode::NotReady => 409,
            ErrorCode::CorruptChunk => 422,
            ErrorCode::Internal => 500,
        }
    }
}

/// Body of every non-2xx response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: ErrorCode,
    pub message: String,
}

impl ErrorBody {
    pub fn new(error: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            error,
            message: message.into(),
        }
    }
}
