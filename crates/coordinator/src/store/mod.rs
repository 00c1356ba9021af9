//! Persistent storage behind the chunk store and registry.
//!
//! The core only talks to the [`Store`] trait. [`FsStore`] keeps everything
//! under a data directory; [`MemoryStore`] is process-local.

mod fs;
mod memory;

use std::io::Write;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use ferry_protocol::{AssemblyFailure, Priority, TransferInfo, TransferStatus};
use serde::{Deserialize, Serialize};

pub use fs::FsStore;
pub use memory::MemoryStore;

/// Errors produced by a [`Store`].
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("invalid key: {0}")]
    InvalidKey(String),
}

/// Durable transfer metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransferRecord {
    pub transfer_id: String,
    pub filename: String,
    pub total_size: u64,
    pub chunk_count: u32,
    pub chunk_size: u64,
    pub priority: Priority,
    pub overall_checksum: String,
    pub status: TransferStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assembled_checksum: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<AssemblyFailure>,
}

impl TransferRecord {
    /// Builds the wire view with the given received-chunk count.
    pub fn to_info(&self, received_chunks: u32) -> TransferInfo {
        TransferInfo {
            transfer_id: self.transfer_id.clone(),
            filename: self.filename.clone(),
            total_size: self.total_size,
            chunk_count: self.chunk_count,
            chunk_size: self.chunk_size,
            priority: self.priority,
            overall_checksum: self.overall_checksum.clone(),
            status: self.status,
            received_chunks,
            created_at: self.created_at,
            updated_at: self.updated_at,
            completed_at: self.completed_at,
            failure: self.failure.clone(),
        }
    }
}

/// Durable record of one stored chunk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkRecord {
    pub index: u32,
    pub offset: u64,
    pub size: u64,
    pub checksum: String,
    pub stored_at: DateTime<Utc>,
}

/// Location of a verified, assembled file.
pub enum AssembledFile {
    Path(PathBuf),
    Bytes(Vec<u8>),
}

/// Destination of an in-progress assembly.
///
/// Nothing becomes visible to readers until [`commit`](AssemblySink::commit).
pub trait AssemblySink: Write + Send {
    fn commit(self: Box<Self>) -> Result<(), StoreError>;
    fn discard(self: Box<Self>) -> Result<(), StoreError>;
}

/// Abstract persistent store for transfer and chunk records.
///
/// Methods are blocking; async callers run them on the blocking pool.
/// Writes must be atomic: a crash leaves either the old or the new value.
pub trait Store: Send + Sync + 'static {
    fn save_transfer(&self, record: &TransferRecord) -> Result<(), StoreError>;

    fn load_transfers(&self) -> Result<Vec<TransferRecord>, StoreError>;

    /// Persists chunk bytes and their record. The bytes are durable before
    /// the record is.
    fn put_chunk(
        &self,
        transfer_id: &str,
        record: &ChunkRecord,
        data: &[u8],
    ) -> Result<(), StoreError>;

    fn read_chunk(&self, transfer_id: &str, index: u32) -> Result<Vec<u8>, StoreError>;

    fn load_chunks(&self, transfer_id: &str) -> Result<Vec<ChunkRecord>, StoreError>;

    fn begin_assembly(&self, transfer_id: &str) -> Result<Box<dyn AssemblySink>, StoreError>;

    fn open_assembled(&self, transfer_id: &str) -> Result<AssembledFile, StoreError>;
}

/// Rejects keys that could escape a storage namespace.
pub(crate) fn check_key(transfer_id: &str) -> Result<(), StoreError> {
    let valid = !transfer_id.is_empty()
        && transfer_id.len() <= 64
        && transfer_id
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_');
    if valid {
        Ok(())
    } else {
        Err(StoreError::InvalidKey(transfer_id.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_validation() {
        assert!(check_key("a1b2-c3_d4").is_ok());
        assert!(check_key("").is_err());
        assert!(check_key("../escape").is_err());
        assert!(check_key(&"a".repeat(65)).is_err());
    }

    #[test]
    fn record_json_roundtrip_keeps_status() {
        let now = Utc::now();
        let record = TransferRecord {
            transfer_id: "t1".into(),
            filename: "a.bin".into(),
            total_size: 10,
            chunk_count: 3,
            chunk_size: 4,
            priority: Priority::High,
            overall_checksum: "c".repeat(64),
            status: TransferStatus::CompletePendingAssembly,
            created_at: now,
            updated_at: now,
            completed_at: None,
            assembled_checksum: None,
            failure: None,
        };
        let json = serde_json::to_string(&record).unwrap();
        assert!(json.contains("complete_pending_assembly"));
        let parsed: TransferRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, record);
    }
}
