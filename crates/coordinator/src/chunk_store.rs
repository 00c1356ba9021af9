//! Idempotent chunk repository keyed by `(transfer_id, chunk_index)`.

use std::sync::Arc;

use chrono::Utc;
use ferry_protocol::{ChunkOutcome, ChunkUploadResponse};
use ferry_transfer::{checksum_bytes, is_valid_checksum};
use tracing::{debug, info, warn};

use crate::error::CoordinatorError;
use crate::registry::{TransferRegistry, run_blocking};
use crate::store::ChunkRecord;

/// Accepts chunks and answers which ones are still missing.
pub struct ChunkStore {
    registry: Arc<TransferRegistry>,
}

enum Verdict {
    Stored(ChunkRecord),
    Corrupt(String),
}

impl ChunkStore {
    pub fn new(registry: Arc<TransferRegistry>) -> Self {
        Self { registry }
    }

    /// Stores one chunk.
    ///
    /// A chunk already stored with the same checksum is a no-op success
    /// (`Duplicate`); one stored with a different checksum is a
    /// `ChunkConflict`. Accepted bytes are never overwritten.
    pub async fn put(
        &self,
        transfer_id: &str,
        chunk_index: u32,
        data: Vec<u8>,
        checksum: &str,
    ) -> Result<ChunkUploadResponse, CoordinatorError> {
        let entry = self.registry.get(transfer_id)?;

        let status = entry.status();
        if status.is_closed() {
            return Err(CoordinatorError::TransferClosed {
                id: transfer_id.to_string(),
                status,
            });
        }

        let span = entry
            .plan()
            .span(chunk_index)
            .map_err(|_| CoordinatorError::IndexOutOfRange {
                index: chunk_index,
                count: entry.plan().chunk_count(),
            })?;
        let lock = entry
            .chunk_lock(chunk_index)
            .ok_or(CoordinatorError::IndexOutOfRange {
                index: chunk_index,
                count: entry.plan().chunk_count(),
            })?;

        if data.is_empty() {
            return Err(CoordinatorError::InvalidRequest("empty chunk body".into()));
        }
        if !is_valid_checksum(checksum) {
            return Err(CoordinatorError::InvalidRequest(format!(
                "checksum is not a lowercase hex SHA-256 digest: {checksum}"
            )));
        }

        let _guard = lock.lock().await;

        if let Some(existing) = entry.chunk(chunk_index) {
            if existing.checksum == checksum {
                debug!(transfer = %transfer_id, chunk = chunk_index, "duplicate chunk");
                return Ok(ChunkUploadResponse {
                    outcome: ChunkOutcome::Duplicate,
                    received: entry.received(),
                    total: entry.plan().chunk_count(),
                });
            }
            warn!(transfer = %transfer_id, chunk = chunk_index, "conflicting chunk rejected");
            return Err(CoordinatorError::ChunkConflict { index: chunk_index });
        }

        if data.len() as u64 != span.size {
            return Err(CoordinatorError::CorruptChunk {
                index: chunk_index,
                reason: format!("expected {} bytes, got {}", span.size, data.len()),
            });
        }

        let record = ChunkRecord {
            index: chunk_index,
            offset: span.offset,
            size: span.size,
            checksum: checksum.to_string(),
            stored_at: Utc::now(),
        };
        let id = transfer_id.to_string();
        let verdict = run_blocking(self.registry.store(), move |store| {
            let actual = checksum_bytes(&data);
            if actual != record.checksum {
                return Ok(Verdict::Corrupt(actual));
            }
            store.put_chunk(&id, &record, &data)?;
            Ok(Verdict::Stored(record))
        })
        .await?;

        let record = match verdict {
            Verdict::Stored(record) => record,
            Verdict::Corrupt(actual) => {
                warn!(
                    transfer = %transfer_id,
                    chunk = chunk_index,
                    declared = %checksum,
                    actual = %actual,
                    "corrupt chunk rejected"
                );
                return Err(CoordinatorError::CorruptChunk {
                    index: chunk_index,
                    reason: format!("checksum mismatch: declared {checksum}, computed {actual}"),
                });
            }
        };

        let (received, status_changed) = entry.insert_chunk(record);
        if status_changed {
            self.registry.persist(&entry).await?;
        }
        let total = entry.plan().chunk_count();
        debug!(transfer = %transfer_id, chunk = chunk_index, received, total, "chunk stored");
        if entry.is_complete() {
            info!(transfer = %transfer_id, chunks = total, "all chunks received");
        }

        Ok(ChunkUploadResponse {
            outcome: ChunkOutcome::Stored,
            received,
            total,
        })
    }

    /// Unstored chunk indices, ascending.
    pub fn missing(&self, transfer_id: &str) -> Result<Vec<u32>, CoordinatorError> {
        Ok(self.registry.get(transfer_id)?.missing())
    }
}
