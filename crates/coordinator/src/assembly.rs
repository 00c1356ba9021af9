//! Assembly engine: concatenates a complete transfer in index order and
//! verifies the result against the declared checksum.

use std::io::Write;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::Utc;
use ferry_protocol::{AssembleResponse, AssemblyFailure, FailureReason, TransferStatus};
use ferry_transfer::{HashingWriter, checksum_bytes};
use tracing::{error, info, warn};

use crate::error::CoordinatorError;
use crate::registry::{TransferRegistry, run_blocking};
use crate::store::{ChunkRecord, Store, StoreError};

/// Runs at most one physical assembly per transfer.
pub struct AssemblyEngine {
    registry: Arc<TransferRegistry>,
    runs: AtomicU64,
}

struct Outcome {
    assembled_checksum: Option<String>,
    failure: Option<AssemblyFailure>,
}

impl AssemblyEngine {
    pub fn new(registry: Arc<TransferRegistry>) -> Self {
        Self {
            registry,
            runs: AtomicU64::new(0),
        }
    }

    /// Number of physical assemblies performed by this process.
    pub fn runs(&self) -> u64 {
        self.runs.load(Ordering::SeqCst)
    }

    /// Assembles and verifies a transfer.
    ///
    /// Idempotent: once a transfer has been assembled, later calls return
    /// the same result without touching the chunks again. Concurrent calls
    /// wait for the first one and share its result.
    pub async fn assemble(&self, transfer_id: &str) -> Result<AssembleResponse, CoordinatorError> {
        let entry = self.registry.get(transfer_id)?;
        let mut cached = entry.assembly.lock().await;
        if let Some(result) = cached.as_ref() {
            return Ok(result.clone());
        }

        let status = entry.status();
        if status.is_closed() {
            return Err(CoordinatorError::TransferClosed {
                id: transfer_id.to_string(),
                status,
            });
        }
        let missing = entry.missing();
        if !missing.is_empty() {
            return Err(CoordinatorError::NotReady {
                id: transfer_id.to_string(),
                reason: format!("{} of {} chunks missing", missing.len(), entry.plan().chunk_count()),
            });
        }

        entry.update(|r| r.status = TransferStatus::Assembled);
        self.registry.persist(&entry).await?;
        info!(transfer = %transfer_id, chunks = entry.plan().chunk_count(), "assembling transfer");

        let id = transfer_id.to_string();
        let chunks = entry.chunks();
        let expected = entry.record().overall_checksum;
        let outcome = run_blocking(self.registry.store(), move |store| {
            assemble_chunks(store, &id, &chunks, &expected)
        })
        .await;
        self.runs.fetch_add(1, Ordering::SeqCst);

        let outcome = match outcome {
            Ok(outcome) => outcome,
            Err(e) => {
                // Nothing was decided; allow a later retry.
                error!(transfer = %transfer_id, error = %e, "assembly aborted");
                entry.update(|r| r.status = TransferStatus::CompletePendingAssembly);
                self.registry.persist(&entry).await?;
                return Err(e);
            }
        };

        let status = if outcome.failure.is_none() {
            TransferStatus::Verified
        } else {
            TransferStatus::Failed
        };
        entry.update(|r| {
            r.status = status;
            r.completed_at = Some(Utc::now());
            r.assembled_checksum = outcome.assembled_checksum.clone();
            r.failure = outcome.failure.clone();
        });
        let result = AssembleResponse {
            transfer_id: transfer_id.to_string(),
            status,
            checksum_match: status == TransferStatus::Verified,
            assembled_checksum: outcome.assembled_checksum,
            failure: outcome.failure,
        };
        // The in-memory status and the cache move together; a failed write
        // leaves the record in `assembled`, which a restart re-assembles.
        *cached = Some(result.clone());
        self.registry.persist(&entry).await?;

        match &result.failure {
            None => info!(transfer = %transfer_id, "transfer verified"),
            Some(failure) => warn!(
                transfer = %transfer_id,
                reason = ?failure.reason,
                suspects = ?failure.suspect_chunks,
                "transfer failed verification"
            ),
        }
        Ok(result)
    }
}

/// Streams every chunk into a new assembly, re-verifying each one.
fn assemble_chunks(
    store: &dyn Store,
    transfer_id: &str,
    chunks: &[ChunkRecord],
    expected: &str,
) -> Result<Outcome, StoreError> {
    let mut writer = HashingWriter::new(store.begin_assembly(transfer_id)?);
    let mut suspects = Vec::new();

    for chunk in chunks {
        let data = match store.read_chunk(transfer_id, chunk.index) {
            Ok(data) => data,
            Err(e) => {
                let (sink, _) = writer.finish().map_err(transfer_to_store)?;
                sink.discard()?;
                return Err(e);
            }
        };
        if checksum_bytes(&data) != chunk.checksum {
            suspects.push(chunk.index);
        }
        if let Err(e) = writer.write_all(&data) {
            let (sink, _) = writer.finish().map_err(transfer_to_store)?;
            sink.discard()?;
            return Err(e.into());
        }
    }

    let (sink, actual) = writer.finish().map_err(transfer_to_store)?;

    if !suspects.is_empty() {
        sink.discard()?;
        return Ok(Outcome {
            assembled_checksum: Some(actual),
            failure: Some(AssemblyFailure {
                reason: FailureReason::ChunkCorruption,
                message: format!(
                    "{} stored chunk(s) no longer match their checksum",
                    suspects.len()
                ),
                suspect_chunks: suspects,
            }),
        });
    }

    if actual != expected {
        sink.discard()?;
        return Ok(Outcome {
            assembled_checksum: Some(actual.clone()),
            failure: Some(AssemblyFailure {
                reason: FailureReason::AssemblyCorruption,
                suspect_chunks: Vec::new(),
                message: format!(
                    "assembled digest {actual} does not match declared {expected}; \
                     every chunk matched its own checksum, so the declared checksum \
                     or an accepted chunk checksum is wrong"
                ),
            }),
        });
    }

    sink.commit()?;
    Ok(Outcome {
        assembled_checksum: Some(actual),
        failure: None,
    })
}

fn transfer_to_store(e: ferry_transfer::TransferError) -> StoreError {
    match e {
        ferry_transfer::TransferError::Io(e) => StoreError::Io(e),
        other => StoreError::Io(std::io::Error::other(other.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunk_store::ChunkStore;
    use crate::store::{AssembledFile, MemoryStore};
    use crate::test_support::init_request;

    const DATA: &[u8] = b"AAAABBBBCCCCDD";

    struct Fixture {
        store: Arc<MemoryStore>,
        registry: Arc<TransferRegistry>,
        chunks: ChunkStore,
        engine: Arc<AssemblyEngine>,
    }

    async fn fixture() -> Fixture {
        let store = Arc::new(MemoryStore::new());
        let registry = Arc::new(
            TransferRegistry::open(Arc::clone(&store) as Arc<dyn Store>)
                .await
                .unwrap(),
        );
        Fixture {
            store,
            chunks: ChunkStore::new(Arc::clone(&registry)),
            engine: Arc::new(AssemblyEngine::new(Arc::clone(&registry))),
            registry,
        }
    }

    async fn upload_all(f: &Fixture, data: &[u8], overall: Option<String>) -> String {
        let mut req = init_request("a.bin", data, 4);
        if let Some(overall) = overall {
            req.overall_checksum = overall;
        }
        let id = f.registry.init(&req).await.unwrap().transfer_id;
        // Deliberately out of order.
        for index in (0..req.chunk_count).rev() {
            let start = index as usize * 4;
            let part = data[start..(start + 4).min(data.len())].to_vec();
            let cs = checksum_bytes(&part);
            f.chunks.put(&id, index, part, &cs).await.unwrap();
        }
        id
    }

    #[tokio::test]
    async fn assembles_and_verifies() {
        let f = fixture().await;
        let id = upload_all(&f, DATA, None).await;

        let result = f.engine.assemble(&id).await.unwrap();
        assert_eq!(result.status, TransferStatus::Verified);
        assert!(result.checksum_match);
        assert_eq!(result.assembled_checksum, Some(checksum_bytes(DATA)));

        let AssembledFile::Bytes(bytes) = f.store.open_assembled(&id).unwrap() else {
            panic!("memory store returns bytes");
        };
        assert_eq!(bytes, DATA);
        assert_eq!(f.registry.info(&id).unwrap().status, TransferStatus::Verified);
    }

    #[tokio::test]
    async fn incomplete_transfer_not_ready() {
        let f = fixture().await;
        let id = f
            .registry
            .init(&init_request("a.bin", DATA, 4))
            .await
            .unwrap()
            .transfer_id;
        let result = f.engine.assemble(&id).await;
        assert!(matches!(result, Err(CoordinatorError::NotReady { .. })));
        assert_eq!(f.engine.runs(), 0);
    }

    #[tokio::test]
    async fn second_request_returns_cached_result() {
        let f = fixture().await;
        let id = upload_all(&f, DATA, None).await;

        let first = f.engine.assemble(&id).await.unwrap();
        let second = f.engine.assemble(&id).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(f.engine.runs(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_requests_assemble_once() {
        let f = fixture().await;
        let id = upload_all(&f, DATA, None).await;

        let mut handles = Vec::new();
        for _ in 0..8 {
            let engine = Arc::clone(&f.engine);
            let id = id.clone();
            handles.push(tokio::spawn(async move { engine.assemble(&id).await }));
        }
        let mut results = Vec::new();
        for h in handles {
            results.push(h.await.unwrap().unwrap());
        }

        assert_eq!(f.engine.runs(), 1);
        assert!(results.iter().all(|r| *r == results[0]));
        assert_eq!(results[0].status, TransferStatus::Verified);
    }

    #[tokio::test]
    async fn wrong_declared_checksum_is_assembly_corruption() {
        let f = fixture().await;
        let id = upload_all(&f, DATA, Some(checksum_bytes(b"not the file"))).await;

        let result = f.engine.assemble(&id).await.unwrap();
        assert_eq!(result.status, TransferStatus::Failed);
        assert!(!result.checksum_match);
        let failure = result.failure.unwrap();
        assert_eq!(failure.reason, FailureReason::AssemblyCorruption);
        assert!(failure.suspect_chunks.is_empty());
        assert!(f.store.open_assembled(&id).is_err());
    }

    #[tokio::test]
    async fn damaged_chunk_is_chunk_corruption() {
        let f = fixture().await;
        let id = upload_all(&f, DATA, None).await;
        f.store.corrupt_chunk(&id, 2, b"XXXX");

        let result = f.engine.assemble(&id).await.unwrap();
        assert_eq!(result.status, TransferStatus::Failed);
        let failure = result.failure.unwrap();
        assert_eq!(failure.reason, FailureReason::ChunkCorruption);
        assert_eq!(failure.suspect_chunks, vec![2]);
    }

    #[tokio::test]
    async fn cancelled_transfer_not_assembled() {
        let f = fixture().await;
        let id = upload_all(&f, DATA, None).await;
        f.registry.cancel(&id).await.unwrap();

        assert!(matches!(
            f.engine.assemble(&id).await,
            Err(CoordinatorError::TransferClosed { .. })
        ));
        assert_eq!(f.engine.runs(), 0);
    }

    #[tokio::test]
    async fn verified_transfer_cannot_be_cancelled() {
        let f = fixture().await;
        let id = upload_all(&f, DATA, None).await;
        f.engine.assemble(&id).await.unwrap();

        assert!(matches!(
            f.registry.cancel(&id).await,
            Err(CoordinatorError::TransferClosed {
                status: TransferStatus::Verified,
                ..
            })
        ));
        assert_eq!(f.registry.info(&id).unwrap().status, TransferStatus::Verified);
    }

    #[tokio::test]
    async fn failed_result_write_keeps_cache_and_status_together() {
        let f = fixture().await;
        let id = upload_all(&f, DATA, None).await;
        f.store.fail_saves_in(Some(TransferStatus::Verified));

        assert!(matches!(
            f.engine.assemble(&id).await,
            Err(CoordinatorError::Store(_))
        ));
        assert_eq!(f.registry.info(&id).unwrap().status, TransferStatus::Verified);
        let again = f.engine.assemble(&id).await.unwrap();
        assert_eq!(again.status, TransferStatus::Verified);
        assert_eq!(f.engine.runs(), 1);

        // The stored record never left `assembled`; a restart assembles again.
        f.store.fail_saves_in(None);
        let registry = Arc::new(
            TransferRegistry::open(Arc::clone(&f.store) as Arc<dyn Store>)
                .await
                .unwrap(),
        );
        assert_eq!(
            registry.info(&id).unwrap().status,
            TransferStatus::CompletePendingAssembly
        );
        let engine = AssemblyEngine::new(registry);
        assert_eq!(engine.assemble(&id).await.unwrap().status, TransferStatus::Verified);
        assert_eq!(engine.runs(), 1);
    }

    #[tokio::test]
    async fn verified_result_survives_restart() {
        let dir = tempfile::tempdir().unwrap();
        let req = init_request("a.bin", DATA, 4);
        let id = {
            let store: Arc<dyn Store> =
                Arc::new(crate::store::FsStore::open(dir.path()).unwrap());
            let registry = Arc::new(TransferRegistry::open(store).await.unwrap());
            let chunks = ChunkStore::new(Arc::clone(&registry));
            let engine = AssemblyEngine::new(Arc::clone(&registry));
            let id = registry.init(&req).await.unwrap().transfer_id;
            for index in 0..req.chunk_count {
                let start = index as usize * 4;
                let part = DATA[start..(start + 4).min(DATA.len())].to_vec();
                let cs = checksum_bytes(&part);
                chunks.put(&id, index, part, &cs).await.unwrap();
            }
            engine.assemble(&id).await.unwrap();
            id
        };

        let store: Arc<dyn Store> = Arc::new(crate::store::FsStore::open(dir.path()).unwrap());
        let registry = Arc::new(TransferRegistry::open(store).await.unwrap());
        let engine = AssemblyEngine::new(Arc::clone(&registry));
        let result = engine.assemble(&id).await.unwrap();
        assert_eq!(result.status, TransferStatus::Verified);
        assert_eq!(engine.runs(), 0);
    }
}
