//! Transfer registry: durable metadata and lifecycle state per transfer.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, RwLock};

use chrono::Utc;
use ferry_protocol::{
    AssembleResponse, InitUploadRequest, InitUploadResponse, TransferInfo, TransferStatus,
};
use ferry_transfer::{ChunkPlan, checksum_bytes, is_valid_checksum, validate_filename};
use tracing::{debug, info, warn};

use crate::error::CoordinatorError;
use crate::store::{ChunkRecord, Store, StoreError, TransferRecord, check_key};

/// Runs a blocking store operation on the blocking pool.
pub(crate) async fn run_blocking<T, F>(store: &Arc<dyn Store>, f: F) -> Result<T, CoordinatorError>
where
    T: Send + 'static,
    F: FnOnce(&dyn Store) -> Result<T, StoreError> + Send + 'static,
{
    let store = Arc::clone(store);
    tokio::task::spawn_blocking(move || f(store.as_ref()))
        .await
        .map_err(|e| CoordinatorError::Internal(format!("task join error: {e}")))?
        .map_err(CoordinatorError::from)
}

/// Content-derived identity: the same file maps to the same transfer
/// whatever chunk size the sender picked for this attempt.
pub fn derive_transfer_id(req: &InitUploadRequest) -> String {
    let key = format!(
        "{}:{}:{}",
        req.filename, req.total_size, req.overall_checksum
    );
    checksum_bytes(key.as_bytes())[..32].to_string()
}

// ---------------------------------------------------------------------------
// TransferEntry
// ---------------------------------------------------------------------------

/// In-memory state of one transfer.
pub struct TransferEntry {
    id: String,
    plan: ChunkPlan,
    state: Mutex<EntryState>,
    /// One lock per chunk index; serializes the duplicate/conflict decision.
    chunk_locks: Box<[tokio::sync::Mutex<()>]>,
    /// Transfer-wide exclusion for assembly and cancellation; holds the
    /// cached assembly result once one exists.
    pub(crate) assembly: tokio::sync::Mutex<Option<AssembleResponse>>,
    /// Serializes record writes so the newest snapshot is written last.
    persist_lock: tokio::sync::Mutex<()>,
}

struct EntryState {
    record: TransferRecord,
    chunks: BTreeMap<u32, ChunkRecord>,
}

impl TransferEntry {
    fn new(
        record: TransferRecord,
        chunks: Vec<ChunkRecord>,
        plan: ChunkPlan,
        cached: Option<AssembleResponse>,
    ) -> Self {
        let chunk_locks = (0..plan.chunk_count())
            .map(|_| tokio::sync::Mutex::new(()))
            .collect();
        Self {
            id: record.transfer_id.clone(),
            plan,
            state: Mutex::new(EntryState {
                record,
                chunks: chunks.into_iter().map(|c| (c.index, c)).collect(),
            }),
            chunk_locks,
            assembly: tokio::sync::Mutex::new(cached),
            persist_lock: tokio::sync::Mutex::new(()),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn plan(&self) -> &ChunkPlan {
        &self.plan
    }

    pub fn record(&self) -> TransferRecord {
        self.state.lock().unwrap().record.clone()
    }

    pub fn status(&self) -> TransferStatus {
        self.state.lock().unwrap().record.status
    }

    pub fn info(&self) -> TransferInfo {
        let s = self.state.lock().unwrap();
        s.record.to_info(s.chunks.len() as u32)
    }

    pub fn chunk(&self, index: u32) -> Option<ChunkRecord> {
        self.state.lock().unwrap().chunks.get(&index).cloned()
    }

    /// All chunk records, in index order.
    pub fn chunks(&self) -> Vec<ChunkRecord> {
        self.state.lock().unwrap().chunks.values().cloned().collect()
    }

    pub fn stored_indices(&self) -> Vec<u32> {
        self.state.lock().unwrap().chunks.keys().copied().collect()
    }

    pub fn received(&self) -> u32 {
        self.state.lock().unwrap().chunks.len() as u32
    }

    /// Indices not yet stored, ascending.
    pub fn missing(&self) -> Vec<u32> {
        let s = self.state.lock().unwrap();
        (0..self.plan.chunk_count())
            .filter(|i| !s.chunks.contains_key(i))
            .collect()
    }

    pub fn is_complete(&self) -> bool {
        self.received() == self.plan.chunk_count()
    }

    pub(crate) fn chunk_lock(&self, index: u32) -> Option<&tokio::sync::Mutex<()>> {
        self.chunk_locks.get(index as usize)
    }

    /// Records a newly stored chunk and advances the status.
    ///
    /// Returns the received count and whether the status changed.
    pub(crate) fn insert_chunk(&self, chunk: ChunkRecord) -> (u32, bool) {
        let mut s = self.state.lock().unwrap();
        s.chunks.insert(chunk.index, chunk);
        let received = s.chunks.len() as u32;
        let next = if received == self.plan.chunk_count() {
            TransferStatus::CompletePendingAssembly
        } else {
            TransferStatus::Uploading
        };
        let changed = matches!(
            s.record.status,
            TransferStatus::Initiated | TransferStatus::Uploading
        ) && s.record.status != next;
        if changed {
            s.record.status = next;
        }
        s.record.updated_at = Utc::now();
        (received, changed)
    }

    /// Applies `f` to the record under the state lock.
    pub(crate) fn update<R>(&self, f: impl FnOnce(&mut TransferRecord) -> R) -> R {
        let mut s = self.state.lock().unwrap();
        let out = f(&mut s.record);
        s.record.updated_at = Utc::now();
        out
    }

    fn matches_manifest(&self, req: &InitUploadRequest) -> bool {
        let s = self.state.lock().unwrap();
        s.record.total_size == req.total_size && s.record.overall_checksum == req.overall_checksum
    }
}

// ---------------------------------------------------------------------------
// TransferRegistry
// ---------------------------------------------------------------------------

/// Index of every transfer known to the coordinator.
pub struct TransferRegistry {
    store: Arc<dyn Store>,
    transfers: RwLock<HashMap<String, Arc<TransferEntry>>>,
}

impl TransferRegistry {
    /// Loads every transfer and chunk record from `store`.
    ///
    /// A transfer left in `assembled` by a crash mid-assembly is reset to
    /// `complete_pending_assembly`; upload states are re-derived from the
    /// stored chunk set.
    pub async fn open(store: Arc<dyn Store>) -> Result<Self, CoordinatorError> {
        let loaded = run_blocking(&store, |s| {
            let mut out = Vec::new();
            for record in s.load_transfers()? {
                let chunks = s.load_chunks(&record.transfer_id)?;
                out.push((record, chunks));
            }
            Ok(out)
        })
        .await?;

        let registry = Self {
            store,
            transfers: RwLock::new(HashMap::new()),
        };

        for (mut record, chunks) in loaded {
            let plan =
                match ChunkPlan::from_manifest(record.total_size, record.chunk_size, record.chunk_count) {
                    Ok(plan) => plan,
                    Err(e) => {
                        warn!(transfer = %record.transfer_id, error = %e, "skipping transfer with invalid manifest");
                        continue;
                    }
                };
            let chunks: Vec<ChunkRecord> = chunks
                .into_iter()
                .filter(|c| c.index < plan.chunk_count())
                .collect();

            let recovered = recover_status(record.status, chunks.len() as u32, plan.chunk_count());
            let changed = recovered != record.status;
            if changed {
                info!(
                    transfer = %record.transfer_id,
                    from = %record.status,
                    to = %recovered,
                    "recovered transfer status"
                );
                record.status = recovered;
                record.updated_at = Utc::now();
            }

            let cached = cached_result(&record);
            let entry = Arc::new(TransferEntry::new(record, chunks, plan, cached));
            if changed {
                registry.persist(&entry).await?;
            }
            registry
                .transfers
                .write()
                .unwrap()
                .insert(entry.id().to_string(), entry);
        }

        info!(transfers = registry.len(), "transfer registry loaded");
        Ok(registry)
    }

    pub fn len(&self) -> usize {
        self.transfers.read().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    /// Looks up a transfer.
    pub fn get(&self, transfer_id: &str) -> Result<Arc<TransferEntry>, CoordinatorError> {
        self.transfers
            .read()
            .unwrap()
            .get(transfer_id)
            .cloned()
            .ok_or_else(|| CoordinatorError::UnknownTransfer(transfer_id.to_string()))
    }

    /// Creates a transfer or re-attaches to an existing one with the same
    /// identity.
    pub async fn init(
        &self,
        req: &InitUploadRequest,
    ) -> Result<InitUploadResponse, CoordinatorError> {
        validate_filename(&req.filename)
            .map_err(|e| CoordinatorError::InvalidRequest(e.to_string()))?;
        if !is_valid_checksum(&req.overall_checksum) {
            return Err(CoordinatorError::InvalidRequest(
                "overall_checksum must be a lowercase hex SHA-256 digest".into(),
            ));
        }
        let plan = ChunkPlan::from_manifest(req.total_size, req.chunk_size, req.chunk_count)
            .map_err(|e| CoordinatorError::InvalidRequest(e.to_string()))?;

        let transfer_id = match &req.transfer_id {
            Some(id) => {
                check_key(id).map_err(|_| {
                    CoordinatorError::InvalidRequest(format!("invalid transfer id: {id}"))
                })?;
                id.clone()
            }
            None => derive_transfer_id(req),
        };

        if let Ok(existing) = self.get(&transfer_id) {
            return self.reattach(&existing, req);
        }

        let now = Utc::now();
        let record = TransferRecord {
            transfer_id: transfer_id.clone(),
            filename: req.filename.clone(),
            total_size: req.total_size,
            chunk_count: req.chunk_count,
            chunk_size: req.chunk_size,
            priority: req.priority,
            overall_checksum: req.overall_checksum.clone(),
            status: TransferStatus::Initiated,
            created_at: now,
            updated_at: now,
            completed_at: None,
            assembled_checksum: None,
            failure: None,
        };
        let fresh = Arc::new(TransferEntry::new(record, Vec::new(), plan, None));

        // Insert first so a concurrent init of the same identity re-attaches.
        let inserted = {
            let mut transfers = self.transfers.write().unwrap();
            match transfers.get(&transfer_id) {
                Some(existing) => Err(Arc::clone(existing)),
                None => {
                    transfers.insert(transfer_id.clone(), Arc::clone(&fresh));
                    Ok(())
                }
            }
        };
        if let Err(existing) = inserted {
            return self.reattach(&existing, req);
        }

        if let Err(e) = self.persist(&fresh).await {
            self.transfers.write().unwrap().remove(&transfer_id);
            return Err(e);
        }

        info!(
            transfer = %transfer_id,
            filename = %req.filename,
            total_size = req.total_size,
            chunks = req.chunk_count,
            priority = %req.priority,
            "transfer initiated"
        );

        Ok(InitUploadResponse {
            transfer_id,
            resumed: false,
            stored_chunks: Vec::new(),
            chunk_size: req.chunk_size,
            chunk_count: req.chunk_count,
        })
    }

    fn reattach(
        &self,
        entry: &TransferEntry,
        req: &InitUploadRequest,
    ) -> Result<InitUploadResponse, CoordinatorError> {
        if !entry.matches_manifest(req) {
            return Err(CoordinatorError::ManifestMismatch(entry.id().to_string()));
        }
        let status = entry.status();
        if status.is_closed() {
            return Err(CoordinatorError::TransferClosed {
                id: entry.id().to_string(),
                status,
            });
        }
        let stored_chunks = entry.stored_indices();
        let plan = *entry.plan();
        if plan.chunk_size() != req.chunk_size {
            debug!(
                transfer = %entry.id(),
                requested = req.chunk_size,
                stored = plan.chunk_size(),
                "keeping stored chunk plan"
            );
        }
        info!(
            transfer = %entry.id(),
            stored = stored_chunks.len(),
            status = %status,
            "transfer re-attached"
        );
        Ok(InitUploadResponse {
            transfer_id: entry.id().to_string(),
            resumed: true,
            stored_chunks,
            chunk_size: plan.chunk_size(),
            chunk_count: plan.chunk_count(),
        })
    }

    /// Lists all transfers, newest first.
    pub fn list(&self) -> Vec<TransferInfo> {
        let mut infos: Vec<TransferInfo> = self
            .transfers
            .read()
            .unwrap()
            .values()
            .map(|e| e.info())
            .collect();
        infos.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        infos
    }

    pub fn info(&self, transfer_id: &str) -> Result<TransferInfo, CoordinatorError> {
        Ok(self.get(transfer_id)?.info())
    }

    /// Marks a transfer cancelled. Stored chunks are kept.
    ///
    /// Cancelling an already cancelled transfer is a no-op.
    pub async fn cancel(&self, transfer_id: &str) -> Result<TransferInfo, CoordinatorError> {
        let entry = self.get(transfer_id)?;
        // Excludes a concurrent assembly.
        let _assembly = entry.assembly.lock().await;

        let status = entry.status();
        if status == TransferStatus::Cancelled {
            return Ok(entry.info());
        }
        if status.is_terminal() {
            return Err(CoordinatorError::TransferClosed {
                id: transfer_id.to_string(),
                status,
            });
        }

        entry.update(|r| {
            r.status = TransferStatus::Cancelled;
            r.completed_at = Some(Utc::now());
        });
        self.persist(&entry).await?;
        info!(transfer = %transfer_id, "transfer cancelled");
        Ok(entry.info())
    }

    /// Writes the entry's current record to the store.
    pub(crate) async fn persist(&self, entry: &TransferEntry) -> Result<(), CoordinatorError> {
        let _guard = entry.persist_lock.lock().await;
        let record = entry.record();
        debug!(transfer = %record.transfer_id, status = %record.status, "persisting transfer record");
        run_blocking(&self.store, move |s| s.save_transfer(&record)).await
    }
}

fn recover_status(status: TransferStatus, received: u32, chunk_count: u32) -> TransferStatus {
    match status {
        TransferStatus::Assembled => TransferStatus::CompletePendingAssembly,
        TransferStatus::Initiated | TransferStatus::Uploading if received == chunk_count => {
            TransferStatus::CompletePendingAssembly
        }
        TransferStatus::Initiated if received > 0 => TransferStatus::Uploading,
        other => other,
    }
}

/// Rebuilds the cached assembly outcome of a transfer that already finished.
fn cached_result(record: &TransferRecord) -> Option<AssembleResponse> {
    match record.status {
        TransferStatus::Verified | TransferStatus::Failed => Some(AssembleResponse {
            transfer_id: record.transfer_id.clone(),
            status: record.status,
            checksum_match: record.status == TransferStatus::Verified,
            assembled_checksum: record.assembled_checksum.clone(),
            failure: record.failure.clone(),
        }),
        _ => None,
    }
}
