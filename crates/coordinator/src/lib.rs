//! Ferry coordinator: accepts chunks idempotently, tracks per-transfer
//! completion and reassembles verified files.
//!
//! # Components
//!
//! - [`TransferRegistry`]: durable transfer metadata and lifecycle state
//! - [`ChunkStore`]: idempotent chunk repository
//! - [`AssemblyEngine`]: at-most-once assembly and verification
//! - [`server`]: HTTP surface over the three

pub mod assembly;
pub mod chunk_store;
pub mod config;
pub mod error;
pub mod registry;
pub mod server;
pub mod store;

use std::sync::Arc;

use ferry_protocol::{
    AssembleResponse, ChunkUploadResponse, InitUploadRequest, InitUploadResponse, TransferInfo,
    TransferStatus,
};

pub use assembly::AssemblyEngine;
pub use chunk_store::ChunkStore;
pub use config::CoordinatorConfig;
pub use error::CoordinatorError;
pub use registry::{TransferEntry, TransferRegistry, derive_transfer_id};
pub use store::{AssembledFile, FsStore, MemoryStore, Store, StoreError};

/// The registry, chunk store and assembly engine over one [`Store`].
pub struct Coordinator {
    registry: Arc<TransferRegistry>,
    chunks: ChunkStore,
    assembly: AssemblyEngine,
}

impl Coordinator {
    /// Loads all persisted state from `store`.
    pub async fn open(store: Arc<dyn Store>) -> Result<Self, CoordinatorError> {
        let registry = Arc::new(TransferRegistry::open(store).await?);
        Ok(Self {
            chunks: ChunkStore::new(Arc::clone(&registry)),
            assembly: AssemblyEngine::new(Arc::clone(&registry)),
            registry,
        })
    }

    pub fn registry(&self) -> &TransferRegistry {
        &self.registry
    }

    pub fn chunks(&self) -> &ChunkStore {
        &self.chunks
    }

    pub fn assembly(&self) -> &AssemblyEngine {
        &self.assembly
    }

    pub async fn init(&self, req: &InitUploadRequest) -> Result<InitUploadResponse, CoordinatorError> {
        self.registry.init(req).await
    }

    pub async fn put_chunk(
        &self,
        transfer_id: &str,
        chunk_index: u32,
        data: Vec<u8>,
        checksum: &str,
    ) -> Result<ChunkUploadResponse, CoordinatorError> {
        self.chunks.put(transfer_id, chunk_index, data, checksum).await
    }

    pub fn missing(&self, transfer_id: &str) -> Result<Vec<u32>, CoordinatorError> {
        self.chunks.missing(transfer_id)
    }

    pub async fn assemble(&self, transfer_id: &str) -> Result<AssembleResponse, CoordinatorError> {
        self.assembly.assemble(transfer_id).await
    }

    pub async fn cancel(&self, transfer_id: &str) -> Result<TransferInfo, CoordinatorError> {
        self.registry.cancel(transfer_id).await
    }

    /// Opens the assembled file of a verified transfer.
    pub async fn download(
        &self,
        transfer_id: &str,
    ) -> Result<(TransferInfo, AssembledFile), CoordinatorError> {
        let info = self.registry.info(transfer_id)?;
        if info.status != TransferStatus::Verified {
            return Err(CoordinatorError::NotReady {
                id: transfer_id.to_string(),
                reason: format!("transfer is {}, not verified", info.status),
            });
        }
        let id = transfer_id.to_string();
        let file =
            registry::run_blocking(self.registry.store(), move |s| s.open_assembled(&id)).await?;
        Ok((info, file))
    }
}
