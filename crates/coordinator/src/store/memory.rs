//! In-process store, used by tests and ephemeral coordinators.

use std::collections::HashMap;
use std::io::Write;
use std::sync::{Arc, Mutex};

use ferry_protocol::TransferStatus;

use super::{
    AssembledFile, AssemblySink, ChunkRecord, Store, StoreError, TransferRecord, check_key,
};

type ChunkMap = HashMap<(String, u32), (ChunkRecord, Vec<u8>)>;

/// Store that keeps everything in memory.
#[derive(Default)]
pub struct MemoryStore {
    transfers: Mutex<HashMap<String, TransferRecord>>,
    chunks: Mutex<ChunkMap>,
    assembled: Arc<Mutex<HashMap<String, Vec<u8>>>>,
    failing_status: Mutex<Option<TransferStatus>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the stored bytes of a chunk without touching its record.
    ///
    /// Simulates storage-level corruption.
    pub fn corrupt_chunk(&self, transfer_id: &str, index: u32, data: &[u8]) {
        let mut chunks = self.chunks.lock().unwrap();
        if let Some((_, bytes)) = chunks.get_mut(&(transfer_id.to_string(), index)) {
            *bytes = data.to_vec();
        }
    }

    /// Makes every save of a record in `status` fail with an I/O error.
    pub fn fail_saves_in(&self, status: Option<TransferStatus>) {
        *self.failing_status.lock().unwrap() = status;
    }
}

impl Store for MemoryStore {
    fn save_transfer(&self, record: &TransferRecord) -> Result<(), StoreError> {
        check_key(&record.transfer_id)?;
        if *self.failing_status.lock().unwrap() == Some(record.status) {
            return Err(StoreError::Io(std::io::Error::other("injected save failure")));
        }
        self.transfers
            .lock()
            .unwrap()
            .insert(record.transfer_id.clone(), record.clone());
        Ok(())
    }

    fn load_transfers(&self) -> Result<Vec<TransferRecord>, StoreError> {
        Ok(self.transfers.lock().unwrap().values().cloned().collect())
    }

    fn put_chunk(
        &self,
        transfer_id: &str,
        record: &ChunkRecord,
        data: &[u8],
    ) -> Result<(), StoreError> {
        check_key(transfer_id)?;
        self.chunks.lock().unwrap().insert(
            (transfer_id.to_string(), record.index),
            (record.clone(), data.to_vec()),
        );
        Ok(())
    }

    fn read_chunk(&self, transfer_id: &str, index: u32) -> Result<Vec<u8>, StoreError> {
        self.chunks
            .lock()
            .unwrap()
            .get(&(transfer_id.to_string(), index))
            .map(|(_, data)| data.clone())
            .ok_or_else(|| StoreError::NotFound(format!("chunk {index} of {transfer_id}")))
    }

    fn load_chunks(&self, transfer_id: &str) -> Result<Vec<ChunkRecord>, StoreError> {
        let chunks = self.chunks.lock().unwrap();
        let mut records: Vec<ChunkRecord> = chunks
            .iter()
            .filter(|((id, _), _)| id == transfer_id)
            .map(|(_, (record, _))| record.clone())
            .collect();
        records.sort_by_key(|r| r.index);
        Ok(records)
    }

    fn begin_assembly(&self, transfer_id: &str) -> Result<Box<dyn AssemblySink>, StoreError> {
        check_key(transfer_id)?;
        Ok(Box::new(MemoryAssemblySink {
            transfer_id: transfer_id.to_string(),
            buf: Vec::new(),
            target: Arc::clone(&self.assembled),
        }))
    }

    fn open_assembled(&self, transfer_id: &str) -> Result<AssembledFile, StoreError> {
        self.assembled
            .lock()
            .unwrap()
            .get(transfer_id)
            .cloned()
            .map(AssembledFile::Bytes)
            .ok_or_else(|| StoreError::NotFound(format!("assembled file of {transfer_id}")))
    }
}

struct MemoryAssemblySink {
    transfer_id: String,
    buf: Vec<u8>,
    target: Arc<Mutex<HashMap<String, Vec<u8>>>>,
}

impl Write for MemoryAssemblySink {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.buf.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

impl AssemblySink for MemoryAssemblySink {
    fn commit(self: Box<Self>) -> Result<(), StoreError> {
        let this = *self;
        this.target.lock().unwrap().insert(this.transfer_id, this.buf);
        Ok(())
    }

    fn discard(self: Box<Self>) -> Result<(), StoreError> {
        Ok(())
    }
}
