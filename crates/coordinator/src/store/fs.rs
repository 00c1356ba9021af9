//! Filesystem-backed store.
//!
//! Layout under the data directory:
//!
//! ```text
//! transfers/<id>/transfer.json
//! transfers/<id>/chunks/chunk_000000.bin
//! transfers/<id>/chunks/chunk_000000.json
//! transfers/<id>/assembled.bin
//! ```

use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use super::{
    AssembledFile, AssemblySink, ChunkRecord, Store, StoreError, TransferRecord, check_key,
};

const TRANSFER_FILE: &str = "transfer.json";
const ASSEMBLED_FILE: &str = "assembled.bin";

/// Store that keeps records and chunk bytes in a directory tree.
pub struct FsStore {
    root: PathBuf,
}

impl FsStore {
    /// Opens (creating if needed) a store rooted at `data_dir`.
    pub fn open(data_dir: &Path) -> Result<Self, StoreError> {
        let root = data_dir.join("transfers");
        fs::create_dir_all(&root)?;
        debug!(path = %root.display(), "filesystem store opened");
        Ok(Self { root })
    }

    fn transfer_dir(&self, transfer_id: &str) -> Result<PathBuf, StoreError> {
        check_key(transfer_id)?;
        Ok(self.root.join(transfer_id))
    }

    fn chunks_dir(&self, transfer_id: &str) -> Result<PathBuf, StoreError> {
        Ok(self.transfer_dir(transfer_id)?.join("chunks"))
    }
}

fn chunk_stem(index: u32) -> String {
    format!("chunk_{index:06}")
}

/// Writes `data` to a sibling temp file, syncs it, then renames over `path`.
fn write_atomic(path: &Path, data: &[u8]) -> Result<(), StoreError> {
    let tmp = temp_path(path);
    {
        let mut file = File::create(&tmp)?;
        file.write_all(data)?;
        file.sync_all()?;
    }
    fs::rename(&tmp, path)?;
    Ok(())
}

fn temp_path(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    path.with_file_name(format!(".{name}.{}.tmp", uuid::Uuid::new_v4().simple()))
}

impl Store for FsStore {
    fn save_transfer(&self, record: &TransferRecord) -> Result<(), StoreError> {
        let dir = self.transfer_dir(&record.transfer_id)?;
        fs::create_dir_all(dir.join("chunks"))?;
        let json = serde_json::to_vec_pretty(record)?;
        write_atomic(&dir.join(TRANSFER_FILE), &json)
    }

    fn load_transfers(&self) -> Result<Vec<TransferRecord>, StoreError> {
        let mut records = Vec::new();
        for entry in fs::read_dir(&self.root)? {
            let path = entry?.path().join(TRANSFER_FILE);
            if !path.is_file() {
                continue;
            }
            let parsed = fs::read(&path)
                .map_err(StoreError::from)
                .and_then(|raw| serde_json::from_slice::<TransferRecord>(&raw).map_err(Into::into));
            match parsed {
                Ok(record) => records.push(record),
                Err(e) => warn!(path = %path.display(), error = %e, "skipping unreadable transfer record"),
            }
        }
        Ok(records)
    }

    fn put_chunk(
        &self,
        transfer_id: &str,
        record: &ChunkRecord,
        data: &[u8],
    ) -> Result<(), StoreError> {
        let dir = self.chunks_dir(transfer_id)?;
        fs::create_dir_all(&dir)?;
        let stem = chunk_stem(record.index);
        write_atomic(&dir.join(format!("{stem}.bin")), data)?;
        let json = serde_json::to_vec(record)?;
        write_atomic(&dir.join(format!("{stem}.json")), &json)
    }

    fn read_chunk(&self, transfer_id: &str, index: u32) -> Result<Vec<u8>, StoreError> {
        let path = self
            .chunks_dir(transfer_id)?
            .join(format!("{}.bin", chunk_stem(index)));
        match fs::read(&path) {
            Ok(data) => Ok(data),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(StoreError::NotFound(
                format!("chunk {index} of {transfer_id}"),
            )),
            Err(e) => Err(e.into()),
        }
    }

    fn load_chunks(&self, transfer_id: &str) -> Result<Vec<ChunkRecord>, StoreError> {
        let dir = self.chunks_dir(transfer_id)?;
        if !dir.is_dir() {
            return Ok(Vec::new());
        }

        let mut records = Vec::new();
        for entry in fs::read_dir(&dir)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let record: ChunkRecord = match fs::read(&path)
                .map_err(StoreError::from)
                .and_then(|raw| serde_json::from_slice(&raw).map_err(Into::into))
            {
                Ok(record) => record,
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "skipping unreadable chunk record");
                    continue;
                }
            };
            // A record without its bytes means the bytes were lost; treat as missing.
            if !dir.join(format!("{}.bin", chunk_stem(record.index))).is_file() {
                warn!(transfer = %transfer_id, chunk = record.index, "chunk record without data");
                continue;
            }
            records.push(record);
        }
        records.sort_by_key(|r| r.index);
        Ok(records)
    }

    fn begin_assembly(&self, transfer_id: &str) -> Result<Box<dyn AssemblySink>, StoreError> {
        let target = self.transfer_dir(transfer_id)?.join(ASSEMBLED_FILE);
        let tmp = temp_path(&target);
        let file = File::create(&tmp)?;
        Ok(Box::new(FsAssemblySink {
            writer: BufWriter::new(file),
            tmp,
            target,
        }))
    }

    fn open_assembled(&self, transfer_id: &str) -> Result<AssembledFile, StoreError> {
        let path = self.transfer_dir(transfer_id)?.join(ASSEMBLED_FILE);
        if path.is_file() {
            Ok(AssembledFile::Path(path))
        } else {
            Err(StoreError::NotFound(format!("assembled file of {transfer_id}")))
        }
    }
}

struct FsAssemblySink {
    writer: BufWriter<File>,
    tmp: PathBuf,
    target: PathBuf,
}

impl Write for FsAssemblySink {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.writer.write(buf)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.writer.flush()
    }
}

impl AssemblySink for FsAssemblySink {
    fn commit(self: Box<Self>) -> Result<(), StoreError> {
        let file = self
            .writer
            .into_inner()
            .map_err(|e| StoreError::Io(e.into_error()))?;
        file.sync_all()?;
        fs::rename(&self.tmp, &self.target)?;
        Ok(())
    }

    fn discard(self: Box<Self>) -> Result<(), StoreError> {
        drop(self.writer);
        match fs::remove_file(&self.tmp) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use ferry_protocol::{Priority, TransferStatus};
    use ferry_transfer::checksum_bytes;
    use std::io::Read;
    use tempfile::TempDir;

    fn record(id: &str) -> TransferRecord {
        let now = Utc::now();
        TransferRecord {
            transfer_id: id.into(),
            filename: "a.bin".into(),
            total_size: 8,
            chunk_count: 2,
            chunk_size: 4,
            priority: Priority::Normal,
            overall_checksum: checksum_bytes(b"AAAABBBB"),
            status: TransferStatus::Initiated,
            created_at: now,
            updated_at: now,
            completed_at: None,
            assembled_checksum: None,
            failure: None,
        }
    }

    fn chunk(index: u32, data: &[u8]) -> ChunkRecord {
        ChunkRecord {
            index,
            offset: u64::from(index) * 4,
            size: data.len() as u64,
            checksum: checksum_bytes(data),
            stored_at: Utc::now(),
        }
    }

    #[test]
    fn transfer_records_survive_reopen() {
        let dir = TempDir::new().unwrap();
        {
            let store = FsStore::open(dir.path()).unwrap();
            store.save_transfer(&record("t1")).unwrap();
            store.save_transfer(&record("t2")).unwrap();
        }

        let store = FsStore::open(dir.path()).unwrap();
        let mut ids: Vec<String> = store
            .load_transfers()
            .unwrap()
            .into_iter()
            .map(|r| r.transfer_id)
            .collect();
        ids.sort();
        assert_eq!(ids, vec!["t1", "t2"]);
    }

    #[test]
    fn chunk_files_use_padded_names() {
        let dir = TempDir::new().unwrap();
        let store = FsStore::open(dir.path()).unwrap();
        store.save_transfer(&record("t1")).unwrap();
        store.put_chunk("t1", &chunk(1, b"BBBB"), b"BBBB").unwrap();

        let chunk_path = dir.path().join("transfers/t1/chunks/chunk_000001.bin");
        assert_eq!(fs::read(chunk_path).unwrap(), b"BBBB");
        assert_eq!(store.read_chunk("t1", 1).unwrap(), b"BBBB");
    }

    #[test]
    fn load_chunks_sorted_and_skips_orphans() {
        let dir = TempDir::new().unwrap();
        let store = FsStore::open(dir.path()).unwrap();
        store.save_transfer(&record("t1")).unwrap();
        store.put_chunk("t1", &chunk(1, b"BBBB"), b"BBBB").unwrap();
        store.put_chunk("t1", &chunk(0, b"AAAA"), b"AAAA").unwrap();
        fs::remove_file(dir.path().join("transfers/t1/chunks/chunk_000001.bin")).unwrap();

        let chunks = store.load_chunks("t1").unwrap();
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].index, 0);
    }

    #[test]
    fn read_missing_chunk_is_not_found() {
        let dir = TempDir::new().unwrap();
        let store = FsStore::open(dir.path()).unwrap();
        store.save_transfer(&record("t1")).unwrap();
        assert!(matches!(
            store.read_chunk("t1", 0),
            Err(StoreError::NotFound(_))
        ));
    }

    #[test]
    fn rejects_traversal_keys() {
        let dir = TempDir::new().unwrap();
        let store = FsStore::open(dir.path()).unwrap();
        assert!(matches!(
            store.read_chunk("../etc", 0),
            Err(StoreError::InvalidKey(_))
        ));
    }

    #[test]
    fn assembly_visible_only_after_commit() {
        let dir = TempDir::new().unwrap();
        let store = FsStore::open(dir.path()).unwrap();
        store.save_transfer(&record("t1")).unwrap();

        let mut sink = store.begin_assembly("t1").unwrap();
        sink.write_all(b"AAAABBBB").unwrap();
        assert!(store.open_assembled("t1").is_err());
        sink.commit().unwrap();

        let AssembledFile::Path(path) = store.open_assembled("t1").unwrap() else {
            panic!("expected a path");
        };
        let mut content = Vec::new();
        File::open(path).unwrap().read_to_end(&mut content).unwrap();
        assert_eq!(content, b"AAAABBBB");
    }

    #[test]
    fn discarded_assembly_leaves_nothing() {
        let dir = TempDir::new().unwrap();
        let store = FsStore::open(dir.path()).unwrap();
        store.save_transfer(&record("t1")).unwrap();

        let mut sink = store.begin_assembly("t1").unwrap();
        sink.write_all(b"garbage").unwrap();
        sink.discard().unwrap();

        assert!(store.open_assembled("t1").is_err());
        let leftovers: Vec<_> = fs::read_dir(dir.path().join("transfers/t1"))
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().ends_with(".tmp"))
            .collect();
        assert!(leftovers.is_empty());
    }
}
