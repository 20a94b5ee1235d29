use std::fs::OpenOptions;
use std::path::{Path, PathBuf};

use log::{debug, info};
use memmap2::MmapMut;
use parking_lot::Mutex;

use crate::common::config::{RowId, TxnId, WalSeq};
use crate::common::errors::WalError;
use crate::common::time::now_micros;
use crate::recovery::wal_record::{WalIterator, WalRecord, WalRecordKind, WAL_HEADER_SIZE};

/// Write cursor: the next sequence number to assign and the byte offset the
/// next record lands at. Guarded together with the mapping by one mutex —
/// nothing touches the mapped memory without holding it.
#[derive(Debug)]
struct WalInner {
    map: MmapMut,
    next_seq: WalSeq,
    offset: usize,
}

/// Append-only, fixed-capacity, memory-mapped write-ahead log.
///
/// Records are appended strictly in increasing sequence order. A checkpoint
/// truncates the log: everything before the checkpoint is covered by the
/// saved snapshot, so the region is zeroed and the sequence restarts at 1.
pub struct Wal {
    path: PathBuf,
    capacity: usize,
    file: std::fs::File,
    inner: Mutex<WalInner>,
}

impl Wal {
    /// Creates a fresh WAL backing file of exactly `capacity` bytes.
    pub fn create(path: &Path, capacity: usize) -> Result<Self, WalError> {
        if capacity < WAL_HEADER_SIZE {
            return Err(WalError::Corrupt(format!(
                "capacity {} below minimum record size",
                capacity
            )));
        }
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)?;
        file.set_len(capacity as u64)?;
        // SAFETY: the mapping is private to this Wal and every mutation
        // happens under the inner mutex.
        let map = unsafe { MmapMut::map_mut(&file)? };
        info!("created wal at {} ({} bytes)", path.display(), capacity);
        Ok(Self {
            path: path.to_path_buf(),
            capacity,
            file,
            inner: Mutex::new(WalInner {
                map,
                next_seq: 1,
                offset: 0,
            }),
        })
    }

    /// Opens an existing WAL, recovering the cursor by scanning forward to
    /// the last valid record. This is the crash-recovery path: whatever was
    /// durably appended before the crash determines where writing resumes.
    pub fn open(path: &Path) -> Result<Self, WalError> {
        let file = OpenOptions::new().read(true).write(true).open(path)?;
        let capacity = file.metadata()?.len() as usize;
        if capacity < WAL_HEADER_SIZE {
            return Err(WalError::Corrupt(format!(
                "backing file {} is only {} bytes",
                path.display(),
                capacity
            )));
        }
        let map = unsafe { MmapMut::map_mut(&file)? };
        let mut iter = WalIterator::new(map.to_vec());
        let mut count = 0usize;
        for _ in iter.by_ref() {
            count += 1;
        }
        let (offset, last_seq) = (iter.offset(), iter.last_seq());
        debug!(
            "opened wal at {}: {} records, next seq {}, offset {}",
            path.display(),
            count,
            last_seq + 1,
            offset
        );
        Ok(Self {
            path: path.to_path_buf(),
            capacity,
            file,
            inner: Mutex::new(WalInner {
                map,
                next_seq: last_seq + 1,
                offset,
            }),
        })
    }

    pub fn get_path(&self) -> &Path {
        &self.path
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// The sequence number the next append will be given.
    pub fn next_sequence(&self) -> WalSeq {
        self.inner.lock().next_seq
    }

    /// Current write offset into the backing region.
    pub fn offset(&self) -> usize {
        self.inner.lock().offset
    }

    /// Appends one record, advancing offset and sequence atomically under
    /// the cursor lock. Fails with [`WalError::Full`] when the record would
    /// not fit in the remaining fixed capacity; the caller may checkpoint
    /// (which truncates) and retry.
    pub fn append(
        &self,
        kind: WalRecordKind,
        txn_id: TxnId,
        table: &str,
        row_id: RowId,
        payload: &[u8],
    ) -> Result<WalSeq, WalError> {
        let mut inner = self.inner.lock();
        let record = WalRecord {
            seq: inner.next_seq,
            timestamp: now_micros(),
            kind,
            txn_id,
            table: table.to_string(),
            row_id,
            payload: payload.to_vec(),
        };
        let needed = record.encoded_len();
        if inner.offset + needed > self.capacity {
            return Err(WalError::Full {
                needed,
                available: self.capacity - inner.offset,
            });
        }
        let offset = inner.offset;
        record.encode_into(&mut inner.map[offset..offset + needed])?;
        if kind.requires_flush() {
            inner.map.flush()?;
        }
        inner.offset += needed;
        let seq = inner.next_seq;
        inner.next_seq += 1;
        Ok(seq)
    }

    /// Snapshot scan of the records currently in the log.
    pub fn iter(&self) -> WalIterator {
        let inner = self.inner.lock();
        WalIterator::new(inner.map[..inner.offset].to_vec())
    }

    /// Resets the log after a checkpoint: sequence back to 1, offset to 0,
    /// region zeroed and flushed.
    pub fn truncate(&self) -> Result<(), WalError> {
        let mut inner = self.inner.lock();
        inner.map.fill(0);
        inner.map.flush()?;
        inner.next_seq = 1;
        inner.offset = 0;
        info!("wal truncated at {}", self.path.display());
        Ok(())
    }

    /// Forces the mapped region to stable storage.
    pub fn flush(&self) -> Result<(), WalError> {
        self.inner.lock().map.flush()?;
        self.file.sync_all()?;
        Ok(())
    }
}
