use std::fs::{self, File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use log::{debug, info, warn};
use parking_lot::Mutex;

use crate::catalog::{Column, Database, Row};
use crate::common::config::{
    PageId, RowId, TxnId, WalSeq, DB_PAGE_SIZE, PERSIST_HEADER_SIZE, WAL_DEFAULT_CAPACITY,
};
use crate::common::errors::PersistError;
use crate::common::time::now_secs;
use crate::recovery::replay::replay;
use crate::recovery::wal::Wal;
use crate::recovery::wal_record::WalRecordKind;
use crate::storage::page::{Page, PageCache};
use crate::storage::persist::header::PersistentHeader;
use crate::storage::persist::serialize::{
    decode_foreign_key, decode_table, encode_foreign_key, encode_row, encode_schema, encode_table,
    table_file_name, validate_table_name,
};

const DB_FILE_NAME: &str = "stratum.rdb";
const WAL_FILE_NAME: &str = "stratum.wal";
const FK_FILE_NAME: &str = "foreign_keys.rdb";
const PAGE_CACHE_CAPACITY: usize = 256;

// On-disk page record: | id u64 | version u32 | checksum u32 | reserved 16 | data |
const PAGE_OFFSET_ID: usize = 0;
const PAGE_OFFSET_VERSION: usize = 8;
const PAGE_OFFSET_CHECKSUM: usize = 12;
const PAGE_OFFSET_DATA: usize = 32;

/// How much durability work the manager performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PersistMode {
    /// No disk work at all.
    Memory,
    /// WAL logging only; checkpoints happen on explicit request.
    WalOnly,
    /// WAL logging plus a checkpoint on close.
    Checkpoint,
    /// WAL logging, checkpoint on close, and interval-driven checkpoints.
    Full,
}

impl PersistMode {
    fn uses_wal(self) -> bool {
        !matches!(self, PersistMode::Memory)
    }

    fn checkpoint_on_close(self) -> bool {
        matches!(self, PersistMode::Checkpoint | PersistMode::Full)
    }
}

impl FromStr for PersistMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "memory" => Ok(PersistMode::Memory),
            "wal" => Ok(PersistMode::WalOnly),
            "checkpoint" => Ok(PersistMode::Checkpoint),
            "full" => Ok(PersistMode::Full),
            other => Err(format!("unknown persistence mode '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Status {
    Closed,
    Open,
}

#[derive(Debug)]
struct ManagerState {
    status: Status,
    header: PersistentHeader,
    last_checkpoint_at: u64,
}

/// Orchestrates the on-disk database file, the WAL and the page cache.
///
/// State machine: Closed -> `open` -> Open (dirty as mutations are logged)
/// -> `force_checkpoint` -> Checkpointed -> `close` -> Closed. One exclusive
/// lock guards all manager state; a concurrent checkpoint request while one
/// is in flight is a silent no-op.
pub struct PersistenceManager {
    data_dir: PathBuf,
    mode: PersistMode,
    checkpoint_interval: Duration,
    state: Mutex<ManagerState>,
    wal: Option<Wal>,
    page_cache: Mutex<PageCache>,
    checkpoint_in_flight: AtomicBool,
}

impl PersistenceManager {
    pub fn new(data_dir: &Path, mode: PersistMode) -> Result<Self, PersistError> {
        Self::with_checkpoint_interval(data_dir, mode, Duration::from_secs(300))
    }

    pub fn with_checkpoint_interval(
        data_dir: &Path,
        mode: PersistMode,
        checkpoint_interval: Duration,
    ) -> Result<Self, PersistError> {
        fs::create_dir_all(data_dir)?;
        let wal = if mode.uses_wal() {
            let wal_path = data_dir.join(WAL_FILE_NAME);
            let wal = if wal_path.exists() {
                Wal::open(&wal_path)?
            } else {
                Wal::create(&wal_path, WAL_DEFAULT_CAPACITY)?
            };
            Some(wal)
        } else {
            None
        };
        Ok(Self {
            data_dir: data_dir.to_path_buf(),
            mode,
            checkpoint_interval,
            state: Mutex::new(ManagerState {
                status: Status::Closed,
                header: PersistentHeader::new(),
                last_checkpoint_at: 0,
            }),
            wal,
            page_cache: Mutex::new(PageCache::new(PAGE_CACHE_CAPACITY)),
            checkpoint_in_flight: AtomicBool::new(false),
        })
    }

    pub fn get_mode(&self) -> PersistMode {
        self.mode
    }

    pub fn get_data_dir(&self) -> &Path {
        &self.data_dir
    }

    pub fn is_open(&self) -> bool {
        self.state.lock().status == Status::Open
    }

    pub fn get_wal(&self) -> Option<&Wal> {
        self.wal.as_ref()
    }

    fn db_path(&self) -> PathBuf {
        self.data_dir.join(DB_FILE_NAME)
    }

    /// Opens the database: loads the header, every `table_*.rdb` file and
    /// the foreign-key records into a staging database, replays the WAL on
    /// top, and only then commits the result to `db`. A failure anywhere
    /// leaves `db` exactly as it was.
    pub fn open(&self, db: &mut Database) -> Result<(), PersistError> {
        let mut state = self.state.lock();
        if state.status == Status::Open {
            return Ok(());
        }

        let db_path = self.db_path();
        let mut header = if db_path.exists() {
            let mut buf = vec![0u8; PERSIST_HEADER_SIZE];
            let mut file = File::open(&db_path)?;
            file.read_exact(&mut buf)?;
            PersistentHeader::decode(&buf)?
        } else {
            PersistentHeader::new()
        };

        let mut staging = self.load_staging()?;
        if let Some(wal) = &self.wal {
            let summary = replay(wal, &mut staging)?;
            if summary.applied > 0 {
                info!(
                    "recovered {} wal records up to seq {}",
                    summary.applied, summary.last_seq
                );
            }
            header.wal_seq = wal.next_sequence();
        }

        // Everything loaded cleanly: commit to the caller's handle.
        *db = staging;
        header.table_count = db.table_count() as u32;
        if self.mode != PersistMode::Memory && !db_path.exists() {
            self.write_header(&header)?;
        }
        state.header = header;
        state.status = Status::Open;
        info!(
            "opened database at {} ({} tables)",
            self.data_dir.display(),
            db.table_count()
        );
        Ok(())
    }

    /// Persists the full database: header, every table file, the foreign-key
    /// list, each flushed to stable storage.
    pub fn save(&self, db: &Database) -> Result<(), PersistError> {
        let mut state = self.state.lock();
        self.save_locked(&mut state, db, None)
    }

    /// Best-effort save with a deadline, checked between steps. If the
    /// timeout fires mid-save the result is `Err(Timeout)` and the on-disk
    /// state may be a partial save — the WAL still covers recovery.
    pub fn save_with_timeout(&self, db: &Database, timeout: Duration) -> Result<(), PersistError> {
        let mut state = self.state.lock();
        let deadline = Instant::now() + timeout;
        self.save_locked(&mut state, db, Some(deadline))
    }

    /// Reloads `db` from disk, without WAL replay. Staging-then-commit: a
    /// corrupt file fails the whole load and `db` keeps its prior contents.
    pub fn load(&self, db: &mut Database) -> Result<(), PersistError> {
        let state = self.state.lock();
        if state.status != Status::Open {
            return Err(PersistError::Closed);
        }
        let staging = self.load_staging()?;
        *db = staging;
        Ok(())
    }

    /// Saves the full database and truncates the WAL. Idempotent under
    /// concurrency: a checkpoint request while another is in flight returns
    /// without doing any work.
    pub fn force_checkpoint(&self, db: &Database) -> Result<(), PersistError> {
        if self.checkpoint_in_flight.swap(true, Ordering::SeqCst) {
            debug!("checkpoint already in flight, skipping");
            return Ok(());
        }
        let result = self.checkpoint_locked(db);
        self.checkpoint_in_flight.store(false, Ordering::SeqCst);
        result
    }

    /// Interval-driven checkpoint, active in `Full` mode only.
    pub fn maybe_checkpoint(&self, db: &Database) -> Result<(), PersistError> {
        if self.mode != PersistMode::Full {
            return Ok(());
        }
        let due = {
            let state = self.state.lock();
            state.status == Status::Open
                && now_secs().saturating_sub(state.last_checkpoint_at)
                    >= self.checkpoint_interval.as_secs()
        };
        if due {
            self.force_checkpoint(db)?;
        }
        Ok(())
    }

    /// Final save, a checkpoint when the mode requires one, then Closed.
    pub fn close(&self, db: &Database) -> Result<(), PersistError> {
        {
            let mut state = self.state.lock();
            if state.status != Status::Open {
                return Ok(());
            }
            self.save_locked(&mut state, db, None)?;
        }
        if self.mode.checkpoint_on_close() {
            self.force_checkpoint(db)?;
        }
        if let Some(wal) = &self.wal {
            wal.flush()?;
        }
        self.state.lock().status = Status::Closed;
        info!("closed database at {}", self.data_dir.display());
        Ok(())
    }

    // -----------------------------------------------------------------------
    // WAL logging surface

    pub fn log_insert(&self, txn_id: TxnId, table: &str, row: &Row) -> Result<WalSeq, PersistError> {
        let mut payload = Vec::new();
        encode_row(&mut payload, row);
        self.log(WalRecordKind::Insert, txn_id, table, row.id, &payload)
    }

    pub fn log_update(&self, txn_id: TxnId, table: &str, row: &Row) -> Result<WalSeq, PersistError> {
        let mut payload = Vec::new();
        encode_row(&mut payload, row);
        self.log(WalRecordKind::Update, txn_id, table, row.id, &payload)
    }

    pub fn log_delete(
        &self,
        txn_id: TxnId,
        table: &str,
        row_id: RowId,
    ) -> Result<WalSeq, PersistError> {
        self.log(WalRecordKind::Delete, txn_id, table, row_id, &[])
    }

    pub fn log_create_table(
        &self,
        txn_id: TxnId,
        table: &str,
        columns: &[Column],
        primary_key: &str,
    ) -> Result<WalSeq, PersistError> {
        let payload = encode_schema(columns, primary_key);
        self.log(WalRecordKind::CreateTable, txn_id, table, 0, &payload)
    }

    pub fn log_drop_table(&self, txn_id: TxnId, table: &str) -> Result<WalSeq, PersistError> {
        self.log(WalRecordKind::DropTable, txn_id, table, 0, &[])
    }

    pub fn log_commit(&self, txn_id: TxnId) -> Result<WalSeq, PersistError> {
        self.log(WalRecordKind::Commit, txn_id, "", 0, &[])
    }

    pub fn log_rollback(&self, txn_id: TxnId) -> Result<WalSeq, PersistError> {
        self.log(WalRecordKind::Rollback, txn_id, "", 0, &[])
    }

    fn log(
        &self,
        kind: WalRecordKind,
        txn_id: TxnId,
        table: &str,
        row_id: RowId,
        payload: &[u8],
    ) -> Result<WalSeq, PersistError> {
        match &self.wal {
            Some(wal) => {
                let seq = wal.append(kind, txn_id, table, row_id, payload)?;
                self.state.lock().header.wal_seq = seq + 1;
                Ok(seq)
            }
            None => Ok(0),
        }
    }

    // -----------------------------------------------------------------------
    // Page surface

    /// Allocates a fresh page id. The header counters are persisted by the
    /// next save or checkpoint.
    pub fn allocate_page(&self) -> Page {
        let mut state = self.state.lock();
        let page_id = state.header.next_page_id;
        state.header.next_page_id += 1;
        state.header.total_pages += 1;
        Page::new(page_id)
    }

    /// Writes a page to the database file (checksummed) and refreshes the
    /// page cache copy.
    pub fn write_page(&self, page: &mut Page) -> Result<(), PersistError> {
        let _state = self.state.lock();
        page.update_checksum();
        let mut record = vec![0u8; DB_PAGE_SIZE];
        record[PAGE_OFFSET_ID..PAGE_OFFSET_ID + 8]
            .copy_from_slice(&page.get_page_id().to_le_bytes());
        record[PAGE_OFFSET_VERSION..PAGE_OFFSET_VERSION + 4]
            .copy_from_slice(&page.get_version().to_le_bytes());
        record[PAGE_OFFSET_CHECKSUM..PAGE_OFFSET_CHECKSUM + 4]
            .copy_from_slice(&page.get_checksum().to_le_bytes());
        record[PAGE_OFFSET_DATA..].copy_from_slice(&page.get_data()[..]);

        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(self.db_path())?;
        file.seek(SeekFrom::Start(Self::page_offset(page.get_page_id())))?;
        file.write_all(&record)?;
        file.sync_all()?;
        page.set_dirty(false);
        self.page_cache.lock().put(page);
        Ok(())
    }

    /// Reads a page, serving from the page cache when possible. A checksum
    /// mismatch on the disk copy fails the read.
    pub fn read_page(&self, page_id: PageId) -> Result<Page, PersistError> {
        if let Some(page) = self.page_cache.lock().get(page_id) {
            return Ok(page);
        }
        let _state = self.state.lock();
        let mut record = vec![0u8; DB_PAGE_SIZE];
        let mut file = File::open(self.db_path())?;
        file.seek(SeekFrom::Start(Self::page_offset(page_id)))?;
        file.read_exact(&mut record)?;

        let stored_id =
            u64::from_le_bytes(record[PAGE_OFFSET_ID..PAGE_OFFSET_ID + 8].try_into().unwrap());
        if stored_id != page_id {
            return Err(PersistError::CorruptionDetected(format!(
                "page {} record carries id {}",
                page_id, stored_id
            )));
        }
        let mut page = Page::new(page_id);
        page.set_version(u32::from_le_bytes(
            record[PAGE_OFFSET_VERSION..PAGE_OFFSET_VERSION + 4].try_into().unwrap(),
        ));
        page.set_checksum(u32::from_le_bytes(
            record[PAGE_OFFSET_CHECKSUM..PAGE_OFFSET_CHECKSUM + 4].try_into().unwrap(),
        ));
        page.data_mut().copy_from_slice(&record[PAGE_OFFSET_DATA..]);
        if !page.verify_checksum() {
            return Err(PersistError::CorruptionDetected(format!(
                "checksum mismatch on page {}",
                page_id
            )));
        }
        page.set_dirty(false);
        self.page_cache.lock().put(&page);
        Ok(page)
    }

    pub fn page_cache_hit_ratio(&self) -> f64 {
        self.page_cache.lock().hit_ratio()
    }

    fn page_offset(page_id: PageId) -> u64 {
        PERSIST_HEADER_SIZE as u64 + page_id * DB_PAGE_SIZE as u64
    }

    // -----------------------------------------------------------------------
    // Internals

    fn checkpoint_locked(&self, db: &Database) -> Result<(), PersistError> {
        if self.mode == PersistMode::Memory {
            return Ok(());
        }
        let mut state = self.state.lock();
        if state.status != Status::Open {
            return Err(PersistError::Closed);
        }
        info!("checkpoint starting");
        self.save_locked(&mut state, db, None)?;
        if let Some(wal) = &self.wal {
            // Marker first, then truncate: a crash in between leaves a log
            // whose replay stops at the marker, and everything before it is
            // already covered by the save above.
            if let Err(err) = wal.append(WalRecordKind::Checkpoint, 0, "", 0, &[]) {
                warn!("could not append checkpoint marker: {}", err);
            }
            wal.truncate()?;
        }
        state.header.last_checkpoint = now_secs();
        state.header.wal_seq = 1;
        state.last_checkpoint_at = now_secs();
        self.write_header(&state.header)?;
        info!("checkpoint complete");
        Ok(())
    }

    fn save_locked(
        &self,
        state: &mut ManagerState,
        db: &Database,
        deadline: Option<Instant>,
    ) -> Result<(), PersistError> {
        if state.status != Status::Open {
            return Err(PersistError::Closed);
        }
        if self.mode == PersistMode::Memory {
            return Ok(());
        }
        Self::check_deadline(deadline)?;

        state.header.table_count = db.table_count() as u32;
        self.write_header(&state.header)?;

        let mut live_files = Vec::new();
        for table in db.tables() {
            Self::check_deadline(deadline)?;
            validate_table_name(table.get_name())?;
            let file_name = table_file_name(table.get_name());
            let path = self.data_dir.join(&file_name);
            let bytes = encode_table(table);
            let mut file = File::create(&path)?;
            file.write_all(&bytes)?;
            file.sync_all()?;
            live_files.push(file_name);
        }

        // Drop table files whose tables no longer exist.
        for entry in fs::read_dir(&self.data_dir)? {
            let entry = entry?;
            let name = entry.file_name().to_string_lossy().into_owned();
            if name.starts_with("table_")
                && name.ends_with(".rdb")
                && !live_files.contains(&name)
            {
                debug!("removing stale table file {}", name);
                let _ = fs::remove_file(entry.path());
            }
        }

        Self::check_deadline(deadline)?;
        let mut fk_bytes = Vec::new();
        let fks = db.get_foreign_keys();
        fk_bytes.extend_from_slice(&(fks.len() as u32).to_le_bytes());
        for fk in fks {
            encode_foreign_key(&mut fk_bytes, fk);
        }
        let mut fk_file = File::create(self.data_dir.join(FK_FILE_NAME))?;
        fk_file.write_all(&fk_bytes)?;
        fk_file.sync_all()?;
        Ok(())
    }

    fn check_deadline(deadline: Option<Instant>) -> Result<(), PersistError> {
        match deadline {
            Some(deadline) if Instant::now() >= deadline => {
                warn!("save aborted: timeout reached");
                Err(PersistError::Timeout)
            }
            _ => Ok(()),
        }
    }

    /// Loads every persisted table and the foreign keys into a fresh
    /// database. Nothing observable happens to any caller state until the
    /// whole load succeeds.
    fn load_staging(&self) -> Result<Database, PersistError> {
        let mut staging = Database::new();
        if !self.data_dir.exists() {
            return Ok(staging);
        }
        for entry in fs::read_dir(&self.data_dir)? {
            let entry = entry?;
            let name = entry.file_name().to_string_lossy().into_owned();
            if !name.starts_with("table_") || !name.ends_with(".rdb") {
                continue;
            }
            let bytes = fs::read(entry.path())?;
            let table = decode_table(&bytes)?;
            debug!("loaded table '{}' ({} rows)", table.get_name(), table.row_count());
            staging.install_table(table);
        }

        let fk_path = self.data_dir.join(FK_FILE_NAME);
        if fk_path.exists() {
            let bytes = fs::read(&fk_path)?;
            if bytes.len() >= 4 {
                let count = u32::from_le_bytes(bytes[0..4].try_into().unwrap());
                let mut pos = 4;
                let mut fks = Vec::with_capacity(count as usize);
                for _ in 0..count {
                    let (fk, next) = decode_foreign_key(&bytes, pos)?;
                    pos = next;
                    fks.push(fk);
                }
                staging.set_foreign_keys(fks);
            }
        }
        Ok(staging)
    }

    fn write_header(&self, header: &PersistentHeader) -> Result<(), PersistError> {
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(self.db_path())?;
        file.seek(SeekFrom::Start(0))?;
        file.write_all(&header.encode())?;
        file.sync_all()?;
        Ok(())
    }
}
