pub type PageId = u64; // page id type
pub type TxnId = u64; // transaction id type
pub type RowId = u64; // row id type
pub type WalSeq = u64; // write-ahead-log sequence number type
pub type Timestamp = u64; // microseconds since the unix epoch

pub const INVALID_PAGE_ID: PageId = u64::MAX; // invalid page id
pub const INVALID_TXN_ID: TxnId = u64::MAX; // invalid transaction id
pub const INVALID_WAL_SEQ: WalSeq = 0; // sequence numbers start at 1

pub const DB_PAGE_SIZE: usize = 4096; // size of a persistent page in bytes
/// Fixed per-page overhead (id, version, checksum, flags) stored ahead of the data region.
pub const PAGE_HEADER_SIZE: usize = 32;
pub const PAGE_DATA_SIZE: usize = DB_PAGE_SIZE - PAGE_HEADER_SIZE;

/// Default capacity of the fixed-size memory-mapped WAL backing file.
pub const WAL_DEFAULT_CAPACITY: usize = 4 * 1024 * 1024;

/// Magic string at offset 0 of the database file, null-padded to 16 bytes.
pub const PERSIST_MAGIC: &[u8; 16] = b"FI_RDB_PERSIST\0\0";
pub const PERSIST_VERSION: u32 = 1;
/// Fixed header record size: magic + fields + 448 reserved bytes.
pub const PERSIST_HEADER_SIZE: usize = 516;

/// Table and constraint identifiers are stored as fixed 64-byte null-padded fields.
pub const NAME_MAX: usize = 64;

/// Floor applied when auto-tuning shrinks a cache level.
pub const MIN_LEVEL_BYTES: u64 = 4096;

/// Default size of the admission window of a W-TinyLFU level, as a fraction of
/// `max_entries` (1/WINDOW_FRACTION, minimum one entry).
pub const TINY_LFU_WINDOW_FRACTION: usize = 64;

pub const DEFAULT_WRITE_BUFFER_SIZE: usize = 64 * 1024;
pub const DEFAULT_AURA_ALPHA: f64 = 0.5;
