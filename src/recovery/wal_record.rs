use crate::common::config::{RowId, Timestamp, TxnId, WalSeq, NAME_MAX};
use crate::common::errors::WalError;

/// Fixed header ahead of every WAL record:
///
/// ```text
/// | seq u64 | timestamp u64 | kind u32 | txn u64 | payload_len u32 | table [64] | row_id u64 |
/// ```
///
/// followed by `payload_len` payload bytes. Little-endian throughout; the
/// table name is null-padded to 64 bytes.
pub const WAL_HEADER_SIZE: usize = 8 + 8 + 4 + 8 + 4 + NAME_MAX + 8;

/// The mutation kind of a WAL record. Zero is reserved: a zeroed region
/// reads as "no record here" and terminates a scan.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WalRecordKind {
    Insert = 1,
    Update = 2,
    Delete = 3,
    CreateTable = 4,
    DropTable = 5,
    CreateIndex = 6,
    DropIndex = 7,
    Checkpoint = 8,
    Commit = 9,
    Rollback = 10,
}

impl WalRecordKind {
    pub fn as_u32(self) -> u32 {
        self as u32
    }

    pub fn from_u32(tag: u32) -> Option<Self> {
        match tag {
            1 => Some(WalRecordKind::Insert),
            2 => Some(WalRecordKind::Update),
            3 => Some(WalRecordKind::Delete),
            4 => Some(WalRecordKind::CreateTable),
            5 => Some(WalRecordKind::DropTable),
            6 => Some(WalRecordKind::CreateIndex),
            7 => Some(WalRecordKind::DropIndex),
            8 => Some(WalRecordKind::Checkpoint),
            9 => Some(WalRecordKind::Commit),
            10 => Some(WalRecordKind::Rollback),
            _ => None,
        }
    }

    /// Commit and checkpoint records force the mapping to stable storage.
    pub fn requires_flush(self) -> bool {
        matches!(self, WalRecordKind::Commit | WalRecordKind::Checkpoint)
    }
}

/// One decoded WAL record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WalRecord {
    pub seq: WalSeq,
    pub timestamp: Timestamp,
    pub kind: WalRecordKind,
    pub txn_id: TxnId,
    pub table: String,
    pub row_id: RowId,
    pub payload: Vec<u8>,
}

impl WalRecord {
    pub fn encoded_len(&self) -> usize {
        WAL_HEADER_SIZE + self.payload.len()
    }

    /// Encodes the record into `buf`, which must be at least
    /// [`WalRecord::encoded_len`] bytes.
    pub fn encode_into(&self, buf: &mut [u8]) -> Result<usize, WalError> {
        if self.table.len() > NAME_MAX {
            return Err(WalError::TableNameTooLong);
        }
        let len = self.encoded_len();
        debug_assert!(buf.len() >= len);
        buf[0..8].copy_from_slice(&self.seq.to_le_bytes());
        buf[8..16].copy_from_slice(&self.timestamp.to_le_bytes());
        buf[16..20].copy_from_slice(&self.kind.as_u32().to_le_bytes());
        buf[20..28].copy_from_slice(&self.txn_id.to_le_bytes());
        buf[28..32].copy_from_slice(&(self.payload.len() as u32).to_le_bytes());
        buf[32..32 + NAME_MAX].fill(0);
        buf[32..32 + self.table.len()].copy_from_slice(self.table.as_bytes());
        buf[96..104].copy_from_slice(&self.row_id.to_le_bytes());
        buf[WAL_HEADER_SIZE..len].copy_from_slice(&self.payload);
        Ok(len)
    }

    /// Decodes the record starting at `offset`. Returns `None` for anything
    /// that terminates a scan cleanly: not enough room for a header, a zero
    /// sequence number, an unknown kind, or a payload running past the
    /// buffer.
    pub fn decode(buf: &[u8], offset: usize) -> Option<(WalRecord, usize)> {
        if offset + WAL_HEADER_SIZE > buf.len() {
            return None;
        }
        let at = &buf[offset..];
        let seq = u64::from_le_bytes(at[0..8].try_into().ok()?);
        if seq == 0 {
            return None;
        }
        let timestamp = u64::from_le_bytes(at[8..16].try_into().ok()?);
        let kind = WalRecordKind::from_u32(u32::from_le_bytes(at[16..20].try_into().ok()?))?;
        let txn_id = u64::from_le_bytes(at[20..28].try_into().ok()?);
        let payload_len = u32::from_le_bytes(at[28..32].try_into().ok()?) as usize;
        if offset + WAL_HEADER_SIZE + payload_len > buf.len() {
            return None;
        }
        let table_bytes = &at[32..32 + NAME_MAX];
        let table_end = table_bytes.iter().position(|&b| b == 0).unwrap_or(NAME_MAX);
        let table = String::from_utf8_lossy(&table_bytes[..table_end]).into_owned();
        let row_id = u64::from_le_bytes(at[96..104].try_into().ok()?);
        let payload = at[WAL_HEADER_SIZE..WAL_HEADER_SIZE + payload_len].to_vec();
        Some((
            WalRecord {
                seq,
                timestamp,
                kind,
                txn_id,
                table,
                row_id,
                payload,
            },
            WAL_HEADER_SIZE + payload_len,
        ))
    }
}

/// Forward scan over an encoded WAL region. Stops at the first structurally
/// invalid record or the first non-increasing sequence number.
pub struct WalIterator {
    buf: Vec<u8>,
    offset: usize,
    last_seq: WalSeq,
}

impl WalIterator {
    pub fn new(buf: Vec<u8>) -> Self {
        Self {
            buf,
            offset: 0,
            last_seq: 0,
        }
    }

    /// Byte offset just past the last record yielded so far.
    pub fn offset(&self) -> usize {
        self.offset
    }

    pub fn last_seq(&self) -> WalSeq {
        self.last_seq
    }
}

impl Iterator for WalIterator {
    type Item = WalRecord;

    fn next(&mut self) -> Option<WalRecord> {
        let (record, consumed) = WalRecord::decode(&self.buf, self.offset)?;
        if record.seq <= self.last_seq {
            return None;
        }
        self.offset += consumed;
        self.last_seq = record.seq;
        Some(record)
    }
}
