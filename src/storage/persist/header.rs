use crate::common::checksum::fnv1a32;
use crate::common::config::{
    PageId, Timestamp, WalSeq, PERSIST_HEADER_SIZE, PERSIST_MAGIC, PERSIST_VERSION,
};
use crate::common::errors::PersistError;
use crate::common::time::now_secs;

const OFFSET_MAGIC: usize = 0;
const OFFSET_VERSION: usize = 16;
const OFFSET_CREATED: usize = 20;
const OFFSET_LAST_CHECKPOINT: usize = 28;
const OFFSET_NEXT_PAGE_ID: usize = 36;
const OFFSET_TOTAL_PAGES: usize = 44;
const OFFSET_WAL_SEQ: usize = 52;
const OFFSET_TABLE_COUNT: usize = 60;
const OFFSET_CHECKSUM: usize = 64;

/// The fixed-layout record at offset 0 of the database file. Both the magic
/// string and the checksum must validate before any derived value is
/// trusted; the checksum covers the whole record with its own field zeroed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PersistentHeader {
    pub version: u32,
    pub created: Timestamp,
    pub last_checkpoint: Timestamp,
    pub next_page_id: PageId,
    pub total_pages: u64,
    pub wal_seq: WalSeq,
    pub table_count: u32,
}

impl PersistentHeader {
    pub fn new() -> Self {
        Self {
            version: PERSIST_VERSION,
            created: now_secs(),
            last_checkpoint: 0,
            next_page_id: 0,
            total_pages: 0,
            wal_seq: 1,
            table_count: 0,
        }
    }

    pub fn encode(&self) -> [u8; PERSIST_HEADER_SIZE] {
        let mut buf = [0u8; PERSIST_HEADER_SIZE];
        buf[OFFSET_MAGIC..OFFSET_MAGIC + 16].copy_from_slice(PERSIST_MAGIC);
        buf[OFFSET_VERSION..OFFSET_VERSION + 4].copy_from_slice(&self.version.to_le_bytes());
        buf[OFFSET_CREATED..OFFSET_CREATED + 8].copy_from_slice(&self.created.to_le_bytes());
        buf[OFFSET_LAST_CHECKPOINT..OFFSET_LAST_CHECKPOINT + 8]
            .copy_from_slice(&self.last_checkpoint.to_le_bytes());
        buf[OFFSET_NEXT_PAGE_ID..OFFSET_NEXT_PAGE_ID + 8]
            .copy_from_slice(&self.next_page_id.to_le_bytes());
        buf[OFFSET_TOTAL_PAGES..OFFSET_TOTAL_PAGES + 8]
            .copy_from_slice(&self.total_pages.to_le_bytes());
        buf[OFFSET_WAL_SEQ..OFFSET_WAL_SEQ + 8].copy_from_slice(&self.wal_seq.to_le_bytes());
        buf[OFFSET_TABLE_COUNT..OFFSET_TABLE_COUNT + 4]
            .copy_from_slice(&self.table_count.to_le_bytes());
        // Checksum over the record with the checksum field itself zeroed.
        let checksum = fnv1a32(&buf);
        buf[OFFSET_CHECKSUM..OFFSET_CHECKSUM + 4].copy_from_slice(&checksum.to_le_bytes());
        buf
    }

    pub fn decode(buf: &[u8]) -> Result<Self, PersistError> {
        if buf.len() < PERSIST_HEADER_SIZE {
            return Err(PersistError::CorruptionDetected(format!(
                "header is {} bytes, expected {}",
                buf.len(),
                PERSIST_HEADER_SIZE
            )));
        }
        if &buf[OFFSET_MAGIC..OFFSET_MAGIC + 16] != PERSIST_MAGIC {
            return Err(PersistError::CorruptionDetected(
                "bad magic string in database header".to_string(),
            ));
        }
        let stored_checksum =
            u32::from_le_bytes(buf[OFFSET_CHECKSUM..OFFSET_CHECKSUM + 4].try_into().unwrap());
        let mut scratch = [0u8; PERSIST_HEADER_SIZE];
        scratch.copy_from_slice(&buf[..PERSIST_HEADER_SIZE]);
        scratch[OFFSET_CHECKSUM..OFFSET_CHECKSUM + 4].fill(0);
        let computed = fnv1a32(&scratch);
        if computed != stored_checksum {
            return Err(PersistError::CorruptionDetected(format!(
                "header checksum mismatch: stored {:#010x}, computed {:#010x}",
                stored_checksum, computed
            )));
        }
        Ok(Self {
            version: u32::from_le_bytes(buf[OFFSET_VERSION..OFFSET_VERSION + 4].try_into().unwrap()),
            created: u64::from_le_bytes(buf[OFFSET_CREATED..OFFSET_CREATED + 8].try_into().unwrap()),
            last_checkpoint: u64::from_le_bytes(
                buf[OFFSET_LAST_CHECKPOINT..OFFSET_LAST_CHECKPOINT + 8]
                    .try_into()
                    .unwrap(),
            ),
            next_page_id: u64::from_le_bytes(
                buf[OFFSET_NEXT_PAGE_ID..OFFSET_NEXT_PAGE_ID + 8].try_into().unwrap(),
            ),
            total_pages: u64::from_le_bytes(
                buf[OFFSET_TOTAL_PAGES..OFFSET_TOTAL_PAGES + 8].try_into().unwrap(),
            ),
            wal_seq: u64::from_le_bytes(buf[OFFSET_WAL_SEQ..OFFSET_WAL_SEQ + 8].try_into().unwrap()),
            table_count: u32::from_le_bytes(
                buf[OFFSET_TABLE_COUNT..OFFSET_TABLE_COUNT + 4].try_into().unwrap(),
            ),
        })
    }
}

impl Default for PersistentHeader {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_trip() {
        let mut header = PersistentHeader::new();
        header.next_page_id = 42;
        header.total_pages = 10;
        header.wal_seq = 99;
        header.table_count = 3;
        let decoded = PersistentHeader::decode(&header.encode()).unwrap();
        assert_eq!(decoded, header);
    }

    #[test]
    fn test_bad_magic_rejected() {
        let mut buf = PersistentHeader::new().encode();
        buf[0] = b'X';
        assert!(matches!(
            PersistentHeader::decode(&buf),
            Err(PersistError::CorruptionDetected(_))
        ));
    }

    #[test]
    fn test_checksum_mismatch_rejected() {
        let mut buf = PersistentHeader::new().encode();
        // Flip a byte in a protected field, not in the checksum itself.
        buf[OFFSET_TABLE_COUNT] ^= 0xff;
        assert!(matches!(
            PersistentHeader::decode(&buf),
            Err(PersistError::CorruptionDetected(_))
        ));
    }

    #[test]
    fn test_short_buffer_rejected() {
        assert!(PersistentHeader::decode(&[0u8; 10]).is_err());
    }

    #[test]
    fn test_reserved_region_is_zero() {
        let buf = PersistentHeader::new().encode();
        assert!(buf[68..].iter().all(|&b| b == 0));
        assert_eq!(buf.len(), PERSIST_HEADER_SIZE);
    }
}
