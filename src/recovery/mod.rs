pub mod replay;
pub mod wal;
pub mod wal_record;

pub use replay::{replay, ReplaySummary};
pub use wal::Wal;
pub use wal_record::{WalIterator, WalRecord, WalRecordKind};
