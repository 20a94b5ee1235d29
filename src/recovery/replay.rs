use log::{debug, info, warn};

use crate::catalog::Database;
use crate::common::config::WalSeq;
use crate::common::errors::ReplayError;
use crate::recovery::wal::Wal;
use crate::recovery::wal_record::{WalRecord, WalRecordKind};
use crate::storage::persist::serialize::{decode_row, decode_schema};

/// Outcome of a replay pass.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ReplaySummary {
    /// Records applied (or acknowledged as deliberate no-ops).
    pub applied: usize,
    /// True when the scan ended at a checkpoint marker rather than the end
    /// of the log.
    pub stopped_at_checkpoint: bool,
    pub last_seq: WalSeq,
}

/// Re-applies the logged mutations against `db`, in sequence order.
///
/// The scan stops cleanly at the first checkpoint marker — everything before
/// a checkpoint is already covered by the saved snapshot, so entries after
/// the marker are the only ones that matter, and the marker itself only
/// survives a crash between marker write and truncation — or at the first
/// structurally invalid record. Index and transaction-control records are
/// acknowledged but not applied; those layers live above this core.
///
/// Replay is deterministic: running the same log against two fresh databases
/// produces identical final states.
pub fn replay(wal: &Wal, db: &mut Database) -> Result<ReplaySummary, ReplayError> {
    let mut summary = ReplaySummary::default();
    for record in wal.iter() {
        if record.kind == WalRecordKind::Checkpoint {
            debug!("replay: checkpoint marker at seq {}", record.seq);
            summary.stopped_at_checkpoint = true;
            summary.last_seq = record.seq;
            break;
        }
        apply_record(db, &record)?;
        summary.applied += 1;
        summary.last_seq = record.seq;
    }
    info!(
        "replay finished: {} records applied, last seq {}",
        summary.applied, summary.last_seq
    );
    Ok(summary)
}

fn apply_record(db: &mut Database, record: &WalRecord) -> Result<(), ReplayError> {
    match record.kind {
        WalRecordKind::Insert | WalRecordKind::Update => {
            let (row, _) = decode_row(&record.payload, 0)
                .map_err(|_| ReplayError::MalformedPayload(record.seq))?;
            let table =
                db.get_table_mut(&record.table)
                    .ok_or_else(|| ReplayError::UnknownTable {
                        table: record.table.clone(),
                        seq: record.seq,
                    })?;
            // Redo semantics: apply the logged image whether or not the row
            // already exists.
            table
                .apply_row(row)
                .map_err(|_| ReplayError::MalformedPayload(record.seq))?;
        }
        WalRecordKind::Delete => {
            let table =
                db.get_table_mut(&record.table)
                    .ok_or_else(|| ReplayError::UnknownTable {
                        table: record.table.clone(),
                        seq: record.seq,
                    })?;
            // A redo of an already-deleted row is a no-op.
            let _ = table.delete_row(record.row_id);
        }
        WalRecordKind::CreateTable => {
            let (columns, primary_key) = decode_schema(&record.payload)
                .map_err(|_| ReplayError::MalformedPayload(record.seq))?;
            if db.get_table(&record.table).is_some() {
                warn!(
                    "replay: table '{}' already exists at seq {}, skipping create",
                    record.table, record.seq
                );
            } else {
                db.create_table(&record.table, columns, &primary_key)
                    .map_err(|_| ReplayError::MalformedPayload(record.seq))?;
            }
        }
        WalRecordKind::DropTable => {
            let _ = db.drop_table(&record.table);
        }
        WalRecordKind::CreateIndex
        | WalRecordKind::DropIndex
        | WalRecordKind::Commit
        | WalRecordKind::Rollback => {
            // Acknowledged no-ops against the boundary model.
        }
        WalRecordKind::Checkpoint => unreachable!("checkpoint handled by the scan loop"),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{Column, DataType, Row, Value};
    use crate::storage::persist::serialize::{encode_row, encode_schema};

    fn schema_payload() -> Vec<u8> {
        encode_schema(
            &[
                Column::not_null("id", DataType::Integer),
                Column::new("name", DataType::Text),
            ],
            "id",
        )
    }

    fn row_payload(id: u64, name: Option<&str>) -> Vec<u8> {
        let value = match name {
            Some(name) => Value::Text(name.to_string()),
            None => Value::Null,
        };
        let mut buf = Vec::new();
        encode_row(&mut buf, &Row::new(id, vec![Value::Integer(id as i64), value]));
        buf
    }

    fn seeded_wal(dir: &tempfile::TempDir) -> Wal {
        let wal = Wal::create(&dir.path().join("replay.wal"), 256 * 1024).unwrap();
        wal.append(WalRecordKind::CreateTable, 1, "users", 0, &schema_payload())
            .unwrap();
        wal.append(WalRecordKind::Insert, 1, "users", 1, &row_payload(1, Some("ada")))
            .unwrap();
        wal.append(WalRecordKind::Insert, 1, "users", 2, &row_payload(2, None))
            .unwrap();
        wal.append(WalRecordKind::Update, 1, "users", 1, &row_payload(1, Some("ada l")))
            .unwrap();
        wal.append(WalRecordKind::Commit, 1, "", 0, b"").unwrap();
        wal
    }

    #[test]
    fn test_replay_rebuilds_state() {
        let dir = tempfile::tempdir().unwrap();
        let wal = seeded_wal(&dir);
        let mut db = Database::new();
        let summary = replay(&wal, &mut db).unwrap();
        assert_eq!(summary.applied, 5);
        assert!(!summary.stopped_at_checkpoint);

        let table = db.get_table("users").unwrap();
        assert_eq!(table.row_count(), 2);
        assert_eq!(
            table.get_row(1).unwrap().values[1],
            Value::Text("ada l".to_string())
        );
        assert_eq!(table.get_row(2).unwrap().values[1], Value::Null);
    }

    #[test]
    fn test_replay_is_deterministic() {
        let dir = tempfile::tempdir().unwrap();
        let wal = seeded_wal(&dir);
        let mut first = Database::new();
        let mut second = Database::new();
        replay(&wal, &mut first).unwrap();
        replay(&wal, &mut second).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_replay_stops_at_checkpoint_marker() {
        let dir = tempfile::tempdir().unwrap();
        let wal = Wal::create(&dir.path().join("ckpt.wal"), 256 * 1024).unwrap();
        wal.append(WalRecordKind::CreateTable, 1, "users", 0, &schema_payload())
            .unwrap();
        wal.append(WalRecordKind::Insert, 1, "users", 1, &row_payload(1, Some("a")))
            .unwrap();
        wal.append(WalRecordKind::Checkpoint, 0, "", 0, b"").unwrap();
        // Entries after the marker must be ignored.
        wal.append(WalRecordKind::Insert, 1, "users", 2, &row_payload(2, Some("b")))
            .unwrap();

        let mut db = Database::new();
        let summary = replay(&wal, &mut db).unwrap();
        assert!(summary.stopped_at_checkpoint);
        assert_eq!(summary.applied, 2);
        assert_eq!(db.get_table("users").unwrap().row_count(), 1);
    }

    #[test]
    fn test_replay_unknown_table_fails() {
        let dir = tempfile::tempdir().unwrap();
        let wal = Wal::create(&dir.path().join("unknown.wal"), 64 * 1024).unwrap();
        wal.append(WalRecordKind::Insert, 1, "ghost", 1, &row_payload(1, None))
            .unwrap();
        let mut db = Database::new();
        let err = replay(&wal, &mut db).unwrap_err();
        assert!(matches!(err, ReplayError::UnknownTable { seq: 1, .. }));
    }

    #[test]
    fn test_replay_drop_and_recreate() {
        let dir = tempfile::tempdir().unwrap();
        let wal = Wal::create(&dir.path().join("ddl.wal"), 64 * 1024).unwrap();
        wal.append(WalRecordKind::CreateTable, 1, "t", 0, &schema_payload())
            .unwrap();
        wal.append(WalRecordKind::DropTable, 1, "t", 0, b"").unwrap();
        wal.append(WalRecordKind::CreateTable, 1, "t", 0, &schema_payload())
            .unwrap();
        let mut db = Database::new();
        replay(&wal, &mut db).unwrap();
        assert_eq!(db.get_table("t").unwrap().row_count(), 0);
    }

    #[test]
    fn test_replay_empty_wal_is_noop() {
        let dir = tempfile::tempdir().unwrap();
        let wal = Wal::create(&dir.path().join("empty.wal"), 64 * 1024).unwrap();
        let mut db = Database::new();
        let summary = replay(&wal, &mut db).unwrap();
        assert_eq!(summary.applied, 0);
        assert_eq!(db.table_count(), 0);
    }
}
