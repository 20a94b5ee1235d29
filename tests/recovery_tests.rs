mod common;

use stratum::catalog::{Database, Value};
use stratum::common::errors::WalError;
use stratum::recovery::{replay, Wal, WalRecordKind};
use stratum::storage::persist::{PersistMode, PersistenceManager};

fn open_manager(dir: &std::path::Path) -> (PersistenceManager, Database) {
    let manager = PersistenceManager::new(dir, PersistMode::WalOnly).unwrap();
    let mut db = Database::new();
    manager.open(&mut db).unwrap();
    (manager, db)
}

/// Logs a schema and a few rows through the manager's WAL surface.
fn log_workload(manager: &PersistenceManager) {
    let db = common::sample_db();
    let table = db.get_table("users").unwrap();
    manager
        .log_create_table(1, "users", table.get_columns(), table.get_primary_key())
        .unwrap();
    for row in table.rows() {
        manager.log_insert(1, "users", row).unwrap();
    }
    manager.log_commit(1).unwrap();
}

#[test]
fn replay_after_simulated_crash_recovers_mutations() {
    common::init();
    let dir = tempfile::tempdir().unwrap();
    {
        let (manager, _) = open_manager(dir.path());
        log_workload(&manager);
        manager.get_wal().unwrap().flush().unwrap();
        // Simulated crash: the manager is dropped without close(); nothing
        // was ever saved to the table files.
    }
    let (_, recovered) = open_manager(dir.path());
    let table = recovered.get_table("users").unwrap();
    assert_eq!(table.row_count(), 2);
    assert_eq!(
        table.get_row(1).unwrap().values[1],
        Value::Text("ada".to_string())
    );
    assert_eq!(table.get_row(2).unwrap().values[1], Value::Null);
}

#[test]
fn replay_is_deterministic_across_fresh_databases() {
    common::init();
    let dir = tempfile::tempdir().unwrap();
    let (manager, _) = open_manager(dir.path());
    log_workload(&manager);
    let wal = manager.get_wal().unwrap();

    let mut first = Database::new();
    let mut second = Database::new();
    replay(wal, &mut first).unwrap();
    replay(wal, &mut second).unwrap();
    assert_eq!(first, second);
}

#[test]
fn replay_stops_at_checkpoint_marker() {
    common::init();
    let dir = tempfile::tempdir().unwrap();
    let wal = Wal::create(&dir.path().join("marker.wal"), 256 * 1024).unwrap();
    // A marker that survived a crash between marker write and truncation.
    wal.append(WalRecordKind::Checkpoint, 0, "", 0, b"").unwrap();
    wal.append(WalRecordKind::DropTable, 1, "ghost", 0, b"").unwrap();

    let mut db = Database::new();
    let summary = replay(&wal, &mut db).unwrap();
    assert!(summary.stopped_at_checkpoint);
    assert_eq!(summary.applied, 0);
}

#[test]
fn checkpoint_resets_sequence_and_makes_replay_a_noop() {
    common::init();
    let dir = tempfile::tempdir().unwrap();
    let (manager, mut db) = open_manager(dir.path());
    log_workload(&manager);
    // Bring the handle up to date, then checkpoint.
    let wal = manager.get_wal().unwrap();
    replay(wal, &mut db).unwrap();
    manager.force_checkpoint(&db).unwrap();

    assert_eq!(manager.get_wal().unwrap().next_sequence(), 1);

    // A fresh load now sees the checkpointed state, and replay adds nothing.
    let mut reloaded = Database::new();
    manager.load(&mut reloaded).unwrap();
    let summary = replay(manager.get_wal().unwrap(), &mut reloaded).unwrap();
    assert_eq!(summary.applied, 0);
    assert_eq!(reloaded, db);
}

#[test]
fn wal_full_is_recoverable_by_checkpointing() {
    common::init();
    let dir = tempfile::tempdir().unwrap();
    let wal = Wal::create(&dir.path().join("tight.wal"), 512).unwrap();
    let mut appended = 0;
    let err = loop {
        match wal.append(WalRecordKind::Insert, 1, "t", appended, b"payload") {
            Ok(_) => appended += 1,
            Err(err) => break err,
        }
    };
    assert!(appended > 0);
    assert!(matches!(err, WalError::Full { .. }));

    wal.truncate().unwrap();
    wal.append(WalRecordKind::Insert, 1, "t", 0, b"payload").unwrap();
    assert_eq!(wal.next_sequence(), 2);
}

#[test]
fn wal_reopen_resumes_after_last_record() {
    common::init();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("resume.wal");
    {
        let wal = Wal::create(&path, 64 * 1024).unwrap();
        for i in 0..5 {
            wal.append(WalRecordKind::Insert, 1, "t", i, b"x").unwrap();
        }
        wal.flush().unwrap();
    }
    let wal = Wal::open(&path).unwrap();
    assert_eq!(wal.next_sequence(), 6);
    let seq = wal.append(WalRecordKind::Delete, 1, "t", 0, b"").unwrap();
    assert_eq!(seq, 6);
    assert_eq!(wal.iter().count(), 6);
}

#[test]
fn interval_checkpoint_fires_in_full_mode() {
    common::init();
    let dir = tempfile::tempdir().unwrap();
    let manager = PersistenceManager::with_checkpoint_interval(
        dir.path(),
        PersistMode::Full,
        std::time::Duration::from_secs(0),
    )
    .unwrap();
    let mut db = Database::new();
    manager.open(&mut db).unwrap();
    log_workload(&manager);
    assert!(manager.get_wal().unwrap().next_sequence() > 1);

    manager.maybe_checkpoint(&db).unwrap();
    assert_eq!(manager.get_wal().unwrap().next_sequence(), 1);
}
