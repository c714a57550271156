use std::path::PathBuf;
use std::time::{SystemTime, UNIX_EPOCH};

use scanq_core::models::{CoreErrorKind, TaskId};
use scanq_core::persistence::{MigrationStore, TaskStore};
use scanq_core::sqlite::{SqliteStore, current_schema_version, migration, migrations};

fn test_db_path(test_name: &str) -> PathBuf {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system clock before unix epoch")
        .as_nanos();
    std::env::temp_dir().join(format!("scanq-{test_name}-{nanos}.sqlite3"))
}

#[test]
fn migration_versions_are_strictly_increasing() {
    let entries = migrations();
    assert!(!entries.is_empty());

    let mut previous = 0;
    for entry in entries {
        assert!(entry.version > previous);
        previous = entry.version;
    }
}

#[test]
fn migration_lookup_and_schema_version_are_consistent() {
    let latest = current_schema_version();
    let latest_entry = migration(latest).expect("latest migration must exist");
    assert_eq!(latest_entry.version, latest);
    assert!(migration(latest + 1).is_none());
}

#[test]
fn migration_sql_is_defined_for_up_and_down_paths() {
    for entry in migrations() {
        assert!(!entry.up_sql.trim().is_empty(), "up sql must not be empty");
        assert!(
            !entry.down_sql.trim().is_empty(),
            "down sql must not be empty"
        );
    }
}

#[test]
fn migrate_to_latest_is_idempotent() {
    let store = SqliteStore::new(test_db_path("migrate-idempotent"));
    assert_eq!(store.current_version().expect("fresh version"), 0);

    store.migrate_to_latest().expect("first migration should succeed");
    store.migrate_to_latest().expect("second migration should be a no-op");

    assert_eq!(
        store.current_version().expect("version should be readable"),
        current_schema_version()
    );
}

#[test]
fn migrations_roll_back_to_an_empty_schema() {
    let store = SqliteStore::new(test_db_path("migrate-rollback"));
    store.migrate_to_latest().expect("migration should succeed");

    store.apply_migration(1).expect("rollback to v1 should succeed");
    assert_eq!(store.current_version().unwrap(), 1);

    store.apply_migration(0).expect("rollback to v0 should succeed");
    assert_eq!(store.current_version().unwrap(), 0);

    store.migrate_to_latest().expect("re-applying should succeed");
    assert_eq!(store.current_version().unwrap(), current_schema_version());
}

#[test]
fn unknown_target_version_is_rejected() {
    let store = SqliteStore::new(test_db_path("migrate-unknown"));
    let error = store
        .apply_migration(current_schema_version() + 1)
        .expect_err("future version must be rejected");
    assert_eq!(error.kind, CoreErrorKind::StorageFailure);
}

#[test]
fn task_operations_require_an_initialized_schema() {
    let store = SqliteStore::new(test_db_path("migrate-required"));
    let error = store
        .read_task(&TaskId::from("t-1"))
        .expect_err("reads before migration must fail");
    assert_eq!(error.kind, CoreErrorKind::StorageFailure);
    assert!(error.message.contains("not initialized"));
}
