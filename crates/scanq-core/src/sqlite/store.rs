use std::path::PathBuf;
use std::time::SystemTime;

use rusqlite::{Connection, OptionalExtension, Row, params};
use serde_json::Value;

use crate::models::{
    CrawlRecord, DerivedRecord, ScanRecord, StoredDerivedRecord, TaskCompletion, TaskId,
    TaskRecord, TaskStatus, TaskType, WhoisRecord,
};
use crate::persistence::{DerivedRecordStore, MigrationStore, PersistenceResult, TaskStore};
use crate::sqlite::connection::{
    MIGRATIONS_TABLE, bool_to_sqlite, ensure_migrations_table, ensure_schema_ready,
    from_unix_millis, i64_to_u64, open_connection, read_current_version, sqlite_to_bool,
    storage_error, storage_error_sqlite, storage_error_text, to_unix_millis,
};
use crate::sqlite::migrations::{SqliteMigration, current_schema_version, migration};

const TASK_COLUMNS: &str = "task_id, task_type, status, parameters, result, owner, \
                            created_at_unix_ms, completed_at_unix_ms";

pub struct SqliteStore {
    database_path: PathBuf,
}

impl SqliteStore {
    pub fn new(database_path: impl Into<PathBuf>) -> Self {
        Self {
            database_path: database_path.into(),
        }
    }

    pub fn migrate_to_latest(&self) -> PersistenceResult<()> {
        self.apply_migration(current_schema_version())
    }

    fn with_connection<T>(
        &self,
        operation_name: &str,
        operation: impl FnOnce(&mut Connection) -> rusqlite::Result<T>,
    ) -> PersistenceResult<T> {
        let mut connection = open_connection(&self.database_path)
            .map_err(|error| storage_error(operation_name, error))?;
        operation(&mut connection).map_err(|error| storage_error(operation_name, error))
    }
}

impl MigrationStore for SqliteStore {
    fn current_version(&self) -> PersistenceResult<i64> {
        self.with_connection("current_version", |connection| {
            ensure_migrations_table(connection)?;
            read_current_version(connection)
        })
    }

    fn apply_migration(&self, target_version: i64) -> PersistenceResult<()> {
        if target_version < 0 || target_version > current_schema_version() {
            return Err(storage_error_text(
                "apply_migration",
                format!("invalid migration target version '{target_version}'"),
            ));
        }

        self.with_connection("apply_migration", |connection| {
            ensure_migrations_table(connection)?;
            let current_version = read_current_version(connection)?;

            if target_version >= current_version {
                for version in (current_version + 1)..=target_version {
                    apply_up_migration(connection, defined_migration(version)?)?;
                }
            } else {
                for version in ((target_version + 1)..=current_version).rev() {
                    apply_down_migration(connection, defined_migration(version)?)?;
                }
            }

            Ok(())
        })
    }
}

impl TaskStore for SqliteStore {
    fn create_task(&self, task: &TaskRecord) -> PersistenceResult<()> {
        self.with_connection("create_task", |connection| {
            ensure_schema_ready(connection)?;
            insert_task(connection, task, "INSERT")?;
            Ok(())
        })
    }

    fn create_task_if_absent(&self, task: &TaskRecord) -> PersistenceResult<bool> {
        self.with_connection("create_task_if_absent", |connection| {
            ensure_schema_ready(connection)?;
            let inserted = insert_task(connection, task, "INSERT OR IGNORE")?;
            Ok(inserted == 1)
        })
    }

    fn read_task(&self, task_id: &TaskId) -> PersistenceResult<Option<TaskRecord>> {
        self.with_connection("read_task", |connection| {
            ensure_schema_ready(connection)?;
            connection
                .query_row(
                    &format!("SELECT {TASK_COLUMNS} FROM tasks WHERE task_id = ?1"),
                    params![task_id.as_str()],
                    task_from_row,
                )
                .optional()
        })
    }

    fn complete_task(
        &self,
        task_id: &TaskId,
        completion: &TaskCompletion,
    ) -> PersistenceResult<bool> {
        if !completion.status.is_terminal() {
            return Err(storage_error_text(
                "complete_task",
                format!(
                    "completion status must be terminal, got {}",
                    completion.status
                ),
            ));
        }

        self.with_connection("complete_task", |connection| {
            ensure_schema_ready(connection)?;
            let updated = connection.execute(
                "
UPDATE tasks
SET status = ?2, result = ?3, completed_at_unix_ms = ?4
WHERE task_id = ?1 AND status = 'PENDING'
",
                params![
                    task_id.as_str(),
                    completion.status.as_str(),
                    json_text(&completion.result)?,
                    to_unix_millis(completion.completed_at)?,
                ],
            )?;
            Ok(updated == 1)
        })
    }

    fn list_tasks_by_owner(&self, owner: &str) -> PersistenceResult<Vec<TaskRecord>> {
        self.with_connection("list_tasks_by_owner", |connection| {
            ensure_schema_ready(connection)?;
            let mut statement = connection.prepare(&format!(
                "
SELECT {TASK_COLUMNS}
FROM tasks
WHERE owner = ?1
ORDER BY created_at_unix_ms DESC, rowid DESC
"
            ))?;
            let rows = statement.query_map(params![owner], task_from_row)?;
            rows.collect()
        })
    }

    fn count_by_status(&self, status: TaskStatus) -> PersistenceResult<u64> {
        self.with_connection("count_by_status", |connection| {
            ensure_schema_ready(connection)?;
            let count: i64 = connection.query_row(
                "SELECT COUNT(*) FROM tasks WHERE status = ?1",
                params![status.as_str()],
                |row| row.get(0),
            )?;
            i64_to_u64(count)
        })
    }

    fn append_derived_records(&self, records: &[DerivedRecord]) -> PersistenceResult<()> {
        if records.is_empty() {
            return Ok(());
        }

        self.with_connection("append_derived_records", |connection| {
            ensure_schema_ready(connection)?;
            let created_at = to_unix_millis(SystemTime::now())?;
            let transaction = connection.transaction()?;
            for record in records {
                match record {
                    DerivedRecord::Crawl(crawl) => {
                        transaction.execute(
                            "
INSERT INTO crawl_results (task_id, url, content_length, created_at_unix_ms)
VALUES (?1, ?2, ?3, ?4)
",
                            params![
                                crawl.task_id.as_str(),
                                crawl.url,
                                crawl.content_length,
                                created_at,
                            ],
                        )?;
                    }
                    DerivedRecord::Scan(scan) => {
                        transaction.execute(
                            "
INSERT INTO scan_results (task_id, target, scan_result, created_at_unix_ms)
VALUES (?1, ?2, ?3, ?4)
",
                            params![scan.task_id.as_str(), scan.target, scan.scan_result, created_at],
                        )?;
                    }
                    DerivedRecord::Whois(whois) => {
                        transaction.execute(
                            "
INSERT INTO whois_results (task_id, subject, whois_result, partial, created_at_unix_ms)
VALUES (?1, ?2, ?3, ?4, ?5)
",
                            params![
                                whois.task_id.as_str(),
                                whois.subject,
                                whois.whois_result,
                                bool_to_sqlite(whois.partial),
                                created_at,
                            ],
                        )?;
                    }
                }
            }
            transaction.commit()
        })
    }
}

impl DerivedRecordStore for SqliteStore {
    fn list_crawl_records(
        &self,
        task_id: &TaskId,
    ) -> PersistenceResult<Vec<StoredDerivedRecord<CrawlRecord>>> {
        self.with_connection("list_crawl_records", |connection| {
            ensure_schema_ready(connection)?;
            let mut statement = connection.prepare(
                "
SELECT id, task_id, url, content_length, created_at_unix_ms
FROM crawl_results
WHERE task_id = ?1
ORDER BY id ASC
",
            )?;
            let rows = statement.query_map(params![task_id.as_str()], |row| {
                Ok(StoredDerivedRecord {
                    id: i64_to_u64(row.get(0)?)?,
                    record: CrawlRecord {
                        task_id: TaskId(row.get(1)?),
                        url: row.get(2)?,
                        content_length: row.get(3)?,
                    },
                    created_at: from_unix_millis(row.get(4)?)?,
                })
            })?;
            rows.collect()
        })
    }

    fn list_scan_records(
        &self,
        task_id: &TaskId,
    ) -> PersistenceResult<Vec<StoredDerivedRecord<ScanRecord>>> {
        self.with_connection("list_scan_records", |connection| {
            ensure_schema_ready(connection)?;
            let mut statement = connection.prepare(
                "
SELECT id, task_id, target, scan_result, created_at_unix_ms
FROM scan_results
WHERE task_id = ?1
ORDER BY id ASC
",
            )?;
            let rows = statement.query_map(params![task_id.as_str()], |row| {
                Ok(StoredDerivedRecord {
                    id: i64_to_u64(row.get(0)?)?,
                    record: ScanRecord {
                        task_id: TaskId(row.get(1)?),
                        target: row.get(2)?,
                        scan_result: row.get(3)?,
                    },
                    created_at: from_unix_millis(row.get(4)?)?,
                })
            })?;
            rows.collect()
        })
    }

    fn list_whois_records(
        &self,
        task_id: &TaskId,
    ) -> PersistenceResult<Vec<StoredDerivedRecord<WhoisRecord>>> {
        self.with_connection("list_whois_records", |connection| {
            ensure_schema_ready(connection)?;
            let mut statement = connection.prepare(
                "
SELECT id, task_id, subject, whois_result, partial, created_at_unix_ms
FROM whois_results
WHERE task_id = ?1
ORDER BY id ASC
",
            )?;
            let rows = statement.query_map(params![task_id.as_str()], |row| {
                Ok(StoredDerivedRecord {
                    id: i64_to_u64(row.get(0)?)?,
                    record: WhoisRecord {
                        task_id: TaskId(row.get(1)?),
                        subject: row.get(2)?,
                        whois_result: row.get(3)?,
                        partial: sqlite_to_bool(row.get(4)?),
                    },
                    created_at: from_unix_millis(row.get(5)?)?,
                })
            })?;
            rows.collect()
        })
    }
}

fn insert_task(connection: &Connection, task: &TaskRecord, verb: &str) -> rusqlite::Result<usize> {
    connection.execute(
        &format!(
            "
{verb} INTO tasks ({TASK_COLUMNS})
VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
"
        ),
        params![
            task.id.as_str(),
            task.task_type.as_str(),
            task.status.as_str(),
            json_text(&task.parameters)?,
            task.result.as_ref().map(json_text).transpose()?,
            task.owner,
            to_unix_millis(task.created_at)?,
            task.completed_at.map(to_unix_millis).transpose()?,
        ],
    )
}

fn task_from_row(row: &Row<'_>) -> rusqlite::Result<TaskRecord> {
    let task_id: String = row.get(0)?;
    let task_type_raw: String = row.get(1)?;
    let status_raw: String = row.get(2)?;
    let parameters_raw: String = row.get(3)?;
    let result_raw: Option<String> = row.get(4)?;
    let owner: String = row.get(5)?;
    let created_at_ms: i64 = row.get(6)?;
    let completed_at_ms: Option<i64> = row.get(7)?;

    Ok(TaskRecord {
        id: TaskId(task_id),
        task_type: parse_task_type(&task_type_raw)?,
        status: parse_task_status(&status_raw)?,
        parameters: parse_json(&parameters_raw)?,
        result: result_raw.as_deref().map(parse_json).transpose()?,
        owner,
        created_at: from_unix_millis(created_at_ms)?,
        completed_at: completed_at_ms.map(from_unix_millis).transpose()?,
    })
}

fn defined_migration(version: i64) -> rusqlite::Result<&'static SqliteMigration> {
    migration(version).ok_or_else(|| {
        storage_error_sqlite(&format!("migration version '{version}' is not defined"))
    })
}

fn apply_up_migration(
    connection: &mut Connection,
    migration: &SqliteMigration,
) -> rusqlite::Result<()> {
    let transaction = connection.transaction()?;
    transaction.execute_batch(migration.up_sql)?;
    transaction.execute(
        &format!(
            "INSERT INTO {MIGRATIONS_TABLE} (version, name, applied_at_unix)
             VALUES (?1, ?2, strftime('%s', 'now'))"
        ),
        (migration.version, migration.name),
    )?;
    transaction.commit()?;
    Ok(())
}

fn apply_down_migration(
    connection: &mut Connection,
    migration: &SqliteMigration,
) -> rusqlite::Result<()> {
    let transaction = connection.transaction()?;
    transaction.execute_batch(migration.down_sql)?;
    transaction.execute(
        &format!("DELETE FROM {MIGRATIONS_TABLE} WHERE version = ?1"),
        [migration.version],
    )?;
    transaction.commit()?;
    Ok(())
}

fn parse_task_type(raw: &str) -> rusqlite::Result<TaskType> {
    raw.parse::<TaskType>().map_err(|_| {
        storage_error_sqlite(&format!("unknown task type '{raw}' in sqlite record"))
    })
}

fn parse_task_status(raw: &str) -> rusqlite::Result<TaskStatus> {
    raw.parse::<TaskStatus>().map_err(|_| {
        storage_error_sqlite(&format!("unknown task status '{raw}' in sqlite record"))
    })
}

fn json_text(value: &Value) -> rusqlite::Result<String> {
    serde_json::to_string(value).map_err(|error| {
        storage_error_sqlite(&format!("failed to serialize json column: {error}"))
    })
}

fn parse_json(raw: &str) -> rusqlite::Result<Value> {
    serde_json::from_str(raw)
        .map_err(|error| storage_error_sqlite(&format!("invalid json in sqlite record: {error}")))
}
