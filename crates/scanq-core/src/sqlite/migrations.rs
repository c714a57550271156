#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct SqliteMigration {
    pub version: i64,
    pub name: &'static str,
    pub up_sql: &'static str,
    pub down_sql: &'static str,
}

const MIGRATION_0001: SqliteMigration = SqliteMigration {
    version: 1,
    name: "initial_task_schema",
    up_sql: r#"
CREATE TABLE IF NOT EXISTS tasks (
    task_id TEXT PRIMARY KEY,
    task_type TEXT NOT NULL,
    status TEXT NOT NULL DEFAULT 'PENDING',
    parameters TEXT NOT NULL,
    result TEXT,
    owner TEXT NOT NULL,
    created_at_unix_ms INTEGER NOT NULL,
    completed_at_unix_ms INTEGER
);

CREATE INDEX IF NOT EXISTS idx_tasks_owner_created
    ON tasks (owner, created_at_unix_ms DESC);

CREATE INDEX IF NOT EXISTS idx_tasks_status
    ON tasks (status);
"#,
    down_sql: r#"
DROP INDEX IF EXISTS idx_tasks_status;
DROP INDEX IF EXISTS idx_tasks_owner_created;
DROP TABLE IF EXISTS tasks;
"#,
};

const MIGRATION_0002: SqliteMigration = SqliteMigration {
    version: 2,
    name: "add_derived_result_tables",
    up_sql: r#"
CREATE TABLE IF NOT EXISTS crawl_results (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    task_id TEXT NOT NULL REFERENCES tasks (task_id),
    url TEXT NOT NULL,
    content_length INTEGER,
    created_at_unix_ms INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_crawl_results_task
    ON crawl_results (task_id);

CREATE TABLE IF NOT EXISTS scan_results (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    task_id TEXT NOT NULL REFERENCES tasks (task_id),
    target TEXT NOT NULL,
    scan_result TEXT NOT NULL,
    created_at_unix_ms INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_scan_results_task
    ON scan_results (task_id);

CREATE TABLE IF NOT EXISTS whois_results (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    task_id TEXT NOT NULL REFERENCES tasks (task_id),
    subject TEXT NOT NULL,
    whois_result TEXT NOT NULL,
    partial INTEGER NOT NULL DEFAULT 0,
    created_at_unix_ms INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_whois_results_task
    ON whois_results (task_id);
"#,
    down_sql: r#"
DROP INDEX IF EXISTS idx_whois_results_task;
DROP TABLE IF EXISTS whois_results;
DROP INDEX IF EXISTS idx_scan_results_task;
DROP TABLE IF EXISTS scan_results;
DROP INDEX IF EXISTS idx_crawl_results_task;
DROP TABLE IF EXISTS crawl_results;
"#,
};

const MIGRATION_0003: SqliteMigration = SqliteMigration {
    version: 3,
    name: "add_broker_messages",
    up_sql: r#"
CREATE TABLE IF NOT EXISTS broker_messages (
    message_id INTEGER PRIMARY KEY AUTOINCREMENT,
    task_id TEXT NOT NULL,
    payload TEXT NOT NULL,
    enqueued_at_unix_ms INTEGER NOT NULL,
    visible_at_unix_ms INTEGER NOT NULL,
    receive_count INTEGER NOT NULL DEFAULT 0,
    last_received_at_unix_ms INTEGER,
    acknowledged_at_unix_ms INTEGER
);

CREATE INDEX IF NOT EXISTS idx_broker_messages_ready
    ON broker_messages (acknowledged_at_unix_ms, visible_at_unix_ms, message_id);

CREATE INDEX IF NOT EXISTS idx_broker_messages_task
    ON broker_messages (task_id);
"#,
    down_sql: r#"
DROP INDEX IF EXISTS idx_broker_messages_task;
DROP INDEX IF EXISTS idx_broker_messages_ready;
DROP TABLE IF EXISTS broker_messages;
"#,
};

const MIGRATIONS: [SqliteMigration; 3] = [MIGRATION_0001, MIGRATION_0002, MIGRATION_0003];

pub fn migrations() -> &'static [SqliteMigration] {
    &MIGRATIONS
}

pub fn migration(version: i64) -> Option<&'static SqliteMigration> {
    MIGRATIONS.iter().find(|entry| entry.version == version)
}

pub fn current_schema_version() -> i64 {
    MIGRATIONS.last().map(|entry| entry.version).unwrap_or(0)
}
