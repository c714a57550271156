use crate::models::{
    CoreError, CrawlRecord, DerivedRecord, ScanRecord, StoredDerivedRecord, TaskCompletion, TaskId,
    TaskRecord, TaskStatus, WhoisRecord,
};

pub type PersistenceResult<T> = Result<T, CoreError>;

pub trait MigrationStore: Send + Sync {
    fn current_version(&self) -> PersistenceResult<i64>;

    fn apply_migration(&self, target_version: i64) -> PersistenceResult<()>;
}

pub trait TaskStore: Send + Sync {
    fn create_task(&self, task: &TaskRecord) -> PersistenceResult<()>;

    /// Inserts the record unless one with the same id exists. Returns whether it inserted.
    fn create_task_if_absent(&self, task: &TaskRecord) -> PersistenceResult<bool>;

    fn read_task(&self, task_id: &TaskId) -> PersistenceResult<Option<TaskRecord>>;

    /// Applies the terminal write only while the stored status is still PENDING.
    ///
    /// Returns `true` when this call performed the transition and `false` when
    /// the record was already terminal or does not exist.
    fn complete_task(
        &self,
        task_id: &TaskId,
        completion: &TaskCompletion,
    ) -> PersistenceResult<bool>;

    /// Newest first.
    fn list_tasks_by_owner(&self, owner: &str) -> PersistenceResult<Vec<TaskRecord>>;

    fn count_by_status(&self, status: TaskStatus) -> PersistenceResult<u64>;

    fn append_derived_records(&self, records: &[DerivedRecord]) -> PersistenceResult<()>;
}

pub trait DerivedRecordStore: Send + Sync {
    fn list_crawl_records(
        &self,
        task_id: &TaskId,
    ) -> PersistenceResult<Vec<StoredDerivedRecord<CrawlRecord>>>;

    fn list_scan_records(
        &self,
        task_id: &TaskId,
    ) -> PersistenceResult<Vec<StoredDerivedRecord<ScanRecord>>>;

    fn list_whois_records(
        &self,
        task_id: &TaskId,
    ) -> PersistenceResult<Vec<StoredDerivedRecord<WhoisRecord>>>;
}
