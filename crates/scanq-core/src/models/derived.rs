use std::time::SystemTime;

use crate::models::TaskId;

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CrawlRecord {
    pub task_id: TaskId,
    pub url: String,
    pub content_length: Option<i64>,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ScanRecord {
    pub task_id: TaskId,
    pub target: String,
    pub scan_result: String,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct WhoisRecord {
    pub task_id: TaskId,
    pub subject: String,
    pub whois_result: String,
    /// True when the lookup timed out and only partial output was captured.
    pub partial: bool,
}

/// Append-only detail rows hanging off a terminal task.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum DerivedRecord {
    Crawl(CrawlRecord),
    Scan(ScanRecord),
    Whois(WhoisRecord),
}

/// A derived row as read back from the store.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct StoredDerivedRecord<T> {
    pub id: u64,
    pub record: T,
    pub created_at: SystemTime,
}
