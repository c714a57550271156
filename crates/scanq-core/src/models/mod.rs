pub mod derived;
pub mod error;
pub mod request;
pub mod task;

pub use derived::{CrawlRecord, DerivedRecord, ScanRecord, StoredDerivedRecord, WhoisRecord};
pub use error::{CoreError, CoreErrorKind, CoreResult};
pub use request::TaskRequest;
pub use task::{TaskCompletion, TaskId, TaskMessage, TaskRecord, TaskStatus, TaskType};
