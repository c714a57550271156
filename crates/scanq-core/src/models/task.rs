use std::fmt::{Display, Formatter};
use std::str::FromStr;
use std::time::SystemTime;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Opaque task identifier shared by the broker and the record store.
#[derive(Clone, Debug, Eq, PartialEq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(pub String);

impl TaskId {
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for TaskId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TaskId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskType {
    #[serde(alias = "run_command")]
    Command,
    #[serde(alias = "run_katana")]
    Crawl,
    #[serde(alias = "run_nmap")]
    Scan,
    WhoisLookup,
}

impl TaskType {
    pub const ALL: [TaskType; 4] = [
        TaskType::Command,
        TaskType::Crawl,
        TaskType::Scan,
        TaskType::WhoisLookup,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            TaskType::Command => "command",
            TaskType::Crawl => "crawl",
            TaskType::Scan => "scan",
            TaskType::WhoisLookup => "whois_lookup",
        }
    }

    /// Name of the external tool, as used in diagnostics.
    pub fn tool_name(self) -> &'static str {
        match self {
            TaskType::Command => "command",
            TaskType::Crawl => "katana",
            TaskType::Scan => "nmap",
            TaskType::WhoisLookup => "whois",
        }
    }

    /// Key under which the single input is stored in parameters and results.
    pub fn subject_key(self) -> &'static str {
        match self {
            TaskType::Command => "command",
            TaskType::Crawl => "url",
            TaskType::Scan => "target",
            TaskType::WhoisLookup => "ip_address_or_domain",
        }
    }
}

impl Display for TaskType {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.pad(self.as_str())
    }
}

impl FromStr for TaskType {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw {
            "command" | "run_command" => Ok(TaskType::Command),
            "crawl" | "run_katana" => Ok(TaskType::Crawl),
            "scan" | "run_nmap" => Ok(TaskType::Scan),
            "whois_lookup" | "whois" => Ok(TaskType::WhoisLookup),
            _ => Err(format!("unknown task type '{raw}'")),
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskStatus {
    Pending,
    Success,
    Failure,
}

impl TaskStatus {
    pub const ALL: [TaskStatus; 3] = [
        TaskStatus::Pending,
        TaskStatus::Success,
        TaskStatus::Failure,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            TaskStatus::Pending => "PENDING",
            TaskStatus::Success => "SUCCESS",
            TaskStatus::Failure => "FAILURE",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, TaskStatus::Success | TaskStatus::Failure)
    }
}

impl Display for TaskStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.pad(self.as_str())
    }
}

impl FromStr for TaskStatus {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw {
            "PENDING" => Ok(TaskStatus::Pending),
            "SUCCESS" => Ok(TaskStatus::Success),
            "FAILURE" => Ok(TaskStatus::Failure),
            _ => Err(format!("unknown task status '{raw}'")),
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct TaskRecord {
    pub id: TaskId,
    pub task_type: TaskType,
    pub status: TaskStatus,
    pub parameters: Value,
    pub result: Option<Value>,
    pub owner: String,
    pub created_at: SystemTime,
    pub completed_at: Option<SystemTime>,
}

impl TaskRecord {
    pub fn pending(
        id: TaskId,
        task_type: TaskType,
        parameters: Value,
        owner: impl Into<String>,
    ) -> Self {
        Self {
            id,
            task_type,
            status: TaskStatus::Pending,
            parameters,
            result: None,
            owner: owner.into(),
            created_at: SystemTime::now(),
            completed_at: None,
        }
    }
}

/// The single terminal write applied to a pending record.
#[derive(Clone, Debug, PartialEq)]
pub struct TaskCompletion {
    pub status: TaskStatus,
    pub result: Value,
    pub completed_at: SystemTime,
}

/// Wire payload carried by the broker.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TaskMessage {
    pub id: TaskId,
    pub task_type: TaskType,
    pub parameters: Value,
    #[serde(default)]
    pub owner: String,
}

impl TaskMessage {
    pub fn from_record(record: &TaskRecord) -> Self {
        Self {
            id: record.id.clone(),
            task_type: record.task_type,
            parameters: record.parameters.clone(),
            owner: record.owner.clone(),
        }
    }
}
