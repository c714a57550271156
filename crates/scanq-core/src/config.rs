use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::execution::CommandSpec;
use crate::models::{CoreError, CoreResult, TaskType};

pub const INPUT_PLACEHOLDER: &str = "{input}";

const DEFAULT_DATABASE_PATH: &str = "scanq.sqlite3";
const DEFAULT_POOL_SIZE: usize = 4;
const DEFAULT_POLL_INTERVAL_MS: u64 = 500;
const DEFAULT_VISIBILITY_TIMEOUT_SECS: u64 = 360;
const DEFAULT_ACKNOWLEDGED_RETENTION_SECS: u64 = 7 * 24 * 60 * 60;
const DEFAULT_TOOL_TIMEOUT_SECS: u64 = 300;

#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanqConfig {
    pub database_path: PathBuf,
    pub worker: WorkerSettings,
    pub timeouts: TimeoutSettings,
    pub tools: ToolSettings,
    pub log: LogSettings,
}

impl Default for ScanqConfig {
    fn default() -> Self {
        Self {
            database_path: PathBuf::from(DEFAULT_DATABASE_PATH),
            worker: WorkerSettings::default(),
            timeouts: TimeoutSettings::default(),
            tools: ToolSettings::default(),
            log: LogSettings::default(),
        }
    }
}

#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerSettings {
    pub pool_size: usize,
    pub poll_interval_ms: u64,
    pub visibility_timeout_secs: u64,
    /// How long settled broker messages are kept for status queries.
    pub acknowledged_retention_secs: u64,
}

impl Default for WorkerSettings {
    fn default() -> Self {
        Self {
            pool_size: DEFAULT_POOL_SIZE,
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
            visibility_timeout_secs: DEFAULT_VISIBILITY_TIMEOUT_SECS,
            acknowledged_retention_secs: DEFAULT_ACKNOWLEDGED_RETENTION_SECS,
        }
    }
}

impl WorkerSettings {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn visibility_timeout(&self) -> Duration {
        Duration::from_secs(self.visibility_timeout_secs)
    }

    pub fn acknowledged_retention(&self) -> Duration {
        Duration::from_secs(self.acknowledged_retention_secs)
    }
}

/// Wall-clock budget per task type, in seconds.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeoutSettings {
    pub command_secs: u64,
    pub crawl_secs: u64,
    pub scan_secs: u64,
    pub whois_secs: u64,
}

impl Default for TimeoutSettings {
    fn default() -> Self {
        Self {
            command_secs: DEFAULT_TOOL_TIMEOUT_SECS,
            crawl_secs: DEFAULT_TOOL_TIMEOUT_SECS,
            scan_secs: DEFAULT_TOOL_TIMEOUT_SECS,
            whois_secs: DEFAULT_TOOL_TIMEOUT_SECS,
        }
    }
}

impl TimeoutSettings {
    pub fn for_task(&self, task_type: TaskType) -> Duration {
        let secs = match task_type {
            TaskType::Command => self.command_secs,
            TaskType::Crawl => self.crawl_secs,
            TaskType::Scan => self.scan_secs,
            TaskType::WhoisLookup => self.whois_secs,
        };
        Duration::from_secs(secs)
    }

    pub fn longest(&self) -> Duration {
        TaskType::ALL
            .into_iter()
            .map(|task_type| self.for_task(task_type))
            .max()
            .unwrap_or_default()
    }
}

/// An external tool invocation template; `{input}` in any argument is replaced
/// by the task's single input.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct ToolSpec {
    pub program: String,
    #[serde(default)]
    pub args: Vec<String>,
}

impl ToolSpec {
    pub fn new(program: impl Into<String>, args: &[&str]) -> Self {
        Self {
            program: program.into(),
            args: args.iter().map(|arg| arg.to_string()).collect(),
        }
    }

    pub fn command_spec(&self, input: &str) -> CommandSpec {
        CommandSpec::new(&self.program).args(
            self.args
                .iter()
                .map(|arg| arg.replace(INPUT_PLACEHOLDER, input)),
        )
    }
}

#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolSettings {
    pub crawler: ToolSpec,
    pub scanner: ToolSpec,
    pub whois: ToolSpec,
}

impl Default for ToolSettings {
    fn default() -> Self {
        Self {
            crawler: ToolSpec::new("katana", &["-u", INPUT_PLACEHOLDER, "-jsonl", "-silent"]),
            scanner: ToolSpec::new("nmap", &["-sV", INPUT_PLACEHOLDER]),
            whois: ToolSpec::new("whois", &[INPUT_PLACEHOLDER]),
        }
    }
}

impl ToolSettings {
    /// `None` for `command`, whose program comes from the task itself.
    pub fn for_task(&self, task_type: TaskType) -> Option<&ToolSpec> {
        match task_type {
            TaskType::Command => None,
            TaskType::Crawl => Some(&self.crawler),
            TaskType::Scan => Some(&self.scanner),
            TaskType::WhoisLookup => Some(&self.whois),
        }
    }
}

#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogSettings {
    pub filter: String,
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            filter: "info".to_string(),
        }
    }
}

impl ScanqConfig {
    /// Defaults, then the TOML file if one is given, then `SCANQ_*` environment overrides.
    pub fn load(path: Option<&Path>) -> CoreResult<Self> {
        let mut config = match path {
            Some(path) => {
                let raw = std::fs::read_to_string(path).map_err(|error| {
                    CoreError::invalid_input(format!(
                        "failed to read config file '{}': {error}",
                        path.display()
                    ))
                })?;
                Self::from_toml_str(&raw)?
            }
            None => Self::default(),
        };
        config.apply_env_overrides(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_toml_str(raw: &str) -> CoreResult<Self> {
        toml::from_str(raw)
            .map_err(|error| CoreError::invalid_input(format!("invalid config: {error}")))
    }

    pub fn apply_env_overrides(
        &mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> CoreResult<()> {
        if let Some(path) = lookup("SCANQ_DATABASE_PATH") {
            self.database_path = PathBuf::from(path);
        }
        if let Some(raw) = lookup("SCANQ_POOL_SIZE") {
            self.worker.pool_size = raw.trim().parse().map_err(|_| {
                CoreError::invalid_input(format!("SCANQ_POOL_SIZE must be an integer, got '{raw}'"))
            })?;
        }
        if let Some(filter) = lookup("SCANQ_LOG") {
            self.log.filter = filter;
        }
        Ok(())
    }

    pub fn validate(&self) -> CoreResult<()> {
        if self.worker.pool_size == 0 {
            return Err(CoreError::invalid_input(
                "worker.pool_size must be at least 1",
            ));
        }
        if self.worker.poll_interval_ms == 0 {
            return Err(CoreError::invalid_input(
                "worker.poll_interval_ms must be greater than zero",
            ));
        }
        if let Some(task_type) = TaskType::ALL
            .into_iter()
            .find(|task_type| self.timeouts.for_task(*task_type).is_zero())
        {
            return Err(CoreError::invalid_input(format!(
                "timeout for {task_type} tasks must be greater than zero"
            )));
        }
        for (name, tool) in [
            ("crawler", &self.tools.crawler),
            ("scanner", &self.tools.scanner),
            ("whois", &self.tools.whois),
        ] {
            if tool.program.trim().is_empty() {
                return Err(CoreError::invalid_input(format!(
                    "tools.{name}.program must not be empty"
                )));
            }
        }
        if self.worker.visibility_timeout() <= self.timeouts.longest() {
            return Err(CoreError::invalid_input(format!(
                "worker.visibility_timeout_secs ({}) must exceed the longest tool timeout ({}s)",
                self.worker.visibility_timeout_secs,
                self.timeouts.longest().as_secs()
            )));
        }
        Ok(())
    }
}
