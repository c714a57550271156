pub mod process;
pub mod tools;

pub use process::ProcessSandbox;

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use crate::execution::{ProcessExitStatus, ProcessOutput};
use crate::models::{TaskId, TaskRequest, TaskType};

pub type SandboxFuture = Pin<Box<dyn Future<Output = AdapterOutcome> + Send>>;

/// Everything a tool run can end in. Tool failures are values here, never errors.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum AdapterOutcome {
    Ok {
        stdout: String,
        stderr: String,
    },
    NonZeroExit {
        stdout: String,
        stderr: String,
        /// Absent when the process was killed by a signal.
        exit_code: Option<i32>,
    },
    Timeout {
        stdout: String,
        stderr: String,
        after: Duration,
    },
    LaunchError {
        message: String,
    },
}

impl AdapterOutcome {
    pub fn kind(&self) -> &'static str {
        match self {
            AdapterOutcome::Ok { .. } => "ok",
            AdapterOutcome::NonZeroExit { .. } => "nonzero_exit",
            AdapterOutcome::Timeout { .. } => "timeout",
            AdapterOutcome::LaunchError { .. } => "launch_error",
        }
    }

    pub fn launch_error(message: impl Into<String>) -> Self {
        AdapterOutcome::LaunchError {
            message: message.into(),
        }
    }

    pub fn from_process_output(output: ProcessOutput) -> Self {
        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        let stderr = String::from_utf8_lossy(&output.stderr).into_owned();

        match output.status {
            ProcessExitStatus::ExitCode(0) => AdapterOutcome::Ok { stdout, stderr },
            ProcessExitStatus::ExitCode(code) => AdapterOutcome::NonZeroExit {
                stdout,
                stderr,
                exit_code: Some(code),
            },
            ProcessExitStatus::Terminated => AdapterOutcome::NonZeroExit {
                stdout,
                stderr,
                exit_code: None,
            },
            ProcessExitStatus::TimedOut { after } => AdapterOutcome::Timeout {
                stdout,
                stderr,
                after,
            },
        }
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ToolInvocation {
    pub task_id: TaskId,
    pub request: TaskRequest,
    pub timeout: Duration,
}

impl ToolInvocation {
    pub fn new(task_id: TaskId, request: TaskRequest, timeout: Duration) -> Self {
        Self {
            task_id,
            request,
            timeout,
        }
    }

    pub fn task_type(&self) -> TaskType {
        self.request.task_type()
    }
}

/// Runs one task's external tool to completion or timeout.
pub trait Sandbox: Send + Sync {
    fn run(&self, invocation: ToolInvocation) -> SandboxFuture;
}
