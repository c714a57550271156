use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime};

use tokio::io::AsyncReadExt;
use tokio::task::JoinHandle;

use crate::execution::{
    ExecutionResult, ProcessExecutor, ProcessExitStatus, ProcessOutput, ProcessSpawnRequest,
    ProcessTerminationMode, ProcessWaitFuture, RunningProcess,
};
use crate::models::{CoreError, CoreErrorKind, TaskId, TaskType};

const OUTPUT_READ_WINDOW: Duration = Duration::from_millis(250);
const KILL_REAP_WINDOW: Duration = Duration::from_secs(1);

pub struct TokioProcessExecutor;

impl ProcessExecutor for TokioProcessExecutor {
    fn spawn(&self, request: ProcessSpawnRequest) -> ExecutionResult<Box<dyn RunningProcess>> {
        let mut cmd = tokio::process::Command::new(&request.command.program);
        cmd.args(&request.command.args);

        for (key, value) in &request.command.env {
            cmd.env(key, value);
        }

        if let Some(dir) = &request.command.working_dir {
            cmd.current_dir(dir);
        }

        cmd.stdin(std::process::Stdio::null());
        cmd.stdout(std::process::Stdio::piped());
        cmd.stderr(std::process::Stdio::piped());
        cmd.kill_on_drop(true);
        cmd.process_group(0);

        let child = cmd.spawn().map_err(|error| {
            process_failure(
                request.task_id.clone(),
                request.task_type,
                format!(
                    "failed to spawn '{}': {error}",
                    request.command.program.display()
                ),
            )
        })?;

        let pid = child.id();
        let started_at = SystemTime::now();

        Ok(Box::new(TokioRunningProcess {
            child: Mutex::new(Some(child)),
            pid,
            started_at,
            timeout: request.timeout,
            task_id: request.task_id,
            task_type: request.task_type,
        }))
    }
}

struct TokioRunningProcess {
    child: Mutex<Option<tokio::process::Child>>,
    pid: Option<u32>,
    started_at: SystemTime,
    timeout: Option<Duration>,
    task_id: Option<TaskId>,
    task_type: TaskType,
}

impl RunningProcess for TokioRunningProcess {
    fn pid(&self) -> Option<u32> {
        self.pid
    }

    fn terminate(&self, mode: ProcessTerminationMode) -> ExecutionResult<()> {
        let Some(pid) = self.pid else {
            return Ok(());
        };

        let signal = match mode {
            ProcessTerminationMode::Immediate => libc::SIGKILL,
            ProcessTerminationMode::Graceful { .. } => libc::SIGTERM,
        };

        signal_process_group(pid, signal).map_err(|os_error| {
            process_failure(
                self.task_id.clone(),
                self.task_type,
                format!("failed to send signal {signal} to process group {pid}: {os_error}"),
            )
        })
    }

    fn wait(self: Box<Self>) -> ProcessWaitFuture {
        let child = self.child.into_inner().ok().flatten();
        let timeout = self.timeout;
        let started_at = self.started_at;
        let task_id = self.task_id;
        let task_type = self.task_type;
        let pid = self.pid;

        Box::pin(async move {
            let mut child = child.ok_or_else(|| {
                process_failure(
                    task_id.clone(),
                    task_type,
                    "child process already consumed".to_string(),
                )
            })?;

            let stdout_reader = spawn_reader(child.stdout.take());
            let stderr_reader = spawn_reader(child.stderr.take());

            let wait_err = |error: std::io::Error| {
                process_failure(
                    task_id.clone(),
                    task_type,
                    format!("failed to wait for process: {error}"),
                )
            };

            // Wait for exit first, then collect output within a bounded read window so
            // descendants that inherited the pipes cannot hold the worker forever.
            let status = match timeout {
                Some(timeout_duration) => {
                    match tokio::time::timeout(timeout_duration, child.wait()).await {
                        Ok(result) => exit_status(result.map_err(wait_err)?),
                        Err(_) => {
                            if let Some(pid) = pid {
                                let _ = signal_process_group(pid, libc::SIGKILL);
                            }
                            let _ = tokio::time::timeout(KILL_REAP_WINDOW, child.wait()).await;
                            tracing::warn!(
                                task_id = ?task_id.as_ref().map(TaskId::as_str),
                                task_type = %task_type,
                                timeout_ms = timeout_duration.as_millis() as u64,
                                "process exceeded its timeout and was killed"
                            );
                            ProcessExitStatus::TimedOut {
                                after: timeout_duration,
                            }
                        }
                    }
                }
                None => exit_status(child.wait().await.map_err(wait_err)?),
            };

            // The leader is gone; anything left in its group is an orphan.
            if !matches!(status, ProcessExitStatus::TimedOut { .. })
                && let Some(pid) = pid
                && let Err(error) = signal_process_group(pid, libc::SIGKILL)
            {
                tracing::debug!(
                    task_id = ?task_id.as_ref().map(TaskId::as_str),
                    pid,
                    error = %error,
                    "failed to reap leftover process group"
                );
            }

            let stdout = collect_reader(stdout_reader).await;
            let stderr = collect_reader(stderr_reader).await;

            Ok(ProcessOutput {
                status,
                stdout,
                stderr,
                started_at,
                finished_at: SystemTime::now(),
            })
        })
    }
}

fn exit_status(status: std::process::ExitStatus) -> ProcessExitStatus {
    match status.code() {
        Some(code) => ProcessExitStatus::ExitCode(code),
        None => ProcessExitStatus::Terminated,
    }
}

struct OutputReader {
    buffer: Arc<Mutex<Vec<u8>>>,
    handle: JoinHandle<()>,
}

fn spawn_reader<R>(stream: Option<R>) -> OutputReader
where
    R: tokio::io::AsyncRead + Unpin + Send + 'static,
{
    let buffer = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&buffer);
    let handle = tokio::spawn(async move {
        let Some(mut stream) = stream else {
            return;
        };
        let mut chunk = [0_u8; 8192];
        loop {
            // A read error keeps whatever arrived before it.
            match stream.read(&mut chunk).await {
                Ok(0) | Err(_) => break,
                Ok(read) => {
                    if let Ok(mut buffer) = sink.lock() {
                        buffer.extend_from_slice(&chunk[..read]);
                    }
                }
            }
        }
    });
    OutputReader { buffer, handle }
}

/// Waits briefly for the reader to hit end of stream, then returns every byte it has
/// seen so far, whether or not the stream closed.
async fn collect_reader(reader: OutputReader) -> Vec<u8> {
    let OutputReader { buffer, handle } = reader;
    let abort = handle.abort_handle();
    if tokio::time::timeout(OUTPUT_READ_WINDOW, handle).await.is_err() {
        abort.abort();
    }
    match buffer.lock() {
        Ok(mut bytes) => std::mem::take(&mut *bytes),
        Err(poisoned) => std::mem::take(&mut *poisoned.into_inner()),
    }
}

fn signal_process_group(pid: u32, signal: libc::c_int) -> Result<(), std::io::Error> {
    let pgid = -(pid as libc::pid_t);
    let result = unsafe { libc::kill(pgid, signal) };
    if result != 0 {
        let os_error = std::io::Error::last_os_error();
        if os_error.raw_os_error() != Some(libc::ESRCH) {
            return Err(os_error);
        }
    }
    Ok(())
}

fn process_failure(task_id: Option<TaskId>, task_type: TaskType, message: String) -> CoreError {
    CoreError {
        task_id,
        task: Some(task_type),
        kind: CoreErrorKind::ProcessFailure,
        message,
    }
}
