use std::sync::Arc;

use crate::config::ToolSettings;
use crate::execution::{ProcessExecutor, spawn_validated};
use crate::sandbox::tools::tool_request;
use crate::sandbox::{AdapterOutcome, Sandbox, SandboxFuture, ToolInvocation};

/// Sandbox backed by real child processes.
pub struct ProcessSandbox {
    executor: Arc<dyn ProcessExecutor>,
    tools: ToolSettings,
}

impl ProcessSandbox {
    pub fn new(executor: Arc<dyn ProcessExecutor>, tools: ToolSettings) -> Self {
        Self { executor, tools }
    }
}

impl Sandbox for ProcessSandbox {
    fn run(&self, invocation: ToolInvocation) -> SandboxFuture {
        let executor = self.executor.clone();
        let request = tool_request(
            invocation.task_id.clone(),
            &invocation.request,
            &self.tools,
            invocation.timeout,
        );

        Box::pin(async move {
            let request = match request {
                Ok(request) => request,
                Err(error) => return AdapterOutcome::launch_error(error.message),
            };
            let program = request.command.display();

            let process = match spawn_validated(executor.as_ref(), request) {
                Ok(process) => process,
                Err(error) => {
                    tracing::warn!(
                        task_id = %invocation.task_id,
                        task_type = %invocation.task_type(),
                        command = %program,
                        kind = ?error.kind,
                        message = %error.message,
                        "tool failed to launch"
                    );
                    return AdapterOutcome::launch_error(error.message);
                }
            };

            match process.wait().await {
                Ok(output) => AdapterOutcome::from_process_output(output),
                Err(error) => AdapterOutcome::launch_error(error.message),
            }
        })
    }
}
