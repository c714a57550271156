use std::time::Duration;

use crate::config::ToolSettings;
use crate::execution::{CommandSpec, ProcessSpawnRequest};
use crate::models::{CoreError, CoreResult, TaskId, TaskRequest};

/// Turns a typed request into the process to spawn. Nothing here goes through a shell.
pub fn tool_request(
    task_id: TaskId,
    request: &TaskRequest,
    tools: &ToolSettings,
    timeout: Duration,
) -> CoreResult<ProcessSpawnRequest> {
    let task_type = request.task_type();
    let command = match request {
        TaskRequest::Command { command } => command_argv(command)?,
        _ => match tools.for_task(task_type) {
            Some(tool) => tool.command_spec(request.input()),
            None => {
                return Err(CoreError::invalid_input(format!(
                    "no tool configured for {task_type} tasks"
                )));
            }
        },
    };

    Ok(ProcessSpawnRequest::new(task_type, command)
        .task_id(task_id)
        .timeout(timeout))
}

/// POSIX shell-word splitting of a submitted command line.
pub fn command_argv(command: &str) -> CoreResult<CommandSpec> {
    let argv = shlex::split(command).ok_or_else(|| {
        CoreError::invalid_input("command has unbalanced quotes or a trailing escape")
    })?;
    CommandSpec::from_argv(argv).ok_or_else(|| CoreError::invalid_input("command is empty"))
}
