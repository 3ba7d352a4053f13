// src/system/adapter.rs

use crate::CancellationToken;
use crate::models::{Invocation, ToolOutput};
use crate::system::executor::{self, ExecutionError};

/// Runs the command lines produced by phase handlers.
///
/// The dispatcher only talks to this trait, so tests can substitute a
/// recording fake for real subprocesses.
pub trait ToolAdapter: Send + Sync {
    fn invoke(
        &self,
        invocation: &Invocation,
        cancellation_token: &CancellationToken,
    ) -> Result<ToolOutput, ExecutionError>;
}

/// Spawns each invocation as a child process and captures its output.
#[derive(Debug, Default, Clone, Copy)]
pub struct ShellAdapter;

impl ToolAdapter for ShellAdapter {
    fn invoke(
        &self,
        invocation: &Invocation,
        cancellation_token: &CancellationToken,
    ) -> Result<ToolOutput, ExecutionError> {
        executor::execute_and_capture(
            &invocation.command,
            invocation.shell,
            &invocation.cwd,
            &invocation.env,
            cancellation_token,
        )
    }
}
