//! Subprocess plumbing for external load tools
//!
//! Tools are spawned from an argument vector (no shell), with piped
//! stdout/stderr and a hard timeout. Spawn failures, timeouts and non-zero
//! exits all become `LoadTestExecution` errors; no partial output escapes.

use std::ffi::OsString;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use tokio::process::Command;

use crate::performance::error::{HarnessError, Result};

/// Keep error messages readable when a tool dumps a lot of stderr
const STDERR_TAIL_BYTES: usize = 2048;

/// One invocation of an external tool
#[derive(Debug, Clone)]
pub struct ToolInvocation {
    /// Short tool name used in logs and errors
    pub tool: String,
    pub program: PathBuf,
    pub args: Vec<OsString>,
    pub timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct ToolOutput {
    pub stdout: String,
    pub stderr: String,
}

impl ToolInvocation {
    pub fn new(tool: impl Into<String>, program: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self {
            tool: tool.into(),
            program: program.into(),
            args: Vec::new(),
            timeout,
        }
    }

    pub fn arg(mut self, arg: impl Into<OsString>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Append `flag value` when `value` is present
    pub fn opt_arg<T: ToString>(self, flag: &str, value: Option<T>) -> Self {
        match value {
            Some(v) => self.arg(flag).arg(v.to_string()),
            None => self,
        }
    }

    /// Run to completion and capture output
    pub async fn run(&self) -> Result<ToolOutput> {
        tracing::info!(
            tool = %self.tool,
            program = %self.program.display(),
            args = ?self.args,
            timeout_secs = self.timeout.as_secs(),
            "spawning load tool"
        );

        let child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                HarnessError::execution(
                    &self.tool,
                    format!("failed to spawn {}: {}", self.program.display(), e),
                )
            })?;

        // Dropping the future on timeout drops the child, which kills it
        let output = match tokio::time::timeout(self.timeout, child.wait_with_output()).await {
            Ok(result) => result.map_err(|e| HarnessError::execution(&self.tool, e.to_string()))?,
            Err(_) => {
                return Err(HarnessError::execution(
                    &self.tool,
                    format!("timed out after {:?}", self.timeout),
                ))
            }
        };

        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        let stderr = String::from_utf8_lossy(&output.stderr).into_owned();

        if !output.status.success() {
            let status = output
                .status
                .code()
                .map(|c| format!("exit code {}", c))
                .unwrap_or_else(|| "terminated by signal".to_string());
            return Err(HarnessError::execution(
                &self.tool,
                format!("{}: {}", status, stderr_tail(&stderr)),
            ));
        }

        tracing::debug!(
            tool = %self.tool,
            stdout_bytes = stdout.len(),
            stderr_bytes = stderr.len(),
            "load tool finished"
        );
        Ok(ToolOutput { stdout, stderr })
    }
}

fn stderr_tail(stderr: &str) -> &str {
    let trimmed = stderr.trim();
    if trimmed.len() <= STDERR_TAIL_BYTES {
        return trimmed;
    }
    let mut start = trimmed.len() - STDERR_TAIL_BYTES;
    while !trimmed.is_char_boundary(start) {
        start += 1;
    }
    &trimmed[start..]
}
