//! Bounded subprocess execution for the external extraction tools.
//!
//! Each call blocks the calling thread until the child exits or its
//! timeout fires. A timed-out child is killed when its future is dropped.

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use tokio::process::Command;

use super::ExtractionError;

/// Captured result of one finished child process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutput {
    pub success: bool,
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    /// Error text for a failed run: stderr, else stdout, else the exit code.
    pub fn failure_message(&self, tool: &str) -> String {
        let stderr = self.stderr.trim();
        if !stderr.is_empty() {
            return stderr.to_string();
        }
        let stdout = self.stdout.trim();
        if !stdout.is_empty() {
            return stdout.to_string();
        }
        format!("{tool} exited with code {}", self.code.unwrap_or(-1))
    }
}

/// Resolve a program name against PATH (or accept an explicit path).
pub fn resolve_program(tool: &str, program: &str) -> Result<PathBuf, ExtractionError> {
    which::which(program).map_err(|_| ExtractionError::CommandNotFound {
        tool: tool.to_string(),
        program: program.to_string(),
    })
}

/// Split a configured command line on whitespace and resolve its program.
///
/// Returns the binary plus any fixed leading arguments.
pub fn resolve_command(tool: &str, command: &str) -> Result<(PathBuf, Vec<OsString>), ExtractionError> {
    let mut parts = command.split_whitespace();
    let program = parts.next().ok_or_else(|| ExtractionError::EmptyCommand {
        tool: tool.to_string(),
    })?;
    let binary = resolve_program(tool, program)?;
    Ok((binary, parts.map(OsString::from).collect()))
}

/// Runs tool subprocesses on a small dedicated tokio runtime.
///
/// Callers are plain threads (the indexer loop, the job worker, or a
/// synchronous request handler); they must not already be inside a runtime.
pub struct CommandRunner {
    runtime: tokio::runtime::Runtime,
}

impl CommandRunner {
    pub fn new() -> Result<Self, ExtractionError> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(1)
            .thread_name("casevault-tools")
            .enable_all()
            .build()?;
        Ok(Self { runtime })
    }

    pub fn run(
        &self,
        tool: &str,
        program: &Path,
        args: &[OsString],
        timeout: Duration,
    ) -> Result<CommandOutput, ExtractionError> {
        tracing::debug!(tool, program = %program.display(), "Spawning extraction tool");

        self.runtime.block_on(async {
            let mut cmd = Command::new(program);
            cmd.args(args)
                .stdin(Stdio::null())
                .stdout(Stdio::piped())
                .stderr(Stdio::piped())
                .kill_on_drop(true);

            let output = tokio::time::timeout(timeout, cmd.output())
                .await
                .map_err(|_| ExtractionError::Timeout {
                    tool: tool.to_string(),
                    secs: timeout.as_secs(),
                })??;

            Ok::<_, ExtractionError>(CommandOutput {
                success: output.status.success(),
                code: output.status.code(),
                stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
                stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            })
        })
    }
}
