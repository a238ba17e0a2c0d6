//! External tool invocation.
//!
//! Every collaborator (package manager, cargo, strip) runs through
//! [`run`], which captures output, exit code and duration. Stdin is closed
//! so a tool that tries to prompt fails instead of hanging.

use std::path::PathBuf;
use std::process::Stdio;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::process::Command;
use tracing::debug;

/// A single command line to execute.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub program: String,
    pub args: Vec<String>,
    pub envs: Vec<(String, String)>,
    pub current_dir: Option<PathBuf>,
    /// 0 disables the timeout.
    pub timeout_secs: u64,
}

impl Invocation {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            envs: Vec::new(),
            current_dir: None,
            timeout_secs: 0,
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.envs.push((key.into(), value.into()));
        self
    }

    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.current_dir = Some(dir.into());
        self
    }

    pub fn timeout_secs(mut self, secs: u64) -> Self {
        self.timeout_secs = secs;
        self
    }

    /// Human-readable command line for logs.
    pub fn command_line(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Captured result of a finished process.
#[derive(Debug, Clone)]
pub struct CommandOutput {
    /// Exit code (-1 when terminated by a signal).
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
    pub duration_ms: u64,
    pub success: bool,
}

impl CommandOutput {
    /// The tool's error stream, falling back to stdout when stderr is empty.
    pub fn diagnostic(&self) -> String {
        if self.stderr.trim().is_empty() {
            self.stdout.clone()
        } else {
            self.stderr.clone()
        }
    }
}

/// The process could not be run to completion.
#[derive(Error, Debug)]
pub enum InvokeError {
    #[error("{program}: command not found")]
    NotFound { program: String },

    #[error("{program}: permission denied")]
    PermissionDenied { program: String },

    #[error("{program} timed out after {secs} seconds")]
    TimedOut { program: String, secs: u64 },

    #[error("failed to run {program}: {source}")]
    Io {
        program: String,
        #[source]
        source: std::io::Error,
    },
}

/// Run an invocation to completion and capture its output.
///
/// A non-zero exit is not an error here; callers inspect
/// [`CommandOutput::success`] and classify the diagnostic themselves.
pub async fn run(invocation: &Invocation) -> Result<CommandOutput, InvokeError> {
    let start = Instant::now();
    let program = invocation.program.clone();

    debug!(command = %invocation.command_line(), "Spawning process");

    let mut command = Command::new(&invocation.program);
    command
        .args(&invocation.args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    for (key, value) in &invocation.envs {
        command.env(key, value);
    }
    if let Some(dir) = &invocation.current_dir {
        command.current_dir(dir);
    }

    let child = command.spawn().map_err(|source| match source.kind() {
        std::io::ErrorKind::NotFound => InvokeError::NotFound {
            program: program.clone(),
        },
        std::io::ErrorKind::PermissionDenied => InvokeError::PermissionDenied {
            program: program.clone(),
        },
        _ => InvokeError::Io {
            program: program.clone(),
            source,
        },
    })?;

    let waited = if invocation.timeout_secs > 0 {
        tokio::time::timeout(
            Duration::from_secs(invocation.timeout_secs),
            child.wait_with_output(),
        )
        .await
        .map_err(|_| InvokeError::TimedOut {
            program: program.clone(),
            secs: invocation.timeout_secs,
        })?
    } else {
        child.wait_with_output().await
    };
    let output = waited.map_err(|source| InvokeError::Io {
        program: program.clone(),
        source,
    })?;

    let duration_ms = start.elapsed().as_millis() as u64;
    let exit_code = output.status.code().unwrap_or(-1);

    Ok(CommandOutput {
        exit_code,
        stdout: String::from_utf8_lossy(&output.stdout).to_string(),
        stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        duration_ms,
        success: output.status.success(),
    })
}
