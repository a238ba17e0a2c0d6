//! Error types for relbuild
//!
//! One error type per stage, each carrying a `kind` and the collaborator's
//! diagnostic output unmodified, plus [`PipelineError`] which names the
//! failing stage and its exit code.

use serde::Serialize;
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

use crate::stage::Stage;

/// Exit code for configuration and usage errors (no stage ran).
pub const EXIT_CONFIG: i32 = 2;

fn package_suffix(package: &Option<String>) -> String {
    match package {
        Some(name) => format!(" ({name})"),
        None => String::new(),
    }
}

// ---------------------------------------------------------------------------
// Provision
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ProvisionErrorKind {
    IndexRefreshFailed,
    PackageInstallFailed,
    PermissionDenied,
}

impl fmt::Display for ProvisionErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ProvisionErrorKind::IndexRefreshFailed => "package index refresh failed",
            ProvisionErrorKind::PackageInstallFailed => "package install failed",
            ProvisionErrorKind::PermissionDenied => "permission denied",
        })
    }
}

/// Failure of the dependency provisioner.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{kind}{}: {diagnostic}", package_suffix(.offending_package))]
pub struct ProvisionError {
    pub kind: ProvisionErrorKind,
    pub offending_package: Option<String>,
    /// Package manager output, unmodified.
    pub diagnostic: String,
}

impl ProvisionError {
    pub fn new(kind: ProvisionErrorKind, diagnostic: impl Into<String>) -> Self {
        Self {
            kind,
            offending_package: None,
            diagnostic: diagnostic.into(),
        }
    }

    pub fn with_package(mut self, package: impl Into<String>) -> Self {
        self.offending_package = Some(package.into());
        self
    }
}

// ---------------------------------------------------------------------------
// Compile
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum CompileErrorKind {
    ToolchainMissing,
    SourceInvalid,
    CompilationFailed,
}

impl fmt::Display for CompileErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            CompileErrorKind::ToolchainMissing => "toolchain missing",
            CompileErrorKind::SourceInvalid => "source tree invalid",
            CompileErrorKind::CompilationFailed => "compilation failed",
        })
    }
}

/// Failure of the compiler invoker.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{kind}: {diagnostic_output}")]
pub struct CompileError {
    pub kind: CompileErrorKind,
    /// The toolchain's raw error stream.
    pub diagnostic_output: String,
}

impl CompileError {
    pub fn new(kind: CompileErrorKind, diagnostic_output: impl Into<String>) -> Self {
        Self {
            kind,
            diagnostic_output: diagnostic_output.into(),
        }
    }
}

// ---------------------------------------------------------------------------
// Strip
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum StripErrorKind {
    ToolMissing,
    UnsupportedBinaryFormat,
    IoFailure,
}

impl fmt::Display for StripErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            StripErrorKind::ToolMissing => "strip tool missing",
            StripErrorKind::UnsupportedBinaryFormat => "unsupported binary format",
            StripErrorKind::IoFailure => "I/O failure",
        })
    }
}

/// Failure of the artifact post-processor.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{kind} for {}: {diagnostic}", .path.display())]
pub struct StripError {
    pub kind: StripErrorKind,
    pub path: PathBuf,
    pub diagnostic: String,
}

impl StripError {
    pub fn new(kind: StripErrorKind, path: impl Into<PathBuf>, diagnostic: impl Into<String>) -> Self {
        Self {
            kind,
            path: path.into(),
            diagnostic: diagnostic.into(),
        }
    }
}

// ---------------------------------------------------------------------------
// Publish
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum PublishErrorKind {
    OutputDirMissing,
    MoveFailed,
    NameCollisionWithDirectory,
}

impl fmt::Display for PublishErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            PublishErrorKind::OutputDirMissing => "output directory missing",
            PublishErrorKind::MoveFailed => "move failed",
            PublishErrorKind::NameCollisionWithDirectory => "destination is a directory",
        })
    }
}

/// Failure of the artifact publisher.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{kind} at {}: {diagnostic}", .path.display())]
pub struct PublishError {
    pub kind: PublishErrorKind,
    /// The path the failure concerns (output dir or destination).
    pub path: PathBuf,
    pub diagnostic: String,
}

impl PublishError {
    pub fn new(kind: PublishErrorKind, path: impl Into<PathBuf>, diagnostic: impl Into<String>) -> Self {
        Self {
            kind,
            path: path.into(),
            diagnostic: diagnostic.into(),
        }
    }
}

// ---------------------------------------------------------------------------
// Pipeline
// ---------------------------------------------------------------------------

/// First stage failure of a run. Later stages never ran.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PipelineError {
    #[error("provision stage failed: {0}")]
    Provision(#[from] ProvisionError),

    #[error("compile stage failed: {0}")]
    Compile(#[from] CompileError),

    #[error("strip stage failed: {0}")]
    Strip(#[from] StripError),

    #[error("publish stage failed: {0}")]
    Publish(#[from] PublishError),
}

impl PipelineError {
    /// The stage that produced this error.
    pub fn stage(&self) -> Stage {
        match self {
            PipelineError::Provision(_) => Stage::Provision,
            PipelineError::Compile(_) => Stage::Compile,
            PipelineError::Strip(_) => Stage::Strip,
            PipelineError::Publish(_) => Stage::Publish,
        }
    }

    pub fn exit_code(&self) -> i32 {
        self.stage().exit_code()
    }

    /// The collaborator's diagnostic, exactly as it was captured.
    pub fn diagnostic(&self) -> &str {
        match self {
            PipelineError::Provision(e) => &e.diagnostic,
            PipelineError::Compile(e) => &e.diagnostic_output,
            PipelineError::Strip(e) => &e.diagnostic,
            PipelineError::Publish(e) => &e.diagnostic,
        }
    }
}

// ---------------------------------------------------------------------------
// Target / Config
// ---------------------------------------------------------------------------

/// Target triple or OS/architecture parsing errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TargetError {
    #[error("Malformed target triple: '{0}'")]
    MalformedTriple(String),

    #[error("Unknown architecture: '{0}'")]
    UnknownArchitecture(String),

    #[error("Unknown operating system in '{0}'")]
    UnknownOs(String),
}

/// Configuration file and option errors.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file {path:?}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid config file {path:?}: {message}")]
    Parse { path: PathBuf, message: String },

    #[error("Missing required option: {0}")]
    MissingOption(&'static str),

    #[error("Conflicting target options: {0}")]
    ConflictingTarget(String),

    #[error("Invalid package name: '{0}'")]
    InvalidPackageName(String),

    #[error("Invalid value for {option}: '{value}'")]
    InvalidValue { option: &'static str, value: String },

    #[error(transparent)]
    Target(#[from] TargetError),
}
