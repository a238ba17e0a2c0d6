//! Cargo-based compiler invoker.

use async_trait::async_trait;
use relbuild_core::{
    BuildProfile, CompileError, CompileErrorKind, CompiledArtifact, TargetDescriptor,
};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::process::{self, InvokeError, Invocation};
use crate::stage::CompilerInvoker;

/// Toolchain messages that mean the source tree itself is unusable.
const SOURCE_INVALID_MARKERS: &[&str] = &[
    "could not find `cargo.toml`",
    "failed to parse manifest",
    "no bin target named",
    "failed to load manifest",
];

/// Toolchain messages that mean the requested target is not installed.
const TOOLCHAIN_MISSING_MARKERS: &[&str] = &[
    "target may not be installed",
    "can't find crate for `std`",
    "could not find specification for target",
];

/// Invokes `cargo build` for one target and locates the produced binary.
#[derive(Debug, Clone)]
pub struct CargoCompiler {
    program: String,
    binary_name: Option<String>,
    target_dir: Option<PathBuf>,
    timeout_secs: u64,
}

impl CargoCompiler {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            binary_name: None,
            target_dir: None,
            timeout_secs: 0,
        }
    }

    /// Build this binary instead of the manifest's package name.
    pub fn with_binary_name(mut self, name: impl Into<String>) -> Self {
        self.binary_name = Some(name.into());
        self
    }

    /// Override the target directory (otherwise `CARGO_TARGET_DIR` or
    /// `<source_root>/target`).
    pub fn with_target_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.target_dir = Some(dir.into());
        self
    }

    pub fn with_timeout(mut self, secs: u64) -> Self {
        self.timeout_secs = secs;
        self
    }

    /// The `cargo build` invocation for this target/profile.
    pub fn invocation(
        &self,
        target: &TargetDescriptor,
        profile: &BuildProfile,
        source_root: &Path,
        binary: &str,
    ) -> Invocation {
        let mut invocation = Invocation::new(self.program.clone())
            .args(["build", "--target", target.triple()]);
        if profile.is_release() {
            invocation = invocation.arg("--release");
        }
        invocation
            .args(["--bin", binary])
            .args(profile.extra_flags.iter().cloned())
            .env("CARGO_TERM_COLOR", "never")
            .current_dir(source_root)
            .timeout_secs(self.timeout_secs)
    }

    /// Where cargo writes the binary: `<target_dir>/<triple>/<profile>/<bin>`.
    pub fn output_path(
        &self,
        target: &TargetDescriptor,
        profile: &BuildProfile,
        source_root: &Path,
        binary: &str,
    ) -> PathBuf {
        self.target_dir(source_root)
            .join(target.triple())
            .join(profile.optimization_level.dir_name())
            .join(format!("{}{}", binary, target.executable_suffix()))
    }

    fn target_dir(&self, source_root: &Path) -> PathBuf {
        let dir = self
            .target_dir
            .clone()
            .or_else(|| std::env::var_os("CARGO_TARGET_DIR").map(PathBuf::from))
            .unwrap_or_else(|| PathBuf::from("target"));
        if dir.is_absolute() {
            dir
        } else {
            source_root.join(dir)
        }
    }

    fn resolve_binary_name(&self, source_root: &Path) -> Result<String, CompileError> {
        if let Some(name) = &self.binary_name {
            return Ok(name.clone());
        }
        package_name(&source_root.join("Cargo.toml"))
    }
}

/// Read `[package].name` from a manifest.
fn package_name(manifest: &Path) -> Result<String, CompileError> {
    let content = std::fs::read_to_string(manifest).map_err(|e| {
        CompileError::new(
            CompileErrorKind::SourceInvalid,
            format!("failed to read {}: {}", manifest.display(), e),
        )
    })?;
    let value: toml::Value = toml::from_str(&content).map_err(|e| {
        CompileError::new(
            CompileErrorKind::SourceInvalid,
            format!("failed to parse manifest {}: {}", manifest.display(), e),
        )
    })?;

    value
        .get("package")
        .and_then(|p| p.get("name"))
        .and_then(|n| n.as_str())
        .map(str::to_string)
        .ok_or_else(|| {
            CompileError::new(
                CompileErrorKind::SourceInvalid,
                format!(
                    "{} has no [package].name; set binary_name explicitly",
                    manifest.display()
                ),
            )
        })
}

fn classify_failure(diagnostic: &str) -> CompileErrorKind {
    let lower = diagnostic.to_lowercase();
    if TOOLCHAIN_MISSING_MARKERS.iter().any(|m| lower.contains(m)) {
        CompileErrorKind::ToolchainMissing
    } else if SOURCE_INVALID_MARKERS.iter().any(|m| lower.contains(m)) {
        CompileErrorKind::SourceInvalid
    } else {
        CompileErrorKind::CompilationFailed
    }
}

#[async_trait]
impl CompilerInvoker for CargoCompiler {
    async fn compile(
        &self,
        target: &TargetDescriptor,
        profile: &BuildProfile,
        source_root: &Path,
    ) -> Result<CompiledArtifact, CompileError> {
        if !source_root.is_dir() {
            return Err(CompileError::new(
                CompileErrorKind::SourceInvalid,
                format!("source root {} is not a directory", source_root.display()),
            ));
        }
        let manifest = source_root.join("Cargo.toml");
        if !manifest.is_file() {
            return Err(CompileError::new(
                CompileErrorKind::SourceInvalid,
                format!("could not find `Cargo.toml` in {}", source_root.display()),
            ));
        }

        let binary = self.resolve_binary_name(source_root)?;
        let invocation = self.invocation(target, profile, source_root, &binary);
        info!(command = %invocation.command_line(), "Compiling");

        let output = process::run(&invocation).await.map_err(|e| {
            let kind = match e {
                InvokeError::NotFound { .. } => CompileErrorKind::ToolchainMissing,
                _ => CompileErrorKind::CompilationFailed,
            };
            CompileError::new(kind, e.to_string())
        })?;

        if !output.success {
            let diagnostic = output.diagnostic();
            return Err(CompileError::new(classify_failure(&diagnostic), diagnostic));
        }

        let path = self.output_path(target, profile, source_root, &binary);
        let artifact = CompiledArtifact::from_path(&path, target.clone()).map_err(|e| {
            CompileError::new(
                CompileErrorKind::CompilationFailed,
                format!(
                    "toolchain reported success but {} is unavailable: {}\n{}",
                    path.display(),
                    e,
                    output.stderr
                ),
            )
        })?;

        debug!(
            path = %artifact.path.display(),
            size_bytes = artifact.size_bytes,
            duration_ms = output.duration_ms,
            "Compiled artifact located"
        );
        Ok(artifact)
    }
}
