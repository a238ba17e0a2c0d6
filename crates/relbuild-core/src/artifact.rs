//! Binaries owned by a pipeline run: the compiled intermediate and the
//! published result.

use serde::Serialize;
use std::io;
use std::path::{Path, PathBuf};

use crate::target::TargetDescriptor;

/// A binary produced by the toolchain, still at the toolchain's output path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CompiledArtifact {
    pub path: PathBuf,
    pub target: TargetDescriptor,
    pub size_bytes: u64,
}

impl CompiledArtifact {
    /// Describe the file at `path`, reading its current size.
    pub fn from_path(path: impl Into<PathBuf>, target: TargetDescriptor) -> io::Result<Self> {
        let path = path.into();
        let size_bytes = std::fs::metadata(&path)?.len();
        Ok(Self {
            path,
            target,
            size_bytes,
        })
    }

    /// Re-read `size_bytes` after the file was modified in place.
    pub fn refresh_size(mut self) -> io::Result<Self> {
        self.size_bytes = std::fs::metadata(&self.path)?.len();
        Ok(self)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Terminal output of a successful run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PublishedArtifact {
    /// `output_dir/<app_name>-<os>-<arch>`.
    pub path: PathBuf,
    /// The artifact as it was right before the move.
    pub source: CompiledArtifact,
    /// SHA-256 of the published bytes (hex).
    pub sha256: String,
    /// Whether the post-processor ran on these bytes.
    pub stripped: bool,
}
