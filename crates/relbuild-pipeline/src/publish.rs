//! Filesystem publisher: moves the processed binary to its canonical name.

use async_trait::async_trait;
use relbuild_core::{
    CompiledArtifact, PublishError, PublishErrorKind, PublishedArtifact, TargetDescriptor,
};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use tokio::io::AsyncReadExt;
use tracing::{debug, info};

use crate::stage::ArtifactPublisher;

/// Canonical `<app_name>-<os>-<architecture>` file name.
pub fn canonical_name(app_name: &str, target: &TargetDescriptor) -> String {
    target.artifact_name(app_name)
}

const DIGEST_CHUNK: usize = 64 * 1024;

/// SHA-256 of a file's content, hex encoded. Reads in fixed-size chunks.
pub async fn file_digest(path: &Path) -> std::io::Result<String> {
    let mut file = tokio::fs::File::open(path).await?;
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; DIGEST_CHUNK];
    loop {
        let n = file.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hex::encode(hasher.finalize()))
}

/// Publishes by renaming within the filesystem, falling back to
/// copy-then-delete when the output directory is on another device.
#[derive(Debug, Clone, Default)]
pub struct FsPublisher;

impl FsPublisher {
    pub fn new() -> Self {
        Self
    }

    async fn check_output_dir(output_dir: &Path) -> Result<(), PublishError> {
        match tokio::fs::metadata(output_dir).await {
            Ok(meta) if meta.is_dir() => Ok(()),
            Ok(_) => Err(PublishError::new(
                PublishErrorKind::OutputDirMissing,
                output_dir,
                "output path exists but is not a directory",
            )),
            Err(e) => Err(PublishError::new(
                PublishErrorKind::OutputDirMissing,
                output_dir,
                e.to_string(),
            )),
        }
    }

    async fn move_file(from: &Path, to: &Path) -> Result<(), PublishError> {
        let rename_err = match tokio::fs::rename(from, to).await {
            Ok(()) => return Ok(()),
            Err(e) => e,
        };
        debug!(error = %rename_err, "rename failed, falling back to copy + remove");

        tokio::fs::copy(from, to).await.map_err(|e| {
            PublishError::new(
                PublishErrorKind::MoveFailed,
                to,
                format!("rename failed ({rename_err}); copy failed ({e})"),
            )
        })?;
        tokio::fs::remove_file(from).await.map_err(|e| {
            PublishError::new(
                PublishErrorKind::MoveFailed,
                from,
                format!("copied to {} but could not remove source: {e}", to.display()),
            )
        })
    }
}

#[async_trait]
impl ArtifactPublisher for FsPublisher {
    async fn publish(
        &self,
        artifact: CompiledArtifact,
        output_dir: &Path,
        app_name: &str,
        target: &TargetDescriptor,
    ) -> Result<PublishedArtifact, PublishError> {
        Self::check_output_dir(output_dir).await?;

        let destination: PathBuf = output_dir.join(canonical_name(app_name, target));
        if let Ok(meta) = tokio::fs::symlink_metadata(&destination).await {
            if meta.is_dir() {
                return Err(PublishError::new(
                    PublishErrorKind::NameCollisionWithDirectory,
                    &destination,
                    "a directory already occupies the artifact name",
                ));
            }
        }

        let source_digest = file_digest(&artifact.path).await.map_err(|e| {
            PublishError::new(PublishErrorKind::MoveFailed, &artifact.path, e.to_string())
        })?;

        if artifact.path != destination {
            Self::move_file(&artifact.path, &destination).await?;
        }

        let published_digest = file_digest(&destination).await.map_err(|e| {
            PublishError::new(PublishErrorKind::MoveFailed, &destination, e.to_string())
        })?;
        if published_digest != source_digest {
            return Err(PublishError::new(
                PublishErrorKind::MoveFailed,
                &destination,
                format!("content changed during move: {source_digest} -> {published_digest}"),
            ));
        }

        info!(
            path = %destination.display(),
            sha256 = %&published_digest[..12],
            size_bytes = artifact.size_bytes,
            "Artifact published"
        );

        Ok(PublishedArtifact {
            path: destination,
            source: artifact,
            sha256: published_digest,
            stripped: false,
        })
    }
}
