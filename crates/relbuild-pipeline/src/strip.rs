//! Symbol stripping post-processor.

use async_trait::async_trait;
use relbuild_core::{CompiledArtifact, StripError, StripErrorKind};
use std::path::Path;
use tokio::io::AsyncReadExt;
use tracing::{debug, info, warn};

use crate::process::{self, InvokeError, Invocation};
use crate::stage::PostProcessor;

/// Executable container formats the stripper knows how to handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryFormat {
    Elf,
    MachO,
    Pe,
}

impl BinaryFormat {
    /// Identify the format from the first bytes of a file.
    pub fn detect(header: &[u8]) -> Option<Self> {
        match header {
            [0x7f, b'E', b'L', b'F', ..] => Some(BinaryFormat::Elf),
            [0xfe, 0xed, 0xfa, 0xce | 0xcf, ..]
            | [0xce | 0xcf, 0xfa, 0xed, 0xfe, ..]
            | [0xca, 0xfe, 0xba, 0xbe, ..] => Some(BinaryFormat::MachO),
            [b'M', b'Z', ..] => Some(BinaryFormat::Pe),
            _ => None,
        }
    }

    fn strip_args(&self) -> &'static [&'static str] {
        match self {
            BinaryFormat::Elf | BinaryFormat::Pe => &["--strip-all"],
            // Apple strip: keep only global symbols needed for dynamic linking.
            BinaryFormat::MachO => &["-x"],
        }
    }
}

const UNSUPPORTED_MARKERS: &[&str] = &[
    "file format not recognized",
    "file format not recognised",
    "is not an object file",
    "unsupported file format",
];

/// Runs the platform `strip` tool on the artifact in place.
#[derive(Debug, Clone)]
pub struct SymbolStripper {
    program: String,
    timeout_secs: u64,
}

impl SymbolStripper {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            timeout_secs: 0,
        }
    }

    pub fn with_timeout(mut self, secs: u64) -> Self {
        self.timeout_secs = secs;
        self
    }

    pub fn invocation(&self, format: BinaryFormat, path: &Path) -> Invocation {
        Invocation::new(self.program.clone())
            .args(format.strip_args().iter().copied())
            .arg(path.to_string_lossy().to_string())
            .timeout_secs(self.timeout_secs)
    }
}

async fn read_header(path: &Path) -> std::io::Result<Vec<u8>> {
    let mut file = tokio::fs::File::open(path).await?;
    let mut header = Vec::with_capacity(4);
    (&mut file).take(4).read_to_end(&mut header).await?;
    Ok(header)
}

#[async_trait]
impl PostProcessor for SymbolStripper {
    async fn strip(&self, artifact: CompiledArtifact) -> Result<CompiledArtifact, StripError> {
        let path = artifact.path.clone();

        let header = read_header(&path)
            .await
            .map_err(|e| StripError::new(StripErrorKind::IoFailure, &path, e.to_string()))?;
        let format = BinaryFormat::detect(&header).ok_or_else(|| {
            StripError::new(
                StripErrorKind::UnsupportedBinaryFormat,
                &path,
                format!("unrecognized executable header {}", hex::encode(&header)),
            )
        })?;

        let invocation = self.invocation(format, &path);
        info!(command = %invocation.command_line(), ?format, "Stripping symbols");

        let output = process::run(&invocation).await.map_err(|e| {
            let kind = match e {
                InvokeError::NotFound { .. } => StripErrorKind::ToolMissing,
                _ => StripErrorKind::IoFailure,
            };
            StripError::new(kind, &path, e.to_string())
        })?;

        if !output.success {
            let diagnostic = output.diagnostic();
            let lower = diagnostic.to_lowercase();
            let kind = if UNSUPPORTED_MARKERS.iter().any(|m| lower.contains(m)) {
                StripErrorKind::UnsupportedBinaryFormat
            } else {
                StripErrorKind::IoFailure
            };
            return Err(StripError::new(kind, &path, diagnostic));
        }

        let before = artifact.size_bytes;
        let stripped = artifact
            .refresh_size()
            .map_err(|e| StripError::new(StripErrorKind::IoFailure, &path, e.to_string()))?;

        // A stripped binary is never larger than its input.
        if stripped.size_bytes > before {
            warn!(before, after = stripped.size_bytes, "Stripping grew the binary");
            return Err(StripError::new(
                StripErrorKind::IoFailure,
                &path,
                format!(
                    "{} reported success but the binary grew from {} to {} bytes",
                    self.program, before, stripped.size_bytes
                ),
            ));
        }
        debug!(
            before,
            after = stripped.size_bytes,
            saved = before - stripped.size_bytes,
            "Symbols stripped"
        );
        Ok(stripped)
    }
}
