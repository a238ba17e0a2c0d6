//! Stage contracts.
//!
//! The orchestrator only sees these four traits. Production implementations
//! drive real tools; [`crate::fakes`] provides in-memory ones for tests.

use async_trait::async_trait;
use relbuild_core::{
    BuildProfile, CompileError, CompiledArtifact, DependencySet, PipelineConfig, ProvisionError,
    PublishError, PublishedArtifact, StripError, TargetDescriptor,
};
use std::path::Path;
use std::sync::Arc;

use crate::compile::CargoCompiler;
use crate::provision::{IndexProvisioner, SystemPackageIndex};
use crate::publish::FsPublisher;
use crate::strip::SymbolStripper;

/// Makes sure the host has every native package the build needs.
#[async_trait]
pub trait DependencyProvisioner: Send + Sync {
    async fn provision(&self, dependencies: &DependencySet) -> Result<(), ProvisionError>;
}

/// Builds the application for one target.
#[async_trait]
pub trait CompilerInvoker: Send + Sync {
    /// Returns the artifact at the toolchain's own output path for
    /// `target` + `profile`.
    async fn compile(
        &self,
        target: &TargetDescriptor,
        profile: &BuildProfile,
        source_root: &Path,
    ) -> Result<CompiledArtifact, CompileError>;
}

/// Shrinks a compiled binary in place without changing its behavior.
#[async_trait]
pub trait PostProcessor: Send + Sync {
    async fn strip(&self, artifact: CompiledArtifact) -> Result<CompiledArtifact, StripError>;
}

/// Moves the processed binary to its canonical name in the output directory.
#[async_trait]
pub trait ArtifactPublisher: Send + Sync {
    async fn publish(
        &self,
        artifact: CompiledArtifact,
        output_dir: &Path,
        app_name: &str,
        target: &TargetDescriptor,
    ) -> Result<PublishedArtifact, PublishError>;
}

/// The four collaborators of one pipeline.
#[derive(Clone)]
pub struct StageSet {
    pub provisioner: Arc<dyn DependencyProvisioner>,
    pub compiler: Arc<dyn CompilerInvoker>,
    pub post_processor: Arc<dyn PostProcessor>,
    pub publisher: Arc<dyn ArtifactPublisher>,
}

impl StageSet {
    /// Production stages wired from the resolved configuration.
    pub fn from_config(config: &PipelineConfig) -> Self {
        let index = SystemPackageIndex::new(config.package_manager)
            .with_sudo(config.use_sudo)
            .with_timeout(config.tools.timeout_secs);

        let mut compiler = CargoCompiler::new(config.tools.cargo_program.clone())
            .with_timeout(config.tools.timeout_secs);
        if let Some(bin) = &config.binary_name {
            compiler = compiler.with_binary_name(bin.clone());
        }

        Self {
            provisioner: Arc::new(IndexProvisioner::new(Arc::new(index))),
            compiler: Arc::new(compiler),
            post_processor: Arc::new(
                SymbolStripper::new(config.tools.strip_program.clone())
                    .with_timeout(config.tools.timeout_secs),
            ),
            publisher: Arc::new(FsPublisher::new()),
        }
    }
}
