//! In-memory fakes for the stage contracts (testing only)
//!
//! Every fake counts its invocations so tests can assert which stages ran.
//! The compiler and stripper fakes still touch the filesystem: they write
//! and truncate a real file so the publisher can be exercised for real.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use relbuild_core::{
    BuildProfile, CompileError, CompiledArtifact, DependencySet, ProvisionError,
    ProvisionErrorKind, PublishError, PublishedArtifact, StripError, StripErrorKind,
    TargetDescriptor,
};

use crate::provision::{IndexProvisioner, PackageIndex};
use crate::publish::FsPublisher;
use crate::stage::{
    ArtifactPublisher, CompilerInvoker, DependencyProvisioner, PostProcessor, StageSet,
};

/// Marks where the simulated symbol table starts in fake binaries.
pub const FAKE_SYMBOL_MARKER: &[u8] = b"\0.symtab\0";

// ---------------------------------------------------------------------------
// FakePackageIndex
// ---------------------------------------------------------------------------

/// Package index that records refreshes and installs.
#[derive(Debug, Default)]
pub struct FakePackageIndex {
    refreshes: AtomicUsize,
    install_calls: AtomicUsize,
    installed: Mutex<Vec<String>>,
    fail_refresh: bool,
    fail_package: Option<String>,
}

impl FakePackageIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing_refresh(mut self) -> Self {
        self.fail_refresh = true;
        self
    }

    pub fn failing_install(mut self, package: impl Into<String>) -> Self {
        self.fail_package = Some(package.into());
        self
    }

    pub fn refresh_count(&self) -> usize {
        self.refreshes.load(Ordering::SeqCst)
    }

    pub fn install_calls(&self) -> usize {
        self.install_calls.load(Ordering::SeqCst)
    }

    /// Distinct packages currently "on the host", in install order.
    pub fn installed(&self) -> Vec<String> {
        self.installed.lock().unwrap().clone()
    }
}

#[async_trait]
impl PackageIndex for FakePackageIndex {
    async fn refresh(&self) -> Result<(), ProvisionError> {
        self.refreshes.fetch_add(1, Ordering::SeqCst);
        if self.fail_refresh {
            return Err(ProvisionError::new(
                ProvisionErrorKind::IndexRefreshFailed,
                "E: Failed to fetch http://archive.example/dists/stable/InRelease",
            ));
        }
        Ok(())
    }

    async fn install(&self, package: &str) -> Result<(), ProvisionError> {
        self.install_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_package.as_deref() == Some(package) {
            return Err(ProvisionError::new(
                ProvisionErrorKind::PackageInstallFailed,
                format!("E: Unable to locate package {package}"),
            )
            .with_package(package));
        }
        let mut installed = self.installed.lock().unwrap();
        if !installed.iter().any(|p| p == package) {
            installed.push(package.to_string());
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// FakeProvisioner
// ---------------------------------------------------------------------------

/// Provisioner backed by a [`FakePackageIndex`], counting its calls.
pub struct FakeProvisioner {
    calls: AtomicUsize,
    index: Arc<FakePackageIndex>,
    inner: IndexProvisioner,
}

impl FakeProvisioner {
    pub fn new(index: FakePackageIndex) -> Self {
        let index = Arc::new(index);
        Self {
            calls: AtomicUsize::new(0),
            inner: IndexProvisioner::new(index.clone()),
            index,
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn index(&self) -> &FakePackageIndex {
        &self.index
    }
}

impl Default for FakeProvisioner {
    fn default() -> Self {
        Self::new(FakePackageIndex::new())
    }
}

#[async_trait]
impl DependencyProvisioner for FakeProvisioner {
    async fn provision(&self, dependencies: &DependencySet) -> Result<(), ProvisionError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.inner.provision(dependencies).await
    }
}

// ---------------------------------------------------------------------------
// FakeCompiler
// ---------------------------------------------------------------------------

/// Compiler that writes a fixed payload to `<output_root>/<triple>/<profile>/<binary>`.
#[derive(Debug)]
pub struct FakeCompiler {
    output_root: PathBuf,
    binary_name: String,
    payload: Vec<u8>,
    failure: Option<CompileError>,
    calls: AtomicUsize,
}

impl FakeCompiler {
    /// Payload is an ELF header, some code bytes, then a fake symbol table.
    pub fn new(output_root: impl Into<PathBuf>) -> Self {
        let mut payload = b"\x7fELF\x02\x01\x01\x00".to_vec();
        payload.extend_from_slice(&[0x90; 64]);
        payload.extend_from_slice(FAKE_SYMBOL_MARKER);
        payload.extend_from_slice(&[0x53; 256]);
        Self {
            output_root: output_root.into(),
            binary_name: "app".to_string(),
            payload,
            failure: None,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn failing(mut self, error: CompileError) -> Self {
        self.failure = Some(error);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Where this fake places its output for `target` + `profile`.
    pub fn output_path(&self, target: &TargetDescriptor, profile: &BuildProfile) -> PathBuf {
        self.output_root
            .join(target.triple())
            .join(profile.optimization_level.dir_name())
            .join(format!("{}{}", self.binary_name, target.executable_suffix()))
    }
}

#[async_trait]
impl CompilerInvoker for FakeCompiler {
    async fn compile(
        &self,
        target: &TargetDescriptor,
        profile: &BuildProfile,
        _source_root: &Path,
    ) -> Result<CompiledArtifact, CompileError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(err) = &self.failure {
            return Err(err.clone());
        }
        let path = self.output_path(target, profile);
        let io_err = |e: std::io::Error| {
            CompileError::new(relbuild_core::CompileErrorKind::CompilationFailed, e.to_string())
        };
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(io_err)?;
        }
        tokio::fs::write(&path, &self.payload).await.map_err(io_err)?;
        CompiledArtifact::from_path(path, target.clone()).map_err(io_err)
    }
}

// ---------------------------------------------------------------------------
// FakeStripper
// ---------------------------------------------------------------------------

/// Post-processor that truncates the file at [`FAKE_SYMBOL_MARKER`].
#[derive(Debug, Default)]
pub struct FakeStripper {
    failure: Option<StripErrorKind>,
    calls: AtomicUsize,
}

impl FakeStripper {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing(mut self, kind: StripErrorKind) -> Self {
        self.failure = Some(kind);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PostProcessor for FakeStripper {
    async fn strip(&self, artifact: CompiledArtifact) -> Result<CompiledArtifact, StripError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(kind) = self.failure {
            return Err(StripError::new(kind, &artifact.path, "fake strip failure"));
        }
        let io_err =
            |e: std::io::Error| StripError::new(StripErrorKind::IoFailure, &artifact.path, e.to_string());

        let mut bytes = tokio::fs::read(&artifact.path).await.map_err(io_err)?;
        if let Some(pos) = bytes
            .windows(FAKE_SYMBOL_MARKER.len())
            .position(|w| w == FAKE_SYMBOL_MARKER)
        {
            bytes.truncate(pos);
            tokio::fs::write(&artifact.path, &bytes).await.map_err(io_err)?;
        }
        let path = artifact.path.clone();
        artifact
            .refresh_size()
            .map_err(|e| StripError::new(StripErrorKind::IoFailure, path, e.to_string()))
    }
}

// ---------------------------------------------------------------------------
// CountingPublisher
// ---------------------------------------------------------------------------

/// The real [`FsPublisher`], with an invocation counter.
#[derive(Debug, Default)]
pub struct CountingPublisher {
    inner: FsPublisher,
    calls: AtomicUsize,
}

impl CountingPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ArtifactPublisher for CountingPublisher {
    async fn publish(
        &self,
        artifact: CompiledArtifact,
        output_dir: &Path,
        app_name: &str,
        target: &TargetDescriptor,
    ) -> Result<PublishedArtifact, PublishError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.inner.publish(artifact, output_dir, app_name, target).await
    }
}

// ---------------------------------------------------------------------------
// FakeStages
// ---------------------------------------------------------------------------

/// A full set of fakes, kept as concrete `Arc`s so counters stay reachable.
pub struct FakeStages {
    pub provisioner: Arc<FakeProvisioner>,
    pub compiler: Arc<FakeCompiler>,
    pub stripper: Arc<FakeStripper>,
    pub publisher: Arc<CountingPublisher>,
}

impl FakeStages {
    /// Fakes that all succeed; compiler output goes under `output_root`.
    pub fn new(output_root: impl Into<PathBuf>) -> Self {
        Self {
            provisioner: Arc::new(FakeProvisioner::default()),
            compiler: Arc::new(FakeCompiler::new(output_root)),
            stripper: Arc::new(FakeStripper::new()),
            publisher: Arc::new(CountingPublisher::new()),
        }
    }

    pub fn with_provisioner(mut self, provisioner: FakeProvisioner) -> Self {
        self.provisioner = Arc::new(provisioner);
        self
    }

    pub fn with_compiler(mut self, compiler: FakeCompiler) -> Self {
        self.compiler = Arc::new(compiler);
        self
    }

    pub fn with_stripper(mut self, stripper: FakeStripper) -> Self {
        self.stripper = Arc::new(stripper);
        self
    }

    pub fn stage_set(&self) -> StageSet {
        StageSet {
            provisioner: self.provisioner.clone(),
            compiler: self.compiler.clone(),
            post_processor: self.stripper.clone(),
            publisher: self.publisher.clone(),
        }
    }

    /// Invocation counts as (provision, compile, strip, publish).
    pub fn call_counts(&self) -> (usize, usize, usize, usize) {
        (
            self.provisioner.calls(),
            self.compiler.calls(),
            self.stripper.calls(),
            self.publisher.calls(),
        )
    }
}
