//! Dependency provisioning against the host package index.

use async_trait::async_trait;
use relbuild_core::{DependencySet, PackageManager, ProvisionError, ProvisionErrorKind};
use std::sync::Arc;
use tracing::{debug, info};

use crate::process::{self, CommandOutput, InvokeError, Invocation};
use crate::stage::DependencyProvisioner;

/// The host's package index, as seen by the provisioner.
#[async_trait]
pub trait PackageIndex: Send + Sync {
    /// Refresh the index from its sources.
    async fn refresh(&self) -> Result<(), ProvisionError>;

    /// Install one package non-interactively. Installing a package that is
    /// already present must succeed.
    async fn install(&self, package: &str) -> Result<(), ProvisionError>;
}

/// Refreshes the index once, then installs each dependency in order.
pub struct IndexProvisioner {
    index: Arc<dyn PackageIndex>,
}

impl IndexProvisioner {
    pub fn new(index: Arc<dyn PackageIndex>) -> Self {
        Self { index }
    }
}

#[async_trait]
impl DependencyProvisioner for IndexProvisioner {
    async fn provision(&self, dependencies: &DependencySet) -> Result<(), ProvisionError> {
        if dependencies.is_empty() {
            debug!("No native dependencies requested");
            return Ok(());
        }

        self.index.refresh().await?;

        for package in dependencies.iter() {
            debug!(package = %package, "Installing package");
            self.index.install(package).await?;
        }

        info!(count = dependencies.len(), "Native dependencies provisioned");
        Ok(())
    }
}

/// Package index backed by the host package manager.
#[derive(Debug, Clone)]
pub struct SystemPackageIndex {
    manager: PackageManager,
    use_sudo: bool,
    timeout_secs: u64,
}

impl SystemPackageIndex {
    pub fn new(manager: PackageManager) -> Self {
        Self {
            manager,
            use_sudo: false,
            timeout_secs: 0,
        }
    }

    /// Run the package manager through `sudo -n` (never prompts).
    pub fn with_sudo(mut self, use_sudo: bool) -> Self {
        self.use_sudo = use_sudo;
        self
    }

    pub fn with_timeout(mut self, secs: u64) -> Self {
        self.timeout_secs = secs;
        self
    }

    /// Command that refreshes the index.
    pub fn refresh_invocation(&self) -> Invocation {
        let argv: &[&str] = match self.manager {
            PackageManager::Apt => &["apt-get", "update"],
            PackageManager::Dnf => &["dnf", "makecache", "-y"],
            PackageManager::Pacman => &["pacman", "-Sy", "--noconfirm"],
            PackageManager::Zypper => &["zypper", "--non-interactive", "refresh"],
            PackageManager::Brew => &["brew", "update"],
        };
        self.build(argv, None)
    }

    /// Command that installs `package`.
    pub fn install_invocation(&self, package: &str) -> Invocation {
        let argv: &[&str] = match self.manager {
            PackageManager::Apt => &["apt-get", "install", "-y", "--no-install-recommends"],
            PackageManager::Dnf => &["dnf", "install", "-y"],
            PackageManager::Pacman => &["pacman", "-S", "--needed", "--noconfirm"],
            PackageManager::Zypper => &["zypper", "--non-interactive", "install"],
            PackageManager::Brew => &["brew", "install"],
        };
        self.build(argv, Some(package))
    }

    fn noninteractive_env(&self) -> &'static [(&'static str, &'static str)] {
        match self.manager {
            PackageManager::Apt => &[("DEBIAN_FRONTEND", "noninteractive")],
            PackageManager::Brew => &[("HOMEBREW_NO_AUTO_UPDATE", "1")],
            _ => &[],
        }
    }

    fn build(&self, argv: &[&str], package: Option<&str>) -> Invocation {
        let env = self.noninteractive_env();
        // Homebrew refuses to run as root.
        let sudo = self.use_sudo && self.manager != PackageManager::Brew;

        let mut invocation = if sudo {
            // sudo scrubs the environment, so pass variables as arguments.
            Invocation::new("sudo")
                .arg("-n")
                .args(env.iter().map(|(k, v)| format!("{k}={v}")))
                .args(argv.iter().copied())
        } else {
            let mut invocation = Invocation::new(argv[0]).args(argv[1..].iter().copied());
            for (key, value) in env {
                invocation = invocation.env(*key, *value);
            }
            invocation
        };

        if let Some(package) = package {
            invocation = invocation.arg(package);
        }
        invocation.timeout_secs(self.timeout_secs)
    }

    async fn execute(
        &self,
        invocation: Invocation,
        failure: ProvisionErrorKind,
        package: Option<&str>,
    ) -> Result<(), ProvisionError> {
        let attach = |err: ProvisionError| match package {
            Some(name) => err.with_package(name),
            None => err,
        };

        let output = process::run(&invocation).await.map_err(|e| {
            let kind = match e {
                InvokeError::PermissionDenied { .. } => ProvisionErrorKind::PermissionDenied,
                _ => failure,
            };
            attach(ProvisionError::new(kind, e.to_string()))
        })?;

        if output.success {
            return Ok(());
        }

        let kind = if is_permission_problem(&output) {
            ProvisionErrorKind::PermissionDenied
        } else {
            failure
        };
        Err(attach(ProvisionError::new(kind, output.diagnostic())))
    }
}

#[async_trait]
impl PackageIndex for SystemPackageIndex {
    async fn refresh(&self) -> Result<(), ProvisionError> {
        info!(manager = %self.manager, "Refreshing package index");
        self.execute(
            self.refresh_invocation(),
            ProvisionErrorKind::IndexRefreshFailed,
            None,
        )
        .await
    }

    async fn install(&self, package: &str) -> Result<(), ProvisionError> {
        info!(manager = %self.manager, package = %package, "Installing package");
        self.execute(
            self.install_invocation(package),
            ProvisionErrorKind::PackageInstallFailed,
            Some(package),
        )
        .await
    }
}

/// Messages package managers and sudo print when privileges are missing.
const PERMISSION_MARKERS: &[&str] = &[
    "permission denied",
    "are you root",
    "a password is required",
    "must be run as root",
    "requires root privileges",
    "unless you are root",
    "could not open lock file",
    "unable to acquire the dpkg frontend lock",
];

fn is_permission_problem(output: &CommandOutput) -> bool {
    let text = format!("{}\n{}", output.stderr, output.stdout).to_lowercase();
    PERMISSION_MARKERS.iter().any(|marker| text.contains(marker))
}
