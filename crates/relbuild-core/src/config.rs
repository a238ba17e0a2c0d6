//! Pipeline configuration
//!
//! Two layers feed a run: an optional `relbuild.toml` ([`ConfigFile`]) and
//! command-line options ([`ConfigOverrides`]). [`PipelineConfig::resolve`]
//! merges them, command line first, and validates the result.
//!
//! ```toml
//! app_name = "PandoraLauncher"
//! output_dir = "dist"
//! target = "x86_64-unknown-linux-gnu"
//! dependencies = ["libssl-dev", "libdbus-1-dev"]
//! package_manager = "apt"
//! use_sudo = true
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::debug;

use crate::deps::DependencySet;
use crate::error::ConfigError;
use crate::profile::BuildProfile;
use crate::target::{Architecture, TargetDescriptor, TargetOs};

/// File name looked up in the working directory when no `--config` is given.
pub const DEFAULT_CONFIG_FILE: &str = "relbuild.toml";

/// Host package manager used by the provisioner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PackageManager {
    Apt,
    Dnf,
    Pacman,
    Zypper,
    Brew,
}

impl PackageManager {
    pub fn name(&self) -> &'static str {
        match self {
            PackageManager::Apt => "apt",
            PackageManager::Dnf => "dnf",
            PackageManager::Pacman => "pacman",
            PackageManager::Zypper => "zypper",
            PackageManager::Brew => "brew",
        }
    }
}

impl fmt::Display for PackageManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for PackageManager {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "apt" | "apt-get" => Ok(PackageManager::Apt),
            "dnf" | "yum" => Ok(PackageManager::Dnf),
            "pacman" => Ok(PackageManager::Pacman),
            "zypper" => Ok(PackageManager::Zypper),
            "brew" | "homebrew" => Ok(PackageManager::Brew),
            _ => Err(ConfigError::InvalidValue {
                option: "package_manager",
                value: s.to_string(),
            }),
        }
    }
}

/// Contents of `relbuild.toml`. Every field is optional.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConfigFile {
    pub app_name: Option<String>,
    pub source_root: Option<PathBuf>,
    pub output_dir: Option<PathBuf>,
    pub target: Option<String>,
    pub os: Option<String>,
    pub arch: Option<String>,
    pub binary_name: Option<String>,
    #[serde(default)]
    pub dependencies: Vec<String>,
    pub package_manager: Option<PackageManager>,
    pub use_sudo: Option<bool>,
    pub skip_provision: Option<bool>,
    pub skip_strip: Option<bool>,
    pub cargo_program: Option<String>,
    pub strip_program: Option<String>,
    #[serde(default)]
    pub extra_flags: Vec<String>,
    pub timeout_secs: Option<u64>,
}

impl ConfigFile {
    /// Parse a config file from disk.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let file = Self::parse(&content).map_err(|message| ConfigError::Parse {
            path: path.to_path_buf(),
            message,
        })?;
        debug!(path = %path.display(), "Loaded config file");
        Ok(file)
    }

    /// Load `relbuild.toml` from `dir` if it exists.
    pub fn discover(dir: &Path) -> Result<Option<Self>, ConfigError> {
        let path = dir.join(DEFAULT_CONFIG_FILE);
        if path.is_file() {
            Self::load(&path).map(Some)
        } else {
            Ok(None)
        }
    }

    fn parse(content: &str) -> Result<Self, String> {
        toml::from_str(content).map_err(|e| e.to_string())
    }
}

/// Options given on the command line. They win over the config file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConfigOverrides {
    pub app_name: Option<String>,
    pub source_root: Option<PathBuf>,
    pub output_dir: Option<PathBuf>,
    pub target: Option<String>,
    pub os: Option<String>,
    pub arch: Option<String>,
    pub binary_name: Option<String>,
    /// Appended to the file's dependency list.
    pub dependencies: Vec<String>,
    pub package_manager: Option<PackageManager>,
    /// `Some(false)` turns off a `true` from the file.
    pub use_sudo: Option<bool>,
    pub skip_provision: Option<bool>,
    pub skip_strip: Option<bool>,
    pub cargo_program: Option<String>,
    pub strip_program: Option<String>,
    /// Appended after the file's extra flags.
    pub extra_flags: Vec<String>,
    pub timeout_secs: Option<u64>,
}

/// External programs the stages drive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ToolSettings {
    pub cargo_program: String,
    pub strip_program: String,
    /// Per-invocation timeout; 0 disables it.
    pub timeout_secs: u64,
}

impl Default for ToolSettings {
    fn default() -> Self {
        Self {
            cargo_program: "cargo".to_string(),
            strip_program: "strip".to_string(),
            timeout_secs: 0,
        }
    }
}

/// Fully resolved inputs of one pipeline run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PipelineConfig {
    pub app_name: String,
    pub source_root: PathBuf,
    pub output_dir: PathBuf,
    pub target: TargetDescriptor,
    pub profile: BuildProfile,
    pub dependencies: DependencySet,
    /// Binary to build; read from the manifest when unset.
    pub binary_name: Option<String>,
    pub package_manager: PackageManager,
    pub use_sudo: bool,
    pub skip_provision: bool,
    pub skip_strip: bool,
    pub tools: ToolSettings,
}

impl PipelineConfig {
    /// Minimal configuration with the fixed release/strip-always policy.
    pub fn new(
        app_name: impl Into<String>,
        source_root: impl Into<PathBuf>,
        output_dir: impl Into<PathBuf>,
        target: TargetDescriptor,
    ) -> Self {
        Self {
            app_name: app_name.into(),
            source_root: source_root.into(),
            output_dir: output_dir.into(),
            target,
            profile: BuildProfile::release(),
            dependencies: DependencySet::new(),
            binary_name: None,
            package_manager: PackageManager::Apt,
            use_sudo: false,
            skip_provision: false,
            skip_strip: false,
            tools: ToolSettings::default(),
        }
    }

    /// Merge the config file (if any) with command-line overrides.
    pub fn resolve(
        file: Option<ConfigFile>,
        overrides: ConfigOverrides,
    ) -> Result<Self, ConfigError> {
        let file = file.unwrap_or_default();

        let app_name = overrides
            .app_name
            .or(file.app_name)
            .ok_or(ConfigError::MissingOption("app_name"))?;
        validate_app_name(&app_name)?;

        let output_dir = overrides
            .output_dir
            .or(file.output_dir)
            .ok_or(ConfigError::MissingOption("output_dir"))?;

        let source_root = overrides
            .source_root
            .or(file.source_root)
            .unwrap_or_else(|| PathBuf::from("."));

        let target = match resolve_target(overrides.target, overrides.os, overrides.arch)? {
            Some(target) => target,
            None => match resolve_target(file.target, file.os, file.arch)? {
                Some(target) => target,
                None => TargetDescriptor::host()?,
            },
        };

        let mut dependencies = DependencySet::new();
        for name in file.dependencies.into_iter().chain(overrides.dependencies) {
            dependencies.insert(name)?;
        }

        let profile = BuildProfile::release()
            .with_extra_flags(file.extra_flags.into_iter().chain(overrides.extra_flags));

        let defaults = ToolSettings::default();
        let tools = ToolSettings {
            cargo_program: overrides
                .cargo_program
                .or(file.cargo_program)
                .unwrap_or(defaults.cargo_program),
            strip_program: overrides
                .strip_program
                .or(file.strip_program)
                .unwrap_or(defaults.strip_program),
            timeout_secs: overrides
                .timeout_secs
                .or(file.timeout_secs)
                .unwrap_or(defaults.timeout_secs),
        };

        Ok(Self {
            app_name,
            source_root,
            output_dir,
            target,
            profile,
            dependencies,
            binary_name: overrides.binary_name.or(file.binary_name),
            package_manager: overrides
                .package_manager
                .or(file.package_manager)
                .unwrap_or(PackageManager::Apt),
            use_sudo: overrides.use_sudo.or(file.use_sudo).unwrap_or(false),
            skip_provision: overrides
                .skip_provision
                .or(file.skip_provision)
                .unwrap_or(false),
            skip_strip: overrides.skip_strip.or(file.skip_strip).unwrap_or(false),
            tools,
        })
    }

    /// Where the published artifact will land.
    pub fn published_path(&self) -> PathBuf {
        self.output_dir.join(self.target.artifact_name(&self.app_name))
    }
}

/// One configuration layer's target: a triple, or an os+arch pair, or nothing.
fn resolve_target(
    triple: Option<String>,
    os: Option<String>,
    arch: Option<String>,
) -> Result<Option<TargetDescriptor>, ConfigError> {
    match (triple, os, arch) {
        (None, None, None) => Ok(None),
        (Some(triple), None, None) => Ok(Some(TargetDescriptor::from_triple(&triple)?)),
        (None, Some(os), Some(arch)) => {
            let os: TargetOs = os.parse()?;
            let arch: Architecture = arch.parse()?;
            Ok(Some(TargetDescriptor::from_parts(os, arch)))
        }
        (None, Some(_), None) => Err(ConfigError::MissingOption("arch")),
        (None, None, Some(_)) => Err(ConfigError::MissingOption("os")),
        (Some(triple), _, _) => Err(ConfigError::ConflictingTarget(format!(
            "target '{triple}' given together with os/arch"
        ))),
    }
}

fn validate_app_name(name: &str) -> Result<(), ConfigError> {
    let invalid = name.trim().is_empty()
        || name == "."
        || name == ".."
        || name.contains(['/', '\\', '\0']);
    if invalid {
        return Err(ConfigError::InvalidValue {
            option: "app_name",
            value: name.to_string(),
        });
    }
    Ok(())
}
