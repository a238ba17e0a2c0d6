//! Target platform model: operating system, CPU architecture and triple.
//!
//! A [`TargetDescriptor`] is fixed for the whole pipeline run. Its `os` and
//! `arch` names feed the canonical artifact name, its `triple` is handed to
//! the toolchain verbatim.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::TargetError;

/// Triple relbuild itself was compiled for (exported by `build.rs`).
const HOST_TARGET: &str = env!("RELBUILD_HOST_TARGET");

/// Operating system component of a target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TargetOs {
    Linux,
    Macos,
    Windows,
    Freebsd,
}

impl TargetOs {
    pub const ALL: [TargetOs; 4] = [
        TargetOs::Linux,
        TargetOs::Macos,
        TargetOs::Windows,
        TargetOs::Freebsd,
    ];

    /// Canonical lowercase name used in artifact names.
    pub fn as_str(&self) -> &'static str {
        match self {
            TargetOs::Linux => "linux",
            TargetOs::Macos => "macos",
            TargetOs::Windows => "windows",
            TargetOs::Freebsd => "freebsd",
        }
    }

    /// Recognize a user-supplied OS name or alias.
    fn from_segment(segment: &str) -> Option<Self> {
        match segment.to_ascii_lowercase().as_str() {
            "linux" => Some(TargetOs::Linux),
            "macos" | "darwin" | "apple" | "osx" => Some(TargetOs::Macos),
            "windows" | "win32" | "win" => Some(TargetOs::Windows),
            "freebsd" => Some(TargetOs::Freebsd),
            _ => None,
        }
    }

    /// Recognize the OS segment of a target triple. Vendor names such as
    /// `apple` are not operating systems and never match here.
    fn from_triple_segment(segment: &str) -> Option<Self> {
        match segment {
            "linux" => Some(TargetOs::Linux),
            "darwin" | "macos" => Some(TargetOs::Macos),
            "windows" => Some(TargetOs::Windows),
            "freebsd" => Some(TargetOs::Freebsd),
            _ => None,
        }
    }
}

/// Triple segments naming platforms that share a vendor or kernel with a
/// supported OS but must not be published under its name.
const FOREIGN_OS_SEGMENTS: &[&str] = &[
    "ios",
    "tvos",
    "watchos",
    "visionos",
    "android",
    "androideabi",
    "ohos",
];

impl fmt::Display for TargetOs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TargetOs {
    type Err = TargetError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        TargetOs::from_segment(s.trim()).ok_or_else(|| TargetError::UnknownOs(s.to_string()))
    }
}

/// CPU architecture component of a target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Architecture {
    X86_64,
    Aarch64,
    I686,
    Armv7,
    Riscv64,
}

impl Architecture {
    pub const ALL: [Architecture; 5] = [
        Architecture::X86_64,
        Architecture::Aarch64,
        Architecture::I686,
        Architecture::Armv7,
        Architecture::Riscv64,
    ];

    /// Canonical lowercase name used in artifact names.
    pub fn as_str(&self) -> &'static str {
        match self {
            Architecture::X86_64 => "x86_64",
            Architecture::Aarch64 => "aarch64",
            Architecture::I686 => "i686",
            Architecture::Armv7 => "armv7",
            Architecture::Riscv64 => "riscv64",
        }
    }

    /// Architecture segment as it appears in a default triple.
    fn triple_segment(&self) -> &'static str {
        match self {
            Architecture::Riscv64 => "riscv64gc",
            other => other.as_str(),
        }
    }

    fn from_segment(segment: &str) -> Option<Self> {
        match segment.to_ascii_lowercase().as_str() {
            "x86_64" | "amd64" | "x64" => Some(Architecture::X86_64),
            "aarch64" | "arm64" => Some(Architecture::Aarch64),
            "i686" | "i586" | "x86" => Some(Architecture::I686),
            "armv7" => Some(Architecture::Armv7),
            "riscv64" | "riscv64gc" => Some(Architecture::Riscv64),
            _ => None,
        }
    }
}

impl fmt::Display for Architecture {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Architecture {
    type Err = TargetError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Architecture::from_segment(s.trim())
            .ok_or_else(|| TargetError::UnknownArchitecture(s.to_string()))
    }
}

/// The platform a pipeline run builds for.
///
/// Construct through [`TargetDescriptor::from_triple`] or
/// [`TargetDescriptor::from_parts`]; fields are read-only afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct TargetDescriptor {
    os: TargetOs,
    arch: Architecture,
    triple: String,
}

impl TargetDescriptor {
    /// Parse a target triple such as `x86_64-unknown-linux-gnu`.
    ///
    /// The first segment is the architecture. Exactly one later segment
    /// must name the OS (`linux`, `darwin`, `windows`, `freebsd`); triples for
    /// mobile platforms like `aarch64-apple-ios` or `aarch64-linux-android`
    /// are rejected rather than published under a desktop name.
    pub fn from_triple(triple: &str) -> Result<Self, TargetError> {
        let triple = triple.trim();
        let mut segments = triple.split('-');

        let arch_segment = segments
            .next()
            .filter(|s| !s.is_empty())
            .ok_or_else(|| TargetError::MalformedTriple(triple.to_string()))?;
        let arch = Architecture::from_segment(arch_segment)
            .ok_or_else(|| TargetError::UnknownArchitecture(arch_segment.to_string()))?;

        let rest: Vec<&str> = segments.collect();
        if rest.is_empty() || rest.iter().any(|s| s.is_empty()) {
            return Err(TargetError::MalformedTriple(triple.to_string()));
        }

        if rest.iter().any(|s| FOREIGN_OS_SEGMENTS.contains(s)) {
            return Err(TargetError::UnknownOs(triple.to_string()));
        }
        let os = rest
            .iter()
            .find_map(|s| TargetOs::from_triple_segment(s))
            .ok_or_else(|| TargetError::UnknownOs(triple.to_string()))?;

        Ok(Self {
            os,
            arch,
            triple: triple.to_string(),
        })
    }

    /// Build a descriptor from an OS/architecture pair using the
    /// conventional default triple for that pair.
    pub fn from_parts(os: TargetOs, arch: Architecture) -> Self {
        let arch_segment = arch.triple_segment();
        let triple = match os {
            TargetOs::Linux if arch == Architecture::Armv7 => {
                "armv7-unknown-linux-gnueabihf".to_string()
            }
            TargetOs::Linux => format!("{arch_segment}-unknown-linux-gnu"),
            TargetOs::Macos => format!("{arch_segment}-apple-darwin"),
            TargetOs::Windows => format!("{arch_segment}-pc-windows-msvc"),
            TargetOs::Freebsd => format!("{arch_segment}-unknown-freebsd"),
        };
        Self { os, arch, triple }
    }

    /// The platform relbuild itself runs on.
    pub fn host() -> Result<Self, TargetError> {
        Self::from_triple(HOST_TARGET)
    }

    pub fn os(&self) -> TargetOs {
        self.os
    }

    pub fn arch(&self) -> Architecture {
        self.arch
    }

    pub fn triple(&self) -> &str {
        &self.triple
    }

    /// File suffix the toolchain appends to executables for this target.
    pub fn executable_suffix(&self) -> &'static str {
        match self.os {
            TargetOs::Windows => ".exe",
            _ => "",
        }
    }

    /// Canonical `<app_name>-<os>-<architecture>` artifact name.
    pub fn artifact_name(&self, app_name: &str) -> String {
        format!("{}-{}-{}", app_name, self.os, self.arch)
    }
}

impl fmt::Display for TargetDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.triple)
    }
}

impl FromStr for TargetDescriptor {
    type Err = TargetError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_triple(s)
    }
}
