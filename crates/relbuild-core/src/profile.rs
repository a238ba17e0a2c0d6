//! Build profile handed to the compiler invoker.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Optimization level requested from the toolchain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OptimizationLevel {
    Debug,
    Release,
}

impl OptimizationLevel {
    /// Directory name the toolchain uses for this level's outputs.
    pub fn dir_name(&self) -> &'static str {
        match self {
            OptimizationLevel::Debug => "debug",
            OptimizationLevel::Release => "release",
        }
    }
}

impl fmt::Display for OptimizationLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.dir_name())
    }
}

/// Optimization level plus extra toolchain flags, passed through in order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildProfile {
    pub optimization_level: OptimizationLevel,
    #[serde(default)]
    pub extra_flags: Vec<String>,
}

impl BuildProfile {
    /// The release profile used by every pipeline run.
    pub fn release() -> Self {
        Self {
            optimization_level: OptimizationLevel::Release,
            extra_flags: Vec::new(),
        }
    }

    /// Append extra flags, keeping their order.
    pub fn with_extra_flags<I, S>(mut self, flags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.extra_flags.extend(flags.into_iter().map(Into::into));
        self
    }

    pub fn is_release(&self) -> bool {
        self.optimization_level == OptimizationLevel::Release
    }
}

impl Default for BuildProfile {
    fn default() -> Self {
        Self::release()
    }
}
