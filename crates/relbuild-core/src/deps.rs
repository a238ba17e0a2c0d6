//! Native packages the build host must provide.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use crate::error::ConfigError;

/// Ordered set of native package names.
///
/// Names are validated on insertion so nothing but a plain package
/// identifier ever reaches the package manager's command line.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Vec<String>", into = "Vec<String>")]
pub struct DependencySet {
    packages: BTreeSet<String>,
}

impl DependencySet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a package. Returns `false` if it was already present.
    pub fn insert(&mut self, name: impl Into<String>) -> Result<bool, ConfigError> {
        let name = name.into();
        validate_package_name(&name)?;
        Ok(self.packages.insert(name))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.packages.contains(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.packages.iter().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.packages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.packages.is_empty()
    }
}

impl TryFrom<Vec<String>> for DependencySet {
    type Error = ConfigError;

    fn try_from(names: Vec<String>) -> Result<Self, Self::Error> {
        let mut set = DependencySet::new();
        for name in names {
            set.insert(name)?;
        }
        Ok(set)
    }
}

impl From<DependencySet> for Vec<String> {
    fn from(set: DependencySet) -> Self {
        set.packages.into_iter().collect()
    }
}

fn validate_package_name(name: &str) -> Result<(), ConfigError> {
    let valid = !name.is_empty()
        && !name.starts_with('-')
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.' | '_' | ':'));
    if valid {
        Ok(())
    } else {
        Err(ConfigError::InvalidPackageName(name.to_string()))
    }
}
