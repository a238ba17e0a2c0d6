//! The four pipeline stages, in execution order.

use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Provision,
    Compile,
    Strip,
    Publish,
}

impl Stage {
    /// All stages in the order the pipeline runs them.
    pub const ORDER: [Stage; 4] = [Stage::Provision, Stage::Compile, Stage::Strip, Stage::Publish];

    pub fn name(&self) -> &'static str {
        match self {
            Stage::Provision => "provision",
            Stage::Compile => "compile",
            Stage::Strip => "strip",
            Stage::Publish => "publish",
        }
    }

    /// Process exit code reported when this stage fails.
    pub fn exit_code(&self) -> i32 {
        match self {
            Stage::Provision => 10,
            Stage::Compile => 11,
            Stage::Strip => 12,
            Stage::Publish => 13,
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
