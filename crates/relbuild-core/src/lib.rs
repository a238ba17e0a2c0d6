//! relbuild core: domain model for a single-target release build.
//!
//! - [`TargetDescriptor`]: which OS/architecture/triple to build for
//! - [`BuildProfile`] and [`DependencySet`]: compiler and host inputs
//! - [`CompiledArtifact`] / [`PublishedArtifact`]: what a run produces
//! - one error type per stage, unified by [`PipelineError`]
//! - [`PipelineConfig`]: config file + command line, resolved

pub mod artifact;
pub mod config;
pub mod deps;
pub mod error;
pub mod profile;
pub mod stage;
pub mod target;
pub mod telemetry;

pub use artifact::{CompiledArtifact, PublishedArtifact};
pub use config::{ConfigFile, ConfigOverrides, PackageManager, PipelineConfig, ToolSettings};
pub use deps::DependencySet;
pub use error::{
    CompileError, CompileErrorKind, ConfigError, PipelineError, ProvisionError,
    ProvisionErrorKind, PublishError, PublishErrorKind, StripError, StripErrorKind, TargetError,
    EXIT_CONFIG,
};
pub use profile::{BuildProfile, OptimizationLevel};
pub use stage::Stage;
pub use target::{Architecture, TargetDescriptor, TargetOs};
pub use telemetry::init_tracing;
