//! relbuild pipeline: the four build stages and their orchestrator.
//!
//! A run is strictly linear and fail-fast:
//!
//! ```text
//! provision -> compile -> strip -> publish
//! ```
//!
//! Each stage sits behind a trait in [`stage`], so [`ReleasePipeline`]
//! can be driven by the production implementations or by [`fakes`].

pub mod compile;
pub mod fakes;
pub mod pipeline;
pub mod process;
pub mod provision;
pub mod publish;
pub mod stage;
pub mod strip;

pub use compile::CargoCompiler;
pub use pipeline::{PipelineRun, ReleasePipeline, StageRecord, StageStatus};
pub use process::{CommandOutput, InvokeError, Invocation};
pub use provision::{IndexProvisioner, PackageIndex, SystemPackageIndex};
pub use publish::{canonical_name, file_digest, FsPublisher};
pub use stage::{ArtifactPublisher, CompilerInvoker, DependencyProvisioner, PostProcessor, StageSet};
pub use strip::{BinaryFormat, SymbolStripper};
