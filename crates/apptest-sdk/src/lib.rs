//! Core library for apptest: build mobile apps for instrumented UI testing,
//! package the outputs into a deterministic upload archive, and model the
//! remote test run lifecycle.
//!
//! The pipeline stages are pure library code with no network dependency;
//! submission and orchestration live in the `apptest` CLI crate, which plugs
//! its HTTP client in behind a trait. Each stage consumes the previous one's
//! output:
//!
//! 1. a [`builders::PlatformBuild`] strategy turns [`TestRunOptions`] into a
//!    [`BuildArtifact`],
//! 2. [`TestPackager`] turns that artifact into a [`TestPackage`],
//! 3. the caller uploads the package and tracks it via [`RunHandle`].

pub mod artifacts;
pub mod builders;
pub mod package;
pub mod process;
pub mod types;

pub use artifacts::ArtifactLocator;
pub use builders::{strategy_for, AndroidBuilder, IosBuilder, PlatformBuild};
pub use package::TestPackager;
pub use process::{CancelToken, ProcessRunner};
pub use types::{
    AssetPolicy, BuildArtifact, BuildError, PackagingError, Platform, RemoteStatus, RunHandle,
    RunMode, RunOutcome, RunSummary, SubmissionError, TestPackage, TestRunOptions,
    DEFAULT_BUILD_TIMEOUT,
};
