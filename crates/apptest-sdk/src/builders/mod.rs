//! Platform build strategies.
//!
//! One implementation of [`PlatformBuild`] per platform, selected by an
//! exhaustive match on [`Platform`]. Each builder invokes the platform's
//! native "build for testing" command through [`ProcessRunner`] and hands
//! back the artifact locations computed by [`ArtifactLocator`].
//!
//! [`ArtifactLocator`]: crate::artifacts::ArtifactLocator
//! [`ProcessRunner`]: crate::process::ProcessRunner

mod android;
mod ios;

pub use android::AndroidBuilder;
pub use ios::IosBuilder;

use crate::process::{CancelToken, ProcessError};
use crate::types::{BuildArtifact, BuildError, Platform, TestRunOptions};

/// Builds an application and its instrumented tests with the platform's
/// native toolchain.
pub trait PlatformBuild {
    /// Runs the build-for-testing command and returns artifact locations.
    ///
    /// Must not succeed unless the native tool reported a zero exit status.
    fn build(&self, options: &TestRunOptions) -> Result<BuildArtifact, BuildError>;
}

/// Returns the build strategy for `platform`.
pub fn strategy_for(platform: Platform, cancel: CancelToken) -> Box<dyn PlatformBuild + Send> {
    match platform {
        Platform::Ios => Box::new(IosBuilder::new().with_cancel(cancel)),
        Platform::Android => Box::new(AndroidBuilder::new().with_cancel(cancel)),
    }
}

/// Maps a process-layer failure onto the build error taxonomy.
fn build_error_from(err: ProcessError, tool: &str) -> BuildError {
    match err {
        ProcessError::NotFound { .. } => BuildError::ToolNotFound {
            tool: tool.to_string(),
        },
        ProcessError::TimedOut { timeout_secs, .. } => BuildError::TimedOut {
            tool: tool.to_string(),
            timeout_secs,
        },
        ProcessError::Cancelled { .. } => BuildError::Cancelled,
        ProcessError::Io(err) => BuildError::Io(err),
    }
}
