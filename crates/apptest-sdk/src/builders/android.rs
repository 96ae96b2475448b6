//! Android build-for-testing.
//!
//! Runs the project's Gradle wrapper to assemble both the debug APK and the
//! instrumented androidTest APK. The wrapper is invoked relative to the
//! `android/` directory so each project pins its own Gradle version.

use super::{build_error_from, PlatformBuild};
use crate::artifacts::ArtifactLocator;
use crate::process::{CancelToken, ProcessRunner};
use crate::types::{BuildArtifact, BuildError, Platform, TestRunOptions};

const TOOL: &str = "./gradlew";

/// Android build strategy backed by the Gradle wrapper.
#[derive(Debug, Clone, Default)]
pub struct AndroidBuilder {
    verbose: bool,
    cancel: CancelToken,
}

impl AndroidBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Enables verbose output.
    pub fn verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    /// Shares a cancellation flag with the spawned build process.
    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }
}

impl PlatformBuild for AndroidBuilder {
    fn build(&self, options: &TestRunOptions) -> Result<BuildArtifact, BuildError> {
        let locator = ArtifactLocator::new(&options.app_dir, Platform::Android);
        if !locator.project_exists() {
            return Err(BuildError::MissingProject {
                path: locator.missing_project_path(),
            });
        }

        let mut args: Vec<String> = vec![
            "assembleDebug".into(),
            "assembleDebugAndroidTest".into(),
        ];
        args.extend(options.additional_args.iter().cloned());

        if self.verbose {
            println!("  Running: {} {}", TOOL, args.join(" "));
        }

        let output = ProcessRunner::new()
            .with_timeout(options.build_timeout)
            .with_cancel(self.cancel.clone())
            .run(TOOL, &args, &locator.native_dir())
            .map_err(|err| build_error_from(err, "gradlew"))?;

        if !output.success() {
            return Err(BuildError::BuildFailed {
                exit_code: output.exit_code,
                output_tail: output.tail,
            });
        }

        Ok(locator.to_artifact())
    }
}
