//! iOS build-for-testing.
//!
//! Compiles the app and its XCUITest target without installing or launching
//! either, via `xcrun xcodebuild build-for-testing` against the app's
//! workspace. Outputs land in the app-local `DerivedData` directory.

use super::{build_error_from, PlatformBuild};
use crate::artifacts::ArtifactLocator;
use crate::process::{CancelToken, ProcessRunner};
use crate::types::{BuildArtifact, BuildError, Platform, TestRunOptions};

const TOOL: &str = "xcrun";

/// iOS build strategy backed by xcodebuild.
#[derive(Debug, Clone, Default)]
pub struct IosBuilder {
    verbose: bool,
    cancel: CancelToken,
}

impl IosBuilder {
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

impl PlatformBuild for IosBuilder {
    fn build(&self, options: &TestRunOptions) -> Result<BuildArtifact, BuildError> {
        let locator = ArtifactLocator::new(&options.app_dir, Platform::Ios);
        if !locator.project_exists() {
            return Err(BuildError::MissingProject {
                path: locator.missing_project_path(),
            });
        }

        let app_name = locator.app_name().to_string();
        let mut args: Vec<String> = vec![
            "xcodebuild".into(),
            "build-for-testing".into(),
            "-configuration".into(),
            "Debug".into(),
            "-workspace".into(),
            format!("{}.xcworkspace", app_name),
            "-sdk".into(),
            "iphoneos".into(),
            "-scheme".into(),
            app_name,
            "-derivedDataPath".into(),
            "DerivedData".into(),
        ];
        args.extend(options.additional_args.iter().cloned());

        if self.verbose {
            println!("  Running: {} {}", TOOL, args.join(" "));
        }

        let output = ProcessRunner::new()
            .with_timeout(options.build_timeout)
            .with_cancel(self.cancel.clone())
            .run(TOOL, &args, &locator.native_dir())
            .map_err(|err| build_error_from(err, TOOL))?;

        if !output.success() {
            return Err(BuildError::BuildFailed {
                exit_code: output.exit_code,
                output_tail: output.tail,
            });
        }

        Ok(locator.to_artifact())
    }
}
