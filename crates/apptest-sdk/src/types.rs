//! Core types for apptest-sdk.
//!
//! This module defines the data model shared by the build, packaging, and
//! submission stages:
//!
//! - [`Platform`] / [`RunMode`] / [`AssetPolicy`] - run configuration enums
//! - [`TestRunOptions`] - the immutable description of one pipeline invocation
//! - [`BuildArtifact`] / [`TestPackage`] - stage outputs
//! - [`RunHandle`] / [`RunSummary`] / [`RunOutcome`] - submission results
//! - [`BuildError`] / [`PackagingError`] / [`SubmissionError`] - the error
//!   taxonomy, one enum per stage so a failure always names where it happened

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;

/// Default wall-clock budget for a native build before the child is killed.
pub const DEFAULT_BUILD_TIMEOUT: Duration = Duration::from_secs(1800);

/// Target platform for a UI-test run.
///
/// This is a closed set: adding a platform means adding a variant here and a
/// builder implementation, and the compiler will point at every match that
/// needs updating.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    /// iOS (xcodebuild workspace build, XCUITest runner bundle).
    Ios,
    /// Android (Gradle build, instrumented androidTest APK).
    Android,
}

impl Platform {
    pub fn as_str(&self) -> &'static str {
        match self {
            Platform::Ios => "ios",
            Platform::Android => "android",
        }
    }

    /// The instrumented-test framework the platform's toolchain produces.
    pub fn default_framework(&self) -> &'static str {
        match self {
            Platform::Ios => "xcuitest",
            Platform::Android => "espresso",
        }
    }
}

/// Whether the pipeline blocks until the remote run finishes or returns as
/// soon as the service has acknowledged the upload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunMode {
    Sync,
    Async,
}

/// Policy for an assets folder that is expected but absent at packaging time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AssetPolicy {
    /// Treat missing assets as `PackagingError::ArtifactMissing`.
    Fail,
    /// Warn and produce the package without an assets entry.
    Warn,
}

/// Immutable description of a single pipeline invocation.
///
/// Constructed once, before the run starts; every stage reads from the same
/// value. A new run requires a new `TestRunOptions`.
#[derive(Debug, Clone)]
pub struct TestRunOptions {
    /// Root directory of the application under test.
    pub app_dir: PathBuf,
    /// Target platform.
    pub platform: Platform,
    /// Test framework name recorded in the package manifest.
    pub test_framework: String,
    /// Sync (wait for the remote run) or Async (detach after upload).
    pub mode: RunMode,
    /// Extra arguments appended verbatim to the native build command.
    pub additional_args: Vec<String>,
    /// What to do when the expected assets folder is missing.
    pub asset_policy: AssetPolicy,
    /// Wall-clock budget for the native build process.
    pub build_timeout: Duration,
}

impl TestRunOptions {
    pub fn new(app_dir: impl Into<PathBuf>, platform: Platform) -> Self {
        Self {
            app_dir: app_dir.into(),
            platform,
            test_framework: platform.default_framework().to_string(),
            mode: RunMode::Sync,
            additional_args: Vec::new(),
            asset_policy: AssetPolicy::Fail,
            build_timeout: DEFAULT_BUILD_TIMEOUT,
        }
    }

    pub fn with_mode(mut self, mode: RunMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_additional_args(mut self, args: Vec<String>) -> Self {
        self.additional_args = args;
        self
    }

    pub fn with_asset_policy(mut self, policy: AssetPolicy) -> Self {
        self.asset_policy = policy;
        self
    }

    pub fn with_build_timeout(mut self, timeout: Duration) -> Self {
        self.build_timeout = timeout;
        self
    }

    /// Derived application name: the final component of the app directory.
    pub fn app_name(&self) -> String {
        app_name_of(&self.app_dir)
    }
}

/// Derived application name for an app directory.
pub fn app_name_of(app_dir: &Path) -> String {
    app_dir
        .file_name()
        .and_then(|name| name.to_str())
        .unwrap_or("app")
        .to_string()
}

/// Output of a successful platform build.
///
/// Exactly one exists per invocation; it is consumed by the packager and
/// never reused across platforms or option sets.
#[derive(Debug, Clone)]
pub struct BuildArtifact {
    /// Platform the artifact was built for.
    pub platform: Platform,
    /// Compiled application bundle (`.app` directory or APK file).
    pub bundle_path: PathBuf,
    /// Native build output directory holding the bundle.
    pub binary_dir: PathBuf,
    /// Instrumented-test bundle (UITests runner app or androidTest APK).
    pub test_binary_path: PathBuf,
    /// Source assets folder expected alongside the bundle.
    pub assets_dir: PathBuf,
}

/// A packaged upload unit: one archive referencing one build artifact.
#[derive(Debug, Clone)]
pub struct TestPackage {
    /// Path to the deterministic tar archive.
    pub archive_path: PathBuf,
    /// SHA-256 of the archive bytes, hex encoded.
    pub digest: String,
    /// Test framework recorded in the manifest.
    pub test_framework: String,
}

/// Correlates a submitted remote run with later status queries.
///
/// The only value that outlives the pipeline invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunHandle {
    pub run_id: String,
    pub submitted_at: OffsetDateTime,
}

impl RunHandle {
    pub fn new(run_id: impl Into<String>) -> Self {
        Self {
            run_id: run_id.into(),
            submitted_at: OffsetDateTime::now_utc(),
        }
    }

    pub fn submitted_at_rfc3339(&self) -> String {
        self.submitted_at
            .format(&Rfc3339)
            .unwrap_or_else(|_| self.submitted_at.unix_timestamp().to_string())
    }
}

/// Remote run status as reported by the test-execution service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RemoteStatus {
    Queued,
    Running,
    Passed,
    Failed,
    Error,
}

impl RemoteStatus {
    /// Parses a service status string (case-insensitive).
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.to_lowercase().as_str() {
            "queued" => Some(RemoteStatus::Queued),
            "running" => Some(RemoteStatus::Running),
            "passed" => Some(RemoteStatus::Passed),
            "failed" => Some(RemoteStatus::Failed),
            "error" => Some(RemoteStatus::Error),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RemoteStatus::Queued => "queued",
            RemoteStatus::Running => "running",
            RemoteStatus::Passed => "passed",
            RemoteStatus::Failed => "failed",
            RemoteStatus::Error => "error",
        }
    }

    /// Whether the service will not change this status anymore.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RemoteStatus::Passed | RemoteStatus::Failed | RemoteStatus::Error
        )
    }
}

/// Final status of a remote run plus any message the service attached.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunSummary {
    pub status: RemoteStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl RunSummary {
    pub fn passed(&self) -> bool {
        self.status == RemoteStatus::Passed
    }
}

/// Terminal outcome of one pipeline invocation.
///
/// Failures keep the originating stage's error so diagnostics never collapse
/// into a generic "failed".
#[derive(Debug)]
pub enum RunOutcome {
    /// The native build failed; nothing was packaged or uploaded.
    BuildFailed(BuildError),
    /// The build succeeded but no package could be produced.
    PackagingFailed(PackagingError),
    /// Upload or polling failed; see the error for whether a run exists.
    SubmissionFailed(SubmissionError),
    /// The remote run reached a terminal status while we waited.
    Completed(RunHandle, RunSummary),
    /// The upload was acknowledged and no polling was requested (or the
    /// caller cancelled the wait); the run continues remotely.
    Detached(RunHandle),
}

impl RunOutcome {
    /// True only for a completed run that passed, or a clean detach.
    pub fn is_success(&self) -> bool {
        match self {
            RunOutcome::Completed(_, summary) => summary.passed(),
            RunOutcome::Detached(_) => true,
            _ => false,
        }
    }

    /// The run handle, if the service acknowledged an upload.
    pub fn handle(&self) -> Option<&RunHandle> {
        match self {
            RunOutcome::Completed(handle, _) | RunOutcome::Detached(handle) => Some(handle),
            _ => None,
        }
    }
}

/// Errors from the platform build stage.
#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    /// The native toolchain binary could not be located.
    #[error("build tool '{tool}' not found; ensure it is installed and on PATH")]
    ToolNotFound { tool: String },

    /// No workspace/project file exists where the platform convention
    /// expects one.
    #[error("no project found at {path:?}")]
    MissingProject { path: PathBuf },

    /// The native build ran and exited nonzero.
    #[error("build failed with exit code {exit_code}:\n{output_tail}")]
    BuildFailed { exit_code: i32, output_tail: String },

    /// The build exceeded its wall-clock budget and was killed.
    #[error("build tool '{tool}' exceeded the {timeout_secs}s build timeout and was killed")]
    TimedOut { tool: String, timeout_secs: u64 },

    /// The caller cancelled the build; the child process was killed.
    #[error("build cancelled")]
    Cancelled,

    #[error("I/O error during build: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors from the packaging stage.
#[derive(Debug, thiserror::Error)]
pub enum PackagingError {
    /// An expected build output does not exist on disk.
    #[error("build artifact missing at {path:?}")]
    ArtifactMissing { path: PathBuf },

    #[error("I/O error during packaging: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors from the submission stage.
#[derive(Debug, thiserror::Error)]
pub enum SubmissionError {
    /// The service refused the upload (non-2xx response).
    #[error("upload rejected (status {status}): {reason}")]
    UploadRejected { status: u16, reason: String },

    /// Transport-level failure talking to the service.
    #[error("network error: {0}")]
    NetworkError(String),

    /// The wait budget elapsed before the run reached a terminal status.
    /// The remote run is left intact and stays inspectable by id.
    #[error("timed out after {waited_secs}s waiting for run '{run_id}'; the run was not cancelled")]
    Timeout { run_id: String, waited_secs: u64 },

    /// The service answered with something we could not interpret.
    #[error("invalid service response: {0}")]
    InvalidResponse(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn platform_default_frameworks() {
        assert_eq!(Platform::Ios.default_framework(), "xcuitest");
        assert_eq!(Platform::Android.default_framework(), "espresso");
    }

    #[test]
    fn remote_status_parses_case_insensitively() {
        assert_eq!(RemoteStatus::parse("Passed"), Some(RemoteStatus::Passed));
        assert_eq!(RemoteStatus::parse("QUEUED"), Some(RemoteStatus::Queued));
        assert_eq!(RemoteStatus::parse("cancelled"), None);
    }

    #[test]
    fn terminal_statuses() {
        assert!(RemoteStatus::Passed.is_terminal());
        assert!(RemoteStatus::Failed.is_terminal());
        assert!(RemoteStatus::Error.is_terminal());
        assert!(!RemoteStatus::Queued.is_terminal());
        assert!(!RemoteStatus::Running.is_terminal());
    }

    #[test]
    fn options_defaults_follow_platform() {
        let options = TestRunOptions::new("/tmp/demo", Platform::Ios);
        assert_eq!(options.test_framework, "xcuitest");
        assert_eq!(options.mode, RunMode::Sync);
        assert_eq!(options.asset_policy, AssetPolicy::Fail);
        assert_eq!(options.app_name(), "demo");
    }

    #[test]
    fn outcome_success_and_handle() {
        let handle = RunHandle::new("r1");
        let passed = RunOutcome::Completed(
            handle.clone(),
            RunSummary {
                status: RemoteStatus::Passed,
                message: None,
            },
        );
        assert!(passed.is_success());
        assert_eq!(passed.handle().map(|h| h.run_id.as_str()), Some("r1"));

        let failed = RunOutcome::Completed(
            handle.clone(),
            RunSummary {
                status: RemoteStatus::Failed,
                message: Some("3 tests failed".into()),
            },
        );
        assert!(!failed.is_success());

        let detached = RunOutcome::Detached(handle);
        assert!(detached.is_success());

        let build_failed = RunOutcome::BuildFailed(BuildError::Cancelled);
        assert!(!build_failed.is_success());
        assert!(build_failed.handle().is_none());
    }
}
