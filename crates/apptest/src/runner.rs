//! Pipeline orchestration.
//!
//! [`UiTestRunner`] walks one invocation through build, package, and submit.
//! The runner is consumed by whichever entry point starts it, so a finished
//! pipeline cannot be restarted; a new run needs a new runner. Each stage
//! either produces the input of the next or short-circuits into the matching
//! [`RunOutcome`] failure, so later stages never see a broken predecessor.

use crate::client::{SubmissionClient, TestService, DEFAULT_POLL_INTERVAL, DEFAULT_WAIT_BUDGET};
use apptest_sdk::{
    strategy_for, CancelToken, PlatformBuild, RunMode, RunOutcome, TestPackager, TestRunOptions,
};
use std::time::Duration;

pub struct UiTestRunner<'a> {
    options: TestRunOptions,
    service: &'a dyn TestService,
    strategy: Option<Box<dyn PlatformBuild + Send>>,
    poll_interval: Duration,
    wait_budget: Duration,
    cancel: CancelToken,
    verbose: bool,
}

impl<'a> UiTestRunner<'a> {
    pub fn new(options: TestRunOptions, service: &'a dyn TestService) -> Self {
        Self {
            options,
            service,
            strategy: None,
            poll_interval: DEFAULT_POLL_INTERVAL,
            wait_budget: DEFAULT_WAIT_BUDGET,
            cancel: CancelToken::new(),
            verbose: false,
        }
    }

    /// Replaces the platform build strategy. Tests use this to avoid
    /// invoking real toolchains.
    pub fn with_strategy(mut self, strategy: Box<dyn PlatformBuild + Send>) -> Self {
        self.strategy = Some(strategy);
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_wait_budget(mut self, budget: Duration) -> Self {
        self.wait_budget = budget;
        self
    }

    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    /// Runs the pipeline and waits for the remote run to finish.
    pub fn run_synchronously(self) -> RunOutcome {
        self.execute(RunMode::Sync)
    }

    /// Runs the pipeline and returns as soon as the upload is acknowledged.
    pub fn run_detached(self) -> RunOutcome {
        self.execute(RunMode::Async)
    }

    fn execute(mut self, mode: RunMode) -> RunOutcome {
        // The entry point is authoritative; options.mode only carries the
        // caller's preference up to this point.
        self.options.mode = mode;

        println!(
            "Building {} for {}...",
            self.options.app_name(),
            self.options.platform.as_str()
        );
        let strategy = self
            .strategy
            .take()
            .unwrap_or_else(|| strategy_for(self.options.platform, self.cancel.clone()));
        let artifact = match strategy.build(&self.options) {
            Ok(artifact) => artifact,
            Err(err) => {
                eprintln!("Build failed: {}", err);
                return RunOutcome::BuildFailed(err);
            }
        };

        println!("Packaging test artifacts...");
        let packager = TestPackager::new().verbose(self.verbose);
        let package = match packager.package(&self.options, &artifact) {
            Ok(package) => package,
            Err(err) => {
                eprintln!("Packaging failed: {}", err);
                return RunOutcome::PackagingFailed(err);
            }
        };

        println!("Submitting to test service...");
        let submission = SubmissionClient::new(self.service)
            .with_poll_interval(self.poll_interval)
            .with_wait_budget(self.wait_budget)
            .with_cancel(self.cancel.clone());
        match submission.submit(&package, &self.options) {
            Ok(outcome) => outcome,
            Err(err) => {
                eprintln!("Submission failed: {}", err);
                RunOutcome::SubmissionFailed(err)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use apptest_sdk::{
        BuildArtifact, BuildError, Platform, RunHandle, RunSummary, SubmissionError, TestPackage,
    };
    use std::sync::atomic::{AtomicU32, Ordering};

    struct FailingStrategy;

    impl PlatformBuild for FailingStrategy {
        fn build(&self, _options: &TestRunOptions) -> Result<BuildArtifact, BuildError> {
            Err(BuildError::BuildFailed {
                exit_code: 65,
                output_tail: "error: compile failed".into(),
            })
        }
    }

    #[derive(Default)]
    struct CountingService {
        uploads: AtomicU32,
    }

    impl TestService for CountingService {
        fn upload(
            &self,
            _package: &TestPackage,
            _options: &TestRunOptions,
        ) -> Result<RunHandle, SubmissionError> {
            self.uploads.fetch_add(1, Ordering::SeqCst);
            Ok(RunHandle::new("run-1"))
        }

        fn run_status(&self, _run_id: &str) -> Result<RunSummary, SubmissionError> {
            Err(SubmissionError::NetworkError("not expected".into()))
        }
    }

    #[test]
    fn build_failure_short_circuits_before_upload() {
        let service = CountingService::default();
        let options = TestRunOptions::new("/tmp/demo", Platform::Android);
        let outcome = UiTestRunner::new(options, &service)
            .with_strategy(Box::new(FailingStrategy))
            .run_synchronously();

        match outcome {
            RunOutcome::BuildFailed(BuildError::BuildFailed { exit_code, .. }) => {
                assert_eq!(exit_code, 65);
            }
            other => panic!("expected BuildFailed, got {:?}", other),
        }
        assert_eq!(service.uploads.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn missing_artifacts_fail_packaging_before_upload() {
        struct NoOutputStrategy;
        impl PlatformBuild for NoOutputStrategy {
            fn build(&self, options: &TestRunOptions) -> Result<BuildArtifact, BuildError> {
                // Claims success but writes nothing to disk.
                Ok(apptest_sdk::ArtifactLocator::new(&options.app_dir, options.platform)
                    .to_artifact())
            }
        }

        let service = CountingService::default();
        let options = TestRunOptions::new("/tmp/definitely-missing-app", Platform::Android);
        let outcome = UiTestRunner::new(options, &service)
            .with_strategy(Box::new(NoOutputStrategy))
            .run_detached();

        assert!(matches!(outcome, RunOutcome::PackagingFailed(_)));
        assert_eq!(service.uploads.load(Ordering::SeqCst), 0);
    }
}
