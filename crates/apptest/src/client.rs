//! Remote test service client.
//!
//! [`TestService`] is the seam between the pipeline and the network: the
//! production implementation is [`HttpTestService`], and tests substitute a
//! scripted fake. [`SubmissionClient`] layers the upload-then-poll protocol
//! on top of whichever service it is given.

use anyhow::{Context, Result};
use apptest_sdk::{
    CancelToken, RemoteStatus, RunHandle, RunMode, RunOutcome, RunSummary, SubmissionError,
    TestPackage, TestRunOptions,
};
use reqwest::blocking::multipart::Form;
use reqwest::blocking::{Client, Response};
use serde::Deserialize;
use std::time::{Duration, Instant};

const DEFAULT_BASE_URL: &str = "https://api.apptest.dev";
const USER_AGENT: &str = "apptest/0.1";

/// Default pause between status polls during a synchronous wait.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(5);

/// Default total time a synchronous wait spends before giving up.
pub const DEFAULT_WAIT_BUDGET: Duration = Duration::from_secs(1800);

/// Format a file size in human-readable format (MB or KB).
fn format_file_size(bytes: u64) -> String {
    if bytes >= 1_000_000 {
        format!("{} MB", bytes / 1_000_000)
    } else if bytes >= 1_000 {
        format!("{} KB", bytes / 1_000)
    } else {
        format!("{} bytes", bytes)
    }
}

/// Remote test-execution service.
///
/// Uploading a package creates a run; the run is then observable by id until
/// it reaches a terminal status. Upload acknowledgement is the durability
/// point: once a [`RunHandle`] exists the remote run proceeds whether or not
/// this process keeps watching.
pub trait TestService {
    fn upload(
        &self,
        package: &TestPackage,
        options: &TestRunOptions,
    ) -> Result<RunHandle, SubmissionError>;

    fn run_status(&self, run_id: &str) -> Result<RunSummary, SubmissionError>;
}

/// HTTP implementation of [`TestService`].
#[derive(Debug, Clone)]
pub struct HttpTestService {
    http: Client,
    base_url: String,
    api_token: String,
    project: Option<String>,
}

impl HttpTestService {
    pub fn new(api_token: impl Into<String>, project: Option<String>) -> Result<Self> {
        let http = Client::builder()
            .user_agent(USER_AGENT)
            .build()
            .context("building HTTP client")?;

        Ok(Self {
            http,
            base_url: DEFAULT_BASE_URL.to_string(),
            api_token: api_token.into(),
            project,
        })
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    fn api(&self, path: &str) -> String {
        format!(
            "{}/{}",
            self.base_url.trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }
}

impl TestService for HttpTestService {
    fn upload(
        &self,
        package: &TestPackage,
        options: &TestRunOptions,
    ) -> Result<RunHandle, SubmissionError> {
        let file_size = std::fs::metadata(&package.archive_path)
            .map(|m| m.len())
            .unwrap_or(0);
        println!(
            "Uploading test package ({})...",
            format_file_size(file_size)
        );
        let start = Instant::now();

        let mut form = Form::new()
            .text("platform", options.platform.as_str().to_string())
            .text("test_framework", package.test_framework.clone())
            .text("digest", package.digest.clone())
            .file("package", &package.archive_path)
            .map_err(|err| SubmissionError::NetworkError(err.to_string()))?;
        if let Some(project) = &self.project {
            form = form.text("project", project.clone());
        }

        let resp = self
            .http
            .post(self.api("v1/uitest/runs"))
            .bearer_auth(&self.api_token)
            .multipart(form)
            .send()
            .map_err(|err| SubmissionError::NetworkError(err.to_string()))?;

        let created: RunCreatedResponse = parse_response(resp)?;
        println!(
            "  Uploaded; run {} created (took {}s)",
            created.run_id,
            start.elapsed().as_secs()
        );

        Ok(RunHandle::new(created.run_id))
    }

    fn run_status(&self, run_id: &str) -> Result<RunSummary, SubmissionError> {
        let resp = self
            .http
            .get(self.api(&format!("v1/uitest/runs/{}", run_id)))
            .bearer_auth(&self.api_token)
            .send()
            .map_err(|err| SubmissionError::NetworkError(err.to_string()))?;

        let status_code = resp.status();
        let text = resp
            .text()
            .map_err(|err| SubmissionError::NetworkError(err.to_string()))?;
        if !status_code.is_success() {
            return Err(SubmissionError::InvalidResponse(format!(
                "status query for run '{}' failed (status {}): {}",
                run_id, status_code, text
            )));
        }

        let raw: RunStatusResponse = serde_json::from_str(&text)
            .map_err(|err| SubmissionError::InvalidResponse(format!("{}: {}", err, text)))?;
        let status = RemoteStatus::parse(&raw.status).ok_or_else(|| {
            SubmissionError::InvalidResponse(format!("unknown run status '{}'", raw.status))
        })?;

        Ok(RunSummary {
            status,
            message: raw.message,
        })
    }
}

#[derive(Debug, Deserialize)]
struct RunCreatedResponse {
    #[serde(alias = "runId", alias = "id")]
    run_id: String,
}

#[derive(Debug, Deserialize)]
struct RunStatusResponse {
    status: String,
    #[serde(default)]
    message: Option<String>,
}

fn parse_response<T: serde::de::DeserializeOwned>(resp: Response) -> Result<T, SubmissionError> {
    let status = resp.status();
    let text = resp
        .text()
        .map_err(|err| SubmissionError::NetworkError(err.to_string()))?;

    if !status.is_success() {
        return Err(SubmissionError::UploadRejected {
            status: status.as_u16(),
            reason: text,
        });
    }

    serde_json::from_str(&text)
        .map_err(|err| SubmissionError::InvalidResponse(format!("{}: {}", err, text)))
}

/// Drives one package through upload and, for synchronous runs, the status
/// poll loop.
pub struct SubmissionClient<'a> {
    service: &'a dyn TestService,
    poll_interval: Duration,
    wait_budget: Duration,
    cancel: CancelToken,
}

impl<'a> SubmissionClient<'a> {
    pub fn new(service: &'a dyn TestService) -> Self {
        Self {
            service,
            poll_interval: DEFAULT_POLL_INTERVAL,
            wait_budget: DEFAULT_WAIT_BUDGET,
            cancel: CancelToken::new(),
        }
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

    /// Uploads the package and either detaches or waits for a terminal
    /// status, per the run mode.
    ///
    /// A cancelled wait detaches cleanly: the remote run keeps going and the
    /// handle stays usable. An exhausted wait budget is an error, but the
    /// remote run is likewise left intact.
    pub fn submit(
        &self,
        package: &TestPackage,
        options: &TestRunOptions,
    ) -> Result<RunOutcome, SubmissionError> {
        let handle = self.service.upload(package, options)?;

        if options.mode == RunMode::Async {
            return Ok(RunOutcome::Detached(handle));
        }

        println!(
            "Waiting for run {} (poll: {}s, timeout: {}s)...",
            handle.run_id,
            self.poll_interval.as_secs(),
            self.wait_budget.as_secs()
        );

        let start = Instant::now();
        loop {
            if self.cancel.is_cancelled() {
                println!("  Wait cancelled; run {} continues remotely", handle.run_id);
                return Ok(RunOutcome::Detached(handle));
            }

            let summary = self.service.run_status(&handle.run_id)?;
            if summary.status.is_terminal() {
                return Ok(RunOutcome::Completed(handle, summary));
            }

            if start.elapsed() >= self.wait_budget {
                return Err(SubmissionError::Timeout {
                    run_id: handle.run_id,
                    waited_secs: self.wait_budget.as_secs(),
                });
            }

            std::thread::sleep(self.poll_interval);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use apptest_sdk::Platform;
    use std::collections::VecDeque;
    use std::path::PathBuf;
    use std::sync::Mutex;

    /// Scripted [`TestService`]: hands out one status per poll, repeating the
    /// last one when the script runs dry.
    struct FakeService {
        statuses: Mutex<VecDeque<RemoteStatus>>,
        polls: Mutex<u32>,
    }

    impl FakeService {
        fn new(statuses: &[RemoteStatus]) -> Self {
            Self {
                statuses: Mutex::new(statuses.iter().copied().collect()),
                polls: Mutex::new(0),
            }
        }

        fn poll_count(&self) -> u32 {
            *self.polls.lock().unwrap()
        }
    }

    impl TestService for FakeService {
        fn upload(
            &self,
            _package: &TestPackage,
            _options: &TestRunOptions,
        ) -> Result<RunHandle, SubmissionError> {
            Ok(RunHandle::new("run-42"))
        }

        fn run_status(&self, _run_id: &str) -> Result<RunSummary, SubmissionError> {
            *self.polls.lock().unwrap() += 1;
            let mut statuses = self.statuses.lock().unwrap();
            let status = if statuses.len() > 1 {
                statuses.pop_front().unwrap()
            } else {
                *statuses.front().unwrap()
            };
            Ok(RunSummary {
                status,
                message: None,
            })
        }
    }

    fn package() -> TestPackage {
        TestPackage {
            archive_path: PathBuf::from("/tmp/pkg.tar"),
            digest: "deadbeef".into(),
            test_framework: "espresso".into(),
        }
    }

    fn options(mode: RunMode) -> TestRunOptions {
        TestRunOptions::new("/tmp/demo", Platform::Android).with_mode(mode)
    }

    #[test]
    fn sync_run_polls_until_terminal() {
        let service = FakeService::new(&[
            RemoteStatus::Queued,
            RemoteStatus::Running,
            RemoteStatus::Passed,
        ]);
        let outcome = SubmissionClient::new(&service)
            .with_poll_interval(Duration::ZERO)
            .submit(&package(), &options(RunMode::Sync))
            .unwrap();

        match outcome {
            RunOutcome::Completed(handle, summary) => {
                assert_eq!(handle.run_id, "run-42");
                assert!(summary.passed());
            }
            other => panic!("expected Completed, got {:?}", other),
        }
        assert_eq!(service.poll_count(), 3);
    }

    #[test]
    fn sync_run_reports_failed_terminal_status() {
        let service = FakeService::new(&[RemoteStatus::Failed]);
        let outcome = SubmissionClient::new(&service)
            .with_poll_interval(Duration::ZERO)
            .submit(&package(), &options(RunMode::Sync))
            .unwrap();

        match outcome {
            RunOutcome::Completed(_, summary) => {
                assert_eq!(summary.status, RemoteStatus::Failed);
                assert!(!summary.passed());
            }
            other => panic!("expected Completed, got {:?}", other),
        }
    }

    #[test]
    fn async_run_detaches_without_polling() {
        let service = FakeService::new(&[RemoteStatus::Queued]);
        let outcome = SubmissionClient::new(&service)
            .submit(&package(), &options(RunMode::Async))
            .unwrap();

        assert!(matches!(outcome, RunOutcome::Detached(_)));
        assert_eq!(service.poll_count(), 0);
    }

    #[test]
    fn exhausted_wait_budget_is_timeout() {
        let service = FakeService::new(&[RemoteStatus::Running]);
        let err = SubmissionClient::new(&service)
            .with_poll_interval(Duration::ZERO)
            .with_wait_budget(Duration::ZERO)
            .submit(&package(), &options(RunMode::Sync))
            .unwrap_err();

        match err {
            SubmissionError::Timeout { run_id, .. } => assert_eq!(run_id, "run-42"),
            other => panic!("expected Timeout, got {:?}", other),
        }
    }

    #[test]
    fn cancelled_wait_detaches_with_live_handle() {
        let service = FakeService::new(&[RemoteStatus::Running]);
        let cancel = CancelToken::new();
        cancel.cancel();

        let outcome = SubmissionClient::new(&service)
            .with_cancel(cancel)
            .submit(&package(), &options(RunMode::Sync))
            .unwrap();

        match outcome {
            RunOutcome::Detached(handle) => assert_eq!(handle.run_id, "run-42"),
            other => panic!("expected Detached, got {:?}", other),
        }
        assert_eq!(service.poll_count(), 0);
    }

    #[test]
    fn status_errors_propagate() {
        struct BrokenService;
        impl TestService for BrokenService {
            fn upload(
                &self,
                _package: &TestPackage,
                _options: &TestRunOptions,
            ) -> Result<RunHandle, SubmissionError> {
                Ok(RunHandle::new("run-7"))
            }
            fn run_status(&self, _run_id: &str) -> Result<RunSummary, SubmissionError> {
                Err(SubmissionError::NetworkError("connection reset".into()))
            }
        }

        let err = SubmissionClient::new(&BrokenService)
            .with_poll_interval(Duration::ZERO)
            .submit(&package(), &options(RunMode::Sync))
            .unwrap_err();
        assert!(matches!(err, SubmissionError::NetworkError(_)));
    }

    #[test]
    fn api_constructs_url_correctly() {
        let service = HttpTestService::new("token", None).unwrap();
        assert_eq!(
            service.api("v1/uitest/runs"),
            "https://api.apptest.dev/v1/uitest/runs"
        );
    }

    #[test]
    fn api_handles_leading_and_trailing_slashes() {
        let service = HttpTestService::new("token", None)
            .unwrap()
            .with_base_url("https://staging.example.com/");
        assert_eq!(
            service.api("/v1/uitest/runs/run-1"),
            "https://staging.example.com/v1/uitest/runs/run-1"
        );
    }
}
