//! # apptest
//!
//! Command-line tool for building mobile apps for UI testing and running the
//! test suites on a remote test-execution service.
//!
//! ## Overview
//!
//! `apptest` drives the whole pipeline for one invocation:
//!
//! - **Building** - Compiles the app and its instrumented tests with the
//!   platform's native toolchain (xcodebuild / Gradle)
//! - **Packaging** - Bundles the build outputs into a deterministic archive
//! - **Submitting** - Uploads the package and tracks the remote run
//!
//! ## Quick Start
//!
//! ```bash
//! # Scaffold a config file
//! apptest init --project my-app
//!
//! # Build, upload, and wait for the verdict
//! apptest run . --platform ios
//!
//! # Fire and forget; check back later
//! apptest run . --platform android --detach
//! apptest status <run-id>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `run` | Build, package, and submit a UI test run |
//! | `status` | Query the status of a previously submitted run |
//! | `init` | Scaffold an `apptest.toml` config file |
//!
//! ## Configuration
//!
//! Settings can be persisted in `apptest.toml` (see [`config`]); CLI flags
//! override them. The API token is read from the config file (with `${VAR}`
//! expansion) or the `APPTEST_API_TOKEN` environment variable, which may also
//! live in a `.env.local` file at the repository root.

use anyhow::{bail, Context, Result};
use apptest_sdk::{AssetPolicy, CancelToken, Platform, RunOutcome, TestRunOptions};
use clap::{Parser, Subcommand, ValueEnum};
use std::path::{Path, PathBuf};
use std::time::Duration;

use client::{HttpTestService, TestService};
use config::AppTestConfig;
use runner::UiTestRunner;

pub mod client;
pub mod config;
pub mod runner;

pub use client::SubmissionClient;

/// CLI orchestrator for building, packaging, and submitting mobile UI test runs.
#[derive(Parser, Debug)]
#[command(name = "apptest", author, version, about = "Mobile UI test runner", long_about = None)]
struct Cli {
    /// Print verbose output including all commands
    #[arg(long, short = 'v', global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Build, package, and submit a UI test run.
    Run {
        /// Application directory containing the native ios/ or android/ project
        #[arg(default_value = ".")]
        app_dir: PathBuf,
        #[arg(long, value_enum)]
        platform: PlatformArg,
        /// Return as soon as the upload is acknowledged instead of waiting
        #[arg(long)]
        detach: bool,
        /// Override the test framework recorded in the package manifest
        #[arg(long)]
        framework: Option<String>,
        /// Extra argument appended to the native build command (repeatable)
        #[arg(long = "build-arg")]
        build_args: Vec<String>,
        #[arg(long, help = "Seconds between status polls")]
        poll_interval_secs: Option<u64>,
        #[arg(long, help = "Maximum seconds to wait for the remote run")]
        wait_timeout_secs: Option<u64>,
        #[arg(long, help = "Maximum seconds the native build may take")]
        build_timeout_secs: Option<u64>,
        /// What to do when the expected assets folder is missing
        #[arg(long, value_enum)]
        on_missing_assets: Option<AssetPolicyArg>,
        #[arg(long, help = "Optional path to config file")]
        config: Option<PathBuf>,
    },
    /// Query the status of a previously submitted run.
    Status {
        run_id: String,
        #[arg(long, help = "Optional path to config file")]
        config: Option<PathBuf>,
    },
    /// Scaffold an apptest.toml config file.
    Init {
        #[arg(long, default_value = "apptest.toml")]
        output: PathBuf,
        #[arg(long, help = "Project name recorded in the config")]
        project: Option<String>,
        #[arg(long, help = "Overwrite an existing file")]
        force: bool,
    },
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum PlatformArg {
    Ios,
    Android,
}

impl From<PlatformArg> for Platform {
    fn from(arg: PlatformArg) -> Self {
        match arg {
            PlatformArg::Ios => Platform::Ios,
            PlatformArg::Android => Platform::Android,
        }
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum AssetPolicyArg {
    Fail,
    Warn,
}

impl From<AssetPolicyArg> for AssetPolicy {
    fn from(arg: AssetPolicyArg) -> Self {
        match arg {
            AssetPolicyArg::Fail => AssetPolicy::Fail,
            AssetPolicyArg::Warn => AssetPolicy::Warn,
        }
    }
}

pub fn run() -> Result<()> {
    load_dotenv();
    let cli = Cli::parse();
    match cli.command {
        Command::Run {
            app_dir,
            platform,
            detach,
            framework,
            build_args,
            poll_interval_secs,
            wait_timeout_secs,
            build_timeout_secs,
            on_missing_assets,
            config,
        } => cmd_run(RunArgs {
            app_dir,
            platform: platform.into(),
            detach,
            framework,
            build_args,
            poll_interval_secs,
            wait_timeout_secs,
            build_timeout_secs,
            on_missing_assets: on_missing_assets.map(Into::into),
            config,
            verbose: cli.verbose,
        }),
        Command::Status { run_id, config } => cmd_status(&run_id, config.as_deref()),
        Command::Init {
            output,
            project,
            force,
        } => cmd_init(&output, project.as_deref(), force),
    }
}

struct RunArgs {
    app_dir: PathBuf,
    platform: Platform,
    detach: bool,
    framework: Option<String>,
    build_args: Vec<String>,
    poll_interval_secs: Option<u64>,
    wait_timeout_secs: Option<u64>,
    build_timeout_secs: Option<u64>,
    on_missing_assets: Option<AssetPolicy>,
    config: Option<PathBuf>,
    verbose: bool,
}

fn cmd_run(args: RunArgs) -> Result<()> {
    let config = load_config(args.config.as_deref())?;

    let app_dir = args
        .app_dir
        .canonicalize()
        .with_context(|| format!("resolving app directory {:?}", args.app_dir))?;

    let mut options = TestRunOptions::new(app_dir, args.platform)
        .with_additional_args(args.build_args)
        .with_asset_policy(resolve_asset_policy(&config, args.on_missing_assets)?)
        .with_build_timeout(Duration::from_secs(
            args.build_timeout_secs
                .unwrap_or(config.run.build_timeout_secs),
        ));
    if let Some(framework) = args.framework {
        options.test_framework = framework;
    }

    let service = build_service(&config)?;

    let cancel = CancelToken::new();
    let handler_token = cancel.clone();
    ctrlc::set_handler(move || {
        eprintln!("\nInterrupt received; stopping...");
        handler_token.cancel();
    })
    .context("installing interrupt handler")?;

    let runner = UiTestRunner::new(options, &service)
        .with_poll_interval(Duration::from_secs(
            args.poll_interval_secs
                .unwrap_or(config.run.poll_interval_secs),
        ))
        .with_wait_budget(Duration::from_secs(
            args.wait_timeout_secs
                .unwrap_or(config.run.wait_timeout_secs),
        ))
        .with_cancel(cancel)
        .verbose(args.verbose);

    let outcome = if args.detach {
        runner.run_detached()
    } else {
        runner.run_synchronously()
    };

    report_outcome(outcome)
}

fn cmd_status(run_id: &str, config_path: Option<&Path>) -> Result<()> {
    let config = load_config(config_path)?;
    let service = build_service(&config)?;

    let summary = service
        .run_status(run_id)
        .with_context(|| format!("querying status of run '{}'", run_id))?;

    println!("Run {}: {}", run_id, summary.status.as_str());
    if let Some(message) = &summary.message {
        println!("  {}", message);
    }

    if summary.status.is_terminal() && !summary.passed() {
        bail!("run '{}' finished with status: {}", run_id, summary.status.as_str());
    }
    Ok(())
}

fn cmd_init(output: &Path, project: Option<&str>, force: bool) -> Result<()> {
    if output.exists() && !force {
        bail!(
            "{:?} already exists; pass --force to overwrite",
            output
        );
    }

    let project = match project {
        Some(name) => name.to_string(),
        None => std::env::current_dir()
            .ok()
            .and_then(|dir| {
                dir.file_name()
                    .map(|name| name.to_string_lossy().into_owned())
            })
            .unwrap_or_else(|| "my-app".to_string()),
    };

    let contents = AppTestConfig::generate_starter_toml(&project);
    std::fs::write(output, contents)
        .with_context(|| format!("writing config file to {:?}", output))?;

    println!("Wrote {}", output.display());
    println!("Set APPTEST_API_TOKEN (environment or .env.local) before running.");
    Ok(())
}

fn load_config(explicit: Option<&Path>) -> Result<AppTestConfig> {
    match explicit {
        Some(path) => AppTestConfig::load_from_file(path),
        None => Ok(AppTestConfig::discover()?
            .map(|(config, _)| config)
            .unwrap_or_default()),
    }
}

fn build_service(config: &AppTestConfig) -> Result<HttpTestService> {
    let token = config
        .api_token()
        .ok_or_else(|| anyhow::anyhow!(format_token_error()))?;

    let mut service = HttpTestService::new(token, config.service.project.clone())?;
    if let Some(base_url) = config.base_url() {
        service = service.with_base_url(base_url);
    }
    Ok(service)
}

fn resolve_asset_policy(
    config: &AppTestConfig,
    cli_value: Option<AssetPolicy>,
) -> Result<AssetPolicy> {
    if let Some(policy) = cli_value {
        return Ok(policy);
    }
    match config.run.on_missing_assets.as_str() {
        "fail" => Ok(AssetPolicy::Fail),
        "warn" => Ok(AssetPolicy::Warn),
        other => bail!(
            "invalid on_missing_assets value '{}' in config (expected \"fail\" or \"warn\")",
            other
        ),
    }
}

fn report_outcome(outcome: RunOutcome) -> Result<()> {
    match outcome {
        RunOutcome::Completed(handle, summary) => {
            println!(
                "Run {} finished: {}",
                handle.run_id,
                summary.status.as_str()
            );
            if let Some(message) = &summary.message {
                println!("  {}", message);
            }
            if summary.passed() {
                Ok(())
            } else {
                bail!(
                    "run '{}' finished with status: {}",
                    handle.run_id,
                    summary.status.as_str()
                );
            }
        }
        RunOutcome::Detached(handle) => {
            println!(
                "Run {} submitted at {}",
                handle.run_id,
                handle.submitted_at_rfc3339()
            );
            println!("Check progress with: apptest status {}", handle.run_id);
            Ok(())
        }
        RunOutcome::BuildFailed(err) => bail!("build failed: {}", err),
        RunOutcome::PackagingFailed(err) => bail!("packaging failed: {}", err),
        RunOutcome::SubmissionFailed(err) => bail!("submission failed: {}", err),
    }
}

/// Format a helpful error message for a missing API token.
fn format_token_error() -> String {
    let mut message = String::from("apptest API token not configured.\n\n");

    message.push_str("Set the token using one of these methods:\n\n");

    message.push_str("  1. Environment variable:\n");
    message.push_str("     export APPTEST_API_TOKEN=your_token\n\n");

    message.push_str("  2. Config file (apptest.toml):\n");
    message.push_str("     [service]\n");
    message.push_str("     api_token = \"${APPTEST_API_TOKEN}\"\n\n");

    message.push_str("  3. .env.local file in the repository root:\n");
    message.push_str("     APPTEST_API_TOKEN=your_token\n");

    message
}

fn load_dotenv() {
    if let Some(root) = find_repo_root() {
        let path = root.join(".env.local");
        let _ = dotenvy::from_path(path);
    }
}

fn find_repo_root() -> Option<PathBuf> {
    let mut current = std::env::current_dir().ok()?;
    loop {
        if current.join(".git").exists() {
            return Some(current);
        }
        if !current.pop() {
            return None;
        }
    }
}
