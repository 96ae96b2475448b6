//! Configuration file support for apptest.
//!
//! This module provides support for `apptest.toml` configuration files that
//! allow users to persist project settings and avoid passing CLI flags
//! repeatedly.
//!
//! ## Configuration File Location
//!
//! The configuration file is searched for in the following order:
//! 1. Current working directory (`./apptest.toml`)
//! 2. Parent directories (up to the repository root or filesystem root)
//!
//! ## Example Configuration
//!
//! ```toml
//! [service]
//! base_url = "https://api.apptest.dev"
//! api_token = "${APPTEST_API_TOKEN}"
//! project = "my-app"
//!
//! [run]
//! poll_interval_secs = 5
//! wait_timeout_secs = 1800
//! build_timeout_secs = 1800
//! on_missing_assets = "fail"
//! ```
//!
//! Values of the form `${VAR}` are expanded from the environment at load
//! time, so secrets never have to live in the file itself.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// The default configuration file name.
pub const CONFIG_FILE_NAME: &str = "apptest.toml";

/// Environment variable consulted when no token is configured.
pub const TOKEN_ENV_VAR: &str = "APPTEST_API_TOKEN";

/// Environment variable overriding the service base URL.
pub const BASE_URL_ENV_VAR: &str = "APPTEST_BASE_URL";

/// Root configuration structure for `apptest.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppTestConfig {
    /// Remote test service settings.
    pub service: ServiceConfig,

    /// Run execution defaults.
    pub run: RunConfig,
}

/// Remote test service settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    /// Base URL of the test service API. Defaults to the hosted service.
    pub base_url: Option<String>,

    /// API token, usually `${APPTEST_API_TOKEN}`.
    pub api_token: Option<String>,

    /// Project name attached to every submitted run.
    pub project: Option<String>,
}

/// Run execution defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    /// Seconds between status polls during a synchronous wait.
    pub poll_interval_secs: u64,

    /// Maximum seconds to wait for a synchronous run before giving up.
    pub wait_timeout_secs: u64,

    /// Maximum seconds a native build may take before it is killed.
    pub build_timeout_secs: u64,

    /// "fail" or "warn" when the expected assets folder is missing.
    pub on_missing_assets: String,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: 5,
            wait_timeout_secs: 1800,
            build_timeout_secs: 1800,
            on_missing_assets: "fail".to_string(),
        }
    }
}

impl AppTestConfig {
    /// Loads configuration from the specified file path.
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;

        let config: AppTestConfig = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {:?}", path))?;

        Ok(config)
    }

    /// Attempts to find and load configuration from the current directory
    /// or any parent directory, stopping at the repository root.
    pub fn discover() -> Result<Option<(Self, PathBuf)>> {
        let cwd = std::env::current_dir().context("Failed to get current directory")?;
        Self::discover_from(&cwd)
    }

    /// Attempts to find and load configuration starting from `start_dir`.
    pub fn discover_from(start_dir: &Path) -> Result<Option<(Self, PathBuf)>> {
        let mut current = start_dir.to_path_buf();

        loop {
            let config_path = current.join(CONFIG_FILE_NAME);

            if config_path.is_file() {
                let config = Self::load_from_file(&config_path)?;
                return Ok(Some((config, config_path)));
            }

            // Stop at repository root or filesystem root
            if current.join(".git").exists() || !current.pop() {
                break;
            }
        }

        Ok(None)
    }

    /// Resolved API token: config value (with `${VAR}` expansion) first,
    /// then the `APPTEST_API_TOKEN` environment variable.
    pub fn api_token(&self) -> Option<String> {
        self.service
            .api_token
            .as_deref()
            .and_then(expand_env)
            .or_else(|| std::env::var(TOKEN_ENV_VAR).ok())
            .filter(|token| !token.is_empty())
    }

    /// Resolved base URL: `APPTEST_BASE_URL` wins over the config value.
    pub fn base_url(&self) -> Option<String> {
        std::env::var(BASE_URL_ENV_VAR)
            .ok()
            .or_else(|| self.service.base_url.as_deref().and_then(expand_env))
            .filter(|url| !url.is_empty())
    }

    /// Generates a starter configuration file as a formatted TOML string,
    /// with comments explaining each option.
    pub fn generate_starter_toml(project: &str) -> String {
        format!(
            r#"# apptest configuration file
# This file configures apptest for building and submitting mobile UI test runs.
# CLI flags override these settings when provided.

[service]
# Base URL of the test service API (default: hosted service)
# base_url = "https://api.apptest.dev"

# API token; ${{VAR}} values are expanded from the environment at load time
api_token = "${{APPTEST_API_TOKEN}}"

# Project name attached to every submitted run
project = "{project}"

[run]
# Seconds between status polls during a synchronous wait (default: 5)
poll_interval_secs = 5

# Maximum seconds to wait for a synchronous run (default: 1800)
wait_timeout_secs = 1800

# Maximum seconds a native build may take before it is killed (default: 1800)
build_timeout_secs = 1800

# What to do when the expected assets folder is missing: "fail" or "warn"
on_missing_assets = "fail"
"#,
            project = project,
        )
    }
}

/// Expands `${VAR}` references from the environment. A reference to an unset
/// variable yields `None` so the caller can fall through to other sources.
fn expand_env(value: &str) -> Option<String> {
    let mut result = String::with_capacity(value.len());
    let mut rest = value;

    while let Some(start) = rest.find("${") {
        result.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let end = after.find('}')?;
        let var = &after[..end];
        match std::env::var(var) {
            Ok(expanded) => result.push_str(&expanded),
            Err(_) => return None,
        }
        rest = &after[end + 1..];
    }
    result.push_str(rest);
    Some(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn default_config() {
        let config = AppTestConfig::default();
        assert_eq!(config.run.poll_interval_secs, 5);
        assert_eq!(config.run.wait_timeout_secs, 1800);
        assert_eq!(config.run.build_timeout_secs, 1800);
        assert_eq!(config.run.on_missing_assets, "fail");
        assert!(config.service.api_token.is_none());
    }

    #[test]
    fn load_from_file() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join(CONFIG_FILE_NAME);

        let toml_content = r#"
[service]
base_url = "https://staging.example.com"
api_token = "literal-token"
project = "demo-app"

[run]
poll_interval_secs = 2
wait_timeout_secs = 600
on_missing_assets = "warn"
"#;
        std::fs::write(&config_path, toml_content).unwrap();

        let config = AppTestConfig::load_from_file(&config_path).unwrap();
        assert_eq!(
            config.service.base_url,
            Some("https://staging.example.com".to_string())
        );
        assert_eq!(config.service.project, Some("demo-app".to_string()));
        assert_eq!(config.run.poll_interval_secs, 2);
        assert_eq!(config.run.wait_timeout_secs, 600);
        // Unset keys keep their defaults.
        assert_eq!(config.run.build_timeout_secs, 1800);
        assert_eq!(config.run.on_missing_assets, "warn");
    }

    #[test]
    fn discover_finds_config_in_start_dir() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join(CONFIG_FILE_NAME);
        std::fs::write(&config_path, "[service]\nproject = \"found\"\n").unwrap();

        let result = AppTestConfig::discover_from(temp_dir.path()).unwrap();
        let (config, path) = result.unwrap();
        assert_eq!(config.service.project, Some("found".to_string()));
        assert_eq!(path, config_path);
    }

    #[test]
    fn discover_stops_at_repository_root() {
        let temp_dir = TempDir::new().unwrap();
        std::fs::create_dir(temp_dir.path().join(".git")).unwrap();

        let result = AppTestConfig::discover_from(temp_dir.path()).unwrap();
        assert!(result.is_none());
    }

    #[test]
    fn expand_env_substitutes_known_variables() {
        std::env::set_var("APPTEST_TEST_EXPAND_VAR", "secret");
        assert_eq!(
            expand_env("${APPTEST_TEST_EXPAND_VAR}"),
            Some("secret".to_string())
        );
        assert_eq!(
            expand_env("prefix-${APPTEST_TEST_EXPAND_VAR}-suffix"),
            Some("prefix-secret-suffix".to_string())
        );
        std::env::remove_var("APPTEST_TEST_EXPAND_VAR");
    }

    #[test]
    fn expand_env_fails_closed_on_unset_variables() {
        assert_eq!(expand_env("${APPTEST_TEST_DEFINITELY_UNSET}"), None);
    }

    #[test]
    fn expand_env_passes_literals_through() {
        assert_eq!(expand_env("no-vars-here"), Some("no-vars-here".to_string()));
    }

    #[test]
    fn starter_toml_is_loadable() {
        let toml_content = AppTestConfig::generate_starter_toml("demo-app");
        let config: AppTestConfig = toml::from_str(&toml_content).unwrap();
        assert_eq!(config.service.project, Some("demo-app".to_string()));
        assert_eq!(
            config.service.api_token,
            Some("${APPTEST_API_TOKEN}".to_string())
        );
        assert_eq!(config.run.on_missing_assets, "fail");
    }
}
