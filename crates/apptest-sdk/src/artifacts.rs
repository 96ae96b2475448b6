//! Artifact path conventions.
//!
//! [`ArtifactLocator`] computes, per platform, where the native toolchain
//! puts its outputs relative to an app directory. It is pure path
//! arithmetic; existence checks belong to the packager.

use crate::types::{app_name_of, BuildArtifact, Platform};
use std::path::{Path, PathBuf};

/// Relative build-products directory inside iOS DerivedData.
const IOS_PRODUCTS_DIR: &str = "DerivedData/Build/Products/Debug-iphoneos";

/// Staging directory for produced packages, relative to the app directory.
const PACKAGE_DIR: &str = ".apptest";

/// Canonical artifact locations for one `(app_dir, platform)` pair.
#[derive(Debug, Clone)]
pub struct ArtifactLocator {
    app_dir: PathBuf,
    platform: Platform,
    app_name: String,
}

impl ArtifactLocator {
    pub fn new(app_dir: impl Into<PathBuf>, platform: Platform) -> Self {
        let app_dir = app_dir.into();
        let app_name = app_name_of(&app_dir);
        Self {
            app_dir,
            platform,
            app_name,
        }
    }

    pub fn app_name(&self) -> &str {
        &self.app_name
    }

    /// The platform's native project directory (`ios/` or `android/`).
    pub fn native_dir(&self) -> PathBuf {
        self.app_dir.join(self.platform.as_str())
    }

    /// The workspace/project file the native build requires.
    pub fn project_path(&self) -> PathBuf {
        match self.platform {
            Platform::Ios => self
                .native_dir()
                .join(format!("{}.xcworkspace", self.app_name)),
            Platform::Android => self.native_dir().join("build.gradle"),
        }
    }

    /// Kotlin-DSL variant of the Android build script. iOS has no analogue.
    pub fn project_path_kts(&self) -> Option<PathBuf> {
        match self.platform {
            Platform::Ios => None,
            Platform::Android => Some(self.native_dir().join("build.gradle.kts")),
        }
    }

    /// Native build output directory holding the compiled bundle.
    pub fn binary_dir(&self) -> PathBuf {
        match self.platform {
            Platform::Ios => self.native_dir().join(IOS_PRODUCTS_DIR),
            Platform::Android => self.native_dir().join("app/build/outputs/apk"),
        }
    }

    /// The compiled application bundle.
    pub fn bundle_path(&self) -> PathBuf {
        match self.platform {
            Platform::Ios => self.binary_dir().join(format!("{}.app", self.app_name)),
            Platform::Android => self.binary_dir().join("debug/app-debug.apk"),
        }
    }

    /// The instrumented-test bundle built alongside the app.
    pub fn test_binary_path(&self) -> PathBuf {
        match self.platform {
            Platform::Ios => self
                .binary_dir()
                .join(format!("{}UITests-Runner.app", self.app_name)),
            Platform::Android => self
                .binary_dir()
                .join("androidTest/debug/app-debug-androidTest.apk"),
        }
    }

    /// The source assets folder expected alongside the native project.
    pub fn assets_dir(&self) -> PathBuf {
        match self.platform {
            Platform::Ios => self.native_dir().join(&self.app_name),
            Platform::Android => self.native_dir().join("app/src/main/assets"),
        }
    }

    /// Staging directory for produced test packages.
    pub fn package_dir(&self) -> PathBuf {
        self.app_dir.join(PACKAGE_DIR)
    }

    /// Path of the deterministic package archive for this invocation.
    pub fn archive_path(&self) -> PathBuf {
        self.package_dir().join(format!(
            "{}-{}-tests.tar",
            self.app_name,
            self.platform.as_str()
        ))
    }

    /// Assembles the artifact record handed from the build stage to the
    /// packager.
    pub fn to_artifact(&self) -> BuildArtifact {
        BuildArtifact {
            platform: self.platform,
            bundle_path: self.bundle_path(),
            binary_dir: self.binary_dir(),
            test_binary_path: self.test_binary_path(),
            assets_dir: self.assets_dir(),
        }
    }

    /// Whether an Android project file exists in either Groovy or Kotlin
    /// DSL form.
    pub fn project_exists(&self) -> bool {
        if self.project_path().exists() {
            return true;
        }
        self.project_path_kts()
            .map(|path| path.exists())
            .unwrap_or(false)
    }

    /// The path reported when the project is missing.
    pub fn missing_project_path(&self) -> PathBuf {
        self.project_path()
    }

    pub fn app_dir(&self) -> &Path {
        &self.app_dir
    }
}
