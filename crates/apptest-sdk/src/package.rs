//! Deterministic test packaging.
//!
//! [`TestPackager`] turns a [`BuildArtifact`] into a single tar archive the
//! submission stage can upload. The archive is byte-for-byte reproducible for
//! identical inputs: entries are walked in sorted order, timestamps and
//! ownership are zeroed, and modes are normalized to 0644/0755. A JSON
//! manifest with per-file SHA-256 digests is the first entry, so the service
//! can verify contents without unpacking everything.

use crate::artifacts::ArtifactLocator;
use crate::types::{AssetPolicy, BuildArtifact, PackagingError, TestPackage, TestRunOptions};

use serde::Serialize;
use sha2::{Digest, Sha256};
use std::fs::{self, File};
use std::io::Read;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// Schema identifier written into every package manifest.
const MANIFEST_SCHEMA: &str = "apptest/test-package@1";

/// Archive entry name of the manifest itself.
const MANIFEST_NAME: &str = "manifest.json";

#[derive(Debug, Serialize)]
struct Manifest {
    schema: &'static str,
    platform: String,
    test_framework: String,
    files: Vec<ManifestEntry>,
}

#[derive(Debug, Serialize)]
struct ManifestEntry {
    path: String,
    size: u64,
    sha256: String,
}

/// One file staged for archiving: its on-disk source and archive entry name.
#[derive(Debug)]
struct StagedFile {
    source: PathBuf,
    entry_name: String,
}

/// Packages build artifacts into a deterministic upload archive.
#[derive(Debug, Clone, Copy, Default)]
pub struct TestPackager {
    verbose: bool,
}

impl TestPackager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    /// Verifies the artifact's outputs exist and writes the package archive.
    ///
    /// The app bundle and the test bundle are mandatory; the assets folder is
    /// governed by [`TestRunOptions::asset_policy`]. Re-running over unchanged
    /// inputs rewrites an identical archive with an identical digest.
    pub fn package(
        &self,
        options: &TestRunOptions,
        artifact: &BuildArtifact,
    ) -> Result<TestPackage, PackagingError> {
        if !artifact.bundle_path.exists() {
            return Err(PackagingError::ArtifactMissing {
                path: artifact.bundle_path.clone(),
            });
        }
        if !artifact.test_binary_path.exists() {
            return Err(PackagingError::ArtifactMissing {
                path: artifact.test_binary_path.clone(),
            });
        }

        let mut staged = Vec::new();
        stage_tree(&artifact.bundle_path, "app", &mut staged)?;
        stage_tree(&artifact.test_binary_path, "tests", &mut staged)?;

        if artifact.assets_dir.exists() {
            stage_tree(&artifact.assets_dir, "assets", &mut staged)?;
        } else {
            match options.asset_policy {
                AssetPolicy::Fail => {
                    return Err(PackagingError::ArtifactMissing {
                        path: artifact.assets_dir.clone(),
                    });
                }
                AssetPolicy::Warn => {
                    eprintln!(
                        "warning: assets folder {} not found; packaging without assets",
                        artifact.assets_dir.display()
                    );
                }
            }
        }

        staged.sort_by(|a, b| a.entry_name.cmp(&b.entry_name));

        let mut entries = Vec::with_capacity(staged.len());
        for file in &staged {
            let (size, sha256) = hash_file(&file.source)?;
            entries.push(ManifestEntry {
                path: file.entry_name.clone(),
                size,
                sha256,
            });
        }

        let manifest = Manifest {
            schema: MANIFEST_SCHEMA,
            platform: artifact.platform.as_str().to_string(),
            test_framework: options.test_framework.clone(),
            files: entries,
        };
        let manifest_bytes = serde_json::to_vec_pretty(&manifest)
            .map_err(|err| PackagingError::Io(std::io::Error::other(err)))?;

        let locator = ArtifactLocator::new(&options.app_dir, options.platform);
        let archive_path = locator.archive_path();
        fs::create_dir_all(locator.package_dir())?;

        let mut builder = tar::Builder::new(File::create(&archive_path)?);
        append_bytes(&mut builder, MANIFEST_NAME, &manifest_bytes)?;
        for file in &staged {
            append_file(&mut builder, file)?;
        }
        builder.into_inner()?.sync_all()?;

        let (_, digest) = hash_file(&archive_path)?;
        if self.verbose {
            println!("  Packaged {} (sha256 {})", archive_path.display(), digest);
        }

        Ok(TestPackage {
            archive_path,
            digest,
            test_framework: options.test_framework.clone(),
        })
    }
}

/// Stages `root` under `prefix/`. A directory contributes every file below
/// it, keyed by the directory's own name; a plain file contributes itself.
fn stage_tree(root: &Path, prefix: &str, staged: &mut Vec<StagedFile>) -> Result<(), PackagingError> {
    let root_name = root
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| "unnamed".to_string());

    if root.is_file() {
        staged.push(StagedFile {
            source: root.to_path_buf(),
            entry_name: format!("{}/{}", prefix, root_name),
        });
        return Ok(());
    }

    for entry in WalkDir::new(root).sort_by_file_name() {
        let entry = entry.map_err(|err| {
            PackagingError::Io(err.into_io_error().unwrap_or_else(|| {
                std::io::Error::other("walk error")
            }))
        })?;
        if !entry.file_type().is_file() {
            continue;
        }
        let relative = entry
            .path()
            .strip_prefix(root)
            .map_err(|err| PackagingError::Io(std::io::Error::other(err)))?;
        let mut name = format!("{}/{}", prefix, root_name);
        for component in relative.components() {
            name.push('/');
            name.push_str(&component.as_os_str().to_string_lossy());
        }
        staged.push(StagedFile {
            source: entry.path().to_path_buf(),
            entry_name: name,
        });
    }
    Ok(())
}

fn hash_file(path: &Path) -> Result<(u64, String), PackagingError> {
    let mut file = File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buf = [0u8; 64 * 1024];
    let mut size = 0u64;
    loop {
        let read = file.read(&mut buf)?;
        if read == 0 {
            break;
        }
        size += read as u64;
        hasher.update(&buf[..read]);
    }
    Ok((size, hex::encode(hasher.finalize())))
}

/// Normalized entry mode: executables keep 0755, everything else gets 0644.
fn entry_mode(path: &Path) -> u32 {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        if let Ok(metadata) = path.metadata() {
            if metadata.permissions().mode() & 0o111 != 0 {
                return 0o755;
            }
        }
    }
    0o644
}

fn normalized_header(size: u64, mode: u32) -> tar::Header {
    let mut header = tar::Header::new_gnu();
    header.set_size(size);
    header.set_mode(mode);
    header.set_mtime(0);
    header.set_uid(0);
    header.set_gid(0);
    header
}

fn append_bytes<W: std::io::Write>(
    builder: &mut tar::Builder<W>,
    name: &str,
    bytes: &[u8],
) -> Result<(), PackagingError> {
    let mut header = normalized_header(bytes.len() as u64, 0o644);
    builder.append_data(&mut header, name, bytes)?;
    Ok(())
}

fn append_file<W: std::io::Write>(
    builder: &mut tar::Builder<W>,
    file: &StagedFile,
) -> Result<(), PackagingError> {
    let metadata = file.source.metadata()?;
    let mut header = normalized_header(metadata.len(), entry_mode(&file.source));
    builder.append_data(&mut header, &file.entry_name, File::open(&file.source)?)?;
    Ok(())
}
