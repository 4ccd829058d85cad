//! Lock file reading
//!
//! The lock file (`dockyard.lock`) is produced by an external locking tool
//! and records the exact version and integrity digest of every package.
//! It is read once per build. Its content hash keys the dependency layer:
//! same lock file = same dependency cache.

pub mod digest;

pub use digest::{Algorithm, Digest};

use crate::error::{DockyardError, DockyardResult};
use serde::Deserialize;
use sha2::{Digest as _, Sha256};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Highest lock format version this reader understands
const LOCK_FORMAT_VERSION: u32 = 1;

/// One locked package
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockEntry {
    /// Package name, unique within a lock set
    pub name: String,
    /// Exact version
    pub version: semver::Version,
    /// Expected digest of the fetched artifact
    pub digest: Digest,
    /// Explicit artifact URL, overriding the index template
    pub url: Option<String>,
}

impl LockEntry {
    /// Directory name of this package inside the shared site namespace
    pub fn install_dir_name(&self) -> String {
        format!("{}-{}", self.name, self.version)
    }
}

/// The ordered contents of a lock file
#[derive(Debug, Clone)]
pub struct LockSet {
    /// Path the lock file was read from
    pub path: PathBuf,
    /// SHA256 of the raw lock file bytes (full hex)
    pub content_hash: String,
    /// Entries in declared order
    pub entries: Vec<LockEntry>,
}

#[derive(Debug, Deserialize)]
struct RawLockFile {
    #[serde(default = "default_format_version")]
    version: u32,

    #[serde(default, rename = "package")]
    packages: Vec<RawLockEntry>,
}

fn default_format_version() -> u32 {
    LOCK_FORMAT_VERSION
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawLockEntry {
    name: String,
    version: String,
    digest: String,
    #[serde(default)]
    url: Option<String>,
}

impl LockSet {
    /// Read and validate a lock file from disk
    pub fn read(path: &Path) -> DockyardResult<Self> {
        let bytes = fs::read(path).map_err(|e| DockyardError::MalformedLockFile {
            path: path.to_path_buf(),
            reason: format!("cannot read: {}", e),
        })?;
        Self::from_bytes(path, &bytes)
    }

    /// Parse lock file contents; `path` is only used for reporting
    pub fn from_bytes(path: &Path, bytes: &[u8]) -> DockyardResult<Self> {
        let malformed = |reason: String| DockyardError::MalformedLockFile {
            path: path.to_path_buf(),
            reason,
        };

        let content = std::str::from_utf8(bytes).map_err(|e| malformed(e.to_string()))?;
        let raw: RawLockFile = toml::from_str(content).map_err(|e| malformed(e.to_string()))?;

        if raw.version > LOCK_FORMAT_VERSION {
            return Err(malformed(format!(
                "unsupported lock format version {} (max {})",
                raw.version, LOCK_FORMAT_VERSION
            )));
        }

        let mut entries: Vec<LockEntry> = Vec::with_capacity(raw.packages.len());
        let mut seen: HashMap<String, usize> = HashMap::new();

        for raw_entry in raw.packages {
            validate_name(&raw_entry.name).map_err(&malformed)?;

            let version = semver::Version::parse(&raw_entry.version).map_err(|e| {
                malformed(format!(
                    "{}: version '{}' is not an exact version: {}",
                    raw_entry.name, raw_entry.version, e
                ))
            })?;

            let digest: Digest = raw_entry
                .digest
                .parse()
                .map_err(|e: String| malformed(format!("{}: {}", raw_entry.name, e)))?;

            let entry = LockEntry {
                name: raw_entry.name,
                version,
                digest,
                url: raw_entry.url,
            };

            if let Some(&index) = seen.get(&entry.name) {
                let first = &entries[index];
                if first.version != entry.version || first.digest != entry.digest {
                    return Err(DockyardError::DuplicatePackage { name: entry.name });
                }
                debug!("Collapsing repeated lock entry {}", entry.name);
                continue;
            }

            seen.insert(entry.name.clone(), entries.len());
            entries.push(entry);
        }

        let content_hash = hex::encode(Sha256::digest(bytes));
        debug!(
            "Read {} lock entries from {} ({})",
            entries.len(),
            path.display(),
            &content_hash[..12]
        );

        Ok(Self {
            path: path.to_path_buf(),
            content_hash,
            entries,
        })
    }

    /// First 12 hex chars of the content hash
    pub fn short_hash(&self) -> &str {
        &self.content_hash[..12]
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Package names become directory names, so keep them to a safe charset
fn validate_name(name: &str) -> Result<(), String> {
    if name.is_empty() {
        return Err("package name is empty".to_string());
    }
    if name.starts_with('.') {
        return Err(format!("package name '{}' starts with '.'", name));
    }
    if !name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
    {
        return Err(format!("package name '{}' contains invalid characters", name));
    }
    Ok(())
}
