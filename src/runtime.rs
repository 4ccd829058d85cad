//! Runtime environment handed from stage to stage
//!
//! The installer produces it, the stager adds the application directory and
//! the service bootstrapper consumes it. It is an ordinary value; nothing
//! about it is global.

use crate::config::schema::RuntimeConfig;
use crate::error::{DockyardError, DockyardResult};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Variable pointing the worker at the shared package namespace
pub const SITE_VAR: &str = "DOCKYARD_SITE";

/// Variable pointing the worker at the staged application
pub const APP_VAR: &str = "DOCKYARD_APP";

/// A package installed into the shared site directory
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstalledPackage {
    pub name: String,
    pub version: String,
    /// `<site>/<name>-<version>`
    pub path: PathBuf,
}

/// Everything a worker needs to run against the built image
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RuntimeEnvironment {
    /// Build root
    pub root: PathBuf,
    /// Shared package namespace
    pub site_dir: PathBuf,
    /// Staged application, once the source stage ran
    pub app_dir: Option<PathBuf>,
    /// Resolved toolchain components
    pub toolchain: BTreeMap<String, PathBuf>,
    /// Environment variables for processes run against the image
    pub env: BTreeMap<String, String>,
    /// Installed packages in lock order
    pub packages: Vec<InstalledPackage>,
}

impl RuntimeEnvironment {
    /// Environment for the installer hook and service worker.
    ///
    /// Runtime flags first, then `[runtime.env]`, then the env file, so the
    /// file wins on conflicts.
    pub fn worker_env(&self, runtime: &RuntimeConfig) -> DockyardResult<BTreeMap<String, String>> {
        let mut env = self.env.clone();
        env.insert(SITE_VAR.to_string(), self.site_dir.display().to_string());
        if let Some(ref app) = self.app_dir {
            env.insert(APP_VAR.to_string(), app.display().to_string());
        }
        env.extend(runtime.flag_vars());
        env.extend(runtime.env.iter().map(|(k, v)| (k.clone(), v.clone())));

        if let Some(ref path) = runtime.env_file {
            if path.exists() {
                env.extend(load_env_file(path)?);
            }
        }

        Ok(env)
    }
}

/// Parse a `KEY=VALUE` env file.
///
/// Blank lines and `#` comments are skipped, an `export ` prefix is
/// accepted and matching surrounding quotes are stripped.
pub fn load_env_file(path: &Path) -> DockyardResult<Vec<(String, String)>> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| DockyardError::io(format!("reading env file {}", path.display()), e))?;
    parse_env(&content).map_err(|reason| DockyardError::ConfigInvalid {
        path: path.to_path_buf(),
        reason,
    })
}

fn parse_env(content: &str) -> Result<Vec<(String, String)>, String> {
    let mut vars = Vec::new();

    for (index, raw) in content.lines().enumerate() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let line = line.strip_prefix("export ").unwrap_or(line);

        let (key, value) = line
            .split_once('=')
            .ok_or_else(|| format!("line {}: expected KEY=VALUE", index + 1))?;
        let key = key.trim();
        if key.is_empty() || !key.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
            return Err(format!("line {}: invalid variable name '{}'", index + 1, key));
        }

        vars.push((key.to_string(), unquote(value.trim()).to_string()));
    }

    Ok(vars)
}

fn unquote(value: &str) -> &str {
    for quote in ['"', '\''] {
        if value.len() >= 2 && value.starts_with(quote) && value.ends_with(quote) {
            return &value[1..value.len() - 1];
        }
    }
    value
}
