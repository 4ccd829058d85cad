//! Configuration schema for Dockyard
//!
//! Global configuration lives at `~/.config/dockyard/config.toml`; a
//! project's `dockyard.toml` is merged over it. Relative paths resolve
//! against the project directory.

use crate::error::{DockyardError, DockyardResult};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Root configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// General settings
    pub general: GeneralConfig,

    /// Native toolchain requirements
    pub toolchain: ToolchainConfig,

    /// Dependency installation
    pub dependencies: DependenciesConfig,

    /// Application source tree
    pub source: SourceConfig,

    /// Service bootstrap
    pub service: ServiceConfig,

    /// Image (build root) settings
    pub image: ImageConfig,

    /// Worker runtime environment
    pub runtime: RuntimeConfig,
}

/// General application settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Log format: "text" or "json"
    pub log_format: String,

    /// Enable audit logging
    pub audit_log: bool,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            log_format: "text".to_string(),
            audit_log: true,
        }
    }
}

/// Native toolchain configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolchainConfig {
    /// Executables that must be on PATH before dependencies install
    pub components: Vec<String>,

    /// Package manager invocation; missing packages are appended
    /// (e.g. `["apt-get", "install", "-y", "--no-install-recommends"]`).
    /// Empty disables installation.
    pub install_command: Vec<String>,

    /// Run once before `install_command` (e.g. `["apt-get", "update"]`)
    pub update_command: Vec<String>,

    /// Component name -> system package name, when they differ
    pub packages: HashMap<String, String>,

    /// Transient package-index caches removed after installing
    pub clean_paths: Vec<PathBuf>,
}

impl Default for ToolchainConfig {
    fn default() -> Self {
        Self {
            components: vec!["cc".to_string(), "ld".to_string(), "curl".to_string()],
            install_command: vec![],
            update_command: vec![],
            packages: HashMap::new(),
            clean_paths: vec![],
        }
    }
}

/// Dependency installation configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DependenciesConfig {
    /// Lock file path
    pub lockfile: PathBuf,

    /// Artifact index: `https://...`, `file:///...` or a local directory
    pub index_url: String,

    /// Artifact location under the index; `{index}`, `{name}` and `{version}` are substituted
    pub url_template: String,

    /// Maximum concurrent fetches
    pub jobs: usize,

    /// Per-fetch timeout in seconds
    pub timeout_secs: u64,

    /// External installer run once per package; `{artifact}`, `{site}`,
    /// `{name}` and `{version}` are substituted. Empty stores artifacts as-is.
    pub install_command: Vec<String>,

    /// Extra environment for `install_command`
    pub env: HashMap<String, String>,
}

impl Default for DependenciesConfig {
    fn default() -> Self {
        Self {
            lockfile: PathBuf::from("dockyard.lock"),
            index_url: "artifacts".to_string(),
            url_template: "{index}/{name}/{name}-{version}.tar.gz".to_string(),
            jobs: 4,
            timeout_secs: 60,
            install_command: vec![],
            env: HashMap::new(),
        }
    }
}

/// Source tree configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SourceConfig {
    /// Source directory
    pub dir: PathBuf,

    /// File or directory names skipped when staging (matched per path component)
    pub exclude: Vec<String>,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("."),
            exclude: vec![
                ".git".to_string(),
                "target".to_string(),
                "__pycache__".to_string(),
            ],
        }
    }
}

/// Service bootstrap configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    /// Entry point locator (`module:object`)
    pub entry: String,

    /// Bind host
    pub host: String,

    /// Bind port
    pub port: u16,

    /// Worker command; `{entry}`, `{host}`, `{port}`, `{app}` and `{site}`
    /// are substituted. Empty serves with the built-in listener.
    pub command: Vec<String>,

    /// File extensions tried when resolving the entry module
    pub module_extensions: Vec<String>,

    /// Seconds to wait for the worker after SIGTERM before killing it
    pub shutdown_timeout_secs: u64,

    /// A worker exiting within this window failed to start
    pub startup_grace_ms: u64,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            entry: "main:app".to_string(),
            host: "0.0.0.0".to_string(),
            port: 8000,
            command: vec![],
            module_extensions: vec!["py".to_string()],
            shutdown_timeout_secs: 10,
            startup_grace_ms: 500,
        }
    }
}

impl ServiceConfig {
    /// Split the entry locator into `(module, object)`
    pub fn entry_parts(&self) -> Option<(&str, &str)> {
        let (module, object) = self.entry.split_once(':')?;
        if module.is_empty() || object.is_empty() || object.contains(':') {
            return None;
        }
        Some((module, object))
    }

    /// `host:port` as a socket address string
    pub fn bind_addr(&self) -> String {
        if self.host.contains(':') {
            format!("[{}]:{}", self.host, self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }
}

/// Image configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ImageConfig {
    /// Build root holding layers and build state
    pub root: PathBuf,

    /// Port the image declares as exposed; must equal `service.port`
    pub expose: u16,
}

impl Default for ImageConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from(".dockyard"),
            expose: 8000,
        }
    }
}

/// Worker runtime environment
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Disable output buffering in the worker's standard streams
    pub unbuffered: bool,

    /// Variable that disables buffering
    pub unbuffered_var: String,

    /// Disable bytecode/artifact cache writes
    pub no_bytecode: bool,

    /// Variable that disables bytecode writes
    pub no_bytecode_var: String,

    /// Extra environment variables
    pub env: HashMap<String, String>,

    /// Optional KEY=VALUE file loaded into the worker environment
    pub env_file: Option<PathBuf>,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            unbuffered: true,
            unbuffered_var: "PYTHONUNBUFFERED".to_string(),
            no_bytecode: true,
            no_bytecode_var: "PYTHONDONTWRITEBYTECODE".to_string(),
            env: HashMap::new(),
            env_file: Some(PathBuf::from(".env")),
        }
    }
}

impl RuntimeConfig {
    /// The declared runtime flags as environment pairs
    pub fn flag_vars(&self) -> Vec<(String, String)> {
        let mut vars = Vec::new();
        if self.unbuffered {
            vars.push((self.unbuffered_var.clone(), "1".to_string()));
        }
        if self.no_bytecode {
            vars.push((self.no_bytecode_var.clone(), "1".to_string()));
        }
        vars
    }
}

impl Config {
    /// Reject configurations that cannot produce a consistent image
    pub fn validate(&self, origin: &Path) -> DockyardResult<()> {
        let invalid = |reason: String| DockyardError::ConfigInvalid {
            path: origin.to_path_buf(),
            reason,
        };

        if self.image.expose != self.service.port {
            return Err(invalid(format!(
                "image.expose ({}) does not match service.port ({})",
                self.image.expose, self.service.port
            )));
        }

        if self.service.entry_parts().is_none() {
            return Err(invalid(format!(
                "service.entry '{}' must have the form module:object",
                self.service.entry
            )));
        }

        if self.dependencies.jobs == 0 {
            return Err(invalid("dependencies.jobs must be at least 1".to_string()));
        }

        if !matches!(self.general.log_format.as_str(), "text" | "json") {
            return Err(invalid(format!(
                "general.log_format '{}' must be text or json",
                self.general.log_format
            )));
        }

        Ok(())
    }

    /// Resolve config-relative paths against the project directory
    pub fn resolve_paths(&mut self, project_dir: &Path) {
        let resolve = |p: &mut PathBuf| {
            if p.is_relative() {
                *p = project_dir.join(&*p);
            }
        };

        resolve(&mut self.dependencies.lockfile);
        resolve(&mut self.source.dir);
        resolve(&mut self.image.root);
        if let Some(ref mut env_file) = self.runtime.env_file {
            resolve(env_file);
        }
        if !self.dependencies.index_url.contains("://") {
            let index = PathBuf::from(&self.dependencies.index_url);
            if index.is_relative() {
                self.dependencies.index_url = project_dir.join(index).display().to_string();
            }
        }
    }
}
