//! Error types for Dockyard
//!
//! All modules use `DockyardResult<T>` as their return type. Pipeline
//! failures carry a stable kind name and a distinct process exit code.

use crate::pipeline::Stage;
use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for Dockyard operations
pub type DockyardResult<T> = Result<T, DockyardError>;

/// All errors that can occur in Dockyard
#[derive(Error, Debug)]
pub enum DockyardError {
    // Lock file errors
    #[error("Malformed lock file {path}: {reason}")]
    MalformedLockFile { path: PathBuf, reason: String },

    #[error("Package {name} is locked more than once with conflicting versions")]
    DuplicatePackage { name: String },

    // Toolchain errors
    #[error("Required toolchain component not available: {component}")]
    ToolchainUnavailable { component: String },

    // Dependency errors
    #[error("Integrity check failed for {package}: expected {expected}, got {actual}")]
    IntegrityViolation {
        package: String,
        expected: String,
        actual: String,
    },

    #[error("Failed to fetch {package}: {reason}")]
    NetworkFetchFailed { package: String, reason: String },

    // Source errors
    #[error("Failed to copy source {path}: {reason}")]
    SourceCopyFailed { path: PathBuf, reason: String },

    // Service errors
    #[error("Entry point not found: {entry}")]
    EntryPointNotFound { entry: String },

    #[error("Address already in use: {addr}")]
    BindAddressInUse { addr: String },

    #[error("Worker failed to start: {0}")]
    WorkerStart(String),

    // Pipeline wrapper
    #[error("[{stage}] {}: {source}", .source.kind())]
    StageFailed {
        stage: Stage,
        #[source]
        source: Box<DockyardError>,
    },

    // Configuration errors
    #[error("Invalid configuration at {path}: {reason}")]
    ConfigInvalid { path: PathBuf, reason: String },

    #[error("Failed to create config directory {path}: {source}")]
    ConfigDirCreate {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // IO errors
    #[error("IO error: {context}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    // Process errors
    #[error("Command failed: {command}")]
    CommandFailed {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Command execution error: {command}, stderr: {stderr}")]
    CommandExecution { command: String, stderr: String },

    // Serialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("TOML serialize error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    // General errors
    #[error("Internal error: {0}")]
    Internal(String),

    #[error("{0}")]
    User(String),
}

impl DockyardError {
    /// Create an IO error with context
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }

    /// Create a command failed error
    pub fn command_failed(command: impl Into<String>, source: std::io::Error) -> Self {
        Self::CommandFailed {
            command: command.into(),
            source,
        }
    }

    /// Create a command execution error
    pub fn command_exec(command: impl Into<String>, stderr: impl Into<String>) -> Self {
        Self::CommandExecution {
            command: command.into(),
            stderr: stderr.into(),
        }
    }

    /// Wrap this error with the pipeline stage it halted in
    pub fn in_stage(self, stage: Stage) -> Self {
        match self {
            already @ Self::StageFailed { .. } => already,
            other => Self::StageFailed {
                stage,
                source: Box::new(other),
            },
        }
    }

    /// The innermost error, unwrapping any stage context
    pub fn root(&self) -> &DockyardError {
        match self {
            Self::StageFailed { source, .. } => source.root(),
            other => other,
        }
    }

    /// Stable name of the error kind
    pub fn kind(&self) -> &'static str {
        match self.root() {
            Self::MalformedLockFile { .. } => "MalformedLockFile",
            Self::DuplicatePackage { .. } => "DuplicatePackage",
            Self::ToolchainUnavailable { .. } => "ToolchainUnavailable",
            Self::IntegrityViolation { .. } => "IntegrityViolation",
            Self::NetworkFetchFailed { .. } => "NetworkFetchFailed",
            Self::SourceCopyFailed { .. } => "SourceCopyFailed",
            Self::EntryPointNotFound { .. } => "EntryPointNotFound",
            Self::BindAddressInUse { .. } => "BindAddressInUse",
            Self::WorkerStart(_) => "WorkerStart",
            Self::ConfigInvalid { .. } | Self::ConfigDirCreate { .. } => "ConfigInvalid",
            Self::Io { .. } => "Io",
            Self::CommandFailed { .. } | Self::CommandExecution { .. } => "CommandFailed",
            Self::Json(_) | Self::TomlParse(_) | Self::TomlSerialize(_) => "Serialization",
            Self::Internal(_) => "Internal",
            Self::User(_) => "User",
            Self::StageFailed { .. } => unreachable!("root() never returns a stage wrapper"),
        }
    }

    /// Process exit code for this error
    pub fn exit_code(&self) -> u8 {
        match self.root() {
            Self::MalformedLockFile { .. } => 10,
            Self::DuplicatePackage { .. } => 11,
            Self::ToolchainUnavailable { .. } => 12,
            Self::IntegrityViolation { .. } => 13,
            Self::NetworkFetchFailed { .. } => 14,
            Self::SourceCopyFailed { .. } => 15,
            Self::EntryPointNotFound { .. } => 16,
            Self::BindAddressInUse { .. } => 17,
            Self::ConfigInvalid { .. } | Self::ConfigDirCreate { .. } => 2,
            _ => 1,
        }
    }

    /// Check if an external orchestrator may re-run the failing stage
    pub fn is_retryable(&self) -> bool {
        matches!(self.root(), Self::NetworkFetchFailed { .. })
    }

    /// Get actionable hint for the error
    pub fn hint(&self) -> Option<&'static str> {
        match self.root() {
            Self::IntegrityViolation { .. } => {
                Some("The artifact or the lock file has been tampered with; regenerate the lock file")
            }
            Self::NetworkFetchFailed { .. } => {
                Some("Check dependencies.index_url and re-run the build")
            }
            Self::BindAddressInUse { .. } => {
                Some("Stop the other listener or change service.port and image.expose")
            }
            Self::EntryPointNotFound { .. } => Some("Check service.entry (format: module:object)"),
            Self::ToolchainUnavailable { .. } => {
                Some("Install the component or set toolchain.install_command")
            }
            _ => None,
        }
    }
}
