//! Unified error type hierarchy for Super Compactor
//!
//! Provides structured error handling with ConfigError (manifest parsing),
//! BuildError (lpmake process), VerificationError (lpdump), StartRejected
//! (orchestrator guards) and the process-level ResultCode taxonomy.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Manifest loading and parsing errors.
///
/// Every variant belongs to the "parse error" class: nothing is built when one
/// of these is returned.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Manifest not found: {0}")]
    ManifestNotFound(PathBuf),

    #[error("Invalid JSON in manifest: {0}")]
    InvalidJson(#[from] serde_json::Error),

    #[error("Manifest field '{field}' is missing")]
    MissingField { field: String },

    #[error("Manifest field '{field}' is not a valid number: '{value}'")]
    InvalidNumber { field: String, value: String },

    #[error("Invalid path: {0}")]
    InvalidPath(String),

    #[error("No configuration loaded")]
    NotLoaded,

    #[error("Partition index {index} out of range (have {len})")]
    PartitionIndex { index: usize, len: usize },

    #[error("Configuration cannot be edited while a build is running")]
    Busy,

    #[error("IO error during manifest operations: {0}")]
    IoError(#[from] io::Error),
}

impl ConfigError {
    /// True for errors caused by malformed or incomplete manifest content.
    pub fn is_parse_error(&self) -> bool {
        matches!(
            self,
            ConfigError::InvalidJson(_)
                | ConfigError::MissingField { .. }
                | ConfigError::InvalidNumber { .. }
        )
    }
}

/// lpmake process execution errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BuildError {
    #[error("Failed to spawn {program}: {reason}")]
    SpawnFailed { program: String, reason: String },

    #[error("lpmake failed with exit code {0}")]
    ExitedWithCode(i32),

    #[error("lpmake terminated by signal")]
    Terminated,

    #[error("Build cancelled by user")]
    Cancelled,

    #[error("IO error while supervising lpmake: {0}")]
    Io(String),
}

impl BuildError {
    /// Raw exit code reported by the child, when there is one.
    pub fn exit_code(&self) -> Option<i32> {
        match self {
            BuildError::ExitedWithCode(code) => Some(*code),
            _ => None,
        }
    }
}

/// lpdump verification errors. Advisory only: they never downgrade a
/// successful build.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum VerificationError {
    #[error("Super image not found: {0}")]
    ImageNotFound(PathBuf),

    #[error("lpdump not available ({program}): {reason}")]
    DumpToolNotFound { program: String, reason: String },

    #[error("lpdump did not finish within {0} seconds")]
    TimedOut(u64),
}

/// Reasons `BuildOrchestrator::start` refuses to begin a run.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StartRejected {
    #[error("A build is already running")]
    AlreadyRunning,

    #[error("Configuration missing: {0}")]
    ConfigurationMissing(String),

    #[error("Unsaved configuration changes; save before building")]
    UnsavedChanges,
}

/// Process-level outcome taxonomy. Numeric values are the CLI exit codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ResultCode {
    Success = 0,
    InvalidPath = 1,
    ManifestNotFound = 2,
    ParseError = 3,
    MissingPartitions = 4,
    SizeMismatch = 5,
    BuildFailed = 6,
    Cancelled = 7,
    DumpToolNotFound = 8,
    VerificationFailed = 9,
}

impl ResultCode {
    pub fn code(self) -> u8 {
        self as u8
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ResultCode::Success => "SUCCESS",
            ResultCode::InvalidPath => "INVALID_PATH",
            ResultCode::ManifestNotFound => "MANIFEST_NOT_FOUND",
            ResultCode::ParseError => "PARSE_ERROR",
            ResultCode::MissingPartitions => "MISSING_PARTITIONS",
            ResultCode::SizeMismatch => "SIZE_MISMATCH",
            ResultCode::BuildFailed => "BUILD_FAILED",
            ResultCode::Cancelled => "CANCELLED",
            ResultCode::DumpToolNotFound => "DUMP_TOOL_NOT_FOUND",
            ResultCode::VerificationFailed => "VERIFICATION_FAILED",
        }
    }
}

impl std::fmt::Display for ResultCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<&ConfigError> for ResultCode {
    fn from(err: &ConfigError) -> Self {
        match err {
            ConfigError::ManifestNotFound(_) => ResultCode::ManifestNotFound,
            ConfigError::InvalidPath(_) => ResultCode::InvalidPath,
            _ => ResultCode::ParseError,
        }
    }
}

impl From<&BuildError> for ResultCode {
    fn from(err: &BuildError) -> Self {
        match err {
            BuildError::Cancelled => ResultCode::Cancelled,
            _ => ResultCode::BuildFailed,
        }
    }
}

impl From<&VerificationError> for ResultCode {
    fn from(err: &VerificationError) -> Self {
        match err {
            VerificationError::DumpToolNotFound { .. } => ResultCode::DumpToolNotFound,
            _ => ResultCode::VerificationFailed,
        }
    }
}
