//! Structured error handling, error-kind taxonomy and exit codes.
//!
//! Every error type in the crate can report an [`ErrorKind`], so callers
//! branch on the category of a failure instead of its message text.

use serde::Serialize;

/// Category of a failure.
///
/// - `IoFailure`: a single file could not be read (recovered locally)
/// - `BackendUnavailable`: a storage backend could not be established
/// - `EncodingAnomaly`: a path could not be represented faithfully as text
/// - `ConfigMalformed`: configuration could not be loaded or validated
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Unreadable, vanished or permission-denied file.
    IoFailure,
    /// Persistent store or attribute store unreachable/unsupported.
    BackendUnavailable,
    /// Non-representable path name.
    EncodingAnomaly,
    /// Missing or invalid configuration.
    ConfigMalformed,
}

impl ErrorKind {
    /// Short machine-readable label.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::IoFailure => "io_failure",
            Self::BackendUnavailable => "backend_unavailable",
            Self::EncodingAnomaly => "encoding_anomaly",
            Self::ConfigMalformed => "config_malformed",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Exit codes for the fileregistry binary.
///
/// - 0: Success (scan completed with no per-file errors)
/// - 1: General error (unexpected failure)
/// - 3: Partial success (scan completed with some per-file errors)
/// - 4: No usable storage backend
/// - 5: Configuration malformed
/// - 130: Interrupted by user (Ctrl+C)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ExitCode {
    /// Success: command completed normally.
    Success = 0,
    /// General error: An unexpected error occurred.
    GeneralError = 1,
    /// Partial success: Scan completed but some files could not be processed.
    PartialSuccess = 3,
    /// Neither the registry nor the attribute store could be used.
    BackendUnavailable = 4,
    /// Configuration could not be loaded or validated.
    ConfigError = 5,
    /// Interrupted: Scan was interrupted by user (Ctrl+C).
    Interrupted = 130,
}

impl ExitCode {
    /// Get the numeric exit code.
    #[must_use]
    pub fn as_i32(self) -> i32 {
        self as i32
    }

    /// Get the machine-readable code prefix.
    #[must_use]
    pub fn code_prefix(self) -> &'static str {
        match self {
            Self::Success => "FR000",
            Self::GeneralError => "FR001",
            Self::PartialSuccess => "FR003",
            Self::BackendUnavailable => "FR004",
            Self::ConfigError => "FR005",
            Self::Interrupted => "FR130",
        }
    }

    /// Map a fatal error kind to the exit code the process should use.
    #[must_use]
    pub fn for_kind(kind: Option<ErrorKind>) -> Self {
        match kind {
            Some(ErrorKind::BackendUnavailable) => Self::BackendUnavailable,
            Some(ErrorKind::ConfigMalformed) => Self::ConfigError,
            _ => Self::GeneralError,
        }
    }
}

/// Find the [`ErrorKind`] of the first error in an `anyhow` chain that has one.
#[must_use]
pub fn kind_of(err: &anyhow::Error) -> Option<ErrorKind> {
    for cause in err.chain() {
        if let Some(e) = cause.downcast_ref::<crate::config::ConfigError>() {
            return Some(e.kind());
        }
        if let Some(e) = cause.downcast_ref::<crate::storage::BackendError>() {
            return Some(e.kind());
        }
        if let Some(e) = cause.downcast_ref::<crate::registry::RegistryError>() {
            return Some(e.kind());
        }
        if let Some(e) = cause.downcast_ref::<crate::scanner::HashError>() {
            return Some(e.kind());
        }
        if let Some(e) = cause.downcast_ref::<crate::scan::OrchestratorError>() {
            return Some(e.kind());
        }
        if let Some(e) = cause.downcast_ref::<crate::cache::CacheError>() {
            return Some(e.kind());
        }
    }
    None
}

/// Structured error information for JSON output.
#[derive(Debug, Serialize)]
pub struct StructuredError {
    /// The error code (e.g., "FR001")
    pub code: String,
    /// The exit code number
    pub exit_code: i32,
    /// Error category, when known
    pub kind: Option<ErrorKind>,
    /// Human-readable error message
    pub message: String,
}

impl StructuredError {
    /// Create a new structured error from an anyhow error and an exit code.
    #[must_use]
    pub fn new(err: &anyhow::Error, exit_code: ExitCode) -> Self {
        Self {
            code: exit_code.code_prefix().to_string(),
            exit_code: exit_code.as_i32(),
            kind: kind_of(err),
            message: format!("{:#}", err),
        }
    }
}
