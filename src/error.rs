//! Crate-level error types for blendref diagnostics.
use std::path::PathBuf;

/// All errors in blendref carry enough context to produce a useful diagnostic
/// without a debugger. Each variant names the document, operation, or reason for failure.
#[allow(clippy::error_impl_error, reason = "crate-level error type re-exported as blendref::Error")]
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The Document Engine reported `success: false` for a requested operation.
    #[error("{operation} failed for {}: {}", document.display(), errors.join("; "))]
    EngineFailure {
        /// Document the operation was applied to.
        document: PathBuf,
        /// Error messages reported by the engine.
        errors: Vec<String>,
        /// Operation name as sent on the wire.
        operation: String,
    },

    /// The Document Engine did not answer within its time budget.
    #[error("{operation} timed out after {seconds}s")]
    EngineTimeout {
        /// Operation name as sent on the wire.
        operation: String,
        /// Timeout that elapsed, in whole seconds.
        seconds: u64,
    },

    /// The Document Engine executable or its operation script cannot be launched.
    #[error("document engine unavailable: {}: {reason}", path.display())]
    EngineUnavailable {
        /// Executable or script path that could not be used.
        path: PathBuf,
        /// Description of the launch failure.
        reason: String,
    },

    /// Underlying I/O error from the filesystem.
    #[error("io: {0}")]
    Io(
        /// The wrapped I/O error.
        #[from]
        std::io::Error,
    ),

    /// JSON (de)serialization failed outside of engine response parsing.
    #[error("json: {0}")]
    Json(
        /// The wrapped JSON error.
        #[from]
        serde_json::Error,
    ),

    /// Engine output could not be parsed as a protocol response.
    #[error("malformed response from {operation}: {reason}")]
    MalformedResponse {
        /// Operation name as sent on the wire.
        operation: String,
        /// Description of what was wrong with the output.
        reason: String,
    },

    /// A move failed and moving the item back to its original location failed too.
    #[error("{original} (rollback failed: {rollback})")]
    RollbackFailed {
        /// The failure that triggered the rollback.
        original: String,
        /// The failure of the rollback itself.
        rollback: String,
    },

    /// One document's reference extraction failed. Never aborts a project-wide scan.
    #[error("scan failed for {}: {reason}", document.display())]
    ScanFailure {
        /// Document whose references could not be read.
        document: PathBuf,
        /// Description of the failure.
        reason: String,
    },

    /// TOML deserialization failed.
    #[error("toml deserialize: {0}")]
    TomlDe(
        /// The wrapped TOML deserialization error.
        #[from]
        toml::de::Error,
    ),

    /// A precondition of the requested operation does not hold.
    #[error("{reason}")]
    Validation {
        /// Human-readable description of the violated precondition.
        reason: String,
    },

    /// A staged copy did not hash to the same digest as its source.
    #[error("copy verification failed: {} -> {}", origin.display(), destination.display())]
    VerificationFailed {
        /// Copy that was written and then discarded.
        destination: PathBuf,
        /// File that was being copied.
        origin: PathBuf,
    },
}

impl Error {
    /// Shorthand for a `Validation` error.
    pub fn validation(reason: impl Into<String>) -> Self {
        return Self::Validation { reason: reason.into() };
    }
}
