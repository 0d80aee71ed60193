//! Error types for the Strata workspace.
//!
//! Only boundary operations (config, persistence) return errors. Resolution
//! failures are `Option`/`bool` returns and model failures are NaN
//! sentinels; invariant violations panic.

/// Workspace-wide error type.
#[derive(Debug, thiserror::Error)]
pub enum StrataError {
    #[error("invalid config: {reason}")]
    Config { reason: String },

    #[error("persistence I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("snapshot encoding failed: {0}")]
    Snapshot(#[from] serde_json::Error),

    #[error("corrupt snapshot: {reason}")]
    CorruptSnapshot { reason: String },
}

/// Result alias used across the workspace.
pub type StrataResult<T> = Result<T, StrataError>;
