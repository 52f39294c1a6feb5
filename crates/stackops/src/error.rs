//! Error types for stack operations

use thiserror::Error;

/// Errors that can occur while orchestrating a deployment run
#[derive(Error, Debug)]
pub enum Error {
    /// Another holder owns the stage lock
    #[error("another update is already in progress for this stage")]
    ConcurrentUpdate,

    /// The backend has no state blob for this stage
    #[error("no remote state exists for this stage")]
    StateNotFound,

    /// A non-create operation was requested against a stage that was never deployed
    #[error("stage not found")]
    StageNotFound,

    /// The engine operation itself reported failure; per-resource detail
    /// is captured in the run result's error list
    #[error("stack run had errors")]
    StackRunFailed,

    /// A URN string did not match the canonical format
    #[error("invalid URN: {0}")]
    InvalidUrn(String),

    /// A type token string did not match `<pkg>:<module>:<Name>`
    #[error("invalid type token: {0}")]
    InvalidTypeToken(String),

    /// Resource adoption input was malformed (e.g. parent not `type::name`)
    #[error("invalid import input: {0}")]
    InvalidImport(String),

    /// Lock/state backend failure
    #[error("backend error: {0}")]
    Backend(String),

    /// Engine workspace setup or invocation failure
    #[error("engine error: {0}")]
    Engine(String),

    /// Program bundling failure
    #[error("build error: {0}")]
    Build(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type for stack operations
pub type Result<T> = std::result::Result<T, Error>;
