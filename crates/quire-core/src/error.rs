//! Error types for quire-core.

use std::path::PathBuf;

use thiserror::Error;

use crate::model::{CellId, DocumentId};

/// Result type for quire-core operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in quire-core.
#[derive(Debug, Error)]
pub enum Error {
    /// The engine subprocess could not be spawned.
    #[error("failed to spawn engine '{program}': {message}")]
    Spawn { program: String, message: String },

    /// The engine subprocess exited while a prompt was expected.
    #[error("engine exited unexpectedly")]
    EngineExited,

    /// The engine did not return a prompt within the configured timeout.
    #[error("engine did not answer within {0} ms")]
    EngineTimeout(u64),

    /// Communication with the engine subprocess failed.
    #[error("engine I/O error: {0}")]
    Ipc(String),

    /// The engine was torn down and cannot be used again.
    #[error("engine has been terminated")]
    Terminated,

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Invalid configuration.
    #[error("configuration error in {path}: {message}")]
    Config { path: PathBuf, message: String },

    /// JSON error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Document not found.
    #[error("document not found: {0}")]
    DocumentNotFound(DocumentId),

    /// Cell not found.
    #[error("cell not found: {0}")]
    CellNotFound(CellId),

    /// Invalid operation (e.g., moving a cell past the end).
    #[error("invalid operation: {0}")]
    InvalidOperation(String),
}
