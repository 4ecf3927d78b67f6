use std::path::PathBuf;

use crate::registry::DocumentState;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("database error: {0}")]
    Redb(#[from] redb::Error),

    #[error("database storage error: {0}")]
    RedbStorage(#[from] redb::StorageError),

    #[error("database transaction error: {0}")]
    RedbTransaction(#[from] redb::TransactionError),

    #[error("database table error: {0}")]
    RedbTable(#[from] redb::TableError),

    #[error("database commit error: {0}")]
    RedbCommit(#[from] redb::CommitError),

    #[error("database open error: {0}")]
    RedbDatabase(#[from] redb::DatabaseError),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("could not extract text from {filename}: {reason}")]
    Extraction { filename: String, reason: String },

    #[error("embedding backend unavailable: {0}")]
    EmbeddingUnavailable(String),

    #[error("dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("document '{0}' produced no chunks")]
    EmptyDocument(String),

    #[error("{kind} not found: {name}")]
    NotFound { kind: &'static str, name: String },

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("consistency violation: {0}")]
    Consistency(String),

    #[error(
        "incompatible {artifact} version: found {found}, expected {expected}"
    )]
    IncompatibleStateVersion {
        artifact: &'static str,
        found: u32,
        expected: u32,
    },

    #[error("corrupt {artifact}: {reason}")]
    CorruptState {
        artifact: &'static str,
        reason: String,
    },

    #[error("document {id} cannot move from {from} to {to}")]
    InvalidTransition {
        id: String,
        from: DocumentState,
        to: DocumentState,
    },

    #[error("data directory does not exist and could not be created: {0}")]
    DataDir(PathBuf),
}

impl Error {
    /// Whether this error must stop the process at startup rather than be
    /// reported per request.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Error::IncompatibleStateVersion { .. }
                | Error::CorruptState { .. }
                | Error::Config(_)
        )
    }
}
