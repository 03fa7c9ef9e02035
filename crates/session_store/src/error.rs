use std::path::PathBuf;

use thiserror::Error;

/// Failures while creating, validating, appending to, or replaying a
/// transcript. Line numbers are 1-based.
#[derive(Debug, Error)]
pub enum SessionStoreError {
    #[error("I/O error while {operation} at {path}: {source}")]
    Io {
        operation: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{path}:{line}: read failed: {source}")]
    ReadLine {
        path: PathBuf,
        line: usize,
        #[source]
        source: std::io::Error,
    },

    #[error("{path}:{line}: invalid JSON record: {source}")]
    Json {
        path: PathBuf,
        line: usize,
        #[source]
        source: serde_json::Error,
    },

    #[error("{path} is empty; expected a session header line")]
    MissingHeader { path: PathBuf },

    #[error("{path}:{line}: expected a session header record")]
    NotAHeader { path: PathBuf, line: usize },

    #[error("{path}:{line}: expected an entry record")]
    NotAnEntry { path: PathBuf, line: usize },

    #[error("{path}:{line}: unknown record type '{found}'")]
    UnknownRecordType {
        path: PathBuf,
        line: usize,
        found: String,
    },

    #[error("{path}:{line}: unsupported session version {found}; expected 1")]
    UnsupportedVersion {
        path: PathBuf,
        line: usize,
        found: u32,
    },

    #[error("{path}:{line}: duplicate entry id '{id}'")]
    DuplicateEntryId {
        path: PathBuf,
        line: usize,
        id: String,
    },

    #[error("{path}:{line}: entry '{entry_id}' points at unknown parent '{parent_id}'")]
    DanglingParent {
        path: PathBuf,
        line: usize,
        entry_id: String,
        parent_id: String,
    },

    #[error("{path}:{line}: field '{field}' is not an RFC3339 timestamp: {value}")]
    InvalidTimestamp {
        path: PathBuf,
        line: usize,
        field: &'static str,
        value: String,
    },

    #[error("{path}: session cwd must be absolute, got {cwd}")]
    RelativeCwd { path: PathBuf, cwd: String },

    #[error("no session files found under {root}")]
    NoSessions { root: PathBuf },

    #[error("{path}: cannot replay unknown leaf '{leaf_id}'")]
    UnknownLeaf { path: PathBuf, leaf_id: String },

    #[error("{path}: parent chain from leaf '{leaf_id}' loops")]
    ReplayCycle { path: PathBuf, leaf_id: String },

    #[error("{path}: failed to serialize record: {source}")]
    Serialize {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("failed to format current UTC timestamp as RFC3339: {0}")]
    Clock(#[source] time::error::Format),
}

impl SessionStoreError {
    #[must_use]
    pub fn io(operation: &'static str, path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            operation,
            path: path.into(),
            source,
        }
    }
}
