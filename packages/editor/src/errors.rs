//! Error types for the reconciliation engine

use crate::op::OpKind;
use thiserror::Error;
use vellum_document::DocumentError;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum RepoError {
    #[error("Document error: {0}")]
    Document(#[from] DocumentError),

    #[error("Version gap: expected {expected}, got {got:?}")]
    VersionGap { expected: u64, got: Option<u64> },

    #[error("Node type mismatch at {path}: node is {existing:?}, op is {incoming:?}")]
    NodeTypeMismatch {
        path: String,
        existing: OpKind,
        incoming: OpKind,
    },

    #[error("Acknowledgement mismatch: expected {expected:?}, got {got}")]
    AckMismatch { expected: Option<String>, got: String },

    #[error("Local op mismatch at {path}: expected {expected}, found {found:?}")]
    OpMismatch {
        path: String,
        expected: String,
        found: Option<String>,
    },

    #[error("Submission of {cmd_id} timed out after {attempts} resends")]
    SubmitTimeout { cmd_id: String, attempts: u32 },

    #[error("Session desynchronized: {0}")]
    Desynced(String),

    #[error("Invalid command: {0}")]
    InvalidCmd(String),

    #[error("Invalid op {op_id}: {reason}")]
    InvalidOp { op_id: String, reason: String },

    #[error("Unknown command: {0}")]
    UnknownCmd(String),

    #[error("Unknown version: {0}")]
    UnknownVersion(u64),

    #[error("Document is showing historical version {0}")]
    HistoricalView(u64),

    #[error("Command {0} is not an undo")]
    NotAnUndo(String),
}

impl RepoError {
    /// Violations after which this replica can no longer be trusted to
    /// converge. The session must be resynchronized out of band.
    pub fn is_integrity(&self) -> bool {
        matches!(
            self,
            RepoError::NodeTypeMismatch { .. }
                | RepoError::AckMismatch { .. }
                | RepoError::OpMismatch { .. }
        )
    }
}

pub type RepoResult<T> = Result<T, RepoError>;
