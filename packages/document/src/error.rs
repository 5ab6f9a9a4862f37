//! Error types for the document tree

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum DocumentError {
    #[error("Shape not found: {0}")]
    ShapeNotFound(String),

    #[error("Parent not found: {0}")]
    ParentNotFound(String),

    #[error("Op target not found: {0}")]
    TargetNotFound(String),

    #[error("Shape has no text: {0}")]
    NotText(String),

    #[error("Invalid path: {0}")]
    InvalidPath(String),

    #[error("Moving {shape} under {parent} would create cycle")]
    CycleDetected { shape: String, parent: String },

    #[error("Moving {shape} under {parent} leaves {scope}")]
    OutsideScope {
        shape: String,
        parent: String,
        scope: String,
    },
}

impl DocumentError {
    /// Errors caused by a target that does not exist (yet, or anymore).
    ///
    /// Replayed operations hitting these are skipped rather than failing the
    /// whole batch.
    pub fn is_missing_target(&self) -> bool {
        matches!(
            self,
            DocumentError::ShapeNotFound(_)
                | DocumentError::ParentNotFound(_)
                | DocumentError::TargetNotFound(_)
                | DocumentError::NotText(_)
        )
    }
}
