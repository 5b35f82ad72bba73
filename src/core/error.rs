//! Errors surfaced by ledger operations.

use thiserror::Error;

use crate::domain::RunStatus;

use super::safety::SafetyViolation;

pub type Result<T, E = LedgerError> = std::result::Result<T, E>;

/// Errors that can occur in the ledger
#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    #[error("Invalid run status transition: {from} → {to}")]
    InvalidTransition { from: RunStatus, to: RunStatus },

    #[error("Path escapes project root: {path} (root: {root})")]
    PathEscape { path: String, root: String },

    #[error("Project root must be an absolute path: {root:?}")]
    InvalidProjectRoot { root: String },

    #[error("Path matches artifact denylist: {path}")]
    DeniedPath { path: String },

    #[error("Artifact too large: {actual} > {limit} bytes")]
    ArtifactTooLarge { actual: u64, limit: u64 },

    #[error("{entity} references a missing parent: {detail}")]
    ForeignKeyViolation { entity: &'static str, detail: String },

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Blocking task failed: {0}")]
    Task(#[from] tokio::task::JoinError),

    #[error("Database connection lock poisoned")]
    LockPoisoned,
}

impl LedgerError {
    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        Self::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

impl From<SafetyViolation> for LedgerError {
    fn from(violation: SafetyViolation) -> Self {
        match violation {
            SafetyViolation::PathEscape { path, root } => Self::PathEscape { path, root },
            SafetyViolation::DenylistMatch { path } => Self::DeniedPath { path },
            SafetyViolation::MaxSize { actual, limit } => Self::ArtifactTooLarge { actual, limit },
            SafetyViolation::RelativeRoot { root } => Self::InvalidProjectRoot { root },
        }
    }
}
