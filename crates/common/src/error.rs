// Typed error taxonomy shared by the sync server and its callers.

use thiserror::Error;

/// Failures surfaced to callers of the synchronization subsystem.
///
/// CRDT merge anomalies (duplicate ids, orphaned operations) are deliberately
/// absent: they are handled inside the engine and recorded for diagnostics,
/// never raised to the editing user.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SyncError {
    /// The access-control gate rejected the caller for this action.
    #[error("caller lacks permission for this action")]
    Unauthorized,

    /// A request field was missing or malformed.
    #[error("validation failed: {0}")]
    Validation(String),

    /// The referenced file, commit, or collaborator does not exist.
    #[error("{0} not found")]
    NotFound(String),

    /// The target user already holds a role on the file.
    #[error("user is already a collaborator on this file")]
    AlreadyCollaborator,

    /// The supplied role is outside the defined set.
    #[error("invalid role: {0}")]
    InvalidRole(String),

    /// A storage or infrastructure failure; not part of the domain taxonomy
    /// but carried so callers see a typed error instead of a panic.
    #[error("internal error: {0}")]
    Internal(String),
}

impl SyncError {
    /// Stable machine-readable code for the wire error envelope.
    pub const fn code(&self) -> &'static str {
        match self {
            Self::Unauthorized => "UNAUTHORIZED",
            Self::Validation(_) => "VALIDATION_ERROR",
            Self::NotFound(_) => "NOT_FOUND",
            Self::AlreadyCollaborator => "ALREADY_COLLABORATOR",
            Self::InvalidRole(_) => "INVALID_ROLE",
            Self::Internal(_) => "INTERNAL_ERROR",
        }
    }

    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound(what.into())
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    pub fn internal(message: impl ToString) -> Self {
        Self::Internal(message.to_string())
    }
}
