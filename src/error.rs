// ⚠️ Error taxonomy
//
// Every library operation returns `PlatformError`. Callers that need to pick an
// HTTP status or an exit code go through `kind()` instead of matching variants.

use crate::loan::LoanStatus;
use serde::Serialize;
use thiserror::Error;

/// Coarse classification used by the HTTP layer and the CLI
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ErrorKind {
    /// Referenced identifier does not exist
    NotFound,
    /// State-transition precondition violated
    Conflict,
    /// Missing or malformed input
    BadRequest,
    /// Storage or serialization failure
    Internal,
}

#[derive(Debug, Error)]
pub enum PlatformError {
    #[error("Loan with ID {id} not found")]
    LoanNotFound { id: String },

    #[error("Profile with ID {id} not found")]
    ProfileNotFound { id: String },

    #[error("Loan {id} is already tokenized")]
    AlreadyTokenized { id: String },

    #[error("Loan {id} is {status}: only ACTIVE loans can be tokenized")]
    NotActive { id: String, status: LoanStatus },

    #[error("Loan {id} already exists")]
    DuplicateLoan { id: String },

    #[error("Loan {id}: {reason}")]
    InvalidTransition { id: String, reason: &'static str },

    #[error("{0}")]
    BadRequest(String),

    #[error("CSV parsing failed: {0}")]
    Csv(#[from] csv::Error),

    #[error("storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("store lock poisoned")]
    LockPoisoned,
}

impl PlatformError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            PlatformError::LoanNotFound { .. } | PlatformError::ProfileNotFound { .. } => {
                ErrorKind::NotFound
            }
            PlatformError::AlreadyTokenized { .. }
            | PlatformError::NotActive { .. }
            | PlatformError::DuplicateLoan { .. }
            | PlatformError::InvalidTransition { .. } => ErrorKind::Conflict,
            PlatformError::BadRequest(_) | PlatformError::Csv(_) => ErrorKind::BadRequest,
            PlatformError::Storage(_)
            | PlatformError::Serialization(_)
            | PlatformError::LockPoisoned => ErrorKind::Internal,
        }
    }

    /// Identifier of the loan or profile this error is about, if any
    pub fn subject(&self) -> Option<&str> {
        match self {
            PlatformError::LoanNotFound { id }
            | PlatformError::ProfileNotFound { id }
            | PlatformError::AlreadyTokenized { id }
            | PlatformError::NotActive { id, .. }
            | PlatformError::DuplicateLoan { id }
            | PlatformError::InvalidTransition { id, .. } => Some(id),
            _ => None,
        }
    }
}

impl<T> From<std::sync::PoisonError<T>> for PlatformError {
    fn from(_: std::sync::PoisonError<T>) -> Self {
        PlatformError::LockPoisoned
    }
}

pub type Result<T> = std::result::Result<T, PlatformError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_classification() {
        let not_found = PlatformError::LoanNotFound { id: "L1".into() };
        let conflict = PlatformError::NotActive {
            id: "L2".into(),
            status: LoanStatus::Expired,
        };
        let bad = PlatformError::BadRequest("No file uploaded".into());

        assert_eq!(not_found.kind(), ErrorKind::NotFound);
        assert_eq!(conflict.kind(), ErrorKind::Conflict);
        assert_eq!(bad.kind(), ErrorKind::BadRequest);
        assert_eq!(PlatformError::LockPoisoned.kind(), ErrorKind::Internal);
    }

    #[test]
    fn test_messages_name_the_loan() {
        let err = PlatformError::AlreadyTokenized { id: "LOAN007".into() };
        assert_eq!(err.to_string(), "Loan LOAN007 is already tokenized");
        assert_eq!(err.subject(), Some("LOAN007"));

        let err = PlatformError::NotActive {
            id: "LOAN005".into(),
            status: LoanStatus::Expired,
        };
        assert_eq!(
            err.to_string(),
            "Loan LOAN005 is EXPIRED: only ACTIVE loans can be tokenized"
        );
    }
}
