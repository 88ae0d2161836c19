//! Error types for the claim path and collaborator seams

/// Error type for claim operations
///
/// Callers branch on the variant (or its stable `code()`); only `Internal`
/// carries an underlying cause.
#[derive(Debug, thiserror::Error)]
pub enum ClaimError {
    #[error("no achievement progress {0} for this user")]
    NotFound(i64),

    #[error("achievement progress {0} is not unlocked yet")]
    NotUnlocked(i64),

    #[error("achievement progress {0} was already claimed")]
    AlreadyClaimed(i64),

    #[error("invalid claim request: {0}")]
    Validation(String),

    #[error("claim failed: {0}")]
    Internal(#[from] anyhow::Error),
}

impl ClaimError {
    /// Stable machine-readable code for API surfaces and bulk results
    pub fn code(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "NOT_FOUND",
            Self::NotUnlocked(_) => "NOT_UNLOCKED",
            Self::AlreadyClaimed(_) => "ALREADY_CLAIMED",
            Self::Validation(_) => "VALIDATION",
            Self::Internal(_) => "INTERNAL",
        }
    }
}

impl From<rusqlite::Error> for ClaimError {
    fn from(err: rusqlite::Error) -> Self {
        Self::Internal(err.into())
    }
}

impl From<LedgerError> for ClaimError {
    fn from(err: LedgerError) -> Self {
        Self::Internal(err.into())
    }
}

/// Error type for the points ledger seam
#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    #[error("award rejected: {0}")]
    Rejected(String),

    #[error("ledger storage error: {0}")]
    Storage(#[from] rusqlite::Error),
}
