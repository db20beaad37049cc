use rusqlite::ErrorCode;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DeskError {
    #[error("{entity} '{key}' not found")]
    NotFound { entity: &'static str, key: String },

    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// A concurrent writer held the database past the busy timeout.
    /// Safe to retry.
    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Database error: {0}")]
    Database(rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl DeskError {
    pub fn not_found(entity: &'static str, key: impl ToString) -> Self {
        Self::NotFound {
            entity,
            key: key.to_string(),
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Conflict(_))
    }

    /// Stable lowercase kind name, used by callers that map errors to
    /// status codes.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::NotFound { .. } => "not_found",
            Self::InvalidState(_) => "invalid_state",
            Self::Conflict(_) => "conflict",
            Self::Validation(_) => "validation",
            Self::Database(_) => "database",
            Self::Serialization(_) => "serialization",
            Self::Other(_) => "other",
        }
    }
}

/// Storage errors are classified so integrity violations surface as
/// domain kinds instead of raw SQLite codes.
impl From<rusqlite::Error> for DeskError {
    fn from(err: rusqlite::Error) -> Self {
        match &err {
            rusqlite::Error::QueryReturnedNoRows => Self::NotFound {
                entity: "row",
                key: "query".into(),
            },
            rusqlite::Error::SqliteFailure(code, msg) => {
                let detail = msg.clone().unwrap_or_else(|| code.to_string());
                match code.code {
                    ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked => {
                        Self::Conflict(format!("store busy: {detail}"))
                    }
                    ErrorCode::ConstraintViolation => {
                        if detail.contains("FOREIGN KEY") {
                            Self::NotFound {
                                entity: "reference",
                                key: detail,
                            }
                        } else {
                            Self::Validation(detail)
                        }
                    }
                    _ => Self::Database(err),
                }
            }
            _ => Self::Database(err),
        }
    }
}

pub type DeskResult<T> = Result<T, DeskError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn busy_is_retryable_conflict() {
        let err: DeskError = rusqlite::Error::SqliteFailure(
            rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_BUSY),
            None,
        )
        .into();
        assert!(err.is_retryable());
        assert_eq!(err.kind(), "conflict");
    }

    #[test]
    fn unique_violation_is_validation() {
        let err: DeskError = rusqlite::Error::SqliteFailure(
            rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE),
            Some("UNIQUE constraint failed: dca_agency.code".into()),
        )
        .into();
        assert_eq!(err.kind(), "validation");
        assert!(!err.is_retryable());
    }

    #[test]
    fn missing_row_is_not_found() {
        let err: DeskError = rusqlite::Error::QueryReturnedNoRows.into();
        assert_eq!(err.kind(), "not_found");
    }
}
