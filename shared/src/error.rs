use serde::{Deserialize, Serialize};
use thiserror::Error;

pub type ParkingResult<T> = Result<T, ParkingError>;

/// Everything a core operation can fail with.
///
/// The variants are what callers branch on; `Internal` carries storage and
/// transport faults that no caller can do anything about.
#[derive(Debug, Error)]
pub enum ParkingError {
    #[error("validation failed: {0}")]
    Validation(String),
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("payment rejected: {0}")]
    Payment(String),
    #[error("not authorized: {0}")]
    Authorization(String),
    #[error("reservation expired: {0}")]
    ExpiredReservation(String),
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Validation,
    Conflict,
    NotFound,
    Payment,
    Authorization,
    ExpiredReservation,
    Internal,
}

impl ParkingError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Validation(_) => ErrorKind::Validation,
            Self::Conflict(_) => ErrorKind::Conflict,
            Self::NotFound(_) => ErrorKind::NotFound,
            Self::Payment(_) => ErrorKind::Payment,
            Self::Authorization(_) => ErrorKind::Authorization,
            Self::ExpiredReservation(_) => ErrorKind::ExpiredReservation,
            Self::Internal(_) => ErrorKind::Internal,
        }
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict(_))
    }
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Validation => "validation_error",
            Self::Conflict => "conflict_error",
            Self::NotFound => "not_found_error",
            Self::Payment => "payment_error",
            Self::Authorization => "authorization_error",
            Self::ExpiredReservation => "expired_reservation_error",
            Self::Internal => "internal_error",
        }
    }
}
