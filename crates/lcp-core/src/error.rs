//! Error types for the LCP core

use lcp_types::StatusCode;
use std::path::PathBuf;
use thiserror::Error;

/// Errors that can occur in the LCP core
#[derive(Debug, Error)]
pub enum LcpError {
    #[error("License has no publication link")]
    NoAcquisitionLink,

    #[error("Publication link has type {found:?}, expected {expected:?}")]
    PublicationWrongType { expected: String, found: String },

    #[error("Invalid publication file path: {}", .0.display())]
    InvalidFilePath(PathBuf),

    #[error("Publication corrupted: expected hash {expected}, got {actual}")]
    PublicationCorrupted { expected: String, actual: String },

    #[error("Acquisition was already started")]
    AlreadyStarted,

    #[error("Acquisition was canceled")]
    Canceled,

    #[error("Wrong storage provider rights key format: {0}")]
    StorageKeyFormat(String),

    #[error("Invalid value {value:?} for right {right_id}")]
    InvalidRightValue { right_id: String, value: String },

    #[error("Invalid license: {0}")]
    LicenseFormat(String),

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("Server error: {status} for {url}")]
    ServerError { status: u16, url: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Storage provider is not configured")]
    StorageNotConfigured,

    #[error("License rights do not expose a rights manager")]
    RightsCapabilityDenied,

    #[error("{0}")]
    Fail(String),
}

impl LcpError {
    /// Stable code for this error
    pub fn code(&self) -> StatusCode {
        match self {
            LcpError::NoAcquisitionLink => StatusCode::NoAcquisitionLink,
            LcpError::PublicationWrongType { .. } => StatusCode::PublicationWrongType,
            LcpError::InvalidFilePath(_) => StatusCode::InvalidFilePath,
            LcpError::PublicationCorrupted { .. } => StatusCode::PublicationCorrupted,
            LcpError::AlreadyStarted => StatusCode::AlreadyStarted,
            LcpError::Canceled => StatusCode::Canceled,
            LcpError::StorageKeyFormat(_) => StatusCode::StorageKeyFormat,
            LcpError::InvalidRightValue { .. } => StatusCode::InvalidRightValue,
            LcpError::LicenseFormat(_) => StatusCode::LicenseFormat,
            LcpError::Network(_) | LcpError::ServerError { .. } => StatusCode::Network,
            LcpError::Io(_) => StatusCode::Io,
            LcpError::Database(_) => StatusCode::Database,
            LcpError::Serialization(_) => StatusCode::Serialization,
            LcpError::StorageNotConfigured => StatusCode::StorageNotConfigured,
            LcpError::RightsCapabilityDenied => StatusCode::RightsCapabilityDenied,
            LcpError::Fail(_) => StatusCode::CommonFail,
        }
    }

    /// Misconfiguration of the core rather than a data condition
    pub fn is_integration(&self) -> bool {
        matches!(
            self,
            LcpError::StorageNotConfigured | LcpError::RightsCapabilityDenied
        )
    }
}

/// Result type for core operations
pub type LcpResult<T> = Result<T, LcpError>;

/// Outcome of an operation that produces no value
pub type Status = LcpResult<()>;

/// Code of a status, `Success` for `Ok`
pub fn status_code(status: &Status) -> StatusCode {
    match status {
        Ok(()) => StatusCode::Success,
        Err(e) => e.code(),
    }
}

// Allow converting to String for CLI output
impl From<LcpError> for String {
    fn from(error: LcpError) -> Self {
        error.to_string()
    }
}
