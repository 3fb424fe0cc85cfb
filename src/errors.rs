//! Revision Core Errors
//!
//! Unified error handling for revision insertion, conflict resolution and
//! record decoding.
//!
//! Data-dependent outcomes (conflicts, unknown revisions, malformed IDs) are
//! ordinary values. Callers applying a batch of remote revisions are expected
//! to record the failure and continue with the rest of the batch.

use thiserror::Error;

use crate::storage::StorageError;

/// Result type for revision operations
pub type RevResult<T> = Result<T, RevError>;

/// Revision core errors
#[derive(Debug, Error)]
pub enum RevError {
    // ==================
    // Insertion Errors
    // ==================
    /// Insertion rejected by an unresolved ordering conflict or a disallowed branch
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Referenced revision or document is absent
    #[error("Not found: {0}")]
    NotFound(String),

    // ==================
    // Decoding Errors
    // ==================
    /// Malformed revision ID or history
    #[error("Bad revision ID: {0}")]
    BadRevisionId(String),

    /// Stored revision data could not be decoded
    #[error("Corrupt revision data: {0}")]
    CorruptRevisionData(String),

    /// Delta source revision is unknown or has no body
    #[error("Unknown delta base: {0}")]
    DeltaBaseUnknown(String),

    /// Delta could not be applied
    #[error("Corrupt delta: {0}")]
    CorruptDelta(String),

    // ==================
    // Usage Errors
    // ==================
    /// Operation does not apply to this document variant
    #[error("Unsupported operation: {0}")]
    UnsupportedOperation(String),

    /// Invalid argument, e.g. identical winner and loser
    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    /// Invalid configuration
    #[error("Configuration error: {0}")]
    Config(String),

    // ==================
    // Collaborator Errors
    // ==================
    /// Storage engine failure
    #[error(transparent)]
    Storage(#[from] StorageError),
}

impl RevError {
    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::Conflict(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    pub fn bad_revision_id(msg: impl Into<String>) -> Self {
        Self::BadRevisionId(msg.into())
    }

    pub fn corrupt(msg: impl Into<String>) -> Self {
        Self::CorruptRevisionData(msg.into())
    }

    pub fn invalid_parameter(msg: impl Into<String>) -> Self {
        Self::InvalidParameter(msg.into())
    }

    pub fn unsupported(msg: impl Into<String>) -> Self {
        Self::UnsupportedOperation(msg.into())
    }

    /// Stable machine-readable error code
    pub fn code(&self) -> &'static str {
        match self {
            Self::Conflict(_) => "AERO_REV_CONFLICT",
            Self::NotFound(_) => "AERO_REV_NOT_FOUND",
            Self::BadRevisionId(_) => "AERO_REV_BAD_REVISION_ID",
            Self::CorruptRevisionData(_) => "AERO_REV_CORRUPT_REVISION_DATA",
            Self::DeltaBaseUnknown(_) => "AERO_REV_DELTA_BASE_UNKNOWN",
            Self::CorruptDelta(_) => "AERO_REV_CORRUPT_DELTA",
            Self::UnsupportedOperation(_) => "AERO_REV_UNSUPPORTED",
            Self::InvalidParameter(_) => "AERO_REV_INVALID_PARAMETER",
            Self::Config(_) => "AERO_REV_CONFIG",
            Self::Storage(e) => e.code().code(),
        }
    }

    /// HTTP-style status, as used by revision insertion results
    pub fn status_code(&self) -> u16 {
        match self {
            Self::Conflict(_) => 409,
            Self::NotFound(_) | Self::DeltaBaseUnknown(_) => 404,
            Self::BadRevisionId(_) | Self::InvalidParameter(_) | Self::Config(_) => 400,
            Self::CorruptDelta(_) => 422,
            Self::UnsupportedOperation(_) => 501,
            Self::CorruptRevisionData(_) | Self::Storage(_) => 500,
        }
    }

    /// Whether the error leaves the store in an unusable state
    pub fn is_fatal(&self) -> bool {
        match self {
            Self::Storage(e) => e.is_fatal(),
            _ => false,
        }
    }
}

impl From<serde_json::Error> for RevError {
    fn from(e: serde_json::Error) -> Self {
        Self::CorruptRevisionData(e.to_string())
    }
}
