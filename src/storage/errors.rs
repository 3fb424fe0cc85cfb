//! Key-store error types
//!
//! Error codes:
//! - AERO_STORAGE_NO_TRANSACTION (ERROR severity)
//! - AERO_STORAGE_TRANSACTION_OPEN (ERROR severity)
//! - AERO_DATA_CORRUPTION (FATAL severity)

use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    /// The call fails, the store stays usable
    Error,
    /// The store must be closed
    Fatal,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Severity::Error => "ERROR",
            Severity::Fatal => "FATAL",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageErrorCode {
    /// Mutation or commit without an open transaction
    NoTransaction,
    /// A second transaction was started on the same store
    TransactionOpen,
    /// The store's indexes disagree with its records
    DataCorruption,
}

impl StorageErrorCode {
    pub fn code(&self) -> &'static str {
        match self {
            StorageErrorCode::NoTransaction => "AERO_STORAGE_NO_TRANSACTION",
            StorageErrorCode::TransactionOpen => "AERO_STORAGE_TRANSACTION_OPEN",
            StorageErrorCode::DataCorruption => "AERO_DATA_CORRUPTION",
        }
    }

    pub fn severity(&self) -> Severity {
        match self {
            StorageErrorCode::DataCorruption => Severity::Fatal,
            _ => Severity::Error,
        }
    }
}

/// Failure reported by a `KeyStore`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageError {
    code: StorageErrorCode,
    message: String,
    /// Record key the failure concerns, if any
    key: Option<String>,
}

impl StorageError {
    fn new(code: StorageErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            key: None,
        }
    }

    pub fn no_transaction(operation: &str) -> Self {
        Self::new(
            StorageErrorCode::NoTransaction,
            format!("{} requires an open transaction", operation),
        )
    }

    pub fn transaction_open() -> Self {
        Self::new(
            StorageErrorCode::TransactionOpen,
            "a transaction is already open on this store",
        )
    }

    /// The record stored under `key` contradicts the store's indexes (FATAL)
    pub fn data_corruption(key: &str, reason: impl Into<String>) -> Self {
        Self {
            key: Some(key.to_string()),
            ..Self::new(StorageErrorCode::DataCorruption, reason)
        }
    }

    #[inline]
    pub fn code(&self) -> StorageErrorCode {
        self.code
    }

    pub fn severity(&self) -> Severity {
        self.code.severity()
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn key(&self) -> Option<&str> {
        self.key.as_deref()
    }

    pub fn is_fatal(&self) -> bool {
        self.severity() == Severity::Fatal
    }
}

impl fmt::Display for StorageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}: {}", self.severity(), self.code.code(), self.message)?;
        if let Some(key) = &self.key {
            write!(f, " (key: {})", key)?;
        }
        Ok(())
    }
}

impl std::error::Error for StorageError {}

pub type StorageResult<T> = Result<T, StorageError>;
