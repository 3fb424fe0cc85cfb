//! Observable revision-core events
//!
//! Every line written through [`Logger`](super::Logger) names one of these.

use std::fmt;

use super::Severity;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    // Configuration
    ConfigLoaded,
    LocalIdentityResolved,

    // Revision insertion
    RevisionInserted,
    RevisionRejected,
    ConflictDetected,
    ConflictResolved,
    BranchSwitch,
    AmbiguousBranchSwitch,

    // Tree maintenance
    RevisionsPruned,
    RevisionPurged,

    // Persistence
    DocumentSaved,
    DocumentSaveConflict,
    RecordCorrupt,

    // Transactions and change tracking
    TransactionCommitted,
    TransactionAborted,
    ExternalChangesReceived,

    // Clock
    ClockTimeRejected,
}

impl Event {
    pub fn as_str(&self) -> &'static str {
        match self {
            Event::ConfigLoaded => "CONFIG_LOADED",
            Event::LocalIdentityResolved => "LOCAL_IDENTITY_RESOLVED",
            Event::RevisionInserted => "REVISION_INSERTED",
            Event::RevisionRejected => "REVISION_REJECTED",
            Event::ConflictDetected => "CONFLICT_DETECTED",
            Event::ConflictResolved => "CONFLICT_RESOLVED",
            Event::BranchSwitch => "BRANCH_SWITCH",
            Event::AmbiguousBranchSwitch => "AMBIGUOUS_BRANCH_SWITCH",
            Event::RevisionsPruned => "REVISIONS_PRUNED",
            Event::RevisionPurged => "REVISION_PURGED",
            Event::DocumentSaved => "DOCUMENT_SAVED",
            Event::DocumentSaveConflict => "DOCUMENT_SAVE_CONFLICT",
            Event::RecordCorrupt => "RECORD_CORRUPT",
            Event::TransactionCommitted => "TRANSACTION_COMMITTED",
            Event::TransactionAborted => "TRANSACTION_ABORTED",
            Event::ExternalChangesReceived => "EXTERNAL_CHANGES_RECEIVED",
            Event::ClockTimeRejected => "CLOCK_TIME_REJECTED",
        }
    }

    /// Severity the event is logged at
    pub fn severity(&self) -> Severity {
        match self {
            Event::RevisionInserted | Event::DocumentSaved | Event::ExternalChangesReceived => {
                Severity::Trace
            }
            Event::AmbiguousBranchSwitch
            | Event::ClockTimeRejected
            | Event::DocumentSaveConflict
            | Event::RevisionRejected => Severity::Warn,
            Event::RecordCorrupt => Severity::Error,
            _ => Severity::Info,
        }
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
