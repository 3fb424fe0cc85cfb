//! Document factory
//!
//! - Opens a connection on a `DataFile` with a `VersioningConfig`
//! - Creates and loads documents of the configured model
//! - Reads document metadata straight from a record
//! - Opens transactions and observer handles for this connection

use std::sync::Arc;

use super::context::DocumentContext;
use super::tree_document::TreeDocument;
use super::vector_document::VectorDocument;
use super::Document;
use crate::clock::HybridClock;
use crate::config::{Versioning, VersioningConfig};
use crate::errors::{RevError, RevResult};
use crate::revid::{RevId, SourceId};
use crate::sequence::{
    AccessLock, ChangeCallback, CollectionObserver, DocChangeCallback, DocumentObserver, SequenceTracker,
    SharedTracker,
};
use crate::storage::{DataFile, DocumentFlags, EnumerateOptions, Record, Sequence, Transaction};

/// Summary of a stored document, read without decoding its revisions
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentMeta {
    pub doc_id: String,
    pub rev_id: Option<RevId>,
    pub flags: DocumentFlags,
    pub sequence: Sequence,
}

/// One connection's view of a collection.
///
/// Creates and loads documents of the collection's configured model, and
/// owns the connection's sequence tracker.
pub struct DocumentFactory {
    ctx: Arc<DocumentContext>,
}

impl DocumentFactory {
    pub fn open(file: Arc<DataFile>, config: VersioningConfig) -> RevResult<Self> {
        let clock = HybridClock::new(config.max_clock_skew_secs);
        Self::with_clock(file, config, clock)
    }

    /// Open with an explicit clock
    pub fn with_clock(file: Arc<DataFile>, config: VersioningConfig, clock: HybridClock) -> RevResult<Self> {
        config.validate()?;
        let tracker: Arc<SharedTracker> = Arc::new(AccessLock::new(SequenceTracker::with_metrics(
            config.min_changes_to_keep,
            Arc::clone(file.metrics()),
        )));
        let last_sequence = file.store().last_sequence();
        tracker.use_locked(|t| t.set_last_sequence(last_sequence));
        file.register_tracker(&tracker);
        Ok(Self {
            ctx: Arc::new(DocumentContext::new(file, config, clock, tracker)),
        })
    }

    #[inline]
    pub fn context(&self) -> &Arc<DocumentContext> {
        &self.ctx
    }

    pub fn versioning(&self) -> Versioning {
        self.ctx.config().versioning
    }

    // ==================
    // Documents
    // ==================

    /// An empty, unsaved document
    pub fn new_document(&self, doc_id: impl Into<String>) -> Document {
        let ctx = Arc::clone(&self.ctx);
        match self.versioning() {
            Versioning::RevisionTrees => Document::Tree(TreeDocument::new(ctx, doc_id)),
            Versioning::VersionVectors => Document::Vector(VectorDocument::new(ctx, doc_id)),
        }
    }

    /// Load a document, or a new empty one if it is not stored
    pub fn load_document(&self, doc_id: &str) -> RevResult<Document> {
        match self.ctx.data_file().store().get(doc_id)? {
            Some(record) => self.document_from_record(&record),
            None => Ok(self.new_document(doc_id)),
        }
    }

    pub fn load_document_by_sequence(&self, sequence: Sequence) -> RevResult<Option<Document>> {
        self.ctx
            .data_file()
            .store()
            .get_by_sequence(sequence)?
            .map(|record| self.document_from_record(&record))
            .transpose()
    }

    /// Decode a stored record. Records written by the other revision model
    /// are rejected.
    pub fn document_from_record(&self, record: &Record) -> RevResult<Document> {
        let ctx = Arc::clone(&self.ctx);
        let is_vector = record.version.first() == Some(&0);
        match self.versioning() {
            _ if record.version.is_empty() => Ok(self.new_document(record.key.clone())),
            Versioning::RevisionTrees if !is_vector => Ok(Document::Tree(TreeDocument::from_record(ctx, record)?)),
            Versioning::VersionVectors if is_vector => {
                Ok(Document::Vector(VectorDocument::from_record(ctx, record)?))
            }
            versioning => Err(RevError::unsupported(format!(
                "record {} was not written with {}",
                record.key,
                versioning.as_str()
            ))),
        }
    }

    pub fn read_doc_meta(&self, record: &Record) -> RevResult<DocumentMeta> {
        let rev_id = if record.version.is_empty() {
            None
        } else {
            Some(RevId::from_binary(&record.version)?)
        };
        Ok(DocumentMeta {
            doc_id: record.key.clone(),
            rev_id,
            flags: record.flags,
            sequence: record.sequence,
        })
    }

    /// IDs of stored documents that reference attachments, for blob sweeps
    pub fn documents_with_attachments(&self) -> RevResult<Vec<String>> {
        let options = EnumerateOptions {
            include_deleted: true,
            only_attachments: true,
            ..EnumerateOptions::default()
        };
        let records = self.ctx.data_file().store().enumerate(&options)?;
        Ok(records.into_iter().map(|r| r.key).collect())
    }

    // ==================
    // Local identity
    // ==================

    /// The local peer's ID, generating it on first use. Until this is called
    /// version vectors name the local peer `*`.
    pub fn resolve_local_identity(&self) -> SourceId {
        self.ctx.resolve_local_source()
    }

    pub fn local_identity(&self) -> Option<SourceId> {
        self.ctx.local_source()
    }

    // ==================
    // Transactions and observers
    // ==================

    pub fn begin_transaction(&self) -> RevResult<Transaction<'_>> {
        self.ctx
            .data_file()
            .begin_transaction(Arc::clone(self.ctx.tracker()))
    }

    #[inline]
    pub fn tracker(&self) -> &Arc<SharedTracker> {
        self.ctx.tracker()
    }

    pub fn observe_collection(&self, since: Option<Sequence>, callback: Option<ChangeCallback>) -> CollectionObserver {
        CollectionObserver::new(Arc::clone(self.ctx.tracker()), since, callback)
    }

    pub fn observe_document(&self, doc_id: &str, callback: DocChangeCallback) -> DocumentObserver {
        DocumentObserver::new(Arc::clone(self.ctx.tracker()), doc_id, callback)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::PutRequest;

    #[test]
    fn test_documents_follow_configured_model() {
        let file = DataFile::in_memory();
        let trees = DocumentFactory::open(Arc::clone(&file), VersioningConfig::default()).unwrap();
        let vectors = DocumentFactory::open(file, VersioningConfig::version_vectors()).unwrap();
        assert!(trees.new_document("a").is_tree());
        assert!(!vectors.new_document("a").is_tree());
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let config = VersioningConfig {
            max_rev_tree_depth: 0,
            ..VersioningConfig::default()
        };
        assert!(DocumentFactory::open(DataFile::in_memory(), config).is_err());
    }

    #[test]
    fn test_loading_other_model_is_unsupported() {
        let file = DataFile::in_memory();
        let trees = DocumentFactory::open(Arc::clone(&file), VersioningConfig::default()).unwrap();
        let mut doc = trees.new_document("doc");
        let mut tx = trees.begin_transaction().unwrap();
        doc.put_new_revision(&PutRequest::new_revision("doc", b"{}".to_vec(), None), &mut tx)
            .unwrap();
        tx.commit().unwrap();

        let vectors = DocumentFactory::open(file, VersioningConfig::version_vectors()).unwrap();
        let err = vectors.load_document("doc").err().unwrap();
        assert_eq!(err.code(), "AERO_REV_UNSUPPORTED");
    }

    #[test]
    fn test_read_doc_meta() {
        let factory = DocumentFactory::open(DataFile::in_memory(), VersioningConfig::default()).unwrap();
        let mut doc = factory.new_document("doc");
        let mut tx = factory.begin_transaction().unwrap();
        doc.put_new_revision(
            &PutRequest::new_revision("doc", b"{}".to_vec(), None).with_attachments(),
            &mut tx,
        )
        .unwrap();
        tx.commit().unwrap();

        let record = factory.context().data_file().store().get("doc").unwrap().unwrap();
        let meta = factory.read_doc_meta(&record).unwrap();
        assert_eq!(meta.rev_id, doc.rev_id());
        assert_eq!(meta.sequence, 1);
        assert!(meta.flags.contains(DocumentFlags::HAS_ATTACHMENTS));
        assert_eq!(factory.documents_with_attachments().unwrap(), vec!["doc".to_string()]);
    }

    #[test]
    fn test_local_identity_is_stable() {
        let factory = DocumentFactory::open(DataFile::in_memory(), VersioningConfig::version_vectors()).unwrap();
        assert_eq!(factory.local_identity(), None);
        let id = factory.resolve_local_identity();
        assert!(!id.is_me());
        assert_eq!(factory.resolve_local_identity(), id);
        assert_eq!(factory.local_identity(), Some(id));
    }
}
