//! Conflict Handling Tests
//!
//! Conflicts created by remote revisions and resolved locally, for both
//! revision models, and their persistence across reloads.

use std::sync::Arc;

use aerorev::config::VersioningConfig;
use aerorev::document::{Document, DocumentFactory, PutRequest};
use aerorev::revid::{RemoteId, RevId, SourceId};
use aerorev::storage::{DataFile, DocumentFlags};
use aerorev::version_vector::{VersionOrder, VersionVector};

const PEER_A: &str = "AAECAwQFBgcICQoLDA0ODw";

fn rev(ascii: &str) -> RevId {
    RevId::parse(ascii).unwrap()
}

fn put(factory: &DocumentFactory, doc: &mut Document, rq: PutRequest) -> usize {
    let mut tx = factory.begin_transaction().unwrap();
    let added = doc.put_existing_revision(&rq, &mut tx).unwrap();
    tx.commit().unwrap();
    added
}

fn save(factory: &DocumentFactory, doc: &mut Document) {
    let mut tx = factory.begin_transaction().unwrap();
    doc.save(&mut tx).unwrap();
    tx.commit().unwrap();
}

// =============================================================================
// Revision trees
// =============================================================================

/// Local `1-aa` -> `2-bb`; remote 1 branches `2-cc` off `1-aa`.
fn tree_conflict() -> (DocumentFactory, Document) {
    let factory = DocumentFactory::open(DataFile::in_memory(), VersioningConfig::default()).unwrap();
    let mut doc = factory.new_document("doc");
    put(&factory, &mut doc, PutRequest::existing("doc", b"{\"v\":1}".to_vec(), &["1-aa"], RemoteId::LOCAL));
    put(
        &factory,
        &mut doc,
        PutRequest::existing("doc", b"{\"v\":2}".to_vec(), &["2-bb", "1-aa"], RemoteId::LOCAL),
    );
    put(
        &factory,
        &mut doc,
        PutRequest::existing("doc", b"{\"v\":3}".to_vec(), &["2-cc", "1-aa"], RemoteId::new(1)).allowing_conflict(),
    );
    (factory, doc)
}

#[test]
fn test_remote_branch_is_a_conflict() {
    let (factory, mut doc) = tree_conflict();
    assert!(doc.flags().contains(DocumentFlags::CONFLICTED));
    // The conflicting branch never displaces the local winner
    assert_eq!(doc.rev_id(), Some(rev("2-bb")));

    assert!(doc.select_current_revision());
    assert!(doc.select_next_leaf_revision(false));
    let leaf = doc.selected().unwrap();
    assert_eq!(leaf.rev_id, rev("2-cc"));
    assert!(leaf.is_conflict());
    assert!(!doc.select_next_leaf_revision(false));

    let stored = factory.context().data_file().store().get("doc").unwrap().unwrap();
    assert!(stored.flags.contains(DocumentFlags::CONFLICTED));
}

#[test]
fn test_tree_conflict_resolved_with_merge() {
    let (factory, mut doc) = tree_conflict();
    doc.resolve_conflict(
        &rev("2-bb"),
        &rev("2-cc"),
        Some(b"{\"v\":4}".to_vec()),
        DocumentFlags::NONE,
        true,
    )
    .unwrap();
    save(&factory, &mut doc);

    assert!(!doc.flags().contains(DocumentFlags::CONFLICTED));
    let current = doc.rev_id().unwrap();
    assert_eq!(current.generation(), Some(3));

    let mut reloaded = factory.load_document("doc").unwrap();
    assert_eq!(reloaded.rev_id(), Some(current));
    assert!(reloaded.select_current_revision());
    assert_eq!(reloaded.selected().unwrap().body.as_deref(), Some(&b"{\"v\":4}"[..]));
    assert!(!reloaded.select_revision(&rev("2-cc"), false));
}

#[test]
fn test_tree_loser_kept_as_closed_tombstone() {
    let (factory, mut doc) = tree_conflict();
    doc.resolve_conflict(&rev("2-bb"), &rev("2-cc"), None, DocumentFlags::NONE, false)
        .unwrap();
    save(&factory, &mut doc);

    assert!(!doc.flags().contains(DocumentFlags::CONFLICTED));
    let tree = doc.as_tree().unwrap().tree();
    assert_eq!(tree.len(), 5);
    assert!(tree.revs().any(|r| r.is_closed() && r.is_deleted()));

    assert!(doc.select_current_revision());
    assert_eq!(doc.selected().unwrap().body.as_deref(), Some(&b"{\"v\":2}"[..]));
    assert_eq!(doc.get_revision_history(0, &[]).split(',').nth(1), Some("2-bb"));
}

#[test]
fn test_resolve_rejects_bad_arguments() {
    let (_factory, mut doc) = tree_conflict();
    let same = doc
        .resolve_conflict(&rev("2-bb"), &rev("2-bb"), None, DocumentFlags::NONE, true)
        .unwrap_err();
    assert_eq!(same.code(), "AERO_REV_INVALID_PARAMETER");

    let not_leaf = doc
        .resolve_conflict(&rev("2-bb"), &rev("1-aa"), None, DocumentFlags::NONE, true)
        .unwrap_err();
    assert_eq!(not_leaf.code(), "AERO_REV_CONFLICT");
}

#[test]
fn test_remote_switching_branches_replaces_old_head() {
    let factory = DocumentFactory::open(DataFile::in_memory(), VersioningConfig::default()).unwrap();
    let remote = RemoteId::new(1);
    let mut doc = factory.new_document("doc");
    put(&factory, &mut doc, PutRequest::existing("doc", b"{}".to_vec(), &["1-aa"], RemoteId::LOCAL));
    put(&factory, &mut doc, PutRequest::existing("doc", b"{}".to_vec(), &["2-bb", "1-aa"], remote));
    assert_eq!(doc.remote_ancestor(remote), Some(rev("2-bb")));

    put(
        &factory,
        &mut doc,
        PutRequest::existing("doc", b"{\"v\":3}".to_vec(), &["2-cc", "1-aa"], remote).allowing_conflict(),
    );
    assert_eq!(doc.rev_id(), Some(rev("2-cc")));
    assert_eq!(doc.remote_ancestor(remote), Some(rev("2-cc")));
    assert!(!doc.flags().contains(DocumentFlags::CONFLICTED));
    assert!(!doc.select_revision(&rev("2-bb"), false));
}

// =============================================================================
// Version vectors
// =============================================================================

fn vectors() -> DocumentFactory {
    DocumentFactory::open(DataFile::in_memory(), VersioningConfig::version_vectors()).unwrap()
}

/// Local `*@5`; remote 1 sends the concurrent `PEER_A@5,*@3`.
fn vector_conflict(factory: &DocumentFactory) -> Document {
    let mut doc = factory.new_document("doc");
    put(factory, &mut doc, PutRequest::existing("doc", b"{\"v\":1}".to_vec(), &["*@5"], RemoteId::LOCAL));
    let remote_history = format!("{}@5,*@3", PEER_A);
    let added = put(
        factory,
        &mut doc,
        PutRequest::existing("doc", b"{\"v\":2}".to_vec(), &[remote_history.as_str()], RemoteId::new(1)),
    );
    assert_eq!(added, 1);
    doc
}

fn vector(ascii: &str) -> VersionVector {
    VersionVector::parse(ascii, None).unwrap()
}

#[test]
fn test_vector_conflict_is_kept_beside_local() {
    let factory = vectors();
    let mut doc = vector_conflict(&factory);
    assert!(doc.flags().contains(DocumentFlags::CONFLICTED));
    assert_eq!(doc.rev_id(), Some(rev("*@5")));

    assert!(doc.select_current_revision());
    assert!(doc.select_next_leaf_revision(false));
    let leaf = doc.selected().unwrap();
    assert_eq!(leaf.remote, Some(RemoteId::new(1)));
    assert!(leaf.is_conflict());

    let reloaded = factory.load_document("doc").unwrap();
    assert!(reloaded.flags().contains(DocumentFlags::CONFLICTED));
    let remote = reloaded.as_vector().unwrap().remote_vector(RemoteId::new(1)).unwrap();
    assert_eq!(*remote, vector(&format!("{}@5,*@3", PEER_A)));
}

#[test]
fn test_vector_resolve_local_wins_with_merge() {
    let factory = vectors();
    let mut doc = vector_conflict(&factory);
    let remote_rev = rev(&format!("{}@5", PEER_A));
    doc.resolve_conflict(&rev("*@5"), &remote_rev, None, DocumentFlags::NONE, false)
        .unwrap();
    save(&factory, &mut doc);

    assert!(!doc.flags().contains(DocumentFlags::CONFLICTED));
    let vector_doc = doc.as_vector().unwrap();
    let merged = vector_doc.current_vector().unwrap();
    let remote = vector_doc.remote_vector(RemoteId::new(1)).unwrap();
    assert_eq!(merged.compare(&vector("*@5")), VersionOrder::Newer);
    assert_eq!(merged.compare(remote), VersionOrder::Newer);
    let peer = SourceId::parse(PEER_A).unwrap();
    assert_eq!(merged.time_of(peer), remote.time_of(peer));

    doc.select_current_revision();
    assert_eq!(doc.selected().unwrap().body.as_deref(), Some(&b"{\"v\":1}"[..]));
}

#[test]
fn test_vector_resolve_adopts_remote_when_local_loses() {
    let factory = vectors();
    let mut doc = vector_conflict(&factory);
    let remote_rev = rev(&format!("{}@5", PEER_A));
    doc.resolve_conflict(&remote_rev, &rev("*@5"), None, DocumentFlags::NONE, false)
        .unwrap();

    let vector_doc = doc.as_vector().unwrap();
    assert_eq!(*vector_doc.current_vector().unwrap(), vector(&format!("{}@5,*@3", PEER_A)));
    assert_eq!(doc.rev_id(), Some(remote_rev));
    assert!(!doc.flags().contains(DocumentFlags::CONFLICTED));
}

#[test]
fn test_vector_resolve_rejects_same_revision() {
    let factory = vectors();
    let mut doc = vector_conflict(&factory);
    let err = doc
        .resolve_conflict(&rev("*@5"), &rev("*@5"), None, DocumentFlags::NONE, false)
        .unwrap_err();
    assert_eq!(err.code(), "AERO_REV_INVALID_PARAMETER");
}

#[test]
fn test_older_remote_revision_is_ignored() {
    let factory = vectors();
    let mut doc = factory.new_document("doc");
    put(&factory, &mut doc, PutRequest::existing("doc", b"{}".to_vec(), &["*@5"], RemoteId::LOCAL));
    let sequence = doc.sequence();
    let added = put(&factory, &mut doc, PutRequest::existing("doc", b"{}".to_vec(), &["*@3"], RemoteId::LOCAL));
    assert_eq!(added, 0);
    assert_eq!(doc.sequence(), sequence);
    assert_eq!(doc.rev_id(), Some(rev("*@5")));
}

#[test]
fn test_newer_remote_revision_replaces_local() {
    let factory = vectors();
    let mut doc = factory.new_document("doc");
    put(&factory, &mut doc, PutRequest::existing("doc", b"{}".to_vec(), &["*@5"], RemoteId::LOCAL));
    let newer = format!("{}@2,*@5", PEER_A);
    let added = put(
        &factory,
        &mut doc,
        PutRequest::existing("doc", b"{\"v\":9}".to_vec(), &[newer.as_str()], RemoteId::new(1)),
    );
    assert_eq!(added, 1);
    assert_eq!(doc.rev_id(), Some(rev(&format!("{}@2", PEER_A))));
    assert!(!doc.flags().contains(DocumentFlags::CONFLICTED));
    assert_eq!(doc.remote_ancestor(RemoteId::new(1)), doc.rev_id());
}

#[test]
fn test_connections_share_local_identity() {
    let file = DataFile::in_memory();
    let writer = DocumentFactory::open(Arc::clone(&file), VersioningConfig::version_vectors()).unwrap();
    let reader = DocumentFactory::open(Arc::clone(&file), VersioningConfig::version_vectors()).unwrap();
    let me = writer.resolve_local_identity();
    assert_eq!(reader.local_identity(), Some(me));
    assert_eq!(reader.resolve_local_identity(), me);

    let mut doc = writer.new_document("doc");
    let mut tx = writer.begin_transaction().unwrap();
    doc.put_new_revision(&PutRequest::new_revision("doc", b"{}".to_vec(), None), &mut tx)
        .unwrap();
    tx.commit().unwrap();
    doc.select_current_revision();
    let sent = doc.get_revision_history(0, &[]);
    assert!(sent.starts_with(&me.to_ascii()));

    // A peer echoes our own revision back to the other connection
    let mut echoed = reader.load_document("doc").unwrap();
    let added = put(
        &reader,
        &mut echoed,
        PutRequest::existing("doc", b"{}".to_vec(), &[sent.as_str()], RemoteId::new(1)),
    );
    assert_eq!(added, 0);
    assert!(!echoed.flags().contains(DocumentFlags::CONFLICTED));
}
