//! Change Notification Tests
//!
//! Sequence tracking across transactions and connections:
//! - Aborted transactions leave no trace
//! - Observers drain independently
//! - Callbacks fire once until the observer drains
//! - Commits on one connection reach the others as external changes

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use aerorev::config::VersioningConfig;
use aerorev::document::{DocumentFactory, PutRequest};
use aerorev::storage::DataFile;

fn open(file: &Arc<DataFile>) -> DocumentFactory {
    DocumentFactory::open(Arc::clone(file), VersioningConfig::default()).unwrap()
}

fn create(factory: &DocumentFactory, doc_id: &str) {
    let mut doc = factory.new_document(doc_id);
    let mut tx = factory.begin_transaction().unwrap();
    doc.put_new_revision(&PutRequest::new_revision(doc_id, b"{}".to_vec(), None), &mut tx)
        .unwrap();
    tx.commit().unwrap();
}

fn last_sequence(factory: &DocumentFactory) -> u64 {
    factory.tracker().use_locked(|t| t.last_sequence())
}

// =============================================================================
// Transactions
// =============================================================================

#[test]
fn test_abort_leaves_sequence_unchanged() {
    let factory = open(&DataFile::in_memory());
    let observer = factory.observe_collection(None, None);
    create(&factory, "a");
    assert_eq!(last_sequence(&factory), 1);

    {
        let mut doc = factory.new_document("b");
        let mut tx = factory.begin_transaction().unwrap();
        doc.put_new_revision(&PutRequest::new_revision("b", b"{}".to_vec(), None), &mut tx)
            .unwrap();
        assert_eq!(last_sequence(&factory), 2);
        tx.abort();
    }

    assert_eq!(last_sequence(&factory), 1);
    assert!(factory.context().data_file().store().get("b").unwrap().is_none());
    let (changes, _) = observer.read_changes(10);
    assert!(changes.iter().all(|c| c.doc_id == "a"));
}

#[test]
fn test_uncommitted_changes_are_invisible() {
    let factory = open(&DataFile::in_memory());
    let observer = factory.observe_collection(None, None);

    let mut doc = factory.new_document("a");
    let mut tx = factory.begin_transaction().unwrap();
    doc.put_new_revision(&PutRequest::new_revision("a", b"{}".to_vec(), None), &mut tx)
        .unwrap();
    assert!(!observer.has_changes());
    tx.commit().unwrap();

    assert!(observer.has_changes());
    let (changes, external) = observer.read_changes(10);
    assert!(!external);
    assert_eq!(changes.len(), 1);
    assert_eq!(changes[0].sequence, 1);
    assert_eq!(changes[0].rev_id, doc.rev_id().unwrap().expanded());
}

#[test]
fn test_nested_transaction_on_one_connection_fails() {
    let factory = open(&DataFile::in_memory());
    let tx = factory.begin_transaction().unwrap();
    let err = factory.begin_transaction().err().unwrap();
    assert_eq!(err.code(), "AERO_STORAGE_TRANSACTION_OPEN");
    tx.abort();

    create(&factory, "a");
    assert_eq!(last_sequence(&factory), 1);
}

#[test]
fn test_second_connection_waits_for_first() {
    let file = DataFile::in_memory();
    let first = open(&file);
    let second = open(&file);
    let tx = first.begin_transaction().unwrap();

    std::thread::scope(|scope| {
        let waiter = scope.spawn(|| create(&second, "b"));
        tx.commit().unwrap();
        waiter.join().unwrap();
    });
    assert!(second.load_document("b").unwrap().exists());
}

// =============================================================================
// Observers
// =============================================================================

#[test]
fn test_observers_drain_independently() {
    let factory = open(&DataFile::in_memory());
    let first = factory.observe_collection(None, None);
    let second = factory.observe_collection(None, None);
    create(&factory, "a");
    create(&factory, "b");

    let (all, _) = first.read_changes(10);
    assert_eq!(all.iter().map(|c| c.doc_id.as_str()).collect::<Vec<_>>(), ["a", "b"]);
    assert!(first.read_changes(10).0.is_empty());

    let (one, _) = second.read_changes(1);
    assert_eq!(one[0].doc_id, "a");
    let (rest, _) = second.read_changes(10);
    assert_eq!(rest[0].doc_id, "b");
    assert!(!second.has_changes());
}

#[test]
fn test_observer_since_skips_older_changes() {
    let factory = open(&DataFile::in_memory());
    let _keep = factory.observe_collection(None, None);
    create(&factory, "a");
    create(&factory, "b");
    create(&factory, "c");

    let observer = factory.observe_collection(Some(1), None);
    let (changes, _) = observer.read_changes(10);
    assert_eq!(changes.iter().map(|c| c.sequence).collect::<Vec<_>>(), [2, 3]);
}

#[test]
fn test_callback_fires_once_until_drained() {
    let factory = open(&DataFile::in_memory());
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&calls);
    let observer = factory.observe_collection(
        None,
        Some(Box::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        })),
    );

    create(&factory, "a");
    create(&factory, "b");
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    while !observer.read_changes(10).0.is_empty() {}
    create(&factory, "c");
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[test]
fn test_document_observer_sees_only_its_document() {
    let factory = open(&DataFile::in_memory());
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    let _observer = factory.observe_document(
        "b",
        Box::new(move |doc_id, sequence| {
            sink.lock().unwrap().push((doc_id.to_string(), sequence));
        }),
    );

    create(&factory, "a");
    create(&factory, "b");
    assert_eq!(*seen.lock().unwrap(), vec![("b".to_string(), 2)]);
}

#[test]
fn test_dropped_document_observer_stops() {
    let factory = open(&DataFile::in_memory());
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&calls);
    let observer = factory.observe_document(
        "a",
        Box::new(move |_, _| {
            counter.fetch_add(1, Ordering::SeqCst);
        }),
    );
    drop(observer);
    create(&factory, "a");
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

// =============================================================================
// External changes
// =============================================================================

#[test]
fn test_commits_reach_other_connections() {
    let file = DataFile::in_memory();
    let writer = open(&file);
    let reader = open(&file);
    let observer = reader.observe_collection(None, None);

    create(&writer, "a");

    let (changes, external) = observer.read_changes(10);
    assert!(external);
    assert_eq!(changes.len(), 1);
    assert_eq!(changes[0].doc_id, "a");
    assert_eq!(last_sequence(&reader), 1);

    let loaded = reader.load_document("a").unwrap();
    assert!(loaded.exists());
}

#[test]
fn test_internal_and_external_batches_are_separate() {
    let file = DataFile::in_memory();
    let writer = open(&file);
    let reader = open(&file);
    let observer = reader.observe_collection(None, None);

    create(&writer, "a");
    create(&reader, "b");

    let (first, external) = observer.read_changes(10);
    assert!(external);
    assert_eq!(first.len(), 1);
    let (second, external) = observer.read_changes(10);
    assert!(!external);
    assert_eq!(second[0].doc_id, "b");
    assert_eq!(second[0].sequence, 2);
}

#[test]
fn test_purge_is_observed() {
    let factory = open(&DataFile::in_memory());
    create(&factory, "a");
    let observer = factory.observe_collection(None, None);

    let mut doc = factory.load_document("a").unwrap();
    let rev_id = doc.rev_id().unwrap();
    doc.purge_revision(&rev_id).unwrap();
    let mut tx = factory.begin_transaction().unwrap();
    doc.save(&mut tx).unwrap();
    tx.commit().unwrap();

    let (changes, _) = observer.read_changes(10);
    assert_eq!(changes.len(), 1);
    assert_eq!(changes[0].doc_id, "a");
    assert!(changes[0].is_purge());
}
