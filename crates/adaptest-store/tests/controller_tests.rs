//! The async controller running against the reference stores.

use std::sync::Arc;

use adaptest_core::bank::InMemoryItemBank;
use adaptest_core::engine::{AsyncAdaptiveTest, NextStep};
use adaptest_core::error::CatError;
use adaptest_core::model::{ItemParams, TerminationReason};
use adaptest_core::session::{Session, SessionDefaults};
use adaptest_core::traits::{AsyncItemBank, SessionStore};
use adaptest_store::{FileSessionStore, MemorySessionStore};

fn bank() -> Arc<dyn AsyncItemBank> {
    Arc::new(InMemoryItemBank::new(
        (0..20)
            .map(|k| ItemParams::new(format!("q{k:02}"), 1.5, -2.0 + 0.2 * k as f64, 0.2))
            .collect(),
    ))
}

fn defaults() -> SessionDefaults {
    SessionDefaults {
        max_items: 5,
        target_se: 0.05,
        ..SessionDefaults::default()
    }
}

async fn drive(test: &AsyncAdaptiveTest, session_id: &str) -> TerminationReason {
    loop {
        match test.next_item(session_id).await.unwrap() {
            NextStep::Administer(ranked) => {
                let correct = ranked.item.b < 0.3;
                test.submit(session_id, &ranked.item.id, correct)
                    .await
                    .unwrap();
            }
            NextStep::Finished(reason) => return reason,
        }
    }
}

#[tokio::test]
async fn memory_store_full_session() {
    let store = Arc::new(MemorySessionStore::new());
    let test = AsyncAdaptiveTest::new(bank(), store.clone()).with_defaults(defaults());
    test.start(Some("mem-1")).await.unwrap();

    assert_eq!(drive(&test, "mem-1").await, TerminationReason::MaxItemsReached);
    let session = test.session("mem-1").await.unwrap();
    assert_eq!(session.attempt_count(), 5);
    assert!(!session.is_active());

    let stored = store.load("mem-1").await.unwrap().unwrap();
    // start, then next_item and submit per item, then the final stop
    assert_eq!(stored.version, 12);
}

#[tokio::test]
async fn file_store_survives_restart() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(FileSessionStore::open(dir.path()).await.unwrap());
    let test = AsyncAdaptiveTest::new(bank(), store).with_defaults(defaults());
    test.start(Some("disk-1")).await.unwrap();

    let NextStep::Administer(first) = test.next_item("disk-1").await.unwrap() else {
        panic!("expected an item");
    };
    let update = test.submit("disk-1", &first.item.id, true).await.unwrap();

    let reopened = Arc::new(FileSessionStore::open(dir.path()).await.unwrap());
    let test = AsyncAdaptiveTest::new(bank(), reopened).with_defaults(defaults());
    let session = test.session("disk-1").await.unwrap();
    assert_eq!(session.theta(), update.theta);
    assert_eq!(session.history()[0].item.id, first.item.id);

    assert_eq!(drive(&test, "disk-1").await, TerminationReason::MaxItemsReached);
}

#[tokio::test]
async fn truncated_session_file_is_replaced() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("s1.json"), "{ truncated").unwrap();
    let store = Arc::new(FileSessionStore::open(dir.path()).await.unwrap());
    let test = AsyncAdaptiveTest::new(bank(), store.clone()).with_defaults(defaults());

    let NextStep::Administer(first) = test.next_item("s1").await.unwrap() else {
        panic!("expected an item");
    };
    let session = test.session("s1").await.unwrap();
    assert!(session.history().is_empty());
    assert_eq!(session.pending_item(), Some(&first.item));
    assert_eq!(store.load("s1").await.unwrap().unwrap().version, 1);

    test.submit("s1", &first.item.id, true).await.unwrap();
    assert_eq!(drive(&test, "s1").await, TerminationReason::MaxItemsReached);
}

#[tokio::test]
async fn concurrent_writer_is_detected() {
    let store = Arc::new(MemorySessionStore::new());
    let session = Session::builder().session_id("race").build().unwrap();
    store
        .save("race", session.serialize().unwrap(), None)
        .await
        .unwrap();

    let first = store.load("race").await.unwrap().unwrap();
    let second = store.load("race").await.unwrap().unwrap();

    let mut a = Session::deserialize(first.blob).unwrap();
    a.record_attempt(&ItemParams::new("q01", 1.0, 0.0, 0.0), true)
        .unwrap();
    let mut b = Session::deserialize(second.blob).unwrap();
    b.record_attempt(&ItemParams::new("q02", 1.0, 0.5, 0.0), false)
        .unwrap();

    store
        .save("race", a.serialize().unwrap(), Some(first.version))
        .await
        .unwrap();
    let err = store
        .save("race", b.serialize().unwrap(), Some(second.version))
        .await
        .unwrap_err();
    assert!(matches!(err, CatError::VersionConflict { .. }));
    assert!(err.is_retryable());

    let kept = Session::deserialize(store.load("race").await.unwrap().unwrap().blob).unwrap();
    assert_eq!(kept.history()[0].item.id, "q01");
}
