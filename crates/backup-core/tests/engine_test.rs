//! Black-box round trips through the public `Engine` API: backup an
//! in-memory collection to a fake object store, then restore it back out,
//! without reaching into any module-private state.

use backup_core::fake_sink::FakeSink;
use backup_core::fake_source::FakeSource;
use backup_core::{Coll, Engine, RocksStatusStore};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

fn frame(payload: &[u8]) -> Vec<u8> {
    let len = (payload.len() + 4) as u32;
    let mut buf = len.to_le_bytes().to_vec();
    buf.extend_from_slice(payload);
    buf
}

#[tokio::test]
async fn backup_then_restore_round_trips_documents() {
    let coll = Coll::new("db1", "c1");
    let docs = vec![frame(b"one"), frame(b"two"), frame(b"three")];

    let source = Arc::new(FakeSource::with_docs("db1", "c1", docs.clone()));
    let sink = Arc::new(FakeSink::default());
    let engine = Engine::new(source.clone(), sink.clone(), "/backups");

    let status_dir = tempdir::TempDir::new("engine-it").unwrap();
    let status = RocksStatusStore::open(status_dir.path().join("state.db")).unwrap();

    let cancel = CancellationToken::new();
    engine
        .backup(&cancel, &[coll.clone()], &status)
        .await
        .expect("backup should succeed");

    // Find whichever timestamp directory the run produced and restore from it.
    let path = sink.objects.lock().unwrap().keys().next().unwrap().clone();
    let timestamp = path
        .strip_prefix("/backups/")
        .unwrap()
        .split('/')
        .next()
        .unwrap()
        .to_string();

    // Clearing the fake source's collection simulates restoring into an
    // empty target, the way a real restore always starts with `remove_all`.
    source
        .collections
        .lock()
        .unwrap()
        .insert(("db1".to_string(), "c1".to_string()), Vec::new());

    engine
        .restore(&cancel, &timestamp, &[coll.clone()])
        .await
        .expect("restore should succeed");

    let restored = source
        .collections
        .lock()
        .unwrap()
        .get(&("db1".to_string(), "c1".to_string()))
        .cloned()
        .unwrap();
    assert_eq!(restored, docs);
}

#[tokio::test]
async fn restore_of_nonexistent_artifact_fails_and_leaves_status_untouched() {
    let coll = Coll::new("db1", "missing");
    let source = Arc::new(FakeSource::default());
    let sink = Arc::new(FakeSink::default());
    let engine = Engine::new(source, sink, "/backups");

    let cancel = CancellationToken::new();
    let err = engine
        .restore(&cancel, "2023-01-01T00-00-00", &[coll])
        .await
        .unwrap_err();
    assert!(err.to_string().contains("no such object"));
}
