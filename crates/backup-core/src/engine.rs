//! Backup engine: the central coordinator.
//!
//! For each collection, a backup or restore attempt runs two cooperating
//! tasks joined errgroup-style — first failure cancels a child token so the
//! other task unblocks promptly, and both tasks are always awaited to
//! completion before the attempt's result is decided.

use crate::coll::Coll;
use crate::compression::CompressionError;
use crate::framing::{self, FramingError};
use crate::pipe::{download_pipe, upload_pipe};
use crate::sink::{ObjectSink, SinkError};
use crate::source::{CursorSource, Frame, SourceError};
use crate::status::{BackupResult, StatusError, StatusStore};
use chrono::Utc;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Stays safely under the database server's 16 MB per-batch ceiling.
pub const DEFAULT_BATCH_LIMIT: usize = 15_000_000;

/// Minimum spacing enforced between successive restore batches.
pub const DEFAULT_RATE_LIMIT: Duration = Duration::from_millis(250);

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("{0}")]
    Source(#[from] SourceError),
    #[error("{0}")]
    Sink(#[from] SinkError),
    #[error("{0}")]
    Status(#[from] StatusError),
    #[error("{0}")]
    Framing(#[from] FramingError),
    #[error("{0}")]
    Compression(#[from] CompressionError),
    #[error("cursor error: {0}")]
    Cursor(String),
    #[error("task join error: {0}")]
    Join(String),
    #[error("operation canceled")]
    Canceled,
    #[error("dumping failed for {coll}: {source}")]
    DumpFailed {
        coll: Coll,
        #[source]
        source: Box<EngineError>,
    },
}

impl From<tokio::task::JoinError> for EngineError {
    fn from(e: tokio::task::JoinError) -> Self {
        EngineError::Join(e.to_string())
    }
}

/// A token bucket of burst 1: `wait` blocks until `period` has elapsed since
/// the previous call, but never blocks on the first call. Composes with
/// cancellation rather than a bare sleep, so a canceled restore does not
/// linger in a pacing delay.
pub struct RateLimiter {
    period: Duration,
    last: tokio::sync::Mutex<Option<Instant>>,
}

impl RateLimiter {
    pub fn new(period: Duration) -> Self {
        Self {
            period,
            last: tokio::sync::Mutex::new(None),
        }
    }

    pub async fn wait(&self, cancel: &CancellationToken) -> Result<(), EngineError> {
        let mut last = self.last.lock().await;
        if let Some(at) = *last {
            let elapsed = at.elapsed();
            if elapsed < self.period {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return Err(EngineError::Canceled),
                    _ = tokio::time::sleep(self.period - elapsed) => {}
                }
            }
        }
        *last = Some(Instant::now());
        Ok(())
    }
}

fn artifact_path(base_dir: &str, timestamp: &str, coll: &Coll) -> String {
    format!(
        "{}/{}/{}/{}",
        base_dir.trim_end_matches('/'),
        timestamp,
        coll.database,
        coll.artifact_name()
    )
}

/// First-writer-wins error slot shared by a pair of tasks: the first task to
/// report an error wins the slot and cancels the shared child token so its
/// sibling unblocks.
type ErrorSlot = Arc<Mutex<Option<EngineError>>>;

fn record_first_error(slot: &ErrorSlot, cancel: &CancellationToken, err: EngineError) {
    let mut guard = slot.lock().unwrap();
    if guard.is_none() {
        *guard = Some(err);
        cancel.cancel();
    }
}

/// The backup/restore coordinator. Deliberately does not own a status
/// store: restoring never touches one, and keeping it out of the struct
/// means a restore-only caller need not name a `StatusStore` type at all.
pub struct Engine<C, S> {
    source: Arc<C>,
    sink: Arc<S>,
    base_dir: String,
    rate_limiter: Arc<RateLimiter>,
    batch_limit: usize,
}

impl<C, S> Engine<C, S>
where
    C: CursorSource + 'static,
    S: ObjectSink + 'static,
{
    pub fn new(source: Arc<C>, sink: Arc<S>, base_dir: impl Into<String>) -> Self {
        Self {
            source,
            sink,
            base_dir: base_dir.into(),
            rate_limiter: Arc::new(RateLimiter::new(DEFAULT_RATE_LIMIT)),
            batch_limit: DEFAULT_BATCH_LIMIT,
        }
    }

    pub fn with_rate_limit(mut self, period: Duration) -> Self {
        self.rate_limiter = Arc::new(RateLimiter::new(period));
        self
    }

    pub fn with_batch_limit(mut self, batch_limit: usize) -> Self {
        self.batch_limit = batch_limit;
        self
    }

    /// Backs up every collection in `colls`, in order, sharing one timestamp
    /// for the whole batch. Stops at the first failing collection. Every
    /// attempt, successful or not, writes a status record first; a
    /// status-write failure supersedes the backup error it would otherwise
    /// report.
    pub async fn backup<T: StatusStore>(
        &self,
        cancel: &CancellationToken,
        colls: &[Coll],
        status: &T,
    ) -> Result<(), EngineError> {
        let now = Utc::now();
        let timestamp = now.format("%Y-%m-%dT%H-%M-%S").to_string();

        for coll in colls {
            let outcome = self.backup_one(cancel, coll, &timestamp).await;
            let record = BackupResult {
                success: outcome.is_ok(),
                timestamp: now,
                collection: coll.clone(),
            };
            status.save(&record)?;
            if let Err(e) = outcome {
                return Err(EngineError::DumpFailed {
                    coll: coll.clone(),
                    source: Box::new(e),
                });
            }
        }
        Ok(())
    }

    async fn backup_one(
        &self,
        cancel: &CancellationToken,
        coll: &Coll,
        timestamp: &str,
    ) -> Result<(), EngineError> {
        let path = artifact_path(&self.base_dir, timestamp, coll);
        let (mut writer, reader) = upload_pipe();
        let child = cancel.child_token();
        let first_error: ErrorSlot = Arc::new(Mutex::new(None));

        let upload_task = {
            let sink = self.sink.clone();
            let child = child.clone();
            let first_error = first_error.clone();
            let path = path.clone();
            tokio::spawn(async move {
                if let Err(e) = sink.upload(&child, &path, reader).await {
                    record_first_error(&first_error, &child, e.into());
                }
            })
        };

        let cursor_task = {
            let source = self.source.clone();
            let child = child.clone();
            let first_error = first_error.clone();
            let db = coll.database.clone();
            let collection = coll.collection.clone();
            tokio::spawn(async move {
                let result: Result<(), EngineError> = async {
                    let mut cursor = source.find_all(&child, &db, &collection).await?;
                    while cursor.advance(&child).await {
                        writer.write_all(cursor.current()).await?;
                    }
                    if let Some(err) = cursor.err() {
                        return Err(EngineError::Cursor(err.to_string()));
                    }
                    Ok(())
                }
                .await;

                // The writer must close when iteration ends, success or
                // failure, so the upload side observes EOF deterministically.
                let close_result = writer.close().await.map_err(EngineError::from);
                let result = result.and(close_result);

                if let Err(e) = result {
                    record_first_error(&first_error, &child, e);
                }
            })
        };

        upload_task.await?;
        cursor_task.await?;

        match first_error.lock().unwrap().take() {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Restores every collection in `colls`, in order, from the artifacts
    /// written under `timestamp`. Stops at the first failing collection.
    /// Does not write status.
    pub async fn restore(
        &self,
        cancel: &CancellationToken,
        timestamp: &str,
        colls: &[Coll],
    ) -> Result<(), EngineError> {
        for coll in colls {
            self.restore_one(cancel, coll, timestamp).await?;
        }
        Ok(())
    }

    async fn restore_one(
        &self,
        cancel: &CancellationToken,
        coll: &Coll,
        timestamp: &str,
    ) -> Result<(), EngineError> {
        let path = artifact_path(&self.base_dir, timestamp, coll);
        let (writer, mut reader) = download_pipe();
        let child = cancel.child_token();
        let first_error: ErrorSlot = Arc::new(Mutex::new(None));

        let download_task = {
            let sink = self.sink.clone();
            let child = child.clone();
            let first_error = first_error.clone();
            let path = path.clone();
            tokio::spawn(async move {
                if let Err(e) = sink.download(&child, &path, writer).await {
                    record_first_error(&first_error, &child, e.into());
                }
            })
        };

        let insert_task = {
            let source = self.source.clone();
            let child = child.clone();
            let first_error = first_error.clone();
            let rate_limiter = self.rate_limiter.clone();
            let batch_limit = self.batch_limit;
            let db = coll.database.clone();
            let collection = coll.collection.clone();
            tokio::spawn(async move {
                let result: Result<(), EngineError> = async {
                    source.remove_all(&child, &db, &collection).await?;

                    let mut batch: Vec<Frame> = Vec::new();
                    let mut batch_bytes: usize = 0;
                    loop {
                        match framing::read_next(&mut reader).await? {
                            Some(frame) => {
                                if batch_bytes > 0 && batch_bytes + frame.len() > batch_limit {
                                    source.bulk_write(&child, &db, &collection, &batch).await?;
                                    batch.clear();
                                    batch_bytes = 0;
                                    rate_limiter.wait(&child).await?;
                                }
                                batch_bytes += frame.len();
                                batch.push(frame);
                            }
                            None => {
                                if !batch.is_empty() {
                                    source.bulk_write(&child, &db, &collection, &batch).await?;
                                }
                                break;
                            }
                        }
                    }
                    Ok(())
                }
                .await;

                reader.close();

                if let Err(e) = result {
                    record_first_error(&first_error, &child, e);
                }
            })
        };

        download_task.await?;
        insert_task.await?;

        match first_error.lock().unwrap().take() {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::fake::FakeSink;
    use crate::source::fake::FakeSource;
    use crate::status::RocksStatusStore;

    fn engine_with(
        source: FakeSource,
        sink: FakeSink,
    ) -> Engine<FakeSource, FakeSink> {
        Engine::new(Arc::new(source), Arc::new(sink), "/backups")
    }

    fn status_store(dir: &tempdir::TempDir) -> RocksStatusStore {
        RocksStatusStore::open(dir.path().join("state.db")).unwrap()
    }

    fn frame(payload: &[u8]) -> Frame {
        let len = (payload.len() + 4) as u32;
        let mut buf = len.to_le_bytes().to_vec();
        buf.extend_from_slice(payload);
        buf
    }

    #[tokio::test]
    async fn backup_round_trip_writes_artifact_and_status() {
        let coll = Coll::new("db1", "c1");
        let docs = vec![frame(b"a"), frame(b"bb"), frame(b"ccc")];
        let source = FakeSource::with_docs("db1", "c1", docs.clone());
        let sink = FakeSink::default();
        let engine = engine_with(source, sink);
        let dir = tempdir::TempDir::new("engine").unwrap();
        let status = status_store(&dir);

        let cancel = CancellationToken::new();
        engine
            .backup(&cancel, &[coll.clone()], &status)
            .await
            .unwrap();

        let recorded = status.get(&coll).unwrap();
        assert!(recorded.success);

        // Exactly one artifact was written, and its path embeds the run's
        // timestamp and the collection's database/name.
        let objects = engine.sink.objects.lock().unwrap();
        assert_eq!(objects.len(), 1);
        let (path, _) = objects.iter().next().unwrap();
        assert!(path.starts_with("/backups/"));
        assert!(path.ends_with("/db1/c1.bson.snappy"));
    }

    #[tokio::test]
    async fn backup_failure_records_unsuccessful_status() {
        let coll = Coll::new("db1", "c1");
        let source = FakeSource::with_docs("db1", "c1", vec![frame(b"a")]);
        let sink = FakeSink {
            fail_upload: Some("network down".to_string()),
            ..Default::default()
        };
        let engine = engine_with(source, sink);
        let dir = tempdir::TempDir::new("engine").unwrap();
        let status = status_store(&dir);

        let cancel = CancellationToken::new();
        let err = engine
            .backup(&cancel, &[coll.clone()], &status)
            .await
            .unwrap_err();
        assert!(err.to_string().starts_with("dumping failed for db1/c1:"));

        let recorded = status.get(&coll).unwrap();
        assert!(!recorded.success);
    }

    #[tokio::test]
    async fn restore_batches_on_byte_limit() {
        let coll = Coll::new("db1", "c1");

        // Seed an artifact equivalent to 1500 10,000-byte documents plus one
        // 1-byte document, compressed through the real upload pipe so the
        // restore path exercises genuine decompression.
        let mut docs = Vec::new();
        for _ in 0..1500 {
            docs.push(frame(&vec![7u8; 10_000 - 4]));
        }
        docs.push(frame(&[]));

        let (mut writer, mut reader) = upload_pipe();
        let write_docs = docs.clone();
        let writer_task = tokio::spawn(async move {
            for d in &write_docs {
                writer.write_all(d).await.unwrap();
            }
            writer.close().await.unwrap();
        });
        let mut compressed = Vec::new();
        tokio::io::AsyncReadExt::read_to_end(&mut reader, &mut compressed)
            .await
            .unwrap();
        writer_task.await.unwrap();

        let sink = FakeSink::default();
        sink.objects
            .lock()
            .unwrap()
            .insert("/backups/ts/db1/c1.bson.snappy".to_string(), compressed);

        let source = FakeSource::default();
        let engine = engine_with(source, sink).with_rate_limit(Duration::from_millis(1));

        let cancel = CancellationToken::new();
        engine
            .restore(&cancel, "ts", &[coll.clone()])
            .await
            .unwrap();

        let stored = engine
            .source
            .collections
            .lock()
            .unwrap()
            .get(&("db1".to_string(), "c1".to_string()))
            .cloned()
            .unwrap();
        assert_eq!(stored.len(), docs.len());
    }

    #[tokio::test]
    async fn restore_with_corrupt_artifact_fails_without_final_bulk_write() {
        let coll = Coll::new("db1", "c1");
        // A bare length prefix of 4, which is invalid (L < 5).
        let corrupt = vec![4u8, 0, 0, 0];

        let (mut writer, mut reader) = upload_pipe();
        let writer_task = tokio::spawn(async move {
            writer.write_all(&corrupt).await.unwrap();
            writer.close().await.unwrap();
        });
        let mut compressed = Vec::new();
        tokio::io::AsyncReadExt::read_to_end(&mut reader, &mut compressed)
            .await
            .unwrap();
        writer_task.await.unwrap();

        let sink = FakeSink::default();
        sink.objects
            .lock()
            .unwrap()
            .insert("/backups/ts/db1/c1.bson.snappy".to_string(), compressed);

        let source = FakeSource::default();
        let engine = engine_with(source, sink);

        let cancel = CancellationToken::new();
        let err = engine
            .restore(&cancel, "ts", &[coll.clone()])
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Framing(_)));

        // remove_all still fired, leaving the collection empty rather than
        // partially populated.
        let stored = engine
            .source
            .collections
            .lock()
            .unwrap()
            .get(&("db1".to_string(), "c1".to_string()))
            .cloned();
        assert_eq!(stored, Some(Vec::new()));
    }

    #[tokio::test]
    async fn zero_document_collection_round_trips_without_bulk_write() {
        let coll = Coll::new("db1", "empty");

        // An empty artifact, produced the same way a real empty backup
        // would: an upload pipe flushed with no writes.
        let (writer, mut reader) = upload_pipe();
        let writer_task = tokio::spawn(async move { writer.close().await.unwrap() });
        let mut compressed = Vec::new();
        tokio::io::AsyncReadExt::read_to_end(&mut reader, &mut compressed)
            .await
            .unwrap();
        writer_task.await.unwrap();

        let sink = FakeSink::default();
        sink.objects.lock().unwrap().insert(
            "/backups/ts/db1/empty.bson.snappy".to_string(),
            compressed,
        );
        let source = FakeSource::default();
        let engine = engine_with(source, sink);

        let cancel = CancellationToken::new();
        engine
            .restore(&cancel, "ts", &[coll.clone()])
            .await
            .unwrap();

        // `remove_all` ran (the key is present, with an empty vec), but no
        // `bulk_write` ever fired for an empty artifact.
        let stored = engine
            .source
            .collections
            .lock()
            .unwrap()
            .get(&("db1".to_string(), "empty".to_string()))
            .cloned();
        assert_eq!(stored, Some(Vec::new()));
    }
}
