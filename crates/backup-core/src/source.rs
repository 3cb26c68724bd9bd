//! Cursor source: the database collaborator.
//!
//! Abstracts find-all iteration, bulk insert, and remove-all over a remote
//! collection behind a trait so that the engine can be driven against a
//! real MongoDB cluster or an in-memory fake in tests.

use async_trait::async_trait;
use bson::RawDocumentBuf;
use mongodb::Client;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    #[error("mongodb error: {0}")]
    Mongo(#[from] mongodb::error::Error),
    #[error("bson error: {0}")]
    Bson(#[from] bson::raw::Error),
    #[error("operation canceled")]
    Canceled,
}

/// A single document yielded by a cursor, in its full native binary framing
/// (the length prefix is included, matching [`crate::framing`]'s contract).
pub type Frame = Vec<u8>;

/// A forward-only cursor over every document in a collection.
#[async_trait]
pub trait DocCursor: Send {
    /// Advances to the next document. Returns `false` at end-of-cursor, on
    /// error, or once `cancel` fires; callers must check [`DocCursor::err`]
    /// after a `false` return.
    async fn advance(&mut self, cancel: &CancellationToken) -> bool;

    /// The current document's raw framed bytes. Only valid after `advance`
    /// has returned `true`.
    fn current(&self) -> &[u8];

    /// The error that ended iteration, if any. `None` means clean EOF.
    fn err(&self) -> Option<&SourceError>;
}

#[async_trait]
pub trait CursorSource: Send + Sync {
    async fn find_all(
        &self,
        cancel: &CancellationToken,
        db: &str,
        coll: &str,
    ) -> Result<Box<dyn DocCursor>, SourceError>;

    async fn remove_all(
        &self,
        cancel: &CancellationToken,
        db: &str,
        coll: &str,
    ) -> Result<(), SourceError>;

    /// Inserts `frames` in one unordered server batch.
    async fn bulk_write(
        &self,
        cancel: &CancellationToken,
        db: &str,
        coll: &str,
        frames: &[Frame],
    ) -> Result<(), SourceError>;
}

/// A [`CursorSource`] backed by a real MongoDB deployment.
pub struct MongoSource {
    client: Client,
}

impl MongoSource {
    pub async fn connect(
        connection_string: &str,
        connect_timeout: Duration,
    ) -> Result<Self, SourceError> {
        let mut options = mongodb::options::ClientOptions::parse(connection_string).await?;
        options.connect_timeout = Some(connect_timeout);
        let client = Client::with_options(options)?;
        Ok(Self { client })
    }

    fn raw_collection(&self, db: &str, coll: &str) -> mongodb::Collection<RawDocumentBuf> {
        self.client.database(db).collection(coll)
    }
}

struct MongoCursor {
    inner: mongodb::Cursor<RawDocumentBuf>,
    current: Vec<u8>,
    err: Option<SourceError>,
}

#[async_trait]
impl DocCursor for MongoCursor {
    async fn advance(&mut self, cancel: &CancellationToken) -> bool {
        use futures::stream::TryStreamExt;
        let next = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                self.err = Some(SourceError::Canceled);
                return false;
            }
            next = self.inner.try_next() => next,
        };
        match next {
            Ok(Some(doc)) => {
                self.current = doc.as_bytes().to_vec();
                true
            }
            Ok(None) => false,
            Err(e) => {
                self.err = Some(e.into());
                false
            }
        }
    }

    fn current(&self) -> &[u8] {
        &self.current
    }

    fn err(&self) -> Option<&SourceError> {
        self.err.as_ref()
    }
}

#[async_trait]
impl CursorSource for MongoSource {
    async fn find_all(
        &self,
        cancel: &CancellationToken,
        db: &str,
        coll: &str,
    ) -> Result<Box<dyn DocCursor>, SourceError> {
        let cursor = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(SourceError::Canceled),
            cursor = self.raw_collection(db, coll).find(bson::doc! {}) => cursor?,
        };
        Ok(Box::new(MongoCursor {
            inner: cursor,
            current: Vec::new(),
            err: None,
        }))
    }

    async fn remove_all(
        &self,
        cancel: &CancellationToken,
        db: &str,
        coll: &str,
    ) -> Result<(), SourceError> {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(SourceError::Canceled),
            result = self
                .client
                .database(db)
                .collection::<bson::Document>(coll)
                .delete_many(bson::doc! {}) => { result?; }
        }
        Ok(())
    }

    async fn bulk_write(
        &self,
        cancel: &CancellationToken,
        db: &str,
        coll: &str,
        frames: &[Frame],
    ) -> Result<(), SourceError> {
        let docs = frames
            .iter()
            .map(|f| RawDocumentBuf::from_bytes(f.clone()))
            .collect::<Result<Vec<_>, _>>()?;
        tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(SourceError::Canceled),
            result = self.raw_collection(db, coll).insert_many(docs) => { result?; }
        }
        Ok(())
    }
}

#[cfg(any(test, feature = "test-util"))]
pub mod fake {
    //! An in-memory [`CursorSource`] fake, used by the engine's tests in
    //! place of a real MongoDB deployment.

    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;

    #[derive(Default)]
    pub struct FakeSource {
        pub collections: Mutex<HashMap<(String, String), Vec<Frame>>>,
        /// When set, `find_all` yields this error after exhausting `current`.
        pub find_all_err: Option<String>,
    }

    impl FakeSource {
        pub fn with_docs(db: &str, coll: &str, docs: Vec<Frame>) -> Self {
            let mut collections = HashMap::new();
            collections.insert((db.to_string(), coll.to_string()), docs);
            Self {
                collections: Mutex::new(collections),
                find_all_err: None,
            }
        }
    }

    struct FakeCursor {
        remaining: std::vec::IntoIter<Frame>,
        current: Frame,
    }

    #[async_trait]
    impl DocCursor for FakeCursor {
        async fn advance(&mut self, _cancel: &CancellationToken) -> bool {
            match self.remaining.next() {
                Some(f) => {
                    self.current = f;
                    true
                }
                None => false,
            }
        }

        fn current(&self) -> &[u8] {
            &self.current
        }

        fn err(&self) -> Option<&SourceError> {
            None
        }
    }

    #[async_trait]
    impl CursorSource for FakeSource {
        async fn find_all(
            &self,
            _cancel: &CancellationToken,
            db: &str,
            coll: &str,
        ) -> Result<Box<dyn DocCursor>, SourceError> {
            let docs = self
                .collections
                .lock()
                .unwrap()
                .get(&(db.to_string(), coll.to_string()))
                .cloned()
                .unwrap_or_default();
            Ok(Box::new(FakeCursor {
                remaining: docs.into_iter(),
                current: Vec::new(),
            }))
        }

        async fn remove_all(
            &self,
            _cancel: &CancellationToken,
            db: &str,
            coll: &str,
        ) -> Result<(), SourceError> {
            self.collections
                .lock()
                .unwrap()
                .insert((db.to_string(), coll.to_string()), Vec::new());
            Ok(())
        }

        async fn bulk_write(
            &self,
            _cancel: &CancellationToken,
            db: &str,
            coll: &str,
            frames: &[Frame],
        ) -> Result<(), SourceError> {
            self.collections
                .lock()
                .unwrap()
                .entry((db.to_string(), coll.to_string()))
                .or_default()
                .extend_from_slice(frames);
            Ok(())
        }
    }
}
