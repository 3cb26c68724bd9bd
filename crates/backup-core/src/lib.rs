//! Streaming backup and restore of database collections to an S3-compatible
//! object store: cursor source to compressed pipe to object sink on the way
//! out, and the reverse, rate-limited and batched, on the way back in.

pub mod coll;
pub mod compression;
pub mod engine;
pub mod framing;
pub mod health;
pub mod pipe;
pub mod scheduler;
pub mod sink;
pub mod source;
pub mod status;

pub use coll::{parse_collections, Coll, ParseCollectionsError};
pub use engine::{Engine, EngineError};
pub use health::{CollectionHealth, HealthEvaluator};
pub use scheduler::{Scheduler, SchedulerError};
pub use sink::{ObjectSink, S3Sink, SinkError};
pub use source::{CursorSource, MongoSource, SourceError};
pub use status::{BackupResult, RocksStatusStore, StatusError, StatusStore};

#[cfg(feature = "test-util")]
pub use sink::fake as fake_sink;
#[cfg(feature = "test-util")]
pub use source::fake as fake_source;
