//! Cron-driven scheduler: invokes the backup engine on a recurring
//! expression, optionally once immediately at startup.
//!
//! Exactly one run is ever in flight: the loop always awaits the current
//! run to completion before computing the next fire time, so overlapping
//! runs against the status store cannot happen.

use crate::coll::Coll;
use crate::engine::{Engine, EngineError};
use crate::sink::ObjectSink;
use crate::source::CursorSource;
use crate::status::StatusStore;
use chrono::Utc;
use std::str::FromStr;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

#[derive(Debug, thiserror::Error)]
pub enum SchedulerError {
    #[error("invalid cron expression: {0}")]
    InvalidExpression(#[from] cron::error::Error),
}

pub struct Scheduler<C, S, T> {
    engine: Arc<Engine<C, S>>,
    status: Arc<T>,
    collections: Vec<Coll>,
}

impl<C, S, T> Scheduler<C, S, T>
where
    C: CursorSource + 'static,
    S: ObjectSink + 'static,
    T: StatusStore + 'static,
{
    pub fn new(engine: Arc<Engine<C, S>>, status: Arc<T>, collections: Vec<Coll>) -> Self {
        Self {
            engine,
            status,
            collections,
        }
    }

    /// Registers `cron_expr` (a standard 5-field expression: minute hour
    /// day-of-month month day-of-week) and runs until `cancel` fires. If
    /// `run_at_start` is set, a backup runs synchronously before the first
    /// scheduled fire time is computed.
    pub async fn run(
        &self,
        cron_expr: &str,
        run_at_start: bool,
        cancel: CancellationToken,
    ) -> Result<(), SchedulerError> {
        // The `cron` crate requires a leading seconds field; the external
        // contract here is the standard 5-field expression, so the seconds
        // field is always pinned to zero.
        let schedule = cron::Schedule::from_str(&format!("0 {cron_expr}"))?;

        if run_at_start {
            self.run_once("startup").await;
        }

        loop {
            let now = Utc::now();
            let Some(next) = schedule.after(&now).next() else {
                tracing::warn!("cron expression has no further fire times, stopping scheduler");
                return Ok(());
            };
            tracing::info!(next_fire = %next, "scheduled next backup");

            let wait = (next - now).to_std().unwrap_or(std::time::Duration::ZERO);
            tokio::select! {
                _ = cancel.cancelled() => return Ok(()),
                _ = tokio::time::sleep(wait) => {}
            }

            self.run_once("cron").await;
        }
    }

    async fn run_once(&self, trigger: &str) {
        let cancel = CancellationToken::new();
        match self
            .engine
            .backup(&cancel, &self.collections, self.status.as_ref())
            .await
        {
            Ok(()) => tracing::info!(trigger, "scheduled backup completed"),
            Err(EngineError::DumpFailed { coll, source }) => {
                tracing::error!(trigger, collection = %coll, error = %source, "scheduled backup failed")
            }
            Err(e) => tracing::error!(trigger, error = %e, "scheduled backup failed"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::fake::FakeSink;
    use crate::source::fake::FakeSource;
    use crate::status::RocksStatusStore;

    fn engine() -> Arc<Engine<FakeSource, FakeSink>> {
        Arc::new(Engine::new(
            Arc::new(FakeSource::default()),
            Arc::new(FakeSink::default()),
            "/backups",
        ))
    }

    #[tokio::test]
    async fn run_at_start_invokes_backup_before_registering_recurrence() {
        let coll = Coll::new("db1", "c1");
        let engine = engine();
        let dir = tempdir::TempDir::new("scheduler").unwrap();
        let status = Arc::new(RocksStatusStore::open(dir.path().join("state.db")).unwrap());
        let scheduler = Scheduler::new(engine, status.clone(), vec![coll.clone()]);

        let cancel = CancellationToken::new();
        cancel.cancel(); // stop right after the startup run fires

        scheduler
            .run("0 0 1 1 *", true, cancel)
            .await
            .unwrap();

        // The startup run attempted a backup against the (empty) fake
        // source, writing a status record even though there were no
        // documents to move.
        assert!(status.get(&coll).is_ok());
    }

    #[test]
    fn rejects_an_invalid_cron_expression() {
        let expr = "not a cron expression";
        let result = cron::Schedule::from_str(&format!("0 {expr}"));
        assert!(result.is_err());
    }
}
