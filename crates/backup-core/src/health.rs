//! Health evaluator: derives an operational health signal from the status
//! store, against a configured staleness horizon.
//!
//! The horizon is always the value the caller configured — earlier
//! incarnations of this kind of check have been seen hard-coding a fallback
//! horizon that silently overrides operator configuration; this evaluator
//! never does that.

use crate::coll::Coll;
use crate::status::{BackupResult, StatusStore};
use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollectionHealth {
    pub collection: Coll,
    pub healthy: bool,
    pub message: String,
}

pub struct HealthEvaluator<T> {
    status: Arc<T>,
    collections: Vec<Coll>,
    horizon: Duration,
}

impl<T: StatusStore + 'static> HealthEvaluator<T> {
    pub fn new(status: Arc<T>, collections: Vec<Coll>, horizon_hours: i64) -> Self {
        Self {
            status,
            collections,
            horizon: Duration::hours(horizon_hours),
        }
    }

    /// Evaluates a single collection against the configured horizon.
    pub fn check(&self, coll: &Coll) -> CollectionHealth {
        let result = self
            .status
            .get(coll)
            .unwrap_or_else(|_| BackupResult::never_run(coll.clone()));
        self.evaluate(coll, &result, Utc::now())
    }

    fn evaluate(&self, coll: &Coll, result: &BackupResult, now: DateTime<Utc>) -> CollectionHealth {
        if result.timestamp == DateTime::<Utc>::UNIX_EPOCH && !result.success {
            return CollectionHealth {
                collection: coll.clone(),
                healthy: false,
                message: "never backed up".to_string(),
            };
        }
        if now - result.timestamp > self.horizon {
            return CollectionHealth {
                collection: coll.clone(),
                healthy: false,
                message: format!(
                    "last backup more than {} hours ago",
                    self.horizon.num_hours()
                ),
            };
        }
        if !result.success {
            return CollectionHealth {
                collection: coll.clone(),
                healthy: false,
                message: "backup failed".to_string(),
            };
        }
        CollectionHealth {
            collection: coll.clone(),
            healthy: true,
            message: "ok".to_string(),
        }
    }

    /// Evaluates every configured collection.
    pub fn check_all(&self) -> Vec<CollectionHealth> {
        self.collections.iter().map(|c| self.check(c)).collect()
    }

    /// The good-to-go indicator: the logical AND of every collection's
    /// health, evaluated concurrently with fail-fast short-circuit on the
    /// first unhealthy collection found.
    pub async fn good_to_go(&self) -> Result<(), CollectionHealth> {
        let mut set = tokio::task::JoinSet::new();
        for coll in self.collections.clone() {
            let status = self.status.clone();
            let horizon = self.horizon;
            set.spawn_blocking(move || {
                let result = status
                    .get(&coll)
                    .unwrap_or_else(|_| BackupResult::never_run(coll.clone()));
                if result.timestamp == DateTime::<Utc>::UNIX_EPOCH && !result.success {
                    return CollectionHealth {
                        collection: coll,
                        healthy: false,
                        message: "never backed up".to_string(),
                    };
                }
                let now = Utc::now();
                if now - result.timestamp > horizon {
                    return CollectionHealth {
                        collection: coll,
                        healthy: false,
                        message: format!(
                            "last backup more than {} hours ago",
                            horizon.num_hours()
                        ),
                    };
                }
                if !result.success {
                    return CollectionHealth {
                        collection: coll,
                        healthy: false,
                        message: "backup failed".to_string(),
                    };
                }
                CollectionHealth {
                    collection: coll,
                    healthy: true,
                    message: "ok".to_string(),
                }
            });
        }

        let mut first_unhealthy = None;
        while let Some(joined) = set.join_next().await {
            let health = joined.expect("health check task panicked");
            if !health.healthy && first_unhealthy.is_none() {
                first_unhealthy = Some(health);
                set.abort_all();
            }
        }

        match first_unhealthy {
            Some(h) => Err(h),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::status::RocksStatusStore;

    fn store() -> (tempdir::TempDir, Arc<RocksStatusStore>) {
        let dir = tempdir::TempDir::new("health").unwrap();
        let store = RocksStatusStore::open(dir.path().join("state.db")).unwrap();
        (dir, Arc::new(store))
    }

    #[test]
    fn fresh_successful_backup_is_healthy() {
        let (_dir, status) = store();
        let coll = Coll::new("db1", "c1");
        let evaluator = HealthEvaluator::new(status.clone(), vec![coll.clone()], 24);

        let result = BackupResult {
            success: true,
            timestamp: Utc::now() - Duration::hours(10),
            collection: coll.clone(),
        };
        let health = evaluator.evaluate(&coll, &result, Utc::now());
        assert!(health.healthy);
    }

    #[test]
    fn stale_backup_is_unhealthy_with_horizon_message() {
        let (_dir, status) = store();
        let coll = Coll::new("db1", "c1");
        let evaluator = HealthEvaluator::new(status, vec![coll.clone()], 8);

        let result = BackupResult {
            success: true,
            timestamp: Utc::now() - Duration::hours(10),
            collection: coll.clone(),
        };
        let health = evaluator.evaluate(&coll, &result, Utc::now());
        assert!(!health.healthy);
        assert_eq!(health.message, "last backup more than 8 hours ago");
    }

    #[test]
    fn failed_backup_within_horizon_is_unhealthy() {
        let (_dir, status) = store();
        let coll = Coll::new("db1", "c1");
        let evaluator = HealthEvaluator::new(status, vec![coll.clone()], 24);

        let result = BackupResult {
            success: false,
            timestamp: Utc::now(),
            collection: coll.clone(),
        };
        let health = evaluator.evaluate(&coll, &result, Utc::now());
        assert!(!health.healthy);
        assert_eq!(health.message, "backup failed");
    }

    #[test]
    fn never_backed_up_is_unhealthy() {
        let (_dir, status) = store();
        let coll = Coll::new("db1", "missing");
        let evaluator = HealthEvaluator::new(status, vec![coll.clone()], 24);

        let health = evaluator.check(&coll);
        assert!(!health.healthy);
        assert_eq!(health.message, "never backed up");
    }

    #[tokio::test]
    async fn good_to_go_fails_on_first_unhealthy_collection() {
        let (_dir, status) = store();
        let healthy = Coll::new("db1", "healthy");
        let unhealthy = Coll::new("db1", "unhealthy");

        status
            .save(&BackupResult {
                success: true,
                timestamp: Utc::now(),
                collection: healthy.clone(),
            })
            .unwrap();
        status
            .save(&BackupResult {
                success: false,
                timestamp: Utc::now(),
                collection: unhealthy.clone(),
            })
            .unwrap();

        let evaluator =
            HealthEvaluator::new(status, vec![healthy.clone(), unhealthy.clone()], 24);
        let result = evaluator.good_to_go().await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn good_to_go_passes_when_all_collections_are_healthy() {
        let (_dir, status) = store();
        let coll = Coll::new("db1", "c1");
        status
            .save(&BackupResult {
                success: true,
                timestamp: Utc::now(),
                collection: coll.clone(),
            })
            .unwrap();

        let evaluator = HealthEvaluator::new(status, vec![coll], 24);
        assert!(evaluator.good_to_go().await.is_ok());
    }
}
