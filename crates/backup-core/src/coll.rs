use std::fmt;

/// Identifies a single `<database>/<collection>` pair to back up or restore.
///
/// `Coll` values are created once from configuration at startup and are
/// immutable thereafter; comparisons are exact string comparisons.
#[derive(Debug, Clone, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub struct Coll {
    pub database: String,
    pub collection: String,
}

impl Coll {
    pub fn new(database: impl Into<String>, collection: impl Into<String>) -> Self {
        Self {
            database: database.into(),
            collection: collection.into(),
        }
    }

    /// The canonical status-store / log key form: `"<database>/<collection>"`.
    pub fn canonical_key(&self) -> String {
        format!("{}/{}", self.database, self.collection)
    }

    /// The object-store key segment for this collection's artifact, relative
    /// to a run's `<base-dir>/<timestamp>/` directory.
    pub fn artifact_name(&self) -> String {
        format!("{}.bson.snappy", self.collection)
    }
}

impl fmt::Display for Coll {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.canonical_key())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ParseCollectionsError {
    #[error("failed to parse collections parameter: {0}")]
    BadEntry(String),
}

/// Parses the CLI's comma-separated `<db>/<coll>,<db>/<coll>,...` collection
/// list into an ordered list of [`Coll`] values. Order is preserved: it is
/// the iteration order used by the backup/restore engine.
pub fn parse_collections(spec: &str) -> Result<Vec<Coll>, ParseCollectionsError> {
    spec.split(',')
        .map(|entry| {
            let mut parts = entry.splitn(2, '/');
            match (parts.next(), parts.next()) {
                (Some(db), Some(coll)) if !db.is_empty() && !coll.is_empty() => {
                    Ok(Coll::new(db, coll))
                }
                _ => Err(ParseCollectionsError::BadEntry(spec.to_string())),
            }
        })
        .collect()
}
