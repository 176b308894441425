use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use rusqlite::{params, Connection, Params, Row};
use serde::Serialize;
use tokio::sync::OnceCell;

use crate::calendar::{date_key, parse_date_key, YearMonth};
use crate::config::StorageOptions;

mod memory;
mod schema;

pub use memory::MemoryStore;
pub use schema::{DATE_INDEX, SCHEMA_VERSION};

pub type StoreResult<T> = std::result::Result<T, StoreError>;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The engine could not be opened; writes are impossible for this session.
    #[error("storage unavailable at {location}: {reason}")]
    StorageUnavailable { location: String, reason: String },
    #[error("record store used before init() completed")]
    NotInitialized,
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),
    #[error("storage task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WeightRecord {
    pub id: i64,
    pub date: String,
    pub weight: f64,
}

impl WeightRecord {
    pub fn summary_line(&self) -> String {
        format!("{} | {} kg", self.date, display_weight(self.weight))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteOutcome {
    Deleted,
    /// The id was well formed but no record carried it.
    NotFound,
}

#[derive(Debug, Clone, Copy)]
pub struct WalCheckpointStats {
    pub busy_frames: i64,
    pub wal_frames: i64,
    pub checkpointed_frames: i64,
}

/// Date-indexed weight log. Every method must be awaited after [`RecordStore::init`] resolved.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Opens the engine and creates the date index on first use. Safe to call repeatedly and
    /// from concurrent tasks.
    async fn init(&self) -> StoreResult<()>;

    /// Appends a record without looking for an existing one on the same date.
    async fn insert(&self, date: &str, weight: f64) -> StoreResult<i64>;

    /// Replaces every record on `date` with a single new record.
    async fn upsert(&self, date: &str, weight: f64) -> StoreResult<i64>;

    /// Records on exactly `date`, ascending by id.
    async fn get_by_date(&self, date: &str) -> StoreResult<Vec<WeightRecord>>;

    /// Records whose date falls inside `month`, ordered by date then id.
    async fn get_by_month(&self, month: YearMonth) -> StoreResult<Vec<WeightRecord>>;

    async fn get_all(&self) -> StoreResult<Vec<WeightRecord>>;

    async fn delete_by_id(&self, id: i64) -> StoreResult<DeleteOutcome>;

    async fn clear_all(&self) -> StoreResult<usize>;
}

pub fn display_weight(weight: f64) -> String {
    format!("{weight}")
}

pub(crate) fn validate_weight(weight: f64) -> StoreResult<f64> {
    if !weight.is_finite() {
        return Err(StoreError::InvalidArgument(format!(
            "weight must be a finite number, got {weight}"
        )));
    }
    if weight < 0.0 {
        return Err(StoreError::InvalidArgument(format!(
            "weight cannot be negative, got {weight}"
        )));
    }
    Ok(weight)
}

pub(crate) fn validate_date(date: &str) -> StoreResult<String> {
    parse_date_key(date)
        .map(date_key)
        .map_err(|err| StoreError::InvalidArgument(err.to_string()))
}

#[derive(Debug, Clone)]
enum Location {
    File(PathBuf),
    Memory,
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Location::File(path) => write!(f, "{}", path.display()),
            Location::Memory => f.write_str(":memory:"),
        }
    }
}

/// SQLite-backed [`RecordStore`]. One connection is opened lazily by `init` and shared by every
/// caller; statements run on the blocking thread pool.
pub struct SqliteStore {
    location: Location,
    options: StorageOptions,
    conn: OnceCell<Arc<Mutex<Connection>>>,
}

impl SqliteStore {
    pub fn new(path: impl Into<PathBuf>, options: StorageOptions) -> Self {
        Self {
            location: Location::File(path.into()),
            options,
            conn: OnceCell::new(),
        }
    }

    /// Opens the database configured in `options.database_path`.
    pub fn from_options(options: &StorageOptions) -> Self {
        Self::new(options.database_path.clone(), options.clone())
    }

    pub fn in_memory() -> Self {
        Self {
            location: Location::Memory,
            options: StorageOptions::default(),
            conn: OnceCell::new(),
        }
    }

    pub fn database_path(&self) -> Option<&Path> {
        match &self.location {
            Location::File(path) => Some(path),
            Location::Memory => None,
        }
    }

    pub fn is_initialized(&self) -> bool {
        self.conn.initialized()
    }

    pub async fn checkpoint(&self) -> StoreResult<WalCheckpointStats> {
        self.with_connection(|conn| {
            let stats = conn.query_row("PRAGMA wal_checkpoint(PASSIVE)", [], |row| {
                Ok(WalCheckpointStats {
                    busy_frames: row.get(0)?,
                    wal_frames: row.get(1)?,
                    checkpointed_frames: row.get(2)?,
                })
            })?;
            Ok(stats)
        })
        .await
    }

    async fn with_connection<F, T>(&self, f: F) -> StoreResult<T>
    where
        F: FnOnce(&mut Connection) -> StoreResult<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = self.conn.get().cloned().ok_or(StoreError::NotInitialized)?;
        tokio::task::spawn_blocking(move || {
            let mut guard = conn.lock();
            f(&mut guard)
        })
        .await?
    }
}

#[async_trait]
impl RecordStore for SqliteStore {
    async fn init(&self) -> StoreResult<()> {
        self.conn
            .get_or_try_init(|| async {
                let location = self.location.clone();
                let options = self.options.clone();
                let conn = tokio::task::spawn_blocking(move || {
                    open_connection(&location, &options).map_err(|err| {
                        StoreError::StorageUnavailable {
                            location: location.to_string(),
                            reason: format!("{err:#}"),
                        }
                    })
                })
                .await??;
                Ok::<_, StoreError>(Arc::new(Mutex::new(conn)))
            })
            .await?;
        Ok(())
    }

    async fn insert(&self, date: &str, weight: f64) -> StoreResult<i64> {
        let date = validate_date(date)?;
        let weight = validate_weight(weight)?;
        let id = self
            .with_connection(move |conn| {
                conn.execute(
                    "INSERT INTO weights (date, weight) VALUES (?1, ?2)",
                    params![date, weight],
                )?;
                Ok(conn.last_insert_rowid())
            })
            .await?;
        tracing::debug!(id, "inserted weight record");
        Ok(id)
    }

    async fn upsert(&self, date: &str, weight: f64) -> StoreResult<i64> {
        let date = validate_date(date)?;
        let weight = validate_weight(weight)?;
        let (id, replaced) = self
            .with_connection(move |conn| {
                let tx = conn.transaction()?;
                let replaced = tx.execute("DELETE FROM weights WHERE date = ?1", params![date])?;
                tx.execute(
                    "INSERT INTO weights (date, weight) VALUES (?1, ?2)",
                    params![date, weight],
                )?;
                let id = tx.last_insert_rowid();
                tx.commit()?;
                Ok((id, replaced))
            })
            .await?;
        tracing::debug!(id, replaced, "upserted weight record");
        Ok(id)
    }

    async fn get_by_date(&self, date: &str) -> StoreResult<Vec<WeightRecord>> {
        let date = date.to_string();
        self.with_connection(move |conn| {
            query_records(
                conn,
                "SELECT id, date, weight FROM weights WHERE date = ?1 ORDER BY id",
                params![date],
            )
        })
        .await
    }

    async fn get_by_month(&self, month: YearMonth) -> StoreResult<Vec<WeightRecord>> {
        let (from, to) = month.key_range();
        self.with_connection(move |conn| {
            query_records(
                conn,
                "SELECT id, date, weight
                 FROM weights
                 WHERE date >= ?1 AND date < ?2
                 ORDER BY date, id",
                params![from, to],
            )
        })
        .await
    }

    async fn get_all(&self) -> StoreResult<Vec<WeightRecord>> {
        self.with_connection(|conn| {
            query_records(
                conn,
                "SELECT id, date, weight FROM weights ORDER BY date, id",
                [],
            )
        })
        .await
    }

    async fn delete_by_id(&self, id: i64) -> StoreResult<DeleteOutcome> {
        let deleted = self
            .with_connection(move |conn| {
                Ok(conn.execute("DELETE FROM weights WHERE id = ?1", params![id])?)
            })
            .await?;
        if deleted == 0 {
            tracing::debug!(id, "delete requested for missing record");
            Ok(DeleteOutcome::NotFound)
        } else {
            tracing::debug!(id, "deleted weight record");
            Ok(DeleteOutcome::Deleted)
        }
    }

    async fn clear_all(&self) -> StoreResult<usize> {
        let cleared = self
            .with_connection(|conn| Ok(conn.execute("DELETE FROM weights", [])?))
            .await?;
        tracing::info!(cleared, "cleared all weight records");
        Ok(cleared)
    }
}

fn query_records<P: Params>(conn: &Connection, sql: &str, params: P) -> StoreResult<Vec<WeightRecord>> {
    let mut stmt = conn.prepare(sql)?;
    let records = stmt
        .query_map(params, map_record)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(records)
}

fn map_record(row: &Row<'_>) -> rusqlite::Result<WeightRecord> {
    Ok(WeightRecord {
        id: row.get(0)?,
        date: row.get(1)?,
        weight: row.get(2)?,
    })
}

fn open_connection(location: &Location, options: &StorageOptions) -> Result<Connection> {
    let conn = match location {
        Location::File(path) => {
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent)
                    .with_context(|| format!("creating data directory {}", parent.display()))?;
            }
            tracing::info!(path = %path.display(), "opening weight database");
            Connection::open(path)
                .with_context(|| format!("opening database {}", path.display()))?
        }
        Location::Memory => Connection::open_in_memory().context("opening in-memory database")?,
    };
    prepare_connection(&conn, location, options)?;
    if schema::apply(&conn).context("applying weight schema")? {
        tracing::info!(%location, version = SCHEMA_VERSION, "created weight schema and date index");
    }
    Ok(conn)
}

fn prepare_connection(conn: &Connection, location: &Location, options: &StorageOptions) -> Result<()> {
    conn.busy_timeout(Duration::from_millis(options.busy_timeout_ms))
        .context("setting busy timeout")?;
    if matches!(location, Location::Memory) {
        return Ok(());
    }
    conn.pragma_update(None, "journal_mode", "WAL")
        .context("setting journal_mode=WAL")?;
    conn.pragma_update(None, "synchronous", "NORMAL")
        .context("setting synchronous=NORMAL")?;
    conn.pragma_update(
        None,
        "wal_autocheckpoint",
        options.wal_autocheckpoint.to_string(),
    )
    .context("setting wal_autocheckpoint")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use tempfile::TempDir;

    fn month(year: i32, index: u8) -> YearMonth {
        YearMonth::from_index(year, index).expect("valid month")
    }

    async fn file_store(root: &TempDir) -> StoreResult<SqliteStore> {
        let store = SqliteStore::new(root.path().join("data/weights.db"), StorageOptions::default());
        store.init().await?;
        Ok(store)
    }

    async fn date_index_count(store: &SqliteStore) -> StoreResult<i64> {
        store
            .with_connection(|conn| {
                Ok(conn.query_row(
                    "SELECT COUNT(*) FROM sqlite_master WHERE type = 'index' AND tbl_name = 'weights'",
                    [],
                    |row| row.get(0),
                )?)
            })
            .await
    }

    #[tokio::test]
    async fn insert_then_get_by_date_round_trips() -> anyhow::Result<()> {
        let temp = TempDir::new()?;
        let store = file_store(&temp).await?;
        let id = store.insert("2025-03-05", 70.2).await?;

        let records = store.get_by_date("2025-03-05").await?;
        assert_eq!(
            records,
            vec![WeightRecord {
                id,
                date: "2025-03-05".into(),
                weight: 70.2,
            }]
        );
        Ok(())
    }

    #[tokio::test]
    async fn month_query_does_not_leak_across_boundaries() -> anyhow::Result<()> {
        let store = SqliteStore::in_memory();
        store.init().await?;
        for date in [
            "2023-12-31",
            "2024-01-01",
            "2024-01-31",
            "2024-02-01",
            "2024-02-29",
            "2024-03-01",
            "2025-01-15",
        ] {
            store.insert(date, 80.0).await?;
        }

        let dates = |records: Vec<WeightRecord>| {
            records.into_iter().map(|r| r.date).collect::<Vec<_>>()
        };
        assert_eq!(
            dates(store.get_by_month(month(2024, 0)).await?),
            vec!["2024-01-01", "2024-01-31"]
        );
        assert_eq!(
            dates(store.get_by_month(month(2024, 1)).await?),
            vec!["2024-02-01", "2024-02-29"]
        );
        assert_eq!(
            dates(store.get_by_month(month(2023, 11)).await?),
            vec!["2023-12-31"]
        );
        assert!(store.get_by_month(month(2024, 4)).await?.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn duplicate_dates_coexist_after_plain_insert() -> anyhow::Result<()> {
        let store = SqliteStore::in_memory();
        store.init().await?;
        let first = store.insert("2025-03-05", 70.2).await?;
        let second = store.insert("2025-03-05", 70.5).await?;
        assert!(second > first);

        let by_date = store.get_by_date("2025-03-05").await?;
        assert_eq!(
            by_date.iter().map(|r| r.weight).collect::<Vec<_>>(),
            vec![70.2, 70.5]
        );
        assert_eq!(store.get_by_month(month(2025, 2)).await?.len(), 2);
        Ok(())
    }

    #[tokio::test]
    async fn upsert_replaces_same_day_records() -> anyhow::Result<()> {
        let store = SqliteStore::in_memory();
        store.init().await?;
        store.insert("2025-03-05", 70.2).await?;
        store.insert("2025-03-05", 70.5).await?;
        store.insert("2025-03-06", 70.9).await?;

        let id = store.upsert("2025-03-05", 69.8).await?;
        let records = store.get_by_date("2025-03-05").await?;
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].id, id);
        assert_eq!(records[0].weight, 69.8);
        assert_eq!(store.get_by_date("2025-03-06").await?.len(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn delete_is_idempotent_and_ids_are_not_reused() -> anyhow::Result<()> {
        let store = SqliteStore::in_memory();
        store.init().await?;
        store.insert("2025-03-01", 71.0).await?;
        let last = store.insert("2025-03-02", 70.8).await?;

        assert_eq!(store.delete_by_id(last).await?, DeleteOutcome::Deleted);
        assert!(store.get_all().await?.iter().all(|r| r.id != last));
        assert_eq!(store.delete_by_id(last).await?, DeleteOutcome::NotFound);

        let next = store.insert("2025-03-03", 70.6).await?;
        assert!(next > last, "id {next} reused or went backwards after {last}");
        Ok(())
    }

    #[tokio::test]
    async fn clear_all_empties_the_log() -> anyhow::Result<()> {
        let store = SqliteStore::in_memory();
        store.init().await?;
        store.insert("2025-03-01", 71.0).await?;
        store.insert("2025-04-01", 70.0).await?;
        assert_eq!(store.clear_all().await?, 2);
        assert!(store.get_all().await?.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn operations_before_init_are_rejected() {
        let store = SqliteStore::in_memory();
        assert_matches!(
            store.insert("2025-03-05", 70.2).await,
            Err(StoreError::NotInitialized)
        );
        assert_matches!(
            store.get_by_month(month(2025, 2)).await,
            Err(StoreError::NotInitialized)
        );
        assert_matches!(store.delete_by_id(1).await, Err(StoreError::NotInitialized));
    }

    #[tokio::test]
    async fn invalid_weights_and_dates_are_rejected() -> anyhow::Result<()> {
        let store = SqliteStore::in_memory();
        store.init().await?;
        assert_matches!(
            store.insert("2025-03-05", f64::NAN).await,
            Err(StoreError::InvalidArgument(_))
        );
        assert_matches!(
            store.insert("2025-03-05", f64::INFINITY).await,
            Err(StoreError::InvalidArgument(_))
        );
        assert_matches!(
            store.insert("2025-03-05", -1.0).await,
            Err(StoreError::InvalidArgument(_))
        );
        assert_matches!(
            store.insert("2025-3-5", 70.0).await,
            Err(StoreError::InvalidArgument(_))
        );
        assert!(store.get_all().await?.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn init_twice_keeps_a_single_index() -> anyhow::Result<()> {
        let temp = TempDir::new()?;
        let store = file_store(&temp).await?;
        store.init().await?;
        assert_eq!(date_index_count(&store).await?, 1);

        // A second store over the same file must not recreate anything either.
        let reopened = file_store(&temp).await?;
        assert_eq!(date_index_count(&reopened).await?, 1);
        Ok(())
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn concurrent_init_shares_one_connection() -> anyhow::Result<()> {
        let temp = TempDir::new()?;
        let store = Arc::new(SqliteStore::new(
            temp.path().join("weights.db"),
            StorageOptions::default(),
        ));
        let (a, b) = tokio::join!(store.init(), store.init());
        a?;
        b?;
        assert_eq!(date_index_count(&store).await?, 1);
        store.insert("2025-03-05", 70.2).await?;
        assert_eq!(store.get_all().await?.len(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn records_survive_reopening_the_file() -> anyhow::Result<()> {
        let temp = TempDir::new()?;
        {
            let store = file_store(&temp).await?;
            store.insert("2025-03-05", 70.2).await?;
        }
        let store = file_store(&temp).await?;
        let records = store.get_by_date("2025-03-05").await?;
        assert_eq!(records.len(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn unopenable_path_reports_storage_unavailable() -> anyhow::Result<()> {
        let temp = TempDir::new()?;
        let blocker = temp.path().join("not-a-dir");
        std::fs::write(&blocker, b"file in the way")?;
        let store = SqliteStore::new(blocker.join("weights.db"), StorageOptions::default());
        assert_matches!(
            store.init().await,
            Err(StoreError::StorageUnavailable { .. })
        );
        assert!(!store.is_initialized());
        Ok(())
    }

    #[tokio::test]
    async fn wal_checkpoint_runs() -> anyhow::Result<()> {
        let temp = TempDir::new()?;
        let store = file_store(&temp).await?;
        store.insert("2025-03-05", 70.2).await?;
        let stats = store.checkpoint().await?;
        assert!(
            stats.busy_frames >= 0 && stats.wal_frames >= 0 && stats.checkpointed_frames >= 0,
            "expected non-negative wal stats, got {:?}",
            stats
        );
        Ok(())
    }

    #[test]
    fn summary_line_drops_trailing_zero_fraction() {
        let record = WeightRecord {
            id: 1,
            date: "2025-03-05".into(),
            weight: 70.0,
        };
        assert_eq!(record.summary_line(), "2025-03-05 | 70 kg");
    }
}
