use std::{
    fs,
    future::{self, Future},
    path::{Path, PathBuf},
    str::FromStr,
    sync::Arc,
};

use async_trait::async_trait;
use futures::{stream::BoxStream, Stream, StreamExt, TryStreamExt};
use shared::domain::{Forageable, ForageableId};
use sqlx::{
    sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow},
    Pool, Row, Sqlite,
};
use thiserror::Error;
use tokio::sync::watch;
use tokio_stream::wrappers::WatchStream;
use tracing::{debug, info};

mod location;
mod memory;
pub use location::DatabaseLocation;
pub use memory::MemoryForageableStore;

/// Live query result. Lazy, restartable, never completes on its own.
pub type RecordStream<T> = BoxStream<'static, Result<T, StoreError>>;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("migration failed: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),
    #[error("failed to create parent directory '{}': {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("forageable {0} already exists")]
    Conflict(ForageableId),
}

/// Persistence capability behind the forageable controller.
///
/// Writes are last-write-wins; the store owns id assignment and does not
/// validate field contents. Every committed change re-runs the live queries
/// handed out by `query_all`/`query_by_id`.
#[async_trait]
pub trait ForageableStore: Send + Sync {
    fn query_all(&self) -> RecordStream<Vec<Forageable>>;

    /// Emits nothing while no forageable with `id` exists.
    fn query_by_id(&self, id: ForageableId) -> RecordStream<Forageable>;

    async fn insert(&self, forageable: &Forageable) -> Result<ForageableId, StoreError>;

    /// Replaces the row matching `forageable.id`. Returns `false` when nothing matched.
    async fn update(&self, forageable: &Forageable) -> Result<bool, StoreError>;

    /// Removes the row matching `forageable.id`. Returns `false` when nothing matched.
    async fn delete(&self, forageable: &Forageable) -> Result<bool, StoreError>;
}

#[derive(Clone)]
pub struct SqliteForageableStore {
    pool: Pool<Sqlite>,
    changes: Arc<watch::Sender<u64>>,
}

impl SqliteForageableStore {
    pub async fn new(database_url: &str) -> Result<Self, StoreError> {
        let location = DatabaseLocation::parse(database_url);
        ensure_parent_dir_exists(location.as_ref())?;

        let connect_options = SqliteConnectOptions::from_str(database_url)?.create_if_missing(true);
        // Each in-memory connection is its own database, so keep exactly one alive.
        let pool_options = if location.as_ref().is_some_and(DatabaseLocation::is_memory) {
            SqlitePoolOptions::new()
                .max_connections(1)
                .min_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
        } else {
            SqlitePoolOptions::new().max_connections(5)
        };
        let pool = pool_options.connect_with(connect_options).await?;
        sqlx::migrate!("./migrations").run(&pool).await?;
        info!(database_url, "forageable store ready");

        let (changes, _) = watch::channel(0);
        Ok(Self {
            pool,
            changes: Arc::new(changes),
        })
    }

    pub fn pool(&self) -> &Pool<Sqlite> {
        &self.pool
    }

    pub async fn health_check(&self) -> Result<(), StoreError> {
        let _: i64 = sqlx::query_scalar("SELECT 1").fetch_one(&self.pool).await?;
        Ok(())
    }

    async fn fetch_all(&self) -> Result<Vec<Forageable>, StoreError> {
        let rows = sqlx::query(
            "SELECT id, name, address, in_season, notes FROM forageable_database ORDER BY id",
        )
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(forageable_from_row).collect()
    }

    async fn fetch_one(&self, id: ForageableId) -> Result<Option<Forageable>, StoreError> {
        let row = sqlx::query(
            "SELECT id, name, address, in_season, notes FROM forageable_database WHERE id = ?1",
        )
        .bind(id.0)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(forageable_from_row).transpose()
    }

    fn notify(&self) {
        self.changes.send_modify(|version| *version += 1);
    }
}

#[async_trait]
impl ForageableStore for SqliteForageableStore {
    fn query_all(&self) -> RecordStream<Vec<Forageable>> {
        let store = self.clone();
        live_query(self.changes.subscribe(), move || {
            let store = store.clone();
            async move { store.fetch_all().await }
        })
    }

    fn query_by_id(&self, id: ForageableId) -> RecordStream<Forageable> {
        let store = self.clone();
        live_lookup(self.changes.subscribe(), move || {
            let store = store.clone();
            async move { store.fetch_one(id).await }
        })
    }

    async fn insert(&self, forageable: &Forageable) -> Result<ForageableId, StoreError> {
        let result = match forageable.id {
            Some(id) => sqlx::query(
                "INSERT INTO forageable_database (id, name, address, in_season, notes)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
            )
            .bind(id.0)
            .bind(&forageable.name)
            .bind(&forageable.address)
            .bind(forageable.in_season)
            .bind(&forageable.notes)
            .execute(&self.pool)
            .await
            .map_err(|err| conflict_or_database(err, id))?,
            None => {
                sqlx::query(
                    "INSERT INTO forageable_database (name, address, in_season, notes)
                     VALUES (?1, ?2, ?3, ?4)",
                )
                .bind(&forageable.name)
                .bind(&forageable.address)
                .bind(forageable.in_season)
                .bind(&forageable.notes)
                .execute(&self.pool)
                .await?
            }
        };

        let id = ForageableId(result.last_insert_rowid());
        debug!(forageable_id = id.0, "inserted forageable");
        self.notify();
        Ok(id)
    }

    async fn update(&self, forageable: &Forageable) -> Result<bool, StoreError> {
        let Some(id) = forageable.id else {
            return Ok(false);
        };

        let result = sqlx::query(
            "UPDATE forageable_database
             SET name = ?2, address = ?3, in_season = ?4, notes = ?5
             WHERE id = ?1",
        )
        .bind(id.0)
        .bind(&forageable.name)
        .bind(&forageable.address)
        .bind(forageable.in_season)
        .bind(&forageable.notes)
        .execute(&self.pool)
        .await?;

        let changed = result.rows_affected() > 0;
        if changed {
            self.notify();
        }
        Ok(changed)
    }

    async fn delete(&self, forageable: &Forageable) -> Result<bool, StoreError> {
        let Some(id) = forageable.id else {
            return Ok(false);
        };

        let result = sqlx::query("DELETE FROM forageable_database WHERE id = ?1")
            .bind(id.0)
            .execute(&self.pool)
            .await?;

        let changed = result.rows_affected() > 0;
        if changed {
            self.notify();
        }
        Ok(changed)
    }
}

/// Re-runs `fetch` for the current change version and after every later bump.
///
/// The watch channel only keeps the latest version, so bursts of writes are
/// coalesced into a single re-query; identical consecutive snapshots are dropped.
pub(crate) fn live_query<T, F, Fut>(changes: watch::Receiver<u64>, mut fetch: F) -> RecordStream<T>
where
    T: PartialEq + Clone + Send + 'static,
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = Result<T, StoreError>> + Send + 'static,
{
    let snapshots = WatchStream::new(changes).then(move |_| fetch());
    distinct_until_changed(snapshots).boxed()
}

pub(crate) fn live_lookup<F, Fut>(
    changes: watch::Receiver<u64>,
    fetch: F,
) -> RecordStream<Forageable>
where
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = Result<Option<Forageable>, StoreError>> + Send + 'static,
{
    live_query(changes, fetch)
        .try_filter_map(|found| future::ready(Ok(found)))
        .boxed()
}

fn distinct_until_changed<T, S>(stream: S) -> impl Stream<Item = Result<T, StoreError>> + Send
where
    T: PartialEq + Clone + Send + 'static,
    S: Stream<Item = Result<T, StoreError>> + Send,
{
    stream
        .scan(None::<T>, |last, item| {
            let next = match item {
                Ok(value) if last.as_ref() == Some(&value) => None,
                Ok(value) => {
                    *last = Some(value.clone());
                    Some(Ok(value))
                }
                Err(err) => Some(Err(err)),
            };
            future::ready(Some(next))
        })
        .filter_map(future::ready)
}

fn forageable_from_row(row: &SqliteRow) -> Result<Forageable, StoreError> {
    Ok(Forageable {
        id: Some(ForageableId(row.try_get("id")?)),
        name: row.try_get("name")?,
        address: row.try_get("address")?,
        in_season: row.try_get("in_season")?,
        notes: row.try_get("notes")?,
    })
}

fn conflict_or_database(err: sqlx::Error, id: ForageableId) -> StoreError {
    match &err {
        sqlx::Error::Database(db_err) if db_err.is_unique_violation() => StoreError::Conflict(id),
        _ => StoreError::Database(err),
    }
}

fn ensure_parent_dir_exists(location: Option<&DatabaseLocation>) -> Result<(), StoreError> {
    let Some(parent) = location
        .and_then(DatabaseLocation::file_path)
        .and_then(Path::parent)
    else {
        return Ok(());
    };

    fs::create_dir_all(parent).map_err(|source| StoreError::Io {
        path: parent.to_path_buf(),
        source,
    })
}

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
