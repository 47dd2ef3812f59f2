use std::future::Future;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use snafu::ResultExt;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::{Connection, FromRow, SqliteConnection, SqlitePool};

use super::HistoryStore;
use super::error::{
    CreateSqliteDirectorySnafu, SqliteConnectOptionsSnafu, SqliteConnectSnafu, SqliteMigrateSnafu,
    SqlitePragmaSnafu, StorageError, StorageResult,
};
use super::error::{
    InvariantViolationSnafu, SqliteQuerySnafu, SqliteRuntimeInitSnafu, SqliteThreadSpawnSnafu,
};
use super::ids::HistoryItemId;
use super::types::{HistoryItem, ImageSize};

pub const HISTORY_DATABASE_FILE_NAME: &str = "history.db";

#[derive(Debug, Clone)]
pub struct SqliteStorage {
    pool: SqlitePool,
    database_url: String,
}

impl SqliteStorage {
    /// Opens (creating if needed) the history database and applies the schema.
    pub async fn open(database_location: &str) -> StorageResult<Self> {
        ensure_database_directory(database_location)?;

        let database_url = normalize_database_url(database_location);
        let connect_options = SqliteConnectOptions::from_str(&database_url)
            .context(SqliteConnectOptionsSnafu {
                stage: "sqlite-open-parse-url",
                database_url: database_url.clone(),
            })?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_millis(5_000));

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(connect_options)
            .await
            .context(SqliteConnectSnafu {
                stage: "sqlite-open-connect",
                database_url: database_url.clone(),
            })?;

        let _: String = sqlx::query_scalar("PRAGMA journal_mode = WAL;")
            .fetch_one(&pool)
            .await
            .context(SqlitePragmaSnafu {
                stage: "sqlite-open-pragma-journal-mode",
                pragma: "journal_mode",
            })?;
        sqlx::query("PRAGMA busy_timeout = 5000;")
            .execute(&pool)
            .await
            .context(SqlitePragmaSnafu {
                stage: "sqlite-open-pragma-busy-timeout",
                pragma: "busy_timeout",
            })?;

        // Applied migrations are recorded, so reopening an existing store is a no-op here.
        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .context(SqliteMigrateSnafu {
                stage: "sqlite-open-migrate",
            })?;

        tracing::debug!(database_url = %database_url, "history store opened");
        Ok(Self { pool, database_url })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    fn run_db_call<T, F>(&self, stage: &'static str, op: F) -> StorageResult<T>
    where
        T: Send + 'static,
        F: Future<Output = StorageResult<T>> + Send + 'static,
    {
        // Callers may already be inside a runtime; block_on must not run on their thread.
        let worker = std::thread::Builder::new()
            .name(format!("sqlite-store-{stage}"))
            .spawn(move || {
                let runtime = tokio::runtime::Builder::new_current_thread()
                    .enable_all()
                    .build()
                    .context(SqliteRuntimeInitSnafu {
                        stage: "sqlite-store-runtime-build",
                    })?;
                runtime.block_on(op)
            })
            .context(SqliteThreadSpawnSnafu {
                stage: "sqlite-store-spawn-worker",
            })?;

        match worker.join() {
            Ok(result) => result,
            Err(_) => InvariantViolationSnafu {
                stage,
                details: "sqlite storage worker thread panicked".to_string(),
            }
            .fail(),
        }
    }
}

impl HistoryStore for SqliteStorage {
    fn put_history_item(&self, item: HistoryItem) -> StorageResult<()> {
        item.validate("history-put-validate")?;

        let database_url = self.database_url.clone();
        self.run_db_call("history-put", async move {
            let mut connection = connect_store_connection(&database_url, "history-put-connect").await?;
            let timestamp_ms = u64_to_i64(item.timestamp, "history-put-timestamp")?;
            let mut tx = connection.begin().await.context(SqliteQuerySnafu {
                stage: "history-put-begin",
            })?;

            // Upsert keeps the row addressable by id; every field is replaced on conflict.
            sqlx::query(
                "INSERT INTO history (id, image_url, timestamp_ms, size, style_id) VALUES (?, ?, ?, ?, ?) \
                 ON CONFLICT(id) DO UPDATE SET image_url = excluded.image_url, timestamp_ms = excluded.timestamp_ms, \
                 size = excluded.size, style_id = excluded.style_id",
            )
            .bind(item.id.as_str())
            .bind(&item.image_url)
            .bind(timestamp_ms)
            .bind(item.size.as_str())
            .bind(&item.style_id)
            .execute(&mut *tx)
            .await
            .context(SqliteQuerySnafu {
                stage: "history-put-upsert",
            })?;

            tx.commit().await.context(SqliteQuerySnafu {
                stage: "history-put-commit",
            })?;

            Ok(())
        })
    }

    fn list_history(&self) -> StorageResult<Vec<HistoryItem>> {
        let database_url = self.database_url.clone();
        self.run_db_call("history-list", async move {
            let mut connection = connect_store_connection(&database_url, "history-list-connect").await?;
            let rows = sqlx::query_as::<_, HistoryRow>(
                "SELECT id, image_url, timestamp_ms, size, style_id FROM history ORDER BY timestamp_ms DESC, id DESC",
            )
            .fetch_all(&mut connection)
            .await
            .context(SqliteQuerySnafu {
                stage: "history-list-query",
            })?;

            rows.into_iter().map(history_row_to_item).collect()
        })
    }

    fn get_history_item(&self, id: &HistoryItemId) -> StorageResult<Option<HistoryItem>> {
        let database_url = self.database_url.clone();
        let id = id.clone();
        self.run_db_call("history-get", async move {
            let mut connection = connect_store_connection(&database_url, "history-get-connect").await?;
            let row = sqlx::query_as::<_, HistoryRow>(
                "SELECT id, image_url, timestamp_ms, size, style_id FROM history WHERE id = ?",
            )
            .bind(id.as_str())
            .fetch_optional(&mut connection)
            .await
            .context(SqliteQuerySnafu {
                stage: "history-get-query",
            })?;

            row.map(history_row_to_item).transpose()
        })
    }

    fn clear_history(&self) -> StorageResult<()> {
        let database_url = self.database_url.clone();
        self.run_db_call("history-clear", async move {
            let mut connection = connect_store_connection(&database_url, "history-clear-connect").await?;
            let mut tx = connection.begin().await.context(SqliteQuerySnafu {
                stage: "history-clear-begin",
            })?;

            let removed = sqlx::query("DELETE FROM history")
                .execute(&mut *tx)
                .await
                .context(SqliteQuerySnafu {
                    stage: "history-clear-delete",
                })?
                .rows_affected();

            tx.commit().await.context(SqliteQuerySnafu {
                stage: "history-clear-commit",
            })?;

            tracing::info!(removed, "history cleared");
            Ok(())
        })
    }

    fn count_history(&self) -> StorageResult<u64> {
        let database_url = self.database_url.clone();
        self.run_db_call("history-count", async move {
            let mut connection = connect_store_connection(&database_url, "history-count-connect").await?;
            let count = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM history")
                .fetch_one(&mut connection)
                .await
                .context(SqliteQuerySnafu {
                    stage: "history-count-query",
                })?;

            i64_to_u64(count, "history-count-value")
        })
    }
}

#[derive(Debug, FromRow)]
struct HistoryRow {
    id: String,
    image_url: String,
    timestamp_ms: i64,
    size: String,
    style_id: String,
}

fn history_row_to_item(row: HistoryRow) -> StorageResult<HistoryItem> {
    Ok(HistoryItem {
        id: HistoryItemId::parse(&row.id)?,
        image_url: row.image_url,
        timestamp: i64_to_u64(row.timestamp_ms, "history-row-timestamp")?,
        size: ImageSize::from_str(&row.size)?,
        style_id: row.style_id,
    })
}

async fn connect_store_connection(
    database_url: &str,
    stage: &'static str,
) -> StorageResult<SqliteConnection> {
    let mut connection =
        SqliteConnection::connect(database_url)
            .await
            .context(SqliteConnectSnafu {
                stage,
                database_url: database_url.to_string(),
            })?;

    sqlx::query("PRAGMA busy_timeout = 5000;")
        .execute(&mut connection)
        .await
        .context(SqlitePragmaSnafu {
            stage: "sqlite-store-pragma-busy-timeout",
            pragma: "busy_timeout",
        })?;

    Ok(connection)
}

fn i64_to_u64(value: i64, stage: &'static str) -> StorageResult<u64> {
    value
        .try_into()
        .map_err(|_| StorageError::InvariantViolation {
            stage,
            details: format!("negative sqlite integer '{value}' cannot map to u64"),
        })
}

fn u64_to_i64(value: u64, stage: &'static str) -> StorageResult<i64> {
    value
        .try_into()
        .map_err(|_| StorageError::InvariantViolation {
            stage,
            details: format!("u64 '{value}' cannot map to sqlite i64"),
        })
}

fn ensure_database_directory(database_location: &str) -> StorageResult<()> {
    if database_location.starts_with("sqlite:") {
        return Ok(());
    }

    let path = Path::new(database_location);
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent).context(CreateSqliteDirectorySnafu {
            stage: "sqlite-open-create-directory",
            path: parent.display().to_string(),
        })?;
    }

    Ok(())
}

fn normalize_database_url(database_location: &str) -> String {
    if database_location.starts_with("sqlite:") {
        return database_location.to_string();
    }

    format!("sqlite://{database_location}")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(id: &str, timestamp: u64, size: ImageSize) -> HistoryItem {
        HistoryItem::new(
            HistoryItemId::parse(id).unwrap(),
            format!("data:image/png;base64,{id}"),
            timestamp,
            size,
            "NATURAL",
        )
    }

    fn ids(items: &[HistoryItem]) -> Vec<String> {
        items.iter().map(|item| item.id.to_string()).collect()
    }

    async fn open_temp(dir: &tempfile::TempDir) -> SqliteStorage {
        let location = dir.path().join(HISTORY_DATABASE_FILE_NAME);
        SqliteStorage::open(&location.display().to_string())
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn list_orders_by_timestamp_not_insertion() {
        let dir = tempfile::tempdir().unwrap();
        let storage = open_temp(&dir).await;

        storage.put_history_item(item("a", 100, ImageSize::OneK)).unwrap();
        storage.put_history_item(item("c", 50, ImageSize::OneK)).unwrap();
        storage.put_history_item(item("b", 200, ImageSize::TwoK)).unwrap();

        let listed = storage.list_history().unwrap();
        assert_eq!(ids(&listed), vec!["b", "a", "c"]);
        assert_eq!(listed[0].size, ImageSize::TwoK);
        assert_eq!(storage.count_history().unwrap(), 3);
    }

    #[tokio::test]
    async fn put_with_existing_id_overwrites_every_field() {
        let dir = tempfile::tempdir().unwrap();
        let storage = open_temp(&dir).await;

        storage.put_history_item(item("a", 100, ImageSize::OneK)).unwrap();
        let mut replacement = item("a", 150, ImageSize::FourK);
        replacement.style_id = "NOIR".to_string();
        storage.put_history_item(replacement.clone()).unwrap();
        // Re-applying the same write is unobservable.
        storage.put_history_item(replacement.clone()).unwrap();

        let listed = storage.list_history().unwrap();
        assert_eq!(listed, vec![replacement.clone()]);
        assert_eq!(
            storage
                .get_history_item(&HistoryItemId::parse("a").unwrap())
                .unwrap(),
            Some(replacement)
        );
    }

    #[tokio::test]
    async fn equal_timestamps_break_ties_by_id() {
        let dir = tempfile::tempdir().unwrap();
        let storage = open_temp(&dir).await;

        storage.put_history_item(item("x1", 100, ImageSize::OneK)).unwrap();
        storage.put_history_item(item("x2", 100, ImageSize::OneK)).unwrap();

        assert_eq!(ids(&storage.list_history().unwrap()), vec!["x2", "x1"]);
    }

    #[tokio::test]
    async fn clear_removes_everything() {
        let dir = tempfile::tempdir().unwrap();
        let storage = open_temp(&dir).await;

        storage.put_history_item(item("a", 100, ImageSize::OneK)).unwrap();
        storage.put_history_item(item("b", 200, ImageSize::OneK)).unwrap();
        storage.clear_history().unwrap();

        assert!(storage.list_history().unwrap().is_empty());
        assert_eq!(storage.count_history().unwrap(), 0);
    }

    #[tokio::test]
    async fn records_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        {
            let storage = open_temp(&dir).await;
            storage.put_history_item(item("a", 100, ImageSize::TwoK)).unwrap();
        }

        let reopened = open_temp(&dir).await;
        let listed = reopened.list_history().unwrap();
        assert_eq!(ids(&listed), vec!["a"]);
        assert_eq!(listed[0].size, ImageSize::TwoK);
    }

    #[tokio::test]
    async fn rejected_items_leave_the_store_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let storage = open_temp(&dir).await;

        let mut remote = item("a", 100, ImageSize::OneK);
        remote.image_url = "https://cdn.example.com/a.png".to_string();

        assert!(matches!(
            storage.put_history_item(remote),
            Err(StorageError::InvalidHistoryItem { .. })
        ));
        assert!(storage.list_history().unwrap().is_empty());
    }

    #[test]
    fn database_locations_normalize_to_sqlite_urls() {
        assert_eq!(
            normalize_database_url("/tmp/lumier/history.db"),
            "sqlite:///tmp/lumier/history.db"
        );
        assert_eq!(normalize_database_url("sqlite://x.db"), "sqlite://x.db");
    }
}
