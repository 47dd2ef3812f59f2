use std::sync::Arc;

use snafu::ResultExt;
use tokio::sync::Mutex;

use super::error::{StorageResult, StoreTaskJoinSnafu};
use super::sqlite::SqliteStorage;
use super::types::HistoryItem;
use super::{BoxFuture, HistoryRepository, HistoryStore};

/// Process-wide history handle that opens the database on first use.
///
/// A connection-class failure drops the cached handle so the next call
/// reopens (and re-migrates) the store instead of reusing a dead one.
pub struct LazyHistoryStore {
    database_location: String,
    handle: Mutex<Option<Arc<SqliteStorage>>>,
}

impl LazyHistoryStore {
    pub fn new(database_location: impl Into<String>) -> Self {
        Self {
            database_location: database_location.into(),
            handle: Mutex::new(None),
        }
    }

    pub async fn is_open(&self) -> bool {
        self.handle.lock().await.is_some()
    }

    pub async fn acquire(&self) -> StorageResult<Arc<SqliteStorage>> {
        let mut handle = self.handle.lock().await;
        if let Some(storage) = handle.as_ref() {
            return Ok(Arc::clone(storage));
        }

        let storage = Arc::new(SqliteStorage::open(&self.database_location).await?);
        *handle = Some(Arc::clone(&storage));
        tracing::info!(location = %self.database_location, "history store initialized");
        Ok(storage)
    }

    pub async fn invalidate(&self) {
        if self.handle.lock().await.take().is_some() {
            tracing::warn!(location = %self.database_location, "history store handle invalidated");
        }
    }

    async fn run<T, F>(&self, stage: &'static str, op: F) -> StorageResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&SqliteStorage) -> StorageResult<T> + Send + 'static,
    {
        let storage = self.acquire().await?;
        let result = tokio::task::spawn_blocking(move || op(&storage))
            .await
            .context(StoreTaskJoinSnafu { stage })?;

        if let Err(error) = &result
            && error.is_connection_failure()
        {
            self.invalidate().await;
        }

        result
    }
}

impl HistoryRepository for LazyHistoryStore {
    fn put<'a>(&'a self, item: HistoryItem) -> BoxFuture<'a, StorageResult<()>> {
        Box::pin(self.run("lazy-history-put", move |storage| {
            storage.put_history_item(item)
        }))
    }

    fn get_all<'a>(&'a self) -> BoxFuture<'a, StorageResult<Vec<HistoryItem>>> {
        Box::pin(self.run("lazy-history-list", |storage| storage.list_history()))
    }

    fn clear<'a>(&'a self) -> BoxFuture<'a, StorageResult<()>> {
        Box::pin(self.run("lazy-history-clear", |storage| storage.clear_history()))
    }
}
