use std::future::Future;
use std::pin::Pin;

pub mod error;
pub mod ids;
pub mod lazy;
pub mod sqlite;
pub mod types;

pub use error::{StorageError, StorageResult};
pub use ids::HistoryItemId;
pub use lazy::LazyHistoryStore;
pub use sqlite::{HISTORY_DATABASE_FILE_NAME, SqliteStorage};
pub use types::{DATA_URL_PREFIX, HistoryItem, ImageSize, compare_recency};

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Blocking access to persisted history records.
pub trait HistoryStore: Send + Sync {
    /// Inserts the item or replaces the stored item with the same id.
    fn put_history_item(&self, item: HistoryItem) -> StorageResult<()>;
    /// Every stored item, newest first.
    fn list_history(&self) -> StorageResult<Vec<HistoryItem>>;
    fn get_history_item(&self, id: &HistoryItemId) -> StorageResult<Option<HistoryItem>>;
    fn clear_history(&self) -> StorageResult<()>;
    fn count_history(&self) -> StorageResult<u64>;
}

/// Async seam the history controller talks to.
pub trait HistoryRepository: Send + Sync {
    fn put<'a>(&'a self, item: HistoryItem) -> BoxFuture<'a, StorageResult<()>>;
    fn get_all<'a>(&'a self) -> BoxFuture<'a, StorageResult<Vec<HistoryItem>>>;
    fn clear<'a>(&'a self) -> BoxFuture<'a, StorageResult<()>>;
}
