use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use arc_swap::ArcSwap;
use lumier_generation::resolve_style;
use lumier_storage::{
    HistoryItem, HistoryItemId, HistoryRepository, ImageSize, StorageResult, compare_recency,
};
use tokio::sync::RwLock;
use tokio::task::JoinHandle;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HistoryLoadState {
    Loading,
    Loaded,
    Errored,
}

/// Everything needed to put a past generation back on screen.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RestoredGeneration {
    pub size: ImageSize,
    pub style_id: String,
    pub image_url: String,
}

/// A history item that is already visible in memory and is being persisted
/// in the background.
pub struct HistoryWrite {
    pub item: HistoryItem,
    task: JoinHandle<bool>,
}

impl HistoryWrite {
    /// Resolves once the background write finished; `true` if it was stored.
    pub async fn wait(self) -> bool {
        match self.task.await {
            Ok(persisted) => persisted,
            Err(error) => {
                tracing::warn!(item_id = %self.item.id, %error, "history persist task aborted");
                false
            }
        }
    }
}

/// Orders background writes against `clear_history`: writes hold the read
/// side while they run, a clear takes the write side and bumps `clears` so
/// writes queued before it never reach the store.
#[derive(Default)]
struct WriteGate {
    lock: RwLock<()>,
    clears: AtomicU64,
}

/// Keeps the in-memory history list, newest first, in step with the store.
///
/// The list is updated synchronously; persistence happens afterwards and its
/// failures are only logged, so the list may hold items the store lacks.
pub struct HistoryController {
    repository: Arc<dyn HistoryRepository>,
    items: ArcSwap<Vec<HistoryItem>>,
    load_state: ArcSwap<HistoryLoadState>,
    last_timestamp: AtomicU64,
    gate: Arc<WriteGate>,
}

impl HistoryController {
    pub fn new(repository: Arc<dyn HistoryRepository>) -> Self {
        Self {
            repository,
            items: ArcSwap::from_pointee(Vec::new()),
            load_state: ArcSwap::from_pointee(HistoryLoadState::Loading),
            last_timestamp: AtomicU64::new(0),
            gate: Arc::new(WriteGate::default()),
        }
    }

    pub fn items(&self) -> Arc<Vec<HistoryItem>> {
        self.items.load_full()
    }

    pub fn load_state(&self) -> HistoryLoadState {
        **self.load_state.load()
    }

    /// Publishes the stored history. A failing store publishes whatever this
    /// session already recorded (nothing, at startup) and is never fatal.
    pub async fn load_history(&self) -> Arc<Vec<HistoryItem>> {
        self.load_state.store(Arc::new(HistoryLoadState::Loading));

        let (stored, state) = match self.repository.get_all().await {
            Ok(stored) => {
                tracing::info!(count = stored.len(), "history loaded");
                (stored, HistoryLoadState::Loaded)
            }
            Err(error) => {
                tracing::warn!(stage = error.stage(), %error, "failed to load history");
                (Vec::new(), HistoryLoadState::Errored)
            }
        };

        if let Some(newest) = stored.iter().map(|item| item.timestamp).max() {
            self.last_timestamp.fetch_max(newest, Ordering::AcqRel);
        }

        // Items recorded while the load was in flight take precedence over stored copies.
        self.items.rcu(|current| {
            let recorded: HashSet<&HistoryItemId> = current.iter().map(|item| &item.id).collect();
            let mut merged = current.as_ref().clone();
            merged.extend(
                stored
                    .iter()
                    .filter(|item| !recorded.contains(&item.id))
                    .cloned(),
            );
            merged.sort_by(compare_recency);
            merged
        });
        self.load_state.store(Arc::new(state));

        self.items()
    }

    /// Records a successful generation. Must be called within a Tokio runtime.
    pub fn record_generation(
        &self,
        image_url: impl Into<String>,
        size: ImageSize,
        style_id: impl Into<String>,
    ) -> HistoryWrite {
        let item = HistoryItem::new(
            HistoryItemId::new_v7(),
            image_url,
            self.next_timestamp(),
            size,
            style_id,
        );

        self.items.rcu(|current| {
            let mut next = Vec::with_capacity(current.len() + 1);
            next.push(item.clone());
            next.extend(current.iter().cloned());
            next
        });

        let repository = Arc::clone(&self.repository);
        let gate = Arc::clone(&self.gate);
        let recorded_after = gate.clears.load(Ordering::Acquire);
        let pending = item.clone();
        let task = tokio::spawn(async move {
            let item_id = pending.id.clone();
            let _write = gate.lock.read().await;
            if gate.clears.load(Ordering::Acquire) != recorded_after {
                tracing::debug!(item_id = %item_id, "history cleared before item was persisted");
                return false;
            }

            match repository.put(pending).await {
                Ok(()) => {
                    tracing::debug!(item_id = %item_id, "history item persisted");
                    true
                }
                Err(error) => {
                    tracing::warn!(
                        item_id = %item_id,
                        stage = error.stage(),
                        %error,
                        "history item kept in memory only"
                    );
                    false
                }
            }
        });

        HistoryWrite { item, task }
    }

    /// Unknown or retired style ids restore as the default style.
    pub fn restore(item: &HistoryItem) -> RestoredGeneration {
        RestoredGeneration {
            size: item.size,
            style_id: resolve_style(&item.style_id).id.to_string(),
            image_url: item.image_url.clone(),
        }
    }

    pub fn restore_by_id(&self, id: &HistoryItemId) -> Option<RestoredGeneration> {
        self.items
            .load()
            .iter()
            .find(|item| &item.id == id)
            .map(Self::restore)
    }

    /// Waits for in-flight writes, then empties store and list. Writes still
    /// queued from earlier generations are dropped.
    pub async fn clear_history(&self) -> StorageResult<()> {
        let _exclusive = self.gate.lock.write().await;
        self.repository.clear().await?;
        self.gate.clears.fetch_add(1, Ordering::AcqRel);
        self.items.store(Arc::new(Vec::new()));
        tracing::info!("history reset");
        Ok(())
    }

    fn next_timestamp(&self) -> u64 {
        let now = unix_timestamp_millis();
        let mut previous = self.last_timestamp.load(Ordering::Acquire);
        loop {
            let candidate = now.max(previous.saturating_add(1));
            match self.last_timestamp.compare_exchange_weak(
                previous,
                candidate,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return candidate,
                Err(actual) => previous = actual,
            }
        }
    }
}

fn unix_timestamp_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |duration| duration.as_millis() as u64)
}
