//! Named FIFO queues of item snapshots.
//!
//! Every queue holds its own copies: `enqueue` clones the item, so a
//! worker mutating what it dequeued never affects another queue.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use tokio::sync::{Mutex, RwLock};
use tracing::debug;

use impact_core::{Item, ItemId};

use crate::error::{BackendError, BackendResult};

/// Name of the queue feeding the alias worker.
pub const ALIAS_QUEUE: &str = "aliases";

/// One FIFO queue.
#[derive(Default)]
pub struct NamedQueue {
    items: Mutex<VecDeque<Item>>,
}

impl NamedQueue {
    pub async fn push(&self, item: Item) {
        self.items.lock().await.push_back(item);
    }

    pub async fn pop(&self) -> Option<Item> {
        self.items.lock().await.pop_front()
    }

    pub async fn ids(&self) -> Vec<ItemId> {
        self.items.lock().await.iter().map(|i| i.id.clone()).collect()
    }

    pub async fn len(&self) -> usize {
        self.items.lock().await.len()
    }
}

/// Owns every queue by name.
///
/// The name map is only locked to look a queue up or declare one; pushes
/// and pops lock the individual queue.
#[derive(Default)]
pub struct QueueManager {
    queues: RwLock<HashMap<String, Arc<NamedQueue>>>,
}

impl QueueManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create `name` if it does not exist yet.
    pub async fn declare(&self, name: &str) -> Arc<NamedQueue> {
        if let Some(q) = self.queues.read().await.get(name) {
            return q.clone();
        }
        let mut queues = self.queues.write().await;
        queues
            .entry(name.to_string())
            .or_insert_with(|| {
                debug!(queue = %name, "queue declared");
                Arc::new(NamedQueue::default())
            })
            .clone()
    }

    pub async fn queue(&self, name: &str) -> BackendResult<Arc<NamedQueue>> {
        self.queues
            .read()
            .await
            .get(name)
            .cloned()
            .ok_or_else(|| BackendError::UnknownQueue(name.to_string()))
    }

    /// Append a copy of `item` to the tail of `name`.
    pub async fn enqueue(&self, name: &str, item: &Item) -> BackendResult<()> {
        self.queue(name).await?.push(item.clone()).await;
        debug!(queue = %name, item_id = %item.id, "enqueued");
        Ok(())
    }

    /// Remove the head of `name`, or `None` when it is empty.
    pub async fn dequeue(&self, name: &str) -> BackendResult<Option<Item>> {
        Ok(self.queue(name).await?.pop().await)
    }

    /// Item ids currently waiting in `name`, head first. Diagnostics only.
    pub async fn peek_ids(&self, name: &str) -> BackendResult<Vec<ItemId>> {
        Ok(self.queue(name).await?.ids().await)
    }

    pub async fn len(&self, name: &str) -> BackendResult<usize> {
        Ok(self.queue(name).await?.len().await)
    }

    pub async fn is_empty(&self, name: &str) -> BackendResult<bool> {
        Ok(self.len(name).await? == 0)
    }

    pub async fn queue_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.queues.read().await.keys().cloned().collect();
        names.sort();
        names
    }
}
