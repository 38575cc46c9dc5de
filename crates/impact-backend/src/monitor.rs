//! Queue monitor: moves requested items from storage onto the alias queue.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{debug, error, info};

use impact_core::epoch_millis;
use impact_state::ItemStore;

use crate::error::BackendResult;
use crate::queue::{QueueManager, ALIAS_QUEUE};

pub struct QueueMonitor {
    store: ItemStore,
    queues: Arc<QueueManager>,
    interval: Duration,
}

impl QueueMonitor {
    pub fn new(store: ItemStore, queues: Arc<QueueManager>, interval: Duration) -> Self {
        Self {
            store,
            queues,
            interval,
        }
    }

    /// One scan of storage. Returns how many items were queued.
    pub async fn poll_once(&self) -> BackendResult<usize> {
        let due = self.store.find_items_needing_queue()?;
        let mut queued = 0;
        for item in due {
            let item = self.store.mark_queued(&item.id, epoch_millis())?;
            self.queues.enqueue(ALIAS_QUEUE, &item).await?;
            debug!(item_id = %item.id, last_queued = ?item.last_queued, "item queued");
            queued += 1;
        }
        Ok(queued)
    }

    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        self.queues.declare(ALIAS_QUEUE).await;
        info!(interval = ?self.interval, "queue monitor started");

        loop {
            if *shutdown.borrow() {
                break;
            }
            match self.poll_once().await {
                Ok(0) => {}
                Ok(n) => debug!(queued = n, "monitor pass"),
                Err(e) => error!(error = %e, "queue monitor pass failed"),
            }

            tokio::select! {
                _ = tokio::time::sleep(self.interval) => {}
                _ = shutdown.changed() => {}
            }
        }
        info!("queue monitor stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use impact_core::{Alias, ItemStatus};

    async fn setup() -> (ItemStore, Arc<QueueManager>, QueueMonitor) {
        let store = ItemStore::open_in_memory().unwrap();
        let queues = Arc::new(QueueManager::new());
        queues.declare(ALIAS_QUEUE).await;
        let monitor = QueueMonitor::new(store.clone(), queues.clone(), Duration::from_millis(5));
        (store, queues, monitor)
    }

    #[tokio::test]
    async fn queues_requested_items_once() {
        let (store, queues, monitor) = setup().await;
        let (id, _) = store
            .create_or_get_item(&[Alias::new("doi", "10.1/a")], epoch_millis())
            .unwrap();

        assert_eq!(monitor.poll_once().await.unwrap(), 1);
        assert_eq!(monitor.poll_once().await.unwrap(), 0);

        let queued = queues.dequeue(ALIAS_QUEUE).await.unwrap().unwrap();
        assert_eq!(queued.id, id);
        assert_eq!(queued.status, ItemStatus::Queued);
        assert!(queued.currently_updating);

        let stored = store.require_item(&id).unwrap();
        assert!(stored.last_queued.unwrap() >= stored.last_requested);
    }

    #[tokio::test]
    async fn refresh_queues_again() {
        let (store, queues, monitor) = setup().await;
        let (id, _) = store
            .create_or_get_item(&[Alias::new("doi", "10.1/a")], epoch_millis())
            .unwrap();
        monitor.poll_once().await.unwrap();
        store.request_refresh(&id, epoch_millis()).unwrap();
        assert_eq!(monitor.poll_once().await.unwrap(), 1);
        assert_eq!(queues.len(ALIAS_QUEUE).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn run_stops_on_shutdown() {
        let (store, queues, monitor) = setup().await;
        store
            .create_or_get_item(&[Alias::new("doi", "10.1/a")], epoch_millis())
            .unwrap();
        let (tx, rx) = watch::channel(false);
        let handle = tokio::spawn(async move { monitor.run(rx).await });

        tokio::time::sleep(Duration::from_millis(50)).await;
        tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(queues.len(ALIAS_QUEUE).await.unwrap(), 1);
    }
}
