//! Backend assembly: one queue monitor, one alias worker and one metrics
//! worker per metrics provider, all sharing a store and a queue manager.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::info;

use impact_core::config::BackendConfig;
use impact_providers::ProviderRegistry;
use impact_state::ItemStore;

use crate::error::BackendResult;
use crate::monitor::QueueMonitor;
use crate::queue::{QueueManager, ALIAS_QUEUE};
use crate::resolver::AliasResolver;
use crate::retry::RetryPolicy;
use crate::worker::{AliasWorker, DispatchWorker, MetricsWorker};

/// Timing knobs for the background tasks.
#[derive(Debug, Clone)]
pub struct BackendSettings {
    pub monitor_interval: Duration,
    pub empty_queue_backoff: Duration,
    pub max_alias_passes: u32,
    pub retry: RetryPolicy,
}

impl BackendSettings {
    pub fn from_config(config: &BackendConfig) -> Self {
        Self {
            monitor_interval: config.monitor_interval(),
            empty_queue_backoff: config.empty_queue_backoff(),
            max_alias_passes: config.max_alias_passes,
            retry: RetryPolicy::from_config(&config.retry, config.provider_timeout()),
        }
    }
}

/// The running pipeline.
pub struct Backend {
    queues: Arc<QueueManager>,
    shutdown_tx: watch::Sender<bool>,
    handles: Vec<JoinHandle<()>>,
}

impl Backend {
    /// Declare every queue and spawn all background tasks.
    pub async fn start(
        store: ItemStore,
        registry: ProviderRegistry,
        settings: BackendSettings,
    ) -> BackendResult<Self> {
        let queues = Arc::new(QueueManager::new());
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        queues.declare(ALIAS_QUEUE).await;
        let mut workers: Vec<Box<dyn DispatchWorker>> = Vec::new();
        for provider in registry.metrics_providers() {
            queues.declare(provider.id()).await;
            workers.push(Box::new(MetricsWorker::new(
                store.clone(),
                queues.clone(),
                &registry,
                provider.id(),
                settings.retry.clone(),
                settings.empty_queue_backoff,
            )?));
        }
        workers.push(Box::new(AliasWorker::new(
            store.clone(),
            queues.clone(),
            registry.clone(),
            AliasResolver::new(registry.clone(), settings.max_alias_passes, settings.retry.clone()),
            settings.retry.clone(),
            settings.empty_queue_backoff,
        )));

        let mut handles = Vec::new();
        let monitor = QueueMonitor::new(store, queues.clone(), settings.monitor_interval);
        let rx = shutdown_rx.clone();
        handles.push(tokio::spawn(async move { monitor.run(rx).await }));

        for worker in workers {
            let rx = shutdown_rx.clone();
            handles.push(tokio::spawn(async move { worker.run(rx).await }));
        }

        let names = queues.queue_names().await;
        info!(tasks = handles.len(), queues = ?names, "backend started");
        Ok(Self {
            queues,
            shutdown_tx,
            handles,
        })
    }

    pub fn queues(&self) -> &Arc<QueueManager> {
        &self.queues
    }

    /// Signal shutdown and wait for every task to exit.
    pub async fn stop(self) {
        let _ = self.shutdown_tx.send(true);
        for handle in self.handles {
            let _ = handle.await;
        }
        info!("backend stopped");
    }
}
