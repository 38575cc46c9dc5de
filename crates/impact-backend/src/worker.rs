//! Dispatch workers: one task per queue.
//!
//! The alias worker takes queued items through alias resolution and
//! biblio collection, then fans each item out to the queue of every
//! metrics provider that can identify it. A metrics worker drains one
//! provider's queue and merges what the provider returns.
//!
//! Provider failures never escape a worker: they are retried per the
//! [`RetryPolicy`], then recorded on the item for that provider.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use impact_core::{epoch_millis, Item, ItemStatus, ProviderFailure};
use impact_providers::{Provider, ProviderError, ProviderRegistry};
use impact_state::ItemStore;

use crate::error::{BackendError, BackendResult};
use crate::queue::{QueueManager, ALIAS_QUEUE};
use crate::resolver::AliasResolver;
use crate::retry::RetryPolicy;

#[async_trait]
pub trait DispatchWorker: Send + Sync {
    fn queue_name(&self) -> &str;

    fn empty_backoff(&self) -> Duration;

    /// Handle the head of the queue. `Ok(false)` when the queue was empty.
    async fn process_one(&self, shutdown: &watch::Receiver<bool>) -> BackendResult<bool>;

    /// Drain the queue until shutdown, backing off while it is empty.
    async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!(queue = %self.queue_name(), "worker started");
        loop {
            if *shutdown.borrow() {
                break;
            }
            match self.process_one(&shutdown).await {
                Ok(true) => continue,
                Ok(false) => {}
                Err(e) => error!(queue = %self.queue_name(), error = %e, "worker step failed"),
            }
            tokio::select! {
                _ = tokio::time::sleep(self.empty_backoff()) => {}
                _ = shutdown.changed() => {}
            }
        }
        info!(queue = %self.queue_name(), "worker stopped");
    }
}

// ── Alias worker ──────────────────────────────────────────────────

pub struct AliasWorker {
    store: ItemStore,
    queues: Arc<QueueManager>,
    registry: ProviderRegistry,
    resolver: AliasResolver,
    retry: RetryPolicy,
    empty_backoff: Duration,
}

impl AliasWorker {
    pub fn new(
        store: ItemStore,
        queues: Arc<QueueManager>,
        registry: ProviderRegistry,
        resolver: AliasResolver,
        retry: RetryPolicy,
        empty_backoff: Duration,
    ) -> Self {
        Self {
            store,
            queues,
            registry,
            resolver,
            retry,
            empty_backoff,
        }
    }

    /// Ask every biblio provider in registration order; the first provider
    /// to supply a field keeps it.
    async fn collect_biblio(
        &self,
        item: &Item,
        shutdown: &watch::Receiver<bool>,
    ) -> BackendResult<()> {
        for provider in self.registry.biblio_providers() {
            let Some(pid) = provider.best_id(&item.aliases) else {
                continue;
            };
            let attempted = self
                .retry
                .run(provider.id(), shutdown, || provider.collect_biblio(&pid))
                .await;
            match attempted.result {
                Ok(biblio) if biblio.is_empty() => {}
                Ok(biblio) => {
                    let (_, accepted) = self.store.set_biblio_fields(
                        &item.id,
                        provider.id(),
                        &biblio,
                        epoch_millis(),
                    )?;
                    debug!(item_id = %item.id, provider = %provider.id(), fields = ?accepted, "biblio stored");
                }
                Err(e) => {
                    warn!(item_id = %item.id, provider = %provider.id(), error = %e, "biblio lookup failed");
                }
            }
        }
        Ok(())
    }
}

#[async_trait]
impl DispatchWorker for AliasWorker {
    fn queue_name(&self) -> &str {
        ALIAS_QUEUE
    }

    fn empty_backoff(&self) -> Duration {
        self.empty_backoff
    }

    async fn process_one(&self, shutdown: &watch::Receiver<bool>) -> BackendResult<bool> {
        let Some(item) = self.queues.dequeue(ALIAS_QUEUE).await? else {
            return Ok(false);
        };
        debug!(item_id = %item.id, "resolving aliases");
        self.store.set_status(&item.id, ItemStatus::AliasesResolving)?;

        let outcome = self.resolver.resolve(&item.aliases, shutdown).await;
        let (item, _) = self
            .store
            .add_aliases(&item.id, &outcome.added, epoch_millis())?;

        self.collect_biblio(&item, shutdown).await?;

        let relevant: BTreeSet<String> = self
            .registry
            .metrics_providers()
            .iter()
            .filter(|p| p.best_id(&item.aliases).is_some())
            .map(|p| p.id().to_string())
            .collect();

        let item = self.store.begin_metrics(&item.id, &relevant)?;
        for provider_id in &relevant {
            self.queues.enqueue(provider_id, &item).await?;
        }
        info!(
            item_id = %item.id,
            aliases = item.aliases.len(),
            providers = relevant.len(),
            "aliases resolved"
        );
        Ok(true)
    }
}

// ── Metrics worker ────────────────────────────────────────────────

pub struct MetricsWorker {
    store: ItemStore,
    queues: Arc<QueueManager>,
    provider: Arc<dyn Provider>,
    retry: RetryPolicy,
    empty_backoff: Duration,
}

impl MetricsWorker {
    /// Worker for the registered metrics provider `provider_id`.
    pub fn new(
        store: ItemStore,
        queues: Arc<QueueManager>,
        registry: &ProviderRegistry,
        provider_id: &str,
        retry: RetryPolicy,
        empty_backoff: Duration,
    ) -> BackendResult<Self> {
        let provider = registry
            .get(provider_id)
            .filter(|p| p.provides_metrics())
            .ok_or_else(|| BackendError::UnknownProvider(provider_id.to_string()))?;
        Ok(Self {
            store,
            queues,
            provider,
            retry,
            empty_backoff,
        })
    }

    fn record_failure(
        &self,
        item_id: &str,
        err: &ProviderError,
        attempts: u32,
    ) -> BackendResult<()> {
        let failure = ProviderFailure {
            kind: err.kind(),
            message: err.to_string(),
            attempts,
            at: epoch_millis(),
        };
        self.store
            .finish_provider(item_id, self.provider.id(), Some(failure))?;
        Ok(())
    }
}

#[async_trait]
impl DispatchWorker for MetricsWorker {
    fn queue_name(&self) -> &str {
        self.provider.id()
    }

    fn empty_backoff(&self) -> Duration {
        self.empty_backoff
    }

    async fn process_one(&self, shutdown: &watch::Receiver<bool>) -> BackendResult<bool> {
        let Some(item) = self.queues.dequeue(self.provider.id()).await? else {
            return Ok(false);
        };
        let provider = self.provider.id();

        let pid = match self.provider.require_best_id(&item.aliases) {
            Ok(pid) => pid,
            Err(e) => {
                error!(item_id = %item.id, %provider, error = %e, "item routed to irrelevant provider");
                self.record_failure(&item.id, &e, 0)?;
                return Ok(true);
            }
        };

        let attempted = self
            .retry
            .run(provider, shutdown, || self.provider.collect_metrics(&pid))
            .await;
        match attempted.result {
            Ok(values) => {
                self.store
                    .merge_metrics(&item.id, provider, &values, epoch_millis())?;
                self.store.finish_provider(&item.id, provider, None)?;
                debug!(item_id = %item.id, %provider, metrics = values.len(), "metrics collected");
            }
            Err(e) => {
                warn!(
                    item_id = %item.id,
                    %provider,
                    attempts = attempted.attempts,
                    error = %e,
                    "metrics collection failed"
                );
                self.record_failure(&item.id, &e, attempted.attempts)?;
            }
        }
        Ok(true)
    }
}
