//! Cross-crate scenarios: store → monitor → alias worker → metrics worker.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::watch;

use impact_backend::{
    AliasResolver, AliasWorker, Backend, BackendSettings, DispatchWorker, MetricsWorker,
    QueueManager, QueueMonitor, RetryPolicy, ALIAS_QUEUE,
};
use impact_core::{epoch_millis, Alias, FailureKind, Item, MetricValue, MetricValues};
use impact_providers::{Provider, ProviderError, ProviderMetadata, ProviderRegistry, ProviderResult};
use impact_state::ItemStore;

const PROVIDER: &str = "provider";

/// Knows DOIs, finds no new aliases, and answers metrics from a script
/// keyed by DOI.
struct MockProvider {
    meta: ProviderMetadata,
    script: Mutex<HashMap<String, Vec<ProviderResult<MetricValues>>>>,
    calls: Mutex<HashMap<String, u32>>,
}

impl MockProvider {
    fn new() -> Self {
        Self {
            meta: ProviderMetadata {
                id: PROVIDER.to_string(),
                name: "Mock".to_string(),
                url: String::new(),
                description: String::new(),
                id_namespaces: vec!["doi".to_string()],
                metrics: BTreeMap::new(),
            },
            script: Mutex::new(HashMap::new()),
            calls: Mutex::new(HashMap::new()),
        }
    }

    fn answer(self, doi: &str, results: Vec<ProviderResult<MetricValues>>) -> Self {
        self.script.lock().unwrap().insert(doi.to_string(), results);
        self
    }

    fn calls(&self, doi: &str) -> u32 {
        self.calls.lock().unwrap().get(doi).copied().unwrap_or(0)
    }
}

#[async_trait]
impl Provider for MockProvider {
    fn metadata(&self) -> &ProviderMetadata {
        &self.meta
    }

    fn provides_aliases(&self) -> bool {
        true
    }

    fn provides_metrics(&self) -> bool {
        true
    }

    fn is_relevant_alias(&self, alias: &Alias) -> bool {
        alias.namespace == "doi"
    }

    async fn resolve_aliases(&self, _aliases: &[Alias]) -> ProviderResult<Vec<Alias>> {
        Ok(Vec::new())
    }

    async fn collect_metrics(&self, id: &str) -> ProviderResult<MetricValues> {
        *self.calls.lock().unwrap().entry(id.to_string()).or_default() += 1;
        let mut script = self.script.lock().unwrap();
        match script.get_mut(id) {
            Some(results) if results.len() > 1 => results.remove(0),
            // The last scripted answer repeats.
            Some(results) if results.len() == 1 => results[0].clone(),
            _ => Ok(MetricValues::new()),
        }
    }
}

fn metric(value: i64) -> ProviderResult<MetricValues> {
    Ok(MetricValues::from([("metric".to_string(), MetricValue::Count(value))]))
}

fn retry() -> RetryPolicy {
    RetryPolicy {
        max_attempts: 3,
        base_delay: Duration::from_millis(1),
        max_delay: Duration::from_millis(5),
        call_timeout: Duration::from_secs(1),
    }
}

struct Pipeline {
    store: ItemStore,
    provider: Arc<MockProvider>,
    monitor: QueueMonitor,
    aliases: AliasWorker,
    metrics: MetricsWorker,
    queues: Arc<QueueManager>,
}

async fn pipeline(provider: MockProvider) -> Pipeline {
    let store = ItemStore::open_in_memory().unwrap();
    let provider = Arc::new(provider);
    let mut registry = ProviderRegistry::new();
    registry.register(provider.clone()).unwrap();

    let queues = Arc::new(QueueManager::new());
    queues.declare(ALIAS_QUEUE).await;
    queues.declare(PROVIDER).await;

    let backoff = Duration::from_millis(1);
    Pipeline {
        monitor: QueueMonitor::new(store.clone(), queues.clone(), backoff),
        aliases: AliasWorker::new(
            store.clone(),
            queues.clone(),
            registry.clone(),
            AliasResolver::new(registry.clone(), 3, retry()),
            retry(),
            backoff,
        ),
        metrics: MetricsWorker::new(store.clone(), queues.clone(), &registry, PROVIDER, retry(), backoff)
            .unwrap(),
        store,
        provider,
        queues,
    }
}

impl Pipeline {
    fn submit(&self, doi: &str) -> String {
        let (id, created) = self
            .store
            .create_or_get_item(&[Alias::new("doi", doi)], epoch_millis())
            .unwrap();
        assert!(created);
        id
    }

    /// Monitor pass, then drain the alias queue and the provider queue.
    async fn cycle(&self) {
        let (_tx, rx) = watch::channel(false);
        self.monitor.poll_once().await.unwrap();
        while self.aliases.process_one(&rx).await.unwrap() {}
        while self.metrics.process_one(&rx).await.unwrap() {}
    }

    fn item(&self, id: &str) -> Item {
        self.store.require_item(id).unwrap()
    }
}

fn history(item: &Item) -> Vec<MetricValue> {
    item.metrics
        .get("provider:metric")
        .map(|h| h.iter().map(|s| s.value.clone()).collect())
        .unwrap_or_default()
}

#[tokio::test]
async fn second_pass_appends_a_second_snapshot() {
    let p = pipeline(MockProvider::new().answer("10.123", vec![metric(5), metric(7)])).await;
    let id = p.submit("10.123");

    p.cycle().await;
    let item = p.item(&id);
    assert_eq!(history(&item), vec![MetricValue::Count(5)]);
    assert_eq!(item.aliases.len(), 1);
    assert!(item.is_idle());

    p.store.request_refresh(&id, epoch_millis()).unwrap();
    p.cycle().await;
    let item = p.item(&id);
    assert_eq!(history(&item), vec![MetricValue::Count(5), MetricValue::Count(7)]);
    let snapshots = &item.metrics["provider:metric"];
    assert!(snapshots[0].collected_at <= snapshots[1].collected_at);
    assert!(item.is_idle());
}

#[tokio::test]
async fn failing_item_does_not_block_the_queue() {
    let down = || Err(ProviderError::unavailable(PROVIDER, "503"));
    let p = pipeline(
        MockProvider::new()
            .answer("10.1/a", vec![down()])
            .answer("10.1/b", vec![metric(3)]),
    )
    .await;
    let a = p.submit("10.1/a");
    let b = p.submit("10.1/b");

    let (_tx, rx) = watch::channel(false);
    p.monitor.poll_once().await.unwrap();
    while p.aliases.process_one(&rx).await.unwrap() {}
    let waiting = p.queues.peek_ids(PROVIDER).await.unwrap();
    assert_eq!(waiting.len(), 2);
    while p.metrics.process_one(&rx).await.unwrap() {}

    assert_eq!(p.provider.calls("10.1/a"), 3);
    assert_eq!(p.provider.calls("10.1/b"), 1);

    let item_a = p.item(&a);
    assert!(item_a.metrics.is_empty());
    assert_eq!(item_a.provider_failures[PROVIDER].kind, FailureKind::Unavailable);
    assert_eq!(item_a.provider_failures[PROVIDER].attempts, 3);
    assert!(!item_a.currently_updating);

    let item_b = p.item(&b);
    assert_eq!(history(&item_b), vec![MetricValue::Count(3)]);
    assert!(item_b.provider_failures.is_empty());
}

#[tokio::test]
async fn resubmitting_a_known_alias_returns_the_same_item() {
    let p = pipeline(MockProvider::new()).await;
    let id = p.submit("10.123");
    let (again, created) = p
        .store
        .create_or_get_item(&[Alias::new("doi", "10.123")], epoch_millis())
        .unwrap();
    assert_eq!(again, id);
    assert!(!created);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn running_backend_collects_until_idle() {
    let store = ItemStore::open_in_memory().unwrap();
    let mut registry = ProviderRegistry::new();
    registry
        .register(Arc::new(MockProvider::new().answer("10.123", vec![metric(5)])))
        .unwrap();
    let settings = BackendSettings {
        monitor_interval: Duration::from_millis(10),
        empty_queue_backoff: Duration::from_millis(5),
        max_alias_passes: 3,
        retry: retry(),
    };

    let backend = Backend::start(store.clone(), registry, settings).await.unwrap();
    let (id, _) = store
        .create_or_get_item(&[Alias::new("doi", "10.123")], epoch_millis())
        .unwrap();

    let finished = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            let item = store.require_item(&id).unwrap();
            if item.is_idle() && !item.metrics.is_empty() {
                return item;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap();
    assert_eq!(history(&finished), vec![MetricValue::Count(5)]);

    tokio::time::timeout(Duration::from_secs(2), backend.stop())
        .await
        .unwrap();
}
