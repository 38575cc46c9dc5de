//! Shared types used across the impact crates.
//!
//! Items are persisted as JSON and copied by value onto the in-memory
//! queues, so every type here owns its data outright.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::{Deserialize, Serialize};

/// Opaque item identifier, generated once at creation.
pub type ItemId = String;

/// Unix epoch milliseconds.
pub type Timestamp = u64;

/// Current wall clock as epoch milliseconds.
pub fn epoch_millis() -> Timestamp {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// Strip whitespace and invisible characters that creep into pasted ids.
pub fn clean_id(raw: &str) -> String {
    raw.chars()
        .filter(|c| !matches!(c, '\u{200b}' | '\u{200c}' | '\u{200d}' | '\u{feff}' | '\t' | '\r' | '\n'))
        .collect::<String>()
        .trim()
        .to_string()
}

// ── Alias ─────────────────────────────────────────────────────────

/// A `(namespace, identifier)` pair naming an item in one external system.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Alias {
    pub namespace: String,
    pub id: String,
}

impl Alias {
    pub fn new(namespace: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            id: id.into(),
        }
    }

    /// Key used by the alias index: `{namespace}:{id}`.
    pub fn index_key(&self) -> String {
        format!("{}:{}", self.namespace, self.id)
    }

    /// Parse an index key back into an alias. The namespace never contains `:`.
    pub fn parse_index_key(key: &str) -> Option<Self> {
        let (namespace, id) = key.split_once(':')?;
        if namespace.is_empty() || id.is_empty() {
            return None;
        }
        Some(Self::new(namespace, id))
    }
}

impl fmt::Display for Alias {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.namespace, self.id)
    }
}

/// Grow-only alias set, grouped by namespace.
///
/// Identifiers keep their insertion order inside a namespace (for display);
/// membership is a set, so re-inserting a known pair is a no-op. There is
/// no removal operation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AliasSet(BTreeMap<String, Vec<String>>);

impl AliasSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_aliases<'a>(aliases: impl IntoIterator<Item = &'a Alias>) -> Self {
        let mut set = Self::new();
        for alias in aliases {
            set.insert(alias);
        }
        set
    }

    /// Insert one alias. Returns true if it was not already present.
    pub fn insert(&mut self, alias: &Alias) -> bool {
        let ids = self.0.entry(alias.namespace.clone()).or_default();
        if ids.iter().any(|id| id == &alias.id) {
            return false;
        }
        ids.push(alias.id.clone());
        true
    }

    /// Insert many aliases, returning the ones that were new.
    pub fn extend<'a>(&mut self, aliases: impl IntoIterator<Item = &'a Alias>) -> Vec<Alias> {
        aliases
            .into_iter()
            .filter(|alias| self.insert(alias))
            .cloned()
            .collect()
    }

    pub fn contains(&self, alias: &Alias) -> bool {
        self.0
            .get(&alias.namespace)
            .is_some_and(|ids| ids.iter().any(|id| id == &alias.id))
    }

    /// Identifiers recorded under one namespace, in insertion order.
    pub fn ids(&self, namespace: &str) -> &[String] {
        self.0.get(namespace).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn namespaces(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = Alias> + '_ {
        self.0
            .iter()
            .flat_map(|(ns, ids)| ids.iter().map(move |id| Alias::new(ns.as_str(), id.as_str())))
    }

    pub fn to_vec(&self) -> Vec<Alias> {
        self.iter().collect()
    }

    pub fn len(&self) -> usize {
        self.0.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

// ── Metrics ───────────────────────────────────────────────────────

/// A single metric value as reported by a provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetricValue {
    Count(i64),
    Number(f64),
    Text(String),
}

impl From<i64> for MetricValue {
    fn from(v: i64) -> Self {
        MetricValue::Count(v)
    }
}

impl From<usize> for MetricValue {
    fn from(v: usize) -> Self {
        MetricValue::Count(v as i64)
    }
}

impl From<&str> for MetricValue {
    fn from(v: &str) -> Self {
        MetricValue::Text(v.to_string())
    }
}

impl fmt::Display for MetricValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MetricValue::Count(v) => write!(f, "{v}"),
            MetricValue::Number(v) => write!(f, "{v}"),
            MetricValue::Text(v) => f.write_str(v),
        }
    }
}

/// One timestamped value of one metric.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricSnapshot {
    pub value: MetricValue,
    pub collected_at: Timestamp,
}

/// Values returned by a single provider collection pass.
pub type MetricValues = BTreeMap<String, MetricValue>;

/// Accumulated history: metric name → snapshots ordered by `collected_at`.
pub type Metrics = BTreeMap<String, Vec<MetricSnapshot>>;

/// Bibliographic fields returned by a provider.
pub type Biblio = BTreeMap<String, serde_json::Value>;

/// A bibliographic field together with the provider that supplied it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BiblioField {
    pub value: serde_json::Value,
    pub provider: String,
}

// ── Item ──────────────────────────────────────────────────────────

/// Where an item is in the collection cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemStatus {
    Requested,
    Queued,
    AliasesResolving,
    MetricsCollecting,
    Idle,
}

/// Classification of a provider failure, as recorded on the item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    RateLimited,
    Unavailable,
    ContentMalformed,
    NotRelevant,
}

/// The last failure a provider reported for an item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderFailure {
    pub kind: FailureKind,
    pub message: String,
    pub attempts: u32,
    pub at: Timestamp,
}

/// An impact-tracked artifact (paper, dataset, repository, ...).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Item {
    pub id: ItemId,
    pub aliases: AliasSet,
    #[serde(default)]
    pub biblio: BTreeMap<String, BiblioField>,
    #[serde(default)]
    pub metrics: Metrics,
    pub created: Timestamp,
    pub last_modified: Timestamp,
    pub last_requested: Timestamp,
    /// Unset until the queue monitor first picks the item up.
    pub last_queued: Option<Timestamp>,
    pub currently_updating: bool,
    pub status: ItemStatus,
    /// Outstanding metrics passes per provider. Overlapping cycles each
    /// add one; an entry is dropped when its count reaches zero.
    #[serde(default)]
    pub pending_providers: BTreeMap<String, u32>,
    #[serde(default)]
    pub provider_failures: BTreeMap<String, ProviderFailure>,
}

impl Item {
    /// Create a freshly requested item.
    pub fn new(id: ItemId, aliases: AliasSet, now: Timestamp) -> Self {
        Self {
            id,
            aliases,
            biblio: BTreeMap::new(),
            metrics: Metrics::new(),
            created: now,
            last_modified: now,
            last_requested: now,
            last_queued: None,
            currently_updating: true,
            status: ItemStatus::Requested,
            pending_providers: BTreeMap::new(),
            provider_failures: BTreeMap::new(),
        }
    }

    /// Generate a new opaque item id.
    pub fn generate_id() -> ItemId {
        uuid::Uuid::new_v4().simple().to_string()
    }

    /// True if the queue monitor should pick this item up.
    pub fn needs_queue(&self) -> bool {
        match self.last_queued {
            None => true,
            Some(queued) => self.last_requested > queued,
        }
    }

    /// Latest snapshot of a metric by `collected_at`.
    pub fn current_metric(&self, name: &str) -> Option<&MetricSnapshot> {
        self.metrics
            .get(name)
            .and_then(|history| history.iter().max_by_key(|s| s.collected_at))
    }

    pub fn is_idle(&self) -> bool {
        self.status == ItemStatus::Idle && !self.currently_updating
    }
}

// ── Collection ────────────────────────────────────────────────────

/// A named, owned grouping of items guarded by a secret key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Collection {
    pub id: String,
    pub title: String,
    pub owner: Option<String>,
    pub created: Timestamp,
    pub last_modified: Timestamp,
    /// Hex sha256 of the collection key.
    pub key_hash: String,
    /// `{namespace}:{id}` → item id.
    pub alias_items: BTreeMap<String, ItemId>,
}

impl Collection {
    pub fn item_ids(&self) -> BTreeSet<ItemId> {
        self.alias_items.values().cloned().collect()
    }
}
