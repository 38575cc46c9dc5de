//! The uniform capability surface every provider implements.

use std::collections::{BTreeMap, HashSet};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use impact_core::{Alias, AliasSet, Biblio, MetricValues};

use crate::error::{ProviderError, ProviderResult};

/// Maximum number of member items returned by one query.
pub const MEMBER_ITEMS_LIMIT: usize = 100;

/// Display metadata for one metric.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricMeta {
    pub display_name: String,
    pub description: String,
    pub icon: String,
}

/// Static descriptor of a provider, fixed at registration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderMetadata {
    pub id: String,
    pub name: String,
    pub url: String,
    pub description: String,
    /// Namespaces this provider can collect for, most preferred first.
    pub id_namespaces: Vec<String>,
    /// Short metric name → display metadata.
    pub metrics: BTreeMap<String, MetricMeta>,
}

impl ProviderMetadata {
    /// Fully qualified metric names (`{provider}:{metric}`).
    pub fn metric_names(&self) -> Vec<String> {
        self.metrics
            .keys()
            .map(|m| format!("{}:{}", self.id, m))
            .collect()
    }
}

/// Result of a member-item query.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MemberItems {
    pub items: Vec<Alias>,
    /// More than [`MEMBER_ITEMS_LIMIT`] hits existed.
    pub truncated: bool,
}

impl MemberItems {
    /// Deduplicate hits (first occurrence wins) and cap them.
    pub fn from_hits(hits: impl IntoIterator<Item = Alias>) -> Self {
        let mut seen = HashSet::new();
        let mut items: Vec<Alias> = hits.into_iter().filter(|a| seen.insert(a.clone())).collect();
        let truncated = items.len() > MEMBER_ITEMS_LIMIT;
        items.truncate(MEMBER_ITEMS_LIMIT);
        Self { items, truncated }
    }
}

/// A pluggable adapter to one external metrics source.
///
/// Capabilities a provider does not advertise keep their default bodies,
/// which return empty results.
#[async_trait]
pub trait Provider: Send + Sync {
    fn metadata(&self) -> &ProviderMetadata;

    fn id(&self) -> &str {
        &self.metadata().id
    }

    fn provides_aliases(&self) -> bool {
        false
    }

    fn provides_metrics(&self) -> bool {
        false
    }

    fn provides_biblio(&self) -> bool {
        false
    }

    fn provides_member_items(&self) -> bool {
        false
    }

    fn is_relevant_alias(&self, alias: &Alias) -> bool;

    /// The identifier this provider collects for, picked by namespace preference.
    fn best_id(&self, aliases: &AliasSet) -> Option<String> {
        self.metadata()
            .id_namespaces
            .iter()
            .find_map(|ns| aliases.ids(ns).first().cloned())
    }

    /// Like [`Provider::best_id`], but a missing id is a dispatch bug.
    fn require_best_id(&self, aliases: &AliasSet) -> ProviderResult<String> {
        self.best_id(aliases).ok_or_else(|| {
            let known: Vec<String> = aliases.iter().map(|a| a.to_string()).collect();
            ProviderError::not_relevant(self.id(), known.join(","))
        })
    }

    /// New aliases for the given ones. Never returns an alias already in `aliases`.
    async fn resolve_aliases(&self, _aliases: &[Alias]) -> ProviderResult<Vec<Alias>> {
        Ok(Vec::new())
    }

    async fn collect_metrics(&self, _id: &str) -> ProviderResult<MetricValues> {
        Ok(MetricValues::new())
    }

    async fn collect_biblio(&self, _id: &str) -> ProviderResult<Biblio> {
        Ok(Biblio::new())
    }

    /// Link documenting where a metric value came from. No I/O.
    fn provenance_url(&self, _metric_name: &str, _aliases: &AliasSet) -> Option<String> {
        None
    }

    async fn member_items(&self, _query: &str, _query_type: &str) -> ProviderResult<MemberItems> {
        Ok(MemberItems::default())
    }
}

/// Drop aliases already present in `known`, and duplicates.
pub(crate) fn only_new(known: &[Alias], found: Vec<Alias>) -> Vec<Alias> {
    let mut seen: HashSet<Alias> = known.iter().cloned().collect();
    found.into_iter().filter(|a| seen.insert(a.clone())).collect()
}
