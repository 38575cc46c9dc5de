//! Ordered set of the providers this deployment runs.

use std::sync::Arc;

use anyhow::{bail, Context};
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use tracing::info;

use impact_core::ImpactConfig;

use crate::github::GithubProvider;
use crate::http::{HttpClient, ReqwestClient};
use crate::provider::{Provider, ProviderMetadata};
use crate::pubmed::PubmedProvider;

/// Providers in registration order.
///
/// The order is significant: when two providers supply the same biblio
/// field, the one registered first is authoritative.
#[derive(Clone, Default)]
pub struct ProviderRegistry {
    providers: Vec<Arc<dyn Provider>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build the registry for every provider enabled in `config`.
    pub fn from_config(config: &ImpactConfig) -> anyhow::Result<Self> {
        let timeout = config.backend.provider_timeout();
        let mut registry = Self::new();

        let github = &config.providers.github;
        if github.enabled {
            let mut headers = HeaderMap::new();
            if let Some(token) = &github.api_token {
                let value = HeaderValue::from_str(&format!("token {token}"))
                    .context("github api_token is not a valid header value")?;
                headers.insert(AUTHORIZATION, value);
            }
            let http: Arc<dyn HttpClient> = Arc::new(
                ReqwestClient::with_headers(timeout, headers).context("building github client")?,
            );
            registry.register(Arc::new(GithubProvider::new(http)))?;
        }

        let pubmed = &config.providers.pubmed;
        if pubmed.enabled {
            let http: Arc<dyn HttpClient> =
                Arc::new(ReqwestClient::new(timeout).context("building pubmed client")?);
            registry.register(Arc::new(PubmedProvider::new(http, pubmed)))?;
        }

        info!(providers = ?registry.ids(), "provider registry ready");
        Ok(registry)
    }

    /// Add a provider. Ids must be unique.
    pub fn register(&mut self, provider: Arc<dyn Provider>) -> anyhow::Result<()> {
        if self.get(provider.id()).is_some() {
            bail!("provider {} registered twice", provider.id());
        }
        self.providers.push(provider);
        Ok(())
    }

    pub fn get(&self, id: &str) -> Option<Arc<dyn Provider>> {
        self.providers.iter().find(|p| p.id() == id).cloned()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<dyn Provider>> {
        self.providers.iter()
    }

    pub fn ids(&self) -> Vec<String> {
        self.providers.iter().map(|p| p.id().to_string()).collect()
    }

    pub fn len(&self) -> usize {
        self.providers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }

    pub fn alias_providers(&self) -> Vec<Arc<dyn Provider>> {
        self.filtered(|p| p.provides_aliases())
    }

    pub fn metrics_providers(&self) -> Vec<Arc<dyn Provider>> {
        self.filtered(|p| p.provides_metrics())
    }

    pub fn biblio_providers(&self) -> Vec<Arc<dyn Provider>> {
        self.filtered(|p| p.provides_biblio())
    }

    /// Metadata of every registered provider, in registration order.
    pub fn metadata(&self) -> Vec<ProviderMetadata> {
        self.providers.iter().map(|p| p.metadata().clone()).collect()
    }

    fn filtered(&self, keep: impl Fn(&dyn Provider) -> bool) -> Vec<Arc<dyn Provider>> {
        self.providers
            .iter()
            .filter(|p| keep(p.as_ref()))
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::testing::ScriptedHttp;
    use impact_core::config::PubmedConfig;

    fn registry() -> ProviderRegistry {
        let http: Arc<dyn HttpClient> = Arc::new(ScriptedHttp::new());
        let mut registry = ProviderRegistry::new();
        registry
            .register(Arc::new(GithubProvider::new(http.clone())))
            .unwrap();
        registry
            .register(Arc::new(PubmedProvider::new(http, &PubmedConfig::default())))
            .unwrap();
        registry
    }

    #[test]
    fn keeps_registration_order() {
        let registry = registry();
        assert_eq!(registry.ids(), vec!["github", "pubmed"]);
        assert_eq!(registry.metrics_providers().len(), 2);
        assert_eq!(registry.metadata()[1].id_namespaces, vec!["pmid"]);
        assert!(registry.get("pubmed").is_some());
        assert!(registry.get("delicious").is_none());
    }

    #[test]
    fn rejects_duplicate_ids() {
        let mut registry = registry();
        let http: Arc<dyn HttpClient> = Arc::new(ScriptedHttp::new());
        assert!(registry.register(Arc::new(GithubProvider::new(http))).is_err());
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn disabled_providers_are_skipped() {
        let mut config = ImpactConfig::default();
        config.providers.github.enabled = false;
        let registry = ProviderRegistry::from_config(&config).unwrap();
        assert_eq!(registry.ids(), vec!["pubmed"]);
    }
}
