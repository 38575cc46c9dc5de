//! GitHub repositories: watchers and forks.
//!
//! Items are identified as `("github", "{user},{repo}")`.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use impact_core::{Alias, AliasSet, Biblio, MetricValue, MetricValues};

use crate::error::{ProviderError, ProviderResult};
use crate::extract::{extract_from_json, parse_json};
use crate::http::HttpClient;
use crate::provider::{only_new, MemberItems, MetricMeta, Provider, ProviderMetadata};

const PROVIDER_ID: &str = "github";
const NAMESPACE: &str = "github";
const API_BASE: &str = "https://api.github.com";
const ICON: &str = "https://github.com/fluidicon.png";

pub struct GithubProvider {
    http: Arc<dyn HttpClient>,
    metadata: ProviderMetadata,
}

impl GithubProvider {
    pub fn new(http: Arc<dyn HttpClient>) -> Self {
        let metric = |display: &str, description: &str| MetricMeta {
            display_name: display.to_string(),
            description: description.to_string(),
            icon: ICON.to_string(),
        };
        let metrics = BTreeMap::from([
            (
                "watchers".to_string(),
                metric("watchers", "The number of people who are watching the GitHub repository"),
            ),
            (
                "forks".to_string(),
                metric("forks", "The number of people who have forked the GitHub repository"),
            ),
        ]);
        Self {
            http,
            metadata: ProviderMetadata {
                id: PROVIDER_ID.to_string(),
                name: "GitHub".to_string(),
                url: "http://github.com".to_string(),
                description: "A social, online repository for open-source software.".to_string(),
                id_namespaces: vec![NAMESPACE.to_string()],
                metrics,
            },
        }
    }

    /// `"user,repo"` → `("user", "repo")`.
    fn split_id(id: &str) -> Option<(&str, &str)> {
        let (user, repo) = id.split_once(',')?;
        (!user.is_empty() && !repo.is_empty() && !repo.contains(',')).then_some((user, repo))
    }

    fn repo_url(id: &str) -> ProviderResult<String> {
        let (user, repo) = Self::split_id(id)
            .ok_or_else(|| ProviderError::malformed(PROVIDER_ID, format!("bad github id {id:?}")))?;
        Ok(format!("{API_BASE}/repos/{user}/{repo}"))
    }

    /// Fetch the repository document. `None` when GitHub reports 404.
    /// Metric reads pass `cache_enabled = false` so refreshes see live counts.
    async fn fetch_repo(
        &self,
        id: &str,
        cache_enabled: bool,
    ) -> ProviderResult<Option<serde_json::Value>> {
        let url = Self::repo_url(id)?;
        let resp = self
            .http
            .get(&url, cache_enabled)
            .await
            .map_err(|e| ProviderError::from_transport(PROVIDER_ID, &e))?;
        match resp.status {
            200 => parse_json(PROVIDER_ID, &resp.body).map(Some),
            404 => {
                debug!(%id, "github repository not found");
                Ok(None)
            }
            _ => Err(ProviderError::from_response(PROVIDER_ID, &resp)),
        }
    }
}

#[async_trait]
impl Provider for GithubProvider {
    fn metadata(&self) -> &ProviderMetadata {
        &self.metadata
    }

    fn provides_aliases(&self) -> bool {
        true
    }

    fn provides_metrics(&self) -> bool {
        true
    }

    fn provides_biblio(&self) -> bool {
        true
    }

    fn provides_member_items(&self) -> bool {
        true
    }

    fn is_relevant_alias(&self, alias: &Alias) -> bool {
        alias.namespace == NAMESPACE
    }

    async fn resolve_aliases(&self, aliases: &[Alias]) -> ProviderResult<Vec<Alias>> {
        let mut found = Vec::new();
        for alias in aliases.iter().filter(|a| self.is_relevant_alias(a)) {
            let Some(doc) = self.fetch_repo(&alias.id, true).await? else {
                continue;
            };
            let fields = extract_from_json(&doc, &[("url", &["svn_url"]), ("title", &["name"])]);
            for (namespace, value) in fields {
                if let Some(s) = value.as_str() {
                    found.push(Alias::new(namespace, s));
                }
            }
        }
        Ok(only_new(aliases, found))
    }

    async fn collect_metrics(&self, id: &str) -> ProviderResult<MetricValues> {
        let Some(doc) = self.fetch_repo(id, false).await? else {
            return Ok(MetricValues::new());
        };
        let fields = extract_from_json(
            &doc,
            &[("github:watchers", &["watchers"]), ("github:forks", &["forks"])],
        );
        let mut metrics = MetricValues::new();
        for (name, value) in fields {
            let count = value.as_i64().ok_or_else(|| {
                ProviderError::malformed(PROVIDER_ID, format!("{name} is not an integer"))
            })?;
            metrics.insert(name, MetricValue::Count(count));
        }
        Ok(metrics)
    }

    async fn collect_biblio(&self, id: &str) -> ProviderResult<Biblio> {
        let Some(doc) = self.fetch_repo(id, true).await? else {
            return Ok(Biblio::new());
        };
        Ok(extract_from_json(
            &doc,
            &[
                ("title", &["name"]),
                ("description", &["description"]),
                ("owner", &["owner", "login"]),
                ("url", &["svn_url"]),
                ("last_push_date", &["pushed_at"]),
                ("create_date", &["created_at"]),
            ],
        ))
    }

    fn provenance_url(&self, metric_name: &str, aliases: &AliasSet) -> Option<String> {
        let id = self.best_id(aliases)?;
        let (user, repo) = Self::split_id(&id)?;
        let metric = metric_name.strip_prefix("github:").unwrap_or(metric_name);
        match metric {
            "watchers" => Some(format!("https://github.com/{user}/{repo}/watchers")),
            "forks" => Some(format!("https://github.com/{user}/{repo}/network/members")),
            _ => None,
        }
    }

    /// Repositories owned by a user or organisation.
    async fn member_items(&self, query: &str, query_type: &str) -> ProviderResult<MemberItems> {
        let url = match query_type {
            "github_org" => format!("{API_BASE}/orgs/{query}/repos?per_page=100"),
            _ => format!("{API_BASE}/users/{query}/repos?per_page=100"),
        };
        let resp = self
            .http
            .get(&url, true)
            .await
            .map_err(|e| ProviderError::from_transport(PROVIDER_ID, &e))?;
        if resp.status == 404 {
            return Ok(MemberItems::default());
        }
        if !resp.is_success() {
            return Err(ProviderError::from_response(PROVIDER_ID, &resp));
        }

        let doc = parse_json(PROVIDER_ID, &resp.body)?;
        let repos = doc
            .as_array()
            .ok_or_else(|| ProviderError::malformed(PROVIDER_ID, "member listing is not an array"))?;
        let hits = repos
            .iter()
            .filter_map(|r| r.get("name").and_then(|n| n.as_str()))
            .map(|name| Alias::new(NAMESPACE, format!("{query},{name}")));
        Ok(MemberItems::from_hits(hits))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::testing::ScriptedHttp;

    const REPO: &str = r#"{
        "name": "cdk",
        "description": "The Chemistry Development Kit",
        "owner": {"login": "egonw"},
        "svn_url": "https://github.com/egonw/cdk",
        "pushed_at": "2012-06-01T00:00:00Z",
        "created_at": "2010-01-01T00:00:00Z",
        "watchers": 31,
        "forks": 12
    }"#;

    fn provider(http: ScriptedHttp) -> GithubProvider {
        GithubProvider::new(Arc::new(http))
    }

    #[tokio::test]
    async fn collects_watchers_and_forks() {
        let p = provider(ScriptedHttp::new().route("/repos/egonw/cdk", 200, REPO));
        let metrics = p.collect_metrics("egonw,cdk").await.unwrap();
        assert_eq!(metrics["github:watchers"], MetricValue::Count(31));
        assert_eq!(metrics["github:forks"], MetricValue::Count(12));
    }

    #[tokio::test]
    async fn metric_reads_bypass_the_cache() {
        let http = Arc::new(ScriptedHttp::new().route("/repos/egonw/cdk", 200, REPO));
        let p = GithubProvider::new(http.clone());
        p.resolve_aliases(&[Alias::new("github", "egonw,cdk")]).await.unwrap();
        p.collect_metrics("egonw,cdk").await.unwrap();
        p.collect_metrics("egonw,cdk").await.unwrap();

        assert_eq!(http.request_count(), 3);
        // Only the alias lookup may be served from cache.
        assert_eq!(http.cached_requests().len(), 1);
    }

    #[tokio::test]
    async fn missing_repo_yields_no_metrics() {
        let p = provider(ScriptedHttp::new());
        assert!(p.collect_metrics("egonw,gone").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn server_error_is_unavailable() {
        let p = provider(ScriptedHttp::new().route("/repos/", 502, ""));
        let err = p.collect_metrics("egonw,cdk").await.unwrap_err();
        assert!(matches!(err, ProviderError::Unavailable { .. }));
    }

    #[tokio::test]
    async fn malformed_id_is_rejected_without_request() {
        let http = Arc::new(ScriptedHttp::new());
        let p = GithubProvider::new(http.clone());
        let err = p.collect_metrics("no-comma").await.unwrap_err();
        assert!(matches!(err, ProviderError::ContentMalformed { .. }));
        assert_eq!(http.request_count(), 0);
    }

    #[tokio::test]
    async fn resolves_url_and_title_once() {
        let p = provider(ScriptedHttp::new().route("/repos/egonw/cdk", 200, REPO));
        let seed = vec![Alias::new("github", "egonw,cdk")];
        let found = p.resolve_aliases(&seed).await.unwrap();
        assert!(found.contains(&Alias::new("url", "https://github.com/egonw/cdk")));
        assert!(found.contains(&Alias::new("title", "cdk")));

        let mut all = seed.clone();
        all.extend(found);
        assert!(p.resolve_aliases(&all).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn biblio_fields() {
        let p = provider(ScriptedHttp::new().route("/repos/egonw/cdk", 200, REPO));
        let biblio = p.collect_biblio("egonw,cdk").await.unwrap();
        assert_eq!(biblio["owner"], serde_json::json!("egonw"));
        assert_eq!(biblio["create_date"], serde_json::json!("2010-01-01T00:00:00Z"));
    }

    #[test]
    fn provenance_per_metric() {
        let p = provider(ScriptedHttp::new());
        let aliases = AliasSet::from_aliases(&[Alias::new("github", "egonw,cdk")]);
        assert_eq!(
            p.provenance_url("github:forks", &aliases).as_deref(),
            Some("https://github.com/egonw/cdk/network/members")
        );
        assert_eq!(
            p.provenance_url("watchers", &aliases).as_deref(),
            Some("https://github.com/egonw/cdk/watchers")
        );
        let unrelated = AliasSet::from_aliases(&[Alias::new("doi", "10.1")]);
        assert_eq!(p.provenance_url("github:forks", &unrelated), None);
    }

    #[tokio::test]
    async fn member_items_for_user() {
        let body = r#"[{"name": "cdk"}, {"name": "jqudt"}, {"name": "cdk"}]"#;
        let p = provider(ScriptedHttp::new().route("/users/egonw/repos", 200, body));
        let members = p.member_items("egonw", "github_user").await.unwrap();
        assert_eq!(
            members.items,
            vec![Alias::new("github", "egonw,cdk"), Alias::new("github", "egonw,jqudt")]
        );
        assert!(!members.truncated);
    }
}
