//! PubMed / PubMed Central: citation counts, F1000 review flag, biblio,
//! and DOI ↔ PMID alias resolution via the NCBI eutils services.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use reqwest::Url;
use tracing::{debug, warn};

use impact_core::config::PubmedConfig;
use impact_core::{Alias, AliasSet, Biblio, MetricValue, MetricValues};

use crate::error::{ProviderError, ProviderResult};
use crate::extract::{xml_elements, xml_elements_with_attr, xml_first};
use crate::http::HttpClient;
use crate::provider::{only_new, MetricMeta, Provider, ProviderMetadata};

const PROVIDER_ID: &str = "pubmed";
const EUTILS: &str = "https://eutils.ncbi.nlm.nih.gov/entrez/eutils";
const PMC_CITING: &str = "https://www.pubmedcentral.nih.gov/utils/entrez2pmcciting.cgi";
const PUBMED_PAGE: &str = "http://www.ncbi.nlm.nih.gov/pubmed";
const NCBI_ICON: &str = "http://www.ncbi.nlm.nih.gov/favicon.ico";

pub struct PubmedProvider {
    http: Arc<dyn HttpClient>,
    email: String,
    tool: String,
    metadata: ProviderMetadata,
}

impl PubmedProvider {
    pub fn new(http: Arc<dyn HttpClient>, config: &PubmedConfig) -> Self {
        let metric = |display: &str, description: &str, icon: &str| MetricMeta {
            display_name: display.to_string(),
            description: description.to_string(),
            icon: icon.to_string(),
        };
        let metrics = BTreeMap::from([
            (
                "pmc_citations".to_string(),
                metric("citations", "The number of citations by papers in PubMed Central", NCBI_ICON),
            ),
            (
                "pmc_citations_reviews".to_string(),
                metric(
                    "citations: reviews",
                    "The number of citations by review papers in PubMed Central",
                    NCBI_ICON,
                ),
            ),
            (
                "pmc_citations_editorials".to_string(),
                metric(
                    "citations: editorials",
                    "The number of citations by editorials in PubMed Central",
                    NCBI_ICON,
                ),
            ),
            (
                "f1000".to_string(),
                metric(
                    "reviewed",
                    "The article has been reviewed by F1000",
                    "http://f1000.com/favicon.ico",
                ),
            ),
        ]);
        Self {
            http,
            email: config.email.clone(),
            tool: config.tool.clone(),
            metadata: ProviderMetadata {
                id: PROVIDER_ID.to_string(),
                name: "PubMed".to_string(),
                url: "http://pubmed.gov".to_string(),
                description: "PubMed comprises more than 21 million citations for biomedical literature"
                    .to_string(),
                id_namespaces: vec!["pmid".to_string()],
                metrics,
            },
        }
    }

    fn eutils_url(&self, base: &str, params: &[(&str, &str)]) -> ProviderResult<String> {
        let mut all: Vec<(&str, &str)> = params.to_vec();
        all.push(("email", self.email.as_str()));
        all.push(("tool", self.tool.as_str()));
        Url::parse_with_params(base, &all)
            .map(|u| u.to_string())
            .map_err(|e| ProviderError::malformed(PROVIDER_ID, e.to_string()))
    }

    /// Fetch an eutils page. 404 and 414 (URI too long) read as an empty page.
    /// Metric pages are fetched with `cache_enabled = false`.
    async fn eutils_page(&self, url: &str, cache_enabled: bool) -> ProviderResult<String> {
        let resp = self
            .http
            .get(url, cache_enabled)
            .await
            .map_err(|e| ProviderError::from_transport(PROVIDER_ID, &e))?;
        match resp.status {
            200 => Ok(resp.body),
            404 | 414 => {
                warn!(%url, status = resp.status, "eutils returned no page");
                Ok(String::new())
            }
            _ => Err(ProviderError::from_response(PROVIDER_ID, &resp)),
        }
    }

    async fn pmid_for_doi(&self, doi: &str) -> ProviderResult<Option<String>> {
        let url = self.eutils_url(&format!("{EUTILS}/esearch.fcgi"), &[("term", doi)])?;
        let page = self.eutils_page(&url, true).await?;
        // Only trust an exact DOI match, not a fuzzy full-text hit.
        let exact = xml_first(&page, "QueryTranslation")
            .is_some_and(|q| q == format!("{doi}[All Fields]"));
        if !exact {
            return Ok(None);
        }
        Ok(xml_first(&page, "Id"))
    }

    async fn fetch_article(&self, pmid: &str) -> ProviderResult<String> {
        let url = self.eutils_url(
            &format!("{EUTILS}/efetch.fcgi"),
            &[("db", "pubmed"), ("id", pmid), ("retmode", "xml")],
        )?;
        self.eutils_page(&url, true).await
    }

    async fn citing_pmcids(&self, pmid: &str) -> ProviderResult<Vec<String>> {
        let url = self.eutils_url(PMC_CITING, &[("view", "xml"), ("id", pmid)])?;
        let page = self.eutils_page(&url, false).await?;
        if page.is_empty() {
            return Ok(Vec::new());
        }
        if !page.contains("PubMedToPMCcitingformSET") {
            return Err(ProviderError::malformed(PROVIDER_ID, "unexpected pmc citing page"));
        }
        Ok(xml_elements(&page, "PMCID"))
    }

    /// How many of the citing PMC articles have publication type `ptype`.
    async fn count_of_type(&self, pmcids: &[String], ptype: &str) -> ProviderResult<usize> {
        let ids: Vec<String> = pmcids.iter().map(|id| format!("PMC{id}")).collect();
        let term = format!("{ptype}[ptyp] AND ({})", ids.join(" OR "));
        let url = self.eutils_url(
            &format!("{EUTILS}/esearch.fcgi"),
            &[("db", "pubmed"), ("term", term.as_str())],
        )?;
        let page = self.eutils_page(&url, false).await?;
        Ok(xml_elements(&page, "Id").len())
    }

    async fn reviewed_by_f1000(&self, pmid: &str) -> ProviderResult<bool> {
        let url = self.eutils_url(
            &format!("{EUTILS}/elink.fcgi"),
            &[("dbfrom", "pubmed"), ("id", pmid), ("cmd", "llinks")],
        )?;
        let page = self.eutils_page(&url, false).await?;
        Ok(page.contains(&format!("f1000.com/pubmed/{pmid}")))
    }
}

#[async_trait]
impl Provider for PubmedProvider {
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

    /// DOIs are relevant for alias lookup; metrics need a PMID (see `best_id`).
    fn is_relevant_alias(&self, alias: &Alias) -> bool {
        matches!(alias.namespace.as_str(), "pmid" | "doi")
    }

    async fn resolve_aliases(&self, aliases: &[Alias]) -> ProviderResult<Vec<Alias>> {
        let mut found = Vec::new();
        for alias in aliases {
            match alias.namespace.as_str() {
                "doi" => {
                    if let Some(pmid) = self.pmid_for_doi(&alias.id).await? {
                        found.push(Alias::new("pmid", pmid));
                    }
                }
                "pmid" => {
                    let page = self.fetch_article(&alias.id).await?;
                    // PMIDs sometimes carry a DOI fragment rather than a DOI.
                    if let Some(doi) = xml_elements_with_attr(&page, "ArticleId", "IdType", "doi")
                        .into_iter()
                        .find(|d| d.contains("10."))
                    {
                        found.push(Alias::new("doi", doi));
                    }
                    found.push(Alias::new("url", format!("{PUBMED_PAGE}/{}", alias.id)));
                }
                _ => {}
            }
        }
        debug!(found = found.len(), "pubmed alias lookup done");
        Ok(only_new(aliases, found))
    }

    async fn collect_metrics(&self, id: &str) -> ProviderResult<MetricValues> {
        let mut metrics = MetricValues::new();

        if self.reviewed_by_f1000(id).await? {
            metrics.insert("pubmed:f1000".to_string(), MetricValue::from("Yes"));
        }

        let citing = self.citing_pmcids(id).await?;
        if !citing.is_empty() {
            metrics.insert("pubmed:pmc_citations".to_string(), MetricValue::from(citing.len()));

            let reviews = self.count_of_type(&citing, "review").await?;
            if reviews > 0 {
                metrics.insert("pubmed:pmc_citations_reviews".to_string(), MetricValue::from(reviews));
            }
            let editorials = self.count_of_type(&citing, "editorial").await?;
            if editorials > 0 {
                metrics.insert(
                    "pubmed:pmc_citations_editorials".to_string(),
                    MetricValue::from(editorials),
                );
            }
        }
        Ok(metrics)
    }

    async fn collect_biblio(&self, id: &str) -> ProviderResult<Biblio> {
        let page = self.fetch_article(id).await?;
        let mut biblio = Biblio::new();

        if let Some(title) = xml_first(&page, "ArticleTitle") {
            biblio.insert("title".to_string(), title.into());
        }
        if let Some(journal) = xml_first(&page, "Journal").and_then(|j| xml_first(&j, "Title")) {
            biblio.insert("journal".to_string(), journal.into());
        }
        if let Some(year) = xml_first(&page, "PubDate").and_then(|d| xml_first(&d, "Year")) {
            biblio.insert("year".to_string(), year.into());
        }
        let authors = xml_elements(&page, "LastName");
        if !authors.is_empty() {
            biblio.insert("authors".to_string(), authors.join(", ").into());
        }
        Ok(biblio)
    }

    fn provenance_url(&self, metric_name: &str, aliases: &AliasSet) -> Option<String> {
        let pmid = self.best_id(aliases)?;
        let metric = metric_name.strip_prefix("pubmed:").unwrap_or(metric_name);
        match metric {
            "pmc_citations" | "pmc_citations_reviews" | "pmc_citations_editorials" => Some(format!(
                "{PUBMED_PAGE}?linkname=pubmed_pubmed_citedin&from_uid={pmid}"
            )),
            "f1000" => Some(format!("http://f1000.com/pubmed/{pmid}")),
            _ => None,
        }
    }
}
