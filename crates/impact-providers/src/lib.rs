//! impact-providers: pluggable adapters to external metrics sources.
//!
//! Every source implements the [`Provider`] trait: alias resolution,
//! metric and biblio collection, provenance links and member-item
//! discovery, each optional and advertised by a `provides_*` flag.
//! Failures are classified into one [`ProviderError`] variant so the
//! dispatch layer can decide what to retry.
//!
//! # Architecture
//!
//! ```text
//! ProviderRegistry
//!   └── Arc<dyn Provider> (registration order = biblio authority order)
//!         ├── GithubProvider ──┐
//!         └── PubmedProvider ──┴── Arc<dyn HttpClient> (ReqwestClient in production)
//! ```

pub mod error;
pub mod extract;
pub mod github;
pub mod http;
pub mod provider;
pub mod pubmed;
pub mod registry;

pub use error::{ProviderError, ProviderResult, TransportError};
pub use github::GithubProvider;
pub use http::{HttpClient, HttpResponse, ReqwestClient};
pub use provider::{MemberItems, MetricMeta, Provider, ProviderMetadata, MEMBER_ITEMS_LIMIT};
pub use pubmed::PubmedProvider;
pub use registry::ProviderRegistry;
