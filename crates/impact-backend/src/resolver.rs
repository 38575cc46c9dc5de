//! Alias closure: ask every alias provider about the aliases known so
//! far until a pass discovers nothing new.

use std::collections::BTreeSet;

use tokio::sync::watch;
use tracing::{debug, warn};

use impact_core::{Alias, AliasSet};
use impact_providers::ProviderRegistry;

use crate::retry::RetryPolicy;

#[derive(Debug, Clone)]
pub struct ResolveOutcome {
    /// Input aliases plus everything discovered.
    pub aliases: AliasSet,
    /// Discovered aliases, in discovery order.
    pub added: Vec<Alias>,
    pub passes: u32,
    /// False when `max_passes` ran out while passes were still adding.
    pub converged: bool,
    /// Providers that still failed after retries in some pass.
    pub failed_providers: BTreeSet<String>,
}

pub struct AliasResolver {
    registry: ProviderRegistry,
    max_passes: u32,
    retry: RetryPolicy,
}

impl AliasResolver {
    pub fn new(registry: ProviderRegistry, max_passes: u32, retry: RetryPolicy) -> Self {
        Self {
            registry,
            max_passes: max_passes.max(1),
            retry,
        }
    }

    pub async fn resolve(
        &self,
        aliases: &AliasSet,
        shutdown: &watch::Receiver<bool>,
    ) -> ResolveOutcome {
        let mut current = aliases.clone();
        let mut added = Vec::new();
        let mut failed_providers = BTreeSet::new();
        let mut passes = 0;
        let mut converged = false;
        let providers = self.registry.alias_providers();

        while passes < self.max_passes {
            passes += 1;
            let snapshot = current.to_vec();
            let mut grew = false;

            for provider in &providers {
                if !snapshot.iter().any(|a| provider.is_relevant_alias(a)) {
                    continue;
                }
                let attempted = self
                    .retry
                    .run(provider.id(), shutdown, || provider.resolve_aliases(&snapshot))
                    .await;
                match attempted.result {
                    Ok(found) => {
                        for alias in found {
                            if current.insert(&alias) {
                                added.push(alias);
                                grew = true;
                            }
                        }
                    }
                    Err(e) => {
                        warn!(
                            provider = %provider.id(),
                            attempts = attempted.attempts,
                            error = %e,
                            "alias lookup failed"
                        );
                        failed_providers.insert(provider.id().to_string());
                    }
                }
            }

            if !grew {
                converged = true;
                break;
            }
            if *shutdown.borrow() {
                break;
            }
        }

        debug!(passes, added = added.len(), converged, "alias resolution finished");
        ResolveOutcome {
            aliases: current,
            added,
            passes,
            converged,
            failed_providers,
        }
    }
}
