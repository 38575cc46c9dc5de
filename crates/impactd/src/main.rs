//! impactd: the impact tracker daemon.
//!
//! Runs the aggregation pipeline over a local redb store and offers a few
//! operator commands against the same store.
//!
//! # Usage
//!
//! ```text
//! impactd init-config --data-dir /var/lib/impact > impact.toml
//! impactd request --alias doi:10.1371/journal.pone.0000308
//! impactd run --config impact.toml
//! impactd show <item-id>
//! ```
//!
//! redb holds an exclusive lock on the database file, so the operator
//! commands run while the daemon is stopped.

use std::path::{Path, PathBuf};

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use tracing::{info, warn};

use impact_backend::{Backend, BackendSettings};
use impact_core::{clean_id, epoch_millis, Alias, ImpactConfig};
use impact_providers::ProviderRegistry;
use impact_state::ItemStore;

#[derive(Parser)]
#[command(name = "impactd", about = "Impact tracker daemon")]
struct Cli {
    /// Path to impact.toml. Defaults apply when the file is missing.
    #[arg(long, global = true, default_value = "impact.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the monitor and every worker until Ctrl-C.
    Run,

    /// Submit an item (or refresh the one that already owns an alias).
    Request {
        /// Alias as `namespace:id`. Repeatable.
        #[arg(long = "alias", required = true)]
        aliases: Vec<String>,
    },

    /// Print an item as JSON.
    Show { id: String },

    /// List registered providers and their metrics.
    Providers,

    /// Ask a provider for the items belonging to a user or organisation.
    Members {
        #[arg(long)]
        provider: String,
        #[arg(long)]
        query: String,
        #[arg(long, default_value = "github_user")]
        query_type: String,
    },

    /// Manage collections.
    Collection {
        #[command(subcommand)]
        action: CollectionCommand,
    },

    /// Print a starter impact.toml.
    InitConfig {
        #[arg(long, default_value = "/var/lib/impact")]
        data_dir: PathBuf,
    },
}

#[derive(Subcommand)]
enum CollectionCommand {
    /// Create a collection; prints its id and key.
    Create {
        #[arg(long)]
        title: String,
        #[arg(long)]
        owner: Option<String>,
        #[arg(long = "alias", required = true)]
        aliases: Vec<String>,
    },
    /// Print a collection as JSON.
    Show { id: String },
    /// Request a refresh of every item in a collection.
    Refresh { id: String },
    /// Delete a collection. Its items are kept.
    Delete {
        id: String,
        #[arg(long)]
        key: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                tracing_subscriber::EnvFilter::new("info,impactd=debug,impact=debug")
            }),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Command::InitConfig { data_dir } => {
            print!("{}", ImpactConfig::scaffold(&data_dir).to_toml_string()?);
            Ok(())
        }
        Command::Providers => {
            let config = load_config(&cli.config)?;
            let registry = ProviderRegistry::from_config(&config)?;
            println!("{}", serde_json::to_string_pretty(&registry.metadata())?);
            Ok(())
        }
        Command::Members {
            provider,
            query,
            query_type,
        } => {
            let config = load_config(&cli.config)?;
            let registry = ProviderRegistry::from_config(&config)?;
            let Some(provider) = registry.get(&provider) else {
                bail!("unknown provider {provider}");
            };
            if !provider.provides_member_items() {
                bail!("provider {} does not list member items", provider.id());
            }
            let members = provider.member_items(&query, &query_type).await?;
            println!("{}", serde_json::to_string_pretty(&members)?);
            Ok(())
        }
        Command::Run => run(&load_config(&cli.config)?).await,
        Command::Request { aliases } => {
            let store = open_store(&load_config(&cli.config)?)?;
            let aliases = parse_aliases(&aliases)?;
            let now = epoch_millis();
            let (id, created) = store.create_or_get_item(&aliases, now)?;
            if created {
                info!(item_id = %id, "item created");
            } else {
                store.request_refresh(&id, now)?;
                info!(item_id = %id, "refresh requested for existing item");
            }
            println!("{id}");
            Ok(())
        }
        Command::Show { id } => {
            let store = open_store(&load_config(&cli.config)?)?;
            let item = store.require_item(&id)?;
            println!("{}", serde_json::to_string_pretty(&item)?);
            Ok(())
        }
        Command::Collection { action } => {
            let store = open_store(&load_config(&cli.config)?)?;
            collection(&store, action)
        }
    }
}

fn collection(store: &ItemStore, action: CollectionCommand) -> anyhow::Result<()> {
    match action {
        CollectionCommand::Create {
            title,
            owner,
            aliases,
        } => {
            let aliases = parse_aliases(&aliases)?;
            let (coll, key) =
                store.create_collection(&title, owner.as_deref(), &aliases, epoch_millis())?;
            println!("id:  {}", coll.id);
            println!("key: {key}");
        }
        CollectionCommand::Show { id } => {
            let coll = store
                .get_collection(&id)?
                .with_context(|| format!("collection {id} not found"))?;
            println!("{}", serde_json::to_string_pretty(&coll)?);
        }
        CollectionCommand::Refresh { id } => {
            let ids = store.refresh_collection(&id, epoch_millis())?;
            info!(collection_id = %id, items = ids.len(), "collection refresh requested");
        }
        CollectionCommand::Delete { id, key } => {
            store.delete_collection(&id, &key)?;
            info!(collection_id = %id, "collection deleted");
        }
    }
    Ok(())
}

async fn run(config: &ImpactConfig) -> anyhow::Result<()> {
    info!("impact daemon starting");

    let store = open_store(config)?;
    let registry = ProviderRegistry::from_config(config)?;
    if registry.is_empty() {
        warn!("no providers enabled; items will go idle without metrics");
    }

    let settings = BackendSettings::from_config(&config.backend);
    let backend = Backend::start(store, registry, settings).await?;

    tokio::signal::ctrl_c()
        .await
        .context("failed to install Ctrl-C handler")?;
    info!("shutdown signal received");

    backend.stop().await;
    info!("impact daemon stopped");
    Ok(())
}

fn load_config(path: &Path) -> anyhow::Result<ImpactConfig> {
    if path.exists() {
        ImpactConfig::from_file(path).with_context(|| format!("reading {}", path.display()))
    } else {
        warn!(path = %path.display(), "config file not found, using defaults");
        Ok(ImpactConfig::default())
    }
}

fn open_store(config: &ImpactConfig) -> anyhow::Result<ItemStore> {
    let data_dir = &config.storage.data_dir;
    std::fs::create_dir_all(data_dir)
        .with_context(|| format!("creating {}", data_dir.display()))?;
    let db_path = data_dir.join("impact.redb");
    let store = ItemStore::open(&db_path)?;
    info!(path = ?db_path, "item store opened");
    Ok(store)
}

/// Parse `namespace:id` arguments, cleaning pasted identifiers.
fn parse_aliases(raw: &[String]) -> anyhow::Result<Vec<Alias>> {
    raw.iter()
        .map(|s| {
            Alias::parse_index_key(&clean_id(s))
                .with_context(|| format!("alias {s:?} is not namespace:id"))
        })
        .collect()
}
