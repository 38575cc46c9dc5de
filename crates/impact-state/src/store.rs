//! ItemStore: redb-backed persistence for items and collections.
//!
//! Besides plain upsert/get, the store offers targeted field updates that
//! run a read-modify-write of one item inside one write transaction. The
//! backend uses only those for concurrent writers.

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::sync::Arc;

use redb::{Database, ReadableDatabase, ReadableTable};
use sha2::{Digest, Sha256};
use tracing::debug;

use impact_core::merge::merge;
use impact_core::{
    Alias, AliasSet, Biblio, BiblioField, Collection, Item, ItemId, ItemStatus, MetricValues,
    ProviderFailure, Timestamp,
};

use crate::error::{StateError, StateResult};
use crate::tables::*;

/// Closure turning any `Display` error into a `StateError`.
macro_rules! map_err {
    (Open) => {
        |e| StateError::Open(e.to_string())
    };
    (Encode) => {
        |e| StateError::Encode(e.to_string())
    };
    (Decode) => {
        |e| StateError::Decode(e.to_string())
    };
    ($stage:literal) => {
        |e| StateError::Storage {
            stage: $stage,
            reason: e.to_string(),
        }
    };
}

/// Thread-safe item store backed by redb.
#[derive(Clone)]
pub struct ItemStore {
    db: Arc<Database>,
}

impl ItemStore {
    /// Open (or create) a persistent store at the given path.
    pub fn open(path: &Path) -> StateResult<Self> {
        let db = Database::create(path).map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!(?path, "item store opened");
        Ok(store)
    }

    /// Create an ephemeral in-memory store (for testing).
    pub fn open_in_memory() -> StateResult<Self> {
        let backend = redb::backends::InMemoryBackend::new();
        let db = Database::builder()
            .create_with_backend(backend)
            .map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!("in-memory item store opened");
        Ok(store)
    }

    fn ensure_tables(&self) -> StateResult<()> {
        let txn = self.db.begin_write().map_err(map_err!("transaction"))?;
        txn.open_table(ITEMS).map_err(map_err!("table"))?;
        txn.open_table(ALIAS_INDEX).map_err(map_err!("table"))?;
        txn.open_table(COLLECTIONS).map_err(map_err!("table"))?;
        txn.commit().map_err(map_err!("transaction"))?;
        Ok(())
    }

    // ── Items ──────────────────────────────────────────────────────

    /// Insert or replace a whole item document, indexing its aliases.
    ///
    /// Workers never call this; it is for creation and tests. Concurrent
    /// writers go through the targeted updates below.
    pub fn put_item(&self, item: &Item) -> StateResult<()> {
        let value = serde_json::to_vec(item).map_err(map_err!(Encode))?;
        let txn = self.db.begin_write().map_err(map_err!("transaction"))?;
        {
            let mut table = txn.open_table(ITEMS).map_err(map_err!("table"))?;
            table
                .insert(item.id.as_str(), value.as_slice())
                .map_err(map_err!("write"))?;

            let mut index = txn.open_table(ALIAS_INDEX).map_err(map_err!("table"))?;
            for alias in item.aliases.iter() {
                let key = alias.index_key();
                if index.get(key.as_str()).map_err(map_err!("read"))?.is_none() {
                    index
                        .insert(key.as_str(), item.id.as_str())
                        .map_err(map_err!("write"))?;
                }
            }
        }
        txn.commit().map_err(map_err!("transaction"))?;
        debug!(item_id = %item.id, "item stored");
        Ok(())
    }

    /// Get an item by id.
    pub fn get_item(&self, id: &str) -> StateResult<Option<Item>> {
        let txn = self.db.begin_read().map_err(map_err!("transaction"))?;
        let table = txn.open_table(ITEMS).map_err(map_err!("table"))?;
        match table.get(id).map_err(map_err!("read"))? {
            Some(guard) => {
                let item: Item =
                    serde_json::from_slice(guard.value()).map_err(map_err!(Decode))?;
                Ok(Some(item))
            }
            None => Ok(None),
        }
    }

    /// Get an item by id, failing with `NotFound` if absent.
    pub fn require_item(&self, id: &str) -> StateResult<Item> {
        self.get_item(id)?
            .ok_or_else(|| StateError::NotFound(format!("item {id}")))
    }

    /// Return every item matching `predicate`.
    pub fn find_items(&self, predicate: impl Fn(&Item) -> bool) -> StateResult<Vec<Item>> {
        let txn = self.db.begin_read().map_err(map_err!("transaction"))?;
        let table = txn.open_table(ITEMS).map_err(map_err!("table"))?;
        let mut results = Vec::new();
        for entry in table.iter().map_err(map_err!("read"))? {
            let (_, value) = entry.map_err(map_err!("read"))?;
            let item: Item =
                serde_json::from_slice(value.value()).map_err(map_err!(Decode))?;
            if predicate(&item) {
                results.push(item);
            }
        }
        Ok(results)
    }

    /// List all items.
    pub fn list_items(&self) -> StateResult<Vec<Item>> {
        self.find_items(|_| true)
    }

    /// Items whose `last_requested` is newer than `last_queued` (or never queued).
    pub fn find_items_needing_queue(&self) -> StateResult<Vec<Item>> {
        self.find_items(Item::needs_queue)
    }

    /// Look up the item owning an alias.
    pub fn find_item_by_alias(&self, alias: &Alias) -> StateResult<Option<ItemId>> {
        let key = alias.index_key();
        let txn = self.db.begin_read().map_err(map_err!("transaction"))?;
        let table = txn.open_table(ALIAS_INDEX).map_err(map_err!("table"))?;
        Ok(table
            .get(key.as_str())
            .map_err(map_err!("read"))?
            .map(|guard| guard.value().to_string()))
    }

    /// Return the item already owning any of `aliases`, or create a new
    /// requested item for them. The boolean is true when an item was created.
    ///
    /// Lookup and insert share one write transaction, so two concurrent
    /// submissions of the same alias resolve to one item.
    pub fn create_or_get_item(
        &self,
        aliases: &[Alias],
        now: Timestamp,
    ) -> StateResult<(ItemId, bool)> {
        let txn = self.db.begin_write().map_err(map_err!("transaction"))?;
        let outcome = {
            let mut index = txn.open_table(ALIAS_INDEX).map_err(map_err!("table"))?;
            let mut existing = None;
            for alias in aliases {
                let key = alias.index_key();
                if let Some(guard) = index.get(key.as_str()).map_err(map_err!("read"))? {
                    existing = Some(guard.value().to_string());
                    break;
                }
            }

            match existing {
                Some(id) => (id, false),
                None => {
                    let item = Item::new(Item::generate_id(), AliasSet::from_aliases(aliases), now);
                    let value = serde_json::to_vec(&item).map_err(map_err!(Encode))?;
                    let mut table = txn.open_table(ITEMS).map_err(map_err!("table"))?;
                    table
                        .insert(item.id.as_str(), value.as_slice())
                        .map_err(map_err!("write"))?;
                    for alias in aliases {
                        let key = alias.index_key();
                        index
                            .insert(key.as_str(), item.id.as_str())
                            .map_err(map_err!("write"))?;
                    }
                    (item.id, true)
                }
            }
        };
        txn.commit().map_err(map_err!("transaction"))?;
        debug!(item_id = %outcome.0, created = outcome.1, "item resolved from aliases");
        Ok(outcome)
    }

    /// Apply `f` to the current stored item inside one write transaction.
    ///
    /// Returns the updated item and whatever `f` returned.
    pub fn update_item<R>(
        &self,
        id: &str,
        f: impl FnOnce(&mut Item) -> R,
    ) -> StateResult<(Item, R)> {
        let txn = self.db.begin_write().map_err(map_err!("transaction"))?;
        let outcome = {
            let mut table = txn.open_table(ITEMS).map_err(map_err!("table"))?;
            let bytes = table
                .get(id)
                .map_err(map_err!("read"))?
                .map(|guard| guard.value().to_vec())
                .ok_or_else(|| StateError::NotFound(format!("item {id}")))?;
            let mut item: Item =
                serde_json::from_slice(&bytes).map_err(map_err!(Decode))?;

            let out = f(&mut item);

            let value = serde_json::to_vec(&item).map_err(map_err!(Encode))?;
            table
                .insert(id, value.as_slice())
                .map_err(map_err!("write"))?;
            (item, out)
        };
        txn.commit().map_err(map_err!("transaction"))?;
        Ok(outcome)
    }

    /// Request a fresh collection cycle for an item.
    ///
    /// `last_requested` is forced strictly past `last_queued` so a monitor
    /// pass with a slower clock cannot skip the request.
    pub fn request_refresh(&self, id: &str, now: Timestamp) -> StateResult<Item> {
        let (item, ()) = self.update_item(id, |item| {
            let floor = item.last_queued.map_or(0, |q| q + 1);
            item.last_requested = now.max(floor).max(item.last_requested);
            item.status = ItemStatus::Requested;
            item.currently_updating = true;
        })?;
        debug!(item_id = %id, last_requested = item.last_requested, "refresh requested");
        Ok(item)
    }

    /// Record that the queue monitor picked the item up.
    pub fn mark_queued(&self, id: &str, now: Timestamp) -> StateResult<Item> {
        let (item, ()) = self.update_item(id, |item| {
            item.last_queued = Some(item.last_requested.max(now));
            item.status = ItemStatus::Queued;
            item.currently_updating = true;
        })?;
        Ok(item)
    }

    /// Set the lifecycle status of an item.
    pub fn set_status(&self, id: &str, status: ItemStatus) -> StateResult<Item> {
        let (item, ()) = self.update_item(id, |item| item.status = status)?;
        Ok(item)
    }

    /// Union `aliases` into the item's alias set and index the new ones.
    ///
    /// Returns the updated item and the aliases that were actually new.
    /// Aliases already indexed to another item are kept on this item but
    /// the index entry is not stolen.
    pub fn add_aliases(
        &self,
        id: &str,
        aliases: &[Alias],
        now: Timestamp,
    ) -> StateResult<(Item, Vec<Alias>)> {
        let txn = self.db.begin_write().map_err(map_err!("transaction"))?;
        let outcome = {
            let mut table = txn.open_table(ITEMS).map_err(map_err!("table"))?;
            let bytes = table
                .get(id)
                .map_err(map_err!("read"))?
                .map(|guard| guard.value().to_vec())
                .ok_or_else(|| StateError::NotFound(format!("item {id}")))?;
            let mut item: Item =
                serde_json::from_slice(&bytes).map_err(map_err!(Decode))?;

            let added = item.aliases.extend(aliases);
            if !added.is_empty() {
                item.last_modified = item.last_modified.max(now);
                let value = serde_json::to_vec(&item).map_err(map_err!(Encode))?;
                table
                    .insert(id, value.as_slice())
                    .map_err(map_err!("write"))?;

                let mut index = txn.open_table(ALIAS_INDEX).map_err(map_err!("table"))?;
                for alias in &added {
                    let key = alias.index_key();
                    if index.get(key.as_str()).map_err(map_err!("read"))?.is_none() {
                        index.insert(key.as_str(), id).map_err(map_err!("write"))?;
                    }
                }
            }
            (item, added)
        };
        txn.commit().map_err(map_err!("transaction"))?;
        if !outcome.1.is_empty() {
            debug!(item_id = %id, added = outcome.1.len(), "aliases added");
        }
        Ok(outcome)
    }

    /// Append one provider's collection pass to the item's metric history.
    pub fn merge_metrics(
        &self,
        id: &str,
        provider: &str,
        values: &MetricValues,
        collected_at: Timestamp,
    ) -> StateResult<Item> {
        let (item, ()) = self.update_item(id, |item| {
            item.metrics = merge(&item.metrics, provider, values, collected_at);
            if !values.is_empty() {
                item.last_modified = item.last_modified.max(collected_at);
            }
        })?;
        debug!(item_id = %id, %provider, metrics = values.len(), "metrics merged");
        Ok(item)
    }

    /// Record biblio fields from `provider`. A field already supplied by a
    /// different provider keeps its first source.
    ///
    /// Returns the names of the fields this provider now owns.
    pub fn set_biblio_fields(
        &self,
        id: &str,
        provider: &str,
        biblio: &Biblio,
        now: Timestamp,
    ) -> StateResult<(Item, Vec<String>)> {
        self.update_item(id, |item| {
            let mut accepted = Vec::new();
            for (field, value) in biblio {
                let owned_elsewhere = item
                    .biblio
                    .get(field)
                    .is_some_and(|existing| existing.provider != provider);
                if owned_elsewhere {
                    continue;
                }
                item.biblio.insert(
                    field.clone(),
                    BiblioField {
                        value: value.clone(),
                        provider: provider.to_string(),
                    },
                );
                accepted.push(field.clone());
            }
            if !accepted.is_empty() {
                item.last_modified = item.last_modified.max(now);
            }
            accepted
        })
    }

    /// Start the metrics phase: `providers` each owe one more pass.
    ///
    /// With nothing outstanding the cycle ends immediately.
    pub fn begin_metrics(
        &self,
        id: &str,
        providers: &BTreeSet<String>,
    ) -> StateResult<Item> {
        let (item, ()) = self.update_item(id, |item| {
            for provider in providers {
                *item.pending_providers.entry(provider.clone()).or_default() += 1;
            }
            if item.pending_providers.is_empty() {
                item.status = ItemStatus::Idle;
                item.currently_updating = false;
            } else {
                item.status = ItemStatus::MetricsCollecting;
                item.currently_updating = true;
            }
        })?;
        Ok(item)
    }

    /// Mark one of `provider`'s passes as done, successful or not.
    ///
    /// The last outstanding pass clears `currently_updating`.
    pub fn finish_provider(
        &self,
        id: &str,
        provider: &str,
        failure: Option<ProviderFailure>,
    ) -> StateResult<Item> {
        let (item, ()) = self.update_item(id, |item| {
            if let Some(count) = item.pending_providers.get_mut(provider) {
                *count = count.saturating_sub(1);
                if *count == 0 {
                    item.pending_providers.remove(provider);
                }
            }
            match failure {
                Some(f) => {
                    item.provider_failures.insert(provider.to_string(), f);
                }
                None => {
                    item.provider_failures.remove(provider);
                }
            }
            if item.pending_providers.is_empty() && item.status == ItemStatus::MetricsCollecting {
                item.status = ItemStatus::Idle;
                item.currently_updating = false;
            }
        })?;
        if item.is_idle() {
            debug!(item_id = %id, "item collection cycle complete");
        }
        Ok(item)
    }

    // ── Collections ────────────────────────────────────────────────

    /// Create a collection over `aliases`, creating items as needed.
    ///
    /// Returns the collection and its plain key. Only the key's hash is stored.
    pub fn create_collection(
        &self,
        title: &str,
        owner: Option<&str>,
        aliases: &[Alias],
        now: Timestamp,
    ) -> StateResult<(Collection, String)> {
        let key = uuid::Uuid::new_v4().simple().to_string();
        let collection = Collection {
            id: uuid::Uuid::new_v4().simple().to_string(),
            title: title.to_string(),
            owner: owner.map(str::to_string),
            created: now,
            last_modified: now,
            key_hash: hash_key(&key),
            alias_items: self.items_for_aliases(aliases, now)?,
        };
        self.put_collection(&collection)?;
        debug!(collection_id = %collection.id, items = collection.alias_items.len(), "collection created");
        Ok((collection, key))
    }

    /// Get a collection by id.
    pub fn get_collection(&self, id: &str) -> StateResult<Option<Collection>> {
        let txn = self.db.begin_read().map_err(map_err!("transaction"))?;
        let table = txn.open_table(COLLECTIONS).map_err(map_err!("table"))?;
        match table.get(id).map_err(map_err!("read"))? {
            Some(guard) => {
                let coll: Collection =
                    serde_json::from_slice(guard.value()).map_err(map_err!(Decode))?;
                Ok(Some(coll))
            }
            None => Ok(None),
        }
    }

    /// Replace a collection's title, owner and membership. Requires the key.
    pub fn update_collection(
        &self,
        id: &str,
        key: &str,
        title: &str,
        owner: Option<&str>,
        aliases: &[Alias],
        now: Timestamp,
    ) -> StateResult<Collection> {
        let mut collection = self.authorized_collection(id, key)?;
        collection.title = title.to_string();
        collection.owner = owner.map(str::to_string);
        collection.alias_items = self.items_for_aliases(aliases, now)?;
        collection.last_modified = now;
        self.put_collection(&collection)?;
        debug!(collection_id = %id, "collection updated");
        Ok(collection)
    }

    /// Delete a collection. Requires the key. Items are kept.
    pub fn delete_collection(&self, id: &str, key: &str) -> StateResult<()> {
        self.authorized_collection(id, key)?;
        let txn = self.db.begin_write().map_err(map_err!("transaction"))?;
        {
            let mut table = txn.open_table(COLLECTIONS).map_err(map_err!("table"))?;
            table.remove(id).map_err(map_err!("write"))?;
        }
        txn.commit().map_err(map_err!("transaction"))?;
        debug!(collection_id = %id, "collection deleted");
        Ok(())
    }

    /// Request a refresh of every item in a collection.
    pub fn refresh_collection(&self, id: &str, now: Timestamp) -> StateResult<Vec<ItemId>> {
        let collection = self
            .get_collection(id)?
            .ok_or_else(|| StateError::NotFound(format!("collection {id}")))?;
        let ids: Vec<ItemId> = collection.item_ids().into_iter().collect();
        for item_id in &ids {
            self.request_refresh(item_id, now)?;
        }
        Ok(ids)
    }

    fn authorized_collection(&self, id: &str, key: &str) -> StateResult<Collection> {
        let collection = self
            .get_collection(id)?
            .ok_or_else(|| StateError::NotFound(format!("collection {id}")))?;
        if collection.key_hash != hash_key(key) {
            return Err(StateError::KeyMismatch(id.to_string()));
        }
        Ok(collection)
    }

    fn items_for_aliases(
        &self,
        aliases: &[Alias],
        now: Timestamp,
    ) -> StateResult<BTreeMap<String, ItemId>> {
        let mut alias_items = BTreeMap::new();
        for alias in aliases {
            let (item_id, _) = self.create_or_get_item(std::slice::from_ref(alias), now)?;
            alias_items.insert(alias.index_key(), item_id);
        }
        Ok(alias_items)
    }

    fn put_collection(&self, collection: &Collection) -> StateResult<()> {
        let value = serde_json::to_vec(collection).map_err(map_err!(Encode))?;
        let txn = self.db.begin_write().map_err(map_err!("transaction"))?;
        {
            let mut table = txn.open_table(COLLECTIONS).map_err(map_err!("table"))?;
            table
                .insert(collection.id.as_str(), value.as_slice())
                .map_err(map_err!("write"))?;
        }
        txn.commit().map_err(map_err!("transaction"))?;
        Ok(())
    }
}

fn hash_key(key: &str) -> String {
    hex::encode(Sha256::digest(key.as_bytes()))
}
