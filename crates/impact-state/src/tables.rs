//! redb table definitions for the item store.
//!
//! Each table uses `&str` keys and `&[u8]` values (JSON-serialized domain
//! types), except the alias index whose values are plain item ids.

use redb::TableDefinition;

/// Items keyed by item id.
pub const ITEMS: TableDefinition<&str, &[u8]> = TableDefinition::new("items");

/// Item ids keyed by `{namespace}:{id}`.
pub const ALIAS_INDEX: TableDefinition<&str, &str> = TableDefinition::new("alias_index");

/// Collections keyed by collection id.
pub const COLLECTIONS: TableDefinition<&str, &[u8]> = TableDefinition::new("collections");
