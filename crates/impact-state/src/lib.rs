//! impact-state: embedded document store for the impact tracker.
//!
//! Backed by [redb](https://docs.rs/redb). Items and collections are
//! JSON-serialized into `&[u8]` value columns; a separate alias index maps
//! `{namespace}:{id}` to the owning item id.
//!
//! # Concurrency
//!
//! Every targeted update (`merge_metrics`, `add_aliases`, `finish_provider`,
//! ...) reads and rewrites the current document inside a single redb write
//! transaction. redb serializes write transactions, so two workers updating
//! different fields of the same item never overwrite each other from a
//! stale read.
//!
//! The `ItemStore` is `Clone` + `Send` + `Sync` (backed by `Arc<Database>`)
//! and can be shared across async tasks.

pub mod error;
pub mod store;
pub mod tables;

pub use error::{StateError, StateResult};
pub use store::ItemStore;
