//! impact-backend: the asynchronous aggregation pipeline.
//!
//! ```text
//!  ItemStore ──► QueueMonitor ──► "aliases" ──► AliasWorker ──┬──► "github" ──► MetricsWorker ─┐
//!     ▲                                                       └──► "pubmed" ──► MetricsWorker ─┤
//!     └─────────────────────────── merge_metrics / finish_provider ────────────────────────────┘
//! ```
//!
//! Tasks share nothing but the [`QueueManager`] and the store. Each queue
//! transfer is a copy of the item; the store is the single source of truth.

pub mod backend;
pub mod error;
pub mod monitor;
pub mod queue;
pub mod resolver;
pub mod retry;
pub mod worker;

pub use backend::{Backend, BackendSettings};
pub use error::{BackendError, BackendResult};
pub use monitor::QueueMonitor;
pub use queue::{NamedQueue, QueueManager, ALIAS_QUEUE};
pub use resolver::{AliasResolver, ResolveOutcome};
pub use retry::{Attempted, RetryPolicy};
pub use worker::{AliasWorker, DispatchWorker, MetricsWorker};
