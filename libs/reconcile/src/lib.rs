//! Reconciliation loop primitives.
//!
//! Controllers in this workspace are written against small capability
//! traits rather than a concrete API client:
//!
//! - **Cache**: a locally-consistent read view (`get`, `list`). Eventually
//!   consistent; it may lag the authoritative store by a resync interval, so
//!   callers never assume freshness.
//! - **Watch**: a change-notification channel delivering object keys.
//! - **ObjectWriter**: create/update/update-status against the store.
//! - **WorkQueue**: a deduplicating, rate-limited queue of keys.
//!
//! # Invariants
//!
//! - Objects handed out by a cache are shared (`Arc<K>`) and never mutated by
//!   readers; a writer clones, mutates the clone and submits only the clone
//! - A key is processed by at most one worker at a time
//! - A burst of `add` calls for one key collapses into one pending entry

mod error;
mod key;
mod memory;
mod queue;
mod rate_limit;
mod store;

pub use error::StoreError;
pub use key::{object_key, split_key, KeyError};
pub use memory::MemoryStore;
pub use queue::WorkQueue;
pub use rate_limit::ControllerRateLimiter;
pub use store::{Cache, ChangeKind, Notification, ObjectWriter, Watch};
