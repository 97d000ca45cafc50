//! Local cache of remote collections, for offline reads.
//!
//! This module provides:
//! - One JSON array per collection in the shared store
//! - Network-first refresh that falls back to cached data
//! - Optimistic updates for changes still waiting in the pending queue

mod collection;
mod local;
mod traits;

pub use collection::CachedCollection;
pub use local::{placeholder_id, LocalCache};
pub use traits::{CacheResult, CacheSource, Cacheable};
