//! Caches used by the engine.
//!
//! Provides a generic LRU (Least Recently Used) cache and the table cache
//! built on it, which bounds the number of table files held open.

mod lru;
mod table_cache;

pub use lru::{CacheStats, LruCache};
pub use table_cache::TableCache;
