//! Bounded caching of built trees.

mod lru_cache;

pub use lru_cache::{LruCache, SmallKeyLruCache};
