// Cache module for local filesystem caching.
// Stores API responses and derived results; safe to delete at any time.

pub mod paths;
pub mod store;

pub use paths::{TOKEN_PARAM, cache_dir, config_dir, entry_path, request_key};
pub use store::{CacheEntry, CacheStore, DiskStore, MemoryStore};
