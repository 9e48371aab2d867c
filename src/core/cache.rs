//! Key/value cache abstraction
//!
//! Cached resource payloads and rate-limit counters live in a shared cache.
//! `add` and `decrement` must be atomic in the backend: the rate limiter
//! relies on them and takes no locks of its own.

use crate::core::error::CacheError;
use async_trait::async_trait;
use serde_json::Value;
use std::time::Duration;

/// Result type for cache operations
pub type CacheResult<T> = Result<T, CacheError>;

#[async_trait]
pub trait CacheBackend: Send + Sync {
    /// Read a live entry
    async fn get(&self, key: &str) -> CacheResult<Option<Value>>;

    /// Store `value` under `key` for `ttl`
    async fn set(&self, key: &str, value: Value, ttl: Duration) -> CacheResult<()>;

    /// Store `value` only if `key` holds no live entry; returns whether it was stored
    async fn add(&self, key: &str, value: Value, ttl: Duration) -> CacheResult<bool>;

    /// Atomically decrement an integer entry and return the new value
    ///
    /// Fails with [`CacheError::MissingKey`] if the key is absent or expired.
    async fn decrement(&self, key: &str) -> CacheResult<i64>;

    /// Drop an entry
    async fn delete(&self, key: &str) -> CacheResult<()>;
}
