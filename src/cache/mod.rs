//! Cache facades.
//!
//! [`SingleCache`] talks to one server. [`ShardedCache`] spreads keys over
//! several servers by hash, optionally sending every write to a master.
//! Both implement [`Cache`] with the same semantics, so callers can switch
//! between them through configuration alone.
//!
//! Timeouts are in seconds: `None` uses the configured default, a negative
//! value makes writes a no-op, `0` means no expiry and a positive value
//! expires the entry after that many seconds.

mod ops;
mod sharded;
mod single;

pub use sharded::ShardedCache;
pub use single::SingleCache;

use crate::codec::Value;
use crate::error::Result;
use crate::key::{CacheKey, IntoCacheKey, KeyCodec};
use crate::metrics::CacheMetrics;
use async_trait::async_trait;
use std::collections::HashMap;
use std::future::Future;
use std::io::Write;
use std::time::Duration;

/// Operations shared by the cache facades.
///
/// Keys are anything implementing [`IntoCacheKey`]: a plain string is
/// versioned with the default version, a [`CacheKey`] built through
/// [`Cache::make_key`] is used as is.
#[async_trait]
pub trait Cache: Send + Sync {
    /// The key codec, for building explicitly versioned keys.
    fn key_codec(&self) -> &KeyCodec;

    /// Operation counters.
    fn metrics(&self) -> &CacheMetrics;

    /// Build a wire key for `key` at `version` (default version if `None`).
    fn make_key<K: IntoCacheKey>(&self, key: K, version: Option<u64>) -> CacheKey
    where
        Self: Sized,
    {
        self.key_codec().make_key(key, version)
    }

    // ==================== Single-key Operations ====================

    /// Store `value` only if `key` does not exist. Returns whether it was stored.
    async fn add<K, V>(&self, key: K, value: V, timeout: Option<i64>) -> Result<bool>
    where
        K: IntoCacheKey + Send,
        V: Into<Value> + Send;

    /// Fetch the value at `key`.
    async fn get<K>(&self, key: K) -> Result<Option<Value>>
    where
        K: IntoCacheKey + Send;

    /// Fetch the value at `key`, or `default` when absent.
    async fn get_or_default<K>(&self, key: K, default: Value) -> Result<Value>
    where
        K: IntoCacheKey + Send,
    {
        Ok(self.get(key).await?.unwrap_or(default))
    }

    /// Store `value` at `key`. Returns `false` if skipped for a negative timeout.
    async fn set<K, V>(&self, key: K, value: V, timeout: Option<i64>) -> Result<bool>
    where
        K: IntoCacheKey + Send,
        V: Into<Value> + Send;

    /// Remove `key`. Returns whether it existed.
    async fn delete<K>(&self, key: K) -> Result<bool>
    where
        K: IntoCacheKey + Send;

    /// Add `delta` to the integer at `key` and return the result.
    ///
    /// Fails with [`Error::KeyNotFound`](crate::Error::KeyNotFound) if the
    /// key is absent.
    async fn incr<K>(&self, key: K, delta: i64) -> Result<i64>
    where
        K: IntoCacheKey + Send;

    /// Subtract `delta` from the integer at `key`.
    async fn decr<K>(&self, key: K, delta: i64) -> Result<i64>
    where
        K: IntoCacheKey + Send,
    {
        self.incr(key, -delta).await
    }

    /// Whether `key` exists.
    async fn has_key<K>(&self, key: K) -> Result<bool>
    where
        K: IntoCacheKey + Send;

    /// Reset the expiry of `key`. Returns whether the key existed.
    async fn touch<K>(&self, key: K, timeout: Option<i64>) -> Result<bool>
    where
        K: IntoCacheKey + Send;

    /// Remaining time to live of `key`, `None` if absent or not expiring.
    async fn ttl<K>(&self, key: K) -> Result<Option<Duration>>
    where
        K: IntoCacheKey + Send;

    // ==================== Versioning ====================

    /// Move `key` from `version` (default if `None`) to `version + delta`.
    /// Returns the new version.
    async fn incr_version(&self, key: &str, delta: i64, version: Option<u64>) -> Result<u64>;

    /// Move `key` from `version` to `version - delta`.
    async fn decr_version(&self, key: &str, delta: i64, version: Option<u64>) -> Result<u64> {
        self.incr_version(key, -delta, version).await
    }

    // ==================== Multi-key Operations ====================

    /// Fetch several keys. The result maps each found logical key to its value.
    async fn get_many<I, K>(&self, keys: I) -> Result<HashMap<String, Value>>
    where
        I: IntoIterator<Item = K> + Send,
        K: IntoCacheKey + Send;

    /// Store several entries.
    ///
    /// With `timeout == None` entries are written with one bulk write per
    /// server and do not expire. Otherwise each server gets one batch of
    /// timed writes.
    async fn set_many<I, K>(&self, data: I, timeout: Option<i64>) -> Result<()>
    where
        I: IntoIterator<Item = (K, Value)> + Send,
        K: IntoCacheKey + Send;

    /// Remove several keys. Returns how many existed.
    async fn delete_many<I, K>(&self, keys: I) -> Result<u64>
    where
        I: IntoIterator<Item = K> + Send,
        K: IntoCacheKey + Send;

    /// Remove every key matching the glob `pattern` at `version`.
    async fn delete_pattern(&self, pattern: &str, version: Option<u64>) -> Result<u64>;

    /// Remove everything (`None`) or every key of one version.
    async fn clear(&self, version: Option<u64>) -> Result<()>;

    // ==================== Stampede Avoidance ====================

    /// Return the cached value, or compute and store it while making other
    /// callers serve the current value in the meantime.
    ///
    /// `timeout` is how long a load stays fresh. Returns `None` only when
    /// another load is in flight and nothing is cached yet.
    async fn get_or_set<K, F, Fut>(
        &self,
        key: K,
        loader: F,
        timeout: Option<i64>,
    ) -> Result<Option<Value>>
    where
        K: IntoCacheKey + Send,
        F: FnOnce() -> Fut + Send,
        Fut: Future<Output = Result<Value>> + Send;

    // ==================== Maintenance ====================

    /// Re-encode every non-expiring value with the current codec, drawing
    /// progress to `out`. Returns how many keys were rewritten.
    async fn reinsert_keys_with_progress(&self, out: &mut (dyn Write + Send)) -> Result<usize>;

    /// Re-encode every non-expiring value, drawing progress to stdout.
    async fn reinsert_keys(&self) -> Result<usize> {
        let mut stdout = std::io::stdout();
        self.reinsert_keys_with_progress(&mut stdout).await
    }
}
