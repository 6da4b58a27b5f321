//! Facade over a set of hash-sharded cache servers.
//!
//! Reads go to the shard owning the key. Writes go to the same shard, or to
//! the write-master when one is configured. Multi-key operations make one
//! backend call per shard involved, visiting shards in order.

use super::ops::{CacheCore, ProgressBar};
use super::Cache;
use crate::codec::Value;
use crate::config::CacheConfig;
use crate::connection::{ConnectionRegistry, Connector};
use crate::error::Result;
use crate::key::{IntoCacheKey, KeyCodec};
use crate::metrics::CacheMetrics;
use crate::router::ShardRouter;
use async_trait::async_trait;
use std::collections::HashMap;
use std::future::Future;
use std::io::Write;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// Cache spread over several servers.
#[derive(Debug)]
pub struct ShardedCache {
    core: CacheCore,
    router: ShardRouter,
    config: CacheConfig,

    /// Keeps the pools alive for the facade's lifetime.
    _registry: ConnectionRegistry,
}

impl ShardedCache {
    /// Connect to every server listed in `config`.
    ///
    /// Fails if the list is empty or the configured master is not in it.
    pub fn new(config: CacheConfig, connector: Arc<dyn Connector>) -> Result<Self> {
        let registry = ConnectionRegistry::new(connector);
        let connections = registry.connect_all(&config)?;
        let router = ShardRouter::new(connections, config.master.as_ref(), config.hash_seed)?;

        info!(
            shards = router.len(),
            master = ?router.master().map(|c| c.endpoint().to_string()),
            db = config.db,
            prefix = %config.key_prefix,
            codec = ?config.options.codec_version,
            "Created sharded cache"
        );

        Ok(Self {
            core: CacheCore::new(&config),
            router,
            config,
            _registry: registry,
        })
    }

    /// The shard router.
    pub fn router(&self) -> &ShardRouter {
        &self.router
    }

    /// The configuration this cache was built from.
    pub fn config(&self) -> &CacheConfig {
        &self.config
    }
}

#[async_trait]
impl Cache for ShardedCache {
    fn key_codec(&self) -> &KeyCodec {
        &self.core.keys
    }

    fn metrics(&self) -> &CacheMetrics {
        &self.core.metrics
    }

    async fn add<K, V>(&self, key: K, value: V, timeout: Option<i64>) -> Result<bool>
    where
        K: IntoCacheKey + Send,
        V: Into<Value> + Send,
    {
        let key = self.core.keys.make_key(key, None);
        let conn = self.router.route(key.original(), true);
        self.core.add(conn, &key, &value.into(), timeout).await
    }

    async fn get<K>(&self, key: K) -> Result<Option<Value>>
    where
        K: IntoCacheKey + Send,
    {
        let key = self.core.keys.make_key(key, None);
        let conn = self.router.route(key.original(), false);
        self.core.get(conn, &key).await
    }

    async fn set<K, V>(&self, key: K, value: V, timeout: Option<i64>) -> Result<bool>
    where
        K: IntoCacheKey + Send,
        V: Into<Value> + Send,
    {
        let key = self.core.keys.make_key(key, None);
        let conn = self.router.route(key.original(), true);
        self.core.set(conn, &key, &value.into(), timeout).await
    }

    async fn delete<K>(&self, key: K) -> Result<bool>
    where
        K: IntoCacheKey + Send,
    {
        let key = self.core.keys.make_key(key, None);
        let conn = self.router.route(key.original(), true);
        self.core.delete(conn, &key).await
    }

    async fn incr<K>(&self, key: K, delta: i64) -> Result<i64>
    where
        K: IntoCacheKey + Send,
    {
        let key = self.core.keys.make_key(key, None);
        let conn = self.router.route(key.original(), true);
        self.core.incr(conn, &key, delta).await
    }

    async fn has_key<K>(&self, key: K) -> Result<bool>
    where
        K: IntoCacheKey + Send,
    {
        let key = self.core.keys.make_key(key, None);
        let conn = self.router.route(key.original(), false);
        self.core.has_key(conn, &key).await
    }

    async fn touch<K>(&self, key: K, timeout: Option<i64>) -> Result<bool>
    where
        K: IntoCacheKey + Send,
    {
        let key = self.core.keys.make_key(key, None);
        let conn = self.router.route(key.original(), true);
        self.core.touch(conn, &key, timeout).await
    }

    async fn ttl<K>(&self, key: K) -> Result<Option<Duration>>
    where
        K: IntoCacheKey + Send,
    {
        let key = self.core.keys.make_key(key, None);
        let conn = self.router.route(key.original(), false);
        self.core.ttl(conn, &key).await
    }

    async fn incr_version(&self, key: &str, delta: i64, version: Option<u64>) -> Result<u64> {
        let conn = self.router.route(key, true);
        self.core.incr_version(conn, key, delta, version).await
    }

    async fn get_many<I, K>(&self, keys: I) -> Result<HashMap<String, Value>>
    where
        I: IntoIterator<Item = K> + Send,
        K: IntoCacheKey + Send,
    {
        let groups = self.router.partition(self.core.keys.make_keys(keys, None), false);
        let mut found = HashMap::new();
        for (index, keys) in &groups {
            self.core
                .get_many(self.router.connection(*index), keys, &mut found)
                .await?;
        }
        Ok(found)
    }

    async fn set_many<I, K>(&self, data: I, timeout: Option<i64>) -> Result<()>
    where
        I: IntoIterator<Item = (K, Value)> + Send,
        K: IntoCacheKey + Send,
    {
        let entries: Vec<_> = data
            .into_iter()
            .map(|(key, value)| (self.core.keys.make_key(key, None), value))
            .collect();

        for (index, entries) in &self.router.partition_entries(entries, true) {
            let conn = self.router.connection(*index);
            match timeout {
                None => self.core.set_many(conn, entries).await?,
                Some(timeout) => self.core.set_many_timed(conn, entries, timeout).await?,
            }
        }
        Ok(())
    }

    async fn delete_many<I, K>(&self, keys: I) -> Result<u64>
    where
        I: IntoIterator<Item = K> + Send,
        K: IntoCacheKey + Send,
    {
        let groups = self.router.partition(self.core.keys.make_keys(keys, None), true);
        let mut removed = 0;
        for (index, keys) in &groups {
            removed += self
                .core
                .delete_many(self.router.connection(*index), keys)
                .await?;
        }
        Ok(removed)
    }

    async fn delete_pattern(&self, pattern: &str, version: Option<u64>) -> Result<u64> {
        let pattern = self.core.keys.make_key(pattern, version);
        let mut removed = 0;
        for index in self.router.broadcast_targets() {
            removed += self
                .core
                .delete_pattern(self.router.connection(index), &pattern)
                .await?;
        }
        Ok(removed)
    }

    async fn clear(&self, version: Option<u64>) -> Result<()> {
        match version {
            None => {
                for index in self.router.broadcast_targets() {
                    self.core.flush(self.router.connection(index)).await?;
                }
                Ok(())
            }
            Some(version) => {
                self.delete_pattern("*", Some(version)).await?;
                Ok(())
            }
        }
    }

    async fn get_or_set<K, F, Fut>(
        &self,
        key: K,
        loader: F,
        timeout: Option<i64>,
    ) -> Result<Option<Value>>
    where
        K: IntoCacheKey + Send,
        F: FnOnce() -> Fut + Send,
        Fut: Future<Output = Result<Value>> + Send,
    {
        let key = self.core.keys.make_key(key, None);
        let conn = self.router.route(key.original(), true);
        self.core.get_or_set(conn, &key, loader, timeout).await
    }

    async fn reinsert_keys_with_progress(&self, out: &mut (dyn Write + Send)) -> Result<usize> {
        let mut progress = ProgressBar::new(out);
        let mut rewritten = 0;
        for conn in self.router.connections() {
            rewritten += self.core.reinsert_keys(conn, &mut progress).await?;
        }
        progress.finish()?;
        Ok(rewritten)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Endpoint, MasterAddress};
    use crate::connection::MemoryConnector;
    use crate::error::Error;

    fn endpoints() -> Vec<Endpoint> {
        (0..3).map(|i| Endpoint::tcp("127.0.0.1", 6379 + i)).collect()
    }

    #[test]
    fn test_master_must_be_listed() {
        let config =
            CacheConfig::new(endpoints()).with_master(MasterAddress::new("10.0.0.9", 6379));
        let err = ShardedCache::new(config, Arc::new(MemoryConnector::new())).unwrap_err();
        assert!(matches!(err, Error::Config(msg) if msg.contains("10.0.0.9:6379")));
    }

    #[test]
    fn test_router_resolves_master() {
        let config =
            CacheConfig::new(endpoints()).with_master(MasterAddress::new("127.0.0.1", 6381));
        let cache = ShardedCache::new(config, Arc::new(MemoryConnector::new())).unwrap();
        assert_eq!(cache.router().len(), 3);
        assert_eq!(cache.router().master_index(), Some(2));
    }
}
