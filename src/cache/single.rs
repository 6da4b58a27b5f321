//! Facade over a single cache server.

use super::ops::{CacheCore, ProgressBar};
use super::Cache;
use crate::codec::Value;
use crate::config::CacheConfig;
use crate::connection::{Connection, ConnectionRegistry, Connector};
use crate::error::{Error, Result};
use crate::key::{IntoCacheKey, KeyCodec};
use crate::metrics::CacheMetrics;
use async_trait::async_trait;
use std::collections::HashMap;
use std::future::Future;
use std::io::Write;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// Cache backed by exactly one server.
#[derive(Debug)]
pub struct SingleCache {
    core: CacheCore,
    connection: Connection,
    config: CacheConfig,

    /// Keeps the pool alive for the facade's lifetime.
    _registry: ConnectionRegistry,
}

impl SingleCache {
    /// Connect to the single server listed in `config`.
    pub fn new(config: CacheConfig, connector: Arc<dyn Connector>) -> Result<Self> {
        if config.servers.len() != 1 {
            return Err(Error::Config(format!(
                "a single-server cache needs exactly one server, got {}",
                config.servers.len()
            )));
        }

        let registry = ConnectionRegistry::new(connector);
        let connection = registry
            .connect_all(&config)?
            .into_iter()
            .next()
            .ok_or_else(|| Error::Config("at least one server is required".into()))?;

        info!(
            endpoint = %connection.endpoint(),
            db = config.db,
            prefix = %config.key_prefix,
            codec = ?config.options.codec_version,
            "Created single-server cache"
        );

        Ok(Self {
            core: CacheCore::new(&config),
            connection,
            config,
            _registry: registry,
        })
    }

    /// The server connection.
    pub fn connection(&self) -> &Connection {
        &self.connection
    }

    /// The configuration this cache was built from.
    pub fn config(&self) -> &CacheConfig {
        &self.config
    }
}

#[async_trait]
impl Cache for SingleCache {
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
        self.core
            .add(&self.connection, &key, &value.into(), timeout)
            .await
    }

    async fn get<K>(&self, key: K) -> Result<Option<Value>>
    where
        K: IntoCacheKey + Send,
    {
        let key = self.core.keys.make_key(key, None);
        self.core.get(&self.connection, &key).await
    }

    async fn set<K, V>(&self, key: K, value: V, timeout: Option<i64>) -> Result<bool>
    where
        K: IntoCacheKey + Send,
        V: Into<Value> + Send,
    {
        let key = self.core.keys.make_key(key, None);
        self.core
            .set(&self.connection, &key, &value.into(), timeout)
            .await
    }

    async fn delete<K>(&self, key: K) -> Result<bool>
    where
        K: IntoCacheKey + Send,
    {
        let key = self.core.keys.make_key(key, None);
        self.core.delete(&self.connection, &key).await
    }

    async fn incr<K>(&self, key: K, delta: i64) -> Result<i64>
    where
        K: IntoCacheKey + Send,
    {
        let key = self.core.keys.make_key(key, None);
        self.core.incr(&self.connection, &key, delta).await
    }

    async fn has_key<K>(&self, key: K) -> Result<bool>
    where
        K: IntoCacheKey + Send,
    {
        let key = self.core.keys.make_key(key, None);
        self.core.has_key(&self.connection, &key).await
    }

    async fn touch<K>(&self, key: K, timeout: Option<i64>) -> Result<bool>
    where
        K: IntoCacheKey + Send,
    {
        let key = self.core.keys.make_key(key, None);
        self.core.touch(&self.connection, &key, timeout).await
    }

    async fn ttl<K>(&self, key: K) -> Result<Option<Duration>>
    where
        K: IntoCacheKey + Send,
    {
        let key = self.core.keys.make_key(key, None);
        self.core.ttl(&self.connection, &key).await
    }

    async fn incr_version(&self, key: &str, delta: i64, version: Option<u64>) -> Result<u64> {
        self.core
            .incr_version(&self.connection, key, delta, version)
            .await
    }

    async fn get_many<I, K>(&self, keys: I) -> Result<HashMap<String, Value>>
    where
        I: IntoIterator<Item = K> + Send,
        K: IntoCacheKey + Send,
    {
        let keys = self.core.keys.make_keys(keys, None);
        let mut found = HashMap::with_capacity(keys.len());
        self.core
            .get_many(&self.connection, &keys, &mut found)
            .await?;
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

        match timeout {
            None => self.core.set_many(&self.connection, &entries).await,
            Some(timeout) => {
                self.core
                    .set_many_timed(&self.connection, &entries, timeout)
                    .await
            }
        }
    }

    async fn delete_many<I, K>(&self, keys: I) -> Result<u64>
    where
        I: IntoIterator<Item = K> + Send,
        K: IntoCacheKey + Send,
    {
        let keys = self.core.keys.make_keys(keys, None);
        self.core.delete_many(&self.connection, &keys).await
    }

    async fn delete_pattern(&self, pattern: &str, version: Option<u64>) -> Result<u64> {
        let pattern = self.core.keys.make_key(pattern, version);
        self.core.delete_pattern(&self.connection, &pattern).await
    }

    async fn clear(&self, version: Option<u64>) -> Result<()> {
        match version {
            None => self.core.flush(&self.connection).await,
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
        self.core
            .get_or_set(&self.connection, &key, loader, timeout)
            .await
    }

    async fn reinsert_keys_with_progress(&self, out: &mut (dyn Write + Send)) -> Result<usize> {
        let mut progress = ProgressBar::new(out);
        let rewritten = self
            .core
            .reinsert_keys(&self.connection, &mut progress)
            .await?;
        progress.finish()?;
        Ok(rewritten)
    }
}
