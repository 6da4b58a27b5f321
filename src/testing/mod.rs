//! Testing utilities for the cache facades.
//!
//! [`TestShards`] stands up a set of in-memory servers behind a shared
//! [`MemoryConnector`] and builds facades over them. Because backends are
//! shared per endpoint, a single and a sharded facade built from the same
//! fixture see the same data, and tests can inspect every server's raw
//! contents and call log directly.
//!
//! # Example
//!
//! ```rust,ignore
//! use shardcache::testing::TestShards;
//! use shardcache::Cache;
//!
//! let shards = TestShards::new(3);
//! let cache = shards.sharded()?;
//!
//! cache.set("user:1", "Alice", None).await?;
//! assert_eq!(shards.holders("user:1"), vec![cache.router().shard_for_key("user:1")]);
//! ```

mod cache_tests_codec;
mod cache_tests_sharded;
mod cache_tests_single;
mod cache_tests_stampede;

use crate::backend::MemoryBackend;
use crate::cache::{ShardedCache, SingleCache};
use crate::config::{CacheConfig, Endpoint, MasterAddress};
use crate::connection::MemoryConnector;
use crate::error::Result;
use std::sync::Arc;

/// First port handed out to fixture endpoints.
const BASE_PORT: u16 = 7000;

/// A set of in-memory cache servers.
#[derive(Debug)]
pub struct TestShards {
    connector: Arc<MemoryConnector>,
    endpoints: Vec<Endpoint>,
}

impl TestShards {
    /// Create `count` servers at `127.0.0.1:7000`, `127.0.0.1:7001`, ...
    pub fn new(count: usize) -> Self {
        let endpoints = (0..count)
            .map(|i| Endpoint::tcp("127.0.0.1", BASE_PORT + i as u16))
            .collect();
        Self {
            connector: Arc::new(MemoryConnector::new()),
            endpoints,
        }
    }

    /// The shared connector.
    pub fn connector(&self) -> Arc<MemoryConnector> {
        self.connector.clone()
    }

    /// Server endpoints, in shard order.
    pub fn endpoints(&self) -> &[Endpoint] {
        &self.endpoints
    }

    /// Number of servers.
    pub fn len(&self) -> usize {
        self.endpoints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.endpoints.is_empty()
    }

    /// The backend of server `index`.
    pub fn backend(&self, index: usize) -> Arc<MemoryBackend> {
        self.connector.backend(&self.endpoints[index])
    }

    /// The master address naming server `index`.
    pub fn master_address(&self, index: usize) -> MasterAddress {
        MasterAddress::new("127.0.0.1", BASE_PORT + index as u16)
    }

    /// A configuration listing every server.
    pub fn config(&self) -> CacheConfig {
        CacheConfig::new(self.endpoints.clone())
    }

    /// A single-server cache over the first server.
    ///
    /// Fails with [`Error::Config`](crate::Error::Config) when the fixture
    /// has no servers.
    pub fn single(&self) -> Result<SingleCache> {
        self.single_with(CacheConfig::new(
            self.endpoints.iter().take(1).cloned().collect(),
        ))
    }

    /// A single-server cache with a custom configuration.
    pub fn single_with(&self, config: CacheConfig) -> Result<SingleCache> {
        SingleCache::new(config, self.connector.clone())
    }

    /// A sharded cache over every server.
    pub fn sharded(&self) -> Result<ShardedCache> {
        self.sharded_with(self.config())
    }

    /// A sharded cache sending writes to server `index`.
    pub fn sharded_with_master(&self, index: usize) -> Result<ShardedCache> {
        self.sharded_with(self.config().with_master(self.master_address(index)))
    }

    /// A sharded cache with a custom configuration.
    pub fn sharded_with(&self, config: CacheConfig) -> Result<ShardedCache> {
        ShardedCache::new(config, self.connector.clone())
    }

    /// Indices of the servers holding the wire key `wire`.
    pub fn holders(&self, wire: &str) -> Vec<usize> {
        (0..self.len())
            .filter(|&i| self.backend(i).raw(wire).is_some())
            .collect()
    }

    /// Round trips served by each server.
    pub fn round_trips(&self) -> Vec<u64> {
        (0..self.len())
            .map(|i| self.backend(i).round_trips())
            .collect()
    }

    /// Total keys stored across servers.
    pub fn total_keys(&self) -> usize {
        (0..self.len()).map(|i| self.backend(i).len()).sum()
    }

    /// Forget the call logs of every server.
    pub fn reset_calls(&self) {
        for i in 0..self.len() {
            self.backend(i).reset_calls();
        }
    }
}
