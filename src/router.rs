//! Key-to-shard routing.
//!
//! A key's shard is `xxhash64(seed, key) % shard_count` over the logical
//! key, so routing depends only on the key, the seed and the ordered shard
//! list. Clients configured with the same list agree on every key, across
//! restarts.
//!
//! When a write-master is configured, writes ignore the hash and go to the
//! master. Reads keep using the hash.

use crate::config::MasterAddress;
use crate::connection::Connection;
use crate::error::{Error, Result};
use crate::key::{CacheKey, IntoCacheKey, KeyCodec};
use std::collections::BTreeMap;
use std::hash::Hasher;
use twox_hash::XxHash64;

/// Position of a connection in the shard table.
pub type ShardIndex = usize;

/// Routes keys to connections.
#[derive(Debug)]
pub struct ShardRouter {
    /// Connections in configured order.
    connections: Vec<Connection>,

    /// Index of the write-master, resolved once at construction.
    master: Option<ShardIndex>,

    /// Seed for the routing hash.
    hash_seed: u64,
}

impl ShardRouter {
    /// Build a router over `connections`.
    ///
    /// Fails if there are no connections, or if `master` is set and does not
    /// match exactly one of them.
    pub fn new(
        connections: Vec<Connection>,
        master: Option<&MasterAddress>,
        hash_seed: u64,
    ) -> Result<Self> {
        if connections.is_empty() {
            return Err(Error::Config("at least one server is required".into()));
        }

        let master = match master {
            Some(address) => {
                let matching: Vec<ShardIndex> = connections
                    .iter()
                    .enumerate()
                    .filter(|(_, c)| c.endpoint().matches(address))
                    .map(|(i, _)| i)
                    .collect();
                match matching.as_slice() {
                    [index] => Some(*index),
                    [] => {
                        return Err(Error::Config(format!(
                            "{} is not in the list of available cache servers",
                            address
                        )))
                    }
                    _ => {
                        return Err(Error::Config(format!(
                            "{} matches {} cache servers, expected exactly one",
                            address,
                            matching.len()
                        )))
                    }
                }
            }
            None => None,
        };

        Ok(Self {
            connections,
            master,
            hash_seed,
        })
    }

    /// Number of shards.
    pub fn len(&self) -> usize {
        self.connections.len()
    }

    /// Always false: a router has at least one shard.
    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    /// All connections, in shard order.
    pub fn connections(&self) -> &[Connection] {
        &self.connections
    }

    /// The connection at `index`.
    pub fn connection(&self, index: ShardIndex) -> &Connection {
        &self.connections[index]
    }

    /// Index of the write-master, if configured.
    pub fn master_index(&self) -> Option<ShardIndex> {
        self.master
    }

    /// The write-master connection, if configured.
    pub fn master(&self) -> Option<&Connection> {
        self.master.map(|i| &self.connections[i])
    }

    /// Hash a logical key.
    pub fn hash_key(&self, key: &str) -> u64 {
        let mut hasher = XxHash64::with_seed(self.hash_seed);
        hasher.write(key.as_bytes());
        hasher.finish()
    }

    /// The shard owning `key` by hash alone.
    pub fn shard_for_key(&self, key: &str) -> ShardIndex {
        (self.hash_key(key) % self.connections.len() as u64) as ShardIndex
    }

    /// The shard an operation on `key` goes to.
    pub fn route_index(&self, key: &str, for_write: bool) -> ShardIndex {
        match self.master {
            Some(master) if for_write => master,
            _ => self.shard_for_key(key),
        }
    }

    /// The connection an operation on `key` goes to.
    pub fn route(&self, key: &str, for_write: bool) -> &Connection {
        &self.connections[self.route_index(key, for_write)]
    }

    /// Group versioned keys by the shard that serves them.
    ///
    /// Each shard appears once, in shard order; keys keep their input order
    /// within a group.
    pub fn partition(
        &self,
        keys: Vec<CacheKey>,
        for_write: bool,
    ) -> Vec<(ShardIndex, Vec<CacheKey>)> {
        self.partition_entries(keys.into_iter().map(|k| (k, ())).collect(), for_write)
            .into_iter()
            .map(|(index, group)| (index, group.into_iter().map(|(k, ())| k).collect()))
            .collect()
    }

    /// Group `(key, payload)` pairs by the shard that serves the key.
    pub fn partition_entries<T>(
        &self,
        entries: Vec<(CacheKey, T)>,
        for_write: bool,
    ) -> Vec<(ShardIndex, Vec<(CacheKey, T)>)> {
        let mut groups: BTreeMap<ShardIndex, Vec<(CacheKey, T)>> = BTreeMap::new();
        for (key, payload) in entries {
            let index = self.route_index(key.original(), for_write);
            groups.entry(index).or_default().push((key, payload));
        }
        groups.into_iter().collect()
    }

    /// Version `keys` and group them by shard.
    pub fn route_many<I>(
        &self,
        keys: I,
        for_write: bool,
        version: Option<u64>,
        codec: &KeyCodec,
    ) -> Vec<(ShardIndex, Vec<CacheKey>)>
    where
        I: IntoIterator,
        I::Item: IntoCacheKey,
    {
        self.partition(codec.make_keys(keys, version), for_write)
    }

    /// Connections a keyspace-wide operation must visit: the master alone
    /// when configured, every shard otherwise.
    pub fn broadcast_targets(&self) -> Vec<ShardIndex> {
        match self.master {
            Some(master) => vec![master],
            None => (0..self.connections.len()).collect(),
        }
    }
}
