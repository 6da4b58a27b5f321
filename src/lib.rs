//! Client-side sharded key/value cache layer.
//!
//! This crate sits between an application and one or more key/value servers
//! and provides:
//! - **Versioned keys** of the form `prefix:version:key`
//! - **A value codec** that keeps integers as plain decimal text (so the
//!   server can increment them) and serializes everything else with a
//!   version tag
//! - **Hash sharding** of keys over an ordered server list, with an optional
//!   write-master
//! - **Stampede avoidance** via `get_or_set`
//!
//! # Example
//!
//! ```rust,no_run
//! use shardcache::{Cache, CacheConfig, Error, MemoryConnector, ShardedCache, Value};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = CacheConfig::from_servers(&["10.0.0.1:6379", "10.0.0.2:6379"])?
//!         .with_key_prefix("app");
//!
//!     let cache = ShardedCache::new(config, Arc::new(MemoryConnector::new()))?;
//!
//!     cache.set("user:123", "Alice", Some(3600)).await?;
//!     if let Some(value) = cache.get("user:123").await? {
//!         println!("Found: {:?}", value);
//!     }
//!
//!     let report = cache
//!         .get_or_set("report", || async { Ok::<_, Error>(Value::from("expensive")) }, Some(60))
//!         .await?;
//!     println!("Report: {:?}", report);
//!
//!     Ok(())
//! }
//! ```
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────┐
//! │            Application Layer                │
//! └─────────────────────────────────────────────┘
//!                     │
//!                     ▼
//! ┌─────────────────────────────────────────────┐
//! │     Cache trait: SingleCache/ShardedCache   │
//! └─────────────────────────────────────────────┘
//!                     │
//!     ┌───────────────┼───────────────┐
//!     ▼               ▼               ▼
//! ┌─────────┐   ┌──────────┐   ┌────────────┐
//! │KeyCodec │   │ValueCodec│   │ShardRouter │
//! └─────────┘   └──────────┘   └────────────┘
//!                                     │
//!                                     ▼
//!                      ┌─────────────────────────┐
//!                      │ Connection → Backend    │
//!                      └─────────────────────────┘
//! ```
//!
//! # Consistency Model
//!
//! - **Sharding**: a key lives on exactly one server; there is no replication
//! - **Write-master**: all writes go to the master, reads follow the hash, so
//!   reads of keys hashed elsewhere may miss or be stale
//! - **Increments**: atomic on the server, except the documented
//!   read-modify-write fallback for serialized values

pub mod backend;
pub mod cache;
pub mod codec;
pub mod config;
pub mod connection;
pub mod error;
pub mod key;
pub mod metrics;
pub mod router;
pub mod testing;

// Re-export main types for convenience
pub use backend::{Backend, Batch, BatchCommand, BatchReply, MemoryBackend};
pub use cache::{Cache, ShardedCache, SingleCache};
pub use codec::{CodecVersion, Value, ValueCodec};
pub use config::{
    CacheConfig, CacheOptions, Endpoint, MasterAddress, ParserKind, StampedeMode,
};
pub use connection::{Connection, ConnectionParams, ConnectionRegistry, Connector, MemoryConnector};
pub use error::{BackendError, Error, Result};
pub use key::{CacheKey, IntoCacheKey, KeyCodec};
pub use metrics::{CacheMetrics, Counter, LabeledCounter, MetricsSnapshot};
pub use router::{ShardIndex, ShardRouter};

// Re-export testing types
pub use testing::TestShards;
