//! The backend capability set consumed by the cache facades.
//!
//! A [`Backend`] is one connection (or pool) to one key/value server. The
//! facades never speak a wire protocol themselves; transport adapters
//! implement this trait. [`MemoryBackend`] is an in-process implementation.

mod memory;

pub use memory::MemoryBackend;

use crate::error::BackendError;
use async_trait::async_trait;
use bytes::Bytes;
use std::time::Duration;

/// Result type for backend calls.
pub type BackendResult<T> = std::result::Result<T, BackendError>;

/// One key/value server connection.
///
/// Glob patterns follow the usual server syntax: `*`, `?`, `[...]` and `\`
/// escapes.
#[async_trait]
pub trait Backend: Send + Sync + std::fmt::Debug {
    /// Read a key.
    async fn get(&self, key: &str) -> BackendResult<Option<Bytes>>;

    /// Write a key with no expiry.
    async fn set(&self, key: &str, value: Bytes) -> BackendResult<()>;

    /// Write a key only if it is absent. Returns whether it was written.
    async fn set_if_absent(&self, key: &str, value: Bytes) -> BackendResult<bool>;

    /// Write a key that expires after `ttl`.
    async fn set_with_expiry(&self, key: &str, value: Bytes, ttl: Duration) -> BackendResult<()>;

    /// Write a key only if absent, then set its expiry.
    async fn set_if_absent_then_expire(
        &self,
        key: &str,
        value: Bytes,
        ttl: Duration,
    ) -> BackendResult<bool>;

    /// Delete keys. Returns how many existed.
    async fn delete(&self, keys: &[String]) -> BackendResult<u64>;

    /// Whether a key exists.
    async fn exists(&self, key: &str) -> BackendResult<bool>;

    /// Read many keys. The result is positional.
    async fn multi_get(&self, keys: &[String]) -> BackendResult<Vec<Option<Bytes>>>;

    /// Write many keys with no expiry.
    async fn multi_set(&self, entries: Vec<(String, Bytes)>) -> BackendResult<()>;

    /// Atomically add `delta` to an integer value.
    ///
    /// Fails with [`BackendError::NotAnInteger`] if the stored value is not an integer.
    async fn increment(&self, key: &str, delta: i64) -> BackendResult<i64>;

    /// Rename a key only if `new` does not exist. Returns whether it moved.
    ///
    /// Fails with [`BackendError::NoSuchKey`] if `old` does not exist.
    async fn rename_if_absent(&self, old: &str, new: &str) -> BackendResult<bool>;

    /// List keys matching a glob pattern.
    async fn keys_matching(&self, pattern: &str) -> BackendResult<Vec<String>>;

    /// Remaining lifetime. `None` if the key has no expiry or does not exist.
    async fn time_to_live(&self, key: &str) -> BackendResult<Option<Duration>>;

    /// Set the expiry of an existing key. Returns whether the key exists.
    async fn expire(&self, key: &str, ttl: Duration) -> BackendResult<bool>;

    /// Remove the expiry of an existing key. Returns whether the key exists.
    async fn persist(&self, key: &str) -> BackendResult<bool>;

    /// Remove every key in the selected database.
    async fn flush_all(&self) -> BackendResult<()>;

    /// Execute a batch atomically, in submission order.
    async fn execute(&self, batch: Batch) -> BackendResult<Vec<BatchReply>>;
}

/// A command queued in a [`Batch`].
#[derive(Debug, Clone, PartialEq)]
pub enum BatchCommand {
    Set { key: String, value: Bytes },
    SetWithExpiry { key: String, value: Bytes, ttl: Duration },
    SetIfAbsent { key: String, value: Bytes },
    Expire { key: String, ttl: Duration },
    Delete { keys: Vec<String> },
}

/// Reply to one batched command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchReply {
    Ok,
    Bool(bool),
    Count(u64),
}

/// A pipeline of commands sent to one backend in a single round trip.
#[derive(Debug, Clone, Default)]
pub struct Batch {
    commands: Vec<BatchCommand>,
}

impl Batch {
    /// Create an empty batch.
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue an unconditional write.
    pub fn set(&mut self, key: impl Into<String>, value: Bytes) -> &mut Self {
        self.commands.push(BatchCommand::Set {
            key: key.into(),
            value,
        });
        self
    }

    /// Queue a write with expiry.
    pub fn set_with_expiry(
        &mut self,
        key: impl Into<String>,
        value: Bytes,
        ttl: Duration,
    ) -> &mut Self {
        self.commands.push(BatchCommand::SetWithExpiry {
            key: key.into(),
            value,
            ttl,
        });
        self
    }

    /// Queue a conditional write.
    pub fn set_if_absent(&mut self, key: impl Into<String>, value: Bytes) -> &mut Self {
        self.commands.push(BatchCommand::SetIfAbsent {
            key: key.into(),
            value,
        });
        self
    }

    /// Queue an expiry update.
    pub fn expire(&mut self, key: impl Into<String>, ttl: Duration) -> &mut Self {
        self.commands.push(BatchCommand::Expire {
            key: key.into(),
            ttl,
        });
        self
    }

    /// Queue a delete.
    pub fn delete(&mut self, keys: Vec<String>) -> &mut Self {
        self.commands.push(BatchCommand::Delete { keys });
        self
    }

    /// Number of queued commands.
    pub fn len(&self) -> usize {
        self.commands.len()
    }

    /// Whether nothing is queued.
    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    /// The queued commands, in order.
    pub fn commands(&self) -> &[BatchCommand] {
        &self.commands
    }

    /// Consume the batch.
    pub fn into_commands(self) -> Vec<BatchCommand> {
        self.commands
    }
}
