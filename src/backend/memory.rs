//! In-process backend.
//!
//! Behaves like a single key/value server: per-key expiry, atomic
//! conditional writes, native integer increment and atomic batches. Expiry
//! uses `tokio::time::Instant`, so tests can drive it with a paused clock.

use super::{Backend, BackendResult, Batch, BatchCommand, BatchReply};
use crate::config::Endpoint;
use crate::error::BackendError;
use async_trait::async_trait;
use bytes::Bytes;
use globset::GlobBuilder;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug, Clone)]
struct Entry {
    value: Bytes,
    expires_at: Option<Instant>,
}

impl Entry {
    fn new(value: Bytes, ttl: Option<Duration>) -> Self {
        Self {
            value,
            expires_at: ttl.map(|ttl| Instant::now() + ttl),
        }
    }

    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.map(|at| at <= now).unwrap_or(false)
    }
}

/// In-memory key/value server.
#[derive(Debug)]
pub struct MemoryBackend {
    endpoint: Endpoint,
    entries: Mutex<HashMap<String, Entry>>,
    round_trips: AtomicU64,
    calls: Mutex<Vec<&'static str>>,
    unavailable: AtomicBool,
}

impl MemoryBackend {
    /// Create an empty backend identified by `endpoint`.
    pub fn new(endpoint: Endpoint) -> Self {
        Self {
            endpoint,
            entries: Mutex::new(HashMap::new()),
            round_trips: AtomicU64::new(0),
            calls: Mutex::new(Vec::new()),
            unavailable: AtomicBool::new(false),
        }
    }

    /// The endpoint this backend stands in for.
    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    /// Number of calls served so far. A batch counts once.
    pub fn round_trips(&self) -> u64 {
        self.round_trips.load(Ordering::Relaxed)
    }

    /// Names of the calls served so far, in order.
    pub fn calls(&self) -> Vec<&'static str> {
        self.calls.lock().clone()
    }

    /// Forget recorded calls and round trips.
    pub fn reset_calls(&self) {
        self.calls.lock().clear();
        self.round_trips.store(0, Ordering::Relaxed);
    }

    /// Make every subsequent call fail as if the server were down.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::Relaxed);
    }

    /// Raw stored bytes, bypassing call accounting.
    pub fn raw(&self, key: &str) -> Option<Bytes> {
        let now = Instant::now();
        self.entries
            .lock()
            .get(key)
            .filter(|e| !e.is_expired(now))
            .map(|e| e.value.clone())
    }

    /// Store raw bytes with no expiry, bypassing call accounting.
    pub fn insert_raw(&self, key: impl Into<String>, value: Bytes) {
        self.entries.lock().insert(key.into(), Entry::new(value, None));
    }

    /// Live keys, sorted, bypassing call accounting.
    pub fn raw_keys(&self) -> Vec<String> {
        let now = Instant::now();
        let mut keys: Vec<String> = self
            .entries
            .lock()
            .iter()
            .filter(|(_, e)| !e.is_expired(now))
            .map(|(k, _)| k.clone())
            .collect();
        keys.sort();
        keys
    }

    /// Number of live keys.
    pub fn len(&self) -> usize {
        self.raw_keys().len()
    }

    /// Whether no live keys are stored.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn call(&self, name: &'static str) -> BackendResult<()> {
        if self.unavailable.load(Ordering::Relaxed) {
            return Err(BackendError::Unavailable {
                addr: self.endpoint.to_string(),
                reason: "connection refused".into(),
            });
        }
        self.round_trips.fetch_add(1, Ordering::Relaxed);
        self.calls.lock().push(name);
        Ok(())
    }
}

/// Drop `key` if it has expired, then return the live entry.
fn live<'a>(entries: &'a mut HashMap<String, Entry>, key: &str) -> Option<&'a mut Entry> {
    let now = Instant::now();
    if entries.get(key).map(|e| e.is_expired(now)).unwrap_or(false) {
        entries.remove(key);
    }
    entries.get_mut(key)
}

fn set_if_absent(
    entries: &mut HashMap<String, Entry>,
    key: &str,
    value: Bytes,
    ttl: Option<Duration>,
) -> bool {
    if live(entries, key).is_some() {
        return false;
    }
    entries.insert(key.to_string(), Entry::new(value, ttl));
    true
}

fn expire(entries: &mut HashMap<String, Entry>, key: &str, ttl: Duration) -> bool {
    if ttl.is_zero() {
        return live(entries, key).is_some() && entries.remove(key).is_some();
    }
    match live(entries, key) {
        Some(entry) => {
            entry.expires_at = Some(Instant::now() + ttl);
            true
        }
        None => false,
    }
}

fn delete(entries: &mut HashMap<String, Entry>, keys: &[String]) -> u64 {
    let mut removed = 0;
    for key in keys {
        if live(entries, key).is_some() {
            entries.remove(key);
            removed += 1;
        }
    }
    removed
}

#[async_trait]
impl Backend for MemoryBackend {
    async fn get(&self, key: &str) -> BackendResult<Option<Bytes>> {
        self.call("get")?;
        let mut entries = self.entries.lock();
        Ok(live(&mut entries, key).map(|e| e.value.clone()))
    }

    async fn set(&self, key: &str, value: Bytes) -> BackendResult<()> {
        self.call("set")?;
        self.entries
            .lock()
            .insert(key.to_string(), Entry::new(value, None));
        Ok(())
    }

    async fn set_if_absent(&self, key: &str, value: Bytes) -> BackendResult<bool> {
        self.call("set_if_absent")?;
        Ok(set_if_absent(&mut self.entries.lock(), key, value, None))
    }

    async fn set_with_expiry(&self, key: &str, value: Bytes, ttl: Duration) -> BackendResult<()> {
        self.call("set_with_expiry")?;
        self.entries
            .lock()
            .insert(key.to_string(), Entry::new(value, Some(ttl)));
        Ok(())
    }

    async fn set_if_absent_then_expire(
        &self,
        key: &str,
        value: Bytes,
        ttl: Duration,
    ) -> BackendResult<bool> {
        self.call("set_if_absent_then_expire")?;
        Ok(set_if_absent(&mut self.entries.lock(), key, value, Some(ttl)))
    }

    async fn delete(&self, keys: &[String]) -> BackendResult<u64> {
        self.call("delete")?;
        Ok(delete(&mut self.entries.lock(), keys))
    }

    async fn exists(&self, key: &str) -> BackendResult<bool> {
        self.call("exists")?;
        Ok(live(&mut self.entries.lock(), key).is_some())
    }

    async fn multi_get(&self, keys: &[String]) -> BackendResult<Vec<Option<Bytes>>> {
        self.call("multi_get")?;
        let mut entries = self.entries.lock();
        Ok(keys
            .iter()
            .map(|key| live(&mut entries, key).map(|e| e.value.clone()))
            .collect())
    }

    async fn multi_set(&self, items: Vec<(String, Bytes)>) -> BackendResult<()> {
        self.call("multi_set")?;
        let mut entries = self.entries.lock();
        for (key, value) in items {
            entries.insert(key, Entry::new(value, None));
        }
        Ok(())
    }

    async fn increment(&self, key: &str, delta: i64) -> BackendResult<i64> {
        self.call("increment")?;
        let mut entries = self.entries.lock();
        match live(&mut entries, key) {
            Some(entry) => {
                let current: i64 = std::str::from_utf8(&entry.value)
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .ok_or(BackendError::NotAnInteger)?;
                let next = current
                    .checked_add(delta)
                    .ok_or(BackendError::NotAnInteger)?;
                entry.value = Bytes::from(next.to_string());
                Ok(next)
            }
            None => {
                entries.insert(
                    key.to_string(),
                    Entry::new(Bytes::from(delta.to_string()), None),
                );
                Ok(delta)
            }
        }
    }

    async fn rename_if_absent(&self, old: &str, new: &str) -> BackendResult<bool> {
        self.call("rename_if_absent")?;
        let mut entries = self.entries.lock();
        if live(&mut entries, old).is_none() {
            return Err(BackendError::NoSuchKey);
        }
        if live(&mut entries, new).is_some() {
            return Ok(false);
        }
        if let Some(entry) = entries.remove(old) {
            entries.insert(new.to_string(), entry);
        }
        Ok(true)
    }

    async fn keys_matching(&self, pattern: &str) -> BackendResult<Vec<String>> {
        self.call("keys_matching")?;
        let matcher = GlobBuilder::new(pattern)
            .literal_separator(false)
            .backslash_escape(true)
            .build()?
            .compile_matcher();
        let now = Instant::now();
        let mut keys: Vec<String> = self
            .entries
            .lock()
            .iter()
            .filter(|(k, e)| !e.is_expired(now) && matcher.is_match(k.as_str()))
            .map(|(k, _)| k.clone())
            .collect();
        keys.sort();
        Ok(keys)
    }

    async fn time_to_live(&self, key: &str) -> BackendResult<Option<Duration>> {
        self.call("time_to_live")?;
        let mut entries = self.entries.lock();
        let now = Instant::now();
        Ok(live(&mut entries, key)
            .and_then(|e| e.expires_at)
            .map(|at| at.saturating_duration_since(now)))
    }

    async fn expire(&self, key: &str, ttl: Duration) -> BackendResult<bool> {
        self.call("expire")?;
        Ok(expire(&mut self.entries.lock(), key, ttl))
    }

    async fn persist(&self, key: &str) -> BackendResult<bool> {
        self.call("persist")?;
        let mut entries = self.entries.lock();
        match live(&mut entries, key) {
            Some(entry) => {
                entry.expires_at = None;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn flush_all(&self) -> BackendResult<()> {
        self.call("flush_all")?;
        self.entries.lock().clear();
        Ok(())
    }

    async fn execute(&self, batch: Batch) -> BackendResult<Vec<BatchReply>> {
        self.call("execute")?;
        let mut entries = self.entries.lock();
        let replies = batch
            .into_commands()
            .into_iter()
            .map(|command| match command {
                BatchCommand::Set { key, value } => {
                    entries.insert(key, Entry::new(value, None));
                    BatchReply::Ok
                }
                BatchCommand::SetWithExpiry { key, value, ttl } => {
                    entries.insert(key, Entry::new(value, Some(ttl)));
                    BatchReply::Ok
                }
                BatchCommand::SetIfAbsent { key, value } => {
                    BatchReply::Bool(set_if_absent(&mut entries, &key, value, None))
                }
                BatchCommand::Expire { key, ttl } => {
                    BatchReply::Bool(expire(&mut entries, &key, ttl))
                }
                BatchCommand::Delete { keys } => BatchReply::Count(delete(&mut entries, &keys)),
            })
            .collect();
        Ok(replies)
    }
}
